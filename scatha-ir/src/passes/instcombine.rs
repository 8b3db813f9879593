//! Algebraic instruction combining.

use crate::context::{ConstData, Context};
use crate::entities::{Const, Inst};
use crate::function::Function;
use crate::instruction::{ArithOp, CmpMode, ConvOp, InstData};
use crate::passes::util;
use crate::passes::{FunctionPassDesc, PassArgs, PassCategory};
use crate::value::Value;

pub(super) const DESC: FunctionPassDesc = FunctionPassDesc {
    name: "instcombine",
    category: PassCategory::Simplification,
    params: &[],
    run,
};

fn const_of(value: Value) -> Option<Const> {
    value.as_const()
}

fn as_int(ctx: &Context, value: Value) -> Option<scatha_types::ApInt> {
    ctx.const_int(value.as_const()?)
}

enum Rewrite {
    /// Replace the instruction's result with a value and erase it.
    Value(Value),
    /// Replace the operation in place.
    Data(InstData),
    /// No simplification.
    Keep,
}

fn simplify(ctx: &mut Context, func: &Function, inst: Inst) -> Rewrite {
    match func.data(inst).clone() {
        InstData::Arith { op, lhs, rhs } => simplify_arith(ctx, func, inst, op, lhs, rhs),
        InstData::UnaryArith { op, operand } => match const_of(operand) {
            Some(c) => match util::fold_unary(ctx, op, c) {
                Some(folded) => Rewrite::Value(Value::Const(folded)),
                None => Rewrite::Keep,
            },
            None => {
                // Double negation and double complement cancel.
                if let Value::Inst(def) = operand {
                    if let InstData::UnaryArith {
                        op: inner,
                        operand: prev,
                    } = func.data(def)
                    {
                        if *inner == op {
                            return Rewrite::Value(*prev);
                        }
                    }
                }
                Rewrite::Keep
            }
        },
        InstData::Cmp {
            mode,
            rel,
            lhs,
            rhs,
        } => {
            if let (Some(a), Some(b)) = (const_of(lhs), const_of(rhs)) {
                if let Some(folded) = util::fold_cmp(ctx, mode, rel, a, b) {
                    return Rewrite::Value(Value::Const(folded));
                }
            }
            // Reflexive integer compares are decided by the relation alone.
            if lhs == rhs && mode != CmpMode::Float {
                let value = rel.evaluate(core::cmp::Ordering::Equal);
                let ty = ctx.bool_type();
                return Rewrite::Value(Value::Const(ctx.int_const(value as u64, ty)));
            }
            Rewrite::Keep
        }
        InstData::Conv { op, operand } => {
            let target = func.inst_ty(inst);
            if let Some(c) = const_of(operand) {
                if let Some(folded) = util::fold_conv(ctx, op, c, target) {
                    return Rewrite::Value(Value::Const(folded));
                }
            }
            if op == ConvOp::Bitcast {
                // A bitcast to the operand's own type is a copy; a bitcast of
                // a bitcast undoes the inner one.
                if func.value_type(ctx, operand) == target {
                    return Rewrite::Value(operand);
                }
                if let Value::Inst(def) = operand {
                    if let InstData::Conv {
                        op: ConvOp::Bitcast,
                        operand: prev,
                    } = *func.data(def)
                    {
                        if func.value_type(ctx, prev) == target {
                            return Rewrite::Value(prev);
                        }
                    }
                }
            }
            Rewrite::Keep
        }
        InstData::Select {
            cond,
            then_value,
            else_value,
        } => {
            if then_value == else_value {
                return Rewrite::Value(then_value);
            }
            match const_of(cond).map(|c| ctx.const_info(c).data.clone()) {
                Some(ConstData::Int(v)) if v.is_one() => Rewrite::Value(then_value),
                Some(ConstData::Int(_)) => Rewrite::Value(else_value),
                _ => Rewrite::Keep,
            }
        }
        InstData::Phi { args } => {
            // A phi whose incomings agree (ignoring self references) is that
            // value.
            let mut unique: Option<Value> = None;
            for (_, value) in &args {
                if *value == Value::Inst(inst) {
                    continue;
                }
                match unique {
                    None => unique = Some(*value),
                    Some(existing) if existing == *value => {}
                    Some(_) => return Rewrite::Keep,
                }
            }
            match unique {
                Some(value) => Rewrite::Value(value),
                None => Rewrite::Keep,
            }
        }
        InstData::GetElementPtr {
            base,
            index,
            members,
            ..
        } => {
            let zero_index = as_int(ctx, index).is_some_and(|v| v.is_zero());
            if zero_index && members.is_empty() {
                return Rewrite::Value(base);
            }
            Rewrite::Keep
        }
        InstData::ExtractValue { aggregate, indices } => {
            if let Value::Inst(def) = aggregate {
                if let InstData::InsertValue {
                    aggregate: inner,
                    value,
                    indices: inserted,
                } = func.data(def).clone()
                {
                    if inserted == indices {
                        return Rewrite::Value(value);
                    }
                    // Disjoint paths look through the insert.
                    if inserted
                        .iter()
                        .zip(indices.iter())
                        .any(|(a, b)| a != b)
                    {
                        return Rewrite::Data(InstData::ExtractValue {
                            aggregate: inner,
                            indices,
                        });
                    }
                }
            }
            Rewrite::Keep
        }
        _ => Rewrite::Keep,
    }
}

fn simplify_arith(
    ctx: &mut Context,
    func: &Function,
    inst: Inst,
    op: ArithOp,
    lhs: Value,
    rhs: Value,
) -> Rewrite {
    if let (Some(a), Some(b)) = (const_of(lhs), const_of(rhs)) {
        if let Some(folded) = util::fold_arith(ctx, op, a, b) {
            return Rewrite::Value(Value::Const(folded));
        }
    }
    // Canonical order: constant on the right of commutative operations.
    if op.is_commutative() && lhs.as_const().is_some() && rhs.as_const().is_none() {
        return Rewrite::Data(InstData::Arith {
            op,
            lhs: rhs,
            rhs: lhs,
        });
    }
    let rhs_int = as_int(ctx, rhs);
    let ty = func.inst_ty(inst);
    match op {
        ArithOp::Add | ArithOp::Sub | ArithOp::Shl | ArithOp::LShr | ArithOp::AShr
        | ArithOp::Or | ArithOp::Xor => {
            if rhs_int.as_ref().is_some_and(|v| v.is_zero()) {
                return Rewrite::Value(lhs);
            }
        }
        ArithOp::Mul => match &rhs_int {
            Some(v) if v.is_one() => return Rewrite::Value(lhs),
            Some(v) if v.is_zero() => {
                return Rewrite::Value(Value::Const(ctx.int_const(0, ty)))
            }
            _ => {}
        },
        ArithOp::SDiv | ArithOp::UDiv => {
            if rhs_int.as_ref().is_some_and(|v| v.is_one()) {
                return Rewrite::Value(lhs);
            }
        }
        ArithOp::And => match &rhs_int {
            Some(v) if v.is_zero() => {
                return Rewrite::Value(Value::Const(ctx.int_const(0, ty)))
            }
            Some(v) if v.is_all_ones() => return Rewrite::Value(lhs),
            _ => {}
        },
        _ => {}
    }
    match op {
        ArithOp::Sub | ArithOp::Xor if lhs == rhs => {
            return Rewrite::Value(Value::Const(ctx.int_const(0, ty)));
        }
        ArithOp::And | ArithOp::Or if lhs == rhs => return Rewrite::Value(lhs),
        _ => {}
    }
    Rewrite::Keep
}

/// Worklist driver: simplifications enqueue the users of the replaced value,
/// so chains collapse in one run.
fn run(ctx: &mut Context, func: &mut Function, _args: &PassArgs) -> bool {
    let mut worklist: Vec<Inst> = func
        .blocks()
        .into_iter()
        .flat_map(|b| func.block_insts(b).to_vec())
        .collect();
    let mut modified = false;
    while let Some(inst) = worklist.pop() {
        if !func.is_inst_alive(inst)
            || func.data(inst).has_side_effects()
            || func.inst_ty(inst).is_void()
        {
            continue;
        }
        match simplify(ctx, func, inst) {
            Rewrite::Value(value) => {
                for &user in func.users(Value::Inst(inst)) {
                    if user != inst {
                        worklist.push(user);
                    }
                }
                if let Value::Inst(new_def) = value {
                    worklist.push(new_def);
                }
                func.replace_inst_with_value(inst, value);
                modified = true;
            }
            Rewrite::Data(data) => {
                func.replace_inst_data(inst, data);
                worklist.push(inst);
                modified = true;
            }
            Rewrite::Keep => {}
        }
    }
    modified
}
