//! Helpers shared between passes.

use hashbrown::HashSet;
use scatha_types::{ApFloat, ApInt};

use crate::context::{ConstData, Context};
use crate::entities::{Block, Const, Type};
use crate::function::Function;
use crate::instruction::{ArithOp, CmpMode, CmpRel, ConvOp, UnaryArithOp};
use crate::types::TypeData;
use crate::value::Value;

/// Folds a binary arithmetic operation over constants. `None` if the
/// operation does not fold (division by zero, oversized shifts).
pub fn fold_arith(ctx: &mut Context, op: ArithOp, lhs: Const, rhs: Const) -> Option<Const> {
    let (l, r) = (
        ctx.const_info(lhs).data.clone(),
        ctx.const_info(rhs).data.clone(),
    );
    if matches!(l, ConstData::Undef) || matches!(r, ConstData::Undef) {
        let ty = ctx.const_info(lhs).ty;
        return Some(ctx.undef(ty));
    }
    match (l, r) {
        (ConstData::Int(a), ConstData::Int(b)) => {
            let value = match op {
                ArithOp::Add => a.add(b),
                ArithOp::Sub => a.sub(b),
                ArithOp::Mul => a.mul(b),
                ArithOp::SDiv => a.sdiv(b)?,
                ArithOp::UDiv => a.udiv(b)?,
                ArithOp::SRem => a.srem(b)?,
                ArithOp::URem => a.urem(b)?,
                ArithOp::Shl => a.shl(b)?,
                ArithOp::LShr => a.lshr(b)?,
                ArithOp::AShr => a.ashr(b)?,
                ArithOp::And => a.and(b),
                ArithOp::Or => a.or(b),
                ArithOp::Xor => a.xor(b),
                _ => return None,
            };
            Some(ctx.apint_const(value))
        }
        (ConstData::Float(a), ConstData::Float(b)) => {
            let value = match op {
                ArithOp::FAdd => a.add(b),
                ArithOp::FSub => a.sub(b),
                ArithOp::FMul => a.mul(b),
                ArithOp::FDiv => a.div(b),
                _ => return None,
            };
            Some(ctx.apfloat_const(value))
        }
        _ => None,
    }
}

/// Folds a unary arithmetic operation over a constant.
pub fn fold_unary(ctx: &mut Context, op: UnaryArithOp, operand: Const) -> Option<Const> {
    let ty = ctx.const_info(operand).ty;
    match (op, ctx.const_info(operand).data.clone()) {
        (_, ConstData::Undef) => Some(ctx.undef(ty)),
        (UnaryArithOp::Neg, ConstData::Int(v)) => Some(ctx.apint_const(v.neg())),
        (UnaryArithOp::Neg, ConstData::Float(v)) => Some(ctx.apfloat_const(v.neg())),
        (UnaryArithOp::BitNot, ConstData::Int(v)) => Some(ctx.apint_const(v.not())),
        (UnaryArithOp::LogNot, ConstData::Int(v)) if v.bitwidth() == 1 => {
            Some(ctx.apint_const(v.xor(ApInt::one(1))))
        }
        _ => None,
    }
}

/// Folds a comparison over constants.
pub fn fold_cmp(
    ctx: &mut Context,
    mode: CmpMode,
    rel: CmpRel,
    lhs: Const,
    rhs: Const,
) -> Option<Const> {
    let (l, r) = (
        ctx.const_info(lhs).data.clone(),
        ctx.const_info(rhs).data.clone(),
    );
    if matches!(l, ConstData::Undef) || matches!(r, ConstData::Undef) {
        let ty = ctx.bool_type();
        return Some(ctx.undef(ty));
    }
    let result = match (mode, l, r) {
        (CmpMode::Signed, ConstData::Int(a), ConstData::Int(b)) => rel.evaluate(a.scmp(b)),
        (CmpMode::Unsigned, ConstData::Int(a), ConstData::Int(b)) => rel.evaluate(a.ucmp(b)),
        (CmpMode::Float, ConstData::Float(a), ConstData::Float(b)) => {
            match a.partial_cmp_value(&b) {
                Some(ord) => rel.evaluate(ord),
                // Unordered: only `ne` holds.
                None => rel == CmpRel::Ne,
            }
        }
        (_, ConstData::Null, ConstData::Null) => rel.evaluate(core::cmp::Ordering::Equal),
        _ => return None,
    };
    let ty = ctx.bool_type();
    Some(ctx.int_const(result as u64, ty))
}

/// Folds a conversion over a constant.
pub fn fold_conv(ctx: &mut Context, op: ConvOp, operand: Const, target: Type) -> Option<Const> {
    let data = ctx.const_info(operand).data.clone();
    if matches!(data, ConstData::Undef) {
        return Some(ctx.undef(target));
    }
    let target_bits = match ctx.type_info(target).data {
        TypeData::Int { bits } | TypeData::Float { bits } => bits,
        TypeData::Ptr => 64,
        _ => return None,
    };
    match (op, data) {
        (ConvOp::Sext, ConstData::Int(v)) => Some(ctx.apint_const(v.sext(target_bits))),
        (ConvOp::Zext, ConstData::Int(v)) => Some(ctx.apint_const(v.zext(target_bits))),
        (ConvOp::Trunc, ConstData::Int(v)) => Some(ctx.apint_const(v.trunc(target_bits))),
        (ConvOp::Sitofp, ConstData::Int(v)) => Some(ctx.apfloat_const(
            ApFloat::with_width(v.as_i64() as f64, target_bits),
        )),
        (ConvOp::Uitofp, ConstData::Int(v)) => Some(ctx.apfloat_const(
            ApFloat::with_width(v.as_u64() as f64, target_bits),
        )),
        (ConvOp::Fptosi, ConstData::Float(v)) => Some(ctx.apint_const(ApInt::from_i64(
            v.value() as i64,
            target_bits,
        ))),
        (ConvOp::Fptoui, ConstData::Float(v)) => Some(ctx.apint_const(ApInt::new(
            v.value() as u64,
            target_bits,
        ))),
        (ConvOp::Fpext, ConstData::Float(v)) | (ConvOp::Fptrunc, ConstData::Float(v)) => {
            Some(ctx.apfloat_const(v.convert(target_bits)))
        }
        (ConvOp::Bitcast, ConstData::Int(v)) => match ctx.type_info(target).data {
            TypeData::Float { bits } if bits == v.bitwidth() => Some(ctx.apfloat_const(
                match bits {
                    32 => ApFloat::F32(v.as_u64() as u32),
                    _ => ApFloat::F64(v.as_u64()),
                },
            )),
            TypeData::Int { bits } if bits == v.bitwidth() => Some(operand),
            _ => None,
        },
        (ConvOp::Bitcast, ConstData::Float(v)) => match ctx.type_info(target).data {
            TypeData::Int { bits } if bits == v.bitwidth() => {
                Some(ctx.apint_const(ApInt::new(v.to_bits(), bits)))
            }
            TypeData::Float { bits } if bits == v.bitwidth() => Some(operand),
            _ => None,
        },
        (ConvOp::Ptrtoint, ConstData::Null) => Some(ctx.apint_const(ApInt::zero(target_bits))),
        (ConvOp::Inttoptr, ConstData::Int(v)) if v.is_zero() => Some(ctx.null_ptr()),
        _ => None,
    }
}

/// Blocks reachable from the entry, in DFS preorder.
pub fn reachable_blocks(func: &Function) -> HashSet<Block> {
    let mut reachable = HashSet::new();
    if func.is_empty() {
        return reachable;
    }
    let mut stack = vec![func.entry()];
    while let Some(block) = stack.pop() {
        if !reachable.insert(block) {
            continue;
        }
        for succ in func.succs(block) {
            stack.push(succ);
        }
    }
    reachable
}

/// Erases a set of blocks wholesale: phi edges into surviving blocks are
/// dropped, all cross references inside the set are cut with `undef`.
pub fn erase_blocks(ctx: &mut Context, func: &mut Function, dead: &HashSet<Block>) {
    // Cut value references out of the dead region.
    for &block in dead {
        for inst in func.block_insts(block).to_vec() {
            let ty = func.inst_ty(inst);
            if !ty.is_void() {
                let undef = ctx.undef(ty);
                func.replace_all_uses(Value::Inst(inst), Value::Const(undef));
            }
        }
    }
    // Drop phi entries for edges from dead blocks.
    for &block in dead {
        for succ in func.succs(block) {
            if !dead.contains(&succ) {
                func.remove_phi_edges(succ, block);
            }
        }
    }
    // Erase instructions, terminators first so label uses disappear.
    for &block in dead {
        for inst in func.block_insts(block).to_vec().into_iter().rev() {
            func.erase_inst(inst);
        }
    }
    for &block in dead {
        func.erase_block(block);
    }
}

/// Redirects every occurrence of `old` in `block`'s terminator to `new`,
/// updating the phis of both targets.
pub fn replace_successor(func: &mut Function, block: Block, old: Block, new: Block) {
    let term = func.terminator(block).expect("block without terminator");
    let operands = func.data(term).operands();
    for (index, operand) in operands.iter().enumerate() {
        if *operand == Value::Block(old) {
            func.set_operand(term, index, Value::Block(new));
        }
    }
    // `block` is no longer a predecessor of `old`.
    func.remove_phi_edges(old, block);
}
