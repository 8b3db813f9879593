//! IR invariant checking.
//!
//! An invariant violation is a compiler bug, not a user error: callers are
//! not expected to recover. [`assert_invariants`] panics with the formatted
//! message, [`validate`] returns it for harnesses that want to report it.

use hashbrown::{HashMap, HashSet};

use crate::context::Context;
use crate::entities::FuncId;
use crate::function::Function;
use crate::instruction::{CmpMode, InstData};
use crate::module::Module;
use crate::types::TypeData;
use crate::value::Value;

/// A violated IR invariant, with a formatted description.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invariant violation in @{function}: {message}")]
pub struct InvariantViolation {
    /// Function the violation was found in.
    pub function: String,
    /// Description of the violation.
    pub message: String,
}

fn violation(func: &Function, message: impl Into<String>) -> InvariantViolation {
    InvariantViolation {
        function: func.name().to_owned(),
        message: message.into(),
    }
}

/// Checks every function of the module. See [`validate_function`].
pub fn validate(ctx: &Context, module: &Module) -> Result<(), InvariantViolation> {
    for id in module.function_ids() {
        validate_function(ctx, module, id)?;
    }
    Ok(())
}

/// Panicking form of [`validate`].
pub fn assert_invariants(ctx: &Context, module: &Module) {
    if let Err(violation) = validate(ctx, module) {
        panic!("{violation}");
    }
}

/// Checks the structural and SSA invariants of one function:
///
/// - every block ends in a terminator, and terminators appear only there;
/// - phis sit at block heads, and their incoming lists match the
///   predecessor list;
/// - the use-def edges are consistent in both directions;
/// - operand types match the operation's expectations;
/// - every value definition dominates its uses.
pub fn validate_function(
    ctx: &Context,
    module: &Module,
    id: FuncId,
) -> Result<(), InvariantViolation> {
    let func = module.function(id);
    if func.is_empty() {
        return Err(violation(func, "function has no blocks"));
    }
    let dom = func.dominator_tree();

    // Block structure.
    for block in func.blocks() {
        let insts = func.block_insts(block);
        let Some(&last) = insts.last() else {
            return Err(violation(
                func,
                format!("block %{} is empty", func.block_name(block)),
            ));
        };
        if !func.data(last).is_terminator() {
            return Err(violation(
                func,
                format!("block %{} does not end in a terminator", func.block_name(block)),
            ));
        }
        let mut seen_non_phi = false;
        for &inst in insts {
            let data = func.data(inst);
            if data.is_terminator() && inst != last {
                return Err(violation(
                    func,
                    format!(
                        "terminator in the middle of block %{}",
                        func.block_name(block)
                    ),
                ));
            }
            match data {
                InstData::Phi { .. } if seen_non_phi => {
                    return Err(violation(
                        func,
                        format!(
                            "phi after non-phi instruction in block %{}",
                            func.block_name(block)
                        ),
                    ));
                }
                InstData::Phi { .. } => {}
                _ => seen_non_phi = true,
            }
            if func.inst_block(inst) != block {
                return Err(violation(func, "instruction parent link is stale"));
            }
        }
    }

    // Phi incoming lists equal predecessor lists (as sets).
    for block in func.blocks() {
        let preds: HashSet<_> = func.preds(block).into_iter().collect();
        for phi in func.phis(block) {
            let InstData::Phi { args } = func.data(phi) else {
                unreachable!()
            };
            let incoming: HashSet<_> = args.iter().map(|(b, _)| *b).collect();
            if incoming.len() != args.len() {
                return Err(violation(func, "phi names a predecessor twice"));
            }
            if incoming != preds {
                return Err(violation(
                    func,
                    format!(
                        "phi incoming blocks of %{} do not match the predecessors of %{}",
                        func.inst_name(phi).unwrap_or("?"),
                        func.block_name(block)
                    ),
                ));
            }
        }
    }

    // Use-def consistency, both directions.
    let mut operand_counts: HashMap<(Value, crate::entities::Inst), usize> = HashMap::new();
    for block in func.blocks() {
        for &inst in func.block_insts(block) {
            for operand in func.data(inst).operands() {
                *operand_counts.entry((operand, inst)).or_default() += 1;
            }
        }
    }
    for (&(value, user), &count) in &operand_counts {
        let recorded = func.users(value).iter().filter(|&&u| u == user).count();
        if recorded != count {
            return Err(violation(
                func,
                format!(
                    "user set of {} records {recorded} uses by one instruction, operands say {count}",
                    func.value_name(value)
                ),
            ));
        }
    }
    for block in func.blocks() {
        let block_value = Value::Block(block);
        for &user in func.users(block_value) {
            let uses = func
                .data(user)
                .operands()
                .iter()
                .filter(|&&v| v == block_value)
                .count();
            if uses == 0 {
                return Err(violation(func, "stale user edge on a block"));
            }
        }
    }

    // Types.
    for block in func.blocks() {
        for &inst in func.block_insts(block) {
            check_types(ctx, module, func, inst)?;
        }
    }

    // Definitions dominate uses.
    for block in func.blocks() {
        if !dom.is_reachable(block) {
            continue;
        }
        for &inst in func.block_insts(block) {
            let def_block = block;
            for user in func.users(Value::Inst(inst)) {
                let use_block = func.inst_block(*user);
                if !dom.is_reachable(use_block) {
                    continue;
                }
                let ok = match func.data(*user) {
                    InstData::Phi { args } => args.iter().all(|(pred, value)| {
                        *value != Value::Inst(inst) || dom.dominates(def_block, *pred)
                    }),
                    _ if use_block == def_block => {
                        let insts = func.block_insts(def_block);
                        let def_pos = insts.iter().position(|&i| i == inst).unwrap();
                        let use_pos = insts.iter().position(|&i| i == *user).unwrap();
                        def_pos < use_pos
                    }
                    _ => dom.dominates(def_block, use_block),
                };
                if !ok {
                    return Err(violation(
                        func,
                        format!(
                            "definition of %{} does not dominate a use",
                            func.inst_name(inst).unwrap_or("?")
                        ),
                    ));
                }
            }
        }
    }
    Ok(())
}

fn check_types(
    ctx: &Context,
    module: &Module,
    func: &Function,
    inst: crate::entities::Inst,
) -> Result<(), InvariantViolation> {
    let ty_of = |v: Value| func.value_type(ctx, v);
    let is_int = |t| matches!(ctx.type_info(t).data, TypeData::Int { .. });
    let is_float = |t| matches!(ctx.type_info(t).data, TypeData::Float { .. });
    let is_ptr = |t| matches!(ctx.type_info(t).data, TypeData::Ptr);
    let result = func.inst_ty(inst);
    let err = |message: String| Err(violation(func, message));
    match func.data(inst) {
        InstData::Arith { op, lhs, rhs } => {
            let (l, r) = (ty_of(*lhs), ty_of(*rhs));
            if l != r || l != result {
                return err(format!("operand type mismatch in {}", op.mnemonic()));
            }
            if op.is_float() && !is_float(l) {
                return err(format!("{} expects float operands", op.mnemonic()));
            }
            if !op.is_float() && !is_int(l) {
                return err(format!("{} expects integer operands", op.mnemonic()));
            }
        }
        InstData::Cmp {
            mode, lhs, rhs, ..
        } => {
            let (l, r) = (ty_of(*lhs), ty_of(*rhs));
            if l != r {
                return err("compare operand types differ".into());
            }
            match mode {
                CmpMode::Float if !is_float(l) => {
                    return err("fcmp expects float operands".into())
                }
                CmpMode::Signed | CmpMode::Unsigned if !is_int(l) && !is_ptr(l) => {
                    return err("integer compare expects integer operands".into())
                }
                _ => {}
            }
        }
        InstData::Load { addr } => {
            if !is_ptr(ty_of(*addr)) {
                return err("load address is not a pointer".into());
            }
        }
        InstData::Store { addr, .. } => {
            if !is_ptr(ty_of(*addr)) {
                return err("store address is not a pointer".into());
            }
        }
        InstData::GetElementPtr { base, index, .. } => {
            if !is_ptr(ty_of(*base)) {
                return err("gep base is not a pointer".into());
            }
            if !is_int(ty_of(*index)) {
                return err("gep index is not an integer".into());
            }
        }
        InstData::Branch { cond, .. } => {
            if ty_of(*cond) != ctx.bool_type() {
                return err("branch condition is not i1".into());
            }
        }
        InstData::Select { cond, then_value, else_value } => {
            if ty_of(*cond) != ctx.bool_type() {
                return err("select condition is not i1".into());
            }
            if ty_of(*then_value) != ty_of(*else_value) || ty_of(*then_value) != result {
                return err("select operand types differ".into());
            }
        }
        InstData::Phi { args } => {
            for (_, value) in args {
                if ty_of(*value) != result {
                    return err("phi incoming type mismatch".into());
                }
            }
        }
        InstData::Return { value } => {
            let expected = module.return_type(ctx, module.function_by_name(func.name()).unwrap());
            match value {
                Some(value) if ty_of(*value) != expected => {
                    return err("return value type does not match the signature".into())
                }
                None if !expected.is_void() => {
                    return err("void return in a non-void function".into())
                }
                _ => {}
            }
        }
        InstData::Call { callee, args, .. } => {
            if let Value::Func(id) = callee {
                let TypeData::Function { ret, params } =
                    ctx.type_info(module.callable(*id).ty()).data.clone()
                else {
                    return err("callee is not a function".into());
                };
                if ret != result {
                    return err("call result type does not match the callee".into());
                }
                if params.len() != args.len() {
                    return err("call argument count mismatch".into());
                }
                for (arg, param) in args.iter().zip(params) {
                    if ty_of(*arg) != param {
                        return err("call argument type mismatch".into());
                    }
                }
            }
        }
        _ => {}
    }
    Ok(())
}
