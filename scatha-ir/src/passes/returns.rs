//! Return canonicalization shims.
//!
//! `unifyreturns` funnels every return through one exit block, for passes
//! that assume a single return. `splitreturns` undoes the funnel by pulling
//! the return into each predecessor, the form tail call elimination wants.

use smallvec::SmallVec;

use crate::context::Context;
use crate::function::Function;
use crate::instruction::InstData;
use crate::passes::{FunctionPassDesc, PassArgs, PassCategory};
use crate::value::Value;

pub(super) const UNIFY_DESC: FunctionPassDesc = FunctionPassDesc {
    name: "unifyreturns",
    category: PassCategory::Canonicalization,
    params: &[],
    run: run_unify,
};

pub(super) const SPLIT_DESC: FunctionPassDesc = FunctionPassDesc {
    name: "splitreturns",
    category: PassCategory::Canonicalization,
    params: &[],
    run: run_split,
};

fn run_unify(ctx: &mut Context, func: &mut Function, _args: &PassArgs) -> bool {
    let mut returns = Vec::new();
    for block in func.blocks() {
        if let Some(term) = func.terminator(block) {
            if let InstData::Return { value } = func.data(term) {
                returns.push((block, term, *value));
            }
        }
    }
    if returns.len() <= 1 {
        return false;
    }
    let exit = func.add_block("return.unified");
    let void = ctx.void_type();
    let is_void = returns[0].2.is_none();
    let phi_value = if is_void {
        None
    } else {
        let ty = returns
            .iter()
            .find_map(|(_, _, v)| v.map(|v| func.value_type(ctx, v)))
            .expect("non-void return without value");
        let args: SmallVec<[(crate::entities::Block, Value); 2]> = returns
            .iter()
            .map(|(block, _, value)| (*block, value.expect("mixed return forms")))
            .collect();
        Some(Value::Inst(func.append_inst(
            exit,
            InstData::Phi { args },
            ty,
            Some("retval"),
        )))
    };
    for (_, term, _) in &returns {
        func.replace_inst_data(*term, InstData::Goto { target: exit });
    }
    func.append_inst(exit, InstData::Return { value: phi_value }, void, None);
    true
}

fn run_split(ctx: &mut Context, func: &mut Function, _args: &PassArgs) -> bool {
    let mut modified = false;
    for block in func.blocks() {
        if !func.is_block_alive(block) {
            continue;
        }
        let insts = func.block_insts(block).to_vec();
        // The block must be a pure exit: an optional phi feeding the return
        // and nothing else.
        let (phi, term) = match insts.as_slice() {
            [term] => (None, *term),
            [phi, term] => (Some(*phi), *term),
            _ => continue,
        };
        let InstData::Return { value } = *func.data(term) else {
            continue;
        };
        let phi = match phi {
            Some(phi) if matches!(func.data(phi), InstData::Phi { .. }) => {
                // Only a phi consumed solely by this return splits cleanly.
                if value != Some(Value::Inst(phi)) || func.users(Value::Inst(phi)).len() != 1 {
                    continue;
                }
                Some(phi)
            }
            Some(_) => continue,
            None => None,
        };
        let preds = func.preds(block);
        if preds.is_empty() || block == func.entry() {
            continue;
        }
        // Every predecessor must fall in unconditionally.
        if preds
            .iter()
            .any(|&pred| !matches!(func.data(func.terminator(pred).unwrap()), InstData::Goto { .. }))
        {
            continue;
        }
        for &pred in &preds {
            let incoming = match phi {
                Some(phi) => Some(
                    func.data(phi)
                        .phi_incoming(pred)
                        .expect("phi misses an edge"),
                ),
                None => value,
            };
            let pred_term = func.terminator(pred).unwrap();
            func.replace_inst_data(pred_term, InstData::Return { value: incoming });
        }
        // The exit block is now unreachable.
        if let Some(phi) = phi {
            func.erase_inst(term);
            let undef = {
                let ty = func.inst_ty(phi);
                ctx.undef(ty)
            };
            func.replace_all_uses(Value::Inst(phi), Value::Const(undef));
            func.erase_inst(phi);
        } else {
            func.erase_inst(term);
        }
        func.erase_block(block);
        modified = true;
    }
    modified
}
