//! Tail recursion elimination.

use smallvec::SmallVec;

use crate::context::Context;
use crate::entities::{Block, Inst};
use crate::function::Function;
use crate::instruction::InstData;
use crate::passes::{FunctionPassDesc, PassArgs, PassCategory};
use crate::value::Value;

pub(super) const DESC: FunctionPassDesc = FunctionPassDesc {
    name: "tre",
    category: PassCategory::Simplification,
    params: &[],
    run,
};

/// Self calls in tail position: `%r = call @self, ...; return %r` (or a
/// void call directly followed by `return`), with the call result unused
/// elsewhere.
fn find_tail_calls(func: &Function) -> Vec<(Block, Inst, Inst)> {
    let Some(self_id) = func.self_id() else {
        return Vec::new();
    };
    let mut sites = Vec::new();
    for block in func.blocks() {
        let insts = func.block_insts(block);
        if insts.len() < 2 {
            continue;
        }
        let term = insts[insts.len() - 1];
        let call = insts[insts.len() - 2];
        let InstData::Return { value } = func.data(term) else {
            continue;
        };
        let InstData::Call { callee, .. } = func.data(call) else {
            continue;
        };
        if *callee != Value::Func(self_id) {
            continue;
        }
        let returns_result = *value == Some(Value::Inst(call));
        let void_tail = value.is_none() && func.inst_ty(call).is_void();
        if !returns_result && !void_tail {
            continue;
        }
        if func
            .users(Value::Inst(call))
            .iter()
            .any(|&user| user != term)
        {
            continue;
        }
        sites.push((block, call, term));
    }
    sites
}

/// Rewrites self tail calls into back edges to the entry, joining the
/// parameters with phis.
fn run(ctx: &mut Context, func: &mut Function, _args: &PassArgs) -> bool {
    let sites = find_tail_calls(func);
    if sites.is_empty() {
        return false;
    }
    let old_entry = func.entry();
    // An entry with existing predecessors would need its phis repaired for
    // every new back edge; such shapes do not come out of irgen.
    if !func.preds(old_entry).is_empty() {
        return false;
    }
    // Fresh entry that jumps into the loop the recursion becomes.
    let new_entry = func.add_block("tre.entry");
    func.move_block(new_entry, 0);
    let void = ctx.void_type();
    func.append_inst(new_entry, InstData::Goto { target: old_entry }, void, None);

    // One phi per parameter joins the initial value with each recursive
    // argument.
    let params: Vec<(u32, crate::entities::Type, String)> = func
        .params()
        .iter()
        .enumerate()
        .map(|(i, p)| (i as u32, p.ty, p.name.clone()))
        .collect();
    let mut phis = Vec::new();
    for (index, ty, name) in &params {
        let args: SmallVec<[(Block, Value); 2]> =
            smallvec::smallvec![(new_entry, Value::Param(*index))];
        let phi = func.insert_inst_at(
            old_entry,
            phis.len(),
            InstData::Phi { args },
            *ty,
            Some(&format!("{name}.tre")),
        );
        phis.push(phi);
    }
    for (position, (index, _, _)) in params.iter().enumerate() {
        let phi = phis[position];
        func.replace_all_uses(Value::Param(*index), Value::Inst(phi));
        // The phi's entry edge must keep feeding in the parameter itself.
        func.set_operand(phi, 1, Value::Param(*index));
    }

    for (block, call, term) in sites {
        let InstData::Call { args, .. } = func.data(call).clone() else {
            unreachable!()
        };
        func.erase_inst(term);
        let call_ty = func.inst_ty(call);
        if !call_ty.is_void() {
            let undef = ctx.undef(call_ty);
            func.replace_all_uses(Value::Inst(call), Value::Const(undef));
        }
        func.erase_inst(call);
        func.append_inst(block, InstData::Goto { target: old_entry }, void, None);
        for (position, phi) in phis.iter().enumerate() {
            let InstData::Phi { args: phi_args } = func.data(*phi) else {
                unreachable!()
            };
            let mut phi_args = phi_args.clone();
            phi_args.push((block, args[position]));
            func.replace_inst_data(*phi, InstData::Phi { args: phi_args });
        }
    }
    true
}
