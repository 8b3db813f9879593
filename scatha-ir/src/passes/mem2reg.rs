//! Promotion of scalar allocas to SSA values.

use hashbrown::{HashMap, HashSet};
use smallvec::SmallVec;

use crate::context::Context;
use crate::entities::{Block, Inst};
use crate::function::Function;
use crate::instruction::InstData;
use crate::passes::{FunctionPassDesc, PassArgs, PassCategory};
use crate::value::Value;

pub(super) const DESC: FunctionPassDesc = FunctionPassDesc {
    name: "memtoreg",
    category: PassCategory::Canonicalization,
    params: &[],
    run,
};

/// An alloca is promotable iff it allocates a single object and every use is
/// a direct load or store of exactly the allocated type (the address itself
/// never escapes, not even as a stored value).
fn promotable(ctx: &Context, func: &Function, inst: Inst) -> bool {
    let InstData::Alloca { allocated, count } = func.data(inst) else {
        return false;
    };
    match count {
        Value::Const(c) => match ctx.const_int(*c) {
            Some(v) if v.is_one() => {}
            _ => return false,
        },
        _ => return false,
    }
    let addr = Value::Inst(inst);
    func.users(addr).iter().all(|&user| match func.data(user) {
        InstData::Load { addr: a } => *a == addr && func.inst_ty(user) == *allocated,
        InstData::Store { addr: a, value } => {
            *a == addr && *value != addr && func.value_type(ctx, *value) == *allocated
        }
        _ => false,
    })
}

fn run(ctx: &mut Context, func: &mut Function, _args: &PassArgs) -> bool {
    // The renaming walk only visits reachable blocks, so uses in unreachable
    // code block promotion. simplifycfg removes such code first.
    let reachable = crate::passes::util::reachable_blocks(func);
    let allocas: Vec<Inst> = func
        .blocks()
        .into_iter()
        .filter(|b| reachable.contains(b))
        .flat_map(|b| func.block_insts(b).to_vec())
        .filter(|&inst| {
            promotable(ctx, func, inst)
                && func
                    .users(Value::Inst(inst))
                    .iter()
                    .all(|&u| reachable.contains(&func.inst_block(u)))
        })
        .collect();
    if allocas.is_empty() {
        return false;
    }
    for alloca in &allocas {
        promote(ctx, func, *alloca);
    }
    prune_dead_phis(ctx, func);
    true
}

/// Standard SSA construction for one alloca: phis at the iterated dominance
/// frontier of the store blocks, then a renaming walk over the dominator
/// tree.
fn promote(ctx: &mut Context, func: &mut Function, alloca: Inst) {
    let InstData::Alloca { allocated, .. } = *func.data(alloca) else {
        unreachable!()
    };
    let dom = func.dominator_tree();
    let addr = Value::Inst(alloca);

    let mut def_blocks: Vec<Block> = Vec::new();
    for &user in func.users(addr) {
        if matches!(func.data(user), InstData::Store { .. }) {
            let block = func.inst_block(user);
            if !def_blocks.contains(&block) {
                def_blocks.push(block);
            }
        }
    }

    // Phi placement at the iterated dominance frontier.
    let mut phi_blocks: HashSet<Block> = HashSet::new();
    let mut worklist = def_blocks.clone();
    while let Some(block) = worklist.pop() {
        for &frontier in dom.frontier(block) {
            if phi_blocks.insert(frontier) && !def_blocks.contains(&frontier) {
                worklist.push(frontier);
            }
        }
    }
    let mut phis: HashMap<Block, Inst> = HashMap::new();
    for &block in &phi_blocks {
        let args: SmallVec<[(Block, Value); 2]> = func
            .preds(block)
            .into_iter()
            .map(|pred| (pred, Value::Const(ctx.undef(allocated))))
            .collect();
        let phi = func.insert_inst_at(block, 0, InstData::Phi { args }, allocated, Some("promoted"));
        phis.insert(block, phi);
    }

    // Renaming walk: dominator tree preorder with the reaching value carried
    // down the tree.
    let mut reaching: HashMap<Block, Value> = HashMap::new();
    for block in dom.preorder() {
        let incoming = dom
            .idom(block)
            .and_then(|idom| reaching.get(&idom).copied())
            .unwrap_or(Value::Const(ctx.undef(allocated)));
        let mut value = match phis.get(&block) {
            Some(&phi) => Value::Inst(phi),
            None => incoming,
        };
        for inst in func.block_insts(block).to_vec() {
            match func.data(inst).clone() {
                InstData::Load { addr: a } if a == addr => {
                    func.replace_inst_with_value(inst, value);
                }
                InstData::Store { addr: a, value: v } if a == addr => {
                    value = v;
                    func.erase_inst(inst);
                }
                _ => {}
            }
        }
        reaching.insert(block, value);
        // Feed the phis of CFG successors.
        for succ in func.succs(block) {
            if let Some(&phi) = phis.get(&succ) {
                let InstData::Phi { args } = func.data(phi) else {
                    unreachable!()
                };
                if let Some(position) = args.iter().position(|(pred, _)| *pred == block) {
                    func.set_operand(phi, position * 2 + 1, value);
                }
            }
        }
    }
    func.erase_inst(alloca);
}

/// Erases phis that only feed other dead phis.
fn prune_dead_phis(ctx: &mut Context, func: &mut Function) {
    loop {
        let mut dead: Vec<Inst> = Vec::new();
        for block in func.blocks() {
            for phi in func.phis(block) {
                let users = func.users(Value::Inst(phi));
                if users.is_empty() || users.iter().all(|&u| u == phi) {
                    dead.push(phi);
                }
            }
        }
        if dead.is_empty() {
            return;
        }
        for phi in dead {
            let ty = func.inst_ty(phi);
            let undef = ctx.undef(ty);
            func.replace_all_uses(Value::Inst(phi), Value::Const(undef));
            func.erase_inst(phi);
        }
    }
}
