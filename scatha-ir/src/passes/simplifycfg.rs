//! Control flow graph simplification.

use hashbrown::HashSet;

use crate::context::{ConstData, Context};
use crate::entities::Block;
use crate::function::Function;
use crate::instruction::InstData;
use crate::passes::util;
use crate::passes::{FunctionPassDesc, PassArgs, PassCategory};
use crate::value::Value;

pub(super) const DESC: FunctionPassDesc = FunctionPassDesc {
    name: "simplifycfg",
    category: PassCategory::Simplification,
    params: &[],
    run,
};

pub(super) const SPLIT_EDGES_DESC: FunctionPassDesc = FunctionPassDesc {
    name: "splitcriticaledges",
    category: PassCategory::Canonicalization,
    params: &[],
    run: run_split_edges,
};

/// Simplifies the CFG to a fixpoint:
///
/// - branches on constants and branches with equal targets become gotos;
/// - blocks that only forward to another block are threaded away;
/// - a block with a single predecessor ending in a goto is merged into it;
/// - unreachable blocks are deleted.
fn run(ctx: &mut Context, func: &mut Function, _args: &PassArgs) -> bool {
    let mut modified = false;
    loop {
        let mut changed = false;
        changed |= fold_branches(ctx, func);
        changed |= thread_trivial_forwards(func);
        changed |= merge_linear_chains(func);
        changed |= remove_unreachable(ctx, func);
        if !changed {
            break;
        }
        modified = true;
    }
    modified
}

fn fold_branches(ctx: &mut Context, func: &mut Function) -> bool {
    let mut modified = false;
    for block in func.blocks() {
        let Some(term) = func.terminator(block) else {
            continue;
        };
        let InstData::Branch {
            cond,
            then_block,
            else_block,
        } = *func.data(term)
        else {
            continue;
        };
        if then_block == else_block {
            func.replace_inst_data(term, InstData::Goto { target: then_block });
            modified = true;
            continue;
        }
        let Value::Const(c) = cond else { continue };
        let taken = match ctx.const_info(c).data {
            ConstData::Int(v) if v.is_one() => then_block,
            ConstData::Int(_) => else_block,
            // Branch on undef: either target is sound, take the first.
            ConstData::Undef => then_block,
            _ => continue,
        };
        let untaken = if taken == then_block {
            else_block
        } else {
            then_block
        };
        func.replace_inst_data(term, InstData::Goto { target: taken });
        func.remove_phi_edges(untaken, block);
        modified = true;
    }
    modified
}

/// Redirects edges through blocks that contain nothing but a goto.
fn thread_trivial_forwards(func: &mut Function) -> bool {
    let mut modified = false;
    for block in func.blocks() {
        if block == func.entry() {
            continue;
        }
        let insts = func.block_insts(block);
        if insts.len() != 1 {
            continue;
        }
        let InstData::Goto { target } = *func.data(insts[0]) else {
            continue;
        };
        if target == block {
            continue;
        }
        // A phi in the target distinguishes predecessors; threading an edge
        // is only safe if the new predecessor is not already one with a
        // different incoming value.
        let preds = func.preds(block);
        for pred in preds {
            let target_preds = func.preds(target);
            let forwarded: Vec<(crate::entities::Inst, Value)> = func
                .phis(target)
                .into_iter()
                .map(|phi| {
                    let incoming = func.data(phi).phi_incoming(block).expect("phi misses edge");
                    (phi, incoming)
                })
                .collect();
            if target_preds.contains(&pred) {
                // Already an edge; values must agree for every phi.
                let agree = forwarded.iter().all(|(phi, incoming)| {
                    func.data(*phi).phi_incoming(pred) == Some(*incoming)
                });
                if !agree {
                    continue;
                }
                util::replace_successor(func, pred, block, target);
            } else {
                util::replace_successor(func, pred, block, target);
                for (phi, incoming) in forwarded {
                    let InstData::Phi { args } = func.data(phi) else {
                        unreachable!()
                    };
                    let mut args = args.clone();
                    args.push((pred, incoming));
                    func.replace_inst_data(phi, InstData::Phi { args });
                }
            }
            modified = true;
        }
    }
    modified
}

/// Merges `b` into `a` when `a: ... goto b` is `b`'s only incoming edge.
fn merge_linear_chains(func: &mut Function) -> bool {
    let mut modified = false;
    'outer: for block in func.blocks() {
        if !func.is_block_alive(block) {
            continue;
        }
        loop {
            let Some(term) = func.terminator(block) else {
                continue 'outer;
            };
            let InstData::Goto { target } = *func.data(term) else {
                continue 'outer;
            };
            if target == block || target == func.entry() {
                continue 'outer;
            }
            let preds = func.preds(target);
            if preds.len() != 1 || preds[0] != block {
                continue 'outer;
            }
            // Single predecessor: phis in the target are trivial.
            for phi in func.phis(target) {
                let incoming = func
                    .data(phi)
                    .phi_incoming(block)
                    .expect("phi misses edge");
                func.replace_inst_with_value(phi, incoming);
            }
            func.erase_inst(term);
            for inst in func.block_insts(target).to_vec() {
                func.move_inst_to_end(inst, block);
            }
            // Successor phis now see `block` as the predecessor.
            for succ in func.succs(block) {
                for phi in func.phis(succ) {
                    let InstData::Phi { args } = func.data(phi) else {
                        unreachable!()
                    };
                    let mut args = args.clone();
                    for arg in &mut args {
                        if arg.0 == target {
                            arg.0 = block;
                        }
                    }
                    func.replace_inst_data(phi, InstData::Phi { args });
                }
            }
            func.erase_block(target);
            modified = true;
        }
    }
    modified
}

fn remove_unreachable(ctx: &mut Context, func: &mut Function) -> bool {
    let reachable = util::reachable_blocks(func);
    let dead: HashSet<Block> = func
        .blocks()
        .into_iter()
        .filter(|b| !reachable.contains(b))
        .collect();
    if dead.is_empty() {
        return false;
    }
    util::erase_blocks(ctx, func, &dead);
    true
}

/// Splits every critical edge by inserting a forwarding block.
///
/// An edge is critical if its source has several successors and its target
/// several predecessors. SSA destruction places copies on edges and needs
/// every edge to have a dedicated block.
fn run_split_edges(ctx: &mut Context, func: &mut Function, _args: &PassArgs) -> bool {
    let mut modified = false;
    for block in func.blocks() {
        if func.succs(block).len() < 2 {
            continue;
        }
        for succ in func.succs(block) {
            if func.preds(succ).len() < 2 {
                continue;
            }
            // Critical edge: route it through a fresh block placed right
            // before the target.
            let middle = func.add_block("tmp");
            let position = func.blocks().iter().position(|&b| b == succ).unwrap();
            func.move_block(middle, position);
            func.append_inst(middle, InstData::Goto { target: succ }, ctx.void_type(), None);
            let term = func.terminator(block).expect("block without terminator");
            let operands = func.data(term).operands();
            for (index, operand) in operands.iter().enumerate() {
                if *operand == Value::Block(succ) {
                    func.set_operand(term, index, Value::Block(middle));
                }
            }
            for phi in func.phis(succ) {
                let InstData::Phi { args } = func.data(phi) else {
                    unreachable!()
                };
                let mut args = args.clone();
                for arg in &mut args {
                    if arg.0 == block {
                        arg.0 = middle;
                    }
                }
                func.replace_inst_data(phi, InstData::Phi { args });
            }
            modified = true;
        }
    }
    modified
}
