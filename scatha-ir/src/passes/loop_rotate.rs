//! Loop rotation: while-form loops become do-while form.

use hashbrown::HashMap;

use crate::analysis::Loop;
use crate::context::Context;
use crate::entities::{Block, Inst};
use crate::function::Function;
use crate::instruction::InstData;
use crate::passes::{FunctionPassDesc, PassArgs, PassCategory};
use crate::value::Value;

pub(super) const DESC: FunctionPassDesc = FunctionPassDesc {
    name: "loopro",
    category: PassCategory::Canonicalization,
    params: &[],
    run,
};

fn run(ctx: &mut Context, func: &mut Function, _args: &PassArgs) -> bool {
    // Rotating invalidates the loop forest, so restart after every change.
    let mut modified = false;
    loop {
        let forest = func.loop_forest();
        let changed = forest.loops().iter().any(|lp| rotate(ctx, func, lp));
        if !changed {
            return modified;
        }
        modified = true;
    }
}

/// Rotates a while-form loop:
///
/// ```text
/// pre:   goto header                      pre:   c0 = <guard with initial values>
/// header: phis; c = cmp; branch c, body, exit    branch c0, header, exit
/// body:  ...; goto header            =>   header: phis; goto body
///                                         body:  ...; c = cmp; branch c, header, exit
/// ```
///
/// The guard condition is re-materialized in the preheader with the phi
/// incomings substituted, so the loop body runs only when the first
/// iteration is taken. Applies when the header's non-phi code is exactly the
/// compare feeding its branch, the loop has a single latch ending in a goto,
/// and a unique preheader.
fn rotate(ctx: &mut Context, func: &mut Function, lp: &Loop) -> bool {
    let header = lp.header;
    if lp.latches.len() != 1 {
        return false;
    }
    let latch = lp.latches[0];
    if latch == header {
        // Single-block loops are already in do-while form.
        return false;
    }
    let Some(header_term) = func.terminator(header) else {
        return false;
    };
    let InstData::Branch {
        cond,
        then_block,
        else_block,
    } = *func.data(header_term)
    else {
        return false;
    };
    let (body, exit) = if lp.blocks.contains(&then_block) && !lp.blocks.contains(&else_block) {
        (then_block, else_block)
    } else if lp.blocks.contains(&else_block) && !lp.blocks.contains(&then_block) {
        (else_block, then_block)
    } else {
        return false;
    };
    // Latch must fall back to the header unconditionally.
    let latch_term = func.terminator(latch).expect("latch without terminator");
    if !matches!(*func.data(latch_term), InstData::Goto { target } if target == header) {
        return false;
    }
    // Rotation reroutes the header-to-exit edge, so values defined inside
    // the loop may only leave it through phis of the exit block; any other
    // outside use would lose its dominating definition.
    for &lb in &lp.blocks {
        for &inst in func.block_insts(lb) {
            for &user in func.users(Value::Inst(inst)) {
                let user_block = func.inst_block(user);
                if lp.blocks.contains(&user_block) {
                    continue;
                }
                if user_block == exit && matches!(func.data(user), InstData::Phi { .. }) {
                    continue;
                }
                return false;
            }
        }
    }
    // Unique preheader outside the loop.
    let preds = func.preds(header);
    let outside: Vec<Block> = preds
        .iter()
        .copied()
        .filter(|p| !lp.blocks.contains(p))
        .collect();
    if outside.len() != 1 {
        return false;
    }
    let preheader = outside[0];
    let pre_term = func.terminator(preheader).expect("block without terminator");
    if !matches!(*func.data(pre_term), InstData::Goto { target } if target == header) {
        return false;
    }
    // Header payload: phis plus at most the compare feeding the branch.
    let phis = func.phis(header);
    let insts = func.block_insts(header).to_vec();
    let payload: Vec<Inst> = insts[phis.len()..insts.len() - 1].to_vec();
    let cmp = match payload.as_slice() {
        [] => None,
        [cmp] => {
            let users = func.users(Value::Inst(*cmp));
            if cond != Value::Inst(*cmp) || users.iter().any(|&u| u != header_term) {
                return false;
            }
            Some(*cmp)
        }
        _ => return false,
    };
    // Values the preheader version of the guard substitutes: header phis map
    // to their preheader incoming.
    let mut substitution: HashMap<Value, Value> = HashMap::new();
    for &phi in &phis {
        let incoming = func
            .data(phi)
            .phi_incoming(preheader)
            .expect("phi misses the preheader edge");
        substitution.insert(Value::Inst(phi), incoming);
    }
    // Every exit phi incoming must be re-expressible at the preheader; check
    // before any mutation.
    for phi in func.phis(exit) {
        let incoming = func
            .data(phi)
            .phi_incoming(header)
            .expect("exit phi misses the header edge");
        if substitution.contains_key(&incoming) {
            continue;
        }
        if let Value::Inst(def) = incoming {
            if lp.blocks.contains(&func.inst_block(def)) {
                return false;
            }
        }
    }
    let guard_cond = match cmp {
        None => *substitution.get(&cond).unwrap_or(&cond),
        Some(cmp) => {
            let mut data = func.data(cmp).clone();
            let operands = data.operands();
            for (index, operand) in operands.iter().enumerate() {
                if let Some(&replacement) = substitution.get(operand) {
                    data.set_operand(index, replacement);
                }
                // Operands defined inside the loop (other than phis) would
                // not dominate the preheader.
                if let Value::Inst(def) = operand {
                    if lp.blocks.contains(&func.inst_block(*def))
                        && !substitution.contains_key(operand)
                    {
                        return false;
                    }
                }
            }
            let ty = func.inst_ty(cmp);
            let guard = func.insert_inst_before(pre_term, data, ty, Some("guard"));
            Value::Inst(guard)
        }
    };
    // The latch tests the condition of the NEXT iteration: header phis map
    // to their latch incomings.
    let mut latch_subst: HashMap<Value, Value> = HashMap::new();
    for &phi in &phis {
        let incoming = func
            .data(phi)
            .phi_incoming(latch)
            .expect("phi misses the latch edge");
        latch_subst.insert(Value::Inst(phi), incoming);
    }
    // The latch test is built after the old header compare is erased, so
    // its name carries over; only the clone is prepared here.
    let latch_clone = cmp.map(|cmp| {
        let mut data = func.data(cmp).clone();
        let operands = data.operands();
        for (index, operand) in operands.iter().enumerate() {
            if let Some(&replacement) = latch_subst.get(operand) {
                data.set_operand(index, replacement);
            }
        }
        (
            data,
            func.inst_ty(cmp),
            func.inst_name(cmp).unwrap_or("cond").to_owned(),
        )
    });
    // Exit phis gain edges from the preheader and the latch in place of the
    // header, each carrying the value as seen at that exit.
    let exit_phis: Vec<Inst> = func.phis(exit);
    for phi in &exit_phis {
        let incoming = func
            .data(*phi)
            .phi_incoming(header)
            .expect("exit phi misses the header edge");
        let pre_value = *substitution.get(&incoming).unwrap_or(&incoming);
        let latch_value = *latch_subst.get(&incoming).unwrap_or(&incoming);
        let InstData::Phi { args } = func.data(*phi) else {
            unreachable!()
        };
        let mut args = args.clone();
        args.retain(|(pred, _)| *pred != header);
        args.push((preheader, pre_value));
        args.push((latch, latch_value));
        func.replace_inst_data(*phi, InstData::Phi { args });
    }
    // Rewire: preheader guards, header falls through to the body, the latch
    // carries the loop test.
    func.replace_inst_data(
        pre_term,
        InstData::Branch {
            cond: guard_cond,
            then_block: header,
            else_block: exit,
        },
    );
    func.replace_inst_data(header_term, InstData::Goto { target: body });
    // The header compare fed only the old branch; erase it before creating
    // the latch test so the name stays available.
    if let Some(cmp) = cmp {
        if func.users(Value::Inst(cmp)).is_empty() {
            func.erase_inst(cmp);
        }
    }
    let latch_cond = match latch_clone {
        None => *latch_subst.get(&cond).unwrap_or(&cond),
        Some((data, ty, name)) => {
            let next = func.insert_inst_before(latch_term, data, ty, Some(&name));
            Value::Inst(next)
        }
    };
    let (then_b, else_b) = if body == then_block {
        (header, exit)
    } else {
        (exit, header)
    };
    func.replace_inst_data(
        latch_term,
        InstData::Branch {
            cond: latch_cond,
            then_block: then_b,
            else_block: else_b,
        },
    );
    true
}
