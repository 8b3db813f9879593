//! SSA destruction.
//!
//! Phis become copies on the incoming edges (critical edges were split
//! before lowering), SSA registers become virtual registers, call arguments
//! move into callee registers, return values into the low hardware
//! registers. Self tail calls collapse into a jump back to the entry block.

use hashbrown::HashMap;

use crate::function::Function;
use crate::inst::{Block, CallTarget, Inst, InstData, Value};
use crate::reg::{Reg, RegClass};

/// Runs SSA destruction on `func`, which sits at `self_index` in its
/// module.
pub fn run(func: &mut Function, self_index: usize) -> bool {
    demote_ssa_registers(func);
    let modified = eliminate_phis(func) | lower_calls(func, self_index) | lower_returns(func);
    modified
}

fn demote_ssa_registers(func: &mut Function) {
    let count = func.reg_count(RegClass::Ssa);
    func.reserve_regs(RegClass::Virtual, count);
    for index in 0..count {
        let old = Reg::ssa(index);
        let new = Reg::virt(index);
        func.replace_uses(old, Value::Reg(new));
        func.replace_defs(old, new);
        if let Some(color) = func.precolored.remove(&old) {
            func.precolored.insert(new, color);
        }
    }
}

/// Index of the first trailing control transfer of `block`; edge copies go
/// right before it.
fn copy_insertion_point(func: &Function, block: Block) -> usize {
    let insts = func.block_insts(block);
    let mut position = insts.len();
    while position > 0 {
        let data = func.data(insts[position - 1]);
        if matches!(
            data,
            InstData::Jump { .. } | InstData::CondJump { .. } | InstData::Return { .. }
        ) {
            position -= 1;
        } else {
            break;
        }
    }
    position
}

fn eliminate_phis(func: &mut Function) -> bool {
    let mut any = false;
    for block in func.blocks() {
        let phis: Vec<Inst> = func
            .block_insts(block)
            .iter()
            .copied()
            .take_while(|&i| matches!(func.data(i), InstData::Phi { .. }))
            .collect();
        if phis.is_empty() {
            continue;
        }
        any = true;
        // Copies per incoming edge, then sequentialized per predecessor.
        let mut per_pred: HashMap<Block, Vec<(Reg, Value, u32)>> = HashMap::new();
        for &phi in &phis {
            let InstData::Phi { dest, args, bytes } = func.data(phi).clone() else {
                unreachable!()
            };
            for (pred, value) in args {
                per_pred.entry(pred).or_default().push((dest, value, bytes));
            }
        }
        // The edge copies now define the phi destinations.
        for phi in phis {
            func.erase_inst(phi);
        }
        for (pred, copies) in per_pred {
            let position = copy_insertion_point(func, pred);
            emit_parallel_copies(func, pred, position, copies);
        }
    }
    any
}

/// Emits a parallel copy group sequentially, preserving semantics when a
/// destination is also a source. Cycles are broken with a scratch register.
fn emit_parallel_copies(
    func: &mut Function,
    block: Block,
    mut position: usize,
    mut copies: Vec<(Reg, Value, u32)>,
) {
    // Self copies are no-ops.
    copies.retain(|(dest, src, _)| *src != Value::Reg(*dest));
    while !copies.is_empty() {
        // A copy is safe when no remaining copy still reads its destination.
        let safe = copies.iter().position(|(dest, _, _)| {
            copies
                .iter()
                .all(|(_, src, _)| *src != Value::Reg(*dest))
        });
        match safe {
            Some(index) => {
                let (dest, src, bytes) = copies.remove(index);
                func.insert_inst_at(block, position, InstData::Copy { dest, src, bytes });
                position += 1;
            }
            None => {
                // Pure cycle: rotate through a scratch register.
                let (dest, src, bytes) = copies[0];
                let scratch = func.new_reg(RegClass::Virtual);
                func.insert_inst_at(
                    block,
                    position,
                    InstData::Copy {
                        dest: scratch,
                        src: Value::Reg(dest),
                        bytes,
                    },
                );
                position += 1;
                func.insert_inst_at(block, position, InstData::Copy { dest, src, bytes });
                position += 1;
                copies.remove(0);
                for (_, other_src, _) in &mut copies {
                    if *other_src == Value::Reg(dest) {
                        *other_src = Value::Reg(scratch);
                    }
                }
            }
        }
    }
}

fn lower_calls(func: &mut Function, self_index: usize) -> bool {
    let mut modified = false;
    for block in func.blocks() {
        for inst in func.block_insts(block).to_vec() {
            if !func.is_alive(inst) {
                continue;
            }
            let InstData::Call {
                dest,
                target,
                args,
                reg_offset,
            } = func.data(inst).clone()
            else {
                continue;
            };
            if args.iter().all(|a| matches!(a, Value::Reg(r) if r.class == RegClass::Callee)) && dest.is_none() {
                continue; // Already lowered.
            }
            modified = true;
            func.max_call_args = func.max_call_args.max(args.len() as u32);
            func.reserve_regs(RegClass::Callee, args.len() as u32);
            if try_tail_call(func, self_index, block, inst, &target, &args) {
                continue;
            }
            let mut lowered_args = smallvec::SmallVec::new();
            for (index, arg) in args.iter().enumerate() {
                let callee_reg = Reg::callee(index as u32);
                func.insert_inst_before(
                    inst,
                    InstData::Copy {
                        dest: callee_reg,
                        src: *arg,
                        bytes: 8,
                    },
                );
                lowered_args.push(Value::Reg(callee_reg));
            }
            func.replace_inst_data(
                inst,
                InstData::Call {
                    dest: None,
                    target,
                    args: lowered_args,
                    reg_offset,
                },
            );
            // The callee leaves its return value in its register 0, which is
            // the caller's first callee register.
            if let Some(dest) = dest {
                let insts = func.block_insts(block).to_vec();
                let call_pos = insts.iter().position(|&i| i == inst).unwrap();
                func.insert_inst_at(
                    block,
                    call_pos + 1,
                    InstData::Copy {
                        dest,
                        src: Value::Reg(Reg::callee(0)),
                        bytes: 8,
                    },
                );
            }
        }
    }
    modified
}

/// Rewrites `call @self; return` into argument moves onto the parameter
/// registers and a jump to the entry block.
fn try_tail_call(
    func: &mut Function,
    self_index: usize,
    block: Block,
    call: Inst,
    target: &CallTarget,
    args: &smallvec::SmallVec<[Value; 4]>,
) -> bool {
    if *target != CallTarget::Static(self_index) {
        return false;
    }
    let insts = func.block_insts(block).to_vec();
    let call_pos = insts.iter().position(|&i| i == call).unwrap();
    let rest = &insts[call_pos + 1..];
    let InstData::Call { dest, .. } = func.data(call).clone() else {
        unreachable!()
    };
    // The call must be directly followed by a return of its own result (or
    // nothing, for void functions).
    let tail = match rest {
        [ret] => match (func.data(*ret), dest) {
            (InstData::Return { values }, Some(dest)) => {
                values.len() == 1 && values[0] == Value::Reg(dest)
            }
            (InstData::Return { values }, None) => values.is_empty(),
            _ => false,
        },
        _ => false,
    };
    if !tail {
        return false;
    }
    let ret = rest[0];
    func.erase_inst(ret);
    func.erase_inst(call);
    // Parameters arrive in the low hardware registers; route the new
    // arguments there and loop.
    func.reserve_regs(RegClass::Hardware, args.len() as u32);
    let copies: Vec<(Reg, Value, u32)> = args
        .iter()
        .enumerate()
        .map(|(index, &arg)| (Reg::hardware(index as u32), arg, 8))
        .collect();
    let position = func.block_insts(block).len();
    emit_parallel_copies(func, block, position, copies);
    let entry = func.entry();
    func.append_inst(block, InstData::Jump { target: entry });
    true
}

fn lower_returns(func: &mut Function) -> bool {
    let mut modified = false;
    for block in func.blocks() {
        for inst in func.block_insts(block).to_vec() {
            let InstData::Return { values } = func.data(inst).clone() else {
                continue;
            };
            if values
                .iter()
                .all(|v| matches!(v, Value::Reg(r) if r.class == RegClass::Hardware))
            {
                continue; // Already lowered.
            }
            modified = true;
            func.reserve_regs(RegClass::Hardware, values.len() as u32);
            let mut lowered = smallvec::SmallVec::new();
            for (index, value) in values.iter().enumerate() {
                let ret_reg = Reg::hardware(index as u32);
                func.insert_inst_before(
                    inst,
                    InstData::Copy {
                        dest: ret_reg,
                        src: *value,
                        bytes: 8,
                    },
                );
                lowered.push(Value::Reg(ret_reg));
            }
            func.replace_inst_data(inst, InstData::Return { values: lowered });
        }
    }
    modified
}
