//! Devirtualization: collapse the register classes into the flat hardware
//! file.
//!
//! After allocation only hardware and callee registers remain. A callee
//! register `C(j)` becomes hardware index `L + 2 + j`, where `L` is the
//! local register count and the two reserved slots hold the return
//! instruction pointer and the register-pointer offset pushed by `call`.

use crate::function::Function;
use crate::inst::{InstData, Value};
use crate::reg::{Reg, RegClass};

/// Words between a frame and its callee window: saved return IP and saved
/// register-pointer offset.
pub const CALL_METADATA_WORDS: u32 = 2;

/// Rewrites callee registers and fixes every call's register offset.
pub fn run(func: &mut Function) {
    let locals = func.num_hardware_regs;
    let reg_offset = locals + CALL_METADATA_WORDS;
    for index in 0..func.reg_count(RegClass::Callee) {
        let old = Reg::callee(index);
        let new = Reg::hardware(reg_offset + index);
        func.replace_uses(old, Value::Reg(new));
        func.replace_defs(old, new);
    }
    let mut has_calls = false;
    for block in func.blocks() {
        for inst in func.block_insts(block).to_vec() {
            let InstData::Call {
                dest,
                target,
                args,
                ..
            } = func.data(inst).clone()
            else {
                continue;
            };
            has_calls = true;
            func.replace_inst_data(
                inst,
                InstData::Call {
                    dest,
                    target,
                    args,
                    reg_offset: Some(reg_offset),
                },
            );
        }
    }
    if has_calls || func.reg_count(RegClass::Callee) > 0 {
        func.num_hardware_regs = reg_offset + func.max_call_args.max(1);
    }
}
