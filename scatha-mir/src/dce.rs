//! MIR dead code elimination.

use crate::function::Function;

/// Removes instructions whose destination is never read and whose opcode
/// has no side effects (pure moves, arithmetic, conversions). Iterates
/// because removing a use can kill the defining instruction.
pub fn run(func: &mut Function) -> bool {
    let mut modified = false;
    loop {
        let mut dead = Vec::new();
        for block in func.blocks() {
            for &inst in func.block_insts(block) {
                let data = func.data(inst);
                if data.has_side_effects() {
                    continue;
                }
                match data.dest() {
                    Some(dest) if func.uses(dest).is_empty() => dead.push(inst),
                    _ => {}
                }
            }
        }
        if dead.is_empty() {
            return modified;
        }
        for inst in dead {
            func.erase_inst(inst);
        }
        modified = true;
    }
}
