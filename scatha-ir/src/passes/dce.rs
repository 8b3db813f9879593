//! Dead code elimination.

use hashbrown::HashSet;

use crate::context::Context;
use crate::entities::Inst;
use crate::function::Function;
use crate::passes::{FunctionPassDesc, PassArgs, PassCategory};
use crate::value::Value;

pub(super) const DESC: FunctionPassDesc = FunctionPassDesc {
    name: "dce",
    category: PassCategory::Simplification,
    params: &[],
    run,
};

/// Removes instructions whose results are unused and whose execution has no
/// side effects. Liveness is transitive from side-effecting roots, so phi
/// cycles that only feed themselves are removed as well.
fn run(ctx: &mut Context, func: &mut Function, _args: &PassArgs) -> bool {
    let mut live: HashSet<Inst> = HashSet::new();
    let mut worklist: Vec<Inst> = Vec::new();
    for block in func.blocks() {
        for &inst in func.block_insts(block) {
            if func.data(inst).has_side_effects() {
                live.insert(inst);
                worklist.push(inst);
            }
        }
    }
    while let Some(inst) = worklist.pop() {
        for operand in func.data(inst).operands() {
            if let Value::Inst(def) = operand {
                if live.insert(def) {
                    worklist.push(def);
                }
            }
        }
    }
    let mut dead: Vec<Inst> = Vec::new();
    for block in func.blocks() {
        for &inst in func.block_insts(block) {
            if !live.contains(&inst) {
                dead.push(inst);
            }
        }
    }
    if dead.is_empty() {
        return false;
    }
    // Cut cycles among the dead instructions before erasing.
    for &inst in &dead {
        let ty = func.inst_ty(inst);
        if !func.users(Value::Inst(inst)).is_empty() {
            let undef = ctx.undef(ty);
            func.replace_all_uses(Value::Inst(inst), Value::Const(undef));
        }
    }
    for inst in dead {
        func.erase_inst(inst);
    }
    true
}
