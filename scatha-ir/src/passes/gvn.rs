//! Global value numbering.

use hashbrown::HashMap;
use smallvec::SmallVec;

use crate::context::Context;
use crate::entities::{Block, Inst, Type};
use crate::function::Function;
use crate::instruction::InstData;
use crate::passes::{FunctionPassDesc, PassArgs, PassCategory};
use crate::value::Value;

pub(super) const DESC: FunctionPassDesc = FunctionPassDesc {
    name: "gvn",
    category: PassCategory::Simplification,
    params: &[],
    run,
};

/// Structural identity of a pure computation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct NumberKey {
    mnemonic: &'static str,
    immediates: SmallVec<[u32; 4]>,
    operands: SmallVec<[Value; 4]>,
    ty: Type,
}

fn key_of(func: &Function, inst: Inst) -> Option<NumberKey> {
    let data = func.data(inst);
    let mut immediates: SmallVec<[u32; 4]> = SmallVec::new();
    let mut operands: SmallVec<[Value; 4]> = SmallVec::new();
    match data {
        InstData::Arith { op, lhs, rhs } => {
            let (mut a, mut b) = (*lhs, *rhs);
            if op.is_commutative() && b < a {
                core::mem::swap(&mut a, &mut b);
            }
            operands.push(a);
            operands.push(b);
        }
        InstData::UnaryArith { operand, .. } | InstData::Conv { operand, .. } => {
            operands.push(*operand);
        }
        InstData::Cmp {
            mode,
            rel,
            lhs,
            rhs,
        } => {
            immediates.push(*mode as u32);
            immediates.push(*rel as u32);
            operands.push(*lhs);
            operands.push(*rhs);
        }
        InstData::GetElementPtr {
            pointee,
            base,
            index,
            members,
        } => {
            immediates.push(pointee.index() as u32);
            immediates.extend(members.iter().copied());
            operands.push(*base);
            operands.push(*index);
        }
        InstData::Select {
            cond,
            then_value,
            else_value,
        } => {
            operands.push(*cond);
            operands.push(*then_value);
            operands.push(*else_value);
        }
        InstData::ExtractValue { aggregate, indices } => {
            immediates.extend(indices.iter().copied());
            operands.push(*aggregate);
        }
        InstData::InsertValue {
            aggregate,
            value,
            indices,
        } => {
            immediates.extend(indices.iter().copied());
            operands.push(*aggregate);
            operands.push(*value);
        }
        // Memory, control flow, phis, and calls are not numbered.
        _ => return None,
    }
    Some(NumberKey {
        mnemonic: data.mnemonic(),
        immediates,
        operands,
        ty: func.inst_ty(inst),
    })
}

/// Removes computations already available at a dominating definition.
///
/// Walks the dominator tree in preorder and numbers every pure value
/// instruction; a later instruction with the same number in a dominating
/// block is replaced by the earlier result. Memory accesses and calls keep
/// their identity.
fn run(_ctx: &mut Context, func: &mut Function, _args: &PassArgs) -> bool {
    let dom = func.dominator_tree();
    let mut table: HashMap<NumberKey, Vec<(Block, Inst)>> = HashMap::new();
    let mut modified = false;
    for block in dom.preorder() {
        for inst in func.block_insts(block).to_vec() {
            let Some(key) = key_of(func, inst) else {
                continue;
            };
            let candidates = table.entry(key).or_default();
            let available = candidates
                .iter()
                .find(|(def_block, def)| {
                    func.is_inst_alive(*def) && dom.dominates(*def_block, block)
                })
                .map(|(_, def)| *def);
            match available {
                Some(def) if def != inst => {
                    func.replace_inst_with_value(inst, Value::Inst(def));
                    modified = true;
                }
                _ => candidates.push((block, inst)),
            }
        }
    }
    modified
}
