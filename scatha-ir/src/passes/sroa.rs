//! Scalar replacement of aggregates.

use smallvec::SmallVec;

use crate::context::Context;
use crate::entities::{Inst, Type};
use crate::function::Function;
use crate::instruction::InstData;
use crate::passes::{FunctionPassDesc, PassArgs, PassCategory};
use crate::types::TypeData;
use crate::value::Value;

pub(super) const DESC: FunctionPassDesc = FunctionPassDesc {
    name: "sroa",
    category: PassCategory::Canonicalization,
    params: &[],
    run,
};

// Arrays beyond this size stay in memory; splitting them trades one alloca
// for too many.
const MAX_ARRAY_SPLIT: u64 = 16;

fn members_of(ctx: &Context, ty: Type) -> Option<Vec<Type>> {
    match &ctx.type_info(ty).data {
        TypeData::Struct { members, .. } => Some(members.clone()),
        TypeData::Array { elem, count } if *count <= MAX_ARRAY_SPLIT => {
            Some(vec![*elem; *count as usize])
        }
        _ => None,
    }
}

/// An aggregate alloca splits when every access resolves statically to one
/// member: geps with constant zero array index and a member path, and loads
/// or stores of the whole aggregate.
fn splittable(ctx: &Context, func: &Function, inst: Inst) -> bool {
    let InstData::Alloca { allocated, count } = func.data(inst) else {
        return false;
    };
    if members_of(ctx, *allocated).is_none() {
        return false;
    }
    match count {
        Value::Const(c) => match ctx.const_int(*c) {
            Some(v) if v.is_one() => {}
            _ => return false,
        },
        _ => return false,
    }
    let addr = Value::Inst(inst);
    func.users(addr).iter().all(|&user| match func.data(user) {
        InstData::GetElementPtr {
            pointee,
            base,
            index,
            members,
        } => {
            *base == addr
                && *pointee == *allocated
                && !members.is_empty()
                && matches!(index, Value::Const(c) if ctx.const_int(*c).is_some_and(|v| v.is_zero()))
        }
        InstData::Load { addr: a } => *a == addr && func.inst_ty(user) == *allocated,
        InstData::Store { addr: a, value } => {
            *a == addr && *value != addr && func.value_type(ctx, *value) == *allocated
        }
        _ => false,
    })
}

fn run(ctx: &mut Context, func: &mut Function, _args: &PassArgs) -> bool {
    let mut modified = false;
    // Splitting may expose nested aggregates; iterate to a fixpoint.
    loop {
        let candidates: Vec<Inst> = func
            .blocks()
            .into_iter()
            .flat_map(|b| func.block_insts(b).to_vec())
            .filter(|&inst| splittable(ctx, func, inst))
            .collect();
        if candidates.is_empty() {
            return modified;
        }
        for alloca in candidates {
            split(ctx, func, alloca);
        }
        modified = true;
    }
}

fn split(ctx: &mut Context, func: &mut Function, alloca: Inst) {
    let InstData::Alloca { allocated, .. } = *func.data(alloca) else {
        unreachable!()
    };
    let members = members_of(ctx, allocated).expect("checked by splittable");
    let base_name = func
        .inst_name(alloca)
        .map(str::to_owned)
        .unwrap_or_else(|| "slot".to_owned());
    let one = {
        let i32t = ctx.int_type(32);
        Value::Const(ctx.int_const(1, i32t))
    };
    let ptr = ctx.ptr_type();
    // One scalar slot per member, inserted where the aggregate lived.
    let slots: Vec<Inst> = members
        .iter()
        .enumerate()
        .map(|(index, &member)| {
            func.insert_inst_before(
                alloca,
                InstData::Alloca {
                    allocated: member,
                    count: one,
                },
                ptr,
                Some(&format!("{base_name}.{index}")),
            )
        })
        .collect();
    for user in func.users(Value::Inst(alloca)).to_vec() {
        match func.data(user).clone() {
            InstData::GetElementPtr { members: path, .. } => {
                let leading = path[0] as usize;
                let rest: SmallVec<[u32; 2]> = path[1..].iter().copied().collect();
                if rest.is_empty() {
                    func.replace_inst_with_value(user, Value::Inst(slots[leading]));
                } else {
                    let zero = {
                        let i32t = ctx.int_type(32);
                        Value::Const(ctx.int_const(0, i32t))
                    };
                    func.replace_inst_data(
                        user,
                        InstData::GetElementPtr {
                            pointee: members[leading],
                            base: Value::Inst(slots[leading]),
                            index: zero,
                            members: rest,
                        },
                    );
                }
            }
            InstData::Load { .. } => {
                // A whole-aggregate load becomes member loads glued together
                // with insert_value.
                let mut aggregate = Value::Const(ctx.undef(allocated));
                for (index, (&slot, &member)) in slots.iter().zip(&members).enumerate() {
                    let load = func.insert_inst_before(
                        user,
                        InstData::Load {
                            addr: Value::Inst(slot),
                        },
                        member,
                        None,
                    );
                    let insert = func.insert_inst_before(
                        user,
                        InstData::InsertValue {
                            aggregate,
                            value: Value::Inst(load),
                            indices: smallvec::smallvec![index as u32],
                        },
                        allocated,
                        None,
                    );
                    aggregate = Value::Inst(insert);
                }
                func.replace_inst_with_value(user, aggregate);
            }
            InstData::Store { value, .. } => {
                // A whole-aggregate store scatters into member stores.
                let void = ctx.void_type();
                for (index, (&slot, &member)) in slots.iter().zip(&members).enumerate() {
                    let extract = func.insert_inst_before(
                        user,
                        InstData::ExtractValue {
                            aggregate: value,
                            indices: smallvec::smallvec![index as u32],
                        },
                        member,
                        None,
                    );
                    func.insert_inst_before(
                        user,
                        InstData::Store {
                            addr: Value::Inst(slot),
                            value: Value::Inst(extract),
                        },
                        void,
                        None,
                    );
                }
                func.erase_inst(user);
            }
            _ => unreachable!("checked by splittable"),
        }
    }
    func.erase_inst(alloca);
}
