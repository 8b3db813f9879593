//! Pointer provenance and alignment facts.

use hashbrown::HashMap;

use crate::context::{ConstData, Context};
use crate::function::Function;
use crate::instruction::InstData;
use crate::value::Value;

/// Where a pointer value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Provenance {
    /// The originating value, typically an `alloca` or a global.
    pub origin: Value,
    /// Static byte offset from the origin, if known.
    pub offset: Option<i64>,
}

/// Facts about one pointer-typed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointerInfo {
    /// Minimum alignment of the address.
    pub align: u64,
    /// Number of bytes known dereferenceable from this address.
    pub valid_size: Option<u64>,
    /// Origin tracking.
    pub provenance: Option<Provenance>,
    /// The address is known not to be null.
    pub nonnull: bool,
    /// The address never escapes the function.
    pub noescape: bool,
}

impl Default for PointerInfo {
    fn default() -> Self {
        Self {
            align: 1,
            valid_size: None,
            provenance: None,
            nonnull: false,
            noescape: false,
        }
    }
}

fn gcd(a: u64, b: u64) -> u64 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

/// Pointer facts for every pointer-typed value of a function.
#[derive(Debug, Default)]
pub struct PointerAnalysis {
    info: HashMap<Value, PointerInfo>,
}

impl PointerAnalysis {
    /// Derives pointer info from allocas and address computations in one
    /// forward sweep over the dominator-tree preorder, so a gep sees the
    /// facts of its base.
    pub fn compute(ctx: &Context, func: &Function) -> Self {
        let mut analysis = Self::default();
        let dom = func.dominator_tree();
        for block in dom.preorder() {
            for &inst in func.block_insts(block) {
                let value = Value::Inst(inst);
                match func.data(inst) {
                    InstData::Alloca { allocated, count } => {
                        let info = ctx.type_info(*allocated);
                        let valid_size = const_count(ctx, func, *count)
                            .map(|count| info.size.saturating_mul(count));
                        analysis.info.insert(
                            value,
                            PointerInfo {
                                align: info.align.max(1),
                                valid_size,
                                provenance: Some(Provenance {
                                    origin: value,
                                    offset: Some(0),
                                }),
                                nonnull: true,
                                noescape: false,
                            },
                        );
                    }
                    InstData::GetElementPtr {
                        pointee,
                        base,
                        index,
                        members,
                    } => {
                        let base_info = analysis.get(*base).copied().unwrap_or_default();
                        let elem_size = ctx.size_of(*pointee);
                        let static_offset = const_count(ctx, func, *index).map(|idx| {
                            let mut offset = (elem_size as i64) * (idx as i64);
                            let mut ty = *pointee;
                            for &member in members {
                                offset += ctx.member_offset(ty, member as usize) as i64;
                                ty = match &ctx.type_info(ty).data {
                                    crate::types::TypeData::Struct { members, .. } => {
                                        members[member as usize]
                                    }
                                    crate::types::TypeData::Array { elem, .. } => *elem,
                                    _ => ty,
                                };
                            }
                            offset
                        });
                        let align = match static_offset {
                            Some(offset) if offset != 0 => {
                                gcd(base_info.align, offset.unsigned_abs())
                            }
                            Some(_) => base_info.align,
                            None => gcd(base_info.align, elem_size.max(1)),
                        };
                        let provenance = base_info.provenance.map(|p| Provenance {
                            origin: p.origin,
                            offset: match (p.offset, static_offset) {
                                (Some(a), Some(b)) => Some(a + b),
                                _ => None,
                            },
                        });
                        let valid_size = match (base_info.valid_size, static_offset) {
                            (Some(size), Some(offset)) if offset >= 0 => {
                                Some(size.saturating_sub(offset as u64))
                            }
                            _ => None,
                        };
                        analysis.info.insert(
                            value,
                            PointerInfo {
                                align: align.max(1),
                                valid_size,
                                provenance,
                                nonnull: base_info.nonnull,
                                noescape: base_info.noescape,
                            },
                        );
                    }
                    _ => {}
                }
            }
        }
        analysis
    }

    /// The recorded facts for `value`, if any.
    pub fn get(&self, value: Value) -> Option<&PointerInfo> {
        self.info.get(&value)
    }
}

fn const_count(ctx: &Context, func: &Function, value: Value) -> Option<u64> {
    let _ = func;
    match value {
        Value::Const(c) => match ctx.const_info(c).data {
            ConstData::Int(v) => Some(v.as_u64()),
            _ => None,
        },
        _ => None,
    }
}
