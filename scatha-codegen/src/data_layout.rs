//! Layout of global variables into the static data section.

use hashbrown::HashMap;
use scatha_ir as ir;
use scatha_types::VirtualPointer;

use crate::CodegenError;

/// Offsets of every global within the data section, plus the section bytes.
#[derive(Debug, Default)]
pub struct DataLayout {
    /// The data section.
    pub bytes: Vec<u8>,
    /// Offset of each global.
    pub offsets: HashMap<ir::GlobalId, u64>,
}

fn align_to(offset: usize, align: usize) -> usize {
    (offset + align - 1) & !(align - 1)
}

impl DataLayout {
    /// Serializes every global's initializer at its natural alignment.
    pub fn build(ctx: &ir::Context, module: &ir::Module) -> Result<Self, CodegenError> {
        let mut layout = Self::default();
        for id in module.global_ids() {
            let global = module.global(id);
            let align = ctx.align_of(global.value_ty).max(1) as usize;
            let offset = align_to(layout.bytes.len(), align);
            layout.bytes.resize(offset, 0);
            write_const(ctx, &mut layout.bytes, global.init)?;
            let size = ctx.size_of(global.value_ty) as usize;
            layout.bytes.resize(offset + size, 0);
            layout.offsets.insert(id, offset as u64);
        }
        Ok(layout)
    }

    /// The virtual pointer of a global. The data section is slot 0.
    pub fn pointer(&self, id: ir::GlobalId) -> VirtualPointer {
        VirtualPointer::new(0, self.offsets[&id])
    }
}

fn write_const(ctx: &ir::Context, out: &mut Vec<u8>, c: ir::Const) -> Result<(), CodegenError> {
    let info = ctx.const_info(c);
    let size = ctx.size_of(info.ty) as usize;
    match &info.data {
        ir::ConstData::Int(v) => {
            out.extend_from_slice(&v.as_u64().to_le_bytes()[..size]);
        }
        ir::ConstData::Float(v) => {
            out.extend_from_slice(&v.to_bits().to_le_bytes()[..size]);
        }
        ir::ConstData::Null | ir::ConstData::Undef => {
            out.extend(std::iter::repeat(0).take(size));
        }
        ir::ConstData::Record(members) => {
            let base = out.len();
            for (index, &member) in members.iter().enumerate() {
                let offset = match &ctx.type_info(info.ty).data {
                    ir::TypeData::Array { elem, .. } => index * ctx.size_of(*elem) as usize,
                    _ => ctx.member_offset(info.ty, index) as usize,
                };
                out.resize(base + offset, 0);
                write_const(ctx, out, member)?;
            }
            out.resize(base + size, 0);
        }
    }
    Ok(())
}
