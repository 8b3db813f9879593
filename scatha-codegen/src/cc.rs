//! Calling convention description.

use scatha_ir as ir;

/// Where one value crosses a call boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueLocation {
    /// Passed in registers, occupying the given number of words.
    Register {
        /// Number of machine words.
        words: u32,
    },
    /// Passed through memory: the register carries a pointer to a
    /// caller-owned copy.
    Memory,
}

/// How a signature's values are passed.
#[derive(Debug, Clone)]
pub struct CallingConvention {
    /// Location of the return value; `None` for void.
    pub ret: Option<ValueLocation>,
    /// Location of every parameter.
    pub params: Vec<ValueLocation>,
}

fn locate(ctx: &ir::Context, ty: ir::Type) -> ValueLocation {
    if ctx.size_of(ty) <= 8 {
        ValueLocation::Register { words: 1 }
    } else {
        ValueLocation::Memory
    }
}

impl CallingConvention {
    /// Computes the convention of a function type.
    pub fn compute(ctx: &ir::Context, func_ty: ir::Type) -> Self {
        let ir::TypeData::Function { ret, params } = ctx.type_info(func_ty).data.clone() else {
            panic!("calling convention of a non-function type");
        };
        Self {
            ret: (!ret.is_void()).then(|| locate(ctx, ret)),
            params: params.iter().map(|&p| locate(ctx, p)).collect(),
        }
    }

    /// Number of register words the return value occupies.
    pub fn num_ret_words(&self) -> u32 {
        match self.ret {
            None => 0,
            Some(ValueLocation::Register { words }) => words,
            Some(ValueLocation::Memory) => 1,
        }
    }
}
