//! Machine-level IR of the Scatha compiler.
//!
//! Instruction selection lowers the SSA IR into this representation, the
//! passes in this crate take it from SSA form to allocated hardware
//! registers, and `scatha-codegen` translates the result into assembly.
//! The pass order is: [`destroy_ssa`], [`coalesce`], [`dce`], [`regalloc`],
//! [`devirtualize`], [`jump_elision`].

#![warn(missing_docs)]

pub mod coalesce;
pub mod dce;
pub mod destroy_ssa;
pub mod devirtualize;
mod function;
mod inst;
pub mod jump_elision;
mod liveness;
mod reg;
pub mod regalloc;

pub use function::{Function, Module};
pub use inst::{
    Address, ArithOp, ArithRhs, Block, CallTarget, CompareMode, Condition, Constant, Conversion,
    Inst, InstData, UnaryOp, Value,
};
pub use liveness::{LiveSet, Liveness};
pub use reg::{Reg, RegClass};
pub use regalloc::InterferenceGraph;

/// Size of the hardware color palette the register allocator may use for
/// locals. Indices above the palette host the call metadata and callee
/// windows.
pub const NUM_ALLOCATABLE_REGS: u32 = 128;

/// Runs the full lowering pass sequence on every function of `module`.
pub fn lower_module(module: &mut Module) {
    for index in 0..module.functions.len() {
        let func = &mut module.functions[index];
        tracing::debug!(function = func.name.as_str(), "lowering MIR function");
        destroy_ssa::run(func, index);
        coalesce::run(func);
        dce::run(func);
        regalloc::allocate(func, NUM_ALLOCATABLE_REGS);
        devirtualize::run(func);
        jump_elision::run(func);
    }
}
