//! Back end of the Scatha compiler: instruction selection, MIR lowering,
//! and assembly emission.
//!
//! [`codegen`] is the umbrella entry point: it canonicalizes the IR for
//! lowering (critical edge splitting), lays out globals, selects
//! instructions into MIR, runs the MIR pass sequence down to allocated
//! hardware registers, and emits the assembly stream for the assembler.

#![warn(missing_docs)]

mod cc;
mod data_layout;
mod isel;
mod mir_to_asm;
mod selection_dag;

use scatha_ir as ir;

pub use cc::{CallingConvention, ValueLocation};
pub use data_layout::DataLayout;
pub use isel::lower_to_mir;
pub use mir_to_asm::mir_to_asm;
pub use selection_dag::SelectionDag;

/// Error produced during lowering.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CodegenError {
    /// An aggregate value wider than one register reached instruction
    /// selection. The frontend lowers such values through memory.
    #[error("in @{function}: aggregate value of {size} bytes cannot live in a register")]
    UnsupportedAggregate {
        /// Function being lowered.
        function: String,
        /// Value size in bytes.
        size: u64,
    },
    /// An alloca with a runtime count reached instruction selection.
    #[error("in @{function}: dynamic stack allocation is not supported")]
    DynamicAlloca {
        /// Function being lowered.
        function: String,
    },
    /// A single stack frame exceeds the `lincsp` encoding.
    #[error("in @{function}: stack frame of {size} bytes exceeds the allocation encoding")]
    FrameTooLarge {
        /// Function being lowered.
        function: String,
        /// Frame size in bytes.
        size: u64,
    },
    /// A lowering invariant failed; this is a compiler bug.
    #[error("codegen internal error: {message}")]
    Internal {
        /// Description.
        message: String,
    },
}

/// Compiles an IR module into an assembly stream.
pub fn codegen(
    ctx: &mut ir::Context,
    module: &mut ir::Module,
) -> Result<scatha_asm::AssemblyStream, CodegenError> {
    // SSA destruction places copies on edges; critical edges must be split
    // before lowering clones the CFG.
    let pm = ir::passes::PassManager::global();
    let split = pm
        .function_pass("splitcriticaledges")
        .expect("builtin pass");
    for id in module.function_ids() {
        module.with_function_mut(id, |_, func| {
            (split.run)(ctx, func, &ir::passes::PassArgs::defaults(split.params));
        });
    }
    let layout = DataLayout::build(ctx, module)?;
    let mut mir_module = lower_to_mir(ctx, module, &layout)?;
    scatha_mir::lower_module(&mut mir_module);
    mir_to_asm(&mir_module)
}
