//! Atomic types shared by the Scatha compiler and the `svm` virtual machine.

#![warn(missing_docs)]

mod apfloat;
mod apint;
mod debug_info;
mod ffi;
mod vptr;

pub use apfloat::ApFloat;
pub use apint::ApInt;
pub use debug_info::{DebugInfo, OffsetRange, SourceLocation, DEBUG_INFO_SUFFIX};
pub use ffi::{FfiType, ForeignFunction, ForeignFunctionId, InvalidFfiType};
pub use vptr::VirtualPointer;

/// Register value type. Every VM register is one 64 bit word.
pub type Word = u64;

/// Index of a register within the current register window.
pub type RegisterIndex = u8;
