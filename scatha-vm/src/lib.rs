//! The Scatha virtual machine.
//!
//! A register based bytecode interpreter: a growable register file addressed
//! through per-function windows, a slot-table virtual memory behind 48:16
//! virtual pointers, and a synchronous foreign function trampoline. Faults
//! never abort the host; every runtime error is a [`VmError`] value.

#![warn(missing_docs)]

mod builtin;
mod error;
mod memory;
mod vm;

pub use builtin::{register_builtins, BUILTIN_NAMES};
pub use error::{FfiErrorReason, MemoryAccessReason, VmError};
pub use memory::{SlotOwnership, VirtualMemory, STACK_SLOT, STATIC_SLOT};
pub use vm::{
    CompareFlags, ExecutionStatistics, HostFunction, VirtualMachine, DEFAULT_STACK_SIZE,
};
