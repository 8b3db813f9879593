//! Runtime error taxonomy.
//!
//! Every fault a running program can produce is one of these variants. The
//! VM never aborts the host process on a program fault: execution stops and
//! the error is returned to the caller for formatting.

use scatha_types::VirtualPointer;

/// Reason of a [`VmError::MemoryAccess`] fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryAccessReason {
    /// The pointer's slot is not allocated.
    NotAllocated,
    /// The access runs past the end of the slot.
    DerefRangeTooBig,
    /// Load address not aligned to the access size.
    MisalignedLoad,
    /// Store address not aligned to the access size.
    MisalignedStore,
}

/// Reason of a [`VmError::Ffi`] fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfiErrorReason {
    /// The symbol could not be bound at load time.
    FailedToInit,
}

/// A runtime fault.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum VmError {
    /// The instruction stream holds a byte that is no opcode.
    #[error("Executed invalid opcode: {value}")]
    InvalidOpcode {
        /// The offending byte.
        value: u8,
    },
    /// `lincsp` would overflow the stack.
    #[error("Invalid stack allocation of {count} bytes")]
    InvalidStackAllocation {
        /// Requested byte count.
        count: u64,
    },
    /// A foreign function could not be used.
    #[error("Failed to initialize foreign function \"{function}\"")]
    Ffi {
        /// Name of the function.
        function: String,
        /// What went wrong.
        reason: FfiErrorReason,
    },
    /// The program executed a trap instruction.
    #[error("Executed trap instruction")]
    Trap,
    /// Integer division by zero.
    #[error("Attempt to divide by zero")]
    Arithmetic,
    /// A memory access faulted.
    #[error("{}", memory_access_message(.reason, .pointer, .size))]
    MemoryAccess {
        /// What went wrong.
        reason: MemoryAccessReason,
        /// The accessed pointer.
        pointer: VirtualPointer,
        /// The access size in bytes.
        size: u64,
    },
    /// A heap allocation request was invalid.
    #[error("Invalid heap allocation of {size} bytes with alignment {align}")]
    Allocation {
        /// Requested size.
        size: u64,
        /// Requested alignment.
        align: u64,
    },
    /// A deallocation did not match a prior allocation.
    #[error("Tried to deallocate {size} bytes at address {pointer} that have not been allocated before")]
    Deallocation {
        /// The pointer handed to deallocate.
        pointer: VirtualPointer,
        /// The stated size.
        size: u64,
    },
    /// Execution was requested without a loaded start address.
    #[error("Attempted execution without start address")]
    NoStartAddress,
}

fn memory_access_message(
    reason: &MemoryAccessReason,
    pointer: &VirtualPointer,
    size: &u64,
) -> String {
    match reason {
        MemoryAccessReason::NotAllocated => {
            format!("Accessed unallocated memory at address {pointer}")
        }
        MemoryAccessReason::DerefRangeTooBig => {
            format!("Dereferenced pointer {pointer} at {size} bytes outside its valid range")
        }
        MemoryAccessReason::MisalignedLoad => {
            format!("Misaligned load of address {pointer}")
        }
        MemoryAccessReason::MisalignedStore => {
            format!("Misaligned store of address {pointer}")
        }
    }
}
