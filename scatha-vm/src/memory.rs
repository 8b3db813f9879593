//! Virtual memory: the slot indirection table.
//!
//! Every runtime pointer is a `{slot:16, offset:48}` pair; the table maps
//! slot indices to backing buffers. Slot 0 holds the static data section and
//! slot 1 the stack; heap allocations and caller-mapped buffers occupy the
//! slots above.

use scatha_types::VirtualPointer;

use crate::error::{MemoryAccessReason, VmError};

/// Who owns a slot's backing memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotOwnership {
    /// The program's static data section.
    Static,
    /// The execution stack.
    Stack,
    /// A heap allocation made by the program.
    Heap,
    /// Memory mapped in by the embedding host; the data stays owned by the
    /// caller and is copied in and out.
    Mapped,
}

#[derive(Debug)]
struct Slot {
    data: Vec<u8>,
    ownership: SlotOwnership,
    live: bool,
}

/// Slot index of the static data section.
pub const STATIC_SLOT: u16 = 0;
/// Slot index of the stack.
pub const STACK_SLOT: u16 = 1;

/// The slot table.
#[derive(Debug, Default)]
pub struct VirtualMemory {
    slots: Vec<Slot>,
    stack_top: u64,
}

impl VirtualMemory {
    /// Creates the table with the static and stack slots in place.
    pub fn new(static_data: Vec<u8>, stack_size: u64) -> Self {
        Self {
            slots: vec![
                Slot {
                    data: static_data,
                    ownership: SlotOwnership::Static,
                    live: true,
                },
                Slot {
                    data: vec![0; stack_size as usize],
                    ownership: SlotOwnership::Stack,
                    live: true,
                },
            ],
            stack_top: 0,
        }
    }

    fn slot(&self, pointer: VirtualPointer, size: u64) -> Result<&Slot, VmError> {
        let slot = self
            .slots
            .get(pointer.slot() as usize)
            .filter(|slot| slot.live)
            .ok_or(VmError::MemoryAccess {
                reason: MemoryAccessReason::NotAllocated,
                pointer,
                size,
            })?;
        Ok(slot)
    }

    fn check_range(&self, pointer: VirtualPointer, size: u64) -> Result<(), VmError> {
        let slot = self.slot(pointer, size)?;
        let end = pointer.offset().checked_add(size);
        match end {
            Some(end) if end <= slot.data.len() as u64 => Ok(()),
            _ => Err(VmError::MemoryAccess {
                reason: MemoryAccessReason::DerefRangeTooBig,
                pointer,
                size,
            }),
        }
    }

    /// Reads `size` bytes at `pointer`, zero-extended into a word.
    pub fn load(&self, pointer: VirtualPointer, size: u64) -> Result<u64, VmError> {
        if !pointer.is_aligned(size) {
            return Err(VmError::MemoryAccess {
                reason: MemoryAccessReason::MisalignedLoad,
                pointer,
                size,
            });
        }
        self.check_range(pointer, size)?;
        let slot = self.slot(pointer, size)?;
        let offset = pointer.offset() as usize;
        let mut raw = [0u8; 8];
        raw[..size as usize].copy_from_slice(&slot.data[offset..offset + size as usize]);
        Ok(u64::from_le_bytes(raw))
    }

    /// Writes the low `size` bytes of `value` at `pointer`.
    pub fn store(&mut self, pointer: VirtualPointer, value: u64, size: u64) -> Result<(), VmError> {
        if !pointer.is_aligned(size) {
            return Err(VmError::MemoryAccess {
                reason: MemoryAccessReason::MisalignedStore,
                pointer,
                size,
            });
        }
        self.check_range(pointer, size)?;
        let offset = pointer.offset() as usize;
        let slot = &mut self.slots[pointer.slot() as usize];
        slot.data[offset..offset + size as usize]
            .copy_from_slice(&value.to_le_bytes()[..size as usize]);
        Ok(())
    }

    /// Reads a byte range, for builtins and hosts.
    pub fn read_bytes(&self, pointer: VirtualPointer, size: u64) -> Result<&[u8], VmError> {
        self.check_range(pointer, size)?;
        let slot = self.slot(pointer, size)?;
        let offset = pointer.offset() as usize;
        Ok(&slot.data[offset..offset + size as usize])
    }

    /// Writes a byte range, for builtins and hosts.
    pub fn write_bytes(&mut self, pointer: VirtualPointer, bytes: &[u8]) -> Result<(), VmError> {
        self.check_range(pointer, bytes.len() as u64)?;
        let offset = pointer.offset() as usize;
        let slot = &mut self.slots[pointer.slot() as usize];
        slot.data[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Bumps the stack. The returned pointer addresses the allocated bytes.
    pub fn stack_alloc(&mut self, count: u64) -> Result<VirtualPointer, VmError> {
        // Keep the stack word aligned.
        let rounded = (count + 7) & !7;
        let capacity = self.slots[STACK_SLOT as usize].data.len() as u64;
        let top = self.stack_top;
        if top + rounded > capacity {
            return Err(VmError::InvalidStackAllocation { count });
        }
        self.stack_top = top + rounded;
        Ok(VirtualPointer::new(STACK_SLOT, top))
    }

    /// The current stack top, for save and restore around calls from the
    /// host.
    pub fn stack_top(&self) -> u64 {
        self.stack_top
    }

    /// Restores a previously observed stack top.
    pub fn set_stack_top(&mut self, top: u64) {
        self.stack_top = top;
    }

    fn add_slot(&mut self, data: Vec<u8>, ownership: SlotOwnership) -> u16 {
        // Reuse a dead slot if one exists.
        if let Some(index) = self.slots.iter().position(|slot| !slot.live) {
            self.slots[index] = Slot {
                data,
                ownership,
                live: true,
            };
            return index as u16;
        }
        let index = self.slots.len() as u16;
        self.slots.push(Slot {
            data,
            ownership,
            live: true,
        });
        index
    }

    /// Allocates a fresh heap slot of `size` bytes.
    pub fn allocate(&mut self, size: u64, align: u64) -> Result<VirtualPointer, VmError> {
        if size == 0 || !align.is_power_of_two() || align > 256 {
            return Err(VmError::Allocation { size, align });
        }
        let slot = self.add_slot(vec![0; size as usize], SlotOwnership::Heap);
        Ok(VirtualPointer::new(slot, 0))
    }

    /// Releases a heap allocation. The pointer and size must match the
    /// original allocation.
    pub fn deallocate(&mut self, pointer: VirtualPointer, size: u64) -> Result<(), VmError> {
        let mismatch = VmError::Deallocation { pointer, size };
        let slot = self
            .slots
            .get_mut(pointer.slot() as usize)
            .ok_or(mismatch.clone())?;
        if !slot.live
            || slot.ownership != SlotOwnership::Heap
            || pointer.offset() != 0
            || slot.data.len() as u64 != size
        {
            return Err(mismatch);
        }
        slot.live = false;
        slot.data = Vec::new();
        Ok(())
    }

    /// Maps caller-provided bytes into a fresh slot.
    pub fn map(&mut self, data: Vec<u8>) -> VirtualPointer {
        let slot = self.add_slot(data, SlotOwnership::Mapped);
        VirtualPointer::new(slot, 0)
    }

    /// Releases a caller-mapped slot, returning its current contents.
    pub fn unmap(&mut self, pointer: VirtualPointer) -> Result<Vec<u8>, VmError> {
        let slot = self
            .slots
            .get_mut(pointer.slot() as usize)
            .filter(|slot| slot.live && slot.ownership == SlotOwnership::Mapped)
            .ok_or(VmError::MemoryAccess {
                reason: MemoryAccessReason::NotAllocated,
                pointer,
                size: 0,
            })?;
        slot.live = false;
        Ok(std::mem::take(&mut slot.data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unaligned_load_traps() {
        let memory = VirtualMemory::new(vec![0; 16], 64);
        let pointer = VirtualPointer::new(STATIC_SLOT, 4);
        assert!(matches!(
            memory.load(pointer, 8),
            Err(VmError::MemoryAccess {
                reason: MemoryAccessReason::MisalignedLoad,
                ..
            })
        ));
    }

    #[test]
    fn out_of_bounds_access_traps() {
        let memory = VirtualMemory::new(vec![0; 16], 64);
        let pointer = VirtualPointer::new(STATIC_SLOT, 16);
        assert!(matches!(
            memory.load(pointer, 8),
            Err(VmError::MemoryAccess {
                reason: MemoryAccessReason::DerefRangeTooBig,
                ..
            })
        ));
    }

    #[test]
    fn heap_allocation_round_trip() {
        let mut memory = VirtualMemory::new(Vec::new(), 64);
        let pointer = memory.allocate(32, 8).unwrap();
        memory.store(pointer, 0xdead_beef, 8).unwrap();
        assert_eq!(memory.load(pointer, 8).unwrap(), 0xdead_beef);
        memory.deallocate(pointer, 32).unwrap();
        assert!(memory.load(pointer, 8).is_err());
        assert!(memory.deallocate(pointer, 32).is_err());
    }

    #[test]
    fn stack_overflow_traps() {
        let mut memory = VirtualMemory::new(Vec::new(), 16);
        memory.stack_alloc(8).unwrap();
        memory.stack_alloc(8).unwrap();
        assert_eq!(
            memory.stack_alloc(8),
            Err(VmError::InvalidStackAllocation { count: 8 })
        );
    }
}
