use core::fmt;
use core::ops::{Add, AddAssign, Sub, SubAssign};

use static_assertions::assert_eq_size;

/// A virtual memory pointer.
///
/// The VM addresses memory through an indirection table of slots. A pointer
/// packs the slot index into the upper 16 bits of a word and the byte offset
/// within the slot into the lower 48 bits. The same representation is used in
/// registers and on disk.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct VirtualPointer(u64);

assert_eq_size!(VirtualPointer, u64);

const OFFSET_BITS: u32 = 48;
const OFFSET_MASK: u64 = (1 << OFFSET_BITS) - 1;

impl VirtualPointer {
    /// The null pointer: slot 0, offset 0.
    pub const NULL: Self = Self(0);

    /// Creates a pointer from slot index and byte offset.
    pub const fn new(slot: u16, offset: u64) -> Self {
        Self(((slot as u64) << OFFSET_BITS) | (offset & OFFSET_MASK))
    }

    /// Reinterprets a raw register word as a pointer.
    pub const fn from_word(word: u64) -> Self {
        Self(word)
    }

    /// The raw register word.
    pub const fn to_word(self) -> u64 {
        self.0
    }

    /// The slot index.
    pub const fn slot(self) -> u16 {
        (self.0 >> OFFSET_BITS) as u16
    }

    /// The byte offset within the slot.
    pub const fn offset(self) -> u64 {
        self.0 & OFFSET_MASK
    }

    /// `true` if the offset is a multiple of `align`.
    pub const fn is_aligned(self, align: u64) -> bool {
        self.offset() % align == 0
    }
}

impl Add<u64> for VirtualPointer {
    type Output = Self;

    fn add(self, rhs: u64) -> Self {
        Self::new(self.slot(), self.offset().wrapping_add(rhs) & OFFSET_MASK)
    }
}

impl AddAssign<u64> for VirtualPointer {
    fn add_assign(&mut self, rhs: u64) {
        *self = *self + rhs;
    }
}

impl Sub<u64> for VirtualPointer {
    type Output = Self;

    fn sub(self, rhs: u64) -> Self {
        Self::new(self.slot(), self.offset().wrapping_sub(rhs) & OFFSET_MASK)
    }
}

impl SubAssign<u64> for VirtualPointer {
    fn sub_assign(&mut self, rhs: u64) {
        *self = *self - rhs;
    }
}

impl Sub for VirtualPointer {
    type Output = i64;

    /// Difference of the offsets. The slots are not compared; pointers into
    /// different slots have no meaningful distance.
    fn sub(self, rhs: Self) -> i64 {
        self.offset() as i64 - rhs.offset() as i64
    }
}

impl fmt::Debug for VirtualPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:#x}", self.slot(), self.offset())
    }
}

impl fmt::Display for VirtualPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_unpack() {
        let p = VirtualPointer::new(5, 16);
        assert_eq!(p.slot(), 5);
        assert_eq!(p.offset(), 16);
        assert_eq!(VirtualPointer::from_word(p.to_word()), p);
    }

    #[test]
    fn arithmetic() {
        let p = VirtualPointer::new(5, 16);
        let q = p + 32;
        assert_eq!(q, VirtualPointer::new(5, 48));
        assert_eq!(q - p, 32);
        assert_eq!(p - q, -32);
    }

    #[rstest::rstest]
    #[case(16, 8, true)]
    #[case(20, 8, false)]
    #[case(20, 4, true)]
    #[case(21, 2, false)]
    #[case(0, 16, true)]
    fn alignment(#[case] offset: u64, #[case] align: u64, #[case] expected: bool) {
        assert_eq!(VirtualPointer::new(5, offset).is_aligned(align), expected);
    }

    #[test]
    fn offset_does_not_spill_into_slot() {
        let p = VirtualPointer::new(3, OFFSET_MASK);
        assert_eq!((p + 1).slot(), 3);
        assert_eq!((p + 1).offset(), 0);
    }
}
