use core::fmt;

/// Fixed-width integer constant with explicit bit width.
///
/// Widths from 1 to 64 bits are supported. The raw value is stored
/// zero-extended to 64 bits; all operations truncate their result back to the
/// width, so `raw & !mask == 0` is an invariant.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ApInt {
    bits: u32,
    raw: u64,
}

impl ApInt {
    /// Creates a constant of `bits` width, truncating `value` to fit.
    ///
    /// # Panics
    /// If `bits` is zero or greater than 64.
    pub fn new(value: u64, bits: u32) -> Self {
        assert!(bits >= 1 && bits <= 64, "unsupported integer width: {bits}");
        Self {
            bits,
            raw: value & Self::mask(bits),
        }
    }

    /// Creates a constant from a signed value, truncating to `bits`.
    pub fn from_i64(value: i64, bits: u32) -> Self {
        Self::new(value as u64, bits)
    }

    /// The all-zeros value of the given width.
    pub fn zero(bits: u32) -> Self {
        Self::new(0, bits)
    }

    /// The value one of the given width.
    pub fn one(bits: u32) -> Self {
        Self::new(1, bits)
    }

    fn mask(bits: u32) -> u64 {
        if bits == 64 {
            u64::MAX
        } else {
            (1u64 << bits) - 1
        }
    }

    /// The width in bits.
    pub fn bitwidth(&self) -> u32 {
        self.bits
    }

    /// The value zero-extended to 64 bits.
    pub fn as_u64(&self) -> u64 {
        self.raw
    }

    /// The value sign-extended to 64 bits.
    pub fn as_i64(&self) -> i64 {
        let shift = 64 - self.bits;
        ((self.raw << shift) as i64) >> shift
    }

    /// `true` if the value is zero.
    pub fn is_zero(&self) -> bool {
        self.raw == 0
    }

    /// `true` if the value is one.
    pub fn is_one(&self) -> bool {
        self.raw == 1
    }

    /// `true` if every bit of the value is set.
    pub fn is_all_ones(&self) -> bool {
        self.raw == Self::mask(self.bits)
    }

    fn binop(self, rhs: Self, f: impl FnOnce(u64, u64) -> u64) -> Self {
        debug_assert_eq!(self.bits, rhs.bits, "width mismatch");
        Self::new(f(self.raw, rhs.raw), self.bits)
    }

    /// Wrapping addition.
    pub fn add(self, rhs: Self) -> Self {
        self.binop(rhs, u64::wrapping_add)
    }

    /// Wrapping subtraction.
    pub fn sub(self, rhs: Self) -> Self {
        self.binop(rhs, u64::wrapping_sub)
    }

    /// Wrapping multiplication.
    pub fn mul(self, rhs: Self) -> Self {
        self.binop(rhs, u64::wrapping_mul)
    }

    /// Signed division. `None` on division by zero; the overflowing case
    /// `MIN / -1` wraps.
    pub fn sdiv(self, rhs: Self) -> Option<Self> {
        if rhs.is_zero() {
            return None;
        }
        let v = self.as_i64().wrapping_div(rhs.as_i64());
        Some(Self::from_i64(v, self.bits))
    }

    /// Unsigned division. `None` on division by zero.
    pub fn udiv(self, rhs: Self) -> Option<Self> {
        if rhs.is_zero() {
            return None;
        }
        Some(Self::new(self.raw / rhs.raw, self.bits))
    }

    /// Signed remainder. `None` on division by zero.
    pub fn srem(self, rhs: Self) -> Option<Self> {
        if rhs.is_zero() {
            return None;
        }
        let v = self.as_i64().wrapping_rem(rhs.as_i64());
        Some(Self::from_i64(v, self.bits))
    }

    /// Unsigned remainder. `None` on division by zero.
    pub fn urem(self, rhs: Self) -> Option<Self> {
        if rhs.is_zero() {
            return None;
        }
        Some(Self::new(self.raw % rhs.raw, self.bits))
    }

    /// Left shift. `None` if the shift amount is not less than the width.
    pub fn shl(self, rhs: Self) -> Option<Self> {
        let amount = rhs.raw;
        if amount >= u64::from(self.bits) {
            return None;
        }
        Some(Self::new(self.raw << amount, self.bits))
    }

    /// Logical right shift. `None` if the shift amount is not less than the
    /// width.
    pub fn lshr(self, rhs: Self) -> Option<Self> {
        let amount = rhs.raw;
        if amount >= u64::from(self.bits) {
            return None;
        }
        Some(Self::new(self.raw >> amount, self.bits))
    }

    /// Arithmetic right shift. `None` if the shift amount is not less than
    /// the width.
    pub fn ashr(self, rhs: Self) -> Option<Self> {
        let amount = rhs.raw;
        if amount >= u64::from(self.bits) {
            return None;
        }
        Some(Self::from_i64(self.as_i64() >> amount, self.bits))
    }

    /// Bitwise and.
    pub fn and(self, rhs: Self) -> Self {
        self.binop(rhs, |a, b| a & b)
    }

    /// Bitwise or.
    pub fn or(self, rhs: Self) -> Self {
        self.binop(rhs, |a, b| a | b)
    }

    /// Bitwise xor.
    pub fn xor(self, rhs: Self) -> Self {
        self.binop(rhs, |a, b| a ^ b)
    }

    /// Two's complement negation.
    pub fn neg(self) -> Self {
        Self::new(self.raw.wrapping_neg(), self.bits)
    }

    /// Bitwise complement.
    pub fn not(self) -> Self {
        Self::new(!self.raw, self.bits)
    }

    /// Signed three-way comparison.
    pub fn scmp(self, rhs: Self) -> core::cmp::Ordering {
        self.as_i64().cmp(&rhs.as_i64())
    }

    /// Unsigned three-way comparison.
    pub fn ucmp(self, rhs: Self) -> core::cmp::Ordering {
        self.raw.cmp(&rhs.raw)
    }

    /// Zero extension or truncation to `bits`.
    pub fn zext(self, bits: u32) -> Self {
        Self::new(self.raw, bits)
    }

    /// Sign extension to `bits`, which must not be narrower than the current
    /// width.
    pub fn sext(self, bits: u32) -> Self {
        debug_assert!(bits >= self.bits);
        Self::from_i64(self.as_i64(), bits)
    }

    /// Truncation to `bits`, which must not be wider than the current width.
    pub fn trunc(self, bits: u32) -> Self {
        debug_assert!(bits <= self.bits);
        Self::new(self.raw, bits)
    }
}

impl fmt::Display for ApInt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // 1 bit values print unsigned, everything else prints signed.
        if self.bits == 1 {
            write!(f, "{}", self.raw)
        } else {
            write!(f, "{}", self.as_i64())
        }
    }
}

impl fmt::Debug for ApInt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:i{}", self, self.bits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_on_construction() {
        let x = ApInt::new(0x1_0000_0001, 32);
        assert_eq!(x.as_u64(), 1);
        assert_eq!(x.bitwidth(), 32);
    }

    #[test]
    fn signed_interpretation() {
        let x = ApInt::new(0xff, 8);
        assert_eq!(x.as_i64(), -1);
        assert_eq!(x.as_u64(), 255);
        assert_eq!(x.sext(64).as_i64(), -1);
        assert_eq!(x.zext(64).as_u64(), 255);
    }

    #[test]
    fn wrapping_arithmetic() {
        let a = ApInt::new(200, 8);
        let b = ApInt::new(100, 8);
        assert_eq!(a.add(b).as_u64(), 44);
        assert_eq!(ApInt::zero(8).sub(ApInt::one(8)).as_u64(), 255);
    }

    #[test]
    fn division_by_zero_is_none() {
        let a = ApInt::new(7, 64);
        assert!(a.sdiv(ApInt::zero(64)).is_none());
        assert!(a.urem(ApInt::zero(64)).is_none());
    }

    #[test]
    fn shifts_reject_excessive_amounts() {
        let a = ApInt::new(1, 32);
        assert!(a.shl(ApInt::new(32, 32)).is_none());
        assert_eq!(a.shl(ApInt::new(31, 32)).unwrap().as_u64(), 0x8000_0000);
    }

    #[test]
    fn arithmetic_shift_keeps_sign() {
        let a = ApInt::from_i64(-8, 64);
        assert_eq!(a.ashr(ApInt::new(2, 64)).unwrap().as_i64(), -2);
        assert_eq!(a.lshr(ApInt::new(2, 64)).unwrap().as_i64() > 0, true);
    }
}
