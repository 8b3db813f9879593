//! Operand and operation vocabulary of the assembly layer.

use core::fmt;

/// Identifies a block label within one assembly stream.
pub type LabelId = u32;

/// Compare conditions, matching the VM flag tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOperation {
    /// Equal.
    Eq,
    /// Not equal.
    Ne,
    /// Less.
    Lt,
    /// Less or equal.
    Le,
    /// Greater.
    Gt,
    /// Greater or equal.
    Ge,
}

/// Operand interpretation of a compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareMode {
    /// Signed integers.
    Signed,
    /// Unsigned integers.
    Unsigned,
    /// Floats.
    Float,
}

/// Binary ALU operations at the assembly level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum ArithmeticOperation {
    Add,
    Sub,
    Mul,
    SDiv,
    UDiv,
    SRem,
    URem,
    And,
    Or,
    Xor,
    Shl,
    LShr,
    AShr,
    FAdd,
    FSub,
    FMul,
    FDiv,
}

impl ArithmeticOperation {
    /// `true` for the float operations.
    pub fn is_float(self) -> bool {
        matches!(self, Self::FAdd | Self::FSub | Self::FMul | Self::FDiv)
    }

    /// `true` for the shift operations, whose immediate form takes a one
    /// byte amount.
    pub fn is_shift(self) -> bool {
        matches!(self, Self::Shl | Self::LShr | Self::AShr)
    }
}

/// Unary ALU operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryArithmeticOperation {
    /// Logical complement of a boolean register.
    LogicalNot,
    /// Bitwise complement.
    BitwiseNot,
    /// Two's complement negation.
    Negate,
}

/// Width-changing conversions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Conversion {
    /// Sign extension from the given bit width (1, 8, 16, or 32).
    Sext(u32),
    /// `f32` to `f64`.
    Fext,
    /// `f64` to `f32`.
    Ftrunc,
    /// Signed int of `from` bits to float of `to` bits.
    SToF {
        /// Source width in bits.
        from: u32,
        /// Target width in bits.
        to: u32,
    },
    /// Unsigned int of `from` bits to float of `to` bits.
    UToF {
        /// Source width in bits.
        from: u32,
        /// Target width in bits.
        to: u32,
    },
    /// Float of `from` bits to signed int of `to` bits.
    FToS {
        /// Source width in bits.
        from: u32,
        /// Target width in bits.
        to: u32,
    },
    /// Float of `from` bits to unsigned int of `to` bits.
    FToU {
        /// Source width in bits.
        from: u32,
        /// Target width in bits.
        to: u32,
    },
}

/// A packed addressing-mode operand: `[base] + [dynamic] * factor + term`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemoryAddress {
    /// Register holding the base pointer.
    pub base: u8,
    /// Register holding the dynamic index, if any.
    pub dynamic: Option<u8>,
    /// Byte factor applied to the dynamic index.
    pub factor: u8,
    /// Constant byte offset.
    pub term: u8,
}

/// Placeholder register index meaning "no dynamic offset".
pub const NO_DYNAMIC_OFFSET: u8 = 0xFF;

impl MemoryAddress {
    /// The four encoded bytes.
    pub fn encode(self) -> [u8; 4] {
        [
            self.base,
            self.dynamic.unwrap_or(NO_DYNAMIC_OFFSET),
            self.factor,
            self.term,
        ]
    }

    /// Decodes the four byte form.
    pub fn decode(bytes: [u8; 4]) -> Self {
        Self {
            base: bytes[0],
            dynamic: (bytes[1] != NO_DYNAMIC_OFFSET).then_some(bytes[1]),
            factor: bytes[2],
            term: bytes[3],
        }
    }
}

/// An instruction operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AsmValue {
    /// Register index.
    Register(u8),
    /// Memory operand.
    Memory(MemoryAddress),
    /// 8 bit immediate.
    Const8(u8),
    /// 16 bit immediate.
    Const16(u16),
    /// 32 bit immediate.
    Const32(u32),
    /// 64 bit immediate.
    Const64(u64),
    /// Text offset of a label, materialized as a 64 bit immediate. Function
    /// pointers are built this way.
    Label(LabelId),
}

impl AsmValue {
    /// The register index, if this is a register operand.
    pub fn as_register(self) -> Option<u8> {
        match self {
            Self::Register(index) => Some(index),
            _ => None,
        }
    }

    /// The immediate widened to 64 bits, if this is a constant.
    pub fn as_const(self) -> Option<u64> {
        match self {
            Self::Const8(v) => Some(u64::from(v)),
            Self::Const16(v) => Some(u64::from(v)),
            Self::Const32(v) => Some(u64::from(v)),
            Self::Const64(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for AsmValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Register(index) => write!(f, "%{index}"),
            Self::Memory(addr) => {
                write!(f, "[%{}", addr.base)?;
                if let Some(dynamic) = addr.dynamic {
                    write!(f, " + %{} * {}", dynamic, addr.factor)?;
                }
                if addr.term != 0 {
                    write!(f, " + {}", addr.term)?;
                }
                write!(f, "]")
            }
            Self::Const8(v) => write!(f, "{v}"),
            Self::Const16(v) => write!(f, "{v}"),
            Self::Const32(v) => write!(f, "{v}"),
            Self::Const64(v) => write!(f, "{v}"),
            Self::Label(id) => write!(f, "L{id}"),
        }
    }
}
