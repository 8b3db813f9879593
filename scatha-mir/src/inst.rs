//! MIR instructions and operands.

use core::fmt;

use smallvec::SmallVec;

use crate::reg::Reg;

/// Key of a MIR basic block within its function.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Block(pub(crate) u32);

impl Block {
    /// Creates a key from its index.
    pub fn from_index(index: usize) -> Self {
        Self(index as u32)
    }

    /// The wrapped index.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

/// Key of a MIR instruction within its function.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Inst(pub(crate) u32);

impl Inst {
    /// Creates a key from its index.
    pub fn from_index(index: usize) -> Self {
        Self(index as u32)
    }

    /// The wrapped index.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for Inst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mi{}", self.0)
    }
}

/// A constant operand with its width in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Constant {
    /// Raw value, zero-extended.
    pub value: u64,
    /// Width in bytes: 1, 2, 4, or 8.
    pub bytes: u32,
}

/// A MIR operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Value {
    /// A register of any class.
    Reg(Reg),
    /// An immediate constant.
    Const(Constant),
    /// Address of a function in the same module, resolved to its text
    /// offset by the assembler.
    Function(usize),
    /// An unspecified value.
    Undef,
}

impl Value {
    /// The register, if this operand is one.
    pub fn as_reg(self) -> Option<Reg> {
        match self {
            Value::Reg(reg) => Some(reg),
            _ => None,
        }
    }
}

impl From<Reg> for Value {
    fn from(reg: Reg) -> Self {
        Value::Reg(reg)
    }
}

/// Condition over the VM compare flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Condition {
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

impl Condition {
    /// The negated condition.
    pub fn inverse(self) -> Self {
        match self {
            Self::Eq => Self::Ne,
            Self::Ne => Self::Eq,
            Self::Lt => Self::Ge,
            Self::Le => Self::Gt,
            Self::Gt => Self::Le,
            Self::Ge => Self::Lt,
        }
    }
}

/// How a compare interprets its operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareMode {
    /// Signed integers.
    Signed,
    /// Unsigned integers.
    Unsigned,
    /// Floats.
    Float,
}

/// Binary ALU operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    SDiv,
    UDiv,
    SRem,
    URem,
    Shl,
    LShr,
    AShr,
    And,
    Or,
    Xor,
    FAdd,
    FSub,
    FMul,
    FDiv,
}

/// Unary ALU operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum UnaryOp {
    BitNot,
    LogNot,
    Neg,
    FNeg,
}

/// Width-changing conversions that need their own opcodes. Truncations,
/// zero extensions, and bitcasts lower to plain copies at the right width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Conversion {
    /// Sign extension from the given bit width to 64 bits.
    Sext(u32),
    /// `f32` to `f64`.
    Fext,
    /// `f64` to `f32`.
    Ftrunc,
    /// Signed int (bits.0) to float (bits.1).
    StoF(u32, u32),
    /// Unsigned int (bits.0) to float (bits.1).
    UtoF(u32, u32),
    /// Float (bits.0) to signed int (bits.1).
    FtoS(u32, u32),
    /// Float (bits.0) to unsigned int (bits.1).
    FtoU(u32, u32),
}

/// An addressing-mode operand: `base + dynamic * factor + term`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address {
    /// Base pointer register.
    pub base: Reg,
    /// Scaled dynamic index, if any.
    pub dynamic: Option<Reg>,
    /// Byte factor applied to the dynamic index.
    pub factor: u8,
    /// Constant byte offset.
    pub term: u8,
}

impl Address {
    /// A plain dereference of `base`.
    pub fn base_only(base: Reg) -> Self {
        Self {
            base,
            dynamic: None,
            factor: 0,
            term: 0,
        }
    }
}

/// A call destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallTarget {
    /// Function in the same MIR module, by index.
    Static(usize),
    /// Foreign function, by index into the module's foreign table.
    Foreign(usize),
    /// Indirect call through a register holding a text offset.
    Indirect(Reg),
}

/// A MIR instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum InstData {
    /// Register or immediate move.
    Copy {
        /// Destination.
        dest: Reg,
        /// Source value.
        src: Value,
        /// Move width in bytes.
        bytes: u32,
    },
    /// Move executed only when the flags satisfy the condition.
    CondCopy {
        /// Destination.
        dest: Reg,
        /// Source value.
        src: Value,
        /// Move width in bytes.
        bytes: u32,
        /// Guard condition.
        cond: Condition,
    },
    /// Stack allocation: bump the stack pointer, yielding the old top.
    LIncSP {
        /// Receives the allocated address.
        dest: Reg,
        /// Allocation size; a 16 bit constant after legalization.
        size: Value,
    },
    /// Address computation without memory access.
    Lea {
        /// Destination.
        dest: Reg,
        /// Address.
        addr: Address,
    },
    /// Memory read.
    Load {
        /// Destination.
        dest: Reg,
        /// Address.
        addr: Address,
        /// Access width in bytes.
        bytes: u32,
    },
    /// Memory write.
    Store {
        /// Address.
        addr: Address,
        /// Stored value.
        src: Value,
        /// Access width in bytes.
        bytes: u32,
    },
    /// Binary ALU operation. `dest` starts as a copy of `lhs`.
    Arith {
        /// Destination.
        dest: Reg,
        /// Operation.
        op: ArithOp,
        /// Left operand.
        lhs: Value,
        /// Right operand; may be a deferred load address.
        rhs: ArithRhs,
        /// Operand width in bytes (4 or 8).
        bytes: u32,
    },
    /// Unary ALU operation.
    UnaryArith {
        /// Destination.
        dest: Reg,
        /// Operation.
        op: UnaryOp,
        /// Operand.
        operand: Value,
        /// Operand width in bytes.
        bytes: u32,
    },
    /// Width-changing conversion.
    Convert {
        /// Destination.
        dest: Reg,
        /// Conversion kind.
        conv: Conversion,
        /// Operand.
        operand: Value,
    },
    /// Sets the compare flags.
    Compare {
        /// Operand interpretation.
        mode: CompareMode,
        /// Left operand.
        lhs: Value,
        /// Right operand.
        rhs: Value,
        /// Operand width in bytes.
        bytes: u32,
    },
    /// Compares a value against zero.
    Test {
        /// `true` for signed interpretation.
        signed: bool,
        /// Operand.
        operand: Value,
        /// Operand width in bytes.
        bytes: u32,
    },
    /// Materializes a flag condition as 0 or 1.
    Set {
        /// Destination.
        dest: Reg,
        /// Condition.
        cond: Condition,
    },
    /// SSA join; destroyed before register allocation.
    Phi {
        /// Destination.
        dest: Reg,
        /// `(predecessor, value)` pairs.
        args: SmallVec<[(Block, Value); 2]>,
        /// Value width in bytes.
        bytes: u32,
    },
    /// Function call.
    Call {
        /// Result register, if the callee returns a value.
        dest: Option<Reg>,
        /// Callee.
        target: CallTarget,
        /// Arguments; rewritten to callee registers by SSA destruction.
        args: SmallVec<[Value; 4]>,
        /// Register window offset, fixed during devirtualization.
        reg_offset: Option<u32>,
    },
    /// Function return. Return values are copied into the low registers by
    /// SSA destruction; operands keep them alive.
    Return {
        /// Values still observable at the return.
        values: SmallVec<[Value; 2]>,
    },
    /// Unconditional jump.
    Jump {
        /// Target block.
        target: Block,
    },
    /// Jump taken when the flags satisfy the condition.
    CondJump {
        /// Target block.
        target: Block,
        /// Condition.
        cond: Condition,
    },
    /// Halts execution with a trap error.
    Trap,
}

/// Right operand of an ALU instruction: a value, or a memory operand fused
/// by instruction selection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ArithRhs {
    /// Ordinary operand.
    Value(Value),
    /// Deferred load.
    Memory(Address),
}

impl InstData {
    /// The destination register, if any.
    pub fn dest(&self) -> Option<Reg> {
        match self {
            InstData::Copy { dest, .. }
            | InstData::CondCopy { dest, .. }
            | InstData::LIncSP { dest, .. }
            | InstData::Lea { dest, .. }
            | InstData::Load { dest, .. }
            | InstData::Arith { dest, .. }
            | InstData::UnaryArith { dest, .. }
            | InstData::Convert { dest, .. }
            | InstData::Set { dest, .. }
            | InstData::Phi { dest, .. } => Some(*dest),
            InstData::Call { dest, .. } => *dest,
            _ => None,
        }
    }

    /// Rewrites the destination register.
    pub fn set_dest(&mut self, new: Reg) {
        match self {
            InstData::Copy { dest, .. }
            | InstData::CondCopy { dest, .. }
            | InstData::LIncSP { dest, .. }
            | InstData::Lea { dest, .. }
            | InstData::Load { dest, .. }
            | InstData::Arith { dest, .. }
            | InstData::UnaryArith { dest, .. }
            | InstData::Convert { dest, .. }
            | InstData::Set { dest, .. }
            | InstData::Phi { dest, .. } => *dest = new,
            InstData::Call { dest, .. } => *dest = Some(new),
            _ => panic!("instruction has no destination"),
        }
    }

    /// Calls `f` for every register the instruction reads.
    pub fn for_each_use(&self, mut f: impl FnMut(Reg)) {
        let value = |v: &Value, f: &mut dyn FnMut(Reg)| {
            if let Value::Reg(reg) = v {
                f(*reg)
            }
        };
        let addr = |a: &Address, f: &mut dyn FnMut(Reg)| {
            f(a.base);
            if let Some(dynamic) = a.dynamic {
                f(dynamic);
            }
        };
        match self {
            InstData::Copy { src, .. } | InstData::CondCopy { src, .. } => value(src, &mut f),
            InstData::LIncSP { size, .. } => value(size, &mut f),
            InstData::Lea { addr: a, .. } | InstData::Load { addr: a, .. } => addr(a, &mut f),
            InstData::Store { addr: a, src, .. } => {
                addr(a, &mut f);
                value(src, &mut f);
            }
            InstData::Arith { dest: _, lhs, rhs, .. } => {
                value(lhs, &mut f);
                match rhs {
                    ArithRhs::Value(v) => value(v, &mut f),
                    ArithRhs::Memory(a) => addr(a, &mut f),
                }
            }
            InstData::UnaryArith { operand, .. } | InstData::Convert { operand, .. } => {
                value(operand, &mut f)
            }
            InstData::Compare { lhs, rhs, .. } => {
                value(lhs, &mut f);
                value(rhs, &mut f);
            }
            InstData::Test { operand, .. } => value(operand, &mut f),
            InstData::Set { .. } => {}
            InstData::Phi { args, .. } => {
                for (_, v) in args {
                    value(v, &mut f);
                }
            }
            InstData::Call { target, args, .. } => {
                if let CallTarget::Indirect(reg) = target {
                    f(*reg);
                }
                for v in args {
                    value(v, &mut f);
                }
            }
            InstData::Return { values } => {
                for v in values {
                    value(v, &mut f);
                }
            }
            InstData::Jump { .. } | InstData::CondJump { .. } | InstData::Trap => {}
        }
    }

    /// Rewrites every read of `old` into `new`.
    pub fn replace_use(&mut self, old: Reg, new: Value) {
        let map_value = |v: &mut Value| {
            if *v == Value::Reg(old) {
                *v = new;
            }
        };
        let map_addr = |a: &mut Address| {
            if let Value::Reg(new_reg) = new {
                if a.base == old {
                    a.base = new_reg;
                }
                if a.dynamic == Some(old) {
                    a.dynamic = Some(new_reg);
                }
            } else {
                debug_assert!(
                    a.base != old && a.dynamic != Some(old),
                    "cannot install a non-register into an address"
                );
            }
        };
        match self {
            InstData::Copy { src, .. } | InstData::CondCopy { src, .. } => map_value(src),
            InstData::LIncSP { size, .. } => map_value(size),
            InstData::Lea { addr, .. } | InstData::Load { addr, .. } => map_addr(addr),
            InstData::Store { addr, src, .. } => {
                map_addr(addr);
                map_value(src);
            }
            InstData::Arith { lhs, rhs, .. } => {
                map_value(lhs);
                match rhs {
                    ArithRhs::Value(v) => map_value(v),
                    ArithRhs::Memory(a) => map_addr(a),
                }
            }
            InstData::UnaryArith { operand, .. } | InstData::Convert { operand, .. } => {
                map_value(operand)
            }
            InstData::Compare { lhs, rhs, .. } => {
                map_value(lhs);
                map_value(rhs);
            }
            InstData::Test { operand, .. } => map_value(operand),
            InstData::Set { .. } => {}
            InstData::Phi { args, .. } => {
                for (_, v) in args {
                    map_value(v);
                }
            }
            InstData::Call { target, args, .. } => {
                if let CallTarget::Indirect(reg) = target {
                    if *reg == old {
                        *target = CallTarget::Indirect(
                            new.as_reg().expect("indirect call target must be a register"),
                        );
                    }
                }
                for v in args {
                    map_value(v);
                }
            }
            InstData::Return { values } => {
                for v in values {
                    map_value(v);
                }
            }
            InstData::Jump { .. } | InstData::CondJump { .. } | InstData::Trap => {}
        }
    }

    /// `true` for instructions that end a block.
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            InstData::Return { .. } | InstData::Jump { .. } | InstData::Trap
        )
    }

    /// `true` for instructions that must stay even when their destination is
    /// dead.
    pub fn has_side_effects(&self) -> bool {
        matches!(
            self,
            InstData::Store { .. }
                | InstData::Call { .. }
                | InstData::Compare { .. }
                | InstData::Test { .. }
                | InstData::LIncSP { .. }
                | InstData::Return { .. }
                | InstData::Jump { .. }
                | InstData::CondJump { .. }
                | InstData::Trap
        )
    }

    /// Successor blocks referenced by this instruction.
    pub fn block_targets(&self) -> SmallVec<[Block; 2]> {
        match self {
            InstData::Jump { target } | InstData::CondJump { target, .. } => {
                smallvec::smallvec![*target]
            }
            _ => SmallVec::new(),
        }
    }
}
