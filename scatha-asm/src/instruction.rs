//! Assembly instructions and the stream the assembler consumes.

use scatha_types::ForeignFunction;

use crate::common::{
    ArithmeticOperation, AsmValue, CompareMode, CompareOperation, Conversion, LabelId,
    MemoryAddress, UnaryArithmeticOperation,
};

/// One assembly instruction. The assembler resolves each instruction to a
/// concrete opcode by overload resolution over its operand kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    /// Register/memory/immediate move of `bytes` bytes.
    Move {
        /// Destination: register or memory.
        dest: AsmValue,
        /// Source: register, memory, or immediate.
        src: AsmValue,
        /// Width in bytes: 1, 2, 4, or 8.
        bytes: u8,
    },
    /// Conditional register move.
    CMove {
        /// Condition over the flags.
        cond: CompareOperation,
        /// Destination register.
        dest: AsmValue,
        /// Source register or immediate.
        src: AsmValue,
        /// Width in bytes.
        bytes: u8,
    },
    /// Jump, unconditional when `cond` is `None`.
    Jump {
        /// Condition over the flags.
        cond: Option<CompareOperation>,
        /// Target label.
        target: LabelId,
    },
    /// Call to a local label.
    Call {
        /// Target label.
        target: LabelId,
        /// Register window offset.
        reg_offset: u8,
    },
    /// Indirect call through a register holding a text offset.
    CallReg {
        /// Register holding the target offset.
        reg: u8,
        /// Register window offset.
        reg_offset: u8,
    },
    /// Foreign call through the function table.
    CallExt {
        /// Register window offset; arguments start there.
        reg_offset: u8,
        /// Library slot.
        slot: u16,
        /// Function index within the slot.
        index: u32,
    },
    /// Return to the caller.
    Return,
    /// Flag-setting comparison.
    Compare {
        /// Operand interpretation.
        mode: CompareMode,
        /// Left operand register.
        lhs: AsmValue,
        /// Right operand register or immediate.
        rhs: AsmValue,
        /// Width in bytes: 1, 2, 4, or 8.
        bytes: u8,
    },
    /// Flag-setting test against zero.
    Test {
        /// `true` for signed interpretation.
        signed: bool,
        /// Operand register.
        operand: AsmValue,
        /// Width in bytes.
        bytes: u8,
    },
    /// Materializes a condition into a register.
    Set {
        /// Condition over the flags.
        cond: CompareOperation,
        /// Destination register.
        dest: u8,
    },
    /// In-place binary arithmetic: `dest op= src`.
    Arithmetic {
        /// Operation.
        op: ArithmeticOperation,
        /// Destination register.
        dest: u8,
        /// Source register, immediate, or memory operand.
        src: AsmValue,
        /// Width in bytes: 4 or 8.
        bytes: u8,
    },
    /// In-place unary arithmetic.
    UnaryArithmetic {
        /// Operation.
        op: UnaryArithmeticOperation,
        /// Operand register.
        operand: u8,
    },
    /// In-place conversion.
    Convert {
        /// Conversion kind.
        conv: Conversion,
        /// Operand register.
        operand: u8,
    },
    /// Stack allocation.
    LIncSP {
        /// Destination register for the allocated address.
        dest: u8,
        /// Number of bytes to allocate.
        bytes: u16,
    },
    /// Address computation.
    Lea {
        /// Destination register.
        dest: u8,
        /// Address operand.
        addr: MemoryAddress,
    },
    /// Unconditional trap.
    Trap,
}

/// A labeled run of instructions.
#[derive(Debug, Clone)]
pub struct Block {
    /// Label the stream's jumps and calls reference.
    pub label: LabelId,
    /// Symbol name; function entry blocks carry the function name.
    pub name: String,
    /// Recorded in the binary symbol table when set.
    pub public: bool,
    /// The instructions.
    pub insts: Vec<Instruction>,
}

/// The assembler's input: blocks plus the data section and foreign function
/// table collected during code generation.
#[derive(Debug, Clone, Default)]
pub struct AssemblyStream {
    /// Blocks in emission order.
    pub blocks: Vec<Block>,
    /// Static data section.
    pub data: Vec<u8>,
    /// Foreign function table.
    pub foreign: Vec<ForeignFunction>,
    /// Label of the entry function.
    pub entry: Option<LabelId>,
}
