//! Overload resolution from assembly instructions to opcodes.
//!
//! Each function maps an instruction's operand kinds and width to the
//! concrete opcode, or `None` when the combination has no encoding; the
//! assembler turns `None` into an error naming the offending block.

use crate::common::{
    ArithmeticOperation, AsmValue, CompareMode, CompareOperation, Conversion,
    UnaryArithmeticOperation,
};
use crate::opcode::OpCode;

/// A resolved move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoveMapResult {
    /// The opcode.
    pub opcode: OpCode,
    /// Number of bytes the opcode moves.
    pub bytes: u8,
}

/// Resolves a move. Register destinations always move a full word;
/// memory destinations use the width-specific store forms.
pub fn map_move(dest: &AsmValue, src: &AsmValue, bytes: u8) -> Option<MoveMapResult> {
    use AsmValue::*;
    let result = match (dest, src) {
        (Register(_), Register(_)) => MoveMapResult {
            opcode: OpCode::mov64RR,
            bytes: 8,
        },
        (Register(_), Const8(_) | Const16(_) | Const32(_) | Const64(_) | Label(_)) => {
            MoveMapResult {
                opcode: OpCode::mov64RV,
                bytes: 8,
            }
        }
        (Register(_), Memory(_)) => MoveMapResult {
            opcode: match bytes {
                1 => OpCode::mov8RM,
                2 => OpCode::mov16RM,
                4 => OpCode::mov32RM,
                8 => OpCode::mov64RM,
                _ => return None,
            },
            bytes,
        },
        (Memory(_), Register(_)) => MoveMapResult {
            opcode: match bytes {
                1 => OpCode::mov8MR,
                2 => OpCode::mov16MR,
                4 => OpCode::mov32MR,
                8 => OpCode::mov64MR,
                _ => return None,
            },
            bytes,
        },
        _ => return None,
    };
    Some(result)
}

/// Resolves a conditional move; register and immediate sources only.
pub fn map_cmove(cond: CompareOperation, dest: &AsmValue, src: &AsmValue) -> Option<OpCode> {
    use AsmValue::*;
    if !matches!(dest, Register(_)) {
        return None;
    }
    let to_reg = matches!(src, Register(_));
    if !to_reg && src.as_const().is_none() {
        return None;
    }
    Some(match (cond, to_reg) {
        (CompareOperation::Eq, true) => OpCode::cmove64RR,
        (CompareOperation::Eq, false) => OpCode::cmove64RV,
        (CompareOperation::Ne, true) => OpCode::cmovne64RR,
        (CompareOperation::Ne, false) => OpCode::cmovne64RV,
        (CompareOperation::Lt, true) => OpCode::cmovl64RR,
        (CompareOperation::Lt, false) => OpCode::cmovl64RV,
        (CompareOperation::Le, true) => OpCode::cmovle64RR,
        (CompareOperation::Le, false) => OpCode::cmovle64RV,
        (CompareOperation::Gt, true) => OpCode::cmovg64RR,
        (CompareOperation::Gt, false) => OpCode::cmovg64RV,
        (CompareOperation::Ge, true) => OpCode::cmovge64RR,
        (CompareOperation::Ge, false) => OpCode::cmovge64RV,
    })
}

/// Resolves a jump.
pub fn map_jump(cond: Option<CompareOperation>) -> OpCode {
    match cond {
        None => OpCode::jmp,
        Some(CompareOperation::Eq) => OpCode::je,
        Some(CompareOperation::Ne) => OpCode::jne,
        Some(CompareOperation::Lt) => OpCode::jl,
        Some(CompareOperation::Le) => OpCode::jle,
        Some(CompareOperation::Gt) => OpCode::jg,
        Some(CompareOperation::Ge) => OpCode::jge,
    }
}

/// Resolves a compare over its mode, width, and right operand kind.
pub fn map_compare(mode: CompareMode, rhs: &AsmValue, bytes: u8) -> Option<OpCode> {
    let to_reg = matches!(rhs, AsmValue::Register(_));
    if !to_reg && rhs.as_const().is_none() {
        return None;
    }
    Some(match (mode, bytes, to_reg) {
        (CompareMode::Signed, 1, true) => OpCode::scmp8RR,
        (CompareMode::Signed, 2, true) => OpCode::scmp16RR,
        (CompareMode::Signed, 4, true) => OpCode::scmp32RR,
        (CompareMode::Signed, 8, true) => OpCode::scmp64RR,
        (CompareMode::Signed, 1, false) => OpCode::scmp8RV,
        (CompareMode::Signed, 2, false) => OpCode::scmp16RV,
        (CompareMode::Signed, 4, false) => OpCode::scmp32RV,
        (CompareMode::Signed, 8, false) => OpCode::scmp64RV,
        (CompareMode::Unsigned, 1, true) => OpCode::ucmp8RR,
        (CompareMode::Unsigned, 2, true) => OpCode::ucmp16RR,
        (CompareMode::Unsigned, 4, true) => OpCode::ucmp32RR,
        (CompareMode::Unsigned, 8, true) => OpCode::ucmp64RR,
        (CompareMode::Unsigned, 1, false) => OpCode::ucmp8RV,
        (CompareMode::Unsigned, 2, false) => OpCode::ucmp16RV,
        (CompareMode::Unsigned, 4, false) => OpCode::ucmp32RV,
        (CompareMode::Unsigned, 8, false) => OpCode::ucmp64RV,
        (CompareMode::Float, 4, true) => OpCode::fcmp32RR,
        (CompareMode::Float, 8, true) => OpCode::fcmp64RR,
        (CompareMode::Float, 4, false) => OpCode::fcmp32RV,
        (CompareMode::Float, 8, false) => OpCode::fcmp64RV,
        _ => return None,
    })
}

/// Resolves a test.
pub fn map_test(signed: bool, bytes: u8) -> Option<OpCode> {
    Some(match (signed, bytes) {
        (true, 1) => OpCode::stest8,
        (true, 2) => OpCode::stest16,
        (true, 4) => OpCode::stest32,
        (true, 8) => OpCode::stest64,
        (false, 1) => OpCode::utest8,
        (false, 2) => OpCode::utest16,
        (false, 4) => OpCode::utest32,
        (false, 8) => OpCode::utest64,
        _ => None?,
    })
}

/// Resolves a set.
pub fn map_set(cond: CompareOperation) -> OpCode {
    match cond {
        CompareOperation::Eq => OpCode::sete,
        CompareOperation::Ne => OpCode::setne,
        CompareOperation::Lt => OpCode::setl,
        CompareOperation::Le => OpCode::setle,
        CompareOperation::Gt => OpCode::setg,
        CompareOperation::Ge => OpCode::setge,
    }
}

/// Resolves a unary arithmetic instruction.
pub fn map_unary_arithmetic(op: UnaryArithmeticOperation) -> OpCode {
    match op {
        UnaryArithmeticOperation::LogicalNot => OpCode::lnt,
        UnaryArithmeticOperation::BitwiseNot => OpCode::bnt,
        UnaryArithmeticOperation::Negate => OpCode::neg64,
    }
}

macro_rules! arith_table {
    ($op:expr, $to_reg:expr, $to_mem:expr, $width64:expr, $($name:ident => $rr64:ident $rv64:ident $rm64:ident $rr32:ident $rv32:ident $rm32:ident),* $(,)?) => {
        match ($op, $width64, $to_reg, $to_mem) {
            $(
                (ArithmeticOperation::$name, true, true, _) => Some(OpCode::$rr64),
                (ArithmeticOperation::$name, true, false, false) => Some(OpCode::$rv64),
                (ArithmeticOperation::$name, true, false, true) => Some(OpCode::$rm64),
                (ArithmeticOperation::$name, false, true, _) => Some(OpCode::$rr32),
                (ArithmeticOperation::$name, false, false, false) => Some(OpCode::$rv32),
                (ArithmeticOperation::$name, false, false, true) => Some(OpCode::$rm32),
            )*
            _ => None,
        }
    };
}

/// Resolves a binary arithmetic instruction over its operation, width, and
/// source operand kind.
pub fn map_arithmetic(op: ArithmeticOperation, src: &AsmValue, bytes: u8) -> Option<OpCode> {
    let to_reg = matches!(src, AsmValue::Register(_));
    let to_mem = matches!(src, AsmValue::Memory(_));
    if !to_reg && !to_mem && src.as_const().is_none() {
        return None;
    }
    let width64 = match bytes {
        8 => true,
        4 => false,
        _ => return None,
    };
    if op.is_float() {
        // Floats have no memory form and both widths are value-suffixed.
        if to_mem {
            return None;
        }
        return Some(match (op, width64, to_reg) {
            (ArithmeticOperation::FAdd, true, true) => OpCode::fadd64RR,
            (ArithmeticOperation::FAdd, true, false) => OpCode::fadd64RV,
            (ArithmeticOperation::FAdd, false, true) => OpCode::fadd32RR,
            (ArithmeticOperation::FAdd, false, false) => OpCode::fadd32RV,
            (ArithmeticOperation::FSub, true, true) => OpCode::fsub64RR,
            (ArithmeticOperation::FSub, true, false) => OpCode::fsub64RV,
            (ArithmeticOperation::FSub, false, true) => OpCode::fsub32RR,
            (ArithmeticOperation::FSub, false, false) => OpCode::fsub32RV,
            (ArithmeticOperation::FMul, true, true) => OpCode::fmul64RR,
            (ArithmeticOperation::FMul, true, false) => OpCode::fmul64RV,
            (ArithmeticOperation::FMul, false, true) => OpCode::fmul32RR,
            (ArithmeticOperation::FMul, false, false) => OpCode::fmul32RV,
            (ArithmeticOperation::FDiv, true, true) => OpCode::fdiv64RR,
            (ArithmeticOperation::FDiv, true, false) => OpCode::fdiv64RV,
            (ArithmeticOperation::FDiv, false, true) => OpCode::fdiv32RR,
            (ArithmeticOperation::FDiv, false, false) => OpCode::fdiv32RV,
            _ => return None,
        });
    }
    arith_table!(op, to_reg, to_mem, width64,
        Add => add64RR add64RV add64RM add32RR add32RV add32RM,
        Sub => sub64RR sub64RV sub64RM sub32RR sub32RV sub32RM,
        Mul => mul64RR mul64RV mul64RM mul32RR mul32RV mul32RM,
        SDiv => sdiv64RR sdiv64RV sdiv64RM sdiv32RR sdiv32RV sdiv32RM,
        UDiv => udiv64RR udiv64RV udiv64RM udiv32RR udiv32RV udiv32RM,
        SRem => srem64RR srem64RV srem64RM srem32RR srem32RV srem32RM,
        URem => urem64RR urem64RV urem64RM urem32RR urem32RV urem32RM,
        And => and64RR and64RV and64RM and32RR and32RV and32RM,
        Or => or64RR or64RV or64RM or32RR or32RV or32RM,
        Xor => xor64RR xor64RV xor64RM xor32RR xor32RV xor32RM,
        Shl => sl64RR sl64RV sl64RM sl32RR sl32RV sl32RM,
        LShr => lsr64RR lsr64RV lsr64RM lsr32RR lsr32RV lsr32RM,
        AShr => asr64RR asr64RV asr64RM asr32RR asr32RV asr32RM,
    )
}

/// Resolves a conversion.
pub fn map_conversion(conv: Conversion) -> Option<OpCode> {
    Some(match conv {
        Conversion::Sext(1) => OpCode::sext1,
        Conversion::Sext(8) => OpCode::sext8,
        Conversion::Sext(16) => OpCode::sext16,
        Conversion::Sext(32) => OpCode::sext32,
        Conversion::Fext => OpCode::fext,
        Conversion::Ftrunc => OpCode::ftrunc,
        Conversion::SToF { from: 8, to: 32 } => OpCode::s8tof32,
        Conversion::SToF { from: 16, to: 32 } => OpCode::s16tof32,
        Conversion::SToF { from: 32, to: 32 } => OpCode::s32tof32,
        Conversion::SToF { from: 64, to: 32 } => OpCode::s64tof32,
        Conversion::SToF { from: 8, to: 64 } => OpCode::s8tof64,
        Conversion::SToF { from: 16, to: 64 } => OpCode::s16tof64,
        Conversion::SToF { from: 32, to: 64 } => OpCode::s32tof64,
        Conversion::SToF { from: 64, to: 64 } => OpCode::s64tof64,
        Conversion::UToF { from: 8, to: 32 } => OpCode::u8tof32,
        Conversion::UToF { from: 16, to: 32 } => OpCode::u16tof32,
        Conversion::UToF { from: 32, to: 32 } => OpCode::u32tof32,
        Conversion::UToF { from: 64, to: 32 } => OpCode::u64tof32,
        Conversion::UToF { from: 8, to: 64 } => OpCode::u8tof64,
        Conversion::UToF { from: 16, to: 64 } => OpCode::u16tof64,
        Conversion::UToF { from: 32, to: 64 } => OpCode::u32tof64,
        Conversion::UToF { from: 64, to: 64 } => OpCode::u64tof64,
        Conversion::FToS { from: 32, to: 8 } => OpCode::f32tos8,
        Conversion::FToS { from: 32, to: 16 } => OpCode::f32tos16,
        Conversion::FToS { from: 32, to: 32 } => OpCode::f32tos32,
        Conversion::FToS { from: 32, to: 64 } => OpCode::f32tos64,
        Conversion::FToS { from: 64, to: 8 } => OpCode::f64tos8,
        Conversion::FToS { from: 64, to: 16 } => OpCode::f64tos16,
        Conversion::FToS { from: 64, to: 32 } => OpCode::f64tos32,
        Conversion::FToS { from: 64, to: 64 } => OpCode::f64tos64,
        Conversion::FToU { from: 32, to: 8 } => OpCode::f32tou8,
        Conversion::FToU { from: 32, to: 16 } => OpCode::f32tou16,
        Conversion::FToU { from: 32, to: 32 } => OpCode::f32tou32,
        Conversion::FToU { from: 32, to: 64 } => OpCode::f32tou64,
        Conversion::FToU { from: 64, to: 8 } => OpCode::f64tou8,
        Conversion::FToU { from: 64, to: 16 } => OpCode::f64tou16,
        Conversion::FToU { from: 64, to: 32 } => OpCode::f64tou32,
        Conversion::FToU { from: 64, to: 64 } => OpCode::f64tou64,
        _ => return None,
    })
}
