//! The two-pass assembler and linker.

use hashbrown::HashMap;

use crate::common::{AsmValue, LabelId};
use crate::instruction::{AssemblyStream, Instruction};
use crate::map;
use crate::opcode::{OpCode, OperandKind};
use crate::program::{Program, VERSION};

/// Error produced during assembly.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AssemblerError {
    /// No opcode exists for the operand combination.
    #[error("in {block}: no encoding for {detail}")]
    InvalidOperands {
        /// Name of the block holding the instruction.
        block: String,
        /// Description of the combination.
        detail: String,
    },
    /// A jump or call references a label no block carries.
    #[error("in {block}: unresolved label {label}")]
    UnresolvedLabel {
        /// Name of the block holding the reference.
        block: String,
        /// The unresolved label.
        label: LabelId,
    },
    /// The stream has no entry label.
    #[error("assembly stream has no entry point")]
    MissingEntry,
}

/// Result of assembling a stream.
#[derive(Debug, Clone)]
pub struct AssemblyResult {
    /// The linked program.
    pub program: Program,
    /// Text offsets of public blocks, by name.
    pub symbols: HashMap<String, u64>,
}

/// One encoded operand, possibly a label awaiting resolution.
#[derive(Debug, Clone, Copy)]
enum Operand {
    Imm(u64, OperandKind),
    Label(LabelId, OperandKind),
}

fn encode_value(value: &AsmValue, kind: OperandKind) -> Operand {
    let raw = match value {
        AsmValue::Register(index) => u64::from(*index),
        AsmValue::Memory(addr) => u64::from_le_bytes({
            let mut bytes = [0u8; 8];
            bytes[..4].copy_from_slice(&addr.encode());
            bytes
        }),
        AsmValue::Label(label) => return Operand::Label(*label, kind),
        other => other.as_const().expect("operand kind mismatch"),
    };
    Operand::Imm(raw, kind)
}

/// Resolves one instruction to its opcode and operand list.
fn select(
    block_name: &str,
    inst: &Instruction,
) -> Result<(OpCode, Vec<Operand>), AssemblerError> {
    use OperandKind::*;
    let invalid = |detail: String| AssemblerError::InvalidOperands {
        block: block_name.to_owned(),
        detail,
    };
    let (opcode, operands) = match inst {
        Instruction::Move { dest, src, bytes } => {
            let resolved = map::map_move(dest, src, *bytes)
                .ok_or_else(|| invalid(format!("move of {bytes} bytes {dest} <- {src}")))?;
            let layout = resolved.opcode.operands();
            (
                resolved.opcode,
                vec![encode_value(dest, layout[0]), encode_value(src, layout[1])],
            )
        }
        Instruction::CMove { cond, dest, src, .. } => {
            let opcode = map::map_cmove(*cond, dest, src)
                .ok_or_else(|| invalid(format!("conditional move {dest} <- {src}")))?;
            let layout = opcode.operands();
            (
                opcode,
                vec![encode_value(dest, layout[0]), encode_value(src, layout[1])],
            )
        }
        Instruction::Jump { cond, target } => (
            map::map_jump(*cond),
            vec![Operand::Label(*target, Dest)],
        ),
        Instruction::Call { target, reg_offset } => (
            OpCode::call,
            vec![
                Operand::Label(*target, Dest),
                Operand::Imm(u64::from(*reg_offset), Val8),
            ],
        ),
        Instruction::CallReg { reg, reg_offset } => (
            OpCode::icallr,
            vec![
                Operand::Imm(u64::from(*reg), Reg),
                Operand::Imm(u64::from(*reg_offset), Val8),
            ],
        ),
        Instruction::CallExt {
            reg_offset,
            slot,
            index,
        } => (
            OpCode::callext,
            vec![
                Operand::Imm(u64::from(*reg_offset), Val8),
                Operand::Imm(u64::from(*slot), Slot),
                Operand::Imm(u64::from(*index), Index),
            ],
        ),
        Instruction::Return => (OpCode::ret, vec![]),
        Instruction::Compare {
            mode,
            lhs,
            rhs,
            bytes,
        } => {
            let opcode = map::map_compare(*mode, rhs, *bytes)
                .ok_or_else(|| invalid(format!("compare of {bytes} bytes {lhs}, {rhs}")))?;
            let layout = opcode.operands();
            (
                opcode,
                vec![encode_value(lhs, layout[0]), encode_value(rhs, layout[1])],
            )
        }
        Instruction::Test {
            signed,
            operand,
            bytes,
        } => {
            let opcode = map::map_test(*signed, *bytes)
                .ok_or_else(|| invalid(format!("test of {bytes} bytes")))?;
            (opcode, vec![encode_value(operand, Reg)])
        }
        Instruction::Set { cond, dest } => (
            map::map_set(*cond),
            vec![Operand::Imm(u64::from(*dest), Reg)],
        ),
        Instruction::Arithmetic {
            op,
            dest,
            src,
            bytes,
        } => {
            let opcode = map::map_arithmetic(*op, src, *bytes)
                .ok_or_else(|| invalid(format!("{op:?} of {bytes} bytes with {src}")))?;
            let layout = opcode.operands();
            (
                opcode,
                vec![
                    Operand::Imm(u64::from(*dest), Reg),
                    encode_value(src, layout[1]),
                ],
            )
        }
        Instruction::UnaryArithmetic { op, operand } => (
            map::map_unary_arithmetic(*op),
            vec![Operand::Imm(u64::from(*operand), Reg)],
        ),
        Instruction::Convert { conv, operand } => {
            let opcode = map::map_conversion(*conv)
                .ok_or_else(|| invalid(format!("conversion {conv:?}")))?;
            (opcode, vec![Operand::Imm(u64::from(*operand), Reg)])
        }
        Instruction::LIncSP { dest, bytes } => (
            OpCode::lincsp,
            vec![
                Operand::Imm(u64::from(*dest), Reg),
                Operand::Imm(u64::from(*bytes), Val16),
            ],
        ),
        Instruction::Lea { dest, addr } => (
            OpCode::lea,
            vec![
                Operand::Imm(u64::from(*dest), Reg),
                encode_value(&AsmValue::Memory(*addr), Mem),
            ],
        ),
        Instruction::Trap => (OpCode::terminate, vec![]),
    };
    Ok((opcode, operands))
}

/// Assembles and links a stream into a program.
///
/// Pass one lays out every block by summing encoded instruction sizes; pass
/// two encodes, back-patching label references with the final text offsets.
/// Foreign references were resolved to `(slot, index)` pairs during code
/// generation, so they encode directly.
pub fn assemble(stream: &AssemblyStream) -> Result<AssemblyResult, AssemblerError> {
    // First pass: block offsets.
    let mut offsets: HashMap<LabelId, u64> = HashMap::new();
    let mut cursor = 0u64;
    let mut encoded: Vec<Vec<(OpCode, Vec<Operand>)>> = Vec::with_capacity(stream.blocks.len());
    for block in &stream.blocks {
        offsets.insert(block.label, cursor);
        let mut insts = Vec::with_capacity(block.insts.len());
        for inst in &block.insts {
            let resolved = select(&block.name, inst)?;
            cursor += resolved.0.size() as u64;
            insts.push(resolved);
        }
        encoded.push(insts);
    }
    // Second pass: emit.
    let mut text = Vec::with_capacity(cursor as usize);
    for (block, insts) in stream.blocks.iter().zip(&encoded) {
        for (opcode, operands) in insts {
            text.push(*opcode as u8);
            for operand in operands {
                let (raw, kind) = match operand {
                    Operand::Imm(raw, kind) => (*raw, *kind),
                    Operand::Label(label, kind) => {
                        let offset = offsets.get(label).copied().ok_or_else(|| {
                            AssemblerError::UnresolvedLabel {
                                block: block.name.clone(),
                                label: *label,
                            }
                        })?;
                        (offset, *kind)
                    }
                };
                text.extend_from_slice(&raw.to_le_bytes()[..kind.size()]);
            }
        }
    }
    let start = match stream.entry {
        Some(label) => offsets
            .get(&label)
            .copied()
            .ok_or(AssemblerError::MissingEntry)?,
        None => return Err(AssemblerError::MissingEntry),
    };
    let mut symbols = HashMap::new();
    for block in &stream.blocks {
        if block.public {
            symbols.insert(block.name.clone(), offsets[&block.label]);
        }
    }
    Ok(AssemblyResult {
        program: Program {
            version: VERSION,
            data: stream.data.clone(),
            text,
            start,
            foreign: stream.foreign.clone(),
        },
        symbols,
    })
}
