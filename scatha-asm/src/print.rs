//! Program disassembly printing.

use core::fmt::Write;

use crate::opcode::{OpCode, OperandKind};
use crate::program::Program;

/// Renders the text section one instruction per line, with byte offsets.
/// Decoding stops at the first invalid opcode, which is reported in place.
pub fn print_program(program: &Program) -> String {
    let mut out = String::new();
    writeln!(out, "start: {:#x}", program.start).unwrap();
    let text = &program.text;
    let mut offset = 0usize;
    while offset < text.len() {
        let Ok(opcode) = OpCode::try_from(text[offset]) else {
            writeln!(out, "{offset:#08x}: <invalid opcode {:#04x}>", text[offset]).unwrap();
            break;
        };
        if offset + opcode.size() > text.len() {
            writeln!(out, "{offset:#08x}: <truncated {}>", opcode.mnemonic()).unwrap();
            break;
        }
        write!(out, "{offset:#08x}: {}", opcode.mnemonic()).unwrap();
        let mut cursor = offset + 1;
        for (position, kind) in opcode.operands().iter().enumerate() {
            let size = kind.size();
            let mut raw = [0u8; 8];
            raw[..size].copy_from_slice(&text[cursor..cursor + size]);
            let value = u64::from_le_bytes(raw);
            cursor += size;
            let sep = if position == 0 { " " } else { ", " };
            match kind {
                OperandKind::Reg => write!(out, "{sep}%{value}").unwrap(),
                OperandKind::Mem => {
                    let addr =
                        crate::common::MemoryAddress::decode(value.to_le_bytes()[..4].try_into().unwrap());
                    write!(out, "{sep}{}", crate::common::AsmValue::Memory(addr)).unwrap();
                }
                OperandKind::Dest => write!(out, "{sep}{value:#x}").unwrap(),
                _ => write!(out, "{sep}{value}").unwrap(),
            }
        }
        out.push('\n');
        offset += opcode.size();
    }
    if !program.foreign.is_empty() {
        writeln!(out, "\nforeign functions:").unwrap();
        for (index, function) in program.foreign.iter().enumerate() {
            writeln!(out, "  {index}: {function}").unwrap();
        }
    }
    out
}
