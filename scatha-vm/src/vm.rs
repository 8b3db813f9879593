//! The virtual machine.

use hashbrown::HashMap;
use scatha_asm::{OpCode, Program};
use scatha_types::{VirtualPointer, Word};

use crate::error::{FfiErrorReason, VmError};
use crate::memory::VirtualMemory;

/// Result of the last compare or test instruction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompareFlags {
    /// Left operand was less than the right.
    pub less: bool,
    /// Operands were equal.
    pub equal: bool,
}

/// Execution counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionStatistics {
    /// Number of instructions the dispatch loop retired.
    pub executed_instructions: u64,
}

/// A host function callable through the foreign function table. Receives
/// the VM memory and the argument words from the caller's register window;
/// returns the value placed back into the window.
pub type HostFunction = Box<dyn FnMut(&mut VirtualMemory, &[Word]) -> Result<Word, VmError>>;

/// Default stack size in bytes.
pub const DEFAULT_STACK_SIZE: u64 = 1 << 20;

/// Size of one register window in words. The register file grows in window
/// granules as calls nest.
const WINDOW: usize = 256;

/// Sentinel return address marking the bottom frame.
const SENTINEL_IP: Word = Word::MAX;

/// Words below each window holding the saved return address and register
/// pointer offset.
const METADATA_WORDS: usize = 2;

struct BoundForeign {
    name: String,
    arg_count: usize,
}

/// A register machine executing one loaded bytecode program.
///
/// Single threaded and deterministic: dispatch is a flat match in
/// [`VirtualMachine::execute`], and the only reentrancy is the synchronous
/// foreign function trampoline.
pub struct VirtualMachine {
    registers: Vec<Word>,
    reg_ptr: usize,
    iptr: usize,
    flags: CompareFlags,
    /// The slot table. Public so embedding hosts can map buffers in and out.
    pub memory: VirtualMemory,
    text: Vec<u8>,
    start: Option<u64>,
    bound: Vec<BoundForeign>,
    registry: HashMap<String, HostFunction>,
    /// Execution counters.
    pub stats: ExecutionStatistics,
    stack_size: u64,
}

impl core::fmt::Debug for VirtualMachine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("VirtualMachine")
            .field("reg_ptr", &self.reg_ptr)
            .field("iptr", &self.iptr)
            .field("flags", &self.flags)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl Default for VirtualMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualMachine {
    /// Creates a machine with the default stack size.
    pub fn new() -> Self {
        Self::with_stack_size(DEFAULT_STACK_SIZE)
    }

    /// Creates a machine with the given stack size in bytes.
    pub fn with_stack_size(stack_size: u64) -> Self {
        Self {
            registers: Vec::new(),
            reg_ptr: 0,
            iptr: 0,
            flags: CompareFlags::default(),
            memory: VirtualMemory::new(Vec::new(), stack_size),
            text: Vec::new(),
            start: None,
            bound: Vec::new(),
            registry: HashMap::new(),
            stats: ExecutionStatistics::default(),
            stack_size,
        }
    }

    /// Registers a host function foreign references bind against by name.
    pub fn register_host_function(&mut self, name: impl Into<String>, function: HostFunction) {
        self.registry.insert(name.into(), function);
    }

    /// Loads a program: maps the data section, binds the foreign function
    /// table, and records the start address.
    pub fn load_program(&mut self, program: &Program) -> Result<(), VmError> {
        let mut bound = Vec::with_capacity(program.foreign.len());
        for decl in &program.foreign {
            if !self.registry.contains_key(&decl.name) {
                return Err(VmError::Ffi {
                    function: decl.name.clone(),
                    reason: FfiErrorReason::FailedToInit,
                });
            }
            bound.push(BoundForeign {
                name: decl.name.clone(),
                arg_count: decl.arg_types.len(),
            });
        }
        self.memory = VirtualMemory::new(program.data.clone(), self.stack_size);
        self.text = program.text.clone();
        self.start = Some(program.start);
        self.bound = bound;
        Ok(())
    }

    /// The current register window.
    pub fn registers(&self) -> &[Word] {
        &self.registers[self.reg_ptr..]
    }

    fn reg(&self, index: u8) -> Word {
        self.registers[self.reg_ptr + index as usize]
    }

    fn set_reg(&mut self, index: u8, value: Word) {
        self.registers[self.reg_ptr + index as usize] = value;
    }

    fn grow_registers(&mut self, reg_ptr: usize) {
        let needed = reg_ptr + WINDOW;
        if self.registers.len() < needed {
            self.registers.resize(needed, 0);
        }
    }

    fn fetch(&self, cursor: usize, size: usize) -> Result<u64, VmError> {
        let bytes = self
            .text
            .get(cursor..cursor + size)
            .ok_or(VmError::InvalidOpcode { value: 0 })?;
        let mut raw = [0u8; 8];
        raw[..size].copy_from_slice(bytes);
        Ok(u64::from_le_bytes(raw))
    }

    fn address(&self, raw: u64) -> VirtualPointer {
        let bytes = raw.to_le_bytes();
        let base = self.reg(bytes[0]);
        let mut pointer = VirtualPointer::from_word(base);
        if bytes[1] != scatha_asm::NO_DYNAMIC_OFFSET {
            pointer = pointer + self.reg(bytes[1]).wrapping_mul(u64::from(bytes[2]));
        }
        pointer + u64::from(bytes[3])
    }

    fn condition(&self, opcode: OpCode) -> bool {
        let CompareFlags { less, equal } = self.flags;
        use OpCode::*;
        match opcode {
            je | cmove64RR | cmove64RV | sete => equal,
            jne | cmovne64RR | cmovne64RV | setne => !equal,
            jl | cmovl64RR | cmovl64RV | setl => less,
            jle | cmovle64RR | cmovle64RV | setle => less || equal,
            jg | cmovg64RR | cmovg64RV | setg => !less && !equal,
            jge | cmovge64RR | cmovge64RV | setge => !less,
            _ => unreachable!("opcode has no condition"),
        }
    }

    /// Runs the loaded program from its start address. The entry function
    /// receives `args` in its register window and its register 0 is the
    /// result.
    pub fn execute(&mut self, args: &[Word]) -> Result<Word, VmError> {
        let start = self.start.ok_or(VmError::NoStartAddress)?;
        self.reg_ptr = METADATA_WORDS;
        self.grow_registers(self.reg_ptr);
        self.registers[0] = SENTINEL_IP;
        self.registers[1] = 0;
        for (index, &arg) in args.iter().enumerate() {
            self.registers[self.reg_ptr + index] = arg;
        }
        self.iptr = start as usize;
        self.run()?;
        Ok(self.registers[self.reg_ptr])
    }

    fn run(&mut self) -> Result<(), VmError> {
        loop {
            let byte = *self
                .text
                .get(self.iptr)
                .ok_or(VmError::InvalidOpcode { value: 0 })?;
            let opcode =
                OpCode::try_from(byte).map_err(|_| VmError::InvalidOpcode { value: byte })?;
            tracing::trace!(iptr = self.iptr, opcode = opcode.mnemonic());
            self.stats.executed_instructions += 1;
            if !self.step(opcode)? {
                return Ok(());
            }
        }
    }

    /// Executes one instruction. Returns `false` when the bottom frame
    /// returned.
    fn step(&mut self, opcode: OpCode) -> Result<bool, VmError> {
        use OpCode::*;
        let mut cursor = self.iptr + 1;
        let mut operands = [0u64; 3];
        for (position, kind) in opcode.operands().iter().enumerate() {
            operands[position] = self.fetch(cursor, kind.size())?;
            cursor += kind.size();
        }
        let next = self.iptr + opcode.size();
        self.iptr = next;
        match opcode {
            call => {
                let target = operands[0] as usize;
                let offset = operands[1] as usize;
                let new_rp = self.reg_ptr + offset;
                self.grow_registers(new_rp);
                self.registers[new_rp - 2] = next as Word;
                self.registers[new_rp - 1] = offset as Word;
                self.reg_ptr = new_rp;
                self.iptr = target;
            }
            icallr => {
                let target = self.reg(operands[0] as u8) as usize;
                let offset = operands[1] as usize;
                let new_rp = self.reg_ptr + offset;
                self.grow_registers(new_rp);
                self.registers[new_rp - 2] = next as Word;
                self.registers[new_rp - 1] = offset as Word;
                self.reg_ptr = new_rp;
                self.iptr = target;
            }
            ret => {
                let return_ip = self.registers[self.reg_ptr - 2];
                if return_ip == SENTINEL_IP {
                    return Ok(false);
                }
                let offset = self.registers[self.reg_ptr - 1] as usize;
                self.reg_ptr -= offset;
                self.iptr = return_ip as usize;
            }
            callext => {
                let offset = operands[0] as usize;
                let index = operands[2] as usize;
                let (name, arg_count) = {
                    let entry = self.bound.get(index).ok_or_else(|| VmError::Ffi {
                        function: format!("<index {index}>"),
                        reason: FfiErrorReason::FailedToInit,
                    })?;
                    (entry.name.clone(), entry.arg_count)
                };
                let base = self.reg_ptr + offset;
                self.grow_registers(base);
                let args: Vec<Word> = self.registers[base..base + arg_count].to_vec();
                let mut function =
                    self.registry.remove(&name).ok_or_else(|| VmError::Ffi {
                        function: name.clone(),
                        reason: FfiErrorReason::FailedToInit,
                    })?;
                let result = function(&mut self.memory, &args);
                self.registry.insert(name, function);
                self.registers[base] = result?;
            }
            terminate => return Err(VmError::Trap),

            mov64RR => {
                let value = self.reg(operands[1] as u8);
                self.set_reg(operands[0] as u8, value);
            }
            mov64RV => self.set_reg(operands[0] as u8, operands[1]),
            mov8RM | mov16RM | mov32RM | mov64RM => {
                let size = match opcode {
                    mov8RM => 1,
                    mov16RM => 2,
                    mov32RM => 4,
                    _ => 8,
                };
                let pointer = self.address(operands[1]);
                let value = self.memory.load(pointer, size)?;
                self.set_reg(operands[0] as u8, value);
            }
            mov8MR | mov16MR | mov32MR | mov64MR => {
                let size = match opcode {
                    mov8MR => 1,
                    mov16MR => 2,
                    mov32MR => 4,
                    _ => 8,
                };
                let pointer = self.address(operands[0]);
                let value = self.reg(operands[1] as u8);
                self.memory.store(pointer, value, size)?;
            }

            cmove64RR | cmovne64RR | cmovl64RR | cmovle64RR | cmovg64RR | cmovge64RR => {
                if self.condition(opcode) {
                    let value = self.reg(operands[1] as u8);
                    self.set_reg(operands[0] as u8, value);
                }
            }
            cmove64RV | cmovne64RV | cmovl64RV | cmovle64RV | cmovg64RV | cmovge64RV => {
                if self.condition(opcode) {
                    self.set_reg(operands[0] as u8, operands[1]);
                }
            }

            lincsp => {
                let pointer = self.memory.stack_alloc(operands[1])?;
                self.set_reg(operands[0] as u8, pointer.to_word());
            }
            lea => {
                let pointer = self.address(operands[1]);
                self.set_reg(operands[0] as u8, pointer.to_word());
            }

            jmp => self.iptr = operands[0] as usize,
            je | jne | jl | jle | jg | jge => {
                if self.condition(opcode) {
                    self.iptr = operands[0] as usize;
                }
            }

            scmp8RR | scmp16RR | scmp32RR | scmp64RR | scmp8RV | scmp16RV | scmp32RV
            | scmp64RV => {
                let (bits, rv) = match opcode {
                    scmp8RR => (8, false),
                    scmp16RR => (16, false),
                    scmp32RR => (32, false),
                    scmp64RR => (64, false),
                    scmp8RV => (8, true),
                    scmp16RV => (16, true),
                    scmp32RV => (32, true),
                    _ => (64, true),
                };
                let a = sext(self.reg(operands[0] as u8), bits);
                let raw = if rv { operands[1] } else { self.reg(operands[1] as u8) };
                let b = sext(raw, bits);
                self.flags = CompareFlags {
                    less: a < b,
                    equal: a == b,
                };
            }
            ucmp8RR | ucmp16RR | ucmp32RR | ucmp64RR | ucmp8RV | ucmp16RV | ucmp32RV
            | ucmp64RV => {
                let (bits, rv) = match opcode {
                    ucmp8RR => (8, false),
                    ucmp16RR => (16, false),
                    ucmp32RR => (32, false),
                    ucmp64RR => (64, false),
                    ucmp8RV => (8, true),
                    ucmp16RV => (16, true),
                    ucmp32RV => (32, true),
                    _ => (64, true),
                };
                let a = zext(self.reg(operands[0] as u8), bits);
                let raw = if rv { operands[1] } else { self.reg(operands[1] as u8) };
                let b = zext(raw, bits);
                self.flags = CompareFlags {
                    less: a < b,
                    equal: a == b,
                };
            }
            fcmp32RR | fcmp32RV | fcmp64RR | fcmp64RV => {
                let wide = matches!(opcode, fcmp64RR | fcmp64RV);
                let rv = matches!(opcode, fcmp32RV | fcmp64RV);
                let raw_a = self.reg(operands[0] as u8);
                let raw_b = if rv { operands[1] } else { self.reg(operands[1] as u8) };
                let (a, b) = if wide {
                    (f64::from_bits(raw_a), f64::from_bits(raw_b))
                } else {
                    (
                        f64::from(f32::from_bits(raw_a as u32)),
                        f64::from(f32::from_bits(raw_b as u32)),
                    )
                };
                // NaN compares neither less nor equal.
                self.flags = CompareFlags {
                    less: a < b,
                    equal: a == b,
                };
            }
            stest8 | stest16 | stest32 | stest64 => {
                let bits = match opcode {
                    stest8 => 8,
                    stest16 => 16,
                    stest32 => 32,
                    _ => 64,
                };
                let value = sext(self.reg(operands[0] as u8), bits);
                self.flags = CompareFlags {
                    less: value < 0,
                    equal: value == 0,
                };
            }
            utest8 | utest16 | utest32 | utest64 => {
                let bits = match opcode {
                    utest8 => 8,
                    utest16 => 16,
                    utest32 => 32,
                    _ => 64,
                };
                let value = zext(self.reg(operands[0] as u8), bits);
                self.flags = CompareFlags {
                    less: false,
                    equal: value == 0,
                };
            }

            sete | setne | setl | setle | setg | setge => {
                let value = self.condition(opcode) as Word;
                self.set_reg(operands[0] as u8, value);
            }

            lnt => {
                let value = self.reg(operands[0] as u8);
                self.set_reg(operands[0] as u8, (value == 0) as Word);
            }
            bnt => {
                let value = self.reg(operands[0] as u8);
                self.set_reg(operands[0] as u8, !value);
            }
            neg64 => {
                let value = self.reg(operands[0] as u8);
                self.set_reg(operands[0] as u8, value.wrapping_neg());
            }

            sext1 => self.unary(operands[0] as u8, |v| sext(v, 1) as u64),
            sext8 => self.unary(operands[0] as u8, |v| sext(v, 8) as u64),
            sext16 => self.unary(operands[0] as u8, |v| sext(v, 16) as u64),
            sext32 => self.unary(operands[0] as u8, |v| sext(v, 32) as u64),
            fext => self.unary(operands[0] as u8, |v| {
                f64::from(f32::from_bits(v as u32)).to_bits()
            }),
            ftrunc => self.unary(operands[0] as u8, |v| {
                u64::from((f64::from_bits(v) as f32).to_bits())
            }),
            s8tof32 | s16tof32 | s32tof32 | s64tof32 | s8tof64 | s16tof64 | s32tof64
            | s64tof64 => {
                let (bits, wide) = match opcode {
                    s8tof32 => (8, false),
                    s16tof32 => (16, false),
                    s32tof32 => (32, false),
                    s64tof32 => (64, false),
                    s8tof64 => (8, true),
                    s16tof64 => (16, true),
                    s32tof64 => (32, true),
                    _ => (64, true),
                };
                self.unary(operands[0] as u8, |v| {
                    let value = sext(v, bits) as f64;
                    if wide {
                        value.to_bits()
                    } else {
                        u64::from((value as f32).to_bits())
                    }
                });
            }
            u8tof32 | u16tof32 | u32tof32 | u64tof32 | u8tof64 | u16tof64 | u32tof64
            | u64tof64 => {
                let (bits, wide) = match opcode {
                    u8tof32 => (8, false),
                    u16tof32 => (16, false),
                    u32tof32 => (32, false),
                    u64tof32 => (64, false),
                    u8tof64 => (8, true),
                    u16tof64 => (16, true),
                    u32tof64 => (32, true),
                    _ => (64, true),
                };
                self.unary(operands[0] as u8, |v| {
                    let value = zext(v, bits) as f64;
                    if wide {
                        value.to_bits()
                    } else {
                        u64::from((value as f32).to_bits())
                    }
                });
            }
            f32tos8 | f32tos16 | f32tos32 | f32tos64 | f64tos8 | f64tos16 | f64tos32
            | f64tos64 => {
                let wide = matches!(opcode, f64tos8 | f64tos16 | f64tos32 | f64tos64);
                let bits = match opcode {
                    f32tos8 | f64tos8 => 8,
                    f32tos16 | f64tos16 => 16,
                    f32tos32 | f64tos32 => 32,
                    _ => 64,
                };
                self.unary(operands[0] as u8, |v| {
                    let value = if wide {
                        f64::from_bits(v)
                    } else {
                        f64::from(f32::from_bits(v as u32))
                    };
                    mask(value as i64 as u64, bits)
                });
            }
            f32tou8 | f32tou16 | f32tou32 | f32tou64 | f64tou8 | f64tou16 | f64tou32
            | f64tou64 => {
                let wide = matches!(opcode, f64tou8 | f64tou16 | f64tou32 | f64tou64);
                let bits = match opcode {
                    f32tou8 | f64tou8 => 8,
                    f32tou16 | f64tou16 => 16,
                    f32tou32 | f64tou32 => 32,
                    _ => 64,
                };
                self.unary(operands[0] as u8, |v| {
                    let value = if wide {
                        f64::from_bits(v)
                    } else {
                        f64::from(f32::from_bits(v as u32))
                    };
                    mask(value as u64, bits)
                });
            }

            _ => return self.step_arithmetic(opcode, operands).map(|_| true),
        }
        Ok(true)
    }

    fn unary(&mut self, reg: u8, f: impl FnOnce(u64) -> u64) {
        let value = self.reg(reg);
        self.set_reg(reg, f(value));
    }

    fn step_arithmetic(&mut self, opcode: OpCode, operands: [u64; 3]) -> Result<(), VmError> {
        let kind = ArithKind::of(opcode);
        let dest = operands[0] as u8;
        let rhs = match kind.source {
            ArithSource::Register => self.reg(operands[1] as u8),
            ArithSource::Value => operands[1],
            ArithSource::Memory => {
                let pointer = self.address(operands[1]);
                self.memory.load(pointer, u64::from(kind.bytes))?
            }
        };
        let lhs = self.reg(dest);
        let result = if kind.float {
            apply_float(kind.op, kind.bytes, lhs, rhs)
        } else if kind.bytes == 8 {
            apply_int64(kind.op, lhs, rhs)?
        } else {
            let value = apply_int32(kind.op, lhs as u32, rhs as u32)?;
            u64::from(value)
        };
        self.set_reg(dest, result);
        Ok(())
    }
}

fn sext(value: u64, bits: u32) -> i64 {
    let shift = 64 - bits;
    ((value << shift) as i64) >> shift
}

fn zext(value: u64, bits: u32) -> u64 {
    if bits == 64 {
        value
    } else {
        value & ((1 << bits) - 1)
    }
}

fn mask(value: u64, bits: u32) -> u64 {
    zext(value, bits)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArithSource {
    Register,
    Value,
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    UDiv,
    SDiv,
    URem,
    SRem,
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

struct ArithKind {
    op: BinOp,
    bytes: u32,
    source: ArithSource,
    float: bool,
}

impl ArithKind {
    fn of(opcode: OpCode) -> Self {
        use OpCode::*;
        let (op, bytes, source) = match opcode {
            add64RR => (BinOp::Add, 8, ArithSource::Register),
            add64RV => (BinOp::Add, 8, ArithSource::Value),
            add64RM => (BinOp::Add, 8, ArithSource::Memory),
            sub64RR => (BinOp::Sub, 8, ArithSource::Register),
            sub64RV => (BinOp::Sub, 8, ArithSource::Value),
            sub64RM => (BinOp::Sub, 8, ArithSource::Memory),
            mul64RR => (BinOp::Mul, 8, ArithSource::Register),
            mul64RV => (BinOp::Mul, 8, ArithSource::Value),
            mul64RM => (BinOp::Mul, 8, ArithSource::Memory),
            udiv64RR => (BinOp::UDiv, 8, ArithSource::Register),
            udiv64RV => (BinOp::UDiv, 8, ArithSource::Value),
            udiv64RM => (BinOp::UDiv, 8, ArithSource::Memory),
            sdiv64RR => (BinOp::SDiv, 8, ArithSource::Register),
            sdiv64RV => (BinOp::SDiv, 8, ArithSource::Value),
            sdiv64RM => (BinOp::SDiv, 8, ArithSource::Memory),
            urem64RR => (BinOp::URem, 8, ArithSource::Register),
            urem64RV => (BinOp::URem, 8, ArithSource::Value),
            urem64RM => (BinOp::URem, 8, ArithSource::Memory),
            srem64RR => (BinOp::SRem, 8, ArithSource::Register),
            srem64RV => (BinOp::SRem, 8, ArithSource::Value),
            srem64RM => (BinOp::SRem, 8, ArithSource::Memory),
            and64RR => (BinOp::And, 8, ArithSource::Register),
            and64RV => (BinOp::And, 8, ArithSource::Value),
            and64RM => (BinOp::And, 8, ArithSource::Memory),
            or64RR => (BinOp::Or, 8, ArithSource::Register),
            or64RV => (BinOp::Or, 8, ArithSource::Value),
            or64RM => (BinOp::Or, 8, ArithSource::Memory),
            xor64RR => (BinOp::Xor, 8, ArithSource::Register),
            xor64RV => (BinOp::Xor, 8, ArithSource::Value),
            xor64RM => (BinOp::Xor, 8, ArithSource::Memory),
            sl64RR => (BinOp::Shl, 8, ArithSource::Register),
            sl64RV => (BinOp::Shl, 8, ArithSource::Value),
            sl64RM => (BinOp::Shl, 8, ArithSource::Memory),
            lsr64RR => (BinOp::LShr, 8, ArithSource::Register),
            lsr64RV => (BinOp::LShr, 8, ArithSource::Value),
            lsr64RM => (BinOp::LShr, 8, ArithSource::Memory),
            asr64RR => (BinOp::AShr, 8, ArithSource::Register),
            asr64RV => (BinOp::AShr, 8, ArithSource::Value),
            asr64RM => (BinOp::AShr, 8, ArithSource::Memory),
            add32RR => (BinOp::Add, 4, ArithSource::Register),
            add32RV => (BinOp::Add, 4, ArithSource::Value),
            add32RM => (BinOp::Add, 4, ArithSource::Memory),
            sub32RR => (BinOp::Sub, 4, ArithSource::Register),
            sub32RV => (BinOp::Sub, 4, ArithSource::Value),
            sub32RM => (BinOp::Sub, 4, ArithSource::Memory),
            mul32RR => (BinOp::Mul, 4, ArithSource::Register),
            mul32RV => (BinOp::Mul, 4, ArithSource::Value),
            mul32RM => (BinOp::Mul, 4, ArithSource::Memory),
            udiv32RR => (BinOp::UDiv, 4, ArithSource::Register),
            udiv32RV => (BinOp::UDiv, 4, ArithSource::Value),
            udiv32RM => (BinOp::UDiv, 4, ArithSource::Memory),
            sdiv32RR => (BinOp::SDiv, 4, ArithSource::Register),
            sdiv32RV => (BinOp::SDiv, 4, ArithSource::Value),
            sdiv32RM => (BinOp::SDiv, 4, ArithSource::Memory),
            urem32RR => (BinOp::URem, 4, ArithSource::Register),
            urem32RV => (BinOp::URem, 4, ArithSource::Value),
            urem32RM => (BinOp::URem, 4, ArithSource::Memory),
            srem32RR => (BinOp::SRem, 4, ArithSource::Register),
            srem32RV => (BinOp::SRem, 4, ArithSource::Value),
            srem32RM => (BinOp::SRem, 4, ArithSource::Memory),
            and32RR => (BinOp::And, 4, ArithSource::Register),
            and32RV => (BinOp::And, 4, ArithSource::Value),
            and32RM => (BinOp::And, 4, ArithSource::Memory),
            or32RR => (BinOp::Or, 4, ArithSource::Register),
            or32RV => (BinOp::Or, 4, ArithSource::Value),
            or32RM => (BinOp::Or, 4, ArithSource::Memory),
            xor32RR => (BinOp::Xor, 4, ArithSource::Register),
            xor32RV => (BinOp::Xor, 4, ArithSource::Value),
            xor32RM => (BinOp::Xor, 4, ArithSource::Memory),
            sl32RR => (BinOp::Shl, 4, ArithSource::Register),
            sl32RV => (BinOp::Shl, 4, ArithSource::Value),
            sl32RM => (BinOp::Shl, 4, ArithSource::Memory),
            lsr32RR => (BinOp::LShr, 4, ArithSource::Register),
            lsr32RV => (BinOp::LShr, 4, ArithSource::Value),
            lsr32RM => (BinOp::LShr, 4, ArithSource::Memory),
            asr32RR => (BinOp::AShr, 4, ArithSource::Register),
            asr32RV => (BinOp::AShr, 4, ArithSource::Value),
            asr32RM => (BinOp::AShr, 4, ArithSource::Memory),
            fadd32RR => (BinOp::FAdd, 4, ArithSource::Register),
            fadd32RV => (BinOp::FAdd, 4, ArithSource::Value),
            fadd64RR => (BinOp::FAdd, 8, ArithSource::Register),
            fadd64RV => (BinOp::FAdd, 8, ArithSource::Value),
            fsub32RR => (BinOp::FSub, 4, ArithSource::Register),
            fsub32RV => (BinOp::FSub, 4, ArithSource::Value),
            fsub64RR => (BinOp::FSub, 8, ArithSource::Register),
            fsub64RV => (BinOp::FSub, 8, ArithSource::Value),
            fmul32RR => (BinOp::FMul, 4, ArithSource::Register),
            fmul32RV => (BinOp::FMul, 4, ArithSource::Value),
            fmul64RR => (BinOp::FMul, 8, ArithSource::Register),
            fmul64RV => (BinOp::FMul, 8, ArithSource::Value),
            fdiv32RR => (BinOp::FDiv, 4, ArithSource::Register),
            fdiv32RV => (BinOp::FDiv, 4, ArithSource::Value),
            fdiv64RR => (BinOp::FDiv, 8, ArithSource::Register),
            fdiv64RV => (BinOp::FDiv, 8, ArithSource::Value),
            other => unreachable!("not an arithmetic opcode: {other:?}"),
        };
        let float = matches!(op, BinOp::FAdd | BinOp::FSub | BinOp::FMul | BinOp::FDiv);
        Self {
            op,
            bytes,
            source,
            float,
        }
    }
}

fn apply_int64(op: BinOp, lhs: u64, rhs: u64) -> Result<u64, VmError> {
    Ok(match op {
        BinOp::Add => lhs.wrapping_add(rhs),
        BinOp::Sub => lhs.wrapping_sub(rhs),
        BinOp::Mul => lhs.wrapping_mul(rhs),
        BinOp::UDiv => lhs.checked_div(rhs).ok_or(VmError::Arithmetic)?,
        BinOp::SDiv => {
            if rhs == 0 {
                return Err(VmError::Arithmetic);
            }
            (lhs as i64).wrapping_div(rhs as i64) as u64
        }
        BinOp::URem => lhs.checked_rem(rhs).ok_or(VmError::Arithmetic)?,
        BinOp::SRem => {
            if rhs == 0 {
                return Err(VmError::Arithmetic);
            }
            (lhs as i64).wrapping_rem(rhs as i64) as u64
        }
        BinOp::And => lhs & rhs,
        BinOp::Or => lhs | rhs,
        BinOp::Xor => lhs ^ rhs,
        BinOp::Shl => lhs.wrapping_shl(rhs as u32),
        BinOp::LShr => lhs.wrapping_shr(rhs as u32),
        BinOp::AShr => ((lhs as i64).wrapping_shr(rhs as u32)) as u64,
        _ => unreachable!("float operation in integer path"),
    })
}

fn apply_int32(op: BinOp, lhs: u32, rhs: u32) -> Result<u32, VmError> {
    Ok(match op {
        BinOp::Add => lhs.wrapping_add(rhs),
        BinOp::Sub => lhs.wrapping_sub(rhs),
        BinOp::Mul => lhs.wrapping_mul(rhs),
        BinOp::UDiv => lhs.checked_div(rhs).ok_or(VmError::Arithmetic)?,
        BinOp::SDiv => {
            if rhs == 0 {
                return Err(VmError::Arithmetic);
            }
            (lhs as i32).wrapping_div(rhs as i32) as u32
        }
        BinOp::URem => lhs.checked_rem(rhs).ok_or(VmError::Arithmetic)?,
        BinOp::SRem => {
            if rhs == 0 {
                return Err(VmError::Arithmetic);
            }
            (lhs as i32).wrapping_rem(rhs as i32) as u32
        }
        BinOp::And => lhs & rhs,
        BinOp::Or => lhs | rhs,
        BinOp::Xor => lhs ^ rhs,
        BinOp::Shl => lhs.wrapping_shl(rhs),
        BinOp::LShr => lhs.wrapping_shr(rhs),
        BinOp::AShr => ((lhs as i32).wrapping_shr(rhs)) as u32,
        _ => unreachable!("float operation in integer path"),
    })
}

fn apply_float(op: BinOp, bytes: u32, lhs: u64, rhs: u64) -> u64 {
    if bytes == 8 {
        let (a, b) = (f64::from_bits(lhs), f64::from_bits(rhs));
        let value = match op {
            BinOp::FAdd => a + b,
            BinOp::FSub => a - b,
            BinOp::FMul => a * b,
            BinOp::FDiv => a / b,
            _ => unreachable!("integer operation in float path"),
        };
        value.to_bits()
    } else {
        let (a, b) = (f32::from_bits(lhs as u32), f32::from_bits(rhs as u32));
        let value = match op {
            BinOp::FAdd => a + b,
            BinOp::FSub => a - b,
            BinOp::FMul => a * b,
            BinOp::FDiv => a / b,
            _ => unreachable!("integer operation in float path"),
        };
        u64::from(value.to_bits())
    }
}
