//! MIR to assembly stream translation.
//!
//! Runs after register allocation and devirtualization: every register is a
//! hardware index, phis are gone, and block layout is final. The
//! translation is mechanical; the opcode choice happens later in the
//! assembler's overload resolution.

use hashbrown::HashMap;
use scatha_asm as asm;
use scatha_mir as mir;

use crate::CodegenError;

fn reg8(reg: mir::Reg) -> Result<u8, CodegenError> {
    if reg.class != mir::RegClass::Hardware {
        return Err(CodegenError::Internal {
            message: format!("unallocated register {reg} at assembly emission"),
        });
    }
    u8::try_from(reg.index).map_err(|_| CodegenError::Internal {
        message: format!("register index {} exceeds the hardware file", reg.index),
    })
}

struct Emitter<'a> {
    function_entry_labels: &'a [asm::LabelId],
    block_labels: HashMap<mir::Block, asm::LabelId>,
}

impl<'a> Emitter<'a> {
    fn value(&self, value: mir::Value) -> Result<asm::AsmValue, CodegenError> {
        Ok(match value {
            mir::Value::Reg(reg) => asm::AsmValue::Register(reg8(reg)?),
            mir::Value::Const(c) => match c.bytes {
                1 => asm::AsmValue::Const8(c.value as u8),
                2 => asm::AsmValue::Const16(c.value as u16),
                4 => asm::AsmValue::Const32(c.value as u32),
                _ => asm::AsmValue::Const64(c.value),
            },
            mir::Value::Function(index) => {
                asm::AsmValue::Label(self.function_entry_labels[index])
            }
            // An undef operand may hold anything; zero is as good as any.
            mir::Value::Undef => asm::AsmValue::Const64(0),
        })
    }

    fn address(&self, addr: mir::Address) -> Result<asm::MemoryAddress, CodegenError> {
        Ok(asm::MemoryAddress {
            base: reg8(addr.base)?,
            dynamic: addr.dynamic.map(reg8).transpose()?,
            factor: addr.factor,
            term: addr.term,
        })
    }

    fn condition(cond: mir::Condition) -> asm::CompareOperation {
        match cond {
            mir::Condition::Eq => asm::CompareOperation::Eq,
            mir::Condition::Ne => asm::CompareOperation::Ne,
            mir::Condition::Lt => asm::CompareOperation::Lt,
            mir::Condition::Le => asm::CompareOperation::Le,
            mir::Condition::Gt => asm::CompareOperation::Gt,
            mir::Condition::Ge => asm::CompareOperation::Ge,
        }
    }

    fn arith_op(op: mir::ArithOp) -> asm::ArithmeticOperation {
        use asm::ArithmeticOperation as A;
        use mir::ArithOp as M;
        match op {
            M::Add => A::Add,
            M::Sub => A::Sub,
            M::Mul => A::Mul,
            M::SDiv => A::SDiv,
            M::UDiv => A::UDiv,
            M::SRem => A::SRem,
            M::URem => A::URem,
            M::Shl => A::Shl,
            M::LShr => A::LShr,
            M::AShr => A::AShr,
            M::And => A::And,
            M::Or => A::Or,
            M::Xor => A::Xor,
            M::FAdd => A::FAdd,
            M::FSub => A::FSub,
            M::FMul => A::FMul,
            M::FDiv => A::FDiv,
        }
    }

    fn conversion(conv: mir::Conversion) -> asm::Conversion {
        match conv {
            mir::Conversion::Sext(bits) => asm::Conversion::Sext(bits),
            mir::Conversion::Fext => asm::Conversion::Fext,
            mir::Conversion::Ftrunc => asm::Conversion::Ftrunc,
            mir::Conversion::StoF(from, to) => asm::Conversion::SToF { from, to },
            mir::Conversion::UtoF(from, to) => asm::Conversion::UToF { from, to },
            mir::Conversion::FtoS(from, to) => asm::Conversion::FToS { from, to },
            mir::Conversion::FtoU(from, to) => asm::Conversion::FToU { from, to },
        }
    }

    fn emit_inst(
        &self,
        func: &mir::Function,
        inst: mir::Inst,
        out: &mut Vec<asm::Instruction>,
    ) -> Result<(), CodegenError> {
        match func.data(inst).clone() {
            mir::InstData::Copy { dest, src, bytes } => {
                out.push(asm::Instruction::Move {
                    dest: asm::AsmValue::Register(reg8(dest)?),
                    src: self.value(src)?,
                    bytes: bytes as u8,
                });
            }
            mir::InstData::CondCopy {
                dest,
                src,
                bytes,
                cond,
            } => {
                out.push(asm::Instruction::CMove {
                    cond: Self::condition(cond),
                    dest: asm::AsmValue::Register(reg8(dest)?),
                    src: self.value(src)?,
                    bytes: bytes as u8,
                });
            }
            mir::InstData::LIncSP { dest, size } => {
                let bytes = match size {
                    mir::Value::Const(c) => c.value as u16,
                    _ => {
                        return Err(CodegenError::Internal {
                            message: "dynamic stack allocation at emission".into(),
                        })
                    }
                };
                out.push(asm::Instruction::LIncSP {
                    dest: reg8(dest)?,
                    bytes,
                });
            }
            mir::InstData::Lea { dest, addr } => {
                out.push(asm::Instruction::Lea {
                    dest: reg8(dest)?,
                    addr: self.address(addr)?,
                });
            }
            mir::InstData::Load { dest, addr, bytes } => {
                out.push(asm::Instruction::Move {
                    dest: asm::AsmValue::Register(reg8(dest)?),
                    src: asm::AsmValue::Memory(self.address(addr)?),
                    bytes: bytes as u8,
                });
            }
            mir::InstData::Store { addr, src, bytes } => {
                out.push(asm::Instruction::Move {
                    dest: asm::AsmValue::Memory(self.address(addr)?),
                    src: self.value(src)?,
                    bytes: bytes as u8,
                });
            }
            mir::InstData::Arith {
                dest,
                op,
                lhs,
                rhs,
                bytes,
            } => {
                // Instruction selection emits the two-address form with the
                // destination pre-loaded; spill rewriting can break it, in
                // which case the load is re-established here. The spill
                // temporaries interfere, so the move cannot clobber the
                // right operand.
                if lhs != mir::Value::Reg(dest) {
                    out.push(asm::Instruction::Move {
                        dest: asm::AsmValue::Register(reg8(dest)?),
                        src: self.value(lhs)?,
                        bytes: 8,
                    });
                }
                let src = match rhs {
                    mir::ArithRhs::Value(value) => self.value(value)?,
                    mir::ArithRhs::Memory(addr) => asm::AsmValue::Memory(self.address(addr)?),
                };
                out.push(asm::Instruction::Arithmetic {
                    op: Self::arith_op(op),
                    dest: reg8(dest)?,
                    src,
                    bytes: bytes as u8,
                });
            }
            mir::InstData::UnaryArith {
                dest, op, operand, ..
            } => {
                if operand != mir::Value::Reg(dest) {
                    out.push(asm::Instruction::Move {
                        dest: asm::AsmValue::Register(reg8(dest)?),
                        src: self.value(operand)?,
                        bytes: 8,
                    });
                }
                let op = match op {
                    mir::UnaryOp::LogNot => asm::UnaryArithmeticOperation::LogicalNot,
                    mir::UnaryOp::BitNot => asm::UnaryArithmeticOperation::BitwiseNot,
                    mir::UnaryOp::Neg | mir::UnaryOp::FNeg => {
                        asm::UnaryArithmeticOperation::Negate
                    }
                };
                out.push(asm::Instruction::UnaryArithmetic {
                    op,
                    operand: reg8(dest)?,
                });
            }
            mir::InstData::Convert { dest, conv, operand } => {
                if operand != mir::Value::Reg(dest) {
                    out.push(asm::Instruction::Move {
                        dest: asm::AsmValue::Register(reg8(dest)?),
                        src: self.value(operand)?,
                        bytes: 8,
                    });
                }
                out.push(asm::Instruction::Convert {
                    conv: Self::conversion(conv),
                    operand: reg8(dest)?,
                });
            }
            mir::InstData::Compare {
                mode,
                lhs,
                rhs,
                bytes,
            } => {
                let mode = match mode {
                    mir::CompareMode::Signed => asm::CompareMode::Signed,
                    mir::CompareMode::Unsigned => asm::CompareMode::Unsigned,
                    mir::CompareMode::Float => asm::CompareMode::Float,
                };
                out.push(asm::Instruction::Compare {
                    mode,
                    lhs: self.value(lhs)?,
                    rhs: self.value(rhs)?,
                    bytes: bytes as u8,
                });
            }
            mir::InstData::Test {
                signed,
                operand,
                bytes,
            } => {
                out.push(asm::Instruction::Test {
                    signed,
                    operand: self.value(operand)?,
                    bytes: bytes as u8,
                });
            }
            mir::InstData::Set { dest, cond } => {
                out.push(asm::Instruction::Set {
                    cond: Self::condition(cond),
                    dest: reg8(dest)?,
                });
            }
            mir::InstData::Phi { .. } => {
                return Err(CodegenError::Internal {
                    message: "phi survived SSA destruction".into(),
                })
            }
            mir::InstData::Call {
                target, reg_offset, ..
            } => {
                let reg_offset = reg_offset.ok_or_else(|| CodegenError::Internal {
                    message: "call without register offset".into(),
                })? as u8;
                match target {
                    mir::CallTarget::Static(index) => {
                        out.push(asm::Instruction::Call {
                            target: self.function_entry_labels[index],
                            reg_offset,
                        });
                    }
                    mir::CallTarget::Foreign(index) => {
                        out.push(asm::Instruction::CallExt {
                            reg_offset,
                            slot: 0,
                            index: index as u32,
                        });
                    }
                    mir::CallTarget::Indirect(reg) => {
                        out.push(asm::Instruction::CallReg {
                            reg: reg8(reg)?,
                            reg_offset,
                        });
                    }
                }
            }
            mir::InstData::Return { .. } => out.push(asm::Instruction::Return),
            mir::InstData::Jump { target } => out.push(asm::Instruction::Jump {
                cond: None,
                target: self.block_labels[&target],
            }),
            mir::InstData::CondJump { target, cond } => out.push(asm::Instruction::Jump {
                cond: Some(Self::condition(cond)),
                target: self.block_labels[&target],
            }),
            mir::InstData::Trap => out.push(asm::Instruction::Trap),
        }
        Ok(())
    }
}

/// Translates a lowered MIR module into an assembly stream. The entry point
/// is the public function named `main`.
pub fn mir_to_asm(module: &mir::Module) -> Result<asm::AssemblyStream, CodegenError> {
    let mut stream = asm::AssemblyStream {
        data: module.data.clone(),
        foreign: module.foreign.clone(),
        ..Default::default()
    };
    let mut next_label: asm::LabelId = 0;
    let mut function_entry_labels = Vec::with_capacity(module.functions.len());
    let mut all_block_labels: Vec<HashMap<mir::Block, asm::LabelId>> = Vec::new();
    for func in &module.functions {
        let mut labels = HashMap::new();
        for block in func.blocks() {
            labels.insert(block, next_label);
            next_label += 1;
        }
        function_entry_labels.push(labels[&func.entry()]);
        all_block_labels.push(labels);
    }
    for (index, func) in module.functions.iter().enumerate() {
        let emitter = Emitter {
            function_entry_labels: &function_entry_labels,
            block_labels: all_block_labels[index].clone(),
        };
        for (position, block) in func.blocks().into_iter().enumerate() {
            let entry = position == 0;
            let name = if entry {
                func.name.clone()
            } else {
                format!("{}.{}", func.name, func.block_name(block))
            };
            let mut insts = Vec::new();
            for &inst in func.block_insts(block) {
                emitter.emit_inst(func, inst, &mut insts)?;
            }
            stream.blocks.push(asm::Block {
                label: emitter.block_labels[&block],
                name,
                public: entry && func.is_public,
                insts,
            });
        }
        if func.name == "main" {
            stream.entry = Some(function_entry_labels[index]);
        }
    }
    Ok(stream)
}
