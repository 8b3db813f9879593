//! Instruction selection: typed SSA IR to MIR.
//!
//! Works one block at a time over the selection DAG. Every IR instruction
//! has a matcher that tries its patterns in order; the generic pattern
//! always applies, the folding patterns (gep into addressing modes, unique
//! loads into arithmetic operands, compares into branches) apply when the
//! DAG proves no other node depends on the folded value.
//!
//! Lowered integer values narrower than 64 bits are kept zero-extended in
//! their registers; matchers re-mask after operations that can set high
//! bits and sign-extend explicitly where an operation needs it.

use hashbrown::{HashMap, HashSet};
use scatha_ir as ir;
use scatha_mir as mir;
use scatha_types::FfiType;

use crate::cc::CallingConvention;
use crate::data_layout::DataLayout;
use crate::selection_dag::SelectionDag;
use crate::CodegenError;

fn ffi_type(ctx: &ir::Context, ty: ir::Type) -> FfiType {
    match &ctx.type_info(ty).data {
        ir::TypeData::Void => FfiType::Void,
        ir::TypeData::Int { bits } => match bits {
            0..=8 => FfiType::Int8,
            9..=16 => FfiType::Int16,
            17..=32 => FfiType::Int32,
            _ => FfiType::Int64,
        },
        ir::TypeData::Float { bits: 32 } => FfiType::Float,
        ir::TypeData::Float { .. } => FfiType::Double,
        _ => FfiType::Pointer,
    }
}

enum Target {
    Static(usize),
    Foreign(usize),
}

/// Lowers a whole module.
pub fn lower_to_mir(
    ctx: &ir::Context,
    module: &ir::Module,
    layout: &DataLayout,
) -> Result<mir::Module, CodegenError> {
    let mut mir_module = mir::Module::new();
    mir_module.data = layout.bytes.clone();
    let mut targets: HashMap<ir::FuncId, Target> = HashMap::new();
    let mut next_static = 0usize;
    for id in module.callable_ids() {
        match module.callable(id) {
            ir::Callable::Defined(_) => {
                targets.insert(id, Target::Static(next_static));
                next_static += 1;
            }
            ir::Callable::Foreign(decl) => {
                let ir::TypeData::Function { ret, params } =
                    ctx.type_info(decl.ty).data.clone()
                else {
                    unreachable!("foreign function with non-function type")
                };
                let index = mir_module.foreign.len();
                mir_module.foreign.push(scatha_types::ForeignFunction {
                    name: decl.name.clone(),
                    arg_types: params.iter().map(|&p| ffi_type(ctx, p)).collect(),
                    return_type: ffi_type(ctx, ret),
                });
                targets.insert(id, Target::Foreign(index));
            }
        }
    }
    for id in module.function_ids() {
        let func = module.function(id);
        tracing::debug!(function = func.name(), "instruction selection");
        let lowered = FunctionLowering::new(ctx, layout, &targets, func).run()?;
        mir_module.functions.push(lowered);
    }
    Ok(mir_module)
}

struct FunctionLowering<'a> {
    ctx: &'a ir::Context,
    layout: &'a DataLayout,
    targets: &'a HashMap<ir::FuncId, Target>,
    func: &'a ir::Function,
    mfunc: mir::Function,
    block_map: HashMap<ir::Block, mir::Block>,
    values: HashMap<ir::Value, mir::Value>,
    fused: HashSet<ir::Inst>,
    current: mir::Block,
    phi_fixups: Vec<(mir::Inst, ir::Inst)>,
}

fn mask_of(bits: u32) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

fn cond_of(rel: ir::CmpRel) -> mir::Condition {
    match rel {
        ir::CmpRel::Eq => mir::Condition::Eq,
        ir::CmpRel::Ne => mir::Condition::Ne,
        ir::CmpRel::Lt => mir::Condition::Lt,
        ir::CmpRel::Le => mir::Condition::Le,
        ir::CmpRel::Gt => mir::Condition::Gt,
        ir::CmpRel::Ge => mir::Condition::Ge,
    }
}

fn arith_of(op: ir::ArithOp) -> mir::ArithOp {
    use ir::ArithOp as I;
    use mir::ArithOp as M;
    match op {
        I::Add => M::Add,
        I::Sub => M::Sub,
        I::Mul => M::Mul,
        I::SDiv => M::SDiv,
        I::UDiv => M::UDiv,
        I::SRem => M::SRem,
        I::URem => M::URem,
        I::Shl => M::Shl,
        I::LShr => M::LShr,
        I::AShr => M::AShr,
        I::And => M::And,
        I::Or => M::Or,
        I::Xor => M::Xor,
        I::FAdd => M::FAdd,
        I::FSub => M::FSub,
        I::FMul => M::FMul,
        I::FDiv => M::FDiv,
    }
}

impl<'a> FunctionLowering<'a> {
    fn new(
        ctx: &'a ir::Context,
        layout: &'a DataLayout,
        targets: &'a HashMap<ir::FuncId, Target>,
        func: &'a ir::Function,
    ) -> Self {
        let cc = CallingConvention::compute(ctx, func.ty());
        let mut mfunc = mir::Function::new(
            func.name().to_owned(),
            func.params().len() as u32,
            cc.num_ret_words(),
        );
        mfunc.is_public = func.visibility() == ir::Visibility::External;
        // Lowering follows the dominator preorder: definitions precede
        // their non-phi uses, and blocks the entry cannot reach are dropped
        // here rather than reaching the assembler.
        let mut block_map = HashMap::new();
        for block in func.dominator_tree().preorder() {
            let mb = mfunc.add_block(func.block_name(block).to_owned());
            block_map.insert(block, mb);
        }
        let current = mfunc.entry();
        Self {
            ctx,
            layout,
            targets,
            func,
            mfunc,
            block_map,
            values: HashMap::new(),
            fused: HashSet::new(),
            current,
            phi_fixups: Vec::new(),
        }
    }

    fn run(mut self) -> Result<mir::Function, CodegenError> {
        // Parameters arrive in the low hardware registers.
        let entry = self.mfunc.entry();
        self.mfunc
            .reserve_regs(mir::RegClass::Hardware, self.func.params().len() as u32);
        for index in 0..self.func.params().len() {
            let reg = self.mfunc.new_reg(mir::RegClass::Ssa);
            self.mfunc.append_inst(
                entry,
                mir::InstData::Copy {
                    dest: reg,
                    src: mir::Value::Reg(mir::Reg::hardware(index as u32)),
                    bytes: 8,
                },
            );
            self.values
                .insert(ir::Value::Param(index as u32), mir::Value::Reg(reg));
        }
        for block in self.func.dominator_tree().preorder() {
            self.current = self.block_map[&block];
            let dag = SelectionDag::build(self.func, block);
            for &inst in self.func.block_insts(block) {
                if self.fused.contains(&inst) {
                    continue;
                }
                self.lower_inst(&dag, inst)?;
            }
        }
        // Patch phi incomings now that every value is mapped.
        for (mir_inst, ir_inst) in std::mem::take(&mut self.phi_fixups) {
            let ir::InstData::Phi { args } = self.func.data(ir_inst).clone() else {
                unreachable!()
            };
            let bytes = self.width_of(self.func.inst_ty(ir_inst))?;
            let dest = self.mfunc.data(mir_inst).dest().expect("phi without dest");
            let mut mapped = smallvec::SmallVec::new();
            for (pred, value) in args {
                mapped.push((self.block_map[&pred], self.value(value)?));
            }
            self.mfunc.replace_inst_data(
                mir_inst,
                mir::InstData::Phi {
                    dest,
                    args: mapped,
                    bytes,
                },
            );
        }
        Ok(self.mfunc)
    }

    fn width_of(&self, ty: ir::Type) -> Result<u32, CodegenError> {
        let size = self.ctx.size_of(ty);
        if size > 8 {
            return Err(CodegenError::UnsupportedAggregate {
                function: self.func.name().to_owned(),
                size,
            });
        }
        Ok(size as u32)
    }

    fn bits_of(&self, ty: ir::Type) -> u32 {
        match self.ctx.type_info(ty).data {
            ir::TypeData::Int { bits } | ir::TypeData::Float { bits } => bits,
            _ => 64,
        }
    }

    fn emit(&mut self, data: mir::InstData) -> mir::Inst {
        self.mfunc.append_inst(self.current, data)
    }

    fn def(&mut self, inst: ir::Inst) -> mir::Reg {
        let reg = self.mfunc.new_reg(mir::RegClass::Ssa);
        self.values.insert(ir::Value::Inst(inst), mir::Value::Reg(reg));
        reg
    }

    fn value(&mut self, value: ir::Value) -> Result<mir::Value, CodegenError> {
        match value {
            ir::Value::Inst(_) | ir::Value::Param(_) => self
                .values
                .get(&value)
                .copied()
                .ok_or_else(|| CodegenError::Internal {
                    message: format!(
                        "value {} lowered after its use",
                        self.func.value_name(value)
                    ),
                }),
            ir::Value::Const(c) => self.const_value(c),
            ir::Value::Global(id) => Ok(mir::Value::Const(mir::Constant {
                value: self.layout.pointer(id).to_word(),
                bytes: 8,
            })),
            ir::Value::Func(id) => match self.targets[&id] {
                Target::Static(index) => Ok(mir::Value::Function(index)),
                Target::Foreign(_) => Err(CodegenError::Internal {
                    message: "cannot take the address of a foreign function".into(),
                }),
            },
            ir::Value::Block(_) => unreachable!("labels are not data operands"),
        }
    }

    fn const_value(&self, c: ir::Const) -> Result<mir::Value, CodegenError> {
        let info = self.ctx.const_info(c);
        let bytes = self.ctx.size_of(info.ty).min(8) as u32;
        match &info.data {
            ir::ConstData::Int(v) => Ok(mir::Value::Const(mir::Constant {
                value: v.as_u64(),
                bytes,
            })),
            ir::ConstData::Float(v) => Ok(mir::Value::Const(mir::Constant {
                value: v.to_bits(),
                bytes,
            })),
            ir::ConstData::Null => Ok(mir::Value::Const(mir::Constant { value: 0, bytes: 8 })),
            ir::ConstData::Undef => Ok(mir::Value::Undef),
            ir::ConstData::Record(_) => Err(CodegenError::Internal {
                message: "record constant outside the data section".into(),
            }),
        }
    }

    /// Materializes any operand into a register.
    fn to_reg(&mut self, value: ir::Value) -> Result<mir::Reg, CodegenError> {
        let mapped = self.value(value)?;
        if let mir::Value::Reg(reg) = mapped {
            return Ok(reg);
        }
        let reg = self.mfunc.new_reg(mir::RegClass::Ssa);
        self.emit(mir::InstData::Copy {
            dest: reg,
            src: mapped,
            bytes: 8,
        });
        Ok(reg)
    }

    /// Copies an operand into a fresh destination register, the two-address
    /// prelude of in-place operations.
    fn copy_to(&mut self, dest: mir::Reg, value: ir::Value) -> Result<(), CodegenError> {
        let src = self.value(value)?;
        self.emit(mir::InstData::Copy {
            dest,
            src,
            bytes: 8,
        });
        Ok(())
    }

    fn mask_reg(&mut self, reg: mir::Reg, bits: u32) {
        if bits >= 64 {
            return;
        }
        self.emit(mir::InstData::Arith {
            dest: reg,
            op: mir::ArithOp::And,
            lhs: mir::Value::Reg(reg),
            rhs: mir::ArithRhs::Value(mir::Value::Const(mir::Constant {
                value: mask_of(bits),
                bytes: 8,
            })),
            bytes: 8,
        });
    }

    /// Computes the addressing mode of a pointer operand, folding a unique
    /// gep when the DAG allows.
    fn address_of(
        &mut self,
        dag: &SelectionDag,
        addr: ir::Value,
        user: ir::Inst,
    ) -> Result<mir::Address, CodegenError> {
        if let ir::Value::Inst(def) = addr {
            if matches!(self.func.data(def), ir::InstData::GetElementPtr { .. })
                && (self.fused.contains(&def) || dag.can_fold_into(self.func, def, user))
            {
                self.fused.insert(def);
                return self.gep_address(def);
            }
        }
        Ok(mir::Address::base_only(self.to_reg(addr)?))
    }

    /// Builds the `base + index * factor + term` form of a gep, spilling
    /// into explicit arithmetic when the static parts exceed the encoding.
    fn gep_address(&mut self, gep: ir::Inst) -> Result<mir::Address, CodegenError> {
        let ir::InstData::GetElementPtr {
            pointee,
            base,
            index,
            members,
        } = self.func.data(gep).clone()
        else {
            unreachable!()
        };
        let elem_size = self.ctx.size_of(pointee);
        // Static offset of the member path.
        let mut member_offset = 0u64;
        let mut ty = pointee;
        for &member in &members {
            match &self.ctx.type_info(ty).data {
                ir::TypeData::Struct { members: tys, .. } => {
                    member_offset += self.ctx.member_offset(ty, member as usize);
                    ty = tys[member as usize];
                }
                ir::TypeData::Array { elem, .. } => {
                    member_offset += self.ctx.size_of(*elem) * u64::from(member);
                    ty = *elem;
                }
                _ => {
                    return Err(CodegenError::Internal {
                        message: "gep member path into a scalar".into(),
                    })
                }
            }
        }
        let mut base_reg = self.to_reg(base)?;
        let const_index = match self.value(index)? {
            mir::Value::Const(c) => Some(c.value),
            mir::Value::Undef => Some(0),
            _ => None,
        };
        match const_index {
            Some(idx) => {
                let offset = idx.wrapping_mul(elem_size).wrapping_add(member_offset);
                if offset <= u64::from(u8::MAX) {
                    Ok(mir::Address {
                        base: base_reg,
                        dynamic: None,
                        factor: 0,
                        term: offset as u8,
                    })
                } else {
                    let sum = self.mfunc.new_reg(mir::RegClass::Ssa);
                    self.emit(mir::InstData::Copy {
                        dest: sum,
                        src: mir::Value::Reg(base_reg),
                        bytes: 8,
                    });
                    self.emit(mir::InstData::Arith {
                        dest: sum,
                        op: mir::ArithOp::Add,
                        lhs: mir::Value::Reg(sum),
                        rhs: mir::ArithRhs::Value(mir::Value::Const(mir::Constant {
                            value: offset,
                            bytes: 8,
                        })),
                        bytes: 8,
                    });
                    Ok(mir::Address::base_only(sum))
                }
            }
            None => {
                let mut dynamic = self.to_reg(index)?;
                let mut factor = elem_size;
                if factor > u64::from(u8::MAX) {
                    let scaled = self.mfunc.new_reg(mir::RegClass::Ssa);
                    self.emit(mir::InstData::Copy {
                        dest: scaled,
                        src: mir::Value::Reg(dynamic),
                        bytes: 8,
                    });
                    self.emit(mir::InstData::Arith {
                        dest: scaled,
                        op: mir::ArithOp::Mul,
                        lhs: mir::Value::Reg(scaled),
                        rhs: mir::ArithRhs::Value(mir::Value::Const(mir::Constant {
                            value: factor,
                            bytes: 8,
                        })),
                        bytes: 8,
                    });
                    dynamic = scaled;
                    factor = 1;
                }
                if member_offset > u64::from(u8::MAX) {
                    let sum = self.mfunc.new_reg(mir::RegClass::Ssa);
                    self.emit(mir::InstData::Copy {
                        dest: sum,
                        src: mir::Value::Reg(base_reg),
                        bytes: 8,
                    });
                    self.emit(mir::InstData::Arith {
                        dest: sum,
                        op: mir::ArithOp::Add,
                        lhs: mir::Value::Reg(sum),
                        rhs: mir::ArithRhs::Value(mir::Value::Const(mir::Constant {
                            value: member_offset,
                            bytes: 8,
                        })),
                        bytes: 8,
                    });
                    base_reg = sum;
                    member_offset = 0;
                }
                Ok(mir::Address {
                    base: base_reg,
                    dynamic: Some(dynamic),
                    factor: factor as u8,
                    term: member_offset as u8,
                })
            }
        }
    }

    fn lower_inst(&mut self, dag: &SelectionDag, inst: ir::Inst) -> Result<(), CodegenError> {
        match self.func.data(inst).clone() {
            ir::InstData::Alloca { allocated, count } => {
                let count = match self.value(count)? {
                    mir::Value::Const(c) => c.value,
                    mir::Value::Undef => 1,
                    _ => {
                        return Err(CodegenError::DynamicAlloca {
                            function: self.func.name().to_owned(),
                        })
                    }
                };
                let size = (self.ctx.size_of(allocated).wrapping_mul(count) + 7) & !7;
                if size > u64::from(u16::MAX) {
                    return Err(CodegenError::FrameTooLarge {
                        function: self.func.name().to_owned(),
                        size,
                    });
                }
                let dest = self.def(inst);
                self.emit(mir::InstData::LIncSP {
                    dest,
                    size: mir::Value::Const(mir::Constant {
                        value: size,
                        bytes: 2,
                    }),
                });
            }
            ir::InstData::Load { addr } => {
                let bytes = self.width_of(self.func.inst_ty(inst))?;
                // Pattern: a uniquely used load directly feeding an integer
                // arithmetic instruction is deferred into its operand; the
                // arith matcher picks it up.
                if let Some(&user) = self.func.users(ir::Value::Inst(inst)).first() {
                    if bytes == 8
                        && dag.can_fold_into(self.func, inst, user)
                        && arith_can_fuse(self.func.data(user), inst)
                    {
                        self.fused.insert(inst);
                        return Ok(());
                    }
                }
                let addr = self.address_of(dag, addr, inst)?;
                let dest = self.def(inst);
                self.emit(mir::InstData::Load { dest, addr, bytes });
            }
            ir::InstData::Store { addr, value } => {
                let bytes = self.width_of(self.func.value_type(self.ctx, value))?;
                let src = self.to_reg(value)?;
                let addr = self.address_of(dag, addr, inst)?;
                self.emit(mir::InstData::Store {
                    addr,
                    src: mir::Value::Reg(src),
                    bytes,
                });
            }
            ir::InstData::GetElementPtr { .. } => {
                // Pattern: a gep only consumed as the address of one memory
                // access folds into that access; the access matcher lowers
                // it. Everything else materializes the address.
                if let Some(&user) = self.func.users(ir::Value::Inst(inst)).first() {
                    let is_address_use = match self.func.data(user) {
                        ir::InstData::Load { addr } => *addr == ir::Value::Inst(inst),
                        ir::InstData::Store { addr, value } => {
                            *addr == ir::Value::Inst(inst) && *value != ir::Value::Inst(inst)
                        }
                        _ => false,
                    };
                    if is_address_use && dag.can_fold_into(self.func, inst, user) {
                        self.fused.insert(inst);
                        return Ok(());
                    }
                }
                let addr = self.gep_address(inst)?;
                let dest = self.def(inst);
                self.emit(mir::InstData::Lea { dest, addr });
            }
            ir::InstData::Arith { op, lhs, rhs } => {
                self.lower_arith(dag, inst, op, lhs, rhs)?;
            }
            ir::InstData::UnaryArith { op, operand } => {
                self.lower_unary(inst, op, operand)?;
            }
            ir::InstData::Cmp {
                mode,
                rel,
                lhs,
                rhs,
            } => {
                // Pattern: a compare used only by the block's branch fuses
                // into it; the branch matcher emits the compare itself.
                if let Some(&user) = self.func.users(ir::Value::Inst(inst)).first() {
                    if matches!(self.func.data(user), ir::InstData::Branch { .. })
                        && dag.can_fold_into(self.func, inst, user)
                    {
                        self.fused.insert(inst);
                        return Ok(());
                    }
                }
                self.emit_compare(mode, lhs, rhs)?;
                let dest = self.def(inst);
                self.emit(mir::InstData::Set {
                    dest,
                    cond: cond_of(rel),
                });
            }
            ir::InstData::Conv { op, operand } => {
                self.lower_conv(inst, op, operand)?;
            }
            ir::InstData::Phi { .. } => {
                let dest = self.def(inst);
                let mir_inst = self.emit(mir::InstData::Phi {
                    dest,
                    args: smallvec::SmallVec::new(),
                    bytes: 8,
                });
                self.phi_fixups.push((mir_inst, inst));
            }
            ir::InstData::Select {
                cond,
                then_value,
                else_value,
            } => {
                let dest = self.def(inst);
                self.copy_to(dest, then_value)?;
                let cond_reg = self.to_reg(cond)?;
                self.emit(mir::InstData::Test {
                    signed: false,
                    operand: mir::Value::Reg(cond_reg),
                    bytes: 1,
                });
                let else_mapped = self.value(else_value)?;
                self.emit(mir::InstData::CondCopy {
                    dest,
                    src: else_mapped,
                    bytes: 8,
                    cond: mir::Condition::Eq,
                });
            }
            ir::InstData::Call { callee, args, .. } => {
                let ret_ty = self.func.inst_ty(inst);
                let dest = if ret_ty.is_void() {
                    None
                } else {
                    self.width_of(ret_ty)?;
                    Some(self.def(inst))
                };
                let mut lowered = smallvec::SmallVec::new();
                for arg in &args {
                    let ty = self.func.value_type(self.ctx, *arg);
                    // Register passing only; aggregates beyond one word
                    // travel through memory and reach here as pointers.
                    self.width_of(ty)?;
                    lowered.push(self.value(*arg)?);
                }
                let target = match callee {
                    ir::Value::Func(id) => match self.targets[&id] {
                        Target::Static(index) => mir::CallTarget::Static(index),
                        Target::Foreign(index) => mir::CallTarget::Foreign(index),
                    },
                    other => mir::CallTarget::Indirect(self.to_reg(other)?),
                };
                self.emit(mir::InstData::Call {
                    dest,
                    target,
                    args: lowered,
                    reg_offset: None,
                });
            }
            ir::InstData::ExtractValue { aggregate, indices } => {
                self.lower_extract(inst, aggregate, &indices)?;
            }
            ir::InstData::InsertValue {
                aggregate,
                value,
                indices,
            } => {
                self.lower_insert(inst, aggregate, value, &indices)?;
            }
            ir::InstData::Return { value } => {
                let mut values = smallvec::SmallVec::new();
                if let Some(value) = value {
                    self.width_of(self.func.value_type(self.ctx, value))?;
                    values.push(self.value(value)?);
                }
                self.emit(mir::InstData::Return { values });
            }
            ir::InstData::Goto { target } => {
                let target = self.block_map[&target];
                self.emit(mir::InstData::Jump { target });
            }
            ir::InstData::Branch {
                cond,
                then_block,
                else_block,
            } => {
                let then_mb = self.block_map[&then_block];
                let else_mb = self.block_map[&else_block];
                let fused_cmp = match cond {
                    ir::Value::Inst(def) if self.fused.contains(&def) => Some(def),
                    _ => None,
                };
                let condition = match fused_cmp {
                    Some(cmp) => {
                        let ir::InstData::Cmp {
                            mode,
                            rel,
                            lhs,
                            rhs,
                        } = self.func.data(cmp).clone()
                        else {
                            unreachable!()
                        };
                        self.emit_compare(mode, lhs, rhs)?;
                        cond_of(rel)
                    }
                    None => {
                        let reg = self.to_reg(cond)?;
                        self.emit(mir::InstData::Test {
                            signed: false,
                            operand: mir::Value::Reg(reg),
                            bytes: 1,
                        });
                        mir::Condition::Ne
                    }
                };
                self.emit(mir::InstData::CondJump {
                    target: then_mb,
                    cond: condition,
                });
                self.emit(mir::InstData::Jump { target: else_mb });
            }
            ir::InstData::Unreachable => {
                self.emit(mir::InstData::Trap);
            }
        }
        Ok(())
    }

    fn emit_compare(
        &mut self,
        mode: ir::CmpMode,
        lhs: ir::Value,
        rhs: ir::Value,
    ) -> Result<(), CodegenError> {
        let ty = self.func.value_type(self.ctx, lhs);
        let bytes = self.width_of(ty)?.max(1);
        let mir_mode = match mode {
            ir::CmpMode::Signed => mir::CompareMode::Signed,
            ir::CmpMode::Unsigned => mir::CompareMode::Unsigned,
            ir::CmpMode::Float => mir::CompareMode::Float,
        };
        // The left operand must be a register.
        let lhs_reg = self.to_reg(lhs)?;
        let rhs_value = self.value(rhs)?;
        self.emit(mir::InstData::Compare {
            mode: mir_mode,
            lhs: mir::Value::Reg(lhs_reg),
            rhs: rhs_value,
            bytes,
        });
        Ok(())
    }

    fn lower_arith(
        &mut self,
        dag: &SelectionDag,
        inst: ir::Inst,
        op: ir::ArithOp,
        lhs: ir::Value,
        rhs: ir::Value,
    ) -> Result<(), CodegenError> {
        let ty = self.func.inst_ty(inst);
        let bits = self.bits_of(ty);
        let mir_op = arith_of(op);
        if op.is_float() {
            let dest = self.def(inst);
            self.copy_to(dest, lhs)?;
            let rhs_value = self.value(rhs)?;
            self.emit(mir::InstData::Arith {
                dest,
                op: mir_op,
                lhs: mir::Value::Reg(dest),
                rhs: mir::ArithRhs::Value(rhs_value),
                bytes: bits / 8,
            });
            return Ok(());
        }
        // Integer path. Widths of 32 and 64 bits have native opcodes;
        // narrower operations run at 64 bits with explicit extensions.
        let op_bytes: u32 = if bits == 32 { 4 } else { 8 };
        let signed = matches!(op, ir::ArithOp::SDiv | ir::ArithOp::SRem | ir::ArithOp::AShr);
        let dest = self.def(inst);
        self.copy_to(dest, lhs)?;
        if signed && bits < 32 {
            self.emit(mir::InstData::Convert {
                dest,
                conv: mir::Conversion::Sext(bits),
                operand: mir::Value::Reg(dest),
            });
        }
        // Fused unique load as the right operand.
        let rhs_operand = match rhs {
            ir::Value::Inst(def)
                if self.fused.contains(&def)
                    && matches!(self.func.data(def), ir::InstData::Load { .. }) =>
            {
                let ir::InstData::Load { addr } = self.func.data(def).clone() else {
                    unreachable!()
                };
                let address = self.address_of(dag, addr, def)?;
                mir::ArithRhs::Memory(address)
            }
            _ => {
                let mut value = self.value(rhs)?;
                if signed && bits < 32 {
                    let reg = self.to_reg(rhs)?;
                    let extended = self.mfunc.new_reg(mir::RegClass::Ssa);
                    self.emit(mir::InstData::Copy {
                        dest: extended,
                        src: mir::Value::Reg(reg),
                        bytes: 8,
                    });
                    self.emit(mir::InstData::Convert {
                        dest: extended,
                        conv: mir::Conversion::Sext(bits),
                        operand: mir::Value::Reg(extended),
                    });
                    value = mir::Value::Reg(extended);
                }
                mir::ArithRhs::Value(value)
            }
        };
        self.emit(mir::InstData::Arith {
            dest,
            op: mir_op,
            lhs: mir::Value::Reg(dest),
            rhs: rhs_operand,
            bytes: op_bytes,
        });
        // Results narrower than the operation width are renormalized to the
        // zero-extended convention.
        if bits < 32 {
            self.mask_reg(dest, bits);
        }
        Ok(())
    }

    fn lower_unary(
        &mut self,
        inst: ir::Inst,
        op: ir::UnaryArithOp,
        operand: ir::Value,
    ) -> Result<(), CodegenError> {
        let ty = self.func.inst_ty(inst);
        let bits = self.bits_of(ty);
        let is_float = matches!(self.ctx.type_info(ty).data, ir::TypeData::Float { .. });
        let dest = self.def(inst);
        match op {
            ir::UnaryArithOp::LogNot => {
                self.copy_to(dest, operand)?;
                self.emit(mir::InstData::UnaryArith {
                    dest,
                    op: mir::UnaryOp::LogNot,
                    operand: mir::Value::Reg(dest),
                    bytes: 1,
                });
            }
            ir::UnaryArithOp::BitNot => {
                self.copy_to(dest, operand)?;
                self.emit(mir::InstData::UnaryArith {
                    dest,
                    op: mir::UnaryOp::BitNot,
                    operand: mir::Value::Reg(dest),
                    bytes: 8,
                });
                self.mask_reg(dest, bits);
            }
            ir::UnaryArithOp::Neg if is_float => {
                // Flip the sign bit.
                self.copy_to(dest, operand)?;
                self.emit(mir::InstData::Arith {
                    dest,
                    op: mir::ArithOp::Xor,
                    lhs: mir::Value::Reg(dest),
                    rhs: mir::ArithRhs::Value(mir::Value::Const(mir::Constant {
                        value: 1u64 << (bits - 1),
                        bytes: bits / 8,
                    })),
                    bytes: bits / 8,
                });
            }
            ir::UnaryArithOp::Neg if bits == 64 => {
                self.copy_to(dest, operand)?;
                self.emit(mir::InstData::UnaryArith {
                    dest,
                    op: mir::UnaryOp::Neg,
                    operand: mir::Value::Reg(dest),
                    bytes: 8,
                });
            }
            ir::UnaryArithOp::Neg => {
                let value = self.value(operand)?;
                self.emit(mir::InstData::Copy {
                    dest,
                    src: mir::Value::Const(mir::Constant { value: 0, bytes: 8 }),
                    bytes: 8,
                });
                self.emit(mir::InstData::Arith {
                    dest,
                    op: mir::ArithOp::Sub,
                    lhs: mir::Value::Reg(dest),
                    rhs: mir::ArithRhs::Value(value),
                    bytes: if bits == 32 { 4 } else { 8 },
                });
                if bits < 32 {
                    self.mask_reg(dest, bits);
                }
            }
        }
        Ok(())
    }

    fn lower_conv(
        &mut self,
        inst: ir::Inst,
        op: ir::ConvOp,
        operand: ir::Value,
    ) -> Result<(), CodegenError> {
        let from_ty = self.func.value_type(self.ctx, operand);
        let from_bits = self.bits_of(from_ty);
        let to_bits = self.bits_of(self.func.inst_ty(inst));
        let dest = self.def(inst);
        self.copy_to(dest, operand)?;
        match op {
            ir::ConvOp::Zext | ir::ConvOp::Bitcast | ir::ConvOp::Inttoptr => {}
            ir::ConvOp::Ptrtoint | ir::ConvOp::Trunc => {
                self.mask_reg(dest, to_bits);
            }
            ir::ConvOp::Sext => {
                self.emit(mir::InstData::Convert {
                    dest,
                    conv: mir::Conversion::Sext(from_bits),
                    operand: mir::Value::Reg(dest),
                });
                self.mask_reg(dest, to_bits);
            }
            ir::ConvOp::Fpext => {
                self.emit(mir::InstData::Convert {
                    dest,
                    conv: mir::Conversion::Fext,
                    operand: mir::Value::Reg(dest),
                });
            }
            ir::ConvOp::Fptrunc => {
                self.emit(mir::InstData::Convert {
                    dest,
                    conv: mir::Conversion::Ftrunc,
                    operand: mir::Value::Reg(dest),
                });
            }
            ir::ConvOp::Sitofp => {
                let mut from = from_bits;
                if from == 1 {
                    self.emit(mir::InstData::Convert {
                        dest,
                        conv: mir::Conversion::Sext(1),
                        operand: mir::Value::Reg(dest),
                    });
                    from = 64;
                }
                self.emit(mir::InstData::Convert {
                    dest,
                    conv: mir::Conversion::StoF(from, to_bits),
                    operand: mir::Value::Reg(dest),
                });
            }
            ir::ConvOp::Uitofp => {
                self.emit(mir::InstData::Convert {
                    dest,
                    conv: mir::Conversion::UtoF(from_bits.max(8), to_bits),
                    operand: mir::Value::Reg(dest),
                });
            }
            ir::ConvOp::Fptosi => {
                self.emit(mir::InstData::Convert {
                    dest,
                    conv: mir::Conversion::FtoS(from_bits, to_bits.max(8)),
                    operand: mir::Value::Reg(dest),
                });
                self.mask_reg(dest, to_bits);
            }
            ir::ConvOp::Fptoui => {
                self.emit(mir::InstData::Convert {
                    dest,
                    conv: mir::Conversion::FtoU(from_bits, to_bits.max(8)),
                    operand: mir::Value::Reg(dest),
                });
                self.mask_reg(dest, to_bits);
            }
        }
        Ok(())
    }

    fn member_slice(
        &self,
        aggregate_ty: ir::Type,
        indices: &[u32],
    ) -> Result<(u64, ir::Type), CodegenError> {
        let mut offset = 0u64;
        let mut ty = aggregate_ty;
        for &index in indices {
            match &self.ctx.type_info(ty).data {
                ir::TypeData::Struct { members, .. } => {
                    offset += self.ctx.member_offset(ty, index as usize);
                    ty = members[index as usize];
                }
                ir::TypeData::Array { elem, .. } => {
                    offset += self.ctx.size_of(*elem) * u64::from(index);
                    ty = *elem;
                }
                _ => {
                    return Err(CodegenError::Internal {
                        message: "member path into a scalar".into(),
                    })
                }
            }
        }
        Ok((offset, ty))
    }

    fn lower_extract(
        &mut self,
        inst: ir::Inst,
        aggregate: ir::Value,
        indices: &[u32],
    ) -> Result<(), CodegenError> {
        let agg_ty = self.func.value_type(self.ctx, aggregate);
        self.width_of(agg_ty)?;
        let (offset, member_ty) = self.member_slice(agg_ty, indices)?;
        let member_bits = (self.ctx.size_of(member_ty) * 8) as u32;
        let dest = self.def(inst);
        self.copy_to(dest, aggregate)?;
        if offset > 0 {
            self.emit(mir::InstData::Arith {
                dest,
                op: mir::ArithOp::LShr,
                lhs: mir::Value::Reg(dest),
                rhs: mir::ArithRhs::Value(mir::Value::Const(mir::Constant {
                    value: offset * 8,
                    bytes: 1,
                })),
                bytes: 8,
            });
        }
        self.mask_reg(dest, member_bits);
        Ok(())
    }

    fn lower_insert(
        &mut self,
        inst: ir::Inst,
        aggregate: ir::Value,
        value: ir::Value,
        indices: &[u32],
    ) -> Result<(), CodegenError> {
        let agg_ty = self.func.inst_ty(inst);
        self.width_of(agg_ty)?;
        let (offset, member_ty) = self.member_slice(agg_ty, indices)?;
        let member_bits = (self.ctx.size_of(member_ty) * 8) as u32;
        let hole = !(mask_of(member_bits) << (offset * 8));
        let dest = self.def(inst);
        self.copy_to(dest, aggregate)?;
        self.emit(mir::InstData::Arith {
            dest,
            op: mir::ArithOp::And,
            lhs: mir::Value::Reg(dest),
            rhs: mir::ArithRhs::Value(mir::Value::Const(mir::Constant {
                value: hole,
                bytes: 8,
            })),
            bytes: 8,
        });
        let piece = self.mfunc.new_reg(mir::RegClass::Ssa);
        let value_mapped = self.value(value)?;
        self.emit(mir::InstData::Copy {
            dest: piece,
            src: value_mapped,
            bytes: 8,
        });
        self.mask_reg(piece, member_bits);
        if offset > 0 {
            self.emit(mir::InstData::Arith {
                dest: piece,
                op: mir::ArithOp::Shl,
                lhs: mir::Value::Reg(piece),
                rhs: mir::ArithRhs::Value(mir::Value::Const(mir::Constant {
                    value: offset * 8,
                    bytes: 1,
                })),
                bytes: 8,
            });
        }
        self.emit(mir::InstData::Arith {
            dest,
            op: mir::ArithOp::Or,
            lhs: mir::Value::Reg(dest),
            rhs: mir::ArithRhs::Value(mir::Value::Reg(piece)),
            bytes: 8,
        });
        Ok(())
    }
}

/// `true` if `user` is an integer arithmetic instruction with `load` as its
/// right operand, the shape the RM opcode forms accept.
fn arith_can_fuse(user: &ir::InstData, load: ir::Inst) -> bool {
    match user {
        ir::InstData::Arith { op, rhs, .. } => {
            !op.is_float() && *rhs == ir::Value::Inst(load)
        }
        _ => false,
    }
}
