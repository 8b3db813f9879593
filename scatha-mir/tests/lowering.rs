use scatha_mir::{
    coalesce, destroy_ssa, devirtualize, jump_elision, regalloc, Block, Constant, Function,
    InterferenceGraph, InstData, Reg, RegClass, Value,
};
use smallvec::smallvec;

fn const64(value: u64) -> Value {
    Value::Const(Constant { value, bytes: 8 })
}

/// A diamond with a phi at the join:
///
/// ```text
/// entry: test; condjump then; jump else
/// then:  a = 1; jump join
/// else:  b = 2; jump join
/// join:  p = phi(a, b); return p
/// ```
fn phi_diamond() -> (Function, Block, Reg) {
    let mut func = Function::new("diamond".into(), 0, 1);
    let entry = func.add_block("entry");
    let then_b = func.add_block("then");
    let else_b = func.add_block("else");
    let join = func.add_block("join");
    let flag = func.new_reg(RegClass::Ssa);
    let a = func.new_reg(RegClass::Ssa);
    let b = func.new_reg(RegClass::Ssa);
    let p = func.new_reg(RegClass::Ssa);
    func.append_inst(
        entry,
        InstData::Copy {
            dest: flag,
            src: const64(1),
            bytes: 8,
        },
    );
    func.append_inst(
        entry,
        InstData::Test {
            signed: false,
            operand: Value::Reg(flag),
            bytes: 8,
        },
    );
    func.append_inst(
        entry,
        InstData::CondJump {
            target: then_b,
            cond: scatha_mir::Condition::Ne,
        },
    );
    func.append_inst(entry, InstData::Jump { target: else_b });
    func.append_inst(
        then_b,
        InstData::Copy {
            dest: a,
            src: const64(1),
            bytes: 8,
        },
    );
    func.append_inst(then_b, InstData::Jump { target: join });
    func.append_inst(
        else_b,
        InstData::Copy {
            dest: b,
            src: const64(2),
            bytes: 8,
        },
    );
    func.append_inst(else_b, InstData::Jump { target: join });
    func.append_inst(
        join,
        InstData::Phi {
            dest: p,
            args: smallvec![(then_b, Value::Reg(a)), (else_b, Value::Reg(b))],
            bytes: 8,
        },
    );
    func.append_inst(
        join,
        InstData::Return {
            values: smallvec![Value::Reg(p)],
        },
    );
    (func, join, p)
}

#[test]
fn ssa_destruction_replaces_phis_with_edge_copies() {
    let (mut func, join, p) = phi_diamond();
    destroy_ssa::run(&mut func, 0);
    // No phi remains anywhere.
    for block in func.blocks() {
        for &inst in func.block_insts(block) {
            assert!(
                !matches!(func.data(inst), InstData::Phi { .. }),
                "phi survived SSA destruction"
            );
        }
    }
    // Every former incoming edge carries a copy into the phi register.
    let demoted = Reg::virt(p.index);
    let blocks = func.blocks();
    for &pred in &[blocks[1], blocks[2]] {
        let copies: Vec<_> = func
            .block_insts(pred)
            .iter()
            .filter(|&&inst| {
                matches!(*func.data(inst), InstData::Copy { dest, .. } if dest == demoted)
            })
            .collect();
        assert_eq!(copies.len(), 1, "edge copy missing");
    }
    let _ = join;
}

#[test]
fn interference_of_overlapping_ranges() {
    // a and b are both live at the add; a and c are not live together.
    let mut func = Function::new("overlap".into(), 0, 1);
    let entry = func.add_block("entry");
    let a = func.new_reg(RegClass::Virtual);
    let b = func.new_reg(RegClass::Virtual);
    let c = func.new_reg(RegClass::Virtual);
    func.append_inst(
        entry,
        InstData::Copy {
            dest: a,
            src: const64(1),
            bytes: 8,
        },
    );
    func.append_inst(
        entry,
        InstData::Copy {
            dest: b,
            src: const64(2),
            bytes: 8,
        },
    );
    func.append_inst(
        entry,
        InstData::Arith {
            dest: c,
            op: scatha_mir::ArithOp::Add,
            lhs: Value::Reg(a),
            rhs: scatha_mir::ArithRhs::Value(Value::Reg(b)),
            bytes: 8,
        },
    );
    func.append_inst(
        entry,
        InstData::Return {
            values: smallvec![Value::Reg(c)],
        },
    );
    let graph = InterferenceGraph::build(&func);
    assert!(graph.interfere(a, b));
    assert!(!graph.interfere(a, c));
}

#[test]
fn allocation_leaves_no_virtual_registers() {
    let (mut func, _, _) = phi_diamond();
    destroy_ssa::run(&mut func, 0);
    coalesce::run(&mut func);
    scatha_mir::dce::run(&mut func);
    regalloc::allocate(&mut func, 8);
    devirtualize::run(&mut func);
    for block in func.blocks() {
        for &inst in func.block_insts(block) {
            let data = func.data(inst);
            if let Some(dest) = data.dest() {
                assert_eq!(dest.class, RegClass::Hardware);
            }
            data.for_each_use(|reg| assert_eq!(reg.class, RegClass::Hardware));
        }
    }
    assert!(func.num_hardware_regs >= 1);
}

#[test]
fn interfering_registers_get_distinct_colors() {
    // Four simultaneously live values force four distinct hardware indices.
    let mut func = Function::new("pressure".into(), 0, 1);
    let entry = func.add_block("entry");
    let regs: Vec<Reg> = (0..4).map(|_| func.new_reg(RegClass::Virtual)).collect();
    for (index, &reg) in regs.iter().enumerate() {
        func.append_inst(
            entry,
            InstData::Copy {
                dest: reg,
                src: const64(index as u64),
                bytes: 8,
            },
        );
    }
    // A use of every register keeps all four live until here.
    let sum = func.new_reg(RegClass::Virtual);
    func.append_inst(
        entry,
        InstData::Copy {
            dest: sum,
            src: Value::Reg(regs[0]),
            bytes: 8,
        },
    );
    for &reg in &regs[1..] {
        func.append_inst(
            entry,
            InstData::Arith {
                dest: sum,
                op: scatha_mir::ArithOp::Add,
                lhs: Value::Reg(sum),
                rhs: scatha_mir::ArithRhs::Value(Value::Reg(reg)),
                bytes: 8,
            },
        );
    }
    func.append_inst(
        entry,
        InstData::Return {
            values: smallvec![Value::Reg(sum)],
        },
    );
    regalloc::allocate(&mut func, 8);
    // The adds read distinct hardware registers.
    let mut seen = std::collections::HashSet::new();
    for &inst in func.block_insts(entry) {
        if let InstData::Arith { rhs, .. } = func.data(inst) {
            if let scatha_mir::ArithRhs::Value(Value::Reg(reg)) = rhs {
                seen.insert(reg.index);
            }
        }
    }
    assert_eq!(seen.len(), 3);
}

#[test]
fn spilling_with_a_tiny_palette() {
    // More simultaneously live values than colors: the allocator must spill
    // and still terminate with only hardware registers.
    let mut func = Function::new("spill".into(), 0, 1);
    let entry = func.add_block("entry");
    let regs: Vec<Reg> = (0..6).map(|_| func.new_reg(RegClass::Virtual)).collect();
    for (index, &reg) in regs.iter().enumerate() {
        func.append_inst(
            entry,
            InstData::Copy {
                dest: reg,
                src: const64(index as u64),
                bytes: 8,
            },
        );
    }
    let sum = func.new_reg(RegClass::Virtual);
    func.append_inst(
        entry,
        InstData::Copy {
            dest: sum,
            src: Value::Reg(regs[0]),
            bytes: 8,
        },
    );
    for &reg in &regs[1..] {
        func.append_inst(
            entry,
            InstData::Arith {
                dest: sum,
                op: scatha_mir::ArithOp::Add,
                lhs: Value::Reg(sum),
                rhs: scatha_mir::ArithRhs::Value(Value::Reg(reg)),
                bytes: 8,
            },
        );
    }
    func.append_inst(
        entry,
        InstData::Return {
            values: smallvec![Value::Reg(sum)],
        },
    );
    regalloc::allocate(&mut func, 3);
    for block in func.blocks() {
        for &inst in func.block_insts(block) {
            if let Some(dest) = func.data(inst).dest() {
                assert_eq!(dest.class, RegClass::Hardware);
            }
        }
    }
}

#[test]
fn jump_elision_removes_fallthrough_jumps() {
    let (mut func, _, _) = phi_diamond();
    destroy_ssa::run(&mut func, 0);
    jump_elision::run(&mut func);
    let layout = func.blocks();
    for (position, &block) in layout.iter().enumerate() {
        let Some(&next) = layout.get(position + 1) else {
            continue;
        };
        for &inst in func.block_insts(block) {
            if let InstData::Jump { target } = *func.data(inst) {
                assert_ne!(target, next, "jump to the next block survived");
            }
        }
    }
}

#[test]
fn copy_coalescing_merges_noninterfering_ranges() {
    let mut func = Function::new("merge".into(), 0, 1);
    let entry = func.add_block("entry");
    let a = func.new_reg(RegClass::Virtual);
    let b = func.new_reg(RegClass::Virtual);
    func.append_inst(
        entry,
        InstData::Copy {
            dest: a,
            src: const64(7),
            bytes: 8,
        },
    );
    func.append_inst(
        entry,
        InstData::Copy {
            dest: b,
            src: Value::Reg(a),
            bytes: 8,
        },
    );
    func.append_inst(
        entry,
        InstData::Return {
            values: smallvec![Value::Reg(b)],
        },
    );
    assert!(coalesce::run(&mut func));
    let insts = func.block_insts(entry);
    assert_eq!(insts.len(), 2, "the copy must be gone");
}

#[test]
fn devirtualize_offsets_callee_registers() {
    let mut func = Function::new("caller".into(), 0, 1);
    let entry = func.add_block("entry");
    let arg = func.new_reg(RegClass::Ssa);
    let result = func.new_reg(RegClass::Ssa);
    func.append_inst(
        entry,
        InstData::Copy {
            dest: arg,
            src: const64(5),
            bytes: 8,
        },
    );
    func.append_inst(
        entry,
        InstData::Call {
            dest: Some(result),
            target: scatha_mir::CallTarget::Static(1),
            args: smallvec![Value::Reg(arg)],
            reg_offset: None,
        },
    );
    func.append_inst(
        entry,
        InstData::Return {
            values: smallvec![Value::Reg(result)],
        },
    );
    destroy_ssa::run(&mut func, 0);
    regalloc::allocate(&mut func, 8);
    devirtualize::run(&mut func);
    let call = func
        .blocks()
        .into_iter()
        .flat_map(|b| func.block_insts(b).to_vec())
        .find(|&inst| matches!(func.data(inst), InstData::Call { .. }))
        .expect("call must remain");
    let InstData::Call {
        reg_offset, args, ..
    } = func.data(call)
    else {
        unreachable!()
    };
    let offset = reg_offset.expect("offset fixed by devirtualization");
    // Two metadata slots sit between the locals and the callee window.
    assert!(offset >= 2);
    for arg in args {
        let Value::Reg(reg) = arg else { panic!() };
        assert_eq!(reg.class, RegClass::Hardware);
        assert!(reg.index >= offset);
    }
}
