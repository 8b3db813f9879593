use rstest::rstest;
use scatha_asm::{
    assemble, ArithmeticOperation, AsmValue, AssemblyStream, Block, CompareMode, CompareOperation,
    Instruction, Program,
};
use scatha_types::{FfiType, ForeignFunction};
use scatha_vm::{register_builtins, MemoryAccessReason, VirtualMachine, VmError};

fn assemble_main(insts: Vec<Instruction>) -> Program {
    let stream = AssemblyStream {
        blocks: vec![Block {
            label: 0,
            name: "main".into(),
            public: true,
            insts,
        }],
        data: Vec::new(),
        foreign: Vec::new(),
        entry: Some(0),
    };
    assemble(&stream).expect("stream must assemble").program
}

fn run(program: &Program, args: &[u64]) -> Result<u64, VmError> {
    let mut vm = VirtualMachine::new();
    register_builtins(&mut vm);
    vm.load_program(program)?;
    vm.execute(args)
}

#[test]
fn minimal_program_returns_42() {
    let program = assemble_main(vec![
        Instruction::LIncSP { dest: 0, bytes: 8 },
        Instruction::Move {
            dest: AsmValue::Register(0),
            src: AsmValue::Const64(42),
            bytes: 8,
        },
        Instruction::Return,
    ]);
    assert_eq!(run(&program, &[]), Ok(42));
}

#[test]
fn arithmetic_and_compare_flags() {
    // r0 = 10; r1 = 4; r0 -= r1; r0 == 6 sets r0 = 1.
    let program = assemble_main(vec![
        Instruction::Move {
            dest: AsmValue::Register(0),
            src: AsmValue::Const64(10),
            bytes: 8,
        },
        Instruction::Move {
            dest: AsmValue::Register(1),
            src: AsmValue::Const64(4),
            bytes: 8,
        },
        Instruction::Arithmetic {
            op: scatha_asm::ArithmeticOperation::Sub,
            dest: 0,
            src: AsmValue::Register(1),
            bytes: 8,
        },
        Instruction::Compare {
            mode: CompareMode::Signed,
            lhs: AsmValue::Register(0),
            rhs: AsmValue::Const64(6),
            bytes: 8,
        },
        Instruction::Set {
            cond: CompareOperation::Eq,
            dest: 0,
        },
        Instruction::Return,
    ]);
    assert_eq!(run(&program, &[]), Ok(1));
}

#[rstest]
#[case(ArithmeticOperation::SDiv)]
#[case(ArithmeticOperation::UDiv)]
#[case(ArithmeticOperation::SRem)]
#[case(ArithmeticOperation::URem)]
fn division_by_zero_traps(#[case] op: ArithmeticOperation) {
    let program = assemble_main(vec![
        Instruction::Move {
            dest: AsmValue::Register(0),
            src: AsmValue::Const64(1),
            bytes: 8,
        },
        Instruction::Arithmetic {
            op,
            dest: 0,
            src: AsmValue::Const64(0),
            bytes: 8,
        },
        Instruction::Return,
    ]);
    let error = run(&program, &[]).unwrap_err();
    assert_eq!(error, VmError::Arithmetic);
    assert_eq!(error.to_string(), "Attempt to divide by zero");
}

#[test]
fn trap_instruction() {
    let program = assemble_main(vec![Instruction::Trap]);
    assert_eq!(run(&program, &[]), Err(VmError::Trap));
}

#[test]
fn misaligned_store_traps() {
    let program = assemble_main(vec![
        Instruction::LIncSP { dest: 0, bytes: 16 },
        Instruction::Arithmetic {
            op: scatha_asm::ArithmeticOperation::Add,
            dest: 0,
            src: AsmValue::Const64(4),
            bytes: 8,
        },
        Instruction::Move {
            dest: AsmValue::Memory(scatha_asm::MemoryAddress {
                base: 0,
                dynamic: None,
                factor: 0,
                term: 0,
            }),
            src: AsmValue::Register(0),
            bytes: 8,
        },
        Instruction::Return,
    ]);
    let error = run(&program, &[]).unwrap_err();
    assert!(matches!(
        error,
        VmError::MemoryAccess {
            reason: MemoryAccessReason::MisalignedStore,
            ..
        }
    ));
}

#[test]
fn unallocated_memory_traps() {
    let program = assemble_main(vec![
        Instruction::Move {
            dest: AsmValue::Register(0),
            src: AsmValue::Const64(scatha_types::VirtualPointer::new(77, 0).to_word()),
            bytes: 8,
        },
        Instruction::Move {
            dest: AsmValue::Register(1),
            src: AsmValue::Memory(scatha_asm::MemoryAddress {
                base: 0,
                dynamic: None,
                factor: 0,
                term: 0,
            }),
            bytes: 8,
        },
        Instruction::Return,
    ]);
    let error = run(&program, &[]).unwrap_err();
    assert!(matches!(
        error,
        VmError::MemoryAccess {
            reason: MemoryAccessReason::NotAllocated,
            ..
        }
    ));
}

#[test]
fn invalid_opcode_traps() {
    let mut program = assemble_main(vec![Instruction::Return]);
    program.text = vec![0xfe];
    program.start = 0;
    let error = run(&program, &[]).unwrap_err();
    assert_eq!(error, VmError::InvalidOpcode { value: 0xfe });
    assert_eq!(error.to_string(), "Executed invalid opcode: 254");
}

#[test]
fn stack_overflow_traps() {
    // Each allocation takes 32k; the default stack runs out eventually.
    let mut insts = Vec::new();
    for _ in 0..64 {
        insts.push(Instruction::LIncSP {
            dest: 0,
            bytes: 32 * 1024,
        });
    }
    insts.push(Instruction::Return);
    let program = assemble_main(insts);
    assert!(matches!(
        run(&program, &[]),
        Err(VmError::InvalidStackAllocation { count: 32768 })
    ));
}

#[test]
fn execute_without_program() {
    let mut vm = VirtualMachine::new();
    assert_eq!(vm.execute(&[]), Err(VmError::NoStartAddress));
    assert_eq!(
        VmError::NoStartAddress.to_string(),
        "Attempted execution without start address"
    );
}

#[test]
fn unbound_foreign_function_fails_at_load() {
    let mut program = assemble_main(vec![Instruction::Return]);
    program.foreign.push(ForeignFunction {
        name: "does_not_exist".into(),
        arg_types: vec![],
        return_type: FfiType::Void,
    });
    let mut vm = VirtualMachine::new();
    register_builtins(&mut vm);
    let error = vm.load_program(&program).unwrap_err();
    assert_eq!(
        error.to_string(),
        "Failed to initialize foreign function \"does_not_exist\""
    );
}

#[test]
fn builtin_alloc_and_dealloc() {
    // p = alloc(64, 8); store through it; dealloc(p, 64).
    let stream = AssemblyStream {
        blocks: vec![Block {
            label: 0,
            name: "main".into(),
            public: true,
            insts: vec![
                // Args for alloc at the callee window (offset 4).
                Instruction::Move {
                    dest: AsmValue::Register(4),
                    src: AsmValue::Const64(64),
                    bytes: 8,
                },
                Instruction::Move {
                    dest: AsmValue::Register(5),
                    src: AsmValue::Const64(8),
                    bytes: 8,
                },
                Instruction::CallExt {
                    reg_offset: 4,
                    slot: 0,
                    index: 0,
                },
                // The pointer lands in the first argument register.
                Instruction::Move {
                    dest: AsmValue::Register(0),
                    src: AsmValue::Register(4),
                    bytes: 8,
                },
                Instruction::Move {
                    dest: AsmValue::Memory(scatha_asm::MemoryAddress {
                        base: 0,
                        dynamic: None,
                        factor: 0,
                        term: 8,
                    }),
                    src: AsmValue::Register(0),
                    bytes: 8,
                },
                // dealloc(p, 64)
                Instruction::Move {
                    dest: AsmValue::Register(4),
                    src: AsmValue::Register(0),
                    bytes: 8,
                },
                Instruction::Move {
                    dest: AsmValue::Register(5),
                    src: AsmValue::Const64(64),
                    bytes: 8,
                },
                Instruction::CallExt {
                    reg_offset: 4,
                    slot: 0,
                    index: 1,
                },
                Instruction::Move {
                    dest: AsmValue::Register(0),
                    src: AsmValue::Const64(0),
                    bytes: 8,
                },
                Instruction::Return,
            ],
        }],
        data: Vec::new(),
        foreign: vec![
            ForeignFunction {
                name: "alloc".into(),
                arg_types: vec![FfiType::Int64, FfiType::Int64],
                return_type: FfiType::Pointer,
            },
            ForeignFunction {
                name: "dealloc".into(),
                arg_types: vec![FfiType::Pointer, FfiType::Int64],
                return_type: FfiType::Void,
            },
        ],
        entry: Some(0),
    };
    let program = assemble(&stream).unwrap().program;
    assert_eq!(run(&program, &[]), Ok(0));
}

#[test]
fn program_arguments_reach_the_entry() {
    // Return the first argument incremented.
    let program = assemble_main(vec![
        Instruction::Arithmetic {
            op: scatha_asm::ArithmeticOperation::Add,
            dest: 0,
            src: AsmValue::Const64(1),
            bytes: 8,
        },
        Instruction::Return,
    ]);
    assert_eq!(run(&program, &[41]), Ok(42));
}

#[test]
fn internal_calls_nest_register_windows() {
    // main: r2 = 5 (arg); call add_one at offset 4; result in r4.
    let stream = AssemblyStream {
        blocks: vec![
            Block {
                label: 0,
                name: "main".into(),
                public: true,
                insts: vec![
                    Instruction::Move {
                        dest: AsmValue::Register(4),
                        src: AsmValue::Const64(5),
                        bytes: 8,
                    },
                    Instruction::Call {
                        target: 1,
                        reg_offset: 4,
                    },
                    Instruction::Move {
                        dest: AsmValue::Register(0),
                        src: AsmValue::Register(4),
                        bytes: 8,
                    },
                    Instruction::Return,
                ],
            },
            Block {
                label: 1,
                name: "add_one".into(),
                public: false,
                insts: vec![
                    Instruction::Arithmetic {
                        op: scatha_asm::ArithmeticOperation::Add,
                        dest: 0,
                        src: AsmValue::Const64(1),
                        bytes: 8,
                    },
                    Instruction::Return,
                ],
            },
        ],
        data: Vec::new(),
        foreign: Vec::new(),
        entry: Some(0),
    };
    let program = assemble(&stream).unwrap().program;
    assert_eq!(run(&program, &[]), Ok(6));
    let mut vm = VirtualMachine::new();
    register_builtins(&mut vm);
    vm.load_program(&program).unwrap();
    vm.execute(&[]).unwrap();
    assert!(vm.stats.executed_instructions >= 6);
}
