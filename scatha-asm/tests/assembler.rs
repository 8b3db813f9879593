use rstest::rstest;
use scatha_asm::{
    assemble, map_arithmetic, map_compare, map_jump, map_move, ArithmeticOperation, AsmValue,
    AssemblerError, AssemblyStream, Block, CompareMode, CompareOperation, Instruction,
    MemoryAddress, OpCode, Program,
};

#[rstest]
#[case(AsmValue::Register(1), AsmValue::Register(2), 8, OpCode::mov64RR)]
#[case(AsmValue::Register(1), AsmValue::Const64(7), 8, OpCode::mov64RV)]
#[case(
    AsmValue::Register(1),
    AsmValue::Memory(MemoryAddress { base: 2, dynamic: None, factor: 0, term: 0 }),
    4,
    OpCode::mov32RM
)]
#[case(
    AsmValue::Memory(MemoryAddress { base: 2, dynamic: None, factor: 0, term: 0 }),
    AsmValue::Register(1),
    1,
    OpCode::mov8MR
)]
fn move_overload_resolution(
    #[case] dest: AsmValue,
    #[case] src: AsmValue,
    #[case] bytes: u8,
    #[case] expected: OpCode,
) {
    assert_eq!(map_move(&dest, &src, bytes).unwrap().opcode, expected);
}

#[test]
fn illegal_move_combinations_have_no_encoding() {
    // Memory to memory does not exist.
    let mem = AsmValue::Memory(MemoryAddress {
        base: 0,
        dynamic: None,
        factor: 0,
        term: 0,
    });
    assert!(map_move(&mem, &mem, 8).is_none());
    // Immediate destinations are meaningless.
    assert!(map_move(&AsmValue::Const64(1), &AsmValue::Register(0), 8).is_none());
}

#[rstest]
#[case(ArithmeticOperation::Add, AsmValue::Register(1), 8, OpCode::add64RR)]
#[case(ArithmeticOperation::Add, AsmValue::Const64(1), 8, OpCode::add64RV)]
#[case(ArithmeticOperation::Sub, AsmValue::Const32(1), 4, OpCode::sub32RV)]
#[case(ArithmeticOperation::Shl, AsmValue::Const8(3), 8, OpCode::sl64RV)]
#[case(ArithmeticOperation::FMul, AsmValue::Register(2), 8, OpCode::fmul64RR)]
#[case(
    ArithmeticOperation::Xor,
    AsmValue::Memory(MemoryAddress { base: 3, dynamic: None, factor: 0, term: 8 }),
    8,
    OpCode::xor64RM
)]
fn arithmetic_overload_resolution(
    #[case] op: ArithmeticOperation,
    #[case] src: AsmValue,
    #[case] bytes: u8,
    #[case] expected: OpCode,
) {
    assert_eq!(map_arithmetic(op, &src, bytes), Some(expected));
}

#[test]
fn float_memory_operands_are_rejected() {
    let mem = AsmValue::Memory(MemoryAddress {
        base: 0,
        dynamic: None,
        factor: 0,
        term: 0,
    });
    assert_eq!(map_arithmetic(ArithmeticOperation::FAdd, &mem, 8), None);
    // 16 bit arithmetic has no direct encoding either.
    assert_eq!(
        map_arithmetic(ArithmeticOperation::Add, &AsmValue::Register(0), 2),
        None
    );
}

#[test]
fn compare_and_jump_resolution() {
    assert_eq!(
        map_compare(CompareMode::Signed, &AsmValue::Register(0), 8),
        Some(OpCode::scmp64RR)
    );
    assert_eq!(
        map_compare(CompareMode::Float, &AsmValue::Const64(0), 8),
        Some(OpCode::fcmp64RV)
    );
    assert_eq!(map_compare(CompareMode::Float, &AsmValue::Register(0), 2), None);
    assert_eq!(map_jump(None), OpCode::jmp);
    assert_eq!(map_jump(Some(CompareOperation::Le)), OpCode::jle);
}

#[test]
fn two_pass_layout_backpatches_forward_jumps() {
    let stream = AssemblyStream {
        blocks: vec![
            Block {
                label: 0,
                name: "main".into(),
                public: true,
                insts: vec![
                    Instruction::Jump {
                        cond: None,
                        target: 1,
                    },
                    Instruction::Trap,
                ],
            },
            Block {
                label: 1,
                name: "main.end".into(),
                public: false,
                insts: vec![Instruction::Return],
            },
        ],
        data: Vec::new(),
        foreign: Vec::new(),
        entry: Some(0),
    };
    let result = assemble(&stream).unwrap();
    let text = &result.program.text;
    // jmp (5 bytes) + terminate (1 byte), so the second block sits at 6.
    assert_eq!(text[0], OpCode::jmp as u8);
    assert_eq!(u32::from_le_bytes(text[1..5].try_into().unwrap()), 6);
    assert_eq!(text[6], OpCode::ret as u8);
    assert_eq!(result.symbols["main"], 0);
    assert!(!result.symbols.contains_key("main.end"));
}

#[test]
fn unresolved_labels_are_reported_with_the_block() {
    let stream = AssemblyStream {
        blocks: vec![Block {
            label: 0,
            name: "main".into(),
            public: true,
            insts: vec![Instruction::Jump {
                cond: None,
                target: 99,
            }],
        }],
        data: Vec::new(),
        foreign: Vec::new(),
        entry: Some(0),
    };
    match assemble(&stream) {
        Err(AssemblerError::UnresolvedLabel { block, label }) => {
            assert_eq!(block, "main");
            assert_eq!(label, 99);
        }
        other => panic!("expected an unresolved label error, got {other:?}"),
    }
}

#[test]
fn missing_entry_is_an_error() {
    let stream = AssemblyStream {
        blocks: vec![Block {
            label: 0,
            name: "f".into(),
            public: false,
            insts: vec![Instruction::Return],
        }],
        data: Vec::new(),
        foreign: Vec::new(),
        entry: None,
    };
    assert!(matches!(assemble(&stream), Err(AssemblerError::MissingEntry)));
}

#[test]
fn program_container_round_trips_through_bytes() {
    let stream = AssemblyStream {
        blocks: vec![Block {
            label: 0,
            name: "main".into(),
            public: true,
            insts: vec![
                Instruction::Move {
                    dest: AsmValue::Register(0),
                    src: AsmValue::Const64(7),
                    bytes: 8,
                },
                Instruction::Return,
            ],
        }],
        data: vec![1, 2, 3],
        foreign: Vec::new(),
        entry: Some(0),
    };
    let program = assemble(&stream).unwrap().program;
    let decoded = Program::from_bytes(&program.to_bytes()).unwrap();
    assert_eq!(decoded, program);
    assert_eq!(decoded.data, vec![1, 2, 3]);
    assert_eq!(decoded.start, 0);
}

#[test]
fn disassembly_prints_one_line_per_instruction() {
    let stream = AssemblyStream {
        blocks: vec![Block {
            label: 0,
            name: "main".into(),
            public: true,
            insts: vec![
                Instruction::LIncSP { dest: 0, bytes: 8 },
                Instruction::Move {
                    dest: AsmValue::Register(0),
                    src: AsmValue::Const64(42),
                    bytes: 8,
                },
                Instruction::Return,
            ],
        }],
        data: Vec::new(),
        foreign: Vec::new(),
        entry: Some(0),
    };
    let program = assemble(&stream).unwrap().program;
    let listing = scatha_asm::print_program(&program);
    assert!(listing.contains("lincsp"));
    assert!(listing.contains("mov64RV"));
    assert!(listing.contains("ret"));
}
