//! End-to-end tests: IR text through the full back end onto the VM.

use scatha_asm::{assemble, OpCode};
use scatha_vm::{register_builtins, VirtualMachine, VmError};

fn compile(text: &str, optimize: bool) -> scatha_asm::Program {
    let (mut ctx, mut module) = scatha_ir::parse(text).expect("input must parse");
    if optimize {
        scatha_ir::passes::default_pipeline().run(&mut ctx, &mut module);
        scatha_ir::assert_invariants(&ctx, &module);
    }
    let stream = scatha_codegen::codegen(&mut ctx, &mut module).expect("codegen must succeed");
    assemble(&stream).expect("assembly must succeed").program
}

fn run_with_args(text: &str, optimize: bool, args: &[u64]) -> Result<u64, VmError> {
    let program = compile(text, optimize);
    let mut vm = VirtualMachine::new();
    register_builtins(&mut vm);
    vm.load_program(&program)?;
    vm.execute(args)
}

fn run(text: &str) -> u64 {
    // Every program must compute the same value unoptimized and optimized.
    let plain = run_with_args(text, false, &[]).expect("unoptimized execution");
    let optimized = run_with_args(text, true, &[]).expect("optimized execution");
    assert_eq!(plain, optimized, "optimization changed the result");
    plain
}

#[test]
fn return_constant() {
    let result = run(
        r#"
pub func i64 @main() {
  %entry:
    return i64 42
}"#,
    );
    assert_eq!(result, 42);
}

#[test]
fn counting_loop_returns_10() {
    let result = run(
        r#"
pub func i64 @main() {
  %entry:
    goto label %header
  %header:
    %n = phi i64 [label %entry : 0], [label %body : %n.next]
    %cond = scmp lt i64 %n, i64 10
    branch i1 %cond, label %body, label %end
  %body:
    %n.next = add i64 %n, i64 1
    goto label %header
  %end:
    return i64 %n
}"#,
    );
    assert_eq!(result, 10);
}

#[test]
fn recursive_factorial() {
    let result = run(
        r#"
pub func i64 @main() {
  %entry:
    %r = call i64 @fact, i64 6
    return i64 %r
}
func i64 @fact(i64 %n) {
  %entry:
    %base = scmp le i64 %n, i64 1
    branch i1 %base, label %one, label %rec
  %one:
    return i64 1
  %rec:
    %n.dec = sub i64 %n, i64 1
    %sub = call i64 @fact, i64 %n.dec
    %r = mul i64 %n, i64 %sub
    return i64 %r
}"#,
    );
    assert_eq!(result, 720);
}

#[test]
fn tail_recursive_sum() {
    let result = run(
        r#"
pub func i64 @main() {
  %entry:
    %r = call i64 @sum, i64 100, i64 0
    return i64 %r
}
func i64 @sum(i64 %n, i64 %acc) {
  %entry:
    %done = scmp eq i64 %n, i64 0
    branch i1 %done, label %base, label %rec
  %base:
    return i64 %acc
  %rec:
    %n.dec = sub i64 %n, i64 1
    %acc.next = add i64 %acc, i64 %n
    %r = call i64 @sum, i64 %n.dec, i64 %acc.next
    return i64 %r
}"#,
    );
    assert_eq!(result, 5050);
}

#[test]
fn memory_round_trip() {
    let result = run(
        r#"
pub func i64 @main() {
  %entry:
    %slot = alloca i64, i32 4
    %second = getelementptr inbounds i64, ptr %slot, i64 1
    store ptr %slot, i64 17
    store ptr %second, i64 25
    %a = load i64, ptr %slot
    %b = load i64, ptr %second
    %sum = add i64 %a, i64 %b
    return i64 %sum
}"#,
    );
    assert_eq!(result, 42);
}

#[test]
fn struct_members_through_geps() {
    let result = run(
        r#"
struct @pair { i64, i32 }

pub func i64 @main() {
  %entry:
    %p = alloca @pair, i32 1
    %first = getelementptr inbounds @pair, ptr %p, i64 0, 0
    %second = getelementptr inbounds @pair, ptr %p, i64 0, 1
    store ptr %first, i64 40
    store ptr %second, i32 2
    %a = load i64, ptr %first
    %b = load i32, ptr %second
    %b.wide = zext i32 %b to i64
    %sum = add i64 %a, i64 %b.wide
    return i64 %sum
}"#,
    );
    assert_eq!(result, 42);
}

#[test]
fn globals_are_readable_and_writable() {
    let result = run(
        r#"
global @counter = i64 40

pub func i64 @main() {
  %entry:
    %v = load i64, ptr @counter
    %v.next = add i64 %v, i64 2
    store ptr @counter, i64 %v.next
    %r = load i64, ptr @counter
    return i64 %r
}"#,
    );
    assert_eq!(result, 42);
}

#[test]
fn select_and_compare() {
    let result = run(
        r#"
pub func i64 @main() {
  %entry:
    %c = scmp gt i64 7, i64 3
    %r = select i1 %c, i64 42, i64 0
    return i64 %r
}"#,
    );
    assert_eq!(result, 42);
}

#[test]
fn float_arithmetic() {
    let result = run(
        r#"
pub func i64 @main() {
  %entry:
    %x = fadd f64 1.5, f64 2.25
    %scaled = fmul f64 %x, f64 8.0
    %r = fptosi f64 %scaled to i64
    return i64 %r
}"#,
    );
    assert_eq!(result, 30);
}

#[test]
fn narrow_integer_arithmetic() {
    // i8 arithmetic wraps at 8 bits: 200 + 100 = 44.
    let result = run(
        r#"
pub func i64 @main() {
  %entry:
    %a = add i8 200, i8 100
    %r = zext i8 %a to i64
    return i64 %r
}"#,
    );
    assert_eq!(result, 44);
}

#[test]
fn signed_narrow_division() {
    // -100 / 3 at i8 width.
    let result = run(
        r#"
pub func i64 @main() {
  %entry:
    %q = sdiv i8 -100, i8 3
    %r = sext i8 %q to i64
    return i64 %r
}"#,
    );
    assert_eq!(result as i64, -33);
}

#[test]
fn function_pointers_call_indirect() {
    let result = run(
        r#"
pub func i64 @main() {
  %entry:
    %f = bitcast ptr @forty_two to ptr
    %r = call i64 %f
    return i64 %r
}
func i64 @forty_two() {
  %entry:
    return i64 42
}"#,
    );
    assert_eq!(result, 42);
}

#[test]
fn foreign_alloc_through_builtins() {
    let result = run(
        r#"
ext func ptr @alloc(i64, i64)
ext func void @dealloc(ptr, i64)

pub func i64 @main() {
  %entry:
    %p = call ptr @alloc, i64 16, i64 8
    store ptr %p, i64 42
    %v = load i64, ptr %p
    call void @dealloc, ptr %p, i64 16
    return i64 %v
}"#,
    );
    assert_eq!(result, 42);
}

#[test]
fn division_by_zero_surfaces_as_error() {
    let error = run_with_args(
        r#"
pub func i64 @main(i64 %x) {
  %entry:
    %r = sdiv i64 1, i64 %x
    return i64 %r
}"#,
        false,
        &[0],
    )
    .unwrap_err();
    assert_eq!(error, VmError::Arithmetic);
}

#[test]
fn arguments_flow_into_main() {
    let text = r#"
pub func i64 @main(i64 %a, i64 %b) {
  %entry:
    %sum = add i64 %a, i64 %b
    return i64 %sum
}"#;
    assert_eq!(run_with_args(text, false, &[40, 2]), Ok(42));
    assert_eq!(run_with_args(text, true, &[40, 2]), Ok(42));
}

#[test]
fn aggregates_in_registers() {
    let result = run(
        r#"
pub func i64 @main() {
  %entry:
    %t0 = insert_value { i32, i32 } undef, i32 12, 0
    %t1 = insert_value { i32, i32 } %t0, i32 30, 1
    %a = extract_value { i32, i32 } %t1, 0
    %b = extract_value { i32, i32 } %t1, 1
    %sum = add i32 %a, i32 %b
    %r = zext i32 %sum to i64
    return i64 %r
}"#,
    );
    assert_eq!(result, 42);
}

#[test]
fn no_jump_to_the_next_instruction_remains() {
    let program = compile(
        r#"
pub func i64 @main(i64 %x) {
  %entry:
    %c = scmp lt i64 %x, i64 5
    branch i1 %c, label %small, label %big
  %small:
    return i64 1
  %big:
    %c2 = scmp lt i64 %x, i64 50
    branch i1 %c2, label %mid, label %huge
  %mid:
    return i64 2
  %huge:
    return i64 3
}"#,
        true,
    );
    // Walk the text section; an unconditional jump must never target the
    // directly following instruction.
    let text = &program.text;
    let mut offset = 0usize;
    while offset < text.len() {
        let opcode = OpCode::try_from(text[offset]).expect("valid opcode");
        if opcode == OpCode::jmp {
            let mut raw = [0u8; 4];
            raw.copy_from_slice(&text[offset + 1..offset + 5]);
            let target = u32::from_le_bytes(raw) as usize;
            assert_ne!(
                target,
                offset + opcode.size(),
                "jump to the next instruction at {offset:#x}"
            );
        }
        offset += opcode.size();
    }
}

#[test]
fn executed_instruction_statistics() {
    let program = compile(
        r#"
pub func i64 @main() {
  %entry:
    return i64 0
}"#,
        false,
    );
    let mut vm = VirtualMachine::new();
    register_builtins(&mut vm);
    vm.load_program(&program).unwrap();
    vm.execute(&[]).unwrap();
    assert!(vm.stats.executed_instructions > 0);
}
