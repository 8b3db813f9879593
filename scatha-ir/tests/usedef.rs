use scatha_ir::{Context, Function, InstData, Value};
use smallvec::smallvec;

fn sample() -> (Context, Function, scatha_ir::Inst, scatha_ir::Inst) {
    let mut ctx = Context::new();
    let i64t = ctx.int_type(64);
    let ty = ctx.function_type(i64t, vec![i64t]);
    let mut func = Function::new("f".into(), ty, &[i64t], None);
    let entry = func.add_block("entry");
    let one = ctx.int_const(1, i64t);
    let a = func.append_inst(
        entry,
        InstData::Arith {
            op: scatha_ir::ArithOp::Add,
            lhs: Value::Param(0),
            rhs: Value::Const(one),
        },
        i64t,
        Some("a"),
    );
    let b = func.append_inst(
        entry,
        InstData::Arith {
            op: scatha_ir::ArithOp::Mul,
            lhs: Value::Inst(a),
            rhs: Value::Inst(a),
        },
        i64t,
        Some("b"),
    );
    func.append_inst(
        entry,
        InstData::Return {
            value: Some(Value::Inst(b)),
        },
        ctx.void_type(),
        None,
    );
    (ctx, func, a, b)
}

#[test]
fn operands_and_users_agree() {
    let (_, func, a, b) = sample();
    // `b` uses `a` twice, so the user multiset holds two entries.
    assert_eq!(func.users(Value::Inst(a)), &[b, b]);
    let operands = func.data(b).operands();
    assert_eq!(
        operands.iter().filter(|&&v| v == Value::Inst(a)).count(),
        2
    );
}

#[test]
fn set_operand_maintains_reverse_edges() {
    let (_, mut func, a, b) = sample();
    func.set_operand(b, 1, Value::Param(0));
    assert_eq!(func.users(Value::Inst(a)), &[b]);
    assert_eq!(func.users(Value::Param(0)).len(), 2);
}

#[test]
fn replace_all_uses_rewrites_every_occurrence() {
    let (_, mut func, a, b) = sample();
    func.replace_all_uses(Value::Inst(a), Value::Param(0));
    assert!(func.users(Value::Inst(a)).is_empty());
    let operands = func.data(b).operands();
    assert!(operands.iter().all(|&v| v == Value::Param(0)));
}

#[test]
#[should_panic(expected = "still has users")]
fn erasing_a_used_instruction_panics() {
    let (_, mut func, a, _) = sample();
    func.erase_inst(a);
}

#[test]
fn erase_after_severing_uses() {
    let (mut ctx, mut func, a, _) = sample();
    let i64t = ctx.int_type(64);
    let undef = ctx.undef(i64t);
    func.replace_all_uses(Value::Inst(a), Value::Const(undef));
    func.erase_inst(a);
    assert!(!func.is_inst_alive(a));
    // The parameter lost one of its users as well.
    assert!(func.users(Value::Param(0)).is_empty());
}

#[test]
fn names_are_unique_within_a_function() {
    let mut ctx = Context::new();
    let i64t = ctx.int_type(64);
    let ty = ctx.function_type(i64t, vec![]);
    let mut func = Function::new("f".into(), ty, &[], None);
    let entry = func.add_block("entry");
    let one = ctx.int_const(1, i64t);
    let first = func.append_inst(
        entry,
        InstData::Arith {
            op: scatha_ir::ArithOp::Add,
            lhs: Value::Const(one),
            rhs: Value::Const(one),
        },
        i64t,
        Some("x"),
    );
    let second = func.append_inst(
        entry,
        InstData::Arith {
            op: scatha_ir::ArithOp::Add,
            lhs: Value::Const(one),
            rhs: Value::Const(one),
        },
        i64t,
        Some("x"),
    );
    assert_eq!(func.inst_name(first), Some("x"));
    assert_eq!(func.inst_name(second), Some("x.0"));
}

#[test]
fn phi_edges_are_block_operands() {
    let mut ctx = Context::new();
    let i64t = ctx.int_type(64);
    let ty = ctx.function_type(i64t, vec![]);
    let mut func = Function::new("f".into(), ty, &[], None);
    let entry = func.add_block("entry");
    let exit = func.add_block("exit");
    func.append_inst(
        entry,
        InstData::Goto { target: exit },
        ctx.void_type(),
        None,
    );
    let zero = ctx.int_const(0, i64t);
    func.append_inst(
        exit,
        InstData::Phi {
            args: smallvec![(entry, Value::Const(zero))],
        },
        i64t,
        Some("p"),
    );
    // The goto's label use makes `entry` the predecessor of `exit`.
    assert_eq!(func.preds(exit).as_slice(), &[entry]);
    assert_eq!(func.succs(entry).as_slice(), &[exit]);
}
