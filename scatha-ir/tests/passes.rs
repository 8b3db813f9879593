use scatha_ir::passes::Pipeline;
use scatha_ir::{assert_invariants, parse, print_module};

/// Runs `pipeline` on `input` and expects the result to print like
/// `expected` (both sides are canonicalized through the printer).
fn pass_test(pipeline: &str, input: &str, expected: &str) {
    let (mut ctx, mut module) = parse(input).expect("input must parse");
    let pipeline = Pipeline::parse(pipeline).expect("pipeline must parse");
    pipeline.run(&mut ctx, &mut module);
    assert_invariants(&ctx, &module);
    let printed = print_module(&ctx, &module);
    let (ctx2, module2) = parse(expected).expect("expected output must parse");
    let expected_printed = print_module(&ctx2, &module2);
    assert_eq!(printed, expected_printed);
}

/// Canonicalization and simplification passes reach a fixpoint in one run:
/// the second run must not change the module.
fn idempotency_test(pipeline: &str, input: &str) {
    let (mut ctx, mut module) = parse(input).expect("input must parse");
    let pipeline = Pipeline::parse(pipeline).expect("pipeline must parse");
    pipeline.run(&mut ctx, &mut module);
    assert_invariants(&ctx, &module);
    let modified = pipeline.run(&mut ctx, &mut module);
    assert!(!modified, "second run of '{pipeline}' changed the module");
}

#[test]
fn bitcast_folding() {
    pass_test(
        "propconst",
        r#"
func i64 @main() {
  %entry:
    %a = bitcast i64 0 to f64
    %b = bitcast f64 %a to i64
    return i64 %b
}"#,
        r#"
func i64 @main() {
  %entry:
    return i64 0
}"#,
    );
}

#[test]
fn conditional_constant_propagation() {
    // Only the taken edge is evaluated, so the phi folds to a constant.
    pass_test(
        "propconst",
        r#"
func i64 @f() {
  %entry:
    %cond = scmp lt i64 1, i64 2
    branch i1 %cond, label %then, label %else
  %then:
    goto label %end
  %else:
    goto label %end
  %end:
    %r = phi i64 [label %then : 7], [label %else : 8]
    return i64 %r
}"#,
        r#"
func i64 @f() {
  %entry:
    goto label %then
  %then:
    goto label %end
  %end:
    return i64 7
}"#,
    );
}

#[test]
fn dead_function_elimination() {
    pass_test(
        "deadfuncelim",
        r#"
func i64 @c() {
  %entry:
    return i64 3
}
pub func i64 @main() {
  %entry:
    %r = call i64 @a, i64 1
    return i64 %r
}
func i64 @a(i64 %x) {
  %entry:
    %r = call i64 @b, i64 %x
    return i64 %r
}
func i64 @b(i64 %x) {
  %entry:
    return i64 %x
}"#,
        r#"
pub func i64 @main() {
  %entry:
    %r = call i64 @a, i64 1
    return i64 %r
}
func i64 @a(i64 %x) {
  %entry:
    %r = call i64 @b, i64 %x
    return i64 %r
}
func i64 @b(i64 %x) {
  %entry:
    return i64 %x
}"#,
    );
}

#[test]
fn global_dce() {
    pass_test(
        "globaldce",
        r#"
global @used = i64 1
global @unused = i64 2
pub func i64 @main() {
  %entry:
    %v = load i64, ptr @used
    return i64 %v
}"#,
        r#"
global @used = i64 1
pub func i64 @main() {
  %entry:
    %v = load i64, ptr @used
    return i64 %v
}"#,
    );
}

#[test]
fn dce_removes_phi_cycles() {
    pass_test(
        "dce",
        r#"
func i64 @f() {
  %entry:
    goto label %loop
  %loop:
    %dead = phi i64 [label %entry : 0], [label %loop : %dead.next]
    %dead.next = add i64 %dead, i64 1
    %live = phi i64 [label %entry : 0], [label %loop : %live.next]
    %live.next = add i64 %live, i64 2
    %cond = scmp lt i64 %live.next, i64 10
    branch i1 %cond, label %loop, label %end
  %end:
    return i64 %live.next
}"#,
        r#"
func i64 @f() {
  %entry:
    goto label %loop
  %loop:
    %live = phi i64 [label %entry : 0], [label %loop : %live.next]
    %live.next = add i64 %live, i64 2
    %cond = scmp lt i64 %live.next, i64 10
    branch i1 %cond, label %loop, label %end
  %end:
    return i64 %live.next
}"#,
    );
}

#[test]
fn simplifycfg_folds_and_merges() {
    pass_test(
        "simplifycfg",
        r#"
func i64 @f() {
  %entry:
    branch i1 1, label %then, label %else
  %then:
    %a = add i64 1, i64 2
    goto label %end
  %else:
    goto label %end
  %end:
    %r = phi i64 [label %then : %a], [label %else : 0]
    return i64 %r
}"#,
        r#"
func i64 @f() {
  %entry:
    %a = add i64 1, i64 2
    return i64 %a
}"#,
    );
}

#[test]
fn split_critical_edges() {
    pass_test(
        "splitcriticaledges",
        r#"
func void @main() {
  %entry:
    branch i1 undef, label %if, label %end
  %if:
    goto label %end
  %end:
    return
}"#,
        r#"
func void @main() {
  %entry:
    branch i1 undef, label %if, label %tmp
  %if:
    goto label %end
  %tmp:
    goto label %end
  %end:
    return
}"#,
    );
}

#[test]
fn mem2reg_promotes_scalars() {
    pass_test(
        "memtoreg, dce",
        r#"
func i64 @f(i1 %c) {
  %entry:
    %slot = alloca i64, i32 1
    store ptr %slot, i64 1
    branch i1 %c, label %then, label %end
  %then:
    store ptr %slot, i64 2
    goto label %end
  %end:
    %r = load i64, ptr %slot
    return i64 %r
}"#,
        r#"
func i64 @f(i1 %c) {
  %entry:
    branch i1 %c, label %then, label %end
  %then:
    goto label %end
  %end:
    %promoted = phi i64 [label %entry : 1], [label %then : 2]
    return i64 %promoted
}"#,
    );
}

#[test]
fn sroa_splits_aggregates() {
    pass_test(
        "sroa, memtoreg, dce",
        r#"
func i64 @f() {
  %entry:
    %pair = alloca { i64, i64 }, i32 1
    %first = getelementptr inbounds { i64, i64 }, ptr %pair, i64 0, 0
    %second = getelementptr inbounds { i64, i64 }, ptr %pair, i64 0, 1
    store ptr %first, i64 3
    store ptr %second, i64 4
    %a = load i64, ptr %first
    %b = load i64, ptr %second
    %sum = add i64 %a, i64 %b
    return i64 %sum
}"#,
        r#"
func i64 @f() {
  %entry:
    %sum = add i64 3, i64 4
    return i64 %sum
}"#,
    );
}

#[test]
fn instcombine_identities() {
    // The chain collapses completely: the or of zero is the value itself.
    pass_test(
        "instcombine",
        r#"
func i64 @f(i64 %x) {
  %entry:
    %a = add i64 %x, i64 0
    %b = mul i64 %a, i64 1
    %c = sub i64 %b, i64 %b
    %d = or i64 %c, i64 %x
    return i64 %d
}"#,
        r#"
func i64 @f(i64 %x) {
  %entry:
    return i64 %x
}"#,
    );
}

#[test]
fn gvn_removes_redundancy() {
    pass_test(
        "gvn",
        r#"
func i64 @f(i64 %x, i64 %y) {
  %entry:
    %a = add i64 %x, i64 %y
    %b = add i64 %x, i64 %y
    %c = add i64 %a, i64 %b
    return i64 %c
}"#,
        r#"
func i64 @f(i64 %x, i64 %y) {
  %entry:
    %a = add i64 %x, i64 %y
    %c = add i64 %a, i64 %a
    return i64 %c
}"#,
    );
}

#[test]
fn unify_returns() {
    pass_test(
        "unifyreturns",
        r#"
func i64 @f(i1 %c) {
  %entry:
    branch i1 %c, label %then, label %else
  %then:
    return i64 1
  %else:
    return i64 2
}"#,
        r#"
func i64 @f(i1 %c) {
  %entry:
    branch i1 %c, label %then, label %else
  %then:
    goto label %return.unified
  %else:
    goto label %return.unified
  %return.unified:
    %retval = phi i64 [label %then : 1], [label %else : 2]
    return i64 %retval
}"#,
    );
}

#[test]
fn split_returns_undoes_the_funnel() {
    pass_test(
        "splitreturns",
        r#"
func i64 @f(i1 %c) {
  %entry:
    branch i1 %c, label %then, label %else
  %then:
    goto label %exit
  %else:
    goto label %exit
  %exit:
    %retval = phi i64 [label %then : 1], [label %else : 2]
    return i64 %retval
}"#,
        r#"
func i64 @f(i1 %c) {
  %entry:
    branch i1 %c, label %then, label %else
  %then:
    return i64 1
  %else:
    return i64 2
}"#,
    );
}

#[test]
fn tail_recursion_elimination() {
    pass_test(
        "tre",
        r#"
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
        r#"
func i64 @sum(i64 %n, i64 %acc) {
  %tre.entry:
    goto label %entry
  %entry:
    %n.tre = phi i64 [label %tre.entry : %n], [label %rec : %n.dec]
    %acc.tre = phi i64 [label %tre.entry : %acc], [label %rec : %acc.next]
    %done = scmp eq i64 %n.tre, i64 0
    branch i1 %done, label %base, label %rec
  %base:
    return i64 %acc.tre
  %rec:
    %n.dec = sub i64 %n.tre, i64 1
    %acc.next = add i64 %acc.tre, i64 %n.tre
    goto label %entry
}"#,
    );
}

#[test]
fn loop_rotation() {
    pass_test(
        "loopro",
        r#"
func i64 @count() {
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
    %r = phi i64 [label %header : %n]
    return i64 %r
}"#,
        r#"
func i64 @count() {
  %entry:
    %guard = scmp lt i64 0, i64 10
    branch i1 %guard, label %header, label %end
  %header:
    %n = phi i64 [label %entry : 0], [label %body : %n.next]
    goto label %body
  %body:
    %n.next = add i64 %n, i64 1
    %cond = scmp lt i64 %n.next, i64 10
    branch i1 %cond, label %header, label %end
  %end:
    %r = phi i64 [label %entry : 0], [label %body : %n.next]
    return i64 %r
}"#,
    );
}

#[test]
fn inliner_inlines_small_callees() {
    pass_test(
        "inline(dce)",
        r#"
pub func i64 @main() {
  %entry:
    %r = call i64 @double, i64 21
    return i64 %r
}
func i64 @double(i64 %x) {
  %entry:
    %r = add i64 %x, i64 %x
    return i64 %r
}"#,
        r#"
pub func i64 @main() {
  %entry:
    goto label %inline.entry
  %inline.entry:
    %r.0 = add i64 21, i64 21
    goto label %inline.cont
  %inline.cont:
    return i64 %r.0
}
func i64 @double(i64 %x) {
  %entry:
    %r = add i64 %x, i64 %x
    return i64 %r
}"#,
    );
}

#[test]
fn pass_idempotency() {
    let program = r#"
struct @pair { i64, i64 }

pub func i64 @main(i1 %c, i64 %x) {
  %entry:
    %slot = alloca i64, i32 1
    store ptr %slot, i64 %x
    %pair = alloca @pair, i32 1
    %first = getelementptr inbounds @pair, ptr %pair, i64 0, 0
    store ptr %first, i64 1
    branch i1 %c, label %then, label %else
  %then:
    %a = add i64 %x, i64 0
    goto label %loop
  %loop:
    %n = phi i64 [label %then : %a], [label %loop : %n.next]
    %n.next = add i64 %n, i64 1
    %cond = scmp lt i64 %n.next, i64 10
    branch i1 %cond, label %loop, label %join
  %else:
    %v = load i64, ptr %slot
    goto label %join
  %join:
    %r = phi i64 [label %loop : %n.next], [label %else : %v]
    return i64 %r
}
func i64 @helper(i64 %k) {
  %entry:
    %done = scmp eq i64 %k, i64 0
    branch i1 %done, label %base, label %rec
  %base:
    return i64 0
  %rec:
    %k.dec = sub i64 %k, i64 1
    %r = call i64 @helper, i64 %k.dec
    return i64 %r
}"#;
    for pass in [
        "dce",
        "propconst",
        "simplifycfg",
        "memtoreg",
        "sroa",
        "instcombine",
        "gvn",
        "tre",
        "loopro",
        "unifyreturns",
        "splitcriticaledges",
        "deadfuncelim",
        "globaldce",
    ] {
        idempotency_test(pass, program);
    }
}

#[test]
fn pipeline_parse_and_print() {
    let pipeline = Pipeline::parse("inline[maxsize: 64](sroa, memtoreg), dce, deadfuncelim").unwrap();
    assert_eq!(
        pipeline.to_string(),
        "inline[maxsize: 64](sroa, memtoreg), dce, deadfuncelim"
    );
}

#[test]
fn pipeline_errors_carry_positions() {
    let error = Pipeline::parse("dce, nosuchpass").unwrap_err();
    assert!(error.to_string().starts_with("1:6"), "{error}");
    let error = Pipeline::parse("dce, \"unterminated").unwrap_err();
    assert!(error.to_string().contains("unterminated"), "{error}");
}

#[test]
fn foreach_sugar() {
    let pipeline = Pipeline::parse("dce").unwrap();
    assert_eq!(pipeline.to_string(), "dce");
    let explicit = Pipeline::parse("foreach(dce, instcombine)").unwrap();
    assert_eq!(explicit.to_string(), "foreach(dce, instcombine)");
}
