use scatha_ir::{parse, print_module};

/// Parsing the printed form again must reproduce it exactly; names are
/// explicit in the text, so the round trip is stable after one iteration.
fn round_trip(text: &str) {
    let (ctx, module) = parse(text).expect("input must parse");
    let printed = print_module(&ctx, &module);
    let (ctx2, module2) = parse(&printed)
        .unwrap_or_else(|error| panic!("printed module must parse: {error}\n{printed}"));
    let reprinted = print_module(&ctx2, &module2);
    assert_eq!(printed, reprinted);
}

#[test]
fn simple_function() {
    round_trip(
        r#"
func i64 @f(i64 %0) {
  %entry:
    %n = add i64 %0, i64 1
    %cmp.result = scmp eq i64 %0, i64 0
    branch i1 %cmp.result, label %then, label %else

  %then:
    goto label %end

  %else:
    goto label %end

  %end:
    %m = add i64 %n, i64 1
    return i64 %m
}"#,
    );
}

#[test]
fn phis_and_loops() {
    round_trip(
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
    return i64 %n
}"#,
    );
}

#[test]
fn memory_and_geps() {
    round_trip(
        r#"
struct @pair { i64, f64 }

func f64 @second(ptr %p) {
  %entry:
    %addr = getelementptr inbounds @pair, ptr %p, i64 0, 1
    %value = load f64, ptr %addr
    return f64 %value
}"#,
    );
}

#[test]
fn globals_and_foreign_functions() {
    round_trip(
        r#"
global @counter = i64 0

constant @limit = i64 100

ext func void @print(i64)

pub func void @main() {
  %entry:
    %value = load i64, ptr @counter
    call void @print, i64 %value
    return
}"#,
    );
}

#[test]
fn all_value_constructs() {
    round_trip(
        r#"
func i64 @kitchen(i64 %x, f64 %y, ptr %p) {
  %entry:
    %a = alloca i64, i32 1
    store ptr %a, i64 %x
    %l = load i64, ptr %a
    %neg = neg i64 %l
    %not = bnt i64 %neg
    %cast = sext i32 7 to i64
    %f = sitofp i64 %cast to f64
    %sum = fadd f64 %f, f64 %y
    %trunc = fptosi f64 %sum to i64
    %sel.cond = ucmp gt i64 %trunc, i64 0
    %sel = select i1 %sel.cond, i64 %trunc, i64 %not
    return i64 %sel
}"#,
    );
}

#[test]
fn aggregate_values() {
    round_trip(
        r#"
func i64 @agg() {
  %entry:
    %tuple = insert_value { i32, i32 } undef, i32 1, 0
    %full = insert_value { i32, i32 } %tuple, i32 2, 1
    %first = extract_value { i32, i32 } %full, 0
    %wide = zext i32 %first to i64
    return i64 %wide
}"#,
    );
}

#[test]
fn parse_errors_carry_positions() {
    let error = parse("func i64 @f( {").unwrap_err();
    let text = error.to_string();
    assert!(text.contains(':'), "position missing from: {text}");
}

#[test]
fn unknown_value_is_reported() {
    let error = parse(
        r#"
func i64 @f() {
  %entry:
    return i64 %missing
}"#,
    )
    .unwrap_err();
    assert!(error.to_string().contains("%missing"));
}

#[test]
fn duplicate_definitions_are_rejected() {
    assert!(parse(
        r#"
func void @f() {
  %entry:
    return
}
func void @f() {
  %entry:
    return
}"#,
    )
    .is_err());
}
