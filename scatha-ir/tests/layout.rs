use rstest::rstest;
use scatha_ir::Context;

/// The first member's width decides whether `{ mᵢ, {i32,i32,i32}, i8 }`
/// packs to 20/4 or pads to 24/8.
#[rstest]
#[case(32, 20, 4)]
#[case(64, 24, 8)]
fn natural_struct_layout(#[case] first_bits: u32, #[case] size: u64, #[case] align: u64) {
    let mut ctx = Context::new();
    let first = ctx.int_type(first_bits);
    let i32t = ctx.int_type(32);
    let i8t = ctx.int_type(8);
    let inner = ctx.anonymous_struct(vec![i32t, i32t, i32t]);
    let outer = ctx.anonymous_struct(vec![first, inner, i8t]);
    assert_eq!(ctx.size_of(outer), size);
    assert_eq!(ctx.align_of(outer), align);
}

#[test]
fn member_offsets() {
    let mut ctx = Context::new();
    let i8t = ctx.int_type(8);
    let i64t = ctx.int_type(64);
    let s = ctx.anonymous_struct(vec![i8t, i64t, i8t]);
    assert_eq!(ctx.member_offset(s, 0), 0);
    assert_eq!(ctx.member_offset(s, 1), 8);
    assert_eq!(ctx.member_offset(s, 2), 16);
    assert_eq!(ctx.size_of(s), 24);
}

#[test]
fn arrays_multiply_the_element() {
    let mut ctx = Context::new();
    let i32t = ctx.int_type(32);
    let arr = ctx.array_type(i32t, 10);
    assert_eq!(ctx.size_of(arr), 40);
    assert_eq!(ctx.align_of(arr), 4);
}

#[test]
fn odd_integer_widths_round_up() {
    let mut ctx = Context::new();
    let i1 = ctx.int_type(1);
    let i24 = ctx.int_type(24);
    assert_eq!(ctx.size_of(i1), 1);
    assert_eq!(ctx.size_of(i24), 4);
    assert_eq!(ctx.align_of(i24), 4);
}

#[test]
fn empty_struct() {
    let mut ctx = Context::new();
    let empty = ctx.anonymous_struct(vec![]);
    assert_eq!(ctx.size_of(empty), 0);
    assert_eq!(ctx.align_of(empty), 1);
}
