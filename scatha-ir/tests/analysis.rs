use scatha_ir::analysis::{CallGraph, LiveSets, PointerAnalysis};
use scatha_ir::{parse, Value};

#[test]
fn dominance() {
    let (_, module) = parse(
        r#"
func i64 @f(i1 %c) {
  %entry:
    branch i1 %c, label %then, label %else
  %then:
    goto label %end
  %else:
    goto label %end
  %end:
    return i64 0
}"#,
    )
    .unwrap();
    let func = module.function(module.function_by_name("f").unwrap());
    let blocks = func.blocks();
    let (entry, then, els, end) = (blocks[0], blocks[1], blocks[2], blocks[3]);
    let dom = func.dominator_tree();
    assert!(dom.dominates(entry, end));
    assert!(dom.dominates(entry, then));
    assert!(!dom.dominates(then, end));
    assert_eq!(dom.idom(end), Some(entry));
    assert_eq!(dom.idom(then), Some(entry));
    // The merge point is in the frontier of both arms.
    assert_eq!(dom.frontier(then), &[end]);
    assert_eq!(dom.frontier(els), &[end]);
}

#[test]
fn liveness() {
    let (_, module) = parse(
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
    )
    .unwrap();
    let func = module.function(module.function_by_name("f").unwrap());
    let live = LiveSets::compute(func);
    let blocks = func.blocks();
    let entry = blocks[0];
    let n = Value::Inst(func.block_insts(entry)[0]);
    let param = Value::Param(0);

    let entry_sets = live.find(entry).unwrap();
    assert!(entry_sets.live_in.contains(&param));
    assert!(entry_sets.live_out.contains(&n));

    let then_sets = live.find(blocks[1]).unwrap();
    assert!(then_sets.live_in.contains(&n));
    assert!(then_sets.live_out.contains(&n));

    let end_sets = live.find(blocks[3]).unwrap();
    assert!(end_sets.live_in.contains(&n));
}

#[test]
fn loop_forest() {
    let (_, module) = parse(
        r#"
func i64 @f() {
  %entry:
    goto label %outer
  %outer:
    %i = phi i64 [label %entry : 0], [label %outer.latch : %i.next]
    goto label %inner
  %inner:
    %j = phi i64 [label %outer : 0], [label %inner : %j.next]
    %j.next = add i64 %j, i64 1
    %inner.cond = scmp lt i64 %j.next, i64 3
    branch i1 %inner.cond, label %inner, label %outer.latch
  %outer.latch:
    %i.next = add i64 %i, i64 1
    %outer.cond = scmp lt i64 %i.next, i64 3
    branch i1 %outer.cond, label %outer, label %end
  %end:
    return i64 0
}"#,
    )
    .unwrap();
    let func = module.function(module.function_by_name("f").unwrap());
    let forest = func.loop_forest();
    assert_eq!(forest.loops().len(), 2);
    let blocks = func.blocks();
    let (outer, inner) = (blocks[1], blocks[2]);
    assert_eq!(forest.depth(outer), 1);
    assert_eq!(forest.depth(inner), 2);
    let inner_loop = forest.loop_with_header(inner).unwrap();
    assert!(inner_loop.parent.is_some());
    let outer_loop = forest.loop_with_header(outer).unwrap();
    assert!(outer_loop.blocks.contains(&inner));
}

#[test]
fn call_graph_sccs() {
    let (_, module) = parse(
        r#"
func i64 @leaf() {
  %entry:
    return i64 1
}
func i64 @even(i64 %n) {
  %entry:
    %r = call i64 @odd, i64 %n
    return i64 %r
}
func i64 @odd(i64 %n) {
  %entry:
    %r = call i64 @even, i64 %n
    %l = call i64 @leaf
    return i64 %r
}"#,
    )
    .unwrap();
    let graph = CallGraph::compute(&module);
    let even = module.function_by_name("even").unwrap();
    let odd = module.function_by_name("odd").unwrap();
    let leaf = module.function_by_name("leaf").unwrap();
    assert!(graph.is_recursive(even));
    assert!(graph.is_recursive(odd));
    assert!(!graph.is_recursive(leaf));
    // Callees come before callers.
    let leaf_position = graph
        .sccs()
        .iter()
        .position(|scc| scc.contains(&leaf))
        .unwrap();
    let cycle_position = graph
        .sccs()
        .iter()
        .position(|scc| scc.contains(&even))
        .unwrap();
    assert!(leaf_position < cycle_position);
    assert_eq!(graph.sccs()[cycle_position].len(), 2);
}

#[test]
fn pointer_provenance() {
    let (ctx, module) = parse(
        r#"
func i64 @f() {
  %entry:
    %slot = alloca i64, i32 4
    %elem = getelementptr inbounds i64, ptr %slot, i64 2
    %v = load i64, ptr %elem
    return i64 %v
}"#,
    )
    .unwrap();
    let func = module.function(module.function_by_name("f").unwrap());
    let analysis = PointerAnalysis::compute(&ctx, func);
    let entry = func.entry();
    let slot = Value::Inst(func.block_insts(entry)[0]);
    let elem = Value::Inst(func.block_insts(entry)[1]);
    let slot_info = analysis.get(slot).unwrap();
    assert_eq!(slot_info.align, 8);
    assert_eq!(slot_info.valid_size, Some(32));
    assert!(slot_info.nonnull);
    let elem_info = analysis.get(elem).unwrap();
    assert_eq!(elem_info.provenance.unwrap().origin, slot);
    assert_eq!(elem_info.provenance.unwrap().offset, Some(16));
    assert_eq!(elem_info.valid_size, Some(16));
}
