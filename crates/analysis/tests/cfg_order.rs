use mirflow_analysis::{DomTree, Pipeline, TopologicalOrder};
use mirflow_ir::{builder::test_util::TestGraphBuilder, BlockId, MirGraph};

fn order(graph: &mut MirGraph) -> (DomTree, TopologicalOrder) {
    let mut domtree = DomTree::new();
    domtree.compute(graph);
    let topo = TopologicalOrder::compute(graph, &domtree);
    topo.write_to(graph);
    (domtree, topo)
}

/// Every edge pointing backwards in `topo` must close a loop whose range
/// covers its source.
fn assert_valid_order(graph: &MirGraph, topo: &TopologicalOrder) {
    for &block in topo.order() {
        let from = topo.index_of(block).unwrap();
        for succ in graph.succs_of(block) {
            let to = topo.index_of(succ).unwrap();
            if to <= from {
                assert!(topo.is_loop_head(to), "{block} -> {succ} is not a back edge");
                assert!(from < topo.loop_ends()[to] as usize);
            }
        }
    }
}

fn visits(graph: &MirGraph, topo: &TopologicalOrder) -> Vec<BlockId> {
    let mut iter = topo.loop_repeating_iter(graph);
    let mut seen = vec![];
    while let Some(block) = iter.next(false) {
        seen.push(block);
    }
    seen
}

#[test]
fn diamond_dominators() {
    let mut b = TestGraphBuilder::new(1);
    let (entry, exit) = (b.entry(), b.exit());
    let [top, left, right, join] = b.code_blocks();
    b.goto(entry, top);
    b.branch(top, left, right);
    b.goto(left, join);
    b.goto(right, join);
    b.goto(join, exit);
    let mut graph = b.build();

    let mut domtree = DomTree::new();
    let frontiers = domtree.compute(&mut graph);

    assert_eq!(domtree.idom_of(top), Some(entry));
    assert_eq!(domtree.idom_of(left), Some(top));
    assert_eq!(domtree.idom_of(join), Some(top));
    assert_eq!(domtree.idom_of(exit), Some(join));
    assert!(domtree.strictly_dominates(entry, exit));
    assert!(!domtree.dominates(left, join));
    assert!(domtree.dominates(join, join));

    assert!(frontiers.in_frontier_of(join, left));
    assert!(frontiers.in_frontier_of(join, right));
    assert_eq!(frontiers.frontier_num_of(top), 0);

    // An immediate dominator always comes first in reverse post order.
    let rpo = domtree.rpo();
    for (pos, &block) in rpo.iter().enumerate().skip(1) {
        let idom = domtree.idom_of(block).unwrap();
        assert!(rpo[..pos].contains(&idom));
    }
}

#[test]
fn unreachable_blocks_have_no_dominator() {
    let mut b = TestGraphBuilder::new(1);
    let (entry, exit) = (b.entry(), b.exit());
    let [a, dead] = b.code_blocks();
    b.goto(entry, a);
    b.goto(a, exit);
    b.goto(dead, exit);
    let mut graph = b.build();

    let (domtree, topo) = order(&mut graph);
    assert!(!domtree.is_reachable(dead));
    assert_eq!(domtree.idom_of(exit), Some(a));
    assert_eq!(topo.index_of(dead), None);
    assert_eq!(topo.order(), &[entry, a, exit]);
}

#[test]
fn self_loop_is_repeated_once() {
    // entry -> A; A -> {A, B}; B -> exit
    let mut b = TestGraphBuilder::new(1);
    let (entry, exit) = (b.entry(), b.exit());
    let [a, bb] = b.code_blocks();
    b.goto(entry, a);
    b.branch(a, bb, a);
    b.goto(bb, exit);
    let mut graph = b.build();

    let pipeline = Pipeline::default_pipeline();
    pipeline.run(&mut graph).unwrap();
    assert_eq!(graph.topological_order, vec![entry, a, bb, exit]);
    assert_eq!(graph.loop_ends, vec![0, 2, 0, 0]);
    assert_eq!(graph.block(a).nesting_depth, 1);

    let (_, topo) = order(&mut graph);
    assert_valid_order(&graph, &topo);
    assert_eq!(visits(&graph, &topo), vec![entry, a, a, bb, exit]);
}

#[test]
fn nested_loops_with_side_exits() {
    // entry -> h1; h1 -> {h2, done}; h2 -> {b2, l1}; b2 -> {h2, exc};
    // l1 -> h1; exc -> done; done -> exit
    let mut b = TestGraphBuilder::new(1);
    let (entry, exit) = (b.entry(), b.exit());
    let [h1, h2, b2, l1, exc, done] = b.code_blocks();
    b.goto(entry, h1);
    b.branch(h1, h2, done);
    b.branch(h2, b2, l1);
    b.branch(b2, exc, h2);
    b.goto(l1, h1);
    b.goto(exc, done);
    b.goto(done, exit);
    let mut graph = b.build();

    let (_, topo) = order(&mut graph);
    assert_eq!(topo.len(), 8);
    assert_valid_order(&graph, &topo);

    let outer = topo.index_of(h1).unwrap();
    let inner = topo.index_of(h2).unwrap();
    assert!(topo.is_loop_head(outer) && topo.is_loop_head(inner));
    assert!(topo.loop_ends()[inner] <= topo.loop_ends()[outer]);
    assert_eq!(topo.nesting_depth(b2), 2);
    assert_eq!(topo.nesting_depth(l1), 1);
    assert_eq!(topo.nesting_depth(done), 0);

    // Each loop head is visited a second time even without changes.
    let seen = visits(&graph, &topo);
    assert_eq!(seen.iter().filter(|&&block| block == h1).count(), 2);
    assert!(seen.iter().filter(|&&block| block == h2).count() >= 2);
    assert_eq!(seen.last(), Some(&exit));
}
