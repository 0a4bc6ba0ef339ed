//! Topological order of the reachable blocks with loop metadata.
//!
//! Back edges are the edges a depth-first traversal from the entry block
//! finds pointing at a block still on the traversal stack; their targets
//! are loop heads. Every other edge is a forward edge, and the order places
//! each block after the sources of all its forward edges. A loop body is
//! scheduled contiguously right after its head, so `loop_ends[i]` (one past
//! the last position of the loop headed at `i`) delimits the range a
//! restartable fixed-point iteration has to revisit.
use cranelift_entity::{packed_option::PackedOption, SecondaryMap};
use mirflow_ir::{BitSet, BlockId, BlockIndex, MirGraph};
use rustc_hash::FxHashSet;
use smallvec::SmallVec;

use crate::domtree::DomTree;

#[derive(Debug, Default, Clone)]
pub struct TopologicalOrder {
    order: Vec<BlockId>,
    loop_ends: Vec<u32>,
    indexes: SecondaryMap<BlockId, PackedOption<BlockIndex>>,
    nesting_depth: SecondaryMap<BlockId, u16>,
}

#[derive(Debug)]
struct LoopInfo {
    head: BlockId,
    body: BitSet<BlockId>,
}

struct ActiveLoop {
    info: usize,
    head_pos: usize,
    remaining: usize,
}

impl TopologicalOrder {
    pub fn compute(graph: &MirGraph, domtree: &DomTree) -> Self {
        let mut topo = Self::default();
        let Some(entry) = graph.entry() else {
            return topo;
        };

        let dfs = DfsTree::compute(graph, entry);
        let loops = collect_loops(graph, domtree, &dfs);
        let back_edges = &dfs.back_edges;

        // A cycle entered from outside at a block other than its head waits
        // until every such entry has been scheduled, like the head does.
        let mut entry_holds: SecondaryMap<BlockId, SmallVec<[BlockId; 1]>> = SecondaryMap::new();

        let mut loop_of_head: SecondaryMap<BlockId, PackedOption<LoopIdx>> = SecondaryMap::new();
        for (idx, lp) in loops.iter().enumerate() {
            loop_of_head[lp.head] = PackedOption::from(LoopIdx(idx as u32));
            for block in lp.body.iter() {
                topo.nesting_depth[block] += 1;
                if block == lp.head {
                    continue;
                }
                for pred in graph.preds_of(block) {
                    if dfs.is_reachable(pred) && !lp.body.contains(pred) {
                        entry_holds[pred].push(lp.head);
                    }
                }
            }
        }

        // Count forward edges into every reachable block.
        let mut in_degree: SecondaryMap<BlockId, u32> = SecondaryMap::new();
        for &block in domtree.rpo() {
            for succ in graph.succs_of(block) {
                if !back_edges.contains(&(block, succ)) {
                    in_degree[succ] += 1;
                }
            }
            for &head in &entry_holds[block] {
                in_degree[head] += 1;
            }
        }

        let mut scheduled: BitSet<BlockId> = BitSet::new();
        let mut ready = vec![entry];
        let mut active: Vec<ActiveLoop> = Vec::new();
        topo.loop_ends = Vec::with_capacity(domtree.rpo().len());

        while !ready.is_empty() {
            let block = pick_ready(&mut ready, &active, &loops);
            let pos = topo.order.len();
            topo.order.push(block);
            topo.loop_ends.push(0);
            topo.indexes[block] = BlockIndex(pos as u32).into();
            scheduled.insert(block);

            if let Some(lp) = loop_of_head[block].expand() {
                let info = lp.0 as usize;
                let remaining = loops[info]
                    .body
                    .iter()
                    .filter(|&b| !scheduled.contains(b))
                    .count()
                    + 1;
                active.push(ActiveLoop {
                    info,
                    head_pos: pos,
                    remaining,
                });
            }
            for lp in active.iter_mut() {
                if loops[lp.info].body.contains(block) {
                    lp.remaining -= 1;
                }
            }
            while let Some(top) = active.last() {
                if top.remaining != 0 {
                    break;
                }
                topo.loop_ends[top.head_pos] = topo.order.len() as u32;
                active.pop();
            }

            let released = graph
                .succs_of(block)
                .filter(|&succ| !back_edges.contains(&(block, succ)))
                .chain(entry_holds[block].iter().copied());
            for succ in released.collect::<SmallVec<[BlockId; 4]>>() {
                in_degree[succ] -= 1;
                if in_degree[succ] == 0 {
                    ready.push(succ);
                }
            }
        }

        // Loops whose bodies never completed end with the order.
        for lp in active {
            topo.loop_ends[lp.head_pos] = topo.order.len() as u32;
        }

        debug_assert_eq!(topo.order.len(), domtree.rpo().len());
        tracing::debug!(
            blocks = topo.order.len(),
            loops = loops.len(),
            "computed topological order"
        );
        topo
    }

    /// Stores the order, loop ends, block indexes and nesting depths in
    /// `graph`.
    pub fn write_to(&self, graph: &mut MirGraph) {
        graph.topological_order = self.order.clone();
        graph.loop_ends = self.loop_ends.clone();
        graph.topological_order_indexes = self.indexes.clone();
        for block in graph.blocks.keys().collect::<Vec<_>>() {
            graph.block_mut(block).nesting_depth = self.nesting_depth[block];
        }
    }

    pub fn order(&self) -> &[BlockId] {
        &self.order
    }

    pub fn loop_ends(&self) -> &[u32] {
        &self.loop_ends
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn index_of(&self, block: BlockId) -> Option<usize> {
        self.indexes[block].expand().map(|i| i.0 as usize)
    }

    pub fn nesting_depth(&self, block: BlockId) -> u16 {
        self.nesting_depth[block]
    }

    /// Returns `true` if the block at `pos` heads a loop.
    pub fn is_loop_head(&self, pos: usize) -> bool {
        self.loop_ends[pos] != 0
    }

    /// The predecessor of `block` that comes first in the order.
    pub fn first_topological_pred(&self, graph: &MirGraph, block: BlockId) -> Option<BlockId> {
        graph
            .preds_of(block)
            .filter_map(|pred| self.index_of(pred).map(|idx| (idx, pred)))
            .min()
            .map(|(_, pred)| pred)
    }

    pub fn loop_repeating_iter<'a>(&'a self, graph: &'a MirGraph) -> LoopRepeatingIter<'a> {
        LoopRepeatingIter::new(self, graph)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LoopIdx(u32);
cranelift_entity::entity_impl!(LoopIdx);

/// Depth-first spanning tree from the entry block.
#[derive(Default)]
struct DfsTree {
    back_edges: FxHashSet<(BlockId, BlockId)>,
    /// For every loop head, the sources of its back edges.
    back_sources: SecondaryMap<BlockId, SmallVec<[BlockId; 2]>>,
    /// Preorder number, starting at 1; 0 for unreachable blocks.
    pre: SecondaryMap<BlockId, u32>,
    /// Largest preorder number in the subtree of each block.
    last: SecondaryMap<BlockId, u32>,
}

impl DfsTree {
    /// Classifies edges with an iterative depth-first traversal. An edge to
    /// a block still on the traversal stack is a back edge.
    fn compute(graph: &MirGraph, entry: BlockId) -> Self {
        let mut dfs = Self::default();
        let mut on_stack: BitSet<BlockId> = BitSet::new();
        let mut next_pre = 1;

        let succs = |block| graph.succs_of(block).collect::<SmallVec<[BlockId; 4]>>();
        let mut stack = vec![(entry, succs(entry), 0usize)];
        dfs.pre[entry] = next_pre;
        on_stack.insert(entry);

        while let Some((block, block_succs, next)) = stack.last_mut() {
            let block = *block;
            let Some(&succ) = block_succs.get(*next) else {
                dfs.last[block] = next_pre;
                on_stack.remove(block);
                stack.pop();
                continue;
            };
            *next += 1;

            if dfs.pre[succ] == 0 {
                next_pre += 1;
                dfs.pre[succ] = next_pre;
                on_stack.insert(succ);
                stack.push((succ, succs(succ), 0));
            } else if on_stack.contains(succ) && dfs.back_edges.insert((block, succ)) {
                dfs.back_sources[succ].push(block);
            }
        }
        dfs
    }

    fn is_reachable(&self, block: BlockId) -> bool {
        self.pre[block] != 0
    }

    /// Returns `true` if `block` lies in the spanning subtree of `root`.
    fn is_descendant(&self, block: BlockId, root: BlockId) -> bool {
        let pre = self.pre[block];
        pre != 0 && self.pre[root] <= pre && pre <= self.last[root]
    }
}

/// Builds one loop per head. The body holds the head and the blocks below
/// it in the spanning tree that reach one of its back-edge sources without
/// passing through it. A cycle with several entries keeps the entries that
/// are tree descendants of the head; for reducible loops the body is the
/// natural loop.
fn collect_loops(graph: &MirGraph, domtree: &DomTree, dfs: &DfsTree) -> Vec<LoopInfo> {
    let mut loops = Vec::new();
    for &head in domtree.rpo() {
        let sources = &dfs.back_sources[head];
        if sources.is_empty() {
            continue;
        }

        let mut body = BitSet::new();
        body.insert(head);
        let mut worklist: Vec<BlockId> = sources.to_vec();
        while let Some(block) = worklist.pop() {
            if !body.insert(block) {
                continue;
            }
            worklist.extend(
                graph
                    .preds_of(block)
                    .filter(|&pred| dfs.is_descendant(pred, head) && !body.contains(pred)),
            );
        }

        if sources.iter().any(|&src| !domtree.dominates(head, src)) {
            tracing::trace!(%head, "loop with several entries");
        }
        loops.push(LoopInfo { head, body });
    }
    loops
}

/// Takes the first ready block of the innermost active loop, falling back to
/// enclosing loops and finally to the oldest ready block.
fn pick_ready(ready: &mut Vec<BlockId>, active: &[ActiveLoop], loops: &[LoopInfo]) -> BlockId {
    for lp in active.iter().rev() {
        let body = &loops[lp.info].body;
        if let Some(pos) = ready.iter().position(|&b| body.contains(b)) {
            return ready.remove(pos);
        }
    }
    ready.remove(0)
}

/// Walks the topological order, revisiting a loop until its body stops
/// reporting changes.
///
/// A block is returned when it has not been visited yet or when a
/// predecessor reported a change after its last visit. When the walk reaches
/// the end of a loop it restarts at the head if the loop has not been
/// recalculated yet or if a change reached the head through a back edge.
/// Callers pass `had_change` for the block returned by the previous call.
pub struct LoopRepeatingIter<'a> {
    topo: &'a TopologicalOrder,
    graph: &'a MirGraph,
    idx: usize,
    visited: BitSet<BlockId>,
    /// Heads of the loops entered so far, with a flag telling whether the
    /// loop is being recalculated.
    loop_head_stack: Vec<(usize, bool)>,
}

impl<'a> LoopRepeatingIter<'a> {
    fn new(topo: &'a TopologicalOrder, graph: &'a MirGraph) -> Self {
        Self {
            topo,
            graph,
            idx: 0,
            visited: BitSet::new(),
            loop_head_stack: Vec::new(),
        }
    }

    pub fn next(&mut self, had_change: bool) -> Option<BlockId> {
        let order = self.topo.order();
        if self.idx != 0 {
            let last = order[self.idx - 1];
            self.visited.insert(last);
            if had_change {
                for child in self.graph.succs_of(last) {
                    self.visited.remove(child);
                }
            }
        }

        loop {
            // Leave finished loops, restarting those that need another pass.
            while let Some(&(head_idx, recalculated)) = self.loop_head_stack.last() {
                if self.topo.loop_ends[head_idx] as usize != self.idx {
                    break;
                }
                self.loop_head_stack.pop();
                let head = order[head_idx];
                if !recalculated || !self.visited.contains(head) {
                    tracing::trace!(%head, "repeating loop");
                    self.loop_head_stack.push((head_idx, true));
                    self.idx = head_idx + 1;
                    return Some(head);
                }
            }

            if self.idx == order.len() {
                return None;
            }

            let idx = self.idx;
            self.idx += 1;
            let block = order[idx];
            if !self.visited.contains(block) {
                if self.topo.is_loop_head(idx) {
                    self.loop_head_stack.push((idx, false));
                }
                return Some(block);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirflow_ir::builder::test_util::*;

    fn compute(graph: &mut MirGraph) -> TopologicalOrder {
        let mut domtree = DomTree::new();
        domtree.compute(graph);
        let topo = TopologicalOrder::compute(graph, &domtree);
        topo.write_to(graph);
        topo
    }

    #[test]
    fn self_loop_ends_at_its_successor() {
        let mut b = TestGraphBuilder::new(1);
        let (entry, exit) = (b.entry(), b.exit());
        let [a, bb] = b.code_blocks();
        b.goto(entry, a);
        b.branch(a, bb, a);
        b.goto(bb, exit);
        let mut graph = b.build();

        let topo = compute(&mut graph);
        assert_eq!(topo.order(), &[entry, a, bb, exit]);
        assert_eq!(topo.loop_ends(), &[0, 2, 0, 0]);
        assert_eq!(graph.block(a).nesting_depth, 1);
        assert_eq!(graph.block(bb).nesting_depth, 0);
        assert_eq!(graph.topological_index(bb), Some(2));
    }

    #[test]
    fn two_block_loop_ends_past_latch() {
        let mut b = TestGraphBuilder::new(1);
        let (entry, exit) = (b.entry(), b.exit());
        let [a, bb] = b.code_blocks();
        b.goto(entry, a);
        b.goto(a, bb);
        b.branch(bb, exit, a);
        let mut graph = b.build();

        let topo = compute(&mut graph);
        assert_eq!(topo.order(), &[entry, a, bb, exit]);
        assert_eq!(topo.loop_ends(), &[0, 3, 0, 0]);
        assert_eq!(topo.first_topological_pred(&graph, a), Some(entry));
    }

    #[test]
    fn loop_body_is_contiguous() {
        // entry -> head; head -> {body1, after}; body1 -> body2 -> head
        let mut b = TestGraphBuilder::new(1);
        let (entry, exit) = (b.entry(), b.exit());
        let [head, after, body1, body2] = b.code_blocks();
        b.goto(entry, head);
        b.branch(head, after, body1);
        b.goto(body1, body2);
        b.goto(body2, head);
        b.goto(after, exit);
        let mut graph = b.build();

        let topo = compute(&mut graph);
        assert_eq!(topo.order(), &[entry, head, body1, body2, after, exit]);
        assert_eq!(topo.loop_ends(), &[0, 4, 0, 0, 0, 0]);
    }

    #[test]
    fn nested_loops() {
        // outer: o_head -> i_head; i_head -> {i_body, o_latch};
        // i_body -> i_head; o_latch -> {o_head, exit}
        let mut b = TestGraphBuilder::new(1);
        let (entry, exit) = (b.entry(), b.exit());
        let [o_head, i_head, i_body, o_latch] = b.code_blocks();
        b.goto(entry, o_head);
        b.goto(o_head, i_head);
        b.branch(i_head, o_latch, i_body);
        b.goto(i_body, i_head);
        b.branch(o_latch, exit, o_head);
        let mut graph = b.build();

        let topo = compute(&mut graph);
        assert_eq!(topo.order(), &[entry, o_head, i_head, i_body, o_latch, exit]);
        assert_eq!(topo.loop_ends(), &[0, 5, 4, 0, 0, 0]);
        assert_eq!(topo.nesting_depth(i_body), 2);
        assert_eq!(topo.nesting_depth(o_latch), 1);
    }

    #[test]
    fn two_back_edges_form_one_loop() {
        let mut b = TestGraphBuilder::new(1);
        let (entry, exit) = (b.entry(), b.exit());
        let [head, left, right] = b.code_blocks();
        b.goto(entry, head);
        b.branch(head, left, right);
        b.branch(left, exit, head);
        b.goto(right, head);
        let mut graph = b.build();

        let topo = compute(&mut graph);
        assert_eq!(topo.order(), &[entry, head, left, right, exit]);
        assert_eq!(topo.loop_ends(), &[0, 4, 0, 0, 0]);
    }

    #[test]
    fn forward_edges_are_respected() {
        let mut b = TestGraphBuilder::new(1);
        let (entry, exit) = (b.entry(), b.exit());
        let [a, c, d, e] = b.code_blocks();
        b.goto(entry, a);
        b.branch(a, d, c);
        b.goto(c, d);
        b.goto(d, e);
        b.branch(e, exit, a);
        let mut graph = b.build();

        let topo = compute(&mut graph);
        assert_eq!(topo.order(), &[entry, a, c, d, e, exit]);
        for &block in topo.order() {
            for succ in graph.succs_of(block) {
                let (from, to) = (topo.index_of(block).unwrap(), topo.index_of(succ).unwrap());
                // Only the back edge e -> a may point backwards.
                assert!(from < to || (block, succ) == (e, a));
            }
        }
        assert_eq!(topo.loop_ends()[1], 5);
    }

    #[test]
    fn cycle_with_two_entries_is_scheduled_as_one_loop() {
        // entry -> a; a -> {b, c}; b -> c; c -> d; d -> {e, b}; e -> exit
        for b_first in [false, true] {
            let mut b = TestGraphBuilder::new(1);
            let (entry, exit) = (b.entry(), b.exit());
            let [a, bb, c, d, e] = b.code_blocks();
            b.goto(entry, a);
            if b_first {
                b.branch(a, bb, c);
            } else {
                b.branch(a, c, bb);
            }
            b.goto(bb, c);
            b.goto(c, d);
            b.branch(d, e, bb);
            b.goto(e, exit);
            let mut graph = b.build();

            let topo = compute(&mut graph);
            assert_eq!(topo.len(), 7);
            for &block in topo.order() {
                let from = topo.index_of(block).unwrap();
                for succ in graph.succs_of(block) {
                    let to = topo.index_of(succ).unwrap();
                    if to <= from {
                        assert!(topo.is_loop_head(to), "{block} -> {succ}");
                        assert!(from < topo.loop_ends()[to] as usize, "{block} -> {succ}");
                    }
                }
            }

            let head = [bb, c]
                .into_iter()
                .min_by_key(|&block| topo.index_of(block))
                .unwrap();
            let head_pos = topo.index_of(head).unwrap();
            assert_eq!(topo.loop_ends()[head_pos] as usize, head_pos + 3);
            for block in [bb, c, d] {
                assert_eq!(topo.nesting_depth(block), 1);
            }
            assert_eq!(topo.nesting_depth(e), 0);
            assert_eq!(&topo.order()[5..], &[e, exit]);
        }
    }

    /// Runs the iterator; the i-th returned block reports `changes[i]`.
    fn visits(graph: &MirGraph, topo: &TopologicalOrder, changes: &[bool]) -> Vec<BlockId> {
        let mut iter = topo.loop_repeating_iter(graph);
        let mut seen = vec![];
        let mut change = false;
        while let Some(block) = iter.next(change) {
            change = changes.get(seen.len()).copied().unwrap_or(false);
            seen.push(block);
        }
        seen
    }

    #[test]
    fn loop_repeating_iter_reruns_changed_loops() {
        let mut b = TestGraphBuilder::new(1);
        let (entry, exit) = (b.entry(), b.exit());
        let [head, body, after] = b.code_blocks();
        b.goto(entry, head);
        b.branch(head, after, body);
        b.goto(body, head);
        b.goto(after, exit);
        let mut graph = b.build();
        let topo = compute(&mut graph);
        assert_eq!(topo.order(), &[entry, head, body, after, exit]);

        // Without changes the loop head is recalculated once.
        assert_eq!(visits(&graph, &topo, &[]), vec![entry, head, body, head, after, exit]);

        // Changes in the body reach the head through the back edge and keep
        // the loop running until a round ends quietly.
        let changes = [false, false, true, true, true, false];
        assert_eq!(
            visits(&graph, &topo, &changes),
            vec![entry, head, body, head, body, head, after, exit]
        );
    }
}
