//! This module contains dominator tree related structs.
//!
//! The algorithm is based on Keith D. Cooper., Timothy J. Harvey., and Ken Kennedy.: A Simple, Fast Dominance Algorithm:
//! <https://www.cs.rice.edu/~keith/EMBED/dom.pdf>

use cranelift_entity::{packed_option::PackedOption, SecondaryMap};
use mirflow_ir::{BitSet, BlockId, MirGraph};

#[derive(Default, Debug)]
pub struct DomTree {
    doms: SecondaryMap<BlockId, PackedOption<BlockId>>,
    rpo: Vec<BlockId>,
}

impl DomTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.doms.clear();
        self.rpo.clear();
    }

    /// Returns the immediate dominator of the `block`.
    /// Returns None if the `block` is unreachable from the entry block, or the `block` is the entry block itself.
    pub fn idom_of(&self, block: BlockId) -> Option<BlockId> {
        if self.rpo.first() == Some(&block) {
            return None;
        }
        self.doms[block].expand()
    }

    /// Returns `true` if block1 strictly dominates block2.
    pub fn strictly_dominates(&self, block1: BlockId, block2: BlockId) -> bool {
        let mut current_block = block2;
        while let Some(block) = self.idom_of(current_block) {
            if block == block1 {
                return true;
            }
            current_block = block;
        }

        false
    }

    /// Returns `true` if block1 dominates block2.
    pub fn dominates(&self, block1: BlockId, block2: BlockId) -> bool {
        if block1 == block2 {
            return self.is_reachable(block1);
        }

        self.strictly_dominates(block1, block2)
    }

    /// Computes the dominator tree of `graph` and writes the immediate
    /// dominators, dominance frontiers and `dominates_return` flags into its
    /// blocks. Unreachable blocks get no annotations.
    pub fn compute(&mut self, graph: &mut MirGraph) -> DFSet {
        self.compute_doms(graph);
        let df = self.compute_df(graph);

        for block in graph.blocks.keys().collect::<Vec<_>>() {
            let data = graph.block_mut(block);
            data.clear_annotations();
            data.idom = self.idom_of(block);
            data.dom_frontier = df.0[block].clone();
        }

        if let Some(exit) = graph.exit().filter(|&exit| self.is_reachable(exit)) {
            let mut dom = Some(exit);
            while let Some(block) = dom {
                graph.block_mut(block).dominates_return = true;
                dom = self.idom_of(block);
            }
        }

        tracing::debug!(
            method = %graph.method.pretty(),
            reachable = self.rpo.len(),
            "computed dominators"
        );
        df
    }

    /// Computes immediate dominators only, leaving `graph` untouched.
    pub fn compute_doms(&mut self, graph: &MirGraph) {
        self.clear();

        self.rpo = graph.post_order().collect();
        self.rpo.reverse();

        let block_num = self.rpo.len();

        let mut rpo_nums = SecondaryMap::with_capacity(block_num);
        for (i, &block) in self.rpo.iter().enumerate() {
            rpo_nums[block] = (block_num - i) as u32;
        }

        match self.rpo.first() {
            Some(&entry) => self.doms[entry] = entry.into(),
            None => return,
        }

        let mut changed = true;
        while changed {
            changed = false;
            for &block in self.rpo.iter().skip(1) {
                let processed_pred =
                    match graph.preds_of(block).find(|&pred| self.doms[pred].is_some()) {
                        Some(pred) => pred,
                        _ => continue,
                    };
                let mut new_dom = processed_pred;

                for pred in graph.preds_of(block) {
                    if pred != processed_pred && self.doms[pred].is_some() {
                        new_dom = self.intersect(new_dom, pred, &rpo_nums);
                    }
                }
                if Some(new_dom) != self.doms[block].expand() {
                    changed = true;
                    self.doms[block] = new_dom.into();
                }
            }
        }
    }

    /// Compute dominance frontiers of each blocks.
    pub fn compute_df(&self, graph: &MirGraph) -> DFSet {
        let mut df = DFSet::default();

        for &block in &self.rpo {
            let num_preds = graph.num_preds(block);
            assert!(
                num_preds > 0 || self.rpo[0] == block,
                "reachable {block} has no recorded predecessors"
            );
            if num_preds < 2 {
                continue;
            }
            for pred in graph.preds_of(block) {
                let mut runner = pred;
                while PackedOption::from(runner) != self.doms[block] && self.is_reachable(runner) {
                    df.0[runner].insert(block);
                    match self.idom_of(runner) {
                        Some(idom) => runner = idom,
                        None => break,
                    }
                }
            }
        }

        df
    }

    /// Returns `true` if block is reachable from the entry block.
    pub fn is_reachable(&self, block: BlockId) -> bool {
        self.doms[block].is_some()
    }

    /// Returns blocks in RPO.
    pub fn rpo(&self) -> &[BlockId] {
        &self.rpo
    }

    fn intersect(
        &self,
        mut b1: BlockId,
        mut b2: BlockId,
        rpo_nums: &SecondaryMap<BlockId, u32>,
    ) -> BlockId {
        while b1 != b2 {
            while rpo_nums[b1] < rpo_nums[b2] {
                b1 = self.doms[b1].expect("processed block has a dominator");
            }
            while rpo_nums[b2] < rpo_nums[b1] {
                b2 = self.doms[b2].expect("processed block has a dominator");
            }
        }

        b1
    }
}

/// Dominance frontiers of each blocks.
#[derive(Default, Debug, Clone)]
pub struct DFSet(SecondaryMap<BlockId, BitSet<BlockId>>);

impl DFSet {
    pub fn frontiers(&self, block: BlockId) -> impl Iterator<Item = BlockId> + '_ {
        self.0[block].iter()
    }

    pub fn in_frontier_of(&self, block: BlockId, of: BlockId) -> bool {
        self.0[of].contains(block)
    }

    pub fn frontier_num_of(&self, of: BlockId) -> usize {
        self.0[of].len()
    }

    /// The iterated dominance frontier of `blocks`: the closure of the
    /// frontier relation, i.e. every block needing a merge node when each
    /// block in `blocks` holds a definition.
    pub fn iterated_frontier(&self, blocks: impl IntoIterator<Item = BlockId>) -> BitSet<BlockId> {
        let mut idf = BitSet::new();
        let mut worklist: Vec<BlockId> = blocks.into_iter().collect();
        while let Some(block) = worklist.pop() {
            for frontier in self.frontiers(block) {
                if idf.insert(frontier) {
                    worklist.push(frontier);
                }
            }
        }
        idf
    }

    pub fn clear(&mut self) {
        self.0.clear()
    }
}

#[derive(Default)]
pub struct DominatorTreeTraversable {
    children: SecondaryMap<BlockId, Vec<BlockId>>,
}

impl DominatorTreeTraversable {
    pub fn compute(&mut self, domtree: &DomTree) {
        for &block in domtree.rpo() {
            if let Some(idom) = domtree.idom_of(block) {
                self.children[idom].push(block)
            }
        }
    }

    pub fn children_of(&self, block: BlockId) -> &[BlockId] {
        &self.children[block]
    }

    pub fn clear(&mut self) {
        self.children.clear();
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::many_single_char_names)]

    use super::*;

    use mirflow_ir::builder::test_util::*;

    fn calc_dom(graph: &mut MirGraph) -> (DomTree, DFSet) {
        let mut dom_tree = DomTree::default();
        let df = dom_tree.compute(graph);
        (dom_tree, df)
    }

    fn test_df(df: &DFSet, of: BlockId, frontiers: &[BlockId]) -> bool {
        if df.frontier_num_of(of) != frontiers.len() {
            return false;
        }

        for &block in frontiers {
            if !df.in_frontier_of(block, of) {
                return false;
            }
        }
        true
    }

    #[test]
    fn dom_tree_if_else() {
        let mut b = TestGraphBuilder::new(1);
        let (entry, exit) = (b.entry(), b.exit());
        let [head, then_block, else_block, merge_block] = b.code_blocks();
        b.goto(entry, head);
        b.branch(head, else_block, then_block);
        b.goto(then_block, merge_block);
        b.goto(else_block, merge_block);
        b.goto(merge_block, exit);
        let mut graph = b.build();

        let (dom_tree, df) = calc_dom(&mut graph);
        assert_eq!(dom_tree.idom_of(entry), None);
        assert_eq!(dom_tree.idom_of(head), Some(entry));
        assert_eq!(dom_tree.idom_of(then_block), Some(head));
        assert_eq!(dom_tree.idom_of(else_block), Some(head));
        assert_eq!(dom_tree.idom_of(merge_block), Some(head));

        assert!(test_df(&df, head, &[]));
        assert!(test_df(&df, then_block, &[merge_block]));
        assert!(test_df(&df, else_block, &[merge_block]));
        assert!(test_df(&df, merge_block, &[]));

        assert_eq!(graph.block(then_block).idom, Some(head));
        assert!(graph.block(then_block).dom_frontier.contains(merge_block));
        assert!(graph.block(merge_block).dominates_return);
        assert!(graph.block(head).dominates_return);
        assert!(!graph.block(then_block).dominates_return);
    }

    #[test]
    fn unreachable_edge() {
        let mut b = TestGraphBuilder::new(1);
        let (entry, exit) = (b.entry(), b.exit());
        let [a, bb, c, d, e] = b.code_blocks();
        b.goto(entry, a);
        b.branch(a, bb, c);
        b.goto(bb, e);
        b.goto(c, e);
        b.goto(d, e);
        b.goto(e, exit);
        let mut graph = b.build();

        let (dom_tree, df) = calc_dom(&mut graph);
        assert_eq!(dom_tree.idom_of(a), Some(entry));
        assert_eq!(dom_tree.idom_of(bb), Some(a));
        assert_eq!(dom_tree.idom_of(c), Some(a));
        assert_eq!(dom_tree.idom_of(d), None);
        assert!(!dom_tree.is_reachable(d));
        assert!(dom_tree.is_reachable(entry));
        assert_eq!(dom_tree.idom_of(e), Some(a));

        assert!(test_df(&df, a, &[]));
        assert!(test_df(&df, bb, &[e]));
        assert!(test_df(&df, c, &[e]));
        assert!(test_df(&df, d, &[]));
        assert!(test_df(&df, e, &[]));
        assert!(graph.block(d).idom.is_none());
    }

    #[test]
    fn dom_tree_complex() {
        let mut b = TestGraphBuilder::new(1);
        let (entry, exit) = (b.entry(), b.exit());
        let [a, bb, c, d, e, f, g, h, i, j, k, l, m] = b.code_blocks();
        b.goto(entry, a);
        b.branch(a, c, bb);
        b.branch(bb, g, d);
        b.branch(c, h, e);
        b.branch(d, g, f);
        b.branch(e, h, c);
        b.branch(f, k, i);
        b.goto(g, j);
        b.goto(h, m);
        b.goto(i, l);
        b.goto(j, i);
        b.goto(k, l);
        b.branch(l, m, bb);
        b.goto(m, exit);
        let mut graph = b.build();

        let (dom_tree, df) = calc_dom(&mut graph);
        assert_eq!(dom_tree.idom_of(a), Some(entry));
        assert_eq!(dom_tree.idom_of(bb), Some(a));
        assert_eq!(dom_tree.idom_of(c), Some(a));
        assert_eq!(dom_tree.idom_of(d), Some(bb));
        assert_eq!(dom_tree.idom_of(e), Some(c));
        assert_eq!(dom_tree.idom_of(f), Some(d));
        assert_eq!(dom_tree.idom_of(g), Some(bb));
        assert_eq!(dom_tree.idom_of(h), Some(c));
        assert_eq!(dom_tree.idom_of(i), Some(bb));
        assert_eq!(dom_tree.idom_of(j), Some(g));
        assert_eq!(dom_tree.idom_of(k), Some(f));

        assert!(test_df(&df, a, &[]));
        assert!(test_df(&df, bb, &[bb, m]));
        assert!(test_df(&df, c, &[c, m]));
        assert!(test_df(&df, d, &[g, i, l]));
        assert!(test_df(&df, e, &[c, h]));
        assert!(test_df(&df, f, &[i, l]));
        assert!(test_df(&df, g, &[i]));
        assert!(test_df(&df, h, &[m]));
        assert!(test_df(&df, i, &[l]));
        assert!(test_df(&df, j, &[i]));
        assert!(test_df(&df, k, &[l]));
        assert!(test_df(&df, l, &[bb, m]));
        assert!(test_df(&df, m, &[]));

        let idf = df.iterated_frontier([d]);
        assert_eq!(idf.iter().collect::<Vec<_>>(), vec![bb, g, i, l, m]);
    }

    #[test]
    fn dom_tree_switch() {
        let mut b = TestGraphBuilder::new(1);
        let (entry, exit) = (b.entry(), b.exit());
        let [a, bb, c, d, e, f] = b.code_blocks();
        b.goto(entry, a);
        b.switch(a, &[c, d], bb);
        b.branch(bb, a, e);
        b.goto(c, f);
        b.goto(d, f);
        b.goto(e, exit);
        b.goto(f, exit);
        let mut graph = b.build();

        let (dom_tree, df) = calc_dom(&mut graph);
        assert_eq!(dom_tree.idom_of(bb), Some(a));
        assert_eq!(dom_tree.idom_of(c), Some(a));
        assert_eq!(dom_tree.idom_of(d), Some(a));
        assert_eq!(dom_tree.idom_of(e), Some(bb));
        assert_eq!(dom_tree.idom_of(f), Some(a));
        assert_eq!(dom_tree.idom_of(exit), Some(a));

        assert!(test_df(&df, a, &[a]));
        assert!(test_df(&df, bb, &[a, exit]));
        assert!(test_df(&df, c, &[f]));
        assert!(test_df(&df, d, &[f]));
        assert!(test_df(&df, e, &[exit]));
        assert!(test_df(&df, f, &[exit]));

        let mut traversable = DominatorTreeTraversable::default();
        traversable.compute(&dom_tree);
        assert_eq!(traversable.children_of(entry), &[a]);
        let mut children = traversable.children_of(a).to_vec();
        children.sort();
        assert_eq!(children, vec![exit, bb, c, d, f]);
    }
}
