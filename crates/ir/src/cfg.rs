use cranelift_entity::SecondaryMap;

use crate::{BlockId, MirGraph};

/// Non-recursive depth-first post order over the blocks reachable from the
/// entry block.
pub struct CfgPostOrder<'a> {
    graph: &'a MirGraph,
    node_state: SecondaryMap<BlockId, NodeState>,
    stack: Vec<BlockId>,
}

impl<'a> CfgPostOrder<'a> {
    pub(crate) fn new(graph: &'a MirGraph) -> Self {
        let mut stack = Vec::new();

        if let Some(entry) = graph.entry() {
            stack.push(entry);
        }

        Self {
            graph,
            node_state: SecondaryMap::default(),
            stack,
        }
    }
}

impl Iterator for CfgPostOrder<'_> {
    type Item = BlockId;

    fn next(&mut self) -> Option<BlockId> {
        while let Some(&block) = self.stack.last() {
            if self.node_state[block].is_unvisited() {
                self.node_state[block].set_visited();
                // Push in reverse so that the first successor is explored first.
                let succs: smallvec::SmallVec<[BlockId; 4]> = self.graph.succs_of(block).collect();
                for &succ in succs.iter().rev() {
                    if self.node_state[succ].is_unvisited() {
                        self.stack.push(succ);
                    }
                }
            } else {
                self.stack.pop();
                if !self.node_state[block].has_finished() {
                    self.node_state[block].set_finished();
                    return Some(block);
                }
            }
        }

        None
    }
}

#[derive(Default, Debug, Clone, Copy)]
struct NodeState(u8);

impl NodeState {
    fn is_unvisited(self) -> bool {
        self.0 == 0
    }

    fn has_finished(self) -> bool {
        self.0 == 2
    }

    fn set_visited(&mut self) {
        self.0 = 1;
    }

    fn set_finished(&mut self) {
        self.0 = 2;
    }
}

#[cfg(test)]
mod tests {
    use crate::builder::test_util::*;

    #[test]
    fn post_order_visits_reachable_blocks_once() {
        let mut b = TestGraphBuilder::new(2);
        let (entry, exit) = (b.entry(), b.exit());
        let [a, c, d, dead] = b.code_blocks();
        b.goto(entry, a);
        b.branch(a, c, d);
        b.goto(c, d);
        b.goto(d, exit);
        b.goto(dead, d);
        let graph = b.build();

        let po: Vec<_> = graph.post_order().collect();
        assert_eq!(po, vec![exit, d, c, a, entry]);
    }
}
