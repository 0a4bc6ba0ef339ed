use cranelift_entity::{packed_option::PackedOption, SecondaryMap};
use mirflow_ir::{BitSet, BlockId, BlockKind, DfAttr, DisableOpt, InstId, MirGraph};

use super::{LocalValueNumbering, ValueNumber};
use crate::domtree::{DomTree, DominatorTreeTraversable};

/// Value numbers of one method.
#[derive(Debug, Default)]
pub struct LvnResult {
    values: SecondaryMap<InstId, PackedOption<ValueNumber>>,
    redundant: BitSet<InstId>,
    num_ebbs: usize,
}

impl LvnResult {
    pub fn value_of(&self, inst: InstId) -> Option<ValueNumber> {
        self.values[inst].expand()
    }

    /// Instructions whose result was already held by a register on every
    /// path through their extended basic block.
    pub fn redundant(&self) -> &BitSet<InstId> {
        &self.redundant
    }

    pub fn is_redundant(&self, inst: InstId) -> bool {
        self.redundant.contains(inst)
    }

    pub fn num_ebbs(&self) -> usize {
        self.num_ebbs
    }
}

/// Numbers every reachable instruction of `graph`, one extended basic block
/// at a time.
///
/// An extended basic block is a root (the entry, a join point or an
/// exception handler) together with the tree of its single-predecessor
/// successors. The numbering state is cloned where the tree forks.
pub fn run_local_value_numbering(graph: &mut MirGraph) -> LvnResult {
    let mut result = LvnResult::default();
    if graph.disable_opt.contains(DisableOpt::LOCAL_VALUE_NUMBERING) {
        tracing::warn!(
            method = %graph.method.pretty(),
            "local value numbering is disabled for this method"
        );
        return result;
    }

    let mut domtree = DomTree::new();
    domtree.compute_doms(graph);
    let rpo = domtree.rpo().to_vec();
    let mut dom_children = DominatorTreeTraversable::default();
    dom_children.compute(&domtree);

    let mut watermark = 0;
    for &root in &rpo {
        if !is_ebb_root(graph, root) {
            continue;
        }
        result.num_ebbs += 1;

        let mut stack = vec![(root, LocalValueNumbering::new(graph))];
        while let Some((block, mut lvn)) = stack.pop() {
            lvn.resume_from(watermark);
            number_block(graph, block, &mut lvn, &mut result);
            watermark = watermark.max(lvn.watermark());

            // A block outside every root has a single predecessor, which is
            // also its immediate dominator.
            let children: Vec<_> = dom_children
                .children_of(block)
                .iter()
                .copied()
                .filter(|&child| !is_ebb_root(graph, child))
                .collect();
            tracing::trace!(%block, num_children = children.len(), "numbered block");

            // The first child is numbered first and inherits the state.
            if let Some((&first, rest)) = children.split_first() {
                for &child in rest.iter().rev() {
                    stack.push((child, lvn.clone()));
                }
                stack.push((first, lvn));
            }
        }
    }

    tracing::debug!(
        method = %graph.method.pretty(),
        ebbs = result.num_ebbs,
        redundant = result.redundant.len(),
        "local value numbering done"
    );
    result
}

fn is_ebb_root(graph: &MirGraph, block: BlockId) -> bool {
    Some(block) == graph.entry()
        || graph.num_preds(block) != 1
        || graph.block(block).kind == BlockKind::ExceptionHandler
}

fn number_block(
    graph: &mut MirGraph,
    block: BlockId,
    lvn: &mut LocalValueNumbering,
    result: &mut LvnResult,
) {
    let insts = graph.block(block).insts.clone();
    for inst in insts {
        let data = graph.inst(inst);
        // Copies always produce a value that is already available.
        let is_copy = data.is_phi() || data.attrs().contains(DfAttr::IS_MOVE);

        let (vn, was_available) = lvn.number(graph, inst);
        result.values[inst] = vn.into();
        if was_available && !is_copy {
            result.redundant.insert(inst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirflow_ir::{builder::test_util::TestGraphBuilder, Opcode, OptFlags};

    #[test]
    fn state_flows_into_single_predecessor_blocks() {
        let mut b = TestGraphBuilder::new(1);
        let (entry, exit) = (b.entry(), b.exit());
        let [a, then, els, join] = b.code_blocks();
        b.goto(entry, a);
        b.branch(a, then, els);
        b.goto(then, join);
        b.goto(els, join);
        b.goto(join, exit);

        let f = b.field("LFoo;", "I");
        let const_a = b.const_(a, 1, 7);
        let load_a = b.iget(a, Opcode::Iget, 2, 0, f);
        let const_then = b.const_(then, 3, 7);
        let load_then = b.iget(then, Opcode::Iget, 4, 0, f);
        let const_else = b.const_(els, 5, 7);
        let const_join = b.const_(join, 6, 7);
        let load_join = b.iget(join, Opcode::Iget, 7, 0, f);
        let mut graph = b.build();

        let result = run_local_value_numbering(&mut graph);
        assert_eq!(result.num_ebbs(), 2);

        assert!(!result.is_redundant(const_a));
        assert!(result.is_redundant(const_then));
        assert!(result.is_redundant(const_else));
        assert!(result.is_redundant(load_then));
        assert!(!result.is_redundant(const_join));
        assert_eq!(result.value_of(const_then), result.value_of(const_a));
        assert_eq!(result.value_of(load_then), result.value_of(load_a));

        assert_eq!(graph.inst(load_a).opt_flags, OptFlags::empty());
        assert_eq!(graph.inst(load_then).opt_flags, OptFlags::IGNORE_NULL_CHECK);
        assert_eq!(graph.inst(load_join).opt_flags, OptFlags::empty());
    }

    #[test]
    fn sibling_paths_never_share_fresh_values() {
        let mut b = TestGraphBuilder::new(1);
        let (entry, exit) = (b.entry(), b.exit());
        let [a, then, els] = b.code_blocks();
        b.goto(entry, a);
        b.branch(a, then, els);
        b.goto(then, exit);
        b.goto(els, exit);

        let m = b.method("LFoo;", &[], "I");
        b.invoke(then, Opcode::InvokeStatic, m, &[]);
        let in_then = b.def(then, Opcode::MoveResult, 1);
        b.invoke(els, Opcode::InvokeStatic, m, &[]);
        let in_else = b.def(els, Opcode::MoveResult, 2);
        let mut graph = b.build();

        let result = run_local_value_numbering(&mut graph);
        assert!(result.value_of(in_then).is_some());
        assert_ne!(result.value_of(in_then), result.value_of(in_else));
    }

    #[test]
    fn loop_carried_results_are_not_redundant() {
        // entry -> head; head -> {after, body}; body -> head
        let mut b = TestGraphBuilder::new(1);
        let (entry, exit) = (b.entry(), b.exit());
        let [head, body, after] = b.code_blocks();
        b.goto(entry, head);
        b.branch(head, after, body);
        b.goto(body, head);
        b.goto(after, exit);

        let m = b.method("LFoo;", &[], "I");
        b.const_(entry, 0, 0);
        b.const_(entry, 3, 0);
        let phi = b.phi(head, 1, &[0, 2]);
        let obj_phi = b.phi(head, 4, &[3, 5]);
        b.invoke(body, Opcode::InvokeStatic, m, &[]);
        let result_move = b.def(body, Opcode::MoveResult, 2);
        let alloc = b.new_instance(body, 5, "LFoo;");
        let mut graph = b.build();

        let result = run_local_value_numbering(&mut graph);
        assert!(!result.is_redundant(result_move));
        assert!(!result.is_redundant(alloc));
        assert_ne!(result.value_of(result_move), result.value_of(phi));
        assert_ne!(result.value_of(alloc), result.value_of(obj_phi));
    }

    #[test]
    fn disabled_by_flag() {
        let mut b = TestGraphBuilder::new(1);
        let entry = b.entry();
        let f = b.field("LFoo;", "I");
        b.iget(entry, Opcode::Iget, 1, 0, f);
        let second = b.iget(entry, Opcode::Iget, 2, 0, f);
        let mut graph = b.build();
        graph.disable_opt |= DisableOpt::LOCAL_VALUE_NUMBERING;

        let result = run_local_value_numbering(&mut graph);
        assert_eq!(result.num_ebbs(), 0);
        assert_eq!(result.value_of(second), None);
        assert_eq!(graph.inst(second).opt_flags, OptFlags::empty());
    }
}
