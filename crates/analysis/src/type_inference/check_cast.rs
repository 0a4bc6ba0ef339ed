//! Splitting of registers narrowed by `check-cast`.
//!
//! A successful `check-cast` narrows the type of its operand for the rest of
//! the paths through the cast, but the narrowed type must not flow back to
//! the definition. Each cast therefore gets a synthetic name, and blocks in
//! the iterated dominance frontier of the definition and the casts get a
//! pseudo-phi with another synthetic name where the register is live-in.
//! Uses of a split register are typed through the name current at the use.
use std::collections::BTreeMap;

use cranelift_entity::{packed_option::PackedOption, SecondaryMap};
use mirflow_ir::{BitSet, BlockId, InstId, MirGraph, SsaReg};
use rustc_hash::FxHashMap;

use super::SsaType;
use crate::{domtree::DFSet, liveness::Liveness, topo_order::TopologicalOrder};

#[derive(Debug, Clone, Copy)]
struct CheckCast {
    original: SsaReg,
    modified: SsaReg,
    ty: SsaType,
}

#[derive(Debug, Default)]
struct SplitReg {
    def_block: PackedOption<BlockId>,
    current: PackedOption<SsaReg>,
    starting: SecondaryMap<BlockId, PackedOption<SsaReg>>,
    ending: SecondaryMap<BlockId, PackedOption<SsaReg>>,
    /// Blocks holding a definition, a cast or a pseudo-phi of the register.
    def_phi_blocks: BitSet<BlockId>,
    pseudo_phi_blocks: BitSet<BlockId>,
}

#[derive(Debug, Default)]
pub struct CheckCastData {
    next_reg: u32,
    casts: FxHashMap<InstId, CheckCast>,
    splits: BTreeMap<SsaReg, SplitReg>,
}

impl CheckCastData {
    /// Synthetic names are allocated from `first_synthetic` on.
    pub fn new(first_synthetic: u32) -> Self {
        Self {
            next_reg: first_synthetic,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.casts.is_empty()
    }

    /// One past the last synthetic name.
    pub fn num_regs(&self) -> u32 {
        self.next_reg
    }

    fn alloc_reg(&mut self) -> SsaReg {
        let reg = SsaReg(self.next_reg);
        self.next_reg += 1;
        reg
    }

    pub fn add_check_cast(
        &mut self,
        graph: &MirGraph,
        liveness: &Liveness,
        block: BlockId,
        inst: InstId,
        cast_type: SsaType,
    ) {
        let original = graph.inst(inst).uses[0];
        let modified = self.alloc_reg();
        self.casts.insert(
            inst,
            CheckCast {
                original,
                modified,
                ty: cast_type,
            },
        );

        let split = self.splits.entry(original).or_insert_with(|| {
            let mut split = SplitReg::default();
            if let Some(def_block) = liveness.def_block(graph, original) {
                split.def_block = def_block.into();
                split.ending[def_block] = original.into();
                split.def_phi_blocks.insert(def_block);
            }
            split
        });
        // A later cast in the same block supersedes the earlier one.
        split.ending[block] = modified.into();
        split.def_phi_blocks.insert(block);
    }

    /// Places pseudo-phis and computes the name of every split register at
    /// the start and the end of each reachable block.
    pub fn add_pseudo_phis(
        &mut self,
        graph: &MirGraph,
        frontiers: &DFSet,
        liveness: &Liveness,
        topo: &TopologicalOrder,
    ) {
        let mut next_reg = self.next_reg;
        for (&original, split) in self.splits.iter_mut() {
            let def_block = split.def_block.expand();
            let phi_blocks = frontiers.iterated_frontier(split.def_phi_blocks.iter());
            for block in phi_blocks.iter() {
                if Some(block) == def_block || !liveness.is_live_in(block, original) {
                    continue;
                }
                split.starting[block] = SsaReg(next_reg).into();
                next_reg += 1;
                split.pseudo_phi_blocks.insert(block);
                split.def_phi_blocks.insert(block);
            }

            for &block in topo.order() {
                if Some(block) == def_block {
                    split.starting[block] = original.into();
                } else if !split.pseudo_phi_blocks.contains(block)
                    && liveness.is_live_in(block, original)
                {
                    let pred = topo.first_topological_pred(graph, block);
                    split.starting[block] = pred
                        .and_then(|pred| split.ending[pred].expand())
                        .into();
                }
                if split.ending[block].is_none() {
                    split.ending[block] = split.starting[block];
                }
            }
            tracing::trace!(
                reg = %original,
                pseudo_phis = split.pseudo_phi_blocks.len(),
                "split register"
            );
        }
        self.next_reg = next_reg;
    }

    /// The types of the synthetic cast names.
    pub fn cast_types(&self) -> impl Iterator<Item = (SsaReg, SsaType)> + '_ {
        self.casts.values().map(|cast| (cast.modified, cast.ty.as_non_null()))
    }

    pub fn start(&mut self, block: BlockId) {
        for split in self.splits.values_mut() {
            split.current = split.starting[block];
        }
    }

    /// Makes the name defined by the cast current.
    pub fn process_check_cast(&mut self, inst: InstId) {
        let cast = self.casts[&inst];
        if let Some(split) = self.splits.get_mut(&cast.original) {
            split.current = cast.modified.into();
        }
    }

    /// The name under which `reg` is typed at the current position.
    pub fn modified_reg(&self, reg: SsaReg) -> SsaReg {
        self.splits
            .get(&reg)
            .and_then(|split| split.current.expand())
            .unwrap_or(reg)
    }

    /// The name of `reg` at the end of `pred`, for phi inputs.
    pub fn phi_input_reg(&self, reg: SsaReg, pred: BlockId) -> SsaReg {
        self.splits
            .get(&reg)
            .and_then(|split| split.ending[pred].expand())
            .unwrap_or(reg)
    }

    pub fn has_pseudo_phis(&self, block: BlockId) -> bool {
        self.splits
            .values()
            .any(|split| split.pseudo_phi_blocks.contains(block))
    }

    /// Merges the pseudo-phis of `block`. Must be called after
    /// [`Self::start`].
    pub fn process_pseudo_phis(
        &self,
        graph: &MirGraph,
        block: BlockId,
        types: &mut SecondaryMap<SsaReg, SsaType>,
    ) -> bool {
        let mut changed = false;
        for split in self.splits.values() {
            if !split.pseudo_phi_blocks.contains(block) {
                continue;
            }
            let Some(current) = split.current.expand() else {
                continue;
            };

            let inputs: Vec<SsaReg> = graph
                .preds_of(block)
                .filter_map(|pred| split.ending[pred].expand())
                .collect();
            let mut merged = types[current];
            for &input in &inputs {
                merged.merge_weak(types[input]);
            }

            if !merged.is_defined() {
                // An untyped null reaching a loop head on the first visit.
            } else if merged.wide() {
                let before = types[current];
                types[current].mark_size_conflict();
                changed |= types[current] != before;
            } else {
                debug_assert!(merged.narrow() && merged.low_word() && !merged.high_word());
                changed |= types[current].copy_from(merged);
                let merged = merged.as_null();
                for &input in &inputs {
                    changed |= types[input].merge_strong(merged);
                }
            }
        }
        changed
    }

    /// Merges the categories inferred for the synthetic names back into the
    /// original registers.
    pub fn merge_conflicts(&self, types: &mut SecondaryMap<SsaReg, SsaType>) {
        for cast in self.casts.values() {
            let split_type = types[cast.modified].as_null();
            types[cast.original].merge_non_array_flags(split_type);
        }
        for (&original, split) in &self.splits {
            for block in split.pseudo_phi_blocks.iter() {
                if let Some(phi) = split.starting[block].expand() {
                    let split_type = types[phi].as_null();
                    types[original].merge_non_array_flags(split_type);
                }
            }
        }
    }

    pub fn check_cast_reg(&self, inst: InstId) -> Option<SsaReg> {
        self.casts.get(&inst).map(|cast| cast.modified)
    }

    /// Pseudo-phis as `(block, original register, synthetic name)`.
    pub fn pseudo_phis(&self) -> impl Iterator<Item = (BlockId, SsaReg, SsaReg)> + '_ {
        self.splits.iter().flat_map(|(&original, split)| {
            split.pseudo_phi_blocks.iter().filter_map(move |block| {
                split.starting[block]
                    .expand()
                    .map(|phi| (block, original, phi))
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domtree::DomTree;
    use mirflow_ir::builder::test_util::TestGraphBuilder;

    #[test]
    fn sibling_casts_meet_in_a_pseudo_phi() {
        let mut b = TestGraphBuilder::new(2);
        let (entry, exit) = (b.entry(), b.exit());
        let [top, left, right, join] = b.code_blocks();
        b.goto(entry, top);
        b.branch(top, left, right);
        b.goto(left, join);
        b.goto(right, join);
        b.goto(join, exit);

        b.new_instance(top, 2, "LBase;");
        let left_cast = b.check_cast(left, 2, "LFoo;");
        let right_cast = b.check_cast(right, 2, "LFoo;");
        b.ret(join, mirflow_ir::Opcode::ReturnObject, Some(2));
        let mut graph = b.build();

        let mut domtree = DomTree::new();
        let frontiers = domtree.compute(&mut graph);
        let topo = TopologicalOrder::compute(&graph, &domtree);
        let mut liveness = Liveness::new();
        liveness.compute(&graph);

        let mut data = CheckCastData::new(graph.num_ssa_regs());
        let foo = SsaType::non_array_ref();
        data.add_check_cast(&graph, &liveness, left, left_cast, foo);
        data.add_check_cast(&graph, &liveness, right, right_cast, foo);
        data.add_pseudo_phis(&graph, &frontiers, &liveness, &topo);

        let left_reg = data.check_cast_reg(left_cast).unwrap();
        let right_reg = data.check_cast_reg(right_cast).unwrap();
        assert_ne!(left_reg, right_reg);
        assert!(left_reg.0 >= 3 && right_reg.0 >= 3);

        let phis: Vec<_> = data.pseudo_phis().collect();
        assert_eq!(phis.len(), 1);
        let (phi_block, original, phi) = phis[0];
        assert_eq!((phi_block, original), (join, SsaReg(2)));
        assert_eq!(data.num_regs(), phi.0 + 1);

        data.start(left);
        assert_eq!(data.modified_reg(SsaReg(2)), SsaReg(2));
        data.process_check_cast(left_cast);
        assert_eq!(data.modified_reg(SsaReg(2)), left_reg);
        data.start(join);
        assert_eq!(data.modified_reg(SsaReg(2)), phi);
        assert_eq!(data.phi_input_reg(SsaReg(2), right), right_reg);
        assert_eq!(data.phi_input_reg(SsaReg(1), right), SsaReg(1));
        assert!(data.has_pseudo_phis(join));
        assert!(!data.has_pseudo_phis(top));
    }
}
