//! Compute the "liveness" of SSA registers in a [`MirGraph`].
//!
//! This is an implementation of "Liveness Sets using Path Exploration",
//! as described in <https://hal.inria.fr/hal-00761555/file/habilitation.pdf>
//! Section 2.5.1: starting from each use, the CFG is walked backwards until
//! the definition of the register is reached, marking the register live-in
//! and live-out on the way.
//!
//! Phi inputs are used at the end of the corresponding predecessor block,
//! not by the block holding the phi. The result of a phi is live-in for its
//! block but not live-out for the predecessors. Initial register versions
//! are defined by the entry block.

use cranelift_entity::SecondaryMap;
use mirflow_ir::{BitSet, BlockId, MirGraph, SsaReg};

#[derive(Default, Debug)]
pub struct Liveness {
    live_ins: SecondaryMap<BlockId, BitSet<SsaReg>>,
    live_outs: SecondaryMap<BlockId, BitSet<SsaReg>>,
    defs: SecondaryMap<SsaReg, Option<RegDef>>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum RegDef {
    Initial,
    Normal(BlockId),
    Phi(BlockId),
}

impl Liveness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compute(&mut self, graph: &MirGraph) {
        self.clear();

        for reg in 0..graph.num_vregs() {
            self.defs[SsaReg(reg)] = Some(RegDef::Initial);
        }
        for block in graph.post_order() {
            for &inst in &graph.block(block).insts {
                let data = graph.inst(inst);
                for &def in &data.defs {
                    self.defs[def] = Some(if data.is_phi() {
                        RegDef::Phi(block)
                    } else {
                        RegDef::Normal(block)
                    });
                }
            }
        }

        let entry = graph.entry();
        for block in graph.post_order() {
            for &inst in &graph.block(block).insts {
                let data = graph.inst(inst);
                if data.is_phi() {
                    // A phi input is considered to be a use by the associated
                    // predecessor block.
                    for (&reg, pred) in data.uses.iter().zip(graph.preds_of(block)) {
                        self.live_outs[pred].insert(reg);
                        self.up_and_mark(graph, entry, pred, reg);
                    }
                } else {
                    for &reg in &data.uses {
                        self.up_and_mark(graph, entry, block, reg);
                    }
                }
            }
        }
    }

    pub fn block_live_ins(&self, block: BlockId) -> &BitSet<SsaReg> {
        &self.live_ins[block]
    }

    pub fn block_live_outs(&self, block: BlockId) -> &BitSet<SsaReg> {
        &self.live_outs[block]
    }

    pub fn is_live_in(&self, block: BlockId, reg: SsaReg) -> bool {
        self.live_ins[block].contains(reg)
    }

    /// The block defining `reg`; initial versions are defined by the entry
    /// block.
    pub fn def_block(&self, graph: &MirGraph, reg: SsaReg) -> Option<BlockId> {
        match self.defs[reg]? {
            RegDef::Initial => graph.entry(),
            RegDef::Normal(block) | RegDef::Phi(block) => Some(block),
        }
    }

    /// Propagate liveness of `reg` "upward" from its use in `block`.
    fn up_and_mark(
        &mut self,
        graph: &MirGraph,
        entry: Option<BlockId>,
        block: BlockId,
        reg: SsaReg,
    ) {
        let mut worklist = vec![block];
        while let Some(block) = worklist.pop() {
            let def = self.defs[reg];

            // If `reg` is defined in this block, there's nothing to do.
            if def == Some(RegDef::Normal(block))
                || (def == Some(RegDef::Initial) && Some(block) == entry)
            {
                continue;
            }

            if !self.live_ins[block].insert(reg) {
                // Already marked, so propagation to preds already done
                continue;
            }

            // The result of a phi is live-in for its block only.
            if def == Some(RegDef::Phi(block)) {
                continue;
            }

            for pred in graph.preds_of(block) {
                self.live_outs[pred].insert(reg);
                worklist.push(pred);
            }
        }
    }

    /// Reset the `Liveness` struct so that it can be reused.
    pub fn clear(&mut self) {
        self.live_ins.clear();
        self.live_outs.clear();
        self.defs.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirflow_ir::{builder::test_util::*, Opcode};

    #[test]
    fn loop_carried_registers() {
        // s0 is the entry value of v0.
        let mut b = TestGraphBuilder::new(1);
        let (entry, exit) = (b.entry(), b.exit());
        let [pre, head, body, after] = b.code_blocks();
        b.goto(entry, pre);
        b.goto(pre, head);
        b.branch(head, after, body);
        b.goto(body, head);
        b.goto(after, exit);

        b.const_(pre, 1, 0);
        b.phi(head, 2, &[1, 3]);
        b.lit_op(body, Opcode::AddIntLit, 3, 2, 1);
        b.use_(body, Opcode::Return, &[0]);
        b.use_(after, Opcode::Return, &[2]);
        let graph = b.build();

        let mut live = Liveness::new();
        live.compute(&graph);

        let regs = |r: &[u32]| r.iter().map(|&r| SsaReg(r)).collect::<BitSet<_>>();
        assert_eq!(live.block_live_ins(pre), &regs(&[0]));
        assert_eq!(live.block_live_outs(pre), &regs(&[0, 1]));
        assert_eq!(live.block_live_ins(head), &regs(&[0, 2]));
        assert_eq!(live.block_live_ins(body), &regs(&[0, 2]));
        assert_eq!(live.block_live_outs(body), &regs(&[0, 3]));
        assert_eq!(live.block_live_ins(after), &regs(&[2]));
        assert!(!live.is_live_in(entry, SsaReg(0)));

        assert_eq!(live.def_block(&graph, SsaReg(0)), Some(entry));
        assert_eq!(live.def_block(&graph, SsaReg(2)), Some(head));
        assert_eq!(live.def_block(&graph, SsaReg(3)), Some(body));
    }
}
