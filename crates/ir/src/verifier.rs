//! Structural checks of a [`MirGraph`] handed over by the upstream stages.
use thiserror::Error;

use crate::{
    inst::NO_META,
    opcode::{DfAttr, Opcode},
    BlockId, InstId, MirGraph, SsaReg,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("graph has no entry block")]
    MissingEntry,

    #[error("graph has no exit block")]
    MissingExit,

    #[error("{block} already has a {what} successor")]
    SuccessorOccupied { block: BlockId, what: &'static str },

    #[error("edge {from} -> {to} is not mirrored by the predecessor list")]
    AsymmetricEdge { from: BlockId, to: BlockId },

    #[error("`{opcode}` at {inst:?} has {actual} uses, expected {expected}")]
    UseCount {
        inst: InstId,
        opcode: Opcode,
        expected: usize,
        actual: usize,
    },

    #[error("`{opcode}` at {inst:?} has {actual} defs, expected {expected}")]
    DefCount {
        inst: InstId,
        opcode: Opcode,
        expected: usize,
        actual: usize,
    },

    #[error("wide value at {inst:?} does not use consecutive names after {low}")]
    WidePair { inst: InstId, low: SsaReg },

    #[error("phi {inst:?} in {block} has {actual} inputs for {expected} predecessors")]
    PhiArity {
        inst: InstId,
        block: BlockId,
        expected: usize,
        actual: usize,
    },

    #[error("phi {inst:?} follows a non-phi instruction in {block}")]
    PhiNotAtBlockTop { inst: InstId, block: BlockId },

    #[error("`{opcode}` at {inst:?} refers to missing lowering info {meta}")]
    MissingLoweringInfo { inst: InstId, opcode: Opcode, meta: u32 },

    #[error("`{opcode}` at {inst:?} refers to missing type {idx}")]
    MissingType { inst: InstId, opcode: Opcode, idx: u32 },
}

/// Checks the structural invariants the analyses rely on.
pub fn verify(graph: &MirGraph) -> Result<(), GraphError> {
    graph.entry().ok_or(GraphError::MissingEntry)?;
    graph.exit().ok_or(GraphError::MissingExit)?;

    for block in graph.blocks.keys() {
        verify_edges(graph, block)?;

        let mut seen_non_phi = false;
        for &inst in &graph.block(block).insts {
            let data = graph.inst(inst);
            if data.is_phi() {
                if seen_non_phi {
                    return Err(GraphError::PhiNotAtBlockTop { inst, block });
                }
                let expected = graph.num_preds(block);
                if data.uses.len() != expected {
                    return Err(GraphError::PhiArity {
                        inst,
                        block,
                        expected,
                        actual: data.uses.len(),
                    });
                }
            } else {
                seen_non_phi = true;
            }
            verify_inst(graph, inst)?;
        }
    }

    Ok(())
}

fn verify_edges(graph: &MirGraph, block: BlockId) -> Result<(), GraphError> {
    for succ in graph.succs_of(block) {
        let n_edges = graph.succs_of(block).filter(|&s| s == succ).count();
        let n_preds = graph.preds_of(succ).filter(|&p| p == block).count();
        if n_edges != n_preds {
            return Err(GraphError::AsymmetricEdge {
                from: block,
                to: succ,
            });
        }
    }
    for pred in graph.preds_of(block) {
        if !graph.succs_of(pred).any(|s| s == block) {
            return Err(GraphError::AsymmetricEdge {
                from: pred,
                to: block,
            });
        }
    }
    Ok(())
}

fn verify_inst(graph: &MirGraph, inst: InstId) -> Result<(), GraphError> {
    let data = graph.inst(inst);
    let opcode = data.opcode;
    let attrs = opcode.attrs();

    let expected = opcode.num_defs();
    if data.defs.len() != expected {
        return Err(GraphError::DefCount {
            inst,
            opcode,
            expected,
            actual: data.defs.len(),
        });
    }
    if let [low, high] = data.defs[..] {
        if high != low.high_word() {
            return Err(GraphError::WidePair { inst, low });
        }
    }

    if let Some(expected) = opcode.fixed_num_uses() {
        if data.uses.len() != expected {
            return Err(GraphError::UseCount {
                inst,
                opcode,
                expected,
                actual: data.uses.len(),
            });
        }

        let a_wide = !attrs.contains(DfAttr::DA) && attrs.contains(DfAttr::A_WIDE);
        let layout = [
            (DfAttr::UA, a_wide),
            (DfAttr::UB, attrs.contains(DfAttr::B_WIDE)),
            (DfAttr::UC, attrs.contains(DfAttr::C_WIDE)),
        ];
        let mut pos = 0;
        for (used, wide) in layout {
            if !attrs.contains(used) {
                continue;
            }
            if wide {
                let low = data.uses[pos];
                if data.uses[pos + 1] != low.high_word() {
                    return Err(GraphError::WidePair { inst, low });
                }
                pos += 2;
            } else {
                pos += 1;
            }
        }
    }

    let missing_meta = || GraphError::MissingLoweringInfo {
        inst,
        opcode,
        meta: data.meta,
    };
    if attrs.intersects(DfAttr::IFIELD | DfAttr::SFIELD)
        && (data.meta == NO_META || data.meta as usize >= graph.field_infos.len())
    {
        return Err(missing_meta());
    }
    if attrs.contains(DfAttr::IS_INVOKE)
        && (data.meta == NO_META || data.meta as usize >= graph.method_infos.len())
    {
        return Err(missing_meta());
    }

    if let Some(idx) = data.type_idx() {
        if graph.types.get(idx).is_none() {
            return Err(GraphError::MissingType {
                inst,
                opcode,
                idx: idx.0,
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::test_util::*;

    #[test]
    fn well_formed_graph_passes() {
        let mut b = TestGraphBuilder::new(4);
        let [body] = b.code_blocks();
        b.goto(b.entry(), body);
        b.goto(body, b.exit());
        let field = b.field("LFoo;", "J");
        b.new_instance(body, 4, "LFoo;");
        b.const_wide(body, 5, 42);
        b.iput(body, Opcode::IputWide, 5, 4, field);
        b.ret(body, Opcode::ReturnVoid, None);

        assert_eq!(verify(&b.build()), Ok(()));
    }

    #[test]
    fn phi_arity_must_match_preds() {
        let mut b = TestGraphBuilder::new(2);
        let [left, right, join] = b.code_blocks();
        b.branch(b.entry(), left, right);
        b.goto(left, join);
        b.goto(right, join);
        b.goto(join, b.exit());
        b.const_(left, 2, 1);
        let phi = b.phi(join, 3, &[2]);

        assert_eq!(
            verify(&b.build()),
            Err(GraphError::PhiArity {
                inst: phi,
                block: join,
                expected: 2,
                actual: 1,
            })
        );
    }

    #[test]
    fn wide_operands_must_be_consecutive() {
        let mut b = TestGraphBuilder::new(0);
        let [body] = b.code_blocks();
        b.goto(b.entry(), body);
        b.goto(body, b.exit());
        let add = b.op(body, Opcode::AddLong, 4, &[0, 2]);
        b.inst_mut(add).uses[3] = SsaReg(9);

        assert_eq!(
            verify(&b.build()),
            Err(GraphError::WidePair {
                inst: add,
                low: SsaReg(2),
            })
        );
    }

    #[test]
    fn field_access_needs_lowering_info() {
        let mut b = TestGraphBuilder::new(1);
        let [body] = b.code_blocks();
        b.goto(b.entry(), body);
        b.goto(body, b.exit());
        let get = b.def(body, Opcode::Sget, 1);

        let err = verify(&b.build()).unwrap_err();
        assert_eq!(
            err.to_string(),
            format!("`sget` at {get:?} refers to missing lowering info {}", u32::MAX)
        );
    }
}
