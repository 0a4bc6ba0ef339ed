use smol_str::SmolStr;

use crate::{
    block::{BlockKind, SuccessorKind},
    graph::{Edge, MirGraph},
    inst::InstData,
    lowering::{
        FieldInfoId, FieldLoweringInfo, MethodDesc, MethodInfoId, MethodLoweringInfo, TypeIdx,
    },
    verifier::GraphError,
    BlockId, InstId, SsaReg, VReg,
};

/// Bytecode offset distance between consecutive instructions.
const INST_WIDTH: u32 = 2;

/// Builds a [`MirGraph`] from blocks, edges and instructions whose SSA
/// names were assigned by an upstream renaming step.
pub struct GraphBuilder {
    graph: MirGraph,
    entry: BlockId,
    exit: BlockId,
    next_offset: u32,
}

impl GraphBuilder {
    /// Creates a builder holding the null, entry and exit blocks.
    pub fn new(method: MethodDesc, num_vregs: u32) -> Self {
        let mut graph = MirGraph::new(method, num_vregs);
        graph.make_block(BlockKind::Null);
        let entry = graph.make_block(BlockKind::Entry);
        let exit = graph.make_block(BlockKind::Exit);

        Self {
            graph,
            entry,
            exit,
            next_offset: 0,
        }
    }

    pub fn entry_block(&self) -> BlockId {
        self.entry
    }

    pub fn exit_block(&self) -> BlockId {
        self.exit
    }

    pub fn append_block(&mut self) -> BlockId {
        self.make_block(BlockKind::Code)
    }

    pub fn append_handler_block(&mut self) -> BlockId {
        self.make_block(BlockKind::ExceptionHandler)
    }

    fn make_block(&mut self, kind: BlockKind) -> BlockId {
        let block = self.graph.make_block(kind);
        self.graph.block_mut(block).start_offset = self.next_offset;
        block
    }

    pub fn jump(&mut self, from: BlockId, to: BlockId) -> Result<(), GraphError> {
        self.graph.add_edge(from, to, Edge::FallThrough)
    }

    pub fn branch(
        &mut self,
        from: BlockId,
        fall_through: BlockId,
        taken: BlockId,
    ) -> Result<(), GraphError> {
        self.graph.add_edge(from, fall_through, Edge::FallThrough)?;
        self.graph.add_edge(from, taken, Edge::Taken)
    }

    /// Adds a switch with `cases`; `default` is reached by falling through.
    pub fn switch(
        &mut self,
        from: BlockId,
        kind: SuccessorKind,
        cases: &[(i32, BlockId)],
        default: BlockId,
    ) -> Result<(), GraphError> {
        debug_assert!(matches!(
            kind,
            SuccessorKind::PackedSwitch | SuccessorKind::SparseSwitch
        ));
        self.graph.add_edge(from, default, Edge::FallThrough)?;
        for &(key, block) in cases {
            self.graph.add_edge(from, block, Edge::Keyed { kind, key })?;
        }
        Ok(())
    }

    pub fn catch(
        &mut self,
        from: BlockId,
        handler: BlockId,
        type_key: i32,
    ) -> Result<(), GraphError> {
        self.graph.add_edge(
            from,
            handler,
            Edge::Keyed {
                kind: SuccessorKind::Catch,
                key: type_key,
            },
        )
    }

    pub fn declare_type(&mut self, descriptor: &str) -> TypeIdx {
        if let Some((idx, _)) = self.graph.types.iter().find(|(_, d)| d.as_str() == descriptor) {
            return idx;
        }
        self.graph.types.push(SmolStr::from(descriptor))
    }

    pub fn declare_field(&mut self, info: FieldLoweringInfo) -> FieldInfoId {
        self.graph.field_infos.push(info)
    }

    pub fn declare_method(&mut self, info: MethodLoweringInfo) -> MethodInfoId {
        self.graph.method_infos.push(info)
    }

    pub fn map_ssa_reg(&mut self, reg: SsaReg, vreg: VReg) {
        self.graph.set_vreg_of(reg, vreg);
    }

    /// Appends `data` to `block`, assigning the next bytecode offset.
    pub fn push_inst(&mut self, block: BlockId, mut data: InstData) -> InstId {
        data.offset = self.next_offset;
        self.next_offset += INST_WIDTH;

        if self.graph.block(block).insts.is_empty() {
            self.graph.block_mut(block).start_offset = data.offset;
        }
        self.graph.append_inst(block, data)
    }

    pub fn graph(&self) -> &MirGraph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut MirGraph {
        &mut self.graph
    }

    pub fn finish(self) -> MirGraph {
        self.graph
    }
}
