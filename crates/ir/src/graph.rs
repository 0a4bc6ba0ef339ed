//! The per-method MIR graph.
use std::ops::Range;

use bitflags::bitflags;
use cranelift_entity::{packed_option::PackedOption, PrimaryMap, SecondaryMap};
use smol_str::SmolStr;

use crate::{
    block::{BlockData, BlockKind, SuccessorInfo, SuccessorKind},
    cfg::CfgPostOrder,
    inst::InstData,
    lowering::{
        FieldInfoId, FieldLoweringInfo, MethodDesc, MethodInfoId, MethodLoweringInfo, TypeIdx,
    },
    opcode::Opcode,
    verifier::GraphError,
    BlockId, InstId, SsaReg, VReg,
};

bitflags! {
    /// Optimizations disabled for the whole method.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DisableOpt: u32 {
        const LOAD_STORE_ELIMINATION = 1 << 0;
        const LOAD_HOISTING = 1 << 1;
        const SUPPRESS_LOADS = 1 << 2;
        const NULL_CHECK_ELIMINATION = 1 << 3;
        const CLASS_INIT_CHECK_ELIMINATION = 1 << 4;
        const GLOBAL_VALUE_NUMBERING = 1 << 5;
        const LOCAL_VALUE_NUMBERING = 1 << 6;
        const PROMOTE_REGS = 1 << 7;
        const TRACK_LIVE_TEMPS = 1 << 8;
        const SAFE_OPTIMIZATIONS = 1 << 9;
        const BB_OPT = 1 << 10;
        const MATCH = 1 << 11;
        const PROMOTE_COMPILER_TEMPS = 1 << 12;
        const BRANCH_FUSING = 1 << 13;
        const SUPPRESS_EXCEPTION_EDGES = 1 << 14;
        const SUPPRESS_METHOD_INLINING = 1 << 15;

        /// Optimizations that rely on consistent register types.
        const TYPE_CONFLICT = Self::PROMOTE_REGS.bits()
            | Self::PROMOTE_COMPILER_TEMPS.bits()
            | Self::LOCAL_VALUE_NUMBERING.bits()
            | Self::GLOBAL_VALUE_NUMBERING.bits()
            | Self::BB_OPT.bits()
            | Self::MATCH.bits()
            | Self::SUPPRESS_EXCEPTION_EDGES.bits();
    }
}

/// The inferred location record of an SSA register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegLocation {
    pub defined: bool,
    pub wide: bool,
    pub fp: bool,
    pub core: bool,
    pub is_ref: bool,
    pub high_word: bool,
    pub non_null: bool,
    pub array_depth: u32,
}

/// The edge kind passed to [`MirGraph::add_edge`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    FallThrough,
    Taken,
    Keyed { kind: SuccessorKind, key: i32 },
}

/// The CFG of one method together with its instructions, SSA register table
/// and resolution records.
///
/// Blocks and instructions live in arenas and are referenced by index; the
/// graph is dropped as a whole when the method compilation ends.
#[derive(Debug, Clone)]
pub struct MirGraph {
    pub method: MethodDesc,
    pub blocks: PrimaryMap<BlockId, BlockData>,
    pub insts: PrimaryMap<InstId, InstData>,
    pub types: PrimaryMap<TypeIdx, SmolStr>,
    pub field_infos: PrimaryMap<FieldInfoId, FieldLoweringInfo>,
    pub method_infos: PrimaryMap<MethodInfoId, MethodLoweringInfo>,

    entry: PackedOption<BlockId>,
    exit: PackedOption<BlockId>,
    inst_blocks: SecondaryMap<InstId, PackedOption<BlockId>>,

    num_vregs: u32,
    num_ssa_regs: u32,
    ssa_base_vregs: SecondaryMap<SsaReg, PackedOption<VReg>>,

    pub disable_opt: DisableOpt,
    pub punt_to_interpreter: bool,
    pub reg_locations: Vec<RegLocation>,

    pub topological_order: Vec<BlockId>,
    pub loop_ends: Vec<u32>,
    pub topological_order_indexes: SecondaryMap<BlockId, PackedOption<BlockIndex>>,
}

/// Position of a block in the topological order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockIndex(pub u32);
cranelift_entity::entity_impl!(BlockIndex);

impl MirGraph {
    pub fn new(method: MethodDesc, num_vregs: u32) -> Self {
        let mut ssa_base_vregs = SecondaryMap::new();
        for v in 0..num_vregs {
            ssa_base_vregs[SsaReg(v)] = VReg(v).into();
        }

        Self {
            method,
            blocks: PrimaryMap::new(),
            insts: PrimaryMap::new(),
            types: PrimaryMap::new(),
            field_infos: PrimaryMap::new(),
            method_infos: PrimaryMap::new(),
            entry: None.into(),
            exit: None.into(),
            inst_blocks: SecondaryMap::new(),
            num_vregs,
            num_ssa_regs: num_vregs,
            ssa_base_vregs,
            disable_opt: DisableOpt::empty(),
            punt_to_interpreter: false,
            reg_locations: Vec::new(),
            topological_order: Vec::new(),
            loop_ends: Vec::new(),
            topological_order_indexes: SecondaryMap::new(),
        }
    }

    pub fn entry(&self) -> Option<BlockId> {
        self.entry.expand()
    }

    pub fn exit(&self) -> Option<BlockId> {
        self.exit.expand()
    }

    pub fn make_block(&mut self, kind: BlockKind) -> BlockId {
        let block = self.blocks.push(BlockData::new(kind));
        match kind {
            BlockKind::Entry => self.entry = block.into(),
            BlockKind::Exit => self.exit = block.into(),
            _ => {}
        }
        block
    }

    /// Appends `data` to the end of `block`.
    pub fn append_inst(&mut self, block: BlockId, data: InstData) -> InstId {
        let inst = self.insts.push(data);
        self.blocks[block].insts.push(inst);
        self.inst_blocks[inst] = block.into();
        for &reg in self.insts[inst].uses.iter().chain(&self.insts[inst].defs) {
            self.num_ssa_regs = self.num_ssa_regs.max(reg.0 + 1);
        }
        inst
    }

    pub fn block(&self, block: BlockId) -> &BlockData {
        &self.blocks[block]
    }

    pub fn block_mut(&mut self, block: BlockId) -> &mut BlockData {
        &mut self.blocks[block]
    }

    pub fn inst(&self, inst: InstId) -> &InstData {
        &self.insts[inst]
    }

    pub fn inst_mut(&mut self, inst: InstId) -> &mut InstData {
        &mut self.insts[inst]
    }

    pub fn inst_block(&self, inst: InstId) -> Option<BlockId> {
        self.inst_blocks[inst].expand()
    }

    /// Adds a CFG edge and records `from` as a predecessor of `to`.
    pub fn add_edge(&mut self, from: BlockId, to: BlockId, edge: Edge) -> Result<(), GraphError> {
        let data = &mut self.blocks[from];
        match edge {
            Edge::FallThrough => {
                if data.fall_through.is_some() {
                    return Err(GraphError::SuccessorOccupied {
                        block: from,
                        what: "fall-through",
                    });
                }
                data.fall_through = Some(to);
            }
            Edge::Taken => {
                if data.taken.is_some() {
                    return Err(GraphError::SuccessorOccupied {
                        block: from,
                        what: "taken",
                    });
                }
                data.taken = Some(to);
            }
            Edge::Keyed { kind, key } => {
                if data.successor_kind != SuccessorKind::None && data.successor_kind != kind {
                    return Err(GraphError::SuccessorOccupied {
                        block: from,
                        what: "keyed",
                    });
                }
                data.successor_kind = kind;
                data.successors.push(SuccessorInfo { block: to, key });
            }
        }
        self.blocks[to].preds.push(from);
        Ok(())
    }

    pub fn succs_of(&self, block: BlockId) -> impl Iterator<Item = BlockId> + '_ {
        self.blocks[block].succs()
    }

    pub fn preds_of(&self, block: BlockId) -> impl Iterator<Item = BlockId> + '_ {
        self.blocks[block].preds.iter().copied()
    }

    pub fn num_preds(&self, block: BlockId) -> usize {
        self.blocks[block].preds.len()
    }

    pub fn post_order(&self) -> CfgPostOrder<'_> {
        CfgPostOrder::new(self)
    }

    pub fn num_vregs(&self) -> u32 {
        self.num_vregs
    }

    /// The number of SSA names assigned upstream.
    pub fn num_ssa_regs(&self) -> u32 {
        self.num_ssa_regs
    }

    pub fn vreg_of(&self, reg: SsaReg) -> Option<VReg> {
        self.ssa_base_vregs[reg].expand()
    }

    pub fn set_vreg_of(&mut self, reg: SsaReg, vreg: VReg) {
        self.ssa_base_vregs[reg] = vreg.into();
        self.num_ssa_regs = self.num_ssa_regs.max(reg.0 + 1);
    }

    /// SSA names of the incoming arguments, receiver first.
    pub fn in_regs(&self) -> Range<u32> {
        let in_words = self.method.num_in_words();
        debug_assert!(in_words <= self.num_vregs);
        self.num_vregs - in_words..self.num_vregs
    }

    /// Returns `true` if `reg` is the entry value of a virtual register.
    pub fn is_initial_version(&self, reg: SsaReg) -> bool {
        reg.0 < self.num_vregs
    }

    pub fn type_descriptor(&self, idx: TypeIdx) -> &str {
        &self.types[idx]
    }

    pub fn field_info_of(&self, inst: InstId) -> Option<&FieldLoweringInfo> {
        self.insts[inst]
            .field_info()
            .and_then(|id| self.field_infos.get(id))
    }

    pub fn method_info_of(&self, inst: InstId) -> Option<&MethodLoweringInfo> {
        self.insts[inst]
            .method_info()
            .and_then(|id| self.method_infos.get(id))
    }

    /// Finds the `move-result*` consuming the result of the instruction at
    /// `pos` in `block`.
    ///
    /// The search skips nops and continues into the fall-through block when
    /// `pos` is the last instruction of `block`.
    pub fn find_move_result(&self, block: BlockId, pos: usize) -> Option<InstId> {
        let mut block = block;
        let mut pos = pos + 1;
        loop {
            let data = &self.blocks[block];
            if let Some(&inst) = data.insts.get(pos) {
                let opcode = self.insts[inst].opcode;
                if matches!(opcode, Opcode::Nop | Opcode::MirNop) {
                    pos += 1;
                    continue;
                }
                return opcode.is_move_result().then_some(inst);
            }

            let next = data.fall_through?;
            if self.blocks[next].preds.len() != 1 {
                return None;
            }
            block = next;
            pos = 0;
        }
    }

    /// Position of `block` in the topological order, if it is reachable.
    pub fn topological_index(&self, block: BlockId) -> Option<u32> {
        self.topological_order_indexes[block].expand().map(|i| i.0)
    }
}
