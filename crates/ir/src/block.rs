use std::fmt;

use cranelift_entity::entity_impl;

use crate::{bitset::BitSet, InstId};

/// An opaque reference to [`BlockData`].
#[derive(Clone, PartialEq, Eq, Copy, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);
entity_impl!(BlockId, "bb");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockKind {
    /// Placeholder that is never reachable.
    Null,
    Entry,
    Exit,
    Code,
    ExceptionHandler,
}

impl fmt::Display for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BlockKind::Null => "null",
            BlockKind::Entry => "entry",
            BlockKind::Exit => "exit",
            BlockKind::Code => "code",
            BlockKind::ExceptionHandler => "handler",
        };
        f.write_str(s)
    }
}

/// How the keyed successors of a block are reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SuccessorKind {
    #[default]
    None,
    PackedSwitch,
    SparseSwitch,
    Catch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuccessorInfo {
    pub block: BlockId,
    /// Switch case key, or the caught type index for catch successors.
    pub key: i32,
}

#[derive(Debug, Clone)]
pub struct BlockData {
    pub kind: BlockKind,
    pub insts: Vec<InstId>,
    pub fall_through: Option<BlockId>,
    pub taken: Option<BlockId>,
    pub successor_kind: SuccessorKind,
    pub successors: Vec<SuccessorInfo>,
    pub preds: Vec<BlockId>,
    pub start_offset: u32,

    pub idom: Option<BlockId>,
    pub dom_frontier: BitSet<BlockId>,
    pub dominates_return: bool,
    pub nesting_depth: u16,
}

impl BlockData {
    pub fn new(kind: BlockKind) -> Self {
        Self {
            kind,
            insts: Vec::new(),
            fall_through: None,
            taken: None,
            successor_kind: SuccessorKind::None,
            successors: Vec::new(),
            preds: Vec::new(),
            start_offset: 0,
            idom: None,
            dom_frontier: BitSet::default(),
            dominates_return: false,
            nesting_depth: 0,
        }
    }

    /// Successors in the order fall-through, taken, keyed.
    ///
    /// A block reaching the same successor through several edges yields it
    /// once per edge.
    pub fn succs(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.fall_through
            .into_iter()
            .chain(self.taken)
            .chain(self.successors.iter().map(|s| s.block))
    }

    pub fn num_succs(&self) -> usize {
        self.succs().count()
    }

    pub fn first_inst(&self) -> Option<InstId> {
        self.insts.first().copied()
    }

    pub fn last_inst(&self) -> Option<InstId> {
        self.insts.last().copied()
    }

    /// Clears the annotations written by the analyses.
    pub fn clear_annotations(&mut self) {
        self.idom = None;
        self.dom_frontier.clear();
        self.dominates_return = false;
        self.nesting_depth = 0;
    }
}
