pub mod bitset;
pub mod block;
pub mod builder;
pub mod cfg;
pub mod graph;
pub mod inst;
pub mod lowering;
pub mod opcode;
pub mod ssa;
pub mod verifier;
pub mod writer;

pub use bitset::BitSet;
pub use block::{BlockData, BlockId, BlockKind, SuccessorInfo, SuccessorKind};
pub use builder::GraphBuilder;
pub use cfg::CfgPostOrder;
pub use graph::{BlockIndex, DisableOpt, Edge, MirGraph, RegLocation};
pub use inst::{InstData, InstId, OptFlags, NO_META};
pub use lowering::{
    FieldInfoId, FieldLoweringInfo, InvokeType, MethodDesc, MethodInfoId, MethodLoweringInfo,
    TypeIdx,
};
pub use opcode::{DfAttr, Opcode};
pub use ssa::{SsaReg, VReg};
pub use verifier::{verify, GraphError};
pub use writer::GraphWriter;
