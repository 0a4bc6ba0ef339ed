pub mod domtree;
pub mod dump;
pub mod liveness;
pub mod lvn;
pub mod pipeline;
pub mod topo_order;
pub mod type_inference;

pub use domtree::{DFSet, DomTree, DominatorTreeTraversable};
pub use dump::{dump_types, dump_value_numbers};
pub use liveness::Liveness;
pub use lvn::{run_local_value_numbering, LocalValueNumbering, LvnResult, ValueNumber};
pub use pipeline::{analyze_methods, AnalysisConfig, MethodReport, Pass, Pipeline};
pub use topo_order::{LoopRepeatingIter, TopologicalOrder};
pub use type_inference::{infer_types, SsaType, TypeInference, TypeInferenceResult};
