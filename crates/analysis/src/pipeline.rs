//! Running the analyses over methods.
use mirflow_ir::{verify, DisableOpt, GraphError, MirGraph};
use rayon::prelude::*;

use crate::{
    domtree::{DFSet, DomTree},
    dump::{dump_types, dump_value_numbers},
    lvn::{run_local_value_numbering, LvnResult},
    topo_order::TopologicalOrder,
    type_inference::{infer_types, TypeInferenceResult},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pass {
    /// Immediate dominators and dominance frontiers.
    Dominators,
    /// Topological order with loop ends and nesting depths.
    TopologicalOrder,
    LocalValueNumbering,
    TypeInference,
}

#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    /// Verify the graph structure before running any pass.
    pub verify: bool,
    /// Optimizations disabled before the passes run.
    pub disable_opt: DisableOpt,
    /// Bound on the type propagation rounds; derived from the number of
    /// registers when unset.
    pub max_fixed_point_rounds: Option<u32>,
    pub dump_value_numbers: bool,
    pub dump_types: bool,
}

impl AnalysisConfig {
    pub fn with_verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    pub fn with_disabled(mut self, disable_opt: DisableOpt) -> Self {
        self.disable_opt |= disable_opt;
        self
    }

    pub fn with_max_fixed_point_rounds(mut self, rounds: u32) -> Self {
        self.max_fixed_point_rounds = Some(rounds);
        self
    }

    pub fn with_dumps(mut self, value_numbers: bool, types: bool) -> Self {
        self.dump_value_numbers = value_numbers;
        self.dump_types = types;
        self
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            verify: cfg!(debug_assertions),
            disable_opt: DisableOpt::empty(),
            max_fixed_point_rounds: None,
            dump_value_numbers: false,
            dump_types: false,
        }
    }
}

/// What the passes found out about one method.
#[derive(Debug, Default)]
pub struct MethodReport {
    pub method: String,
    pub value_numbers: Option<LvnResult>,
    pub types: Option<TypeInferenceResult>,
    /// Type inference found a size conflict; the passes after it were
    /// skipped.
    pub punted: bool,
}

#[derive(Debug, Clone)]
pub struct Pipeline {
    passes: Vec<Pass>,
    config: AnalysisConfig,
}

impl Pipeline {
    pub fn new(passes: Vec<Pass>, config: AnalysisConfig) -> Self {
        Self { passes, config }
    }

    /// All passes in dependency order. Type inference runs before value
    /// numbering so that a type conflict can disable it.
    pub fn default_pipeline() -> Self {
        Self::new(
            vec![
                Pass::Dominators,
                Pass::TopologicalOrder,
                Pass::TypeInference,
                Pass::LocalValueNumbering,
            ],
            AnalysisConfig::default(),
        )
    }

    pub fn with_config(mut self, config: AnalysisConfig) -> Self {
        self.config = config;
        self
    }

    pub fn passes(&self) -> &[Pass] {
        &self.passes
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Runs the passes on `graph`. Passes whose inputs were not computed by
    /// an earlier pass compute them on demand.
    pub fn run(&self, graph: &mut MirGraph) -> Result<MethodReport, GraphError> {
        if self.config.verify {
            verify(graph)?;
        }
        graph.disable_opt |= self.config.disable_opt;

        let mut report = MethodReport {
            method: graph.method.pretty(),
            ..MethodReport::default()
        };
        let mut doms: Option<(DomTree, DFSet)> = None;
        let mut topo: Option<TopologicalOrder> = None;

        for &pass in &self.passes {
            tracing::debug!(method = %report.method, ?pass, "running pass");
            match pass {
                Pass::Dominators => {
                    doms = Some(compute_doms(graph));
                }
                Pass::TopologicalOrder => {
                    let (domtree, _) = doms.get_or_insert_with(|| compute_doms(graph));
                    let order = TopologicalOrder::compute(graph, domtree);
                    order.write_to(graph);
                    topo = Some(order);
                }
                Pass::LocalValueNumbering => {
                    let result = run_local_value_numbering(graph);
                    if self.config.dump_value_numbers {
                        tracing::debug!(
                            method = %report.method,
                            "value numbers:\n{}",
                            dump_value_numbers(graph, &result)
                        );
                    }
                    report.value_numbers = Some(result);
                }
                Pass::TypeInference => {
                    let (domtree, frontiers) = doms.get_or_insert_with(|| compute_doms(graph));
                    let order = topo.get_or_insert_with(|| {
                        let order = TopologicalOrder::compute(graph, domtree);
                        order.write_to(graph);
                        order
                    });
                    let result =
                        infer_types(graph, frontiers, order, self.config.max_fixed_point_rounds);
                    if self.config.dump_types {
                        tracing::debug!(
                            method = %report.method,
                            "types:\n{}",
                            dump_types(graph, &result)
                        );
                    }
                    let punted = result.size_conflict().is_some();
                    report.types = Some(result);
                    if punted {
                        report.punted = true;
                        break;
                    }
                }
            }
        }
        Ok(report)
    }
}

fn compute_doms(graph: &mut MirGraph) -> (DomTree, DFSet) {
    let mut domtree = DomTree::new();
    let frontiers = domtree.compute(graph);
    (domtree, frontiers)
}

/// Runs `pipeline` on every method in parallel. The reports are in the
/// order of `graphs`.
pub fn analyze_methods(
    graphs: &mut [MirGraph],
    pipeline: &Pipeline,
) -> Vec<Result<MethodReport, GraphError>> {
    graphs
        .par_iter_mut()
        .map(|graph| pipeline.run(graph))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirflow_ir::{builder::test_util::TestGraphBuilder, Opcode, OptFlags};

    fn redundant_load_graph() -> MirGraph {
        let mut b = TestGraphBuilder::new(1);
        let (entry, exit) = (b.entry(), b.exit());
        let [body] = b.code_blocks();
        b.goto(entry, body);
        b.goto(body, exit);
        let f = b.field("LFoo;", "I");
        b.new_instance(body, 1, "LFoo;");
        b.iget(body, Opcode::Iget, 2, 1, f);
        b.iget(body, Opcode::Iget, 3, 1, f);
        b.build()
    }

    #[test]
    fn default_pipeline_runs_everything() {
        let mut graph = redundant_load_graph();
        let report = Pipeline::default_pipeline().run(&mut graph).unwrap();

        assert_eq!(report.method, "LTest;.test");
        assert!(!report.punted);
        assert!(report.types.is_some());
        let values = report.value_numbers.unwrap();
        assert_eq!(values.redundant().len(), 1);
        assert_eq!(graph.topological_order.len(), 3);
        assert_eq!(graph.reg_locations.len(), 4);
    }

    #[test]
    fn pre_disabled_value_numbering_is_skipped() {
        let mut graph = redundant_load_graph();
        let config = AnalysisConfig::default().with_disabled(DisableOpt::LOCAL_VALUE_NUMBERING);
        let pipeline = Pipeline::default_pipeline().with_config(config);
        let report = pipeline.run(&mut graph).unwrap();

        assert_eq!(report.value_numbers.unwrap().num_ebbs(), 0);
        assert!(graph
            .insts
            .values()
            .all(|inst| inst.opt_flags == OptFlags::empty()));
    }

    #[test]
    fn size_conflict_stops_the_pipeline() {
        let mut b = TestGraphBuilder::new(3);
        let entry = b.entry();
        b.const_(entry, 0, 1);
        b.op(entry, Opcode::LongToInt, 2, &[0]);
        let mut graph = b.build();

        let report = Pipeline::default_pipeline().run(&mut graph).unwrap();
        assert!(report.punted);
        assert!(report.value_numbers.is_none());
        assert!(graph.punt_to_interpreter);
    }

    #[test]
    fn type_inference_computes_missing_inputs() {
        let mut graph = redundant_load_graph();
        let pipeline = Pipeline::new(vec![Pass::TypeInference], AnalysisConfig::default());
        let report = pipeline.run(&mut graph).unwrap();

        let types = report.types.unwrap();
        assert!(types.type_of(mirflow_ir::SsaReg(1)).is_ref());
        assert!(!graph.topological_order.is_empty());
    }

    #[test]
    fn methods_are_analyzed_independently() {
        let mut graphs = vec![redundant_load_graph(), redundant_load_graph()];
        graphs[1].disable_opt |= DisableOpt::LOCAL_VALUE_NUMBERING;

        let reports = analyze_methods(&mut graphs, &Pipeline::default_pipeline());
        assert_eq!(reports.len(), 2);
        let redundant: Vec<_> = reports
            .into_iter()
            .map(|r| r.unwrap().value_numbers.unwrap().redundant().len())
            .collect();
        assert_eq!(redundant, vec![1, 0]);
    }
}
