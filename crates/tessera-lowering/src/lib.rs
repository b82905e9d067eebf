//! Lowering from the high-level operator set to target primitives.
//!
//! This crate rewrites a [`Graph`] of source operators (convolution, batched
//! dot, softmax, broadcasts, mean reduction, affine quantization, reshape,
//! elementwise arithmetic) into the constrained target vocabulary a code
//! generator consumes:
//! - single-operand implicit broadcasting only
//! - channel-last convolution
//! - rank-3 batched matrix multiply
//! - explicit quantization info on `i8` convolution
//!
//! The pipeline runs in stages:
//! 1. **Lowering** - Apply one conversion rule per source node
//! 2. **Verification** - Check the result against the code generator contract
//!
//! # Example
//!
//! ```
//! use tessera_core::{DataType, Graph, Node, SourceOp, TensorType};
//! use tessera_lowering::{LoweringOptions, lower_graph};
//!
//! # fn main() -> Result<(), tessera_core::Error> {
//! let mut graph = Graph::new();
//! let ty = TensorType::new(DataType::F32, vec![2, 8]);
//! let x = graph.add_input("x", ty.clone());
//! let id = graph.add_node(Node::new(SourceOp::Softmax).with_input(x), vec![ty])?;
//! let y = graph.node(id)?.output()?;
//! graph.mark_output(y)?;
//!
//! let report = lower_graph(&mut graph, &LoweringOptions::default())?;
//! assert_eq!(report.converted, 1);
//! assert!(report.is_complete());
//! # Ok(())
//! # }
//! ```

pub mod broadcast;
pub mod builder;
pub mod composite;
pub mod conv;
pub mod infer;
pub mod layout;
pub mod matmul;
pub mod options;
pub mod passes;
pub mod quant;
pub mod rules;

pub use builder::Builder;
pub use options::{FailurePolicy, LoweringOptions};
pub use passes::{LoweringPass, VerifyTargetPass};
pub use rules::{Lowered, lower_node};

// Re-export commonly used types from tessera-core
pub use tessera_core::{Diagnostic, Error, ErrorClass, Graph, Pass, Result, Stage};

/// Outcome of [`lower_graph`].
#[derive(Debug, Clone, Default)]
pub struct LoweringReport {
    /// Number of source nodes that were lowered.
    pub converted: usize,

    /// Source nodes left unconverted under [`FailurePolicy::Partial`].
    pub diagnostics: Vec<Diagnostic>,
}

impl LoweringReport {
    /// Check whether every source node was lowered.
    pub fn is_complete(&self) -> bool {
        self.diagnostics.is_empty()
    }
}

/// Lowering pipeline with pluggable passes.
///
/// Passes run ordered by stage (Lowering → Verification); within a stage,
/// in registration order. Custom passes can be added via `add_pass()`.
pub struct LoweringPipeline {
    /// All passes to run, ordered by (stage, registration order).
    passes: Vec<Box<dyn Pass>>,
}

impl LoweringPipeline {
    /// Create a pipeline with the built-in passes:
    /// - `LoweringPass` (Lowering stage)
    /// - `VerifyTargetPass` (Verification stage)
    pub fn new(options: LoweringOptions) -> Self {
        let mut pipeline = Self::empty();

        pipeline.add_pass(LoweringPass::new(options));
        let verify = VerifyTargetPass::new();
        match options.policy {
            FailurePolicy::Abort => pipeline.add_pass(verify),
            FailurePolicy::Partial => pipeline.add_pass(verify.allowing_source()),
        };

        pipeline
    }

    /// Create a pipeline without any passes.
    pub fn empty() -> Self {
        Self { passes: Vec::new() }
    }

    /// Add a custom pass to the pipeline.
    ///
    /// The pass is placed in the stage reported by `pass.stage()`.
    ///
    /// # Returns
    ///
    /// Returns a mutable reference to self for method chaining.
    pub fn add_pass(&mut self, pass: impl Pass + 'static) -> &mut Self {
        self.passes.push(Box::new(pass));
        self
    }

    /// Run all passes in stage order and collect their diagnostics.
    ///
    /// # Errors
    ///
    /// Returns the first error a pass returns; the graph then holds whatever
    /// the passes before it produced.
    #[tracing::instrument(skip_all, fields(num_nodes = graph.node_count(), num_passes = self.passes.len()))]
    pub fn run(&mut self, graph: &mut Graph) -> Result<Vec<Diagnostic>> {
        // Stable sort keeps registration order within a stage
        self.passes.sort_by_key(|p| p.stage());

        let mut diagnostics = Vec::new();
        for pass in &self.passes {
            let _span =
                tracing::debug_span!("pass", name = pass.name(), stage = ?pass.stage()).entered();
            let changed = pass.run(graph, &mut diagnostics)?;
            tracing::debug!(changed, "pass finished");
        }

        Ok(diagnostics)
    }
}

/// Lower every source node of `graph` in place.
///
/// Under [`FailurePolicy::Abort`] the first failing node aborts with its
/// error. Under [`FailurePolicy::Partial`] failures are returned in the
/// report and the corresponding nodes remain in the graph.
pub fn lower_graph(graph: &mut Graph, options: &LoweringOptions) -> Result<LoweringReport> {
    let count_source = |graph: &Graph| graph.nodes().filter(|(_, n)| n.kind.is_source()).count();

    let before = count_source(graph);
    let diagnostics = LoweringPipeline::new(*options).run(graph)?;
    let after = count_source(graph);

    Ok(LoweringReport {
        converted: before - after,
        diagnostics,
    })
}
