//! Lowering pass.
//!
//! Forward pass in topological order that applies the conversion rule of
//! every source node.

use crate::options::{FailurePolicy, LoweringOptions};
use crate::rules::{Lowered, lower_node};
use tessera_core::{Diagnostic, Graph, Pass, Result, Stage};

/// Pass that rewrites every source node into target primitives.
///
/// The topological order is snapshotted up front. Producers are visited
/// before consumers, so each rule sees operands that are already lowered;
/// nodes created by earlier rules are target nodes and are skipped.
pub struct LoweringPass {
    options: LoweringOptions,
}

impl LoweringPass {
    /// Create a lowering pass with the given options.
    pub fn new(options: LoweringOptions) -> Self {
        Self { options }
    }
}

impl Default for LoweringPass {
    fn default() -> Self {
        Self::new(LoweringOptions::default())
    }
}

impl Pass for LoweringPass {
    fn name(&self) -> &str {
        "lowering"
    }

    fn stage(&self) -> Stage {
        Stage::Lowering
    }

    fn run(&self, graph: &mut Graph, diagnostics: &mut Vec<Diagnostic>) -> Result<bool> {
        let mut converted = 0usize;

        for node_id in graph.topological_order() {
            // Erased by an earlier rule, or already a target node
            let Ok(node) = graph.node(node_id) else {
                continue;
            };
            if !node.kind.is_source() {
                continue;
            }
            let (name, kind) = (node.display_name(), node.kind);

            let _span = tracing::debug_span!("lower", node = %name, op = %kind).entered();

            match lower_node(graph, node_id) {
                Ok(Lowered::Replaced(value)) => {
                    tracing::debug!(%value, "replaced");
                    converted += 1;
                }
                Ok(Lowered::Absorbed) => {
                    tracing::debug!("absorbed into consumers");
                    converted += 1;
                }
                Err(err) => match self.options.policy {
                    FailurePolicy::Abort => {
                        return Err(err.with_context(format!("lowering '{}' ({})", name, kind)));
                    }
                    FailurePolicy::Partial => {
                        tracing::warn!(class = ?err.class(), "{}", err);
                        diagnostics.push(Diagnostic::from_error(name, kind, &err));
                    }
                },
            }
        }

        if self.options.verify_graph {
            graph.verify()?;
        }

        tracing::debug!(converted, failed = diagnostics.len(), "lowering finished");
        Ok(converted > 0)
    }
}
