//! Graph pass trait and stage definitions.

use crate::ir::Graph;
use crate::op::OpKind;
use crate::{Error, ErrorClass, Result};
use std::fmt;

/// Compilation stage for organizing passes.
///
/// Passes are grouped into stages and run in a fixed order. Within each stage,
/// passes run in the order they were registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    /// Rewrite source-vocabulary nodes into target-vocabulary nodes.
    Lowering,

    /// Check the lowered graph against what the code generator accepts.
    Verification,
}

/// A node a pass could not handle, recorded instead of aborting.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    /// Name of the offending node (its op kind when unnamed).
    pub node: String,

    /// Kind of the offending node.
    pub op: OpKind,

    /// Classification of the failure.
    pub class: ErrorClass,

    /// Human-readable message.
    pub message: String,
}

impl Diagnostic {
    /// Build a diagnostic from an error raised while handling a node.
    pub fn from_error(node: impl Into<String>, op: OpKind, error: &Error) -> Self {
        Self {
            node: node.into(),
            op,
            class: error.class(),
            message: error.to_string(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}): {:?}: {}",
            self.node, self.op, self.class, self.message
        )
    }
}

/// Trait for implementing graph passes.
///
/// A pass is a graph transformation that runs during a specific stage.
///
/// # Return Value
///
/// The `run()` method returns `Ok(true)` if the pass made changes to the
/// graph, or `Ok(false)` if no changes were made. Failures the pass chooses
/// to tolerate are pushed to `diagnostics`; anything returned as `Err` aborts
/// the pipeline.
///
/// # Example
///
/// ```ignore
/// struct CountNodesPass;
///
/// impl Pass for CountNodesPass {
///     fn name(&self) -> &str {
///         "count_nodes"
///     }
///
///     fn stage(&self) -> Stage {
///         Stage::Verification
///     }
///
///     fn run(&self, graph: &mut Graph, _diagnostics: &mut Vec<Diagnostic>) -> Result<bool> {
///         tracing::debug!(nodes = graph.node_count());
///         Ok(false)
///     }
/// }
/// ```
pub trait Pass: Send + Sync {
    /// Get the pass name (used for logging and debugging).
    fn name(&self) -> &str;

    /// Get the compilation stage this pass belongs to.
    fn stage(&self) -> Stage;

    /// Run the pass on the given graph.
    ///
    /// # Arguments
    ///
    /// * `graph` - The graph to transform (mutable).
    /// * `diagnostics` - Sink for per-node failures the pass tolerates.
    fn run(&self, graph: &mut Graph, diagnostics: &mut Vec<Diagnostic>) -> Result<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::SourceOp;

    struct NoOpPass;

    impl Pass for NoOpPass {
        fn name(&self) -> &str {
            "noop"
        }

        fn stage(&self) -> Stage {
            Stage::Verification
        }

        fn run(&self, _graph: &mut Graph, _diagnostics: &mut Vec<Diagnostic>) -> Result<bool> {
            Ok(false)
        }
    }

    #[test]
    fn test_pass_trait() {
        let pass: Box<dyn Pass> = Box::new(NoOpPass);
        assert_eq!(pass.name(), "noop");
        assert_eq!(pass.stage(), Stage::Verification);

        let mut graph = Graph::new();
        let mut diagnostics = Vec::new();
        assert!(!pass.run(&mut graph, &mut diagnostics).unwrap());
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn test_stage_ordering() {
        assert!(Stage::Lowering < Stage::Verification);
    }

    #[test]
    fn test_diagnostic_from_error() {
        let err = Error::UnsupportedRank("dot operand of rank 1".to_string());
        let diag = Diagnostic::from_error("mm0", OpKind::Source(SourceOp::Dot), &err);
        assert_eq!(diag.class, ErrorClass::UnsupportedRank);
        assert_eq!(
            diag.to_string(),
            "mm0 (source.dot): UnsupportedRank: Unsupported rank: dot operand of rank 1"
        );
    }
}
