//! Lowering configuration.

/// What the lowering pass does when a rule fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// The first failure aborts the pass with that error.
    #[default]
    Abort,

    /// Failures are recorded as diagnostics and the node stays unconverted.
    Partial,
}

/// Options for [`lower_graph`](crate::lower_graph) and the passes it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoweringOptions {
    pub policy: FailurePolicy,

    /// Run `Graph::verify` once lowering finishes.
    pub verify_graph: bool,
}

impl Default for LoweringOptions {
    fn default() -> Self {
        Self {
            policy: FailurePolicy::Abort,
            verify_graph: true,
        }
    }
}

impl LoweringOptions {
    /// Set the failure policy.
    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Enable or disable the structural check after lowering.
    pub fn with_verify_graph(mut self, verify_graph: bool) -> Self {
        self.verify_graph = verify_graph;
        self
    }
}
