//! Error types for the evaluator.

use thiserror::Error;

/// Evaluation errors.
#[derive(Debug, Error)]
pub enum EvalError {
    /// A graph input was not supplied.
    #[error("Missing input: {0}")]
    MissingInput(String),

    /// A supplied input does not match the declared type.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The node is malformed for evaluation (bad attribute, shape mismatch).
    #[error("Execution failed: {0}")]
    ExecutionError(String),

    /// Integer division by zero.
    #[error("Division by zero in node '{0}'")]
    DivisionByZero(String),

    /// Graph structure error.
    #[error(transparent)]
    Graph(#[from] tessera_core::Error),
}

/// Specialized Result type for evaluation.
pub type Result<T> = std::result::Result<T, EvalError>;
