//! Core intermediate representation and shared types for tessera.
//!
//! This crate provides the foundations the lowering rules and the reference
//! evaluator build on:
//! - Graph IR with first-class use lists (`Graph`, `Node`, `ValueId`, `Use`)
//! - Tensor element types, static shapes, and constant values
//! - The closed source and target operator vocabularies (`OpKind`)
//! - Node attributes
//! - The `Pass` trait and compilation stages
//! - Implicit-broadcast shape helpers and DOT export

pub mod attribute;
pub mod broadcast;
pub mod dot;
pub mod ir;
pub mod op;
pub mod pass;
pub mod types;

// Re-export commonly used types
pub use attribute::{AttributeValue, Attributes};
pub use broadcast::{broadcast_shape, implicit_broadcast_shape};
pub use ir::{Graph, Node, NodeId, Use, Value, ValueId};
pub use op::{OpKind, SourceOp, TargetOp};
pub use pass::{Diagnostic, Pass, Stage};
pub use types::{DataType, TensorData, TensorType, TensorValue};

/// Result type using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type shared by the IR and the lowering rules.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// A broadcast feeds an operator the target cannot broadcast into.
    #[error("Unsupported operand: {0}")]
    UnsupportedOperand(String),

    #[error("Unsupported shape: {0}")]
    UnsupportedShape(String),

    #[error("Unsupported broadcast direction: {0}")]
    UnsupportedBroadcastDirection(String),

    #[error("Unsupported rank: {0}")]
    UnsupportedRank(String),

    /// An inference rule precondition was violated. Signals a bug in the
    /// calling rule rather than malformed input.
    #[error("Shape inference error: {0}")]
    ShapeInference(String),

    #[error("Attribute error: {0}")]
    Attribute(String),

    #[error("Invalid graph structure: {0}")]
    InvalidGraph(String),
}

/// Broad error category reported to the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    UnsupportedStructure,
    ShapeInferenceInconsistency,
    AttributeTranslation,
    InvalidGraph,
}

/// Op-specific classification attached to lowering diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    UnsupportedShape,
    UnsupportedBroadcastDirection,
    UnsupportedRank,
    InternalInference,
    AttributeTranslation,
    InvalidGraph,
}

impl Error {
    /// Get the broad category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::UnsupportedOperand(_)
            | Error::UnsupportedShape(_)
            | Error::UnsupportedBroadcastDirection(_)
            | Error::UnsupportedRank(_) => ErrorKind::UnsupportedStructure,
            Error::ShapeInference(_) => ErrorKind::ShapeInferenceInconsistency,
            Error::Attribute(_) => ErrorKind::AttributeTranslation,
            Error::InvalidGraph(_) => ErrorKind::InvalidGraph,
        }
    }

    /// Get the op-specific classification of this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::UnsupportedOperand(_) | Error::UnsupportedShape(_) => {
                ErrorClass::UnsupportedShape
            }
            Error::UnsupportedBroadcastDirection(_) => ErrorClass::UnsupportedBroadcastDirection,
            Error::UnsupportedRank(_) => ErrorClass::UnsupportedRank,
            Error::ShapeInference(_) => ErrorClass::InternalInference,
            Error::Attribute(_) => ErrorClass::AttributeTranslation,
            Error::InvalidGraph(_) => ErrorClass::InvalidGraph,
        }
    }

    /// Check whether this error reports a structure the rules do not handle.
    pub fn is_unsupported(&self) -> bool {
        self.kind() == ErrorKind::UnsupportedStructure
    }

    /// Prefix the message with `context`, keeping the variant.
    pub fn with_context(self, context: impl std::fmt::Display) -> Self {
        match self {
            Error::UnsupportedOperand(m) => Error::UnsupportedOperand(format!("{context}: {m}")),
            Error::UnsupportedShape(m) => Error::UnsupportedShape(format!("{context}: {m}")),
            Error::UnsupportedBroadcastDirection(m) => {
                Error::UnsupportedBroadcastDirection(format!("{context}: {m}"))
            }
            Error::UnsupportedRank(m) => Error::UnsupportedRank(format!("{context}: {m}")),
            Error::ShapeInference(m) => Error::ShapeInference(format!("{context}: {m}")),
            Error::Attribute(m) => Error::Attribute(format!("{context}: {m}")),
            Error::InvalidGraph(m) => Error::InvalidGraph(format!("{context}: {m}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let err = Error::UnsupportedBroadcastDirection("lhs batch".to_string());
        assert_eq!(err.kind(), ErrorKind::UnsupportedStructure);
        assert_eq!(err.class(), ErrorClass::UnsupportedBroadcastDirection);
        assert!(err.is_unsupported());

        let err = Error::ShapeInference("rank".to_string());
        assert_eq!(err.kind(), ErrorKind::ShapeInferenceInconsistency);
        assert_eq!(err.class(), ErrorClass::InternalInference);
        assert!(!err.is_unsupported());
    }

    #[test]
    fn test_error_display() {
        let err = Error::Attribute("missing 'axis'".to_string());
        assert_eq!(err.to_string(), "Attribute error: missing 'axis'");

        let err = err.with_context("node 'sm'");
        assert_eq!(err.to_string(), "Attribute error: node 'sm': missing 'axis'");
        assert_eq!(err.kind(), ErrorKind::AttributeTranslation);
    }
}
