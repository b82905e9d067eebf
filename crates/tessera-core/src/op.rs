//! Closed operator vocabularies.
//!
//! The graph holds nodes from two vocabularies: the high-level *source* set a
//! model arrives in, and the constrained *target* set the code generator
//! consumes. Lowering replaces every source node with target nodes.

use std::fmt;

/// High-level, shape-annotated operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceOp {
    /// 2-D convolution over NCHW input and OIHW filter.
    Convolution,
    /// Batched matrix multiply over matching-rank operands.
    Dot,
    Softmax,
    /// Expand a rank-1 tensor along one axis.
    Broadcast,
    /// Expand a lower-rank tensor to a higher-rank shape (left aligned).
    MultiBroadcast,
    ReduceMean,
    /// Affine int8 quantization: `(x + bias) * scale` narrowed to i8.
    QuantizeLinear,
    Reshape,
    Add,
    Sub,
    Mul,
}

impl SourceOp {
    pub fn name(&self) -> &'static str {
        match self {
            SourceOp::Convolution => "convolution",
            SourceOp::Dot => "dot",
            SourceOp::Softmax => "softmax",
            SourceOp::Broadcast => "broadcast",
            SourceOp::MultiBroadcast => "multibroadcast",
            SourceOp::ReduceMean => "reduce_mean",
            SourceOp::QuantizeLinear => "quantizelinear",
            SourceOp::Reshape => "reshape",
            SourceOp::Add => "add",
            SourceOp::Sub => "sub",
            SourceOp::Mul => "mul",
        }
    }

    /// Check if this is a two-operand elementwise operator.
    pub fn is_binary_elementwise(&self) -> bool {
        matches!(self, SourceOp::Add | SourceOp::Sub | SourceOp::Mul)
    }

    /// Check if the operand order of this operator is irrelevant.
    pub fn is_commutative(&self) -> bool {
        matches!(self, SourceOp::Add | SourceOp::Mul)
    }
}

/// Low-level primitives with stricter structural rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetOp {
    Const,
    Transpose,
    Reshape,
    /// 2-D convolution over NHWC input, OHWI filter, and a bias.
    Conv2d,
    /// Rank-3 batched matrix multiply.
    MatMul,
    ReduceMax,
    ReduceSum,
    Add,
    Sub,
    Mul,
    /// Integer division truncating toward zero.
    IntDiv,
    Exp,
    Reciprocal,
    Cast,
}

impl TargetOp {
    pub fn name(&self) -> &'static str {
        match self {
            TargetOp::Const => "const",
            TargetOp::Transpose => "transpose",
            TargetOp::Reshape => "reshape",
            TargetOp::Conv2d => "conv2d",
            TargetOp::MatMul => "matmul",
            TargetOp::ReduceMax => "reduce_max",
            TargetOp::ReduceSum => "reduce_sum",
            TargetOp::Add => "add",
            TargetOp::Sub => "sub",
            TargetOp::Mul => "mul",
            TargetOp::IntDiv => "int_div",
            TargetOp::Exp => "exp",
            TargetOp::Reciprocal => "reciprocal",
            TargetOp::Cast => "cast",
        }
    }

    /// Check if this is a two-operand elementwise operator subject to the
    /// implicit broadcast rule.
    pub fn is_binary_elementwise(&self) -> bool {
        matches!(
            self,
            TargetOp::Add | TargetOp::Sub | TargetOp::Mul | TargetOp::IntDiv
        )
    }

    /// Check if the operand order of this operator is irrelevant.
    pub fn is_commutative(&self) -> bool {
        matches!(self, TargetOp::Add | TargetOp::Mul)
    }
}

/// Kind tag of a node: one operator from either vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Source(SourceOp),
    Target(TargetOp),
}

impl OpKind {
    /// Check if this node still needs lowering.
    pub fn is_source(&self) -> bool {
        matches!(self, OpKind::Source(_))
    }

    pub fn as_source(&self) -> Option<SourceOp> {
        match self {
            OpKind::Source(op) => Some(*op),
            OpKind::Target(_) => None,
        }
    }

    pub fn as_target(&self) -> Option<TargetOp> {
        match self {
            OpKind::Target(op) => Some(*op),
            OpKind::Source(_) => None,
        }
    }

    /// Check if this is a two-operand elementwise operator.
    pub fn is_binary_elementwise(&self) -> bool {
        match self {
            OpKind::Source(op) => op.is_binary_elementwise(),
            OpKind::Target(op) => op.is_binary_elementwise(),
        }
    }

    /// Check if the operand order of this operator is irrelevant.
    pub fn is_commutative(&self) -> bool {
        match self {
            OpKind::Source(op) => op.is_commutative(),
            OpKind::Target(op) => op.is_commutative(),
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpKind::Source(op) => write!(f, "source.{}", op.name()),
            OpKind::Target(op) => write!(f, "target.{}", op.name()),
        }
    }
}

impl From<SourceOp> for OpKind {
    fn from(op: SourceOp) -> Self {
        OpKind::Source(op)
    }
}

impl From<TargetOp> for OpKind {
    fn from(op: TargetOp) -> Self {
        OpKind::Target(op)
    }
}
