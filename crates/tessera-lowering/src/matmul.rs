//! Batched matrix multiply normalization.
//!
//! Source `dot` accepts any matching rank of at least 2; target `matmul`
//! only accepts rank 3. Leading batch dimensions are flattened into one,
//! and a trailing reshape restores the declared result shape.

use crate::builder::Builder;
use tessera_core::{Attributes, Error, Node, Result, TargetOp, TensorType, ValueId};

/// Attributes carried unchanged from source nodes onto their main target node.
pub const PASS_THROUGH_ATTRIBUTES: [&str; 3] = ["xdlops", "xdlopsV2", "perf_config"];

/// How the operands of one `dot` map onto a rank-3 `matmul`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatMulPlan {
    pub lhs_shape: Vec<usize>,
    pub rhs_shape: Vec<usize>,
    /// `false` when both operands are already rank 3 with equal batch.
    pub reshaped: bool,
}

/// Decide the rank-3 operand shapes for `lhs @ rhs`.
///
/// # Errors
///
/// - `UnsupportedRank` if either rank is below 2 or the ranks differ
/// - `UnsupportedBroadcastDirection` if the batches differ and the right
///   batch is not 1
/// - `UnsupportedShape` if the contraction dimensions differ
pub fn plan_matmul(lhs: &TensorType, rhs: &TensorType, out: &TensorType) -> Result<MatMulPlan> {
    let rank = lhs.rank();
    if rank < 2 || rhs.rank() != rank || out.rank() != rank {
        return Err(Error::UnsupportedRank(format!(
            "dot needs matching ranks of at least 2, got {} @ {} -> {}",
            lhs, rhs, out
        )));
    }

    let (m, k) = (lhs.shape[rank - 2], lhs.shape[rank - 1]);
    let (k2, n) = (rhs.shape[rank - 2], rhs.shape[rank - 1]);
    if k != k2 {
        return Err(Error::UnsupportedShape(format!(
            "dot contraction mismatch: {} @ {}",
            lhs, rhs
        )));
    }

    let batch_a: usize = lhs.shape[..rank - 2].iter().product();
    let batch_b: usize = rhs.shape[..rank - 2].iter().product();

    if batch_a == batch_b {
        if lhs.shape[..rank - 2] != rhs.shape[..rank - 2] {
            return Err(Error::UnsupportedShape(format!(
                "dot batch dimensions differ: {} @ {}",
                lhs, rhs
            )));
        }
        return Ok(MatMulPlan {
            lhs_shape: vec![batch_a, m, k],
            rhs_shape: vec![batch_b, k, n],
            reshaped: rank != 3,
        });
    }

    if batch_b == 1 {
        // Every left batch shares the right matrix: stack them as rows
        return Ok(MatMulPlan {
            lhs_shape: vec![1, batch_a * m, k],
            rhs_shape: vec![1, k, n],
            reshaped: true,
        });
    }

    Err(Error::UnsupportedBroadcastDirection(format!(
        "dot batch {} @ {} would broadcast the left operand",
        batch_a, batch_b
    )))
}

/// Lower a source `dot` to a rank-3 target `matmul`.
pub fn lower_dot(b: &mut Builder, node: &Node) -> Result<ValueId> {
    let (lhs, rhs) = (node.input(0)?, node.input(1)?);
    let out_ty = b.value_type(node.output()?)?;
    let plan = plan_matmul(&b.value_type(lhs)?, &b.value_type(rhs)?, &out_ty)?;

    let lhs3 = b.reshape(lhs, &plan.lhs_shape)?;
    let rhs3 = b.reshape(rhs, &plan.rhs_shape)?;
    let product = b.build(
        TargetOp::MatMul,
        out_ty.dtype,
        &[lhs3, rhs3],
        pass_through(node),
    )?;

    if plan.reshaped {
        b.reshape(product, &out_ty.shape)
    } else {
        Ok(product)
    }
}

/// Copy the pass-through attributes present on `node`.
pub fn pass_through(node: &Node) -> Attributes {
    PASS_THROUGH_ATTRIBUTES
        .iter()
        .filter_map(|&key| node.attr(key).map(|value| (key.to_string(), value.clone())))
        .collect()
}
