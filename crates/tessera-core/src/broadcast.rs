//! Broadcasting shape helpers.

use crate::{Error, Result};

/// Compute NumPy-style broadcast output shape from two input shapes.
///
/// Implements NumPy broadcasting rules:
/// - Shapes are aligned from the rightmost dimension
/// - Dimensions match if they are equal or one of them is 1
/// - Missing dimensions in shorter shapes are treated as 1
///
/// Source-vocabulary elementwise operators broadcast this way.
///
/// # Example
///
/// ```text
/// broadcast_shape(&[2, 3, 4], &[3, 4])    -> [2, 3, 4]
/// broadcast_shape(&[8, 1, 6, 1], &[7, 1, 5]) -> [8, 7, 6, 5]
/// ```
pub fn broadcast_shape(a: &[usize], b: &[usize]) -> Result<Vec<usize>> {
    let max_rank = a.len().max(b.len());
    let pad_a = max_rank - a.len();
    let pad_b = max_rank - b.len();

    (0..max_rank)
        .map(|i| {
            let da = if i < pad_a { 1 } else { a[i - pad_a] };
            let db = if i < pad_b { 1 } else { b[i - pad_b] };
            match (da, db) {
                (da, db) if da == db => Ok(da),
                (1, db) => Ok(db),
                (da, 1) => Ok(da),
                _ => Err(Error::ShapeInference(format!(
                    "Cannot broadcast shapes {:?} and {:?} at dimension {i}",
                    a, b
                ))),
            }
        })
        .collect()
}

/// Compute the output shape of a target elementwise operator.
///
/// Target primitives only broadcast implicitly from the second operand into
/// the first: both operands must have the same rank, and every dimension of
/// `rhs` must either equal the matching `lhs` dimension or be 1. The result
/// has the shape of `lhs`.
///
/// # Example
///
/// ```text
/// implicit_broadcast_shape(&[2, 3], &[1, 3]) -> [2, 3]
/// implicit_broadcast_shape(&[1, 3], &[2, 3]) -> error (lhs would expand)
/// implicit_broadcast_shape(&[2, 3], &[3])    -> error (rank mismatch)
/// ```
pub fn implicit_broadcast_shape(lhs: &[usize], rhs: &[usize]) -> Result<Vec<usize>> {
    if lhs.len() != rhs.len() {
        return Err(Error::ShapeInference(format!(
            "Elementwise operands must have equal rank, got {:?} and {:?}",
            lhs, rhs
        )));
    }

    for (i, (&l, &r)) in lhs.iter().zip(rhs).enumerate() {
        if r != l && r != 1 {
            return Err(Error::ShapeInference(format!(
                "Operand {:?} cannot broadcast into {:?} at dimension {i}",
                rhs, lhs
            )));
        }
    }

    Ok(lhs.to_vec())
}
