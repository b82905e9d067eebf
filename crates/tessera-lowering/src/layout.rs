//! Channel-first / channel-last layout conversion.

use crate::builder::Builder;
use tessera_core::{Error, Result, ValueId};

/// Permutation taking `NCHW` (and `OIHW`) to `NHWC` (and `OHWI`).
pub const NCHW_TO_NHWC: [usize; 4] = [0, 2, 3, 1];

/// Permutation taking `NHWC` back to `NCHW`.
pub const NHWC_TO_NCHW: [usize; 4] = [0, 3, 1, 2];

/// Insert a constant permutation and a transpose converting a rank-4 value
/// between layouts.
pub fn transpose_layout(b: &mut Builder, value: ValueId, perm: [usize; 4]) -> Result<ValueId> {
    let ty = b.value_type(value)?;
    if ty.rank() != 4 {
        return Err(Error::UnsupportedRank(format!(
            "layout transpose expects a rank-4 tensor, got {}",
            ty
        )));
    }
    b.transpose(value, &perm)
}

/// Compose two permutations: applying the result equals applying `first`
/// then `second`.
pub fn compose(first: [usize; 4], second: [usize; 4]) -> [usize; 4] {
    second.map(|axis| first[axis])
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::{DataType, Graph, TensorType};

    #[test]
    fn test_round_trip_is_identity() {
        assert_eq!(compose(NCHW_TO_NHWC, NHWC_TO_NCHW), [0, 1, 2, 3]);
        assert_eq!(compose(NHWC_TO_NCHW, NCHW_TO_NHWC), [0, 1, 2, 3]);
    }

    #[test]
    fn test_transpose_layout_shapes() {
        let mut graph = Graph::new();
        let x = graph.add_input("x", TensorType::new(DataType::F32, vec![2, 3, 5, 7]));

        let mut b = Builder::new(&mut graph, "layout");
        let nhwc = transpose_layout(&mut b, x, NCHW_TO_NHWC).unwrap();
        assert_eq!(b.value_type(nhwc).unwrap().shape, vec![2, 5, 7, 3]);

        let nchw = transpose_layout(&mut b, nhwc, NHWC_TO_NCHW).unwrap();
        assert_eq!(b.value_type(nchw).unwrap().shape, vec![2, 3, 5, 7]);
    }

    #[test]
    fn test_transpose_layout_rejects_other_ranks() {
        let mut graph = Graph::new();
        let x = graph.add_input("x", TensorType::new(DataType::F32, vec![3, 5, 7]));

        let mut b = Builder::new(&mut graph, "layout");
        let result = transpose_layout(&mut b, x, NCHW_TO_NHWC);
        assert!(matches!(result, Err(Error::UnsupportedRank(_))));
        assert!(b.created().is_empty());
    }
}
