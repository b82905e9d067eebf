//! Softmax and mean-reduction expansion into target primitives.

use crate::builder::Builder;
use tessera_core::{Error, Node, Result, TargetOp, TensorValue, ValueId};

/// Resolve a possibly negative axis against `rank`.
pub fn normalize_axis(axis: i64, rank: usize) -> Result<usize> {
    let resolved = if axis < 0 { axis + rank as i64 } else { axis };
    usize::try_from(resolved)
        .ok()
        .filter(|&a| a < rank)
        .ok_or_else(|| Error::Attribute(format!("axis {} out of range for rank {}", axis, rank)))
}

/// Expand softmax along `axis` (default 1) with max-subtraction:
///
/// ```text
/// m = reduce_max(x, axis)
/// e = exp(x - m)
/// y = e * reciprocal(reduce_sum(e, axis))
/// ```
pub fn lower_softmax(b: &mut Builder, node: &Node) -> Result<ValueId> {
    let input = node.input(0)?;
    let ty = b.value_type(input)?;
    if !ty.dtype.is_float() {
        return Err(Error::UnsupportedOperand(format!(
            "softmax over {} needs a floating-point input",
            ty
        )));
    }

    let axis = match node.attr("axis") {
        Some(_) => node.attr_i64("axis")?,
        None => 1,
    };
    let axis = normalize_axis(axis, ty.rank())?;

    let max = b.reduce(TargetOp::ReduceMax, input, axis)?;
    let shifted = b.binary(TargetOp::Sub, input, max)?;
    let exp = b.unary(TargetOp::Exp, shifted)?;
    let sum = b.reduce(TargetOp::ReduceSum, exp, axis)?;
    let inv = b.unary(TargetOp::Reciprocal, sum)?;
    b.binary(TargetOp::Mul, exp, inv)
}

/// Expand a mean over the single axis in `axes`.
///
/// Floating inputs multiply by the reciprocal of the element count before
/// summing. Integer inputs sum first and divide by the count, truncating
/// toward zero, since an integer reciprocal of any count above 1 is 0.
pub fn lower_reduce_mean(b: &mut Builder, node: &Node) -> Result<ValueId> {
    let input = node.input(0)?;
    let ty = b.value_type(input)?;

    let axes = node.attr_ints("axes")?;
    let &[axis] = axes else {
        return Err(Error::UnsupportedShape(format!(
            "reduce_mean over {} axes is not supported, expected exactly one",
            axes.len()
        )));
    };
    let axis = normalize_axis(axis, ty.rank())?;
    let count = ty.shape[axis];

    // Literal shaped all-ones at the input rank, so it broadcasts implicitly
    let ones = vec![1; ty.rank()];

    if ty.dtype.is_float() {
        let n = b.constant(TensorValue::full(ty.dtype, ones, count as f64))?;
        let inv = b.unary(TargetOp::Reciprocal, n)?;
        let scaled = b.binary(TargetOp::Mul, input, inv)?;
        b.reduce(TargetOp::ReduceSum, scaled, axis)
    } else {
        if count == 0 {
            return Err(Error::UnsupportedShape(format!(
                "integer reduce_mean over empty axis {} of {}",
                axis, ty
            )));
        }
        let sum = b.reduce(TargetOp::ReduceSum, input, axis)?;
        let n = b.constant(TensorValue::full(ty.dtype, ones, count as f64))?;
        b.binary(TargetOp::IntDiv, sum, n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::{DataType, Graph, OpKind, SourceOp, TensorType};

    fn target_ops(graph: &Graph) -> Vec<TargetOp> {
        graph
            .topological_order()
            .into_iter()
            .filter_map(|id| graph.node(id).ok()?.kind.as_target())
            .collect()
    }

    #[test]
    fn test_normalize_axis() {
        assert_eq!(normalize_axis(-1, 3).unwrap(), 2);
        assert_eq!(normalize_axis(0, 3).unwrap(), 0);
        assert!(matches!(normalize_axis(3, 3), Err(Error::Attribute(_))));
        assert!(matches!(normalize_axis(-4, 3), Err(Error::Attribute(_))));
    }

    #[test]
    fn test_softmax_expansion_sequence() {
        let mut graph = Graph::new();
        let ty = TensorType::new(DataType::F32, vec![2, 5]);
        let x = graph.add_input("x", ty.clone());
        let node = Node::new(SourceOp::Softmax)
            .with_input(x)
            .with_attribute("axis", -1i64);

        let mut b = Builder::new(&mut graph, "softmax");
        let y = lower_softmax(&mut b, &node).unwrap();
        assert_eq!(b.value_type(y).unwrap(), ty);
        b.commit();

        assert_eq!(
            target_ops(&graph),
            vec![
                TargetOp::ReduceMax,
                TargetOp::Sub,
                TargetOp::Exp,
                TargetOp::ReduceSum,
                TargetOp::Reciprocal,
                TargetOp::Mul,
            ]
        );
    }

    #[test]
    fn test_softmax_rejects_integer_input() {
        let mut graph = Graph::new();
        let x = graph.add_input("x", TensorType::new(DataType::I32, vec![2, 5]));
        let node = Node::new(SourceOp::Softmax).with_input(x);

        let mut b = Builder::new(&mut graph, "softmax");
        let result = lower_softmax(&mut b, &node);
        assert!(matches!(result, Err(Error::UnsupportedOperand(_))));
    }

    #[test]
    fn test_float_mean_keeps_axis() {
        let mut graph = Graph::new();
        let x = graph.add_input("x", TensorType::new(DataType::F32, vec![1, 4]));
        let node = Node::new(SourceOp::ReduceMean)
            .with_input(x)
            .with_attribute("axes", vec![1i64]);

        let mut b = Builder::new(&mut graph, "mean");
        let y = lower_reduce_mean(&mut b, &node).unwrap();
        assert_eq!(b.value_type(y).unwrap().shape, vec![1, 1]);
        b.commit();

        let ops = target_ops(&graph);
        assert_eq!(
            ops,
            vec![
                TargetOp::Const,
                TargetOp::Reciprocal,
                TargetOp::Mul,
                TargetOp::ReduceSum
            ]
        );
        assert!(
            graph
                .nodes()
                .all(|(_, node)| matches!(node.kind, OpKind::Target(_)))
        );
    }

    #[test]
    fn test_integer_mean_uses_int_div() {
        let mut graph = Graph::new();
        let x = graph.add_input("x", TensorType::new(DataType::I32, vec![3, 4]));
        let node = Node::new(SourceOp::ReduceMean)
            .with_input(x)
            .with_attribute("axes", vec![0i64]);

        let mut b = Builder::new(&mut graph, "mean");
        let y = lower_reduce_mean(&mut b, &node).unwrap();
        assert_eq!(
            b.value_type(y).unwrap(),
            TensorType::new(DataType::I32, vec![1, 4])
        );
        b.commit();

        assert!(target_ops(&graph).contains(&TargetOp::IntDiv));
        assert!(!target_ops(&graph).contains(&TargetOp::Reciprocal));
    }

    #[test]
    fn test_mean_requires_single_axis() {
        let mut graph = Graph::new();
        let x = graph.add_input("x", TensorType::new(DataType::F32, vec![3, 4]));
        let node = Node::new(SourceOp::ReduceMean)
            .with_input(x)
            .with_attribute("axes", vec![0i64, 1]);

        let mut b = Builder::new(&mut graph, "mean");
        let result = lower_reduce_mean(&mut b, &node);
        assert!(matches!(result, Err(Error::UnsupportedShape(_))));
    }
}
