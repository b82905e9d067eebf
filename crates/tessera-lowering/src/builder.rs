//! Shape-inferring builder for target primitives.

use crate::infer::{InferenceCtx, infer_target};
use tessera_core::{
    AttributeValue, Attributes, DataType, Graph, Node, NodeId, Result, TargetOp, TensorType,
    TensorValue, ValueId,
};

/// Appends target nodes to a graph, inferring each result type.
///
/// The builder remembers every node it created so that a rule that fails
/// halfway can be undone with [`Builder::rollback`].
pub struct Builder<'g> {
    graph: &'g mut Graph,
    prefix: String,
    created: Vec<NodeId>,
}

impl<'g> Builder<'g> {
    /// Create a builder naming its nodes after `prefix`.
    pub fn new(graph: &'g mut Graph, prefix: impl Into<String>) -> Self {
        Self {
            graph,
            prefix: prefix.into(),
            created: Vec::new(),
        }
    }

    /// Read-only view of the graph being built.
    pub fn graph(&self) -> &Graph {
        &*self.graph
    }

    /// Mutable access for operand redirects on existing consumers.
    pub(crate) fn graph_mut(&mut self) -> &mut Graph {
        &mut *self.graph
    }

    /// Get the type of a value.
    pub fn value_type(&self, value: ValueId) -> Result<TensorType> {
        self.graph.value_type(value).cloned()
    }

    /// Nodes created so far, in creation order.
    pub fn created(&self) -> &[NodeId] {
        &self.created
    }

    /// Build a target node and return its single output.
    pub fn build(
        &mut self,
        op: TargetOp,
        dtype: DataType,
        operands: &[ValueId],
        attributes: Attributes,
    ) -> Result<ValueId> {
        let ty = infer_target(&InferenceCtx {
            op,
            dtype,
            operands,
            attributes: &attributes,
            graph: &*self.graph,
        })?;

        let mut node = Node::new(op)
            .with_name(format!("{}/{}{}", self.prefix, op.name(), self.created.len()))
            .with_inputs(operands.iter().copied());
        node.attributes = attributes;

        let id = self.graph.add_node(node, vec![ty])?;
        self.created.push(id);
        let output = self.graph.node(id)?.output()?;

        tracing::trace!(op = op.name(), %output, ty = %self.graph.value_type(output)?, "built");
        Ok(output)
    }

    /// Build a constant from a literal.
    pub fn constant(&mut self, value: TensorValue) -> Result<ValueId> {
        let dtype = value.dtype;
        self.build(
            TargetOp::Const,
            dtype,
            &[],
            attrs([("value", AttributeValue::Tensor(value))]),
        )
    }

    /// Reshape a value, or return it unchanged when it already has `shape`.
    pub fn reshape(&mut self, value: ValueId, shape: &[usize]) -> Result<ValueId> {
        let ty = self.value_type(value)?;
        if ty.shape == shape {
            return Ok(value);
        }
        let new_shape = shape.iter().map(|&d| d as i64).collect::<Vec<_>>();
        self.build(
            TargetOp::Reshape,
            ty.dtype,
            &[value],
            attrs([("new_shape", AttributeValue::Ints(new_shape))]),
        )
    }

    /// Permute the axes of a value through a constant permutation operand.
    pub fn transpose(&mut self, value: ValueId, perm: &[usize]) -> Result<ValueId> {
        let dtype = self.value_type(value)?.dtype;
        let literal = TensorValue::from_i64s(perm.iter().map(|&p| p as i64).collect());
        let perm = self.constant(literal)?;
        self.build(TargetOp::Transpose, dtype, &[value, perm], Attributes::new())
    }

    /// Convert element type, or return the value unchanged when it already
    /// has `dtype`.
    pub fn cast(&mut self, value: ValueId, dtype: DataType) -> Result<ValueId> {
        if self.value_type(value)?.dtype == dtype {
            return Ok(value);
        }
        self.build(TargetOp::Cast, dtype, &[value], Attributes::new())
    }

    /// Build an elementwise operator; `rhs` broadcasts implicitly into `lhs`.
    pub fn binary(&mut self, op: TargetOp, lhs: ValueId, rhs: ValueId) -> Result<ValueId> {
        let dtype = self.value_type(lhs)?.dtype;
        self.build(op, dtype, &[lhs, rhs], Attributes::new())
    }

    /// Build a single-operand elementwise operator.
    pub fn unary(&mut self, op: TargetOp, value: ValueId) -> Result<ValueId> {
        let dtype = self.value_type(value)?.dtype;
        self.build(op, dtype, &[value], Attributes::new())
    }

    /// Build a reduction along `axis`, keeping the axis with size 1.
    pub fn reduce(&mut self, op: TargetOp, value: ValueId, axis: usize) -> Result<ValueId> {
        let dtype = self.value_type(value)?.dtype;
        self.build(
            op,
            dtype,
            &[value],
            attrs([("axis", AttributeValue::Int(axis as i64))]),
        )
    }

    /// Undo the rule: erase every created node in reverse creation order.
    pub fn rollback(self) -> Result<()> {
        for &id in self.created.iter().rev() {
            self.graph.erase_node(id)?;
        }
        tracing::trace!(prefix = %self.prefix, erased = self.created.len(), "rolled back");
        Ok(())
    }

    /// Keep the created nodes and release the graph.
    pub fn commit(self) -> Vec<NodeId> {
        self.created
    }
}

/// Build an attribute map from key/value pairs.
pub fn attrs<const N: usize>(entries: [(&str, AttributeValue); N]) -> Attributes {
    entries
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::Error;

    fn f32_ty(shape: &[usize]) -> TensorType {
        TensorType::new(DataType::F32, shape.to_vec())
    }

    #[test]
    fn test_build_infers_type() {
        let mut graph = Graph::new();
        let x = graph.add_input("x", f32_ty(&[2, 3]));

        let mut b = Builder::new(&mut graph, "t");
        let max = b.reduce(TargetOp::ReduceMax, x, 1).unwrap();
        let shifted = b.binary(TargetOp::Sub, x, max).unwrap();

        assert_eq!(b.value_type(max).unwrap().shape, vec![2, 1]);
        assert_eq!(b.value_type(shifted).unwrap().shape, vec![2, 3]);
        assert_eq!(b.commit().len(), 2);
        assert_eq!(graph.node_count(), 2);
    }

    #[test]
    fn test_identity_reshape_and_cast_are_skipped() {
        let mut graph = Graph::new();
        let x = graph.add_input("x", f32_ty(&[4]));

        let mut b = Builder::new(&mut graph, "t");
        assert_eq!(b.reshape(x, &[4]).unwrap(), x);
        assert_eq!(b.cast(x, DataType::F32).unwrap(), x);
        assert!(b.created().is_empty());
    }

    #[test]
    fn test_transpose_creates_permutation_constant() {
        let mut graph = Graph::new();
        let x = graph.add_input("x", f32_ty(&[1, 3, 4, 5]));

        let mut b = Builder::new(&mut graph, "t");
        let t = b.transpose(x, &[0, 2, 3, 1]).unwrap();
        assert_eq!(b.value_type(t).unwrap().shape, vec![1, 4, 5, 3]);
        assert_eq!(b.created().len(), 2);
    }

    #[test]
    fn test_rollback_restores_graph() {
        let mut graph = Graph::new();
        let x = graph.add_input("x", f32_ty(&[2, 3]));

        let mut b = Builder::new(&mut graph, "t");
        let exp = b.unary(TargetOp::Exp, x).unwrap();
        let sum = b.reduce(TargetOp::ReduceSum, exp, 1).unwrap();
        // Second operand would have to expand: precondition violation
        let err = b.binary(TargetOp::Mul, sum, exp).unwrap_err();
        assert!(matches!(err, Error::ShapeInference(_)));
        b.rollback().unwrap();

        assert_eq!(graph.node_count(), 0);
        assert!(graph.uses(x).is_empty());
        assert!(graph.verify().is_ok());
    }
}
