//! Conversion rules: one per source operator.

use crate::broadcast::align_broadcast;
use crate::builder::Builder;
use crate::composite::{lower_reduce_mean, lower_softmax};
use crate::conv::lower_convolution;
use crate::matmul::lower_dot;
use crate::quant::lower_quantize_linear;
use tessera_core::{Error, Graph, Node, NodeId, Result, SourceOp, TargetOp, ValueId};

/// Outcome of lowering one source node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lowered {
    /// The node's result was replaced by this target value.
    Replaced(ValueId),

    /// The node was dissolved into its consumers (broadcasts).
    Absorbed,
}

/// Lower one source node.
///
/// On success the node is erased and its uses point at the replacement. On
/// failure every node the rule created is erased again and the graph is
/// left as it was.
#[tracing::instrument(skip_all, fields(node = ?id))]
pub fn lower_node(graph: &mut Graph, id: NodeId) -> Result<Lowered> {
    let node = graph.node(id)?.clone();
    let Some(op) = node.kind.as_source() else {
        return Err(Error::InvalidGraph(format!(
            "'{}' is already a target node",
            node.display_name()
        )));
    };

    let mut b = Builder::new(graph, node.display_name());
    let lowered = match apply_rule(&mut b, op, id, &node) {
        Ok(lowered) => lowered,
        Err(err) => {
            b.rollback()?;
            return Err(err);
        }
    };
    let created = b.commit();

    if let Lowered::Replaced(value) = lowered {
        graph.replace_all_uses(node.output()?, value)?;
    }
    graph.erase_node(id)?;

    tracing::debug!(op = op.name(), created = created.len(), "lowered");
    Ok(lowered)
}

fn apply_rule(b: &mut Builder, op: SourceOp, id: NodeId, node: &Node) -> Result<Lowered> {
    let value = match op {
        SourceOp::Broadcast | SourceOp::MultiBroadcast => {
            align_broadcast(b, id)?;
            return Ok(Lowered::Absorbed);
        }
        SourceOp::Convolution => lower_convolution(b, node)?,
        SourceOp::Dot => lower_dot(b, node)?,
        SourceOp::Softmax => lower_softmax(b, node)?,
        SourceOp::ReduceMean => lower_reduce_mean(b, node)?,
        SourceOp::QuantizeLinear => lower_quantize_linear(b, node)?,
        SourceOp::Reshape => lower_reshape(b, node)?,
        SourceOp::Add => lower_binary(b, node, TargetOp::Add)?,
        SourceOp::Sub => lower_binary(b, node, TargetOp::Sub)?,
        SourceOp::Mul => lower_binary(b, node, TargetOp::Mul)?,
    };

    // The replacement must be indistinguishable to consumers
    let declared = b.value_type(node.output()?)?;
    let actual = b.value_type(value)?;
    if declared != actual {
        return Err(Error::ShapeInference(format!(
            "lowering '{}' produced {} but the node declares {}",
            node.display_name(),
            actual,
            declared
        )));
    }

    Ok(Lowered::Replaced(value))
}

/// Lower a source `reshape` (attr `dims`) to a target `reshape`.
fn lower_reshape(b: &mut Builder, node: &Node) -> Result<ValueId> {
    let input = node.input(0)?;
    let dims = node
        .attr_ints("dims")?
        .iter()
        .map(|&d| usize::try_from(d))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|_| {
            Error::Attribute(format!(
                "'dims' of '{}' has a negative entry",
                node.display_name()
            ))
        })?;

    let numel = b.value_type(input)?.numel();
    if dims.iter().product::<usize>() != numel {
        return Err(Error::UnsupportedShape(format!(
            "cannot reshape {} elements into {:?}",
            numel, dims
        )));
    }

    b.reshape(input, &dims)
}

/// Lower a source elementwise operator one-to-one.
///
/// Only operands already in implicit-broadcast form are accepted; explicit
/// broadcasts feeding the node have been absorbed by then.
fn lower_binary(b: &mut Builder, node: &Node, op: TargetOp) -> Result<ValueId> {
    let (lhs, rhs) = (node.input(0)?, node.input(1)?);
    let lhs_ty = b.value_type(lhs)?;
    let rhs_ty = b.value_type(rhs)?;
    if tessera_core::implicit_broadcast_shape(&lhs_ty.shape, &rhs_ty.shape).is_err()
        || lhs_ty.dtype != rhs_ty.dtype
    {
        return Err(Error::UnsupportedShape(format!(
            "'{}' operands {} and {} are not in implicit broadcast form",
            node.display_name(),
            lhs_ty,
            rhs_ty
        )));
    }
    b.binary(op, lhs, rhs)
}
