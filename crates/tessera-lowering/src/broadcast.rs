//! Broadcast elimination.
//!
//! Target elementwise primitives broadcast their second operand implicitly,
//! so explicit `broadcast` / `multibroadcast` nodes are removed: each
//! consumer is rewired to read the source tensor, reshaped so that it has the
//! consumer's rank with size-1 axes where it is expanded.

use crate::builder::Builder;
use tessera_core::{
    Error, Graph, Node, NodeId, Result, SourceOp, TensorType, ValueId, implicit_broadcast_shape,
};

/// What has to happen to one consumer of the broadcast result.
#[derive(Debug, Clone, Copy)]
struct ConsumerPlan {
    node: NodeId,
    /// The broadcast feeds operand 0 and the consumer is commutative.
    swap: bool,
}

/// Compute the shape the broadcast input takes once aligned to the output
/// rank.
///
/// - `broadcast` (single axis): all ones except `aligned[axis] = input[0]`
/// - `multibroadcast`: the input dimensions followed by size-1 axes
pub fn aligned_shape(op: SourceOp, node: &Node, input: &TensorType, output: &TensorType) -> Result<Vec<usize>> {
    let out_rank = output.rank();
    let aligned = match op {
        SourceOp::Broadcast => {
            if input.rank() != 1 {
                return Err(Error::UnsupportedRank(format!(
                    "broadcast expects a rank-1 input, got {}",
                    input
                )));
            }
            let axis = node.attr_i64("axis")?;
            let axis = usize::try_from(axis)
                .ok()
                .filter(|&a| a < out_rank)
                .ok_or_else(|| {
                    Error::Attribute(format!(
                        "broadcast axis {} out of range for output {}",
                        axis, output
                    ))
                })?;
            let mut aligned = vec![1; out_rank];
            aligned[axis] = input.shape[0];
            aligned
        }
        SourceOp::MultiBroadcast => {
            if input.rank() > out_rank {
                return Err(Error::UnsupportedRank(format!(
                    "multibroadcast cannot reduce rank: {} to {}",
                    input, output
                )));
            }
            let mut aligned = input.shape.clone();
            aligned.resize(out_rank, 1);
            aligned
        }
        other => {
            return Err(Error::InvalidGraph(format!(
                "{} is not a broadcast",
                other.name()
            )));
        }
    };

    if aligned.iter().product::<usize>() != input.numel() {
        return Err(Error::UnsupportedShape(format!(
            "aligning {} to {:?} would change the element count",
            input, aligned
        )));
    }
    if implicit_broadcast_shape(&output.shape, &aligned).is_err() {
        return Err(Error::UnsupportedShape(format!(
            "aligned shape {:?} does not expand to {}",
            aligned, output
        )));
    }

    Ok(aligned)
}

/// Remove a broadcast node by rewiring every consumer.
///
/// All consumers are validated before anything is mutated; on error the
/// graph is unchanged apart from nodes the builder can roll back. On success
/// the broadcast result has no remaining uses and the caller erases the node.
#[tracing::instrument(skip_all, fields(node = ?id))]
pub fn align_broadcast(b: &mut Builder, id: NodeId) -> Result<()> {
    let graph = b.graph();
    let node = graph.node(id)?;
    let op = node.kind.as_source().ok_or_else(|| {
        Error::InvalidGraph(format!("'{}' is not a source node", node.display_name()))
    })?;
    let input = node.input(0)?;
    let result = node.output()?;
    let input_ty = graph.value_type(input)?.clone();
    let output_ty = graph.value_type(result)?.clone();

    if graph.outputs().contains(&result) {
        return Err(Error::UnsupportedOperand(format!(
            "result of '{}' is a graph output and cannot be absorbed",
            node.display_name()
        )));
    }

    let aligned = aligned_shape(op, node, &input_ty, &output_ty)?;
    let plans = plan_consumers(graph, result, &aligned)?;
    if plans.is_empty() {
        return Ok(());
    }

    let replacement = b.reshape(input, &aligned)?;

    let graph = b.graph_mut();
    for plan in plans {
        if plan.swap {
            graph.swap_operands(plan.node, 0, 1)?;
        }
        graph.set_operand(plan.node, 1, replacement)?;
    }

    tracing::debug!(%result, %replacement, aligned = ?aligned, "broadcast absorbed");
    Ok(())
}

/// Check every consumer of `result` and decide how to rewire it.
fn plan_consumers(graph: &Graph, result: ValueId, aligned: &[usize]) -> Result<Vec<ConsumerPlan>> {
    let mut plans = Vec::new();

    for consumer in graph.users(result) {
        let node = graph.node(consumer)?;
        let name = node.display_name();

        if !node.kind.is_binary_elementwise() || node.inputs().len() != 2 {
            return Err(Error::UnsupportedOperand(format!(
                "'{}' ({}) cannot absorb a broadcast operand",
                name, node.kind
            )));
        }

        let (lhs, rhs) = (node.input(0)?, node.input(1)?);
        let swap = match (lhs == result, rhs == result) {
            (true, true) => {
                return Err(Error::UnsupportedOperand(format!(
                    "'{}' reads the broadcast result in both operands",
                    name
                )));
            }
            (false, true) => false,
            (true, false) if node.kind.is_commutative() => true,
            (true, false) => {
                return Err(Error::UnsupportedOperand(format!(
                    "broadcast feeds the first operand of non-commutative '{}' ({})",
                    name, node.kind
                )));
            }
            (false, false) => {
                return Err(Error::InvalidGraph(format!(
                    "use list names '{}' but it does not read {}",
                    name, result
                )));
            }
        };

        let other = if swap { rhs } else { lhs };
        let other_ty = graph.value_type(other)?;
        let declared = graph.value_type(node.output()?)?;
        // The other operand alone must carry the consumer's full result shape
        match implicit_broadcast_shape(&other_ty.shape, aligned) {
            Ok(shape) if shape == declared.shape => {}
            _ => {
                return Err(Error::UnsupportedShape(format!(
                    "operand {} of '{}' cannot take {:?} as an implicit broadcast into {}",
                    other_ty, name, aligned, declared
                )));
            }
        }

        plans.push(ConsumerPlan {
            node: consumer,
            swap,
        });
    }

    Ok(plans)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::DataType;

    fn f32_ty(shape: &[usize]) -> TensorType {
        TensorType::new(DataType::F32, shape.to_vec())
    }

    #[test]
    fn test_single_axis_alignment() {
        let node = Node::new(SourceOp::Broadcast).with_attribute("axis", 1i64);
        let aligned =
            aligned_shape(SourceOp::Broadcast, &node, &f32_ty(&[3]), &f32_ty(&[2, 3, 4])).unwrap();
        assert_eq!(aligned, vec![1, 3, 1]);
    }

    #[test]
    fn test_multi_axis_alignment_is_left_aligned() {
        let node = Node::new(SourceOp::MultiBroadcast);
        let aligned = aligned_shape(
            SourceOp::MultiBroadcast,
            &node,
            &f32_ty(&[2, 3]),
            &f32_ty(&[2, 3, 5]),
        )
        .unwrap();
        assert_eq!(aligned, vec![2, 3, 1]);
    }

    #[test]
    fn test_alignment_must_expand_into_output() {
        let node = Node::new(SourceOp::MultiBroadcast);
        let result = aligned_shape(
            SourceOp::MultiBroadcast,
            &node,
            &f32_ty(&[4]),
            &f32_ty(&[2, 4]),
        );
        assert!(matches!(result, Err(Error::UnsupportedShape(_))));
    }

    #[test]
    fn test_broadcast_axis_out_of_range() {
        let node = Node::new(SourceOp::Broadcast).with_attribute("axis", 3i64);
        let result = aligned_shape(SourceOp::Broadcast, &node, &f32_ty(&[3]), &f32_ty(&[3, 3]));
        assert!(matches!(result, Err(Error::Attribute(_))));
    }

    #[test]
    fn test_commutative_consumer_is_swapped() {
        let mut graph = Graph::new();
        let x = graph.add_input("x", f32_ty(&[2, 3]));
        let bias = graph.add_input("bias", f32_ty(&[3]));
        let bcast = graph
            .add_node(
                Node::new(SourceOp::Broadcast)
                    .with_input(bias)
                    .with_attribute("axis", 1i64),
                vec![f32_ty(&[2, 3])],
            )
            .unwrap();
        let bcast_out = graph.node(bcast).unwrap().output().unwrap();
        let add = graph
            .add_node(
                Node::new(SourceOp::Add).with_inputs([bcast_out, x]),
                vec![f32_ty(&[2, 3])],
            )
            .unwrap();

        let mut b = Builder::new(&mut graph, "bcast");
        align_broadcast(&mut b, bcast).unwrap();
        b.commit();

        let add_node = graph.node(add).unwrap();
        assert_eq!(add_node.input(0).unwrap(), x);
        let rewired = add_node.input(1).unwrap();
        assert_eq!(graph.value_type(rewired).unwrap().shape, vec![1, 3]);
        assert!(graph.uses(bcast_out).is_empty());
        assert!(graph.verify().is_ok());
    }

    #[test]
    fn test_non_commutative_first_operand_is_rejected() {
        let mut graph = Graph::new();
        let x = graph.add_input("x", f32_ty(&[2, 3]));
        let bias = graph.add_input("bias", f32_ty(&[3]));
        let bcast = graph
            .add_node(
                Node::new(SourceOp::Broadcast)
                    .with_input(bias)
                    .with_attribute("axis", 1i64),
                vec![f32_ty(&[2, 3])],
            )
            .unwrap();
        let bcast_out = graph.node(bcast).unwrap().output().unwrap();
        let sub = graph
            .add_node(
                Node::new(SourceOp::Sub).with_inputs([bcast_out, x]),
                vec![f32_ty(&[2, 3])],
            )
            .unwrap();

        let mut b = Builder::new(&mut graph, "bcast");
        let result = align_broadcast(&mut b, bcast);
        assert!(matches!(result, Err(Error::UnsupportedOperand(_))));
        assert!(b.created().is_empty());
        b.rollback().unwrap();

        assert_eq!(graph.node(sub).unwrap().inputs(), &[bcast_out, x]);
        assert!(graph.verify().is_ok());
    }

    #[test]
    fn test_non_elementwise_consumer_is_rejected() {
        let mut graph = Graph::new();
        let v = graph.add_input("v", f32_ty(&[4]));
        let bcast = graph
            .add_node(
                Node::new(SourceOp::MultiBroadcast).with_input(v),
                vec![f32_ty(&[4, 1])],
            )
            .unwrap();
        let bcast_out = graph.node(bcast).unwrap().output().unwrap();
        graph
            .add_node(
                Node::new(SourceOp::Softmax).with_input(bcast_out),
                vec![f32_ty(&[4, 1])],
            )
            .unwrap();

        let mut b = Builder::new(&mut graph, "bcast");
        let result = align_broadcast(&mut b, bcast);
        assert!(matches!(result, Err(Error::UnsupportedOperand(_))));
    }
}
