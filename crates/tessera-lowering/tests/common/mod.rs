//! Common test utilities for lowering integration tests.
//!
//! Graph builders used across test files, plus helpers that evaluate a graph
//! before and after lowering with the reference interpreter.

#![allow(dead_code)]

use std::collections::HashMap;
use tessera_core::{
    AttributeValue, DataType, Graph, Node, OpKind, TensorData, TensorType, TensorValue, ValueId,
};
use tessera_lowering::{LoweringOptions, LoweringReport, lower_graph};

/// Install a test subscriber once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_target(false)
        .with_test_writer()
        .try_init();
}

/// Create a graph with one operator node over fresh inputs.
///
/// Graph structure:
/// - Inputs: in0..inN with the given types
/// - Operation: op(in0, .., inN) [attributes] -> y
/// - Output: y:[output]
///
/// # Arguments
/// * `op` - Source or target operator
/// * `inputs` - Types of the graph inputs, in operand order
/// * `output` - Declared type of the result
/// * `attributes` - Node attributes
pub fn make_single_op_graph(
    op: impl Into<OpKind>,
    inputs: &[TensorType],
    output: TensorType,
    attributes: Vec<(&str, AttributeValue)>,
) -> (Graph, Vec<ValueId>) {
    let mut graph = Graph::new();
    let ids: Vec<ValueId> = inputs
        .iter()
        .enumerate()
        .map(|(i, ty)| graph.add_input(format!("in{}", i), ty.clone()))
        .collect();

    let mut node = Node::new(op).with_name("op").with_inputs(ids.iter().copied());
    for (key, value) in attributes {
        node = node.with_attribute(key, value);
    }
    let id = graph.add_node(node, vec![output]).unwrap();
    let y = graph.node(id).unwrap().output().unwrap();
    graph.mark_output(y).unwrap();

    (graph, ids)
}

/// Add a node to `graph` and return its single result.
pub fn push(graph: &mut Graph, node: Node, output: TensorType) -> ValueId {
    let id = graph.add_node(node, vec![output]).unwrap();
    graph.node(id).unwrap().output().unwrap()
}

/// Shorthand for a tensor type.
pub fn ty(dtype: DataType, shape: &[usize]) -> TensorType {
    TensorType::new(dtype, shape.to_vec())
}

/// Deterministic, non-constant test data for `ty`.
///
/// Floats lie in [-1.5, 1.5]; integers in [-6, 6].
pub fn ramp(ty: &TensorType) -> TensorValue {
    let numel = ty.numel();
    let data = match ty.dtype {
        DataType::F32 => TensorData::F32(
            (0..numel)
                .map(|i| ((i * 7) % 13) as f32 * 0.25 - 1.5)
                .collect(),
        ),
        dtype => TensorData::from_i64_wrapping(
            dtype,
            &(0..numel).map(|i| ((i * 5) % 13) as i64 - 6).collect::<Vec<_>>(),
        )
        .unwrap(),
    };
    TensorValue::new(data, ty.shape.clone()).unwrap()
}

/// Feed every graph input with [`ramp`] data.
pub fn ramp_feeds(graph: &Graph) -> HashMap<ValueId, TensorValue> {
    graph
        .inputs()
        .iter()
        .map(|&id| (id, ramp(graph.value_type(id).unwrap())))
        .collect()
}

/// Assert two float slices agree within `tolerance` (absolute).
pub fn assert_close(actual: &[f32], expected: &[f32], tolerance: f32) {
    assert_eq!(actual.len(), expected.len(), "length mismatch");
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        assert!(
            (a - e).abs() <= tolerance,
            "element {}: {} vs {} (tolerance {})",
            i,
            a,
            e,
            tolerance
        );
    }
}

/// Lower `graph` and check that every output evaluates to the same values
/// as before, within `tolerance` for floats and exactly for integers.
///
/// Returns the lowered graph and the report.
pub fn assert_lowering_preserves(
    graph: &Graph,
    feeds: &HashMap<ValueId, TensorValue>,
    tolerance: f32,
) -> (Graph, LoweringReport) {
    init_tracing();

    let expected = tessera_eval::evaluate(graph, feeds).unwrap();

    let mut lowered = graph.clone();
    let report = lower_graph(&mut lowered, &LoweringOptions::default()).unwrap();
    assert!(report.is_complete(), "{:?}", report.diagnostics);
    assert!(
        lowered.nodes().all(|(_, n)| !n.kind.is_source()),
        "source nodes survived lowering"
    );
    lowered.verify().unwrap();

    let actual = tessera_eval::evaluate(&lowered, feeds).unwrap();
    assert_eq!(actual.len(), expected.len());
    for (a, e) in actual.iter().zip(&expected) {
        assert_eq!(a.ty(), e.ty());
        match (a.as_f32(), e.as_f32()) {
            (Some(a), Some(e)) => assert_close(a, e, tolerance),
            _ => assert_eq!(a, e),
        }
    }

    (lowered, report)
}

/// Count nodes of `graph` whose kind is `op`.
pub fn count_ops(graph: &Graph, op: impl Into<OpKind>) -> usize {
    let op = op.into();
    graph.nodes().filter(|(_, n)| n.kind == op).count()
}
