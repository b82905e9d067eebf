//! End-to-end tests for batched dot lowering.

mod common;

use common::*;
use tessera_core::{AttributeValue, DataType, Error, SourceOp, TargetOp};
use tessera_lowering::{LoweringOptions, lower_graph};

fn dot_graph(a: &[usize], b: &[usize], out: &[usize]) -> tessera_core::Graph {
    make_single_op_graph(
        SourceOp::Dot,
        &[ty(DataType::F32, a), ty(DataType::F32, b)],
        ty(DataType::F32, out),
        vec![],
    )
    .0
}

#[test]
fn test_equal_batch() {
    let graph = dot_graph(&[4, 2, 3], &[4, 3, 5], &[4, 2, 5]);
    let (lowered, _) = assert_lowering_preserves(&graph, &ramp_feeds(&graph), 1e-5);

    assert_eq!(count_ops(&lowered, TargetOp::MatMul), 1);
    assert_eq!(count_ops(&lowered, TargetOp::Reshape), 0);
}

#[test]
fn test_unit_batch() {
    let graph = dot_graph(&[1, 2, 3], &[1, 3, 2], &[1, 2, 2]);
    assert_lowering_preserves(&graph, &ramp_feeds(&graph), 1e-5);
}

#[test]
fn test_rhs_batch_broadcast_folds_into_rows() {
    let graph = dot_graph(&[4, 2, 3], &[1, 3, 5], &[4, 2, 5]);
    let (lowered, _) = assert_lowering_preserves(&graph, &ramp_feeds(&graph), 1e-5);

    let matmul = lowered
        .nodes()
        .find(|(_, n)| n.kind.as_target() == Some(TargetOp::MatMul))
        .map(|(_, n)| n.output().unwrap())
        .unwrap();
    assert_eq!(lowered.value_type(matmul).unwrap().shape, vec![1, 8, 5]);
}

#[test]
fn test_lhs_batch_broadcast_is_unsupported() {
    let mut graph = dot_graph(&[1, 2, 3], &[4, 3, 5], &[4, 2, 5]);
    let nodes = graph.node_count();

    let err = lower_graph(&mut graph, &LoweringOptions::default()).unwrap_err();
    assert!(matches!(err, Error::UnsupportedBroadcastDirection(_)));
    assert_eq!(graph.node_count(), nodes);
    graph.verify().unwrap();
}

#[test]
fn test_rank_4_and_rank_2_are_reshaped() {
    let graph = dot_graph(&[2, 3, 2, 4], &[2, 3, 4, 2], &[2, 3, 2, 2]);
    let (lowered, _) = assert_lowering_preserves(&graph, &ramp_feeds(&graph), 1e-5);
    assert_eq!(count_ops(&lowered, TargetOp::Reshape), 3);

    let graph = dot_graph(&[3, 4], &[4, 2], &[3, 2]);
    assert_lowering_preserves(&graph, &ramp_feeds(&graph), 1e-5);
}

#[test]
fn test_integer_dot() {
    let (graph, _) = make_single_op_graph(
        SourceOp::Dot,
        &[ty(DataType::I32, &[2, 2, 3]), ty(DataType::I32, &[2, 3, 2])],
        ty(DataType::I32, &[2, 2, 2]),
        vec![],
    );
    assert_lowering_preserves(&graph, &ramp_feeds(&graph), 0.0);
}

#[test]
fn test_tuning_attributes_pass_through() {
    let (mut graph, _) = make_single_op_graph(
        SourceOp::Dot,
        &[ty(DataType::F32, &[1, 2, 3]), ty(DataType::F32, &[1, 3, 2])],
        ty(DataType::F32, &[1, 2, 2]),
        vec![
            ("perf_config", AttributeValue::String("v2:16,32".into())),
            ("xdlops", AttributeValue::Bool(true)),
            ("unrelated", AttributeValue::Int(7)),
        ],
    );
    lower_graph(&mut graph, &LoweringOptions::default()).unwrap();

    let (_, matmul) = graph
        .nodes()
        .find(|(_, n)| n.kind.as_target() == Some(TargetOp::MatMul))
        .unwrap();
    assert_eq!(
        matmul.attr("perf_config"),
        Some(&AttributeValue::String("v2:16,32".into()))
    );
    assert_eq!(matmul.attr("xdlops"), Some(&AttributeValue::Bool(true)));
    assert!(matmul.attr("unrelated").is_none());
}

#[test]
fn test_contraction_mismatch() {
    let mut graph = dot_graph(&[1, 2, 3], &[1, 4, 2], &[1, 2, 2]);
    let err = lower_graph(&mut graph, &LoweringOptions::default()).unwrap_err();
    assert!(matches!(err, Error::UnsupportedShape(_)));
}
