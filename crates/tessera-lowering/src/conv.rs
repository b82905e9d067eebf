//! Convolution lowering.
//!
//! Source convolution is channel-first (`NCHW` input, `OIHW` filter); target
//! `conv2d` is channel-last (`NHWC` input, `OHWI` filter) and always takes a
//! bias. The rule wraps the primitive in a layout round trip.

use crate::builder::Builder;
use crate::layout::{NCHW_TO_NHWC, NHWC_TO_NCHW, transpose_layout};
use crate::matmul::pass_through;
use tessera_core::{AttributeValue, DataType, Error, Node, Result, TargetOp, TensorValue, ValueId};

/// Read an integer-list attribute of fixed arity with non-negative entries.
fn spatial_attr(node: &Node, key: &str, arity: usize) -> Result<Vec<i64>> {
    let values = node.attr_ints(key)?;
    if values.len() != arity {
        return Err(Error::Attribute(format!(
            "'{}' of '{}' needs {} values, got {:?}",
            key,
            node.display_name(),
            arity,
            values
        )));
    }
    if values.iter().any(|&v| v < 0) {
        return Err(Error::Attribute(format!(
            "'{}' of '{}' has a negative entry: {:?}",
            key,
            node.display_name(),
            values
        )));
    }
    Ok(values.to_vec())
}

/// Lower a source `convolution` to transposes around a target `conv2d`.
pub fn lower_convolution(b: &mut Builder, node: &Node) -> Result<ValueId> {
    let (input, filter) = (node.input(0)?, node.input(1)?);
    let input_ty = b.value_type(input)?;
    let filter_ty = b.value_type(filter)?;
    let out_ty = b.value_type(node.output()?)?;

    if input_ty.rank() != 4 || filter_ty.rank() != 4 {
        return Err(Error::UnsupportedRank(format!(
            "convolution supports rank-4 NCHW input and OIHW filter, got {} and {}",
            input_ty, filter_ty
        )));
    }

    // Translate attributes before building anything
    let mut attributes = pass_through(node);
    attributes.insert(
        "pad".to_string(),
        AttributeValue::Ints(spatial_attr(node, "padding", 4)?),
    );
    attributes.insert(
        "stride".to_string(),
        AttributeValue::Ints(spatial_attr(node, "stride", 2)?),
    );
    attributes.insert(
        "dilation".to_string(),
        AttributeValue::Ints(spatial_attr(node, "dilation", 2)?),
    );
    if input_ty.dtype == DataType::I8 {
        attributes.insert(
            "quantization_info".to_string(),
            AttributeValue::ConvQuantization {
                input_zp: 0,
                weight_zp: 0,
            },
        );
    }

    let input_nhwc = transpose_layout(b, input, NCHW_TO_NHWC)?;
    let filter_ohwi = transpose_layout(b, filter, NCHW_TO_NHWC)?;
    let output_channels = filter_ty.shape[0];
    let bias = b.constant(TensorValue::zeros(out_ty.dtype, vec![output_channels]))?;

    let conv = b.build(
        TargetOp::Conv2d,
        out_ty.dtype,
        &[input_nhwc, filter_ohwi, bias],
        attributes,
    )?;

    transpose_layout(b, conv, NHWC_TO_NCHW)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::{Graph, SourceOp, TensorType};

    fn conv_node(input: ValueId, filter: ValueId) -> Node {
        Node::new(SourceOp::Convolution)
            .with_inputs([input, filter])
            .with_attribute("padding", vec![1i64, 1, 1, 1])
            .with_attribute("stride", vec![1i64, 1])
            .with_attribute("dilation", vec![1i64, 1])
    }

    fn conv_graph(dtype: DataType, out_dtype: DataType) -> (Graph, Node) {
        let mut graph = Graph::new();
        let x = graph.add_input("x", TensorType::new(dtype, vec![1, 3, 8, 8]));
        let w = graph.add_input("w", TensorType::new(dtype, vec![4, 3, 3, 3]));
        let id = graph
            .add_node(
                conv_node(x, w),
                vec![TensorType::new(out_dtype, vec![1, 4, 8, 8])],
            )
            .unwrap();
        let node = graph.node(id).unwrap().clone();
        (graph, node)
    }

    fn built_conv(b: &Builder) -> Node {
        b.created()
            .iter()
            .filter_map(|&id| b.graph().node(id).ok())
            .find(|n| n.kind.as_target() == Some(TargetOp::Conv2d))
            .cloned()
            .unwrap()
    }

    #[test]
    fn test_float_convolution_round_trip() {
        let (mut graph, node) = conv_graph(DataType::F32, DataType::F32);

        let mut b = Builder::new(&mut graph, "conv");
        let y = lower_convolution(&mut b, &node).unwrap();
        assert_eq!(b.value_type(y).unwrap().shape, vec![1, 4, 8, 8]);

        let conv = built_conv(&b);
        assert_eq!(b.value_type(conv.output().unwrap()).unwrap().shape, vec![1, 8, 8, 4]);
        assert_eq!(conv.attr_ints("pad").unwrap(), &[1, 1, 1, 1]);
        assert!(conv.attr("quantization_info").is_none());

        let bias = b.graph().constant_value(conv.input(2).unwrap()).unwrap();
        assert_eq!(bias.shape, vec![4]);
        assert_eq!(bias.dtype, DataType::F32);
    }

    #[test]
    fn test_int8_convolution_carries_quantization_info() {
        let (mut graph, node) = conv_graph(DataType::I8, DataType::I32);

        let mut b = Builder::new(&mut graph, "conv");
        lower_convolution(&mut b, &node).unwrap();

        let conv = built_conv(&b);
        assert_eq!(
            conv.attr("quantization_info"),
            Some(&AttributeValue::ConvQuantization {
                input_zp: 0,
                weight_zp: 0
            })
        );
        let bias = b.graph().constant_value(conv.input(2).unwrap()).unwrap();
        assert_eq!(bias.dtype, DataType::I32);
    }

    #[test]
    fn test_wrong_arity_attribute() {
        let mut graph = Graph::new();
        let x = graph.add_input("x", TensorType::new(DataType::F32, vec![1, 3, 8, 8]));
        let w = graph.add_input("w", TensorType::new(DataType::F32, vec![4, 3, 3, 3]));
        let node = conv_node(x, w).with_attribute("stride", vec![1i64]);
        let id = graph
            .add_node(
                node,
                vec![TensorType::new(DataType::F32, vec![1, 4, 8, 8])],
            )
            .unwrap();
        let node = graph.node(id).unwrap().clone();

        let mut b = Builder::new(&mut graph, "conv");
        let result = lower_convolution(&mut b, &node);
        assert!(matches!(result, Err(Error::Attribute(_))));
        assert!(b.created().is_empty());
    }

    #[test]
    fn test_rank_3_convolution_is_rejected() {
        let mut graph = Graph::new();
        let x = graph.add_input("x", TensorType::new(DataType::F32, vec![1, 3, 8]));
        let w = graph.add_input("w", TensorType::new(DataType::F32, vec![4, 3, 3]));
        let id = graph
            .add_node(
                conv_node(x, w),
                vec![TensorType::new(DataType::F32, vec![1, 4, 8])],
            )
            .unwrap();
        let node = graph.node(id).unwrap().clone();

        let mut b = Builder::new(&mut graph, "conv");
        let result = lower_convolution(&mut b, &node);
        assert!(matches!(result, Err(Error::UnsupportedRank(_))));
    }
}
