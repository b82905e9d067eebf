//! Target contract verification pass.

use tessera_core::{DataType, Diagnostic, Error, Graph, Pass, Result, Stage, TargetOp};

/// Pass that checks a lowered graph is ready for the code generator.
///
/// - every node is a target primitive
/// - every `conv2d` over `i8` input carries `quantization_info`
///
/// Leftover source nodes are tolerated when `allow_source` is set, since the
/// partial policy has already reported them.
pub struct VerifyTargetPass {
    allow_source: bool,
}

impl VerifyTargetPass {
    /// Create a verification pass that rejects leftover source nodes.
    pub fn new() -> Self {
        Self {
            allow_source: false,
        }
    }

    /// Tolerate unconverted source nodes.
    pub fn allowing_source(mut self) -> Self {
        self.allow_source = true;
        self
    }
}

impl Default for VerifyTargetPass {
    fn default() -> Self {
        Self::new()
    }
}

impl Pass for VerifyTargetPass {
    fn name(&self) -> &str {
        "verify_target"
    }

    fn stage(&self) -> Stage {
        Stage::Verification
    }

    fn run(&self, graph: &mut Graph, _diagnostics: &mut Vec<Diagnostic>) -> Result<bool> {
        for node_id in graph.topological_order() {
            let node = graph.node(node_id)?;

            let Some(op) = node.kind.as_target() else {
                if self.allow_source {
                    continue;
                }
                return Err(Error::InvalidGraph(format!(
                    "'{}' ({}) was not lowered",
                    node.display_name(),
                    node.kind
                )));
            };

            if op == TargetOp::Conv2d {
                let input = graph.value_type(node.input(0)?)?;
                if input.dtype == DataType::I8 && node.attr("quantization_info").is_none() {
                    return Err(Error::InvalidGraph(format!(
                        "i8 conv2d '{}' lacks quantization_info",
                        node.display_name()
                    )));
                }
            }
        }

        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::{Node, SourceOp, TensorType, TensorValue};

    #[test]
    fn test_rejects_source_nodes() {
        let mut graph = Graph::new();
        let ty = TensorType::new(DataType::F32, vec![2]);
        let x = graph.add_input("x", ty.clone());
        graph
            .add_node(Node::new(SourceOp::Softmax).with_input(x), vec![ty])
            .unwrap();
        let mut diagnostics = Vec::new();

        let result = VerifyTargetPass::new().run(&mut graph, &mut diagnostics);
        assert!(matches!(result, Err(Error::InvalidGraph(_))));

        let result = VerifyTargetPass::new()
            .allowing_source()
            .run(&mut graph, &mut diagnostics);
        assert!(result.is_ok());
    }

    #[test]
    fn test_rejects_int8_conv_without_quantization_info() {
        let mut graph = Graph::new();
        let x = graph.add_input("x", TensorType::new(DataType::I8, vec![1, 4, 4, 2]));
        let w = graph.add_input("w", TensorType::new(DataType::I8, vec![3, 1, 1, 2]));
        let bias = TensorValue::zeros(DataType::I32, vec![3]);
        let bias_ty = bias.ty();
        let bias_id = graph
            .add_node(
                Node::new(TargetOp::Const).with_attribute("value", bias),
                vec![bias_ty],
            )
            .unwrap();
        let bias_out = graph.node(bias_id).unwrap().output().unwrap();
        graph
            .add_node(
                Node::new(TargetOp::Conv2d)
                    .with_inputs([x, w, bias_out])
                    .with_attribute("pad", vec![0i64, 0, 0, 0])
                    .with_attribute("stride", vec![1i64, 1])
                    .with_attribute("dilation", vec![1i64, 1]),
                vec![TensorType::new(DataType::I32, vec![1, 4, 4, 3])],
            )
            .unwrap();
        let mut diagnostics = Vec::new();

        let result = VerifyTargetPass::new().run(&mut graph, &mut diagnostics);
        assert!(matches!(result, Err(Error::InvalidGraph(_))));
    }
}
