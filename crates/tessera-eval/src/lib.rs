//! Reference CPU interpreter for tessera graphs.
//!
//! Evaluates both source and target operators on dense host tensors so a
//! graph can be run before and after lowering and the results compared.
//! Floats follow `f32` storage (each node's result is rounded to `f32`);
//! integer arithmetic wraps at the width of the result type.

pub mod array;
pub mod error;
pub mod kernels;

pub use error::{EvalError, Result};

use array::{Elements, broadcast_indices, permute};
use kernels::{Arith, ConvParams, KernelError, Reduction};
use std::collections::HashMap;
use tessera_core::{
    DataType, Graph, Node, OpKind, SourceOp, TargetOp, TensorType, TensorValue, ValueId,
};

/// Run `graph` on `inputs` and return the graph outputs in declaration order.
///
/// Every graph input must be supplied with exactly its declared type.
#[tracing::instrument(skip_all, fields(num_nodes = graph.node_count()))]
pub fn evaluate(graph: &Graph, inputs: &HashMap<ValueId, TensorValue>) -> Result<Vec<TensorValue>> {
    let mut env: HashMap<ValueId, TensorValue> = HashMap::new();

    for &id in graph.inputs() {
        let value = graph.value(id)?;
        let supplied = inputs
            .get(&id)
            .ok_or_else(|| EvalError::MissingInput(value.name.clone()))?;
        if supplied.ty() != value.ty {
            return Err(EvalError::InvalidInput(format!(
                "'{}' expects {}, got {}",
                value.name,
                value.ty,
                supplied.ty()
            )));
        }
        env.insert(id, supplied.clone());
    }

    for node_id in graph.topological_order() {
        let node = graph.node(node_id)?;
        let operands = node
            .inputs()
            .iter()
            .map(|id| {
                env.get(id).ok_or_else(|| {
                    EvalError::ExecutionError(format!(
                        "operand {} of '{}' has no value",
                        id,
                        node.display_name()
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let output = node.output()?;
        let declared = graph.value_type(output)?;
        let value = eval_node(node, &operands, declared)?;
        if value.ty() != *declared {
            return Err(EvalError::ExecutionError(format!(
                "'{}' ({}) produced {}, declared {}",
                node.display_name(),
                node.kind,
                value.ty(),
                declared
            )));
        }

        tracing::trace!(node = %node.display_name(), op = %node.kind, ty = %declared, "evaluated");
        env.insert(output, value);
    }

    graph
        .outputs()
        .iter()
        .map(|id| {
            env.get(id)
                .cloned()
                .ok_or_else(|| EvalError::ExecutionError(format!("output {} has no value", id)))
        })
        .collect()
}

fn eval_node(node: &Node, operands: &[&TensorValue], declared: &TensorType) -> Result<TensorValue> {
    let name = node.display_name();
    let kernel_error = |err: KernelError| match err {
        KernelError::DivisionByZero => EvalError::DivisionByZero(name.clone()),
        KernelError::Invalid(message) => {
            EvalError::ExecutionError(format!("'{}' ({}): {}", name, node.kind, message))
        }
    };
    let operand = |i: usize| {
        operands.get(i).copied().ok_or_else(|| {
            EvalError::ExecutionError(format!("'{}' has no operand {}", name, i))
        })
    };
    let out_dtype = declared.dtype;
    let out_shape = declared.shape.clone();

    match node.kind {
        OpKind::Source(op) => match op {
            SourceOp::Add => binary(Arith::Add, operand(0)?, operand(1)?, declared, kernel_error),
            SourceOp::Sub => binary(Arith::Sub, operand(0)?, operand(1)?, declared, kernel_error),
            SourceOp::Mul => binary(Arith::Mul, operand(0)?, operand(1)?, declared, kernel_error),

            SourceOp::Reshape => Ok(operand(0)?.reshape(dims(node, "dims")?)?),

            SourceOp::Broadcast => {
                let x = operand(0)?;
                let axis = axis_attr(node, "axis", out_shape.len(), None)?;
                if x.ndim() != 1 || out_shape[axis] != x.len() {
                    return Err(EvalError::ExecutionError(format!(
                        "'{}' cannot place {} along axis {} of {:?}",
                        name,
                        x.ty(),
                        axis,
                        out_shape
                    )));
                }
                kernels::broadcast_axis(&Elements::of(x), &out_shape, axis)
                    .into_value(out_dtype, out_shape)
            }

            SourceOp::MultiBroadcast => {
                let x = operand(0)?;
                // Left-aligned: trailing axes are padded with ones
                let mut shape = x.shape.clone();
                if shape.len() > out_shape.len() {
                    return Err(EvalError::ExecutionError(format!(
                        "'{}' cannot broadcast {} to {:?}",
                        name,
                        x.ty(),
                        out_shape
                    )));
                }
                shape.resize(out_shape.len(), 1);
                if shape.iter().zip(&out_shape).any(|(&d, &o)| d != 1 && d != o) {
                    return Err(EvalError::ExecutionError(format!(
                        "'{}' cannot broadcast {} to {:?}",
                        name,
                        x.ty(),
                        out_shape
                    )));
                }
                Elements::of(x)
                    .select(&broadcast_indices(&shape, &out_shape))
                    .into_value(out_dtype, out_shape)
            }

            SourceOp::Softmax => {
                let x = operand(0)?;
                let axis = axis_attr(node, "axis", x.ndim(), Some(1))?;
                kernels::softmax(&Elements::of(x), &x.shape, axis)
                    .map_err(kernel_error)?
                    .into_value(out_dtype, out_shape)
            }

            SourceOp::ReduceMean => {
                let x = operand(0)?;
                let axes = node
                    .attr_ints("axes")?
                    .iter()
                    .map(|&a| normalize_axis(a, x.ndim()))
                    .collect::<Result<Vec<_>>>()?;
                let (out, shape) = kernels::reduce(&Elements::of(x), &x.shape, &axes, Reduction::Mean)
                    .map_err(kernel_error)?;
                out.into_value(out_dtype, shape)
            }

            SourceOp::Dot => {
                let (a, b) = (operand(0)?, operand(1)?);
                let (out, shape) = kernels::batched_matmul(
                    (&Elements::of(a), &a.shape),
                    (&Elements::of(b), &b.shape),
                )
                .map_err(kernel_error)?;
                out.into_value(out_dtype, shape)
            }

            SourceOp::Convolution => {
                let (x, w) = (operand(0)?, operand(1)?);
                let params = conv_params(node, "padding")?;
                let (out, shape) = kernels::conv2d_nchw(
                    (&Elements::of(x), &x.shape),
                    (&Elements::of(w), &w.shape),
                    &params,
                )
                .map_err(kernel_error)?;
                out.into_value(out_dtype, shape)
            }

            SourceOp::QuantizeLinear => quantize_linear(node, operands, kernel_error),
        },

        OpKind::Target(op) => match op {
            TargetOp::Const => node
                .attr("value")
                .and_then(|v| v.as_tensor())
                .cloned()
                .ok_or_else(|| {
                    EvalError::ExecutionError(format!("const '{}' has no tensor 'value'", name))
                }),

            TargetOp::Add => binary(Arith::Add, operand(0)?, operand(1)?, declared, kernel_error),
            TargetOp::Sub => binary(Arith::Sub, operand(0)?, operand(1)?, declared, kernel_error),
            TargetOp::Mul => binary(Arith::Mul, operand(0)?, operand(1)?, declared, kernel_error),
            TargetOp::IntDiv => {
                binary(Arith::Div, operand(0)?, operand(1)?, declared, kernel_error)
            }

            TargetOp::Exp => kernels::unary_float(&Elements::of(operand(0)?), f64::exp)
                .map_err(kernel_error)?
                .into_value(out_dtype, out_shape),
            TargetOp::Reciprocal => kernels::unary_float(&Elements::of(operand(0)?), |x| 1.0 / x)
                .map_err(kernel_error)?
                .into_value(out_dtype, out_shape),

            TargetOp::Cast => Ok(operand(0)?.cast(out_dtype)),

            TargetOp::Reshape => Ok(operand(0)?.reshape(dims(node, "new_shape")?)?),

            TargetOp::Transpose => {
                let x = operand(0)?;
                let perm = permutation(operand(1)?, x.ndim()).ok_or_else(|| {
                    EvalError::ExecutionError(format!("'{}' has an invalid permutation", name))
                })?;
                let (out, shape) = permute(&Elements::of(x), &x.shape, &perm);
                out.into_value(out_dtype, shape)
            }

            TargetOp::ReduceMax | TargetOp::ReduceSum => {
                let x = operand(0)?;
                let axis = axis_attr(node, "axis", x.ndim(), None)?;
                let reduction = if op == TargetOp::ReduceMax {
                    Reduction::Max
                } else {
                    Reduction::Sum
                };
                let (out, shape) = kernels::reduce(&Elements::of(x), &x.shape, &[axis], reduction)
                    .map_err(kernel_error)?;
                out.into_value(out_dtype, shape)
            }

            TargetOp::MatMul => {
                let (a, b) = (operand(0)?, operand(1)?);
                if a.ndim() != 3 || b.ndim() != 3 || a.shape[0] != b.shape[0] {
                    return Err(EvalError::ExecutionError(format!(
                        "matmul '{}' needs rank-3 operands with equal batch, got {} and {}",
                        name,
                        a.ty(),
                        b.ty()
                    )));
                }
                let (out, shape) = kernels::batched_matmul(
                    (&Elements::of(a), &a.shape),
                    (&Elements::of(b), &b.shape),
                )
                .map_err(kernel_error)?;
                out.into_value(out_dtype, shape)
            }

            TargetOp::Conv2d => {
                let (x, w, bias) = (operand(0)?, operand(1)?, operand(2)?);
                let params = conv_params(node, "pad")?;
                // NHWC / OHWI into NCHW / OIHW and back
                let (x_nchw, x_shape) = permute(&Elements::of(x), &x.shape, &[0, 3, 1, 2]);
                let (w_oihw, w_shape) = permute(&Elements::of(w), &w.shape, &[0, 3, 1, 2]);
                let (acc, acc_shape) =
                    kernels::conv2d_nchw((&x_nchw, &x_shape), (&w_oihw, &w_shape), &params)
                        .map_err(kernel_error)?;
                let (acc, nhwc) = permute(&acc, &acc_shape, &[0, 2, 3, 1]);

                let acc = widen_to(acc, out_dtype);
                let out = kernels::binary(
                    Arith::Add,
                    (&acc, &nhwc),
                    (&Elements::of(bias), &bias.shape),
                    &nhwc,
                )
                .map_err(kernel_error)?;
                out.into_value(out_dtype, nhwc)
            }
        },
    }
}

fn binary(
    op: Arith,
    lhs: &TensorValue,
    rhs: &TensorValue,
    declared: &TensorType,
    kernel_error: impl Fn(KernelError) -> EvalError,
) -> Result<TensorValue> {
    let out_shape = tessera_core::broadcast_shape(&lhs.shape, &rhs.shape)?;
    kernels::binary(
        op,
        (&Elements::of(lhs), &lhs.shape),
        (&Elements::of(rhs), &rhs.shape),
        &out_shape,
    )
    .map_err(kernel_error)?
    .into_value(declared.dtype, out_shape)
}

/// Affine quantization: `cast<i8>(cast<f32>(x + bias) * scale)`.
///
/// Each intermediate is stored at its own element type, so integer bias
/// addition wraps and the product rounds to `f32` before narrowing.
fn quantize_linear(
    node: &Node,
    operands: &[&TensorValue],
    kernel_error: impl Fn(KernelError) -> EvalError,
) -> Result<TensorValue> {
    let name = node.display_name();
    let (x, scale, bias) = match operands {
        [x, scale] => (*x, *scale, None),
        [x, scale, bias] => (*x, *scale, Some(*bias)),
        _ => {
            return Err(EvalError::ExecutionError(format!(
                "quantizelinear '{}' takes 2 or 3 operands",
                name
            )));
        }
    };
    let axis = if x.ndim() > 1 {
        axis_attr(node, "axis", x.ndim(), Some(1))?
    } else {
        0
    };
    let place = |param: &TensorValue| {
        channel_shape(&param.shape, &x.shape, axis).ok_or_else(|| {
            EvalError::ExecutionError(format!(
                "'{}': {} cannot be placed along axis {} of {}",
                name,
                param.ty(),
                axis,
                x.ty()
            ))
        })
    };

    let shifted = match bias {
        Some(bias) => kernels::binary(
            Arith::Add,
            (&Elements::of(x), &x.shape),
            (&Elements::of(bias), &place(bias)?),
            &x.shape,
        )
        .map_err(&kernel_error)?
        .into_value(x.dtype, x.shape.clone())?,
        None => x.clone(),
    };

    let widened = shifted.cast(DataType::F32);
    let scaled = kernels::binary(
        Arith::Mul,
        (&Elements::of(&widened), &widened.shape),
        (&Elements::of(scale), &place(scale)?),
        &x.shape,
    )
    .map_err(&kernel_error)?
    .into_value(DataType::F32, x.shape.clone())?;

    Ok(scaled.cast(DataType::I8))
}

/// Shape under which a scale or bias broadcasts into `target`: same rank,
/// a single element, or a rank-1 vector along `axis`.
fn channel_shape(param: &[usize], target: &[usize], axis: usize) -> Option<Vec<usize>> {
    let numel: usize = param.iter().product();
    let shape = if param.len() == target.len() {
        param.to_vec()
    } else if numel == 1 {
        vec![1; target.len()]
    } else if param.len() == 1 && target.get(axis) == Some(&param[0]) {
        let mut shape = vec![1; target.len()];
        shape[axis] = param[0];
        shape
    } else {
        return None;
    };

    shape
        .iter()
        .zip(target)
        .all(|(&p, &t)| p == 1 || p == t)
        .then_some(shape)
}

fn widen_to(elements: Elements, dtype: DataType) -> Elements {
    match elements {
        Elements::Int(v) if dtype.is_float() => {
            Elements::Float(v.into_iter().map(|x| x as f64).collect())
        }
        other => other,
    }
}

fn normalize_axis(axis: i64, rank: usize) -> Result<usize> {
    let resolved = if axis < 0 { axis + rank as i64 } else { axis };
    usize::try_from(resolved)
        .ok()
        .filter(|&a| a < rank)
        .ok_or_else(|| {
            EvalError::ExecutionError(format!("axis {} out of range for rank {}", axis, rank))
        })
}

fn axis_attr(node: &Node, key: &str, rank: usize, default: Option<i64>) -> Result<usize> {
    let axis = match (node.attr(key), default) {
        (None, Some(default)) => default,
        _ => node.attr_i64(key)?,
    };
    normalize_axis(axis, rank)
}

fn dims(node: &Node, key: &str) -> Result<Vec<usize>> {
    node.attr_ints(key)?
        .iter()
        .map(|&d| {
            usize::try_from(d).map_err(|_| {
                EvalError::ExecutionError(format!(
                    "'{}' of '{}' has a negative entry",
                    key,
                    node.display_name()
                ))
            })
        })
        .collect()
}

fn conv_params(node: &Node, pad_key: &str) -> Result<ConvParams> {
    let non_negative = |key: &str, arity: usize| -> Result<Vec<usize>> {
        let values = dims(node, key)?;
        if values.len() != arity {
            return Err(EvalError::ExecutionError(format!(
                "'{}' of '{}' needs {} entries",
                key,
                node.display_name(),
                arity
            )));
        }
        Ok(values)
    };
    let pad = non_negative(pad_key, 4)?;
    let stride = non_negative("stride", 2)?;
    let dilation = non_negative("dilation", 2)?;

    Ok(ConvParams {
        pad: [pad[0], pad[1], pad[2], pad[3]],
        stride: [stride[0], stride[1]],
        dilation: [dilation[0], dilation[1]],
    })
}

fn permutation(perm: &TensorValue, rank: usize) -> Option<Vec<usize>> {
    let perm = perm
        .data
        .to_i64()?
        .into_iter()
        .map(|p| usize::try_from(p).ok())
        .collect::<Option<Vec<_>>>()?;
    let mut seen = vec![false; rank];
    for &p in &perm {
        if p >= rank || std::mem::replace(&mut seen[p], true) {
            return None;
        }
    }
    (perm.len() == rank).then_some(perm)
}
