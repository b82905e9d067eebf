//! Output type inference for target primitives.
//!
//! Every target node the builder creates gets its result type from
//! [`infer_target`]. A violated precondition means the calling rule built
//! something malformed, so all failures are `Error::ShapeInference`.

use tessera_core::{
    AttributeValue, Attributes, DataType, Error, Graph, Result, TargetOp, TensorType, TensorValue,
    ValueId, implicit_broadcast_shape,
};

/// Context for target shape inference.
///
/// Provides read-only access to:
/// - Operand types
/// - Constant operand literals (for permutations)
/// - Node attributes
pub struct InferenceCtx<'a> {
    /// The operator being built.
    pub op: TargetOp,

    /// Requested result element type.
    pub dtype: DataType,

    /// Operand values.
    pub operands: &'a [ValueId],

    /// Attributes of the node being built.
    pub attributes: &'a Attributes,

    /// The graph the operands live in.
    pub graph: &'a Graph,
}

impl<'a> InferenceCtx<'a> {
    /// Get the type of an operand.
    pub fn input_type(&self, index: usize) -> Result<&'a TensorType> {
        let value = self
            .operands
            .get(index)
            .ok_or_else(|| self.shape_error(format!("operand {} not found", index)))?;
        self.graph.value_type(*value)
    }

    /// Get the shape of an operand.
    pub fn input_shape(&self, index: usize) -> Result<&'a [usize]> {
        Ok(&self.input_type(index)?.shape)
    }

    /// Get the literal of a constant operand, if it is produced by `const`.
    pub fn input_value(&self, index: usize) -> Option<&'a TensorValue> {
        let value = self.operands.get(index)?;
        self.graph.constant_value(*value)
    }

    /// Get the number of operands.
    pub fn input_count(&self) -> usize {
        self.operands.len()
    }

    /// Get an i64 attribute.
    pub fn attr_i64(&self, key: &str) -> Result<i64> {
        self.attributes
            .get(key)
            .and_then(AttributeValue::as_int)
            .ok_or_else(|| self.shape_error(format!("missing int attribute '{}'", key)))
    }

    /// Get an i64 array attribute.
    pub fn attr_ints(&self, key: &str) -> Result<&'a [i64]> {
        self.attributes
            .get(key)
            .and_then(AttributeValue::as_ints)
            .ok_or_else(|| self.shape_error(format!("missing ints attribute '{}'", key)))
    }

    /// Create a shape inference error naming the operator and its operands.
    pub fn shape_error(&self, message: impl Into<String>) -> Error {
        let operands = self
            .operands
            .iter()
            .map(|&v| match self.graph.value_type(v) {
                Ok(ty) => format!("{}: {}", v, ty),
                Err(_) => format!("{}: <unknown>", v),
            })
            .collect::<Vec<_>>()
            .join(", ");
        Error::ShapeInference(format!(
            "target.{}({}): {}",
            self.op.name(),
            operands,
            message.into()
        ))
    }

    fn expect_inputs(&self, count: usize) -> Result<()> {
        if self.input_count() != count {
            return Err(self.shape_error(format!(
                "expected {} operands, got {}",
                count,
                self.input_count()
            )));
        }
        Ok(())
    }

    fn expect_input_dtype(&self, index: usize) -> Result<()> {
        let ty = self.input_type(index)?;
        if ty.dtype != self.dtype {
            return Err(self.shape_error(format!(
                "operand {} has element type {}, result requested as {}",
                index, ty.dtype, self.dtype
            )));
        }
        Ok(())
    }

    fn axis(&self, rank: usize) -> Result<usize> {
        let axis = self.attr_i64("axis")?;
        usize::try_from(axis)
            .ok()
            .filter(|&a| a < rank)
            .ok_or_else(|| self.shape_error(format!("axis {} out of range for rank {}", axis, rank)))
    }
}

/// Infer the result type of a target primitive.
pub fn infer_target(ctx: &InferenceCtx) -> Result<TensorType> {
    match ctx.op {
        TargetOp::Const => infer_const(ctx),
        TargetOp::Transpose => infer_transpose(ctx),
        TargetOp::Reshape => infer_reshape(ctx),
        TargetOp::Conv2d => infer_conv2d(ctx),
        TargetOp::MatMul => infer_matmul(ctx),
        TargetOp::ReduceMax | TargetOp::ReduceSum => infer_reduce(ctx),
        TargetOp::Add | TargetOp::Sub | TargetOp::Mul | TargetOp::IntDiv => infer_binary(ctx),
        TargetOp::Exp | TargetOp::Reciprocal => infer_unary(ctx),
        TargetOp::Cast => {
            ctx.expect_inputs(1)?;
            Ok(ctx.input_type(0)?.with_dtype(ctx.dtype))
        }
    }
}

fn infer_const(ctx: &InferenceCtx) -> Result<TensorType> {
    ctx.expect_inputs(0)?;
    let value = ctx
        .attributes
        .get("value")
        .and_then(AttributeValue::as_tensor)
        .ok_or_else(|| ctx.shape_error("missing tensor attribute 'value'"))?;
    if value.dtype != ctx.dtype {
        return Err(ctx.shape_error(format!(
            "literal of type {} requested as {}",
            value.dtype, ctx.dtype
        )));
    }
    Ok(value.ty())
}

fn infer_transpose(ctx: &InferenceCtx) -> Result<TensorType> {
    ctx.expect_inputs(2)?;
    ctx.expect_input_dtype(0)?;
    let shape = ctx.input_shape(0)?;
    let perm = ctx
        .input_value(1)
        .and_then(TensorValue::as_i64)
        .ok_or_else(|| ctx.shape_error("permutation must be an i64 constant"))?;

    if perm.len() != shape.len() {
        return Err(ctx.shape_error(format!(
            "permutation {:?} does not match rank {}",
            perm,
            shape.len()
        )));
    }

    let mut seen = vec![false; shape.len()];
    let mut out = Vec::with_capacity(shape.len());
    for &p in perm {
        let axis = usize::try_from(p)
            .ok()
            .filter(|&a| a < shape.len() && !seen[a])
            .ok_or_else(|| ctx.shape_error(format!("{:?} is not a permutation", perm)))?;
        seen[axis] = true;
        out.push(shape[axis]);
    }

    Ok(TensorType::new(ctx.dtype, out))
}

fn infer_reshape(ctx: &InferenceCtx) -> Result<TensorType> {
    ctx.expect_inputs(1)?;
    ctx.expect_input_dtype(0)?;
    let input = ctx.input_type(0)?;
    let new_shape = ctx
        .attr_ints("new_shape")?
        .iter()
        .map(|&d| usize::try_from(d))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|_| ctx.shape_error("negative dimension in new_shape"))?;

    let numel: usize = new_shape.iter().product();
    if numel != input.numel() {
        return Err(ctx.shape_error(format!(
            "cannot reshape {} elements into {:?}",
            input.numel(),
            new_shape
        )));
    }

    Ok(TensorType::new(ctx.dtype, new_shape))
}

fn infer_conv2d(ctx: &InferenceCtx) -> Result<TensorType> {
    ctx.expect_inputs(3)?;
    let (input_dtype, filter_dtype) = (ctx.input_type(0)?.dtype, ctx.input_type(1)?.dtype);
    if input_dtype != filter_dtype {
        return Err(ctx.shape_error(format!(
            "input element type {} does not match filter element type {}",
            input_dtype, filter_dtype
        )));
    }
    let input = ctx.input_shape(0)?;
    let filter = ctx.input_shape(1)?;
    let bias = ctx.input_shape(2)?;

    let (&[n, ih, iw, ic], &[oc, kh, kw, fc]) = (input, filter) else {
        return Err(ctx.shape_error("conv2d expects rank-4 NHWC input and OHWI filter"));
    };
    if ic != fc {
        return Err(ctx.shape_error(format!(
            "input channels {} do not match filter channels {}",
            ic, fc
        )));
    }
    if bias != [oc] {
        return Err(ctx.shape_error(format!("bias must have shape [{}]", oc)));
    }

    let pad = spatial_attr(ctx, "pad", 4)?;
    let stride = spatial_attr(ctx, "stride", 2)?;
    let dilation = spatial_attr(ctx, "dilation", 2)?;
    if stride.contains(&0) || dilation.contains(&0) {
        return Err(ctx.shape_error("stride and dilation must be positive"));
    }

    let oh = conv_output_dim(ih, kh, pad[0], pad[1], stride[0], dilation[0])
        .ok_or_else(|| ctx.shape_error("kernel larger than padded input height"))?;
    let ow = conv_output_dim(iw, kw, pad[2], pad[3], stride[1], dilation[1])
        .ok_or_else(|| ctx.shape_error("kernel larger than padded input width"))?;

    Ok(TensorType::new(ctx.dtype, vec![n, oh, ow, oc]))
}

/// Output extent of one convolution spatial axis:
/// `(in + pad_a + pad_b - ((k - 1) * dilation + 1)) / stride + 1`.
pub fn conv_output_dim(
    input: usize,
    kernel: usize,
    pad_a: usize,
    pad_b: usize,
    stride: usize,
    dilation: usize,
) -> Option<usize> {
    let effective_kernel = kernel.checked_sub(1)? * dilation + 1;
    let padded = input + pad_a + pad_b;
    Some(padded.checked_sub(effective_kernel)? / stride + 1)
}

fn spatial_attr(ctx: &InferenceCtx, key: &str, arity: usize) -> Result<Vec<usize>> {
    let values = ctx.attr_ints(key)?;
    if values.len() != arity {
        return Err(ctx.shape_error(format!(
            "attribute '{}' must have {} values, got {:?}",
            key, arity, values
        )));
    }
    values
        .iter()
        .map(|&v| usize::try_from(v))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|_| ctx.shape_error(format!("attribute '{}' must be non-negative", key)))
}

fn infer_matmul(ctx: &InferenceCtx) -> Result<TensorType> {
    ctx.expect_inputs(2)?;
    ctx.expect_input_dtype(0)?;
    ctx.expect_input_dtype(1)?;
    let (&[ba, m, k], &[bb, k2, n]) = (ctx.input_shape(0)?, ctx.input_shape(1)?) else {
        return Err(ctx.shape_error("matmul operands must have rank 3"));
    };
    if ba != bb {
        return Err(ctx.shape_error(format!("batch mismatch {} vs {}", ba, bb)));
    }
    if k != k2 {
        return Err(ctx.shape_error(format!("contraction mismatch {} vs {}", k, k2)));
    }
    Ok(TensorType::new(ctx.dtype, vec![ba, m, n]))
}

fn infer_reduce(ctx: &InferenceCtx) -> Result<TensorType> {
    ctx.expect_inputs(1)?;
    ctx.expect_input_dtype(0)?;
    let mut shape = ctx.input_shape(0)?.to_vec();
    let axis = ctx.axis(shape.len())?;
    shape[axis] = 1;
    Ok(TensorType::new(ctx.dtype, shape))
}

fn infer_binary(ctx: &InferenceCtx) -> Result<TensorType> {
    ctx.expect_inputs(2)?;
    ctx.expect_input_dtype(0)?;
    ctx.expect_input_dtype(1)?;
    if ctx.op == TargetOp::IntDiv && !ctx.dtype.is_integer() {
        return Err(ctx.shape_error("int_div requires integer operands"));
    }
    let shape = implicit_broadcast_shape(ctx.input_shape(0)?, ctx.input_shape(1)?)
        .map_err(|e| ctx.shape_error(e.to_string()))?;
    Ok(TensorType::new(ctx.dtype, shape))
}

fn infer_unary(ctx: &InferenceCtx) -> Result<TensorType> {
    ctx.expect_inputs(1)?;
    ctx.expect_input_dtype(0)?;
    if !ctx.dtype.is_float() {
        return Err(ctx.shape_error("operand must be floating point"));
    }
    Ok(ctx.input_type(0)?.clone())
}
