//! Affine int8 quantization expansion.
//!
//! ```text
//! shifted = x + bias            (input element type)
//! scaled  = cast<f32>(shifted) * scale
//! y       = cast<i8>(scaled)    (round half to even, saturating)
//! ```

use crate::builder::Builder;
use crate::composite::normalize_axis;
use tessera_core::{DataType, Error, Node, Result, TargetOp, ValueId, implicit_broadcast_shape};

/// Reshape a scale or bias operand so it broadcasts implicitly into a value
/// of shape `target`.
///
/// Accepted placements: a single element, a rank-1 vector of length
/// `target[axis]` (per-channel), or a same-rank tensor that already
/// broadcasts into `target`.
pub fn align_operand(
    b: &mut Builder,
    operand: ValueId,
    target: &[usize],
    axis: usize,
) -> Result<ValueId> {
    let ty = b.value_type(operand)?;

    let aligned = if ty.rank() == target.len() {
        ty.shape.clone()
    } else if ty.numel() == 1 {
        vec![1; target.len()]
    } else if ty.rank() == 1 && target.get(axis) == Some(&ty.shape[0]) {
        let mut shape = vec![1; target.len()];
        shape[axis] = ty.shape[0];
        shape
    } else {
        return Err(Error::UnsupportedShape(format!(
            "operand {} cannot be placed along axis {} of {:?}",
            ty, axis, target
        )));
    };

    if implicit_broadcast_shape(target, &aligned).is_err() {
        return Err(Error::UnsupportedShape(format!(
            "operand {} does not broadcast into {:?}",
            ty, target
        )));
    }

    b.reshape(operand, &aligned)
}

/// Lower a source `quantizelinear` node.
pub fn lower_quantize_linear(b: &mut Builder, node: &Node) -> Result<ValueId> {
    let input = node.input(0)?;
    let scale = node.input(1)?;
    let bias = match node.inputs().len() {
        2 => None,
        3 => Some(node.input(2)?),
        n => {
            return Err(Error::UnsupportedOperand(format!(
                "quantizelinear takes 2 or 3 operands, got {}",
                n
            )));
        }
    };

    let input_ty = b.value_type(input)?;
    let scale_ty = b.value_type(scale)?;
    if scale_ty.dtype != DataType::F32 {
        return Err(Error::UnsupportedOperand(format!(
            "quantization scale must be f32, got {}",
            scale_ty
        )));
    }

    let axis = match node.attr("axis") {
        Some(_) => node.attr_i64("axis")?,
        None => 1,
    };
    // A rank-0 or rank-1 input has no channel axis; only single-element
    // scales are meaningful there
    let axis = if input_ty.rank() > 1 {
        normalize_axis(axis, input_ty.rank())?
    } else {
        0
    };

    let mut shifted = input;
    if let Some(bias) = bias {
        let bias_ty = b.value_type(bias)?;
        if bias_ty.dtype != input_ty.dtype {
            return Err(Error::UnsupportedOperand(format!(
                "quantization bias {} must match input element type {}",
                bias_ty, input_ty.dtype
            )));
        }
        let bias = align_operand(b, bias, &input_ty.shape, axis)?;
        shifted = b.binary(TargetOp::Add, input, bias)?;
    }

    let widened = b.cast(shifted, DataType::F32)?;
    let scale = align_operand(b, scale, &input_ty.shape, axis)?;
    let scaled = b.binary(TargetOp::Mul, widened, scale)?;
    b.cast(scaled, DataType::I8)
}
