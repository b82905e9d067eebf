//! Dense CPU kernels over [`Elements`].
//!
//! Float kernels compute in `f64` and leave rounding to `f32` to the caller
//! (via [`Elements::into_value`]); integer kernels wrap.

use crate::array::{Elements, broadcast_indices, broadcast_offset, reduction_groups, unravel};

/// Elementwise arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arith {
    Add,
    Sub,
    Mul,
    /// Truncating division for integers, IEEE division for floats.
    Div,
}

impl Arith {
    fn float(self, a: f64, b: f64) -> f64 {
        match self {
            Arith::Add => a + b,
            Arith::Sub => a - b,
            Arith::Mul => a * b,
            Arith::Div => a / b,
        }
    }

    fn int(self, a: i64, b: i64) -> Option<i64> {
        match self {
            Arith::Add => Some(a.wrapping_add(b)),
            Arith::Sub => Some(a.wrapping_sub(b)),
            Arith::Mul => Some(a.wrapping_mul(b)),
            Arith::Div if b == 0 => None,
            Arith::Div => Some(a.wrapping_div(b)),
        }
    }
}

/// Failure inside a kernel, mapped to an `EvalError` by the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum KernelError {
    DivisionByZero,
    Invalid(String),
}

type KernelResult<T> = std::result::Result<T, KernelError>;

fn invalid<T>(message: impl Into<String>) -> KernelResult<T> {
    Err(KernelError::Invalid(message.into()))
}

/// Apply `op` to two operands broadcast (NumPy rules) to `out_shape`.
pub fn binary(
    op: Arith,
    lhs: (&Elements, &[usize]),
    rhs: (&Elements, &[usize]),
    out_shape: &[usize],
) -> KernelResult<Elements> {
    let li = broadcast_indices(lhs.1, out_shape);
    let ri = broadcast_indices(rhs.1, out_shape);

    match (lhs.0, rhs.0) {
        (Elements::Float(a), Elements::Float(b)) => Ok(Elements::Float(
            li.iter().zip(&ri).map(|(&i, &j)| op.float(a[i], b[j])).collect(),
        )),
        (Elements::Int(a), Elements::Int(b)) => li
            .iter()
            .zip(&ri)
            .map(|(&i, &j)| op.int(a[i], b[j]).ok_or(KernelError::DivisionByZero))
            .collect::<KernelResult<Vec<_>>>()
            .map(Elements::Int),
        _ => invalid("operands mix float and integer elements"),
    }
}

/// Apply a float-only unary function.
pub fn unary_float(input: &Elements, f: impl Fn(f64) -> f64) -> KernelResult<Elements> {
    match input {
        Elements::Float(v) => Ok(Elements::Float(v.iter().map(|&x| f(x)).collect())),
        Elements::Int(_) => invalid("unary float function applied to integer elements"),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reduction {
    Sum,
    Max,
    Mean,
}

/// Reduce over `axes`, keeping them as size-1 dimensions.
pub fn reduce(
    input: &Elements,
    shape: &[usize],
    axes: &[usize],
    reduction: Reduction,
) -> KernelResult<(Elements, Vec<usize>)> {
    let (out_shape, groups) = reduction_groups(shape, axes);

    let out = match input {
        Elements::Float(v) => Elements::Float(
            groups
                .iter()
                .map(|g| {
                    let values = g.iter().map(|&i| v[i]);
                    match reduction {
                        Reduction::Sum => values.sum::<f64>(),
                        Reduction::Max => values.fold(f64::NEG_INFINITY, f64::max),
                        Reduction::Mean => values.sum::<f64>() / g.len() as f64,
                    }
                })
                .collect(),
        ),
        Elements::Int(v) => Elements::Int(
            groups
                .iter()
                .map(|g| {
                    let sum = || g.iter().fold(0i64, |acc, &i| acc.wrapping_add(v[i]));
                    match reduction {
                        Reduction::Sum => Ok(sum()),
                        Reduction::Max => g
                            .iter()
                            .map(|&i| v[i])
                            .max()
                            .ok_or_else(|| KernelError::Invalid("max over an empty axis".into())),
                        Reduction::Mean => Arith::Div
                            .int(sum(), g.len() as i64)
                            .ok_or(KernelError::DivisionByZero),
                    }
                })
                .collect::<KernelResult<Vec<_>>>()?,
        ),
    };

    Ok((out, out_shape))
}

/// Softmax along `axis`, computed directly in `f64` with max-subtraction.
pub fn softmax(input: &Elements, shape: &[usize], axis: usize) -> KernelResult<Elements> {
    let Elements::Float(v) = input else {
        return invalid("softmax over integer elements");
    };

    let (_, groups) = reduction_groups(shape, &[axis]);
    let mut out = vec![0.0; v.len()];
    for group in groups {
        let max = group.iter().map(|&i| v[i]).fold(f64::NEG_INFINITY, f64::max);
        let sum: f64 = group.iter().map(|&i| (v[i] - max).exp()).sum();
        for &i in &group {
            out[i] = (v[i] - max).exp() / sum;
        }
    }

    Ok(Elements::Float(out))
}

/// Replicate a rank-1 input along `axis` of `out_shape`.
pub fn broadcast_axis(input: &Elements, out_shape: &[usize], axis: usize) -> Elements {
    let numel: usize = out_shape.iter().product();
    let indices: Vec<usize> = (0..numel).map(|f| unravel(f, out_shape)[axis]).collect();
    input.select(&indices)
}

/// Batched matrix multiply `[..batch, m, k] x [..batch, k, n]`.
///
/// Batch dimensions broadcast with NumPy rules.
pub fn batched_matmul(
    lhs: (&Elements, &[usize]),
    rhs: (&Elements, &[usize]),
) -> KernelResult<(Elements, Vec<usize>)> {
    let (a_shape, b_shape) = (lhs.1, rhs.1);
    if a_shape.len() < 2 || a_shape.len() != b_shape.len() {
        return invalid(format!("matmul of {:?} and {:?}", a_shape, b_shape));
    }
    let r = a_shape.len();
    let (m, k) = (a_shape[r - 2], a_shape[r - 1]);
    let (k2, n) = (b_shape[r - 2], b_shape[r - 1]);
    if k != k2 {
        return invalid(format!("contraction {} vs {}", k, k2));
    }

    let a_batch = &a_shape[..r - 2];
    let b_batch = &b_shape[..r - 2];
    let batch = tessera_core::broadcast_shape(a_batch, b_batch)
        .map_err(|e| KernelError::Invalid(e.to_string()))?;
    let batches: usize = batch.iter().product();

    let mut out_shape = batch.clone();
    out_shape.extend([m, n]);

    // (lhs row offset, rhs column offset) per output element, row-major
    let mut plan = Vec::with_capacity(batches * m * n);
    for bi in 0..batches {
        let index = unravel(bi, &batch);
        let a_base = broadcast_offset(&index, a_batch) * m * k;
        let b_base = broadcast_offset(&index, b_batch) * k * n;
        for i in 0..m {
            for j in 0..n {
                plan.push((a_base + i * k, b_base + j));
            }
        }
    }

    let out = match (lhs.0, rhs.0) {
        (Elements::Float(a), Elements::Float(b)) => Elements::Float(
            plan.iter()
                .map(|&(ai, bj)| (0..k).map(|p| a[ai + p] * b[bj + p * n]).sum::<f64>())
                .collect(),
        ),
        (Elements::Int(a), Elements::Int(b)) => Elements::Int(
            plan.iter()
                .map(|&(ai, bj)| {
                    (0..k).fold(0i64, |acc, p| {
                        acc.wrapping_add(a[ai + p].wrapping_mul(b[bj + p * n]))
                    })
                })
                .collect(),
        ),
        _ => return invalid("matmul operands mix float and integer elements"),
    };

    Ok((out, out_shape))
}

/// Convolution geometry: padding `[top, bottom, left, right]`, stride and
/// dilation `[h, w]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvParams {
    pub pad: [usize; 4],
    pub stride: [usize; 2],
    pub dilation: [usize; 2],
}

fn output_dim(input: usize, kernel: usize, pad: usize, stride: usize, dilation: usize) -> Option<usize> {
    let span = dilation * (kernel.checked_sub(1)?) + 1;
    let padded = input + pad;
    if stride == 0 || padded < span {
        return None;
    }
    Some((padded - span) / stride + 1)
}

/// 2-D convolution with NCHW input and OIHW filter; result is NCHW.
pub fn conv2d_nchw(
    input: (&Elements, &[usize]),
    filter: (&Elements, &[usize]),
    params: &ConvParams,
) -> KernelResult<(Elements, Vec<usize>)> {
    let (&[n, c, ih, iw], &[oc, fc, kh, kw]) = (input.1, filter.1) else {
        return invalid(format!("conv2d of {:?} and {:?}", input.1, filter.1));
    };
    if c != fc {
        return invalid(format!("conv2d channels {} vs {}", c, fc));
    }
    let [pt, pb, pl, pr] = params.pad;
    let [sh, sw] = params.stride;
    let [dh, dw] = params.dilation;
    let (Some(oh), Some(ow)) = (
        output_dim(ih, kh, pt + pb, sh, dh),
        output_dim(iw, kw, pl + pr, sw, dw),
    ) else {
        return invalid("kernel larger than padded input");
    };
    let out_shape = vec![n, oc, oh, ow];

    // Taps (input offset, filter offset) contributing to each output element
    let taps_at = |b: usize, o: usize, y: usize, x: usize| {
        let mut taps = Vec::with_capacity(c * kh * kw);
        for ci in 0..c {
            for ky in 0..kh {
                let Some(iy) = (y * sh + ky * dh).checked_sub(pt).filter(|&v| v < ih) else {
                    continue;
                };
                for kx in 0..kw {
                    let Some(ix) = (x * sw + kx * dw).checked_sub(pl).filter(|&v| v < iw) else {
                        continue;
                    };
                    taps.push((
                        ((b * c + ci) * ih + iy) * iw + ix,
                        ((o * c + ci) * kh + ky) * kw + kx,
                    ));
                }
            }
        }
        taps
    };

    let numel = n * oc * oh * ow;
    let taps: Vec<_> = (0..numel)
        .map(|f| {
            let idx = unravel(f, &out_shape);
            taps_at(idx[0], idx[1], idx[2], idx[3])
        })
        .collect();

    let out = match (input.0, filter.0) {
        (Elements::Float(a), Elements::Float(w)) => Elements::Float(
            taps.iter()
                .map(|t| t.iter().map(|&(i, j)| a[i] * w[j]).sum::<f64>())
                .collect(),
        ),
        (Elements::Int(a), Elements::Int(w)) => Elements::Int(
            taps.iter()
                .map(|t| {
                    t.iter()
                        .fold(0i64, |acc, &(i, j)| acc.wrapping_add(a[i].wrapping_mul(w[j])))
                })
                .collect(),
        ),
        _ => return invalid("conv2d operands mix float and integer elements"),
    };

    Ok((out, out_shape))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn floats(v: &[f64]) -> Elements {
        Elements::Float(v.to_vec())
    }

    #[test]
    fn test_binary_broadcasts() {
        let a = floats(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let b = floats(&[10.0, 20.0, 30.0]);
        let out = binary(Arith::Add, (&a, &[2, 3]), (&b, &[3]), &[2, 3]).unwrap();
        assert_eq!(out, floats(&[11.0, 22.0, 33.0, 14.0, 25.0, 36.0]));
    }

    #[test]
    fn test_integer_division_truncates_and_detects_zero() {
        let a = Elements::Int(vec![7, -7]);
        let b = Elements::Int(vec![2]);
        let out = binary(Arith::Div, (&a, &[2]), (&b, &[1]), &[2]).unwrap();
        assert_eq!(out, Elements::Int(vec![3, -3]));

        let zero = Elements::Int(vec![0]);
        let err = binary(Arith::Div, (&a, &[2]), (&zero, &[1]), &[2]).unwrap_err();
        assert_eq!(err, KernelError::DivisionByZero);
    }

    #[test]
    fn test_reduce_mean_integer_truncates() {
        let x = Elements::Int(vec![1, 2, 2, 2]);
        let (out, shape) = reduce(&x, &[1, 4], &[1], Reduction::Mean).unwrap();
        assert_eq!(shape, vec![1, 1]);
        assert_eq!(out, Elements::Int(vec![1]));
    }

    #[test]
    fn test_softmax_large_inputs() {
        let x = floats(&[1000.0, 1000.0, 1001.0]);
        let Elements::Float(y) = softmax(&x, &[1, 3], 1).unwrap() else {
            panic!("expected floats");
        };
        assert!((y[0] - 0.2119).abs() < 1e-4);
        assert!((y[2] - 0.5761).abs() < 1e-4);
    }

    #[test]
    fn test_batched_matmul_broadcasts_rhs_batch() {
        // [2, 1, 2] x [1, 2, 1]
        let a = floats(&[1.0, 2.0, 3.0, 4.0]);
        let b = floats(&[1.0, 1.0]);
        let (out, shape) = batched_matmul((&a, &[2, 1, 2]), (&b, &[1, 2, 1])).unwrap();
        assert_eq!(shape, vec![2, 1, 1]);
        assert_eq!(out, floats(&[3.0, 7.0]));
    }

    #[test]
    fn test_conv2d_with_padding() {
        // 1x1x2x2 input, 1x1x1x1 filter of 2, one pixel of padding on every side
        let x = floats(&[1.0, 2.0, 3.0, 4.0]);
        let w = floats(&[2.0]);
        let params = ConvParams {
            pad: [1, 1, 1, 1],
            stride: [1, 1],
            dilation: [1, 1],
        };
        let (out, shape) = conv2d_nchw((&x, &[1, 1, 2, 2]), (&w, &[1, 1, 1, 1]), &params).unwrap();
        assert_eq!(shape, vec![1, 1, 4, 4]);
        let Elements::Float(out) = out else {
            panic!("expected floats");
        };
        assert_eq!(out[5], 2.0);
        assert_eq!(out[10], 8.0);
        assert_eq!(out[0], 0.0);
    }

    #[test]
    fn test_conv2d_stride_and_dilation() {
        // 1x1x1x5 row, 1x1x1x2 filter with dilation 2 and stride 2
        let x = Elements::Int(vec![1, 2, 3, 4, 5]);
        let w = Elements::Int(vec![1, 10]);
        let params = ConvParams {
            pad: [0, 0, 0, 0],
            stride: [1, 2],
            dilation: [1, 2],
        };
        let (out, shape) = conv2d_nchw((&x, &[1, 1, 1, 5]), (&w, &[1, 1, 1, 2]), &params).unwrap();
        assert_eq!(shape, vec![1, 1, 1, 2]);
        assert_eq!(out, Elements::Int(vec![31, 53]));
    }
}
