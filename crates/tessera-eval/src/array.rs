//! Dense index helpers and a widened element buffer.

use crate::error::Result;
use tessera_core::{DataType, TensorData, TensorValue};

/// Elements widened for arithmetic: floats to `f64`, integers to `i64`.
#[derive(Debug, Clone, PartialEq)]
pub enum Elements {
    Float(Vec<f64>),
    Int(Vec<i64>),
}

impl Elements {
    /// Widen the elements of a value.
    pub fn of(value: &TensorValue) -> Self {
        match value.data.to_i64() {
            Some(ints) => Elements::Int(ints),
            None => Elements::Float(value.data.to_f64()),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Elements::Float(v) => v.len(),
            Elements::Int(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pick elements by flat index.
    pub fn select(&self, indices: &[usize]) -> Self {
        match self {
            Elements::Float(v) => Elements::Float(indices.iter().map(|&i| v[i]).collect()),
            Elements::Int(v) => Elements::Int(indices.iter().map(|&i| v[i]).collect()),
        }
    }

    /// All elements as `f64`.
    pub fn to_f64(&self) -> Vec<f64> {
        match self {
            Elements::Float(v) => v.clone(),
            Elements::Int(v) => v.iter().map(|&x| x as f64).collect(),
        }
    }

    /// Narrow back to storage of `dtype`.
    ///
    /// Floats round to `f32`; integers wrap to the width of `dtype`.
    pub fn into_value(self, dtype: DataType, shape: Vec<usize>) -> Result<TensorValue> {
        let data = match self {
            Elements::Float(v) => TensorData::from_f64(dtype, &v),
            Elements::Int(v) => match TensorData::from_i64_wrapping(dtype, &v) {
                Some(data) => data,
                None => TensorData::from_f64(dtype, &v.iter().map(|&x| x as f64).collect::<Vec<_>>()),
            },
        };
        Ok(TensorValue::new(data, shape)?)
    }
}

/// Row-major strides of `shape`.
pub fn strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1; shape.len()];
    for i in (0..shape.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * shape[i + 1];
    }
    strides
}

/// Multi-index of flat position `flat` in `shape`.
pub fn unravel(mut flat: usize, shape: &[usize]) -> Vec<usize> {
    let mut index = vec![0; shape.len()];
    for axis in (0..shape.len()).rev() {
        if shape[axis] > 0 {
            index[axis] = flat % shape[axis];
            flat /= shape[axis];
        }
    }
    index
}

/// Flat offset into a tensor of `shape` read through NumPy broadcasting
/// (right-aligned; size-1 axes repeat) at output multi-index `out_index`.
pub fn broadcast_offset(out_index: &[usize], shape: &[usize]) -> usize {
    let skip = out_index.len() - shape.len();
    let strides = strides(shape);
    shape
        .iter()
        .zip(&strides)
        .enumerate()
        .map(|(axis, (&dim, &stride))| {
            if dim == 1 {
                0
            } else {
                out_index[skip + axis] * stride
            }
        })
        .sum()
}

/// Flat input indices that produce each output element of a broadcast to
/// `out_shape`.
pub fn broadcast_indices(shape: &[usize], out_shape: &[usize]) -> Vec<usize> {
    let numel: usize = out_shape.iter().product();
    (0..numel)
        .map(|flat| broadcast_offset(&unravel(flat, out_shape), shape))
        .collect()
}

/// Permute axes: `out.shape[i] = shape[perm[i]]`.
pub fn permute(elements: &Elements, shape: &[usize], perm: &[usize]) -> (Elements, Vec<usize>) {
    let out_shape: Vec<usize> = perm.iter().map(|&p| shape[p]).collect();
    let in_strides = strides(shape);
    let numel: usize = out_shape.iter().product();
    let indices: Vec<usize> = (0..numel)
        .map(|flat| {
            unravel(flat, &out_shape)
                .iter()
                .zip(perm)
                .map(|(&i, &p)| i * in_strides[p])
                .sum()
        })
        .collect();
    (elements.select(&indices), out_shape)
}

/// Group input flat indices by output element when reducing `axes` with the
/// axes kept as size 1.
pub fn reduction_groups(shape: &[usize], axes: &[usize]) -> (Vec<usize>, Vec<Vec<usize>>) {
    let mut out_shape = shape.to_vec();
    for &axis in axes {
        out_shape[axis] = 1;
    }
    let out_strides = strides(&out_shape);
    let mut groups = vec![Vec::new(); out_shape.iter().product()];

    let numel: usize = shape.iter().product();
    for flat in 0..numel {
        let index = unravel(flat, shape);
        let out: usize = index
            .iter()
            .zip(&out_strides)
            .enumerate()
            .map(|(axis, (&i, &s))| if axes.contains(&axis) { 0 } else { i * s })
            .sum();
        groups[out].push(flat);
    }

    (out_shape, groups)
}
