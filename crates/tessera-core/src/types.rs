//! Core types for tensor element types, shapes, and constant values.

use crate::{Error, Result};
use std::fmt;

/// Element type of a tensor value.
///
/// The vocabulary is closed: fixed-width signed and unsigned integers plus
/// IEEE float32.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    I8,
    I32,
    I64,
    U8,
    F32,
}

impl DataType {
    /// Size of this data type in bytes.
    pub fn size(&self) -> usize {
        match self {
            DataType::I8 | DataType::U8 => 1,
            DataType::I32 | DataType::F32 => 4,
            DataType::I64 => 8,
        }
    }

    /// Check if this is an integer type (signed or unsigned).
    pub fn is_integer(&self) -> bool {
        !self.is_float()
    }

    /// Check if this is a floating-point type.
    pub fn is_float(&self) -> bool {
        matches!(self, DataType::F32)
    }

    /// Short lowercase name used in diagnostics and DOT output.
    pub fn name(&self) -> &'static str {
        match self {
            DataType::I8 => "i8",
            DataType::I32 => "i32",
            DataType::I64 => "i64",
            DataType::U8 => "u8",
            DataType::F32 => "f32",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Static type of a tensor value: element type plus fully resolved shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TensorType {
    pub dtype: DataType,
    pub shape: Vec<usize>,
}

impl TensorType {
    pub fn new(dtype: DataType, shape: Vec<usize>) -> Self {
        Self { dtype, shape }
    }

    /// Number of dimensions.
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Total number of elements.
    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }

    /// Same element type with a different shape.
    pub fn with_shape(&self, shape: Vec<usize>) -> Self {
        Self::new(self.dtype, shape)
    }

    /// Same shape with a different element type.
    pub fn with_dtype(&self, dtype: DataType) -> Self {
        Self::new(dtype, self.shape.clone())
    }
}

impl fmt::Display for TensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:?}", self.dtype, self.shape)
    }
}

/// Raw tensor data for constants.
///
/// Separated from metadata (shape, dtype) so that reshapes and casts only touch
/// what they need to.
#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    I8(Vec<i8>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    U8(Vec<u8>),
    F32(Vec<f32>),
}

impl TensorData {
    /// Get the number of elements in this tensor data.
    pub fn len(&self) -> usize {
        match self {
            TensorData::I8(v) => v.len(),
            TensorData::I32(v) => v.len(),
            TensorData::I64(v) => v.len(),
            TensorData::U8(v) => v.len(),
            TensorData::F32(v) => v.len(),
        }
    }

    /// Check if this tensor data is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get the data type of the stored elements.
    pub fn dtype(&self) -> DataType {
        match self {
            TensorData::I8(_) => DataType::I8,
            TensorData::I32(_) => DataType::I32,
            TensorData::I64(_) => DataType::I64,
            TensorData::U8(_) => DataType::U8,
            TensorData::F32(_) => DataType::F32,
        }
    }

    /// Build data of `dtype` from `f64` values.
    ///
    /// Float targets round to the nearest `f32`. Integer targets apply the
    /// narrowing rule shared with the target `cast` primitive: round half to
    /// even, then saturate to the type's range (NaN becomes 0).
    pub fn from_f64(dtype: DataType, values: &[f64]) -> Self {
        match dtype {
            DataType::F32 => TensorData::F32(values.iter().map(|&x| x as f32).collect()),
            DataType::I8 => TensorData::I8(values.iter().map(|&x| x.round_ties_even() as i8).collect()),
            DataType::I32 => {
                TensorData::I32(values.iter().map(|&x| x.round_ties_even() as i32).collect())
            }
            DataType::I64 => {
                TensorData::I64(values.iter().map(|&x| x.round_ties_even() as i64).collect())
            }
            DataType::U8 => TensorData::U8(values.iter().map(|&x| x.round_ties_even() as u8).collect()),
        }
    }

    /// Widen every element to `f64`.
    pub fn to_f64(&self) -> Vec<f64> {
        match self {
            TensorData::I8(v) => v.iter().map(|&x| f64::from(x)).collect(),
            TensorData::I32(v) => v.iter().map(|&x| f64::from(x)).collect(),
            TensorData::I64(v) => v.iter().map(|&x| x as f64).collect(),
            TensorData::U8(v) => v.iter().map(|&x| f64::from(x)).collect(),
            TensorData::F32(v) => v.iter().map(|&x| f64::from(x)).collect(),
        }
    }

    /// Widen every element to `i64`, or `None` for float data.
    pub fn to_i64(&self) -> Option<Vec<i64>> {
        match self {
            TensorData::I8(v) => Some(v.iter().map(|&x| i64::from(x)).collect()),
            TensorData::I32(v) => Some(v.iter().map(|&x| i64::from(x)).collect()),
            TensorData::I64(v) => Some(v.clone()),
            TensorData::U8(v) => Some(v.iter().map(|&x| i64::from(x)).collect()),
            TensorData::F32(_) => None,
        }
    }

    /// Build integer data of `dtype` from `i64` values, wrapping on overflow.
    ///
    /// Returns `None` when `dtype` is not an integer type.
    pub fn from_i64_wrapping(dtype: DataType, values: &[i64]) -> Option<Self> {
        let data = match dtype {
            DataType::I8 => TensorData::I8(values.iter().map(|&x| x as i8).collect()),
            DataType::I32 => TensorData::I32(values.iter().map(|&x| x as i32).collect()),
            DataType::I64 => TensorData::I64(values.to_vec()),
            DataType::U8 => TensorData::U8(values.iter().map(|&x| x as u8).collect()),
            DataType::F32 => return None,
        };
        Some(data)
    }

    /// Try to get as i64 slice.
    pub fn as_i64(&self) -> Option<&[i64]> {
        match self {
            TensorData::I64(v) => Some(v),
            _ => None,
        }
    }

    /// Try to get as f32 slice.
    pub fn as_f32(&self) -> Option<&[f32]> {
        match self {
            TensorData::F32(v) => Some(v),
            _ => None,
        }
    }

    /// Try to get as i8 slice.
    pub fn as_i8(&self) -> Option<&[i8]> {
        match self {
            TensorData::I8(v) => Some(v),
            _ => None,
        }
    }
}

/// A tensor value known at compile time.
///
/// Bundles data, shape, and dtype together. Used for `const` nodes
/// (permutation literals, zero biases, element counts) and as the value type
/// of the reference evaluator.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorValue {
    /// The raw tensor data.
    pub data: TensorData,

    /// The shape of the tensor (dimensions).
    pub shape: Vec<usize>,

    /// The data type of the tensor.
    pub dtype: DataType,
}

impl TensorValue {
    /// Create a new TensorValue, checking that data length and type match.
    pub fn new(data: TensorData, shape: Vec<usize>) -> Result<Self> {
        let expected_len: usize = shape.iter().product();
        if data.len() != expected_len {
            return Err(Error::ShapeInference(format!(
                "Data length {} doesn't match shape {:?} (product = {})",
                data.len(),
                shape,
                expected_len
            )));
        }
        let dtype = data.dtype();
        Ok(Self { data, shape, dtype })
    }

    /// Create a tensor of `shape` with every element set to `value`.
    pub fn full(dtype: DataType, shape: Vec<usize>, value: f64) -> Self {
        let numel: usize = shape.iter().product();
        let data = TensorData::from_f64(dtype, &vec![value; numel]);
        Self { data, shape, dtype }
    }

    /// Create a zero-filled tensor.
    pub fn zeros(dtype: DataType, shape: Vec<usize>) -> Self {
        Self::full(dtype, shape, 0.0)
    }

    /// Create a rank-1 `i64` tensor.
    pub fn from_i64s(values: Vec<i64>) -> Self {
        let shape = vec![values.len()];
        Self {
            data: TensorData::I64(values),
            shape,
            dtype: DataType::I64,
        }
    }

    /// Create an `f32` tensor.
    pub fn from_f32s(values: Vec<f32>, shape: Vec<usize>) -> Result<Self> {
        Self::new(TensorData::F32(values), shape)
    }

    /// Get the static type of this value.
    pub fn ty(&self) -> TensorType {
        TensorType::new(self.dtype, self.shape.clone())
    }

    /// Get the number of elements in this tensor value.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if this tensor value is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get the number of dimensions.
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Try to get as i64 slice.
    pub fn as_i64(&self) -> Option<&[i64]> {
        self.data.as_i64()
    }

    /// Try to get as f32 slice.
    pub fn as_f32(&self) -> Option<&[f32]> {
        self.data.as_f32()
    }

    /// Try to get as i8 slice.
    pub fn as_i8(&self) -> Option<&[i8]> {
        self.data.as_i8()
    }

    /// Create a new TensorValue with a different shape (data unchanged).
    pub fn reshape(&self, new_shape: Vec<usize>) -> Result<Self> {
        Self::new(self.data.clone(), new_shape)
    }

    /// Cast this value to a different element type.
    ///
    /// Integer-to-integer casts wrap, integer-to-float casts round to nearest,
    /// and float-to-integer casts round half to even and saturate.
    pub fn cast(&self, target: DataType) -> TensorValue {
        if self.dtype == target {
            return self.clone();
        }

        let data = match (self.data.to_i64(), target.is_integer()) {
            (Some(ints), true) => TensorData::from_i64_wrapping(target, &ints)
                .unwrap_or_else(|| TensorData::from_f64(target, &self.data.to_f64())),
            _ => TensorData::from_f64(target, &self.data.to_f64()),
        };

        TensorValue {
            data,
            shape: self.shape.clone(),
            dtype: target,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tensor_value_cast() {
        let i64_val = TensorValue::from_i64s(vec![1, 2, 3]);
        let f32_val = i64_val.cast(DataType::F32);
        assert_eq!(f32_val.as_f32(), Some(&[1.0, 2.0, 3.0][..]));
        assert_eq!(f32_val.shape, vec![3]);
    }

    #[test]
    fn test_narrowing_cast_rounds_half_to_even() {
        let value = TensorValue::from_f32s(vec![0.5, 1.5, 2.5, -0.5, -1.5, 2.4, 2.6], vec![7])
            .unwrap();
        let narrowed = value.cast(DataType::I8);
        assert_eq!(narrowed.as_i8(), Some(&[0, 2, 2, 0, -2, 2, 3][..]));
    }

    #[test]
    fn test_narrowing_cast_saturates() {
        let value =
            TensorValue::from_f32s(vec![300.0, -300.0, f32::NAN, 127.4], vec![4]).unwrap();
        let narrowed = value.cast(DataType::I8);
        assert_eq!(narrowed.as_i8(), Some(&[127, -128, 0, 127][..]));
    }

    #[test]
    fn test_integer_cast_wraps() {
        let value = TensorValue::new(TensorData::I32(vec![300, -1]), vec![2]).unwrap();
        let narrowed = value.cast(DataType::I8);
        assert_eq!(narrowed.as_i8(), Some(&[44, -1][..]));
    }

    #[test]
    fn test_tensor_value_reshape() {
        let value =
            TensorValue::from_f32s(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], vec![2, 3]).unwrap();
        let reshaped = value.reshape(vec![3, 2]).unwrap();
        assert_eq!(reshaped.shape, vec![3, 2]);
        assert_eq!(reshaped.as_f32(), Some(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0][..]));
        assert!(value.reshape(vec![4, 2]).is_err());
    }

    #[test]
    fn test_tensor_value_new_validates_shape() {
        let result = TensorValue::new(TensorData::F32(vec![1.0; 6]), vec![2, 4]);
        assert!(matches!(result, Err(Error::ShapeInference(_))));
    }

    #[test]
    fn test_full_and_zeros() {
        let zeros = TensorValue::zeros(DataType::I32, vec![2, 2]);
        assert_eq!(zeros.len(), 4);
        assert_eq!(zeros.dtype, DataType::I32);

        let fours = TensorValue::full(DataType::F32, vec![1, 1], 4.0);
        assert_eq!(fours.as_f32(), Some(&[4.0][..]));
    }

    #[test]
    fn test_tensor_type_display() {
        let ty = TensorType::new(DataType::F32, vec![1, 4]);
        assert_eq!(ty.to_string(), "f32[1, 4]");
        assert_eq!(ty.rank(), 2);
        assert_eq!(ty.numel(), 4);
    }
}
