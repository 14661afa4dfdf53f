// Owned array types used by ports before/after the wire format

use crate::error::{MessagingError, Result};
use crate::Structs::Wire::DType;

mod sealed {
    pub trait Sealed {}
    impl Sealed for i8 {}
    impl Sealed for i16 {}
    impl Sealed for i32 {}
    impl Sealed for i64 {}
    impl Sealed for f32 {}
    impl Sealed for f64 {}
}

/// Numeric element types a message can carry
pub trait Element: sealed::Sealed + Copy + PartialEq + Default + std::fmt::Debug + Send + 'static {
    const DTYPE: DType;

    fn write_le(self, out: &mut Vec<u8>);

    /// `bytes` is exactly `DTYPE.elsize()` long
    fn read_le(bytes: &[u8]) -> Self;
}

macro_rules! impl_element {
    ($ty:ty, $dtype:expr, $n:expr) => {
        impl Element for $ty {
            const DTYPE: DType = $dtype;

            #[inline]
            fn write_le(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }

            #[inline]
            fn read_le(bytes: &[u8]) -> Self {
                let mut raw = [0u8; $n];
                raw.copy_from_slice(&bytes[..$n]);
                <$ty>::from_le_bytes(raw)
            }
        }
    };
}

impl_element!(i8, DType::Int8, 1);
impl_element!(i16, DType::Int16, 2);
impl_element!(i32, DType::Int32, 4);
impl_element!(i64, DType::Int64, 8);
impl_element!(f32, DType::Float32, 4);
impl_element!(f64, DType::Float64, 8);

/// Dense n-d array, row-major
#[derive(Clone, Debug, PartialEq)]
pub struct Array<T> {
    shape: Vec<usize>,
    data: Vec<T>,
}

impl<T: Element> Array<T> {
    pub fn new(shape: Vec<usize>, data: Vec<T>) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(MessagingError::invalid_metadata(format!(
                "shape {:?} holds {} elements, got {}",
                shape,
                expected,
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    /// One-dimensional array over `data`
    pub fn from_vec(data: Vec<T>) -> Self {
        Self {
            shape: vec![data.len()],
            data,
        }
    }

    pub fn zeros(shape: &[usize]) -> Self {
        Self {
            shape: shape.to_vec(),
            data: vec![T::default(); shape.iter().product()],
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn into_vec(self) -> Vec<T> {
        self.data
    }
}

/// Sparse vector: `values[i]` sits at flat position `indices[i]` of a dense
/// vector of length `dense_len`
#[derive(Clone, Debug, PartialEq)]
pub struct SparseArray<T> {
    dense_len: usize,
    indices: Vec<i64>,
    values: Vec<T>,
}

impl<T: Element> SparseArray<T> {
    pub fn new(dense_len: usize, indices: Vec<i64>, values: Vec<T>) -> Result<Self> {
        if indices.len() != values.len() {
            return Err(MessagingError::invalid_metadata(format!(
                "{} indices for {} values",
                indices.len(),
                values.len()
            )));
        }
        if let Some(bad) = indices.iter().find(|&&i| i < 0 || i as usize >= dense_len) {
            return Err(MessagingError::invalid_metadata(format!(
                "index {} outside dense length {}",
                bad, dense_len
            )));
        }
        Ok(Self {
            dense_len,
            indices,
            values,
        })
    }

    /// No stored entries
    pub fn empty(dense_len: usize) -> Self {
        Self {
            dense_len,
            indices: Vec::new(),
            values: Vec::new(),
        }
    }

    pub fn dense_len(&self) -> usize {
        self.dense_len
    }

    pub fn indices(&self) -> &[i64] {
        &self.indices
    }

    pub fn values(&self) -> &[T] {
        &self.values
    }

    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Scatter into a dense vector; later duplicates win
    pub fn to_dense(&self) -> Array<T> {
        let mut dense = vec![T::default(); self.dense_len];
        for (&i, &v) in self.indices.iter().zip(self.values.iter()) {
            dense[i as usize] = v;
        }
        Array::from_vec(dense)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_array_shape_must_match() {
        assert!(Array::new(vec![2, 2], vec![1i32, 2, 3]).is_err());
        let a = Array::new(vec![2, 2], vec![1i32, 2, 3, 4]).unwrap();
        assert_eq!(a.len(), 4);
    }

    #[test]
    fn test_sparse_to_dense() {
        let s = SparseArray::new(5, vec![0, 3], vec![1.5f32, -1.0]).unwrap();
        assert_eq!(s.to_dense().data(), &[1.5, 0.0, 0.0, -1.0, 0.0]);
        assert!(SparseArray::new(2, vec![2], vec![1i16]).is_err());
    }
}
