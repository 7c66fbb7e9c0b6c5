//! Borrowed tensor descriptors

use std::fmt;

use crate::error::{Error, Result};

use super::{DType, Element, ReduceOp};

/// A caller-owned contiguous buffer lent to the engine for one operation.
///
/// The lifetime ties the descriptor to the buffer, so the engine cannot keep
/// a reference once the operation returns.
pub struct TensorDescriptor<'a> {
    dtype: DType,
    data: &'a mut [u8],
}

impl<'a> TensorDescriptor<'a> {
    /// Describe a typed slice
    pub fn new<T: Element>(data: &'a mut [T]) -> Self {
        Self {
            dtype: T::DTYPE,
            data: bytemuck::cast_slice_mut(data),
        }
    }

    /// Describe raw bytes holding elements of `dtype`
    pub fn from_bytes(dtype: DType, data: &'a mut [u8]) -> Result<Self> {
        if data.len() % dtype.size() != 0 {
            return Err(Error::InvalidArgument(format!(
                "{} bytes is not a whole number of {} elements",
                data.len(),
                dtype
            )));
        }
        Ok(Self { dtype, data })
    }

    /// Describe memory handed over by an external tensor library.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `count * dtype.size()`
    /// bytes for `'a`, and nothing else may access that memory while the
    /// descriptor is alive.
    pub unsafe fn from_raw_parts(dtype: DType, ptr: *mut u8, count: usize) -> Self {
        let data: &'a mut [u8] = if count == 0 {
            &mut []
        } else {
            std::slice::from_raw_parts_mut(ptr, count * dtype.size())
        };
        Self { dtype, data }
    }

    /// Element type
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Number of elements
    pub fn count(&self) -> u64 {
        (self.data.len() / self.dtype.size()) as u64
    }

    /// Length in bytes
    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &*self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut *self.data
    }

    /// Fold a payload of the same type and length into this buffer
    pub fn fold(&mut self, op: ReduceOp, incoming: &[u8]) -> Result<()> {
        op.fold(self.dtype, &mut *self.data, incoming)
    }
}

impl fmt::Debug for TensorDescriptor<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TensorDescriptor")
            .field("dtype", &self.dtype)
            .field("count", &self.count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_slice() {
        let mut data = vec![1.0f32, 2.0, 3.0];
        let desc = TensorDescriptor::new(&mut data);
        assert_eq!(desc.dtype(), DType::F32);
        assert_eq!(desc.count(), 3);
        assert_eq!(desc.byte_len(), 12);
        assert!(!desc.is_empty());
    }

    #[test]
    fn test_from_bytes_rejects_partial_elements() {
        let mut raw = vec![0u8; 7];
        let err = TensorDescriptor::from_bytes(DType::I32, &mut raw).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));

        let mut raw = vec![0u8; 8];
        let desc = TensorDescriptor::from_bytes(DType::I32, &mut raw).unwrap();
        assert_eq!(desc.count(), 2);
    }

    #[test]
    fn test_from_raw_parts() {
        let mut data = vec![5i64, 6];
        let desc = unsafe {
            TensorDescriptor::from_raw_parts(DType::I64, data.as_mut_ptr() as *mut u8, data.len())
        };
        assert_eq!(desc.count(), 2);
        assert_eq!(desc.as_bytes(), bytemuck::cast_slice::<i64, u8>(&[5, 6]));

        let empty = unsafe { TensorDescriptor::from_raw_parts(DType::F64, std::ptr::null_mut(), 0) };
        assert!(empty.is_empty());
    }

    #[test]
    fn test_fold_writes_through_to_caller_buffer() {
        let mut data = vec![1i16, 2];
        {
            let mut desc = TensorDescriptor::new(&mut data);
            desc.fold(ReduceOp::Sum, bytemuck::cast_slice(&[3i16, 4]))
                .unwrap();
        }
        assert_eq!(data, vec![4, 6]);
    }

    #[test]
    fn test_debug_omits_contents() {
        let mut data = vec![9u8; 4];
        let text = format!("{:?}", TensorDescriptor::new(&mut data));
        assert!(text.contains("U8"));
        assert!(text.contains("count: 4"));
    }
}
