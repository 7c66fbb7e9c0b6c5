//! Reduction operators
//!
//! Folding is element-wise and in place: the accumulator is the local
//! buffer, the incoming payload is read unaligned straight from the frame.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

use super::DType;

/// Associative operator applied by reduce and all-reduce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReduceOp {
    /// Integer sums wrap on overflow
    #[default]
    Sum,
    /// Integer products wrap on overflow
    Product,
    Min,
    Max,
}

impl fmt::Display for ReduceOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReduceOp::Sum => "sum",
            ReduceOp::Product => "product",
            ReduceOp::Min => "min",
            ReduceOp::Max => "max",
        };
        f.write_str(name)
    }
}

/// A Rust scalar type that maps onto a [`DType`]
pub trait Element: bytemuck::Pod + PartialOrd + Send + Sync + 'static {
    /// Wire element type
    const DTYPE: DType;

    /// Combine two values with `op`
    fn combine(op: ReduceOp, a: Self, b: Self) -> Self;
}

macro_rules! impl_int_element {
    ($($t:ty => $dtype:expr),* $(,)?) => {
        $(
            impl Element for $t {
                const DTYPE: DType = $dtype;

                fn combine(op: ReduceOp, a: Self, b: Self) -> Self {
                    match op {
                        ReduceOp::Sum => a.wrapping_add(b),
                        ReduceOp::Product => a.wrapping_mul(b),
                        ReduceOp::Min => a.min(b),
                        ReduceOp::Max => a.max(b),
                    }
                }
            }
        )*
    };
}

macro_rules! impl_float_element {
    ($($t:ty => $dtype:expr),* $(,)?) => {
        $(
            impl Element for $t {
                const DTYPE: DType = $dtype;

                fn combine(op: ReduceOp, a: Self, b: Self) -> Self {
                    match op {
                        ReduceOp::Sum => a + b,
                        ReduceOp::Product => a * b,
                        ReduceOp::Min => a.min(b),
                        ReduceOp::Max => a.max(b),
                    }
                }
            }
        )*
    };
}

impl_int_element! {
    u8 => DType::U8,
    i8 => DType::I8,
    i16 => DType::I16,
    i32 => DType::I32,
    i64 => DType::I64,
}

impl_float_element! {
    f32 => DType::F32,
    f64 => DType::F64,
}

impl ReduceOp {
    /// Fold `incoming` into `acc`, both holding elements of `dtype`
    pub fn fold(self, dtype: DType, acc: &mut [u8], incoming: &[u8]) -> Result<()> {
        if acc.len() != incoming.len() {
            return Err(Error::SizeMismatch {
                expected: (acc.len() / dtype.size()) as u64,
                actual: (incoming.len() / dtype.size()) as u64,
            });
        }
        match dtype {
            DType::U8 => fold_typed::<u8>(self, acc, incoming),
            DType::I8 => fold_typed::<i8>(self, acc, incoming),
            DType::I16 => fold_typed::<i16>(self, acc, incoming),
            DType::I32 => fold_typed::<i32>(self, acc, incoming),
            DType::I64 => fold_typed::<i64>(self, acc, incoming),
            DType::F32 => fold_typed::<f32>(self, acc, incoming),
            DType::F64 => fold_typed::<f64>(self, acc, incoming),
        }
        Ok(())
    }
}

fn fold_typed<T: Element>(op: ReduceOp, acc: &mut [u8], incoming: &[u8]) {
    let size = std::mem::size_of::<T>();
    for (dst, src) in acc.chunks_exact_mut(size).zip(incoming.chunks_exact(size)) {
        let a: T = bytemuck::pod_read_unaligned(dst);
        let b: T = bytemuck::pod_read_unaligned(src);
        dst.copy_from_slice(bytemuck::bytes_of(&T::combine(op, a, b)));
    }
}
