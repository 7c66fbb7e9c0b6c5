//! Element type tags
//!
//! Each tag is one byte on the wire. The byte values are part of the
//! interoperability contract and must never be renumbered.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Element type of a tensor buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum DType {
    U8 = 0,
    I8 = 1,
    I16 = 2,
    I32 = 3,
    I64 = 4,
    F32 = 5,
    F64 = 6,
}

impl DType {
    /// All element types, in tag order
    pub const ALL: [DType; 7] = [
        DType::U8,
        DType::I8,
        DType::I16,
        DType::I32,
        DType::I64,
        DType::F32,
        DType::F64,
    ];

    /// Size of one element in bytes
    pub const fn size(self) -> usize {
        match self {
            DType::U8 | DType::I8 => 1,
            DType::I16 => 2,
            DType::I32 | DType::F32 => 4,
            DType::I64 | DType::F64 => 8,
        }
    }

    /// Wire tag
    pub const fn tag(self) -> u8 {
        self as u8
    }

    /// Parse a wire tag
    pub fn from_tag(tag: u8) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|d| d.tag() == tag)
            .ok_or_else(|| Error::malformed(format!("unknown element type tag {}", tag)))
    }

    /// Whether this is a floating point type
    pub const fn is_float(self) -> bool {
        matches!(self, DType::F32 | DType::F64)
    }

    /// Byte length of `count` elements, `None` on overflow
    pub fn byte_len(self, count: u64) -> Option<u64> {
        count.checked_mul(self.size() as u64)
    }

    /// Lowercase name, as used in logs and errors
    pub const fn name(self) -> &'static str {
        match self {
            DType::U8 => "u8",
            DType::I8 => "i8",
            DType::I16 => "i16",
            DType::I32 => "i32",
            DType::I64 => "i64",
            DType::F32 => "f32",
            DType::F64 => "f64",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_roundtrip() {
        for dtype in DType::ALL {
            assert_eq!(DType::from_tag(dtype.tag()).unwrap(), dtype);
        }
    }

    #[test]
    fn test_unknown_tag_is_malformed() {
        let err = DType::from_tag(42).unwrap_err();
        assert!(matches!(err, Error::MalformedFrame { .. }));
    }

    #[test]
    fn test_sizes_match_rust_types() {
        assert_eq!(DType::U8.size(), std::mem::size_of::<u8>());
        assert_eq!(DType::I16.size(), std::mem::size_of::<i16>());
        assert_eq!(DType::I64.size(), std::mem::size_of::<i64>());
        assert_eq!(DType::F32.size(), std::mem::size_of::<f32>());
        assert_eq!(DType::F64.size(), std::mem::size_of::<f64>());
    }

    #[test]
    fn test_byte_len_overflow() {
        assert_eq!(DType::F64.byte_len(3), Some(24));
        assert_eq!(DType::F64.byte_len(u64::MAX), None);
    }
}
