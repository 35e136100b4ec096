//! Element types a tile can hold
//!
//! All arithmetic inside the pipeline happens in `f32`. An [`Element`] only
//! needs to convert to and from `f32`; reduced-precision types lose bits on
//! the way back.

use half::{bf16, f16};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Storage data type of a tile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    F32,
    F16,
    BF16,
}

impl DType {
    /// Size of one element in bytes
    pub fn size_bytes(&self) -> usize {
        match self {
            DType::F32 => 4,
            DType::F16 | DType::BF16 => 2,
        }
    }

    pub fn is_reduced_precision(&self) -> bool {
        !matches!(self, DType::F32)
    }
}

impl std::fmt::Display for DType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DType::F32 => write!(f, "f32"),
            DType::F16 => write!(f, "f16"),
            DType::BF16 => write!(f, "bf16"),
        }
    }
}

/// A scalar that can live in a [`Tile`](super::Tile)
pub trait Element: Copy + Clone + Default + Debug + PartialEq + Send + Sync + 'static {
    const DTYPE: DType;

    fn to_f32(self) -> f32;

    /// Round-to-nearest conversion from the wide accumulator type
    fn from_f32(value: f32) -> Self;

    fn zero() -> Self {
        Self::from_f32(0.0)
    }
}

impl Element for f32 {
    const DTYPE: DType = DType::F32;

    #[inline]
    fn to_f32(self) -> f32 {
        self
    }

    #[inline]
    fn from_f32(value: f32) -> Self {
        value
    }
}

impl Element for f16 {
    const DTYPE: DType = DType::F16;

    #[inline]
    fn to_f32(self) -> f32 {
        f16::to_f32(self)
    }

    #[inline]
    fn from_f32(value: f32) -> Self {
        f16::from_f32(value)
    }
}

impl Element for bf16 {
    const DTYPE: DType = DType::BF16;

    #[inline]
    fn to_f32(self) -> f32 {
        bf16::to_f32(self)
    }

    #[inline]
    fn from_f32(value: f32) -> Self {
        bf16::from_f32(value)
    }
}
