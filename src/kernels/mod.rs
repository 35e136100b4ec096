//! Tile kernels
//!
//! The pipeline treats per-element work as black-box primitives with a
//! fixed numeric contract. [`TileKernels`] is that contract; [`CpuKernels`]
//! fills it with plain loops.
//!
//! - `matmul`: operand tiles in storage precision, `f32` accumulator, [`AccMode`]
//! - `reduce`: row max / row sum and the row-expand broadcasts
//! - `mask`: causal masking and diagonal classification
//!
//! All reductions run in `f32` whatever the storage type.

pub mod mask;
pub mod matmul;
pub mod reduce;

pub use mask::{causal_extent, CausalExtent};
pub use matmul::AccMode;

use crate::error::TileResult;
use crate::tensor::{Element, Tile};

/// Numeric primitives used by the two engines
pub trait TileKernels: Send + Sync {
    /// `c = a * b` (Init) or `c += a * b` (Acc)
    fn matmul<T: Element>(
        &self,
        a: &Tile<T>,
        b: &Tile<T>,
        c: &mut Tile<f32>,
        mode: AccMode,
    ) -> TileResult<()>;

    fn row_max(&self, x: &Tile<f32>) -> Vec<f32>;

    fn row_sum(&self, x: &Tile<f32>) -> Vec<f32>;

    /// `x[r][c] = exp(scale * (x[r][c] - v[r]))`
    fn row_expand_sub_exp(&self, x: &mut Tile<f32>, v: &[f32], scale: f32) -> TileResult<()>;

    /// `x[r][c] *= v[r]`
    fn row_expand_mul(&self, x: &mut Tile<f32>, v: &[f32]) -> TileResult<()>;

    /// `x[r][c] /= v[r]`, saturating to `+inf` where `v[r] == 0`
    fn row_expand_div(&self, x: &mut Tile<f32>, v: &[f32]) -> TileResult<()>;

    /// `x += y`
    fn add_assign(&self, x: &mut Tile<f32>, y: &Tile<f32>) -> TileResult<()>;

    /// Set entries with global column above global row to `-inf`
    fn causal_mask(&self, x: &mut Tile<f32>, row_offset: usize, col_offset: usize);

    /// Round an `f32` tile to storage precision
    fn cast<T: Element>(&self, x: &Tile<f32>) -> Tile<T> {
        x.cast::<T>()
    }
}

/// Reference CPU implementation of [`TileKernels`]
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuKernels;

impl TileKernels for CpuKernels {
    fn matmul<T: Element>(
        &self,
        a: &Tile<T>,
        b: &Tile<T>,
        c: &mut Tile<f32>,
        mode: AccMode,
    ) -> TileResult<()> {
        matmul::matmul(a, b, c, mode)
    }

    fn row_max(&self, x: &Tile<f32>) -> Vec<f32> {
        reduce::row_max(x)
    }

    fn row_sum(&self, x: &Tile<f32>) -> Vec<f32> {
        reduce::row_sum(x)
    }

    fn row_expand_sub_exp(&self, x: &mut Tile<f32>, v: &[f32], scale: f32) -> TileResult<()> {
        reduce::row_expand_sub_exp(x, v, scale)
    }

    fn row_expand_mul(&self, x: &mut Tile<f32>, v: &[f32]) -> TileResult<()> {
        reduce::row_expand_mul(x, v)
    }

    fn row_expand_div(&self, x: &mut Tile<f32>, v: &[f32]) -> TileResult<()> {
        reduce::row_expand_div(x, v)
    }

    fn add_assign(&self, x: &mut Tile<f32>, y: &Tile<f32>) -> TileResult<()> {
        reduce::add_assign(x, y)
    }

    fn causal_mask(&self, x: &mut Tile<f32>, row_offset: usize, col_offset: usize) {
        mask::apply_causal_mask(x, row_offset, col_offset)
    }
}
