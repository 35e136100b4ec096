//! Dense (non-tiled) attention used as the ground truth
//!
//! Everything is computed in `f32` from the storage-precision inputs, with
//! the whole `S0 x S1` score matrix materialized.

use crate::error::{shape_mismatch, TileResult};
use crate::kernels::{mask, matmul, reduce, AccMode};
use crate::tensor::{Element, Tile};

/// Row statistics of the dense softmax
#[derive(Debug, Clone, PartialEq)]
pub struct DenseRowStats {
    /// Max raw score over the visible keys of each row
    pub max: Vec<f32>,
    /// `sum_j exp(scale * (s_ij - max_i))` over the visible keys
    pub sum: Vec<f32>,
}

fn check_inputs<T: Element>(q: &Tile<T>, k: &Tile<T>, v: Option<&Tile<T>>) -> TileResult<()> {
    if q.cols() != k.cols() {
        return Err(shape_mismatch("dense_attention", format!("K with {} columns", q.cols()), k.cols()));
    }
    if let Some(v) = v {
        if v.rows() != k.rows() {
            return Err(shape_mismatch("dense_attention", format!("V with {} rows", k.rows()), v.rows()));
        }
    }
    Ok(())
}

/// Raw `Q K^T` scores, `S0 x S1`, with the causal mask applied if requested
pub fn dense_scores<T: Element>(q: &Tile<T>, k: &Tile<T>, causal: bool) -> TileResult<Tile<f32>> {
    check_inputs(q, k, None)?;
    let mut scores = Tile::zeros(q.rows(), k.rows());
    matmul::matmul(q, &k.clone().into_transposed(), &mut scores, AccMode::Init)?;
    if causal {
        mask::apply_causal_mask(&mut scores, 0, 0);
    }
    Ok(scores)
}

/// Final per-row max and sum of the dense softmax
pub fn dense_row_stats<T: Element>(
    q: &Tile<T>,
    k: &Tile<T>,
    scale: f32,
    causal: bool,
) -> TileResult<DenseRowStats> {
    let mut scores = dense_scores(q, k, causal)?;
    let max = reduce::row_max(&scores);
    reduce::row_expand_sub_exp(&mut scores, &max, scale)?;
    let sum = reduce::row_sum(&scores);
    Ok(DenseRowStats { max, sum })
}

/// `softmax(scale * Q K^T) V`, `S0 x HEAD_SIZE`
pub fn dense_attention<T: Element>(
    q: &Tile<T>,
    k: &Tile<T>,
    v: &Tile<T>,
    scale: f32,
    causal: bool,
) -> TileResult<Tile<f32>> {
    check_inputs(q, k, Some(v))?;
    let mut probs = dense_scores(q, k, causal)?;
    let max = reduce::row_max(&probs);
    reduce::row_expand_sub_exp(&mut probs, &max, scale)?;
    let sum = reduce::row_sum(&probs);

    let mut out = Tile::zeros(q.rows(), v.cols());
    matmul::matmul(&probs, &v.to_f32(), &mut out, AccMode::Init)?;
    reduce::row_expand_div(&mut out, &sum)?;
    Ok(out)
}
