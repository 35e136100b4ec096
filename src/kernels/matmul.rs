//! Tile matrix multiply
//!
//! Operands stay in their storage precision until the multiply; products are
//! accumulated in `f32` in ascending inner-index order. Accumulating a
//! product in sub-blocks with `Init` followed by `Acc` therefore yields the
//! same bits as one multiply over the whole inner dimension.

use crate::error::{shape_mismatch, TileResult};
use crate::tensor::{Element, Tile};

/// Accumulator handling for [`matmul`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccMode {
    /// Overwrite the accumulator
    Init,
    /// Add into the existing accumulator
    Acc,
}

impl AccMode {
    /// `Init` for the first sub-block, `Acc` afterwards
    pub fn for_sub_block(sub: usize) -> Self {
        if sub == 0 {
            AccMode::Init
        } else {
            AccMode::Acc
        }
    }
}

/// `c (m x n) = a (m x k) * b (k x n)`, or `c += a * b` with [`AccMode::Acc`]
pub fn matmul<T: Element>(
    a: &Tile<T>,
    b: &Tile<T>,
    c: &mut Tile<f32>,
    mode: AccMode,
) -> TileResult<()> {
    let (m, k) = a.shape();
    let (kb, n) = b.shape();
    if k != kb {
        return Err(shape_mismatch(
            "matmul",
            format!("b with {} rows", k),
            format!("{}x{}", kb, n),
        ));
    }
    if c.shape() != (m, n) {
        return Err(shape_mismatch(
            "matmul",
            format!("accumulator {}x{}", m, n),
            format!("{}x{}", c.rows(), c.cols()),
        ));
    }

    let a = a.to_f32();
    let b = b.to_f32();

    for i in 0..m {
        for j in 0..n {
            let mut acc = match mode {
                AccMode::Init => 0.0f32,
                AccMode::Acc => c.get(i, j),
            };
            for p in 0..k {
                acc += a.get(i, p) * b.get(p, j);
            }
            c.set(i, j, acc);
        }
    }

    Ok(())
}
