//! Row reductions and row-expand broadcasts
//!
//! A row-expand operation applies one scalar per row across every column of
//! the tile. Softmax uses it to subtract the running max; the output fold
//! uses it to rescale and to normalize.

use crate::error::{shape_mismatch, TileResult};
use crate::tensor::Tile;

// ============================================================================
// Reductions
// ============================================================================

/// Per-row maximum. A row of all `-inf` reduces to `-inf`.
pub fn row_max(x: &Tile<f32>) -> Vec<f32> {
    (0..x.rows())
        .map(|r| (0..x.cols()).fold(f32::NEG_INFINITY, |m, c| m.max(x.get(r, c))))
        .collect()
}

/// Per-row sum, accumulated left to right
pub fn row_sum(x: &Tile<f32>) -> Vec<f32> {
    (0..x.rows())
        .map(|r| (0..x.cols()).fold(0.0f32, |s, c| s + x.get(r, c)))
        .collect()
}

// ============================================================================
// Row-expand broadcasts
// ============================================================================

fn check_rows(op: &'static str, x: &Tile<f32>, v: &[f32]) -> TileResult<()> {
    if v.len() != x.rows() {
        return Err(shape_mismatch(op, x.rows(), v.len()));
    }
    Ok(())
}

/// `x = exp(scale * (x - v))` per row.
///
/// A row whose shift is `-inf` only holds masked entries and becomes zeros.
pub fn row_expand_sub_exp(x: &mut Tile<f32>, v: &[f32], scale: f32) -> TileResult<()> {
    check_rows("row_expand_sub_exp", x, v)?;
    for (r, &shift) in v.iter().enumerate() {
        for c in 0..x.cols() {
            let value = if shift == f32::NEG_INFINITY {
                0.0
            } else {
                (scale * (x.get(r, c) - shift)).exp()
            };
            x.set(r, c, value);
        }
    }
    Ok(())
}

pub fn row_expand_mul(x: &mut Tile<f32>, v: &[f32]) -> TileResult<()> {
    check_rows("row_expand_mul", x, v)?;
    for (r, &factor) in v.iter().enumerate() {
        for c in 0..x.cols() {
            x.set(r, c, x.get(r, c) * factor);
        }
    }
    Ok(())
}

/// Divide each row by its scalar. A zero divisor saturates the whole row to
/// `+inf`, which is what a fully masked query row ends up as.
pub fn row_expand_div(x: &mut Tile<f32>, v: &[f32]) -> TileResult<()> {
    check_rows("row_expand_div", x, v)?;
    for (r, &divisor) in v.iter().enumerate() {
        for c in 0..x.cols() {
            let value = if divisor == 0.0 {
                f32::INFINITY
            } else {
                x.get(r, c) / divisor
            };
            x.set(r, c, value);
        }
    }
    Ok(())
}

/// Element-wise `x += y`
pub fn add_assign(x: &mut Tile<f32>, y: &Tile<f32>) -> TileResult<()> {
    if x.shape() != y.shape() {
        return Err(shape_mismatch(
            "add_assign",
            format!("{}x{}", x.rows(), x.cols()),
            format!("{}x{}", y.rows(), y.cols()),
        ));
    }
    for r in 0..x.rows() {
        for c in 0..x.cols() {
            x.set(r, c, x.get(r, c) + y.get(r, c));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tile(rows: usize, cols: usize, data: &[f32]) -> Tile<f32> {
        Tile::from_vec(rows, cols, data.to_vec()).unwrap()
    }

    #[test]
    fn test_row_max_and_sum() {
        let x = tile(2, 3, &[1.0, 5.0, -2.0, f32::NEG_INFINITY, f32::NEG_INFINITY, 0.5]);
        assert_eq!(row_max(&x), vec![5.0, 0.5]);
        assert_eq!(row_sum(&tile(2, 2, &[1.0, 2.0, 3.0, 4.0])), vec![3.0, 7.0]);
    }

    #[test]
    fn test_row_max_fully_masked() {
        let x = tile(1, 2, &[f32::NEG_INFINITY, f32::NEG_INFINITY]);
        assert_eq!(row_max(&x), vec![f32::NEG_INFINITY]);
    }

    #[test]
    fn test_sub_exp() {
        let mut x = tile(1, 3, &[2.0, 0.0, f32::NEG_INFINITY]);
        row_expand_sub_exp(&mut x, &[2.0], 0.5).unwrap();
        assert_eq!(x.get(0, 0), 1.0);
        assert!((x.get(0, 1) - (-1.0f32).exp()).abs() < 1e-7);
        assert_eq!(x.get(0, 2), 0.0);
    }

    #[test]
    fn test_sub_exp_masked_row_is_zero() {
        let mut x = tile(1, 2, &[f32::NEG_INFINITY, f32::NEG_INFINITY]);
        row_expand_sub_exp(&mut x, &[f32::NEG_INFINITY], 1.0).unwrap();
        assert_eq!(x.as_slice(), &[0.0, 0.0]);
    }

    #[test]
    fn test_mul_div() {
        let mut x = tile(2, 2, &[1.0, 2.0, 3.0, 4.0]);
        row_expand_mul(&mut x, &[2.0, 0.5]).unwrap();
        assert_eq!(x.as_slice(), &[2.0, 4.0, 1.5, 2.0]);
        row_expand_div(&mut x, &[2.0, 0.5]).unwrap();
        assert_eq!(x.as_slice(), &[1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_div_by_zero_saturates() {
        let mut x = tile(2, 2, &[0.0, -1.0, 1.0, 1.0]);
        row_expand_div(&mut x, &[0.0, 1.0]).unwrap();
        assert_eq!(x.get(0, 0), f32::INFINITY);
        assert_eq!(x.get(0, 1), f32::INFINITY);
        assert_eq!(x.get(1, 0), 1.0);
    }

    #[test]
    fn test_shape_checks() {
        let mut x = tile(2, 2, &[0.0; 4]);
        assert!(row_expand_mul(&mut x, &[1.0]).is_err());
        assert!(add_assign(&mut x, &tile(1, 2, &[0.0; 2])).is_err());
    }
}
