//! Causal masking
//!
//! Query row `i` may attend only to keys `j <= i`. Offsets are global: a tile
//! covering rows `row_offset..` and columns `col_offset..` masks entry
//! `(r, c)` when `col_offset + c > row_offset + r`.

use crate::tensor::Tile;

/// Where a tile sits relative to the attention diagonal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CausalExtent {
    /// Every entry visible
    Visible,
    /// Crosses the diagonal; some entries must be masked
    Partial,
    /// Entirely above the diagonal; contributes nothing
    Masked,
}

/// Classify a `rows x cols` tile at the given global offsets
pub fn causal_extent(row_offset: usize, rows: usize, col_offset: usize, cols: usize) -> CausalExtent {
    if rows == 0 || cols == 0 {
        return CausalExtent::Visible;
    }
    let last_row = row_offset + rows - 1;
    let last_col = col_offset + cols - 1;
    if col_offset > last_row {
        CausalExtent::Masked
    } else if last_col <= row_offset {
        CausalExtent::Visible
    } else {
        CausalExtent::Partial
    }
}

/// Set every entry above the diagonal to `-inf` in place
pub fn apply_causal_mask(x: &mut Tile<f32>, row_offset: usize, col_offset: usize) {
    for r in 0..x.rows() {
        let row = row_offset + r;
        for c in 0..x.cols() {
            if col_offset + c > row {
                x.set(r, c, f32::NEG_INFINITY);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `0` on and below the diagonal, `-inf` above it
    fn dense_mask(rows: usize, cols: usize) -> Tile<f32> {
        Tile::from_fn(rows, cols, |r, c| if c > r { f32::NEG_INFINITY } else { 0.0 })
    }

    #[test]
    fn test_extent_classification() {
        // rows 0..4, cols 0..4 crosses the diagonal
        assert_eq!(causal_extent(0, 4, 0, 4), CausalExtent::Partial);
        // rows 4..8, cols 0..4 fully visible
        assert_eq!(causal_extent(4, 4, 0, 4), CausalExtent::Visible);
        // rows 0..4, cols 4..8 fully masked
        assert_eq!(causal_extent(0, 4, 4, 4), CausalExtent::Masked);
        // single column on the diagonal
        assert_eq!(causal_extent(3, 1, 3, 1), CausalExtent::Visible);
    }

    #[test]
    fn test_apply_mask_matches_dense_mask() {
        let mut x = Tile::<f32>::zeros(4, 4);
        apply_causal_mask(&mut x, 0, 0);
        assert_eq!(x, dense_mask(4, 4));
    }

    #[test]
    fn test_apply_mask_with_offsets() {
        let mut x = Tile::<f32>::zeros(2, 3);
        // global rows 4..6, cols 3..6
        apply_causal_mask(&mut x, 4, 3);
        assert_eq!(x.get(0, 1), 0.0); // (4, 4)
        assert_eq!(x.get(0, 2), f32::NEG_INFINITY); // (4, 5)
        assert_eq!(x.get(1, 2), 0.0); // (5, 5)
    }
}
