//! Rectangular typed tile buffer

use super::element::Element;
use crate::error::{shape_mismatch, TileForgeError, TileResult};
use serde::{Deserialize, Serialize};

/// Memory order of a tile's backing storage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layout {
    #[default]
    RowMajor,
    ColMajor,
}

impl Layout {
    pub fn flipped(self) -> Self {
        match self {
            Layout::RowMajor => Layout::ColMajor,
            Layout::ColMajor => Layout::RowMajor,
        }
    }
}

/// A `rows x cols` buffer of elements with a fixed layout.
///
/// Tiles are plain owned values. Handing one to another engine means moving
/// it through a FIFO slot; nothing shares a tile's storage.
///
/// Deserializing goes through [`Tile::from_vec_with_layout`], so a tile read
/// from disk always holds exactly `rows * cols` elements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    try_from = "RawTile<T>",
    bound(deserialize = "T: Element + Deserialize<'de>")
)]
pub struct Tile<T> {
    rows: usize,
    cols: usize,
    layout: Layout,
    data: Vec<T>,
}

/// Unchecked wire form of a tile
#[derive(Deserialize)]
struct RawTile<T> {
    rows: usize,
    cols: usize,
    #[serde(default)]
    layout: Layout,
    data: Vec<T>,
}

impl<T: Element> TryFrom<RawTile<T>> for Tile<T> {
    type Error = TileForgeError;

    fn try_from(raw: RawTile<T>) -> Result<Self, Self::Error> {
        Tile::from_vec_with_layout(raw.rows, raw.cols, raw.layout, raw.data)
    }
}

impl<T: Element> Tile<T> {
    /// Zero-filled row-major tile
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self::filled(rows, cols, T::zero())
    }

    pub fn filled(rows: usize, cols: usize, value: T) -> Self {
        Tile {
            rows,
            cols,
            layout: Layout::RowMajor,
            data: vec![value; rows * cols],
        }
    }

    /// Wrap row-major data
    pub fn from_vec(rows: usize, cols: usize, data: Vec<T>) -> TileResult<Self> {
        Self::from_vec_with_layout(rows, cols, Layout::RowMajor, data)
    }

    pub fn from_vec_with_layout(
        rows: usize,
        cols: usize,
        layout: Layout,
        data: Vec<T>,
    ) -> TileResult<Self> {
        if rows.checked_mul(cols) != Some(data.len()) {
            return Err(shape_mismatch(
                "Tile::from_vec",
                format!("{}x{} elements", rows, cols),
                data.len(),
            ));
        }
        Ok(Tile {
            rows,
            cols,
            layout,
            data,
        })
    }

    /// Row-major tile built element by element
    pub fn from_fn(rows: usize, cols: usize, mut f: impl FnMut(usize, usize) -> T) -> Self {
        let mut data = Vec::with_capacity(rows * cols);
        for r in 0..rows {
            for c in 0..cols {
                data.push(f(r, c));
            }
        }
        Tile {
            rows,
            cols,
            layout: Layout::RowMajor,
            data,
        }
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Backing storage in the tile's own layout
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<T> {
        self.data
    }

    #[inline]
    fn offset(&self, r: usize, c: usize) -> usize {
        debug_assert!(r < self.rows && c < self.cols, "({}, {}) out of bounds", r, c);
        match self.layout {
            Layout::RowMajor => r * self.cols + c,
            Layout::ColMajor => c * self.rows + r,
        }
    }

    #[inline]
    pub fn get(&self, r: usize, c: usize) -> T {
        self.data[self.offset(r, c)]
    }

    #[inline]
    pub fn set(&mut self, r: usize, c: usize, value: T) {
        let idx = self.offset(r, c);
        self.data[idx] = value;
    }

    pub fn fill(&mut self, value: T) {
        self.data.iter_mut().for_each(|x| *x = value);
    }

    /// Reinterpret as the transpose without moving any data.
    ///
    /// Rows of a row-major `n x d` tile are the columns of a column-major
    /// `d x n` tile, so this only swaps the dimensions and flips the layout.
    pub fn into_transposed(self) -> Self {
        Tile {
            rows: self.cols,
            cols: self.rows,
            layout: self.layout.flipped(),
            data: self.data,
        }
    }

    pub fn to_row_major(&self) -> Self {
        match self.layout {
            Layout::RowMajor => self.clone(),
            Layout::ColMajor => Self::from_fn(self.rows, self.cols, |r, c| self.get(r, c)),
        }
    }

    /// Copy out a `rows x cols` block starting at `(r0, c0)`
    pub fn block(&self, r0: usize, c0: usize, rows: usize, cols: usize) -> TileResult<Tile<T>> {
        if r0 + rows > self.rows || c0 + cols > self.cols {
            return Err(shape_mismatch(
                "Tile::block",
                format!("block within {}x{}", self.rows, self.cols),
                format!("{}x{} at ({}, {})", rows, cols, r0, c0),
            ));
        }
        Ok(Self::from_fn(rows, cols, |r, c| self.get(r0 + r, c0 + c)))
    }

    /// Rows `r0..r1`, all columns
    pub fn row_block(&self, r0: usize, r1: usize) -> TileResult<Tile<T>> {
        self.block(r0, 0, r1.saturating_sub(r0), self.cols)
    }

    /// Overwrite the block starting at `(r0, c0)` with `src`
    pub fn write_block(&mut self, r0: usize, c0: usize, src: &Tile<T>) -> TileResult<()> {
        if r0 + src.rows > self.rows || c0 + src.cols > self.cols {
            return Err(shape_mismatch(
                "Tile::write_block",
                format!("block within {}x{}", self.rows, self.cols),
                format!("{}x{} at ({}, {})", src.rows, src.cols, r0, c0),
            ));
        }
        for r in 0..src.rows {
            for c in 0..src.cols {
                self.set(r0 + r, c0 + c, src.get(r, c));
            }
        }
        Ok(())
    }

    /// Overwrite the whole tile with a same-shaped one
    pub fn copy_from(&mut self, src: &Tile<T>) -> TileResult<()> {
        if src.shape() != self.shape() {
            return Err(shape_mismatch(
                "Tile::copy_from",
                format!("{}x{}", self.rows, self.cols),
                format!("{}x{}", src.rows, src.cols),
            ));
        }
        if src.layout == self.layout {
            self.data.copy_from_slice(&src.data);
            Ok(())
        } else {
            self.write_block(0, 0, src)
        }
    }

    /// Element-wise conversion, keeping the layout
    pub fn cast<U: Element>(&self) -> Tile<U> {
        Tile {
            rows: self.rows,
            cols: self.cols,
            layout: self.layout,
            data: self.data.iter().map(|&x| U::from_f32(x.to_f32())).collect(),
        }
    }

    pub fn to_f32(&self) -> Tile<f32> {
        self.cast::<f32>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use half::f16;

    #[test]
    fn test_from_vec_checks_len() {
        assert!(Tile::<f32>::from_vec(2, 3, vec![0.0; 6]).is_ok());
        let err = Tile::<f32>::from_vec(2, 3, vec![0.0; 5]).unwrap_err();
        assert!(err.is_user_error());
        assert!(Tile::<f32>::from_vec(usize::MAX, 2, Vec::new()).is_err());
    }

    #[test]
    fn test_deserialize_checks_len() {
        let short = r#"{"rows":2,"cols":2,"data":[1.0]}"#;
        assert!(serde_json::from_str::<Tile<f32>>(short).is_err());

        let t: Tile<f32> = serde_json::from_str(r#"{"rows":1,"cols":2,"data":[1.0,2.0]}"#).unwrap();
        assert_eq!(t.layout(), Layout::RowMajor);
        assert_eq!(t.get(0, 1), 2.0);

        let col = Tile::from_vec_with_layout(2, 1, Layout::ColMajor, vec![3.0f32, 4.0]).unwrap();
        let json = serde_json::to_string(&col).unwrap();
        assert_eq!(serde_json::from_str::<Tile<f32>>(&json).unwrap(), col);
    }

    #[test]
    fn test_transposed_view_shares_storage_order() {
        // 3 keys of width 2, row-major
        let k = Tile::from_vec(3, 2, vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let kt = k.clone().into_transposed();
        assert_eq!(kt.shape(), (2, 3));
        assert_eq!(kt.layout(), Layout::ColMajor);
        for r in 0..3 {
            for c in 0..2 {
                assert_eq!(kt.get(c, r), k.get(r, c));
            }
        }
        assert_eq!(kt.as_slice(), k.as_slice());
        assert_eq!(kt.to_row_major().as_slice(), &[1.0, 3.0, 5.0, 2.0, 4.0, 6.0]);
    }

    #[test]
    fn test_block_and_write_block() {
        let t = Tile::from_fn(4, 4, |r, c| (r * 4 + c) as f32);
        let b = t.block(1, 2, 2, 2).unwrap();
        assert_eq!(b.as_slice(), &[6.0, 7.0, 10.0, 11.0]);

        let mut dst = Tile::<f32>::zeros(4, 4);
        dst.write_block(2, 0, &b).unwrap();
        assert_eq!(dst.get(2, 0), 6.0);
        assert_eq!(dst.get(3, 1), 11.0);
        assert_eq!(dst.get(0, 0), 0.0);

        assert!(t.block(3, 3, 2, 1).is_err());
        assert!(dst.write_block(3, 3, &b).is_err());
    }

    #[test]
    fn test_row_block() {
        let t = Tile::from_fn(4, 2, |r, _| r as f32);
        let rows = t.row_block(2, 4).unwrap();
        assert_eq!(rows.shape(), (2, 2));
        assert_eq!(rows.get(0, 1), 2.0);
    }

    #[test]
    fn test_copy_from_across_layouts() {
        let src = Tile::from_vec_with_layout(2, 2, Layout::ColMajor, vec![1.0f32, 2.0, 3.0, 4.0])
            .unwrap();
        let mut dst = Tile::<f32>::zeros(2, 2);
        dst.copy_from(&src).unwrap();
        assert_eq!(dst.as_slice(), &[1.0, 3.0, 2.0, 4.0]);
        assert!(dst.copy_from(&Tile::zeros(1, 2)).is_err());
    }

    #[test]
    fn test_cast_to_f16_and_back() {
        let t = Tile::from_vec(1, 3, vec![0.5f32, 1.0 / 3.0, -2.0]).unwrap();
        let h: Tile<f16> = t.cast();
        let back = h.to_f32();
        assert_eq!(back.get(0, 0), 0.5);
        assert_eq!(back.get(0, 2), -2.0);
        assert!((back.get(0, 1) - 1.0 / 3.0).abs() < 1e-3);
        assert_ne!(back.get(0, 1), 1.0 / 3.0);
    }
}
