//! FIFO region sizing
//!
//! Each query block owns one communication region holding the three FIFOs
//! (and, when enabled, the checkpoint area). Within the QK and P slots the
//! matrix engine writes `k_tile_factor` column sub-tiles of
//! `matmul_block_size` columns each, see [`FifoLayout::sub_tile_columns`].

use super::FifoKind;
use crate::tensor::DType;
use serde::Serialize;
use std::ops::Range;

/// Shape parameters a layout is derived from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FifoGeometry {
    pub block_rows: usize,
    pub head_size: usize,
    pub tile_width: usize,
    pub matmul_block_size: usize,
    pub fifo_depth: usize,
    pub num_tiles: usize,
    pub p_dtype: DType,
    pub checkpoints: bool,
}

/// Derived sizes and offsets for one block's FIFO region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FifoLayout {
    block_rows: usize,
    head_size: usize,
    tile_width: usize,
    sub_cols: usize,
    k_tile_factor: usize,
    fifo_depth: usize,
    num_tiles: usize,
    p_elem_bytes: usize,
    checkpoints: bool,
}

impl FifoLayout {
    pub fn new(geometry: FifoGeometry) -> Self {
        let sub_cols = geometry.matmul_block_size.max(1);
        FifoLayout {
            block_rows: geometry.block_rows,
            head_size: geometry.head_size,
            tile_width: geometry.tile_width,
            sub_cols,
            k_tile_factor: geometry.tile_width / sub_cols,
            fifo_depth: geometry.fifo_depth,
            num_tiles: geometry.num_tiles,
            p_elem_bytes: geometry.p_dtype.size_bytes(),
            checkpoints: geometry.checkpoints,
        }
    }

    pub fn k_tile_factor(&self) -> usize {
        self.k_tile_factor
    }

    pub fn fifo_depth(&self) -> usize {
        self.fifo_depth
    }

    /// `(rows, cols)` of one slot
    pub fn slot_shape(&self, kind: FifoKind) -> (usize, usize) {
        match kind {
            FifoKind::Qk | FifoKind::P => (self.block_rows, self.tile_width),
            FifoKind::Pv => (self.block_rows, self.head_size),
        }
    }

    pub fn elem_bytes(&self, kind: FifoKind) -> usize {
        match kind {
            FifoKind::P => self.p_elem_bytes,
            FifoKind::Qk | FifoKind::Pv => 4,
        }
    }

    pub fn slot_elems(&self, kind: FifoKind) -> usize {
        let (rows, cols) = self.slot_shape(kind);
        rows * cols
    }

    /// Bytes for all `fifo_depth` slots of one FIFO
    pub fn region_bytes(&self, kind: FifoKind) -> usize {
        self.fifo_depth * self.slot_elems(kind) * self.elem_bytes(kind)
    }

    /// Columns of a slot covered by sub-tile `sub`
    pub fn sub_tile_columns(&self, sub: usize) -> Range<usize> {
        sub * self.sub_cols..(sub + 1) * self.sub_cols
    }

    /// Per-tile debug dumps: qk, p (storage and f32), pv, output and three
    /// per-row vectors
    pub fn checkpoint_bytes(&self) -> usize {
        if !self.checkpoints {
            return 0;
        }
        let score_elems = self.block_rows * self.tile_width;
        let out_elems = self.block_rows * self.head_size;
        let per_tile = score_elems * (4 + self.p_elem_bytes + 4)
            + out_elems * (4 + 4)
            + self.block_rows * 3 * 4;
        per_tile * self.num_tiles
    }

    /// Bytes of one block's communication region
    pub fn block_stride(&self) -> usize {
        FifoKind::ALL
            .iter()
            .map(|&kind| self.region_bytes(kind))
            .sum::<usize>()
            + self.checkpoint_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry() -> FifoGeometry {
        FifoGeometry {
            block_rows: 64,
            head_size: 128,
            tile_width: 256,
            matmul_block_size: 128,
            fifo_depth: 4,
            num_tiles: 2,
            p_dtype: DType::F16,
            checkpoints: false,
        }
    }

    #[test]
    fn test_region_sizes() {
        let layout = FifoLayout::new(geometry());
        assert_eq!(layout.k_tile_factor(), 2);
        assert_eq!(layout.slot_shape(FifoKind::Qk), (64, 256));
        assert_eq!(layout.slot_shape(FifoKind::Pv), (64, 128));
        assert_eq!(layout.region_bytes(FifoKind::Qk), 4 * 64 * 256 * 4);
        assert_eq!(layout.region_bytes(FifoKind::P), 4 * 64 * 256 * 2);
        assert_eq!(layout.region_bytes(FifoKind::Pv), 4 * 64 * 128 * 4);
        assert_eq!(layout.checkpoint_bytes(), 0);
    }

    #[test]
    fn test_sub_tile_addressing() {
        let layout = FifoLayout::new(geometry());
        assert_eq!(layout.sub_tile_columns(0), 0..128);
        assert_eq!(layout.sub_tile_columns(1), 128..256);
    }

    #[test]
    fn test_block_stride_sums_regions() {
        let layout = FifoLayout::new(geometry());
        let regions: usize = FifoKind::ALL.iter().map(|&k| layout.region_bytes(k)).sum();
        assert_eq!(layout.block_stride(), regions);
    }

    #[test]
    fn test_checkpoints_grow_region() {
        let plain = FifoLayout::new(geometry());
        let with = FifoLayout::new(FifoGeometry {
            checkpoints: true,
            ..geometry()
        });
        assert!(with.checkpoint_bytes() > 0);
        assert_eq!(with.block_stride(), plain.block_stride() + with.checkpoint_bytes());
    }
}
