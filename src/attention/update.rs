//! Running output accumulator
//!
//! Folds each PV partial tile into a row-resident output:
//! - first tile: load it directly
//! - later tiles: `out = out * rescale + pv`, one rescale factor per row
//! - last tile: the same fold, then `out /= running_sum`
//!
//! With a single tile the first and last steps coincide: load, then divide.

use crate::error::{shape_mismatch, TileResult};
use crate::internal_error;
use crate::kernels::TileKernels;
use crate::tensor::Tile;
use serde::Serialize;

/// Output accumulator state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UpdateState {
    Empty,
    Accumulating,
    Finalized,
}

#[derive(Debug, Clone)]
pub struct RunningUpdate {
    num_tiles: usize,
    tiles_folded: usize,
    state: UpdateState,
    output: Tile<f32>,
}

impl RunningUpdate {
    pub fn new(rows: usize, head_size: usize, num_tiles: usize) -> TileResult<Self> {
        if num_tiles == 0 {
            return Err(internal_error!("RunningUpdate needs at least one tile"));
        }
        Ok(RunningUpdate {
            num_tiles,
            tiles_folded: 0,
            state: UpdateState::Empty,
            output: Tile::zeros(rows, head_size),
        })
    }

    pub fn state(&self) -> UpdateState {
        self.state
    }

    pub fn tiles_folded(&self) -> usize {
        self.tiles_folded
    }

    /// Current accumulator; normalized only once finalized
    pub fn output(&self) -> &Tile<f32> {
        &self.output
    }

    pub fn is_finalized(&self) -> bool {
        self.state == UpdateState::Finalized
    }

    pub fn into_output(self) -> TileResult<Tile<f32>> {
        if !self.is_finalized() {
            return Err(internal_error!(
                "output read after {} of {} tiles",
                self.tiles_folded,
                self.num_tiles
            ));
        }
        Ok(self.output)
    }

    pub fn reset(&mut self) {
        self.tiles_folded = 0;
        self.state = UpdateState::Empty;
        self.output.fill(0.0);
    }

    /// Fold the PV partial of the next tile.
    ///
    /// `running_sum` is only read on the last tile, where it must already
    /// cover every tile.
    pub fn fold<K: TileKernels>(
        &mut self,
        kernels: &K,
        pv: &Tile<f32>,
        rescale: &[f32],
        running_sum: &[f32],
    ) -> TileResult<()> {
        if self.state == UpdateState::Finalized {
            return Err(internal_error!(
                "fold after finalize ({} tiles)",
                self.num_tiles
            ));
        }
        if pv.shape() != self.output.shape() {
            return Err(shape_mismatch(
                "RunningUpdate::fold",
                format!("{}x{}", self.output.rows(), self.output.cols()),
                format!("{}x{}", pv.rows(), pv.cols()),
            ));
        }

        if self.tiles_folded == 0 {
            self.output.copy_from(pv)?;
            self.state = UpdateState::Accumulating;
        } else {
            kernels.row_expand_mul(&mut self.output, rescale)?;
            kernels.add_assign(&mut self.output, pv)?;
        }
        self.tiles_folded += 1;

        if self.tiles_folded == self.num_tiles {
            kernels.row_expand_div(&mut self.output, running_sum)?;
            self.state = UpdateState::Finalized;
        }
        Ok(())
    }
}
