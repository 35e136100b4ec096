//! Streaming (online) softmax over score tiles
//!
//! Each call to [`StreamingSoftmax::step`] consumes one `rows x tile_width`
//! tile of raw `Q K^T` scores and
//! - updates the per-row running max and running sum,
//! - returns `x_exp = exp(scale * (X - new_max))` rounded to storage precision,
//! - returns the per-row rescale factor `exp(scale * (old_max - new_max))`
//!   that the output fold applies to what it has accumulated so far.
//!
//! The running max is kept in raw score units and the scale is applied
//! inside the exponent. All reductions run in `f32`.

use crate::error::{shape_mismatch, TileResult};
use crate::kernels::{causal_extent, CausalExtent, TileKernels};
use crate::tensor::{Element, Tile};
use serde::Serialize;

/// Softmax state across the tiles of one query block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SoftmaxState {
    /// No score tile folded yet
    Uninitialized,
    /// Exactly one tile folded
    FirstTile,
    /// Two or more tiles folded
    Streaming,
}

/// Where a score tile sits for causal masking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TileMask {
    #[default]
    None,
    /// Global row of the tile's first row and global column of its first column
    Causal { row_offset: usize, col_offset: usize },
}

impl TileMask {
    fn extent(&self, rows: usize, cols: usize) -> CausalExtent {
        match *self {
            TileMask::None => CausalExtent::Visible,
            TileMask::Causal {
                row_offset,
                col_offset,
            } => causal_extent(row_offset, rows, col_offset, cols),
        }
    }
}

/// Output of one softmax step
#[derive(Debug, Clone)]
pub struct SoftmaxStep<T> {
    /// Probabilities in storage precision, the PV matmul operand
    pub x_exp: Tile<T>,
    /// The same probabilities before rounding
    pub probs: Tile<f32>,
    /// Per-row `exp(scale * (old_max - new_max))`
    pub rescale: Vec<f32>,
    /// The tile lay entirely above the diagonal and was skipped
    pub pass_through: bool,
}

/// Per-row running max/sum for one query block (or one lane of it)
#[derive(Debug, Clone)]
pub struct StreamingSoftmax {
    rows: usize,
    scale: f32,
    state: SoftmaxState,
    running_max: Vec<f32>,
    running_sum: Vec<f32>,
    tiles_seen: usize,
}

impl StreamingSoftmax {
    pub fn new(rows: usize, scale: f32) -> Self {
        StreamingSoftmax {
            rows,
            scale,
            state: SoftmaxState::Uninitialized,
            running_max: vec![f32::NEG_INFINITY; rows],
            running_sum: vec![0.0; rows],
            tiles_seen: 0,
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn state(&self) -> SoftmaxState {
        self.state
    }

    pub fn running_max(&self) -> &[f32] {
        &self.running_max
    }

    pub fn running_sum(&self) -> &[f32] {
        &self.running_sum
    }

    /// Tiles stepped so far, pass-through tiles included
    pub fn tiles_seen(&self) -> usize {
        self.tiles_seen
    }

    pub fn reset(&mut self) {
        self.state = SoftmaxState::Uninitialized;
        self.running_max.fill(f32::NEG_INFINITY);
        self.running_sum.fill(0.0);
        self.tiles_seen = 0;
    }

    /// Fold one score tile into the running state
    pub fn step<K, T>(
        &mut self,
        kernels: &K,
        scores: &Tile<f32>,
        mask: TileMask,
    ) -> TileResult<SoftmaxStep<T>>
    where
        K: TileKernels,
        T: Element,
    {
        if scores.rows() != self.rows {
            return Err(shape_mismatch("StreamingSoftmax::step", self.rows, scores.rows()));
        }
        let (rows, cols) = scores.shape();
        self.tiles_seen += 1;

        let extent = mask.extent(rows, cols);
        if extent == CausalExtent::Masked {
            // Nothing visible: leave the state alone and hand PV a zero tile
            return Ok(SoftmaxStep {
                x_exp: Tile::zeros(rows, cols),
                probs: Tile::zeros(rows, cols),
                rescale: vec![1.0; rows],
                pass_through: true,
            });
        }

        let mut x = scores.clone();
        if let (CausalExtent::Partial, TileMask::Causal { row_offset, col_offset }) = (extent, mask) {
            kernels.causal_mask(&mut x, row_offset, col_offset);
        }

        let local_max = kernels.row_max(&x);
        let (new_max, rescale) = match self.state {
            SoftmaxState::Uninitialized => (local_max, vec![1.0; rows]),
            SoftmaxState::FirstTile | SoftmaxState::Streaming => {
                let new_max: Vec<f32> = local_max
                    .iter()
                    .zip(&self.running_max)
                    .map(|(&local, &running)| local.max(running))
                    .collect();
                let rescale = self
                    .running_max
                    .iter()
                    .zip(&new_max)
                    .map(|(&old, &new)| {
                        if new == f32::NEG_INFINITY {
                            1.0
                        } else {
                            (self.scale * (old - new)).exp()
                        }
                    })
                    .collect();
                (new_max, rescale)
            }
        };

        kernels.row_expand_sub_exp(&mut x, &new_max, self.scale)?;
        let tile_sum = kernels.row_sum(&x);

        match self.state {
            SoftmaxState::Uninitialized => {
                self.running_sum = tile_sum;
                self.state = SoftmaxState::FirstTile;
            }
            SoftmaxState::FirstTile | SoftmaxState::Streaming => {
                for ((sum, &factor), &fresh) in
                    self.running_sum.iter_mut().zip(&rescale).zip(&tile_sum)
                {
                    *sum = factor * *sum + fresh;
                }
                self.state = SoftmaxState::Streaming;
            }
        }
        self.running_max = new_max;

        Ok(SoftmaxStep {
            x_exp: kernels.cast::<T>(&x),
            probs: x,
            rescale,
            pass_through: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::CpuKernels;
    use half::f16;

    fn scores(rows: usize, cols: usize, data: &[f32]) -> Tile<f32> {
        Tile::from_vec(rows, cols, data.to_vec()).unwrap()
    }

    #[test]
    fn test_first_tile() {
        let mut sm = StreamingSoftmax::new(1, 1.0);
        let step: SoftmaxStep<f32> = sm
            .step(&CpuKernels, &scores(1, 2, &[0.0, 1.0]), TileMask::None)
            .unwrap();

        assert_eq!(sm.state(), SoftmaxState::FirstTile);
        assert_eq!(step.rescale, vec![1.0]);
        assert_eq!(sm.running_max(), &[1.0]);
        assert_eq!(step.x_exp.get(0, 1), 1.0);
        assert!((step.x_exp.get(0, 0) - (-1.0f32).exp()).abs() < 1e-7);
        assert!((sm.running_sum()[0] - (1.0 + (-1.0f32).exp())).abs() < 1e-6);
    }

    #[test]
    fn test_streaming_rescales_when_max_grows() {
        let scale = 0.5;
        let mut sm = StreamingSoftmax::new(1, scale);
        let _: SoftmaxStep<f32> = sm
            .step(&CpuKernels, &scores(1, 2, &[1.0, 2.0]), TileMask::None)
            .unwrap();
        let step: SoftmaxStep<f32> = sm
            .step(&CpuKernels, &scores(1, 2, &[4.0, 0.0]), TileMask::None)
            .unwrap();

        assert_eq!(sm.state(), SoftmaxState::Streaming);
        assert_eq!(sm.running_max(), &[4.0]);
        assert!((step.rescale[0] - (scale * (2.0 - 4.0)).exp()).abs() < 1e-7);

        // Sum equals the dense sum relative to the final max
        let dense: f32 = [1.0f32, 2.0, 4.0, 0.0]
            .iter()
            .map(|&s| (scale * (s - 4.0)).exp())
            .sum();
        assert!((sm.running_sum()[0] - dense).abs() < 1e-6);
    }

    #[test]
    fn test_streaming_without_new_max_keeps_rescale_one() {
        let mut sm = StreamingSoftmax::new(1, 1.0);
        let _: SoftmaxStep<f32> = sm
            .step(&CpuKernels, &scores(1, 1, &[3.0]), TileMask::None)
            .unwrap();
        let step: SoftmaxStep<f32> = sm
            .step(&CpuKernels, &scores(1, 1, &[1.0]), TileMask::None)
            .unwrap();
        assert_eq!(step.rescale, vec![1.0]);
        assert_eq!(sm.running_max(), &[3.0]);
    }

    #[test]
    fn test_x_exp_rounded_to_storage_precision() {
        let mut sm = StreamingSoftmax::new(1, 1.0);
        let step: SoftmaxStep<f16> = sm
            .step(&CpuKernels, &scores(1, 2, &[0.0, -1.0 / 3.0]), TileMask::None)
            .unwrap();
        let rounded = step.x_exp.get(0, 1).to_f32();
        let exact = step.probs.get(0, 1);
        assert_ne!(rounded, exact);
        assert!((rounded - exact).abs() < 1e-3);
        // The running sum uses the unrounded values
        assert_eq!(sm.running_sum()[0], 1.0 + exact);
    }

    #[test]
    fn test_causal_partial_tile_masks_future_keys() {
        // rows 0..2, cols 0..2: row 0 sees col 0 only
        let mut sm = StreamingSoftmax::new(2, 1.0);
        let step: SoftmaxStep<f32> = sm
            .step(
                &CpuKernels,
                &scores(2, 2, &[0.0, 9.0, 0.0, 0.0]),
                TileMask::Causal {
                    row_offset: 0,
                    col_offset: 0,
                },
            )
            .unwrap();
        assert_eq!(step.x_exp.get(0, 1), 0.0);
        assert_eq!(sm.running_max(), &[0.0, 0.0]);
        assert_eq!(sm.running_sum(), &[1.0, 2.0]);
    }

    #[test]
    fn test_causal_pass_through_leaves_state() {
        let mut sm = StreamingSoftmax::new(2, 1.0);
        let _: SoftmaxStep<f32> = sm
            .step(
                &CpuKernels,
                &scores(2, 2, &[1.0, 2.0, 3.0, 4.0]),
                TileMask::Causal {
                    row_offset: 0,
                    col_offset: 0,
                },
            )
            .unwrap();
        let max_before = sm.running_max().to_vec();
        let sum_before = sm.running_sum().to_vec();

        let step: SoftmaxStep<f32> = sm
            .step(
                &CpuKernels,
                &scores(2, 2, &[100.0; 4]),
                TileMask::Causal {
                    row_offset: 0,
                    col_offset: 2,
                },
            )
            .unwrap();

        assert!(step.pass_through);
        assert_eq!(step.rescale, vec![1.0, 1.0]);
        assert!(step.x_exp.as_slice().iter().all(|&v| v == 0.0));
        assert_eq!(sm.running_max(), &max_before[..]);
        assert_eq!(sm.running_sum(), &sum_before[..]);
        assert_eq!(sm.state(), SoftmaxState::FirstTile);
        assert_eq!(sm.tiles_seen(), 2);
    }

    #[test]
    fn test_fully_masked_row_in_streaming_tile() {
        // global rows 2..4 against cols 3..5: row 2 sees nothing in this tile
        let mut sm = StreamingSoftmax::new(2, 1.0);
        let _: SoftmaxStep<f32> = sm
            .step(&CpuKernels, &scores(2, 1, &[0.5, 0.5]), TileMask::None)
            .unwrap();
        let step: SoftmaxStep<f32> = sm
            .step(
                &CpuKernels,
                &scores(2, 2, &[7.0, 7.0, 1.0, 1.0]),
                TileMask::Causal {
                    row_offset: 2,
                    col_offset: 3,
                },
            )
            .unwrap();
        assert!(!step.pass_through);
        assert_eq!(step.rescale[0], 1.0);
        assert_eq!(step.x_exp.get(0, 0), 0.0);
        assert_eq!(sm.running_sum()[0], 1.0);
        assert!(step.rescale.iter().all(|r| r.is_finite()));
    }

    #[test]
    fn test_shape_mismatch() {
        let mut sm = StreamingSoftmax::new(3, 1.0);
        let result: TileResult<SoftmaxStep<f32>> =
            sm.step(&CpuKernels, &Tile::zeros(2, 2), TileMask::None);
        assert!(result.is_err());
    }

    #[test]
    fn test_reset() {
        let mut sm = StreamingSoftmax::new(1, 1.0);
        let _: SoftmaxStep<f32> = sm
            .step(&CpuKernels, &scores(1, 1, &[2.0]), TileMask::None)
            .unwrap();
        sm.reset();
        assert_eq!(sm.state(), SoftmaxState::Uninitialized);
        assert_eq!(sm.running_max(), &[f32::NEG_INFINITY]);
        assert_eq!(sm.tiles_seen(), 0);
    }
}
