//! Pipeline configuration

use crate::config_error;
use crate::error::TileResult;
use crate::fifo::{FifoGeometry, FifoLayout};
use crate::tensor::DType;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Shapes and tuning knobs for one attention problem.
///
/// Missing fields in JSON fall back to [`PipelineConfig::default`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Query rows
    pub s0: usize,
    pub head_size: usize,
    /// Key/value rows
    pub s1: usize,
    /// Key columns per tile
    pub tile_width: usize,
    /// Columns per matmul sub-tile
    pub matmul_block_size: usize,
    /// Query rows per block
    pub block_rows: usize,
    /// Row lanes the vector engine splits a block into
    pub vec_lanes: usize,
    /// Tiles QK and softmax run ahead of PV and update
    pub preload_depth: usize,
    /// Slots per FIFO
    pub fifo_depth: usize,
    /// Tiles per consumption signal
    pub sync_period: usize,
    pub causal_mask: bool,
    pub intermediate_checkpoints: bool,
    pub parallel_blocks: bool,
    /// Softmax scale; `1/sqrt(head_size)` when unset
    pub scale: Option<f32>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            s0: 64,
            head_size: 128,
            s1: 256,
            tile_width: 128,
            matmul_block_size: 128,
            block_rows: 64,
            vec_lanes: 2,
            preload_depth: 2,
            fifo_depth: 8,
            sync_period: 1,
            causal_mask: false,
            intermediate_checkpoints: false,
            parallel_blocks: true,
            scale: None,
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Problem shape: `s0` query rows, `s1` key rows, `head_size` columns
    pub fn with_shape(mut self, s0: usize, s1: usize, head_size: usize) -> Self {
        self.s0 = s0;
        self.s1 = s1;
        self.head_size = head_size;
        self
    }

    pub fn with_tile_width(mut self, tile_width: usize) -> Self {
        self.tile_width = tile_width;
        self
    }

    pub fn with_matmul_block_size(mut self, matmul_block_size: usize) -> Self {
        self.matmul_block_size = matmul_block_size;
        self
    }

    pub fn with_block_rows(mut self, block_rows: usize) -> Self {
        self.block_rows = block_rows;
        self
    }

    pub fn with_vec_lanes(mut self, vec_lanes: usize) -> Self {
        self.vec_lanes = vec_lanes;
        self
    }

    pub fn with_preload_depth(mut self, preload_depth: usize) -> Self {
        self.preload_depth = preload_depth;
        self
    }

    pub fn with_fifo_depth(mut self, fifo_depth: usize) -> Self {
        self.fifo_depth = fifo_depth;
        self
    }

    pub fn with_sync_period(mut self, sync_period: usize) -> Self {
        self.sync_period = sync_period;
        self
    }

    pub fn with_causal_mask(mut self, causal_mask: bool) -> Self {
        self.causal_mask = causal_mask;
        self
    }

    pub fn with_intermediate_checkpoints(mut self, enabled: bool) -> Self {
        self.intermediate_checkpoints = enabled;
        self
    }

    pub fn with_parallel_blocks(mut self, parallel: bool) -> Self {
        self.parallel_blocks = parallel;
        self
    }

    pub fn with_scale(mut self, scale: f32) -> Self {
        self.scale = Some(scale);
        self
    }

    pub fn from_json_str(json: &str) -> TileResult<Self> {
        let config: PipelineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> TileResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn num_tiles(&self) -> usize {
        self.s1 / self.tile_width.max(1)
    }

    /// Matmul sub-tiles per tile
    pub fn k_tile_factor(&self) -> usize {
        self.tile_width / self.matmul_block_size.max(1)
    }

    pub fn num_blocks(&self) -> usize {
        self.s0 / self.block_rows.max(1)
    }

    pub fn scale(&self) -> f32 {
        self.scale
            .unwrap_or_else(|| 1.0 / (self.head_size as f32).sqrt())
    }

    /// FIFO region layout for `p_dtype` probability storage
    pub fn layout(&self, p_dtype: DType) -> FifoLayout {
        FifoLayout::new(FifoGeometry {
            block_rows: self.block_rows,
            head_size: self.head_size,
            tile_width: self.tile_width,
            matmul_block_size: self.matmul_block_size,
            fifo_depth: self.fifo_depth,
            num_tiles: self.num_tiles(),
            p_dtype,
            checkpoints: self.intermediate_checkpoints,
        })
    }

    /// Reject every configuration the pipeline cannot run
    pub fn validate(&self) -> TileResult<()> {
        for (name, value) in [
            ("s0", self.s0),
            ("head_size", self.head_size),
            ("s1", self.s1),
            ("tile_width", self.tile_width),
            ("matmul_block_size", self.matmul_block_size),
            ("block_rows", self.block_rows),
            ("vec_lanes", self.vec_lanes),
            ("preload_depth", self.preload_depth),
            ("fifo_depth", self.fifo_depth),
            ("sync_period", self.sync_period),
        ] {
            if value == 0 {
                return Err(config_error!("{} must be >= 1", name));
            }
        }

        for (what, divisor, dividend) in [
            ("tile_width must divide s1", self.tile_width, self.s1),
            (
                "matmul_block_size must divide tile_width",
                self.matmul_block_size,
                self.tile_width,
            ),
            ("block_rows must divide s0", self.block_rows, self.s0),
            ("vec_lanes must divide block_rows", self.vec_lanes, self.block_rows),
            ("sync_period must divide fifo_depth", self.sync_period, self.fifo_depth),
        ] {
            if dividend % divisor != 0 {
                return Err(config_error!("{} ({} vs {})", what, divisor, dividend));
            }
        }

        if self.fifo_depth < self.preload_depth {
            return Err(config_error!(
                "fifo_depth {} cannot hold {} preloaded tiles",
                self.fifo_depth,
                self.preload_depth
            ));
        }
        if self.preload_depth <= 1 && self.k_tile_factor() > 1 {
            return Err(config_error!(
                "sub-tiled matmul (k_tile_factor {}) requires preload_depth > 1",
                self.k_tile_factor()
            ));
        }
        if self.causal_mask && self.s0 > self.s1 {
            return Err(config_error!(
                "causal mask needs s0 <= s1, got s0 {} and s1 {}",
                self.s0,
                self.s1
            ));
        }
        if let Some(scale) = self.scale {
            if !scale.is_finite() || scale <= 0.0 {
                return Err(config_error!("scale must be finite and positive, got {}", scale));
            }
        }
        Ok(())
    }
}
