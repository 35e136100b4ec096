//! Intermediate per-tile dumps
//!
//! With `intermediate_checkpoints` enabled the vector engine snapshots,
//! for every tile of every block, the values it read and produced. The
//! snapshots serialize to JSON for offline comparison. Masked scores are
//! `-inf`, so every float field goes through [`crate::tensor::json_f32`].

use crate::error::TileResult;
use crate::internal_error;
use crate::tensor::Tile;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;

/// Everything observed for one tile of one block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileCheckpoint {
    pub tile: usize,
    /// Raw scores read from the QK FIFO
    #[serde(with = "crate::tensor::json_f32::tile")]
    pub qk: Tile<f32>,
    /// Probabilities as written to the P FIFO, widened back to f32
    #[serde(with = "crate::tensor::json_f32::tile")]
    pub p: Tile<f32>,
    /// Probabilities before rounding to storage precision
    #[serde(with = "crate::tensor::json_f32::tile")]
    pub p_f32: Tile<f32>,
    #[serde(with = "crate::tensor::json_f32::values")]
    pub rescale: Vec<f32>,
    #[serde(with = "crate::tensor::json_f32::values")]
    pub running_max: Vec<f32>,
    #[serde(with = "crate::tensor::json_f32::values")]
    pub running_sum: Vec<f32>,
    /// Partial read from the PV FIFO
    #[serde(with = "crate::tensor::json_f32::tile")]
    pub pv: Tile<f32>,
    /// Accumulator after folding this tile
    #[serde(with = "crate::tensor::json_f32::tile")]
    pub output: Tile<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockCheckpoints {
    pub block: usize,
    pub tiles: Vec<TileCheckpoint>,
}

impl BlockCheckpoints {
    pub(crate) fn new(block: usize, num_tiles: usize) -> Self {
        BlockCheckpoints {
            block,
            tiles: Vec::with_capacity(num_tiles),
        }
    }

    /// Softmax half of tile `t`'s snapshot
    pub(crate) fn record_softmax(
        &mut self,
        tile: usize,
        qk: Tile<f32>,
        p: Tile<f32>,
        p_f32: Tile<f32>,
        stats: [Vec<f32>; 3],
    ) -> TileResult<()> {
        if tile != self.tiles.len() {
            return Err(internal_error!(
                "checkpoint for tile {} recorded after {} tiles",
                tile,
                self.tiles.len()
            ));
        }
        let [rescale, running_max, running_sum] = stats;
        let (rows, _) = qk.shape();
        self.tiles.push(TileCheckpoint {
            tile,
            qk,
            p,
            p_f32,
            rescale,
            running_max,
            running_sum,
            pv: Tile::zeros(rows, 0),
            output: Tile::zeros(rows, 0),
        });
        Ok(())
    }

    /// Update half of tile `t`'s snapshot
    pub(crate) fn record_update(
        &mut self,
        tile: usize,
        pv: Tile<f32>,
        output: Tile<f32>,
    ) -> TileResult<()> {
        let entry = self
            .tiles
            .get_mut(tile)
            .ok_or_else(|| internal_error!("update checkpoint for tile {} before softmax", tile))?;
        entry.pv = pv;
        entry.output = output;
        Ok(())
    }
}

/// Snapshots of a whole run, one entry per block in block order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Checkpoints {
    pub blocks: Vec<BlockCheckpoints>,
}

impl Checkpoints {
    pub fn block(&self, block: usize) -> Option<&BlockCheckpoints> {
        self.blocks.iter().find(|b| b.block == block)
    }

    pub fn tile(&self, block: usize, tile: usize) -> Option<&TileCheckpoint> {
        self.block(block).and_then(|b| b.tiles.get(tile))
    }

    pub fn save_json(&self, path: impl AsRef<Path>) -> TileResult<()> {
        let file = std::fs::File::create(path)?;
        let mut writer = std::io::BufWriter::new(file);
        serde_json::to_writer(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }

    pub fn load_json(path: impl AsRef<Path>) -> TileResult<Self> {
        let file = std::fs::File::open(path)?;
        Ok(serde_json::from_reader(std::io::BufReader::new(file))?)
    }
}
