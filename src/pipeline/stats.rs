//! Run statistics

use super::engines::EngineReport;
use serde::Serialize;

/// Counters for one `FlashAttention::run`
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineStats {
    pub blocks: usize,
    pub tiles_per_block: usize,
    pub qk_sub_matmuls: usize,
    pub pv_sub_matmuls: usize,
    /// `allocate` calls that had to take a free token
    pub sync_waits: usize,
    /// `free` calls that signalled a free token
    pub sync_signals: usize,
    pub drained_tokens: usize,
    /// Tiles skipped as entirely above the causal diagonal, summed over lanes
    pub masked_tiles: usize,
    /// Deepest occupancy seen per FIFO (qk, p, pv)
    pub fifo_high_water: [usize; 3],
    pub block_ms: Vec<f32>,
}

impl PipelineStats {
    pub(crate) fn absorb(&mut self, report: &EngineReport) {
        self.qk_sub_matmuls += report.qk_sub_matmuls;
        self.pv_sub_matmuls += report.pv_sub_matmuls;
        self.sync_waits += report.sync_waits;
        self.sync_signals += report.sync_signals;
        self.drained_tokens += report.drained;
        self.masked_tiles += report.masked_tiles;
    }

    pub fn total_ms(&self) -> f32 {
        self.block_ms.iter().sum()
    }
}
