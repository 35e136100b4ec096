//! Batched consumption signalling
//!
//! The consumer frees slots once every `sync_period` tiles and the producer
//! waits once every `sync_period` tiles after the FIFO first fills. Each
//! free token therefore stands for `sync_period` slots. Tokens freed near the
//! end of a run have no matching wait and must be drained at teardown.

use crate::config_error;
use crate::error::TileResult;
use serde::Serialize;

/// Sync batching parameters for one FIFO
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncSchedule {
    fifo_depth: usize,
    sync_period: usize,
}

impl SyncSchedule {
    /// Both values must be at least 1 and `sync_period` must divide
    /// `fifo_depth`. Otherwise a producer can run a partial period past the
    /// last freed slot and overwrite a tile that is still being read.
    pub fn new(fifo_depth: usize, sync_period: usize) -> TileResult<Self> {
        if fifo_depth == 0 {
            return Err(config_error!("fifo_depth must be >= 1"));
        }
        if sync_period == 0 {
            return Err(config_error!("sync_period must be >= 1"));
        }
        if fifo_depth % sync_period != 0 {
            return Err(config_error!(
                "sync_period {} must divide fifo_depth {}",
                sync_period,
                fifo_depth
            ));
        }
        Ok(SyncSchedule {
            fifo_depth,
            sync_period,
        })
    }

    /// Skips the divisibility check. Only for exercising the protocol with
    /// schedules that are known to corrupt slots.
    #[cfg(test)]
    pub(crate) fn new_unchecked(fifo_depth: usize, sync_period: usize) -> Self {
        SyncSchedule {
            fifo_depth,
            sync_period,
        }
    }

    /// One signal per tile
    pub fn unbatched(fifo_depth: usize) -> TileResult<Self> {
        Self::new(fifo_depth, 1)
    }

    pub fn fifo_depth(&self) -> usize {
        self.fifo_depth
    }

    pub fn sync_period(&self) -> usize {
        self.sync_period
    }

    /// Does the producer wait for a free token before writing tile `t`?
    #[inline]
    pub fn should_wait_consumption(&self, t: usize) -> bool {
        t >= self.fifo_depth && t % self.sync_period == 0
    }

    /// Does the consumer signal a free token after reading tile `t`?
    #[inline]
    pub fn should_notify_consumption(&self, t: usize) -> bool {
        (t + 1) % self.sync_period == 0
    }

    /// Free tokens signalled over `tiles` tiles
    pub fn notify_count(&self, tiles: usize) -> usize {
        tiles / self.sync_period
    }

    /// Free tokens waited on over `tiles` tiles
    pub fn wait_count(&self, tiles: usize) -> usize {
        if tiles <= self.fifo_depth {
            return 0;
        }
        ((tiles - 1) / self.sync_period).saturating_sub((self.fifo_depth - 1) / self.sync_period)
    }

    /// Free tokens left unconsumed after `tiles` tiles. Never more than the
    /// number of periods in the FIFO.
    pub fn pending_consumption_events(&self, tiles: usize) -> usize {
        let cap = (self.fifo_depth + self.sync_period - 1) / self.sync_period;
        self.notify_count(tiles)
            .saturating_sub(self.wait_count(tiles))
            .min(cap)
    }
}
