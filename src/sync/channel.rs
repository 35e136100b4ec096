//! Named producer/consumer channel over one FIFO

use super::flag::{FlagCounters, SyncFlag};
use super::schedule::SyncSchedule;
use crate::error::{TileForgeError, TileResult};
use crate::fifo::FifoKind;
use serde::Serialize;

/// Signal counts for both directions of a channel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChannelCounters {
    pub ready: FlagCounters,
    pub consumed: FlagCounters,
}

/// The `allocate`/`record`/`wait`/`free` protocol for one FIFO.
///
/// Two flags back it. `ready` carries one token per produced tile from
/// `record` to `wait`. `consumed` carries batched free tokens from `free`
/// to `allocate`, following the channel's [`SyncSchedule`].
#[derive(Debug)]
pub struct TileChannel {
    kind: FifoKind,
    schedule: SyncSchedule,
    ready: SyncFlag,
    consumed: SyncFlag,
}

impl TileChannel {
    pub fn new(kind: FifoKind, schedule: SyncSchedule) -> Self {
        TileChannel {
            kind,
            schedule,
            ready: SyncFlag::new(kind.ready_flag()),
            consumed: SyncFlag::new(kind.consumed_flag()),
        }
    }

    pub fn kind(&self) -> FifoKind {
        self.kind
    }

    pub fn schedule(&self) -> &SyncSchedule {
        &self.schedule
    }

    /// Producer side, before writing tile `t`. Returns whether it had to wait
    /// for a free token.
    pub fn allocate(&self, t: usize) -> TileResult<bool> {
        if !self.schedule.should_wait_consumption(t) {
            return Ok(false);
        }
        tracing::trace!(flag = self.consumed.name(), tile = t, "allocate: waiting for free slot");
        self.consumed.acquire()?;
        Ok(true)
    }

    /// Producer side, after the last sub-write of tile `t`
    pub fn record(&self, t: usize) -> TileResult<()> {
        tracing::trace!(flag = self.ready.name(), tile = t, "record");
        self.ready.signal()
    }

    /// Consumer side, before reading tile `t`
    pub fn wait(&self, t: usize) -> TileResult<()> {
        tracing::trace!(flag = self.ready.name(), tile = t, "wait");
        self.ready.acquire()
    }

    /// Consumer side, after fully draining tile `t`. Returns whether a free
    /// token was signalled.
    pub fn free(&self, t: usize) -> TileResult<bool> {
        if !self.schedule.should_notify_consumption(t) {
            return Ok(false);
        }
        tracing::trace!(flag = self.consumed.name(), tile = t, "free");
        self.consumed.signal()?;
        Ok(true)
    }

    /// Producer side, at teardown: take the free tokens that no `allocate`
    /// consumed during a run of `tiles` tiles.
    pub fn drain(&self, tiles: usize) -> TileResult<usize> {
        let pending = self.schedule.pending_consumption_events(tiles);
        for _ in 0..pending {
            self.consumed.acquire()?;
        }
        tracing::trace!(flag = self.consumed.name(), drained = pending, "drain");
        Ok(pending)
    }

    /// Abort: wake anything blocked on this channel
    pub fn close(&self) {
        self.ready.close();
        self.consumed.close();
    }

    pub fn reset(&self) {
        self.ready.reset();
        self.consumed.reset();
    }

    /// Fails if either flag still holds tokens
    pub fn verify_quiescent(&self) -> TileResult<()> {
        for flag in [&self.ready, &self.consumed] {
            let outstanding = flag.outstanding()?;
            if outstanding != 0 {
                return Err(TileForgeError::SignalLeak {
                    channel: flag.name(),
                    outstanding,
                });
            }
        }
        Ok(())
    }

    pub fn counters(&self) -> TileResult<ChannelCounters> {
        Ok(ChannelCounters {
            ready: self.ready.counters()?,
            consumed: self.consumed.counters()?,
        })
    }
}
