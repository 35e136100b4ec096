//! Per-block FIFO regions and their channels

use crate::error::{TileForgeError, TileResult};
use crate::fifo::{FifoKind, FifoLayout, TileFifo};
use crate::internal_error;
use crate::sync::{SyncSchedule, TileChannel};
use crate::tensor::Element;
use std::sync::Mutex;

/// The three FIFOs of one query block plus their channels.
///
/// A workspace is reused across blocks and runs, so it has to end every
/// block empty and with no outstanding signals.
#[derive(Debug)]
pub struct BlockWorkspace<T> {
    pub qk: TileFifo<f32>,
    pub p: TileFifo<T>,
    pub pv: TileFifo<f32>,
    channels: [TileChannel; 3],
}

impl<T: Element> BlockWorkspace<T> {
    pub fn new(layout: &FifoLayout, schedule: SyncSchedule) -> Self {
        let depth = layout.fifo_depth();
        let fifo = |kind: FifoKind| {
            let (rows, cols) = layout.slot_shape(kind);
            (depth, rows, cols)
        };
        let (d, r, c) = fifo(FifoKind::Qk);
        let qk = TileFifo::new(FifoKind::Qk, d, r, c);
        let (d, r, c) = fifo(FifoKind::P);
        let p = TileFifo::new(FifoKind::P, d, r, c);
        let (d, r, c) = fifo(FifoKind::Pv);
        let pv = TileFifo::new(FifoKind::Pv, d, r, c);

        BlockWorkspace {
            qk,
            p,
            pv,
            channels: FifoKind::ALL.map(|kind| TileChannel::new(kind, schedule)),
        }
    }

    pub fn channel(&self, kind: FifoKind) -> &TileChannel {
        &self.channels[kind.index()]
    }

    /// Wake both engines with an abort
    pub fn close(&self) {
        for channel in &self.channels {
            channel.close();
        }
    }

    /// Recover after an aborted block
    pub fn reset(&self) {
        for channel in &self.channels {
            channel.reset();
        }
        self.qk.reset();
        self.p.reset();
        self.pv.reset();
    }

    fn occupancy(&self, kind: FifoKind) -> usize {
        match kind {
            FifoKind::Qk => self.qk.occupancy(),
            FifoKind::P => self.p.occupancy(),
            FifoKind::Pv => self.pv.occupancy(),
        }
    }

    /// Every channel drained and every slot empty
    pub fn verify_quiescent(&self) -> TileResult<()> {
        for kind in FifoKind::ALL {
            self.channel(kind).verify_quiescent()?;
            let live = self.occupancy(kind);
            if live != 0 {
                return Err(internal_error!("fifo '{}' still holds {} tile(s)", kind, live));
            }
        }
        Ok(())
    }

    pub fn high_water_marks(&self) -> [usize; 3] {
        [
            self.qk.high_water_mark(),
            self.p.high_water_mark(),
            self.pv.high_water_mark(),
        ]
    }
}

/// Idle workspaces, checked out by whichever block runs next.
///
/// A block never shares its workspace; when every idle one is taken a new
/// workspace is allocated and kept for later runs.
#[derive(Debug)]
pub struct WorkspacePool<T> {
    layout: FifoLayout,
    schedule: SyncSchedule,
    idle: Mutex<Vec<BlockWorkspace<T>>>,
}

impl<T: Element> WorkspacePool<T> {
    pub fn new(layout: FifoLayout, schedule: SyncSchedule, prealloc: usize) -> Self {
        let idle = (0..prealloc)
            .map(|_| BlockWorkspace::new(&layout, schedule))
            .collect();
        WorkspacePool {
            layout,
            schedule,
            idle: Mutex::new(idle),
        }
    }

    pub fn checkout(&self) -> TileResult<BlockWorkspace<T>> {
        let reused = self.idle.lock()?.pop();
        Ok(reused.unwrap_or_else(|| BlockWorkspace::new(&self.layout, self.schedule)))
    }

    /// Return a workspace. It must be quiescent.
    pub fn restore(&self, workspace: BlockWorkspace<T>) -> TileResult<()> {
        self.idle.lock()?.push(workspace);
        Ok(())
    }

    #[cfg(test)]
    fn idle_count(&self) -> TileResult<usize> {
        Ok(self.idle.lock()?.len())
    }
}

/// Closes every channel of a workspace if dropped while armed, so a failing
/// or panicking engine releases its peer.
pub(crate) struct AbortGuard<'a, T: Element> {
    workspace: &'a BlockWorkspace<T>,
    armed: bool,
}

impl<'a, T: Element> AbortGuard<'a, T> {
    pub(crate) fn new(workspace: &'a BlockWorkspace<T>) -> Self {
        AbortGuard {
            workspace,
            armed: true,
        }
    }

    /// Pass `result` through, closing the workspace on error
    pub(crate) fn finish<R>(mut self, result: TileResult<R>) -> TileResult<R> {
        if result.is_ok() {
            self.armed = false;
        }
        result
    }
}

impl<T: Element> Drop for AbortGuard<'_, T> {
    fn drop(&mut self) {
        if self.armed {
            self.workspace.close();
        }
    }
}

/// Pick the error to report when both engines of a block fail
pub(crate) fn root_cause(first: TileForgeError, second: TileForgeError) -> TileForgeError {
    if first.is_secondary() && !second.is_secondary() {
        second
    } else {
        first
    }
}
