//! Slot ring with occupancy tracking

use super::FifoKind;
use crate::error::{TileForgeError, TileResult};
use crate::internal_error;
use crate::tensor::{Element, Tile};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Debug)]
struct FifoSlot<E> {
    tile: Tile<E>,
    /// Tile index currently held, `None` once drained
    holds: Option<usize>,
}

/// A ring of `depth` tile-shaped slots.
///
/// Every slot remembers which tile it holds. Writing into a slot that has
/// not been drained yet is reported as [`TileForgeError::FifoOverrun`]
/// rather than silently clobbering it; reading a slot that does not hold
/// the requested tile is an internal error.
#[derive(Debug)]
pub struct TileFifo<E> {
    kind: FifoKind,
    slots: Vec<Mutex<FifoSlot<E>>>,
    occupancy: AtomicUsize,
    high_water: AtomicUsize,
}

impl<E: Element> TileFifo<E> {
    pub fn new(kind: FifoKind, depth: usize, rows: usize, cols: usize) -> Self {
        let slots = (0..depth)
            .map(|_| {
                Mutex::new(FifoSlot {
                    tile: Tile::zeros(rows, cols),
                    holds: None,
                })
            })
            .collect();
        TileFifo {
            kind,
            slots,
            occupancy: AtomicUsize::new(0),
            high_water: AtomicUsize::new(0),
        }
    }

    pub fn kind(&self) -> FifoKind {
        self.kind
    }

    pub fn depth(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn slot_of(&self, tile: usize) -> usize {
        tile % self.slots.len()
    }

    /// Write tile `t` into its slot. `write` may fill the slot in several
    /// sub-writes; the slot counts as occupied once it returns.
    pub fn produce<F>(&self, t: usize, write: F) -> TileResult<()>
    where
        F: FnOnce(&mut Tile<E>) -> TileResult<()>,
    {
        let slot_index = self.slot_of(t);
        let mut slot = self.slots[slot_index].lock()?;
        if let Some(live) = slot.holds {
            return Err(TileForgeError::FifoOverrun {
                fifo: self.kind.name(),
                slot: slot_index,
                live,
                incoming: t,
            });
        }
        write(&mut slot.tile)?;
        slot.holds = Some(t);
        let now = self.occupancy.fetch_add(1, Ordering::AcqRel) + 1;
        self.high_water.fetch_max(now, Ordering::AcqRel);
        Ok(())
    }

    /// Read tile `t` from its slot and mark the slot drained
    pub fn consume<R, F>(&self, t: usize, read: F) -> TileResult<R>
    where
        F: FnOnce(&Tile<E>) -> TileResult<R>,
    {
        let slot_index = self.slot_of(t);
        let mut slot = self.slots[slot_index].lock()?;
        if slot.holds != Some(t) {
            return Err(internal_error!(
                "fifo '{}' slot {} holds {:?}, expected tile {}",
                self.kind,
                slot_index,
                slot.holds,
                t
            ));
        }
        let result = read(&slot.tile)?;
        slot.holds = None;
        self.occupancy.fetch_sub(1, Ordering::AcqRel);
        Ok(result)
    }

    /// Tiles produced but not yet consumed
    pub fn occupancy(&self) -> usize {
        self.occupancy.load(Ordering::Acquire)
    }

    pub fn high_water_mark(&self) -> usize {
        self.high_water.load(Ordering::Acquire)
    }

    /// Clear every slot after an aborted run
    pub fn reset(&self) {
        for slot in &self.slots {
            let mut slot = match slot.lock() {
                Ok(guard) => guard,
                Err(poisoned) => {
                    slot.clear_poison();
                    poisoned.into_inner()
                }
            };
            slot.holds = None;
        }
        self.occupancy.store(0, Ordering::Release);
    }
}
