//! Single-threaded interleaving of both engine programs
//!
//! Replays the two programs one step at a time under a chosen interleaving,
//! modelling the semaphores and the slot occupancy of every FIFO. Every
//! schedule the real engines can produce is one such interleaving.
//!
//! [`verify_programs`] only replays the three fixed policies: strict
//! alternation and each engine running as far ahead as it can. Passing
//! them rules out the extreme orderings, not every ordering; the property
//! tests in `tests/simulator_proptests.rs` cover random scripted
//! interleavings over random shapes.

use super::program::EnginePrograms;
use super::types::{EngineKind, Stage, Step};
use crate::error::{TileForgeError, TileResult};
use crate::fifo::FifoKind;
use crate::internal_error;
use crate::sync::SyncSchedule;
use serde::Serialize;

/// Which engine gets to move when both can
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulePolicy {
    /// Alternate engines
    RoundRobin,
    /// Run the matrix engine as far ahead as it can get
    MatFirst,
    /// Run the vector engine as far ahead as it can get
    VecFirst,
    /// `true` prefers the matrix engine; the script repeats
    Script(Vec<bool>),
}

impl SchedulePolicy {
    fn prefers_mat(&self, step: usize) -> bool {
        match self {
            SchedulePolicy::RoundRobin => step % 2 == 0,
            SchedulePolicy::MatFirst => true,
            SchedulePolicy::VecFirst => false,
            SchedulePolicy::Script(script) if script.is_empty() => step % 2 == 0,
            SchedulePolicy::Script(script) => script[step % script.len()],
        }
    }
}

/// What a completed simulation observed, indexed by [`FifoKind::index`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SimOutcome {
    pub steps: usize,
    pub mat_steps: usize,
    pub vec_steps: usize,
    pub max_occupancy: [usize; 3],
    pub drained: [usize; 3],
}

#[derive(Debug, Clone)]
struct SimFifo {
    slots: Vec<Option<usize>>,
    ready: usize,
    consumed: usize,
    occupancy: usize,
    max_occupancy: usize,
    drained: usize,
}

impl SimFifo {
    fn new(depth: usize) -> Self {
        SimFifo {
            slots: vec![None; depth],
            ready: 0,
            consumed: 0,
            occupancy: 0,
            max_occupancy: 0,
            drained: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Progress {
    /// Step finished; move to the next one
    Advance,
    /// Step made partial progress and must be revisited
    Stay,
}

/// Step-by-step model of one block's pipeline
#[derive(Debug, Clone)]
pub struct LockstepSimulator<'a> {
    programs: &'a EnginePrograms,
    schedule: SyncSchedule,
    fifos: [SimFifo; 3],
}

impl<'a> LockstepSimulator<'a> {
    pub fn new(programs: &'a EnginePrograms) -> Self {
        let schedule = programs.schedule;
        let depth = schedule.fifo_depth();
        LockstepSimulator {
            programs,
            schedule,
            fifos: [SimFifo::new(depth), SimFifo::new(depth), SimFifo::new(depth)],
        }
    }

    /// Run both programs to completion under `policy`.
    ///
    /// Fails with [`TileForgeError::Deadlock`] when neither engine can move,
    /// [`TileForgeError::FifoOverrun`] when a tile is written over a live
    /// one, and [`TileForgeError::SignalLeak`] when tokens are left behind.
    pub fn run(mut self, policy: &SchedulePolicy) -> TileResult<SimOutcome> {
        let programs = self.programs;
        let mat = programs.mat.steps();
        let vec = programs.vec.steps();
        let (mut mat_pc, mut vec_pc) = (0usize, 0usize);
        let (mut mat_steps, mut vec_steps) = (0usize, 0usize);
        let mut steps = 0usize;

        while mat_pc < mat.len() || vec_pc < vec.len() {
            let mat_ready = mat_pc < mat.len() && !self.is_blocked(&mat[mat_pc]);
            let vec_ready = vec_pc < vec.len() && !self.is_blocked(&vec[vec_pc]);

            let engine = match (mat_ready, vec_ready) {
                (false, false) => return Err(TileForgeError::Deadlock { mat_pc, vec_pc }),
                (true, false) => EngineKind::Mat,
                (false, true) => EngineKind::Vec,
                (true, true) if policy.prefers_mat(steps) => EngineKind::Mat,
                (true, true) => EngineKind::Vec,
            };

            let (step, pc, taken) = match engine {
                EngineKind::Mat => (&mat[mat_pc], &mut mat_pc, &mut mat_steps),
                EngineKind::Vec => (&vec[vec_pc], &mut vec_pc, &mut vec_steps),
            };
            if self.apply(step)? == Progress::Advance {
                *pc += 1;
            }
            *taken += 1;
            steps += 1;
        }

        self.verify_quiescent()?;
        Ok(SimOutcome {
            steps,
            mat_steps,
            vec_steps,
            max_occupancy: [0, 1, 2].map(|i| self.fifos[i].max_occupancy),
            drained: [0, 1, 2].map(|i| self.fifos[i].drained),
        })
    }

    fn fifo(&self, kind: FifoKind) -> &SimFifo {
        &self.fifos[kind.index()]
    }

    fn fifo_mut(&mut self, kind: FifoKind) -> &mut SimFifo {
        &mut self.fifos[kind.index()]
    }

    fn is_blocked(&self, step: &Step) -> bool {
        match *step {
            Step::Allocate { fifo, tile } => {
                self.schedule.should_wait_consumption(tile) && self.fifo(fifo).consumed == 0
            }
            Step::Wait { fifo, .. } => self.fifo(fifo).ready == 0,
            Step::Drain { fifo, tiles } => {
                let state = self.fifo(fifo);
                state.drained < self.schedule.pending_consumption_events(tiles)
                    && state.consumed == 0
            }
            Step::Record { .. } | Step::Free { .. } | Step::Compute { .. } => false,
        }
    }

    fn apply(&mut self, step: &Step) -> TileResult<Progress> {
        let schedule = self.schedule;
        match *step {
            Step::Allocate { fifo, tile } => {
                if schedule.should_wait_consumption(tile) {
                    self.fifo_mut(fifo).consumed -= 1;
                }
            }
            Step::Record { fifo, .. } => self.fifo_mut(fifo).ready += 1,
            Step::Wait { fifo, .. } => self.fifo_mut(fifo).ready -= 1,
            Step::Free { fifo, tile } => {
                if schedule.should_notify_consumption(tile) {
                    self.fifo_mut(fifo).consumed += 1;
                }
            }
            Step::Compute { stage, tile, .. } => self.compute(stage, tile)?,
            Step::Drain { fifo, tiles } => {
                let pending = schedule.pending_consumption_events(tiles);
                let state = self.fifo_mut(fifo);
                if state.drained < pending {
                    state.consumed -= 1;
                    state.drained += 1;
                }
                if state.drained < pending {
                    return Ok(Progress::Stay);
                }
            }
        }
        Ok(Progress::Advance)
    }

    fn compute(&mut self, stage: Stage, tile: usize) -> TileResult<()> {
        if let Some(input) = stage.input() {
            let state = self.fifo_mut(input);
            let slot = tile % state.slots.len();
            if state.slots[slot] != Some(tile) {
                return Err(internal_error!(
                    "{} of tile {} found slot {} of '{}' holding {:?}",
                    stage.name(),
                    tile,
                    slot,
                    input,
                    state.slots[slot]
                ));
            }
            state.slots[slot] = None;
            state.occupancy -= 1;
        }
        if let Some(output) = stage.output() {
            let state = self.fifo_mut(output);
            let slot = tile % state.slots.len();
            if let Some(live) = state.slots[slot] {
                return Err(TileForgeError::FifoOverrun {
                    fifo: output.name(),
                    slot,
                    live,
                    incoming: tile,
                });
            }
            state.slots[slot] = Some(tile);
            state.occupancy += 1;
            state.max_occupancy = state.max_occupancy.max(state.occupancy);
        }
        Ok(())
    }

    fn verify_quiescent(&self) -> TileResult<()> {
        for kind in FifoKind::ALL {
            let state = self.fifo(kind);
            if state.ready != 0 {
                return Err(TileForgeError::SignalLeak {
                    channel: kind.ready_flag(),
                    outstanding: state.ready,
                });
            }
            if state.consumed != 0 {
                return Err(TileForgeError::SignalLeak {
                    channel: kind.consumed_flag(),
                    outstanding: state.consumed,
                });
            }
            if state.occupancy != 0 {
                return Err(internal_error!(
                    "fifo '{}' still holds {} tile(s)",
                    kind,
                    state.occupancy
                ));
            }
        }
        Ok(())
    }
}

/// Check a pair of programs under the extreme interleavings
pub fn verify_programs(programs: &EnginePrograms) -> TileResult<()> {
    for policy in [
        SchedulePolicy::MatFirst,
        SchedulePolicy::VecFirst,
        SchedulePolicy::RoundRobin,
    ] {
        LockstepSimulator::new(programs).run(&policy)?;
    }
    Ok(())
}
