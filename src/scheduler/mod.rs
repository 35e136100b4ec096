//! Static two-engine scheduling
//!
//! The pipeline is fully unrolled ahead of time: [`TileScheduler`] turns the
//! pipeline knobs into one instruction list per engine. The same programs
//! drive the threaded engines, the [`LockstepSimulator`] that proves a
//! configuration cannot deadlock, and the [`timeline`] planner.

pub mod lockstep;
pub mod program;
pub mod timeline;
pub mod types;

pub use lockstep::{verify_programs, LockstepSimulator, SchedulePolicy, SimOutcome};
pub use program::{CausalBlock, EngineProgram, EnginePrograms, TileScheduler};
pub use timeline::{plan, PlannedTask, StageCosts, Timeline};
pub use types::{EngineKind, Stage, Step};
