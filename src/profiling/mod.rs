//! Profiling helpers
//!
//! CPU wall-clock timing for pipeline blocks. The runner wraps every block
//! in a [`StageTimer`] and reports the readings in
//! [`crate::pipeline::PipelineStats`].

pub mod stage_timer;

pub use stage_timer::{ScopedTimer, StageTimer};
