//! The two-engine attention pipeline
//!
//! - [`PipelineConfig`] - shapes, tuning knobs and their validation
//! - [`MatEngine`] / [`VecEngine`] - interpreters for the scheduled programs
//! - [`FlashAttention`] - runs every query block and assembles the output
//! - [`Checkpoints`] - optional per-tile snapshots
//! - [`PipelineStats`] - counters for a run

pub mod checkpoints;
pub mod config;
pub mod engines;
pub mod runner;
pub mod stats;
pub mod workspace;

pub use checkpoints::{BlockCheckpoints, Checkpoints, TileCheckpoint};
pub use config::PipelineConfig;
pub use engines::{BlockInputs, EngineReport, MatEngine, VecEngine};
pub use runner::{AttentionOutput, FlashAttention};
pub use stats::PipelineStats;
pub use workspace::{BlockWorkspace, WorkspacePool};
