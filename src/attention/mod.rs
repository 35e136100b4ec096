//! Attention numerics
//!
//! - [`softmax`] - streaming softmax state machine
//! - [`update`] - running output accumulator
//! - [`reference`] - dense attention for validation
//! - [`compare`] - tolerance checks

pub mod compare;
pub mod reference;
pub mod softmax;
pub mod update;

pub use compare::{compare_slices, compare_tiles, CompareReport, Tolerance};
pub use reference::{dense_attention, dense_row_stats, dense_scores, DenseRowStats};
pub use softmax::{SoftmaxState, SoftmaxStep, StreamingSoftmax, TileMask};
pub use update::{RunningUpdate, UpdateState};
