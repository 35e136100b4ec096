//! tileforge - tiled streaming flash attention
//!
//! Computes `softmax(scale * Q K^T) V` one key tile at a time on a
//! two-engine pipeline. A matrix engine produces `Q K^T` and `P V` tiles, a
//! vector engine runs the streaming softmax and folds the running output.
//! The engines talk only through three ring FIFOs guarded by
//! `allocate`/`record`/`wait`/`free` signals, with batched consumption
//! signalling and a teardown drain that leaves every signal balanced.

#![allow(clippy::too_many_arguments)] // Engine constructors take the full block geometry
#![allow(clippy::needless_range_loop)] // Index loops read closer to the tile math
#![allow(clippy::type_complexity)] // Engine results carry several reports

pub mod attention;
pub mod error;
pub mod fifo;
pub mod kernels;
pub mod logging;
pub mod pipeline;
pub mod profiling;
pub mod scheduler;
pub mod sync;
pub mod tensor;

pub use attention::{RunningUpdate, StreamingSoftmax};
pub use error::{ErrorCategory, TileForgeError, TileResult};
pub use kernels::{CpuKernels, TileKernels};
pub use logging::{init_logging_default, init_with_config, LoggingConfig};
pub use pipeline::{AttentionOutput, FlashAttention, PipelineConfig, PipelineStats};
pub use profiling::{ScopedTimer, StageTimer};
pub use scheduler::{LockstepSimulator, TileScheduler};
pub use sync::{SyncSchedule, TileChannel};
pub use tensor::{DType, Element, Tile};

#[cfg(test)]
mod library_tests {
    use super::*;

    #[test]
    fn test_default_pipeline_runs() {
        let config = PipelineConfig::default().with_shape(64, 256, 16);
        let attention = FlashAttention::<f32>::new(config).unwrap();
        let q = Tile::filled(64, 16, 0.25f32);
        let kv = Tile::filled(256, 16, 1.0f32);
        let out = attention.run(&q, &kv, &kv).unwrap();
        // uniform keys give uniform weights, so every output equals v
        assert!(out.output.as_slice().iter().all(|&x| (x - 1.0).abs() < 1e-5));
    }
}
