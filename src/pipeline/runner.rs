//! Multi-block flash attention runner

use super::checkpoints::{BlockCheckpoints, Checkpoints};
use super::config::PipelineConfig;
use super::engines::{BlockInputs, EngineReport, MatEngine, VecEngine};
use super::stats::PipelineStats;
use super::workspace::{root_cause, AbortGuard, BlockWorkspace, WorkspacePool};
use crate::error::{shape_mismatch, TileResult};
use crate::fifo::FifoLayout;
use crate::internal_error;
use crate::kernels::{CpuKernels, TileKernels};
use crate::profiling::StageTimer;
use crate::scheduler::{verify_programs, CausalBlock, EnginePrograms, TileScheduler};
use crate::sync::SyncSchedule;
use crate::tensor::{Element, Tile};
use rayon::prelude::*;
use tracing::{debug, info, warn};

/// Result of one attention run
#[derive(Debug, Clone)]
pub struct AttentionOutput {
    /// `s0 x head_size`
    pub output: Tile<f32>,
    pub stats: PipelineStats,
    /// Present when `intermediate_checkpoints` is enabled
    pub checkpoints: Option<Checkpoints>,
}

struct BlockResult {
    block: usize,
    output: Tile<f32>,
    mat: EngineReport,
    vec: EngineReport,
    high_water: [usize; 3],
    elapsed_ms: f32,
    checkpoints: Option<BlockCheckpoints>,
}

/// Tiled streaming attention over `block_rows`-row query blocks.
///
/// Configuration errors surface from [`FlashAttention::new`]; a value that
/// constructs successfully has had every block's programs replayed by the
/// [`LockstepSimulator`](crate::scheduler::LockstepSimulator).
///
/// ```rust
/// use tileforge::pipeline::{FlashAttention, PipelineConfig};
/// use tileforge::tensor::Tile;
///
/// let config = PipelineConfig::new().with_shape(64, 256, 16);
/// let attention = FlashAttention::<f32>::new(config).unwrap();
/// let q = Tile::filled(64, 16, 0.1f32);
/// let kv = Tile::filled(256, 16, 0.2f32);
/// let out = attention.run(&q, &kv, &kv).unwrap();
/// assert_eq!(out.output.shape(), (64, 16));
/// ```
pub struct FlashAttention<T: Element, K: TileKernels = CpuKernels> {
    config: PipelineConfig,
    kernels: K,
    layout: FifoLayout,
    programs: Vec<EnginePrograms>,
    pool: WorkspacePool<T>,
}

impl<T: Element> FlashAttention<T, CpuKernels> {
    pub fn new(config: PipelineConfig) -> TileResult<Self> {
        Self::with_kernels(config, CpuKernels)
    }
}

impl<T: Element, K: TileKernels> FlashAttention<T, K> {
    pub fn with_kernels(config: PipelineConfig, kernels: K) -> TileResult<Self> {
        config.validate()?;

        let schedule = SyncSchedule::new(config.fifo_depth, config.sync_period)?;
        let scheduler = TileScheduler::new(
            config.sync_period,
            config.k_tile_factor(),
            config.tile_width,
        );
        let programs = (0..config.num_blocks())
            .map(|block| {
                let causal = config.causal_mask.then(|| CausalBlock {
                    last_row: (block + 1) * config.block_rows - 1,
                });
                let programs = scheduler.run(
                    config.num_tiles(),
                    config.preload_depth,
                    config.fifo_depth,
                    causal,
                )?;
                verify_programs(&programs)?;
                Ok(programs)
            })
            .collect::<TileResult<Vec<_>>>()?;

        let dtype = T::DTYPE;
        let layout = config.layout(dtype);
        let prealloc = if config.parallel_blocks {
            config.num_blocks().min(rayon::current_num_threads())
        } else {
            1
        };

        info!(
            s0 = config.s0,
            s1 = config.s1,
            head_size = config.head_size,
            blocks = config.num_blocks(),
            tiles = config.num_tiles(),
            preload = config.preload_depth,
            fifo_depth = config.fifo_depth,
            sync_period = config.sync_period,
            dtype = %dtype,
            region_bytes = layout.block_stride(),
            "flash attention pipeline configured"
        );

        Ok(FlashAttention {
            pool: WorkspacePool::new(layout, schedule, prealloc),
            config,
            kernels,
            layout,
            programs,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn layout(&self) -> &FifoLayout {
        &self.layout
    }

    /// Engine programs of query block `block`
    pub fn programs(&self, block: usize) -> Option<&EnginePrograms> {
        self.programs.get(block)
    }

    /// `softmax(scale * Q K^T) V` for `q: s0 x head_size` and
    /// `k, v: s1 x head_size`
    pub fn run(&self, q: &Tile<T>, k: &Tile<T>, v: &Tile<T>) -> TileResult<AttentionOutput> {
        let config = &self.config;
        for (name, tile, rows) in [("q", q, config.s0), ("k", k, config.s1), ("v", v, config.s1)] {
            if tile.shape() != (rows, config.head_size) {
                return Err(shape_mismatch(
                    "FlashAttention::run",
                    format!("{} of {}x{}", name, rows, config.head_size),
                    format!("{}x{}", tile.rows(), tile.cols()),
                ));
            }
        }

        let blocks = 0..config.num_blocks();
        let results: Vec<BlockResult> = if config.parallel_blocks {
            blocks
                .into_par_iter()
                .map(|block| self.run_block(block, q, k, v))
                .collect::<TileResult<_>>()?
        } else {
            blocks
                .map(|block| self.run_block(block, q, k, v))
                .collect::<TileResult<_>>()?
        };

        let mut output = Tile::zeros(config.s0, config.head_size);
        let mut stats = PipelineStats {
            blocks: results.len(),
            tiles_per_block: config.num_tiles(),
            ..PipelineStats::default()
        };
        let mut checkpoints = config.intermediate_checkpoints.then(Checkpoints::default);

        for result in results {
            output.write_block(result.block * config.block_rows, 0, &result.output)?;
            stats.absorb(&result.mat);
            stats.absorb(&result.vec);
            for (high, seen) in stats.fifo_high_water.iter_mut().zip(result.high_water) {
                *high = (*high).max(seen);
            }
            stats.block_ms.push(result.elapsed_ms);
            if let (Some(all), Some(block)) = (checkpoints.as_mut(), result.checkpoints) {
                all.blocks.push(block);
            }
        }

        info!(
            blocks = stats.blocks,
            sync_waits = stats.sync_waits,
            drained = stats.drained_tokens,
            masked_tiles = stats.masked_tiles,
            total_ms = stats.total_ms(),
            "flash attention run complete"
        );

        Ok(AttentionOutput {
            output,
            stats,
            checkpoints,
        })
    }

    fn run_block(&self, block: usize, q: &Tile<T>, k: &Tile<T>, v: &Tile<T>) -> TileResult<BlockResult> {
        let programs = self
            .programs
            .get(block)
            .ok_or_else(|| internal_error!("no programs for block {}", block))?;
        let rows = self.config.block_rows;
        let q_block = q.row_block(block * rows, (block + 1) * rows)?;
        let workspace = self.pool.checkout()?;

        let mut timer = StageTimer::for_stage(format!("block {}", block));
        timer.start();
        let outcome = self.run_engines(block, &q_block, k, v, &workspace, programs);
        timer.stop();

        let (output, mat, vec, checkpoints) = match outcome {
            Ok(done) => done,
            Err(err) => {
                debug!(block, error = %err, "block aborted");
                workspace.reset();
                self.pool.restore(workspace)?;
                return Err(err);
            }
        };

        if let Err(err) = workspace.verify_quiescent() {
            warn!(block, error = %err, "workspace not quiescent after teardown drain");
            workspace.reset();
            self.pool.restore(workspace)?;
            return Err(err);
        }

        let high_water = workspace.high_water_marks();
        self.pool.restore(workspace)?;
        let elapsed_ms = timer.elapsed_ms().unwrap_or(0.0);
        debug!(
            block,
            elapsed_ms,
            qk_waits = mat.sync_waits,
            p_waits = vec.sync_waits,
            drained = mat.drained + vec.drained,
            "block complete"
        );

        Ok(BlockResult {
            block,
            output,
            mat,
            vec,
            high_water,
            elapsed_ms,
            checkpoints,
        })
    }

    /// Both engines of one block on their own threads
    fn run_engines(
        &self,
        block: usize,
        q_block: &Tile<T>,
        k: &Tile<T>,
        v: &Tile<T>,
        workspace: &BlockWorkspace<T>,
        programs: &EnginePrograms,
    ) -> TileResult<(Tile<f32>, EngineReport, EngineReport, Option<BlockCheckpoints>)> {
        let config = &self.config;
        let row_offset = block * config.block_rows;
        let inputs = BlockInputs {
            q: q_block,
            k,
            v,
            row_offset,
        };
        let checkpoints = config
            .intermediate_checkpoints
            .then(|| BlockCheckpoints::new(block, config.num_tiles()));
        let vec_engine = VecEngine::new(
            &self.kernels,
            &self.layout,
            workspace,
            config.vec_lanes,
            config.num_tiles(),
            row_offset,
            config.scale(),
            config.causal_mask,
            checkpoints,
        )?;
        let mat_engine = MatEngine::new(&self.kernels, &self.layout, workspace, inputs);

        let (mat, vec) = std::thread::scope(|scope| {
            let mat = std::thread::Builder::new()
                .name(format!("mat-{}", block))
                .spawn_scoped(scope, || {
                    AbortGuard::new(workspace).finish(mat_engine.run(&programs.mat))
                });
            let vec = std::thread::Builder::new()
                .name(format!("vec-{}", block))
                .spawn_scoped(scope, || {
                    AbortGuard::new(workspace).finish(vec_engine.run(&programs.vec))
                });
            if mat.is_err() || vec.is_err() {
                workspace.close();
            }
            (join_engine(mat), join_engine(vec))
        });

        match (mat, vec) {
            (Ok(mat), Ok((output, vec, checkpoints))) => Ok((output, mat, vec, checkpoints)),
            (Err(err), Ok(_)) | (Ok(_), Err(err)) => Err(err),
            (Err(mat_err), Err(vec_err)) => Err(root_cause(mat_err, vec_err)),
        }
    }
}

fn join_engine<R>(
    handle: std::io::Result<std::thread::ScopedJoinHandle<'_, TileResult<R>>>,
) -> TileResult<R> {
    handle?
        .join()
        .map_err(|_| internal_error!("engine thread panicked"))?
}
