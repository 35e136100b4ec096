//! The two engine interpreters
//!
//! Each engine walks its static program from [`TileScheduler`]. Protocol
//! steps go to the block's [`TileChannel`]s; compute steps read and write
//! the block's FIFO slots.
//!
//! [`TileScheduler`]: crate::scheduler::TileScheduler
//! [`TileChannel`]: crate::sync::TileChannel

use super::checkpoints::BlockCheckpoints;
use super::workspace::BlockWorkspace;
use crate::attention::{RunningUpdate, StreamingSoftmax, TileMask};
use crate::error::TileResult;
use crate::fifo::{FifoKind, FifoLayout, PingPong};
use crate::internal_error;
use crate::kernels::{AccMode, TileKernels};
use crate::scheduler::{EngineKind, EngineProgram, Stage, Step};
use crate::tensor::{Element, Tile};
use serde::Serialize;
use std::collections::VecDeque;

/// What one engine did over one block
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineReport {
    pub steps: usize,
    pub computes: usize,
    pub qk_sub_matmuls: usize,
    pub pv_sub_matmuls: usize,
    pub sync_waits: usize,
    pub sync_signals: usize,
    pub drained: usize,
    pub masked_tiles: usize,
}

/// Protocol steps, identical on both engines. Returns the compute step, if
/// that is what `step` was.
fn protocol_step<T: Element>(
    workspace: &BlockWorkspace<T>,
    step: &Step,
    report: &mut EngineReport,
) -> TileResult<Option<(Stage, usize, bool)>> {
    report.steps += 1;
    match *step {
        Step::Allocate { fifo, tile } => {
            if workspace.channel(fifo).allocate(tile)? {
                report.sync_waits += 1;
            }
        }
        Step::Record { fifo, tile } => workspace.channel(fifo).record(tile)?,
        Step::Wait { fifo, tile } => workspace.channel(fifo).wait(tile)?,
        Step::Free { fifo, tile } => {
            if workspace.channel(fifo).free(tile)? {
                report.sync_signals += 1;
            }
        }
        Step::Drain { fifo, tiles } => {
            report.drained += workspace.channel(fifo).drain(tiles)?;
        }
        Step::Compute { stage, tile, masked } => {
            report.computes += 1;
            return Ok(Some((stage, tile, masked)));
        }
    }
    Ok(None)
}

fn check_program(program: &EngineProgram, engine: EngineKind) -> TileResult<()> {
    if program.engine() != engine {
        return Err(internal_error!(
            "{} engine handed the {} program",
            engine.name(),
            program.engine().name()
        ));
    }
    Ok(())
}

/// Inputs of one query block
#[derive(Debug, Clone, Copy)]
pub struct BlockInputs<'a, T> {
    /// `block_rows x head_size` slice of Q
    pub q: &'a Tile<T>,
    pub k: &'a Tile<T>,
    pub v: &'a Tile<T>,
    /// Global index of the block's first query row
    pub row_offset: usize,
}

/// QK and PV producer
pub struct MatEngine<'a, T, K> {
    kernels: &'a K,
    layout: &'a FifoLayout,
    workspace: &'a BlockWorkspace<T>,
    inputs: BlockInputs<'a, T>,
    tile_width: usize,
    accumulator: PingPong<Tile<f32>>,
    report: EngineReport,
}

impl<'a, T: Element, K: TileKernels> MatEngine<'a, T, K> {
    pub fn new(
        kernels: &'a K,
        layout: &'a FifoLayout,
        workspace: &'a BlockWorkspace<T>,
        inputs: BlockInputs<'a, T>,
    ) -> Self {
        let (rows, head_size) = inputs.q.shape();
        let (_, tile_width) = layout.slot_shape(FifoKind::Qk);
        MatEngine {
            kernels,
            layout,
            workspace,
            inputs,
            tile_width,
            accumulator: PingPong::from_fn(|| Tile::zeros(rows, head_size)),
            report: EngineReport::default(),
        }
    }

    pub fn run(mut self, program: &EngineProgram) -> TileResult<EngineReport> {
        check_program(program, EngineKind::Mat)?;
        for step in program.steps() {
            match protocol_step(self.workspace, step, &mut self.report)? {
                None => {}
                Some((Stage::Qk, tile, masked)) => self.compute_qk(tile, masked)?,
                Some((Stage::Pv, tile, masked)) => self.compute_pv(tile, masked)?,
                Some((stage, tile, _)) => {
                    return Err(internal_error!(
                        "mat engine cannot run {} for tile {}",
                        stage.name(),
                        tile
                    ))
                }
            }
        }
        Ok(self.report)
    }

    /// Scores for tile `t`, one column sub-tile at a time
    fn compute_qk(&mut self, t: usize, masked: bool) -> TileResult<()> {
        if masked {
            return self.workspace.qk.produce(t, |slot| {
                slot.fill(f32::NEG_INFINITY);
                Ok(())
            });
        }

        let kernels = self.kernels;
        let layout = self.layout;
        let BlockInputs { q, k, .. } = self.inputs;
        let key0 = t * self.tile_width;
        let subs = layout.k_tile_factor();
        self.workspace.qk.produce(t, |slot| {
            for sub in 0..subs {
                let cols = layout.sub_tile_columns(sub);
                let keys = k
                    .row_block(key0 + cols.start, key0 + cols.end)?
                    .into_transposed();
                let mut part = Tile::zeros(q.rows(), cols.len());
                kernels.matmul(q, &keys, &mut part, AccMode::Init)?;
                slot.write_block(0, cols.start, &part)?;
            }
            Ok(())
        })?;
        self.report.qk_sub_matmuls += subs;
        Ok(())
    }

    /// `P V` for tile `t`, accumulated over row sub-blocks of V
    fn compute_pv(&mut self, t: usize, masked: bool) -> TileResult<()> {
        let kernels = self.kernels;
        let layout = self.layout;
        let v = self.inputs.v;
        let key0 = t * self.tile_width;
        let subs = layout.k_tile_factor();
        let acc = self.accumulator.current_mut();

        self.workspace.p.consume(t, |p| {
            if masked {
                acc.fill(0.0);
                return Ok(());
            }
            for sub in 0..subs {
                let cols = layout.sub_tile_columns(sub);
                let probs = p.block(0, cols.start, p.rows(), cols.len())?;
                let values = v.row_block(key0 + cols.start, key0 + cols.end)?;
                kernels.matmul(&probs, &values, acc, AccMode::for_sub_block(sub))?;
            }
            Ok(())
        })?;
        if !masked {
            self.report.pv_sub_matmuls += subs;
        }

        let acc = self.accumulator.current();
        self.workspace.pv.produce(t, |slot| slot.copy_from(acc))?;
        self.accumulator.flip();
        Ok(())
    }
}

/// One row range of the block with its own softmax and accumulator
#[derive(Debug)]
struct Lane {
    row0: usize,
    rows: usize,
    softmax: StreamingSoftmax,
    update: RunningUpdate,
    /// Rescale factors of softmaxed tiles not yet folded
    pending: VecDeque<Vec<f32>>,
}

/// Softmax and output-update consumer
pub struct VecEngine<'a, T, K> {
    kernels: &'a K,
    workspace: &'a BlockWorkspace<T>,
    lanes: Vec<Lane>,
    causal: bool,
    row_offset: usize,
    tile_width: usize,
    head_size: usize,
    checkpoints: Option<BlockCheckpoints>,
    report: EngineReport,
}

impl<'a, T: Element, K: TileKernels> VecEngine<'a, T, K> {
    /// `lanes` must divide the block's rows
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        kernels: &'a K,
        layout: &FifoLayout,
        workspace: &'a BlockWorkspace<T>,
        lanes: usize,
        num_tiles: usize,
        row_offset: usize,
        scale: f32,
        causal: bool,
        checkpoints: Option<BlockCheckpoints>,
    ) -> TileResult<Self> {
        let (block_rows, tile_width) = layout.slot_shape(FifoKind::Qk);
        let (_, head_size) = layout.slot_shape(FifoKind::Pv);
        if lanes == 0 || block_rows % lanes != 0 {
            return Err(internal_error!("{} lanes cannot split {} rows", lanes, block_rows));
        }
        let rows = block_rows / lanes;
        let lanes = (0..lanes)
            .map(|i| {
                Ok(Lane {
                    row0: i * rows,
                    rows,
                    softmax: StreamingSoftmax::new(rows, scale),
                    update: RunningUpdate::new(rows, head_size, num_tiles)?,
                    pending: VecDeque::new(),
                })
            })
            .collect::<TileResult<Vec<_>>>()?;

        Ok(VecEngine {
            kernels,
            workspace,
            lanes,
            causal,
            row_offset,
            tile_width,
            head_size,
            checkpoints,
            report: EngineReport::default(),
        })
    }

    /// Run the program, then hand back the normalized block output
    pub fn run(
        mut self,
        program: &EngineProgram,
    ) -> TileResult<(Tile<f32>, EngineReport, Option<BlockCheckpoints>)> {
        check_program(program, EngineKind::Vec)?;
        for step in program.steps() {
            match protocol_step(self.workspace, step, &mut self.report)? {
                None => {}
                Some((Stage::Softmax, tile, _)) => self.compute_softmax(tile)?,
                Some((Stage::Update, tile, _)) => self.compute_update(tile)?,
                Some((stage, tile, _)) => {
                    return Err(internal_error!(
                        "vec engine cannot run {} for tile {}",
                        stage.name(),
                        tile
                    ))
                }
            }
        }

        let block_rows: usize = self.lanes.iter().map(|lane| lane.rows).sum();
        let mut output = Tile::zeros(block_rows, self.head_size);
        for lane in self.lanes {
            let row0 = lane.row0;
            output.write_block(row0, 0, &lane.update.into_output()?)?;
        }
        Ok((output, self.report, self.checkpoints))
    }

    fn compute_softmax(&mut self, t: usize) -> TileResult<()> {
        let scores = self.workspace.qk.consume(t, |qk| Ok(qk.clone()))?;
        let (block_rows, cols) = scores.shape();
        let recording = self.checkpoints.is_some();
        let mut probs = recording.then(|| Tile::<f32>::zeros(block_rows, cols));
        let mut stats: [Vec<f32>; 3] = Default::default();

        let mut x_exp = Vec::with_capacity(self.lanes.len());
        for lane in &mut self.lanes {
            let mask = if self.causal {
                TileMask::Causal {
                    row_offset: self.row_offset + lane.row0,
                    col_offset: t * self.tile_width,
                }
            } else {
                TileMask::None
            };
            let rows = scores.row_block(lane.row0, lane.row0 + lane.rows)?;
            let step = lane.softmax.step::<K, T>(self.kernels, &rows, mask)?;
            if step.pass_through {
                self.report.masked_tiles += 1;
            }
            if let Some(probs) = probs.as_mut() {
                probs.write_block(lane.row0, 0, &step.probs)?;
                stats[0].extend_from_slice(&step.rescale);
                stats[1].extend_from_slice(lane.softmax.running_max());
                stats[2].extend_from_slice(lane.softmax.running_sum());
            }
            lane.pending.push_back(step.rescale);
            x_exp.push((lane.row0, step.x_exp));
        }

        self.workspace.p.produce(t, |slot| {
            for (row0, tile) in &x_exp {
                slot.write_block(*row0, 0, tile)?;
            }
            Ok(())
        })?;

        if let (Some(checkpoints), Some(probs)) = (self.checkpoints.as_mut(), probs) {
            let mut stored = Tile::<f32>::zeros(block_rows, cols);
            for (row0, tile) in &x_exp {
                stored.write_block(*row0, 0, &tile.to_f32())?;
            }
            checkpoints.record_softmax(t, scores, stored, probs, stats)?;
        }
        Ok(())
    }

    fn compute_update(&mut self, t: usize) -> TileResult<()> {
        let pv = self.workspace.pv.consume(t, |pv| Ok(pv.clone()))?;
        for lane in &mut self.lanes {
            let rescale = lane
                .pending
                .pop_front()
                .ok_or_else(|| internal_error!("update of tile {} before its softmax", t))?;
            let partial = pv.row_block(lane.row0, lane.row0 + lane.rows)?;
            lane.update
                .fold(self.kernels, &partial, &rescale, lane.softmax.running_sum())?;
        }

        if let Some(checkpoints) = self.checkpoints.as_mut() {
            let mut output = Tile::<f32>::zeros(pv.rows(), self.head_size);
            for lane in &self.lanes {
                output.write_block(lane.row0, 0, lane.update.output())?;
            }
            checkpoints.record_update(t, pv, output)?;
        }
        Ok(())
    }
}
