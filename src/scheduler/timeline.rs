//! Static timeline planning
//!
//! Estimates how the two engines overlap for a pair of programs, given a
//! fixed cost per stage. Each engine runs its compute steps in program
//! order; a step starts once its engine is free and its producers (and the
//! consumer that frees its slot, `fifo_depth` tiles back) have finished.

use super::program::EnginePrograms;
use super::types::{EngineKind, Stage};
use crate::error::{TileForgeError, TileResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Cost of one stage on one tile, in arbitrary time units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageCosts {
    pub qk: u64,
    pub softmax: u64,
    pub pv: u64,
    pub update: u64,
}

impl Default for StageCosts {
    fn default() -> Self {
        StageCosts {
            qk: 10,
            softmax: 16,
            pv: 10,
            update: 6,
        }
    }
}

impl StageCosts {
    pub fn of(&self, stage: Stage) -> u64 {
        match stage {
            Stage::Qk => self.qk,
            Stage::Softmax => self.softmax,
            Stage::Pv => self.pv,
            Stage::Update => self.update,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlannedTask {
    pub stage: Stage,
    pub tile: usize,
    pub engine: EngineKind,
    pub start: u64,
    pub end: u64,
}

/// Planned execution of both engines
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Timeline {
    pub tasks: Vec<PlannedTask>,
    pub makespan: u64,
    pub mat_busy: u64,
    pub vec_busy: u64,
}

impl Timeline {
    /// Fraction of the makespan `engine` spends computing
    pub fn utilization(&self, engine: EngineKind) -> f64 {
        if self.makespan == 0 {
            return 0.0;
        }
        let busy = match engine {
            EngineKind::Mat => self.mat_busy,
            EngineKind::Vec => self.vec_busy,
        };
        busy as f64 / self.makespan as f64
    }

    pub fn task(&self, stage: Stage, tile: usize) -> Option<&PlannedTask> {
        self.tasks
            .iter()
            .find(|task| task.stage == stage && task.tile == tile)
    }

    /// Two-row character chart, `width` columns wide
    pub fn render(&self, width: usize) -> String {
        let width = width.max(1);
        let mut out = String::new();
        for engine in [EngineKind::Mat, EngineKind::Vec] {
            let mut row = vec!['.'; width];
            if self.makespan > 0 {
                for task in self.tasks.iter().filter(|t| t.engine == engine) {
                    let from = (task.start as usize * width) / self.makespan as usize;
                    let to = ((task.end as usize * width) / self.makespan as usize).max(from + 1);
                    let glyph = match task.stage {
                        Stage::Qk => 'Q',
                        Stage::Softmax => 'S',
                        Stage::Pv => 'P',
                        Stage::Update => 'U',
                    };
                    for cell in row.iter_mut().take(to.min(width)).skip(from) {
                        *cell = glyph;
                    }
                }
            }
            out.push_str(&format!("{:<4}|", engine.name()));
            out.extend(row);
            out.push_str("|\n");
        }
        out
    }
}

/// Plan `programs` with the given stage costs
pub fn plan(programs: &EnginePrograms, costs: &StageCosts) -> TileResult<Timeline> {
    let depth = programs.schedule.fifo_depth();
    let orders = [
        (EngineKind::Mat, programs.mat.compute_order()),
        (EngineKind::Vec, programs.vec.compute_order()),
    ];
    let mut cursors = [0usize; 2];
    let mut engine_free = [0u64; 2];
    let mut ends: HashMap<(Stage, usize), u64> = HashMap::new();
    let mut tasks = Vec::with_capacity(orders[0].1.len() + orders[1].1.len());

    loop {
        let mut progressed = false;
        for (lane, (engine, order)) in orders.iter().enumerate() {
            while let Some(&(stage, tile)) = order.get(cursors[lane]) {
                let ready = match dependencies(stage, tile, depth)
                    .into_iter()
                    .flatten()
                    .map(|dep| ends.get(&dep).copied())
                    .collect::<Option<Vec<u64>>>()
                {
                    Some(dep_ends) => dep_ends.into_iter().max().unwrap_or(0),
                    None => break,
                };
                let start = ready.max(engine_free[lane]);
                let end = start + costs.of(stage);
                engine_free[lane] = end;
                ends.insert((stage, tile), end);
                tasks.push(PlannedTask {
                    stage,
                    tile,
                    engine: *engine,
                    start,
                    end,
                });
                cursors[lane] += 1;
                progressed = true;
            }
        }
        if cursors[0] == orders[0].1.len() && cursors[1] == orders[1].1.len() {
            break;
        }
        if !progressed {
            return Err(TileForgeError::Deadlock {
                mat_pc: cursors[0],
                vec_pc: cursors[1],
            });
        }
    }

    tasks.sort_by_key(|task| (task.start, task.engine == EngineKind::Vec));
    let busy = |engine: EngineKind| -> u64 {
        tasks
            .iter()
            .filter(|t| t.engine == engine)
            .map(|t| t.end - t.start)
            .sum()
    };
    Ok(Timeline {
        makespan: engine_free[0].max(engine_free[1]),
        mat_busy: busy(EngineKind::Mat),
        vec_busy: busy(EngineKind::Vec),
        tasks,
    })
}

/// Producer of the input tile, and the consumer that frees the output slot
fn dependencies(stage: Stage, tile: usize, depth: usize) -> [Option<(Stage, usize)>; 2] {
    let recycled = tile.checked_sub(depth);
    match stage {
        Stage::Qk => [None, recycled.map(|t| (Stage::Softmax, t))],
        Stage::Softmax => [Some((Stage::Qk, tile)), recycled.map(|t| (Stage::Pv, t))],
        Stage::Pv => [Some((Stage::Softmax, tile)), recycled.map(|t| (Stage::Update, t))],
        Stage::Update => [Some((Stage::Pv, tile)), None],
    }
}
