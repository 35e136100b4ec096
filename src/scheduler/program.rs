//! Static per-engine programs
//!
//! [`TileScheduler::run`] unrolls the whole pipeline for one query block
//! into two instruction lists, one per engine. With preload depth `P`:
//!
//! ```text
//! preload, j < min(P, n):   mat: QK(j)            vec: SM(j)
//! steady,  t in 0..n:       mat: QK(t+P), PV(t)   vec: SM(t+P), UP(t)
//! teardown:                 mat: drain qk, pv     vec: drain p
//! ```
//!
//! `QK(t+P)` and `SM(t+P)` are omitted once `t+P >= n`. Every data step is
//! wrapped in the `allocate`/`record`/`wait`/`free` protocol of the FIFOs it
//! touches.

use super::types::{EngineKind, Stage, Step};
use crate::config_error;
use crate::error::TileResult;
use crate::fifo::FifoKind;
use crate::sync::SyncSchedule;
use serde::Serialize;

/// Causal placement of a query block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CausalBlock {
    /// Global index of the block's last query row
    pub last_row: usize,
}

/// Instruction list for one engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineProgram {
    engine: EngineKind,
    steps: Vec<Step>,
}

impl EngineProgram {
    fn new(engine: EngineKind) -> Self {
        EngineProgram {
            engine,
            steps: Vec::new(),
        }
    }

    pub fn engine(&self) -> EngineKind {
        self.engine
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// `(stage, tile)` of each compute step, in program order
    pub fn compute_order(&self) -> Vec<(Stage, usize)> {
        self.steps
            .iter()
            .filter_map(|step| match *step {
                Step::Compute { stage, tile, .. } => Some((stage, tile)),
                _ => None,
            })
            .collect()
    }

    fn push(&mut self, step: Step) {
        self.steps.push(step);
    }
}

/// Both engine programs for one query block
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnginePrograms {
    pub mat: EngineProgram,
    pub vec: EngineProgram,
    pub num_tiles: usize,
    pub preload_depth: usize,
    pub schedule: SyncSchedule,
}

impl EnginePrograms {
    pub fn program(&self, engine: EngineKind) -> &EngineProgram {
        match engine {
            EngineKind::Mat => &self.mat,
            EngineKind::Vec => &self.vec,
        }
    }

    /// Tiles marked as entirely above the causal diagonal
    pub fn masked_tiles(&self) -> usize {
        self.mat
            .steps()
            .iter()
            .filter(|step| {
                matches!(
                    step,
                    Step::Compute {
                        stage: Stage::Qk,
                        masked: true,
                        ..
                    }
                )
            })
            .count()
    }
}

/// Builds engine programs from the pipeline knobs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileScheduler {
    sync_period: usize,
    k_tile_factor: usize,
    tile_width: usize,
}

impl TileScheduler {
    /// `k_tile_factor` is the number of matmul sub-tiles per tile.
    pub fn new(sync_period: usize, k_tile_factor: usize, tile_width: usize) -> Self {
        TileScheduler {
            sync_period,
            k_tile_factor,
            tile_width,
        }
    }

    /// Unroll the pipeline for `num_tiles` tiles.
    ///
    /// Fails with a configuration error, before anything runs, when the
    /// knobs cannot make progress or would corrupt a slot:
    /// `fifo_depth < preload_depth`, a `sync_period` that does not divide
    /// `fifo_depth`, or sub-tiling without preload.
    pub fn run(
        &self,
        num_tiles: usize,
        preload_depth: usize,
        fifo_depth: usize,
        causal: Option<CausalBlock>,
    ) -> TileResult<EnginePrograms> {
        if num_tiles == 0 {
            return Err(config_error!("num_tiles must be >= 1"));
        }
        if preload_depth == 0 {
            return Err(config_error!("preload_depth must be >= 1"));
        }
        if fifo_depth < preload_depth {
            return Err(config_error!(
                "fifo_depth {} cannot hold {} preloaded tiles",
                fifo_depth,
                preload_depth
            ));
        }
        if preload_depth <= 1 && self.k_tile_factor > 1 {
            return Err(config_error!(
                "sub-tiled matmul (k_tile_factor {}) requires preload_depth > 1",
                self.k_tile_factor
            ));
        }
        let schedule = SyncSchedule::new(fifo_depth, self.sync_period)?;
        Ok(self.build(num_tiles, preload_depth, schedule, causal))
    }

    pub(crate) fn build(
        &self,
        num_tiles: usize,
        preload_depth: usize,
        schedule: SyncSchedule,
        causal: Option<CausalBlock>,
    ) -> EnginePrograms {
        let masked = |tile: usize| match causal {
            Some(block) => tile * self.tile_width > block.last_row,
            None => false,
        };

        let mut mat = EngineProgram::new(EngineKind::Mat);
        let mut vec = EngineProgram::new(EngineKind::Vec);

        for j in 0..preload_depth.min(num_tiles) {
            emit_qk(&mut mat, j, masked(j));
            emit_softmax(&mut vec, j, masked(j));
        }

        for t in 0..num_tiles {
            let ahead = t + preload_depth;
            if ahead < num_tiles {
                emit_qk(&mut mat, ahead, masked(ahead));
            }
            emit_pv(&mut mat, t, masked(t));
            if ahead < num_tiles {
                emit_softmax(&mut vec, ahead, masked(ahead));
            }
            emit_update(&mut vec, t);
        }

        mat.push(Step::Drain {
            fifo: FifoKind::Qk,
            tiles: num_tiles,
        });
        mat.push(Step::Drain {
            fifo: FifoKind::Pv,
            tiles: num_tiles,
        });
        vec.push(Step::Drain {
            fifo: FifoKind::P,
            tiles: num_tiles,
        });

        EnginePrograms {
            mat,
            vec,
            num_tiles,
            preload_depth,
            schedule,
        }
    }
}

fn emit_qk(mat: &mut EngineProgram, tile: usize, masked: bool) {
    mat.push(Step::Allocate {
        fifo: FifoKind::Qk,
        tile,
    });
    mat.push(Step::Compute {
        stage: Stage::Qk,
        tile,
        masked,
    });
    mat.push(Step::Record {
        fifo: FifoKind::Qk,
        tile,
    });
}

fn emit_softmax(vec: &mut EngineProgram, tile: usize, masked: bool) {
    vec.push(Step::Wait {
        fifo: FifoKind::Qk,
        tile,
    });
    vec.push(Step::Allocate {
        fifo: FifoKind::P,
        tile,
    });
    vec.push(Step::Compute {
        stage: Stage::Softmax,
        tile,
        masked,
    });
    vec.push(Step::Free {
        fifo: FifoKind::Qk,
        tile,
    });
    vec.push(Step::Record {
        fifo: FifoKind::P,
        tile,
    });
}

fn emit_pv(mat: &mut EngineProgram, tile: usize, masked: bool) {
    mat.push(Step::Wait {
        fifo: FifoKind::P,
        tile,
    });
    mat.push(Step::Allocate {
        fifo: FifoKind::Pv,
        tile,
    });
    mat.push(Step::Compute {
        stage: Stage::Pv,
        tile,
        masked,
    });
    mat.push(Step::Free {
        fifo: FifoKind::P,
        tile,
    });
    mat.push(Step::Record {
        fifo: FifoKind::Pv,
        tile,
    });
}

fn emit_update(vec: &mut EngineProgram, tile: usize) {
    vec.push(Step::Wait {
        fifo: FifoKind::Pv,
        tile,
    });
    vec.push(Step::Compute {
        stage: Stage::Update,
        tile,
        masked: false,
    });
    vec.push(Step::Free {
        fifo: FifoKind::Pv,
        tile,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_order_with_preload() {
        let programs = TileScheduler::new(1, 1, 128).run(4, 2, 4, None).unwrap();
        assert_eq!(
            programs.mat.compute_order(),
            vec![
                (Stage::Qk, 0),
                (Stage::Qk, 1),
                (Stage::Qk, 2),
                (Stage::Pv, 0),
                (Stage::Qk, 3),
                (Stage::Pv, 1),
                (Stage::Pv, 2),
                (Stage::Pv, 3),
            ]
        );
        assert_eq!(
            programs.vec.compute_order(),
            vec![
                (Stage::Softmax, 0),
                (Stage::Softmax, 1),
                (Stage::Softmax, 2),
                (Stage::Update, 0),
                (Stage::Softmax, 3),
                (Stage::Update, 1),
                (Stage::Update, 2),
                (Stage::Update, 3),
            ]
        );
    }

    #[test]
    fn test_fewer_tiles_than_preload() {
        // the preload phase covers every tile; steady state only drains PV/update
        let programs = TileScheduler::new(1, 1, 64).run(2, 4, 4, None).unwrap();
        assert_eq!(
            programs.mat.compute_order(),
            vec![(Stage::Qk, 0), (Stage::Qk, 1), (Stage::Pv, 0), (Stage::Pv, 1)]
        );
    }

    #[test]
    fn test_every_tile_visits_every_stage_once() {
        let programs = TileScheduler::new(2, 2, 64).run(7, 3, 4, None).unwrap();
        for stage in Stage::ALL {
            let program = programs.program(stage.engine());
            let tiles: Vec<usize> = program
                .compute_order()
                .into_iter()
                .filter(|(s, _)| *s == stage)
                .map(|(_, t)| t)
                .collect();
            assert_eq!(tiles, (0..7).collect::<Vec<_>>(), "{:?}", stage);
        }
    }

    #[test]
    fn test_programs_end_with_drains() {
        let programs = TileScheduler::new(1, 1, 64).run(3, 1, 2, None).unwrap();
        let mat_tail = &programs.mat.steps()[programs.mat.len() - 2..];
        assert_eq!(
            mat_tail,
            &[
                Step::Drain {
                    fifo: FifoKind::Qk,
                    tiles: 3
                },
                Step::Drain {
                    fifo: FifoKind::Pv,
                    tiles: 3
                }
            ]
        );
        assert_eq!(
            programs.vec.steps().last(),
            Some(&Step::Drain {
                fifo: FifoKind::P,
                tiles: 3
            })
        );
    }

    #[test]
    fn test_causal_marks_tiles_past_diagonal() {
        // block rows 0..64 with 32-wide tiles: tiles 0 and 1 are visible
        let programs = TileScheduler::new(1, 1, 32)
            .run(4, 2, 4, Some(CausalBlock { last_row: 63 }))
            .unwrap();
        assert_eq!(programs.masked_tiles(), 2);
        assert!(programs.mat.steps().contains(&Step::Compute {
            stage: Stage::Pv,
            tile: 3,
            masked: true
        }));
    }

    #[test]
    fn test_rejects_unsatisfiable_knobs() {
        let scheduler = TileScheduler::new(1, 1, 64);
        assert!(scheduler.run(0, 1, 1, None).is_err());
        assert!(scheduler.run(4, 0, 1, None).is_err());
        assert!(scheduler.run(4, 4, 2, None).unwrap_err().is_user_error());

        // sub-tiled matmul needs preload
        assert!(TileScheduler::new(1, 2, 64).run(4, 1, 4, None).is_err());
        assert!(TileScheduler::new(1, 2, 64).run(4, 2, 4, None).is_ok());

        // sync period must divide fifo depth
        assert!(TileScheduler::new(3, 1, 64).run(4, 2, 4, None).is_err());
    }
}
