//! Program vocabulary shared by the scheduler, the engines and the simulator

use crate::fifo::FifoKind;
use serde::Serialize;

/// The two execution contexts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// Matrix-multiply engine: QK and PV
    Mat,
    /// Reduction/elementwise engine: softmax and output update
    Vec,
}

impl EngineKind {
    pub fn name(&self) -> &'static str {
        match self {
            EngineKind::Mat => "mat",
            EngineKind::Vec => "vec",
        }
    }
}

/// Per-tile compute stages, in dependency order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// `Q K^T` into the QK FIFO
    Qk,
    /// Streaming softmax, QK FIFO into the P FIFO
    Softmax,
    /// `P V` into the PV FIFO
    Pv,
    /// Running output fold from the PV FIFO
    Update,
}

impl Stage {
    pub const ALL: [Stage; 4] = [Stage::Qk, Stage::Softmax, Stage::Pv, Stage::Update];

    pub fn engine(&self) -> EngineKind {
        match self {
            Stage::Qk | Stage::Pv => EngineKind::Mat,
            Stage::Softmax | Stage::Update => EngineKind::Vec,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Qk => "qk",
            Stage::Softmax => "softmax",
            Stage::Pv => "pv",
            Stage::Update => "update",
        }
    }

    /// FIFO read by this stage, if any
    pub fn input(&self) -> Option<FifoKind> {
        match self {
            Stage::Qk => None,
            Stage::Softmax => Some(FifoKind::Qk),
            Stage::Pv => Some(FifoKind::P),
            Stage::Update => Some(FifoKind::Pv),
        }
    }

    /// FIFO written by this stage, if any
    pub fn output(&self) -> Option<FifoKind> {
        match self {
            Stage::Qk => Some(FifoKind::Qk),
            Stage::Softmax => Some(FifoKind::P),
            Stage::Pv => Some(FifoKind::Pv),
            Stage::Update => None,
        }
    }
}

/// One instruction of a statically unrolled engine program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    /// Producer: wait until the slot for `tile` may be overwritten
    Allocate { fifo: FifoKind, tile: usize },
    /// Producer: announce that `tile` is complete
    Record { fifo: FifoKind, tile: usize },
    /// Consumer: wait until `tile` has been recorded
    Wait { fifo: FifoKind, tile: usize },
    /// Consumer: announce that the slot of `tile` is drained
    Free { fifo: FifoKind, tile: usize },
    /// Run a stage on `tile`. `masked` marks tiles entirely above the
    /// causal diagonal for the whole block.
    Compute { stage: Stage, tile: usize, masked: bool },
    /// Producer: take the free tokens left over after `tiles` tiles
    Drain { fifo: FifoKind, tiles: usize },
}

impl Step {
    /// Steps that may block the engine executing them
    pub fn may_block(&self) -> bool {
        matches!(
            self,
            Step::Allocate { .. } | Step::Wait { .. } | Step::Drain { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_engines_and_fifos() {
        assert_eq!(Stage::Qk.engine(), EngineKind::Mat);
        assert_eq!(Stage::Softmax.engine(), EngineKind::Vec);
        assert_eq!(Stage::Pv.input(), Some(FifoKind::P));
        assert_eq!(Stage::Pv.output(), Some(FifoKind::Pv));
        assert_eq!(Stage::Update.output(), None);
        // each FIFO is written on one engine and read on the other
        for stage in Stage::ALL {
            if let Some(out) = stage.output() {
                let reader = Stage::ALL
                    .iter()
                    .find(|s| s.input() == Some(out))
                    .unwrap();
                assert_ne!(reader.engine(), stage.engine());
            }
        }
    }

    #[test]
    fn test_step_serializes_with_tag() {
        let step = Step::Compute {
            stage: Stage::Softmax,
            tile: 3,
            masked: false,
        };
        let json = serde_json::to_string(&step).unwrap();
        assert_eq!(
            json,
            r#"{"op":"compute","stage":"softmax","tile":3,"masked":false}"#
        );
        assert!(Step::Wait {
            fifo: FifoKind::Qk,
            tile: 0
        }
        .may_block());
    }
}
