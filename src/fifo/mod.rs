//! Ring FIFOs between the two engines
//!
//! Three logical FIFOs carry each tile through the pipeline:
//! QK scores (mat -> vec), probabilities (vec -> mat) and PV partials
//! (mat -> vec). Each is a ring of `fifo_depth` slots indexed by
//! `tile mod fifo_depth`.

pub mod layout;
pub mod pingpong;
pub mod ring;

pub use layout::{FifoGeometry, FifoLayout};
pub use pingpong::PingPong;
pub use ring::TileFifo;

use serde::{Deserialize, Serialize};

/// The three logical FIFOs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FifoKind {
    /// Raw QK scores, f32
    Qk,
    /// Exponentiated probabilities, storage precision
    P,
    /// PV partial outputs, f32
    Pv,
}

impl FifoKind {
    pub const ALL: [FifoKind; 3] = [FifoKind::Qk, FifoKind::P, FifoKind::Pv];

    pub fn name(&self) -> &'static str {
        match self {
            FifoKind::Qk => "qk",
            FifoKind::P => "p",
            FifoKind::Pv => "pv",
        }
    }

    /// Flag carrying "tile produced" tokens
    pub fn ready_flag(&self) -> &'static str {
        match self {
            FifoKind::Qk => "qk_ready",
            FifoKind::P => "p_ready",
            FifoKind::Pv => "pv_ready",
        }
    }

    /// Flag carrying "slot drained" tokens
    pub fn consumed_flag(&self) -> &'static str {
        match self {
            FifoKind::Qk => "qk_consumed",
            FifoKind::P => "p_consumed",
            FifoKind::Pv => "pv_consumed",
        }
    }

    pub fn index(&self) -> usize {
        match self {
            FifoKind::Qk => 0,
            FifoKind::P => 1,
            FifoKind::Pv => 2,
        }
    }
}

impl std::fmt::Display for FifoKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
