//! Unified error handling for tileforge
//!
//! Every fallible operation in the crate returns [`TileResult`]. Errors are
//! grouped by where they originate:
//! - Configuration errors (shape mismatches, unsatisfiable pipeline knobs)
//! - Protocol errors (FIFO overruns, leaked signals, aborted peers, deadlock)
//! - Numeric errors (reference comparison outside tolerance)
//! - Internal errors (bugs, poisoned locks)
//!
//! Configuration errors are always raised before a pipeline starts.

use std::fmt;

// Re-export thiserror for convenience
pub use thiserror;

/// Unified error type for tileforge
#[derive(Debug, thiserror::Error)]
pub enum TileForgeError {
    // ========== Configuration Errors ==========
    /// Invalid pipeline or kernel configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Operand shapes do not line up
    #[error("Shape mismatch in {op}: expected {expected}, got {actual}")]
    ShapeMismatch {
        op: &'static str,
        expected: String,
        actual: String,
    },

    /// Element type combination the kernels cannot handle
    #[error("Unsupported data type: {0}")]
    UnsupportedDType(String),

    // ========== Protocol Errors ==========
    /// A producer wrote into a FIFO slot that still held an unconsumed tile
    #[error("FIFO '{fifo}' overrun: slot {slot} still holds tile {live} while writing tile {incoming}")]
    FifoOverrun {
        fifo: &'static str,
        slot: usize,
        live: usize,
        incoming: usize,
    },

    /// Signals left behind after teardown
    #[error("Signal leak on '{channel}': {outstanding} token(s) outstanding after drain")]
    SignalLeak {
        channel: &'static str,
        outstanding: usize,
    },

    /// A peer engine failed and closed the channel this engine was blocked on
    #[error("Pipeline aborted while waiting on '{0}'")]
    PipelineAborted(&'static str),

    /// Neither engine can make progress
    #[error("Deadlock: mat engine blocked at step {mat_pc}, vec engine blocked at step {vec_pc}")]
    Deadlock { mat_pc: usize, vec_pc: usize },

    // ========== Numeric Errors ==========
    /// Result differs from the reference beyond tolerance
    #[error("Tolerance exceeded: {mismatches} element(s) out of tolerance, max abs err {max_abs_err:e}")]
    ToleranceExceeded {
        mismatches: usize,
        max_abs_err: f32,
    },

    // ========== I/O Errors ==========
    /// File I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error (config, checkpoints)
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // ========== Internal Errors ==========
    /// Internal error (indicates a bug)
    #[error("Internal error: {0}")]
    InternalError(String),

    /// Lock poisoned (an engine thread panicked while holding it)
    #[error("Internal lock poisoned: {0}")]
    LockPoisoned(String),
}

impl TileForgeError {
    /// Categorize the error for handling decisions
    pub fn category(&self) -> ErrorCategory {
        match self {
            TileForgeError::InvalidConfiguration(_)
            | TileForgeError::ShapeMismatch { .. }
            | TileForgeError::UnsupportedDType(_)
            | TileForgeError::IoError(_)
            | TileForgeError::Serialization(_) => ErrorCategory::User,

            TileForgeError::FifoOverrun { .. }
            | TileForgeError::SignalLeak { .. }
            | TileForgeError::PipelineAborted(_)
            | TileForgeError::Deadlock { .. } => ErrorCategory::Protocol,

            TileForgeError::ToleranceExceeded { .. } => ErrorCategory::Numeric,

            TileForgeError::InternalError(_) | TileForgeError::LockPoisoned(_) => {
                ErrorCategory::Internal
            }
        }
    }

    /// Check if this is a user-facing error (bad input or configuration)
    pub fn is_user_error(&self) -> bool {
        matches!(self.category(), ErrorCategory::User)
    }

    /// Check if this error came from the synchronization protocol
    pub fn is_protocol_error(&self) -> bool {
        matches!(self.category(), ErrorCategory::Protocol)
    }

    /// Check if this is an internal error (indicates a bug)
    pub fn is_internal_error(&self) -> bool {
        matches!(self.category(), ErrorCategory::Internal)
    }

    /// Secondary errors are consequences of another engine failing first.
    pub(crate) fn is_secondary(&self) -> bool {
        matches!(self, TileForgeError::PipelineAborted(_))
    }
}

/// Error category for handling decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Invalid input or configuration, rejected before execution
    User,
    /// Synchronization protocol violated at runtime
    Protocol,
    /// Output disagrees with a reference computation
    Numeric,
    /// Bug or poisoned state
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::User => write!(f, "User"),
            ErrorCategory::Protocol => write!(f, "Protocol"),
            ErrorCategory::Numeric => write!(f, "Numeric"),
            ErrorCategory::Internal => write!(f, "Internal"),
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for TileForgeError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        TileForgeError::LockPoisoned(err.to_string())
    }
}

/// Result alias used across the crate
pub type TileResult<T> = std::result::Result<T, TileForgeError>;

// ========== Helper Macros ==========

/// Create a configuration error with context
#[macro_export]
macro_rules! config_error {
    ($msg:expr) => {
        $crate::error::TileForgeError::InvalidConfiguration($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::TileForgeError::InvalidConfiguration(format!($fmt, $($arg)*))
    };
}

/// Create an internal error with context
#[macro_export]
macro_rules! internal_error {
    ($msg:expr) => {
        $crate::error::TileForgeError::InternalError($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::TileForgeError::InternalError(format!($fmt, $($arg)*))
    };
}

/// Build a shape mismatch error from two displayable shapes
pub fn shape_mismatch(
    op: &'static str,
    expected: impl fmt::Display,
    actual: impl fmt::Display,
) -> TileForgeError {
    TileForgeError::ShapeMismatch {
        op,
        expected: expected.to_string(),
        actual: actual.to_string(),
    }
}
