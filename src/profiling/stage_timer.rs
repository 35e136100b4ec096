//! Wall-clock timers for pipeline stages
//!
//! ```rust
//! use tileforge::profiling::StageTimer;
//!
//! let mut timer = StageTimer::for_stage("block 0");
//! timer.start();
//! // ... run the block ...
//! timer.stop();
//! assert!(timer.elapsed_ms().is_some());
//! ```

use std::time::Instant;

/// Explicit start/stop timer for one named stage
#[derive(Debug, Clone)]
pub struct StageTimer {
    name: String,
    started: Option<Instant>,
    stopped: Option<Instant>,
}

impl StageTimer {
    pub fn for_stage(name: impl Into<String>) -> Self {
        StageTimer {
            name: name.into(),
            started: None,
            stopped: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Start (or restart) the timer, discarding any previous reading
    pub fn start(&mut self) {
        self.started = Some(Instant::now());
        self.stopped = None;
    }

    /// Stop the timer. Has no effect if it was never started.
    pub fn stop(&mut self) {
        if self.started.is_some() {
            self.stopped = Some(Instant::now());
        }
    }

    /// Milliseconds between `start` and `stop`; `None` until stopped
    pub fn elapsed_ms(&self) -> Option<f32> {
        match (self.started, self.stopped) {
            (Some(start), Some(stop)) => {
                Some(stop.duration_since(start).as_secs_f64() as f32 * 1000.0)
            }
            _ => None,
        }
    }

    pub fn is_started(&self) -> bool {
        self.started.is_some()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.is_some()
    }
}

/// Timer that logs its elapsed time at `debug` when dropped
#[derive(Debug)]
pub struct ScopedTimer {
    name: String,
    start: Instant,
}

impl ScopedTimer {
    pub fn new(name: impl Into<String>) -> Self {
        ScopedTimer {
            name: name.into(),
            start: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> f32 {
        self.start.elapsed().as_secs_f64() as f32 * 1000.0
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for ScopedTimer {
    fn drop(&mut self) {
        tracing::debug!(timer = %self.name, elapsed_ms = self.elapsed_ms(), "scope finished");
    }
}
