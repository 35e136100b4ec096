//! Counting semaphore used for cross-engine signalling

use crate::error::{TileForgeError, TileResult};
use serde::Serialize;
use std::sync::{Condvar, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct FlagState {
    tokens: usize,
    closed: bool,
    signals: u64,
    acquires: u64,
}

/// Signal/acquire counters, kept across resets
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FlagCounters {
    pub signals: u64,
    pub acquires: u64,
}

/// A named counting flag.
///
/// `signal` adds a token, `acquire` blocks until one is available and takes
/// it. Once closed, an `acquire` that would block fails with
/// [`TileForgeError::PipelineAborted`] instead, so a failed engine cannot
/// strand its peer.
#[derive(Debug)]
pub struct SyncFlag {
    name: &'static str,
    state: Mutex<FlagState>,
    available: Condvar,
}

impl SyncFlag {
    pub fn new(name: &'static str) -> Self {
        SyncFlag {
            name,
            state: Mutex::new(FlagState::default()),
            available: Condvar::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    fn lock(&self) -> TileResult<MutexGuard<'_, FlagState>> {
        Ok(self.state.lock()?)
    }

    pub fn signal(&self) -> TileResult<()> {
        let mut state = self.lock()?;
        state.tokens += 1;
        state.signals += 1;
        self.available.notify_one();
        Ok(())
    }

    /// Block until a token is available, then take it
    pub fn acquire(&self) -> TileResult<()> {
        let mut state = self.lock()?;
        loop {
            if state.tokens > 0 {
                state.tokens -= 1;
                state.acquires += 1;
                return Ok(());
            }
            if state.closed {
                return Err(TileForgeError::PipelineAborted(self.name));
            }
            state = self.available.wait(state)?;
        }
    }

    /// Wake every waiter; blocked and future acquires on an empty flag fail
    pub fn close(&self) {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.closed = true;
        self.available.notify_all();
    }

    /// Tokens signalled but not yet acquired
    pub fn outstanding(&self) -> TileResult<usize> {
        Ok(self.lock()?.tokens)
    }

    pub fn counters(&self) -> TileResult<FlagCounters> {
        let state = self.lock()?;
        Ok(FlagCounters {
            signals: state.signals,
            acquires: state.acquires,
        })
    }

    /// Drop any tokens and reopen. Used to recover a workspace after an
    /// aborted run.
    pub fn reset(&self) {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                self.state.clear_poison();
                poisoned.into_inner()
            }
        };
        state.tokens = 0;
        state.closed = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_signal_then_acquire() {
        let flag = SyncFlag::new("qk_ready");
        flag.signal().unwrap();
        flag.signal().unwrap();
        assert_eq!(flag.outstanding().unwrap(), 2);
        flag.acquire().unwrap();
        flag.acquire().unwrap();
        assert_eq!(flag.outstanding().unwrap(), 0);
        assert_eq!(
            flag.counters().unwrap(),
            FlagCounters {
                signals: 2,
                acquires: 2
            }
        );
    }

    #[test]
    fn test_acquire_blocks_until_signal() {
        let flag = Arc::new(SyncFlag::new("p_ready"));
        let waiter = {
            let flag = Arc::clone(&flag);
            thread::spawn(move || flag.acquire())
        };
        thread::sleep(Duration::from_millis(20));
        assert!(!waiter.is_finished());
        flag.signal().unwrap();
        assert!(waiter.join().unwrap().is_ok());
        assert_eq!(flag.outstanding().unwrap(), 0);
    }

    #[test]
    fn test_close_wakes_waiter_with_abort() {
        let flag = Arc::new(SyncFlag::new("pv_ready"));
        let waiter = {
            let flag = Arc::clone(&flag);
            thread::spawn(move || flag.acquire())
        };
        thread::sleep(Duration::from_millis(20));
        flag.close();
        let result = waiter.join().unwrap();
        assert!(matches!(result, Err(TileForgeError::PipelineAborted("pv_ready"))));
    }

    #[test]
    fn test_closed_flag_still_hands_out_tokens() {
        let flag = SyncFlag::new("qk_consumed");
        flag.signal().unwrap();
        flag.close();
        assert!(flag.acquire().is_ok());
        assert!(flag.acquire().is_err());
    }

    #[test]
    fn test_reset_reopens() {
        let flag = SyncFlag::new("qk_consumed");
        flag.signal().unwrap();
        flag.close();
        flag.reset();
        assert_eq!(flag.outstanding().unwrap(), 0);
        flag.signal().unwrap();
        assert!(flag.acquire().is_ok());
        assert_eq!(flag.counters().unwrap().signals, 2);
    }
}
