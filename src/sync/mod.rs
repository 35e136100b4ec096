//! Cross-engine synchronization
//!
//! - [`SyncFlag`] - counting flag with blocking acquire and abort
//! - [`SyncSchedule`] - which tiles wait for / signal a free slot, and how
//!   many free tokens are left to drain at teardown
//! - [`TileChannel`] - `allocate`/`record`/`wait`/`free` over one FIFO
//!
//! Engines block only inside `allocate` and `wait`.

pub mod channel;
pub mod flag;
pub mod schedule;

pub use channel::{ChannelCounters, TileChannel};
pub use flag::{FlagCounters, SyncFlag};
pub use schedule::SyncSchedule;
