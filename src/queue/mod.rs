//! Durable mutation queue and its replay coordinator.
//!
//! Mutations that fail while offline are captured here and re-issued in
//! strict FIFO order once connectivity returns.

mod store;
mod sync;

pub use store::{MutationQueue, QueueEntry};
pub use sync::{DrainReport, SyncCoordinator, SYNC_WAKE_TAG};
