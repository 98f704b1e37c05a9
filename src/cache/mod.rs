//! Versioned cache generations and the fetch strategies over them.
//!
//! This module provides:
//! - Named, atomically-swapped cache generations (install/activate/GC)
//! - Cache-first serving with non-blocking background revalidation
//! - Network-first serving with cache fallback for offline mode

mod store;
mod strategy;
mod traits;

pub use store::{NoopStore, SqliteStore};
pub use strategy::StrategyLayer;
pub use traits::{GenerationRecord, GenerationState, GenerationStore, Served, ServeSource};
