//! Core traits and types for the generation store.

use chrono::{DateTime, Utc};
use color_eyre::Result;

use crate::fetch::{RequestSignature, ResponseSnapshot};

/// Persisted lifecycle state of a generation.
///
/// The transient `installing`/`activating` phases live only inside the
/// lifecycle manager; a generation row is never visible half-way through
/// either transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationState {
  /// Precached and complete, but not yet the one the router sees.
  Installed,
  /// The single generation visible to the strategies.
  Active,
}

impl GenerationState {
  pub fn as_str(&self) -> &'static str {
    match self {
      GenerationState::Installed => "installed",
      GenerationState::Active => "active",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "installed" => Some(GenerationState::Installed),
      "active" => Some(GenerationState::Active),
      _ => None,
    }
  }
}

/// A stored generation, as enumerated by the lifecycle manager.
#[derive(Debug, Clone)]
pub struct GenerationRecord {
  pub name: String,
  pub state: GenerationState,
  pub created_at: DateTime<Utc>,
}

/// Trait for cache generation storage backends.
///
/// All entry reads and writes go through the active generation; older
/// generations are owned solely by the lifecycle manager until deleted.
/// Every operation is a single atomic store action — callers never compose
/// read-modify-write sequences across an await point.
pub trait GenerationStore: Send + Sync {
  /// Look up a snapshot in the active generation.
  fn get_active(&self, signature: &RequestSignature) -> Result<Option<ResponseSnapshot>>;

  /// Store a snapshot into the active generation.
  ///
  /// Returns `false` when no generation is active (the write is dropped,
  /// not an error).
  fn put_active(&self, signature: &RequestSignature, snapshot: &ResponseSnapshot) -> Result<bool>;

  /// Name of the active generation, if any.
  fn active_generation(&self) -> Result<Option<String>>;

  /// Atomically create a generation with all of its precached entries.
  ///
  /// The generation becomes visible already complete, in the `installed`
  /// state. Nothing is written if the transaction fails.
  fn commit_precache(
    &self,
    name: &str,
    entries: &[(RequestSignature, ResponseSnapshot)],
  ) -> Result<()>;

  /// Atomically delete every other generation and mark this one active.
  fn activate(&self, name: &str) -> Result<()>;

  /// Enumerate stored generations.
  fn list_generations(&self) -> Result<Vec<GenerationRecord>>;

  /// Number of entries stored under a generation.
  fn entry_count(&self, name: &str) -> Result<usize>;
}

/// A response on its way back to the caller, tagged with where it came from.
#[derive(Debug, Clone)]
pub struct Served {
  pub snapshot: ResponseSnapshot,
  pub source: ServeSource,
}

impl Served {
  pub fn network(snapshot: ResponseSnapshot) -> Self {
    Self {
      snapshot,
      source: ServeSource::Network,
    }
  }

  pub fn cache(snapshot: ResponseSnapshot) -> Self {
    Self {
      snapshot,
      source: ServeSource::Cache,
    }
  }

  pub fn offline_cache(snapshot: ResponseSnapshot) -> Self {
    Self {
      snapshot,
      source: ServeSource::OfflineCache,
    }
  }
}

/// Where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServeSource {
  /// Fresh from the network.
  Network,
  /// Cache hit on the fast path (revalidation may be in flight).
  Cache,
  /// Cache fallback after the network proved unreachable.
  OfflineCache,
  /// Synthesized offline payload or the precached offline page.
  OfflineFallback,
  /// Mutation captured into the queue; the write did not happen live.
  Captured,
}

impl ServeSource {
  pub fn as_str(&self) -> &'static str {
    match self {
      ServeSource::Network => "network",
      ServeSource::Cache => "cache",
      ServeSource::OfflineCache => "offline-cache",
      ServeSource::OfflineFallback => "offline-fallback",
      ServeSource::Captured => "captured",
    }
  }
}
