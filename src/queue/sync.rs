//! Replay coordinator for the mutation queue.
//!
//! Drains captured mutations strictly oldest-first and stops the cycle at
//! the first entry the network refuses, so a create always lands before a
//! later update to the same resource. Delivery is at-least-once with no
//! dedup key: a request applied server-side before a dropped acknowledgment
//! is re-applied on replay, and callers needing exactly-once must carry an
//! idempotency key at the application layer.

use color_eyre::Result;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::store::MutationQueue;
use crate::fetch::Transport;

/// Wake-up tag the host environment fires to give the coordinator a chance
/// to drain without a connectivity signal.
pub const SYNC_WAKE_TAG: &str = "replay-pending-mutations";

/// Outcome of one drain cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
  pub replayed: usize,
  pub remaining: usize,
}

/// Drains the mutation queue in order when triggered.
pub struct SyncCoordinator {
  queue: Arc<MutationQueue>,
}

impl SyncCoordinator {
  pub fn new(queue: Arc<MutationQueue>) -> Self {
    Self { queue }
  }

  /// Replay pending mutations in insertion order.
  ///
  /// Each entry is re-issued exactly as captured. A received response —
  /// whatever its status — counts as delivered and removes the entry; a
  /// connectivity failure stops the whole cycle, leaving that entry and all
  /// later ones in place. Entries enqueued while a cycle runs are not part
  /// of it. Draining an empty queue is a no-op and the call is safe to
  /// repeat at any time.
  pub async fn drain<T: Transport>(&self, transport: &T) -> Result<DrainReport> {
    let entries = self.queue.oldest_first()?;
    if entries.is_empty() {
      return Ok(DrainReport {
        replayed: 0,
        remaining: 0,
      });
    }

    debug!(pending = entries.len(), "draining captured mutations");

    let mut replayed = 0;
    for entry in &entries {
      match transport.execute(&entry.to_request()).await {
        Ok(response) => {
          if !response.is_success() {
            warn!(
              id = entry.id,
              status = response.status,
              "replayed mutation rejected by server"
            );
          }
          self.queue.delete(entry.id)?;
          replayed += 1;
        }
        Err(e) => {
          info!(
            id = entry.id,
            enqueued_at = %entry.enqueued_at,
            "replay failed, stopping drain: {}", e
          );
          break;
        }
      }
    }

    let remaining = self.queue.len()?;
    if replayed > 0 {
      info!(replayed, remaining, "drain cycle complete");
    }

    Ok(DrainReport { replayed, remaining })
  }
}
