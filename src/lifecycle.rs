//! Generation lifecycle: install, activate, garbage-collect.
//!
//! Install precaches a fixed manifest into a new named generation; the
//! generation only becomes visible once every manifest item fetched
//! successfully. Activation deletes every other generation and flips the
//! active marker in one transaction, so storage holds at most two
//! generations during the cutover window and readers never observe a torn
//! one. Because the active marker lives in the shared store, every existing
//! caller is adopted by the new generation the moment it flips — not just
//! callers created after activation.

use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

use crate::cache::{GenerationState, GenerationStore};
use crate::fetch::{FetchRequest, RequestSignature, ResponseSnapshot, Transport};

/// Installs and activates the configured cache generation.
pub struct LifecycleManager<S, T> {
  store: Arc<S>,
  net: T,
  origin: Url,
  generation: String,
  manifest: Vec<String>,
}

impl<S: GenerationStore, T: Transport> LifecycleManager<S, T> {
  pub fn new(store: Arc<S>, net: T, origin: Url, generation: String, manifest: Vec<String>) -> Self {
    Self {
      store,
      net,
      origin,
      generation,
      manifest,
    }
  }

  /// Bring the configured generation to the active state.
  ///
  /// A failure anywhere leaves the previously active generation serving:
  /// install aborts before anything is visible, and a failed activation is
  /// simply retried on the next boot.
  pub async fn boot(&self) -> Result<()> {
    let stored = self.store.list_generations()?;

    if let Some(record) = stored.iter().find(|r| r.name == self.generation) {
      match record.state {
        GenerationState::Active => {
          let entries = self.store.entry_count(&record.name)?;
          info!(generation = %record.name, entries, "cache generation already active");
          return Ok(());
        }
        GenerationState::Installed => {
          // Installed on a previous boot but never cut over; retry the
          // activation without refetching the manifest
          debug!(
            generation = %record.name,
            installed_at = %record.created_at,
            "retrying activation of installed generation"
          );
          self.store.activate(&self.generation)?;
          info!(generation = %self.generation, "cache generation activated");
          return Ok(());
        }
      }
    }

    if let Some(active) = stored.iter().find(|r| r.state == GenerationState::Active) {
      debug!(
        old = %active.name,
        new = %self.generation,
        "cache generation superseded, reinstalling"
      );
    }

    let entries = self.install().await?;
    self.store.commit_precache(&self.generation, &entries)?;
    info!(
      generation = %self.generation,
      entries = entries.len(),
      "cache generation installed"
    );

    self.store.activate(&self.generation)?;
    info!(generation = %self.generation, "cache generation activated");

    Ok(())
  }

  /// Fetch every manifest item, all-or-nothing.
  async fn install(&self) -> Result<Vec<(RequestSignature, ResponseSnapshot)>> {
    debug!(
      generation = %self.generation,
      manifest = self.manifest.len(),
      "installing cache generation"
    );

    let fetches = self.manifest.iter().map(|path| {
      let url = self
        .origin
        .join(path)
        .map_err(|e| eyre!("Bad precache path {}: {}", path, e));

      async move {
        let url = url?;
        let snapshot = self
          .net
          .execute(&FetchRequest::get(url.as_str()))
          .await
          .map_err(|e| eyre!("Failed to precache {}: {}", path, e))?;

        if snapshot.status != 200 {
          return Err(eyre!("Precache of {} returned status {}", path, snapshot.status));
        }

        Ok((RequestSignature::derive("GET", &url, true), snapshot))
      }
    });

    futures::future::try_join_all(fetches).await
  }
}
