//! Push notification boundary.
//!
//! Not part of the cache/queue core — the engine merely receives an opaque
//! payload from the host, surfaces it, and resolves the click target.

use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use tracing::info;

/// An incoming push payload.
#[derive(Debug, Clone, Deserialize)]
pub struct PushPayload {
  pub title: String,
  pub body: String,
  pub url: String,
}

impl PushPayload {
  pub fn parse(raw: &serde_json::Value) -> Result<Self> {
    serde_json::from_value(raw.clone()).map_err(|e| eyre!("Malformed push payload: {}", e))
  }

  /// Where a click on the surfaced notification routes to.
  pub fn click_target(&self) -> &str {
    &self.url
  }
}

/// Surface a notification to the user.
pub fn surface(payload: &PushPayload) {
  info!(
    title = %payload.title,
    body = %payload.body,
    url = %payload.click_target(),
    "push notification"
  );
}
