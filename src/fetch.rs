//! Request/response model and the network transport.
//!
//! Every request the engine intercepts is represented as a [`FetchRequest`];
//! everything stored in or served from the cache is a [`ResponseSnapshot`].
//! Snapshots are immutable values: once stored they are returned verbatim,
//! never re-derived.
//!
//! The error taxonomy is deliberately narrow: a [`FetchError`] means the
//! network (or the request itself) failed before a response existed.
//! Application errors are ordinary `Ok` snapshots with a non-2xx status and
//! are surfaced to the caller untouched.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;
use url::Url;

/// An intercepted outbound request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchRequest {
  pub method: String,
  pub url: String,
  #[serde(default)]
  pub headers: BTreeMap<String, String>,
  #[serde(default)]
  pub body: Option<Vec<u8>>,
}

impl FetchRequest {
  /// Build a plain GET request with no headers or body.
  pub fn get(url: impl Into<String>) -> Self {
    Self {
      method: "GET".to_string(),
      url: url.into(),
      headers: BTreeMap::new(),
      body: None,
    }
  }

  /// Whether this request has read semantics.
  ///
  /// Reads are never queued for replay; everything else carries
  /// create/update/delete semantics.
  pub fn is_read(&self) -> bool {
    matches!(self.method.to_uppercase().as_str(), "GET" | "HEAD")
  }
}

/// An immutable stored copy of a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseSnapshot {
  pub status: u16,
  pub headers: BTreeMap<String, String>,
  pub body: Vec<u8>,
  pub stored_at: DateTime<Utc>,
}

impl ResponseSnapshot {
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }
}

/// Failure before any response existed.
///
/// `Unreachable` and `Timeout` are connectivity failures and drive the
/// offline fallback paths; `Invalid` means the request itself could not be
/// issued and is never retried.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
  #[error("network unreachable: {0}")]
  Unreachable(String),
  #[error("network attempt exceeded {0:?}")]
  Timeout(Duration),
  #[error("invalid request: {0}")]
  Invalid(String),
}

impl FetchError {
  pub fn is_connectivity(&self) -> bool {
    matches!(self, FetchError::Unreachable(_) | FetchError::Timeout(_))
  }
}

/// The deterministic cache key for a request.
///
/// Derived from method + normalized URL: the fragment is always dropped and
/// the query string is dropped only when the route policy says the slot is
/// query-insensitive (static assets with cache-busting params). The method is
/// part of the hash input, so a navigation and an equivalent asset request
/// never collide with a different method on the same URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestSignature(String);

impl RequestSignature {
  pub fn derive(method: &str, url: &Url, keep_query: bool) -> Self {
    let mut normalized = url.clone();
    normalized.set_fragment(None);
    if !keep_query {
      normalized.set_query(None);
    }

    let input = format!("{} {}", method.to_uppercase(), normalized);

    // SHA256 hash for stable, fixed-length keys
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    Self(hex::encode(hasher.finalize()))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl std::fmt::Display for RequestSignature {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(&self.0)
  }
}

/// Transport seam for everything that issues real requests.
///
/// The production implementation is [`NetworkClient`]; tests substitute a
/// scripted double to simulate connectivity loss. The returned future must
/// be `Send` so background revalidation can run on a spawned task.
pub trait Transport: Send + Sync {
  fn execute(
    &self,
    request: &FetchRequest,
  ) -> impl Future<Output = std::result::Result<ResponseSnapshot, FetchError>> + Send;
}

/// HTTP transport with a bounded wait per attempt.
///
/// The deadline covers the full attempt (connect, response, body). A request
/// that exceeds it counts as a connectivity failure, which keeps the
/// network-first fallback path reachable even when the network black-holes.
#[derive(Clone)]
pub struct NetworkClient {
  client: reqwest::Client,
  deadline: Duration,
}

impl NetworkClient {
  pub fn new(deadline: Duration) -> Result<Self> {
    let client = reqwest::Client::builder()
      .build()
      .map_err(|e| eyre!("Failed to build HTTP client: {}", e))?;

    Ok(Self { client, deadline })
  }
}

impl Transport for NetworkClient {
  async fn execute(&self, request: &FetchRequest) -> std::result::Result<ResponseSnapshot, FetchError> {
    let method = reqwest::Method::from_bytes(request.method.to_uppercase().as_bytes())
      .map_err(|_| FetchError::Invalid(format!("bad method: {}", request.method)))?;
    let url = Url::parse(&request.url)
      .map_err(|e| FetchError::Invalid(format!("bad url {}: {}", request.url, e)))?;

    let attempt = async {
      let mut builder = self.client.request(method, url);
      for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
      }
      if let Some(body) = &request.body {
        builder = builder.body(body.clone());
      }

      let response = builder
        .send()
        .await
        .map_err(|e| FetchError::Unreachable(e.to_string()))?;

      let status = response.status().as_u16();
      let mut headers = BTreeMap::new();
      for (name, value) in response.headers() {
        if let Ok(v) = value.to_str() {
          headers.insert(name.to_string(), v.to_string());
        }
      }
      let body = response
        .bytes()
        .await
        .map_err(|e| FetchError::Unreachable(e.to_string()))?
        .to_vec();

      Ok(ResponseSnapshot {
        status,
        headers,
        body,
        stored_at: Utc::now(),
      })
    };

    match tokio::time::timeout(self.deadline, attempt).await {
      Ok(result) => result,
      Err(_) => Err(FetchError::Timeout(self.deadline)),
    }
  }
}
