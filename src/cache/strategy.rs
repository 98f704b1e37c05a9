//! The two fetch strategies, orchestrating the generation store and the
//! network.
//!
//! Both strategies take the network as a closure returning a future, so the
//! callers decide what "the network" is (the real transport in production, a
//! scripted double in tests). A storage failure never fails the request: the
//! strategy logs it and degrades to plain pass-through network behavior.

use std::future::Future;
use std::sync::Arc;
use tracing::warn;

use super::traits::{GenerationStore, Served};
use crate::fetch::{FetchError, RequestSignature, ResponseSnapshot};

/// Strategy layer over the active cache generation.
///
/// This sits between the policy router and the network, serving each request
/// class with its configured freshness/latency tradeoff.
pub struct StrategyLayer<S: GenerationStore> {
  store: Arc<S>,
}

impl<S: GenerationStore + 'static> StrategyLayer<S> {
  pub fn new(store: Arc<S>) -> Self {
    Self { store }
  }

  /// Cache-first: serve a stored snapshot immediately, revalidate behind the
  /// caller's back.
  ///
  /// 1. Hit: return the snapshot without touching the network, then issue
  ///    the request fire-and-forget; a fresh 200 overwrites the entry, any
  ///    failure leaves it untouched.
  /// 2. Miss: fetch synchronously, store on 200, return the response.
  ///    A connectivity failure propagates — static assets have no offline
  ///    substitute.
  pub async fn cache_first<F, Fut>(
    &self,
    signature: &RequestSignature,
    fetcher: F,
  ) -> Result<Served, FetchError>
  where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<ResponseSnapshot, FetchError>> + Send + 'static,
  {
    let cached = match self.store.get_active(signature) {
      Ok(cached) => cached,
      Err(e) => {
        warn!("cache read failed, passing through: {}", e);
        None
      }
    };

    if let Some(snapshot) = cached {
      // The caller never blocks on revalidation; stale-but-valid beats
      // latency for this class.
      let store = Arc::clone(&self.store);
      let signature = signature.clone();
      tokio::spawn(async move {
        match fetcher().await {
          Ok(fresh) if fresh.status == 200 => {
            if let Err(e) = store.put_active(&signature, &fresh) {
              warn!("background revalidation write failed: {}", e);
            }
          }
          // Non-200 or unreachable: the existing entry stays as-is, and no
          // error surfaces since a valid response was already returned.
          Ok(_) | Err(_) => {}
        }
      });
      return Ok(Served::cache(snapshot));
    }

    let fresh = fetcher().await?;
    if fresh.status == 200 {
      if let Err(e) = self.store.put_active(signature, &fresh) {
        warn!("cache write failed: {}", e);
      }
    }
    Ok(Served::network(fresh))
  }

  /// Network-first: freshness wins whenever the network answers at all.
  ///
  /// Any received response — success or application error — is returned
  /// verbatim (200s are snapshotted first). Only a connectivity failure
  /// falls back to the cache; with no cached copy the failure propagates so
  /// the caller can synthesize its class-specific offline response.
  pub async fn network_first<F, Fut>(
    &self,
    signature: &RequestSignature,
    fetcher: F,
  ) -> Result<Served, FetchError>
  where
    F: FnOnce() -> Fut + Send,
    Fut: Future<Output = Result<ResponseSnapshot, FetchError>> + Send,
  {
    match fetcher().await {
      Ok(snapshot) => {
        if snapshot.status == 200 {
          if let Err(e) = self.store.put_active(signature, &snapshot) {
            warn!("cache write failed: {}", e);
          }
        }
        Ok(Served::network(snapshot))
      }
      Err(e) if e.is_connectivity() => match self.store.get_active(signature) {
        Ok(Some(snapshot)) => Ok(Served::offline_cache(snapshot)),
        Ok(None) => Err(e),
        Err(store_err) => {
          warn!("cache fallback read failed: {}", store_err);
          Err(e)
        }
      },
      Err(e) => Err(e),
    }
  }
}

impl<S: GenerationStore> Clone for StrategyLayer<S> {
  fn clone(&self) -> Self {
    Self {
      store: Arc::clone(&self.store),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::store::{NoopStore, SqliteStore};
  use crate::cache::traits::ServeSource;
  use chrono::Utc;
  use std::collections::BTreeMap;
  use std::sync::atomic::{AtomicU32, Ordering};
  use std::time::{Duration, Instant};
  use url::Url;

  fn signature(url: &str) -> RequestSignature {
    RequestSignature::derive("GET", &Url::parse(url).unwrap(), false)
  }

  fn snapshot(status: u16, body: &str) -> ResponseSnapshot {
    ResponseSnapshot {
      status,
      headers: BTreeMap::new(),
      body: body.as_bytes().to_vec(),
      stored_at: Utc::now(),
    }
  }

  fn active_store() -> Arc<SqliteStore> {
    let store = SqliteStore::in_memory().unwrap();
    store.commit_precache("shell-v1", &[]).unwrap();
    store.activate("shell-v1").unwrap();
    Arc::new(store)
  }

  #[tokio::test]
  async fn test_cache_first_miss_fetches_and_stores() {
    let store = active_store();
    let layer = StrategyLayer::new(Arc::clone(&store));
    let sig = signature("https://x/static/app.css");

    let served = layer
      .cache_first(&sig, || async { Ok(snapshot(200, "body {}")) })
      .await
      .unwrap();

    assert_eq!(served.source, ServeSource::Network);
    assert_eq!(store.get_active(&sig).unwrap().unwrap().body, b"body {}");
  }

  #[tokio::test]
  async fn test_cache_first_hit_serves_stale_then_updates() {
    let store = active_store();
    let layer = StrategyLayer::new(Arc::clone(&store));
    let sig = signature("https://x/static/app.css");
    store.put_active(&sig, &snapshot(200, "old")).unwrap();

    // Identical request still returns the old content while the update
    // happens in the background
    let served = layer
      .cache_first(&sig, || async { Ok(snapshot(200, "new")) })
      .await
      .unwrap();
    assert_eq!(served.source, ServeSource::Cache);
    assert_eq!(served.snapshot.body, b"old");

    // A subsequent request sees the revalidated content
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(store.get_active(&sig).unwrap().unwrap().body, b"new");
  }

  #[tokio::test]
  async fn test_cache_first_hit_does_not_wait_on_network() {
    let store = active_store();
    let layer = StrategyLayer::new(Arc::clone(&store));
    let sig = signature("https://x/static/app.css");
    store.put_active(&sig, &snapshot(200, "cached")).unwrap();

    let started = Instant::now();
    let served = layer
      .cache_first(&sig, || async {
        tokio::time::sleep(Duration::from_millis(500)).await;
        Ok(snapshot(200, "slow"))
      })
      .await
      .unwrap();

    assert_eq!(served.snapshot.body, b"cached");
    assert!(started.elapsed() < Duration::from_millis(250));
  }

  #[tokio::test]
  async fn test_cache_first_failed_revalidation_keeps_entry() {
    let store = active_store();
    let layer = StrategyLayer::new(Arc::clone(&store));
    let sig = signature("https://x/static/app.css");
    store.put_active(&sig, &snapshot(200, "cached")).unwrap();

    let served = layer
      .cache_first(&sig, || async {
        Err(FetchError::Unreachable("down".to_string()))
      })
      .await
      .unwrap();
    assert_eq!(served.snapshot.body, b"cached");

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(store.get_active(&sig).unwrap().unwrap().body, b"cached");
  }

  #[tokio::test]
  async fn test_cache_first_non_200_revalidation_keeps_entry() {
    let store = active_store();
    let layer = StrategyLayer::new(Arc::clone(&store));
    let sig = signature("https://x/static/app.css");
    store.put_active(&sig, &snapshot(200, "cached")).unwrap();

    layer
      .cache_first(&sig, || async { Ok(snapshot(500, "oops")) })
      .await
      .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(store.get_active(&sig).unwrap().unwrap().body, b"cached");
  }

  #[tokio::test]
  async fn test_cache_first_miss_propagates_failure() {
    let layer = StrategyLayer::new(active_store());
    let sig = signature("https://x/static/app.css");

    let result = layer
      .cache_first(&sig, || async {
        Err(FetchError::Unreachable("down".to_string()))
      })
      .await;

    assert!(matches!(result, Err(FetchError::Unreachable(_))));
  }

  #[tokio::test]
  async fn test_network_first_success_stores_snapshot() {
    let store = active_store();
    let layer = StrategyLayer::new(Arc::clone(&store));
    let sig = signature("https://x/api/jobs");

    let served = layer
      .network_first(&sig, || async { Ok(snapshot(200, "[]")) })
      .await
      .unwrap();

    assert_eq!(served.source, ServeSource::Network);
    assert!(store.get_active(&sig).unwrap().is_some());
  }

  #[tokio::test]
  async fn test_network_first_application_error_not_cached() {
    let store = active_store();
    let layer = StrategyLayer::new(Arc::clone(&store));
    let sig = signature("https://x/api/jobs");

    let served = layer
      .network_first(&sig, || async { Ok(snapshot(500, "boom")) })
      .await
      .unwrap();

    // Surfaced verbatim, never cached
    assert_eq!(served.snapshot.status, 500);
    assert!(store.get_active(&sig).unwrap().is_none());
  }

  #[tokio::test]
  async fn test_network_first_falls_back_to_cache() {
    let store = active_store();
    let layer = StrategyLayer::new(Arc::clone(&store));
    let sig = signature("https://x/api/jobs");
    store.put_active(&sig, &snapshot(200, "stale jobs")).unwrap();

    let served = layer
      .network_first(&sig, || async {
        Err(FetchError::Timeout(Duration::from_secs(10)))
      })
      .await
      .unwrap();

    assert_eq!(served.source, ServeSource::OfflineCache);
    assert_eq!(served.snapshot.body, b"stale jobs");
  }

  #[tokio::test]
  async fn test_network_first_no_cache_propagates() {
    let layer = StrategyLayer::new(active_store());
    let sig = signature("https://x/api/jobs");

    let result = layer
      .network_first(&sig, || async {
        Err(FetchError::Unreachable("down".to_string()))
      })
      .await;

    assert!(matches!(result, Err(FetchError::Unreachable(_))));
  }

  #[tokio::test]
  async fn test_network_always_wins_over_cache() {
    let store = active_store();
    let layer = StrategyLayer::new(Arc::clone(&store));
    let sig = signature("https://x/api/jobs");
    store.put_active(&sig, &snapshot(200, "stale")).unwrap();

    let served = layer
      .network_first(&sig, || async {
        // Slower than any cache read, but freshness still wins
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok(snapshot(200, "fresh"))
      })
      .await
      .unwrap();

    assert_eq!(served.source, ServeSource::Network);
    assert_eq!(served.snapshot.body, b"fresh");
  }

  #[tokio::test]
  async fn test_degrades_to_pass_through_without_storage() {
    let layer = StrategyLayer::new(Arc::new(NoopStore));
    let sig = signature("https://x/static/app.css");
    let fetches = Arc::new(AtomicU32::new(0));

    for _ in 0..2 {
      let fetches = Arc::clone(&fetches);
      let served = layer
        .cache_first(&sig, move || async move {
          fetches.fetch_add(1, Ordering::SeqCst);
          Ok(snapshot(200, "fresh"))
        })
        .await
        .unwrap();
      assert_eq!(served.source, ServeSource::Network);
    }

    // Nothing was retained, so every request went to the network
    assert_eq!(fetches.load(Ordering::SeqCst), 2);
  }
}
