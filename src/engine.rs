//! The resident worker: request interception, mutation capture, and the
//! event loop that triggers queue drains.
//!
//! Every outbound request from the application passes through
//! [`Engine::handle_fetch`], which routes it to a strategy. Mutations that
//! fail while offline are captured into the durable queue and acknowledged
//! with a synthesized payload the caller must read as "accepted, pending
//! sync" — `offline: true` distinguishes it from a real server rejection.

use chrono::Utc;
use color_eyre::Result;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{GenerationStore, Served, ServeSource, StrategyLayer};
use crate::config::RouteConfig;
use crate::connectivity::{ConnectivityMonitor, ConnectivityState, Transition};
use crate::event::{Event, EventHandler};
use crate::fetch::{FetchError, FetchRequest, RequestSignature, ResponseSnapshot, Transport};
use crate::notify::{self, PushPayload};
use crate::queue::{MutationQueue, SyncCoordinator, SYNC_WAKE_TAG};
use crate::router::{PolicyRouter, RouteClass};

/// The offline-first cache-and-mutation-sync engine.
pub struct Engine<S: GenerationStore, T> {
  router: PolicyRouter,
  strategies: StrategyLayer<S>,
  store: Arc<S>,
  queue: Arc<MutationQueue>,
  sync: SyncCoordinator,
  net: T,
  origin: Url,
  offline_page_signature: Option<RequestSignature>,
}

impl<S, T> Engine<S, T>
where
  S: GenerationStore + 'static,
  T: Transport + Clone + Send + Sync + 'static,
{
  pub fn new(
    store: Arc<S>,
    queue: Arc<MutationQueue>,
    net: T,
    origin: Url,
    routes: &RouteConfig,
    offline_page: &str,
  ) -> Self {
    let offline_page_signature = origin
      .join(offline_page)
      .ok()
      .map(|url| RequestSignature::derive("GET", &url, true));

    Self {
      router: PolicyRouter::new(origin.clone(), routes),
      strategies: StrategyLayer::new(Arc::clone(&store)),
      store,
      sync: SyncCoordinator::new(Arc::clone(&queue)),
      queue,
      net,
      origin,
      offline_page_signature,
    }
  }

  /// Serve one intercepted request.
  ///
  /// An `Err` here means the network failed and the engine had nothing to
  /// offer instead (a static asset miss, or a bypassed request); every
  /// offline fallback and captured mutation comes back as `Ok`.
  pub async fn handle_fetch(&self, request: FetchRequest) -> Result<Served, FetchError> {
    let class = self.router.classify(&request);

    match class {
      RouteClass::Bypass => self.net.execute(&request).await.map(Served::network),

      RouteClass::StaticAsset => {
        let signature = self.signature(&request, class)?;
        let net = self.net.clone();
        let req = request.clone();
        self
          .strategies
          .cache_first(&signature, move || async move { net.execute(&req).await })
          .await
      }

      RouteClass::ApiCall if !request.is_read() => self.capture_mutation(request).await,

      RouteClass::ApiCall | RouteClass::NavigationOrOther => {
        let signature = self.signature(&request, class)?;
        let net = self.net.clone();
        let req = request.clone();
        match self
          .strategies
          .network_first(&signature, move || async move { net.execute(&req).await })
          .await
        {
          Ok(served) => Ok(served),
          Err(e) if e.is_connectivity() => Ok(self.offline_response(class)),
          Err(e) => Err(e),
        }
      }
    }
  }

  /// Mutation path: network, or capture for replay.
  ///
  /// Only connectivity failures are captured. An application error means
  /// the server saw the request and rejected it — that is surfaced
  /// verbatim, never queued.
  async fn capture_mutation(&self, request: FetchRequest) -> Result<Served, FetchError> {
    match self.net.execute(&request).await {
      Ok(snapshot) => Ok(Served::network(snapshot)),
      Err(e) if e.is_connectivity() => match self.queue.push(&request) {
        Ok(entry) => {
          info!(
            id = entry.id,
            method = %request.method,
            url = %request.url,
            "mutation captured for replay"
          );
          Ok(Served {
            snapshot: offline_payload("offline: request captured for sync"),
            source: ServeSource::Captured,
          })
        }
        Err(store_err) => {
          // Queue unavailable: behave as if the engine were not there
          warn!("mutation capture failed: {}", store_err);
          Err(e)
        }
      },
      Err(e) => Err(e),
    }
  }

  /// Last-resort response once the network failed and the cache missed.
  fn offline_response(&self, class: RouteClass) -> Served {
    if class == RouteClass::NavigationOrOther {
      if let Some(signature) = &self.offline_page_signature {
        match self.store.get_active(signature) {
          Ok(Some(snapshot)) => {
            return Served {
              snapshot,
              source: ServeSource::OfflineFallback,
            }
          }
          Ok(None) => {}
          Err(e) => warn!("offline page lookup failed: {}", e),
        }
      }
    }

    Served {
      snapshot: offline_payload("offline: no cached response"),
      source: ServeSource::OfflineFallback,
    }
  }

  fn signature(&self, request: &FetchRequest, class: RouteClass) -> Result<RequestSignature, FetchError> {
    let url = Url::parse(&request.url)
      .map_err(|e| FetchError::Invalid(format!("bad url {}: {}", request.url, e)))?;
    Ok(RequestSignature::derive(
      &request.method,
      &url,
      class.query_sensitive(),
    ))
  }

  /// Recompute connectivity from a live signal against the origin.
  async fn probe_origin(&self) -> ConnectivityState {
    let mut request = FetchRequest::get(self.origin.as_str());
    request.method = "HEAD".to_string();
    match self.net.execute(&request).await {
      Ok(_) => ConnectivityState::Online,
      Err(_) => ConnectivityState::Offline,
    }
  }

  async fn drain(&self) {
    match self.sync.drain(&self.net).await {
      Ok(report) if report.remaining > 0 => {
        debug!(
          replayed = report.replayed,
          remaining = report.remaining,
          "mutations still pending after drain"
        );
      }
      Ok(_) => {}
      Err(e) => warn!("drain failed: {}", e),
    }
  }

  /// Event loop: serves intercepted requests, drains the queue on
  /// connectivity-restored signals and on the periodic wake-up tag, and
  /// surfaces push payloads.
  pub async fn run(self: Arc<Self>, events: &mut EventHandler) -> Result<()> {
    let initial = self.probe_origin().await;
    info!(online = initial.is_online(), "connectivity probed");
    let mut monitor = ConnectivityMonitor::new(initial);

    // Mutations captured before the last shutdown may still be pending
    if monitor.state().is_online() {
      self.drain().await;
    }

    while let Some(event) = events.next().await {
      match event {
        Event::Fetch { id, request } => {
          // Fetches overlap: each progresses independently while the loop
          // keeps consuming events
          let engine = Arc::clone(&self);
          tokio::spawn(async move {
            let result = engine.handle_fetch(request).await;
            println!("{}", fetch_reply(id, &result));
          });
        }
        Event::Connectivity(state) => {
          if monitor.observe(state) == Some(Transition::CameOnline) {
            info!("connectivity restored");
            self.drain().await;
          }
        }
        Event::Wake(tag) => {
          // The wake-up tag exists to give the coordinator a chance to
          // drain without a connectivity signal, so it is not gated on the
          // believed state; an empty queue makes this a no-op.
          if tag == SYNC_WAKE_TAG {
            self.drain().await;
          }
        }
        Event::Push(raw) => match PushPayload::parse(&raw) {
          Ok(payload) => notify::surface(&payload),
          Err(e) => warn!("{}", e),
        },
        Event::Shutdown => {
          info!("shutting down");
          break;
        }
      }
    }

    Ok(())
  }
}

/// One reply line on stdout per fetch event.
fn fetch_reply(id: Option<i64>, result: &Result<Served, FetchError>) -> serde_json::Value {
  match result {
    Ok(served) => serde_json::json!({
      "id": id,
      "status": served.snapshot.status,
      "headers": served.snapshot.headers,
      "body": served.snapshot.body,
      "source": served.source.as_str(),
    }),
    Err(e) => serde_json::json!({
      "id": id,
      "error": e.to_string(),
    }),
  }
}

/// The synthesized offline payload: `offline: true` tells the caller this is
/// not a server rejection.
fn offline_payload(error: &str) -> ResponseSnapshot {
  let body = serde_json::json!({
    "error": error,
    "offline": true,
    "cached": false,
  });

  let mut headers = BTreeMap::new();
  headers.insert("content-type".to_string(), "application/json".to_string());

  ResponseSnapshot {
    status: 503,
    headers,
    body: serde_json::to_vec(&body).unwrap_or_default(),
    stored_at: Utc::now(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::SqliteStore;
  use std::sync::atomic::{AtomicBool, Ordering};
  use std::time::Duration;

  /// Transport double: echoes requests while "online", unreachable while
  /// not.
  #[derive(Clone)]
  struct TestNet {
    online: Arc<AtomicBool>,
    status: u16,
  }

  impl TestNet {
    fn online(status: u16) -> Self {
      Self {
        online: Arc::new(AtomicBool::new(true)),
        status,
      }
    }

    fn offline() -> Self {
      Self {
        online: Arc::new(AtomicBool::new(false)),
        status: 200,
      }
    }

    fn set_online(&self, online: bool) {
      self.online.store(online, Ordering::SeqCst);
    }
  }

  impl Transport for TestNet {
    async fn execute(&self, request: &FetchRequest) -> Result<ResponseSnapshot, FetchError> {
      if !self.online.load(Ordering::SeqCst) {
        return Err(FetchError::Unreachable("no route to host".to_string()));
      }
      Ok(ResponseSnapshot {
        status: self.status,
        headers: BTreeMap::new(),
        body: format!("echo {} {}", request.method, request.url).into_bytes(),
        stored_at: Utc::now(),
      })
    }
  }

  fn active_store() -> Arc<SqliteStore> {
    let store = SqliteStore::in_memory().unwrap();
    store.commit_precache("shell-v1", &[]).unwrap();
    store.activate("shell-v1").unwrap();
    Arc::new(store)
  }

  fn engine(store: Arc<SqliteStore>, net: TestNet) -> Engine<SqliteStore, TestNet> {
    Engine::new(
      store,
      Arc::new(MutationQueue::in_memory().unwrap()),
      net,
      Url::parse("https://app.example.com").unwrap(),
      &RouteConfig::default(),
      "/offline.html",
    )
  }

  fn post(url: &str, body: &str) -> FetchRequest {
    let mut request = FetchRequest::get(url);
    request.method = "POST".to_string();
    request.body = Some(body.as_bytes().to_vec());
    request
  }

  fn payload_fields(snapshot: &ResponseSnapshot) -> (String, bool, bool) {
    let value: serde_json::Value = serde_json::from_slice(&snapshot.body).unwrap();
    (
      value["error"].as_str().unwrap().to_string(),
      value["offline"].as_bool().unwrap(),
      value["cached"].as_bool().unwrap(),
    )
  }

  #[tokio::test]
  async fn test_offline_mutation_is_captured() {
    let engine = engine(active_store(), TestNet::offline());
    let request = post("https://app.example.com/api/jobs", r#"{"title":"fix sink"}"#);

    let served = engine.handle_fetch(request.clone()).await.unwrap();

    assert_eq!(served.source, ServeSource::Captured);
    assert_eq!(served.snapshot.status, 503);
    let (_, offline, cached) = payload_fields(&served.snapshot);
    assert!(offline);
    assert!(!cached);

    // Exactly one entry, matching the original request
    let entries = engine.queue.oldest_first().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].method, "POST");
    assert_eq!(entries[0].url, "https://app.example.com/api/jobs");
    assert_eq!(entries[0].body, request.body);
  }

  #[tokio::test]
  async fn test_online_mutation_passes_through() {
    let engine = engine(active_store(), TestNet::online(201));
    let served = engine
      .handle_fetch(post("https://app.example.com/api/jobs", "{}"))
      .await
      .unwrap();

    assert_eq!(served.source, ServeSource::Network);
    assert_eq!(served.snapshot.status, 201);
    assert_eq!(engine.queue.len().unwrap(), 0);
  }

  #[tokio::test]
  async fn test_rejected_mutation_is_never_queued() {
    let engine = engine(active_store(), TestNet::online(422));
    let served = engine
      .handle_fetch(post("https://app.example.com/api/jobs", "{}"))
      .await
      .unwrap();

    // The server saw it; surfaced verbatim
    assert_eq!(served.snapshot.status, 422);
    assert_eq!(engine.queue.len().unwrap(), 0);
  }

  #[tokio::test]
  async fn test_offline_api_read_synthesizes_payload() {
    let engine = engine(active_store(), TestNet::offline());
    let served = engine
      .handle_fetch(FetchRequest::get("https://app.example.com/api/jobs"))
      .await
      .unwrap();

    assert_eq!(served.source, ServeSource::OfflineFallback);
    assert_eq!(served.snapshot.status, 503);
    let (_, offline, cached) = payload_fields(&served.snapshot);
    assert!(offline);
    assert!(!cached);
    assert_eq!(engine.queue.len().unwrap(), 0);
  }

  #[tokio::test]
  async fn test_offline_api_read_prefers_cache() {
    let store = active_store();
    let engine = engine(Arc::clone(&store), TestNet::offline());

    let url = Url::parse("https://app.example.com/api/jobs").unwrap();
    let signature = RequestSignature::derive("GET", &url, true);
    store
      .put_active(
        &signature,
        &ResponseSnapshot {
          status: 200,
          headers: BTreeMap::new(),
          body: b"[{\"id\":1}]".to_vec(),
          stored_at: Utc::now(),
        },
      )
      .unwrap();

    let served = engine
      .handle_fetch(FetchRequest::get("https://app.example.com/api/jobs"))
      .await
      .unwrap();

    assert_eq!(served.source, ServeSource::OfflineCache);
    assert_eq!(served.snapshot.body, b"[{\"id\":1}]");
  }

  #[tokio::test]
  async fn test_offline_navigation_serves_offline_page() {
    let store = active_store();
    let offline_url = Url::parse("https://app.example.com/offline.html").unwrap();
    store
      .put_active(
        &RequestSignature::derive("GET", &offline_url, true),
        &ResponseSnapshot {
          status: 200,
          headers: BTreeMap::new(),
          body: b"<html>you are offline</html>".to_vec(),
          stored_at: Utc::now(),
        },
      )
      .unwrap();

    let engine = engine(store, TestNet::offline());
    let served = engine
      .handle_fetch(FetchRequest::get("https://app.example.com/invoices/42"))
      .await
      .unwrap();

    assert_eq!(served.source, ServeSource::OfflineFallback);
    assert_eq!(served.snapshot.body, b"<html>you are offline</html>");
  }

  #[tokio::test]
  async fn test_static_asset_signature_ignores_query() {
    let store = active_store();
    let engine = engine(Arc::clone(&store), TestNet::online(200));

    engine
      .handle_fetch(FetchRequest::get(
        "https://app.example.com/static/app.css?v=1",
      ))
      .await
      .unwrap();

    // The cache-busted and plain URLs share one slot
    let plain = Url::parse("https://app.example.com/static/app.css").unwrap();
    let signature = RequestSignature::derive("GET", &plain, false);
    assert!(store.get_active(&signature).unwrap().is_some());
  }

  #[tokio::test]
  async fn test_cross_origin_bypasses_cache_and_queue() {
    let store = active_store();
    let engine = engine(Arc::clone(&store), TestNet::online(200));

    let served = engine
      .handle_fetch(FetchRequest::get("https://cdn.other.com/lib.js"))
      .await
      .unwrap();

    assert_eq!(served.source, ServeSource::Network);
    assert_eq!(store.entry_count("shell-v1").unwrap(), 0);
  }

  #[tokio::test]
  async fn test_connectivity_restored_triggers_drain() {
    let net = TestNet::offline();
    let queue = Arc::new(MutationQueue::in_memory().unwrap());
    let engine = Arc::new(Engine::new(
      active_store(),
      Arc::clone(&queue),
      net.clone(),
      Url::parse("https://app.example.com").unwrap(),
      &RouteConfig::default(),
      "/offline.html",
    ));

    // Two mutations captured while offline
    engine
      .handle_fetch(post("https://app.example.com/api/jobs", "a"))
      .await
      .unwrap();
    engine
      .handle_fetch(post("https://app.example.com/api/jobs", "b"))
      .await
      .unwrap();
    assert_eq!(queue.len().unwrap(), 2);

    let mut events = EventHandler::new(Duration::from_secs(3600));
    let sender = events.sender();
    let worker = tokio::spawn(async move { engine.run(&mut events).await });

    // Let the boot probe observe the offline state
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(queue.len().unwrap(), 2);

    net.set_online(true);
    sender
      .send(Event::Connectivity(ConnectivityState::Online))
      .unwrap();
    sender.send(Event::Shutdown).unwrap();

    worker.await.unwrap().unwrap();
    assert_eq!(queue.len().unwrap(), 0);
  }
}
