//! Engine events.
//!
//! The engine is event-driven: the host environment injects connectivity
//! signals and push payloads as JSON lines on stdin, and an internal timer
//! produces the periodic wake-up tag.

use serde::Deserialize;
use std::time::Duration;
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;
use tracing::warn;

use crate::connectivity::ConnectivityState;
use crate::fetch::FetchRequest;
use crate::queue::SYNC_WAKE_TAG;

/// Events delivered to the engine's run loop.
#[derive(Debug)]
pub enum Event {
  /// An intercepted request to serve; the reply goes back on stdout under
  /// the same id.
  Fetch {
    id: Option<i64>,
    request: FetchRequest,
  },
  /// The host observed the network becoming reachable or unreachable.
  Connectivity(ConnectivityState),
  /// A named periodic wake-up; only the sync tag triggers a drain.
  Wake(String),
  /// An opaque push payload to surface to the user.
  Push(serde_json::Value),
  /// Stop the run loop.
  Shutdown,
}

/// One JSON line on the control channel.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ControlMessage {
  Fetch {
    #[serde(default)]
    id: Option<i64>,
    request: FetchRequest,
  },
  Connectivity { state: String },
  Push { payload: serde_json::Value },
  Wake { tag: String },
  Shutdown,
}

impl ControlMessage {
  fn into_event(self) -> Option<Event> {
    match self {
      ControlMessage::Fetch { id, request } => Some(Event::Fetch { id, request }),
      ControlMessage::Connectivity { state } => match state.as_str() {
        "online" => Some(Event::Connectivity(ConnectivityState::Online)),
        "offline" => Some(Event::Connectivity(ConnectivityState::Offline)),
        other => {
          warn!("unknown connectivity state: {}", other);
          None
        }
      },
      ControlMessage::Push { payload } => Some(Event::Push(payload)),
      ControlMessage::Wake { tag } => Some(Event::Wake(tag)),
      ControlMessage::Shutdown => Some(Event::Shutdown),
    }
  }
}

/// Event source merging the host control channel with the wake-up timer.
pub struct EventHandler {
  rx: mpsc::UnboundedReceiver<Event>,
  tx: mpsc::UnboundedSender<Event>,
}

impl EventHandler {
  /// Create an event handler with the given wake-up period.
  pub fn new(wake_interval: Duration) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();

    // Periodic wake-up tag
    let wake_tx = tx.clone();
    tokio::spawn(async move {
      let mut interval = tokio::time::interval(wake_interval);
      // The first tick fires immediately; the boot path already drains
      interval.tick().await;
      loop {
        interval.tick().await;
        if wake_tx
          .send(Event::Wake(SYNC_WAKE_TAG.to_string()))
          .is_err()
        {
          break;
        }
      }
    });

    // Host control channel: one JSON message per stdin line
    let control_tx = tx.clone();
    tokio::spawn(async move {
      let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
      while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
          continue;
        }
        match serde_json::from_str::<ControlMessage>(&line) {
          Ok(message) => {
            if let Some(event) = message.into_event() {
              if control_tx.send(event).is_err() {
                break;
              }
            }
          }
          Err(e) => warn!("malformed control message: {}", e),
        }
      }
    });

    Self { rx, tx }
  }

  /// Sender for injecting events outside the control channel (signal
  /// handlers, tests).
  pub fn sender(&self) -> mpsc::UnboundedSender<Event> {
    self.tx.clone()
  }

  /// Receive the next event.
  pub async fn next(&mut self) -> Option<Event> {
    self.rx.recv().await
  }
}
