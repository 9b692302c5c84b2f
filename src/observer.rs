//! Observability sink for runtime events.
//!
//! The scheduler and edges report lifecycle transitions, overflow occurrences and
//! node faults as structured [`Event`]s to an [`Observer`]. The observer is handed
//! to the scheduler at construction and passed down explicitly; nothing here is
//! global.
//!
//! [`TracingObserver`] is the default and forwards events to `tracing`.
//! [`RecordingObserver`] keeps them in memory, which is what the tests use.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{info, warn};

/// A structured runtime event.
#[derive(Clone, Debug, Serialize)]
pub struct Event {
  /// Event name, e.g. `node.started` or `edge.overflow`.
  pub name: &'static str,
  /// Qualified node name, when the event concerns a node.
  pub node: Option<String>,
  /// Edge label, when the event concerns an edge.
  pub edge: Option<String>,
  /// Additional key/value fields. Never contains payloads.
  pub fields: Vec<(&'static str, String)>,
  /// Wall-clock time the event was raised.
  pub at: DateTime<Utc>,
}

impl Event {
  /// Creates an event with no subject.
  pub fn new(name: &'static str) -> Self {
    Self {
      name,
      node: None,
      edge: None,
      fields: Vec::new(),
      at: Utc::now(),
    }
  }

  /// Sets the node the event concerns.
  #[must_use]
  pub fn node(mut self, node: impl Into<String>) -> Self {
    self.node = Some(node.into());
    self
  }

  /// Sets the edge the event concerns.
  #[must_use]
  pub fn edge(mut self, edge: impl Into<String>) -> Self {
    self.edge = Some(edge.into());
    self
  }

  /// Adds a field.
  #[must_use]
  pub fn field(mut self, key: &'static str, value: impl fmt::Display) -> Self {
    self.fields.push((key, value.to_string()));
    self
  }

  /// Looks up a field value.
  pub fn get(&self, key: &str) -> Option<&str> {
    self
      .fields
      .iter()
      .find(|(k, _)| *k == key)
      .map(|(_, v)| v.as_str())
  }
}

/// Receives runtime events.
///
/// Implementations must be cheap and must not block: they are called from the
/// scheduler loop and from producer tasks pushing onto edges.
pub trait Observer: Send + Sync {
  /// Called once per event.
  fn on_event(&self, event: &Event);
}

/// Shared observer handle.
pub type SharedObserver = Arc<dyn Observer>;

/// Forwards events to `tracing`. Faults, overflow and forced shutdowns are
/// logged at `warn`, everything else at `info`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingObserver;

impl Observer for TracingObserver {
  fn on_event(&self, event: &Event) {
    let node = event.node.as_deref().unwrap_or("-");
    let edge = event.edge.as_deref().unwrap_or("-");
    let fields = event
      .fields
      .iter()
      .map(|(k, v)| format!("{k}={v}"))
      .collect::<Vec<_>>()
      .join(" ");
    match event.name {
      "edge.overflow" | "edge.discarded" | "node.faulted" | "node.start_failed"
      | "node.stop_failed" | "scheduler.forced_shutdown" => {
        warn!(event = event.name, node, edge, "{}", fields);
      }
      _ => info!(event = event.name, node, edge, "{}", fields),
    }
  }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingObserver {
  events: Mutex<Vec<Event>>,
}

impl RecordingObserver {
  /// Creates an empty recorder.
  pub fn new() -> Self {
    Self::default()
  }

  /// A copy of all recorded events, in order.
  pub fn events(&self) -> Vec<Event> {
    self
      .events
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .clone()
  }

  /// Recorded events with the given name.
  pub fn named(&self, name: &str) -> Vec<Event> {
    self
      .events()
      .into_iter()
      .filter(|e| e.name == name)
      .collect()
  }

  /// Number of recorded events with the given name.
  pub fn count(&self, name: &str) -> usize {
    self.named(name).len()
  }
}

impl Observer for RecordingObserver {
  fn on_event(&self, event: &Event) {
    self
      .events
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .push(event.clone());
  }
}

/// Adapts a closure into an [`Observer`].
pub struct FnObserver<F>(F);

impl<F> FnObserver<F>
where
  F: Fn(&Event) + Send + Sync,
{
  /// Wraps `f`.
  pub fn new(f: F) -> Self {
    Self(f)
  }
}

impl<F> Observer for FnObserver<F>
where
  F: Fn(&Event) + Send + Sync,
{
  fn on_event(&self, event: &Event) {
    (self.0)(event)
  }
}
