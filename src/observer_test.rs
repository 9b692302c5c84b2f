//! # Observer Test Suite

use crate::observer::{Event, FnObserver, Observer, RecordingObserver, TracingObserver};
use std::sync::atomic::{AtomicUsize, Ordering};

#[test]
fn test_event_builder() {
  let event = Event::new("edge.overflow")
    .node("g/sink")
    .edge("g/src.out -> g/sink.in")
    .field("policy", "drop")
    .field("depth", 4);
  assert_eq!(event.node.as_deref(), Some("g/sink"));
  assert_eq!(event.edge.as_deref(), Some("g/src.out -> g/sink.in"));
  assert_eq!(event.get("policy"), Some("drop"));
  assert_eq!(event.get("depth"), Some("4"));
  assert_eq!(event.get("missing"), None);
}

#[test]
fn test_recording_observer() {
  let observer = RecordingObserver::new();
  observer.on_event(&Event::new("node.started").node("a"));
  observer.on_event(&Event::new("node.started").node("b"));
  observer.on_event(&Event::new("node.stopped").node("a"));
  assert_eq!(observer.events().len(), 3);
  assert_eq!(observer.count("node.started"), 2);
  assert_eq!(observer.named("node.stopped")[0].node.as_deref(), Some("a"));
}

#[test]
fn test_fn_observer() {
  let seen = AtomicUsize::new(0);
  let observer = FnObserver::new(|event: &Event| {
    if event.name == "node.faulted" {
      seen.fetch_add(1, Ordering::SeqCst);
    }
  });
  observer.on_event(&Event::new("node.faulted"));
  observer.on_event(&Event::new("node.started"));
  assert_eq!(seen.load(Ordering::SeqCst), 1);
}

#[test]
fn test_tracing_observer_accepts_events() {
  TracingObserver.on_event(&Event::new("scheduler.forced_shutdown").field("undelivered", 3));
  TracingObserver.on_event(&Event::new("node.started").node("a"));
}

#[test]
fn test_event_serializes_without_payload() {
  let event = Event::new("node.faulted").node("a").field("kind", "panic");
  let json = serde_json::to_value(&event).unwrap();
  assert_eq!(json["name"], "node.faulted");
  assert_eq!(json["node"], "a");
  assert_eq!(json["fields"][0][0], "kind");
}
