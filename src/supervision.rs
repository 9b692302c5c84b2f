//! Per-node failure handling.
//!
//! Defines what the scheduler does when a node's `on_tick` or `on_message`
//! returns an error or panics: halt the whole run, isolate the node, or turn the
//! failure into a control message on the node's error output.

use crate::message::Message;
use serde::{Deserialize, Serialize};

/// Default name of the output port that receives [`NodeFault`] messages.
pub const DEFAULT_ERROR_PORT: &str = "error";

/// Action to take when a node fails while handling a tick or a message.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub enum ErrorPolicy {
  /// Halt the scheduler and surface a `SchedulerError::Fault` from `run()`.
  Propagate,
  /// Mark the node faulted, stop delivering to it, keep the rest running.
  #[default]
  Isolate,
  /// Emit a [`NodeFault`] control message on the node's error port and keep going.
  EmitError,
}

/// Configuration object supplied by a node at construction time.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
  /// Failure policy for `on_tick`/`on_message`.
  pub error_policy: ErrorPolicy,
  /// Output port receiving [`NodeFault`] messages under [`ErrorPolicy::EmitError`].
  pub error_port: String,
}

impl NodeConfig {
  /// Creates a config with the given policy and the default error port.
  pub fn new(error_policy: ErrorPolicy) -> Self {
    Self {
      error_policy,
      error_port: DEFAULT_ERROR_PORT.to_string(),
    }
  }

  /// Sets the error port.
  pub fn with_error_port(mut self, port: impl Into<String>) -> Self {
    self.error_port = port.into();
    self
  }
}

impl Default for NodeConfig {
  fn default() -> Self {
    Self::new(ErrorPolicy::default())
  }
}

/// Control-plane payload describing a node failure.
///
/// Carries identifiers and the error kind only, never the message that was being
/// handled.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct NodeFault {
  /// Qualified name of the failing node.
  pub node_id: String,
  /// Error kind tag.
  pub error_kind: String,
}

impl NodeFault {
  /// Wraps the fault in a control message, mirroring the fields as metadata.
  pub fn into_message(self) -> Message {
    let node_id = self.node_id.clone();
    let error_kind = self.error_kind.clone();
    Message::control(self)
      .with_metadata("node_id", node_id)
      .with_metadata("error_kind", error_kind)
  }
}
