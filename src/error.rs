//! # Error Handling System
//!
//! Error taxonomy for graph construction, edge backpressure, node lifecycle and
//! the scheduler loop.
//!
//! ## Overview
//!
//! - **WiringError**: an invalid `connect`, `add_node` or port exposure. Raised at
//!   graph-build time and fatal to that call only.
//! - **ConfigError**: the `InvalidConfiguration` kind. Non-positive capacity,
//!   weights or batch sizes, and malformed node configuration.
//! - **NodeInitError**: a node's `on_start` failed. Fatal to `run()`.
//! - **EdgeError**: an edge refused a message (`Full`, `Cancelled`) or a bounded
//!   Block push ran out of budget (`BackpressureTimeout`).
//! - **SchedulerError**: a fault that halted the loop (a `Propagate` node failure)
//!   or misuse of the scheduler lifecycle.
//!
//! ## Payload Privacy
//!
//! No error in this module carries message payloads. Errors name nodes, ports and
//! edges, plus a short error-kind tag produced by [`NodeError::kind`].

use std::borrow::Cow;
use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results carrying the crate [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Top-level error type covering every error kind the runtime raises.
#[derive(Debug, Error)]
pub enum Error {
  /// Invalid graph wiring.
  #[error(transparent)]
  Wiring(#[from] WiringError),
  /// Invalid configuration (capacity, weights, node config).
  #[error(transparent)]
  InvalidConfiguration(#[from] ConfigError),
  /// A node failed to start.
  #[error(transparent)]
  NodeInit(#[from] NodeInitError),
  /// An edge refused a message.
  #[error(transparent)]
  Edge(#[from] EdgeError),
  /// The scheduler halted or was misused.
  #[error(transparent)]
  Scheduler(#[from] SchedulerError),
}

/// Errors raised while wiring nodes into a subgraph.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum WiringError {
  /// The referenced node does not exist in the subgraph.
  #[error("unknown node '{node}'")]
  UnknownNode {
    /// Node name as given by the caller.
    node: String,
  },
  /// The node exists but has no port with this name in the expected direction.
  #[error("node '{node}' has no {direction} port '{port}'")]
  UnknownPort {
    /// Node name.
    node: String,
    /// Port name.
    port: String,
    /// Expected direction (`input` or `output`).
    direction: &'static str,
  },
  /// The source is an input port or the destination is an output port.
  #[error("cannot connect '{node}.{port}': expected an {expected} port")]
  DirectionMismatch {
    /// Node name.
    node: String,
    /// Port name.
    port: String,
    /// Direction the endpoint needed to have.
    expected: &'static str,
  },
  /// The output type is not accepted by the input.
  #[error("type mismatch connecting {output} ({output_type}) to {input} ({input_type})")]
  TypeMismatch {
    /// Source endpoint, `node.port`.
    output: String,
    /// Source port type tag.
    output_type: String,
    /// Destination endpoint, `node.port`.
    input: String,
    /// Destination port type tag.
    input_type: String,
  },
  /// The destination input already has a producer.
  #[error("input '{dest}' is already connected from '{existing}'")]
  InputAlreadyBound {
    /// Destination endpoint, `node.port`.
    dest: String,
    /// Source endpoint of the existing edge.
    existing: String,
  },
  /// A node with this name was already added.
  #[error("duplicate node '{node}'")]
  DuplicateNode {
    /// Node name.
    node: String,
  },
  /// A node declares two ports with the same name and direction.
  #[error("node '{node}' declares {direction} port '{port}' twice")]
  DuplicatePort {
    /// Node name.
    node: String,
    /// Port name.
    port: String,
    /// Port direction (`input` or `output`).
    direction: &'static str,
  },
  /// An external port with this name is already exposed.
  #[error("subgraph '{subgraph}' already exposes {direction} port '{port}'")]
  DuplicateExposedPort {
    /// Subgraph name.
    subgraph: String,
    /// External port name.
    port: String,
    /// Port direction (`input` or `output`).
    direction: &'static str,
  },
}

/// Errors raised by invalid configuration, reported as `InvalidConfiguration`.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
  /// Edges must hold at least one message.
  #[error("edge {edge} must have a positive capacity")]
  ZeroCapacity {
    /// Edge label, `src.port -> dst.port`.
    edge: String,
  },
  /// `max_batch_per_node` must be positive.
  #[error("max_batch_per_node must be positive")]
  ZeroBatch,
  /// Every fairness weight must be positive.
  #[error("fairness weight '{class}' must be positive")]
  ZeroWeight {
    /// Traffic class (`data`, `control` or `management`).
    class: &'static str,
  },
  /// A subgraph with the same name is already registered.
  #[error("subgraph '{name}' is already registered")]
  DuplicateSubgraph {
    /// Subgraph name.
    name: String,
  },
  /// A node with the `EmitError` policy lacks its designated error output.
  #[error("node '{node}' uses EmitError but has no output port '{port}'")]
  MissingErrorPort {
    /// Node name.
    node: String,
    /// Configured error port.
    port: String,
  },
}

/// A node's `on_start` hook failed.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("node '{node}' failed to start ({kind})")]
pub struct NodeInitError {
  /// Qualified node name.
  pub node: String,
  /// Error kind tag.
  pub kind: String,
}

/// Errors raised when pushing onto an edge.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EdgeError {
  /// A Block-policy edge is full and the caller cannot suspend.
  #[error("edge {edge} is full")]
  Full {
    /// Edge label.
    edge: String,
  },
  /// The scheduler is shutting down and the edge no longer waits for space.
  #[error("push to edge {edge} cancelled by shutdown")]
  Cancelled {
    /// Edge label.
    edge: String,
  },
  /// A bounded Block push did not find space within its budget.
  #[error("push to edge {edge} timed out after {waited:?}")]
  BackpressureTimeout {
    /// Edge label.
    edge: String,
    /// Time spent waiting.
    waited: Duration,
  },
}

/// Errors returned to node handlers by `NodeContext::emit`.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EmitError {
  /// The node has no output port with this name.
  #[error("node '{node}' has no output port '{port}'")]
  UnknownPort {
    /// Node name.
    node: String,
    /// Port name.
    port: String,
  },
  /// One of the port's edges refused the message.
  #[error(transparent)]
  Edge(#[from] EdgeError),
}

/// Errors that halt or reject scheduler operations.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
  /// A node configured with `Propagate` failed; the loop halted.
  #[error("scheduler fault in node '{node}' ({kind}){}", on_edge(.edge))]
  Fault {
    /// Qualified node name.
    node: String,
    /// Edge whose message was being handled, if any.
    edge: Option<String>,
    /// Error kind tag.
    kind: String,
  },
  /// Node startup failed and the run was rolled back.
  #[error(transparent)]
  NodeInit(#[from] NodeInitError),
  /// `run()` or `start()` was called while the scheduler was already running.
  #[error("scheduler is already running")]
  AlreadyRunning,
  /// The scheduler has stopped and cannot be restarted or extended.
  #[error("scheduler has stopped")]
  Stopped,
}

fn on_edge(edge: &Option<String>) -> String {
  edge
    .as_ref()
    .map(|e| format!(" while handling edge {e}"))
    .unwrap_or_default()
}

/// Error returned by node lifecycle hooks.
///
/// A `NodeError` carries a short kind tag that the scheduler copies into its own
/// errors and events, plus an optional detail string that is only logged. Any
/// `std::error::Error` converts into a `NodeError` with `?`; its kind is the
/// error's type name.
pub struct NodeError {
  kind: Cow<'static, str>,
  detail: Option<String>,
  source: Option<Box<dyn StdError + Send + Sync>>,
}

impl NodeError {
  /// Creates an error with the given kind tag.
  pub fn new(kind: impl Into<Cow<'static, str>>) -> Self {
    Self {
      kind: kind.into(),
      detail: None,
      source: None,
    }
  }

  /// Attaches a human-readable detail. Details are logged, never propagated.
  #[must_use]
  pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
    self.detail = Some(detail.into());
    self
  }

  /// Error kind tag.
  pub fn kind(&self) -> &str {
    &self.kind
  }

  /// Optional detail text.
  pub fn detail(&self) -> Option<&str> {
    self.detail.as_deref()
  }

  /// Underlying error, when converted from one.
  pub fn cause(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
    self.source.as_deref()
  }

  pub(crate) fn panic(payload: &(dyn std::any::Any + Send)) -> Self {
    let detail = payload
      .downcast_ref::<&str>()
      .map(|s| (*s).to_string())
      .or_else(|| payload.downcast_ref::<String>().cloned());
    Self {
      kind: Cow::Borrowed("panic"),
      detail,
      source: None,
    }
  }
}

impl<E> From<E> for NodeError
where
  E: StdError + Send + Sync + 'static,
{
  fn from(err: E) -> Self {
    let full = std::any::type_name::<E>();
    // `a::Wrapper<b::Inner>` tags as `Wrapper`.
    let path = full.split('<').next().unwrap_or(full);
    let short = path.rsplit("::").next().unwrap_or(path);
    Self {
      kind: Cow::Owned(short.to_string()),
      detail: Some(err.to_string()),
      source: Some(Box::new(err)),
    }
  }
}

impl fmt::Debug for NodeError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("NodeError")
      .field("kind", &self.kind)
      .field("detail", &self.detail)
      .finish()
  }
}

impl fmt::Display for NodeError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.detail {
      Some(detail) => write!(f, "{}: {}", self.kind, detail),
      None => write!(f, "{}", self.kind),
    }
  }
}
