//! # Node Architecture
//!
//! This module defines the [`Node`] trait every processing unit implements, and
//! the [`NodeContext`] handed to each lifecycle hook.
//!
//! ## Lifecycle
//!
//! ```text
//! Created --on_start--> Started --on_stop--> Stopped
//!                          |  ^
//!                          +--+  on_tick / on_message (repeatable)
//! ```
//!
//! - `on_start` runs once, before the first tick, in dependency order.
//! - `on_message` receives one message from one input port at a time; the
//!   scheduler delivers batches by calling it repeatedly.
//! - `on_tick` runs when the node has no pending input, which lets source nodes
//!   produce at their own pace.
//! - `on_stop` runs exactly once for every node that was started, whatever
//!   happened before.
//!
//! Hooks run on the scheduler loop and must not block. Long-running production
//! belongs in a separate task that feeds an [`OutputSender`].
//!
//! ## Node Types
//!
//! - **Source Nodes**: 0 inputs, 1+ outputs, produce from `on_tick`
//! - **Transform Nodes**: 1+ inputs, 1+ outputs
//! - **Sink Nodes**: 1+ inputs, 0 outputs
//!
//! ## Example
//!
//! ```rust
//! use weavecore::error::NodeError;
//! use weavecore::message::Message;
//! use weavecore::node::{Node, NodeContext};
//! use weavecore::port::PortSpec;
//!
//! // Transform node that doubles integers
//! struct DoubleNode {
//!     name: String,
//!     inputs: Vec<PortSpec>,
//!     outputs: Vec<PortSpec>,
//! }
//!
//! impl Node for DoubleNode {
//!     fn name(&self) -> &str { &self.name }
//!     fn input_ports(&self) -> &[PortSpec] { &self.inputs }
//!     fn output_ports(&self) -> &[PortSpec] { &self.outputs }
//!
//!     fn on_message(
//!         &mut self,
//!         ctx: &mut NodeContext<'_>,
//!         _port: &str,
//!         message: Message,
//!     ) -> Result<(), NodeError> {
//!         let value = message
//!             .payload_as::<i64>()
//!             .ok_or_else(|| NodeError::new("unexpected_payload"))?;
//!         ctx.emit("out", Message::data(value * 2))?;
//!         Ok(())
//!     }
//! }
//! ```

use crate::edge::{Edge, OverflowPolicy, PushOutcome};
use crate::error::{EdgeError, EmitError, NodeError};
use crate::message::Message;
use crate::observer::SharedObserver;
use crate::port::PortSpec;
use crate::supervision::NodeConfig;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// Edges bound to each output port of a node, keyed by port name.
pub(crate) type OutputMap = HashMap<String, Vec<Arc<Edge>>>;

/// Lifecycle state of a node.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum NodeState {
  /// Constructed, `on_start` not yet invoked.
  Created,
  /// `on_start` succeeded; eligible for ticks and messages.
  Started,
  /// `on_stop` has run. Terminal.
  Stopped,
}

impl fmt::Display for NodeState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      NodeState::Created => write!(f, "created"),
      NodeState::Started => write!(f, "started"),
      NodeState::Stopped => write!(f, "stopped"),
    }
  }
}

/// A unit of computation driven by the scheduler.
///
/// Implementations declare their ports up front; the subgraph validates wiring
/// against them and the scheduler delivers messages by port name.
pub trait Node: Send {
  /// Node name, unique within its subgraph.
  fn name(&self) -> &str;

  /// Input ports, in declaration order.
  fn input_ports(&self) -> &[PortSpec];

  /// Output ports, in declaration order.
  fn output_ports(&self) -> &[PortSpec];

  /// Checks if this node has an input port with the given name.
  fn has_input_port(&self, name: &str) -> bool {
    self.input_ports().iter().any(|p| p.name == name)
  }

  /// Checks if this node has an output port with the given name.
  fn has_output_port(&self, name: &str) -> bool {
    self.output_ports().iter().any(|p| p.name == name)
  }

  /// Failure policy and error port. Read once at registration.
  fn config(&self) -> NodeConfig {
    NodeConfig::default()
  }

  /// Called once when the node starts. An error aborts the run.
  fn on_start(&mut self, _ctx: &mut NodeContext<'_>) -> Result<(), NodeError> {
    Ok(())
  }

  /// Called when the node has no pending input.
  fn on_tick(&mut self, _ctx: &mut NodeContext<'_>) -> Result<(), NodeError> {
    Ok(())
  }

  /// Called for each message delivered to input `port`.
  fn on_message(
    &mut self,
    ctx: &mut NodeContext<'_>,
    port: &str,
    message: Message,
  ) -> Result<(), NodeError>;

  /// Called exactly once at shutdown. Errors are reported, not propagated.
  fn on_stop(&mut self, _ctx: &mut NodeContext<'_>) -> Result<(), NodeError> {
    Ok(())
  }
}

/// Handle passed to every lifecycle hook.
///
/// Gives the node its qualified name, the observer, and emission onto its
/// output ports.
pub struct NodeContext<'a> {
  node: &'a str,
  outputs: &'a OutputMap,
  observer: &'a SharedObserver,
  emitted: usize,
}

impl<'a> NodeContext<'a> {
  pub(crate) fn new(node: &'a str, outputs: &'a OutputMap, observer: &'a SharedObserver) -> Self {
    Self {
      node,
      outputs,
      observer,
      emitted: 0,
    }
  }

  /// Qualified name of the node (`subgraph/node`).
  pub fn node_name(&self) -> &str {
    self.node
  }

  /// The scheduler's observer, for nodes that report their own events.
  pub fn observer(&self) -> &SharedObserver {
    self.observer
  }

  /// Emits a message on an output port, fanning out to every bound edge.
  ///
  /// Never waits. A full Block edge yields `EmitError::Edge(EdgeError::Full)`;
  /// the other edges of the port still receive the message and the first error
  /// is returned. An output port with no edges accepts and discards.
  pub fn emit(&mut self, port: &str, message: Message) -> Result<(), EmitError> {
    let edges = self.edges(port)?;
    trace!(
      "NodeContext::emit(node={}, port={}, kind={}, fanout={})",
      self.node,
      port,
      message.kind(),
      edges.len()
    );
    let mut first_error = None;
    for edge in edges {
      match edge.try_push(message.clone()) {
        Ok(_) => {}
        Err(err) => {
          first_error.get_or_insert(err);
        }
      }
    }
    self.emitted += 1;
    match first_error {
      Some(err) => Err(EmitError::Edge(err)),
      None => Ok(()),
    }
  }

  /// Whether `emit` on `port` would be accepted by every Block edge right now.
  pub fn can_emit(&self, port: &str) -> bool {
    self.outputs.get(port).is_some_and(|edges| {
      edges
        .iter()
        .all(|e| !matches!(e.policy(), OverflowPolicy::Block) || !e.is_full())
    })
  }

  /// A handle that can emit on `port` from outside the scheduler loop.
  pub fn output_sender(&self, port: &str) -> Result<OutputSender, EmitError> {
    let edges = self.edges(port)?;
    Ok(OutputSender {
      node: self.node.to_string(),
      port: port.to_string(),
      edges: edges.to_vec(),
    })
  }

  pub(crate) fn emitted(&self) -> usize {
    self.emitted
  }

  fn edges(&self, port: &str) -> Result<&'a [Arc<Edge>], EmitError> {
    self
      .outputs
      .get(port)
      .map(Vec::as_slice)
      .ok_or_else(|| EmitError::UnknownPort {
        node: self.node.to_string(),
        port: port.to_string(),
      })
  }
}

/// Cloneable producer handle for one output port.
///
/// Lets a node hand production to a background task: `send` waits on full
/// Block edges, which is exactly what hooks on the loop must never do.
#[derive(Clone)]
pub struct OutputSender {
  node: String,
  port: String,
  edges: Vec<Arc<Edge>>,
}

impl OutputSender {
  /// Node that owns the port.
  pub fn node_name(&self) -> &str {
    &self.node
  }

  /// Port name.
  pub fn port(&self) -> &str {
    &self.port
  }

  /// Pushes onto every edge in turn, waiting on full Block edges.
  pub async fn send(&self, message: Message) -> Result<(), EdgeError> {
    for edge in &self.edges {
      edge.push(message.clone()).await?;
    }
    Ok(())
  }

  /// Like [`OutputSender::send`], giving each edge at most `timeout`.
  pub async fn send_timeout(&self, message: Message, timeout: Duration) -> Result<(), EdgeError> {
    for edge in &self.edges {
      edge.push_timeout(message.clone(), timeout).await?;
    }
    Ok(())
  }

  /// Pushes without waiting and returns the outcome per edge. Stops at the
  /// first edge that refuses the message.
  pub fn try_send(&self, message: Message) -> Result<Vec<PushOutcome>, EdgeError> {
    self
      .edges
      .iter()
      .map(|edge| edge.try_push(message.clone()))
      .collect()
  }
}

impl fmt::Debug for OutputSender {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("OutputSender")
      .field("node", &self.node)
      .field("port", &self.port)
      .field("edges", &self.edges.len())
      .finish()
  }
}
