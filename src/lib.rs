//! # weavecore
//!
//! Scheduling and message-flow core for in-process dataflow graphs.
//!
//! Nodes with typed ports are wired together by bounded edges. A cooperative
//! scheduler moves messages between them, giving CONTROL traffic priority over
//! DATA traffic, applying each edge's overflow policy under backpressure and
//! starting and stopping nodes in a deterministic order.
//!
//! ## Key Features
//!
//! - **Bounded edges**: every edge has a fixed capacity and one of four overflow
//!   policies (`Block`, `Drop`, `Latest`, `Coalesce`)
//! - **Control preemption**: CONTROL messages overtake pending DATA batches
//! - **Fairness**: per-tick quotas for control, data and self-paced work, served
//!   round-robin within each class
//! - **Lifecycle guarantees**: `on_stop` runs exactly once for every started node,
//!   including rollback after a failed start
//! - **Failure isolation**: per-node `Propagate`, `Isolate` or `EmitError` policy
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use weavecore::config::SchedulerConfig;
//! use weavecore::edge::OverflowPolicy;
//! use weavecore::scheduler::Scheduler;
//! use weavecore::subgraph::Subgraph;
//! # fn nodes() -> (Box<dyn weavecore::node::Node>, Box<dyn weavecore::node::Node>) { unimplemented!() }
//!
//! # async fn demo() -> Result<(), weavecore::error::Error> {
//! let (producer, consumer) = nodes();
//! let mut graph = Subgraph::new("main");
//! graph.add_node(producer)?;
//! graph.add_node(consumer)?;
//! graph.connect(("producer", "out"), ("consumer", "in"), 8, OverflowPolicy::Block)?;
//!
//! let mut scheduler = Scheduler::new(SchedulerConfig::default())?;
//! scheduler.register(graph)?;
//! scheduler.run().await?;
//! # Ok(())
//! # }
//! ```

// Documentation enforcement - treat missing docs as errors
#![deny(missing_docs)]

/// Scheduler tunables.
pub mod config;
/// Bounded edges and overflow policies.
pub mod edge;
/// Error types.
pub mod error;
/// Message envelopes.
pub mod message;
/// Core node trait and context.
pub mod node;
/// Observability sink.
pub mod observer;
/// Typed ports.
pub mod port;
/// The tick loop.
pub mod scheduler;
/// Shutdown signalling.
pub mod shutdown;
/// Subgraph composition and wiring validation.
pub mod subgraph;
/// Supervision policies for node failure handling.
pub mod supervision;

pub use config::{FairnessRatio, SchedulerConfig};
pub use edge::{Edge, Endpoint, OverflowPolicy, PushOutcome};
pub use error::{
  ConfigError, EdgeError, EmitError, Error, NodeError, NodeInitError, Result, SchedulerError,
  WiringError,
};
pub use message::{Message, MessageKind, MetadataValue, Payload};
pub use node::{Node, NodeContext, NodeState, OutputSender};
pub use observer::{Event, FnObserver, Observer, RecordingObserver, SharedObserver, TracingObserver};
pub use port::{PortDirection, PortSpec, PortType};
pub use scheduler::{RunSummary, Scheduler, SchedulerState, TickReport};
pub use shutdown::ShutdownHandle;
pub use subgraph::Subgraph;
pub use supervision::{ErrorPolicy, NodeConfig, NodeFault};

#[cfg(test)]
mod observer_test;
#[cfg(test)]
mod port_test;
#[cfg(test)]
mod shutdown_test;
#[cfg(test)]
mod supervision_test;
