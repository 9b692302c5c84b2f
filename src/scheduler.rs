//! # Scheduler
//!
//! The cooperative loop that owns registered subgraphs, drives node lifecycles
//! and moves messages along edges.
//!
//! ## State Machine
//!
//! ```text
//! Created --start--> Running --shutdown--> Draining --queues empty / deadline--> Stopped
//!                       |                                                          ^
//!                       +------------------- Propagate fault ---------------------+
//! ```
//!
//! [`Scheduler::tick`] runs exactly one iteration synchronously, which makes the
//! loop easy to step in tests. [`Scheduler::run`] repeats it on the current task,
//! backing off while idle.
//!
//! ## One Tick
//!
//! 1. A pending shutdown request moves `Running` to `Draining`. While draining,
//!    the tick stops everything once every edge is empty, or once the drain
//!    deadline passes (a forced shutdown, which is reported).
//! 2. Inputs queued for isolated nodes are discarded.
//! 3. Up to `fairness.control` edges whose head is CONTROL are serviced, then up
//!    to `fairness.data` edges whose head is DATA. Each class rotates
//!    round-robin. A serviced edge yields at most the destination's remaining
//!    batch budget (`max_batch_per_node` per tick). An edge passed over because
//!    its node's budget ran out is first in line on the next tick.
//! 4. Before every DATA message, CONTROL messages waiting at the head of the
//!    node's other inputs are delivered first. They count against the node's
//!    budget and the control quota; if either is spent, the DATA batch ends
//!    there instead of overtaking them.
//! 5. While running, `on_tick` is called on up to `fairness.management` nodes
//!    that have no pending input.
//!
//! A node whose Block output is full receives neither DATA nor `on_tick` until
//! the edge drains, so backpressure travels upstream.
//!
//! ## Example
//!
//! ```rust,no_run
//! use weavecore::config::SchedulerConfig;
//! use weavecore::scheduler::Scheduler;
//! use weavecore::subgraph::Subgraph;
//!
//! # async fn demo(graph: Subgraph) -> Result<(), weavecore::error::Error> {
//! let mut scheduler = Scheduler::new(SchedulerConfig::default())?;
//! scheduler.register(graph)?;
//!
//! let handle = scheduler.shutdown_handle();
//! tokio::spawn(async move {
//!     tokio::time::sleep(std::time::Duration::from_secs(1)).await;
//!     handle.shutdown(None);
//! });
//!
//! let summary = scheduler.run().await?;
//! assert!(!summary.forced_shutdown);
//! # Ok(())
//! # }
//! ```

use crate::config::SchedulerConfig;
use crate::edge::{Edge, OverflowPolicy};
use crate::error::{ConfigError, Error, NodeError, NodeInitError, SchedulerError};
use crate::message::{Message, MessageKind};
use crate::node::{Node, NodeContext, NodeState, OutputMap};
use crate::observer::{Event, SharedObserver, TracingObserver};
use crate::shutdown::{ShutdownHandle, ShutdownRequest};
use crate::subgraph::Subgraph;
use crate::supervision::{ErrorPolicy, NodeConfig, NodeFault};
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

/// Lifecycle state of the scheduler.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum SchedulerState {
  /// Constructed; nodes not started.
  Created,
  /// Ticking normally.
  Running,
  /// Shutdown requested; delivering what is already queued.
  Draining,
  /// Every started node has been stopped. Terminal.
  Stopped,
}

impl fmt::Display for SchedulerState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      SchedulerState::Created => write!(f, "created"),
      SchedulerState::Running => write!(f, "running"),
      SchedulerState::Draining => write!(f, "draining"),
      SchedulerState::Stopped => write!(f, "stopped"),
    }
  }
}

/// What one call to [`Scheduler::tick`] did.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TickReport {
  /// Messages handed to `on_message`.
  pub delivered: usize,
  /// `on_tick` invocations.
  pub ticked: usize,
  /// Successful or failed `emit` calls made by nodes during this tick.
  pub emitted: usize,
  /// Messages discarded because their destination was isolated.
  pub discarded: usize,
  /// Scheduler state after the tick.
  pub state: SchedulerState,
}

impl TickReport {
  fn new(state: SchedulerState) -> Self {
    Self {
      delivered: 0,
      ticked: 0,
      emitted: 0,
      discarded: 0,
      state,
    }
  }

  /// Whether any edge had work or any node produced output.
  pub fn had_work(&self) -> bool {
    self.delivered > 0 || self.emitted > 0 || self.discarded > 0
  }
}

/// Totals returned by [`Scheduler::run`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RunSummary {
  /// Ticks executed.
  pub ticks: u64,
  /// Messages delivered to nodes.
  pub delivered: u64,
  /// Whether draining hit the shutdown deadline.
  pub forced_shutdown: bool,
  /// Messages still queued when the scheduler stopped.
  pub undelivered: usize,
}

struct NodeSlot {
  name: String,
  node: Box<dyn Node>,
  state: NodeState,
  faulted: bool,
  config: NodeConfig,
  /// Indices into `Scheduler::edges` of the edges feeding this node.
  inputs: Vec<usize>,
  outputs: OutputMap,
}

struct EdgeSlot {
  edge: Arc<Edge>,
  dest: usize,
  dest_port: String,
}

/// Work still allowed in the current tick.
struct Slice {
  /// Deliveries and `on_tick` calls left per node.
  budget: Vec<usize>,
  /// Control edges left to service, by the control pass or by preemption.
  control: usize,
}

#[derive(Default)]
struct Cursors {
  control: usize,
  data: usize,
  management: usize,
}

/// Cooperative dataflow scheduler.
///
/// Owns the nodes of every registered subgraph. Only one `run()` may be active
/// per instance; it takes `&mut self`, so use [`Scheduler::shutdown_handle`] to
/// stop it from elsewhere.
pub struct Scheduler {
  config: SchedulerConfig,
  observer: SharedObserver,
  subgraphs: Vec<String>,
  nodes: Vec<NodeSlot>,
  edges: Vec<EdgeSlot>,
  /// Nodes in start order; includes nodes not yet started.
  start_order: Vec<usize>,
  /// Nodes whose `on_start` succeeded, in the order it did.
  started: Vec<usize>,
  state: SchedulerState,
  shutdown: ShutdownHandle,
  wake: Arc<Notify>,
  cursors: Cursors,
  drain_deadline: Option<Instant>,
  summary: RunSummary,
}

impl Scheduler {
  /// Creates a scheduler that reports events to [`TracingObserver`].
  ///
  /// # Errors
  ///
  /// [`ConfigError`] if `config` fails validation.
  pub fn new(config: SchedulerConfig) -> Result<Self, ConfigError> {
    Self::with_observer(config, Arc::new(TracingObserver))
  }

  /// Creates a scheduler that reports events to `observer`.
  ///
  /// # Errors
  ///
  /// [`ConfigError`] if `config` fails validation.
  pub fn with_observer(
    config: SchedulerConfig,
    observer: SharedObserver,
  ) -> Result<Self, ConfigError> {
    trace!("Scheduler::with_observer(config={:?})", config);
    config.validate()?;
    Ok(Self {
      shutdown: ShutdownHandle::new(config.shutdown_timeout),
      config,
      observer,
      subgraphs: Vec::new(),
      nodes: Vec::new(),
      edges: Vec::new(),
      start_order: Vec::new(),
      started: Vec::new(),
      state: SchedulerState::Created,
      wake: Arc::new(Notify::new()),
      cursors: Cursors::default(),
      drain_deadline: None,
      summary: RunSummary::default(),
    })
  }

  /// The scheduler's configuration.
  pub fn config(&self) -> &SchedulerConfig {
    &self.config
  }

  /// Current lifecycle state.
  pub fn state(&self) -> SchedulerState {
    self.state
  }

  /// Names of registered subgraphs, in registration order.
  pub fn subgraph_names(&self) -> impl Iterator<Item = &str> {
    self.subgraphs.iter().map(String::as_str)
  }

  /// Qualified names (`subgraph/node`) of every registered node.
  pub fn node_names(&self) -> impl Iterator<Item = &str> {
    self.nodes.iter().map(|slot| slot.name.as_str())
  }

  /// Lifecycle state of a node, by qualified name.
  pub fn node_state(&self, name: &str) -> Option<NodeState> {
    self.slot(name).map(|slot| slot.state)
  }

  /// Whether a node has been isolated after a failure.
  pub fn is_faulted(&self, name: &str) -> Option<bool> {
    self.slot(name).map(|slot| slot.faulted)
  }

  /// Every registered edge.
  pub fn edges(&self) -> impl Iterator<Item = &Arc<Edge>> {
    self.edges.iter().map(|slot| &slot.edge)
  }

  /// Totals so far.
  pub fn summary(&self) -> RunSummary {
    self.summary
  }

  /// A cloneable handle that can request shutdown from another task.
  pub fn shutdown_handle(&self) -> ShutdownHandle {
    self.shutdown.clone()
  }

  /// Requests a graceful drain. `None` uses the configured `shutdown_timeout`.
  /// Calling it again has no further effect.
  pub fn shutdown(&self, timeout: Option<Duration>) {
    self.shutdown.shutdown(timeout);
  }

  /// Registers a subgraph.
  ///
  /// Nodes are ordered upstream-first. On a running scheduler they are started
  /// immediately, with the same rollback as [`Scheduler::start`]; a subgraph
  /// that fails to start is unregistered again, edges included.
  ///
  /// # Errors
  ///
  /// - [`ConfigError::DuplicateSubgraph`] if the name is taken.
  /// - [`ConfigError::MissingErrorPort`] if an `EmitError` node lacks its error
  ///   output.
  /// - [`SchedulerError::Stopped`] once shutdown has begun.
  /// - [`NodeInitError`] if a node fails to start on a running scheduler.
  pub fn register(&mut self, subgraph: Subgraph) -> Result<(), Error> {
    trace!(
      "Scheduler::register(subgraph={}, nodes={})",
      subgraph.name(),
      subgraph.len()
    );
    if matches!(
      self.state,
      SchedulerState::Draining | SchedulerState::Stopped
    ) {
      return Err(SchedulerError::Stopped.into());
    }
    if self.subgraphs.iter().any(|name| name == subgraph.name()) {
      return Err(
        ConfigError::DuplicateSubgraph {
          name: subgraph.name().to_string(),
        }
        .into(),
      );
    }

    let order = subgraph.startup_order();
    let (name, entries, bindings) = subgraph.into_parts();

    let mut configs = Vec::with_capacity(entries.len());
    for entry in &entries {
      let config = entry.node.config();
      if config.error_policy == ErrorPolicy::EmitError
        && !entry.node.has_output_port(&config.error_port)
      {
        return Err(
          ConfigError::MissingErrorPort {
            node: format!("{}/{}", name, entry.key),
            port: config.error_port,
          }
          .into(),
        );
      }
      configs.push(config);
    }

    let base = self.nodes.len();
    let edge_base = self.edges.len();
    let mut index = HashMap::with_capacity(entries.len());
    for (i, (entry, config)) in entries.into_iter().zip(configs).enumerate() {
      index.insert(entry.key.clone(), base + i);
      let outputs = entry
        .node
        .output_ports()
        .iter()
        .map(|port| (port.name.clone(), Vec::new()))
        .collect();
      self.nodes.push(NodeSlot {
        name: format!("{}/{}", name, entry.key),
        node: entry.node,
        state: NodeState::Created,
        faulted: false,
        config,
        inputs: Vec::new(),
        outputs,
      });
    }

    for binding in bindings {
      let (Some(&source), Some(&dest)) = (
        index.get(&binding.source.node),
        index.get(&binding.dest.node),
      ) else {
        continue;
      };
      let label = format!(
        "{name}/{}.{} -> {name}/{}.{}",
        binding.source.node, binding.source.port, binding.dest.node, binding.dest.port
      );
      binding.edge.attach(
        Arc::clone(&self.observer),
        Arc::clone(&self.wake),
        label,
        self.nodes[dest].name.clone(),
      );
      let edge_index = self.edges.len();
      self
        .nodes[source]
        .outputs
        .entry(binding.source.port)
        .or_default()
        .push(Arc::clone(&binding.edge));
      self.nodes[dest].inputs.push(edge_index);
      self.edges.push(EdgeSlot {
        edge: binding.edge,
        dest,
        dest_port: binding.dest.port,
      });
    }

    let order: Vec<usize> = order.into_iter().map(|i| base + i).collect();
    self.start_order.extend_from_slice(&order);
    self.subgraphs.push(name.clone());
    info!(subgraph = %name, nodes = order.len(), "subgraph registered");

    if self.state == SchedulerState::Running {
      if let Err(err) = self.start_nodes(&order) {
        self.unregister(base, edge_base);
        return Err(err.into());
      }
    }
    Ok(())
  }

  /// Removes the most recently registered subgraph after it failed to start.
  /// Its edges stop accepting waiters, since nothing will ever drain them.
  fn unregister(&mut self, node_base: usize, edge_base: usize) {
    for slot in self.edges.drain(edge_base..) {
      slot.edge.begin_shutdown();
    }
    self.nodes.truncate(node_base);
    self.start_order.retain(|&i| i < node_base);
    self.started.retain(|&i| i < node_base);
    if let Some(name) = self.subgraphs.pop() {
      warn!(subgraph = %name, "subgraph failed to start and was unregistered");
    }
  }

  /// Starts every registered node in dependency order.
  ///
  /// If a node's `on_start` fails, that node and every node started before it
  /// receive `on_stop` in reverse order and the scheduler becomes `Stopped`.
  /// [`Scheduler::tick`] and [`Scheduler::run`] call this on first use.
  ///
  /// # Errors
  ///
  /// [`SchedulerError::NodeInit`] naming the failing node,
  /// [`SchedulerError::AlreadyRunning`] or [`SchedulerError::Stopped`].
  pub fn start(&mut self) -> Result<(), SchedulerError> {
    trace!("Scheduler::start(nodes={})", self.nodes.len());
    match self.state {
      SchedulerState::Created => {}
      SchedulerState::Running | SchedulerState::Draining => {
        return Err(SchedulerError::AlreadyRunning);
      }
      SchedulerState::Stopped => return Err(SchedulerError::Stopped),
    }
    let order = self.start_order.clone();
    if let Err(err) = self.start_nodes(&order) {
      self.state = SchedulerState::Stopped;
      self
        .observer
        .on_event(&Event::new("scheduler.stopped").field("reason", "start_failed"));
      return Err(err.into());
    }
    self.state = SchedulerState::Running;
    info!(nodes = self.nodes.len(), "scheduler running");
    Ok(())
  }

  /// Runs one iteration of the loop. Starts the scheduler if needed.
  ///
  /// # Errors
  ///
  /// A [`SchedulerError::Fault`] from a `Propagate` node. Every started node
  /// has been stopped by the time it is returned.
  pub fn tick(&mut self) -> Result<TickReport, SchedulerError> {
    match self.state {
      SchedulerState::Created => self.start()?,
      SchedulerState::Stopped => return Ok(TickReport::new(SchedulerState::Stopped)),
      SchedulerState::Running | SchedulerState::Draining => {}
    }
    match self.tick_inner() {
      Ok(report) => {
        self.summary.ticks += 1;
        self.summary.delivered += report.delivered as u64;
        Ok(report)
      }
      Err(err) => {
        self.halt();
        Err(err)
      }
    }
  }

  /// Drives ticks until the scheduler stops.
  ///
  /// Busy ticks follow each other no faster than `tick_interval`; idle ticks
  /// back off for `idle_sleep`, waking early when an edge receives a message or
  /// shutdown is requested.
  ///
  /// # Errors
  ///
  /// [`SchedulerError::NodeInit`] if startup fails, [`SchedulerError::Fault`]
  /// if a `Propagate` node fails. Nodes are stopped in both cases. A scheduler
  /// that already stopped returns [`SchedulerError::Stopped`].
  pub async fn run(&mut self) -> Result<RunSummary, SchedulerError> {
    trace!("Scheduler::run(state={})", self.state);
    match self.state {
      SchedulerState::Created => self.start()?,
      SchedulerState::Running | SchedulerState::Draining => {}
      SchedulerState::Stopped => return Err(SchedulerError::Stopped),
    }
    let wake = Arc::clone(&self.wake);
    let shutdown = self.shutdown.clone();
    let mut last_work = Instant::now();

    loop {
      let tick_started = Instant::now();
      let report = self.tick()?;
      if report.state == SchedulerState::Stopped {
        break;
      }

      if report.had_work() {
        last_work = Instant::now();
        let elapsed = tick_started.elapsed();
        if elapsed < self.config.tick_interval {
          tokio::time::sleep(self.config.tick_interval - elapsed).await;
        } else {
          tokio::task::yield_now().await;
        }
        continue;
      }

      if self.state == SchedulerState::Running {
        if let Some(idle_timeout) = self.config.idle_timeout {
          if last_work.elapsed() >= idle_timeout {
            info!(?idle_timeout, "idle timeout reached");
            shutdown.shutdown(None);
            continue;
          }
        }
        tokio::select! {
          _ = tokio::time::sleep(self.config.idle_sleep) => {}
          _ = wake.notified() => {}
          _ = shutdown.requested() => {}
        }
      } else {
        tokio::select! {
          _ = tokio::time::sleep(self.config.idle_sleep) => {}
          _ = wake.notified() => {}
        }
      }
    }

    info!(
      ticks = self.summary.ticks,
      delivered = self.summary.delivered,
      forced = self.summary.forced_shutdown,
      "scheduler finished"
    );
    Ok(self.summary)
  }

  fn tick_inner(&mut self) -> Result<TickReport, SchedulerError> {
    if self.state == SchedulerState::Running {
      if let Some(request) = self.shutdown.request() {
        self.begin_drain(request);
      }
    }

    let mut report = TickReport::new(self.state);
    report.discarded = self.discard_unreachable();

    if self.state == SchedulerState::Draining {
      if self.edges.iter().all(|slot| slot.edge.is_empty()) {
        self.finish(false);
        report.state = self.state;
        return Ok(report);
      }
      if self
        .drain_deadline
        .is_some_and(|deadline| Instant::now() >= deadline)
      {
        self.finish(true);
        report.state = self.state;
        return Ok(report);
      }
    }

    let mut slice = Slice {
      budget: vec![self.config.max_batch_per_node; self.nodes.len()],
      control: self.config.fairness.control as usize,
    };
    self.service_class(MessageKind::Control, &mut slice, &mut report)?;
    self.service_class(MessageKind::Data, &mut slice, &mut report)?;
    if self.state == SchedulerState::Running {
      self.tick_idle_nodes(&mut slice.budget, &mut report)?;
    }

    report.state = self.state;
    if report.had_work() {
      debug!(
        delivered = report.delivered,
        ticked = report.ticked,
        emitted = report.emitted,
        discarded = report.discarded,
        "tick"
      );
    }
    Ok(report)
  }

  /// Services up to the class quota of edges whose head message is `kind`.
  ///
  /// The cursor moves past the last serviced edge, unless an edge of the class
  /// was passed over for lack of node budget; then it points at the first such
  /// edge so that edge goes first next tick.
  fn service_class(
    &mut self,
    kind: MessageKind,
    slice: &mut Slice,
    report: &mut TickReport,
  ) -> Result<(), SchedulerError> {
    let n = self.edges.len();
    if n == 0 {
      return Ok(());
    }
    let cursor = match kind {
      MessageKind::Control => self.cursors.control,
      MessageKind::Data => self.cursors.data,
    };
    let mut serviced = 0;
    let mut last = None;
    let mut passed_over = None;
    for step in 0..n {
      let quota_left = match kind {
        MessageKind::Control => slice.control > 0,
        MessageKind::Data => serviced < self.config.fairness.data,
      };
      if !quota_left {
        break;
      }
      let e = (cursor + step) % n;
      if self.edges[e].edge.head_kind() != Some(kind) {
        continue;
      }
      let dest = self.edges[e].dest;
      if !self.accepts(dest) {
        continue;
      }
      if slice.budget[dest] == 0 {
        passed_over.get_or_insert(e);
        continue;
      }
      if kind == MessageKind::Data && self.is_backpressured(dest) {
        continue;
      }
      if kind == MessageKind::Control {
        slice.control -= 1;
      }
      self.service_edge(e, slice, report)?;
      serviced += 1;
      last = Some(e);
    }
    let next = passed_over.or(last.map(|e| (e + 1) % n));
    if let Some(next) = next {
      match kind {
        MessageKind::Control => self.cursors.control = next,
        MessageKind::Data => self.cursors.data = next,
      }
    }
    Ok(())
  }

  /// Delivers up to the destination's remaining budget from edge `e`, in
  /// order. Stops early if the node becomes backpressured or isolated, or if
  /// a CONTROL message it cannot take this tick would be overtaken.
  fn service_edge(
    &mut self,
    e: usize,
    slice: &mut Slice,
    report: &mut TickReport,
  ) -> Result<(), SchedulerError> {
    let dest = self.edges[e].dest;
    trace!(
      "Scheduler::service_edge(edge={}, queued={}, budget={})",
      self.edges[e].edge.label(),
      self.edges[e].edge.len(),
      slice.budget[dest]
    );
    while slice.budget[dest] > 0 && self.accepts(dest) {
      match self.edges[e].edge.head_kind() {
        None => break,
        Some(MessageKind::Control) => {}
        Some(MessageKind::Data) => {
          if self.is_backpressured(dest) {
            break;
          }
          if !self.preempt_control(dest, e, slice, report)? {
            break;
          }
          if slice.budget[dest] == 0 || !self.accepts(dest) || self.is_backpressured(dest) {
            break;
          }
        }
      }
      let Some(message) = self.edges[e].edge.pop() else {
        break;
      };
      self.deliver(e, message, report)?;
      slice.budget[dest] -= 1;
    }
    Ok(())
  }

  /// Delivers CONTROL messages waiting at the head of `dest`'s other inputs.
  ///
  /// Each delivery is charged to the node's budget and each edge drained to
  /// the control quota. Returns `false` when CONTROL is still waiting, in which
  /// case no DATA may be delivered to `dest` this tick.
  fn preempt_control(
    &mut self,
    dest: usize,
    current: usize,
    slice: &mut Slice,
    report: &mut TickReport,
  ) -> Result<bool, SchedulerError> {
    for k in 0..self.nodes[dest].inputs.len() {
      let e = self.nodes[dest].inputs[k];
      if e == current || self.edges[e].edge.head_kind() != Some(MessageKind::Control) {
        continue;
      }
      if slice.control == 0 {
        return Ok(false);
      }
      slice.control -= 1;
      while slice.budget[dest] > 0
        && self.accepts(dest)
        && self.edges[e].edge.head_kind() == Some(MessageKind::Control)
      {
        let Some(message) = self.edges[e].edge.pop() else {
          break;
        };
        debug!(edge = %self.edges[e].edge.label(), "control preempts data batch");
        self.deliver(e, message, report)?;
        slice.budget[dest] -= 1;
      }
      if self.edges[e].edge.head_kind() == Some(MessageKind::Control) {
        return Ok(false);
      }
    }
    Ok(true)
  }

  fn deliver(
    &mut self,
    e: usize,
    message: Message,
    report: &mut TickReport,
  ) -> Result<(), SchedulerError> {
    let dest = self.edges[e].dest;
    let port = self.edges[e].dest_port.clone();
    let (result, emitted) = self.invoke(dest, |node, ctx| node.on_message(ctx, &port, message));
    report.delivered += 1;
    report.emitted += emitted;
    match result {
      Ok(()) => Ok(()),
      Err(err) => self.handle_failure(dest, Some(e), err),
    }
  }

  /// Calls `on_tick` on idle nodes, up to the management quota.
  fn tick_idle_nodes(
    &mut self,
    budget: &mut [usize],
    report: &mut TickReport,
  ) -> Result<(), SchedulerError> {
    let n = self.nodes.len();
    if n == 0 {
      return Ok(());
    }
    let quota = self.config.fairness.management;
    let cursor = self.cursors.management;
    let mut ticked = 0;
    let mut last = None;
    let mut passed_over = None;
    for step in 0..n {
      if ticked >= quota {
        break;
      }
      let i = (cursor + step) % n;
      if !self.accepts(i) || self.has_pending_input(i) || self.is_backpressured(i) {
        continue;
      }
      if budget[i] == 0 {
        passed_over.get_or_insert(i);
        continue;
      }
      let (result, emitted) = self.invoke(i, |node, ctx| node.on_tick(ctx));
      report.ticked += 1;
      report.emitted += emitted;
      budget[i] -= 1;
      ticked += 1;
      last = Some(i);
      if let Err(err) = result {
        self.handle_failure(i, None, err)?;
      }
    }
    if let Some(next) = passed_over.or(last.map(|i| (i + 1) % n)) {
      self.cursors.management = next;
    }
    Ok(())
  }

  /// Runs one hook on node `i` with panics turned into [`NodeError`]s.
  /// Returns the hook's result and how many times it emitted.
  fn invoke<F>(&mut self, i: usize, hook: F) -> (Result<(), NodeError>, usize)
  where
    F: FnOnce(&mut dyn Node, &mut NodeContext<'_>) -> Result<(), NodeError>,
  {
    let slot = &mut self.nodes[i];
    let mut ctx = NodeContext::new(&slot.name, &slot.outputs, &self.observer);
    let node = slot.node.as_mut();
    let result = panic::catch_unwind(AssertUnwindSafe(|| hook(node, &mut ctx)))
      .unwrap_or_else(|payload| Err(NodeError::panic(payload.as_ref())));
    (result, ctx.emitted())
  }

  /// Applies node `i`'s error policy to a failed `on_tick`/`on_message`.
  fn handle_failure(
    &mut self,
    i: usize,
    edge: Option<usize>,
    err: NodeError,
  ) -> Result<(), SchedulerError> {
    let edge_label = edge.map(|e| self.edges[e].edge.label().to_string());
    let slot = &mut self.nodes[i];
    debug!(node = %slot.name, kind = err.kind(), detail = ?err.detail(), "node failed");

    match slot.config.error_policy {
      ErrorPolicy::Propagate => {
        error!(node = %slot.name, kind = err.kind(), "node fault halts scheduler");
        Err(SchedulerError::Fault {
          node: slot.name.clone(),
          edge: edge_label,
          kind: err.kind().to_string(),
        })
      }
      ErrorPolicy::Isolate => {
        slot.faulted = true;
        warn!(node = %slot.name, kind = err.kind(), "node isolated");
        let mut event = Event::new("node.faulted")
          .node(slot.name.clone())
          .field("kind", err.kind())
          .field("policy", "isolate");
        if let Some(label) = edge_label {
          event = event.edge(label);
        }
        self.observer.on_event(&event);
        Ok(())
      }
      ErrorPolicy::EmitError => {
        let fault = NodeFault {
          node_id: slot.name.clone(),
          error_kind: err.kind().to_string(),
        };
        let mut ctx = NodeContext::new(&slot.name, &slot.outputs, &self.observer);
        let emitted = ctx.emit(&slot.config.error_port, fault.into_message());
        let mut event = Event::new("node.error_emitted")
          .node(slot.name.clone())
          .field("kind", err.kind())
          .field("port", &slot.config.error_port);
        if let Some(label) = edge_label {
          event = event.edge(label);
        }
        if let Err(emit_err) = emitted {
          warn!(node = %slot.name, error = %emit_err, "could not emit node fault");
          event = event.field("emit_failed", emit_err);
        }
        self.observer.on_event(&event);
        Ok(())
      }
    }
  }

  fn start_nodes(&mut self, order: &[usize]) -> Result<(), NodeInitError> {
    for (pos, &i) in order.iter().enumerate() {
      let (result, _) = self.invoke(i, |node, ctx| node.on_start(ctx));
      match result {
        Ok(()) => {
          self.nodes[i].state = NodeState::Started;
          self.started.push(i);
          debug!(node = %self.nodes[i].name, "node started");
          self
            .observer
            .on_event(&Event::new("node.started").node(self.nodes[i].name.clone()));
        }
        Err(err) => {
          let node = self.nodes[i].name.clone();
          error!(node = %node, kind = err.kind(), detail = ?err.detail(), "node failed to start");
          self.observer.on_event(
            &Event::new("node.start_failed")
              .node(node.clone())
              .field("kind", err.kind()),
          );
          self.stop_node(i);
          for &j in order[..pos].iter().rev() {
            self.stop_node(j);
          }
          return Err(NodeInitError {
            node,
            kind: err.kind().to_string(),
          });
        }
      }
    }
    Ok(())
  }

  /// Calls `on_stop` unless the node is already stopped.
  fn stop_node(&mut self, i: usize) {
    if self.nodes[i].state == NodeState::Stopped {
      return;
    }
    let (result, _) = self.invoke(i, |node, ctx| node.on_stop(ctx));
    let slot = &mut self.nodes[i];
    slot.state = NodeState::Stopped;
    match result {
      Ok(()) => {
        debug!(node = %slot.name, "node stopped");
        self
          .observer
          .on_event(&Event::new("node.stopped").node(slot.name.clone()));
      }
      Err(err) => {
        warn!(node = %slot.name, kind = err.kind(), "node failed to stop cleanly");
        self.observer.on_event(
          &Event::new("node.stop_failed")
            .node(slot.name.clone())
            .field("kind", err.kind()),
        );
      }
    }
  }

  /// Stops started nodes in reverse start order.
  fn stop_all(&mut self) {
    for k in (0..self.started.len()).rev() {
      let i = self.started[k];
      if self.nodes[i].state == NodeState::Started {
        self.stop_node(i);
      }
    }
  }

  fn begin_drain(&mut self, request: ShutdownRequest) {
    info!(timeout = ?request.timeout, "scheduler draining");
    self.state = SchedulerState::Draining;
    self.drain_deadline = Some(request.deadline());
    for slot in &self.edges {
      slot.edge.begin_shutdown();
    }
    self.observer.on_event(
      &Event::new("scheduler.draining").field("timeout_ms", request.timeout.as_millis()),
    );
  }

  fn finish(&mut self, forced: bool) {
    let undelivered: usize = self.edges.iter().map(|slot| slot.edge.len()).sum();
    if forced {
      warn!(undelivered, "shutdown timeout elapsed, forcing stop");
      self.observer.on_event(
        &Event::new("scheduler.forced_shutdown").field("undelivered", undelivered),
      );
    }
    self.summary.forced_shutdown = forced;
    self.summary.undelivered = undelivered;
    self.stop_all();
    self.state = SchedulerState::Stopped;
    info!(forced, undelivered, "scheduler stopped");
    self.observer.on_event(
      &Event::new("scheduler.stopped").field("reason", if forced { "forced" } else { "drained" }),
    );
  }

  /// Stops everything after a propagated fault.
  fn halt(&mut self) {
    for slot in &self.edges {
      slot.edge.begin_shutdown();
    }
    self.summary.undelivered = self.edges.iter().map(|slot| slot.edge.len()).sum();
    self.stop_all();
    self.state = SchedulerState::Stopped;
    self
      .observer
      .on_event(&Event::new("scheduler.stopped").field("reason", "fault"));
  }

  /// Empties edges whose destination can no longer receive.
  fn discard_unreachable(&mut self) -> usize {
    let mut total = 0;
    for e in 0..self.edges.len() {
      let dest = self.edges[e].dest;
      if self.accepts(dest) || self.nodes[dest].state == NodeState::Created {
        continue;
      }
      let len = self.edges[e].edge.len();
      if len == 0 {
        continue;
      }
      let dropped = self.edges[e].edge.pop_batch(len).len();
      if dropped > 0 {
        self.report_discarded(e, dropped);
        total += dropped;
      }
    }
    total
  }

  fn report_discarded(&self, e: usize, count: usize) {
    let slot = &self.edges[e];
    self.observer.on_event(
      &Event::new("edge.discarded")
        .node(self.nodes[slot.dest].name.clone())
        .edge(slot.edge.label())
        .field("count", count),
    );
  }

  fn accepts(&self, i: usize) -> bool {
    let slot = &self.nodes[i];
    slot.state == NodeState::Started && !slot.faulted
  }

  fn has_pending_input(&self, i: usize) -> bool {
    self.nodes[i]
      .inputs
      .iter()
      .any(|&e| !self.edges[e].edge.is_empty())
  }

  /// Whether any Block output of node `i` is full.
  fn is_backpressured(&self, i: usize) -> bool {
    self.nodes[i].outputs.values().flatten().any(|edge| {
      matches!(edge.policy(), OverflowPolicy::Block) && edge.is_full()
    })
  }

  fn slot(&self, name: &str) -> Option<&NodeSlot> {
    self.nodes.iter().find(|slot| slot.name == name)
  }
}

impl fmt::Debug for Scheduler {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Scheduler")
      .field("state", &self.state)
      .field("subgraphs", &self.subgraphs)
      .field("nodes", &self.nodes.len())
      .field("edges", &self.edges.len())
      .field("config", &self.config)
      .finish()
  }
}
