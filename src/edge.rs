//! # Edges and Overflow Policies
//!
//! An [`Edge`] is a bounded FIFO between exactly one output port and one input
//! port. It never holds more than `capacity` messages. What happens when a
//! producer pushes onto a full edge is decided by its [`OverflowPolicy`]:
//!
//! | Policy     | When full                                                   |
//! |------------|-------------------------------------------------------------|
//! | `Block`    | the pusher waits for space (or fails if it cannot wait)     |
//! | `Drop`     | the new message is discarded                                |
//! | `Latest`   | the oldest queued message is evicted, the new one appended  |
//! | `Coalesce` | the new payload is merged into the tail message             |
//!
//! ## Concurrency
//!
//! An edge is written by its source node, either from the scheduler loop through
//! [`crate::node::NodeContext::emit`] or from a producer task through
//! [`Edge::push`], and read only by the scheduler through [`Edge::pop_batch`].
//! The queue sits behind a short-lived mutex and Block waiters park on a
//! [`tokio::sync::Notify`] that every successful pop wakes. Several producers on
//! one edge are memory-safe but their interleaving is unspecified; callers that
//! need an order serialise themselves.
//!
//! ## Example
//!
//! ```rust
//! use weavecore::edge::{Edge, Endpoint, OverflowPolicy, PushOutcome};
//! use weavecore::message::Message;
//!
//! let edge = Edge::new(
//!     Endpoint::new("source", "out"),
//!     Endpoint::new("sink", "in"),
//!     2,
//!     OverflowPolicy::Latest,
//! )?;
//!
//! edge.try_push(Message::data(1))?;
//! edge.try_push(Message::data(2))?;
//! assert_eq!(edge.try_push(Message::data(3))?, PushOutcome::Evicted);
//!
//! let batch = edge.pop_batch(8);
//! assert_eq!(batch[0].payload_as::<i32>(), Some(&2));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use crate::error::{ConfigError, EdgeError};
use crate::message::{Message, MessageKind, Payload};
use crate::observer::{Event, SharedObserver};
use crate::port::PortType;
use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Merge function used by [`OverflowPolicy::Coalesce`].
///
/// Called as `merge(old_tail_payload, new_payload)`. It must be deterministic
/// and free of side effects; the runtime does not check either property.
pub type MergeFn = Arc<dyn Fn(&Payload, &Payload) -> Payload + Send + Sync>;

/// Behaviour of an edge when a push finds it full.
#[derive(Clone)]
pub enum OverflowPolicy {
  /// Suspend the producer until space is available. No loss, strict order.
  Block,
  /// Discard the incoming message.
  Drop,
  /// Evict the oldest queued message and append the incoming one.
  Latest,
  /// Merge the incoming payload into the most recently queued message.
  Coalesce(MergeFn),
}

impl OverflowPolicy {
  /// Coalesce with a merge function over type-erased payloads.
  pub fn coalesce<F>(merge: F) -> Self
  where
    F: Fn(&Payload, &Payload) -> Payload + Send + Sync + 'static,
  {
    OverflowPolicy::Coalesce(Arc::new(merge))
  }

  /// Coalesce with a merge function over payloads of type `T`.
  ///
  /// If either payload is not a `T` the incoming payload replaces the tail
  /// unmerged. That can only happen when wiring bypassed port typing, which is a
  /// caller bug.
  pub fn coalesce_typed<T, F>(merge: F) -> Self
  where
    T: Any + Send + Sync,
    F: Fn(&T, &T) -> T + Send + Sync + 'static,
  {
    Self::coalesce(move |old: &Payload, new: &Payload| {
      match (old.downcast_ref::<T>(), new.downcast_ref::<T>()) {
        (Some(a), Some(b)) => Arc::new(merge(a, b)) as Payload,
        _ => Arc::clone(new),
      }
    })
  }

  /// Short policy name for logs and events.
  pub fn name(&self) -> &'static str {
    match self {
      OverflowPolicy::Block => "block",
      OverflowPolicy::Drop => "drop",
      OverflowPolicy::Latest => "latest",
      OverflowPolicy::Coalesce(_) => "coalesce",
    }
  }
}

impl fmt::Debug for OverflowPolicy {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      OverflowPolicy::Block => f.write_str("Block"),
      OverflowPolicy::Drop => f.write_str("Drop"),
      OverflowPolicy::Latest => f.write_str("Latest"),
      OverflowPolicy::Coalesce(_) => f.write_str("Coalesce(<fn>)"),
    }
  }
}

/// What a successful push did.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PushOutcome {
  /// Appended with room to spare.
  Enqueued,
  /// Edge was full (`Drop`): the message was discarded.
  Dropped,
  /// Edge was full (`Latest`): the oldest message was evicted to make room.
  Evicted,
  /// Edge was full (`Coalesce`): the message was merged into the tail.
  Merged,
}

impl PushOutcome {
  fn as_str(self) -> &'static str {
    match self {
      PushOutcome::Enqueued => "enqueued",
      PushOutcome::Dropped => "dropped",
      PushOutcome::Evicted => "evicted",
      PushOutcome::Merged => "merged",
    }
  }
}

/// One end of an edge: a node and one of its ports.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Endpoint {
  /// Node name.
  pub node: String,
  /// Port name.
  pub port: String,
}

impl Endpoint {
  /// Creates an endpoint.
  pub fn new(node: impl Into<String>, port: impl Into<String>) -> Self {
    Self {
      node: node.into(),
      port: port.into(),
    }
  }
}

impl fmt::Display for Endpoint {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}.{}", self.node, self.port)
  }
}

/// Running counters for one edge.
#[derive(Debug, Default)]
pub struct EdgeStats {
  enqueued: AtomicU64,
  dropped: AtomicU64,
  evicted: AtomicU64,
  merged: AtomicU64,
  popped: AtomicU64,
}

/// Point-in-time copy of [`EdgeStats`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct EdgeStatsSnapshot {
  /// Messages appended without overflow.
  pub enqueued: u64,
  /// Messages discarded by `Drop`.
  pub dropped: u64,
  /// Messages evicted by `Latest`.
  pub evicted: u64,
  /// Pushes folded into the tail by `Coalesce`.
  pub merged: u64,
  /// Messages removed by the scheduler.
  pub popped: u64,
}

impl EdgeStats {
  fn record(&self, outcome: PushOutcome) {
    let counter = match outcome {
      PushOutcome::Enqueued => &self.enqueued,
      PushOutcome::Dropped => &self.dropped,
      PushOutcome::Evicted => &self.evicted,
      PushOutcome::Merged => &self.merged,
    };
    counter.fetch_add(1, Ordering::Relaxed);
  }

  /// Reads every counter.
  pub fn snapshot(&self) -> EdgeStatsSnapshot {
    EdgeStatsSnapshot {
      enqueued: self.enqueued.load(Ordering::Relaxed),
      dropped: self.dropped.load(Ordering::Relaxed),
      evicted: self.evicted.load(Ordering::Relaxed),
      merged: self.merged.load(Ordering::Relaxed),
      popped: self.popped.load(Ordering::Relaxed),
    }
  }
}

struct Hooks {
  observer: SharedObserver,
  wake: Arc<Notify>,
  label: String,
  dest_node: String,
}

struct Queue {
  items: VecDeque<Message>,
  shutting_down: bool,
}

enum Offer {
  Done(PushOutcome),
  Full(Message),
  Cancelled,
}

/// A bounded, typed queue between one output port and one input port.
pub struct Edge {
  source: Endpoint,
  dest: Endpoint,
  label: String,
  port_type: PortType,
  capacity: usize,
  policy: OverflowPolicy,
  queue: Mutex<Queue>,
  space: Notify,
  stats: EdgeStats,
  hooks: OnceLock<Hooks>,
}

impl Edge {
  /// Creates an empty edge.
  ///
  /// # Errors
  ///
  /// [`ConfigError::ZeroCapacity`] if `capacity` is zero.
  pub fn new(
    source: Endpoint,
    dest: Endpoint,
    capacity: usize,
    policy: OverflowPolicy,
  ) -> Result<Self, ConfigError> {
    let label = format!("{} -> {}", source, dest);
    trace!(
      "Edge::new(edge={}, capacity={}, policy={})",
      label,
      capacity,
      policy.name()
    );
    if capacity == 0 {
      return Err(ConfigError::ZeroCapacity { edge: label });
    }
    Ok(Self {
      source,
      dest,
      label,
      port_type: PortType::any(),
      capacity,
      policy,
      queue: Mutex::new(Queue {
        items: VecDeque::with_capacity(capacity),
        shutting_down: false,
      }),
      space: Notify::new(),
      stats: EdgeStats::default(),
      hooks: OnceLock::new(),
    })
  }

  pub(crate) fn with_port_type(mut self, port_type: PortType) -> Self {
    self.port_type = port_type;
    self
  }

  /// The producing endpoint.
  pub fn source(&self) -> &Endpoint {
    &self.source
  }

  /// The consuming endpoint.
  pub fn dest(&self) -> &Endpoint {
    &self.dest
  }

  /// `source -> dest` label used in logs, events and errors. Qualified with the
  /// subgraph name once the edge is registered with a scheduler.
  pub fn label(&self) -> &str {
    self
      .hooks
      .get()
      .map_or(self.label.as_str(), |hooks| hooks.label.as_str())
  }

  /// Type tag of the source output port.
  pub fn port_type(&self) -> &PortType {
    &self.port_type
  }

  /// Maximum number of queued messages.
  pub fn capacity(&self) -> usize {
    self.capacity
  }

  /// The overflow policy.
  pub fn policy(&self) -> &OverflowPolicy {
    &self.policy
  }

  /// Number of queued messages.
  pub fn len(&self) -> usize {
    self.lock().items.len()
  }

  /// Whether no message is queued.
  pub fn is_empty(&self) -> bool {
    self.lock().items.is_empty()
  }

  /// Whether the queue is at capacity.
  pub fn is_full(&self) -> bool {
    self.lock().items.len() >= self.capacity
  }

  /// Kind of the message at the head of the queue.
  pub fn head_kind(&self) -> Option<MessageKind> {
    self.lock().items.front().map(Message::kind)
  }

  /// Overflow and throughput counters.
  pub fn stats(&self) -> &EdgeStats {
    &self.stats
  }

  /// Whether the owning scheduler has begun shutting down.
  pub fn is_shutting_down(&self) -> bool {
    self.lock().shutting_down
  }

  /// Pushes without waiting.
  ///
  /// Non-Block policies always succeed and report what they did. A full Block
  /// edge returns [`EdgeError::Full`], or [`EdgeError::Cancelled`] once shutdown
  /// has begun; the queue is unchanged in both cases.
  pub fn try_push(&self, message: Message) -> Result<PushOutcome, EdgeError> {
    match self.offer(message) {
      Offer::Done(outcome) => Ok(outcome),
      Offer::Full(_) => {
        self.report_overflow("rejected");
        Err(EdgeError::Full {
          edge: self.label().to_string(),
        })
      }
      Offer::Cancelled => Err(self.cancelled()),
    }
  }

  /// Pushes, waiting for space under the Block policy.
  ///
  /// Fails with [`EdgeError::Cancelled`] if shutdown begins while waiting.
  pub async fn push(&self, message: Message) -> Result<PushOutcome, EdgeError> {
    self.push_until(message, None).await
  }

  /// Like [`Edge::push`] but gives up after `timeout` with
  /// [`EdgeError::BackpressureTimeout`]. The queue is unchanged on timeout.
  pub async fn push_timeout(
    &self,
    message: Message,
    timeout: Duration,
  ) -> Result<PushOutcome, EdgeError> {
    self.push_until(message, Some(Instant::now() + timeout)).await
  }

  async fn push_until(
    &self,
    mut message: Message,
    deadline: Option<Instant>,
  ) -> Result<PushOutcome, EdgeError> {
    let started = Instant::now();
    let mut reported = false;
    loop {
      // Register interest before looking at the queue so a pop between the
      // check and the await still wakes us.
      let notified = self.space.notified();
      tokio::pin!(notified);
      notified.as_mut().enable();

      match self.offer(message) {
        Offer::Done(outcome) => return Ok(outcome),
        Offer::Cancelled => return Err(self.cancelled()),
        Offer::Full(returned) => message = returned,
      }
      if !reported {
        self.report_overflow("blocked");
        reported = true;
      }
      trace!("Edge::push waiting for space on {}", self.label());

      match deadline {
        None => notified.await,
        Some(deadline) => {
          if tokio::time::timeout_at(deadline, notified).await.is_err() {
            let waited = started.elapsed();
            debug!(edge = %self.label(), ?waited, "block push timed out");
            return Err(EdgeError::BackpressureTimeout {
              edge: self.label().to_string(),
              waited,
            });
          }
        }
      }
    }
  }

  /// Removes up to `max_n` messages, oldest first. Never waits.
  pub fn pop_batch(&self, max_n: usize) -> Vec<Message> {
    let batch: Vec<Message> = {
      let mut queue = self.lock();
      let n = max_n.min(queue.items.len());
      queue.items.drain(..n).collect()
    };
    if !batch.is_empty() {
      self
        .stats
        .popped
        .fetch_add(batch.len() as u64, Ordering::Relaxed);
      self.space.notify_waiters();
    }
    batch
  }

  /// Removes the oldest message. Never waits.
  pub fn pop(&self) -> Option<Message> {
    let message = self.lock().items.pop_front();
    if message.is_some() {
      self.stats.popped.fetch_add(1, Ordering::Relaxed);
      self.space.notify_waiters();
    }
    message
  }

  /// Stops Block waiters from waiting: current and future waits fail with
  /// [`EdgeError::Cancelled`]. Pushes that find space still succeed.
  pub(crate) fn begin_shutdown(&self) {
    self.lock().shutting_down = true;
    self.space.notify_waiters();
  }

  /// Connects the edge to its scheduler's observer and wake-up signal.
  pub(crate) fn attach(
    &self,
    observer: SharedObserver,
    wake: Arc<Notify>,
    label: String,
    dest_node: String,
  ) {
    let _ = self.hooks.set(Hooks {
      observer,
      wake,
      label,
      dest_node,
    });
  }

  fn offer(&self, message: Message) -> Offer {
    let outcome = {
      let mut queue = self.lock();
      let outcome = if queue.items.len() < self.capacity {
        queue.items.push_back(message);
        PushOutcome::Enqueued
      } else {
        match &self.policy {
          OverflowPolicy::Block if queue.shutting_down => return Offer::Cancelled,
          OverflowPolicy::Block => return Offer::Full(message),
          OverflowPolicy::Drop => PushOutcome::Dropped,
          OverflowPolicy::Latest => {
            queue.items.pop_front();
            queue.items.push_back(message);
            PushOutcome::Evicted
          }
          OverflowPolicy::Coalesce(merge) => {
            // Full and capacity >= 1, so there is always a tail.
            if let Some(tail) = queue.items.back_mut() {
              let payload = merge(tail.payload(), message.payload());
              *tail = tail.merged(&message, payload);
            }
            PushOutcome::Merged
          }
        }
      };
      debug_assert!(queue.items.len() <= self.capacity);
      outcome
    };

    self.stats.record(outcome);
    if outcome != PushOutcome::Enqueued {
      self.report_overflow(outcome.as_str());
    }
    if outcome != PushOutcome::Dropped {
      if let Some(hooks) = self.hooks.get() {
        hooks.wake.notify_one();
      }
    }
    Offer::Done(outcome)
  }

  fn report_overflow(&self, outcome: &'static str) {
    debug!(edge = %self.label(), policy = self.policy.name(), outcome, "edge overflow");
    if let Some(hooks) = self.hooks.get() {
      hooks.observer.on_event(
        &Event::new("edge.overflow")
          .node(hooks.dest_node.clone())
          .edge(hooks.label.clone())
          .field("policy", self.policy.name())
          .field("outcome", outcome),
      );
    }
  }

  fn cancelled(&self) -> EdgeError {
    EdgeError::Cancelled {
      edge: self.label().to_string(),
    }
  }

  fn lock(&self) -> MutexGuard<'_, Queue> {
    self.queue.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

impl fmt::Debug for Edge {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Edge")
      .field("label", &self.label())
      .field("capacity", &self.capacity)
      .field("policy", &self.policy)
      .field("len", &self.len())
      .finish()
  }
}
