//! End-to-end runs of the scheduler through the public API.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use weavecore::{
  ErrorPolicy, Message, Node, NodeConfig, NodeContext, NodeError, NodeState, OverflowPolicy,
  PortSpec, PortType, RecordingObserver, Scheduler, SchedulerConfig, SchedulerError,
  SchedulerState, SharedObserver, Subgraph,
};

type Log = Arc<Mutex<Vec<String>>>;

fn new_log() -> Log {
  Arc::new(Mutex::new(Vec::new()))
}

fn entries(log: &Log) -> Vec<String> {
  log.lock().unwrap().clone()
}

// ============================================================================
// Test Nodes
// ============================================================================

/// Emits `0..count` from `on_tick`, one value per tick.
struct Counter {
  name: String,
  outputs: Vec<PortSpec>,
  next: i64,
  count: i64,
  log: Log,
}

impl Counter {
  fn new(name: &str, count: i64, log: &Log) -> Box<Self> {
    Box::new(Self {
      name: name.to_string(),
      outputs: vec![PortSpec::new("out", PortType::of::<i64>())],
      next: 0,
      count,
      log: Arc::clone(log),
    })
  }
}

impl Node for Counter {
  fn name(&self) -> &str {
    &self.name
  }

  fn input_ports(&self) -> &[PortSpec] {
    &[]
  }

  fn output_ports(&self) -> &[PortSpec] {
    &self.outputs
  }

  fn on_tick(&mut self, ctx: &mut NodeContext<'_>) -> Result<(), NodeError> {
    if self.next < self.count {
      ctx.emit("out", Message::data(self.next))?;
      self.next += 1;
    }
    Ok(())
  }

  fn on_message(
    &mut self,
    _ctx: &mut NodeContext<'_>,
    _port: &str,
    _message: Message,
  ) -> Result<(), NodeError> {
    Ok(())
  }

  fn on_stop(&mut self, ctx: &mut NodeContext<'_>) -> Result<(), NodeError> {
    self.log.lock().unwrap().push(format!("stop {}", ctx.node_name()));
    Ok(())
  }
}

/// Output-only node whose edge is fed by an external task.
struct Gateway {
  outputs: Vec<PortSpec>,
}

impl Gateway {
  fn new() -> Box<Self> {
    Box::new(Self {
      outputs: vec![PortSpec::new("out", PortType::of::<i64>())],
    })
  }
}

impl Node for Gateway {
  fn name(&self) -> &str {
    "gateway"
  }

  fn input_ports(&self) -> &[PortSpec] {
    &[]
  }

  fn output_ports(&self) -> &[PortSpec] {
    &self.outputs
  }

  fn on_message(
    &mut self,
    _ctx: &mut NodeContext<'_>,
    _port: &str,
    _message: Message,
  ) -> Result<(), NodeError> {
    Ok(())
  }
}

/// Records every integer it receives; optionally fails on one value.
struct Collector {
  name: String,
  inputs: Vec<PortSpec>,
  received: Arc<Mutex<Vec<i64>>>,
  fail_on: Option<i64>,
  policy: ErrorPolicy,
  log: Log,
}

impl Collector {
  fn new(name: &str, received: &Arc<Mutex<Vec<i64>>>, log: &Log) -> Box<Self> {
    Box::new(Self {
      name: name.to_string(),
      inputs: vec![PortSpec::new("in", PortType::of::<i64>())],
      received: Arc::clone(received),
      fail_on: None,
      policy: ErrorPolicy::Isolate,
      log: Arc::clone(log),
    })
  }

  fn failing_on(mut self: Box<Self>, value: i64, policy: ErrorPolicy) -> Box<Self> {
    self.fail_on = Some(value);
    self.policy = policy;
    self
  }
}

impl Node for Collector {
  fn name(&self) -> &str {
    &self.name
  }

  fn input_ports(&self) -> &[PortSpec] {
    &self.inputs
  }

  fn output_ports(&self) -> &[PortSpec] {
    &[]
  }

  fn config(&self) -> NodeConfig {
    NodeConfig::new(self.policy)
  }

  fn on_message(
    &mut self,
    _ctx: &mut NodeContext<'_>,
    _port: &str,
    message: Message,
  ) -> Result<(), NodeError> {
    let value = *message
      .payload_as::<i64>()
      .ok_or_else(|| NodeError::new("UnexpectedPayload"))?;
    if self.fail_on == Some(value) {
      return Err(NodeError::new("Rejected"));
    }
    self.received.lock().unwrap().push(value);
    Ok(())
  }

  fn on_stop(&mut self, ctx: &mut NodeContext<'_>) -> Result<(), NodeError> {
    self.log.lock().unwrap().push(format!("stop {}", ctx.node_name()));
    Ok(())
  }
}

fn fast_config() -> SchedulerConfig {
  SchedulerConfig::default()
    .with_idle_sleep(Duration::from_millis(1))
    .with_shutdown_timeout(Duration::from_secs(1))
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_producer_consumer_runs_to_idle_timeout() {
  let log = new_log();
  let received = Arc::new(Mutex::new(Vec::new()));
  let mut graph = Subgraph::new("main");
  graph.add_node(Counter::new("producer", 5, &log)).unwrap();
  graph
    .add_node(Collector::new("consumer", &received, &log))
    .unwrap();
  graph
    .connect(("producer", "out"), ("consumer", "in"), 8, OverflowPolicy::Block)
    .unwrap();

  let config = fast_config().with_idle_timeout(Some(Duration::from_millis(30)));
  let mut scheduler = Scheduler::new(config).unwrap();
  scheduler.register(graph).unwrap();

  let summary = tokio::time::timeout(Duration::from_secs(5), scheduler.run())
    .await
    .expect("run did not finish")
    .unwrap();

  assert_eq!(*received.lock().unwrap(), vec![0, 1, 2, 3, 4]);
  assert_eq!(summary.delivered, 5);
  assert!(!summary.forced_shutdown);
  assert_eq!(summary.undelivered, 0);
  assert_eq!(scheduler.state(), SchedulerState::Stopped);
  // Downstream stops first.
  assert_eq!(
    entries(&log),
    vec!["stop main/consumer", "stop main/producer"]
  );
}

#[tokio::test]
async fn test_external_producer_with_backpressure() {
  let log = new_log();
  let received = Arc::new(Mutex::new(Vec::new()));
  let mut graph = Subgraph::new("ingest");
  graph.add_node(Gateway::new()).unwrap();
  graph.add_node(Collector::new("sink", &received, &log)).unwrap();
  let edge = graph
    .connect(("gateway", "out"), ("sink", "in"), 4, OverflowPolicy::Block)
    .unwrap();

  let mut scheduler = Scheduler::new(fast_config().with_max_batch_per_node(2)).unwrap();
  scheduler.register(graph).unwrap();
  let handle = scheduler.shutdown_handle();

  let producer = tokio::spawn(async move {
    for i in 0..100i64 {
      assert!(edge.len() <= 4);
      edge.push(Message::data(i)).await.unwrap();
    }
    handle.shutdown(None);
  });

  let summary = tokio::time::timeout(Duration::from_secs(5), scheduler.run())
    .await
    .expect("run did not finish")
    .unwrap();
  producer.await.unwrap();

  assert_eq!(*received.lock().unwrap(), (0..100).collect::<Vec<i64>>());
  assert!(!summary.forced_shutdown);
  assert_eq!(scheduler.node_state("ingest/sink"), Some(NodeState::Stopped));
}

#[tokio::test]
async fn test_shutdown_from_another_task() {
  let log = new_log();
  let received = Arc::new(Mutex::new(Vec::new()));
  let mut graph = Subgraph::new("main");
  graph.add_node(Counter::new("producer", i64::MAX, &log)).unwrap();
  graph
    .add_node(Collector::new("consumer", &received, &log))
    .unwrap();
  graph
    .connect(("producer", "out"), ("consumer", "in"), 4, OverflowPolicy::Latest)
    .unwrap();

  let mut scheduler = Scheduler::new(fast_config()).unwrap();
  scheduler.register(graph).unwrap();
  let handle = scheduler.shutdown_handle();
  tokio::spawn(async move {
    tokio::time::sleep(Duration::from_millis(20)).await;
    handle.shutdown(Some(Duration::from_millis(500)));
  });

  let summary = tokio::time::timeout(Duration::from_secs(5), scheduler.run())
    .await
    .expect("run did not finish")
    .unwrap();

  assert!(summary.ticks > 0);
  assert!(!received.lock().unwrap().is_empty());
  let values = received.lock().unwrap().clone();
  assert!(values.windows(2).all(|w| w[0] < w[1]));
  assert_eq!(entries(&log).len(), 2);
  assert!(matches!(scheduler.run().await, Err(SchedulerError::Stopped)));
}

#[tokio::test]
async fn test_propagate_fault_ends_run() {
  let log = new_log();
  let received = Arc::new(Mutex::new(Vec::new()));
  let observer = Arc::new(RecordingObserver::new());
  let mut graph = Subgraph::new("main");
  graph.add_node(Counter::new("producer", 10, &log)).unwrap();
  graph
    .add_node(
      Collector::new("consumer", &received, &log).failing_on(3, ErrorPolicy::Propagate),
    )
    .unwrap();
  graph
    .connect(("producer", "out"), ("consumer", "in"), 8, OverflowPolicy::Block)
    .unwrap();

  let mut scheduler =
    Scheduler::with_observer(fast_config(), observer.clone() as SharedObserver).unwrap();
  scheduler.register(graph).unwrap();

  let err = tokio::time::timeout(Duration::from_secs(5), scheduler.run())
    .await
    .expect("run did not finish")
    .unwrap_err();

  assert_eq!(
    err,
    SchedulerError::Fault {
      node: "main/consumer".to_string(),
      edge: Some("main/producer.out -> main/consumer.in".to_string()),
      kind: "Rejected".to_string(),
    }
  );
  assert_eq!(*received.lock().unwrap(), vec![0, 1, 2]);
  assert_eq!(entries(&log).len(), 2);
  assert_eq!(observer.count("node.stopped"), 2);
  assert_eq!(scheduler.state(), SchedulerState::Stopped);
}

#[tokio::test]
async fn test_isolated_consumer_does_not_stop_run() {
  let log = new_log();
  let good = Arc::new(Mutex::new(Vec::new()));
  let bad = Arc::new(Mutex::new(Vec::new()));
  let mut graph = Subgraph::new("main");
  graph.add_node(Counter::new("producer", 6, &log)).unwrap();
  graph.add_node(Collector::new("good", &good, &log)).unwrap();
  graph
    .add_node(Collector::new("bad", &bad, &log).failing_on(2, ErrorPolicy::Isolate))
    .unwrap();
  graph
    .connect(("producer", "out"), ("good", "in"), 8, OverflowPolicy::Block)
    .unwrap();
  graph
    .connect(("producer", "out"), ("bad", "in"), 8, OverflowPolicy::Drop)
    .unwrap();

  let config = fast_config().with_idle_timeout(Some(Duration::from_millis(30)));
  let mut scheduler = Scheduler::new(config).unwrap();
  scheduler.register(graph).unwrap();
  tokio::time::timeout(Duration::from_secs(5), scheduler.run())
    .await
    .expect("run did not finish")
    .unwrap();

  assert_eq!(*good.lock().unwrap(), vec![0, 1, 2, 3, 4, 5]);
  assert_eq!(*bad.lock().unwrap(), vec![0, 1]);
  assert_eq!(scheduler.is_faulted("main/bad"), Some(true));
  // Isolated nodes are still stopped exactly once.
  assert_eq!(entries(&log).len(), 3);
}
