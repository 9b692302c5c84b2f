//! A three-stage pipeline: a counter feeds a doubler that feeds a printer.
//!
//! The doubler rejects odd inputs above a threshold and reports them as
//! `NodeFault` control messages on its error port instead of stopping the run.
//! The scheduler shuts itself down once the graph has been idle for a while.

use std::time::Duration;
use weavecore::{
  ErrorPolicy, Message, Node, NodeConfig, NodeContext, NodeError, NodeFault, OverflowPolicy,
  PortSpec, PortType, Scheduler, SchedulerConfig, Subgraph,
};

struct Counter {
  outputs: Vec<PortSpec>,
  next: i64,
  last: i64,
}

impl Node for Counter {
  fn name(&self) -> &str {
    "counter"
  }

  fn input_ports(&self) -> &[PortSpec] {
    &[]
  }

  fn output_ports(&self) -> &[PortSpec] {
    &self.outputs
  }

  fn on_tick(&mut self, ctx: &mut NodeContext<'_>) -> Result<(), NodeError> {
    if self.next <= self.last {
      ctx.emit("out", Message::data(self.next).with_metadata("seq", self.next))?;
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
}

struct Doubler {
  inputs: Vec<PortSpec>,
  outputs: Vec<PortSpec>,
}

impl Node for Doubler {
  fn name(&self) -> &str {
    "doubler"
  }

  fn input_ports(&self) -> &[PortSpec] {
    &self.inputs
  }

  fn output_ports(&self) -> &[PortSpec] {
    &self.outputs
  }

  fn config(&self) -> NodeConfig {
    NodeConfig::new(ErrorPolicy::EmitError)
  }

  fn on_message(
    &mut self,
    ctx: &mut NodeContext<'_>,
    _port: &str,
    message: Message,
  ) -> Result<(), NodeError> {
    let value = *message
      .payload_as::<i64>()
      .ok_or_else(|| NodeError::new("UnexpectedPayload"))?;
    if value > 5 && value % 2 == 1 {
      return Err(NodeError::new("OddValue").with_detail(format!("refusing {value}")));
    }
    ctx.emit("out", Message::data(value * 2))?;
    Ok(())
  }
}

struct Printer {
  inputs: Vec<PortSpec>,
}

impl Node for Printer {
  fn name(&self) -> &str {
    "printer"
  }

  fn input_ports(&self) -> &[PortSpec] {
    &self.inputs
  }

  fn output_ports(&self) -> &[PortSpec] {
    &[]
  }

  fn on_message(
    &mut self,
    _ctx: &mut NodeContext<'_>,
    port: &str,
    message: Message,
  ) -> Result<(), NodeError> {
    if let Some(fault) = message.payload_as::<NodeFault>() {
      println!("  ⚠️  {} failed with {}", fault.node_id, fault.error_kind);
    } else if let Some(value) = message.payload_as::<i64>() {
      println!("  {port}: {value}");
    }
    Ok(())
  }

  fn on_stop(&mut self, _ctx: &mut NodeContext<'_>) -> Result<(), NodeError> {
    println!("  printer stopped");
    Ok(())
  }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::INFO)
    .init();

  println!("🚀 weavecore Pipeline Example");
  println!("============================");

  let int = PortType::of::<i64>();
  let mut graph = Subgraph::new("demo");
  graph.add_node(Box::new(Counter {
    outputs: vec![PortSpec::new("out", int.clone())],
    next: 1,
    last: 10,
  }))?;
  graph.add_node(Box::new(Doubler {
    inputs: vec![PortSpec::new("in", int.clone())],
    outputs: vec![
      PortSpec::new("out", int.clone()),
      PortSpec::new("error", PortType::of::<NodeFault>()),
    ],
  }))?;
  graph.add_node(Box::new(Printer {
    inputs: vec![PortSpec::new("values", int), PortSpec::any("faults")],
  }))?;
  graph.connect(("counter", "out"), ("doubler", "in"), 4, OverflowPolicy::Block)?;
  graph.connect(("doubler", "out"), ("printer", "values"), 4, OverflowPolicy::Block)?;
  graph.connect(("doubler", "error"), ("printer", "faults"), 16, OverflowPolicy::Latest)?;

  let config = SchedulerConfig::default()
    .with_tick_interval(Duration::from_millis(10))
    .with_idle_timeout(Some(Duration::from_millis(100)));
  let mut scheduler = Scheduler::new(config)?;
  scheduler.register(graph)?;
  let summary = scheduler.run().await?;

  println!();
  println!(
    "✅ Delivered {} messages in {} ticks",
    summary.delivered, summary.ticks
  );
  Ok(())
}
