//! # Subgraph Composition
//!
//! A [`Subgraph`] is a named bundle of nodes and the edges between them. It owns
//! both exclusively; edges refer to nodes by name, never by pointer.
//!
//! ## Wiring
//!
//! [`Subgraph::connect`] validates every connection when it is made:
//!
//! - both endpoints exist,
//! - the source is an output and the destination an input,
//! - the input's [`PortType`](crate::port::PortType) accepts the output's,
//! - the input is not already fed by another edge (one producer per input;
//!   fan-out is several edges from one output).
//!
//! A violation returns a [`WiringError`] and creates no edge.
//!
//! ## Nesting
//!
//! A subgraph can publish internal ports under external names with
//! [`Subgraph::expose_input`] and [`Subgraph::expose_output`]. Adding it to a
//! parent with [`Subgraph::add_subgraph`] moves its nodes into the parent as
//! `child/node` and makes the exposed ports addressable as `(child, port)`.
//!
//! # Example
//!
//! ```rust,no_run
//! use weavecore::edge::OverflowPolicy;
//! use weavecore::subgraph::Subgraph;
//! # fn nodes() -> (Box<dyn weavecore::node::Node>, Box<dyn weavecore::node::Node>) { unimplemented!() }
//!
//! let (source, sink) = nodes();
//! let mut graph = Subgraph::new("ingest");
//! graph.add_node(source)?;
//! graph.add_node(sink)?;
//! graph.connect(("source", "out"), ("sink", "in"), 8, OverflowPolicy::Block)?;
//! # Ok::<(), weavecore::error::Error>(())
//! ```

use crate::edge::{Edge, Endpoint, OverflowPolicy};
use crate::error::{Error, WiringError};
use crate::node::Node;
use crate::port::{PortDirection, PortSpec};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

/// A node owned by a subgraph, under its subgraph-local key.
pub(crate) struct NodeEntry {
  pub(crate) key: String,
  pub(crate) node: Box<dyn Node>,
}

/// An edge together with the subgraph-local endpoints it connects.
#[derive(Clone)]
pub(crate) struct EdgeBinding {
  pub(crate) source: Endpoint,
  pub(crate) dest: Endpoint,
  pub(crate) edge: Arc<Edge>,
}

/// An internal port published under an external name.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExposedPort {
  /// External port name.
  pub name: String,
  /// Internal endpoint the external port maps to.
  pub target: Endpoint,
  /// Spec of the internal port, renamed to the external name.
  pub spec: PortSpec,
}

/// A named composition of nodes and edges.
pub struct Subgraph {
  name: String,
  nodes: Vec<NodeEntry>,
  index: HashMap<String, usize>,
  edges: Vec<EdgeBinding>,
  exposed_inputs: Vec<ExposedPort>,
  exposed_outputs: Vec<ExposedPort>,
  /// Exposed ports of absorbed children: (child, port, direction) -> internal port.
  aliases: HashMap<(String, String, PortDirection), (Endpoint, PortSpec)>,
}

impl Subgraph {
  /// Creates an empty subgraph.
  pub fn new(name: impl Into<String>) -> Self {
    let name = name.into();
    trace!("Subgraph::new(name={})", name);
    Self {
      name,
      nodes: Vec::new(),
      index: HashMap::new(),
      edges: Vec::new(),
      exposed_inputs: Vec::new(),
      exposed_outputs: Vec::new(),
      aliases: HashMap::new(),
    }
  }

  /// The subgraph name.
  pub fn name(&self) -> &str {
    &self.name
  }

  /// Number of nodes, including those absorbed from children.
  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  /// Whether the subgraph has no nodes.
  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }

  /// Node keys in insertion order.
  pub fn node_names(&self) -> impl Iterator<Item = &str> {
    self.nodes.iter().map(|entry| entry.key.as_str())
  }

  /// Looks up a node by key.
  pub fn node(&self, name: &str) -> Option<&dyn Node> {
    self.index.get(name).map(|&i| self.nodes[i].node.as_ref())
  }

  /// All edges, in the order they were connected.
  pub fn edges(&self) -> impl Iterator<Item = &Arc<Edge>> {
    self.edges.iter().map(|binding| &binding.edge)
  }

  /// The edge feeding input `(node, port)`, if connected.
  pub fn edge_into(&self, node: &str, port: &str) -> Option<&Arc<Edge>> {
    self
      .edges
      .iter()
      .find(|b| b.dest.node == node && b.dest.port == port)
      .map(|b| &b.edge)
  }

  /// Ports published with [`Subgraph::expose_input`].
  pub fn exposed_inputs(&self) -> &[ExposedPort] {
    &self.exposed_inputs
  }

  /// Ports published with [`Subgraph::expose_output`].
  pub fn exposed_outputs(&self) -> &[ExposedPort] {
    &self.exposed_outputs
  }

  /// Adds a node under its own name.
  ///
  /// # Errors
  ///
  /// [`WiringError::DuplicateNode`] if the name is taken (by a node or an
  /// absorbed child), [`WiringError::DuplicatePort`] if the node declares the
  /// same port name twice in one direction.
  pub fn add_node(&mut self, node: Box<dyn Node>) -> Result<(), WiringError> {
    let key = node.name().to_string();
    trace!("Subgraph::add_node(subgraph={}, node={})", self.name, key);
    self.check_name_free(&key)?;
    check_unique_ports(&key, node.input_ports(), PortDirection::Input)?;
    check_unique_ports(&key, node.output_ports(), PortDirection::Output)?;
    self.insert(key, node);
    Ok(())
  }

  /// Connects an output port to an input port with a new bounded edge.
  ///
  /// Returns the edge so external producers may push onto it directly.
  ///
  /// # Errors
  ///
  /// - [`Error::Wiring`] for unknown nodes or ports, direction or type
  ///   mismatches, and inputs that already have a producer.
  /// - [`Error::InvalidConfiguration`] for a zero capacity.
  pub fn connect(
    &mut self,
    source: (&str, &str),
    dest: (&str, &str),
    capacity: usize,
    policy: OverflowPolicy,
  ) -> Result<Arc<Edge>, Error> {
    trace!(
      "Subgraph::connect(subgraph={}, source={}.{}, dest={}.{}, capacity={}, policy={})",
      self.name,
      source.0,
      source.1,
      dest.0,
      dest.1,
      capacity,
      policy.name()
    );
    let (source, source_spec) = self.resolve(source, PortDirection::Output)?;
    let (dest, dest_spec) = self.resolve(dest, PortDirection::Input)?;

    if !dest_spec.port_type.accepts(&source_spec.port_type) {
      return Err(
        WiringError::TypeMismatch {
          output: source.to_string(),
          output_type: source_spec.port_type.to_string(),
          input: dest.to_string(),
          input_type: dest_spec.port_type.to_string(),
        }
        .into(),
      );
    }

    if let Some(existing) = self.edges.iter().find(|b| b.dest == dest) {
      return Err(
        WiringError::InputAlreadyBound {
          dest: dest.to_string(),
          existing: existing.source.to_string(),
        }
        .into(),
      );
    }

    let edge = Arc::new(
      Edge::new(source.clone(), dest.clone(), capacity, policy)?
        .with_port_type(source_spec.port_type),
    );
    debug!(subgraph = %self.name, edge = %edge.label(), "edge connected");
    self.edges.push(EdgeBinding {
      source,
      dest,
      edge: Arc::clone(&edge),
    });
    Ok(edge)
  }

  /// Publishes input `(node, port)` as external input `name`.
  pub fn expose_input(
    &mut self,
    name: impl Into<String>,
    target: (&str, &str),
  ) -> Result<(), WiringError> {
    self.expose(name.into(), target, PortDirection::Input)
  }

  /// Publishes output `(node, port)` as external output `name`.
  pub fn expose_output(
    &mut self,
    name: impl Into<String>,
    target: (&str, &str),
  ) -> Result<(), WiringError> {
    self.expose(name.into(), target, PortDirection::Output)
  }

  fn expose(
    &mut self,
    name: String,
    target: (&str, &str),
    direction: PortDirection,
  ) -> Result<(), WiringError> {
    trace!(
      "Subgraph::expose(subgraph={}, name={}, target={}.{}, direction={})",
      self.name, name, target.0, target.1, direction
    );
    let (endpoint, spec) = self.resolve(target, direction)?;
    let exposed = match direction {
      PortDirection::Input => &mut self.exposed_inputs,
      PortDirection::Output => &mut self.exposed_outputs,
    };
    if exposed.iter().any(|p| p.name == name) {
      return Err(WiringError::DuplicateExposedPort {
        subgraph: self.name.clone(),
        port: name,
        direction: direction.as_str(),
      });
    }
    exposed.push(ExposedPort {
      spec: PortSpec::new(name.clone(), spec.port_type),
      name,
      target: endpoint,
    });
    Ok(())
  }

  /// Absorbs `child`: its nodes become `child/node`, its edges move along, and
  /// its exposed ports become connectable as `(child, port)`.
  ///
  /// # Errors
  ///
  /// [`WiringError::DuplicateNode`] if the child's name, or any prefixed node
  /// name, collides with an existing node.
  pub fn add_subgraph(&mut self, child: Subgraph) -> Result<(), WiringError> {
    trace!(
      "Subgraph::add_subgraph(subgraph={}, child={})",
      self.name, child.name
    );
    let prefix = child.name.clone();
    self.check_name_free(&prefix)?;
    for entry in &child.nodes {
      let key = qualify(&prefix, &entry.key);
      if self.index.contains_key(&key) {
        return Err(WiringError::DuplicateNode { node: key });
      }
    }

    let Subgraph {
      nodes,
      edges,
      exposed_inputs,
      exposed_outputs,
      aliases,
      ..
    } = child;

    for entry in nodes {
      self.insert(qualify(&prefix, &entry.key), entry.node);
    }
    let requalify = |e: &Endpoint| Endpoint::new(qualify(&prefix, &e.node), e.port.clone());
    for binding in edges {
      self.edges.push(EdgeBinding {
        source: requalify(&binding.source),
        dest: requalify(&binding.dest),
        edge: binding.edge,
      });
    }
    for (direction, ports) in [
      (PortDirection::Input, exposed_inputs),
      (PortDirection::Output, exposed_outputs),
    ] {
      for port in ports {
        self.aliases.insert(
          (prefix.clone(), port.name.clone(), direction),
          (requalify(&port.target), port.spec),
        );
      }
    }
    for ((node, port, direction), (target, spec)) in aliases {
      self.aliases.insert(
        (qualify(&prefix, &node), port, direction),
        (requalify(&target), spec),
      );
    }
    Ok(())
  }

  /// Node indices in start order: upstream before downstream, ties and cycles
  /// broken by insertion order.
  pub(crate) fn startup_order(&self) -> Vec<usize> {
    let n = self.nodes.len();
    let mut in_degree = vec![0usize; n];
    let mut downstream: Vec<Vec<usize>> = vec![Vec::new(); n];
    for binding in &self.edges {
      if let (Some(&s), Some(&d)) = (
        self.index.get(&binding.source.node),
        self.index.get(&binding.dest.node),
      ) {
        if s != d {
          downstream[s].push(d);
          in_degree[d] += 1;
        }
      }
    }

    let mut ready: BinaryHeap<Reverse<usize>> = (0..n)
      .filter(|&i| in_degree[i] == 0)
      .map(Reverse)
      .collect();
    let mut order = Vec::with_capacity(n);
    let mut placed = vec![false; n];
    while order.len() < n {
      let next = match ready.pop() {
        Some(Reverse(i)) => i,
        // Cycle: release the earliest unplaced node.
        None => match (0..n).find(|&i| !placed[i]) {
          Some(i) => i,
          None => break,
        },
      };
      if placed[next] {
        continue;
      }
      placed[next] = true;
      order.push(next);
      for &d in &downstream[next] {
        in_degree[d] = in_degree[d].saturating_sub(1);
        if in_degree[d] == 0 && !placed[d] {
          ready.push(Reverse(d));
        }
      }
    }
    order
  }

  pub(crate) fn into_parts(self) -> (String, Vec<NodeEntry>, Vec<EdgeBinding>) {
    (self.name, self.nodes, self.edges)
  }

  fn insert(&mut self, key: String, node: Box<dyn Node>) {
    self.index.insert(key.clone(), self.nodes.len());
    self.nodes.push(NodeEntry { key, node });
  }

  fn check_name_free(&self, name: &str) -> Result<(), WiringError> {
    let alias_taken = self.aliases.keys().any(|(node, _, _)| node == name);
    if self.index.contains_key(name) || alias_taken {
      return Err(WiringError::DuplicateNode {
        node: name.to_string(),
      });
    }
    Ok(())
  }

  fn resolve(
    &self,
    (node, port): (&str, &str),
    direction: PortDirection,
  ) -> Result<(Endpoint, PortSpec), WiringError> {
    let opposite = match direction {
      PortDirection::Input => PortDirection::Output,
      PortDirection::Output => PortDirection::Input,
    };
    let key = (node.to_string(), port.to_string(), direction);
    if let Some((endpoint, spec)) = self.aliases.get(&key) {
      return Ok((endpoint.clone(), spec.clone()));
    }

    if let Some(&i) = self.index.get(node) {
      let entry = &self.nodes[i];
      let (wanted, other) = match direction {
        PortDirection::Input => (entry.node.input_ports(), entry.node.output_ports()),
        PortDirection::Output => (entry.node.output_ports(), entry.node.input_ports()),
      };
      if let Some(spec) = wanted.iter().find(|p| p.name == port) {
        return Ok((Endpoint::new(node, port), spec.clone()));
      }
      if other.iter().any(|p| p.name == port) {
        return Err(direction_mismatch(node, port, direction));
      }
      return Err(unknown_port(node, port, direction));
    }

    let opposite_key = (node.to_string(), port.to_string(), opposite);
    if self.aliases.contains_key(&opposite_key) {
      return Err(direction_mismatch(node, port, direction));
    }
    if self.aliases.keys().any(|(n, _, _)| n == node) {
      return Err(unknown_port(node, port, direction));
    }
    Err(WiringError::UnknownNode {
      node: node.to_string(),
    })
  }
}

impl fmt::Debug for Subgraph {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Subgraph")
      .field("name", &self.name)
      .field("nodes", &self.node_names().collect::<Vec<_>>())
      .field(
        "edges",
        &self.edges.iter().map(|b| b.edge.label()).collect::<Vec<_>>(),
      )
      .finish()
  }
}

fn qualify(prefix: &str, key: &str) -> String {
  format!("{}/{}", prefix, key)
}

fn check_unique_ports(
  node: &str,
  ports: &[PortSpec],
  direction: PortDirection,
) -> Result<(), WiringError> {
  for (i, port) in ports.iter().enumerate() {
    if ports[..i].iter().any(|p| p.name == port.name) {
      return Err(WiringError::DuplicatePort {
        node: node.to_string(),
        port: port.name.clone(),
        direction: direction.as_str(),
      });
    }
  }
  Ok(())
}

fn direction_mismatch(node: &str, port: &str, direction: PortDirection) -> WiringError {
  WiringError::DirectionMismatch {
    node: node.to_string(),
    port: port.to_string(),
    expected: direction.as_str(),
  }
}

fn unknown_port(node: &str, port: &str, direction: PortDirection) -> WiringError {
  WiringError::UnknownPort {
    node: node.to_string(),
    port: port.to_string(),
    direction: direction.as_str(),
  }
}
