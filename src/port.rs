//! # Ports
//!
//! Named, typed attachment points on a node. Output ports feed edges, input
//! ports drain them. Each port carries a [`PortType`] tag that [`crate::subgraph::Subgraph::connect`]
//! compares at wiring time, so a mismatch fails the connect call instead of
//! surfacing as a failed downcast during delivery.
//!
//! ## Port Naming Convention
//!
//! - Single input port: `"in"`
//! - Single output port: `"out"`
//! - Error output used by the `EmitError` policy: `"error"`

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

/// Direction of a port.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub enum PortDirection {
  /// Receives messages from one edge.
  Input,
  /// Emits messages to any number of edges.
  Output,
}

impl PortDirection {
  pub(crate) const fn as_str(self) -> &'static str {
    match self {
      PortDirection::Input => "input",
      PortDirection::Output => "output",
    }
  }
}

impl fmt::Display for PortDirection {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Semantic type tag of a port.
///
/// Tags are compared by value. [`PortType::of`] derives a tag from a Rust type,
/// [`PortType::named`] takes any user tag (`"int"`, `"string"`, ...). An input
/// typed [`PortType::any`] accepts every output.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub struct PortType(Cow<'static, str>);

impl PortType {
  const ANY: &'static str = "*";

  /// The wildcard tag.
  pub const fn any() -> Self {
    PortType(Cow::Borrowed(Self::ANY))
  }

  /// A user-defined tag.
  pub fn named(tag: impl Into<Cow<'static, str>>) -> Self {
    PortType(tag.into())
  }

  /// The tag for Rust type `T`.
  pub fn of<T: ?Sized + 'static>() -> Self {
    PortType(Cow::Borrowed(std::any::type_name::<T>()))
  }

  /// The tag string.
  pub fn as_str(&self) -> &str {
    &self.0
  }

  /// Returns true for the wildcard tag.
  pub fn is_any(&self) -> bool {
    self.0 == Self::ANY
  }

  /// Whether an input of this type accepts messages from an output typed `output`.
  pub fn accepts(&self, output: &PortType) -> bool {
    self.is_any() || self == output
  }
}

impl fmt::Display for PortType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// Name and type of a port, as declared by a node.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct PortSpec {
  /// Port name, unique per direction on its node.
  pub name: String,
  /// Semantic type tag.
  pub port_type: PortType,
}

impl PortSpec {
  /// Creates a port spec.
  pub fn new(name: impl Into<String>, port_type: PortType) -> Self {
    Self {
      name: name.into(),
      port_type,
    }
  }

  /// Creates a port spec typed after Rust type `T`.
  pub fn of<T: ?Sized + 'static>(name: impl Into<String>) -> Self {
    Self::new(name, PortType::of::<T>())
  }

  /// Creates an untyped (wildcard) port spec.
  pub fn any(name: impl Into<String>) -> Self {
    Self::new(name, PortType::any())
  }
}

/// A port resolved against its owning node.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Port {
  /// Owning node (qualified name within its subgraph).
  pub node: String,
  /// Port direction.
  pub direction: PortDirection,
  /// Declared spec.
  pub spec: PortSpec,
}

impl Port {
  /// The `node.port` label used in errors and events.
  pub fn label(&self) -> String {
    format!("{}.{}", self.node, self.spec.name)
  }
}
