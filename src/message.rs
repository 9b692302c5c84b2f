//! Message envelope types.
//!
//! Every item that crosses an edge is a [`Message`]: a kind discriminator
//! ([`MessageKind::Data`] or [`MessageKind::Control`]), a type-erased payload and
//! an ordered metadata map of scalar values.
//!
//! Payloads are shared as `Arc<dyn Any + Send + Sync>`, so fan-out to several
//! edges clones a pointer, never the data. Nodes downcast with
//! [`Message::payload_as`].
//!
//! # Example
//!
//! ```rust
//! use weavecore::message::{Message, MessageKind};
//!
//! let msg = Message::data(42i64).with_metadata("source", "sensor-1");
//!
//! assert_eq!(msg.kind(), MessageKind::Data);
//! assert_eq!(msg.payload_as::<i64>(), Some(&42));
//! assert_eq!(msg.metadata_value("source").and_then(|v| v.as_str()), Some("sensor-1"));
//! ```

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Type-erased, shareable message payload.
pub type Payload = Arc<dyn Any + Send + Sync>;

/// Ordered metadata attached to a message.
pub type Metadata = BTreeMap<String, MetadataValue>;

/// Traffic class of a message.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub enum MessageKind {
  /// Ordinary application payload traffic.
  Data,
  /// Urgent control-plane traffic; scheduled ahead of data.
  Control,
}

impl MessageKind {
  /// Returns true for [`MessageKind::Control`].
  #[must_use]
  pub const fn is_control(self) -> bool {
    matches!(self, MessageKind::Control)
  }
}

impl fmt::Display for MessageKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      MessageKind::Data => write!(f, "data"),
      MessageKind::Control => write!(f, "control"),
    }
  }
}

/// A scalar metadata value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
  /// Boolean flag.
  Bool(bool),
  /// Signed integer.
  Int(i64),
  /// Floating point number.
  Float(f64),
  /// UTF-8 string.
  Str(String),
}

impl MetadataValue {
  /// Returns the string value, if this is a [`MetadataValue::Str`].
  pub fn as_str(&self) -> Option<&str> {
    match self {
      MetadataValue::Str(s) => Some(s),
      _ => None,
    }
  }

  /// Returns the integer value, if this is a [`MetadataValue::Int`].
  pub fn as_i64(&self) -> Option<i64> {
    match self {
      MetadataValue::Int(i) => Some(*i),
      _ => None,
    }
  }
}

impl fmt::Display for MetadataValue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      MetadataValue::Bool(b) => write!(f, "{}", b),
      MetadataValue::Int(i) => write!(f, "{}", i),
      MetadataValue::Float(x) => write!(f, "{}", x),
      MetadataValue::Str(s) => write!(f, "{}", s),
    }
  }
}

impl From<bool> for MetadataValue {
  fn from(v: bool) -> Self {
    MetadataValue::Bool(v)
  }
}

impl From<i64> for MetadataValue {
  fn from(v: i64) -> Self {
    MetadataValue::Int(v)
  }
}

impl From<i32> for MetadataValue {
  fn from(v: i32) -> Self {
    MetadataValue::Int(i64::from(v))
  }
}

impl From<u32> for MetadataValue {
  fn from(v: u32) -> Self {
    MetadataValue::Int(i64::from(v))
  }
}

impl From<f64> for MetadataValue {
  fn from(v: f64) -> Self {
    MetadataValue::Float(v)
  }
}

impl From<&str> for MetadataValue {
  fn from(v: &str) -> Self {
    MetadataValue::Str(v.to_string())
  }
}

impl From<String> for MetadataValue {
  fn from(v: String) -> Self {
    MetadataValue::Str(v)
  }
}

/// An immutable message envelope.
///
/// Cloning a message is cheap: the payload and metadata are reference counted.
/// The only way to change a message is to build a new one, either with the
/// consuming `with_*` builders before it is first sent, or with
/// [`Message::merged`] when an edge coalesces two payloads.
#[derive(Clone)]
pub struct Message {
  kind: MessageKind,
  payload: Payload,
  metadata: Arc<Metadata>,
}

impl Message {
  /// Creates a message of the given kind around an already-erased payload.
  pub fn new(kind: MessageKind, payload: Payload) -> Self {
    Self {
      kind,
      payload,
      metadata: Arc::new(Metadata::new()),
    }
  }

  /// Creates a [`MessageKind::Data`] message.
  pub fn data<T: Any + Send + Sync>(payload: T) -> Self {
    Self::new(MessageKind::Data, Arc::new(payload))
  }

  /// Creates a [`MessageKind::Control`] message.
  ///
  /// Control payloads should stay small; they jump ahead of data traffic.
  pub fn control<T: Any + Send + Sync>(payload: T) -> Self {
    Self::new(MessageKind::Control, Arc::new(payload))
  }

  /// Adds a metadata entry, replacing an existing value for the same key.
  #[must_use]
  pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
    Arc::make_mut(&mut self.metadata).insert(key.into(), value.into());
    self
  }

  /// The message kind.
  pub fn kind(&self) -> MessageKind {
    self.kind
  }

  /// Returns true if this is a control message.
  pub fn is_control(&self) -> bool {
    self.kind.is_control()
  }

  /// The type-erased payload.
  pub fn payload(&self) -> &Payload {
    &self.payload
  }

  /// Downcasts the payload to `T`.
  pub fn payload_as<T: Any>(&self) -> Option<&T> {
    self.payload.downcast_ref::<T>()
  }

  /// All metadata entries, ordered by key.
  pub fn metadata(&self) -> &Metadata {
    &self.metadata
  }

  /// Looks up one metadata entry.
  pub fn metadata_value(&self, key: &str) -> Option<&MetadataValue> {
    self.metadata.get(key)
  }

  /// Builds the message that replaces `self` when `newer` is coalesced into it.
  ///
  /// The payload is supplied by the caller (the edge's merge function). Metadata
  /// of `newer` overrides `self` key by key, and the result is a control message
  /// if either input was one.
  pub(crate) fn merged(&self, newer: &Message, payload: Payload) -> Message {
    let mut metadata = (*self.metadata).clone();
    metadata.extend(
      newer
        .metadata
        .iter()
        .map(|(k, v)| (k.clone(), v.clone())),
    );
    let kind = if self.is_control() || newer.is_control() {
      MessageKind::Control
    } else {
      MessageKind::Data
    };
    Message {
      kind,
      payload,
      metadata: Arc::new(metadata),
    }
  }
}

impl fmt::Debug for Message {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    // Payloads are opaque; keep them out of logs.
    f.debug_struct("Message")
      .field("kind", &self.kind)
      .field("metadata", &self.metadata)
      .finish_non_exhaustive()
  }
}
