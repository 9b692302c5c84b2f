//! # Supervision Test Suite
//!
//! Node failure policies and the fault control message.

use crate::message::MessageKind;
use crate::supervision::{DEFAULT_ERROR_PORT, ErrorPolicy, NodeConfig, NodeFault};

#[test]
fn test_default_policy_is_isolate() {
  let config = NodeConfig::default();
  assert_eq!(config.error_policy, ErrorPolicy::Isolate);
  assert_eq!(config.error_port, DEFAULT_ERROR_PORT);
}

#[test]
fn test_custom_error_port() {
  let config = NodeConfig::new(ErrorPolicy::EmitError).with_error_port("faults");
  assert_eq!(config.error_policy, ErrorPolicy::EmitError);
  assert_eq!(config.error_port, "faults");
}

#[test]
fn test_node_config_deserialize_partial() {
  let config: NodeConfig = serde_json::from_str(r#"{"error_policy":"Propagate"}"#).unwrap();
  assert_eq!(config.error_policy, ErrorPolicy::Propagate);
  assert_eq!(config.error_port, "error");
}

#[test]
fn test_fault_message() {
  let fault = NodeFault {
    node_id: "g/parser".to_string(),
    error_kind: "ParseFailure".to_string(),
  };
  let message = fault.clone().into_message();
  assert_eq!(message.kind(), MessageKind::Control);
  assert_eq!(message.payload_as::<NodeFault>(), Some(&fault));
  assert_eq!(
    message.metadata_value("node_id").and_then(|v| v.as_str()),
    Some("g/parser")
  );
  assert_eq!(
    message.metadata_value("error_kind").and_then(|v| v.as_str()),
    Some("ParseFailure")
  );
}
