use crate::port::{Port, PortDirection, PortSpec, PortType};

#[test]
fn test_port_type_equality() {
  assert!(PortType::named("int").accepts(&PortType::named("int")));
  assert!(!PortType::named("string").accepts(&PortType::named("int")));
  assert_eq!(PortType::of::<i64>(), PortType::of::<i64>());
  assert_ne!(PortType::of::<i64>(), PortType::of::<String>());
}

#[test]
fn test_any_accepts_every_output() {
  let any = PortType::any();
  assert!(any.is_any());
  assert!(any.accepts(&PortType::of::<u8>()));
  assert!(any.accepts(&PortType::named("custom")));
  // The wildcard only widens inputs.
  assert!(!PortType::of::<u8>().accepts(&PortType::any()));
}

#[test]
fn test_port_spec_constructors() {
  let typed = PortSpec::of::<i64>("in");
  assert_eq!(typed.name, "in");
  assert_eq!(typed.port_type.as_str(), "i64");

  let untyped = PortSpec::any("out");
  assert!(untyped.port_type.is_any());
  assert_eq!(untyped.port_type.to_string(), "*");
}

#[test]
fn test_port_label() {
  let port = Port {
    node: "ingest/parser".to_string(),
    direction: PortDirection::Output,
    spec: PortSpec::new("out", PortType::named("bytes")),
  };
  assert_eq!(port.label(), "ingest/parser.out");
  assert_eq!(port.direction.to_string(), "output");
}
