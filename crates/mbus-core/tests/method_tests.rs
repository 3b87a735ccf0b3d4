//! Envelope serialization tests for mbus core

use mbus_core::{CommandMethod, EventMethod, Method, ResultMethod};
use serde_json::json;

#[test]
fn test_command_tag_and_keys() {
    let method = Method::Command(CommandMethod {
        destination: mbus_core::SERVER_IDENTIFIER.to_string(),
        identifier: mbus_core::SERVER_COMMAND_CREATE.to_string(),
        sequence: 1,
        payload: json!({ "compressions": ["none"] }),
        timeout: Some(30000),
    });

    let value = serde_json::to_value(&method).expect("serialize failed");
    assert_eq!(value["type"], "org.mbus.method.type.command");
    assert_eq!(value["destination"], "org.mbus.server");
    assert_eq!(value["identifier"], "org.mbus.server.command.create");
    assert_eq!(value["sequence"], 1);
    assert_eq!(value["timeout"], 30000);
}

#[test]
fn test_event_tag_and_keys() {
    let method = Method::Event(EventMethod {
        source: None,
        destination: Some(mbus_core::METHOD_EVENT_DESTINATION_SUBSCRIBERS.to_string()),
        identifier: "sensor.reading".to_string(),
        sequence: Some(12),
        payload: json!({ "celsius": 21.5 }),
        timeout: Some(30000),
    });

    let value = serde_json::to_value(&method).expect("serialize failed");
    assert_eq!(value["type"], "org.mbus.method.type.event");
    assert_eq!(value["destination"], "org.mbus.method.event.destination.subscribers");
    assert_eq!(value["identifier"], "sensor.reading");
    assert_eq!(value["payload"]["celsius"], 21.5);
    // source is absent, not null
    assert!(value.as_object().map(|o| !o.contains_key("source")).unwrap_or(false));
}

#[test]
fn test_result_status_key() {
    let body = r#"{"type":"org.mbus.method.type.result","sequence":42,"status":0,"payload":{"identifier":"client-1"}}"#;
    let method: Method = serde_json::from_str(body).expect("deserialize failed");

    match method {
        Method::Result(result) => {
            assert_eq!(result.sequence, 42);
            assert_eq!(result.status, 0);
            assert_eq!(result.payload["identifier"], "client-1");
        }
        _ => panic!("expected result envelope"),
    }
}

#[test]
fn test_result_status_defaults_to_zero() {
    let body = r#"{"type":"org.mbus.method.type.result","sequence":3}"#;
    let method: Method = serde_json::from_str(body).expect("deserialize failed");

    match method {
        Method::Result(result) => {
            assert_eq!(result.status, 0);
            assert!(result.payload.is_null());
        }
        _ => panic!("expected result envelope"),
    }
}

#[test]
fn test_roundtrip_equality() {
    let methods = vec![
        Method::Command(CommandMethod {
            destination: "peer".to_string(),
            identifier: "lookup".to_string(),
            sequence: 9998,
            payload: json!([1, 2, 3]),
            timeout: Some(1000),
        }),
        Method::Event(EventMethod {
            source: Some("peer".to_string()),
            destination: Some("client-1".to_string()),
            identifier: "notice".to_string(),
            sequence: Some(5),
            payload: json!({ "nested": { "deep": true } }),
            timeout: None,
        }),
        Method::Result(ResultMethod {
            sequence: 17,
            status: -1,
            payload: json!(null),
        }),
    ];

    for method in methods {
        let encoded = serde_json::to_string(&method).expect("serialize failed");
        let decoded: Method = serde_json::from_str(&encoded).expect("deserialize failed");
        assert_eq!(decoded, method);
    }
}

#[test]
fn test_unknown_tag_rejected() {
    let body = r#"{"type":"org.mbus.method.type.mystery","sequence":1}"#;
    assert!(serde_json::from_str::<Method>(body).is_err());
}
