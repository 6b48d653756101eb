use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::UnixStream;
use std::thread;
use std::time::Duration;

use callout::ipc::client::IpcClient;

mod common;
use common::TestContext;

/// Send one raw line and read one raw line back
fn roundtrip(ctx: &TestContext, request: &str) -> serde_json::Value {
    let mut stream = UnixStream::connect(&ctx.socket_path).expect("Failed to connect to IPC socket");
    stream
        .set_read_timeout(Some(Duration::from_secs(10)))
        .expect("Failed to set read timeout");
    stream
        .write_all(request.as_bytes())
        .expect("Failed to write to socket");
    stream.write_all(b"\n").expect("Failed to write newline");

    let mut response = String::new();
    BufReader::new(stream)
        .read_line(&mut response)
        .expect("Failed to read response");
    assert!(!response.is_empty(), "Response should not be empty");
    serde_json::from_str(&response).expect("Response is not JSON")
}

#[test]
fn test_socket_permissions() {
    let ctx = TestContext::new();

    let metadata = fs::metadata(&ctx.socket_path).expect("Failed to get socket metadata");
    let mode = metadata.permissions().mode();

    assert_eq!(mode & 0o777, 0o600, "Socket must only be reachable by its owner");
}

#[test]
fn test_status_echoes_seq_id() {
    let ctx = TestContext::new();

    let response = roundtrip(&ctx, r#"{"type":"status","seq_id":7}"#);
    assert_eq!(response["type"], "status");
    assert_eq!(response["seq_id"], 7);
    assert!(response["entries"].as_array().unwrap().is_empty());
}

#[test]
fn test_unknown_endpoint_fails_and_is_audited() {
    let ctx = TestContext::new();

    let request = r#"{"type":"announce","seq_id":3,"endpoint_id":"ghost","request":{"text":"Token 1","language":"en","volume":50}}"#;
    let response = roundtrip(&ctx, request);

    assert_eq!(response["type"], "outcome");
    assert_eq!(response["seq_id"], 3);
    assert_eq!(response["outcome"]["tier"], "failed");
    assert_eq!(response["outcome"]["error"]["kind"], "all_tiers_exhausted");

    // Audit is written before the response goes out, but give the fs a moment
    thread::sleep(Duration::from_millis(200));
    let content = fs::read_to_string(ctx.audit_log()).expect("Failed to read audit log");
    assert!(
        content.contains("ANNOUNCE ghost | TIER failed"),
        "Audit log should record the outcome: {}",
        content
    );
}

#[test]
fn test_oversize_request_rejected() {
    let ctx = TestContext::new();

    let padding = "x".repeat(20 * 1024);
    let request = format!(
        r#"{{"type":"announce","seq_id":1,"endpoint_id":"a","request":{{"text":"{}","language":"en","volume":50}}}}"#,
        padding
    );
    let response = roundtrip(&ctx, &request);
    assert_eq!(response["type"], "error");
    assert_eq!(response["message"], "request too large");
}

#[test]
fn test_invalid_json_rejected() {
    let ctx = TestContext::new();

    let response = roundtrip(&ctx, r#"{"type":"dance","seq_id":1}"#);
    assert_eq!(response["type"], "error");
    assert!(response["message"]
        .as_str()
        .unwrap()
        .starts_with("invalid request"));

    // The daemon keeps serving after a bad request
    let response = roundtrip(&ctx, r#"{"type":"status","seq_id":2}"#);
    assert_eq!(response["type"], "status");
}

#[test]
fn test_client_against_daemon() {
    let ctx = TestContext::new();
    let client = IpcClient::new(ctx.socket_path.clone());

    assert!(client.is_daemon_running());

    let report = client.stop("ghost").expect("Stop should be answered");
    assert!(!report.cancelled_request);

    let err = client.refresh("ghost").unwrap_err();
    assert!(err.to_string().contains("unknown endpoint"), "{}", err);
}

#[test]
fn test_client_refreshes_every_endpoint() {
    // Nothing listens on a port we just released
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .and_then(|l| l.local_addr())
        .expect("Failed to reserve a port")
        .port();
    let ctx = TestContext::with_endpoints(serde_json::json!([
        {"id": "desk", "address": "127.0.0.1", "port": port, "kind": "generic-rest"},
        {"id": "hall", "address": "127.0.0.1", "port": port, "kind": "webhook"}
    ]));
    let client = IpcClient::new(ctx.socket_path.clone());

    let listed: Vec<String> = client
        .status(None)
        .expect("Status should be answered")
        .into_iter()
        .map(|e| e.endpoint_id)
        .collect();
    assert_eq!(listed, vec!["desk", "hall"]);

    let messages = client.refresh_all().expect("Refresh should be answered");
    assert_eq!(messages.len(), 2);
    assert!(messages[0].starts_with("desk: "), "{:?}", messages);
    assert!(messages[1].starts_with("hall: "), "{:?}", messages);

    for entry in client.status(None).expect("Status should be answered") {
        assert!(entry.checked_ago_ms.is_some(), "{:?}", entry);
    }
}
