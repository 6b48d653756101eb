//! HTTP drivers and the relay against a mock device

use callout::announcement::AnnouncementRequest;
use callout::drivers::{DriverOptions, DriverRegistry};
use callout::endpoint::{Credentials, EndpointConfig, ProtocolKind};
use callout::relay::RelayClient;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use wiremock::matchers::{
    basic_auth, bearer_token, body_json, body_partial_json, body_string_contains, method, path,
    query_param,
};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn registry() -> DriverRegistry {
    DriverRegistry::with_defaults(DriverOptions::with_timeout(Duration::from_secs(2)))
}

fn endpoint_on(server: &MockServer, kind: ProtocolKind) -> EndpointConfig {
    EndpointConfig::new("desk", "127.0.0.1", server.address().port(), kind)
}

#[tokio::test]
async fn test_generic_rest_posts_flat_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/announce"))
        .and(basic_auth("operator", "secret"))
        .and(body_json(serde_json::json!({
            "endpointCredentials": {"username": "operator", "password": "secret"},
            "text": "Token 42, counter 3",
            "language": "en",
            "volumePercent": 70
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let cfg = endpoint_on(&server, ProtocolKind::GenericRest)
        .with_credentials(Credentials::basic("operator", "secret"));
    let driver = registry().require(ProtocolKind::GenericRest).unwrap();
    let req = AnnouncementRequest::new("Token 42, counter 3", "en", 70);

    let receipt = driver.announce(&cfg, &req).await.unwrap();
    assert!(receipt.detail.contains("HTTP 200"));
}

#[tokio::test]
async fn test_generic_rest_null_credentials() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/announce"))
        .and(body_json(serde_json::json!({
            "endpointCredentials": null,
            "text": "Hello",
            "language": "ta",
            "volumePercent": 30
        })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let cfg = endpoint_on(&server, ProtocolKind::GenericRest);
    let driver = registry().require(ProtocolKind::GenericRest).unwrap();
    driver
        .announce(&cfg, &AnnouncementRequest::new("Hello", "ta", 30))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_rejection_carries_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/announce"))
        .respond_with(ResponseTemplate::new(500).set_body_string("speaker busy"))
        .mount(&server)
        .await;

    let cfg = endpoint_on(&server, ProtocolKind::GenericRest);
    let driver = registry().require(ProtocolKind::GenericRest).unwrap();
    let err = driver
        .announce(&cfg, &AnnouncementRequest::new("Hello", "en", 50))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), "protocol_rejection");
    assert!(err.is_recoverable());
    assert!(err.to_string().contains("HTTP 500"));
    assert!(err.to_string().contains("speaker busy"));
}

#[tokio::test]
async fn test_unreachable_is_transport_error() {
    // Reserve a port, then free it so nothing is listening
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let cfg = EndpointConfig::new("gone", "127.0.0.1", port, ProtocolKind::GenericRest);
    let driver = registry().require(ProtocolKind::GenericRest).unwrap();

    let err = driver
        .announce(&cfg, &AnnouncementRequest::new("Hello", "en", 50))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "transport_error");
}

#[tokio::test]
async fn test_bearer_token_header() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/status"))
        .and(bearer_token("t0ken"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/announce"))
        .and(bearer_token("t0ken"))
        .and(body_json(serde_json::json!({
            "text": "Next please",
            "language": "en",
            "volumePercent": 50
        })))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&server)
        .await;

    let cfg = endpoint_on(&server, ProtocolKind::RestfulBearer)
        .with_credentials(Credentials::bearer("t0ken"));
    let driver = registry().require(ProtocolKind::RestfulBearer).unwrap();

    assert!(driver.test(&cfg).await.unwrap().ok);
    driver
        .announce(&cfg, &AnnouncementRequest::new("Next please", "en", 50))
        .await
        .unwrap();

    let without_token = endpoint_on(&server, ProtocolKind::RestfulBearer);
    let report = driver.test(&without_token).await.unwrap();
    assert!(!report.ok);
}

#[tokio::test]
async fn test_isapi_handshake_checks_document() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ISAPI/System/status"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<?xml version=\"1.0\"?><DeviceStatus><cpu>3</cpu></DeviceStatus>"),
        )
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/ISAPI/System/Audio/channels/1/speech"))
        .and(body_string_contains("<text>Token 5 &amp; 6</text>"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let cfg = endpoint_on(&server, ProtocolKind::VendorIsapi);
    let driver = registry().require(ProtocolKind::VendorIsapi).unwrap();

    let report = driver.test(&cfg).await.unwrap();
    assert!(report.ok, "{}", report.detail);
    driver
        .announce(&cfg, &AnnouncementRequest::new("Token 5 & 6", "en", 60))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_handshake_rejects_wrong_protocol() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ISAPI/System/status"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>router login</html>"))
        .mount(&server)
        .await;

    let cfg = endpoint_on(&server, ProtocolKind::VendorIsapi);
    let driver = registry().require(ProtocolKind::VendorIsapi).unwrap();
    let report = driver.test(&cfg).await.unwrap();
    assert!(!report.ok);
    assert!(report.detail.contains("not ISAPI"));
}

#[tokio::test]
async fn test_cgi_query_parameters() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/cgi-bin/audio.cgi"))
        .and(query_param("action", "speak"))
        .and(query_param("text", "Token 9"))
        .and(query_param("volume", "40"))
        .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
        .expect(1)
        .mount(&server)
        .await;

    let cfg = endpoint_on(&server, ProtocolKind::VendorCgi);
    let driver = registry().require(ProtocolKind::VendorCgi).unwrap();
    driver
        .announce(&cfg, &AnnouncementRequest::new("Token 9", "en", 40))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_stop_with_nothing_playing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/stop"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let cfg = endpoint_on(&server, ProtocolKind::GenericRest);
    let driver = registry().require(ProtocolKind::GenericRest).unwrap();
    assert!(driver.stop(&cfg).await.is_ok());
}

#[tokio::test]
async fn test_custom_routes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/say"))
        .and(query_param("t", "Hello there"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let cfg = endpoint_on(&server, ProtocolKind::Custom).with_route("announce", "GET /say?t={text}");
    let driver = registry().require(ProtocolKind::Custom).unwrap();
    driver
        .announce(&cfg, &AnnouncementRequest::new("Hello there", "en", 50))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_relay_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/announce"))
        .and(body_json(serde_json::json!({
            "endpointId": "hall",
            "text": "Token 3",
            "language": "si",
            "volumePercent": 90,
            "context": "queue"
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let relay = RelayClient::new(&format!("{}/", server.uri()), Duration::from_secs(2));
    assert_eq!(relay.url(), server.uri());
    let req = AnnouncementRequest::new("Token 3", "si", 90).with_context("queue");
    relay.announce("hall", &req).await.unwrap();
}

#[tokio::test]
async fn test_wire_request_volume_is_clamped() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/announce"))
        .and(body_json(serde_json::json!({
            "endpointCredentials": null,
            "text": "Token 1",
            "language": "en",
            "volumePercent": 100
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let req: AnnouncementRequest =
        serde_json::from_str(r#"{"text":"Token 1","language":"en","volume":250}"#).unwrap();
    let cfg = endpoint_on(&server, ProtocolKind::GenericRest);
    let driver = registry().require(ProtocolKind::GenericRest).unwrap();
    driver.announce(&cfg, &req).await.unwrap();
}

#[tokio::test]
async fn test_stream_http_uses_relay_assigned_session() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/stream/sessions"))
        .and(body_partial_json(serde_json::json!({
            "text": "Token 8",
            "language": "ta",
            "volumePercent": 65
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
            "sessionId": "relay-7",
            "url": "http://relay.local/live/7"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let cfg = endpoint_on(&server, ProtocolKind::StreamHttp);
    let driver = registry().require(ProtocolKind::StreamHttp).unwrap();
    let receipt = driver
        .announce(&cfg, &AnnouncementRequest::new("Token 8", "ta", 65))
        .await
        .unwrap();

    assert_eq!(receipt.session_id.as_deref(), Some("relay-7"));
    assert_eq!(receipt.playable_url.as_deref(), Some("http://relay.local/live/7"));
}

#[tokio::test]
async fn test_stream_http_defaults_to_own_session() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/stream/sessions"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let cfg = endpoint_on(&server, ProtocolKind::StreamHttp);
    let driver = registry().require(ProtocolKind::StreamHttp).unwrap();
    let receipt = driver
        .announce(&cfg, &AnnouncementRequest::new("Token 8", "en", 50))
        .await
        .unwrap();

    let session_id = receipt.session_id.expect("session id");
    assert_eq!(session_id.len(), 16);
    assert_eq!(
        receipt.playable_url,
        Some(format!("{}/stream/{}", cfg.base_url(), session_id))
    );
}

#[tokio::test]
async fn test_stream_http_refused_session() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/stream/sessions"))
        .respond_with(ResponseTemplate::new(503).set_body_string("relay full"))
        .mount(&server)
        .await;

    let cfg = endpoint_on(&server, ProtocolKind::StreamHttp);
    let driver = registry().require(ProtocolKind::StreamHttp).unwrap();
    let err = driver
        .announce(&cfg, &AnnouncementRequest::new("Token 8", "en", 50))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "protocol_rejection");
    assert!(err.to_string().contains("relay full"));
}

/// Answer one RTSP request with `reply`, handing the raw request back
async fn rtsp_relay(reply: &'static str) -> (u16, oneshot::Receiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        if let Ok((mut socket, _)) = listener.accept().await {
            let mut buf = vec![0u8; 4096];
            let n = socket.read(&mut buf).await.unwrap_or(0);
            let _ = tx.send(String::from_utf8_lossy(&buf[..n]).to_string());
            let _ = socket.write_all(reply.as_bytes()).await;
        }
    });
    (port, rx)
}

#[tokio::test]
async fn test_stream_rtsp_session_receipt() {
    let (port, request) =
        rtsp_relay("RTSP/1.0 200 OK\r\nCSeq: 1\r\nSession: 12345678;timeout=60\r\n\r\n").await;
    let cfg = EndpointConfig::new("pull", "127.0.0.1", port, ProtocolKind::StreamRtsp)
        .with_channel("/queue");
    let driver = registry().require(ProtocolKind::StreamRtsp).unwrap();

    let receipt = driver
        .announce(&cfg, &AnnouncementRequest::new("Token 8", "si", 70))
        .await
        .unwrap();

    assert_eq!(receipt.session_id.as_deref(), Some("12345678"));
    assert_eq!(
        receipt.playable_url,
        Some(format!("rtsp://127.0.0.1:{}/queue", port))
    );

    let request = request.await.unwrap();
    assert!(request.starts_with(&format!("ANNOUNCE rtsp://127.0.0.1:{}/queue RTSP/1.0", port)));
    assert!(request.contains("Content-Type: application/sdp"));
    assert!(request.contains("s=Token 8"));
    assert!(request.contains("a=x-language:si"));
}

#[tokio::test]
async fn test_stream_rtsp_rejected_session() {
    let (port, _request) = rtsp_relay("RTSP/1.0 453 Not Enough Bandwidth\r\nCSeq: 1\r\n\r\n").await;
    let cfg = EndpointConfig::new("pull", "127.0.0.1", port, ProtocolKind::StreamRtsp);
    let driver = registry().require(ProtocolKind::StreamRtsp).unwrap();

    let err = driver
        .announce(&cfg, &AnnouncementRequest::new("Token 8", "en", 70))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "protocol_rejection");
    assert!(err.to_string().contains("453"));
}

const ONVIF_DEVICE_INFO: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope" xmlns:tds="http://www.onvif.org/ver10/device/wsdl">
  <s:Body><tds:GetDeviceInformationResponse>
    <tds:Manufacturer>Acme</tds:Manufacturer><tds:Model>Horn-200</tds:Model>
  </tds:GetDeviceInformationResponse></s:Body>
</s:Envelope>"#;

const ONVIF_NOT_AUTHORIZED: &str = r#"<?xml version="1.0"?>
<env:Envelope xmlns:env="http://www.w3.org/2003/05/soap-envelope" xmlns:ter="http://www.onvif.org/ver10/error">
  <env:Body><env:Fault>
    <env:Code><env:Value>env:Sender</env:Value>
      <env:Subcode><env:Value>ter:NotAuthorized</env:Value></env:Subcode></env:Code>
    <env:Reason><env:Text xml:lang="en">Sender not Authorized</env:Text></env:Reason>
  </env:Fault></env:Body>
</env:Envelope>"#;

#[tokio::test]
async fn test_onvif_handshake_and_play_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/onvif/device_service"))
        .and(body_string_contains("GetDeviceInformation"))
        .respond_with(ResponseTemplate::new(200).set_body_string(ONVIF_DEVICE_INFO))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/onvif/audio_service"))
        .and(body_string_contains("<PlayText"))
        .and(body_string_contains("<Text>Token 2 &lt;urgent&gt;</Text>"))
        .and(body_string_contains("<Volume>45</Volume>"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let cfg = endpoint_on(&server, ProtocolKind::Onvif);
    let driver = registry().require(ProtocolKind::Onvif).unwrap();

    let report = driver.test(&cfg).await.unwrap();
    assert!(report.ok, "{}", report.detail);
    assert_eq!(report.detail, "ONVIF Acme Horn-200");

    driver
        .announce(&cfg, &AnnouncementRequest::new("Token 2 <urgent>", "en", 45))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_onvif_fault_mapping() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_string(ONVIF_NOT_AUTHORIZED))
        .mount(&server)
        .await;

    let cfg = endpoint_on(&server, ProtocolKind::Onvif);
    let driver = registry().require(ProtocolKind::Onvif).unwrap();

    let report = driver.test(&cfg).await.unwrap();
    assert!(!report.ok);
    assert!(report.detail.contains("unauthorized"), "{}", report.detail);

    let err = driver
        .announce(&cfg, &AnnouncementRequest::new("Token 2", "en", 45))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "protocol_rejection");
    assert!(err.to_string().contains("NotAuthorized"), "{}", err);
}

#[tokio::test]
async fn test_vapix_announce() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/axis-cgi/mediaclip.cgi"))
        .and(query_param("action", "play"))
        .and(query_param("text", "Token 11, counter 4"))
        .and(query_param("language", "ta"))
        .and(query_param("volume", "55"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let cfg = endpoint_on(&server, ProtocolKind::VendorVapix);
    let driver = registry().require(ProtocolKind::VendorVapix).unwrap();
    driver
        .announce(&cfg, &AnnouncementRequest::new("Token 11, counter 4", "ta", 55))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_webhook_post_only_route_and_event() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/queue/call"))
        .respond_with(ResponseTemplate::new(405))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/queue/call"))
        .and(body_partial_json(serde_json::json!({
            "event": "announcement",
            "text": "Token 6",
            "language": "en",
            "volume": 80,
            "context": "counter 2"
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let cfg = endpoint_on(&server, ProtocolKind::Webhook).with_channel("queue/call");
    let driver = registry().require(ProtocolKind::Webhook).unwrap();

    let report = driver.test(&cfg).await.unwrap();
    assert!(report.ok, "{}", report.detail);

    let req = AnnouncementRequest::new("Token 6", "en", 80).with_context("counter 2");
    driver.announce(&cfg, &req).await.unwrap();
}
