//! Streaming relay drivers
//!
//! These drivers do not play anything themselves. They describe or open a
//! stream session on a relay and hand back where the media can be pulled
//! from; the transfer itself happens out-of-band.

use super::http::{body_snippet, stop_result, test_report, HttpTransport};
use super::rtsp::RtspClient;
use super::{Driver, DriverOptions, TestReport};
use crate::announcement::{AnnounceReceipt, AnnouncementRequest};
use crate::endpoint::{EndpointConfig, ProtocolKind};
use crate::error::{CalloutError, CalloutResult};
use async_trait::async_trait;
use rand::Rng;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::{debug, info};

/// Longest we wait for a UDP relay to answer a health check
const UDP_CHECK_WAIT: Duration = Duration::from_secs(2);

/// Random session identifier (16 hex chars)
pub fn new_session_id() -> String {
    let id: u64 = rand::thread_rng().gen();
    format!("{:016x}", id)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionRequest<'a> {
    session_id: &'a str,
    text: &'a str,
    language: &'a str,
    volume_percent: u8,
    context: &'a str,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionResponse {
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

/// HTTP stream relay (`/stream/*`)
pub struct StreamHttpDriver {
    http: HttpTransport,
}

impl StreamHttpDriver {
    pub fn new(options: &DriverOptions) -> Self {
        Self {
            http: HttpTransport::new(options),
        }
    }
}

#[async_trait]
impl Driver for StreamHttpDriver {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::StreamHttp
    }

    async fn test(&self, cfg: &EndpointConfig) -> CalloutResult<TestReport> {
        let response = self
            .http
            .send(self.http.request(Method::GET, cfg, "/stream/health"))
            .await?;
        Ok(test_report(response, "HTTP stream relay", |_| {
            Some("HTTP stream relay healthy".to_string())
        })
        .await)
    }

    async fn announce(
        &self,
        cfg: &EndpointConfig,
        req: &AnnouncementRequest,
    ) -> CalloutResult<AnnounceReceipt> {
        let session_id = new_session_id();
        info!("📡 Opening HTTP stream session {} on {}", session_id, cfg.id);
        let body = SessionRequest {
            session_id: &session_id,
            text: &req.text,
            language: &req.language,
            volume_percent: req.volume,
            context: &req.context,
        };
        let response = self
            .http
            .send(
                self.http
                    .request(Method::POST, cfg, "/stream/sessions")
                    .json(&body),
            )
            .await?;

        let status = response.status();
        if !status.is_success() {
            let snippet = body_snippet(response).await;
            return Err(CalloutError::ProtocolRejection(format!(
                "stream relay refused session (HTTP {}) {}",
                status.as_u16(),
                snippet
            )));
        }

        // Relays may assign their own id and URL
        let assigned: SessionResponse = response.json().await.unwrap_or_default();
        let session_id = assigned.session_id.unwrap_or(session_id);
        let url = assigned
            .url
            .unwrap_or_else(|| format!("{}/stream/{}", cfg.base_url(), session_id));
        Ok(AnnounceReceipt::stream("HTTP stream session open", session_id, url))
    }

    async fn stop(&self, cfg: &EndpointConfig) -> CalloutResult<()> {
        let response = self
            .http
            .send(self.http.request(Method::DELETE, cfg, "/stream/sessions/current"))
            .await?;
        stop_result(response, "HTTP stream relay").await
    }
}

/// UDP stream relay speaking a line protocol (`PING`, `ANNOUNCE {json}`,
/// `STOP`)
pub struct StreamUdpDriver {
    timeout: Duration,
}

impl StreamUdpDriver {
    pub fn new(options: &DriverOptions) -> Self {
        Self {
            timeout: options.timeout,
        }
    }

    async fn socket(&self, cfg: &EndpointConfig) -> CalloutResult<UdpSocket> {
        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(|e| CalloutError::Transport(e.to_string()))?;
        let addr = format!("{}:{}", cfg.host(), cfg.port);
        tokio::time::timeout(self.timeout, socket.connect(&addr))
            .await
            .map_err(|_| CalloutError::Transport(format!("resolving {} timed out", addr)))?
            .map_err(|e| CalloutError::Transport(format!("could not reach {}: {}", addr, e)))?;
        Ok(socket)
    }

    async fn send(&self, socket: &UdpSocket, datagram: &[u8]) -> CalloutResult<()> {
        socket
            .send(datagram)
            .await
            .map(|_| ())
            .map_err(|e| CalloutError::Transport(e.to_string()))
    }
}

#[async_trait]
impl Driver for StreamUdpDriver {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::StreamUdp
    }

    async fn test(&self, cfg: &EndpointConfig) -> CalloutResult<TestReport> {
        let socket = self.socket(cfg).await?;
        self.send(&socket, b"PING\n").await?;

        let mut buf = [0u8; 512];
        let wait = self.timeout.min(UDP_CHECK_WAIT);
        match tokio::time::timeout(wait, socket.recv(&mut buf)).await {
            Ok(Ok(n)) => {
                let reply = String::from_utf8_lossy(&buf[..n]);
                if reply.trim().eq_ignore_ascii_case("PONG") {
                    Ok(TestReport::ok("UDP stream relay answered PONG"))
                } else {
                    Ok(TestReport::failed(format!(
                        "unexpected UDP reply '{}'",
                        reply.trim()
                    )))
                }
            }
            // ICMP port unreachable surfaces here on a connected socket
            Ok(Err(e)) => Err(CalloutError::Transport(e.to_string())),
            Err(_) => Ok(TestReport::failed("no UDP reply (relay silent or filtered)")),
        }
    }

    async fn announce(
        &self,
        cfg: &EndpointConfig,
        req: &AnnouncementRequest,
    ) -> CalloutResult<AnnounceReceipt> {
        let session_id = new_session_id();
        let body = SessionRequest {
            session_id: &session_id,
            text: &req.text,
            language: &req.language,
            volume_percent: req.volume,
            context: &req.context,
        };
        let datagram = format!("ANNOUNCE {}\n", serde_json::to_string(&body)?);
        let socket = self.socket(cfg).await?;
        self.send(&socket, datagram.as_bytes()).await?;
        info!("📡 UDP stream session {} sent to {}", session_id, cfg.id);

        let url = format!("udp://{}:{}", cfg.host(), cfg.port);
        Ok(AnnounceReceipt::stream("UDP stream announced", session_id, url))
    }

    async fn stop(&self, cfg: &EndpointConfig) -> CalloutResult<()> {
        let socket = self.socket(cfg).await?;
        debug!("UDP STOP to {}", cfg.id);
        self.send(&socket, b"STOP\n").await
    }
}

/// RTSP stream relay: ANNOUNCE describes the session, clients pull it
pub struct StreamRtspDriver {
    rtsp: RtspClient,
}

impl StreamRtspDriver {
    pub fn new(options: &DriverOptions) -> Self {
        Self {
            rtsp: RtspClient::new(options),
        }
    }

    fn sdp(session_id: &str, cfg: &EndpointConfig, req: &AnnouncementRequest) -> String {
        format!(
            "v=0\r\no=- {} 1 IN IP4 {}\r\ns={}\r\na=x-language:{}\r\na=x-volume:{}\r\nt=0 0\r\nm=audio 0 RTP/AVP 0\r\n",
            session_id,
            cfg.host(),
            req.text.replace(['\r', '\n'], " "),
            req.language,
            req.volume
        )
    }
}

#[async_trait]
impl Driver for StreamRtspDriver {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::StreamRtsp
    }

    async fn test(&self, cfg: &EndpointConfig) -> CalloutResult<TestReport> {
        self.rtsp.options(cfg, "RTSP stream relay").await
    }

    async fn announce(
        &self,
        cfg: &EndpointConfig,
        req: &AnnouncementRequest,
    ) -> CalloutResult<AnnounceReceipt> {
        let session_id = new_session_id();
        let sdp = Self::sdp(&session_id, cfg, req);
        let response = self
            .rtsp
            .request(cfg, "ANNOUNCE", &[], Some(("application/sdp", &sdp)))
            .await?;
        if !response.is_success() {
            return Err(CalloutError::ProtocolRejection(format!(
                "RTSP relay rejected session ({} {})",
                response.status, response.reason
            )));
        }
        let session_id = response
            .header("session")
            .map(|s| s.split(';').next().unwrap_or(s).trim().to_string())
            .unwrap_or(session_id);
        info!("📡 RTSP stream session {} on {}", session_id, cfg.id);
        Ok(AnnounceReceipt::stream(
            "RTSP stream session announced",
            session_id,
            RtspClient::url(cfg),
        ))
    }

    async fn stop(&self, cfg: &EndpointConfig) -> CalloutResult<()> {
        self.rtsp.teardown(cfg, None).await
    }
}
