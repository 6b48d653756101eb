//! RTSP driver
//!
//! Talks plain RTSP/1.0 over TCP: OPTIONS as the handshake, ANNOUNCE to
//! push the announcement parameters and TEARDOWN to stop.

use super::{Driver, DriverOptions, TestReport};
use crate::announcement::{AnnounceReceipt, AnnouncementRequest};
use crate::endpoint::{EndpointConfig, ProtocolKind};
use crate::error::{CalloutError, CalloutResult};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info};

lazy_static! {
    static ref STATUS_LINE: Regex =
        Regex::new(r"^RTSP/1\.[01]\s+(\d{3})\s*(.*)$").expect("valid RTSP status regex");
}

/// Max header block we are willing to read
const MAX_HEADER_BYTES: usize = 8192;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtspResponse {
    pub status: u16,
    pub reason: String,
    pub headers: HashMap<String, String>,
}

impl RtspResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }

    /// Parse the status line and headers of a response
    pub fn parse(raw: &str) -> CalloutResult<Self> {
        let mut lines = raw.split("\r\n");
        let status_line = lines.next().unwrap_or_default().trim();
        let caps = STATUS_LINE.captures(status_line).ok_or_else(|| {
            CalloutError::ProtocolRejection(format!("not an RTSP response: '{}'", status_line))
        })?;
        let status = caps[1]
            .parse::<u16>()
            .map_err(|e| CalloutError::ProtocolRejection(e.to_string()))?;
        let reason = caps[2].trim().to_string();

        let headers = lines
            .take_while(|l| !l.is_empty())
            .filter_map(|l| l.split_once(':'))
            .map(|(k, v)| (k.trim().to_lowercase(), v.trim().to_string()))
            .collect();

        Ok(Self {
            status,
            reason,
            headers,
        })
    }
}

/// Minimal RTSP request/response client, one connection per request
#[derive(Debug, Clone)]
pub struct RtspClient {
    timeout: Duration,
}

impl RtspClient {
    pub fn new(options: &DriverOptions) -> Self {
        Self {
            timeout: options.timeout,
        }
    }

    pub fn url(cfg: &EndpointConfig) -> String {
        let path = cfg.channel.as_deref().unwrap_or("");
        format!(
            "rtsp://{}:{}/{}",
            cfg.host(),
            cfg.port,
            path.trim_start_matches('/')
        )
    }

    fn build_request(
        cfg: &EndpointConfig,
        method: &str,
        extra_headers: &[(&str, String)],
        body: Option<(&str, &str)>,
    ) -> String {
        let mut request = format!("{} {} RTSP/1.0\r\nCSeq: 1\r\nUser-Agent: callout\r\n", method, Self::url(cfg));
        if let Some(creds) = cfg.credentials.as_ref().filter(|c| c.has_basic()) {
            let token = STANDARD.encode(format!("{}:{}", creds.username, creds.password));
            request.push_str(&format!("Authorization: Basic {}\r\n", token));
        }
        for (name, value) in extra_headers {
            request.push_str(&format!("{}: {}\r\n", name, value));
        }
        match body {
            Some((content_type, content)) => {
                request.push_str(&format!(
                    "Content-Type: {}\r\nContent-Length: {}\r\n\r\n{}",
                    content_type,
                    content.len(),
                    content
                ));
            }
            None => request.push_str("\r\n"),
        }
        request
    }

    /// Send one request and read the response headers
    pub async fn request(
        &self,
        cfg: &EndpointConfig,
        method: &str,
        extra_headers: &[(&str, String)],
        body: Option<(&str, &str)>,
    ) -> CalloutResult<RtspResponse> {
        let request = Self::build_request(cfg, method, extra_headers, body);
        let addr = format!("{}:{}", cfg.host(), cfg.port);
        debug!("RTSP {} {}", method, addr);

        let exchange = async {
            let mut stream = TcpStream::connect(&addr)
                .await
                .map_err(|e| CalloutError::Transport(format!("could not connect to {}: {}", addr, e)))?;
            stream
                .write_all(request.as_bytes())
                .await
                .map_err(|e| CalloutError::Transport(e.to_string()))?;

            let mut buf = Vec::with_capacity(1024);
            let mut chunk = [0u8; 1024];
            loop {
                let n = stream
                    .read(&mut chunk)
                    .await
                    .map_err(|e| CalloutError::Transport(e.to_string()))?;
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
                if buf.windows(4).any(|w| w == b"\r\n\r\n") || buf.len() >= MAX_HEADER_BYTES {
                    break;
                }
            }
            if buf.is_empty() {
                return Err(CalloutError::Transport(format!(
                    "{} closed the connection without answering",
                    addr
                )));
            }
            RtspResponse::parse(&String::from_utf8_lossy(&buf))
        };

        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(CalloutError::Transport(format!(
                "RTSP {} to {} timed out",
                method, addr
            ))),
        }
    }

    /// OPTIONS handshake shared by the RTSP drivers. A host that answers
    /// in some other protocol is reachable, so it reports `ok=false`.
    pub async fn options(&self, cfg: &EndpointConfig, protocol: &str) -> CalloutResult<TestReport> {
        let response = match self.request(cfg, "OPTIONS", &[], None).await {
            Ok(response) => response,
            Err(CalloutError::ProtocolRejection(detail)) => {
                return Ok(TestReport::failed(format!("no {} server: {}", protocol, detail)));
            }
            Err(e) => return Err(e),
        };
        Ok(match response.status {
            200..=299 => {
                let public = response.header("public").unwrap_or("no Public header");
                TestReport::ok(format!("{} server ({})", protocol, public))
            }
            401 | 403 => TestReport::failed(format!(
                "{} reachable but unauthorized ({} {})",
                protocol, response.status, response.reason
            )),
            status => TestReport::failed(format!(
                "{} handshake failed ({} {})",
                protocol, status, response.reason
            )),
        })
    }

    /// TEARDOWN; no session on the server is not an error
    pub async fn teardown(&self, cfg: &EndpointConfig, session: Option<&str>) -> CalloutResult<()> {
        let headers: Vec<(&str, String)> = session
            .map(|s| vec![("Session", s.to_string())])
            .unwrap_or_default();
        let response = self.request(cfg, "TEARDOWN", &headers, None).await?;
        match response.status {
            200..=299 | 404 | 454 | 455 => Ok(()),
            status => Err(CalloutError::ProtocolRejection(format!(
                "RTSP TEARDOWN rejected ({} {})",
                status, response.reason
            ))),
        }
    }
}

pub struct RtspDriver {
    rtsp: RtspClient,
}

impl RtspDriver {
    pub fn new(options: &DriverOptions) -> Self {
        Self {
            rtsp: RtspClient::new(options),
        }
    }

    fn parameters(req: &AnnouncementRequest) -> String {
        format!(
            "text: {}\r\nlanguage: {}\r\nvolume: {}\r\n",
            req.text.replace(['\r', '\n'], " "),
            req.language,
            req.volume
        )
    }
}

#[async_trait]
impl Driver for RtspDriver {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Rtsp
    }

    async fn test(&self, cfg: &EndpointConfig) -> CalloutResult<TestReport> {
        self.rtsp.options(cfg, "RTSP").await
    }

    async fn announce(
        &self,
        cfg: &EndpointConfig,
        req: &AnnouncementRequest,
    ) -> CalloutResult<AnnounceReceipt> {
        info!("📢 RTSP announce on {} [{}]", cfg.id, req.context);
        let params = Self::parameters(req);
        let response = self
            .rtsp
            .request(cfg, "ANNOUNCE", &[], Some(("text/parameters", &params)))
            .await?;
        if response.is_success() {
            Ok(AnnounceReceipt::done(format!(
                "RTSP ANNOUNCE accepted ({})",
                response.status
            )))
        } else {
            Err(CalloutError::ProtocolRejection(format!(
                "RTSP ANNOUNCE rejected ({} {})",
                response.status, response.reason
            )))
        }
    }

    async fn stop(&self, cfg: &EndpointConfig) -> CalloutResult<()> {
        self.rtsp.teardown(cfg, None).await
    }
}
