//! Shared HTTP plumbing for the HTTP-speaking drivers

use super::{DriverOptions, TestReport};
use crate::announcement::AnnounceReceipt;
use crate::endpoint::EndpointConfig;
use crate::error::{CalloutError, CalloutResult};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use std::time::Duration;
use tracing::{debug, warn};

/// Longest response body quoted in error details
const BODY_SNIPPET: usize = 160;

/// Thin wrapper over a reqwest client with the driver timeout applied
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(options: &DriverOptions) -> Self {
        let client = Client::builder()
            .timeout(options.timeout)
            .connect_timeout(options.timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!("⚠️ Failed to build HTTP client ({}), using defaults", e);
                Client::new()
            });
        Self {
            client,
            timeout: options.timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Start a request against `path` on the endpoint, with basic auth
    /// applied when credentials carry a username
    pub fn request(&self, method: Method, cfg: &EndpointConfig, path: &str) -> RequestBuilder {
        let url = format!("{}{}", cfg.base_url(), path);
        debug!("{} {}", method, url);
        let builder = self.client.request(method, url);
        match &cfg.credentials {
            Some(creds) if creds.has_basic() => {
                builder.basic_auth(&creds.username, Some(&creds.password))
            }
            _ => builder,
        }
    }

    /// Send without auth decoration
    pub fn raw(&self, method: Method, url: &str) -> RequestBuilder {
        debug!("{} {}", method, url);
        self.client.request(method, url)
    }

    /// Send a request, mapping connection level failures to transport errors
    pub async fn send(&self, builder: RequestBuilder) -> CalloutResult<Response> {
        builder.send().await.map_err(transport_error)
    }
}

/// Map a reqwest failure before any response was received
pub fn transport_error(err: reqwest::Error) -> CalloutError {
    if err.is_timeout() {
        CalloutError::Transport(format!("timed out: {}", err))
    } else if err.is_connect() {
        CalloutError::Transport(format!("could not connect: {}", err))
    } else {
        CalloutError::from(err)
    }
}

/// Read a body, truncated for use in a detail string
pub async fn body_snippet(response: Response) -> String {
    match response.text().await {
        Ok(text) => {
            let trimmed = text.trim();
            if trimmed.chars().count() > BODY_SNIPPET {
                let cut: String = trimmed.chars().take(BODY_SNIPPET).collect();
                format!("{}…", cut)
            } else {
                trimmed.to_string()
            }
        }
        Err(_) => String::new(),
    }
}

/// Interpret a handshake response status. `confirm` inspects a successful
/// body and says whether it really came from the expected protocol.
pub async fn test_report<F>(response: Response, protocol: &str, confirm: F) -> TestReport
where
    F: FnOnce(&str) -> Option<String>,
{
    let status = response.status();
    if status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return match confirm(&body) {
            Some(detail) => TestReport::ok(detail),
            None => TestReport::failed(format!(
                "HTTP {} but response is not {}",
                status.as_u16(),
                protocol
            )),
        };
    }
    TestReport::failed(status_detail(status, protocol))
}

fn status_detail(status: StatusCode, protocol: &str) -> String {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            format!("{} reachable but unauthorized (HTTP {})", protocol, status.as_u16())
        }
        StatusCode::NOT_FOUND => format!("no {} endpoint (HTTP 404)", protocol),
        other => format!("{} handshake failed (HTTP {})", protocol, other.as_u16()),
    }
}

/// Turn an announce response into a receipt or a protocol rejection
pub async fn announce_receipt(response: Response, protocol: &str) -> CalloutResult<AnnounceReceipt> {
    let status = response.status();
    if status.is_success() {
        return Ok(AnnounceReceipt::done(format!(
            "{} accepted announcement (HTTP {})",
            protocol,
            status.as_u16()
        )));
    }
    let body = body_snippet(response).await;
    Err(CalloutError::ProtocolRejection(format!(
        "{} rejected announcement (HTTP {}) {}",
        protocol,
        status.as_u16(),
        body
    )))
}

/// Stop responses: nothing playing (404/409) is not an error
pub async fn stop_result(response: Response, protocol: &str) -> CalloutResult<()> {
    let status = response.status();
    if status.is_success() || status == StatusCode::NOT_FOUND || status == StatusCode::CONFLICT {
        return Ok(());
    }
    let body = body_snippet(response).await;
    Err(CalloutError::ProtocolRejection(format!(
        "{} rejected stop (HTTP {}) {}",
        protocol,
        status.as_u16(),
        body
    )))
}

/// Split a `"POST /path"` route into method and path. A bare path uses
/// `default`.
pub fn parse_route(route: &str, default: Method) -> (Method, String) {
    let route = route.trim();
    if let Some((method, path)) = route.split_once(char::is_whitespace) {
        if let Ok(m) = Method::from_bytes(method.to_uppercase().as_bytes()) {
            return (m, normalize_path(path.trim()));
        }
    }
    (default, normalize_path(route))
}

fn normalize_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    }
}
