//! Legacy HTTP relay
//!
//! Second tier of the chain: a plain always-on HTTP service that takes
//! the announcement as JSON and plays it on the endpoint's behalf. It
//! knows nothing about vendor protocols.

use crate::announcement::{AnnounceReceipt, AnnouncementRequest};
use crate::drivers::http::{announce_receipt, transport_error};
use crate::error::{CalloutError, CalloutResult};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RelayPayload<'a> {
    endpoint_id: &'a str,
    text: &'a str,
    language: &'a str,
    volume_percent: u8,
    #[serde(skip_serializing_if = "str::is_empty")]
    context: &'a str,
}

#[derive(Debug, Clone)]
pub struct RelayClient {
    client: Client,
    url: String,
}

impl RelayClient {
    pub fn new(url: &str, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!("⚠️ Failed to build relay HTTP client: {}", e);
                Client::new()
            });
        Self {
            client,
            url: url.trim_end_matches('/').to_string(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Post one announcement to the relay
    pub async fn announce(
        &self,
        endpoint_id: &str,
        req: &AnnouncementRequest,
    ) -> CalloutResult<AnnounceReceipt> {
        let url = format!("{}/announce", self.url);
        debug!("📡 Relay POST {} for {}", url, endpoint_id);

        let response = self
            .client
            .post(&url)
            .json(&RelayPayload {
                endpoint_id,
                text: &req.text,
                language: &req.language,
                volume_percent: req.volume,
                context: &req.context,
            })
            .send()
            .await
            .map_err(transport_error)?;

        announce_receipt(response, "relay").await
    }
}

/// Validate a relay URL at configuration time
pub fn validate_url(url: &str) -> CalloutResult<()> {
    let parsed = reqwest::Url::parse(url)
        .map_err(|e| CalloutError::Configuration(format!("relay url '{}': {}", url, e)))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(CalloutError::Configuration(format!(
            "relay url '{}': unsupported scheme {}",
            url, other
        ))),
    }
}
