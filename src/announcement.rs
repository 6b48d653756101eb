//! Announcement request/outcome value types

use crate::error::CalloutError;
use serde::{Deserialize, Deserializer, Serialize};

/// Loudest accepted volume
pub const MAX_VOLUME: u8 = 100;

/// A single "call this customer" event, already rendered in the target
/// language.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnouncementRequest {
    pub text: String,
    pub language: String,
    /// Token/counter context, passed through to logs only
    #[serde(default)]
    pub context: String,
    /// Normalized volume, 0-100
    #[serde(deserialize_with = "clamped_volume")]
    pub volume: u8,
}

impl AnnouncementRequest {
    pub fn new(text: &str, language: &str, volume: u8) -> Self {
        Self {
            text: text.to_string(),
            language: language.to_string(),
            context: String::new(),
            volume: volume.min(MAX_VOLUME),
        }
    }

    pub fn with_context(mut self, context: &str) -> Self {
        self.context = context.to_string();
        self
    }
}

/// Requests arriving over IPC or from files are clamped like `new`
fn clamped_volume<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    let volume = u64::deserialize(deserializer)?;
    Ok(volume.min(u64::from(MAX_VOLUME)) as u8)
}

/// What a driver hands back after a successful announce
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnounceReceipt {
    pub detail: String,
    /// Streaming drivers: session registered on the relay
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Streaming drivers: where the media can be pulled from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playable_url: Option<String>,
}

impl AnnounceReceipt {
    pub fn done(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
            ..Default::default()
        }
    }

    pub fn stream(detail: impl Into<String>, session_id: String, playable_url: String) -> Self {
        Self {
            detail: detail.into(),
            session_id: Some(session_id),
            playable_url: Some(playable_url),
        }
    }
}

/// Stage of the fallback chain that settled the request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Device,
    Relay,
    Local,
    Cancelled,
    /// No tier delivered the announcement
    Failed,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Tier::Device => "device",
            Tier::Relay => "relay",
            Tier::Local => "local",
            Tier::Cancelled => "cancelled",
            Tier::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Terminal failure reported to the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum OutcomeError {
    NoVoiceAvailable,
    AllTiersExhausted(String),
}

impl From<OutcomeError> for CalloutError {
    fn from(err: OutcomeError) -> Self {
        match err {
            OutcomeError::NoVoiceAvailable => CalloutError::NoVoiceAvailable,
            OutcomeError::AllTiersExhausted(detail) => CalloutError::AllTiersExhausted(detail),
        }
    }
}

/// A recovered failure on an intermediate tier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierFailure {
    pub tier: Tier,
    /// Error taxonomy name, see [`CalloutError::kind`]
    pub kind: String,
    pub detail: String,
}

impl TierFailure {
    pub fn new(tier: Tier, err: &CalloutError) -> Self {
        Self {
            tier,
            kind: err.kind().to_string(),
            detail: err.to_string(),
        }
    }

    pub fn skipped(tier: Tier, detail: &str) -> Self {
        Self {
            tier,
            kind: "skipped".to_string(),
            detail: detail.to_string(),
        }
    }
}

/// Result of one dispatch. Produced exactly once per request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnouncementOutcome {
    pub endpoint_id: String,
    pub tier: Tier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice_id: Option<String>,
    #[serde(default)]
    pub using_fallback_language: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receipt: Option<AnnounceReceipt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<OutcomeError>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<TierFailure>,
}

impl AnnouncementOutcome {
    pub(crate) fn new(endpoint_id: &str, tier: Tier) -> Self {
        Self {
            endpoint_id: endpoint_id.to_string(),
            tier,
            voice_id: None,
            using_fallback_language: false,
            receipt: None,
            error: None,
            failures: Vec::new(),
        }
    }

    /// True when the announcement was heard through some tier. Only a
    /// failed outcome means "announcement did not happen".
    pub fn delivered(&self) -> bool {
        matches!(self.tier, Tier::Device | Tier::Relay | Tier::Local)
    }

    /// Human readable one-liner for logs and the CLI
    pub fn summary(&self) -> String {
        match (&self.tier, &self.error) {
            (Tier::Failed, Some(OutcomeError::NoVoiceAvailable)) => {
                format!("{}: failed (no voice available)", self.endpoint_id)
            }
            (Tier::Failed, Some(OutcomeError::AllTiersExhausted(d))) => {
                format!("{}: failed ({})", self.endpoint_id, d)
            }
            (Tier::Local, _) => format!(
                "{}: local synthesis with voice {}{}",
                self.endpoint_id,
                self.voice_id.as_deref().unwrap_or("?"),
                if self.using_fallback_language {
                    " (fallback language)"
                } else {
                    ""
                }
            ),
            (tier, _) => format!("{}: {}", self.endpoint_id, tier),
        }
    }
}
