//! Callout Error Types
//!
//! Centralized error taxonomy for the announcement chain.

use thiserror::Error;

/// Central error type for Callout
#[derive(Error, Debug)]
pub enum CalloutError {
    /// Host unreachable, DNS failure, refused connection or timeout
    #[error("transport error: {0}")]
    Transport(String),

    /// Device reachable but rejected the request
    #[error("protocol rejection: {0}")]
    ProtocolRejection(String),

    /// Local tier has no usable voice
    #[error("no voice available for local synthesis")]
    NoVoiceAvailable,

    /// Device, relay and local synthesis all failed
    #[error("all announcement tiers exhausted: {0}")]
    AllTiersExhausted(String),

    /// Unregistered protocol kind or malformed endpoint configuration
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CalloutError {
    /// Short machine-readable name used in outcomes and the audit trail
    pub fn kind(&self) -> &'static str {
        match self {
            CalloutError::Transport(_) => "transport_error",
            CalloutError::ProtocolRejection(_) => "protocol_rejection",
            CalloutError::NoVoiceAvailable => "no_voice_available",
            CalloutError::AllTiersExhausted(_) => "all_tiers_exhausted",
            CalloutError::Configuration(_) => "configuration_error",
            CalloutError::Io(_) => "io_error",
            CalloutError::Json(_) => "json_error",
            CalloutError::Other(_) => "other",
        }
    }

    /// Transport and protocol errors are recovered by moving to the next tier
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CalloutError::Transport(_) | CalloutError::ProtocolRejection(_)
        )
    }
}

impl From<reqwest::Error> for CalloutError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_status() || err.is_decode() || err.is_builder() {
            CalloutError::ProtocolRejection(err.to_string())
        } else {
            CalloutError::Transport(err.to_string())
        }
    }
}

/// Result type alias for Callout operations
pub type CalloutResult<T> = Result<T, CalloutError>;
