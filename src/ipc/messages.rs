//! IPC Message Types
//!
//! JSON-serializable messages for daemon ↔ CLI communication.

use crate::announcement::{AnnouncementOutcome, AnnouncementRequest};
use crate::detect::DetectionResult;
use crate::dispatch::StopReport;
use crate::endpoint::Credentials;
use crate::health::HealthEntry;
use serde::{Deserialize, Serialize};

/// Request types sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcRequest {
    /// Deliver an announcement and wait for its outcome
    Announce {
        seq_id: u64,
        endpoint_id: String,
        request: AnnouncementRequest,
    },

    /// Detect which protocol an address speaks
    Detect {
        seq_id: u64,
        address: String,
        port: u16,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        credentials: Option<Credentials>,
    },

    /// Health of one endpoint, or all when `endpoint_id` is absent
    Status {
        seq_id: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        endpoint_id: Option<String>,
    },

    /// Cancel whatever the endpoint is announcing
    Stop { seq_id: u64, endpoint_id: String },

    /// Re-check an endpoint
    Refresh { seq_id: u64, endpoint_id: String },
}

impl IpcRequest {
    pub fn seq_id(&self) -> u64 {
        match self {
            IpcRequest::Announce { seq_id, .. }
            | IpcRequest::Detect { seq_id, .. }
            | IpcRequest::Status { seq_id, .. }
            | IpcRequest::Stop { seq_id, .. }
            | IpcRequest::Refresh { seq_id, .. } => *seq_id,
        }
    }
}

/// Response types sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcResponse {
    Outcome {
        seq_id: u64,
        outcome: AnnouncementOutcome,
    },

    Detection {
        seq_id: u64,
        result: DetectionResult,
    },

    Status {
        seq_id: u64,
        entries: Vec<HealthEntry>,
    },

    Stopped { seq_id: u64, report: StopReport },

    /// Acknowledgment
    Ack {
        seq_id: u64,
        success: bool,
        message: Option<String>,
    },

    /// Malformed or rejected request
    Error { seq_id: u64, message: String },
}

impl IpcResponse {
    pub fn seq_id(&self) -> u64 {
        match self {
            IpcResponse::Outcome { seq_id, .. }
            | IpcResponse::Detection { seq_id, .. }
            | IpcResponse::Status { seq_id, .. }
            | IpcResponse::Stopped { seq_id, .. }
            | IpcResponse::Ack { seq_id, .. }
            | IpcResponse::Error { seq_id, .. } => *seq_id,
        }
    }
}
