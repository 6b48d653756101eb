//! Connection Health Tracker
//!
//! Owns the per-endpoint connectivity map. Nothing else reads or writes
//! connection status directly; drivers only report test results and the
//! dispatcher goes through `should_attempt` / `mark_*`.

use crate::drivers::{bounded, DriverRegistry};
use crate::endpoint::EndpointConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Default window during which a failed endpoint is not retried
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Error => "error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Default)]
struct EndpointHealth {
    status: ConnectionStatus,
    /// Monotonic time of the last settled check
    last_checked: Option<Instant>,
    detail: String,
}

/// Serializable view of one endpoint's health
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthEntry {
    pub endpoint_id: String,
    pub status: ConnectionStatus,
    pub detail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checked_ago_ms: Option<u64>,
}

pub struct HealthTracker {
    entries: RwLock<HashMap<String, EndpointHealth>>,
    registry: Arc<DriverRegistry>,
    cooldown: Duration,
}

impl std::fmt::Debug for HealthTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthTracker")
            .field("cooldown", &self.cooldown)
            .finish()
    }
}

impl HealthTracker {
    pub fn new(registry: Arc<DriverRegistry>, cooldown: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            registry,
            cooldown,
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Current status; unknown endpoints are `Disconnected`
    pub fn status(&self, endpoint_id: &str) -> ConnectionStatus {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(endpoint_id)
            .map(|e| e.status)
            .unwrap_or_default()
    }

    /// Detail string of the last check
    pub fn detail(&self, endpoint_id: &str) -> Option<String> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(endpoint_id)
            .map(|e| e.detail.clone())
    }

    /// False only while the endpoint is in `Error` and the last check is
    /// inside the cool-down window
    pub fn should_attempt(&self, endpoint_id: &str) -> bool {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        match entries.get(endpoint_id) {
            Some(health) if health.status == ConnectionStatus::Error => health
                .last_checked
                .map(|checked| checked.elapsed() >= self.cooldown)
                .unwrap_or(true),
            _ => true,
        }
    }

    /// Test the endpoint with its configured driver and record the result
    pub async fn refresh(&self, endpoint_id: &str, cfg: &EndpointConfig) -> ConnectionStatus {
        self.set(endpoint_id, ConnectionStatus::Connecting, "checking", false);

        if let Err(e) = cfg.validate() {
            warn!("⚠️ Endpoint {} misconfigured: {}", endpoint_id, e);
            self.set(endpoint_id, ConnectionStatus::Error, &e.to_string(), true);
            return ConnectionStatus::Error;
        }
        let driver = match self.registry.require(cfg.kind) {
            Ok(driver) => driver,
            Err(e) => {
                self.set(endpoint_id, ConnectionStatus::Error, &e.to_string(), true);
                return ConnectionStatus::Error;
            }
        };

        let timeout = self.registry.options().timeout;
        let (status, detail) = match bounded(timeout, driver.test(cfg)).await {
            Ok(report) if report.ok => (ConnectionStatus::Connected, report.detail),
            Ok(report) => (ConnectionStatus::Error, report.detail),
            Err(e) => (ConnectionStatus::Error, e.to_string()),
        };

        info!("🩺 {} ({}) -> {}: {}", endpoint_id, cfg.kind, status, detail);
        self.set(endpoint_id, status, &detail, true);
        status
    }

    /// Record a failed delivery
    pub fn mark_error(&self, endpoint_id: &str, detail: &str) {
        debug!("Marking {} as error: {}", endpoint_id, detail);
        self.set(endpoint_id, ConnectionStatus::Error, detail, true);
    }

    /// Record a successful delivery
    pub fn mark_connected(&self, endpoint_id: &str) {
        self.set(endpoint_id, ConnectionStatus::Connected, "delivered", true);
    }

    /// Configuration changed: forget what we knew
    pub fn reset(&self, endpoint_id: &str) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(endpoint_id.to_string(), EndpointHealth::default());
    }

    /// All known endpoints, sorted by id
    pub fn snapshot(&self) -> Vec<HealthEntry> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let mut list: Vec<HealthEntry> = entries
            .iter()
            .map(|(id, h)| HealthEntry {
                endpoint_id: id.clone(),
                status: h.status,
                detail: h.detail.clone(),
                checked_ago_ms: h
                    .last_checked
                    .map(|t| t.elapsed().as_millis().min(u128::from(u64::MAX)) as u64),
            })
            .collect();
        list.sort_by(|a, b| a.endpoint_id.cmp(&b.endpoint_id));
        list
    }

    fn set(&self, endpoint_id: &str, status: ConnectionStatus, detail: &str, settled: bool) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let entry = entries.entry(endpoint_id.to_string()).or_default();
        entry.status = status;
        entry.detail = detail.to_string();
        if settled {
            entry.last_checked = Some(Instant::now());
        }
    }
}
