//! Auto-Detector
//!
//! Tests one address with every registered driver at once and reports
//! which protocol answered. Runs at configuration time, never on the
//! announcement path.

use crate::drivers::{bounded, DriverRegistry};
use crate::endpoint::{Credentials, EndpointConfig, ProtocolKind};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Default overall detection deadline
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(8);

/// One driver's answer. Field names are part of the external contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionAttempt {
    pub kind: ProtocolKind,
    pub ok: bool,
    pub detail: String,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionResult {
    /// Winning protocol, if any driver confirmed the device
    pub kind: Option<ProtocolKind>,
    /// Every attempt, successful ones first, then by specificity
    pub attempts: Vec<DetectionAttempt>,
}

impl DetectionResult {
    pub fn succeeded(&self) -> bool {
        self.kind.is_some()
    }

    pub fn attempt(&self, kind: ProtocolKind) -> Option<&DetectionAttempt> {
        self.attempts.iter().find(|a| a.kind == kind)
    }
}

pub struct Detector {
    registry: Arc<DriverRegistry>,
    deadline: Duration,
}

impl Detector {
    pub fn new(registry: Arc<DriverRegistry>, deadline: Duration) -> Self {
        Self { registry, deadline }
    }

    /// Test `address:port` with every driver concurrently. `recent` is the
    /// kind last configured for this address and wins ties.
    pub async fn detect(
        &self,
        address: &str,
        port: u16,
        credentials: Option<Credentials>,
        recent: Option<ProtocolKind>,
    ) -> DetectionResult {
        let kinds = self.registry.kinds();
        info!(
            "🔍 Detecting protocol at {}:{} with {} drivers",
            address,
            port,
            kinds.len()
        );

        let per_call = self.registry.options().timeout;
        let deadline = Instant::now() + self.deadline;
        let deadline_ms = self.deadline.as_millis() as u64;

        let checks = kinds.iter().filter_map(|&kind| {
            let driver = self.registry.get(kind)?;
            let mut cfg = EndpointConfig::new("detect", address, port, kind);
            cfg.credentials = credentials.clone();

            let handle = tokio::spawn(async move {
                let started = Instant::now();
                let (ok, detail) = match bounded(per_call, driver.test(&cfg)).await {
                    Ok(report) => (report.ok, report.detail),
                    Err(e) => (false, e.to_string()),
                };
                DetectionAttempt {
                    kind,
                    ok,
                    detail,
                    elapsed_ms: started.elapsed().as_millis() as u64,
                }
            });
            let abort = handle.abort_handle();

            Some(async move {
                match tokio::time::timeout_at(deadline, handle).await {
                    Ok(Ok(attempt)) => attempt,
                    Ok(Err(e)) => DetectionAttempt {
                        kind,
                        ok: false,
                        detail: format!("check failed: {}", e),
                        elapsed_ms: 0,
                    },
                    Err(_) => {
                        abort.abort();
                        DetectionAttempt {
                            kind,
                            ok: false,
                            detail: "deadline exceeded".to_string(),
                            elapsed_ms: deadline_ms,
                        }
                    }
                }
            })
        });

        let mut attempts = join_all(checks).await;
        attempts.sort_by_key(|a| (!a.ok, a.kind.specificity_rank()));

        let kind = pick_winner(&attempts, recent);
        match kind {
            Some(kind) => info!("✅ {}:{} speaks {}", address, port, kind.display_name()),
            None => warn!("⚠️ No driver confirmed {}:{}", address, port),
        }
        for attempt in &attempts {
            debug!(
                "   {} ok={} {}ms {}",
                attempt.kind, attempt.ok, attempt.elapsed_ms, attempt.detail
            );
        }

        DetectionResult { kind, attempts }
    }
}

/// Recency hint first, then the most specific successful protocol
fn pick_winner(attempts: &[DetectionAttempt], recent: Option<ProtocolKind>) -> Option<ProtocolKind> {
    if let Some(recent) = recent {
        if attempts.iter().any(|a| a.ok && a.kind == recent) {
            return Some(recent);
        }
    }
    attempts
        .iter()
        .filter(|a| a.ok)
        .min_by_key(|a| a.kind.specificity_rank())
        .map(|a| a.kind)
}
