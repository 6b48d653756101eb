//! Protocol Driver Registry
//!
//! One driver per device family, all behind the same {test, announce,
//! stop} contract. Drivers are stateless adapters: they never retry and
//! share nothing between calls. Retrying and falling back is the
//! dispatcher's job.

use crate::announcement::{AnnounceReceipt, AnnouncementRequest};
use crate::endpoint::{EndpointConfig, ProtocolKind};
use crate::error::{CalloutError, CalloutResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

pub mod http;
pub mod onvif;
pub mod rest;
pub mod rtsp;
pub mod stream;
pub mod vendor;

/// Default per-call timeout for driver operations
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Result of a protocol handshake against a reachable host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestReport {
    pub ok: bool,
    pub detail: String,
}

impl TestReport {
    pub fn ok(detail: impl Into<String>) -> Self {
        Self {
            ok: true,
            detail: detail.into(),
        }
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            ok: false,
            detail: detail.into(),
        }
    }
}

/// Options shared by every driver built for a registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverOptions {
    pub timeout: Duration,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl DriverOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }
}

/// Trait for device protocol drivers
#[async_trait]
pub trait Driver: Send + Sync {
    /// Protocol family this driver speaks
    fn kind(&self) -> ProtocolKind;

    /// Protocol handshake. A reachable device that refuses us (bad
    /// credentials, wrong protocol) is `Ok` with `ok = false`; only
    /// transport failures are `Err`.
    async fn test(&self, cfg: &EndpointConfig) -> CalloutResult<TestReport>;

    /// Deliver the announcement
    async fn announce(
        &self,
        cfg: &EndpointConfig,
        req: &AnnouncementRequest,
    ) -> CalloutResult<AnnounceReceipt>;

    /// Best-effort cancellation. Succeeds when nothing is playing.
    async fn stop(&self, cfg: &EndpointConfig) -> CalloutResult<()>;
}

/// Run a driver future under a timeout, mapping expiry to a transport error
pub async fn bounded<T, F>(timeout: Duration, fut: F) -> CalloutResult<T>
where
    F: Future<Output = CalloutResult<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(CalloutError::Transport(format!(
            "timed out after {}ms",
            timeout.as_millis()
        ))),
    }
}

/// Lookup table from protocol kind to driver
#[derive(Clone, Default)]
pub struct DriverRegistry {
    drivers: HashMap<ProtocolKind, Arc<dyn Driver>>,
    options: DriverOptions,
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("kinds", &self.kinds())
            .field("options", &self.options)
            .finish()
    }
}

impl DriverRegistry {
    /// Create an empty registry
    pub fn new(options: DriverOptions) -> Self {
        Self {
            drivers: HashMap::new(),
            options,
        }
    }

    /// Registry with a driver for every protocol kind
    pub fn with_defaults(options: DriverOptions) -> Self {
        let mut registry = Self::new(options);
        registry.register(Arc::new(vendor::IsapiDriver::new(&options)));
        registry.register(Arc::new(vendor::CgiDriver::new(&options)));
        registry.register(Arc::new(vendor::VapixDriver::new(&options)));
        registry.register(Arc::new(onvif::OnvifDriver::new(&options)));
        registry.register(Arc::new(rtsp::RtspDriver::new(&options)));
        registry.register(Arc::new(rest::GenericRestDriver::new(&options)));
        registry.register(Arc::new(rest::BearerRestDriver::new(&options)));
        registry.register(Arc::new(rest::WebhookDriver::new(&options)));
        registry.register(Arc::new(stream::StreamHttpDriver::new(&options)));
        registry.register(Arc::new(stream::StreamUdpDriver::new(&options)));
        registry.register(Arc::new(stream::StreamRtspDriver::new(&options)));
        registry.register(Arc::new(rest::CustomDriver::new(&options)));
        info!("🔌 Registered {} protocol drivers", registry.drivers.len());
        registry
    }

    /// Register a driver under its own kind, replacing any previous one
    pub fn register(&mut self, driver: Arc<dyn Driver>) {
        let kind = driver.kind();
        self.register_as(kind, driver);
    }

    /// Register a driver under an explicit kind
    pub fn register_as(&mut self, kind: ProtocolKind, driver: Arc<dyn Driver>) {
        if self.drivers.insert(kind, driver).is_some() {
            debug!("Replaced driver for {}", kind);
        }
    }

    pub fn get(&self, kind: ProtocolKind) -> Option<Arc<dyn Driver>> {
        self.drivers.get(&kind).cloned()
    }

    /// Driver for `kind`, or a configuration error
    pub fn require(&self, kind: ProtocolKind) -> CalloutResult<Arc<dyn Driver>> {
        self.get(kind).ok_or_else(|| {
            CalloutError::Configuration(format!("no driver registered for {}", kind))
        })
    }

    /// Registered kinds in specificity order
    pub fn kinds(&self) -> Vec<ProtocolKind> {
        let mut kinds: Vec<ProtocolKind> = self.drivers.keys().copied().collect();
        kinds.sort_by_key(|k| k.specificity_rank());
        kinds
    }

    pub fn options(&self) -> DriverOptions {
        self.options
    }

    /// Startup check: every protocol kind must have a driver
    pub fn ensure_complete(&self) -> CalloutResult<()> {
        let missing: Vec<&str> = ProtocolKind::all()
            .into_iter()
            .filter(|k| !self.drivers.contains_key(k))
            .map(|k| k.id())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(CalloutError::Configuration(format!(
                "no driver registered for: {}",
                missing.join(", ")
            )))
        }
    }
}
