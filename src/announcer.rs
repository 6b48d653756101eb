//! Announcer
//!
//! The entry point the host application talks to. Wires the driver
//! registry, health tracker, detector and coordinator together and layers
//! runtime reconfiguration over the read-only endpoint store.

use crate::announcement::{AnnouncementOutcome, AnnouncementRequest};
use crate::audit;
use crate::config::{self, Config};
use crate::detect::{DetectionResult, Detector, DEFAULT_DEADLINE};
use crate::dispatch::{Coordinator, DispatchSettings, DispatchState, StopReport};
use crate::drivers::{bounded, DriverOptions, DriverRegistry};
use crate::endpoint::{Credentials, EndpointConfig, EndpointStore, ProtocolKind};
use crate::error::{CalloutError, CalloutResult};
use crate::health::{ConnectionStatus, HealthEntry, HealthTracker, DEFAULT_COOLDOWN};
use crate::relay::RelayClient;
use crate::tts::{self, LocalSynth, VoiceCatalog};
use crate::voice::VoiceResolver;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::{info, warn};

pub struct Announcer {
    store: Arc<dyn EndpointStore>,
    overrides: RwLock<HashMap<String, EndpointConfig>>,
    recent: RwLock<HashMap<String, ProtocolKind>>,
    registry: Arc<DriverRegistry>,
    health: Arc<HealthTracker>,
    detector: Detector,
    coordinator: Coordinator,
    audit_dir: Option<PathBuf>,
}

impl std::fmt::Debug for Announcer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Announcer")
            .field("registry", &self.registry)
            .field("coordinator", &self.coordinator)
            .finish()
    }
}

impl Announcer {
    pub fn builder(store: Arc<dyn EndpointStore>) -> AnnouncerBuilder {
        AnnouncerBuilder::new(store)
    }

    /// Build the full stack from a validated configuration
    pub fn from_config(config: &Config) -> CalloutResult<Self> {
        config.validate()?;

        let registry = DriverRegistry::with_defaults(config.driver_options());
        registry.ensure_complete()?;

        let mut builder = Self::builder(Arc::new(config.clone()))
            .registry(registry)
            .cooldown(config.cooldown())
            .detection_deadline(config.detection_deadline())
            .default_language(&config.default_language)
            .settings(DispatchSettings {
                check_before_announce: config.check_before_announce,
                relay_retries: config.relay.retries,
                relay_backoff: config.relay_backoff(),
            })
            .recent_kinds(config.recent_kinds.clone())
            .audit_dir(config::config_dir());

        if let Some(url) = &config.relay.url {
            builder = builder.relay(RelayClient::new(url, config.driver_options().timeout));
        }
        if let Some((synth, catalog)) = tts::create_local(config) {
            builder = builder.local(synth, catalog);
        }
        Ok(builder.build())
    }

    /// Endpoint by id, runtime overrides first
    pub fn endpoint(&self, endpoint_id: &str) -> Option<EndpointConfig> {
        let overridden = self
            .overrides
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(endpoint_id)
            .cloned();
        overridden.or_else(|| self.store.endpoint(endpoint_id))
    }

    pub fn endpoint_ids(&self) -> Vec<String> {
        let mut ids = self.store.endpoint_ids();
        ids.extend(
            self.overrides
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .keys()
                .cloned(),
        );
        ids.sort();
        ids.dedup();
        ids
    }

    /// Deliver an announcement through the fallback chain. Always returns
    /// exactly one outcome.
    pub async fn dispatch_announcement(
        &self,
        endpoint_id: &str,
        req: &AnnouncementRequest,
    ) -> AnnouncementOutcome {
        let endpoint = self.endpoint(endpoint_id);
        let outcome = self.coordinator.dispatch(endpoint_id, endpoint, req).await;
        if let Some(dir) = &self.audit_dir {
            if let Err(e) = audit::log_outcome(dir, &outcome) {
                warn!("⚠️ Failed to write audit log: {}", e);
            }
        }
        outcome
    }

    /// Test an address with every driver and report which protocol it
    /// speaks
    pub async fn run_detection(
        &self,
        address: &str,
        port: u16,
        credentials: Option<Credentials>,
    ) -> DetectionResult {
        let key = config::hint_key(address, port);
        let hint = self
            .recent
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .copied();

        let result = self.detector.detect(address, port, credentials, hint).await;

        if let Some(kind) = result.kind {
            self.recent
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(key, kind);
        }
        if let Some(dir) = &self.audit_dir {
            if let Err(e) = audit::log_detection(dir, address, port, &result) {
                warn!("⚠️ Failed to write audit log: {}", e);
            }
        }
        result
    }

    pub fn get_status(&self, endpoint_id: &str) -> ConnectionStatus {
        self.health.status(endpoint_id)
    }

    /// Health of one endpoint, or of every known endpoint including those
    /// never checked
    pub fn status_entries(&self, endpoint_id: Option<&str>) -> Vec<HealthEntry> {
        let ids = match endpoint_id {
            Some(id) => vec![id.to_string()],
            None => self.endpoint_ids(),
        };
        let mut entries = self.health.snapshot();
        for id in ids {
            if !entries.iter().any(|e| e.endpoint_id == id) {
                entries.push(HealthEntry {
                    status: self.get_status(&id),
                    endpoint_id: id,
                    detail: String::new(),
                    checked_ago_ms: None,
                });
            }
        }
        if let Some(id) = endpoint_id {
            entries.retain(|e| e.endpoint_id == id);
        }
        entries.sort_by(|a, b| a.endpoint_id.cmp(&b.endpoint_id));
        entries
    }

    pub fn dispatch_state(&self, endpoint_id: &str) -> DispatchState {
        self.coordinator.state(endpoint_id)
    }

    /// Cancel the endpoint's announcement. Idempotent.
    pub fn stop(&self, endpoint_id: &str) -> StopReport {
        let endpoint = self.endpoint(endpoint_id);
        self.coordinator.stop(endpoint_id, endpoint.as_ref())
    }

    /// Send the device's stop command directly, whatever this process
    /// knows about the endpoint
    pub async fn stop_device(&self, endpoint_id: &str) -> CalloutResult<()> {
        let endpoint = self.endpoint(endpoint_id).ok_or_else(|| {
            CalloutError::Configuration(format!("unknown endpoint '{}'", endpoint_id))
        })?;
        let driver = self.registry.require(endpoint.kind)?;
        bounded(self.registry.options().timeout, driver.stop(&endpoint)).await
    }

    /// Re-check a configured endpoint
    pub async fn refresh(&self, endpoint_id: &str) -> CalloutResult<ConnectionStatus> {
        let endpoint = self.endpoint(endpoint_id).ok_or_else(|| {
            CalloutError::Configuration(format!("unknown endpoint '{}'", endpoint_id))
        })?;
        Ok(self.health.refresh(endpoint_id, &endpoint).await)
    }

    /// Replace an endpoint's configuration at runtime. Invalid
    /// configurations are rejected here, before they can be dispatched to.
    pub fn reconfigure(&self, endpoint: EndpointConfig) -> CalloutResult<()> {
        endpoint.validate()?;
        self.registry.require(endpoint.kind)?;

        info!("🔧 Reconfigured {} as {}", endpoint.id, endpoint.kind.display_name());
        self.health.reset(&endpoint.id);
        self.recent
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(config::hint_key(&endpoint.address, endpoint.port), endpoint.kind);
        self.overrides
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(endpoint.id.clone(), endpoint);
        Ok(())
    }

    /// Recent detection hints, for persisting back into the config
    pub fn recent_kinds(&self) -> HashMap<String, ProtocolKind> {
        self.recent
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

pub struct AnnouncerBuilder {
    store: Arc<dyn EndpointStore>,
    registry: Option<DriverRegistry>,
    relay: Option<RelayClient>,
    local: Option<(Arc<dyn LocalSynth>, Arc<dyn VoiceCatalog>)>,
    settings: DispatchSettings,
    cooldown: Duration,
    deadline: Duration,
    default_language: String,
    recent: HashMap<String, ProtocolKind>,
    audit_dir: Option<PathBuf>,
}

impl AnnouncerBuilder {
    pub fn new(store: Arc<dyn EndpointStore>) -> Self {
        Self {
            store,
            registry: None,
            relay: None,
            local: None,
            settings: DispatchSettings::default(),
            cooldown: DEFAULT_COOLDOWN,
            deadline: DEFAULT_DEADLINE,
            default_language: "en".to_string(),
            recent: HashMap::new(),
            audit_dir: None,
        }
    }

    pub fn registry(mut self, registry: DriverRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn relay(mut self, relay: RelayClient) -> Self {
        self.relay = Some(relay);
        self
    }

    pub fn local(mut self, synth: Arc<dyn LocalSynth>, catalog: Arc<dyn VoiceCatalog>) -> Self {
        self.local = Some((synth, catalog));
        self
    }

    pub fn settings(mut self, settings: DispatchSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn detection_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn default_language(mut self, language: &str) -> Self {
        self.default_language = language.to_string();
        self
    }

    pub fn recent_kinds(mut self, recent: HashMap<String, ProtocolKind>) -> Self {
        self.recent = recent;
        self
    }

    pub fn audit_dir(mut self, dir: PathBuf) -> Self {
        self.audit_dir = Some(dir);
        self
    }

    pub fn build(self) -> Announcer {
        let registry = Arc::new(
            self.registry
                .unwrap_or_else(|| DriverRegistry::with_defaults(DriverOptions::default())),
        );
        let health = Arc::new(HealthTracker::new(registry.clone(), self.cooldown));
        let detector = Detector::new(registry.clone(), self.deadline);

        let mut coordinator = Coordinator::new(registry.clone(), health.clone())
            .with_settings(self.settings)
            .with_resolver(VoiceResolver::new(&self.default_language));
        if let Some(relay) = self.relay {
            coordinator = coordinator.with_relay(relay);
        }
        if let Some((synth, catalog)) = self.local {
            coordinator = coordinator.with_local(synth, catalog);
        }

        // Configured endpoints are the latest word on what an address speaks
        let mut recent = self.recent;
        for id in self.store.endpoint_ids() {
            if let Some(endpoint) = self.store.endpoint(&id) {
                recent.insert(config::hint_key(&endpoint.address, endpoint.port), endpoint.kind);
            }
        }

        Announcer {
            store: self.store,
            overrides: RwLock::new(HashMap::new()),
            recent: RwLock::new(recent),
            registry,
            health,
            detector,
            coordinator,
            audit_dir: self.audit_dir,
        }
    }
}
