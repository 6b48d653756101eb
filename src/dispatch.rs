//! Dispatch Coordinator
//!
//! Runs one announcement through the fallback chain
//! (device -> relay -> local) and settles it exactly once. Requests for the
//! same endpoint go through a per-endpoint lane: a newer request cancels
//! the one in flight and waits for it to settle before starting, so one
//! speaker never has two announcements delivering at once.

use crate::announcement::{AnnouncementOutcome, AnnouncementRequest, OutcomeError, Tier, TierFailure};
use crate::drivers::{bounded, Driver, DriverRegistry};
use crate::endpoint::EndpointConfig;
use crate::error::CalloutError;
use crate::health::{ConnectionStatus, HealthTracker};
use crate::relay::RelayClient;
use crate::tts::{LocalSynth, VoiceCatalog};
use crate::voice::VoiceResolver;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio_retry::strategy::FixedInterval;
use tokio_retry::RetryIf;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Where a request currently is in the chain
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "tier", rename_all = "snake_case")]
pub enum DispatchState {
    #[default]
    Idle,
    ProbingPrimary,
    DeliveringPrimary,
    DeliveringRelay,
    DeliveringLocal,
    Settled(Tier),
}

impl DispatchState {
    pub fn is_delivering(&self) -> bool {
        matches!(
            self,
            DispatchState::ProbingPrimary
                | DispatchState::DeliveringPrimary
                | DispatchState::DeliveringRelay
                | DispatchState::DeliveringLocal
        )
    }
}

/// Coordinator knobs, usually derived from [`crate::config::Config`]
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// Test a never-checked endpoint with `test` before announcing
    pub check_before_announce: bool,
    /// Extra relay attempts after the first failure
    pub relay_retries: usize,
    pub relay_backoff: Duration,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            check_before_announce: false,
            relay_retries: 2,
            relay_backoff: Duration::from_millis(250),
        }
    }
}

#[derive(Debug, Default)]
struct LaneSlot {
    generation: u64,
    inflight: Option<CancellationToken>,
    state: DispatchState,
    /// Device accepted an announcement that may still be sounding
    device_active: bool,
    /// Local synthesizer is speaking for this lane
    local_active: bool,
}

/// Per-endpoint sequencer
#[derive(Debug, Default)]
struct Lane {
    turn: tokio::sync::Mutex<()>,
    slot: Mutex<LaneSlot>,
}

impl Lane {
    fn slot(&self) -> std::sync::MutexGuard<'_, LaneSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim the lane for a new request, cancelling whatever holds it
    fn supersede(&self, token: CancellationToken) -> u64 {
        let mut slot = self.slot();
        if let Some(previous) = slot.inflight.replace(token) {
            previous.cancel();
        }
        slot.generation += 1;
        slot.generation
    }

    fn set_state(&self, state: DispatchState) {
        self.slot().state = state;
    }

    fn settle(&self, generation: u64, tier: Tier) {
        let mut slot = self.slot();
        if slot.generation == generation {
            slot.inflight = None;
            slot.state = DispatchState::Settled(tier);
        }
    }
}

/// What `stop` found to silence
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopReport {
    pub cancelled_request: bool,
    pub stopped_device: bool,
    pub stopped_local: bool,
}

pub struct Coordinator {
    registry: Arc<DriverRegistry>,
    health: Arc<HealthTracker>,
    relay: Option<RelayClient>,
    synth: Option<Arc<dyn LocalSynth>>,
    catalog: Option<Arc<dyn VoiceCatalog>>,
    resolver: VoiceResolver,
    settings: DispatchSettings,
    lanes: Mutex<HashMap<String, Arc<Lane>>>,
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("relay", &self.relay.as_ref().map(|r| r.url().to_string()))
            .field("synth", &self.synth.as_ref().map(|s| s.name().to_string()))
            .field("settings", &self.settings)
            .finish()
    }
}

impl Coordinator {
    pub fn new(registry: Arc<DriverRegistry>, health: Arc<HealthTracker>) -> Self {
        Self {
            registry,
            health,
            relay: None,
            synth: None,
            catalog: None,
            resolver: VoiceResolver::default(),
            settings: DispatchSettings::default(),
            lanes: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_relay(mut self, relay: RelayClient) -> Self {
        self.relay = Some(relay);
        self
    }

    pub fn with_local(mut self, synth: Arc<dyn LocalSynth>, catalog: Arc<dyn VoiceCatalog>) -> Self {
        self.synth = Some(synth);
        self.catalog = Some(catalog);
        self
    }

    pub fn with_resolver(mut self, resolver: VoiceResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_settings(mut self, settings: DispatchSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn health(&self) -> &Arc<HealthTracker> {
        &self.health
    }

    /// Current state of the endpoint's most recent request
    pub fn state(&self, endpoint_id: &str) -> DispatchState {
        self.lanes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(endpoint_id)
            .map(|lane| lane.slot().state)
            .unwrap_or_default()
    }

    fn lane(&self, endpoint_id: &str) -> Arc<Lane> {
        self.lanes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(endpoint_id.to_string())
            .or_default()
            .clone()
    }

    /// Deliver one announcement. `endpoint` is `None` when the id is not
    /// configured; the chain then starts at the relay tier.
    pub async fn dispatch(
        &self,
        endpoint_id: &str,
        endpoint: Option<EndpointConfig>,
        req: &AnnouncementRequest,
    ) -> AnnouncementOutcome {
        let lane = self.lane(endpoint_id);
        let token = CancellationToken::new();
        let generation = lane.supersede(token.clone());

        // Wait for the previous request on this lane to settle
        let _turn = lane.turn.lock().await;
        if token.is_cancelled() {
            debug!("⏭️ {} superseded before it started", endpoint_id);
            lane.settle(generation, Tier::Cancelled);
            return AnnouncementOutcome::new(endpoint_id, Tier::Cancelled);
        }

        self.silence_local(&lane);
        {
            let mut slot = lane.slot();
            slot.device_active = false;
            slot.state = DispatchState::Idle;
        }

        info!(
            "📢 Announcing on {} [{}] ({})",
            endpoint_id, req.language, req.context
        );

        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => {
                info!("🛑 Announcement on {} cancelled", endpoint_id);
                AnnouncementOutcome::new(endpoint_id, Tier::Cancelled)
            }
            outcome = self.run_chain(&lane, endpoint_id, endpoint, req) => outcome,
        };

        lane.settle(generation, outcome.tier);
        info!("🏁 {}", outcome.summary());
        outcome
    }

    async fn run_chain(
        &self,
        lane: &Lane,
        endpoint_id: &str,
        endpoint: Option<EndpointConfig>,
        req: &AnnouncementRequest,
    ) -> AnnouncementOutcome {
        let mut failures = Vec::new();

        if let Some((cfg, driver)) = self.primary(endpoint_id, endpoint, &mut failures) {
            match self.deliver_primary(lane, endpoint_id, &cfg, driver, req).await {
                Ok(mut outcome) => {
                    outcome.failures = failures;
                    return outcome;
                }
                Err(failure) => failures.push(failure),
            }
        }

        lane.set_state(DispatchState::DeliveringRelay);
        match self.deliver_relay(endpoint_id, req).await {
            Ok(mut outcome) => {
                outcome.failures = failures;
                return outcome;
            }
            Err(failure) => failures.push(failure),
        }

        lane.set_state(DispatchState::DeliveringLocal);
        let mut outcome = self.deliver_local(lane, endpoint_id, req).await;
        outcome.failures = failures;
        outcome
    }

    /// Resolve the primary target, or record why the device tier is skipped
    fn primary(
        &self,
        endpoint_id: &str,
        endpoint: Option<EndpointConfig>,
        failures: &mut Vec<TierFailure>,
    ) -> Option<(EndpointConfig, Arc<dyn Driver>)> {
        let Some(cfg) = endpoint else {
            warn!("⚠️ Endpoint '{}' is not configured", endpoint_id);
            failures.push(TierFailure::new(
                Tier::Device,
                &CalloutError::Configuration(format!("unknown endpoint '{}'", endpoint_id)),
            ));
            return None;
        };

        let driver = match cfg.validate().and_then(|_| self.registry.require(cfg.kind)) {
            Ok(driver) => driver,
            Err(e) => {
                warn!("⚠️ Endpoint '{}' cannot be used: {}", endpoint_id, e);
                self.health.mark_error(endpoint_id, &e.to_string());
                failures.push(TierFailure::new(Tier::Device, &e));
                return None;
            }
        };

        if !self.health.should_attempt(endpoint_id) {
            debug!("⏸️ {} is cooling down, skipping device tier", endpoint_id);
            failures.push(TierFailure::skipped(
                Tier::Device,
                "endpoint in error, cooling down",
            ));
            return None;
        }

        Some((cfg, driver))
    }

    async fn deliver_primary(
        &self,
        lane: &Lane,
        endpoint_id: &str,
        cfg: &EndpointConfig,
        driver: Arc<dyn Driver>,
        req: &AnnouncementRequest,
    ) -> Result<AnnouncementOutcome, TierFailure> {
        if self.settings.check_before_announce
            && self.health.status(endpoint_id) == ConnectionStatus::Disconnected
        {
            lane.set_state(DispatchState::ProbingPrimary);
            let status = self.health.refresh(endpoint_id, cfg).await;
            if status != ConnectionStatus::Connected {
                let detail = self
                    .health
                    .detail(endpoint_id)
                    .unwrap_or_else(|| status.to_string());
                return Err(TierFailure::skipped(
                    Tier::Device,
                    &format!("check failed: {}", detail),
                ));
            }
        }

        lane.set_state(DispatchState::DeliveringPrimary);
        let timeout = self.registry.options().timeout;
        match bounded(timeout, driver.announce(cfg, req)).await {
            Ok(receipt) => {
                self.health.mark_connected(endpoint_id);
                lane.slot().device_active = true;
                let mut outcome = AnnouncementOutcome::new(endpoint_id, Tier::Device);
                outcome.receipt = Some(receipt);
                Ok(outcome)
            }
            Err(e) => {
                warn!("⚠️ {} ({}) announce failed: {}", endpoint_id, cfg.kind, e);
                self.health.mark_error(endpoint_id, &e.to_string());
                Err(TierFailure::new(Tier::Device, &e))
            }
        }
    }

    async fn deliver_relay(
        &self,
        endpoint_id: &str,
        req: &AnnouncementRequest,
    ) -> Result<AnnouncementOutcome, TierFailure> {
        let Some(relay) = &self.relay else {
            return Err(TierFailure::skipped(Tier::Relay, "no relay configured"));
        };

        let strategy = FixedInterval::new(self.settings.relay_backoff).take(self.settings.relay_retries);
        let result = RetryIf::spawn(
            strategy,
            || relay.announce(endpoint_id, req),
            |e: &CalloutError| {
                debug!("🔁 Relay attempt failed: {}", e);
                e.is_recoverable()
            },
        )
        .await;

        match result {
            Ok(receipt) => {
                let mut outcome = AnnouncementOutcome::new(endpoint_id, Tier::Relay);
                outcome.receipt = Some(receipt);
                Ok(outcome)
            }
            Err(e) => {
                warn!("⚠️ Relay {} failed: {}", relay.url(), e);
                Err(TierFailure::new(Tier::Relay, &e))
            }
        }
    }

    async fn deliver_local(
        &self,
        lane: &Lane,
        endpoint_id: &str,
        req: &AnnouncementRequest,
    ) -> AnnouncementOutcome {
        let mut outcome = AnnouncementOutcome::new(endpoint_id, Tier::Failed);

        let Some(synth) = &self.synth else {
            outcome.error = Some(OutcomeError::AllTiersExhausted(
                "no local synthesizer available".to_string(),
            ));
            return outcome;
        };

        let voices = match &self.catalog {
            Some(catalog) => catalog.list_voices().await,
            None => Vec::new(),
        };
        let choice = match self.resolver.resolve(&req.language, &voices) {
            Ok(choice) => choice,
            Err(CalloutError::NoVoiceAvailable) => {
                warn!("⚠️ No voice available for {}", req.language);
                outcome.error = Some(OutcomeError::NoVoiceAvailable);
                return outcome;
            }
            Err(e) => {
                outcome.error = Some(OutcomeError::AllTiersExhausted(e.to_string()));
                return outcome;
            }
        };

        match synth.speak(&req.text, &choice.voice_id, req.volume).await {
            Ok(handle) => {
                let generation = {
                    let mut slot = lane.slot();
                    slot.local_active = true;
                    slot.generation
                };
                let id = endpoint_id.to_string();
                let lane_ref = self.lane(endpoint_id);
                tokio::spawn(async move {
                    if let Err(e) = handle.wait().await {
                        warn!("⚠️ Local playback for {} ended with: {}", id, e);
                    }
                    let mut slot = lane_ref.slot();
                    if slot.generation == generation {
                        slot.local_active = false;
                    }
                });

                outcome.tier = Tier::Local;
                outcome.voice_id = Some(choice.voice_id);
                outcome.using_fallback_language = choice.using_fallback_language;
                outcome
            }
            Err(e) => {
                warn!("❌ Local synthesis failed: {}", e);
                outcome.error = Some(OutcomeError::AllTiersExhausted(format!(
                    "local synthesis failed: {}",
                    e
                )));
                outcome
            }
        }
    }

    /// The synthesizer is shared by every endpoint, so cancelling it also
    /// silences local speech started for other endpoints. Their lanes are
    /// marked idle to match.
    fn silence_local(&self, lane: &Lane) -> bool {
        let was_active = std::mem::take(&mut lane.slot().local_active);
        if was_active {
            if let Some(synth) = &self.synth {
                synth.cancel_all();
            }
            let lanes = self.lanes.lock().unwrap_or_else(PoisonError::into_inner);
            for other in lanes.values() {
                other.slot().local_active = false;
            }
        }
        was_active
    }

    /// Cancel whatever this endpoint is doing. Safe in any state; a second
    /// call finds nothing left to stop.
    pub fn stop(&self, endpoint_id: &str, endpoint: Option<&EndpointConfig>) -> StopReport {
        let Some(lane) = self
            .lanes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(endpoint_id)
            .cloned()
        else {
            return StopReport::default();
        };

        let (cancelled_request, device) = {
            let mut slot = lane.slot();
            let on_device = slot.device_active
                || matches!(
                    slot.state,
                    DispatchState::ProbingPrimary | DispatchState::DeliveringPrimary
                );
            slot.device_active = false;
            let token = slot.inflight.take();
            if let Some(token) = &token {
                token.cancel();
                slot.state = DispatchState::Settled(Tier::Cancelled);
            }
            (token.is_some(), on_device)
        };

        let stopped_local = self.silence_local(&lane);

        let mut stopped_device = false;
        if device {
            if let Some(cfg) = endpoint.cloned() {
                if let Ok(driver) = self.registry.require(cfg.kind) {
                    stopped_device = true;
                    let timeout = self.registry.options().timeout;
                    let id = endpoint_id.to_string();
                    tokio::spawn(async move {
                        if let Err(e) = bounded(timeout, driver.stop(&cfg)).await {
                            debug!("Device stop for {} failed: {}", id, e);
                        }
                    });
                }
            }
        }

        if cancelled_request || stopped_device || stopped_local {
            info!("🛑 Stopped {}", endpoint_id);
        }
        StopReport {
            cancelled_request,
            stopped_device,
            stopped_local,
        }
    }
}
