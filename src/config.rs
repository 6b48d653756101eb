use crate::drivers::DriverOptions;
use crate::endpoint::{EndpointConfig, EndpointStore, ProtocolKind};
use crate::error::{CalloutError, CalloutResult};
use crate::voice::VoiceCatalogEntry;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Legacy relay tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Base URL; announcements go to `{url}/announce`. Unset disables the tier.
    pub url: Option<String>,
    /// Extra attempts after the first failure
    pub retries: usize,
    pub backoff_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            url: None,
            retries: 2,
            backoff_ms: 250,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Per driver call
    pub driver_ms: u64,
    /// Overall auto-detection deadline
    pub detection_ms: u64,
    /// How long a failed endpoint is skipped
    pub cooldown_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            driver_ms: 5000,
            detection_ms: 8000,
            cooldown_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalSynthConfig {
    /// espeak-ng compatible command. Empty disables local synthesis.
    pub command: String,
    /// Fixed catalog; empty means ask the synthesizer
    pub voices: Vec<VoiceCatalogEntry>,
}

impl Default for LocalSynthConfig {
    fn default() -> Self {
        Self {
            command: "espeak-ng".to_string(),
            voices: Vec::new(),
        }
    }
}

/// Main application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // Sinks
    pub endpoints: Vec<EndpointConfig>,
    pub relay: RelayConfig,
    pub timeouts: TimeoutConfig,

    // Speech
    pub default_language: String,
    pub local_synth: LocalSynthConfig,
    pub check_before_announce: bool,

    // Meta
    pub log_level: String,

    /// Last protocol detected per `address:port`
    pub recent_kinds: HashMap<String, ProtocolKind>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            relay: RelayConfig::default(),
            timeouts: TimeoutConfig::default(),
            default_language: "en".to_string(),
            local_synth: LocalSynthConfig::default(),
            check_before_announce: true,
            log_level: "INFO".to_string(),
            recent_kinds: HashMap::new(),
        }
    }
}

impl Config {
    /// Load config from the default location, or create default
    pub fn load() -> Result<Self> {
        Self::load_from(&config_path())
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(config_path)?;
        match serde_json::from_str(&content) {
            Ok(config) => Ok(config),
            Err(e) => {
                // Graceful degradation: log warning and use defaults
                tracing::warn!("⚠️ Config file corrupted or invalid, using defaults: {}", e);
                // Keep the corrupt file around for debugging
                let backup_path = config_path.with_extension("json.corrupt");
                if let Err(e) = std::fs::rename(config_path, &backup_path) {
                    tracing::warn!("⚠️ Could not back up corrupt config: {}", e);
                }
                Ok(Self::default())
            }
        }
    }

    /// Save config to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&config_path())
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    /// Reject settings that would make the chain misbehave at runtime
    pub fn validate(&self) -> CalloutResult<()> {
        let mut seen = HashSet::new();
        for endpoint in &self.endpoints {
            endpoint.validate()?;
            if !seen.insert(endpoint.id.as_str()) {
                return Err(CalloutError::Configuration(format!(
                    "duplicate endpoint id '{}'",
                    endpoint.id
                )));
            }
        }
        if let Some(url) = &self.relay.url {
            crate::relay::validate_url(url)?;
        }
        if self.timeouts.driver_ms == 0 || self.timeouts.detection_ms == 0 {
            return Err(CalloutError::Configuration(
                "timeouts must be greater than zero".to_string(),
            ));
        }
        if self.default_language.trim().is_empty() {
            return Err(CalloutError::Configuration(
                "default_language must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn driver_options(&self) -> DriverOptions {
        DriverOptions::with_timeout(Duration::from_millis(self.timeouts.driver_ms))
    }

    pub fn detection_deadline(&self) -> Duration {
        Duration::from_millis(self.timeouts.detection_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.timeouts.cooldown_secs)
    }

    pub fn relay_backoff(&self) -> Duration {
        Duration::from_millis(self.relay.backoff_ms)
    }

    /// Insert or replace an endpoint by id. The endpoint's kind becomes
    /// the detection hint for its address.
    pub fn upsert_endpoint(&mut self, endpoint: EndpointConfig) {
        self.remember_kind(&endpoint.address, endpoint.port, endpoint.kind);
        match self.endpoints.iter_mut().find(|e| e.id == endpoint.id) {
            Some(existing) => *existing = endpoint,
            None => self.endpoints.push(endpoint),
        }
    }

    pub fn remember_kind(&mut self, address: &str, port: u16, kind: ProtocolKind) {
        self.recent_kinds.insert(hint_key(address, port), kind);
    }
}

impl EndpointStore for Config {
    fn endpoint(&self, id: &str) -> Option<EndpointConfig> {
        self.endpoints.iter().find(|e| e.id == id).cloned()
    }

    fn endpoint_ids(&self) -> Vec<String> {
        self.endpoints.iter().map(|e| e.id.clone()).collect()
    }
}

pub(crate) fn hint_key(address: &str, port: u16) -> String {
    let address = address.trim().to_lowercase();
    let host = address
        .trim_start_matches("http://")
        .trim_start_matches("https://")
        .trim_end_matches('/');
    format!("{}:{}", host, port)
}

pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("callout")
}

pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}
