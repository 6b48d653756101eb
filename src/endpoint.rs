//! Endpoint descriptions
//!
//! An endpoint is a configured audio sink (IP speaker, camera with audio
//! out, stream relay, ...) identified by a stable ID.

use crate::error::{CalloutError, CalloutResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Device protocol families with a driver implementation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProtocolKind {
    VendorIsapi,
    VendorCgi,
    VendorVapix,
    Onvif,
    Rtsp,
    GenericRest,
    RestfulBearer,
    Webhook,
    StreamHttp,
    StreamUdp,
    StreamRtsp,
    Custom,
}

impl std::str::FromStr for ProtocolKind {
    type Err = CalloutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "vendor-isapi" | "isapi" | "hikvision" => Ok(ProtocolKind::VendorIsapi),
            "vendor-cgi" | "cgi" | "dahua" => Ok(ProtocolKind::VendorCgi),
            "vendor-vapix" | "vapix" | "axis" => Ok(ProtocolKind::VendorVapix),
            "onvif" => Ok(ProtocolKind::Onvif),
            "rtsp" => Ok(ProtocolKind::Rtsp),
            "generic-rest" | "rest" | "generic" => Ok(ProtocolKind::GenericRest),
            "restful-bearer" | "bearer" => Ok(ProtocolKind::RestfulBearer),
            "webhook" => Ok(ProtocolKind::Webhook),
            "stream-http" => Ok(ProtocolKind::StreamHttp),
            "stream-udp" => Ok(ProtocolKind::StreamUdp),
            "stream-rtsp" => Ok(ProtocolKind::StreamRtsp),
            "custom" => Ok(ProtocolKind::Custom),
            other => Err(CalloutError::Configuration(format!(
                "unknown protocol kind '{}'",
                other
            ))),
        }
    }
}

impl std::fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

impl ProtocolKind {
    /// Get the config identifier
    pub fn id(&self) -> &'static str {
        match self {
            ProtocolKind::VendorIsapi => "vendor-isapi",
            ProtocolKind::VendorCgi => "vendor-cgi",
            ProtocolKind::VendorVapix => "vendor-vapix",
            ProtocolKind::Onvif => "onvif",
            ProtocolKind::Rtsp => "rtsp",
            ProtocolKind::GenericRest => "generic-rest",
            ProtocolKind::RestfulBearer => "restful-bearer",
            ProtocolKind::Webhook => "webhook",
            ProtocolKind::StreamHttp => "stream-http",
            ProtocolKind::StreamUdp => "stream-udp",
            ProtocolKind::StreamRtsp => "stream-rtsp",
            ProtocolKind::Custom => "custom",
        }
    }

    /// Get display name
    pub fn display_name(&self) -> &'static str {
        match self {
            ProtocolKind::VendorIsapi => "ISAPI (Hikvision-style)",
            ProtocolKind::VendorCgi => "CGI (Dahua-style)",
            ProtocolKind::VendorVapix => "VAPIX (Axis-style)",
            ProtocolKind::Onvif => "ONVIF",
            ProtocolKind::Rtsp => "RTSP",
            ProtocolKind::GenericRest => "Generic REST",
            ProtocolKind::RestfulBearer => "REST (Bearer token)",
            ProtocolKind::Webhook => "Webhook",
            ProtocolKind::StreamHttp => "HTTP stream relay",
            ProtocolKind::StreamUdp => "UDP stream relay",
            ProtocolKind::StreamRtsp => "RTSP stream relay",
            ProtocolKind::Custom => "Custom routes",
        }
    }

    /// Get all protocol kinds
    pub fn all() -> Vec<ProtocolKind> {
        vec![
            ProtocolKind::VendorIsapi,
            ProtocolKind::VendorCgi,
            ProtocolKind::VendorVapix,
            ProtocolKind::Onvif,
            ProtocolKind::Rtsp,
            ProtocolKind::GenericRest,
            ProtocolKind::RestfulBearer,
            ProtocolKind::Webhook,
            ProtocolKind::StreamHttp,
            ProtocolKind::StreamUdp,
            ProtocolKind::StreamRtsp,
            ProtocolKind::Custom,
        ]
    }

    /// Detection preference. Lower is more specific; a protocol with a
    /// vendor handshake confirms more than an endpoint answering any GET.
    pub fn specificity_rank(&self) -> u8 {
        match self {
            ProtocolKind::VendorIsapi => 0,
            ProtocolKind::VendorCgi => 1,
            ProtocolKind::VendorVapix => 2,
            ProtocolKind::Onvif => 3,
            ProtocolKind::Rtsp => 4,
            ProtocolKind::StreamRtsp => 5,
            ProtocolKind::RestfulBearer => 6,
            ProtocolKind::StreamHttp => 7,
            ProtocolKind::Webhook => 8,
            ProtocolKind::GenericRest => 9,
            ProtocolKind::StreamUdp => 10,
            ProtocolKind::Custom => 11,
        }
    }

    /// Drivers that hand back a session instead of playing synchronously
    pub fn is_streaming(&self) -> bool {
        matches!(
            self,
            ProtocolKind::StreamHttp | ProtocolKind::StreamUdp | ProtocolKind::StreamRtsp
        )
    }
}

/// Credentials for an endpoint. Either basic credentials, a bearer token,
/// or both.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl Credentials {
    pub fn basic(username: &str, password: &str) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
            token: None,
        }
    }

    pub fn bearer(token: &str) -> Self {
        Self {
            token: Some(token.to_string()),
            ..Default::default()
        }
    }

    pub fn has_basic(&self) -> bool {
        !self.username.is_empty()
    }
}

/// Immutable description of an audio sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub id: String,
    pub address: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credentials>,
    pub kind: ProtocolKind,
    /// Route overrides for the custom driver (`test`, `announce`, `stop`)
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub custom_routes: HashMap<String, String>,
    /// Audio channel / stream path, driver specific
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
}

impl EndpointConfig {
    pub fn new(id: &str, address: &str, port: u16, kind: ProtocolKind) -> Self {
        Self {
            id: id.to_string(),
            address: address.to_string(),
            port,
            credentials: None,
            kind,
            custom_routes: HashMap::new(),
            channel: None,
        }
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_route(mut self, name: &str, route: &str) -> Self {
        self.custom_routes
            .insert(name.to_string(), route.to_string());
        self
    }

    pub fn with_channel(mut self, channel: &str) -> Self {
        self.channel = Some(channel.to_string());
        self
    }

    /// Base URL for HTTP based drivers. An address that already carries a
    /// scheme is used as-is.
    pub fn base_url(&self) -> String {
        let address = self.address.trim_end_matches('/');
        if address.starts_with("http://") || address.starts_with("https://") {
            format!("{}:{}", address, self.port)
        } else {
            format!("http://{}:{}", address, self.port)
        }
    }

    /// Host portion of the address without any scheme
    pub fn host(&self) -> &str {
        self.address
            .trim_start_matches("http://")
            .trim_start_matches("https://")
            .trim_end_matches('/')
    }

    /// Reject configurations that can never be announced to
    pub fn validate(&self) -> CalloutResult<()> {
        if self.id.trim().is_empty() {
            return Err(CalloutError::Configuration(
                "endpoint id must not be empty".to_string(),
            ));
        }
        if self.host().trim().is_empty() {
            return Err(CalloutError::Configuration(format!(
                "endpoint '{}' has no address",
                self.id
            )));
        }
        if self.port == 0 {
            return Err(CalloutError::Configuration(format!(
                "endpoint '{}' has port 0",
                self.id
            )));
        }
        if self.kind == ProtocolKind::Custom && !self.custom_routes.contains_key("announce") {
            return Err(CalloutError::Configuration(format!(
                "custom endpoint '{}' needs an 'announce' route",
                self.id
            )));
        }
        if self.kind == ProtocolKind::RestfulBearer
            && self
                .credentials
                .as_ref()
                .and_then(|c| c.token.as_ref())
                .is_none()
        {
            return Err(CalloutError::Configuration(format!(
                "bearer endpoint '{}' needs a token",
                self.id
            )));
        }
        Ok(())
    }
}

/// Read-only lookup of configured endpoints
pub trait EndpointStore: Send + Sync {
    fn endpoint(&self, id: &str) -> Option<EndpointConfig>;

    /// Every configured endpoint id
    fn endpoint_ids(&self) -> Vec<String> {
        Vec::new()
    }
}

impl EndpointStore for HashMap<String, EndpointConfig> {
    fn endpoint(&self, id: &str) -> Option<EndpointConfig> {
        self.get(id).cloned()
    }

    fn endpoint_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.keys().cloned().collect();
        ids.sort();
        ids
    }
}
