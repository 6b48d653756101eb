//! REST-family drivers: generic REST, bearer REST, webhook and custom
//! routes

use super::http::{announce_receipt, parse_route, stop_result, test_report, HttpTransport};
use super::{Driver, DriverOptions, TestReport};
use crate::announcement::{AnnounceReceipt, AnnouncementRequest};
use crate::endpoint::{Credentials, EndpointConfig, ProtocolKind};
use crate::error::{CalloutError, CalloutResult};
use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::Serialize;
use tracing::{debug, info};

const STATUS_PATH: &str = "/api/status";
const ANNOUNCE_PATH: &str = "/api/announce";
const STOP_PATH: &str = "/api/stop";

/// Request body of the generic REST driver. Flat; other components
/// depend on this exact shape.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestAnnouncement<'a> {
    pub endpoint_credentials: Option<&'a Credentials>,
    pub text: &'a str,
    pub language: &'a str,
    pub volume_percent: u8,
}

impl<'a> RestAnnouncement<'a> {
    pub fn new(cfg: &'a EndpointConfig, req: &'a AnnouncementRequest) -> Self {
        Self {
            endpoint_credentials: cfg.credentials.as_ref(),
            text: &req.text,
            language: &req.language,
            volume_percent: req.volume,
        }
    }
}

/// Plain REST device: status, announce and stop routes under `/api`
pub struct GenericRestDriver {
    http: HttpTransport,
}

impl GenericRestDriver {
    pub fn new(options: &DriverOptions) -> Self {
        Self {
            http: HttpTransport::new(options),
        }
    }
}

#[async_trait]
impl Driver for GenericRestDriver {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::GenericRest
    }

    async fn test(&self, cfg: &EndpointConfig) -> CalloutResult<TestReport> {
        let response = self
            .http
            .send(self.http.request(Method::GET, cfg, STATUS_PATH))
            .await?;
        Ok(test_report(response, "REST", |_| Some("REST status endpoint answered".to_string())).await)
    }

    async fn announce(
        &self,
        cfg: &EndpointConfig,
        req: &AnnouncementRequest,
    ) -> CalloutResult<AnnounceReceipt> {
        info!("📢 REST announce on {} [{}]", cfg.id, req.context);
        let builder = self
            .http
            .request(Method::POST, cfg, ANNOUNCE_PATH)
            .json(&RestAnnouncement::new(cfg, req));
        let response = self.http.send(builder).await?;
        announce_receipt(response, "REST").await
    }

    async fn stop(&self, cfg: &EndpointConfig) -> CalloutResult<()> {
        let response = self
            .http
            .send(self.http.request(Method::POST, cfg, STOP_PATH))
            .await?;
        stop_result(response, "REST").await
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BearerAnnouncement<'a> {
    text: &'a str,
    language: &'a str,
    volume_percent: u8,
}

/// REST device authenticated with a bearer token
pub struct BearerRestDriver {
    http: HttpTransport,
}

impl BearerRestDriver {
    pub fn new(options: &DriverOptions) -> Self {
        Self {
            http: HttpTransport::new(options),
        }
    }

    fn authorized(
        &self,
        method: Method,
        cfg: &EndpointConfig,
        path: &str,
    ) -> reqwest::RequestBuilder {
        let builder = self.http.request(method, cfg, path);
        match cfg.credentials.as_ref().and_then(|c| c.token.as_deref()) {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

#[async_trait]
impl Driver for BearerRestDriver {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::RestfulBearer
    }

    async fn test(&self, cfg: &EndpointConfig) -> CalloutResult<TestReport> {
        if cfg.credentials.as_ref().and_then(|c| c.token.as_ref()).is_none() {
            return Ok(TestReport::failed("no bearer token configured"));
        }
        let response = self
            .http
            .send(self.authorized(Method::GET, cfg, STATUS_PATH))
            .await?;
        Ok(test_report(response, "bearer REST", |_| {
            Some("bearer token accepted".to_string())
        })
        .await)
    }

    async fn announce(
        &self,
        cfg: &EndpointConfig,
        req: &AnnouncementRequest,
    ) -> CalloutResult<AnnounceReceipt> {
        info!("📢 Bearer REST announce on {} [{}]", cfg.id, req.context);
        let body = BearerAnnouncement {
            text: &req.text,
            language: &req.language,
            volume_percent: req.volume,
        };
        let builder = self.authorized(Method::POST, cfg, ANNOUNCE_PATH).json(&body);
        let response = self.http.send(builder).await?;
        announce_receipt(response, "bearer REST").await
    }

    async fn stop(&self, cfg: &EndpointConfig) -> CalloutResult<()> {
        let response = self
            .http
            .send(self.authorized(Method::POST, cfg, STOP_PATH))
            .await?;
        stop_result(response, "bearer REST").await
    }
}

#[derive(Debug, Serialize)]
struct WebhookEvent<'a> {
    event: &'static str,
    text: &'a str,
    language: &'a str,
    volume: u8,
    context: &'a str,
    timestamp: String,
}

/// Fire-and-forget webhook receiver
pub struct WebhookDriver {
    http: HttpTransport,
}

impl WebhookDriver {
    pub fn new(options: &DriverOptions) -> Self {
        Self {
            http: HttpTransport::new(options),
        }
    }

    fn path(cfg: &EndpointConfig) -> String {
        match cfg.channel.as_deref() {
            Some(p) if p.starts_with('/') => p.to_string(),
            Some(p) => format!("/{}", p),
            None => "/".to_string(),
        }
    }
}

#[async_trait]
impl Driver for WebhookDriver {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Webhook
    }

    async fn test(&self, cfg: &EndpointConfig) -> CalloutResult<TestReport> {
        let response = self
            .http
            .send(self.http.request(Method::GET, cfg, &Self::path(cfg)))
            .await?;
        // Receivers that only take POST answer 405, which still proves
        // the route exists
        if response.status() == StatusCode::METHOD_NOT_ALLOWED {
            return Ok(TestReport::ok("webhook route exists (POST only)"));
        }
        Ok(test_report(response, "webhook", |_| Some("webhook reachable".to_string())).await)
    }

    async fn announce(
        &self,
        cfg: &EndpointConfig,
        req: &AnnouncementRequest,
    ) -> CalloutResult<AnnounceReceipt> {
        info!("📢 Webhook announce on {} [{}]", cfg.id, req.context);
        let event = WebhookEvent {
            event: "announcement",
            text: &req.text,
            language: &req.language,
            volume: req.volume,
            context: &req.context,
            timestamp: chrono::Utc::now().to_rfc3339(),
        };
        let builder = self
            .http
            .request(Method::POST, cfg, &Self::path(cfg))
            .json(&event);
        let response = self.http.send(builder).await?;
        announce_receipt(response, "webhook").await
    }

    async fn stop(&self, cfg: &EndpointConfig) -> CalloutResult<()> {
        debug!("Webhook {} has no stop operation", cfg.id);
        Ok(())
    }
}

/// Device described entirely by `custom_routes`. Routes are
/// `"METHOD /path"` or a bare path; `{text}`, `{language}` and `{volume}`
/// placeholders are substituted URL-encoded.
pub struct CustomDriver {
    http: HttpTransport,
}

impl CustomDriver {
    pub fn new(options: &DriverOptions) -> Self {
        Self {
            http: HttpTransport::new(options),
        }
    }

    fn expand(path: &str, req: Option<&AnnouncementRequest>) -> String {
        match req {
            Some(req) => path
                .replace("{text}", &urlencoding::encode(&req.text))
                .replace("{language}", &urlencoding::encode(&req.language))
                .replace("{volume}", &req.volume.to_string()),
            None => path.to_string(),
        }
    }
}

#[async_trait]
impl Driver for CustomDriver {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Custom
    }

    async fn test(&self, cfg: &EndpointConfig) -> CalloutResult<TestReport> {
        let route = cfg.custom_routes.get("test").map(String::as_str).unwrap_or("/");
        let (method, path) = parse_route(route, Method::GET);
        let response = self.http.send(self.http.request(method, cfg, &path)).await?;
        Ok(test_report(response, "custom", |_| Some(format!("custom route {} answered", path))).await)
    }

    async fn announce(
        &self,
        cfg: &EndpointConfig,
        req: &AnnouncementRequest,
    ) -> CalloutResult<AnnounceReceipt> {
        let route = cfg.custom_routes.get("announce").ok_or_else(|| {
            CalloutError::Configuration(format!("custom endpoint '{}' has no announce route", cfg.id))
        })?;
        let (method, path) = parse_route(route, Method::POST);
        let path = Self::expand(&path, Some(req));
        info!("📢 Custom announce on {} via {} {}", cfg.id, method, path);

        let mut builder = self.http.request(method.clone(), cfg, &path);
        if method != Method::GET {
            builder = builder.json(&RestAnnouncement::new(cfg, req));
        }
        let response = self.http.send(builder).await?;
        announce_receipt(response, "custom").await
    }

    async fn stop(&self, cfg: &EndpointConfig) -> CalloutResult<()> {
        let Some(route) = cfg.custom_routes.get("stop") else {
            return Ok(());
        };
        let (method, path) = parse_route(route, Method::POST);
        let response = self.http.send(self.http.request(method, cfg, &path)).await?;
        stop_result(response, "custom").await
    }
}
