//! Vendor camera/speaker APIs: ISAPI, CGI and VAPIX style devices

use super::http::{announce_receipt, stop_result, test_report, HttpTransport};
use super::onvif::root_element;
use super::{Driver, DriverOptions, TestReport};
use crate::announcement::{AnnounceReceipt, AnnouncementRequest};
use crate::endpoint::{EndpointConfig, ProtocolKind};
use crate::error::CalloutResult;
use async_trait::async_trait;
use quick_xml::escape::escape;
use reqwest::Method;
use tracing::info;

fn channel(cfg: &EndpointConfig) -> &str {
    cfg.channel.as_deref().unwrap_or("1")
}

/// ISAPI devices (XML over HTTP, basic auth)
pub struct IsapiDriver {
    http: HttpTransport,
}

impl IsapiDriver {
    pub fn new(options: &DriverOptions) -> Self {
        Self {
            http: HttpTransport::new(options),
        }
    }

    fn speech_path(cfg: &EndpointConfig) -> String {
        format!("/ISAPI/System/Audio/channels/{}/speech", channel(cfg))
    }

    fn speech_body(req: &AnnouncementRequest) -> String {
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
             <TextToSpeech><text>{}</text><language>{}</language><volume>{}</volume></TextToSpeech>",
            escape(req.text.as_str()),
            escape(req.language.as_str()),
            req.volume
        )
    }
}

#[async_trait]
impl Driver for IsapiDriver {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::VendorIsapi
    }

    async fn test(&self, cfg: &EndpointConfig) -> CalloutResult<TestReport> {
        let response = self
            .http
            .send(self.http.request(Method::GET, cfg, "/ISAPI/System/status"))
            .await?;
        Ok(test_report(response, "ISAPI", |body| {
            match root_element(body).as_deref() {
                Some("DeviceStatus") | Some("DeviceInfo") => Some("ISAPI device status OK".to_string()),
                _ => None,
            }
        })
        .await)
    }

    async fn announce(
        &self,
        cfg: &EndpointConfig,
        req: &AnnouncementRequest,
    ) -> CalloutResult<AnnounceReceipt> {
        info!("📢 ISAPI announce on {} [{}]", cfg.id, req.context);
        let builder = self
            .http
            .request(Method::PUT, cfg, &Self::speech_path(cfg))
            .header("Content-Type", "application/xml")
            .body(Self::speech_body(req));
        let response = self.http.send(builder).await?;
        announce_receipt(response, "ISAPI").await
    }

    async fn stop(&self, cfg: &EndpointConfig) -> CalloutResult<()> {
        let path = format!("{}/stop", Self::speech_path(cfg));
        let response = self.http.send(self.http.request(Method::PUT, cfg, &path)).await?;
        stop_result(response, "ISAPI").await
    }
}

/// CGI devices (`/cgi-bin/*.cgi?action=...`)
pub struct CgiDriver {
    http: HttpTransport,
}

impl CgiDriver {
    pub fn new(options: &DriverOptions) -> Self {
        Self {
            http: HttpTransport::new(options),
        }
    }
}

#[async_trait]
impl Driver for CgiDriver {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::VendorCgi
    }

    async fn test(&self, cfg: &EndpointConfig) -> CalloutResult<TestReport> {
        let response = self
            .http
            .send(self.http.request(
                Method::GET,
                cfg,
                "/cgi-bin/magicBox.cgi?action=getDeviceType",
            ))
            .await?;
        Ok(test_report(response, "CGI", |body| {
            body.lines()
                .find_map(|line| line.trim().strip_prefix("type="))
                .map(|t| format!("CGI device type {}", t.trim()))
        })
        .await)
    }

    async fn announce(
        &self,
        cfg: &EndpointConfig,
        req: &AnnouncementRequest,
    ) -> CalloutResult<AnnounceReceipt> {
        info!("📢 CGI announce on {} [{}]", cfg.id, req.context);
        let path = format!(
            "/cgi-bin/audio.cgi?action=speak&channel={}&text={}&lang={}&volume={}",
            urlencoding::encode(channel(cfg)),
            urlencoding::encode(&req.text),
            urlencoding::encode(&req.language),
            req.volume
        );
        let response = self.http.send(self.http.request(Method::GET, cfg, &path)).await?;
        announce_receipt(response, "CGI").await
    }

    async fn stop(&self, cfg: &EndpointConfig) -> CalloutResult<()> {
        let path = format!(
            "/cgi-bin/audio.cgi?action=stop&channel={}",
            urlencoding::encode(channel(cfg))
        );
        let response = self.http.send(self.http.request(Method::GET, cfg, &path)).await?;
        stop_result(response, "CGI").await
    }
}

/// VAPIX devices (`/axis-cgi/...`)
pub struct VapixDriver {
    http: HttpTransport,
}

impl VapixDriver {
    pub fn new(options: &DriverOptions) -> Self {
        Self {
            http: HttpTransport::new(options),
        }
    }
}

#[async_trait]
impl Driver for VapixDriver {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::VendorVapix
    }

    async fn test(&self, cfg: &EndpointConfig) -> CalloutResult<TestReport> {
        let response = self
            .http
            .send(self.http.request(
                Method::GET,
                cfg,
                "/axis-cgi/param.cgi?action=list&group=root.Brand",
            ))
            .await?;
        Ok(test_report(response, "VAPIX", |body| {
            if !body.contains("root.Brand.") {
                return None;
            }
            let product = body
                .lines()
                .find_map(|line| line.trim().strip_prefix("root.Brand.ProdShortName="))
                .unwrap_or("unknown model");
            Some(format!("VAPIX device {}", product.trim()))
        })
        .await)
    }

    async fn announce(
        &self,
        cfg: &EndpointConfig,
        req: &AnnouncementRequest,
    ) -> CalloutResult<AnnounceReceipt> {
        info!("📢 VAPIX announce on {} [{}]", cfg.id, req.context);
        let path = format!(
            "/axis-cgi/mediaclip.cgi?action=play&text={}&language={}&volume={}",
            urlencoding::encode(&req.text),
            urlencoding::encode(&req.language),
            req.volume
        );
        let response = self.http.send(self.http.request(Method::GET, cfg, &path)).await?;
        announce_receipt(response, "VAPIX").await
    }

    async fn stop(&self, cfg: &EndpointConfig) -> CalloutResult<()> {
        let response = self
            .http
            .send(self.http.request(Method::GET, cfg, "/axis-cgi/mediaclip.cgi?action=stop"))
            .await?;
        stop_result(response, "VAPIX").await
    }
}
