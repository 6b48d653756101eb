//! ONVIF driver (SOAP over HTTP)

use super::http::{body_snippet, HttpTransport};
use super::{Driver, DriverOptions, TestReport};
use crate::announcement::{AnnounceReceipt, AnnouncementRequest};
use crate::endpoint::{EndpointConfig, ProtocolKind};
use crate::error::{CalloutError, CalloutResult};
use async_trait::async_trait;
use quick_xml::escape::escape;
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use reqwest::{Method, StatusCode};
use tracing::{debug, info};

const DEVICE_SERVICE: &str = "/onvif/device_service";
const AUDIO_SERVICE: &str = "/onvif/audio_service";
const SOAP_CONTENT_TYPE: &str = "application/soap+xml; charset=utf-8";

/// Local name of the document's root element
pub fn root_element(xml: &str) -> Option<String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => {
                return Some(String::from_utf8_lossy(e.local_name().as_ref()).to_string());
            }
            Ok(Event::Eof) | Err(_) => return None,
            _ => (),
        }
    }
}

/// Text of the first element with the given local name (namespace
/// prefixes ignored)
pub fn element_text(xml: &str, local_name: &str) -> Option<String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut inside = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                inside = e.local_name().as_ref() == local_name.as_bytes();
            }
            Ok(Event::Text(ref e)) if inside => {
                return e.unescape().ok().map(|t| t.to_string());
            }
            Ok(Event::End(_)) => inside = false,
            Ok(Event::Eof) | Err(_) => return None,
            _ => (),
        }
    }
}

/// Texts of every element with the given local name, in document order
pub fn element_texts(xml: &str, local_name: &str) -> Vec<String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut inside = false;
    let mut texts = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                inside = e.local_name().as_ref() == local_name.as_bytes();
            }
            Ok(Event::Text(ref e)) if inside => {
                if let Ok(text) = e.unescape() {
                    texts.push(text.to_string());
                }
            }
            Ok(Event::End(_)) => inside = false,
            Ok(Event::Eof) | Err(_) => return texts,
            _ => (),
        }
    }
}

/// A SOAP fault in the body, as (code values, reason)
fn soap_fault(xml: &str) -> Option<(String, String)> {
    if root_element(xml).as_deref() != Some("Envelope") || !xml.contains("Fault") {
        return None;
    }
    let code = element_texts(xml, "Value").join(" ");
    let reason = element_text(xml, "Text")
        .or_else(|| element_text(xml, "faultstring"))
        .unwrap_or_else(|| "SOAP fault".to_string());
    Some((code, reason))
}

pub struct OnvifDriver {
    http: HttpTransport,
}

impl OnvifDriver {
    pub fn new(options: &DriverOptions) -> Self {
        Self {
            http: HttpTransport::new(options),
        }
    }

    fn envelope(cfg: &EndpointConfig, body: &str) -> String {
        let security = match &cfg.credentials {
            Some(creds) if creds.has_basic() => format!(
                "<s:Header><wsse:Security xmlns:wsse=\"http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd\">\
                 <wsse:UsernameToken><wsse:Username>{}</wsse:Username>\
                 <wsse:Password>{}</wsse:Password></wsse:UsernameToken>\
                 </wsse:Security></s:Header>",
                escape(creds.username.as_str()),
                escape(creds.password.as_str())
            ),
            _ => String::new(),
        };
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
             <s:Envelope xmlns:s=\"http://www.w3.org/2003/05/soap-envelope\">{}<s:Body>{}</s:Body></s:Envelope>",
            security, body
        )
    }

    async fn post(&self, cfg: &EndpointConfig, path: &str, body: &str) -> CalloutResult<reqwest::Response> {
        let builder = self
            .http
            .request(Method::POST, cfg, path)
            .header("Content-Type", SOAP_CONTENT_TYPE)
            .body(Self::envelope(cfg, body));
        self.http.send(builder).await
    }
}

#[async_trait]
impl Driver for OnvifDriver {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Onvif
    }

    async fn test(&self, cfg: &EndpointConfig) -> CalloutResult<TestReport> {
        let response = self
            .post(
                cfg,
                DEVICE_SERVICE,
                "<GetDeviceInformation xmlns=\"http://www.onvif.org/ver10/device/wsdl\"/>",
            )
            .await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        debug!("ONVIF GetDeviceInformation -> {}", status);

        if let Some((code, reason)) = soap_fault(&body) {
            if code.contains("NotAuthorized") || reason.to_lowercase().contains("not authorized") {
                return Ok(TestReport::failed(format!(
                    "ONVIF reachable but unauthorized ({})",
                    reason
                )));
            }
            return Ok(TestReport::failed(format!("ONVIF fault: {} {}", code, reason)));
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Ok(TestReport::failed(format!(
                "ONVIF reachable but unauthorized (HTTP {})",
                status.as_u16()
            )));
        }
        if !status.is_success() {
            return Ok(TestReport::failed(format!(
                "ONVIF handshake failed (HTTP {})",
                status.as_u16()
            )));
        }

        match element_text(&body, "Manufacturer") {
            Some(manufacturer) => {
                let model = element_text(&body, "Model").unwrap_or_default();
                Ok(TestReport::ok(format!("ONVIF {} {}", manufacturer, model).trim_end().to_string()))
            }
            None => Ok(TestReport::failed("HTTP 200 but response is not ONVIF")),
        }
    }

    async fn announce(
        &self,
        cfg: &EndpointConfig,
        req: &AnnouncementRequest,
    ) -> CalloutResult<AnnounceReceipt> {
        info!("📢 ONVIF announce on {} [{}]", cfg.id, req.context);
        let body = format!(
            "<PlayText xmlns=\"http://www.onvif.org/ver20/audio/wsdl\">\
             <AudioOutputToken>{}</AudioOutputToken><Text>{}</Text>\
             <Language>{}</Language><Volume>{}</Volume></PlayText>",
            escape(cfg.channel.as_deref().unwrap_or("AudioOutput_1")),
            escape(req.text.as_str()),
            escape(req.language.as_str()),
            req.volume
        );
        let response = self.post(cfg, AUDIO_SERVICE, &body).await?;
        let status = response.status();
        if status.is_success() {
            return Ok(AnnounceReceipt::done(format!(
                "ONVIF accepted announcement (HTTP {})",
                status.as_u16()
            )));
        }
        let text = response.text().await.unwrap_or_default();
        let detail = soap_fault(&text)
            .map(|(code, reason)| format!("{} {}", code, reason))
            .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
        Err(CalloutError::ProtocolRejection(format!(
            "ONVIF rejected announcement: {}",
            detail.trim()
        )))
    }

    async fn stop(&self, cfg: &EndpointConfig) -> CalloutResult<()> {
        let body = format!(
            "<StopAudio xmlns=\"http://www.onvif.org/ver20/audio/wsdl\"><AudioOutputToken>{}</AudioOutputToken></StopAudio>",
            escape(cfg.channel.as_deref().unwrap_or("AudioOutput_1"))
        );
        let response = self.post(cfg, AUDIO_SERVICE, &body).await?;
        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        let snippet = body_snippet(response).await;
        // Devices answer a fault when no audio is active
        if snippet.contains("NoAudio") || snippet.contains("NotPlaying") {
            return Ok(());
        }
        Err(CalloutError::ProtocolRejection(format!(
            "ONVIF rejected stop (HTTP {})",
            status.as_u16()
        )))
    }
}
