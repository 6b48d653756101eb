//! System TTS engine (espeak-ng compatible command)

use super::{LocalSynth, SpeechHandle, VoiceCatalog};
use crate::voice::VoiceCatalogEntry;
use anyhow::{Context, Result};
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use std::process::Stdio;
use std::sync::{Mutex, PoisonError};
use tokio::process::Command;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

lazy_static! {
    // Pty Language Age/Gender VoiceName File Other
    static ref VOICE_LINE: Regex =
        Regex::new(r"^\s*\d+\s+(\S+)\s+(\S+)\s+(\S+)\s+(\S+)").unwrap();
}

#[derive(Debug)]
pub struct SystemSynth {
    command: String,
    cancel: Mutex<CancellationToken>,
    /// Last non-empty voice list. Empty results are never cached so a
    /// synthesizer that comes up late is picked up on the next lookup.
    voices: AsyncMutex<Vec<VoiceCatalogEntry>>,
}

impl SystemSynth {
    pub fn new(command: &str) -> Self {
        Self {
            command: command.trim().to_string(),
            cancel: Mutex::new(CancellationToken::new()),
            voices: AsyncMutex::new(Vec::new()),
        }
    }

    fn current_token(&self) -> CancellationToken {
        self.cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl LocalSynth for SystemSynth {
    async fn speak(&self, text: &str, voice_id: &str, volume: u8) -> Result<SpeechHandle> {
        debug!("🗣️ {} speaking with voice {}: {}", self.command, voice_id, text);

        // espeak-ng amplitude runs 0..200
        let amplitude = u32::from(volume.min(100)) * 2;
        let mut child = Command::new(&self.command)
            .arg("-v")
            .arg(voice_id)
            .arg("-a")
            .arg(amplitude.to_string())
            .arg("--")
            .arg(text)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to start {}", self.command))?;

        let token = self.current_token();
        let (handle, completion) = SpeechHandle::pair();
        let command = self.command.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    if let Err(e) = child.kill().await {
                        debug!("{} already exited: {}", command, e);
                    }
                    completion.fail("cancelled");
                }
                status = child.wait() => match status {
                    Ok(status) if status.success() => completion.succeed(),
                    Ok(status) => {
                        warn!("⚠️ {} exited with {}", command, status);
                        completion.fail(format!("{} exited with {}", command, status));
                    }
                    Err(e) => {
                        warn!("⚠️ Lost track of {}: {}", command, e);
                        completion.fail(e.to_string());
                    }
                },
            }
        });

        Ok(handle)
    }

    fn cancel_all(&self) {
        let mut token = self.cancel.lock().unwrap_or_else(PoisonError::into_inner);
        token.cancel();
        *token = CancellationToken::new();
    }

    fn name(&self) -> &str {
        &self.command
    }
}

impl SystemSynth {
    async fn query_voices(&self) -> Vec<VoiceCatalogEntry> {
        match Command::new(&self.command).arg("--voices").output().await {
            Ok(out) if out.status.success() => parse_voice_list(&String::from_utf8_lossy(&out.stdout)),
            Ok(out) => {
                warn!("⚠️ {} --voices exited with {}", self.command, out.status);
                Vec::new()
            }
            Err(e) => {
                warn!("⚠️ Could not list voices from {}: {}", self.command, e);
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl VoiceCatalog for SystemSynth {
    async fn list_voices(&self) -> Vec<VoiceCatalogEntry> {
        let mut cached = self.voices.lock().await;
        if cached.is_empty() {
            *cached = self.query_voices().await;
            debug!("🗣️ {} reports {} voices", self.command, cached.len());
        }
        cached.clone()
    }
}

/// Parse `espeak-ng --voices` output. The voice for plain `en` becomes the
/// default.
pub fn parse_voice_list(output: &str) -> Vec<VoiceCatalogEntry> {
    output
        .lines()
        .filter_map(|line| {
            let caps = VOICE_LINE.captures(line)?;
            let language = caps.get(1)?.as_str();
            let name = caps.get(3)?.as_str().replace('_', " ");
            let entry = VoiceCatalogEntry::new(language, language, &name);
            Some(if language == "en" { entry.as_default() } else { entry })
        })
        .collect()
}
