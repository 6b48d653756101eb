//! Local TTS (Text-to-Speech) collaborators
//!
//! The last tier of the fallback chain speaks through whatever synthesizer
//! the host provides. The dispatcher only needs two things from it: a way
//! to hand off text and a voice catalog.

use crate::config::Config;
use crate::voice::VoiceCatalogEntry;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::info;

pub mod system;

/// Completion of one utterance. Dropping the handle detaches from it.
#[derive(Debug)]
pub struct SpeechHandle {
    done: oneshot::Receiver<Result<(), String>>,
}

/// Sender half held by the synthesizer
#[derive(Debug)]
pub struct SpeechCompletion {
    done: oneshot::Sender<Result<(), String>>,
}

impl SpeechHandle {
    pub fn pair() -> (SpeechHandle, SpeechCompletion) {
        let (tx, rx) = oneshot::channel();
        (SpeechHandle { done: rx }, SpeechCompletion { done: tx })
    }

    /// A handle that is already finished
    pub fn finished() -> Self {
        let (handle, completion) = Self::pair();
        completion.succeed();
        handle
    }

    /// Wait for playback to end. A synthesizer that vanished counts as
    /// an error.
    pub async fn wait(self) -> Result<(), String> {
        self.done
            .await
            .unwrap_or_else(|_| Err("synthesizer dropped the utterance".to_string()))
    }
}

impl SpeechCompletion {
    pub fn succeed(self) {
        let _ = self.done.send(Ok(()));
    }

    pub fn fail(self, reason: impl Into<String>) {
        let _ = self.done.send(Err(reason.into()));
    }
}

/// Trait for local speech synthesizers
#[async_trait]
pub trait LocalSynth: Send + Sync + std::fmt::Debug {
    /// Hand off text for playback. Returns once speech has started;
    /// playback errors arrive later through the handle.
    async fn speak(&self, text: &str, voice_id: &str, volume: u8) -> Result<SpeechHandle>;

    /// Stop everything currently speaking. Synchronous.
    fn cancel_all(&self);

    /// Get the engine name
    fn name(&self) -> &str;
}

/// Source of available voices. May be empty or stale.
#[async_trait]
pub trait VoiceCatalog: Send + Sync {
    async fn list_voices(&self) -> Vec<VoiceCatalogEntry>;
}

/// Fixed voice list, e.g. from configuration
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    voices: Vec<VoiceCatalogEntry>,
}

impl StaticCatalog {
    pub fn new(voices: Vec<VoiceCatalogEntry>) -> Self {
        Self { voices }
    }
}

#[async_trait]
impl VoiceCatalog for StaticCatalog {
    async fn list_voices(&self) -> Vec<VoiceCatalogEntry> {
        self.voices.clone()
    }
}

/// Create the configured local synthesizer and its catalog. Returns
/// `None` when local synthesis is disabled.
pub fn create_local(config: &Config) -> Option<(Arc<dyn LocalSynth>, Arc<dyn VoiceCatalog>)> {
    if config.local_synth.command.trim().is_empty() {
        info!("🔇 Local synthesis disabled");
        return None;
    }
    let engine = Arc::new(system::SystemSynth::new(&config.local_synth.command));
    info!("✅ Local TTS engine '{}' initialized", engine.name());

    let catalog: Arc<dyn VoiceCatalog> = if config.local_synth.voices.is_empty() {
        engine.clone()
    } else {
        Arc::new(StaticCatalog::new(config.local_synth.voices.clone()))
    };
    Some((engine, catalog))
}
