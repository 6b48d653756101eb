//! Mock local synthesizer for testing
//!
//! Records all spoken text for verification.

use anyhow::Result;
use async_trait::async_trait;
use callout::tts::{LocalSynth, SpeechCompletion, SpeechHandle, StaticCatalog};
use callout::voice::VoiceCatalogEntry;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Mock synthesizer that records (text, voice, volume)
#[derive(Debug, Default)]
pub struct MockSynth {
    pub spoken: Mutex<Vec<(String, String, u8)>>,
    /// Refuse to start speaking
    pub should_fail: AtomicBool,
    /// Keep utterances "playing" until cancelled
    pub hold: AtomicBool,
    pub cancels: AtomicUsize,
    playing: Mutex<Vec<SpeechCompletion>>,
}

impl MockSynth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn holding() -> Self {
        let synth = Self::default();
        synth.hold.store(true, Ordering::SeqCst);
        synth
    }

    /// Get all spoken phrases
    pub fn get_spoken(&self) -> Vec<String> {
        self.spoken
            .lock()
            .unwrap()
            .iter()
            .map(|(text, _, _)| text.clone())
            .collect()
    }

    pub fn last_voice(&self) -> Option<String> {
        self.spoken.lock().unwrap().last().map(|(_, v, _)| v.clone())
    }

    pub fn cancel_count(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LocalSynth for MockSynth {
    async fn speak(&self, text: &str, voice_id: &str, volume: u8) -> Result<SpeechHandle> {
        if self.should_fail.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("Mock synth failure"));
        }
        self.spoken
            .lock()
            .unwrap()
            .push((text.to_string(), voice_id.to_string(), volume));

        if self.hold.load(Ordering::SeqCst) {
            let (handle, completion) = SpeechHandle::pair();
            self.playing.lock().unwrap().push(completion);
            Ok(handle)
        } else {
            Ok(SpeechHandle::finished())
        }
    }

    fn cancel_all(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        for completion in self.playing.lock().unwrap().drain(..) {
            completion.fail("cancelled");
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// Static catalog from `(id, language)` pairs; the first entry is default
pub fn catalog(entries: &[(&str, &str)]) -> Arc<StaticCatalog> {
    let voices = entries
        .iter()
        .enumerate()
        .map(|(i, (id, lang))| {
            let entry = VoiceCatalogEntry::new(id, lang, id);
            if i == 0 {
                entry.as_default()
            } else {
                entry
            }
        })
        .collect();
    Arc::new(StaticCatalog::new(voices))
}
