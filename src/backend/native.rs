//! On-device voice engine backed by the `tts` crate
//!
//! Wraps Speech Dispatcher on Linux, AVFoundation on macOS and SAPI/WinRT on
//! Windows. Completion is tracked through utterance callbacks where the
//! platform has them, and by polling `is_speaking` otherwise.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tts::Tts as TtsCrate;

use super::local::{Utterance, UtteranceError, VoiceEngine, VoiceInfo};
use crate::{Error, Result};

/// Poll interval when the platform has no utterance callbacks
const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Signal {
    Ended,
    Stopped,
}

/// Native TTS engine
pub struct NativeVoiceEngine {
    tts: Mutex<TtsCrate>,
    callbacks: bool,
    signals: tokio::sync::Mutex<mpsc::UnboundedReceiver<Signal>>,
}

impl NativeVoiceEngine {
    /// Initialize the platform speech engine
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unsupported`] if the platform has no usable engine
    pub fn new() -> Result<Self> {
        tracing::debug!("creating native TTS engine");

        let tts = TtsCrate::default()
            .map_err(|e| Error::Unsupported(format!("failed to initialize TTS: {e}")))?;

        let features = tts.supported_features();
        let (tx, rx) = mpsc::unbounded_channel();

        let mut callbacks = features.utterance_callbacks;
        if callbacks {
            let end_tx = tx.clone();
            let registered = tts
                .on_utterance_end(Some(Box::new(move |_| {
                    let _ = end_tx.send(Signal::Ended);
                })))
                .and_then(|()| {
                    tts.on_utterance_stop(Some(Box::new(move |_| {
                        let _ = tx.send(Signal::Stopped);
                    })))
                });
            if let Err(e) = registered {
                tracing::warn!(error = %e, "utterance callbacks unavailable, polling instead");
                callbacks = false;
            }
        }

        tracing::debug!(callbacks, "native TTS engine ready");

        Ok(Self {
            tts: Mutex::new(tts),
            callbacks,
            signals: tokio::sync::Mutex::new(rx),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TtsCrate> {
        self.tts.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Apply voice, rate and volume, then start speaking
    fn start(&self, utterance: &Utterance) -> std::result::Result<(), UtteranceError> {
        let mut tts = self.lock();
        let features = tts.supported_features();

        if let (Some(wanted), true) = (&utterance.voice, features.voice) {
            let voices = tts.voices().unwrap_or_default();
            if let Some(voice) = voices.iter().find(|v| v.id() == wanted.id) {
                if let Err(e) = tts.set_voice(voice) {
                    tracing::warn!(voice = %wanted.name, error = %e, "failed to set voice");
                }
            }
        }

        if features.rate {
            let rate = (tts.normal_rate() * utterance.rate).clamp(tts.min_rate(), tts.max_rate());
            if let Err(e) = tts.set_rate(rate) {
                tracing::warn!(rate, error = %e, "failed to set rate");
            }
        }

        if features.volume {
            let volume = utterance.volume.clamp(0.0, 1.0);
            if let Err(e) = tts.set_volume(volume) {
                tracing::warn!(volume, error = %e, "failed to set volume");
            }
        }

        tts.speak(utterance.text.as_str(), false)
            .map(|_| ())
            .map_err(|e| UtteranceError::Failed(e.to_string()))
    }

    async fn wait_polling(&self) -> std::result::Result<(), UtteranceError> {
        // Give the engine a moment to report that it started
        tokio::time::sleep(POLL_INTERVAL).await;
        loop {
            let speaking = self.lock().is_speaking();
            match speaking {
                Ok(true) => tokio::time::sleep(POLL_INTERVAL).await,
                Ok(false) => return Ok(()),
                Err(e) => return Err(UtteranceError::Failed(e.to_string())),
            }
        }
    }
}

#[async_trait]
impl VoiceEngine for NativeVoiceEngine {
    fn voices(&self) -> Vec<VoiceInfo> {
        match self.lock().voices() {
            Ok(voices) => voices
                .into_iter()
                .map(|v| VoiceInfo {
                    id: v.id(),
                    name: v.name(),
                    language: v.language().to_string(),
                })
                .collect(),
            Err(e) => {
                tracing::debug!(error = %e, "failed to list voices");
                Vec::new()
            }
        }
    }

    fn default_voice(&self) -> Option<VoiceInfo> {
        let tts = self.lock();
        if !tts.supported_features().get_voice {
            return None;
        }
        tts.voice().ok().flatten().map(|v| VoiceInfo {
            id: v.id(),
            name: v.name(),
            language: v.language().to_string(),
        })
    }

    async fn utter(&self, utterance: Utterance) -> std::result::Result<(), UtteranceError> {
        if !self.callbacks {
            self.start(&utterance)?;
            return self.wait_polling().await;
        }

        let mut signals = self.signals.lock().await;
        while signals.try_recv().is_ok() {}

        self.start(&utterance)?;
        match signals.recv().await {
            Some(Signal::Ended) => Ok(()),
            Some(Signal::Stopped) => Err(UtteranceError::Interrupted),
            None => Err(UtteranceError::Failed("engine callbacks closed".to_string())),
        }
    }

    fn cancel(&self) {
        if let Err(e) = self.lock().stop() {
            tracing::debug!(error = %e, "failed to stop native speech");
        }
    }

    fn prefers_chunking(&self) -> bool {
        !self.callbacks
    }
}
