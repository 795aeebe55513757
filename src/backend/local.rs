//! Local synthesis through the platform's on-device voice engine

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::chunking::split_sentences;
use super::{EventSink, SpeechJob};
use crate::status::Backend;
use crate::{Error, Result};

/// Default pause between sentence chunks
pub const DEFAULT_CHUNK_PAUSE: Duration = Duration::from_millis(150);

/// A voice offered by the on-device engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceInfo {
    /// Engine-specific identifier
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// BCP 47 language tag, e.g. `en-US`
    pub language: String,
}

/// One utterance handed to the engine
#[derive(Debug, Clone)]
pub struct Utterance {
    /// Text to speak
    pub text: String,
    /// Voice to speak with; `None` keeps the engine's current voice
    pub voice: Option<VoiceInfo>,
    /// Rate multiplier, 1.0 is normal
    pub rate: f32,
    /// Volume, 0.0 to 1.0
    pub volume: f32,
}

/// Why an utterance did not finish
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UtteranceError {
    /// Speech was cut off before the end
    Interrupted,
    /// The engine failed
    Failed(String),
}

impl fmt::Display for UtteranceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interrupted => write!(f, "utterance interrupted"),
            Self::Failed(msg) => write!(f, "utterance failed: {msg}"),
        }
    }
}

/// Platform speech engine
#[async_trait]
pub trait VoiceEngine: Send + Sync {
    /// Voices the engine offers
    fn voices(&self) -> Vec<VoiceInfo>;

    /// The engine's own default voice
    fn default_voice(&self) -> Option<VoiceInfo>;

    /// Speak one utterance, resolving when it ends
    ///
    /// # Errors
    ///
    /// Returns [`UtteranceError::Interrupted`] if speech was cut off, or
    /// [`UtteranceError::Failed`] if the engine failed
    async fn utter(&self, utterance: Utterance) -> std::result::Result<(), UtteranceError>;

    /// Silence the engine and drop anything it has queued
    fn cancel(&self);

    /// Whether long utterances should be split into sentences on this engine
    fn prefers_chunking(&self) -> bool {
        false
    }
}

/// When to split text into sentence chunks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkingMode {
    /// Ask the engine
    #[default]
    Auto,
    /// Always split
    Always,
    /// Never split
    Never,
}

/// Pick a voice for `locale`
///
/// Priority: a voice whose id or name equals `preferred`, then an exact locale
/// match, then a base-language match, then the engine default, then the first
/// available voice. Tags compare case-insensitively with `_` and `-`
/// treated alike.
#[must_use]
pub fn select_voice(
    voices: &[VoiceInfo],
    default: Option<&VoiceInfo>,
    preferred: Option<&str>,
    locale: &str,
) -> Option<VoiceInfo> {
    if let Some(wanted) = preferred {
        if let Some(voice) = voices
            .iter()
            .find(|v| v.id.eq_ignore_ascii_case(wanted) || v.name.eq_ignore_ascii_case(wanted))
        {
            return Some(voice.clone());
        }
    }

    let locale = normalize_tag(locale);
    if let Some(voice) = voices.iter().find(|v| normalize_tag(&v.language) == locale) {
        return Some(voice.clone());
    }

    let base = base_language(&locale);
    if let Some(voice) = voices
        .iter()
        .find(|v| base_language(&normalize_tag(&v.language)) == base)
    {
        return Some(voice.clone());
    }

    default.cloned().or_else(|| voices.first().cloned())
}

fn normalize_tag(tag: &str) -> String {
    tag.trim().replace('_', "-").to_ascii_lowercase()
}

fn base_language(tag: &str) -> &str {
    tag.split('-').next().unwrap_or(tag)
}

/// On-device synthesis strategy
#[derive(Clone)]
pub struct LocalSynthesis {
    engine: Arc<dyn VoiceEngine>,
    locale: String,
    preferred_voice: Option<String>,
    chunking: ChunkingMode,
    chunk_pause: Duration,
}

impl fmt::Debug for LocalSynthesis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalSynthesis")
            .field("locale", &self.locale)
            .field("preferred_voice", &self.preferred_voice)
            .field("chunking", &self.chunking)
            .field("chunk_pause", &self.chunk_pause)
            .finish_non_exhaustive()
    }
}

impl LocalSynthesis {
    /// Wrap an engine, selecting voices for `locale`
    #[must_use]
    pub fn new(engine: Arc<dyn VoiceEngine>, locale: impl Into<String>) -> Self {
        Self {
            engine,
            locale: locale.into(),
            preferred_voice: None,
            chunking: ChunkingMode::Auto,
            chunk_pause: DEFAULT_CHUNK_PAUSE,
        }
    }

    /// Voice to use when a request names none
    #[must_use]
    pub fn with_preferred_voice(mut self, voice: Option<String>) -> Self {
        self.preferred_voice = voice;
        self
    }

    /// Sentence chunking policy and the pause between chunks
    #[must_use]
    pub const fn with_chunking(mut self, mode: ChunkingMode, pause: Duration) -> Self {
        self.chunking = mode;
        self.chunk_pause = pause;
        self
    }

    /// Whether text is split into sentences before speaking
    #[must_use]
    pub fn chunking_active(&self) -> bool {
        match self.chunking {
            ChunkingMode::Always => true,
            ChunkingMode::Never => false,
            ChunkingMode::Auto => self.engine.prefers_chunking(),
        }
    }

    /// Voices offered by the engine
    #[must_use]
    pub fn voices(&self) -> Vec<VoiceInfo> {
        self.engine.voices()
    }

    /// Speak `job` on the device
    ///
    /// With chunking active, sentences play strictly in order separated by a
    /// short pause, and an interruption of any chunk but the last is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Playback`] if the engine fails, or is interrupted on
    /// the final chunk or while chunking is inactive
    pub async fn speak(&self, job: &SpeechJob, events: &EventSink) -> Result<()> {
        let voices = self.engine.voices();
        let default = self.engine.default_voice();
        let preferred = job.voice.as_deref().or(self.preferred_voice.as_deref());
        let voice = select_voice(&voices, default.as_ref(), preferred, &self.locale);

        let chunking = self.chunking_active();
        let chunks = if chunking {
            split_sentences(&job.text)
        } else {
            vec![job.text.clone()]
        };
        let last = chunks.len().saturating_sub(1);

        tracing::debug!(
            request_id = job.request_id,
            voice = voice.as_ref().map(|v| v.name.as_str()),
            chunks = chunks.len(),
            chunking,
            "speaking locally"
        );

        events.started(Backend::Local);
        for (index, text) in chunks.into_iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(self.chunk_pause).await;
            }

            let utterance = Utterance {
                text,
                voice: voice.clone(),
                rate: job.rate,
                volume: job.volume,
            };

            match self.engine.utter(utterance).await {
                Ok(()) => {}
                Err(UtteranceError::Interrupted) if chunking && index < last => {
                    tracing::debug!(
                        request_id = job.request_id,
                        chunk = index,
                        "chunk interrupted, continuing"
                    );
                }
                Err(e) => return Err(Error::Playback(e.to_string())),
            }
        }
        events.ended(Backend::Local);

        Ok(())
    }

    /// Silence the engine
    pub fn cancel(&self) {
        self.engine.cancel();
    }
}
