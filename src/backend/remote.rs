//! Remote synthesis: fetch an audio asset over the network, then play it

use std::sync::Arc;

use async_trait::async_trait;

use super::{EventSink, SpeechJob};
use crate::Result;
use crate::status::Backend;

/// Source of synthesized audio for a piece of text
#[async_trait]
pub trait SpeechFetcher: Send + Sync {
    /// Fetch a playable audio asset
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Network`] on transport failure or a non-2xx
    /// response
    async fn fetch(&self, text: &str, voice: Option<&str>, rate: f32) -> Result<Vec<u8>>;

    /// Provider name for logging
    fn name(&self) -> &'static str;
}

/// Speaker output for fetched audio
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Play `audio` to completion
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Playback`] if decoding or the device fails
    async fn play(&self, audio: Vec<u8>, volume: f32) -> Result<()>;

    /// Stop whatever is playing; idempotent
    fn stop(&self);
}

/// Network-backed synthesis strategy
#[derive(Clone)]
pub struct RemoteSynthesis {
    fetcher: Arc<dyn SpeechFetcher>,
    sink: Arc<dyn AudioSink>,
}

impl RemoteSynthesis {
    /// Combine a fetcher with the sink that plays its output
    #[must_use]
    pub fn new(fetcher: Arc<dyn SpeechFetcher>, sink: Arc<dyn AudioSink>) -> Self {
        Self { fetcher, sink }
    }

    /// Fetch and play `job`
    ///
    /// Dropping the returned future aborts an in-flight fetch; call
    /// [`RemoteSynthesis::cancel`] to silence audio that already started.
    ///
    /// # Errors
    ///
    /// Returns the fetch error ([`crate::Error::Network`]) or the playback
    /// error ([`crate::Error::Playback`])
    pub async fn speak(&self, job: &SpeechJob, events: &EventSink) -> Result<()> {
        tracing::debug!(
            request_id = job.request_id,
            provider = self.fetcher.name(),
            chars = job.text.len(),
            "fetching remote speech"
        );

        let audio = self
            .fetcher
            .fetch(&job.text, job.voice.as_deref(), job.rate)
            .await?;

        tracing::debug!(request_id = job.request_id, bytes = audio.len(), "playing remote speech");
        events.started(Backend::Remote);
        self.sink.play(audio, job.volume).await?;
        events.ended(Backend::Remote);

        Ok(())
    }

    /// Stop playback
    pub fn cancel(&self) {
        self.sink.stop();
    }
}
