//! Speech synthesis backends and the fallback chain between them
//!
//! Backends report progress through an [`EventSink`] tagged with the request
//! id they were started for. The processing loop owns the receiving end and
//! drops events whose id is no longer live.

pub mod chunking;
pub mod http;
pub mod local;
#[cfg(feature = "native-tts")]
pub mod native;
pub mod remote;

pub use chunking::split_sentences;
pub use http::HttpSpeechClient;
pub use local::{
    ChunkingMode, LocalSynthesis, Utterance, UtteranceError, VoiceEngine, VoiceInfo, select_voice,
};
#[cfg(feature = "native-tts")]
pub use native::NativeVoiceEngine;
pub use remote::{AudioSink, RemoteSynthesis, SpeechFetcher};

use tokio::sync::mpsc;

use crate::status::{Backend, RequestId};
use crate::{Error, Result};

/// Synthesis parameters for one dequeued request
#[derive(Debug, Clone)]
pub struct SpeechJob {
    /// Id assigned on dequeue
    pub request_id: RequestId,
    /// Text to speak (non-empty)
    pub text: String,
    /// Requested voice id or name
    pub voice: Option<String>,
    /// Rate multiplier, 1.0 is normal
    pub rate: f32,
    /// Volume, 0.0 to 1.0
    pub volume: f32,
    /// Skip remote synthesis entirely
    pub force_local_only: bool,
    /// Fall back to local synthesis when remote synthesis fails
    pub allow_fallback: bool,
}

/// What a backend reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendEventKind {
    /// Audio started
    Started(Backend),
    /// Audio finished
    Ended(Backend),
}

/// Progress report from a backend, tagged with its request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendEvent {
    /// Request the backend was started for
    pub request_id: RequestId,
    /// What happened
    pub kind: BackendEventKind,
}

/// Sending half of a request's event channel
#[derive(Debug, Clone)]
pub struct EventSink {
    request_id: RequestId,
    tx: mpsc::UnboundedSender<BackendEvent>,
}

impl EventSink {
    /// Create the event channel for request `request_id`
    #[must_use]
    pub fn channel(request_id: RequestId) -> (Self, mpsc::UnboundedReceiver<BackendEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { request_id, tx }, rx)
    }

    /// Report that audio started
    pub fn started(&self, backend: Backend) {
        self.emit(BackendEventKind::Started(backend));
    }

    /// Report that audio finished
    pub fn ended(&self, backend: Backend) {
        self.emit(BackendEventKind::Ended(backend));
    }

    fn emit(&self, kind: BackendEventKind) {
        // Receiver is gone once the request settled
        let _ = self.tx.send(BackendEvent {
            request_id: self.request_id,
            kind,
        });
    }
}

/// The configured backends, tried remote first then local
#[derive(Default)]
pub struct Backends {
    remote: Option<RemoteSynthesis>,
    local: Option<LocalSynthesis>,
}

impl std::fmt::Debug for Backends {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backends")
            .field("remote", &self.remote.is_some())
            .field("local", &self.local.is_some())
            .finish()
    }
}

impl Backends {
    /// Combine the available backends
    #[must_use]
    pub const fn new(remote: Option<RemoteSynthesis>, local: Option<LocalSynthesis>) -> Self {
        Self { remote, local }
    }

    /// Whether neither backend is available
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.remote.is_none() && self.local.is_none()
    }

    /// On-device backend, if configured
    #[must_use]
    pub const fn local(&self) -> Option<&LocalSynthesis> {
        self.local.as_ref()
    }

    /// Run the fallback chain for `job`
    ///
    /// Remote synthesis runs unless `force_local_only` is set or it is not
    /// configured. A remote failure hands off to local synthesis only when
    /// `allow_fallback` is set; otherwise the remote error is returned.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unsupported`] when no backend can take the job, or
    /// the error of the last backend that ran
    pub async fn speak(&self, job: &SpeechJob, events: &EventSink) -> Result<()> {
        if !job.force_local_only {
            if let Some(remote) = &self.remote {
                match remote.speak(job, events).await {
                    Ok(()) => return Ok(()),
                    Err(e) if e.is_abort() => return Err(e),
                    Err(e) if job.allow_fallback && self.local.is_some() => {
                        tracing::warn!(
                            request_id = job.request_id,
                            error = %e,
                            "remote synthesis failed, falling back to local"
                        );
                        remote.cancel();
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        match &self.local {
            Some(local) => local.speak(job, events).await,
            None => Err(Error::Unsupported(if job.force_local_only {
                "local synthesis requested but no on-device engine is available".to_string()
            } else {
                "no speech synthesis backend is available".to_string()
            })),
        }
    }

    /// Tear down whatever any backend is playing
    pub fn cancel_all(&self) {
        if let Some(remote) = &self.remote {
            remote.cancel();
        }
        if let Some(local) = &self.local {
            local.cancel();
        }
    }
}
