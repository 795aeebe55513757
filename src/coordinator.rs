//! Public facade over the speech queue, gate, listener and session arbiter
//!
//! A [`Coordinator`] is a cheap handle; clones share one processing loop.
//! All operations are non-blocking except awaiting a [`SpeechTicket`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::backend::{Backends, LocalSynthesis, VoiceInfo};
use crate::config::{Config, CoordinatorConfig};
use crate::echo::EchoFilter;
use crate::gate::ReverbGate;
use crate::listener::{ListenerCoordinator, SttController};
use crate::queue::{REASON_DISPOSED, SpeakRequest, SpeechQueue, SpeechTicket};
use crate::session::{SessionId, SessionMutex, SttSession};
use crate::status::{SessionStatus, StatusStore, Subscription};
use crate::Result;

struct Inner {
    queue: Arc<SpeechQueue>,
    status: StatusStore,
    gate: ReverbGate,
    listener: ListenerCoordinator,
    sessions: SessionMutex,
    worker: Mutex<Option<JoinHandle<()>>>,
    disposed: AtomicBool,
}

impl Inner {
    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.queue.close();
        if let Some(worker) = self
            .worker
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take()
        {
            worker.abort();
        }

        self.gate.reset();
        self.listener.dispose();
        self.status.record_cancel_reason(REASON_DISPOSED);
        self.status.clear_listeners();
        tracing::debug!("coordinator disposed");
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Audio session coordinator
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("status", &self.inner.status.snapshot())
            .field("queue", &self.inner.queue)
            .field("disposed", &self.inner.disposed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl Coordinator {
    /// Start a coordinator over `backends`
    ///
    /// Spawns the processing loop, so this must be called from within a
    /// tokio runtime.
    #[must_use]
    pub fn new(config: &CoordinatorConfig, backends: Backends) -> Self {
        let status = StatusStore::new();
        let gate = ReverbGate::new(config.reverb_gate);
        let listener = ListenerCoordinator::new(gate.clone(), status.clone());
        let queue = Arc::new(SpeechQueue::new(
            status.clone(),
            gate.clone(),
            listener.clone(),
            backends,
            EchoFilter::new(config.echo_window),
        ));

        let worker = tokio::spawn(Arc::clone(&queue).run());
        tracing::debug!(backends = ?queue.backends(), gate = ?config.reverb_gate, "coordinator started");

        Self {
            inner: Arc::new(Inner {
                queue,
                status,
                gate,
                listener,
                sessions: SessionMutex::new(),
                worker: Mutex::new(Some(worker)),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    /// Build backends from `config` and start a coordinator
    ///
    /// Backends that cannot be initialized on this machine are skipped with a
    /// warning; requests then fail with `UnsupportedError` instead.
    ///
    /// # Errors
    ///
    /// Returns an error if the remote configuration is invalid
    pub fn from_config(config: &Config) -> Result<Self> {
        let backends = Backends::new(remote_backend(config)?, local_backend(config));
        if backends.is_empty() {
            tracing::warn!("no speech backend available, every request will fail");
        }
        Ok(Self::new(&config.coordinator, backends))
    }

    /// Enqueue a request; the ticket settles with its outcome
    pub fn speak(&self, request: SpeakRequest) -> SpeechTicket {
        self.inner.queue.enqueue(request)
    }

    /// Drop queued requests and silence current output
    ///
    /// Every outstanding ticket settles with `AbortError(reason)`. On an idle
    /// coordinator only the recorded cancel reason changes.
    pub fn stop(&self, reason: &str) {
        if self.is_disposed() {
            return;
        }
        self.inner.queue.stop(reason);
    }

    /// Observe status; the listener is called immediately and on each change
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&SessionStatus) + Send + Sync + 'static,
    {
        self.inner.status.subscribe(listener)
    }

    /// Async view of the status
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<SessionStatus> {
        self.inner.status.watch()
    }

    /// Current status snapshot
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.inner.status.snapshot()
    }

    /// Hand over the recognition engine's controls; the last call wins
    pub fn register_stt_controller(&self, controller: Arc<dyn SttController>) {
        self.inner.listener.register(controller);
    }

    /// Claim the input channel
    ///
    /// Returns `None` if another session is active.
    #[must_use]
    pub fn begin_stt_session(&self, source: &str) -> Option<SessionId> {
        self.inner.sessions.begin_session(source)
    }

    /// Claim the input channel, reporting who holds it on conflict
    ///
    /// # Errors
    ///
    /// Returns `SessionConflictError` if another session is active
    pub fn claim_stt_session(&self, source: &str) -> Result<SttSession> {
        self.inner.sessions.claim(source)
    }

    /// Release the input channel; stale ids are ignored
    pub fn end_stt_session(&self, id: SessionId, reason: &str) -> bool {
        self.inner.sessions.end_session(id, reason)
    }

    /// The active input session, if any
    #[must_use]
    pub fn active_stt_session(&self) -> Option<SttSession> {
        self.inner.sessions.active()
    }

    /// Whether recognized input should be discarded right now
    #[must_use]
    pub fn is_gated(&self) -> bool {
        self.inner.gate.is_gated()
    }

    /// Whether `transcript` repeats something spoken moments ago
    #[must_use]
    pub fn is_probable_echo(&self, transcript: &str) -> bool {
        self.inner.queue.is_probable_echo(transcript)
    }

    /// Requests waiting behind the active one
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.inner.queue.len()
    }

    /// Voices offered by the on-device engine
    #[must_use]
    pub fn local_voices(&self) -> Vec<VoiceInfo> {
        self.inner
            .queue
            .backends()
            .local()
            .map(LocalSynthesis::voices)
            .unwrap_or_default()
    }

    /// Whether [`Coordinator::dispose`] was called
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// Shut down: abort everything outstanding, cancel timers, drop
    /// listeners. Idempotent; later requests settle with `AbortError`.
    pub fn dispose(&self) {
        self.inner.dispose();
    }
}

#[cfg(feature = "playback")]
fn remote_backend(config: &Config) -> Result<Option<crate::backend::RemoteSynthesis>> {
    use crate::backend::{HttpSpeechClient, RemoteSynthesis};
    use crate::voice::AudioPlayback;

    let Some(remote) = &config.remote else {
        return Ok(None);
    };

    let client = HttpSpeechClient::from_config(remote)?;
    match AudioPlayback::new() {
        Ok(playback) => {
            tracing::info!(provider = %remote.provider, "remote synthesis enabled");
            Ok(Some(RemoteSynthesis::new(Arc::new(client), Arc::new(playback))))
        }
        Err(e) => {
            tracing::warn!(error = %e, "no audio output, remote synthesis disabled");
            Ok(None)
        }
    }
}

#[cfg(not(feature = "playback"))]
#[allow(clippy::unnecessary_wraps)]
fn remote_backend(config: &Config) -> Result<Option<crate::backend::RemoteSynthesis>> {
    if config.remote.is_some() {
        tracing::warn!("built without audio playback, remote synthesis disabled");
    }
    Ok(None)
}

#[cfg(feature = "native-tts")]
fn local_backend(config: &Config) -> Option<LocalSynthesis> {
    use crate::backend::NativeVoiceEngine;

    if !config.local.enabled {
        return None;
    }

    match NativeVoiceEngine::new() {
        Ok(engine) => Some(
            LocalSynthesis::new(Arc::new(engine), config.local.locale.clone())
                .with_preferred_voice(config.local.voice.clone())
                .with_chunking(config.coordinator.chunking, config.coordinator.chunk_pause),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "on-device synthesis unavailable");
            None
        }
    }
}

#[cfg(not(feature = "native-tts"))]
fn local_backend(config: &Config) -> Option<LocalSynthesis> {
    if config.local.enabled {
        tracing::debug!("built without native-tts, local synthesis disabled");
    }
    None
}
