//! Speech queue: FIFO speak requests drained by a single consumer
//!
//! Each dequeued request gets the next request id, a clean slate (anything
//! still playing is torn down), a paused recognizer and a closed reverb gate.
//! The backend chain then runs while the loop applies the backend's events,
//! dropping any whose request id is no longer live. On a terminal outcome the
//! request's ticket settles and the loop moves on.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use tokio::sync::{Notify, oneshot};
use tokio_util::sync::CancellationToken;

use crate::backend::{BackendEvent, BackendEventKind, Backends, EventSink, SpeechJob};
use crate::echo::EchoFilter;
use crate::gate::ReverbGate;
use crate::listener::ListenerCoordinator;
use crate::status::{Backend, RequestId, SessionStatus, StatusStore};
use crate::{Error, Result};

/// Abort reason for requests replaced by an interrupting request
pub const REASON_SUPERSEDED: &str = "superseded";

/// Abort reason for requests outstanding when the coordinator is disposed
pub const REASON_DISPOSED: &str = "disposed";

type Callback = Box<dyn FnOnce() + Send>;
type ErrorCallback = Box<dyn FnOnce(&Error) + Send>;

#[derive(Default)]
struct Callbacks {
    on_start: Option<Callback>,
    on_end: Option<Callback>,
    on_error: Option<ErrorCallback>,
}

/// A request to speak some text
pub struct SpeakRequest {
    /// Text to speak
    pub text: String,
    /// Voice id or name; remote and local backends interpret it separately
    pub voice: Option<String>,
    /// Rate multiplier, 1.0 is normal
    pub rate: f32,
    /// Volume, 0.0 to 1.0
    pub volume: f32,
    /// Skip remote synthesis
    pub force_local_only: bool,
    /// Fall back to local synthesis when remote synthesis fails
    pub allow_fallback: bool,
    /// Supersede everything queued or playing when enqueued
    pub interrupt: bool,
    callbacks: Callbacks,
}

impl std::fmt::Debug for SpeakRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeakRequest")
            .field("text", &self.text)
            .field("voice", &self.voice)
            .field("rate", &self.rate)
            .field("volume", &self.volume)
            .field("force_local_only", &self.force_local_only)
            .field("allow_fallback", &self.allow_fallback)
            .field("interrupt", &self.interrupt)
            .finish_non_exhaustive()
    }
}

impl SpeakRequest {
    /// Speak `text` at normal rate and full volume, with fallback enabled
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            voice: None,
            rate: 1.0,
            volume: 1.0,
            force_local_only: false,
            allow_fallback: true,
            interrupt: false,
            callbacks: Callbacks::default(),
        }
    }

    /// Use a specific voice
    #[must_use]
    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = Some(voice.into());
        self
    }

    /// Set the rate multiplier
    #[must_use]
    pub const fn with_rate(mut self, rate: f32) -> Self {
        self.rate = rate;
        self
    }

    /// Set the volume
    #[must_use]
    pub const fn with_volume(mut self, volume: f32) -> Self {
        self.volume = volume;
        self
    }

    /// Only use the on-device engine
    #[must_use]
    pub const fn local_only(mut self) -> Self {
        self.force_local_only = true;
        self
    }

    /// Surface remote failures instead of falling back
    #[must_use]
    pub const fn without_fallback(mut self) -> Self {
        self.allow_fallback = false;
        self
    }

    /// Abort everything queued or playing when this request is enqueued
    #[must_use]
    pub const fn interrupting(mut self) -> Self {
        self.interrupt = true;
        self
    }

    /// Called once when audio first starts
    #[must_use]
    pub fn on_start(mut self, f: impl FnOnce() + Send + 'static) -> Self {
        self.callbacks.on_start = Some(Box::new(f));
        self
    }

    /// Called when speech completes
    #[must_use]
    pub fn on_end(mut self, f: impl FnOnce() + Send + 'static) -> Self {
        self.callbacks.on_end = Some(Box::new(f));
        self
    }

    /// Called on a non-abort failure
    #[must_use]
    pub fn on_error(mut self, f: impl FnOnce(&Error) + Send + 'static) -> Self {
        self.callbacks.on_error = Some(Box::new(f));
        self
    }

    fn into_job(self, request_id: RequestId) -> (SpeechJob, Callbacks) {
        let job = SpeechJob {
            request_id,
            text: self.text,
            voice: self.voice,
            rate: self.rate,
            volume: self.volume.clamp(0.0, 1.0),
            force_local_only: self.force_local_only,
            allow_fallback: self.allow_fallback,
        };
        (job, self.callbacks)
    }
}

/// Settles when the request completes, fails or is aborted
///
/// Resolves to `Ok(())` on completion and to the classified error otherwise.
#[derive(Debug)]
#[must_use = "a ticket does nothing unless awaited; dropping it does not cancel the request"]
pub struct SpeechTicket {
    rx: oneshot::Receiver<Result<()>>,
}

impl Future for SpeechTicket {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|settled| settled.unwrap_or_else(|_| Err(Error::Abort(REASON_DISPOSED.to_string()))))
    }
}

struct Queued {
    request: SpeakRequest,
    reply: oneshot::Sender<Result<()>>,
}

impl Queued {
    fn abort(self, reason: &str) {
        let _ = self.reply.send(Err(Error::Abort(reason.to_string())));
    }
}

struct ActiveRequest {
    /// Dequeue counter, identifies this request within the queue
    serial: u64,
    /// `None` until the status store assigned the id
    id: Option<RequestId>,
    token: CancellationToken,
    cancel_reason: Option<String>,
}

impl ActiveRequest {
    fn cancel(&mut self, reason: &str) {
        self.cancel_reason.get_or_insert_with(|| reason.to_string());
        self.token.cancel();
    }
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<Queued>,
    active: Option<ActiveRequest>,
    dequeued: u64,
    closed: bool,
}

/// FIFO speech queue and its processing loop
pub struct SpeechQueue {
    state: Mutex<QueueState>,
    wake: Notify,
    status: StatusStore,
    gate: ReverbGate,
    listener: ListenerCoordinator,
    backends: Backends,
    echo: Mutex<EchoFilter>,
}

impl std::fmt::Debug for SpeechQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeechQueue")
            .field("pending", &self.len())
            .field("backends", &self.backends)
            .finish_non_exhaustive()
    }
}

impl SpeechQueue {
    /// Create a queue over the shared collaborators
    #[must_use]
    pub fn new(
        status: StatusStore,
        gate: ReverbGate,
        listener: ListenerCoordinator,
        backends: Backends,
        echo: EchoFilter,
    ) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            wake: Notify::new(),
            status,
            gate,
            listener,
            backends,
            echo: Mutex::new(echo),
        }
    }

    /// Append a request
    ///
    /// Never fails here; the ticket carries the outcome. Blank text settles
    /// immediately with `Ok(())` without consuming a request id.
    pub fn enqueue(&self, request: SpeakRequest) -> SpeechTicket {
        let (reply, rx) = oneshot::channel();
        let ticket = SpeechTicket { rx };

        if request.text.trim().is_empty() {
            let _ = reply.send(Ok(()));
            return ticket;
        }

        let superseded = {
            let mut state = self.lock();
            if state.closed {
                drop(state);
                let _ = reply.send(Err(Error::Abort(REASON_DISPOSED.to_string())));
                return ticket;
            }

            let superseded: Vec<Queued> = if request.interrupt {
                if let Some(active) = state.active.as_mut() {
                    active.cancel(REASON_SUPERSEDED);
                }
                state.pending.drain(..).collect()
            } else {
                Vec::new()
            };

            state.pending.push_back(Queued { request, reply });
            superseded
        };

        if !superseded.is_empty() {
            tracing::debug!(count = superseded.len(), "superseded queued speech");
        }
        for item in superseded {
            item.abort(REASON_SUPERSEDED);
        }

        self.wake.notify_one();
        ticket
    }

    /// Clear the queue and cancel whatever is active
    ///
    /// Every outstanding ticket settles with `AbortError(reason)`. The gate
    /// clear and recognizer resume are scheduled right away.
    pub fn stop(&self, reason: &str) {
        let (drained, active_id) = self.cancel_everything(reason);

        self.backends.cancel_all();
        if let Some(id) = active_id {
            self.status.update_if_current(id, mark_idle);
        }
        self.status.record_cancel_reason(reason);

        if self.gate.is_gated() && !self.gate.clear_pending() {
            self.gate.schedule_default_clear();
        }
        self.listener.force_resume();

        tracing::debug!(reason, drained = drained.len(), "speech stopped");
        for item in drained {
            item.abort(reason);
        }
    }

    /// Refuse further requests and abort everything outstanding
    pub fn close(&self) {
        self.lock().closed = true;
        let (drained, _) = self.cancel_everything(REASON_DISPOSED);
        self.backends.cancel_all();
        for item in drained {
            item.abort(REASON_DISPOSED);
        }
    }

    /// Requests waiting behind the active one
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    /// Whether nothing is waiting
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The configured backends
    #[must_use]
    pub const fn backends(&self) -> &Backends {
        &self.backends
    }

    /// Whether `transcript` repeats recently spoken text
    #[must_use]
    pub fn is_probable_echo(&self, transcript: &str) -> bool {
        self.echo
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .is_echo(transcript)
    }

    /// Drain the queue forever, one request at a time
    pub async fn run(self: Arc<Self>) {
        loop {
            match self.next() {
                Some((item, serial, token)) => self.process(item, serial, token).await,
                None => self.wake.notified().await,
            }
        }
    }

    /// Pop the head and mark it active in one step, so a concurrent
    /// `stop()` either drains it or cancels it
    fn next(&self) -> Option<(Queued, u64, CancellationToken)> {
        let mut state = self.lock();
        let item = state.pending.pop_front()?;
        state.dequeued += 1;
        let serial = state.dequeued;
        let token = CancellationToken::new();
        if let Some(mut previous) = state.active.replace(ActiveRequest {
            serial,
            id: None,
            token: token.clone(),
            cancel_reason: None,
        }) {
            previous.cancel(REASON_SUPERSEDED);
        }
        Some((item, serial, token))
    }

    async fn process(&self, item: Queued, serial: u64, token: CancellationToken) {
        let Queued { request, reply } = item;

        let id = self.status.begin_request();
        {
            let mut state = self.lock();
            if let Some(active) = state.active.as_mut().filter(|a| a.serial == serial) {
                active.id = Some(id);
            }
        }

        // Clean slate, even if the previous request finished on its own
        self.backends.cancel_all();
        self.listener.pause_for_request(id);
        self.gate.set_gate();

        let (job, mut callbacks) = request.into_job(id);
        tracing::debug!(request_id = id, chars = job.text.len(), "processing speech request");

        let outcome = self.drive(&job, &mut callbacks, serial, &token).await;

        {
            let mut state = self.lock();
            if state.active.as_ref().is_some_and(|a| a.serial == serial) {
                state.active = None;
            }
        }

        self.status.update_if_current(id, mark_idle);
        match &outcome {
            Ok(()) => {
                tracing::debug!(request_id = id, "speech completed");
                if let Some(on_end) = callbacks.on_end.take() {
                    on_end();
                }
            }
            Err(e) if e.is_abort() => {
                tracing::debug!(request_id = id, reason = %e, "speech aborted");
                self.backends.cancel_all();
                self.status.record_cancel_reason(e.cancel_reason());
            }
            Err(e) => {
                tracing::warn!(request_id = id, error = %e, "speech failed");
                self.status.record_cancel_reason(e.cancel_reason());
                if let Some(on_error) = callbacks.on_error.take() {
                    on_error(e);
                }
            }
        }

        if !self.gate.clear_pending() {
            self.gate.schedule_default_clear();
        }
        self.listener.resume_if_needed(id);

        let _ = reply.send(outcome);
    }

    /// Run the backend chain while applying its events
    async fn drive(
        &self,
        job: &SpeechJob,
        callbacks: &mut Callbacks,
        serial: u64,
        token: &CancellationToken,
    ) -> Result<()> {
        let (events, mut rx) = EventSink::channel(job.request_id);
        let speak = self.backends.speak(job, &events);
        tokio::pin!(speak);

        loop {
            tokio::select! {
                biased;
                () = token.cancelled() => {
                    return Err(Error::Abort(self.cancel_reason(serial)));
                }
                Some(event) = rx.recv() => self.apply_event(event, job, callbacks),
                outcome = &mut speak => {
                    while let Ok(event) = rx.try_recv() {
                        self.apply_event(event, job, callbacks);
                    }
                    return outcome;
                }
            }
        }
    }

    fn apply_event(&self, event: BackendEvent, job: &SpeechJob, callbacks: &mut Callbacks) {
        match event.kind {
            BackendEventKind::Started(backend) => {
                let applied = event.request_id == job.request_id
                    && self.status.update_if_current(event.request_id, |s| {
                        s.is_loading = false;
                        s.is_speaking = true;
                        s.backend = backend;
                    });
                if !applied {
                    tracing::trace!(request_id = event.request_id, "dropping stale start event");
                    return;
                }

                self.gate.set_gate();
                self.echo
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner)
                    .record(&job.text);
                tracing::debug!(request_id = job.request_id, %backend, "speech started");

                if let Some(on_start) = callbacks.on_start.take() {
                    on_start();
                }
            }
            BackendEventKind::Ended(backend) => {
                tracing::trace!(request_id = event.request_id, %backend, "backend finished");
            }
        }
    }

    fn cancel_reason(&self, serial: u64) -> String {
        self.lock()
            .active
            .as_ref()
            .filter(|a| a.serial == serial)
            .and_then(|a| a.cancel_reason.clone())
            .unwrap_or_else(|| REASON_SUPERSEDED.to_string())
    }

    fn cancel_everything(&self, reason: &str) -> (Vec<Queued>, Option<RequestId>) {
        let mut state = self.lock();
        let drained: Vec<Queued> = state.pending.drain(..).collect();
        let active_id = state.active.as_mut().and_then(|active| {
            active.cancel(reason);
            active.id
        });
        (drained, active_id)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

fn mark_idle(status: &mut SessionStatus) {
    status.is_loading = false;
    status.is_speaking = false;
    status.backend = Backend::None;
}
