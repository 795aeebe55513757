//! Pauses and resumes the external recognition engine around playback

use std::sync::{Arc, Mutex};

use crate::gate::ReverbGate;
use crate::status::{RequestId, StatusStore};
use crate::timer::ScheduledTask;

/// Control surface of the external speech recognition engine
///
/// The coordinator calls nothing else on the engine.
pub trait SttController: Send + Sync {
    /// Stop capturing input
    fn stop_listening(&self);

    /// Resume capturing input
    fn resume_listening(&self);

    /// Whether the engine is capturing input right now
    fn is_listening(&self) -> bool;
}

/// Who is responsible for turning recognition back on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PausedBy {
    Request(RequestId),
    Stop,
}

#[derive(Default)]
struct ListenerState {
    controller: Option<Arc<dyn SttController>>,
    paused_by: Option<PausedBy>,
}

/// Keeps recognition off while the coordinator is speaking
///
/// Resumption waits for the reverb gate, so the engine never hears the tail
/// of synthesized speech.
#[derive(Clone)]
pub struct ListenerCoordinator {
    state: Arc<Mutex<ListenerState>>,
    resume: ScheduledTask,
    gate: ReverbGate,
    status: StatusStore,
}

impl std::fmt::Debug for ListenerCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("ListenerCoordinator")
            .field("registered", &state.controller.is_some())
            .field("paused_by", &state.paused_by)
            .finish_non_exhaustive()
    }
}

impl ListenerCoordinator {
    /// Create a coordinator with no controller registered
    #[must_use]
    pub fn new(gate: ReverbGate, status: StatusStore) -> Self {
        Self {
            state: Arc::new(Mutex::new(ListenerState::default())),
            resume: ScheduledTask::new(),
            gate,
            status,
        }
    }

    /// Register the recognition controller; the last registration wins
    ///
    /// A controller that is listening while speech is playing, or while the
    /// reverb gate is closed, is paused on behalf of the live request.
    pub fn register(&self, controller: Arc<dyn SttController>) {
        let status = self.status.snapshot();
        let busy = status.is_speaking || status.is_loading;
        let pause = controller.is_listening() && (busy || self.gate.is_gated());
        let owner = PausedBy::Request(status.request_id);
        {
            let mut state = self.lock();
            if state.controller.is_some() {
                tracing::debug!("replacing registered stt controller");
            }
            state.controller = Some(Arc::clone(&controller));
            state.paused_by = pause.then_some(owner);
        }
        self.resume.cancel();

        if !pause {
            self.status.set_listening(controller.is_listening());
            return;
        }

        controller.stop_listening();
        self.status.set_listening(false);
        tracing::debug!(request_id = status.request_id, "paused newly registered recognition");

        // The request may have finished before it could see the pause
        let now = self.status.snapshot();
        if !(now.is_speaking || now.is_loading) {
            self.schedule_resume(owner);
        }
    }

    /// Stop recognition for the duration of request `id`
    ///
    /// If recognition is already paused on behalf of an earlier request,
    /// responsibility for resuming it moves to `id`.
    pub fn pause_for_request(&self, id: RequestId) {
        self.resume.cancel();

        let mut state = self.lock();
        let Some(controller) = state.controller.clone() else {
            return;
        };

        if controller.is_listening() {
            state.paused_by = Some(PausedBy::Request(id));
            drop(state);
            controller.stop_listening();
            self.status.set_listening(false);
            tracing::debug!(request_id = id, "paused recognition for playback");
        } else if state.paused_by.is_some() {
            state.paused_by = Some(PausedBy::Request(id));
            tracing::trace!(request_id = id, "took over pending recognition resume");
        }
    }

    /// Resume recognition once request `id` has finished
    ///
    /// Does nothing if `id` did not pause recognition or was superseded.
    /// Otherwise resumes when the reverb gate opens.
    pub fn resume_if_needed(&self, id: RequestId) {
        self.schedule_resume(PausedBy::Request(id));
    }

    /// Resume recognition after an explicit stop, whoever paused it
    pub fn force_resume(&self) {
        {
            let mut state = self.lock();
            if state.paused_by.is_none() {
                return;
            }
            state.paused_by = Some(PausedBy::Stop);
        }
        self.schedule_resume(PausedBy::Stop);
    }

    /// Cancel any pending resume and forget the controller
    pub fn dispose(&self) {
        self.resume.cancel();
        let mut state = self.lock();
        state.controller = None;
        state.paused_by = None;
    }

    fn schedule_resume(&self, owner: PausedBy) {
        if self.lock().paused_by != Some(owner) {
            return;
        }

        let delay = self.gate.remaining().unwrap_or_else(|| self.gate.window());
        let this = self.clone();
        self.resume.schedule(delay, move || this.resume_now(owner));
    }

    fn resume_now(&self, owner: PausedBy) {
        if self.gate.is_gated() {
            // Clear was pushed back; follow it. Gated with no clear means new
            // speech started and owns the resume now.
            if self.gate.remaining().is_some() {
                self.schedule_resume(owner);
            } else {
                tracing::trace!(?owner, "reverb gate closed again, skipping resume");
            }
            return;
        }

        let controller = {
            let mut state = self.lock();
            if state.paused_by != Some(owner) {
                return;
            }
            state.paused_by = None;
            state.controller.clone()
        };

        if let Some(controller) = controller {
            controller.resume_listening();
            self.status.set_listening(true);
            tracing::debug!(?owner, "resumed recognition");
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ListenerState> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
