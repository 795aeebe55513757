//! Reverb gate: suppresses recognized input right after synthesized speech
//!
//! The gate closes whenever speech starts and only opens after a full
//! quiet window has passed since the last close. Re-closing while a clear is
//! pending pushes the opening time forward, never backward.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

use crate::timer::ScheduledTask;

/// Default suppression window after speech ends
pub const DEFAULT_GATE_WINDOW: Duration = Duration::from_millis(600);

#[derive(Debug, Default)]
struct GateState {
    gated: bool,
    pending_clear: Option<Instant>,
}

/// Re-armable timed suppression flag
#[derive(Debug, Clone)]
pub struct ReverbGate {
    state: Arc<Mutex<GateState>>,
    clear: ScheduledTask,
    window: Duration,
}

impl Default for ReverbGate {
    fn default() -> Self {
        Self::new(DEFAULT_GATE_WINDOW)
    }
}

impl ReverbGate {
    /// Create an open gate whose default clear window is `window`
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(GateState::default())),
            clear: ScheduledTask::new(),
            window,
        }
    }

    /// Default quiet window used by [`ReverbGate::schedule_default_clear`]
    #[must_use]
    pub const fn window(&self) -> Duration {
        self.window
    }

    /// Close the gate and cancel any pending clear
    pub fn set_gate(&self) {
        let mut state = self.lock();
        let was_pending = state.pending_clear.take().is_some();
        state.gated = true;
        drop(state);

        self.clear.cancel();
        tracing::trace!(was_pending, "reverb gate closed");
    }

    /// Open the gate after `delay` unless it is closed again first
    ///
    /// Calling this again restarts the window from now.
    pub fn schedule_clear(&self, delay: Duration) {
        let deadline = Instant::now() + delay;
        self.lock().pending_clear = Some(deadline);

        let state = Arc::clone(&self.state);
        self.clear.schedule_at(deadline, move || {
            let mut state = state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            if state.pending_clear == Some(deadline) {
                state.gated = false;
                state.pending_clear = None;
                tracing::trace!("reverb gate opened");
            }
        });
    }

    /// [`ReverbGate::schedule_clear`] with the configured window
    pub fn schedule_default_clear(&self) {
        self.schedule_clear(self.window);
    }

    /// Whether recognized input should currently be discarded
    ///
    /// Reads the deadline directly, so the answer is exact even before the
    /// clear task has had a chance to run.
    #[must_use]
    pub fn is_gated(&self) -> bool {
        let state = self.lock();
        match state.pending_clear {
            Some(deadline) => state.gated && Instant::now() < deadline,
            None => state.gated,
        }
    }

    /// Time left until the gate opens
    ///
    /// `None` when the gate is closed with no clear scheduled; zero when it is
    /// already open.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        let state = self.lock();
        if !state.gated {
            return Some(Duration::ZERO);
        }
        state
            .pending_clear
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Whether a clear is scheduled
    #[must_use]
    pub fn clear_pending(&self) -> bool {
        self.lock().pending_clear.is_some()
    }

    /// Cancel timers and open the gate
    pub fn reset(&self) {
        self.clear.cancel();
        let mut state = self.lock();
        state.gated = false;
        state.pending_clear = None;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
