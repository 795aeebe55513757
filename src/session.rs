//! Exclusive ownership of the recognition (input) channel

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use crate::{Error, Result};

/// Identifier of a recognition session
pub type SessionId = u64;

/// An active claim on the input channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SttSession {
    /// Monotonic session id
    pub id: SessionId,
    /// Who claimed the channel (e.g. "push-to-talk")
    pub source: String,
    /// When the claim was made
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct MutexState {
    active: Option<SttSession>,
    last_id: SessionId,
}

/// Single-session arbiter for the input channel
///
/// Never blocks or queues: a second claim while one is active is refused.
#[derive(Debug, Clone, Default)]
pub struct SessionMutex {
    state: Arc<Mutex<MutexState>>,
}

impl SessionMutex {
    /// Create an arbiter with no active session
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the input channel
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionConflict`] if a session is already active
    pub fn claim(&self, source: &str) -> Result<SttSession> {
        let mut state = self.lock();
        if let Some(active) = &state.active {
            return Err(Error::SessionConflict(format!(
                "session {} held by '{}'",
                active.id, active.source
            )));
        }

        state.last_id += 1;
        let session = SttSession {
            id: state.last_id,
            source: source.to_string(),
            started_at: Utc::now(),
        };
        state.active = Some(session.clone());
        drop(state);

        tracing::debug!(session_id = session.id, source, "stt session started");
        Ok(session)
    }

    /// Claim the input channel, returning `None` when it is busy
    pub fn begin_session(&self, source: &str) -> Option<SessionId> {
        match self.claim(source) {
            Ok(session) => Some(session.id),
            Err(e) => {
                tracing::debug!(source, error = %e, "stt session refused");
                None
            }
        }
    }

    /// Release the input channel
    ///
    /// Ignored unless `id` is the active session, so a late or duplicate end
    /// call cannot release a newer session. Returns whether it was released.
    pub fn end_session(&self, id: SessionId, reason: &str) -> bool {
        let mut state = self.lock();
        if state.active.as_ref().is_some_and(|s| s.id == id) {
            state.active = None;
            drop(state);
            tracing::debug!(session_id = id, reason, "stt session ended");
            true
        } else {
            tracing::trace!(session_id = id, reason, "ignoring stale stt session end");
            false
        }
    }

    /// Currently active session
    #[must_use]
    pub fn active(&self) -> Option<SttSession> {
        self.lock().active.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MutexState> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_claim_is_refused() {
        let mutex = SessionMutex::new();
        let first = mutex.begin_session("a").unwrap();
        assert!(mutex.begin_session("b").is_none());

        assert!(mutex.end_session(first, "done"));
        let next = mutex.begin_session("b").unwrap();
        assert!(next > first);
    }

    #[test]
    fn stale_end_does_not_release_newer_session() {
        let mutex = SessionMutex::new();
        let first = mutex.begin_session("a").unwrap();
        mutex.end_session(first, "done");
        let second = mutex.begin_session("b").unwrap();

        assert!(!mutex.end_session(first, "late"));
        assert_eq!(mutex.active().map(|s| s.id), Some(second));
    }

    #[test]
    fn claim_reports_conflict() {
        let mutex = SessionMutex::new();
        let _held = mutex.claim("mic").unwrap();
        let err = mutex.claim("wake-word").unwrap_err();
        assert!(matches!(err, Error::SessionConflict(_)));
        assert_eq!(err.kind(), "SessionConflictError");
    }
}
