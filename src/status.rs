//! Observable coordinator state
//!
//! The status store holds the single [`SessionStatus`] snapshot for the
//! process. Writers that act on behalf of a request go through
//! [`StatusStore::update_if_current`], so results from a superseded request
//! can never overwrite the state of the live one.

use std::fmt;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::watch;

/// Monotonic identifier assigned to a speak request when it is dequeued
pub type RequestId = u64;

/// Synthesis backend currently driving the speaker
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// Nothing is being synthesized
    #[default]
    None,
    /// Network synthesis played through the speaker
    Remote,
    /// On-device voice engine
    Local,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Remote => write!(f, "remote"),
            Self::Local => write!(f, "local"),
        }
    }
}

/// Snapshot of the coordinator state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    /// A backend has reported that audio started
    pub is_speaking: bool,
    /// A request was dequeued and is waiting for audio to start
    pub is_loading: bool,
    /// Backend driving the current request
    pub backend: Backend,
    /// Id of the most recently dequeued request (0 before the first)
    pub request_id: RequestId,
    /// Reason of the most recent terminal error or stop
    pub last_cancel_reason: Option<String>,
    /// The recognition controller is believed to be listening
    pub is_listening: bool,
}

/// A registered listener and the sequence number it last saw
struct Delivery {
    listener: Box<dyn Fn(&SessionStatus) + Send + Sync>,
    last_seen: Mutex<u64>,
}

impl Delivery {
    /// Call the listener unless it already saw a newer snapshot
    fn deliver(&self, seq: u64, status: &SessionStatus) {
        let mut last_seen = self
            .last_seen
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if seq <= *last_seen {
            return;
        }
        *last_seen = seq;
        (self.listener)(status);
    }
}

struct Inner {
    status: SessionStatus,
    /// Bumped on every committed change; the initial snapshot is 1
    seq: u64,
    listeners: Vec<(u64, Arc<Delivery>)>,
    next_listener: u64,
}

/// Shared observable state store
///
/// Cloning yields another handle to the same state.
#[derive(Clone)]
pub struct StatusStore {
    inner: Arc<Mutex<Inner>>,
    tx: Arc<watch::Sender<SessionStatus>>,
}

impl Default for StatusStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StatusStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusStore")
            .field("status", &self.snapshot())
            .finish_non_exhaustive()
    }
}

impl StatusStore {
    /// Create a store in the idle state
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(SessionStatus::default());
        Self {
            inner: Arc::new(Mutex::new(Inner {
                status: SessionStatus::default(),
                seq: 1,
                listeners: Vec::new(),
                next_listener: 0,
            })),
            tx: Arc::new(tx),
        }
    }

    /// Current snapshot
    #[must_use]
    pub fn snapshot(&self) -> SessionStatus {
        self.lock().status.clone()
    }

    /// Register a listener
    ///
    /// The listener is called immediately with the current snapshot and then
    /// after every change. Listeners run outside the store lock, so they may
    /// read the store again, but they must not write to it.
    ///
    /// Each listener sees snapshots in commit order. When writers on
    /// different threads race, a listener may skip an intermediate snapshot
    /// but never receives an older one after a newer one.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&SessionStatus) + Send + Sync + 'static,
    {
        let delivery = Arc::new(Delivery {
            listener: Box::new(listener),
            last_seen: Mutex::new(0),
        });
        let (id, seq, snapshot) = {
            let mut inner = self.lock();
            let id = inner.next_listener;
            inner.next_listener += 1;
            inner.listeners.push((id, Arc::clone(&delivery)));
            (id, inner.seq, inner.status.clone())
        };

        delivery.deliver(seq, &snapshot);

        Subscription {
            id,
            store: Arc::downgrade(&self.inner),
        }
    }

    /// Receiver that observes every snapshot
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<SessionStatus> {
        self.tx.subscribe()
    }

    /// Advance to a new request and enter the loading state
    ///
    /// Returns the id assigned to the request.
    pub fn begin_request(&self) -> RequestId {
        let mut id = 0;
        self.mutate(|status| {
            status.request_id += 1;
            status.is_loading = true;
            status.is_speaking = false;
            status.backend = Backend::None;
            id = status.request_id;
        });
        id
    }

    /// Apply `f` only while `id` is still the live request
    ///
    /// Returns `false` (and leaves the state untouched) for stale ids.
    pub fn update_if_current<F>(&self, id: RequestId, f: F) -> bool
    where
        F: FnOnce(&mut SessionStatus),
    {
        let mut applied = false;
        self.mutate(|status| {
            if status.request_id == id {
                f(status);
                applied = true;
            }
        });
        applied
    }

    /// Record a cancellation or error reason regardless of request
    pub fn record_cancel_reason(&self, reason: impl Into<String>) {
        let reason = reason.into();
        self.mutate(|status| status.last_cancel_reason = Some(reason));
    }

    /// Update the listening flag
    pub fn set_listening(&self, listening: bool) {
        self.mutate(|status| status.is_listening = listening);
    }

    /// Number of registered listeners
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }

    /// Drop every listener
    pub fn clear_listeners(&self) {
        self.lock().listeners.clear();
    }

    fn mutate<F>(&self, f: F)
    where
        F: FnOnce(&mut SessionStatus),
    {
        let (seq, snapshot, targets) = {
            let mut inner = self.lock();
            let before = inner.status.clone();
            f(&mut inner.status);
            if inner.status == before {
                return;
            }
            inner.seq += 1;
            // The watch channel is published in commit order
            self.tx.send_replace(inner.status.clone());
            let targets: Vec<Arc<Delivery>> =
                inner.listeners.iter().map(|(_, d)| Arc::clone(d)).collect();
            (inner.seq, inner.status.clone(), targets)
        };

        for target in targets {
            target.deliver(seq, &snapshot);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Handle returned by [`StatusStore::subscribe`]
///
/// Dropping the handle keeps the listener registered; call
/// [`Subscription::unsubscribe`] to remove it.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    store: std::sync::Weak<Mutex<Inner>>,
}

impl Subscription {
    /// Remove the listener. Safe to call after the store is gone.
    pub fn unsubscribe(self) {
        if let Some(inner) = self.store.upgrade() {
            let mut inner = inner
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            inner.listeners.retain(|(id, _)| *id != self.id);
        }
    }
}
