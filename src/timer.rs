//! Cancellable, resettable scheduled tasks
//!
//! Delays are driven by `tokio::time`, so tests can pause the clock and
//! advance it to assert exact firing times.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;

#[derive(Default)]
struct Slot {
    handle: Option<JoinHandle<()>>,
    deadline: Option<Instant>,
    generation: u64,
}

/// A single pending action that can be rescheduled or cancelled
///
/// Scheduling again replaces the pending action. Must be used from within a
/// tokio runtime.
#[derive(Clone, Default)]
pub struct ScheduledTask {
    slot: Arc<Mutex<Slot>>,
}

impl std::fmt::Debug for ScheduledTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduledTask")
            .field("deadline", &self.deadline())
            .finish()
    }
}

impl ScheduledTask {
    /// Create an idle task
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `action` after `delay`, replacing anything already pending
    pub fn schedule<F>(&self, delay: Duration, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.schedule_at(Instant::now() + delay, action);
    }

    /// Run `action` at `deadline`, replacing anything already pending
    pub fn schedule_at<F>(&self, deadline: Instant, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut slot = self.lock();
        if let Some(handle) = slot.handle.take() {
            handle.abort();
        }
        slot.generation += 1;
        slot.deadline = Some(deadline);

        let generation = slot.generation;
        let owner = Arc::clone(&self.slot);
        slot.handle = Some(tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            {
                let mut slot = owner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
                if slot.generation != generation {
                    return;
                }
                slot.handle = None;
                slot.deadline = None;
            }
            action();
        }));
    }

    /// Cancel the pending action
    ///
    /// Returns `true` if something was pending.
    pub fn cancel(&self) -> bool {
        let mut slot = self.lock();
        slot.generation += 1;
        slot.deadline = None;
        slot.handle.take().is_some_and(|handle| {
            handle.abort();
            true
        })
    }

    /// Whether an action is waiting to fire
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.lock().deadline.is_some()
    }

    /// When the pending action fires
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.lock().deadline
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn settle() {
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fires_after_delay() {
        let task = ScheduledTask::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        task.schedule(Duration::from_millis(100), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(task.is_pending());

        tokio::time::advance(Duration::from_millis(99)).await;
        settle().await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::advance(Duration::from_millis(1)).await;
        settle().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!task.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn reschedule_replaces_pending_action() {
        let task = ScheduledTask::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let first = Arc::clone(&fired);
        task.schedule(Duration::from_millis(100), move || {
            first.fetch_add(1, Ordering::SeqCst);
        });
        let second = Arc::clone(&fired);
        task.schedule(Duration::from_millis(300), move || {
            second.fetch_add(10, Ordering::SeqCst);
        });

        tokio::time::advance(Duration::from_millis(150)).await;
        settle().await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::advance(Duration::from_millis(150)).await;
        settle().await;
        assert_eq!(fired.load(Ordering::SeqCst), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_prevents_firing() {
        let task = ScheduledTask::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        task.schedule(Duration::from_millis(50), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(task.cancel());
        assert!(!task.cancel());

        tokio::time::advance(Duration::from_millis(100)).await;
        settle().await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
