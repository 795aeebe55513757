//! Coordinator integration tests
//!
//! Drive the public API against fake backends on a paused clock

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio_test::{assert_pending, assert_ready, assert_ready_err};
use voxgate::{Backend, Backends, Coordinator, Error, SessionStatus, SpeakRequest, StatusStore};

mod common;

use common::{FakeFetcher, FakeSink, FakeStt, settle};

fn remote_only(fetch: Duration, play: Duration) -> (Coordinator, Arc<FakeFetcher>, Arc<FakeSink>) {
    let fetcher = FakeFetcher::new(fetch);
    let sink = FakeSink::new(play);
    let coordinator =
        common::coordinator(Backends::new(Some(common::remote(&fetcher, &sink)), None));
    (coordinator, fetcher, sink)
}

fn abort_reason(result: &voxgate::Result<()>) -> Option<&str> {
    match result {
        Err(Error::Abort(reason)) => Some(reason.as_str()),
        _ => None,
    }
}

#[tokio::test(start_paused = true)]
async fn test_speak_completes_via_remote() {
    let (coordinator, fetcher, sink) =
        remote_only(Duration::from_millis(200), Duration::from_secs(1));
    let (statuses, _subscription) = common::record_statuses(&coordinator);
    let (starts, on_start) = common::counter();
    let (ends, on_end) = common::counter();

    coordinator
        .speak(SpeakRequest::new("Hello there").on_start(on_start).on_end(on_end))
        .await
        .unwrap();

    assert_eq!(starts.load(Ordering::SeqCst), 1);
    assert_eq!(ends.load(Ordering::SeqCst), 1);
    assert_eq!(fetcher.texts(), vec!["Hello there"]);
    assert_eq!(sink.plays.load(Ordering::SeqCst), 1);

    let statuses = statuses.lock().unwrap();
    assert!(statuses.iter().all(|s| !(s.is_speaking && s.is_loading)));
    assert!(statuses.iter().any(|s| s.is_loading && s.request_id == 1));
    assert!(
        statuses
            .iter()
            .any(|s| s.is_speaking && s.backend == Backend::Remote)
    );

    let speaking_edges = statuses
        .windows(2)
        .filter(|w| !w[0].is_speaking && w[1].is_speaking)
        .count();
    assert_eq!(speaking_edges, 1);

    let last = statuses.last().unwrap();
    assert!(!last.is_speaking && !last.is_loading);
    assert_eq!(last.backend, Backend::None);
    assert_eq!(last.request_id, 1);
    assert_eq!(last.last_cancel_reason, None);
}

#[test]
fn test_stale_request_updates_are_noops() {
    let store = StatusStore::new();
    let first = store.begin_request();
    let second = store.begin_request();
    let before = store.snapshot();

    assert!(!store.update_if_current(first, |s| {
        s.is_loading = false;
        s.is_speaking = true;
    }));
    assert_eq!(store.snapshot(), before);

    assert!(store.update_if_current(second, |s| s.is_loading = false));
    assert!(!store.snapshot().is_loading);
}

#[tokio::test(start_paused = true)]
async fn test_stop_when_idle_only_records_reason() {
    let (coordinator, _fetcher, _sink) =
        remote_only(Duration::from_millis(10), Duration::from_millis(10));
    let stt = FakeStt::listening();
    coordinator.register_stt_controller(stt.clone());

    let before = coordinator.status();
    coordinator.stop("user");
    let after = coordinator.status();

    assert_eq!(after.last_cancel_reason.as_deref(), Some("user"));
    assert_eq!(
        SessionStatus {
            last_cancel_reason: None,
            ..after.clone()
        },
        before
    );

    coordinator.stop("user");
    assert_eq!(coordinator.status(), after);
    assert!(!coordinator.is_gated());
    assert_eq!(stt.stops.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_rapid_requests_play_in_order() {
    let (coordinator, fetcher, _sink) =
        remote_only(Duration::from_millis(50), Duration::from_millis(100));
    let (statuses, _subscription) = common::record_statuses(&coordinator);

    let tickets: Vec<_> = (1..=5)
        .map(|i| coordinator.speak(SpeakRequest::new(format!("Message {i}"))))
        .collect();
    assert_eq!(coordinator.queue_len(), 5);

    let results = futures::future::join_all(tickets).await;
    assert!(results.iter().all(Result::is_ok));
    assert_eq!(
        fetcher.texts(),
        (1..=5).map(|i| format!("Message {i}")).collect::<Vec<_>>()
    );

    let status = coordinator.status();
    assert_eq!(status.request_id, 5);
    assert!(!status.is_speaking && !status.is_loading);
    assert_eq!(coordinator.queue_len(), 0);

    // One speaking transition per request, in request order
    let statuses = statuses.lock().unwrap();
    let speaking_ids: Vec<_> = statuses
        .windows(2)
        .filter(|w| !w[0].is_speaking && w[1].is_speaking)
        .map(|w| w[1].request_id)
        .collect();
    assert_eq!(speaking_ids, vec![1, 2, 3, 4, 5]);
}

#[tokio::test(start_paused = true)]
async fn test_rapid_interrupting_requests_keep_only_the_last() {
    let (coordinator, fetcher, _sink) =
        remote_only(Duration::from_millis(50), Duration::from_millis(100));

    let tickets: Vec<_> = (1..=5)
        .map(|i| coordinator.speak(SpeakRequest::new(format!("Message {i}")).interrupting()))
        .collect();

    let results = futures::future::join_all(tickets).await;
    for result in &results[..4] {
        assert_eq!(abort_reason(result), Some("superseded"));
    }
    assert!(results[4].is_ok());
    assert_eq!(fetcher.texts(), vec!["Message 5"]);
    assert_eq!(coordinator.status().request_id, 1);
}

#[tokio::test(start_paused = true)]
async fn test_speak_a_then_interrupting_b_supersedes_a() {
    let (coordinator, _fetcher, sink) =
        remote_only(Duration::from_millis(100), Duration::from_secs(5));
    let (errors, on_error) = common::counter();

    let first = tokio::spawn(
        coordinator.speak(SpeakRequest::new("First").on_error(move |_| on_error())),
    );
    settle().await;
    tokio::time::advance(Duration::from_millis(500)).await;
    settle().await;

    let status = coordinator.status();
    assert!(status.is_speaking);
    assert_eq!(status.backend, Backend::Remote);

    let second = coordinator.speak(SpeakRequest::new("Second").interrupting());
    let first = first.await.unwrap();
    assert_eq!(abort_reason(&first), Some("superseded"));

    second.await.unwrap();
    assert_eq!(errors.load(Ordering::SeqCst), 0);
    assert!(sink.stops.load(Ordering::SeqCst) >= 1);

    let status = coordinator.status();
    assert_eq!(status.request_id, 2);
    assert_eq!(status.last_cancel_reason.as_deref(), Some("superseded"));
}

#[tokio::test(start_paused = true)]
async fn test_stop_aborts_active_and_queued() {
    let (coordinator, _fetcher, _sink) =
        remote_only(Duration::from_millis(50), Duration::from_secs(5));

    let mut first = tokio_test::task::spawn(coordinator.speak(SpeakRequest::new("One")));
    let mut second = tokio_test::task::spawn(coordinator.speak(SpeakRequest::new("Two")));
    settle().await;
    tokio::time::advance(Duration::from_millis(100)).await;
    settle().await;

    assert_pending!(first.poll());
    assert_pending!(second.poll());
    assert_eq!(coordinator.queue_len(), 1);

    coordinator.stop("user");
    assert!(second.is_woken());
    let err = assert_ready_err!(second.poll());
    assert_eq!(err.cancel_reason(), "user");

    settle().await;
    let result = assert_ready!(first.poll());
    assert_eq!(abort_reason(&result), Some("user"));

    let status = coordinator.status();
    assert!(!status.is_speaking && !status.is_loading);
    assert_eq!(status.last_cancel_reason.as_deref(), Some("user"));
}

#[tokio::test(start_paused = true)]
async fn test_reverb_gate_holds_after_speech() {
    let (coordinator, _fetcher, _sink) =
        remote_only(Duration::from_millis(10), Duration::from_millis(100));
    assert!(!coordinator.is_gated());

    let ticket = tokio::spawn(coordinator.speak(SpeakRequest::new("Hello")));
    settle().await;
    assert!(coordinator.is_gated());

    ticket.await.unwrap().unwrap();
    assert!(coordinator.is_gated());

    tokio::time::advance(Duration::from_millis(599)).await;
    assert!(coordinator.is_gated());

    tokio::time::advance(Duration::from_millis(1)).await;
    assert!(!coordinator.is_gated());
}

#[tokio::test(start_paused = true)]
async fn test_reverb_gate_restarts_on_new_speech() {
    let (coordinator, _fetcher, _sink) =
        remote_only(Duration::from_millis(10), Duration::from_millis(100));

    coordinator.speak(SpeakRequest::new("One")).await.unwrap();
    tokio::time::advance(Duration::from_millis(300)).await;

    // Second utterance ends 110 ms later; the old window would close at +600
    coordinator.speak(SpeakRequest::new("Two")).await.unwrap();
    tokio::time::advance(Duration::from_millis(300)).await;
    assert!(coordinator.is_gated());

    tokio::time::advance(Duration::from_millis(299)).await;
    assert!(coordinator.is_gated());

    tokio::time::advance(Duration::from_millis(1)).await;
    assert!(!coordinator.is_gated());
}

#[tokio::test(start_paused = true)]
async fn test_listener_paused_during_speech_and_resumed_after_gate() {
    let (coordinator, _fetcher, _sink) =
        remote_only(Duration::from_millis(10), Duration::from_millis(100));
    let stt = FakeStt::listening();
    coordinator.register_stt_controller(stt.clone());
    assert!(coordinator.status().is_listening);

    let ticket = tokio::spawn(coordinator.speak(SpeakRequest::new("Hello")));
    settle().await;
    assert!(!stt.is_listening_now());
    assert!(!coordinator.status().is_listening);

    ticket.await.unwrap().unwrap();
    settle().await;
    assert!(!stt.is_listening_now());

    tokio::time::advance(Duration::from_millis(599)).await;
    settle().await;
    assert!(!stt.is_listening_now());

    tokio::time::advance(Duration::from_millis(1)).await;
    settle().await;
    assert!(stt.is_listening_now());
    assert_eq!(stt.resumes.load(Ordering::SeqCst), 1);
    assert!(coordinator.status().is_listening);
}

#[tokio::test(start_paused = true)]
async fn test_listener_stays_off_between_queued_requests() {
    let (coordinator, _fetcher, _sink) =
        remote_only(Duration::from_millis(10), Duration::from_millis(100));
    let stt = FakeStt::listening();
    coordinator.register_stt_controller(stt.clone());

    let first = coordinator.speak(SpeakRequest::new("One"));
    let second = coordinator.speak(SpeakRequest::new("Two"));
    first.await.unwrap();
    second.await.unwrap();
    settle().await;

    assert_eq!(stt.stops.load(Ordering::SeqCst), 1);
    assert_eq!(stt.resumes.load(Ordering::SeqCst), 0);

    tokio::time::advance(Duration::from_millis(600)).await;
    settle().await;
    assert_eq!(stt.resumes.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_resumes_listener_after_gate() {
    let (coordinator, _fetcher, _sink) =
        remote_only(Duration::from_millis(10), Duration::from_secs(5));
    let stt = FakeStt::listening();
    coordinator.register_stt_controller(stt.clone());

    let ticket = tokio::spawn(coordinator.speak(SpeakRequest::new("A long answer")));
    settle().await;
    tokio::time::advance(Duration::from_millis(100)).await;
    settle().await;
    assert!(coordinator.status().is_speaking);

    coordinator.stop("user");
    let result = ticket.await.unwrap();
    assert_eq!(abort_reason(&result), Some("user"));
    assert!(!stt.is_listening_now());

    tokio::time::advance(Duration::from_millis(600)).await;
    settle().await;
    assert!(stt.is_listening_now());
    assert!(!coordinator.is_gated());
}

#[tokio::test]
async fn test_single_stt_session() {
    let coordinator = common::coordinator(Backends::default());

    let first = coordinator.begin_stt_session("push-to-talk").unwrap();
    assert!(coordinator.begin_stt_session("wake-word").is_none());

    let err = coordinator.claim_stt_session("wake-word").unwrap_err();
    assert_eq!(err.kind(), "SessionConflictError");

    assert!(!coordinator.end_stt_session(first + 100, "stale"));
    assert_eq!(coordinator.active_stt_session().unwrap().id, first);

    assert!(coordinator.end_stt_session(first, "done"));
    assert!(coordinator.active_stt_session().is_none());

    let second = coordinator.begin_stt_session("wake-word").unwrap();
    assert_ne!(first, second);
}

#[tokio::test(start_paused = true)]
async fn test_dispose_aborts_everything() {
    let (coordinator, _fetcher, _sink) =
        remote_only(Duration::from_millis(10), Duration::from_secs(5));

    let first = tokio::spawn(coordinator.speak(SpeakRequest::new("One")));
    let second = tokio::spawn(coordinator.speak(SpeakRequest::new("Two")));
    settle().await;
    tokio::time::advance(Duration::from_millis(100)).await;
    settle().await;

    coordinator.dispose();
    coordinator.dispose();
    assert!(coordinator.is_disposed());

    assert_eq!(abort_reason(&first.await.unwrap()), Some("disposed"));
    assert_eq!(abort_reason(&second.await.unwrap()), Some("disposed"));

    let late = coordinator.speak(SpeakRequest::new("Three")).await;
    assert_eq!(abort_reason(&late), Some("disposed"));
    assert!(!coordinator.is_gated());
}

#[tokio::test(start_paused = true)]
async fn test_blank_text_resolves_without_a_request() {
    let (coordinator, fetcher, _sink) =
        remote_only(Duration::from_millis(10), Duration::from_millis(10));

    coordinator.speak(SpeakRequest::new("   ")).await.unwrap();
    assert!(fetcher.texts().is_empty());
    assert_eq!(coordinator.status().request_id, 0);
}

#[tokio::test(start_paused = true)]
async fn test_watch_observes_speaking() {
    let (coordinator, _fetcher, _sink) =
        remote_only(Duration::from_millis(200), Duration::from_secs(1));
    let mut rx = coordinator.watch();

    let ticket = tokio::spawn(coordinator.speak(SpeakRequest::new("Hello")));
    rx.wait_for(|s| s.is_speaking).await.unwrap();
    assert_eq!(rx.borrow().backend, Backend::Remote);

    ticket.await.unwrap().unwrap();
    assert!(!coordinator.status().is_speaking);
}

#[tokio::test(start_paused = true)]
async fn test_spoken_text_is_a_probable_echo() {
    let (coordinator, _fetcher, _sink) =
        remote_only(Duration::from_millis(10), Duration::from_millis(100));

    coordinator
        .speak(SpeakRequest::new("Turn left at the next light."))
        .await
        .unwrap();

    assert!(coordinator.is_probable_echo("turn left at the next light"));
    assert!(!coordinator.is_probable_echo("what time is it"));
}
