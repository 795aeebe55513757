//! Shared test utilities
//!
//! Fake backends and a fake recognition engine. All delays run on the tokio
//! clock, so tests pause it and advance it explicitly.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use voxgate::{
    AudioSink, Backends, ChunkingMode, Coordinator, CoordinatorConfig, Error, LocalSynthesis,
    RemoteSynthesis, Result, SessionStatus, SpeechFetcher, SttController, Subscription, Utterance,
    UtteranceError, VoiceEngine, VoiceInfo,
};

/// Let spawned tasks run without moving the clock
pub async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

/// Fetcher that returns fake MP3 bytes, or an HTTP-style failure
pub struct FakeFetcher {
    latency: Duration,
    failure: Mutex<Option<u16>>,
    pub requests: Mutex<Vec<String>>,
}

impl FakeFetcher {
    pub fn new(latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            latency,
            failure: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Every fetch fails with `status`
    pub fn failing(status: u16) -> Arc<Self> {
        let fetcher = Self::new(Duration::from_millis(20));
        *fetcher.failure.lock().unwrap() = Some(status);
        fetcher
    }

    pub fn texts(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpeechFetcher for FakeFetcher {
    async fn fetch(&self, text: &str, _voice: Option<&str>, _rate: f32) -> Result<Vec<u8>> {
        self.requests.lock().unwrap().push(text.to_string());
        tokio::time::sleep(self.latency).await;

        let failure = *self.failure.lock().unwrap();
        match failure {
            Some(status) => Err(Error::Network(format!("Fake TTS error {status}: boom"))),
            None => Ok(vec![0xFF, 0xFB, 0x90, 0x00]),
        }
    }

    fn name(&self) -> &'static str {
        "Fake"
    }
}

/// Sink that "plays" for a fixed duration
pub struct FakeSink {
    duration: Duration,
    pub plays: AtomicUsize,
    pub stops: AtomicUsize,
}

impl FakeSink {
    pub fn new(duration: Duration) -> Arc<Self> {
        Arc::new(Self {
            duration,
            plays: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl AudioSink for FakeSink {
    async fn play(&self, _audio: Vec<u8>, _volume: f32) -> Result<()> {
        self.plays.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.duration).await;
        Ok(())
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

/// On-device engine with scripted utterance outcomes
pub struct FakeEngine {
    duration: Duration,
    prefers_chunking: bool,
    script: Mutex<VecDeque<std::result::Result<(), UtteranceError>>>,
    pub spoken: Mutex<Vec<String>>,
    pub cancels: AtomicUsize,
}

impl FakeEngine {
    pub fn new(duration: Duration) -> Arc<Self> {
        Self::build(duration, false)
    }

    /// Engine whose `Auto` chunking mode splits sentences
    pub fn chunking(duration: Duration) -> Arc<Self> {
        Self::build(duration, true)
    }

    fn build(duration: Duration, prefers_chunking: bool) -> Arc<Self> {
        Arc::new(Self {
            duration,
            prefers_chunking,
            script: Mutex::new(VecDeque::new()),
            spoken: Mutex::new(Vec::new()),
            cancels: AtomicUsize::new(0),
        })
    }

    /// Outcomes for the next utterances, in order; later ones succeed
    pub fn script(&self, outcomes: Vec<std::result::Result<(), UtteranceError>>) {
        self.script.lock().unwrap().extend(outcomes);
    }

    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }
}

#[async_trait]
impl VoiceEngine for FakeEngine {
    fn voices(&self) -> Vec<VoiceInfo> {
        vec![
            VoiceInfo {
                id: "fr-1".to_string(),
                name: "Amelie".to_string(),
                language: "fr-FR".to_string(),
            },
            VoiceInfo {
                id: "en-1".to_string(),
                name: "Samantha".to_string(),
                language: "en-US".to_string(),
            },
        ]
    }

    fn default_voice(&self) -> Option<VoiceInfo> {
        None
    }

    async fn utter(&self, utterance: Utterance) -> std::result::Result<(), UtteranceError> {
        self.spoken.lock().unwrap().push(utterance.text);
        tokio::time::sleep(self.duration).await;
        self.script.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }

    fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
    }

    fn prefers_chunking(&self) -> bool {
        self.prefers_chunking
    }
}

/// Recognition engine that only tracks its listening flag
#[derive(Default)]
pub struct FakeStt {
    listening: AtomicBool,
    pub stops: AtomicUsize,
    pub resumes: AtomicUsize,
}

impl FakeStt {
    pub fn listening() -> Arc<Self> {
        let stt = Arc::new(Self::default());
        stt.listening.store(true, Ordering::SeqCst);
        stt
    }

    pub fn is_listening_now(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }
}

impl SttController for FakeStt {
    fn stop_listening(&self) {
        self.listening.store(false, Ordering::SeqCst);
        self.stops.fetch_add(1, Ordering::SeqCst);
    }

    fn resume_listening(&self) {
        self.listening.store(true, Ordering::SeqCst);
        self.resumes.fetch_add(1, Ordering::SeqCst);
    }

    fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }
}

pub fn remote(fetcher: &Arc<FakeFetcher>, sink: &Arc<FakeSink>) -> RemoteSynthesis {
    RemoteSynthesis::new(fetcher.clone(), sink.clone())
}

pub fn local(engine: &Arc<FakeEngine>) -> LocalSynthesis {
    LocalSynthesis::new(engine.clone(), "en-US")
}

pub fn local_chunked(engine: &Arc<FakeEngine>, mode: ChunkingMode) -> LocalSynthesis {
    local(engine).with_chunking(mode, Duration::from_millis(150))
}

/// Coordinator with the default 600 ms reverb gate
pub fn coordinator(backends: Backends) -> Coordinator {
    Coordinator::new(&CoordinatorConfig::default(), backends)
}

/// Record every status snapshot the coordinator publishes
pub fn record_statuses(coordinator: &Coordinator) -> (Arc<Mutex<Vec<SessionStatus>>>, Subscription) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let subscription = coordinator.subscribe(move |status| sink.lock().unwrap().push(status.clone()));
    (seen, subscription)
}

/// Counter bumped from a request callback
pub fn counter() -> (Arc<AtomicUsize>, impl Fn() + Send + Sync + Clone + 'static) {
    let count = Arc::new(AtomicUsize::new(0));
    let bump = {
        let count = Arc::clone(&count);
        move || {
            count.fetch_add(1, Ordering::SeqCst);
        }
    };
    (count, bump)
}
