//! Voxgate - audio session coordinator for voice assistants
//!
//! Sits between an application that wants to speak and the machine's audio
//! devices:
//! - Serializes speech requests into one FIFO queue
//! - Synthesizes remotely with an on-device fallback
//! - Pauses speech recognition while speaking and holds it off through a
//!   short reverb window afterwards
//! - Grants the input channel to one recognition session at a time
//! - Publishes an observable status snapshot
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                    Coordinator                       │
//! │  speak │ stop │ subscribe │ stt sessions │ is_gated  │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                   SpeechQueue                        │
//! │  StatusStore │ ReverbGate │ ListenerCoordinator      │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                    Backends                          │
//! │   Remote (HTTP + speaker)  →  Local (device engine)  │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod backend;
pub mod config;
pub mod coordinator;
pub mod echo;
pub mod error;
pub mod gate;
pub mod listener;
pub mod queue;
pub mod session;
pub mod status;
pub mod timer;
pub mod voice;

pub use backend::{
    AudioSink, Backends, ChunkingMode, HttpSpeechClient, LocalSynthesis, RemoteSynthesis,
    SpeechFetcher, Utterance, UtteranceError, VoiceEngine, VoiceInfo,
};
pub use config::{Config, CoordinatorConfig, LocalConfig, RemoteConfig, RemoteProvider};
pub use coordinator::Coordinator;
pub use error::{Error, Result};
pub use gate::ReverbGate;
pub use listener::{ListenerCoordinator, SttController};
pub use queue::{REASON_DISPOSED, REASON_SUPERSEDED, SpeakRequest, SpeechQueue, SpeechTicket};
pub use session::{SessionId, SessionMutex, SttSession};
pub use status::{Backend, RequestId, SessionStatus, StatusStore, Subscription};
