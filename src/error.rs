//! Error types for the audio session coordinator

use thiserror::Error;

/// Result type alias for coordinator operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while coordinating speech output and input
#[derive(Debug, Error)]
pub enum Error {
    /// Remote synthesis fetch failed (transport failure or non-2xx response)
    #[error("network error: {0}")]
    Network(String),

    /// An audio engine failed while playing or speaking
    #[error("playback error: {0}")]
    Playback(String),

    /// No synthesis backend can run on this platform
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Request was stopped or superseded
    ///
    /// This is an expected outcome, not a failure.
    #[error("aborted: {0}")]
    Abort(String),

    /// A recognition session is already active
    #[error("session conflict: {0}")]
    SessionConflict(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Whether this error is an expected cancellation
    #[must_use]
    pub const fn is_abort(&self) -> bool {
        matches!(self, Self::Abort(_))
    }

    /// Short classification name, e.g. `"NetworkError"`
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Network(_) => "NetworkError",
            Self::Playback(_) => "PlaybackError",
            Self::Unsupported(_) => "UnsupportedError",
            Self::Abort(_) => "AbortError",
            Self::SessionConflict(_) => "SessionConflictError",
            Self::Config(_) => "ConfigError",
            Self::Io(_) => "IoError",
            Self::Toml(_) => "TomlError",
        }
    }

    /// Reason recorded into the status store's `last_cancel_reason`
    ///
    /// Aborts record their bare reason (`"superseded"`, `"user"`), everything
    /// else records `"<Kind>: <message>"`.
    #[must_use]
    pub fn cancel_reason(&self) -> String {
        match self {
            Self::Abort(reason) => reason.clone(),
            other => format!("{}: {other}", other.kind()),
        }
    }
}
