//! Configuration management for the audio session coordinator

pub mod file;

use std::fmt;
use std::time::Duration;

use serde::Deserialize;

use crate::backend::ChunkingMode;
use crate::backend::local::DEFAULT_CHUNK_PAUSE;
use crate::gate::DEFAULT_GATE_WINDOW;
use file::VoxgateConfigFile;

/// Default window during which spoken text counts as a probable echo
pub const DEFAULT_ECHO_WINDOW: Duration = Duration::from_secs(8);

/// Coordinator configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Timing and chunking
    pub coordinator: CoordinatorConfig,

    /// Remote synthesis; `None` when no API key is available
    pub remote: Option<RemoteConfig>,

    /// Local synthesis
    pub local: LocalConfig,
}

/// Timing and chunking configuration
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Quiet window after speech before recognized input is accepted again
    pub reverb_gate: Duration,

    /// Pause between sentence chunks during local synthesis
    pub chunk_pause: Duration,

    /// When local synthesis splits text into sentences
    pub chunking: ChunkingMode,

    /// How long spoken text is remembered for echo detection
    pub echo_window: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            reverb_gate: DEFAULT_GATE_WINDOW,
            chunk_pause: DEFAULT_CHUNK_PAUSE,
            chunking: ChunkingMode::Auto,
            echo_window: DEFAULT_ECHO_WINDOW,
        }
    }
}

/// Hosted TTS provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteProvider {
    /// `OpenAI` `/v1/audio/speech` (or any compatible server)
    #[default]
    #[serde(alias = "open_ai")]
    OpenAi,
    /// `ElevenLabs` text-to-speech
    ElevenLabs,
}

impl RemoteProvider {
    /// Base URL used when none is configured
    #[must_use]
    pub const fn default_base_url(self) -> &'static str {
        match self {
            Self::OpenAi => "https://api.openai.com",
            Self::ElevenLabs => "https://api.elevenlabs.io",
        }
    }

    /// Default model identifier
    #[must_use]
    pub const fn default_model(self) -> &'static str {
        match self {
            Self::OpenAi => "tts-1",
            Self::ElevenLabs => "eleven_monolingual_v1",
        }
    }

    /// Default voice identifier
    #[must_use]
    pub const fn default_voice(self) -> &'static str {
        match self {
            Self::OpenAi => "alloy",
            // "Rachel"
            Self::ElevenLabs => "21m00Tcm4TlvDq8ikWAM",
        }
    }
}

impl fmt::Display for RemoteProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OpenAi => write!(f, "OpenAI"),
            Self::ElevenLabs => write!(f, "ElevenLabs"),
        }
    }
}

impl std::str::FromStr for RemoteProvider {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "openai" | "open_ai" => Ok(Self::OpenAi),
            "elevenlabs" => Ok(Self::ElevenLabs),
            other => Err(crate::Error::Config(format!("unknown TTS provider: {other}"))),
        }
    }
}

/// Remote synthesis configuration
#[derive(Clone)]
pub struct RemoteConfig {
    /// Provider
    pub provider: RemoteProvider,

    /// API key
    pub api_key: String,

    /// Base URL override
    pub base_url: Option<String>,

    /// Model identifier
    pub model: String,

    /// Voice identifier used when a request names none
    pub voice: String,

    /// Speed multiplier (0.25 to 4.0)
    pub speed: f32,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        let provider = RemoteProvider::default();
        Self {
            provider,
            api_key: String::new(),
            base_url: None,
            model: provider.default_model().to_string(),
            voice: provider.default_voice().to_string(),
            speed: 1.0,
        }
    }
}

impl fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteConfig")
            .field("provider", &self.provider)
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("voice", &self.voice)
            .field("speed", &self.speed)
            .finish()
    }
}

/// Local synthesis configuration
#[derive(Debug, Clone)]
pub struct LocalConfig {
    /// Use the on-device engine when available
    pub enabled: bool,

    /// Locale for voice selection
    pub locale: String,

    /// Preferred voice id or name
    pub voice: Option<String>,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            locale: "en-US".to_string(),
            voice: None,
        }
    }
}

impl Config {
    /// Load configuration from the config file and environment
    ///
    /// Precedence, lowest first: defaults, `~/.config/voxgate/config.toml`,
    /// environment variables.
    #[must_use]
    pub fn load() -> Self {
        Self::from_sources(file::load_config_file(), |key| std::env::var(key).ok())
    }

    /// Merge a parsed config file with an environment lookup
    pub fn from_sources<F>(fc: VoxgateConfigFile, env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = CoordinatorConfig::default();
        let gate_ms = env("VOXGATE_REVERB_GATE_MS")
            .and_then(|v| v.parse().ok())
            .or(fc.coordinator.reverb_gate_ms);

        let coordinator = CoordinatorConfig {
            reverb_gate: gate_ms.map_or(defaults.reverb_gate, Duration::from_millis),
            chunk_pause: fc
                .coordinator
                .chunk_pause_ms
                .map_or(defaults.chunk_pause, Duration::from_millis),
            chunking: fc.coordinator.chunking.unwrap_or(defaults.chunking),
            echo_window: fc
                .coordinator
                .echo_window_ms
                .map_or(defaults.echo_window, Duration::from_millis),
        };

        let provider = env("VOXGATE_TTS_PROVIDER")
            .and_then(|v| match v.parse() {
                Ok(p) => Some(p),
                Err(e) => {
                    tracing::warn!(error = %e, "ignoring VOXGATE_TTS_PROVIDER");
                    None
                }
            })
            .or(fc.remote.provider)
            .unwrap_or_default();

        let key_var = match provider {
            RemoteProvider::OpenAi => "OPENAI_API_KEY",
            RemoteProvider::ElevenLabs => "ELEVENLABS_API_KEY",
        };
        let api_key = env(key_var)
            .or(fc.remote.api_key)
            .filter(|k| !k.trim().is_empty());

        let remote = match (fc.remote.enabled.unwrap_or(true), api_key) {
            (true, Some(api_key)) => Some(RemoteConfig {
                provider,
                api_key,
                base_url: env("VOXGATE_TTS_URL").or(fc.remote.base_url),
                model: env("VOXGATE_TTS_MODEL")
                    .or(fc.remote.model)
                    .unwrap_or_else(|| provider.default_model().to_string()),
                voice: env("VOXGATE_TTS_VOICE")
                    .or(fc.remote.voice)
                    .unwrap_or_else(|| provider.default_voice().to_string()),
                speed: fc.remote.speed.unwrap_or(1.0),
            }),
            _ => None,
        };

        let local_defaults = LocalConfig::default();
        let local = LocalConfig {
            enabled: fc.local.enabled.unwrap_or(local_defaults.enabled),
            locale: env("VOXGATE_LOCALE")
                .or(fc.local.locale)
                .unwrap_or(local_defaults.locale),
            voice: fc.local.voice,
        };

        Self {
            coordinator,
            remote,
            local,
        }
    }
}
