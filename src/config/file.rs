//! TOML configuration file loading
//!
//! Supports `~/.config/voxgate/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::RemoteProvider;
use crate::backend::ChunkingMode;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct VoxgateConfigFile {
    /// Coordinator timing
    #[serde(default)]
    pub coordinator: CoordinatorFileConfig,

    /// Remote (network) synthesis
    #[serde(default)]
    pub remote: RemoteFileConfig,

    /// Local (on-device) synthesis
    #[serde(default)]
    pub local: LocalFileConfig,
}

/// Coordinator timing configuration
#[derive(Debug, Default, Deserialize)]
pub struct CoordinatorFileConfig {
    /// Reverb gate window in milliseconds
    pub reverb_gate_ms: Option<u64>,

    /// Pause between sentence chunks in milliseconds
    pub chunk_pause_ms: Option<u64>,

    /// Sentence chunking: "auto", "always" or "never"
    pub chunking: Option<ChunkingMode>,

    /// How long spoken text is remembered for echo detection, in milliseconds
    pub echo_window_ms: Option<u64>,
}

/// Remote synthesis configuration
#[derive(Debug, Default, Deserialize)]
pub struct RemoteFileConfig {
    /// Enable remote synthesis when a key is available
    pub enabled: Option<bool>,

    /// Provider ("openai" or "elevenlabs")
    pub provider: Option<RemoteProvider>,

    /// API key
    pub api_key: Option<String>,

    /// Override the provider's base URL (e.g. a local OpenAI-compatible server)
    pub base_url: Option<String>,

    /// Model identifier (e.g. "tts-1")
    pub model: Option<String>,

    /// Voice identifier (e.g. "alloy")
    pub voice: Option<String>,

    /// Speed multiplier
    pub speed: Option<f32>,
}

/// Local synthesis configuration
#[derive(Debug, Default, Deserialize)]
pub struct LocalFileConfig {
    /// Enable the on-device engine
    pub enabled: Option<bool>,

    /// Locale used for voice selection (e.g. "en-US")
    pub locale: Option<String>,

    /// Preferred voice id or name
    pub voice: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `VoxgateConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> VoxgateConfigFile {
    config_file_path().map_or_else(VoxgateConfigFile::default, |path| load_from(&path))
}

/// Load a config file from `path`, falling back to defaults
pub fn load_from(path: &Path) -> VoxgateConfigFile {
    if !path.exists() {
        return VoxgateConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                VoxgateConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            VoxgateConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/voxgate/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("voxgate").join("config.toml"))
}
