//! HTTP speech synthesis client (`OpenAI`-compatible and `ElevenLabs`)

use async_trait::async_trait;

use super::SpeechFetcher;
use crate::config::{RemoteConfig, RemoteProvider};
use crate::{Error, Result};

/// Fetches MP3 audio from a hosted TTS API
pub struct HttpSpeechClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    voice: String,
    speed: f32,
    model: String,
    provider: RemoteProvider,
}

impl std::fmt::Debug for HttpSpeechClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSpeechClient")
            .field("base_url", &self.base_url)
            .field("voice", &self.voice)
            .field("model", &self.model)
            .field("provider", &self.provider)
            .finish_non_exhaustive()
    }
}

impl HttpSpeechClient {
    /// Create a client from remote synthesis configuration
    ///
    /// # Errors
    ///
    /// Returns error if the API key is missing
    pub fn from_config(config: &RemoteConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(Error::Config(format!(
                "{} API key required for remote synthesis",
                config.provider
            )));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key: config.api_key.clone(),
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| config.provider.default_base_url().to_string())
                .trim_end_matches('/')
                .to_string(),
            voice: config.voice.clone(),
            speed: config.speed,
            model: config.model.clone(),
            provider: config.provider,
        })
    }

    /// Synthesize using the `OpenAI` speech endpoint
    async fn synthesize_openai(&self, text: &str, voice: &str, speed: f32) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct TtsRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            speed: f32,
        }

        let request = TtsRequest {
            model: &self.model,
            input: text,
            voice,
            speed,
        };

        let response = self
            .client
            .post(format!("{}/v1/audio/speech", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Network(format!("OpenAI TTS request failed: {e}")))?;

        read_audio(response, "OpenAI").await
    }

    /// Synthesize using the `ElevenLabs` text-to-speech endpoint
    async fn synthesize_elevenlabs(&self, text: &str, voice: &str) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct ElevenLabsRequest<'a> {
            text: &'a str,
            model_id: &'a str,
        }

        let url = format!("{}/v1/text-to-speech/{voice}", self.base_url);

        let request = ElevenLabsRequest {
            text,
            model_id: &self.model,
        };

        let response = self
            .client
            .post(&url)
            .header("xi-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Network(format!("ElevenLabs TTS request failed: {e}")))?;

        read_audio(response, "ElevenLabs").await
    }
}

async fn read_audio(response: reqwest::Response, provider: &str) -> Result<Vec<u8>> {
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(Error::Network(format!("{provider} TTS error {status}: {body}")));
    }

    let audio = response
        .bytes()
        .await
        .map_err(|e| Error::Network(format!("{provider} TTS body read failed: {e}")))?;
    Ok(audio.to_vec())
}

#[async_trait]
impl SpeechFetcher for HttpSpeechClient {
    async fn fetch(&self, text: &str, voice: Option<&str>, rate: f32) -> Result<Vec<u8>> {
        let voice = voice.unwrap_or(self.voice.as_str());
        match self.provider {
            RemoteProvider::OpenAi => {
                // The API accepts 0.25 to 4.0
                let speed = (self.speed * rate).clamp(0.25, 4.0);
                self.synthesize_openai(text, voice, speed).await
            }
            RemoteProvider::ElevenLabs => self.synthesize_elevenlabs(text, voice).await,
        }
    }

    fn name(&self) -> &'static str {
        match self.provider {
            RemoteProvider::OpenAi => "openai",
            RemoteProvider::ElevenLabs => "elevenlabs",
        }
    }
}
