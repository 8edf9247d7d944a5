//! Google Cloud Text-to-Speech engine
//!
//! Calls `text:synthesize` with an API key and returns MP3 audio. Input text
//! is lowercased before sending; the Chirp voices read all-caps words letter
//! by letter.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::Client;
use std::sync::OnceLock;
use std::time::Duration;
use wang_core::{BotConfig, CancellationToken, Result, SpeechBackend, WangError};

use crate::types::*;

/// Google TTS API base URL
const GOOGLE_TTS_API_BASE: &str = "https://texttospeech.googleapis.com/v1";

/// Shared HTTP client for connection pooling
static HTTP_CLIENT: OnceLock<Client> = OnceLock::new();

/// Google Cloud Text-to-Speech engine
pub struct GoogleSpeechEngine {
    api_key: Option<String>,
    voice: VoiceSettings,
    endpoint: String,
}

impl GoogleSpeechEngine {
    /// Create a new engine with the given key and voice
    pub fn new(api_key: Option<String>, voice: VoiceSettings) -> Self {
        Self {
            api_key,
            voice,
            endpoint: GOOGLE_TTS_API_BASE.to_string(),
        }
    }

    /// Build from the bot configuration
    pub fn from_config(config: &BotConfig) -> Self {
        Self::new(
            config.tts_api_key.clone(),
            VoiceSettings {
                language_code: config.tts_language_code.clone(),
                voice_name: config.tts_voice_name.clone(),
                gender: VoiceGender::parse(&config.tts_gender),
            },
        )
    }

    /// Point the engine at a different API base
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    /// Voice used for every request
    pub fn voice(&self) -> &VoiceSettings {
        &self.voice
    }

    fn client() -> &'static Client {
        HTTP_CLIENT.get_or_init(|| {
            Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
                .unwrap_or_else(|_| Client::new())
        })
    }

    fn request<'a>(&'a self, text: &str) -> SynthesizeRequest<'a> {
        SynthesizeRequest {
            input: SynthesisInput {
                text: text.to_lowercase(),
            },
            voice: VoiceSelection {
                language_code: &self.voice.language_code,
                name: &self.voice.voice_name,
                ssml_gender: self.voice.gender,
            },
            audio_config: AudioConfig {
                audio_encoding: "MP3",
            },
        }
    }

    async fn call(&self, text: &str) -> std::result::Result<Vec<u8>, SpeechError> {
        let api_key = self.api_key.as_deref().ok_or(SpeechError::MissingApiKey)?;
        let request = self.request(text);

        tracing::debug!(
            voice = %self.voice.voice_name,
            language = %self.voice.language_code,
            text_len = text.len(),
            "Google TTS request"
        );

        let response = Self::client()
            .post(format!("{}/text:synthesize", self.endpoint))
            .query(&[("key", api_key)])
            .json(&request)
            .send()
            .await
            .map_err(|e| SpeechError::NetworkError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                401 | 403 => SpeechError::AuthenticationError(body),
                429 => SpeechError::RateLimitError(body),
                code => SpeechError::ApiError { status: code, body },
            });
        }

        let body: SynthesizeResponse = response
            .json()
            .await
            .map_err(|e| SpeechError::NetworkError(e.to_string()))?;
        let audio = decode_audio(&body.audio_content)?;

        tracing::debug!(bytes = audio.len(), "Google TTS response");
        Ok(audio)
    }
}

/// Decode the base64 `audioContent` field
fn decode_audio(content: &str) -> std::result::Result<Vec<u8>, SpeechError> {
    if content.is_empty() {
        return Err(SpeechError::InvalidAudio("response had no audio".to_string()));
    }
    STANDARD
        .decode(content)
        .map_err(|e| SpeechError::InvalidAudio(e.to_string()))
}

#[async_trait]
impl SpeechBackend for GoogleSpeechEngine {
    async fn synthesize(&self, text: &str, cancel: CancellationToken) -> Result<Vec<u8>> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(WangError::Cancelled),
            result = self.call(text) => result.map_err(Into::into),
        }
    }
}
