//! Voice types and error definitions

use serde::{Deserialize, Serialize};
use thiserror::Error;
use wang_core::WangError;

/// Speech synthesis errors
#[derive(Debug, Error)]
pub enum SpeechError {
    /// No API key configured
    #[error("Speech API key not configured")]
    MissingApiKey,

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    AuthenticationError(String),

    /// Rate limit exceeded
    #[error("Rate limit exceeded: {0}")]
    RateLimitError(String),

    /// Network error
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Non-success response from the API
    #[error("Text-to-speech error ({status}): {body}")]
    ApiError {
        /// HTTP status
        status: u16,
        /// Response body
        body: String,
    },

    /// Response carried no usable audio
    #[error("Invalid audio content: {0}")]
    InvalidAudio(String),
}

impl From<SpeechError> for WangError {
    fn from(err: SpeechError) -> Self {
        WangError::upstream(err.to_string())
    }
}

/// SSML voice gender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VoiceGender {
    /// Let the service pick
    #[serde(rename = "SSML_VOICE_GENDER_UNSPECIFIED")]
    Unspecified,
    /// Male voice
    Male,
    /// Female voice
    Female,
    /// Neutral voice
    Neutral,
}

impl VoiceGender {
    /// Parse the gender names the API accepts, case-insensitively
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "MALE" => Self::Male,
            "FEMALE" => Self::Female,
            "NEUTRAL" => Self::Neutral,
            _ => Self::Unspecified,
        }
    }
}

/// Voice selection for a synthesis request
#[derive(Debug, Clone)]
pub struct VoiceSettings {
    /// BCP-47 language code, e.g. `cmn-CN`
    pub language_code: String,
    /// Voice name, e.g. `cmn-CN-Chirp3-HD-Achird`
    pub voice_name: String,
    /// Requested gender
    pub gender: VoiceGender,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            language_code: "cmn-CN".to_string(),
            voice_name: "cmn-CN-Chirp3-HD-Achird".to_string(),
            gender: VoiceGender::Male,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct SynthesizeRequest<'a> {
    pub input: SynthesisInput,
    pub voice: VoiceSelection<'a>,
    #[serde(rename = "audioConfig")]
    pub audio_config: AudioConfig,
}

#[derive(Debug, Serialize)]
pub(crate) struct SynthesisInput {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct VoiceSelection<'a> {
    #[serde(rename = "languageCode")]
    pub language_code: &'a str,
    pub name: &'a str,
    #[serde(rename = "ssmlGender")]
    pub ssml_gender: VoiceGender,
}

#[derive(Debug, Serialize)]
pub(crate) struct AudioConfig {
    #[serde(rename = "audioEncoding")]
    pub audio_encoding: &'static str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SynthesizeResponse {
    #[serde(rename = "audioContent", default)]
    pub audio_content: String,
}
