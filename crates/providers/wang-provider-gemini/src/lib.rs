//! Gemini integration for Wang Bot
//!
//! Implements [`wang_core::TextBackend`] (plain and image-grounded questions)
//! and [`wang_core::ImageBackend`] with one `generateContent` call each.
//! Images travel inline as base64 in both directions.

#![warn(missing_docs)]
#![warn(clippy::all)]

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::Duration;
use wang_core::{
    BotConfig, CancellationToken, ImageBackend, ImageData, Result, TextBackend, WangError,
};

/// Gemini API base URL
const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Default model
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// Default model for image generation
pub const DEFAULT_IMAGE_MODEL: &str = "gemini-2.0-flash-preview-image-generation";

static HTTP_CLIENT: OnceLock<Client> = OnceLock::new();

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize)]
struct Content {
    role: &'static str,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_modalities: Vec<&'static str>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

impl Part {
    fn text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            ..Default::default()
        }
    }

    fn image(image: &ImageData) -> Self {
        Self {
            inline_data: Some(InlineData {
                mime_type: image.mime_type.clone(),
                data: STANDARD.encode(&image.data),
            }),
            ..Default::default()
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Default, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

impl GenerateResponse {
    fn parts(&self) -> &[Part] {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|c| c.parts.as_slice())
            .unwrap_or_default()
    }

    /// Concatenated text of the first candidate
    fn text(&self) -> String {
        self.parts()
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect()
    }

    /// First inline image of the first candidate
    fn image(&self) -> Result<Option<ImageData>> {
        let Some(inline) = self
            .parts()
            .iter()
            .filter_map(|p| p.inline_data.as_ref())
            .find(|d| d.mime_type.starts_with("image/"))
        else {
            return Ok(None);
        };
        let data = STANDARD
            .decode(&inline.data)
            .map_err(|e| WangError::upstream(format!("Invalid image data from Gemini: {}", e)))?;
        Ok(Some(ImageData::new(inline.mime_type.clone(), data)))
    }
}

/// Gemini text and image provider
pub struct GeminiProvider {
    api_key: Option<String>,
    model: String,
    image_model: String,
    endpoint: String,
}

impl GeminiProvider {
    /// Create a provider answering with `model`
    pub fn new(api_key: Option<String>, model: impl Into<String>) -> Self {
        Self {
            api_key,
            model: model.into(),
            image_model: DEFAULT_IMAGE_MODEL.to_string(),
            endpoint: GEMINI_API_BASE.to_string(),
        }
    }

    /// Build from the bot configuration
    pub fn from_config(config: &BotConfig) -> Self {
        Self::new(config.gemini_api_key.clone(), config.gemini_model.clone())
            .with_image_model(config.gemini_image_model.clone())
    }

    /// Model used for image generation
    pub fn with_image_model(mut self, model: impl Into<String>) -> Self {
        self.image_model = model.into();
        self
    }

    /// Point the provider at a different API base
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    /// Model name sent with text requests
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Model name sent with image-generation requests
    pub fn image_model(&self) -> &str {
        &self.image_model
    }

    fn client() -> &'static Client {
        HTTP_CLIENT.get_or_init(|| {
            Client::builder()
                .timeout(Duration::from_secs(120))
                .build()
                .unwrap_or_else(|_| Client::new())
        })
    }

    async fn generate(&self, model: &str, request: &GenerateRequest) -> Result<GenerateResponse> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| WangError::upstream("GEMINI_API_KEY is not set"))?;

        tracing::debug!(
            model = %model,
            parts = request.contents.iter().map(|c| c.parts.len()).sum::<usize>(),
            "Gemini request"
        );

        let response = Self::client()
            .post(format!("{}/models/{}:generateContent", self.endpoint, model))
            .query(&[("key", api_key)])
            .json(request)
            .send()
            .await
            .map_err(|e| WangError::upstream(format!("Gemini request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(WangError::upstream(format!(
                "Gemini error ({}): {}",
                status, error_text
            )));
        }

        response
            .json()
            .await
            .map_err(|e| WangError::upstream(format!("Invalid Gemini response: {}", e)))
    }

    async fn answer(&self, parts: Vec<Part>) -> Result<String> {
        let request = GenerateRequest {
            contents: vec![Content { role: "user", parts }],
            generation_config: None,
        };
        let text = self.generate(&self.model, &request).await?.text();
        if text.trim().is_empty() {
            return Err(WangError::upstream("empty response from Gemini"));
        }
        tracing::debug!(chars = text.len(), "Gemini response");
        Ok(text)
    }

    async fn draw(&self, prompt: &str, reference: Option<&ImageData>) -> Result<ImageData> {
        let mut parts: Vec<Part> = reference.into_iter().map(Part::image).collect();
        parts.push(Part::text(prompt));
        let request = GenerateRequest {
            contents: vec![Content { role: "user", parts }],
            generation_config: Some(GenerationConfig {
                response_modalities: vec!["TEXT", "IMAGE"],
            }),
        };

        let response = self.generate(&self.image_model, &request).await?;
        let caption = response.text();
        if !caption.trim().is_empty() {
            tracing::debug!(caption = %caption, "Gemini image caption");
        }
        let image = response
            .image()?
            .ok_or_else(|| WangError::upstream("no image was generated"))?;
        tracing::debug!(mime = %image.mime_type, bytes = image.data.len(), "Gemini image");
        Ok(image)
    }
}

#[async_trait]
impl TextBackend for GeminiProvider {
    async fn complete(&self, prompt: &str, cancel: CancellationToken) -> Result<String> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(WangError::Cancelled),
            result = self.answer(vec![Part::text(prompt)]) => result,
        }
    }

    async fn complete_with_image(
        &self,
        prompt: &str,
        image: &ImageData,
        cancel: CancellationToken,
    ) -> Result<String> {
        let parts = vec![Part::image(image), Part::text(prompt)];
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(WangError::Cancelled),
            result = self.answer(parts) => result,
        }
    }
}

#[async_trait]
impl ImageBackend for GeminiProvider {
    async fn generate_image(
        &self,
        prompt: &str,
        reference: Option<ImageData>,
        cancel: CancellationToken,
    ) -> Result<ImageData> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(WangError::Cancelled),
            result = self.draw(prompt, reference.as_ref()) => result,
        }
    }
}
