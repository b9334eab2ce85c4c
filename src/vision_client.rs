//! Vision inference with a primary/fallback provider policy.
//!
//! Two provider families are supported behind one trait: OpenAI-style chat
//! completions and Google Gemini generateContent. The client tries the
//! primary provider once and, only if that fails, the fallback once. There
//! are no retries beyond that; the scan either gets an answer or a combined
//! failure naming both causes.

use crate::config::{ProviderConfig, ProviderKind, VisionConfig};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, instrument, warn};

/// Instruction sent with every inference request. Both providers receive the
/// same wording so a fallback answer stays comparable to a primary answer.
const PRODUCT_LISTING_INSTRUCTION: &str = "The attached image shows one or more photos of retail shop shelves, side by side. \
List every product you can identify across all photos. Respond with one product \
name per line, using the most specific name visible (brand and variant when \
readable). Do not number the lines, do not add commentary, and do not describe \
the shelves themselves.";

const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com";
const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash";

/// Errors from a single provider call.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("Provider returned status {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Malformed provider response: {0}")]
    MalformedResponse(String),
}

/// Errors from the primary/fallback inference policy.
#[derive(Debug, Error)]
pub enum VisionError {
    #[error("Primary provider {provider} failed ({cause}) and no fallback is configured")]
    NoFallbackConfigured { provider: String, cause: String },

    #[error("Both providers failed. {primary_provider}: {primary_cause}. {fallback_provider}: {fallback_cause}")]
    BothProvidersFailed {
        primary_provider: String,
        primary_cause: String,
        fallback_provider: String,
        fallback_cause: String,
    },
}

/// Which provider produced an inference result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderRoute {
    Primary,
    Fallback,
}

/// Raw inference output plus its origin.
#[derive(Debug, Clone)]
pub struct InferenceResult {
    /// Raw response text from the provider
    pub text: String,
    /// Display name of the provider that answered
    pub provider: String,
    /// Whether the primary or the fallback answered
    pub route: ProviderRoute,
}

/// An encoded image handed to a provider.
#[derive(Debug, Clone)]
pub struct ImagePayload {
    /// Encoded image bytes
    pub data: Vec<u8>,
    /// MIME type of the bytes
    pub mime_type: String,
}

/// A vision model that can describe an image according to an instruction.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VisionProvider: Send + Sync {
    /// Send one instruction plus one image, returning the raw response text.
    async fn describe(
        &self,
        instruction: &str,
        image: &ImagePayload,
    ) -> Result<String, ProviderError>;

    /// Display name used in logs and error messages.
    fn name(&self) -> &str;
}

/// OpenAI-compatible chat completions provider.
pub struct OpenAiVision {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    name: String,
}

impl OpenAiVision {
    pub fn new(config: &ProviderConfig, timeout: Duration) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Request(e.to_string()))?;

        let model = if config.model.is_empty() {
            DEFAULT_OPENAI_MODEL.to_string()
        } else {
            config.model.clone()
        };

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            name: format!("openai/{}", model),
            model,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
        })
    }
}

#[async_trait]
impl VisionProvider for OpenAiVision {
    #[instrument(skip(self, instruction, image), fields(provider = %self.name))]
    async fn describe(
        &self,
        instruction: &str,
        image: &ImagePayload,
    ) -> Result<String, ProviderError> {
        let data_url = format!("data:{};base64,{}", image.mime_type, STANDARD.encode(&image.data));

        let body = serde_json::json!({
            "model": self.model,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": instruction },
                    { "type": "image_url", "image_url": { "url": data_url } }
                ]
            }],
            "max_tokens": 1024,
        });

        let url = format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;

        completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|text| !text.is_empty())
            .ok_or_else(|| {
                ProviderError::MalformedResponse("Response contained no message content".to_string())
            })
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

/// Google Gemini generateContent provider.
pub struct GeminiVision {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    name: String,
}

impl GeminiVision {
    pub fn new(config: &ProviderConfig, timeout: Duration) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Request(e.to_string()))?;

        let model = if config.model.is_empty() {
            DEFAULT_GEMINI_MODEL.to_string()
        } else {
            config.model.clone()
        };

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            name: format!("gemini/{}", model),
            model,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_GEMINI_BASE_URL.to_string()),
        })
    }
}

#[async_trait]
impl VisionProvider for GeminiVision {
    #[instrument(skip(self, instruction, image), fields(provider = %self.name))]
    async fn describe(
        &self,
        instruction: &str,
        image: &ImagePayload,
    ) -> Result<String, ProviderError> {
        let body = serde_json::json!({
            "contents": [{
                "parts": [
                    { "text": instruction },
                    { "inline_data": {
                        "mime_type": image.mime_type,
                        "data": STANDARD.encode(&image.data)
                    }}
                ]
            }]
        });

        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.base_url.trim_end_matches('/'),
            self.model,
            self.api_key
        );

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }

        let generated: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;

        generated
            .candidates
            .into_iter()
            .next()
            .map(|candidate| {
                candidate
                    .content
                    .parts
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .filter(|text| !text.is_empty())
            .ok_or_else(|| {
                ProviderError::MalformedResponse("Response contained no candidate text".to_string())
            })
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: GeminiContent,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
struct GeminiPart {
    text: Option<String>,
}

/// Primary/fallback inference policy over two interchangeable providers.
pub struct VisionClient {
    primary: Arc<dyn VisionProvider>,
    fallback: Option<Arc<dyn VisionProvider>>,
}

impl VisionClient {
    /// Build a client from explicit provider instances.
    pub fn new(primary: Arc<dyn VisionProvider>, fallback: Option<Arc<dyn VisionProvider>>) -> Self {
        Self { primary, fallback }
    }

    /// Build providers from configuration.
    pub fn from_config(config: &VisionConfig) -> Result<Self, ProviderError> {
        let timeout = config.request_timeout();

        let primary = build_provider(&config.primary, timeout)?;
        let fallback = match &config.fallback {
            Some(fallback_config) => Some(build_provider(fallback_config, timeout)?),
            None => None,
        };

        info!(
            primary = %primary.name(),
            fallback = %fallback.as_ref().map(|f| f.name()).unwrap_or("none"),
            "Configured vision providers"
        );

        Ok(Self { primary, fallback })
    }

    /// Extract a raw product listing from the image.
    ///
    /// Tries the primary provider once; on failure, tries the fallback once
    /// with the same instruction and payload.
    #[instrument(skip(self, image), fields(payload_bytes = image.data.len(), mime_type = %image.mime_type))]
    pub async fn extract_product_listing(
        &self,
        image: &ImagePayload,
    ) -> Result<InferenceResult, VisionError> {
        let primary_error = match self.primary.describe(PRODUCT_LISTING_INSTRUCTION, image).await {
            Ok(text) => {
                metrics::counter!("shelfscan.inference.primary_success").increment(1);
                return Ok(InferenceResult {
                    text,
                    provider: self.primary.name().to_string(),
                    route: ProviderRoute::Primary,
                });
            }
            Err(e) => e,
        };

        warn!(
            provider = %self.primary.name(),
            error = %primary_error,
            "Primary vision provider failed"
        );
        metrics::counter!("shelfscan.inference.primary_failure").increment(1);

        let fallback = match &self.fallback {
            Some(fallback) => fallback,
            None => {
                return Err(VisionError::NoFallbackConfigured {
                    provider: self.primary.name().to_string(),
                    cause: primary_error.to_string(),
                });
            }
        };

        match fallback.describe(PRODUCT_LISTING_INSTRUCTION, image).await {
            Ok(text) => {
                info!(provider = %fallback.name(), "Fallback vision provider answered");
                metrics::counter!("shelfscan.inference.fallback_success").increment(1);
                Ok(InferenceResult {
                    text,
                    provider: fallback.name().to_string(),
                    route: ProviderRoute::Fallback,
                })
            }
            Err(fallback_error) => {
                metrics::counter!("shelfscan.inference.fallback_failure").increment(1);
                Err(VisionError::BothProvidersFailed {
                    primary_provider: self.primary.name().to_string(),
                    primary_cause: primary_error.to_string(),
                    fallback_provider: fallback.name().to_string(),
                    fallback_cause: fallback_error.to_string(),
                })
            }
        }
    }
}

/// Construct a provider implementation for the configured kind.
fn build_provider(
    config: &ProviderConfig,
    timeout: Duration,
) -> Result<Arc<dyn VisionProvider>, ProviderError> {
    let provider: Arc<dyn VisionProvider> = match config.kind {
        ProviderKind::Openai => Arc::new(OpenAiVision::new(config, timeout)?),
        ProviderKind::Gemini => Arc::new(GeminiVision::new(config, timeout)?),
    };

    Ok(provider)
}

/// Keep provider error bodies log sized.
fn truncate_body(body: &str) -> String {
    const MAX_CHARS: usize = 512;

    if body.chars().count() <= MAX_CHARS {
        body.to_string()
    } else {
        format!("{}...", body.chars().take(MAX_CHARS).collect::<String>())
    }
}
