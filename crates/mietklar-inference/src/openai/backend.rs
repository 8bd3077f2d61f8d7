//! OpenAI-compatible chat backend implementation.

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info, warn};

use mietklar_core::{defaults, ChatBackend, Error, Generation, ImageInput, Result};

use super::types::*;

/// Configuration for the OpenAI-compatible backend.
#[derive(Debug, Clone)]
pub struct OpenAIConfig {
    /// Base URL for the API endpoint.
    pub base_url: String,
    /// API key for authentication (optional for local endpoints).
    pub api_key: Option<String>,
    /// Model to use for text generation.
    pub gen_model: String,
    /// Vision-capable model for image requests.
    pub vision_model: String,
    /// Request timeout in seconds.
    pub timeout_seconds: u64,
    /// Skip TLS verification (for self-signed certs in local environments).
    pub skip_tls_verify: bool,
}

impl Default for OpenAIConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::CHAT_BASE_URL.to_string(),
            api_key: None,
            gen_model: defaults::GEN_MODEL.to_string(),
            vision_model: defaults::VISION_MODEL.to_string(),
            timeout_seconds: defaults::GEN_TIMEOUT_SECS,
            skip_tls_verify: false,
        }
    }
}

/// OpenAI-compatible chat backend.
pub struct OpenAIBackend {
    client: Client,
    config: OpenAIConfig,
}

impl OpenAIBackend {
    /// Create a new backend with the given configuration.
    pub fn new(config: OpenAIConfig) -> Result<Self> {
        let mut client_builder =
            Client::builder().timeout(Duration::from_secs(config.timeout_seconds));

        if config.skip_tls_verify {
            client_builder = client_builder.danger_accept_invalid_certs(true);
        }

        let client = client_builder
            .build()
            .map_err(|e| Error::Inference(format!("Failed to create HTTP client: {}", e)))?;

        info!(
            "Initializing chat backend: url={}, gen={}, vision={}",
            config.base_url, config.gen_model, config.vision_model
        );

        Ok(Self { client, config })
    }

    /// Create with default configuration.
    pub fn with_defaults() -> Result<Self> {
        Self::new(OpenAIConfig::default())
    }

    /// Create from environment variables.
    pub fn from_env() -> Result<Self> {
        let config = OpenAIConfig {
            base_url: std::env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| defaults::CHAT_BASE_URL.to_string()),
            api_key: std::env::var("OPENAI_API_KEY").ok(),
            gen_model: std::env::var("OPENAI_GEN_MODEL")
                .unwrap_or_else(|_| defaults::GEN_MODEL.to_string()),
            vision_model: std::env::var("OPENAI_VISION_MODEL")
                .unwrap_or_else(|_| defaults::VISION_MODEL.to_string()),
            timeout_seconds: std::env::var("OPENAI_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults::GEN_TIMEOUT_SECS),
            skip_tls_verify: std::env::var("OPENAI_SKIP_TLS_VERIFY")
                .map(|v| v == "1" || v.to_lowercase() == "true")
                .unwrap_or(false),
        };

        Self::new(config)
    }

    /// Get the current configuration.
    pub fn config(&self) -> &OpenAIConfig {
        &self.config
    }

    /// Build a request with authentication if configured.
    fn build_request(&self, endpoint: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), endpoint);
        let mut req = self.client.post(&url);

        if let Some(ref api_key) = self.config.api_key {
            req = req.header("Authorization", format!("Bearer {}", api_key));
        }

        req.header("Content-Type", "application/json")
    }

    async fn complete(&self, request: ChatCompletionRequest) -> Result<Generation> {
        let model = request.model.clone();
        let response = self
            .build_request("/chat/completions")
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Inference(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body: ApiErrorResponse = response.json().await.unwrap_or(ApiErrorResponse {
                error: ApiError {
                    message: "Unknown error".to_string(),
                    error_type: None,
                },
            });
            return Err(Error::Inference(format!(
                "Chat API returned {}: {}",
                status, body.error.message
            )));
        }

        let result: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| Error::Inference(format!("Failed to parse response: {}", e)))?;

        let text = result
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();

        let token_count = result.usage.map(|u| u.total_tokens as u64).unwrap_or_else(|| {
            warn!(model, "Response carried no usage block, counting zero tokens");
            0
        });

        debug!(
            model,
            response_len = text.len(),
            token_count,
            "Generation complete"
        );
        Ok(Generation { text, token_count })
    }

    fn base_messages(system: &str, prompt: &str) -> Vec<ChatMessage> {
        let mut messages = Vec::new();
        if !system.is_empty() {
            messages.push(ChatMessage::system(system));
        }
        messages.push(ChatMessage::user(prompt));
        messages
    }
}

#[async_trait]
impl ChatBackend for OpenAIBackend {
    async fn generate(&self, system: &str, prompt: &str) -> Result<Generation> {
        debug!(
            model = %self.config.gen_model,
            prompt_len = prompt.len(),
            "Generating text"
        );

        self.complete(ChatCompletionRequest {
            model: self.config.gen_model.clone(),
            messages: Self::base_messages(system, prompt),
            temperature: None,
            max_tokens: None,
            response_format: None,
        })
        .await
    }

    async fn generate_json(&self, system: &str, prompt: &str) -> Result<Generation> {
        debug!(
            model = %self.config.gen_model,
            prompt_len = prompt.len(),
            "Generating JSON"
        );

        self.complete(ChatCompletionRequest {
            model: self.config.gen_model.clone(),
            messages: Self::base_messages(system, prompt),
            temperature: None,
            max_tokens: None,
            response_format: Some(ResponseFormat::json_object()),
        })
        .await
    }

    async fn generate_with_images(
        &self,
        system: &str,
        prompt: &str,
        images: &[ImageInput],
    ) -> Result<Generation> {
        debug!(
            model = %self.config.vision_model,
            image_count = images.len(),
            "Generating with images"
        );

        let mut parts = vec![ContentPart::Text {
            text: prompt.to_string(),
        }];
        for image in images {
            let encoded = base64::engine::general_purpose::STANDARD.encode(&image.data);
            parts.push(ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: format!("data:{};base64,{}", image.mime_type, encoded),
                },
            });
        }

        let mut messages = Vec::new();
        if !system.is_empty() {
            messages.push(ChatMessage::system(system));
        }
        messages.push(ChatMessage::user_parts(parts));

        self.complete(ChatCompletionRequest {
            model: self.config.vision_model.clone(),
            messages,
            temperature: None,
            max_tokens: None,
            response_format: None,
        })
        .await
    }

    fn model_name(&self) -> &str {
        &self.config.gen_model
    }
}
