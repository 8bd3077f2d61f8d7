//! Mock chat backend for deterministic testing.
//!
//! Provides a mock implementation of [`ChatBackend`] that returns canned
//! responses and logs every call for assertion.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use mietklar_inference::mock::MockChatBackend;
//!
//! let backend = MockChatBackend::new()
//!     .with_default_response("Mock response")
//!     .with_response_mapping("Mietvertrag", "{\"basic_rent\": 850}");
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use mietklar_core::{ChatBackend, Error, Generation, ImageInput, Result};

/// Mock chat backend for testing.
#[derive(Clone)]
pub struct MockChatBackend {
    config: Arc<MockConfig>,
    call_log: Arc<Mutex<Vec<MockCall>>>,
}

#[derive(Debug, Clone)]
struct MockConfig {
    /// Responses selected when the prompt contains the key.
    mapped_responses: Vec<(String, String)>,
    default_response: String,
    tokens_per_call: u64,
    /// Operations that fail unconditionally ("generate", "generate_json",
    /// "generate_with_images"), or "*" for all.
    failing_operations: HashMap<String, String>,
}

/// One logged backend call.
#[derive(Debug, Clone)]
pub struct MockCall {
    pub operation: String,
    pub system: String,
    pub prompt: String,
    pub image_count: usize,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            mapped_responses: Vec::new(),
            default_response: "Mock response".to_string(),
            tokens_per_call: 10,
            failing_operations: HashMap::new(),
        }
    }
}

impl MockChatBackend {
    /// Create a new mock backend with default configuration.
    pub fn new() -> Self {
        Self {
            config: Arc::new(MockConfig::default()),
            call_log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Set the fallback response for unmatched prompts.
    pub fn with_default_response(mut self, response: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.config).default_response = response.into();
        self
    }

    /// Add a response returned when the system or user prompt contains
    /// `needle`. Mappings are checked in insertion order; first match wins.
    pub fn with_response_mapping(
        mut self,
        needle: impl Into<String>,
        response: impl Into<String>,
    ) -> Self {
        Arc::make_mut(&mut self.config)
            .mapped_responses
            .push((needle.into(), response.into()));
        self
    }

    /// Set the token count reported on every successful call.
    pub fn with_tokens_per_call(mut self, tokens: u64) -> Self {
        Arc::make_mut(&mut self.config).tokens_per_call = tokens;
        self
    }

    /// Make the named operation fail with the given message.
    /// Use `"*"` to fail every operation.
    pub fn with_failing_operation(
        mut self,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Arc::make_mut(&mut self.config)
            .failing_operations
            .insert(operation.into(), message.into());
        self
    }

    /// Get all logged calls for assertion.
    pub fn calls(&self) -> Vec<MockCall> {
        self.call_log.lock().unwrap().clone()
    }

    /// Number of calls to the named operation.
    pub fn call_count(&self, operation: &str) -> usize {
        self.call_log
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.operation == operation)
            .count()
    }

    /// Clear the call log.
    pub fn clear_calls(&self) {
        self.call_log.lock().unwrap().clear()
    }

    fn respond(
        &self,
        operation: &str,
        system: &str,
        prompt: &str,
        image_count: usize,
    ) -> Result<Generation> {
        self.call_log.lock().unwrap().push(MockCall {
            operation: operation.to_string(),
            system: system.to_string(),
            prompt: prompt.to_string(),
            image_count,
        });

        if let Some(msg) = self
            .config
            .failing_operations
            .get(operation)
            .or_else(|| self.config.failing_operations.get("*"))
        {
            return Err(Error::Inference(msg.clone()));
        }

        let text = self
            .config
            .mapped_responses
            .iter()
            .find(|(needle, _)| {
                prompt.contains(needle.as_str()) || system.contains(needle.as_str())
            })
            .map(|(_, response)| response.clone())
            .unwrap_or_else(|| self.config.default_response.clone());

        Ok(Generation {
            text,
            token_count: self.config.tokens_per_call,
        })
    }
}

impl Default for MockChatBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatBackend for MockChatBackend {
    async fn generate(&self, system: &str, prompt: &str) -> Result<Generation> {
        self.respond("generate", system, prompt, 0)
    }

    async fn generate_json(&self, system: &str, prompt: &str) -> Result<Generation> {
        self.respond("generate_json", system, prompt, 0)
    }

    async fn generate_with_images(
        &self,
        system: &str,
        prompt: &str,
        images: &[ImageInput],
    ) -> Result<Generation> {
        self.respond("generate_with_images", system, prompt, images.len())
    }

    fn model_name(&self) -> &str {
        "mock-model"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn default_response_and_call_log() {
        let backend = MockChatBackend::new().with_default_response("Antwort");
        let gen = backend.generate("sys", "Frage").await.unwrap();
        assert_eq!(gen.text, "Antwort");
        assert_eq!(gen.token_count, 10);

        let calls = backend.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].operation, "generate");
        assert_eq!(calls[0].prompt, "Frage");
    }

    #[tokio::test]
    async fn mapped_response_matches_substring() {
        let backend = MockChatBackend::new()
            .with_default_response("fallback")
            .with_response_mapping("Mietvertrag", "{\"basic_rent\": 850}");

        let gen = backend
            .generate_json("", "Analysiere diesen Mietvertrag bitte")
            .await
            .unwrap();
        assert_eq!(gen.text, "{\"basic_rent\": 850}");

        let other = backend.generate_json("", "Etwas anderes").await.unwrap();
        assert_eq!(other.text, "fallback");
    }

    #[tokio::test]
    async fn failing_operation_errors_but_still_logs() {
        let backend =
            MockChatBackend::new().with_failing_operation("generate_with_images", "vision down");

        let images = vec![ImageInput {
            mime_type: "image/png".to_string(),
            data: vec![1, 2, 3],
        }];
        let err = backend
            .generate_with_images("", "Beschreibe", &images)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("vision down"));
        assert_eq!(backend.call_count("generate_with_images"), 1);

        // Other operations still succeed.
        assert!(backend.generate("", "ok").await.is_ok());
    }
}
