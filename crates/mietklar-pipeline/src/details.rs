//! Structured detail extraction stage.

use serde_json::Map as JsonMap;
use serde_json::Value as JsonValue;
use tracing::{debug, error, info, warn};

use mietklar_core::{is_detail_field, ChatBackend, ImageInput};

use crate::json_repair::repair;
use crate::prompts::detail_extraction_prompt;

/// Extract contract fields as a JSON map keyed by detail field names.
///
/// Sends the schema-bearing prompt together with the extracted text and,
/// when available, the page images. Response text goes through JSON repair;
/// anything unusable collapses to an empty map, never an error. Keys outside
/// the detail allow-list are dropped here so the merge payload only ever
/// carries known fields.
pub async fn extract_details(
    backend: &dyn ChatBackend,
    text: &str,
    images: &[ImageInput],
) -> (JsonMap<String, JsonValue>, u64) {
    debug!("Extracting full contract details");

    let system = detail_extraction_prompt();
    let result = if images.is_empty() {
        backend.generate_json(&system, text).await
    } else {
        backend.generate_with_images(&system, text, images).await
    };

    let gen = match result {
        Ok(gen) => gen,
        Err(e) => {
            error!(error = %e, "Detail extraction call failed");
            return (JsonMap::new(), 0);
        }
    };

    let Some(JsonValue::Object(raw)) = repair(&gen.text) else {
        warn!("Detail extraction produced no usable JSON object");
        return (JsonMap::new(), gen.token_count);
    };

    let mut fields = JsonMap::new();
    for (key, value) in raw {
        if is_detail_field(&key) {
            fields.insert(key, value);
        } else {
            debug!(key, "Dropping unknown field from extraction output");
        }
    }

    info!(
        field_count = fields.len(),
        token_count = gen.token_count,
        "Detail extraction complete"
    );
    (fields, gen.token_count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mietklar_inference::MockChatBackend;

    #[tokio::test]
    async fn extracts_allow_listed_fields() {
        let backend = MockChatBackend::new()
            .with_default_response(r#"{"basic_rent": 850.0, "city": "Tübingen", "hallucinated": 1}"#)
            .with_tokens_per_call(30);

        let (fields, tokens) = extract_details(&backend, "Vertragstext", &[]).await;
        assert_eq!(fields.get("basic_rent").unwrap(), 850.0);
        assert_eq!(fields.get("city").unwrap(), "Tübingen");
        assert!(!fields.contains_key("hallucinated"));
        assert_eq!(tokens, 30);
        assert_eq!(backend.call_count("generate_json"), 1);
    }

    #[tokio::test]
    async fn images_route_through_vision_call() {
        let backend =
            MockChatBackend::new().with_default_response(r#"{"property_type": "Wohnung"}"#);
        let images = vec![ImageInput {
            mime_type: "image/png".to_string(),
            data: vec![1],
        }];

        let (fields, _) = extract_details(&backend, "Text", &images).await;
        assert_eq!(fields.get("property_type").unwrap(), "Wohnung");
        assert_eq!(backend.call_count("generate_with_images"), 1);
        assert_eq!(backend.call_count("generate_json"), 0);
    }

    #[tokio::test]
    async fn unusable_output_yields_empty_map() {
        let backend = MockChatBackend::new()
            .with_default_response("Leider kann ich das nicht extrahieren.")
            .with_tokens_per_call(12);

        let (fields, tokens) = extract_details(&backend, "Text", &[]).await;
        assert!(fields.is_empty());
        // Tokens were still spent and must show in the audit count.
        assert_eq!(tokens, 12);
    }

    #[tokio::test]
    async fn call_failure_yields_empty_map() {
        let backend = MockChatBackend::new().with_failing_operation("*", "backend down");
        let (fields, tokens) = extract_details(&backend, "Text", &[]).await;
        assert!(fields.is_empty());
        assert_eq!(tokens, 0);
    }

    #[tokio::test]
    async fn fenced_output_is_repaired() {
        let backend = MockChatBackend::new()
            .with_default_response("```json\n{\"street\": \"Hauptstraße 12\"}\n```");
        let (fields, _) = extract_details(&backend, "Text", &[]).await;
        assert_eq!(fields.get("street").unwrap(), "Hauptstraße 12");
    }
}
