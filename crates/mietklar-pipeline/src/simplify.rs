//! Paragraph simplification stage with chunk fan-out and title-keyed merge.

use futures::future::join_all;
use serde_json::Value as JsonValue;
use tracing::{debug, error, info, warn};

use mietklar_core::{ChatBackend, SimplifiedParagraph};

use crate::chunking::chunk_for_simplification;
use crate::json_repair::repair;
use crate::prompts::SIMPLIFICATION_PROMPT;

/// Simplify contract paragraphs chunk by chunk.
///
/// Chunks are sent concurrently; a chunk whose response cannot be decoded is
/// dropped with a warning rather than failing the stage. Entries sharing a
/// title are merged in first-seen order with their texts space-joined.
pub async fn simplify_paragraphs(
    backend: &dyn ChatBackend,
    text: &str,
) -> (Vec<SimplifiedParagraph>, u64) {
    if text.is_empty() {
        return (Vec::new(), 0);
    }

    let chunks = chunk_for_simplification(text);
    debug!(chunk_count = chunks.len(), "Simplifying contract paragraphs");

    let calls = chunks
        .iter()
        .map(|chunk| backend.generate_json(SIMPLIFICATION_PROMPT, chunk));
    let results = join_all(calls).await;

    let mut entries = Vec::new();
    let mut token_count = 0u64;

    for result in results {
        let gen = match result {
            Ok(gen) => gen,
            Err(e) => {
                error!(error = %e, "Simplification chunk call failed");
                continue;
            }
        };
        token_count += gen.token_count;

        match repair(&gen.text) {
            Some(JsonValue::Array(items)) => {
                for item in items {
                    let title = item.get("title").and_then(JsonValue::as_str);
                    let simplified = item.get("simplified").and_then(JsonValue::as_str);
                    if let (Some(title), Some(simplified)) = (title, simplified) {
                        if !title.is_empty() && !simplified.is_empty() {
                            entries.push((title.to_string(), simplified.to_string()));
                        }
                    }
                }
            }
            _ => warn!("Failed to decode JSON from simplification response"),
        }
    }

    let merged = merge_paragraphs(entries);
    info!(
        paragraph_count = merged.len(),
        token_count, "Paragraph simplification complete"
    );
    (merged, token_count)
}

/// Merge entries by title, keeping first-seen order and space-joining the
/// simplified texts of duplicates.
fn merge_paragraphs(entries: Vec<(String, String)>) -> Vec<SimplifiedParagraph> {
    let mut merged: Vec<SimplifiedParagraph> = Vec::new();

    for (title, simplified) in entries {
        match merged.iter_mut().find(|p| p.title == title) {
            Some(existing) => {
                existing.simplified.push(' ');
                existing.simplified.push_str(&simplified);
            }
            None => merged.push(SimplifiedParagraph { title, simplified }),
        }
    }

    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use mietklar_inference::MockChatBackend;

    #[test]
    fn duplicate_titles_merge_in_first_seen_order() {
        let merged = merge_paragraphs(vec![
            ("A".to_string(), "b1".to_string()),
            ("B".to_string(), "c1".to_string()),
            ("A".to_string(), "b2".to_string()),
        ]);

        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].title, "A");
        assert_eq!(merged[0].simplified, "b1 b2");
        assert_eq!(merged[1].title, "B");
        assert_eq!(merged[1].simplified, "c1");
    }

    #[tokio::test]
    async fn simplifies_and_counts_tokens() {
        let backend = MockChatBackend::new()
            .with_default_response(
                r#"[{"title": "Mietzins", "simplified": "Die Miete beträgt 850 Euro."}]"#,
            )
            .with_tokens_per_call(20);

        let (paragraphs, tokens) =
            simplify_paragraphs(&backend, "§1 Mietzins\n\nDer Mietzins beträgt...").await;
        assert_eq!(paragraphs.len(), 1);
        assert_eq!(paragraphs[0].title, "Mietzins");
        assert_eq!(tokens, 20);
    }

    #[tokio::test]
    async fn undecodable_chunk_is_dropped() {
        // Long text forces two chunks; one response decodes, one does not.
        let para_a = format!("Kapitel A\n\n{}", "a".repeat(3900));
        let text = format!("{}\n\nKapitel B {}", para_a, "b".repeat(3900));

        let backend = MockChatBackend::new()
            .with_response_mapping(
                "Kapitel A",
                r#"[{"title": "A", "simplified": "Inhalt A"}]"#,
            )
            .with_response_mapping("Kapitel B", "das ist kein JSON")
            .with_tokens_per_call(5);

        let (paragraphs, tokens) = simplify_paragraphs(&backend, &text).await;
        assert_eq!(paragraphs.len(), 1);
        assert_eq!(paragraphs[0].title, "A");
        // Both chunk calls spent tokens.
        assert_eq!(tokens, 10);
        assert_eq!(backend.call_count("generate_json"), 2);
    }

    #[tokio::test]
    async fn empty_text_skips_the_provider() {
        let backend = MockChatBackend::new();
        let (paragraphs, tokens) = simplify_paragraphs(&backend, "").await;
        assert!(paragraphs.is_empty());
        assert_eq!(tokens, 0);
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn entries_missing_fields_are_skipped() {
        let backend = MockChatBackend::new().with_default_response(
            r#"[{"title": "Ok", "simplified": "Text"}, {"title": "NurTitel"}, {"simplified": "NurText"}]"#,
        );
        let (paragraphs, _) = simplify_paragraphs(&backend, "§1 Vertragstext").await;
        assert_eq!(paragraphs.len(), 1);
        assert_eq!(paragraphs[0].title, "Ok");
    }
}
