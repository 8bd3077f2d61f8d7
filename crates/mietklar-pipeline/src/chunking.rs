//! Paragraph-preserving text chunking for the simplification stage.

use mietklar_core::defaults::SIMPLIFY_CHUNK_BUDGET;

/// Split text into chunks on blank-line paragraph boundaries.
///
/// Greedy packing: paragraphs accumulate into the current chunk until adding
/// the next one (plus its separator) would exceed `max_chars`. A single
/// paragraph longer than the budget becomes its own oversized chunk, never
/// split mid-paragraph. Joining the chunks with a blank line reproduces the
/// input text, except that an empty paragraph at either edge of the text
/// loses its separator (an empty split element carries no content to anchor
/// it to).
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    if text.is_empty() || text.len() <= max_chars {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();

    for paragraph in text.split("\n\n") {
        if current.len() + paragraph.len() + 2 <= max_chars {
            if !current.is_empty() {
                current.push_str("\n\n");
            }
            current.push_str(paragraph);
        } else {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            current = paragraph.to_string();
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

/// Chunk with the default simplification budget.
pub fn chunk_for_simplification(text: &str) -> Vec<String> {
    chunk_text(text, SIMPLIFY_CHUNK_BUDGET)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_one_chunk() {
        let chunks = chunk_text("§1 Mietzins\n\n§2 Kaution", 4000);
        assert_eq!(chunks, vec!["§1 Mietzins\n\n§2 Kaution"]);
    }

    #[test]
    fn chunks_respect_budget() {
        let paragraphs: Vec<String> = (0..20).map(|i| format!("Absatz {} {}", i, "x".repeat(200))).collect();
        let text = paragraphs.join("\n\n");
        let chunks = chunk_text(&text, 500);

        for chunk in &chunks {
            // Only an oversized single paragraph may exceed the budget.
            assert!(chunk.len() <= 500 || !chunk.contains("\n\n"));
        }
        assert!(chunks.len() > 1);
    }

    #[test]
    fn oversized_paragraph_kept_whole() {
        let big = "y".repeat(1200);
        let text = format!("kurz\n\n{}\n\nende", big);
        let chunks = chunk_text(&text, 500);

        assert!(chunks.iter().any(|c| c.len() == 1200));
        assert!(chunks.iter().all(|c| !c.is_empty()));
    }

    #[test]
    fn joining_chunks_reconstructs_input() {
        let paragraphs: Vec<String> = (0..15).map(|i| format!("Paragraph {}", i)).collect();
        let text = paragraphs.join("\n\n");
        let chunks = chunk_text(&text, 40);
        assert_eq!(chunks.join("\n\n"), text);
    }

    #[test]
    fn empty_text_is_one_empty_chunk() {
        assert_eq!(chunk_text("", 4000), vec![String::new()]);
    }

    #[test]
    fn leading_blank_line_collapses_on_rejoin() {
        let body = "a".repeat(50);
        let text = format!("\n\n{}", body);
        let chunks = chunk_text(&text, 30);
        assert_eq!(chunks.join("\n\n"), body);
    }
}
