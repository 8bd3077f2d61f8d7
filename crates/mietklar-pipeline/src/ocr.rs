//! Text extraction stage with process-lifetime OCR cache.

use std::collections::HashMap;
use std::sync::Mutex;

use sha2::{Digest, Sha256};
use tracing::{debug, error, info};
use uuid::Uuid;

use mietklar_core::{ChatBackend, ImageInput};

use crate::prompts::TEXT_EXTRACTION_PROMPT;

/// Process-wide memo of extraction results, keyed by a fingerprint of the
/// input image set. Entries are write-once; the cache lives for the process
/// lifetime and is never persisted.
#[derive(Default)]
pub struct OcrCache {
    entries: Mutex<HashMap<String, String>>,
}

impl OcrCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deterministic fingerprint of an image set: SHA-256 over the sorted
    /// id list, so page order does not affect the key.
    pub fn fingerprint(file_ids: &[Uuid]) -> String {
        let mut ids: Vec<String> = file_ids.iter().map(|id| id.to_string()).collect();
        ids.sort();
        let mut hasher = Sha256::new();
        hasher.update(ids.join(",").as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    /// Insert if absent. Entries are immutable once written, so a concurrent
    /// duplicate computation keeps the first value.
    pub fn insert(&self, key: String, text: String) {
        self.entries.lock().unwrap().entry(key).or_insert(text);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }
}

/// Extract full text from contract page images.
///
/// Consults the cache first; a hit skips the provider entirely and costs
/// zero tokens. Provider failures and empty responses both yield an empty
/// string; the orchestrator decides fatality. Only non-empty results are
/// cached.
pub async fn extract_text(
    backend: &dyn ChatBackend,
    cache: &OcrCache,
    file_ids: &[Uuid],
    images: &[ImageInput],
) -> (String, u64) {
    let key = OcrCache::fingerprint(file_ids);
    if let Some(cached) = cache.get(&key) {
        info!(page_count = images.len(), "Using cached OCR results");
        return (cached, 0);
    }

    debug!(page_count = images.len(), "Extracting text from contract pages");

    match backend
        .generate_with_images("", TEXT_EXTRACTION_PROMPT, images)
        .await
    {
        Ok(gen) => {
            let text = gen.text.trim().to_string();
            if text.is_empty() {
                error!("Text extraction returned an empty response");
            } else {
                info!(
                    chars = text.len(),
                    token_count = gen.token_count,
                    "Text extraction complete"
                );
                cache.insert(key, text.clone());
            }
            (text, gen.token_count)
        }
        Err(e) => {
            error!(error = %e, "Text extraction failed");
            (String::new(), 0)
        }
    }
}
