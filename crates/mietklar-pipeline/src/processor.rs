//! Contract analysis orchestrator.

use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Map as JsonMap;
use serde_json::Value as JsonValue;
use tempfile::NamedTempFile;
use tracing::{error, info, warn};
use uuid::Uuid;

use mietklar_core::{
    ChatBackend, Contract, ContractDetailsRepository, ContractFileRepository, Error, Geocoder,
    ImageInput, Result, StorageBackend, TileFetcher, TokenUsage,
};

use crate::neighborhood::analyze_neighborhood;
use crate::ocr::{extract_text, OcrCache};
use crate::{details, simplify};

/// Result of one completed pipeline run.
#[derive(Debug)]
pub struct ProcessOutcome {
    pub full_text: String,
    pub token_count: u64,
    pub processing_time: Duration,
}

/// One resolved contract page. The temp file is the only local copy of the
/// page bytes; its Drop deletes it on every exit path of the run.
struct ResolvedPage {
    file_id: Uuid,
    mime_type: String,
    handle: NamedTempFile,
}

impl ResolvedPage {
    /// Read the page bytes back from the temp handle for a provider call.
    fn read_image(&self) -> Result<ImageInput> {
        Ok(ImageInput {
            mime_type: self.mime_type.clone(),
            data: std::fs::read(self.handle.path())?,
        })
    }
}

/// Orchestrates one analysis run per contract.
///
/// The processor never touches contract status; the caller claims the
/// contract atomically before `process` and writes the terminal status
/// afterwards. All stage-local failures are absorbed as empty contributions;
/// `process` returns `Err` only for the fatal conditions (no pages, no
/// extractable text).
pub struct ContractProcessor {
    chat: Arc<dyn ChatBackend>,
    storage: Arc<dyn StorageBackend>,
    files: Arc<dyn ContractFileRepository>,
    details: Arc<dyn ContractDetailsRepository>,
    geocoder: Arc<dyn Geocoder>,
    tiles: Arc<dyn TileFetcher>,
    ocr_cache: Arc<OcrCache>,
}

impl ContractProcessor {
    pub fn new(
        chat: Arc<dyn ChatBackend>,
        storage: Arc<dyn StorageBackend>,
        files: Arc<dyn ContractFileRepository>,
        details: Arc<dyn ContractDetailsRepository>,
        geocoder: Arc<dyn Geocoder>,
        tiles: Arc<dyn TileFetcher>,
        ocr_cache: Arc<OcrCache>,
    ) -> Self {
        Self {
            chat,
            storage,
            files,
            details,
            geocoder,
            tiles,
            ocr_cache,
        }
    }

    /// Run the full analysis pipeline for one contract.
    pub async fn process(&self, contract: &Contract) -> Result<ProcessOutcome> {
        let start = Instant::now();
        info!(contract_id = %contract.id, "Starting contract processing");

        let pages = self.resolve_pages(contract.id).await?;
        let file_ids: Vec<Uuid> = pages.iter().map(|p| p.file_id).collect();
        let images: Vec<ImageInput> = pages
            .iter()
            .map(ResolvedPage::read_image)
            .collect::<Result<_>>()?;

        let mut tokens = TokenUsage::new();
        let mut payload: JsonMap<String, JsonValue> = JsonMap::new();

        // Text extraction, reusing previously persisted text when present.
        let existing = self.details.get_or_create(contract.id).await?;
        let full_text = match existing.full_contract_text.filter(|t| !t.is_empty()) {
            Some(text) => {
                info!(contract_id = %contract.id, "Using existing full contract text");
                text
            }
            None => {
                let (text, ocr_tokens) =
                    extract_text(self.chat.as_ref(), &self.ocr_cache, &file_ids, &images).await;
                tokens.add(ocr_tokens);
                if text.is_empty() {
                    error!(contract_id = %contract.id, stage = "text_extraction", "Text extraction failed");
                    return Err(Error::Inference(
                        "text extraction produced no text".to_string(),
                    ));
                }
                text
            }
        };
        payload.insert(
            "full_contract_text".to_string(),
            JsonValue::String(full_text.clone()),
        );

        // Detail extraction and simplification run concurrently; neither can
        // abort the other.
        let (detail_result, simplify_result) = tokio::join!(
            details::extract_details(self.chat.as_ref(), &full_text, &images),
            simplify::simplify_paragraphs(self.chat.as_ref(), &full_text),
        );

        let (fields, detail_tokens) = detail_result;
        tokens.add(detail_tokens);
        if fields.is_empty() {
            warn!(contract_id = %contract.id, stage = "detail_extraction", "Stage contributed no fields");
        }
        for (key, value) in fields {
            payload.insert(key, value);
        }

        let (paragraphs, simplify_tokens) = simplify_result;
        tokens.add(simplify_tokens);
        if paragraphs.is_empty() {
            warn!(contract_id = %contract.id, stage = "simplification", "Stage contributed no paragraphs");
        } else {
            payload.insert(
                "simplified_paragraphs".to_string(),
                serde_json::to_value(&paragraphs)?,
            );
        }

        // Neighborhood enrichment depends on the extracted address.
        let address = build_address(&payload);
        if !address.is_empty() {
            let (narrative, neighborhood_tokens) = analyze_neighborhood(
                self.chat.as_ref(),
                self.geocoder.as_ref(),
                self.tiles.as_ref(),
                &address,
            )
            .await;
            tokens.add(neighborhood_tokens);
            if !narrative.is_empty() {
                payload.insert(
                    "neighborhood_analysis".to_string(),
                    JsonValue::String(narrative),
                );
            }
        }

        // Single atomic write of everything the run produced.
        let written = self.details.merge_update(contract.id, &payload).await?;

        let processing_time = start.elapsed();
        info!(
            contract_id = %contract.id,
            columns = written,
            token_count = tokens.total(),
            duration_ms = processing_time.as_millis() as u64,
            "Contract processing completed"
        );

        Ok(ProcessOutcome {
            full_text,
            token_count: tokens.total(),
            processing_time,
        })
    }

    /// Fetch all page images into temp handles. Individual fetch failures
    /// are skipped; zero usable pages is fatal.
    async fn resolve_pages(&self, contract_id: Uuid) -> Result<Vec<ResolvedPage>> {
        let files = self.files.list_for_contract(contract_id).await?;
        if files.is_empty() {
            error!(contract_id = %contract_id, "No contract pages found");
            return Err(Error::InvalidInput("no contract pages found".to_string()));
        }

        let mut pages = Vec::with_capacity(files.len());
        for file in &files {
            let bytes = match self.storage.get(file.id).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(contract_id = %contract_id, file_id = %file.id, error = %e, "Skipping unreadable page");
                    continue;
                }
            };

            let mut handle = NamedTempFile::new()?;
            handle.write_all(&bytes)?;

            pages.push(ResolvedPage {
                file_id: file.id,
                mime_type: file.content_type.clone(),
                handle,
            });
        }

        if pages.is_empty() {
            error!(contract_id = %contract_id, "No contract pages could be resolved");
            return Err(Error::InvalidInput(
                "no contract pages could be resolved".to_string(),
            ));
        }

        Ok(pages)
    }
}

/// Assemble the property address from extracted fields, skipping empties.
fn build_address(payload: &JsonMap<String, JsonValue>) -> String {
    ["street", "postal_code", "city", "country"]
        .iter()
        .filter_map(|key| payload.get(*key))
        .filter_map(JsonValue::as_str)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
