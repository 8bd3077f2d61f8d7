//! Core traits for mietklar abstractions.
//!
//! These traits define the seams between the analysis pipeline and its
//! external collaborators (persistence, blob storage, entitlements, model
//! providers, geocoding), enabling pluggable backends and testability.

use async_trait::async_trait;
use serde_json::Map as JsonMap;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::Result;
use crate::models::*;

// =============================================================================
// CONTRACT REPOSITORY TRAITS
// =============================================================================

/// Request for creating a new contract.
#[derive(Debug, Clone)]
pub struct CreateContractRequest {
    pub user_id: Uuid,
    pub name: String,
    pub retention_days: i32,
}

/// Repository for contract records.
#[async_trait]
pub trait ContractRepository: Send + Sync {
    /// Insert a new contract in `Uploaded` status.
    async fn create(&self, req: CreateContractRequest) -> Result<Contract>;

    /// Fetch a contract owned by `user_id`.
    async fn fetch(&self, id: Uuid, user_id: Uuid) -> Result<Contract>;

    /// List non-archived contracts for a user, newest first.
    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Contract>>;

    /// Atomically claim the contract for a pipeline run.
    ///
    /// Sets status to `Processing` only if it is not already `Processing`.
    /// Returns `false` when another run holds the claim; the caller must
    /// reject the request rather than queue it.
    async fn try_begin_processing(&self, id: Uuid) -> Result<bool>;

    /// Set the lifecycle status unconditionally.
    async fn set_status(&self, id: Uuid, status: ContractStatus) -> Result<()>;

    /// Read the current status.
    async fn status(&self, id: Uuid) -> Result<ContractStatus>;

    /// Mark the contract archived.
    async fn archive(&self, id: Uuid, user_id: Uuid) -> Result<()>;
}

/// Repository for per-page file metadata.
#[async_trait]
pub trait ContractFileRepository: Send + Sync {
    /// Record a stored page. `file_id` is the storage collaborator's id.
    async fn register(
        &self,
        file_id: Uuid,
        contract_id: Uuid,
        file_name: &str,
        content_type: &str,
        file_size: i64,
    ) -> Result<ContractFile>;

    /// List pages in upload order.
    async fn list_for_contract(&self, contract_id: Uuid) -> Result<Vec<ContractFile>>;

    /// Update metadata after an edited/redacted version replaced the bytes.
    async fn replace_content(&self, file_id: Uuid, file_size: i64) -> Result<()>;
}

/// Repository for the extracted detail record.
#[async_trait]
pub trait ContractDetailsRepository: Send + Sync {
    /// Fetch the details row, creating an empty one on first access.
    async fn get_or_create(&self, contract_id: Uuid) -> Result<ContractDetails>;

    /// Apply one extraction payload as a single write.
    ///
    /// Only keys present in the payload AND in the detail allow-list are
    /// written; everything else keeps its prior value. Unknown keys are
    /// ignored silently. Returns the number of columns written.
    async fn merge_update(
        &self,
        contract_id: Uuid,
        payload: &JsonMap<String, JsonValue>,
    ) -> Result<usize>;
}

// =============================================================================
// BLOB STORAGE
// =============================================================================

/// Storage collaborator for page image bytes.
///
/// Bytes are opaque: encryption at rest is the collaborator's concern, not
/// ours. Files are addressed by the id returned from `put`.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Retrieve the bytes for a stored file.
    async fn get(&self, file_id: Uuid) -> Result<Vec<u8>>;

    /// Store bytes for a contract page, returning the new file id.
    async fn put(
        &self,
        contract_id: Uuid,
        file_name: &str,
        content_type: &str,
        data: &[u8],
    ) -> Result<Uuid>;

    /// Delete a stored file.
    async fn delete(&self, file_id: Uuid) -> Result<()>;
}

// =============================================================================
// ENTITLEMENTS
// =============================================================================

/// Capability oracle consulted before accepting upload/analysis requests.
///
/// Returns the remaining quantity for the capability, or `None` when the
/// user holds no grant at all. Decrementing quota on use belongs to the
/// billing collaborator, not this interface.
#[async_trait]
pub trait EntitlementProvider: Send + Sync {
    async fn check(&self, user_id: Uuid, capability: &str) -> Result<Option<i64>>;
}

/// Entitlement provider granting everything. Development/test use only.
pub struct AllowAllEntitlements;

#[async_trait]
impl EntitlementProvider for AllowAllEntitlements {
    async fn check(&self, _user_id: Uuid, _capability: &str) -> Result<Option<i64>> {
        Ok(Some(i64::MAX))
    }
}

// =============================================================================
// INFERENCE
// =============================================================================

/// One provider response: text plus the tokens it cost.
#[derive(Debug, Clone, Default)]
pub struct Generation {
    pub text: String,
    pub token_count: u64,
}

/// An image handed to a multimodal provider call.
#[derive(Debug, Clone)]
pub struct ImageInput {
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// Backend for chat-completion style model calls.
///
/// Every pipeline stage wraps exactly one of these calls; token counts are
/// reported per call so the orchestrator can aggregate an audit total.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Generate text given a system prompt and user prompt.
    async fn generate(&self, system: &str, prompt: &str) -> Result<Generation>;

    /// Generate with JSON output mode enforced.
    async fn generate_json(&self, system: &str, prompt: &str) -> Result<Generation>;

    /// Generate with image inputs (vision-capable model).
    async fn generate_with_images(
        &self,
        system: &str,
        prompt: &str,
        images: &[ImageInput],
    ) -> Result<Generation>;

    /// Get the model name being used.
    fn model_name(&self) -> &str;
}

// =============================================================================
// GEOSPATIAL
// =============================================================================

/// A geocoded coordinate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

/// Forward-geocoding lookup. First result only; `None` when the address
/// cannot be resolved (non-fatal for the pipeline).
#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn geocode(&self, address: &str) -> Result<Option<GeoPoint>>;
}

/// Fetches one 256×256 map tile as encoded image bytes.
#[async_trait]
pub trait TileFetcher: Send + Sync {
    async fn fetch(&self, zoom: u32, x: u32, y: u32) -> Result<Vec<u8>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allow_all_entitlements_grants_everything() {
        let provider = AllowAllEntitlements;
        let value = provider
            .check(Uuid::new_v4(), "analyses")
            .await
            .unwrap();
        assert_eq!(value, Some(i64::MAX));
    }

    #[test]
    fn generation_default_is_empty_and_free() {
        let gen = Generation::default();
        assert!(gen.text.is_empty());
        assert_eq!(gen.token_count, 0);
    }
}
