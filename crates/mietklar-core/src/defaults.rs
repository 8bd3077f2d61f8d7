//! Centralized default constants for mietklar.
//!
//! **This module is the single source of truth** for shared default values.
//! All crates reference these constants instead of defining their own magic
//! numbers.

// =============================================================================
// CHUNKING
// =============================================================================

/// Character budget per simplification chunk.
///
/// A chunk never exceeds this unless a single paragraph alone does, in which
/// case the paragraph is emitted whole as an oversized chunk.
pub const SIMPLIFY_CHUNK_BUDGET: usize = 4000;

// =============================================================================
// MAP COMPOSITING
// =============================================================================

/// Web-Mercator tile edge length in pixels.
pub const TILE_SIZE: u32 = 256;

/// Zoom level for neighborhood map composites.
pub const MAP_ZOOM: u32 = 16;

/// Default neighborhood map width in pixels.
pub const MAP_WIDTH_PX: u32 = 800;

/// Default neighborhood map height in pixels.
pub const MAP_HEIGHT_PX: u32 = 600;

/// Timeout for a single tile fetch (seconds).
pub const TILE_FETCH_TIMEOUT_SECS: u64 = 5;

// =============================================================================
// INFERENCE
// =============================================================================

/// Default timeout for generation requests (seconds).
pub const GEN_TIMEOUT_SECS: u64 = 300;

/// Default chat-completions endpoint.
pub const CHAT_BASE_URL: &str = "https://api.openai.com/v1";

/// Default text model for extraction and simplification.
pub const GEN_MODEL: &str = "gpt-4o-mini";

/// Default vision-capable model for OCR and map narration.
pub const VISION_MODEL: &str = "gpt-4o";

// =============================================================================
// GEOCODING / TILES
// =============================================================================

/// Default Nominatim-compatible geocoding endpoint.
pub const GEOCODE_BASE_URL: &str = "https://nominatim.openstreetmap.org";

/// Default OSM-compatible tile server.
pub const TILE_BASE_URL: &str = "https://tile.openstreetmap.org";

// =============================================================================
// STATUS STREAM
// =============================================================================

/// Wall-clock ceiling for one status stream (seconds). The stream emits a
/// close event when this elapses even if the contract never reaches a
/// terminal status.
pub const STATUS_STREAM_TIMEOUT_SECS: u64 = 300;

/// SSE keep-alive interval (seconds).
pub const STATUS_STREAM_KEEPALIVE_SECS: u64 = 15;

// =============================================================================
// EVENT BUS
// =============================================================================

/// Broadcast channel capacity for server events.
pub const EVENT_BUS_CAPACITY: usize = 256;

// =============================================================================
// CONTRACTS
// =============================================================================

/// Default retention period for uploaded contracts (days).
pub const RETENTION_DAYS: i32 = 365;

/// Entitlement capability code checked before analysis.
pub const CAP_ANALYSES: &str = "analyses";

/// Entitlement capability code checked before upload.
pub const CAP_UPLOADS: &str = "contract_uploads";

// =============================================================================
// SERVER
// =============================================================================

/// Default HTTP listen port.
pub const HTTP_PORT: u16 = 8420;

/// Maximum upload body size in bytes (32 MiB).
pub const MAX_UPLOAD_BYTES: usize = 32 * 1024 * 1024;
