//! Domain models for mietklar.
//!
//! A [`Contract`] is one uploaded rental contract. Its scanned pages are
//! [`ContractFile`] records whose bytes live in the blob storage collaborator.
//! [`ContractDetails`] is the flat record of extracted attributes written by
//! the analysis pipeline.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

// =============================================================================
// CONTRACT LIFECYCLE
// =============================================================================

/// Lifecycle status of a contract.
///
/// Mutated only by the analysis flow (`Processing` → `Analyzed` | `Error`)
/// and by upload (`Uploaded`). The status field is the only externally
/// visible success/failure signal of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContractStatus {
    /// Pages uploaded, analysis not yet started.
    Uploaded,
    /// A pipeline run is active. At most one per contract at a time.
    Processing,
    /// Last pipeline run completed.
    Analyzed,
    /// Last pipeline run failed fatally.
    Error,
}

impl ContractStatus {
    /// Terminal states end the status stream for a watching client.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Analyzed | Self::Error)
    }

    /// Stable string form used in the database and on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uploaded => "uploaded",
            Self::Processing => "processing",
            Self::Analyzed => "analyzed",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for ContractStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ContractStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uploaded" => Ok(Self::Uploaded),
            "processing" => Ok(Self::Processing),
            "analyzed" => Ok(Self::Analyzed),
            "error" => Ok(Self::Error),
            other => Err(crate::Error::InvalidInput(format!(
                "Unknown contract status: {}",
                other
            ))),
        }
    }
}

/// An uploaded rental contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contract {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub uploaded_at: DateTime<Utc>,
    pub status: ContractStatus,
    pub archived: bool,
    pub archived_at: Option<DateTime<Utc>>,
    /// Retention period driving the scheduled deletion date.
    pub retention_days: i32,
    pub scheduled_deletion_at: Option<NaiveDate>,
}

/// Metadata for one scanned page of a contract.
///
/// The page bytes themselves are held by the storage collaborator under
/// `id`; they are opaque here (encrypted at rest by the collaborator).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ContractFile {
    pub id: Uuid,
    pub contract_id: Uuid,
    pub file_name: String,
    pub content_type: String,
    pub file_size: i64,
    pub uploaded_at: DateTime<Utc>,
}

// =============================================================================
// EXTRACTED DETAILS
// =============================================================================

/// One simplified clause produced by the simplification stage.
///
/// `title` is the merge key: items sharing a title are folded into one entry
/// with their texts space-joined, in first-seen order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimplifiedParagraph {
    pub title: String,
    pub simplified: String,
}

/// Flat record of extracted contract attributes, one-to-one with a contract.
///
/// Every field is nullable: a pipeline run only overwrites the keys present
/// in its extraction payload, so a failed stage leaves prior values intact.
#[derive(Debug, Clone, Default, Serialize, Deserialize, sqlx::FromRow)]
pub struct ContractDetails {
    pub contract_id: Uuid,

    // Basic contract information
    pub contract_type: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,

    // Property information
    pub street: Option<String>,
    pub city: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
    pub property_type: Option<String>,
    pub number_of_rooms: Option<Decimal>,
    /// Living space in square meters.
    pub living_space: Option<Decimal>,

    // Property features
    pub kitchen: Option<bool>,
    pub bathroom: Option<bool>,
    pub separate_wc: Option<bool>,
    pub balcony_or_terrace: Option<bool>,
    pub garden: Option<bool>,
    pub garage_or_parking: Option<bool>,
    pub elevator: Option<bool>,

    // Monthly costs
    pub basic_rent: Option<Decimal>,
    pub operating_costs: Option<Decimal>,
    pub heating_costs: Option<Decimal>,
    pub garage_costs: Option<Decimal>,
    pub other_costs: Option<Decimal>,
    pub deposit: Option<Decimal>,
    pub notice_period: Option<String>,

    // Narrative fields
    pub full_contract_text: Option<String>,
    /// JSON array of [`SimplifiedParagraph`].
    pub simplified_paragraphs: Option<JsonValue>,
    pub neighborhood_analysis: Option<String>,
}

/// Allow-listed detail field names accepted at merge time.
///
/// An extraction payload key not in this list is ignored, never an error
/// (forward-compatible schema drift).
pub const DETAIL_FIELDS: &[&str] = &[
    "contract_type",
    "start_date",
    "end_date",
    "street",
    "city",
    "postal_code",
    "country",
    "property_type",
    "number_of_rooms",
    "living_space",
    "kitchen",
    "bathroom",
    "separate_wc",
    "balcony_or_terrace",
    "garden",
    "garage_or_parking",
    "elevator",
    "basic_rent",
    "operating_costs",
    "heating_costs",
    "garage_costs",
    "other_costs",
    "deposit",
    "notice_period",
    "full_contract_text",
    "simplified_paragraphs",
    "neighborhood_analysis",
];

/// Whether a payload key maps onto a [`ContractDetails`] column.
pub fn is_detail_field(name: &str) -> bool {
    DETAIL_FIELDS.contains(&name)
}

/// Machine-readable schema description embedded in the extraction prompt.
///
/// Field name → `"<primitive type>, null"`, matching the columns of
/// [`ContractDetails`]. Narrative fields filled by other stages (full text,
/// simplified paragraphs, neighborhood analysis) are excluded so the model
/// does not try to produce them.
pub fn detail_schema_description() -> serde_json::Map<String, JsonValue> {
    let mut schema = serde_json::Map::new();
    let entry = |t: &str| JsonValue::String(format!("{}, null", t));

    schema.insert("contract_type".into(), entry("string"));
    schema.insert("start_date".into(), entry("date"));
    schema.insert("end_date".into(), entry("date"));
    schema.insert("street".into(), entry("string"));
    schema.insert("city".into(), entry("string"));
    schema.insert("postal_code".into(), entry("string"));
    schema.insert("country".into(), entry("string"));
    schema.insert("property_type".into(), entry("string"));
    schema.insert("number_of_rooms".into(), entry("number"));
    schema.insert("living_space".into(), entry("number"));
    for feature in [
        "kitchen",
        "bathroom",
        "separate_wc",
        "balcony_or_terrace",
        "garden",
        "garage_or_parking",
        "elevator",
    ] {
        schema.insert(feature.into(), entry("boolean"));
    }
    for cost in [
        "basic_rent",
        "operating_costs",
        "heating_costs",
        "garage_costs",
        "other_costs",
        "deposit",
    ] {
        schema.insert(cost.into(), entry("number"));
    }
    schema.insert("notice_period".into(), entry("string"));
    schema
}

// =============================================================================
// TOKEN ACCOUNTING
// =============================================================================

/// Running token counter accumulated across all stage calls of one run.
///
/// Kept by the orchestrator and returned to the caller as an audit value,
/// even when later stages fail.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage(u64);

impl TokenUsage {
    /// Fresh counter at zero.
    pub fn new() -> Self {
        Self(0)
    }

    /// Add tokens spent by one provider call.
    pub fn add(&mut self, tokens: u64) {
        self.0 = self.0.saturating_add(tokens);
    }

    /// Total tokens spent so far.
    pub fn total(&self) -> u64 {
        self.0
    }
}
