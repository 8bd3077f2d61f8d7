//! Contract details repository with allow-listed field merge.
//!
//! The merge is the persistence half of the pipeline's partial-failure
//! policy: an extraction payload only ever overwrites the columns whose keys
//! it actually contains, so a failed stage leaves prior values untouched.
//! Unknown keys are dropped silently (forward-compatible schema drift), and
//! a present key with an explicit JSON `null` nulls the column out.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde_json::Map as JsonMap;
use serde_json::Value as JsonValue;
use sqlx::{Pool, Postgres, QueryBuilder};
use tracing::{debug, warn};
use uuid::Uuid;

use mietklar_core::{is_detail_field, ContractDetails, ContractDetailsRepository, Result};

/// PostgreSQL implementation of ContractDetailsRepository.
pub struct PgContractDetailsRepository {
    pool: Pool<Postgres>,
}

/// SQL type category of a detail column, driving payload coercion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldKind {
    Text,
    Date,
    Boolean,
    Numeric,
    Json,
}

/// Type category for an allow-listed field name.
fn field_kind(name: &str) -> FieldKind {
    match name {
        "start_date" | "end_date" => FieldKind::Date,
        "kitchen" | "bathroom" | "separate_wc" | "balcony_or_terrace" | "garden"
        | "garage_or_parking" | "elevator" => FieldKind::Boolean,
        "number_of_rooms" | "living_space" | "basic_rent" | "operating_costs"
        | "heating_costs" | "garage_costs" | "other_costs" | "deposit" => FieldKind::Numeric,
        "simplified_paragraphs" => FieldKind::Json,
        _ => FieldKind::Text,
    }
}

/// Coerced column value ready to bind.
#[derive(Debug, Clone, PartialEq)]
enum ColumnValue {
    Text(Option<String>),
    Date(Option<NaiveDate>),
    Boolean(Option<bool>),
    Numeric(Option<Decimal>),
    Json(Option<JsonValue>),
}

/// Coerce one payload value onto a column, tolerating the loose typing of
/// model output (numbers as strings, booleans as strings).
///
/// Returns `None` when the value cannot be represented at all, in which case
/// the key is skipped rather than failing the merge.
fn coerce(kind: FieldKind, value: &JsonValue) -> Option<ColumnValue> {
    if value.is_null() {
        return Some(match kind {
            FieldKind::Text => ColumnValue::Text(None),
            FieldKind::Date => ColumnValue::Date(None),
            FieldKind::Boolean => ColumnValue::Boolean(None),
            FieldKind::Numeric => ColumnValue::Numeric(None),
            FieldKind::Json => ColumnValue::Json(None),
        });
    }

    match kind {
        FieldKind::Text => match value {
            JsonValue::String(s) => Some(ColumnValue::Text(Some(s.clone()))),
            JsonValue::Number(n) => Some(ColumnValue::Text(Some(n.to_string()))),
            _ => None,
        },
        FieldKind::Date => value
            .as_str()
            .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
            .map(|d| ColumnValue::Date(Some(d))),
        FieldKind::Boolean => match value {
            JsonValue::Bool(b) => Some(ColumnValue::Boolean(Some(*b))),
            JsonValue::String(s) => match s.as_str() {
                "true" => Some(ColumnValue::Boolean(Some(true))),
                "false" => Some(ColumnValue::Boolean(Some(false))),
                _ => None,
            },
            _ => None,
        },
        FieldKind::Numeric => match value {
            JsonValue::Number(n) => Decimal::from_str(&n.to_string())
                .ok()
                .map(|d| ColumnValue::Numeric(Some(d))),
            JsonValue::String(s) => Decimal::from_str(s.trim().trim_end_matches('€').trim())
                .ok()
                .map(|d| ColumnValue::Numeric(Some(d))),
            _ => None,
        },
        FieldKind::Json => Some(ColumnValue::Json(Some(value.clone()))),
    }
}

impl PgContractDetailsRepository {
    /// Create a new PgContractDetailsRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

const DETAIL_COLUMNS: &str = "contract_id, contract_type, start_date, end_date, street, city, \
     postal_code, country, property_type, number_of_rooms, living_space, kitchen, bathroom, \
     separate_wc, balcony_or_terrace, garden, garage_or_parking, elevator, basic_rent, \
     operating_costs, heating_costs, garage_costs, other_costs, deposit, notice_period, \
     full_contract_text, simplified_paragraphs, neighborhood_analysis";

#[async_trait]
impl ContractDetailsRepository for PgContractDetailsRepository {
    async fn get_or_create(&self, contract_id: Uuid) -> Result<ContractDetails> {
        sqlx::query("INSERT INTO contract_details (contract_id) VALUES ($1) ON CONFLICT DO NOTHING")
            .bind(contract_id)
            .execute(&self.pool)
            .await?;

        let details = sqlx::query_as::<_, ContractDetails>(&format!(
            "SELECT {} FROM contract_details WHERE contract_id = $1",
            DETAIL_COLUMNS
        ))
        .bind(contract_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(details)
    }

    async fn merge_update(
        &self,
        contract_id: Uuid,
        payload: &JsonMap<String, JsonValue>,
    ) -> Result<usize> {
        // Ensure the row exists so the pipeline's single write never races
        // a missing details record.
        sqlx::query("INSERT INTO contract_details (contract_id) VALUES ($1) ON CONFLICT DO NOTHING")
            .bind(contract_id)
            .execute(&self.pool)
            .await?;

        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new("UPDATE contract_details SET ");
        let mut written = 0usize;

        for (key, value) in payload {
            if !is_detail_field(key.as_str()) {
                debug!(contract_id = %contract_id, key, "Ignoring unknown detail key");
                continue;
            }
            let Some(column) = coerce(field_kind(key), value) else {
                warn!(
                    contract_id = %contract_id,
                    key,
                    "Uncoercible detail value, skipping key"
                );
                continue;
            };

            if written > 0 {
                qb.push(", ");
            }
            // `key` passed the allow-list, so it is a known column name.
            qb.push(key.as_str());
            qb.push(" = ");
            match column {
                ColumnValue::Text(v) => qb.push_bind(v),
                ColumnValue::Date(v) => qb.push_bind(v),
                ColumnValue::Boolean(v) => qb.push_bind(v),
                ColumnValue::Numeric(v) => qb.push_bind(v),
                ColumnValue::Json(v) => qb.push_bind(v),
            };
            written += 1;
        }

        if written == 0 {
            debug!(contract_id = %contract_id, "Empty merge payload, no write");
            return Ok(0);
        }

        qb.push(" WHERE contract_id = ");
        qb.push_bind(contract_id);
        qb.build().execute(&self.pool).await?;

        debug!(contract_id = %contract_id, columns = written, "Merged detail update");
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn field_kinds_cover_allow_list() {
        for name in mietklar_core::DETAIL_FIELDS {
            // Must not panic and must return a stable category.
            let _ = field_kind(name);
        }
        assert_eq!(field_kind("basic_rent"), FieldKind::Numeric);
        assert_eq!(field_kind("kitchen"), FieldKind::Boolean);
        assert_eq!(field_kind("start_date"), FieldKind::Date);
        assert_eq!(field_kind("simplified_paragraphs"), FieldKind::Json);
        assert_eq!(field_kind("street"), FieldKind::Text);
    }

    #[test]
    fn explicit_null_nulls_the_column() {
        assert_eq!(
            coerce(FieldKind::Text, &JsonValue::Null),
            Some(ColumnValue::Text(None))
        );
        assert_eq!(
            coerce(FieldKind::Numeric, &JsonValue::Null),
            Some(ColumnValue::Numeric(None))
        );
    }

    #[test]
    fn numeric_accepts_numbers_and_numeric_strings() {
        assert_eq!(
            coerce(FieldKind::Numeric, &json!(850.5)),
            Some(ColumnValue::Numeric(Some(Decimal::from_str("850.5").unwrap())))
        );
        assert_eq!(
            coerce(FieldKind::Numeric, &json!("1200.00")),
            Some(ColumnValue::Numeric(Some(Decimal::from_str("1200.00").unwrap())))
        );
        assert_eq!(coerce(FieldKind::Numeric, &json!("n/a")), None);
    }

    #[test]
    fn boolean_accepts_bool_and_literal_strings() {
        assert_eq!(
            coerce(FieldKind::Boolean, &json!(true)),
            Some(ColumnValue::Boolean(Some(true)))
        );
        assert_eq!(
            coerce(FieldKind::Boolean, &json!("false")),
            Some(ColumnValue::Boolean(Some(false)))
        );
        assert_eq!(coerce(FieldKind::Boolean, &json!("yes")), None);
    }

    #[test]
    fn date_requires_iso_format() {
        assert_eq!(
            coerce(FieldKind::Date, &json!("2025-04-01")),
            Some(ColumnValue::Date(Some(
                NaiveDate::from_ymd_opt(2025, 4, 1).unwrap()
            )))
        );
        assert_eq!(coerce(FieldKind::Date, &json!("01.04.2025")), None);
    }

    #[test]
    fn text_accepts_strings_and_stringifies_numbers() {
        assert_eq!(
            coerce(FieldKind::Text, &json!("Hauptstraße 12")),
            Some(ColumnValue::Text(Some("Hauptstraße 12".to_string())))
        );
        assert_eq!(
            coerce(FieldKind::Text, &json!(72070)),
            Some(ColumnValue::Text(Some("72070".to_string())))
        );
        assert_eq!(coerce(FieldKind::Text, &json!({"nested": true})), None);
    }

    #[test]
    fn json_kind_stores_payload_verbatim() {
        let paragraphs = json!([{"title": "Miete", "simplified": "Die Miete beträgt..."}]);
        assert_eq!(
            coerce(FieldKind::Json, &paragraphs),
            Some(ColumnValue::Json(Some(paragraphs.clone())))
        );
    }
}
