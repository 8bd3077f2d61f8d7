//! Contract repository implementation.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};
use tracing::{debug, info};
use uuid::Uuid;

use mietklar_core::{
    Contract, ContractRepository, ContractStatus, CreateContractRequest, Error, Result,
};

/// PostgreSQL implementation of ContractRepository.
pub struct PgContractRepository {
    pool: Pool<Postgres>,
}

impl PgContractRepository {
    /// Create a new PgContractRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn row_to_contract(row: &PgRow) -> Result<Contract> {
        let status: String = row.try_get("status")?;
        Ok(Contract {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            name: row.try_get("name")?,
            uploaded_at: row.try_get("uploaded_at")?,
            status: status.parse()?,
            archived: row.try_get("archived")?,
            archived_at: row.try_get("archived_at")?,
            retention_days: row.try_get("retention_days")?,
            scheduled_deletion_at: row.try_get("scheduled_deletion_at")?,
        })
    }
}

const CONTRACT_COLUMNS: &str = "id, user_id, name, uploaded_at, status, archived, archived_at, \
     retention_days, scheduled_deletion_at";

#[async_trait]
impl ContractRepository for PgContractRepository {
    async fn create(&self, req: CreateContractRequest) -> Result<Contract> {
        let id = Uuid::now_v7();
        let now = Utc::now();
        // Retention drives the deletion date at creation time, mirroring
        // the upload flow: the date never moves when retention_days changes.
        let deletion_at = (now + Duration::days(req.retention_days as i64)).date_naive();

        let row = sqlx::query(&format!(
            "INSERT INTO contracts \
             (id, user_id, name, uploaded_at, status, archived, retention_days, scheduled_deletion_at) \
             VALUES ($1, $2, $3, $4, 'uploaded', false, $5, $6) \
             RETURNING {}",
            CONTRACT_COLUMNS
        ))
        .bind(id)
        .bind(req.user_id)
        .bind(&req.name)
        .bind(now)
        .bind(req.retention_days)
        .bind(deletion_at)
        .fetch_one(&self.pool)
        .await?;

        info!(contract_id = %id, user_id = %req.user_id, "Created contract");
        Self::row_to_contract(&row)
    }

    async fn fetch(&self, id: Uuid, user_id: Uuid) -> Result<Contract> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM contracts WHERE id = $1 AND user_id = $2",
            CONTRACT_COLUMNS
        ))
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(Error::ContractNotFound(id))?;

        Self::row_to_contract(&row)
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Contract>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM contracts \
             WHERE user_id = $1 AND archived = false \
             ORDER BY uploaded_at DESC",
            CONTRACT_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_contract).collect()
    }

    async fn try_begin_processing(&self, id: Uuid) -> Result<bool> {
        // Single-statement check-and-set: at most one pipeline run may hold
        // the processing claim for a contract at any time.
        let result = sqlx::query(
            "UPDATE contracts SET status = 'processing' \
             WHERE id = $1 AND status <> 'processing'",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        let claimed = result.rows_affected() == 1;
        debug!(contract_id = %id, claimed, "Processing claim attempt");
        Ok(claimed)
    }

    async fn set_status(&self, id: Uuid, status: ContractStatus) -> Result<()> {
        let result = sqlx::query("UPDATE contracts SET status = $2 WHERE id = $1")
            .bind(id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::ContractNotFound(id));
        }
        debug!(contract_id = %id, status = %status, "Status transition");
        Ok(())
    }

    async fn status(&self, id: Uuid) -> Result<ContractStatus> {
        let status: String = sqlx::query_scalar("SELECT status FROM contracts WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(Error::ContractNotFound(id))?;
        status.parse()
    }

    async fn archive(&self, id: Uuid, user_id: Uuid) -> Result<()> {
        let result = sqlx::query(
            "UPDATE contracts SET archived = true, archived_at = $3 \
             WHERE id = $1 AND user_id = $2",
        )
        .bind(id)
        .bind(user_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::ContractNotFound(id));
        }
        info!(contract_id = %id, "Archived contract");
        Ok(())
    }
}
