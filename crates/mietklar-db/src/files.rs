//! Contract page file metadata repository implementation.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Postgres};
use tracing::debug;
use uuid::Uuid;

use mietklar_core::{ContractFile, ContractFileRepository, Error, Result};

/// PostgreSQL implementation of ContractFileRepository.
pub struct PgContractFileRepository {
    pool: Pool<Postgres>,
}

impl PgContractFileRepository {
    /// Create a new PgContractFileRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ContractFileRepository for PgContractFileRepository {
    async fn register(
        &self,
        file_id: Uuid,
        contract_id: Uuid,
        file_name: &str,
        content_type: &str,
        file_size: i64,
    ) -> Result<ContractFile> {
        let file = sqlx::query_as::<_, ContractFile>(
            "INSERT INTO contract_files \
             (id, contract_id, file_name, content_type, file_size, uploaded_at) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING id, contract_id, file_name, content_type, file_size, uploaded_at",
        )
        .bind(file_id)
        .bind(contract_id)
        .bind(file_name)
        .bind(content_type)
        .bind(file_size)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        debug!(
            contract_id = %contract_id,
            file_id = %file_id,
            file_name,
            "Registered contract page"
        );
        Ok(file)
    }

    async fn list_for_contract(&self, contract_id: Uuid) -> Result<Vec<ContractFile>> {
        let files = sqlx::query_as::<_, ContractFile>(
            "SELECT id, contract_id, file_name, content_type, file_size, uploaded_at \
             FROM contract_files WHERE contract_id = $1 \
             ORDER BY uploaded_at ASC, id ASC",
        )
        .bind(contract_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(files)
    }

    async fn replace_content(&self, file_id: Uuid, file_size: i64) -> Result<()> {
        let result = sqlx::query(
            "UPDATE contract_files SET file_size = $2, uploaded_at = $3 WHERE id = $1",
        )
        .bind(file_id)
        .bind(file_size)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("contract file {}", file_id)));
        }
        Ok(())
    }
}
