use chrono::Utc;
use sqlx::PgPool;

use crate::error::StorageError;
use crate::models::NonceRecord;

use super::DocumentStore;

pub struct PostgresDocumentStore {
    pool: PgPool,
}

impl PostgresDocumentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl DocumentStore for PostgresDocumentStore {
    async fn get_nonce_record(&self, chain_id: u64, account: &str, exchange: &str) -> Result<Option<NonceRecord>, StorageError> {
        let record = sqlx::query_as::<_, NonceRecord>(
            r#"
            SELECT chain_id, match_executor_address, exchange_address, nonce, updated_at
            FROM match_executor_nonces
            WHERE chain_id = $1 AND match_executor_address = $2 AND exchange_address = $3
            "#,
        )
        .bind(chain_id as i64)
        .bind(account)
        .bind(exchange)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn merge_nonce_record(&self, record: &NonceRecord) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO match_executor_nonces (chain_id, match_executor_address, exchange_address, nonce, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (chain_id, match_executor_address, exchange_address)
            DO UPDATE SET nonce = EXCLUDED.nonce, updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(record.chain_id)
        .bind(&record.match_executor_address)
        .bind(&record.exchange_address)
        .bind(record.nonce)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
