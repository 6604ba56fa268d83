//! Document store adapter. The distilled design treats nonce persistence
//! as an external document store (`matchExecutors/{account}/nonces/{exchange}`);
//! this crate needs a concrete, runnable backing for it, so it's modeled
//! here as a small trait over Postgres, using the same
//! `INSERT ... ON CONFLICT ... DO UPDATE` merge idiom the reference
//! backend uses throughout its order/trade persistence.

mod postgres_store;

pub use postgres_store::PostgresDocumentStore;

use crate::error::StorageError;
use crate::models::NonceRecord;

pub trait DocumentStore {
    async fn get_nonce_record(&self, chain_id: u64, account: &str, exchange: &str) -> Result<Option<NonceRecord>, StorageError>;

    /// Firestore-style merge write: creates the row if absent, otherwise
    /// updates only `nonce`/`updated_at`.
    async fn merge_nonce_record(&self, record: &NonceRecord) -> Result<(), StorageError>;
}
