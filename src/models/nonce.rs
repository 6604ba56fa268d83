use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Mirrors a row in `match_executor_nonces`, which realizes the
/// `matchExecutors/{account}/nonces/{exchange}` document layout.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct NonceRecord {
    pub chain_id: i64,
    pub match_executor_address: String,
    pub exchange_address: String,
    pub nonce: i64,
    pub updated_at: DateTime<Utc>,
}
