use thiserror::Error;

/// Errors surfaced synchronously to a caller; never mutates state.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("invalid order hash: {0}")]
    InvalidOrderHash(String),
    #[error("unsupported order kind: marketplace={0:?} kind={1:?}")]
    UnsupportedOrderKind(crate::models::Marketplace, crate::models::OrderKind),
}

/// Errors from ingesting a freshly decoded order, before it reaches the
/// orderbook index.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors from the orderbook index. Per-entry failures are logged and
/// skipped by the caller; they never abort a whole batch.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("transaction failed on key `{key}`: {source}")]
    Transaction {
        key: String,
        #[source]
        source: redis::RedisError,
    },
    #[error("document store error: {0}")]
    Document(#[from] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum MatchingError {
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Nonce(#[from] NonceError),
    #[error("chain rpc error: {0}")]
    ChainRpc(String),
    #[error("execution rejected: {0}")]
    Rejected(String),
    #[error("bundle submission dropped (target block {target_block} missed)")]
    SubmissionDropped { target_block: u64 },
}

/// Errors from the nonce provider. `LeaseExpired` closes the provider;
/// every other variant is caller-retryable.
#[derive(Debug, Error)]
pub enum NonceError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("distributed lease lock expired or was never held")]
    LeaseExpired,
    #[error("nonce provider is closed")]
    Closed,
    #[error("chain rpc error while reading nonce watermark: {0}")]
    ChainRpc(String),
}

/// Misconfiguration or startup-only failures. Always aborts the process.
#[derive(Debug, Error)]
pub enum Fatal {
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
    #[error("failed to connect to redis: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("failed to connect to postgres: {0}")]
    Database(#[from] sqlx::Error),
}
