//! Orderbook Storage: the indexed set of active orders and their match
//! candidates. Generalizes a sorted-set-by-score pattern for bid/ask
//! price levels to the full per-asset index-set table this relayer
//! needs, keyed by collection and token id rather than by market.

mod in_memory;
mod redis_backed;

pub use in_memory::InMemoryStorage;
pub use redis_backed::RedisOrderbookStorage;

use crate::error::StorageError;
use crate::models::{Match, Order, OrderStatus};

#[derive(Debug, Clone)]
pub struct ExecutionStatus {
    pub state: OrderStatus,
    pub matches: Vec<Match>,
    /// Whether the order's id is present in `order-status:executed`.
    pub executed: bool,
}

/// Storage backend contract. Implemented by `RedisOrderbookStorage` for
/// production and `InMemoryStorage` for tests, so the matching and
/// execution engines can run against either without live infrastructure.
pub trait OrderbookStorage {
    async fn has(&self, order_id: &str) -> Result<bool, StorageError>;

    /// Persists `order`'s current status into the index. If active, the
    /// order is added to every index set its (side, scope) selects. If
    /// not, it is removed from all index sets and its matches are
    /// cascade-deleted (their reverse pointers, full payloads, and
    /// gas-price ranking entries are all removed in the same
    /// transaction).
    async fn save(&self, order: &Order) -> Result<(), StorageError>;

    async fn get_order(&self, order_id: &str) -> Result<Option<Order>, StorageError>;

    async fn get_status(&self, order_id: &str) -> Result<Option<OrderStatus>, StorageError>;

    async fn get_execution_status(&self, order_id: &str) -> Result<Option<ExecutionStatus>, StorageError>;

    /// Candidate order ids from the opposite-side index set(s) for
    /// `order`, best price first: for a buy order, asks ascending (the
    /// cheapest listings); for a sell order, bids descending (the
    /// richest offers). The matching engine relies on this ordering to
    /// terminate its scan as soon as the price condition first fails.
    async fn candidate_ids(&self, order: &Order, limit: usize) -> Result<Vec<String>, StorageError>;

    async fn save_match(&self, m: &Match) -> Result<(), StorageError>;

    async fn get_match(&self, match_id: &str) -> Result<Option<Match>, StorageError>;

    /// Removes a match entirely: both constituent orders' reverse
    /// pointers (`order-matches:{id}`), the match's full payload, and
    /// its entry in `order-matches:by-gas-price`. Called when a match is
    /// consumed by submission rather than by a parent-order status
    /// change (that path goes through `save`'s cascade delete instead).
    async fn delete_match(&self, match_id: &str) -> Result<(), StorageError>;

    /// Records `order_id` in `order-status:executed`, consulted by
    /// `get_execution_status`.
    async fn mark_executed(&self, order_id: &str) -> Result<(), StorageError>;
}
