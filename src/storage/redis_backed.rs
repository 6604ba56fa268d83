use std::sync::Arc;

use crate::cache::{OrderbookKeys, RedisClient};
use crate::error::StorageError;
use crate::models::{AssetScope, Match, Order, OrderStatus, Side};

use super::{ExecutionStatus, OrderbookStorage};

#[derive(Clone)]
pub struct RedisOrderbookStorage {
    redis: Arc<RedisClient>,
    keys: OrderbookKeys,
}

impl RedisOrderbookStorage {
    pub fn new(redis: Arc<RedisClient>, chain_id: u64) -> Self {
        Self {
            redis,
            keys: OrderbookKeys::new(chain_id),
        }
    }

    /// The per-asset index sets a given (side, scope) belongs to, per
    /// the derivation table in the design document. A collection-wide
    /// sell is not representable and returns an empty list; callers
    /// reject it at ingestion rather than here.
    fn index_set_keys(&self, order: &Order) -> Vec<String> {
        match (order.side, &order.scope) {
            (Side::Buy, AssetScope::SingleToken { collection, token_id }) => vec![
                self.keys.token_offers(&order.complication, &order.currency, collection, token_id),
                self.keys.collection_token_offers(&order.complication, &order.currency, collection),
            ],
            (Side::Buy, AssetScope::CollectionWide { collection }) => {
                vec![self.keys.collection_wide_offers(&order.complication, &order.currency, collection)]
            }
            (Side::Sell, AssetScope::SingleToken { collection, token_id }) => vec![
                self.keys.token_listings(&order.complication, &order.currency, collection, token_id),
                self.keys.collection_token_listings(&order.complication, &order.currency, collection),
            ],
            (Side::Sell, AssetScope::CollectionWide { .. }) => Vec::new(),
        }
    }

    async fn cascade_delete_matches(&self, order_id: &str, pipeline: &mut redis::Pipeline) -> Result<(), StorageError> {
        let match_ids: Vec<String> = self.redis.smembers(&self.keys.order_matches(order_id)).await?;
        for match_id in &match_ids {
            if let Some(m) = self.get_match(match_id).await? {
                if let Some(counterpart) = m.counterpart(order_id) {
                    pipeline.srem(self.keys.order_matches(counterpart), match_id);
                }
            }
            pipeline.del(self.keys.match_full(match_id));
            pipeline.zrem(self.keys.matches_by_gas_price(), match_id);
        }
        pipeline.del(self.keys.order_matches(order_id));
        Ok(())
    }
}

impl OrderbookStorage for RedisOrderbookStorage {
    async fn has(&self, order_id: &str) -> Result<bool, StorageError> {
        Ok(self.redis.sismember(&self.keys.orders(), order_id).await?)
    }

    async fn save(&self, order: &Order) -> Result<(), StorageError> {
        let mut pipeline = redis::pipe();

        if order.status == OrderStatus::Active {
            pipeline.sadd(self.keys.orders(), &order.id);
            pipeline.zadd(self.keys.active(), &order.id, -1i64);
            let payload = serde_json::to_string(order)?;
            pipeline.set(self.keys.order_full(&order.id), payload);
            let score: f64 = order.start_price_eth.to_string().parse().unwrap_or(0.0);
            for set_key in self.index_set_keys(order) {
                pipeline.zadd(set_key, &order.id, score);
            }
        } else {
            pipeline.srem(self.keys.orders(), &order.id);
            pipeline.zrem(self.keys.active(), &order.id);
            pipeline.del(self.keys.order_full(&order.id));
            for set_key in self.index_set_keys(order) {
                pipeline.zrem(set_key, &order.id);
            }
            self.cascade_delete_matches(&order.id, &mut pipeline).await?;
        }

        self.redis
            .atomic_pipeline(pipeline)
            .await
            .map_err(|source| StorageError::Transaction { key: order.id.clone(), source })
    }

    async fn get_order(&self, order_id: &str) -> Result<Option<Order>, StorageError> {
        let raw: Option<String> = self.redis.get(&self.keys.order_full(order_id)).await?;
        Ok(match raw {
            Some(json) => Some(serde_json::from_str(&json)?),
            None => None,
        })
    }

    async fn get_status(&self, order_id: &str) -> Result<Option<OrderStatus>, StorageError> {
        Ok(self.get_order(order_id).await?.map(|o| o.status))
    }

    async fn get_execution_status(&self, order_id: &str) -> Result<Option<ExecutionStatus>, StorageError> {
        let Some(order) = self.get_order(order_id).await? else {
            return Ok(None);
        };
        let match_ids: Vec<String> = self.redis.smembers(&self.keys.order_matches(order_id)).await?;
        let mut matches = Vec::with_capacity(match_ids.len());
        for match_id in match_ids {
            if let Some(m) = self.get_match(&match_id).await? {
                matches.push(m);
            }
        }
        let executed = self.redis.zscore(&self.keys.executed(), order_id).await?.is_some();
        Ok(Some(ExecutionStatus { state: order.status, matches, executed }))
    }

    async fn candidate_ids(&self, order: &Order, limit: usize) -> Result<Vec<String>, StorageError> {
        let limit = limit.max(1);
        let ranked: Vec<(String, f64)> = match (order.side, &order.scope) {
            // Bid wants the cheapest asks first: ascending scan.
            (Side::Buy, AssetScope::SingleToken { collection, token_id }) => {
                let mut merged = self
                    .redis
                    .zrange_withscores(&self.keys.token_listings(&order.complication, &order.currency, collection, token_id), 0, limit as isize - 1)
                    .await?;
                merged.sort_by(|a, b| a.1.total_cmp(&b.1));
                merged
            }
            (Side::Buy, AssetScope::CollectionWide { collection }) => {
                self.redis
                    .zrange_withscores(&self.keys.collection_token_listings(&order.complication, &order.currency, collection), 0, limit as isize - 1)
                    .await?
            }
            // Listing wants the richest bids first: descending scan,
            // merging the per-token and collection-wide offer sets.
            (Side::Sell, AssetScope::SingleToken { collection, token_id }) => {
                let mut token_side = self
                    .redis
                    .zrevrange_withscores(&self.keys.token_offers(&order.complication, &order.currency, collection, token_id), 0, limit as isize - 1)
                    .await?;
                let collection_side = self
                    .redis
                    .zrevrange_withscores(&self.keys.collection_wide_offers(&order.complication, &order.currency, collection), 0, limit as isize - 1)
                    .await?;
                token_side.extend(collection_side);
                token_side.sort_by(|a, b| b.1.total_cmp(&a.1));
                token_side.truncate(limit);
                token_side
            }
            (Side::Sell, AssetScope::CollectionWide { .. }) => Vec::new(),
        };
        Ok(ranked.into_iter().map(|(id, _)| id).collect())
    }

    async fn save_match(&self, m: &Match) -> Result<(), StorageError> {
        let mut pipeline = redis::pipe();
        pipeline.sadd(self.keys.order_matches(&m.order_a), &m.id);
        pipeline.sadd(self.keys.order_matches(&m.order_b), &m.id);
        let payload = serde_json::to_string(m)?;
        pipeline.set(self.keys.match_full(&m.id), payload);
        let score: f64 = m.max_gas_price_eth.to_string().parse().unwrap_or(0.0);
        pipeline.zadd(self.keys.matches_by_gas_price(), &m.id, score);

        self.redis
            .atomic_pipeline(pipeline)
            .await
            .map_err(|source| StorageError::Transaction { key: m.id.clone(), source })
    }

    async fn get_match(&self, match_id: &str) -> Result<Option<Match>, StorageError> {
        let raw: Option<String> = self.redis.get(&self.keys.match_full(match_id)).await?;
        Ok(match raw {
            Some(json) => Some(serde_json::from_str(&json)?),
            None => None,
        })
    }

    async fn delete_match(&self, match_id: &str) -> Result<(), StorageError> {
        let Some(m) = self.get_match(match_id).await? else {
            return Ok(());
        };
        let mut pipeline = redis::pipe();
        pipeline.srem(self.keys.order_matches(&m.order_a), match_id);
        pipeline.srem(self.keys.order_matches(&m.order_b), match_id);
        pipeline.del(self.keys.match_full(match_id));
        pipeline.zrem(self.keys.matches_by_gas_price(), match_id);

        self.redis
            .atomic_pipeline(pipeline)
            .await
            .map_err(|source| StorageError::Transaction { key: match_id.to_string(), source })
    }

    async fn mark_executed(&self, order_id: &str) -> Result<(), StorageError> {
        self.redis.zadd(&self.keys.executed(), -1.0, order_id).await?;
        Ok(())
    }
}
