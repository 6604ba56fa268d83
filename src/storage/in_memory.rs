use std::collections::{BTreeMap, HashSet};

use dashmap::DashMap;
use parking_lot::RwLock;

use crate::error::StorageError;
use crate::models::{AssetScope, Match, Order, OrderStatus, Side};

use super::{ExecutionStatus, OrderbookStorage};

/// Pure in-process storage double, used by the matching and execution
/// engine tests so they don't require a live Redis instance. Mirrors the
/// index-set shape of `RedisOrderbookStorage` with `BTreeMap<score, _>`
/// standing in for sorted sets, following the same dashmap/parking_lot
/// concurrency primitives the reference backend uses for its in-memory
/// orderbook.
#[derive(Default)]
pub struct InMemoryStorage {
    orders: DashMap<String, Order>,
    order_matches: DashMap<String, Vec<String>>,
    matches: DashMap<String, Match>,
    // key -> (order_id -> score), kept ordered for deterministic scans
    index_sets: RwLock<std::collections::HashMap<String, BTreeMap<String, f64>>>,
    executed: RwLock<HashSet<String>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn index_set_keys(order: &Order) -> Vec<String> {
        match (order.side, &order.scope) {
            (Side::Buy, AssetScope::SingleToken { collection, token_id }) => vec![
                format!("token-offers:{}:{}:{}:{}", order.complication, order.currency, collection, token_id),
                format!("collection-token-offers:{}:{}:{}", order.complication, order.currency, collection),
            ],
            (Side::Buy, AssetScope::CollectionWide { collection }) => {
                vec![format!("collection-wide-offers:{}:{}:{}", order.complication, order.currency, collection)]
            }
            (Side::Sell, AssetScope::SingleToken { collection, token_id }) => vec![
                format!("token-listings:{}:{}:{}:{}", order.complication, order.currency, collection, token_id),
                format!("collection-token-listings:{}:{}:{}", order.complication, order.currency, collection),
            ],
            (Side::Sell, AssetScope::CollectionWide { .. }) => Vec::new(),
        }
    }
}

impl OrderbookStorage for InMemoryStorage {
    async fn has(&self, order_id: &str) -> Result<bool, StorageError> {
        Ok(self.orders.contains_key(order_id))
    }

    async fn save(&self, order: &Order) -> Result<(), StorageError> {
        let keys = Self::index_set_keys(order);
        let mut index_sets = self.index_sets.write();
        for key in &keys {
            let set = index_sets.entry(key.clone()).or_default();
            if order.status == OrderStatus::Active {
                let score: f64 = order.start_price_eth.to_string().parse().unwrap_or(0.0);
                set.insert(order.id.clone(), score);
            } else {
                set.remove(&order.id);
            }
        }
        drop(index_sets);

        if order.status != OrderStatus::Active {
            self.orders.remove(&order.id);
            if let Some((_, match_ids)) = self.order_matches.remove(&order.id) {
                for match_id in match_ids {
                    if let Some((_, m)) = self.matches.remove(&match_id) {
                        if let Some(counterpart) = m.counterpart(&order.id) {
                            if let Some(mut list) = self.order_matches.get_mut(counterpart) {
                                list.retain(|id| id != &match_id);
                            }
                        }
                    }
                }
            }
        } else {
            self.orders.insert(order.id.clone(), order.clone());
        }
        Ok(())
    }

    async fn get_order(&self, order_id: &str) -> Result<Option<Order>, StorageError> {
        Ok(self.orders.get(order_id).map(|r| r.clone()))
    }

    async fn get_status(&self, order_id: &str) -> Result<Option<OrderStatus>, StorageError> {
        Ok(self.orders.get(order_id).map(|r| r.status))
    }

    async fn get_execution_status(&self, order_id: &str) -> Result<Option<ExecutionStatus>, StorageError> {
        let Some(order) = self.orders.get(order_id).map(|r| r.clone()) else {
            return Ok(None);
        };
        let matches = self
            .order_matches
            .get(order_id)
            .map(|ids| ids.iter().filter_map(|id| self.matches.get(id).map(|m| m.clone())).collect())
            .unwrap_or_default();
        let executed = self.executed.read().contains(order_id);
        Ok(Some(ExecutionStatus { state: order.status, matches, executed }))
    }

    async fn candidate_ids(&self, order: &Order, limit: usize) -> Result<Vec<String>, StorageError> {
        let index_sets = self.index_sets.read();
        let opposite_keys: Vec<String> = match (order.side, &order.scope) {
            (Side::Buy, AssetScope::SingleToken { collection, token_id }) => vec![
                format!("token-listings:{}:{}:{}:{}", order.complication, order.currency, collection, token_id),
                format!("collection-token-listings:{}:{}:{}", order.complication, order.currency, collection),
            ],
            (Side::Buy, AssetScope::CollectionWide { collection }) => {
                vec![format!("collection-token-listings:{}:{}:{}", order.complication, order.currency, collection)]
            }
            (Side::Sell, AssetScope::SingleToken { collection, token_id }) => vec![
                format!("token-offers:{}:{}:{}:{}", order.complication, order.currency, collection, token_id),
                format!("collection-wide-offers:{}:{}:{}", order.complication, order.currency, collection),
            ],
            (Side::Sell, AssetScope::CollectionWide { .. }) => Vec::new(),
        };

        let mut merged: Vec<(String, f64)> = opposite_keys
            .iter()
            .filter_map(|k| index_sets.get(k))
            .flat_map(|set| set.iter().map(|(id, score)| (id.clone(), *score)))
            .collect();

        match order.side {
            Side::Buy => merged.sort_by(|a, b| a.1.total_cmp(&b.1)),
            Side::Sell => merged.sort_by(|a, b| b.1.total_cmp(&a.1)),
        }
        merged.truncate(limit.max(1));
        Ok(merged.into_iter().map(|(id, _)| id).collect())
    }

    async fn save_match(&self, m: &Match) -> Result<(), StorageError> {
        self.order_matches.entry(m.order_a.clone()).or_default().push(m.id.clone());
        self.order_matches.entry(m.order_b.clone()).or_default().push(m.id.clone());
        self.matches.insert(m.id.clone(), m.clone());
        Ok(())
    }

    async fn get_match(&self, match_id: &str) -> Result<Option<Match>, StorageError> {
        Ok(self.matches.get(match_id).map(|r| r.clone()))
    }

    async fn delete_match(&self, match_id: &str) -> Result<(), StorageError> {
        if let Some((_, m)) = self.matches.remove(match_id) {
            if let Some(mut list) = self.order_matches.get_mut(&m.order_a) {
                list.retain(|id| id != match_id);
            }
            if let Some(mut list) = self.order_matches.get_mut(&m.order_b) {
                list.retain(|id| id != match_id);
            }
        }
        Ok(())
    }

    async fn mark_executed(&self, order_id: &str) -> Result<(), StorageError> {
        self.executed.write().insert(order_id.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn make_order(id: &str, side: Side, token_id: &str, price: rust_decimal::Decimal) -> Order {
        Order {
            id: id.to_string(),
            chain_id: 1,
            side,
            scope: AssetScope::SingleToken { collection: "0x1".into(), token_id: token_id.into() },
            complication: "0xc".into(),
            currency: "weth".into(),
            start_price_eth: price,
            start_time: Utc::now() - chrono::Duration::minutes(1),
            end_time: Utc::now() + chrono::Duration::hours(1),
            signer: "0xsigner".into(),
            raw_payload: vec![],
            marketplace: crate::models::Marketplace::Seaport,
            kind: crate::models::OrderKind::SingleToken,
            on_chain_nonce: 0,
            status: OrderStatus::Active,
        }
    }

    #[tokio::test]
    async fn save_then_cancel_removes_index_membership() {
        let storage = InMemoryStorage::new();
        let sell = make_order("sell-1", Side::Sell, "1", dec!(0.1));
        storage.save(&sell).await.unwrap();
        assert!(storage.has("sell-1").await.unwrap());

        let mut cancelled = sell.clone();
        cancelled.status = OrderStatus::Cancelled;
        storage.save(&cancelled).await.unwrap();
        assert!(!storage.has("sell-1").await.unwrap());

        let buy = make_order("buy-1", Side::Buy, "1", dec!(0.1));
        let candidates = storage.candidate_ids(&buy, 10).await.unwrap();
        assert!(candidates.is_empty());
    }

    #[tokio::test]
    async fn candidate_ids_favor_cheapest_ask_for_a_bid() {
        let storage = InMemoryStorage::new();
        storage.save(&make_order("sell-cheap", Side::Sell, "1", dec!(0.1))).await.unwrap();
        storage.save(&make_order("sell-expensive", Side::Sell, "1", dec!(0.5))).await.unwrap();

        let buy = make_order("buy-1", Side::Buy, "1", dec!(1.0));
        let candidates = storage.candidate_ids(&buy, 10).await.unwrap();
        assert_eq!(candidates, vec!["sell-cheap".to_string(), "sell-expensive".to_string()]);
    }

    #[tokio::test]
    async fn cascade_delete_removes_reverse_match_pointer() {
        let storage = InMemoryStorage::new();
        let sell = make_order("sell-1", Side::Sell, "1", dec!(0.1));
        let buy = make_order("buy-1", Side::Buy, "1", dec!(0.1));
        storage.save(&sell).await.unwrap();
        storage.save(&buy).await.unwrap();

        let m = Match::new("sell-1", "buy-1", dec!(0), Utc::now());
        storage.save_match(&m).await.unwrap();

        let mut filled = sell.clone();
        filled.status = OrderStatus::Filled;
        storage.save(&filled).await.unwrap();

        let status = storage.get_execution_status("buy-1").await.unwrap().unwrap();
        assert!(status.matches.is_empty());
    }
}
