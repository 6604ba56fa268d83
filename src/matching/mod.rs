//! Matching Engine: given a trigger order, enumerates opposite-side
//! candidates from the orderbook index, filters and scores them, and
//! persists the resulting matches. Generalizes a price-time-priority
//! scan from an in-memory `BTreeMap` walk to a storage-backed candidate
//! scan with the same early-termination shape: candidates arrive best
//! price first, so the first incompatible price ends the scan.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::Semaphore;

use crate::error::MatchingError;
use crate::models::{Match, Order, OrderStatus, Side};
use crate::storage::OrderbookStorage;

/// Default cap on how many candidates a single `match_order` call will
/// examine, matching the design document's default.
pub const DEFAULT_CANDIDATE_CAP: usize = 50;

/// Default ceiling on `match_order` calls running concurrently across
/// independently-triggered orders. The scan within one call stays
/// sequential regardless (termination depends on sorted order).
pub const DEFAULT_MAX_CONCURRENT_SCANS: usize = 16;

pub struct MatchingEngine<S: OrderbookStorage> {
    storage: S,
    candidate_cap: usize,
    scan_permits: Arc<Semaphore>,
}

impl<S: OrderbookStorage> MatchingEngine<S> {
    pub fn new(storage: S) -> Self {
        Self {
            storage,
            candidate_cap: DEFAULT_CANDIDATE_CAP,
            scan_permits: Arc::new(Semaphore::new(DEFAULT_MAX_CONCURRENT_SCANS)),
        }
    }

    pub fn with_candidate_cap(storage: S, candidate_cap: usize) -> Self {
        Self {
            storage,
            candidate_cap,
            scan_permits: Arc::new(Semaphore::new(DEFAULT_MAX_CONCURRENT_SCANS)),
        }
    }

    /// Returns proposed matches for `order`, ordered by descending
    /// `maxGasPriceEth`. Empty when no compatible counterparty exists.
    pub async fn match_order(&self, order: &Order) -> Result<Vec<Match>, MatchingError> {
        let started_at = std::time::Instant::now();
        if order.status != OrderStatus::Active {
            return Ok(Vec::new());
        }

        // Bounds how many trigger orders' candidate scans run at once;
        // callers may invoke match_order concurrently for many orders
        // (e.g. a batch ingestion pipeline) without unbounded fan-out
        // against storage.
        let _permit = self.scan_permits.acquire().await.expect("semaphore never closed");

        let candidate_ids = self.storage.candidate_ids(order, self.candidate_cap).await?;
        let now = Utc::now();
        // Carry each candidate's startTime alongside its Match so the
        // final sort can apply the spec's tie-break (earlier startTime,
        // then lexicographically smaller id) without a second storage
        // round-trip.
        let mut matches: Vec<(Match, chrono::DateTime<Utc>)> = Vec::new();

        for candidate_id in candidate_ids {
            let Some(candidate) = self.storage.get_order(&candidate_id).await? else {
                continue;
            };
            if !candidate.is_active_at(now) || !order.is_active_at(now) {
                continue;
            }
            if !compatible(order, &candidate) {
                continue;
            }

            let (bid_price, ask_price) = match order.side {
                Side::Buy => (order.start_price_eth, candidate.start_price_eth),
                Side::Sell => (candidate.start_price_eth, order.start_price_eth),
            };

            if bid_price < ask_price {
                // Sorted-order scan: once the price condition fails, no
                // further candidate in this ordering can satisfy it.
                break;
            }

            let gas = (bid_price - ask_price).max(Decimal::ZERO);
            let m = Match::new(&order.id, &candidate.id, gas, now);
            self.storage.save_match(&m).await?;
            matches.push((m, candidate.start_time));
        }

        matches.sort_by(|(a, a_start), (b, b_start)| {
            b.max_gas_price_eth
                .cmp(&a.max_gas_price_eth)
                .then_with(|| a_start.cmp(b_start))
                .then_with(|| a.id.cmp(&b.id))
        });
        let matches: Vec<Match> = matches.into_iter().map(|(m, _)| m).collect();

        metrics::histogram!("match_order_duration_seconds").record(started_at.elapsed().as_secs_f64());
        metrics::counter!("matches_proposed_total").increment(matches.len() as u64);

        Ok(matches)
    }
}

fn compatible(a: &Order, b: &Order) -> bool {
    a.side != b.side
        && a.chain_id == b.chain_id
        && a.currency == b.currency
        && a.complication == b.complication
        && a.scope.intersects(&b.scope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AssetScope, Marketplace, OrderKind};
    use crate::storage::InMemoryStorage;
    use rust_decimal_macros::dec;

    fn make_order(id: &str, side: Side, scope: AssetScope, price: Decimal) -> Order {
        Order {
            id: id.to_string(),
            chain_id: 1,
            side,
            scope,
            complication: "0xc".into(),
            currency: "weth".into(),
            start_price_eth: price,
            start_time: Utc::now() - chrono::Duration::minutes(1),
            end_time: Utc::now() + chrono::Duration::hours(1),
            signer: "0xsigner".into(),
            raw_payload: vec![],
            marketplace: Marketplace::Seaport,
            kind: OrderKind::SingleToken,
            on_chain_nonce: 0,
            status: OrderStatus::Active,
        }
    }

    fn single_token(token_id: &str) -> AssetScope {
        AssetScope::SingleToken { collection: "0x1".into(), token_id: token_id.into() }
    }

    #[tokio::test]
    async fn exact_price_match_yields_zero_gas() {
        let storage = InMemoryStorage::new();
        let sell = make_order("sell-1", Side::Sell, single_token("1"), dec!(0.1));
        let buy = make_order("buy-1", Side::Buy, single_token("1"), dec!(0.1));
        storage.save(&sell).await.unwrap();
        storage.save(&buy).await.unwrap();

        let engine = MatchingEngine::new(storage);
        let matches = engine.match_order(&sell).await.unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].max_gas_price_eth, dec!(0));
    }

    #[tokio::test]
    async fn bid_below_ask_yields_no_match() {
        let storage = InMemoryStorage::new();
        let sell = make_order("sell-1", Side::Sell, single_token("1"), dec!(0.2));
        let buy = make_order("buy-1", Side::Buy, single_token("1"), dec!(0.1));
        storage.save(&sell).await.unwrap();
        storage.save(&buy).await.unwrap();

        let engine = MatchingEngine::new(storage);
        assert!(engine.match_order(&sell).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn collection_wide_bid_fills_gas_slack() {
        let storage = InMemoryStorage::new();
        let sell = make_order("sell-1", Side::Sell, single_token("1"), dec!(0.1));
        let buy = make_order("buy-1", Side::Buy, AssetScope::CollectionWide { collection: "0x1".into() }, dec!(0.15));
        storage.save(&sell).await.unwrap();
        storage.save(&buy).await.unwrap();

        let engine = MatchingEngine::new(storage);
        let matches = engine.match_order(&sell).await.unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].max_gas_price_eth, dec!(0.05));
    }
}
