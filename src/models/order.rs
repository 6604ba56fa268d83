use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::fmt;

use crate::models::marketplace::{Marketplace, OrderKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "order_side", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "buy"),
            Side::Sell => write!(f, "sell"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "order_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Active,
    Filled,
    Cancelled,
    Expired,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, OrderStatus::Active)
    }
}

/// What a listing/bid covers: a single token, or an entire collection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum AssetScope {
    SingleToken { collection: String, token_id: String },
    CollectionWide { collection: String },
}

impl AssetScope {
    pub fn collection(&self) -> &str {
        match self {
            AssetScope::SingleToken { collection, .. } => collection,
            AssetScope::CollectionWide { collection } => collection,
        }
    }

    pub fn token_id(&self) -> Option<&str> {
        match self {
            AssetScope::SingleToken { token_id, .. } => Some(token_id),
            AssetScope::CollectionWide { .. } => None,
        }
    }

    /// Whether this scope and `other` can refer to the same asset (a
    /// collection-wide scope on either side matches any token in the
    /// collection; two single-token scopes must name the same token).
    /// Order-independent: `a.intersects(&b) == b.intersects(&a)`.
    pub fn intersects(&self, other: &AssetScope) -> bool {
        if self.collection() != other.collection() {
            return false;
        }
        match (self, other) {
            (AssetScope::CollectionWide { .. }, _) | (_, AssetScope::CollectionWide { .. }) => true,
            (AssetScope::SingleToken { token_id: a, .. }, AssetScope::SingleToken { token_id: b, .. }) => a == b,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub chain_id: u64,
    pub side: Side,
    pub scope: AssetScope,
    pub complication: String,
    pub currency: String,
    pub start_price_eth: Decimal,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub signer: String,
    pub raw_payload: Vec<u8>,
    pub marketplace: Marketplace,
    pub kind: OrderKind,
    pub on_chain_nonce: u64,
    pub status: OrderStatus,
}

impl Order {
    /// Deterministic id: keccak256 over the canonical field encoding,
    /// hex-encoded. Two orders with identical economic content always
    /// hash to the same id.
    pub fn compute_id(
        chain_id: u64,
        side: Side,
        scope: &AssetScope,
        complication: &str,
        currency: &str,
        start_price_eth: Decimal,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        signer: &str,
    ) -> String {
        let mut hasher = Keccak256::new();
        hasher.update(chain_id.to_be_bytes());
        hasher.update(side.to_string().as_bytes());
        hasher.update(scope.collection().as_bytes());
        hasher.update(scope.token_id().unwrap_or("").as_bytes());
        hasher.update(complication.as_bytes());
        hasher.update(currency.as_bytes());
        hasher.update(start_price_eth.to_string().as_bytes());
        hasher.update(start_time.timestamp().to_be_bytes());
        hasher.update(end_time.timestamp().to_be_bytes());
        hasher.update(signer.as_bytes());
        format!("0x{}", hex::encode(hasher.finalize()))
    }

    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.status == OrderStatus::Active && self.start_time <= now && now <= self.end_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn scope(token_id: &str) -> AssetScope {
        AssetScope::SingleToken {
            collection: "0x1".into(),
            token_id: token_id.into(),
        }
    }

    #[test]
    fn id_is_deterministic_over_canonical_fields() {
        let now = Utc::now();
        let later = now + chrono::Duration::hours(1);
        let a = Order::compute_id(1, Side::Sell, &scope("1"), "0xc", "weth", dec!(0.1), now, later, "0xsigner");
        let b = Order::compute_id(1, Side::Sell, &scope("1"), "0xc", "weth", dec!(0.1), now, later, "0xsigner");
        assert_eq!(a, b);
    }

    #[test]
    fn collection_wide_scope_intersects_any_token() {
        let bid = AssetScope::CollectionWide { collection: "0x1".into() };
        assert!(bid.intersects(&scope("42")));
    }

    #[test]
    fn single_token_scope_requires_same_token() {
        let bid = scope("1");
        assert!(bid.intersects(&scope("1")));
        assert!(!bid.intersects(&scope("2")));
    }
}
