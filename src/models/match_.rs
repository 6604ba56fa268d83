use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};

/// A proposed pairing of two opposite-side orders. `order_a`/`order_b`
/// are the ordered pair (lexicographically smaller id first) so cascade
/// cleanup can recover "the other side" without re-deriving it from the
/// match id (see the open question resolved in DESIGN.md).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Match {
    pub id: String,
    pub order_a: String,
    pub order_b: String,
    pub max_gas_price_eth: Decimal,
    pub proposed_at: DateTime<Utc>,
}

impl Match {
    /// Deterministic id over the unordered pair: hash(min || max).
    pub fn compute_id(order_id_1: &str, order_id_2: &str) -> String {
        let (a, b) = Self::ordered_pair(order_id_1, order_id_2);
        let mut hasher = Keccak256::new();
        hasher.update(a.as_bytes());
        hasher.update(b.as_bytes());
        format!("0x{}", hex::encode(hasher.finalize()))
    }

    fn ordered_pair<'a>(id1: &'a str, id2: &'a str) -> (&'a str, &'a str) {
        if id1 <= id2 {
            (id1, id2)
        } else {
            (id2, id1)
        }
    }

    pub fn new(order_id_1: &str, order_id_2: &str, max_gas_price_eth: Decimal, now: DateTime<Utc>) -> Self {
        let (a, b) = Self::ordered_pair(order_id_1, order_id_2);
        Self {
            id: Self::compute_id(order_id_1, order_id_2),
            order_a: a.to_string(),
            order_b: b.to_string(),
            max_gas_price_eth,
            proposed_at: now,
        }
    }

    /// Given one side of the match, returns the other order's id.
    pub fn counterpart(&self, order_id: &str) -> Option<&str> {
        if self.order_a == order_id {
            Some(&self.order_b)
        } else if self.order_b == order_id {
            Some(&self.order_a)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn id_is_order_independent() {
        assert_eq!(Match::compute_id("a", "b"), Match::compute_id("b", "a"));
    }

    #[test]
    fn counterpart_resolves_either_direction() {
        let m = Match::new("order-1", "order-2", dec!(0), Utc::now());
        assert_eq!(m.counterpart("order-1"), Some("order-2"));
        assert_eq!(m.counterpart("order-2"), Some("order-1"));
        assert_eq!(m.counterpart("order-3"), None);
    }
}
