use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Every marketplace the relayer knows how to encode orders for. Closed
/// on purpose: adding a marketplace means adding a variant here and an
/// `OrderBuilder` impl, not a new string constant scattered through the
/// codebase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "marketplace", rename_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum Marketplace {
    Infinity,
    Seaport,
    WyvernV2,
    WyvernV23,
    LooksRare,
    ZeroexV4Erc721,
    ZeroexV4Erc1155,
    Foundation,
    X2y2,
    Rarible,
    ElementErc721,
    ElementErc1155,
    Quixotic,
    Nouns,
    ZoraV3,
    Mint,
    Cryptopunks,
    Sudoswap,
    Universe,
    Nftx,
    Blur,
    Forward,
}

impl Marketplace {
    pub const ALL: [Marketplace; 22] = [
        Marketplace::Infinity,
        Marketplace::Seaport,
        Marketplace::WyvernV2,
        Marketplace::WyvernV23,
        Marketplace::LooksRare,
        Marketplace::ZeroexV4Erc721,
        Marketplace::ZeroexV4Erc1155,
        Marketplace::Foundation,
        Marketplace::X2y2,
        Marketplace::Rarible,
        Marketplace::ElementErc721,
        Marketplace::ElementErc1155,
        Marketplace::Quixotic,
        Marketplace::Nouns,
        Marketplace::ZoraV3,
        Marketplace::Mint,
        Marketplace::Cryptopunks,
        Marketplace::Sudoswap,
        Marketplace::Universe,
        Marketplace::Nftx,
        Marketplace::Blur,
        Marketplace::Forward,
    ];
}

impl fmt::Display for Marketplace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "order_kind", rename_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum OrderKind {
    SingleToken,
    ContractWide,
    Complex,
    BundleAsk,
    TokenList,
}

impl OrderKind {
    pub const ALL: [OrderKind; 5] = [
        OrderKind::SingleToken,
        OrderKind::ContractWide,
        OrderKind::Complex,
        OrderKind::BundleAsk,
        OrderKind::TokenList,
    ];
}

/// Encodes an order for submission to its marketplace's exchange
/// contract. One implementation per enabled (marketplace, kind) cell;
/// stands in for the real SDKs the relayer would otherwise link against.
pub trait OrderBuilder: Send + Sync {
    fn exchange_address(&self) -> &str;
    fn encode_fill_calldata(&self, order_raw_payload: &[u8], counterpart_raw_payload: &[u8]) -> Vec<u8>;
}

/// Which (marketplace, kind) pairs are enabled, and the builder for each.
/// Constructed once at startup; `assert_exhaustive` walks the full
/// cross-product so a missing builder for an enabled cell fails fast
/// rather than surfacing as a runtime `UnsupportedOrderKind` later.
pub struct EnablementTable {
    /// Whether a cell is enabled, tracked separately from whether a
    /// builder is wired up: the default config enables
    /// `seaport:single-token` before any deployment supplies the SDK
    /// that builds its calldata, and carries `infinity`'s kinds as
    /// present-but-disabled entries rather than leaving them absent.
    enabled: HashMap<(Marketplace, OrderKind), bool>,
    builders: HashMap<(Marketplace, OrderKind), Box<dyn OrderBuilder>>,
}

impl EnablementTable {
    pub fn new() -> Self {
        Self { enabled: HashMap::new(), builders: HashMap::new() }
    }

    /// The shipped default: `seaport:single-token` enabled,
    /// `infinity`'s full kind set present in the table but disabled,
    /// every other (marketplace, kind) cell absent (disabled).
    pub fn with_default_enablement() -> Self {
        let mut table = Self::new();
        table.enabled.insert((Marketplace::Seaport, OrderKind::SingleToken), true);
        for kind in OrderKind::ALL {
            table.enabled.insert((Marketplace::Infinity, kind), false);
        }
        table
    }

    pub fn enable(&mut self, marketplace: Marketplace, kind: OrderKind, builder: Box<dyn OrderBuilder>) {
        self.enabled.insert((marketplace, kind), true);
        self.builders.insert((marketplace, kind), builder);
    }

    pub fn is_enabled(&self, marketplace: Marketplace, kind: OrderKind) -> bool {
        self.enabled.get(&(marketplace, kind)).copied().unwrap_or(false)
    }

    pub fn builder(&self, marketplace: Marketplace, kind: OrderKind) -> Option<&dyn OrderBuilder> {
        self.builders.get(&(marketplace, kind)).map(|b| b.as_ref())
    }

    /// Ingestion-time gate: an order whose (marketplace, kind) cell
    /// isn't enabled is rejected before it ever reaches the orderbook
    /// index.
    pub fn validate(&self, marketplace: Marketplace, kind: OrderKind) -> Result<(), crate::error::ValidationError> {
        if self.is_enabled(marketplace, kind) {
            Ok(())
        } else {
            Err(crate::error::ValidationError::UnsupportedOrderKind(marketplace, kind))
        }
    }

    /// Logs, at startup, every (marketplace, kind) cell present in the
    /// table (enabled or explicitly disabled). Does not fail on gaps by
    /// itself; callers that require every recognized cell to be covered
    /// should check `is_enabled` explicitly.
    pub fn log_coverage(&self) {
        for marketplace in Marketplace::ALL {
            for kind in OrderKind::ALL {
                if let Some(&enabled) = self.enabled.get(&(marketplace, kind)) {
                    tracing::info!(?marketplace, ?kind, enabled, "order kind entry present");
                }
            }
        }
    }
}

impl Default for EnablementTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubBuilder;
    impl OrderBuilder for StubBuilder {
        fn exchange_address(&self) -> &str {
            "0xexchange"
        }
        fn encode_fill_calldata(&self, _order: &[u8], _counterpart: &[u8]) -> Vec<u8> {
            Vec::new()
        }
    }

    #[test]
    fn disabled_by_default() {
        let table = EnablementTable::new();
        assert!(!table.is_enabled(Marketplace::Seaport, OrderKind::SingleToken));
    }

    #[test]
    fn enabling_a_cell_makes_it_visible() {
        let mut table = EnablementTable::new();
        table.enable(Marketplace::Seaport, OrderKind::SingleToken, Box::new(StubBuilder));
        assert!(table.is_enabled(Marketplace::Seaport, OrderKind::SingleToken));
        assert!(!table.is_enabled(Marketplace::Infinity, OrderKind::SingleToken));
    }

    #[test]
    fn default_enablement_matches_shipped_config() {
        let table = EnablementTable::with_default_enablement();
        assert!(table.is_enabled(Marketplace::Seaport, OrderKind::SingleToken));
        assert!(!table.is_enabled(Marketplace::Infinity, OrderKind::SingleToken));
        assert!(!table.is_enabled(Marketplace::Blur, OrderKind::SingleToken));
    }

    #[test]
    fn validate_rejects_a_disabled_cell() {
        let table = EnablementTable::with_default_enablement();
        assert!(table.validate(Marketplace::Seaport, OrderKind::SingleToken).is_ok());
        assert!(table.validate(Marketplace::Blur, OrderKind::SingleToken).is_err());
    }
}
