//! Order ingestion: the entry point where a decoded `Order` first enters
//! the system. Signature verification against the signer's wallet is
//! assumed done upstream (see PURPOSE & SCOPE); this layer's only job is
//! the enablement gate (`EnablementTable::validate`) that spec §6
//! requires before an unsupported (marketplace, kind) pair ever reaches
//! the orderbook index.

use crate::error::IngestError;
use crate::models::{EnablementTable, Order};
use crate::storage::OrderbookStorage;

pub async fn ingest_order<S: OrderbookStorage>(
    enablement: &EnablementTable,
    storage: &S,
    order: Order,
) -> Result<(), IngestError> {
    enablement.validate(order.marketplace, order.kind)?;
    storage.save(&order).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AssetScope, Marketplace, OrderKind, OrderStatus, Side};
    use crate::storage::InMemoryStorage;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn order(marketplace: Marketplace, kind: OrderKind) -> Order {
        Order {
            id: "0xorder".into(),
            chain_id: 1,
            side: Side::Sell,
            scope: AssetScope::SingleToken { collection: "0x1".into(), token_id: "1".into() },
            complication: "0xc".into(),
            currency: "weth".into(),
            start_price_eth: dec!(0.1),
            start_time: Utc::now() - chrono::Duration::minutes(1),
            end_time: Utc::now() + chrono::Duration::hours(1),
            signer: "0xsigner".into(),
            raw_payload: vec![],
            marketplace,
            kind,
            on_chain_nonce: 0,
            status: OrderStatus::Active,
        }
    }

    #[tokio::test]
    async fn enabled_cell_is_saved() {
        let enablement = EnablementTable::with_default_enablement();
        let storage = InMemoryStorage::new();
        let o = order(Marketplace::Seaport, OrderKind::SingleToken);
        let id = o.id.clone();
        ingest_order(&enablement, &storage, o).await.unwrap();
        assert!(storage.has(&id).await.unwrap());
    }

    #[tokio::test]
    async fn disabled_cell_is_rejected_before_it_reaches_storage() {
        let enablement = EnablementTable::with_default_enablement();
        let storage = InMemoryStorage::new();
        let o = order(Marketplace::Blur, OrderKind::SingleToken);
        let id = o.id.clone();
        let result = ingest_order(&enablement, &storage, o).await;
        assert!(matches!(result, Err(IngestError::Validation(_))));
        assert!(!storage.has(&id).await.unwrap());
    }
}
