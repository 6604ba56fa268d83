//! Live chain-backed [`WatermarkSource`]: reads `userMinOrderNonce` off
//! the exchange contract via `ethers::contract::abigen!`, the same
//! generated-binding idiom the `ethers` crate documents for any other
//! read-only view call.

use std::pin::Pin;
use std::sync::Arc;

use ethers::contract::abigen;
use ethers::providers::{Http, Provider};
use ethers::types::Address;

use crate::error::NonceError;

use super::WatermarkSource;

abigen!(
    ExchangeWatermark,
    r#"[
        function userMinOrderNonce(address account) external view returns (uint256)
    ]"#
);

pub struct EthersWatermarkSource {
    provider: Arc<Provider<Http>>,
}

impl EthersWatermarkSource {
    pub fn new(provider: Arc<Provider<Http>>) -> Self {
        Self { provider }
    }
}

impl WatermarkSource for EthersWatermarkSource {
    fn user_min_order_nonce<'a>(
        &'a self,
        exchange: Address,
        account: Address,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<u64, NonceError>> + Send + 'a>> {
        Box::pin(async move {
            let contract = ExchangeWatermark::new(exchange, self.provider.clone());
            let watermark = contract
                .user_min_order_nonce(account)
                .call()
                .await
                .map_err(|e| NonceError::ChainRpc(e.to_string()))?;
            Ok(watermark.as_u64())
        })
    }
}
