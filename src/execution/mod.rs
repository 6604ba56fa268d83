//! Execution Engine: converts proposed matches into signed on-chain
//! transactions and hands them to the broadcaster, maintaining
//! at-most-one in-flight transaction per nonce.
//!
//! A missing builder for an (marketplace, kind) cell rejects before any
//! nonce is spent, so the nonce provider only ever increments on
//! confirmed allocation. The listing side of each match (the `Sell`
//! order) picks the marketplace/kind used to encode the fill calldata,
//! since that order's exchange is what gets filled against.

use std::sync::Arc;

use dashmap::DashMap;
use ethers::providers::{Middleware, Provider, Http};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::transaction::eip1559::Eip1559TransactionRequest;
use ethers::types::{Address, Bytes};

use crate::broadcast::{BroadcastStatus, BroadcastTarget, Broadcaster, DEFAULT_BLOCK_OFFSET};
use crate::cache::RedisClient;
use crate::db::DocumentStore;
use crate::error::ExecutionError;
use crate::models::{EnablementTable, Match, Order, Side};
use crate::nonce::{NonceProvider, WatermarkSource};
use crate::storage::OrderbookStorage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionOutcome {
    Submitted { tx_hash: Option<String> },
    /// Rejected before any nonce was allocated: unsupported (marketplace,
    /// kind) cell, or the constituent orders are already below the
    /// exchange's cancellation watermark.
    Rejected(String),
    /// The relay simulated and dropped the bundle before `target_block`.
    /// The parent orders stay active; the caller decides whether to
    /// retry.
    Dropped { target_block: u64 },
}

#[derive(Debug, Clone)]
pub struct Submission {
    pub match_id: String,
    pub exchange: String,
    pub nonce: Option<u64>,
    pub outcome: SubmissionOutcome,
}

pub struct ExecutionEngine<S, D>
where
    S: OrderbookStorage,
    D: DocumentStore + Send + Sync + 'static,
{
    storage: S,
    enablement: Arc<EnablementTable>,
    nonce_providers: DashMap<String, Arc<NonceProvider<D>>>,
    broadcaster: Arc<Broadcaster>,
    watermark: Arc<dyn WatermarkSource>,
    chain_provider: Provider<Http>,
    signer: LocalWallet,
    chain_id: u64,
    match_executor_address: String,
    match_executor_address_eth: Address,
    redis: Arc<RedisClient>,
    store: Arc<D>,
}

impl<S, D> ExecutionEngine<S, D>
where
    S: OrderbookStorage,
    D: DocumentStore + Send + Sync + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        storage: S,
        enablement: Arc<EnablementTable>,
        broadcaster: Arc<Broadcaster>,
        watermark: Arc<dyn WatermarkSource>,
        chain_provider: Provider<Http>,
        signer: LocalWallet,
        chain_id: u64,
        match_executor_address: String,
        redis: Arc<RedisClient>,
        store: Arc<D>,
    ) -> Result<Self, ExecutionError> {
        let match_executor_address_eth: Address = match_executor_address
            .parse()
            .map_err(|_| ExecutionError::Rejected(format!("invalid match executor address: {match_executor_address}")))?;
        Ok(Self {
            storage,
            enablement,
            nonce_providers: DashMap::new(),
            broadcaster,
            watermark,
            chain_provider,
            signer,
            chain_id,
            match_executor_address,
            match_executor_address_eth,
            redis,
            store,
        })
    }

    pub async fn execute_matches(&self, matches: &[Match]) -> Result<Vec<Submission>, ExecutionError> {
        let mut ordered: Vec<&Match> = matches.iter().collect();
        ordered.sort_by(|a, b| b.max_gas_price_eth.cmp(&a.max_gas_price_eth));

        let mut submissions = Vec::with_capacity(ordered.len());
        // exchange address -> watermark, fetched once per group per call
        let mut watermarks: std::collections::HashMap<String, u64> = std::collections::HashMap::new();

        for m in ordered {
            let Some(order_a) = self.storage.get_order(&m.order_a).await? else { continue };
            let Some(order_b) = self.storage.get_order(&m.order_b).await? else { continue };
            let (listing, bid) = match (order_a.side, order_b.side) {
                (Side::Sell, Side::Buy) => (order_a, order_b),
                (Side::Buy, Side::Sell) => (order_b, order_a),
                _ => continue, // invariant violation; matching engine never produces same-side matches
            };

            let Some(builder) = self.enablement.builder(listing.marketplace, listing.kind) else {
                submissions.push(Submission {
                    match_id: m.id.clone(),
                    exchange: String::new(),
                    nonce: None,
                    outcome: SubmissionOutcome::Rejected(format!(
                        "unsupported order kind: marketplace={:?} kind={:?}",
                        listing.marketplace, listing.kind
                    )),
                });
                continue;
            };
            let exchange = builder.exchange_address().to_string();
            let exchange_address: Address = match exchange.parse() {
                Ok(a) => a,
                Err(_) => {
                    submissions.push(Submission {
                        match_id: m.id.clone(),
                        exchange: exchange.clone(),
                        nonce: None,
                        outcome: SubmissionOutcome::Rejected(format!("invalid exchange address: {exchange}")),
                    });
                    continue;
                }
            };

            let watermark = match watermarks.get(&exchange) {
                Some(w) => *w,
                None => {
                    let w = self.watermark.user_min_order_nonce(exchange_address, self.match_executor_address_eth).await?;
                    watermarks.insert(exchange.clone(), w);
                    w
                }
            };
            if below_watermark(&listing, watermark) || below_watermark(&bid, watermark) {
                submissions.push(Submission {
                    match_id: m.id.clone(),
                    exchange: exchange.clone(),
                    nonce: None,
                    outcome: SubmissionOutcome::Rejected("constituent order below cancellation watermark".into()),
                });
                continue;
            }

            let nonce_provider = self.get_or_create_nonce_provider(&exchange, exchange_address).await?;
            let nonce = nonce_provider.get_nonce().await?;

            let calldata = builder.encode_fill_calldata(&listing.raw_payload, &bid.raw_payload);
            let raw_signed = self.sign_fill_transaction(exchange_address, calldata, nonce).await?;

            let current_block = self
                .chain_provider
                .get_block_number()
                .await
                .map_err(|e| ExecutionError::ChainRpc(e.to_string()))?
                .as_u64();
            let target_block = current_block + DEFAULT_BLOCK_OFFSET;

            let result = self.broadcaster.broadcast(&raw_signed, BroadcastTarget { target_block }).await?;
            let outcome = match result.status {
                BroadcastStatus::Submitted => {
                    // The match is consumed by submission: it no longer
                    // represents a pending opportunity, and both
                    // constituent orders are recorded as executed so
                    // getExecutionStatus reflects it even after the order
                    // itself is later cancelled or filled elsewhere.
                    self.storage.delete_match(&m.id).await?;
                    self.storage.mark_executed(&listing.id).await?;
                    self.storage.mark_executed(&bid.id).await?;
                    SubmissionOutcome::Submitted { tx_hash: result.tx_hash.map(|h| format!("{h:?}")) }
                }
                BroadcastStatus::Dropped => SubmissionOutcome::Dropped { target_block },
            };
            submissions.push(Submission { match_id: m.id.clone(), exchange, nonce: Some(nonce), outcome });
        }

        for submission in &submissions {
            let outcome_label = match &submission.outcome {
                SubmissionOutcome::Submitted { .. } => "submitted",
                SubmissionOutcome::Rejected(_) => "rejected",
                SubmissionOutcome::Dropped { .. } => "dropped",
            };
            metrics::counter!("execution_submissions_total", "outcome" => outcome_label).increment(1);
        }

        Ok(submissions)
    }

    async fn get_or_create_nonce_provider(&self, exchange: &str, exchange_address: Address) -> Result<Arc<NonceProvider<D>>, ExecutionError> {
        if let Some(existing) = self.nonce_providers.get(exchange) {
            return Ok(existing.clone());
        }
        let provider = NonceProvider::new(
            self.chain_id,
            self.match_executor_address.clone(),
            self.match_executor_address_eth,
            exchange.to_string(),
            exchange_address,
            self.redis.clone(),
            self.store.clone(),
            self.watermark.clone(),
        );
        provider.run().await?;
        self.nonce_providers.insert(exchange.to_string(), provider.clone());
        Ok(provider)
    }

    async fn sign_fill_transaction(&self, to: Address, data: Vec<u8>, nonce: u64) -> Result<Bytes, ExecutionError> {
        let tx: TypedTransaction = Eip1559TransactionRequest::new()
            .to(to)
            .data(Bytes::from(data))
            .nonce(nonce)
            .chain_id(self.chain_id)
            .into();
        let signature = self
            .signer
            .sign_transaction(&tx)
            .await
            .map_err(|e| ExecutionError::ChainRpc(e.to_string()))?;
        Ok(tx.rlp_signed(&signature))
    }
}

fn below_watermark(order: &Order, watermark: u64) -> bool {
    order.on_chain_nonce <= watermark
}
