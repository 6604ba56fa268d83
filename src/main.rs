//! Bootstrap binary for the relayer core: wires the orderbook storage,
//! matching engine, execution engine, and nonce/broadcast subsystem to
//! live infrastructure and then idles, the same init-then-serve shape
//! the reference backend's `main.rs` uses, minus the HTTP router — the
//! control surface that starts/stops per-collection pipelines and
//! queries status is an external collaborator, not mounted by this
//! crate.

use std::sync::Arc;

use ethers::providers::{Http, Provider};
use ethers::signers::{LocalWallet, Signer};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use relayer_core::broadcast::Broadcaster;
use relayer_core::cache::{RedisClient, RedisConfig};
use relayer_core::config::AppConfig;
use relayer_core::db::PostgresDocumentStore;
use relayer_core::execution::ExecutionEngine;
use relayer_core::matching::MatchingEngine;
use relayer_core::models::{EnablementTable, Marketplace, OrderKind};
use relayer_core::nonce::{EthersWatermarkSource, WatermarkSource};
use relayer_core::storage::RedisOrderbookStorage;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relayer_core=info,sqlx=warn,redis=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    metrics_exporter_prometheus::PrometheusBuilder::new()
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Full("match_order_duration_seconds".to_string()),
            &[0.0001, 0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.5],
        )?
        .install()?;

    let config = AppConfig::load()?;
    tracing::info!(chain_id = config.chain_id, mode = ?config.mode, "starting relayer core");

    let redis = Arc::new(
        RedisClient::new(RedisConfig {
            url: config.redis_url.clone(),
            ..Default::default()
        })
        .await?,
    );
    tracing::info!("redis connected");

    let pg_pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;
    tracing::info!("postgres connected");
    let document_store = Arc::new(PostgresDocumentStore::new(pg_pool));

    let chain_provider = Provider::<Http>::try_from(config.http_rpc_url.as_str())?;
    let watermark: Arc<dyn WatermarkSource> = Arc::new(EthersWatermarkSource::new(Arc::new(chain_provider.clone())));

    let signer: LocalWallet = config.initiator_private_key.parse()?;
    let signer = signer.with_chain_id(config.chain_id);

    let broadcaster = Arc::new(if config.use_private_relay() {
        let flashbots_key = config
            .flashbots_signer_key
            .clone()
            .expect("use_private_relay only returns true when a signer key is configured");
        let flashbots_signer: LocalWallet = flashbots_key.parse()?;
        tracing::info!("broadcaster: private relay bundle submission (production path)");
        Broadcaster::private_relay("https://relay.flashbots.net".into(), flashbots_signer)
    } else {
        tracing::info!("broadcaster: direct json-rpc submission (fork/dev path)");
        Broadcaster::direct(chain_provider.clone())
    });

    // Default marketplace enablement: seaport:single-token enabled,
    // infinity's variant present but disabled, everything else
    // disabled. The real per-marketplace SDKs that parse/re-encode order
    // payloads are external collaborators; a concrete deployment
    // supplies their `OrderBuilder` impls here.
    let enablement = Arc::new(EnablementTable::with_default_enablement());
    enablement.log_coverage();
    tracing::info!(
        default_enabled = ?(Marketplace::Seaport, OrderKind::SingleToken),
        "marketplace enablement table constructed (builders supplied by the deployment)"
    );

    let storage = RedisOrderbookStorage::new(redis.clone(), config.chain_id);
    let matching_engine = Arc::new(MatchingEngine::new(storage.clone()));
    tracing::info!("matching engine initialized");

    let execution_engine = Arc::new(ExecutionEngine::new(
        storage,
        enablement,
        broadcaster,
        watermark,
        chain_provider,
        signer,
        config.chain_id,
        config.match_executor_address.clone(),
        redis,
        document_store,
    )?);
    tracing::info!(match_executor = %config.match_executor_address, "execution engine initialized");

    // Ingestion and triggering of `match_order`/`execute_matches` is
    // driven by the external HTTP control surface; this process
    // exposes the constructed engines and otherwise idles, keeping
    // background tasks (lease renewal, debounced nonce saves) alive
    // until shut down.
    let _ = (matching_engine, execution_engine);
    tracing::info!("relayer core ready");
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received, exiting");

    Ok(())
}
