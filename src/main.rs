//! Worker binary: runs the scheduler drivers against the configured chains.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use secrecy::SecretString;

use custodia::chain::bitcoin::BitcoinAdapter;
use custodia::chain::ethereum::EthereumAdapter;
use custodia::chain::tron::TronAdapter;
use custodia::chain::ChainAdapter;
use custodia::config::Config;
use custodia::db;
use custodia::services::{
    AuditSink, DepositPipeline, EventBus, KeyManager, Ledger, Notifier, RiskEngine, Scheduler,
    WithdrawalPipeline,
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();
    tracing::info!("Starting custodial worker");

    let pool = db::create_pool(&config.database_url).context("Failed to create database pool")?;
    {
        let mut conn = pool.get().context("Failed to get database connection")?;
        db::run_migrations(&mut conn).context("Failed to run migrations")?;
    }

    let adapters = build_adapters(&config);
    if adapters.is_empty() {
        tracing::warn!("No chain adapters configured; pipelines will idle");
    }
    let hot_wallets: HashMap<String, String> = config
        .chains
        .iter()
        .map(|chain| (chain.name.clone(), chain.hot_wallet.clone()))
        .collect();

    let audit = AuditSink::new(pool.clone());
    let events = EventBus::new();
    let notifier = Notifier::new(pool.clone());
    let ledger = Ledger::new(pool.clone());
    let risk = RiskEngine::new(pool.clone());
    let key_manager = Arc::new(KeyManager::new(
        pool.clone(),
        SecretString::new(config.kek_secret.clone()),
        audit.clone(),
    ));

    let deposits = Arc::new(DepositPipeline::new(
        pool.clone(),
        adapters.clone(),
        key_manager.clone(),
        audit.clone(),
        events.clone(),
        notifier.clone(),
        config.max_scan_blocks,
        hot_wallets.clone(),
    ));
    let withdrawals = Arc::new(WithdrawalPipeline::new(
        pool.clone(),
        adapters,
        ledger,
        key_manager,
        risk,
        audit,
        events,
        notifier.clone(),
        hot_wallets,
    ));

    let mut scheduler = Scheduler::new(deposits, withdrawals, notifier, config.scheduler.clone());
    scheduler.start();

    tokio::signal::ctrl_c().await.context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received");

    scheduler.shutdown().await;
    tracing::info!("Worker exited");
    Ok(())
}

fn build_adapters(config: &Config) -> HashMap<String, Arc<dyn ChainAdapter>> {
    let mut adapters: HashMap<String, Arc<dyn ChainAdapter>> = HashMap::new();

    for chain in &config.chains {
        let adapter: Arc<dyn ChainAdapter> = match chain.name.as_str() {
            "ethereum" | "bsc" | "polygon" => Arc::new(EthereumAdapter::with_name(
                &chain.rpc_url,
                chain.chain_id,
                chain.confirmations,
                &chain.name,
            )),
            "tron" => Arc::new(TronAdapter::new(
                &chain.rpc_url,
                &chain.credential,
                chain.confirmations,
            )),
            "bitcoin" => Arc::new(BitcoinAdapter::new(
                &chain.rpc_url,
                &chain.credential,
                chain.confirmations,
            )),
            other => {
                tracing::warn!(chain = other, "Unknown chain in configuration, skipping");
                continue;
            }
        };
        tracing::info!(chain = %chain.name, confirmations = chain.confirmations, "Chain adapter ready");
        adapters.insert(chain.name.clone(), adapter);
    }

    adapters
}
