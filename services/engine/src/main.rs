use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use arb_config::EngineConfig;
use arb_engine::chain::{ChainClient, EthersChainClient, SignerWallet};
use arb_engine::discovery::{
    CrossVenueDetector, DiscoveryManager, InMemoryPoolSource, TriangularDetector,
};
use arb_engine::execution::{Executor, FlashbotsClient};
use arb_engine::flash_loan::{LendingPoolProvider, ProviderRegistry, VaultProvider};
use arb_engine::market_data::{MarketDataFeed, PriceSnapshot, StaticPriceSource};
use arb_engine::strategy::StrategySelector;
use arb_engine::system::ArbitrageSystem;
use arb_engine::tracker::TransactionTracker;
use arb_engine::validation::ValidationPipeline;
use arb_types::{PoolInfo, VenueId};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Config: explicit file argument, else environment with defaults.
    let config = match std::env::args().nth(1) {
        Some(path) => EngineConfig::from_file(&path)
            .with_context(|| format!("loading configuration from {path}"))?,
        None => EngineConfig::from_env(),
    };
    config.validate().context("invalid configuration")?;
    info!("✅ Configuration loaded and validated");

    let chain: Arc<dyn ChainClient> = Arc::new(
        EthersChainClient::new(&config.chain.rpc_url, config.chain.rpc_timeout_seconds)
            .context("building chain client")?,
    );
    let wallet = SignerWallet::from_key(&config.chain.wallet_key, config.chain.chain_id)
        .context("loading trading wallet key")?;
    info!("trading wallet: {:?}", wallet.address());

    // Flash loan sources.
    let providers = Arc::new(ProviderRegistry::new(
        vec![
            Arc::new(VaultProvider::new(
                chain.clone(),
                wallet.clone(),
                config.flash_loan.vault_address,
                config.flash_loan.supported_tokens.clone(),
            )),
            Arc::new(LendingPoolProvider::new(
                chain.clone(),
                wallet.clone(),
                config.flash_loan.lending_pool_address,
                config.flash_loan.supported_tokens.clone(),
            )),
        ],
        &config.flash_loan.preferred_providers,
    ));

    // Private relay, only when MEV protection is on. The relay signs with a
    // dedicated key, never the trading key.
    let relay = if config.execution.enable_flashbots {
        let auth = SignerWallet::from_key(&config.chain.flashbots_auth_key, config.chain.chain_id)
            .context("loading relay authentication key")?;
        Some(Arc::new(FlashbotsClient::new(
            config.chain.flashbots_relay_url.clone(),
            auth,
        )?) as Arc<dyn arb_engine::execution::BundleRelay>)
    } else {
        None
    };

    // Pool snapshots: file-seeded until a live adapter feeds this seam.
    let pools: Vec<PoolInfo> = match &config.chain.pools_file {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading pool snapshot {path}"))?;
            serde_json::from_str(&raw).with_context(|| format!("parsing pool snapshot {path}"))?
        }
        None => {
            warn!("no pool snapshot configured; discovery starts empty");
            Vec::new()
        }
    };
    info!("📂 Seeded {} pools", pools.len());
    let pool_source = Arc::new(InMemoryPoolSource::new(pools));

    let market = Arc::new(MarketDataFeed::new(
        chain.clone(),
        Arc::new(StaticPriceSource::new(PriceSnapshot::default())),
    ));

    let mut discovery = DiscoveryManager::new(pool_source, config.discovery.clone());
    discovery.register(Arc::new(CrossVenueDetector::new(Default::default())));
    discovery.register(Arc::new(TriangularDetector::new(Default::default())));
    let discovery = Arc::new(discovery);

    let validation = Arc::new(ValidationPipeline::standard(config.validation.clone()));
    let selector = Arc::new(StrategySelector::new(
        chain.clone(),
        providers.clone(),
        wallet.address(),
        config.execution.clone(),
    ));

    let routers: HashMap<VenueId, ethers::types::Address> = config
        .chain
        .routers
        .iter()
        .map(|(venue, address)| (VenueId::new(venue.clone()), *address))
        .collect();
    let executor = Arc::new(Executor::new(
        chain.clone(),
        wallet,
        relay.clone(),
        providers,
        routers,
        config.execution.clone(),
    ));
    let tracker = Arc::new(TransactionTracker::new(
        chain,
        relay,
        config.tracker.clone(),
    ));

    let system = Arc::new(ArbitrageSystem::new(
        market,
        discovery,
        validation,
        selector,
        executor,
        tracker,
        config,
    ));

    system.start().await;
    info!("🚀 Arbitrage engine running; ctrl-c to stop");

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("shutdown signal received");
    system.stop().await;

    Ok(())
}
