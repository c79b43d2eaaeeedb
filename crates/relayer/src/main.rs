use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod chain;
mod config;
mod error;
mod server;
mod withdrawal;

use chain::EvmPoolChain;
use config::RelayerConfig;
use server::RelayerState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relayer=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting privacy pool relayer");

    dotenvy::dotenv().ok();
    let config = RelayerConfig::from_env()?;

    info!("Network: {}", config.network_name);
    info!("Pool address: {}", config.pool_address);
    info!("Relayer address: {}", config.relayer_address());

    let chain = Arc::new(EvmPoolChain::connect(&config)?);
    let state = Arc::new(RelayerState::new(&config, chain));

    server::run(state, &config).await?;
    Ok(())
}
