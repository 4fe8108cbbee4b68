//! zkpf-agent-relay
//!
//! Hosts a wallet agent behind a WebSocket listener.
//!
//! Configuration comes from `ZKPF_RELAY__*` / `ZKPF_AGENT__*` environment
//! variables (a `.env` file is honoured) and an optional file named by
//! `ZKPF_CONFIG_FILE`.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use zkpf_agent_relay::{Relay, RelayConfig};
use zkpf_wallet_agent::{AgentConfig, WalletAgent};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config_file = std::env::var_os("ZKPF_CONFIG_FILE").map(PathBuf::from);
    let relay_config =
        RelayConfig::load(config_file.as_deref()).context("failed to load relay configuration")?;
    init_tracing(relay_config.log_json);

    let agent_config =
        AgentConfig::load(config_file.as_deref()).context("failed to load agent configuration")?;
    let (agent, mut resync) = WalletAgent::builder(agent_config).build()?;

    info!("Starting zkpf-agent-relay");

    // No chain backend is attached to the relay; resync requests are only recorded.
    tokio::spawn(async move {
        while let Some(address) = resync.recv().await {
            info!(address = %address, "account resync requested");
        }
    });

    let listener = TcpListener::bind(&relay_config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", relay_config.bind_addr))?;

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received shutdown signal");
            }
            shutdown.cancel();
        }
    });

    Relay::new(agent, &relay_config).serve(listener, shutdown).await;

    info!("zkpf-agent-relay stopped");
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "zkpf_agent_relay=info,zkpf_wallet_agent=info".into());

    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
