//! EthProofs proving sentry CLI.
//!
//! A single long-lived process; no subcommands. Exits non-zero only on fatal
//! configuration errors at startup.

use clap::Parser;
use ethproofs_sentry::{supervisor, Config};
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ethproofs_sentry=info".parse()?),
        )
        .init();

    let settings = Config::parse().validate()?;
    info!(
        eth_rpc_url = %settings.eth_rpc_url,
        elf_path = %settings.elf_path.display(),
        dev = settings.dev,
        health_port = settings.health_port,
        "Configuration loaded"
    );

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
            signal_token.cancel();
        }
    });

    supervisor::run(settings, shutdown).await
}
