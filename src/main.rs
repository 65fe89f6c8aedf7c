use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use compass_core::AppBuilder;
use compass_core::bootstrap::resolve_config_path;
use compass_core::vault::EnvVaultProvider;
use compass_gateway::GatewayServer;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Parser)]
#[command(name = "compass", version, about = "Ask questions about git repositories")]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override `server.port`.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_subscriber();

    let config_path = resolve_config_path(cli.config);
    let app = AppBuilder::load(config_path, &EnvVaultProvider)
        .await
        .context("failed to load configuration")?;
    tracing::info!(config = %app.config_path().display(), "configuration loaded");

    let store = app.build_store().await?;
    let jobs = CancellationToken::new();
    let service = app.build_service(store, jobs.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {e:#}");
            return;
        }
        tracing::info!("received shutdown signal");
        jobs.cancel();
        let _ = shutdown_tx.send(true);
    });

    let server_cfg = &app.config().server;
    GatewayServer::new(
        &server_cfg.bind,
        cli.port.unwrap_or(server_cfg.port),
        service.clone(),
        shutdown_rx,
    )
    .with_auth(server_cfg.auth_token.clone())
    .with_rate_limit(server_cfg.rate_limit)
    .with_max_body_size(server_cfg.max_body_size)
    .serve()
    .await
    .context("gateway failed")?;

    service.shutdown();
    Ok(())
}

fn init_subscriber() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
