use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

mod app;
mod auth;
mod http;

#[derive(Parser)]
#[command(name = "atelier-gateway", about = "Atelier agent runtime gateway")]
struct Cli {
    /// Path to atelier.toml. Falls back to ATELIER_CONFIG, then
    /// ~/.atelier/atelier.toml.
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "atelier_gateway=info,atelier_agent=info,tower_http=debug".into()),
        )
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.or_else(|| std::env::var("ATELIER_CONFIG").ok());
    let config = atelier_core::AtelierConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        tracing::warn!("config load failed ({e}), using defaults");
        atelier_core::AtelierConfig::default()
    });

    let bind = config.gateway.bind.clone();
    let port = config.gateway.port;
    let state = Arc::new(app::AppState::new(config)?);
    let router = app::build_router(state);

    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    info!("Atelier gateway listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}
