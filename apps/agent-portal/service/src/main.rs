use std::net::SocketAddr;

use agent_portal_service::build_router;
use agent_portal_service::config::Config;
use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "Agent portal web service")]
struct Args {
    /// Listen address. Overrides `AGENT_PORTAL_BIND_ADDR`.
    #[arg(long)]
    bind_addr: Option<SocketAddr>,

    /// Log filter used when `RUST_LOG` is unset. Overrides `AGENT_PORTAL_LOG_FILTER`.
    #[arg(long)]
    log_filter: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = Config::from_env().context("load agent portal config")?;
    if let Some(bind_addr) = args.bind_addr {
        config.bind_addr = bind_addr;
    }
    if let Some(log_filter) = args.log_filter {
        config.log_filter = log_filter;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_filter.as_str()));
    if args.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let bind_addr = config.bind_addr;
    tracing::info!(
        %bind_addr,
        auth_provider = config.auth_provider_mode.as_str(),
        agent_service = config.agent_service_url.as_deref().unwrap_or("disabled"),
        "starting agent portal"
    );

    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("bind {bind_addr}"))?;
    axum::serve(listener, build_router(config))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serve agent portal")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::warn!(reason = %error, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
