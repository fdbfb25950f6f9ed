//! HTTP server binary.

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use stratadb::config::ServerConfig;
use stratadb::http_server::{build_router, AppState};

#[derive(Parser, Debug)]
#[command(name = "stratadb-server", about = "Multi-tenant data backend")]
struct Args {
    /// Path to a TOML config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the data directory
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Override the bind address
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut config = match ServerConfig::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            std::process::exit(1);
        }
    };
    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    if let Err(e) = config.validate() {
        tracing::error!(error = %e, "invalid configuration");
        std::process::exit(1);
    }

    let state = AppState::new(config.clone());
    if let Err(e) = state.tenants.initialize() {
        tracing::error!(error = %e, "infrastructure initialization failed");
        std::process::exit(1);
    }

    let router = build_router(state);
    let listener = match tokio::net::TcpListener::bind(&config.bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(bind = %config.bind_addr, error = %e, "bind failed");
            std::process::exit(1);
        }
    };
    tracing::info!(bind = %config.bind_addr, data_dir = %config.data_dir.display(), "listening");

    if let Err(e) = axum::serve(listener, router).await {
        tracing::error!(error = %e, "server error");
        std::process::exit(1);
    }
}
