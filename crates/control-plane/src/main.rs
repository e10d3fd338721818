//! Control plane service: project/build/deployment registry, webhook entry
//! point, SSE fanout, secrets vault, and orchestration of the build worker
//! and deploy uplink.

mod broadcast;
mod config;
mod coordinator;
mod error;
mod forge;
mod handlers;
mod state;
mod vault;

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use dotenvy::dotenv;
use tracing::{error, info, warn};

use store::{PoolOptions, Store};

use crate::broadcast::Broadcaster;
use crate::config::Config;
use crate::coordinator::Coordinator;
use crate::forge::ForgeClient;
use crate::state::AppState;
use crate::vault::Vault;

#[derive(Parser)]
#[command(name = "control-plane", about = "Deployment platform control plane")]
struct Cli {
    /// HTTP port
    #[arg(short, long, env = "PORT", default_value = "4000")]
    port: u16,

    /// PostgreSQL connection URL
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Prometheus exporter port (0 disables the exporter)
    #[arg(long, env = "METRICS_PORT", default_value = "0")]
    metrics_port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    monitoring::init_logging();

    let cli = Cli::parse();
    monitoring::init_metrics()?;

    let mut config = Config::from_env();
    config.port = cli.port;
    if let Some(database_url) = cli.database_url {
        config.database_url = database_url;
    }
    config.validate()?;

    let store = Store::connect(
        &config.database_url,
        PoolOptions {
            max_conns: config.db_max_conns,
            min_conns: config.db_min_conns,
            max_lifetime_mins: config.db_max_conn_lifetime_mins,
            idle_timeout_mins: config.db_max_conn_idle_mins,
        },
    )
    .await?;
    store.init_schema().await?;

    let broadcaster = Broadcaster::start();
    let vault = Arc::new(Vault::new(&config.encryption_key));

    let forge = match ForgeClient::new(&config.github_app_id, &config.github_key_path) {
        Ok(client) => Some(Arc::new(client)),
        Err(e) => {
            warn!("Forge integration unavailable: {}", e);
            None
        }
    };

    let coordinator = Coordinator::new(
        store.clone(),
        broadcaster.clone(),
        Arc::clone(&vault),
        &config.build_worker_url,
        &config.deploy_engine_url,
    );

    let state = AppState {
        store,
        broadcaster,
        vault,
        coordinator,
        forge,
    };

    if cli.metrics_port != 0 {
        let addr = SocketAddr::from(([0, 0, 0, 0], cli.metrics_port));
        tokio::spawn(async move {
            if let Err(e) = monitoring::start_metrics_server(addr).await {
                error!("Metrics server error: {}", e);
            }
        });
    }

    let app = handlers::router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Control plane listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}
