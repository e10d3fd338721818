//! Build worker service: consumes build jobs from the control plane,
//! executes the clone/install/build/package/upload pipeline in a bounded
//! worker pool, and streams progress back.

mod artifact;
mod command;
mod config;
mod error;
mod git;
mod github;
mod pipeline;
mod pool;
mod reporter;
mod server;
mod streamer;

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use dotenvy::dotenv;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::github::GithubAuth;
use crate::pipeline::WorkerContext;
use crate::pool::BuilderPool;
use crate::reporter::StatusClient;
use crate::streamer::LogRouter;

#[derive(Parser)]
#[command(name = "build-worker", about = "Deployment platform build worker")]
struct Cli {
    /// HTTP port
    #[arg(short, long, env = "PORT", default_value = "4001")]
    port: u16,

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

    let github = if config.github_app_id.is_empty() {
        warn!("GITHUB_APP_ID not set; private repositories will fail to clone");
        None
    } else {
        match GithubAuth::new(&config.github_app_id, &config.github_key_path) {
            Ok(auth) => Some(auth),
            Err(e) => {
                warn!("App auth unavailable: {}", e);
                None
            }
        }
    };

    let ctx = Arc::new(WorkerContext {
        logs: LogRouter::new(&config.control_api_url),
        status: StatusClient::new(&config.control_api_url),
        github,
        http: reqwest::Client::new(),
        config,
    });

    let pool = BuilderPool::start(ctx.config.build_workers, Arc::clone(&ctx));

    if cli.metrics_port != 0 {
        let addr = SocketAddr::from(([0, 0, 0, 0], cli.metrics_port));
        tokio::spawn(async move {
            if let Err(e) = monitoring::start_metrics_server(addr).await {
                error!("Metrics server error: {}", e);
            }
        });
    }

    let app = server::router(pool.submitter());
    let addr = SocketAddr::from(([0, 0, 0, 0], ctx.config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Build worker listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Draining in-flight builds...");
    pool.shutdown().await;
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
