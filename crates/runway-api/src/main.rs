//! Runway CI server.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use runway_api::services::{GitHubStatusReporter, LogReporter};
use runway_api::{AppState, routes};
use runway_config::ServerConfig;
use runway_core::reporter::StatusReporter;
use runway_db::Db;
use runway_executor::LocalProcessExecutor;
use runway_scheduler::{Scheduler, SchedulerConfig};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "runway-server")]
#[command(about = "Self-hosted CI server", long_about = None)]
#[command(version)]
struct Args {
    /// Configuration file
    #[arg(short, long, env = "RUNWAY_CONFIG", default_value = "runway.kdl")]
    config: PathBuf,

    /// Override the database path
    #[arg(long, env = "RUNWAY_DATABASE")]
    database: Option<PathBuf>,

    /// Override the listen address
    #[arg(long, env = "RUNWAY_LISTEN")]
    listen: Option<SocketAddr>,

    /// Override the number of concurrent builds
    #[arg(long)]
    concurrency: Option<usize>,

    /// Log as JSON lines
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if args.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let mut config = ServerConfig::load(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;
    if let Some(database) = args.database {
        config.database = database;
    }
    if let Some(listen) = args.listen {
        config.server.listen = listen;
    }
    if let Some(concurrency) = args.concurrency {
        config.set_concurrency(concurrency)?;
    }

    if let Some(parent) = config.database.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    info!(path = %config.database.display(), "Opening database");
    let db = Db::open(&config.database)?;

    let reporter: Arc<dyn StatusReporter> = match &config.github.token {
        Some(token) => Arc::new(GitHubStatusReporter::new(
            token.clone(),
            config.server.public_url.clone(),
        )),
        None => {
            warn!("No GitHub token configured, build statuses will only be logged");
            Arc::new(LogReporter)
        }
    };
    if config.github.webhook_secret.is_none() {
        warn!("No webhook secret configured, webhook signatures are not checked");
    }

    let scheduler = Scheduler::new(
        db.clone(),
        Arc::new(LocalProcessExecutor::new()),
        reporter,
        SchedulerConfig::from_server_config(&config),
    )
    .start()
    .await?;

    let state = AppState::new(db, scheduler.submitter())
        .with_webhook_secret(config.github.webhook_secret.clone());

    let app = routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    info!("Starting server on {}", config.server.listen);
    let listener = TcpListener::bind(config.server.listen).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Waiting for running builds to finish");
    scheduler.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}
