use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tracing::{info, warn};

use crate::config::LeaderboardConfig;
use crate::db::{connect_to, schema::create_schema};
use crate::leaderboard::{LeaderboardEngine, LeaderboardService};

use super::routes::LeaderboardServer;

const LOG_TARGET: &str = "server::bootstrap";

pub struct ServerConfig {
    pub bind: SocketAddr,
    pub database_url: String,
    pub init_schema: bool,
    pub request_timeout: Duration,
    pub leaderboard: LeaderboardConfig,
}

pub async fn run_server(config: ServerConfig) -> Result<()> {
    let db = connect_to(&config.database_url).await?;
    if config.init_schema {
        create_schema(&db)
            .await
            .context("failed to create leaderboard schema")?;
    }

    let service: Arc<dyn LeaderboardService> =
        Arc::new(LeaderboardEngine::from_sea_orm(db, config.leaderboard));

    let router = LeaderboardServer::new(service)
        .into_router()
        .layer(TimeoutLayer::new(config.request_timeout))
        .layer(CorsLayer::permissive());
    let make_service = router.into_make_service();

    let listener = TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;
    let local_addr = listener.local_addr()?;
    info!(
        target: LOG_TARGET,
        %local_addr,
        init_schema = config.init_schema,
        "leaderboard server listening"
    );

    axum::serve(listener, make_service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server exited with error")
}

pub async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(
            target: LOG_TARGET,
            error = %err,
            "failed to install ctrl-c handler"
        );
    }
    info!(target: LOG_TARGET, "shutdown signal received");
}
