use std::sync::Arc;

use anyhow::Context;
use chrono::Duration;
use murmur_auth::{Authenticator, SqliteSessionStore};
use murmur_database::initialize_database;
use murmur_gateway::{create_router, GatewayState};
use tokio::{net::TcpListener, signal};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_env_filter(env_filter)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    info!("starting Murmur backend");

    let config = murmur_config::load().context("failed to load configuration")?;

    let pool = initialize_database(&config.database)
        .await
        .context("failed to initialize database")?;

    let session_ttl = Duration::seconds(config.auth.session_ttl_seconds as i64);
    let sessions = Arc::new(SqliteSessionStore::new(pool.clone(), session_ttl));
    let authenticator = Authenticator::new(pool.clone(), sessions);
    info!(
        session_ttl_seconds = config.auth.session_ttl_seconds,
        "authentication subsystem ready"
    );

    let state = GatewayState::new(pool, authenticator);
    let app = create_router(state);

    let address = format!("{}:{}", config.http.address, config.http.port);
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind http listener on {address}"))?;

    info!(%address, "http server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server error")?;

    info!("backend shut down");
    Ok(())
}

fn shutdown_signal() -> impl std::future::Future<Output = ()> {
    async {
        if let Err(error) = signal::ctrl_c().await {
            error!(?error, "failed to listen for shutdown signal");
        }
        info!("shutdown signal received");
    }
}
