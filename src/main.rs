//! Velox API Server
//!
//! REST and WebSocket server for the Velox retail trading platform.

use anyhow::Context;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use velox_api::api::create_app;
use velox_api::config::{Config, LoggingConfig};
use velox_api::db::{DatabasePool, LogLevel};
use velox_api::state::AppState;

const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

fn load_config() -> anyhow::Result<Config> {
    let path = std::env::var("VELOX_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let mut config = if Path::new(&path).exists() {
        Config::load(&path).with_context(|| format!("loading {path}"))?
    } else {
        Config::default()
    };
    config.apply_env().context("applying environment overrides")?;
    Ok(config)
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| logging.level.as_str().into());
    let registry = tracing_subscriber::registry().with(filter);
    if logging.json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn connect_database(config: &Config) -> anyhow::Result<Option<DatabasePool>> {
    let Some(url) = config.database.url.as_deref() else {
        warn!("DATABASE_URL not set, running with in-memory storage only");
        return Ok(None);
    };
    let db = DatabasePool::connect(url, &config.database)
        .await
        .context("connecting to PostgreSQL")?;
    if config.database.run_migrations {
        db.run_migrations().await.context("running migrations")?;
    }
    Ok(Some(db))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = load_config()?;
    init_tracing(&config.logging);

    let db = connect_database(&config).await?;
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = Arc::new(AppState::from_config(config, db));
    state.store.hydrate().await.context("loading persisted records")?;

    let registered = state.register_symbols().await?;
    info!(symbols = registered, "Symbols registered");
    let _feed = state.spawn_feed().await;
    state
        .audit
        .system(LogLevel::Info, "server", format!("Velox API starting on {addr}"))
        .await;

    info!("Starting Velox API on {}", addr);
    info!("Swagger UI available at http://{}/swagger-ui/", addr);

    let app = create_app(Arc::clone(&state));
    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
