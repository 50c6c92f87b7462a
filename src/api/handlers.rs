//! Health and statistics handlers.

use crate::models::{HealthResponse, StatsResponse};
use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use std::sync::Arc;

// ============================================================================
// Health Check
// ============================================================================

/// Health check endpoint.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    ),
    tag = "Health"
)]
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let database = match state.store.db() {
        Some(db) if db.ping().await => "connected",
        Some(_) => "unreachable",
        None => "disabled",
    };
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database: database.to_string(),
        uptime_secs: state.uptime_secs(),
        stream_connections: state.hub.connection_count(),
    })
}

// ============================================================================
// Global Statistics
// ============================================================================

/// Get global statistics.
#[utoipa::path(
    get,
    path = "/api/v1/stats",
    responses(
        (status = 200, description = "Global statistics", body = StatsResponse)
    ),
    tag = "Statistics"
)]
pub async fn get_global_stats(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    Json(StatsResponse {
        users: state.store.user_count(),
        symbols: state.store.symbols().len(),
        cached_chains: state.chains.cached_count(),
        settings_version: state.settings.version(),
        stream: state.hub.stats(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_health_without_database() {
        let state = Arc::new(AppState::default());
        let Json(health) = health_check(State(state)).await;
        assert_eq!(health.status, "healthy");
        assert_eq!(health.database, "disabled");
        assert_eq!(health.stream_connections, 0);
    }

    #[tokio::test]
    async fn test_stats_count_registered_symbols() {
        let state = Arc::new(AppState::default());
        state.register_symbols().await.unwrap();
        let Json(stats) = get_global_stats(State(Arc::clone(&state))).await;
        assert_eq!(stats.symbols, 3);
        assert_eq!(stats.users, 0);
        assert_eq!(stats.settings_version, 1);
        assert_eq!(stats.stream.active_connections, 0);
    }
}
