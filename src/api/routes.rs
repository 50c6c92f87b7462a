//! Route configuration and OpenAPI document.

use crate::api::middleware::{allowed_hosts_middleware, rate_limit_middleware};
use crate::api::{
    accounts, audit, handlers, market_data, option_chain, risk, settings, strategies, trading,
    webhooks, websocket,
};
use crate::state::AppState;
use axum::Router;
use axum::http::HeaderValue;
use axum::middleware::from_fn_with_state;
use axum::routing::{delete, get, post};
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::db::{
    AlertSeverity, AuditLog, ComplianceReport, InstrumentType, LogLevel, MarketDataSubscription,
    OrderType, Position, PositionStatus, QuoteData, ReportStatus, RiskAlert, RiskSettings,
    Strategy, StrategyPerformance, StrategyStatus, StrategyType, SubscriptionDataType, Symbol,
    SystemLog, TickData, Trade, TradeSide, TradeStatus, User, UserRole,
};
use crate::error::{ErrorResponse, FieldError, RiskRejectedResponse, ValidationErrorResponse};
use crate::models::{
    ApiKeyResponse, ChainFilterRequest, ChainRequest, ComplianceReportRequest,
    CreateStrategyRequest, CreateSubscriptionRequest, CreateSymbolRequest, HealthResponse,
    LoginRequest, LoginResponse, MessageResponse, N8nSignalRequest, OhlcBar, OhlcInterval,
    OhlcResponse, PlaceTradeRequest, PositionView, RecordPerformanceRequest, RegisterRequest,
    StatsResponse, StrategyStatusRequest, StrategyView, UpdateProfileRequest,
    UpdateRiskSettingsRequest, UpdateSettingsRequest, UpdateStrategyRequest,
    ValidateSettingsRequest, ValidationResult,
};
use crate::option_chain::{
    Buildup, ChainAnalysis, ChainSource, ChainSummary, FilterCriteria, Greeks, LegSide,
    MaxPainResult, Moneyness, OiAnalysis, OptionChain, OptionLeg, PcrResult, Sentiment,
    StrikeRow, UnderlyingInfo,
};
use crate::option_chain::analytics::{PainPoint, StrikeBuildup, StrikeOi};
use crate::risk::RiskMetrics;
use crate::settings::{
    FieldKind, MergeStrategy, Pattern, SettingField, SettingsSnapshot, SettingsVersion,
};
use crate::stream::{
    Channel, ClientCommand, ConnectionInfo, ConnectionKind, ServerMessage, StreamStats,
    Subscriptions,
};

/// OpenAPI documentation.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health_check,
        handlers::get_global_stats,
        accounts::register,
        accounts::login,
        accounts::logout,
        accounts::generate_api_key,
        accounts::get_profile,
        accounts::update_profile,
        accounts::unlock_user,
        strategies::list_strategies,
        strategies::create_strategy,
        strategies::get_strategy,
        strategies::update_strategy,
        strategies::archive_strategy,
        strategies::change_strategy_status,
        strategies::get_performance,
        strategies::record_performance,
        trading::place_trade,
        trading::list_trades,
        trading::list_positions,
        trading::close_position,
        market_data::list_symbols,
        market_data::create_symbol,
        market_data::get_symbol,
        market_data::get_quote,
        market_data::get_ticks,
        market_data::get_ohlc,
        market_data::list_subscriptions,
        market_data::create_subscription,
        market_data::delete_subscription,
        risk::get_risk_settings,
        risk::update_risk_settings,
        risk::list_alerts,
        risk::acknowledge_alert,
        risk::get_risk_metrics,
        audit::list_audit_logs,
        audit::list_system_logs,
        audit::list_compliance_reports,
        audit::generate_compliance_report,
        settings::get_settings,
        settings::get_settings_schema,
        settings::get_settings_history,
        settings::validate_settings,
        settings::update_settings,
        settings::reset_settings,
        option_chain::list_underlyings,
        option_chain::get_chain,
        option_chain::fetch_chain,
        option_chain::ingest_chain,
        option_chain::get_analysis,
        option_chain::post_analysis,
        option_chain::get_filtered,
        option_chain::post_filter,
        option_chain::get_pcr,
        option_chain::get_max_pain,
        option_chain::get_oi_analysis,
        webhooks::n8n_signal,
        websocket::ws_stream,
        websocket::ws_ticks,
        websocket::ws_stats,
        websocket::ws_connections,
        websocket::ws_health,
    ),
    components(
        schemas(
            ErrorResponse,
            FieldError,
            ValidationErrorResponse,
            RiskRejectedResponse,
            MessageResponse,
            HealthResponse,
            StatsResponse,
            RegisterRequest,
            LoginRequest,
            LoginResponse,
            ApiKeyResponse,
            UpdateProfileRequest,
            User,
            UserRole,
            CreateStrategyRequest,
            UpdateStrategyRequest,
            StrategyStatusRequest,
            RecordPerformanceRequest,
            Strategy,
            StrategyView,
            StrategyType,
            StrategyStatus,
            StrategyPerformance,
            PlaceTradeRequest,
            Trade,
            TradeSide,
            TradeStatus,
            OrderType,
            Position,
            PositionStatus,
            PositionView,
            CreateSymbolRequest,
            Symbol,
            InstrumentType,
            TickData,
            QuoteData,
            OhlcInterval,
            OhlcBar,
            OhlcResponse,
            CreateSubscriptionRequest,
            MarketDataSubscription,
            SubscriptionDataType,
            UpdateRiskSettingsRequest,
            RiskSettings,
            RiskAlert,
            AlertSeverity,
            RiskMetrics,
            AuditLog,
            SystemLog,
            LogLevel,
            ComplianceReportRequest,
            ComplianceReport,
            ReportStatus,
            UpdateSettingsRequest,
            ValidateSettingsRequest,
            ValidationResult,
            MergeStrategy,
            Pattern,
            FieldKind,
            SettingField,
            SettingsSnapshot,
            SettingsVersion,
            ChainRequest,
            ChainFilterRequest,
            FilterCriteria,
            Moneyness,
            OptionChain,
            StrikeRow,
            OptionLeg,
            LegSide,
            Greeks,
            ChainSource,
            UnderlyingInfo,
            ChainAnalysis,
            ChainSummary,
            PcrResult,
            Sentiment,
            MaxPainResult,
            PainPoint,
            OiAnalysis,
            StrikeOi,
            StrikeBuildup,
            Buildup,
            N8nSignalRequest,
            Channel,
            Subscriptions,
            ClientCommand,
            ServerMessage,
            ConnectionKind,
            ConnectionInfo,
            StreamStats,
            websocket::StreamHealthResponse,
        )
    ),
    tags(
        (name = "Health", description = "Health check endpoints"),
        (name = "Statistics", description = "Platform statistics"),
        (name = "Auth", description = "Registration, login and API keys"),
        (name = "Users", description = "User profiles"),
        (name = "Strategies", description = "Strategy management and performance"),
        (name = "Trading", description = "Orders and positions"),
        (name = "Market Data", description = "Symbols, quotes, ticks and bars"),
        (name = "Risk", description = "Risk limits, alerts and metrics"),
        (name = "Audit", description = "Audit trail and compliance reports"),
        (name = "Configuration", description = "Runtime settings"),
        (name = "Option Chain", description = "Option chains and analytics"),
        (name = "Webhooks", description = "Workflow automation signals"),
        (name = "WebSocket", description = "Live market streams"),
    ),
    info(
        title = "Velox API",
        version = "0.1.0",
        description = "Retail trading platform backend",
        license(name = "MIT")
    )
)]
pub struct ApiDoc;

/// Creates the API router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Statistics
        .route("/api/v1/stats", get(handlers::get_global_stats))
        // Authentication
        .route("/api/v1/auth/register", post(accounts::register))
        .route("/api/v1/auth/login", post(accounts::login))
        .route("/api/v1/auth/logout", post(accounts::logout))
        .route("/api/v1/auth/api-key", post(accounts::generate_api_key))
        // Users
        .route(
            "/api/v1/users/me",
            get(accounts::get_profile).put(accounts::update_profile),
        )
        .route("/api/v1/users/{id}/unlock", post(accounts::unlock_user))
        // Strategies
        .route(
            "/api/v1/strategies",
            get(strategies::list_strategies).post(strategies::create_strategy),
        )
        .route(
            "/api/v1/strategies/{id}",
            get(strategies::get_strategy)
                .put(strategies::update_strategy)
                .delete(strategies::archive_strategy),
        )
        .route(
            "/api/v1/strategies/{id}/status",
            post(strategies::change_strategy_status),
        )
        .route(
            "/api/v1/strategies/{id}/performance",
            get(strategies::get_performance).post(strategies::record_performance),
        )
        // Trading
        .route(
            "/api/v1/trades",
            get(trading::list_trades).post(trading::place_trade),
        )
        .route("/api/v1/positions", get(trading::list_positions))
        .route("/api/v1/positions/{id}/close", post(trading::close_position))
        // Market data
        .route(
            "/api/v1/market-data/symbols",
            get(market_data::list_symbols).post(market_data::create_symbol),
        )
        .route(
            "/api/v1/market-data/symbols/{symbol}",
            get(market_data::get_symbol),
        )
        .route(
            "/api/v1/market-data/subscriptions",
            get(market_data::list_subscriptions).post(market_data::create_subscription),
        )
        .route(
            "/api/v1/market-data/subscriptions/{id}",
            delete(market_data::delete_subscription),
        )
        .route("/api/v1/market-data/{symbol}/quote", get(market_data::get_quote))
        .route("/api/v1/market-data/{symbol}/ticks", get(market_data::get_ticks))
        .route("/api/v1/market-data/{symbol}/ohlc", get(market_data::get_ohlc))
        // Risk
        .route(
            "/api/v1/risk/settings",
            get(risk::get_risk_settings).put(risk::update_risk_settings),
        )
        .route("/api/v1/risk/alerts", get(risk::list_alerts))
        .route(
            "/api/v1/risk/alerts/{id}/acknowledge",
            post(risk::acknowledge_alert),
        )
        .route("/api/v1/risk/metrics", get(risk::get_risk_metrics))
        // Audit
        .route("/api/v1/audit/logs", get(audit::list_audit_logs))
        .route("/api/v1/audit/system-logs", get(audit::list_system_logs))
        .route(
            "/api/v1/audit/compliance-reports",
            get(audit::list_compliance_reports).post(audit::generate_compliance_report),
        )
        // Configuration
        .route(
            "/api/v1/config",
            get(settings::get_settings).put(settings::update_settings),
        )
        .route("/api/v1/config/schema", get(settings::get_settings_schema))
        .route("/api/v1/config/history", get(settings::get_settings_history))
        .route("/api/v1/config/validate", post(settings::validate_settings))
        .route("/api/v1/config/reset", post(settings::reset_settings))
        // Option chain
        .route(
            "/api/v1/option-chain/underlyings",
            get(option_chain::list_underlyings),
        )
        .route("/api/v1/option-chain/fetch", post(option_chain::fetch_chain))
        .route(
            "/api/v1/option-chain/analysis",
            post(option_chain::post_analysis),
        )
        .route("/api/v1/option-chain/filter", post(option_chain::post_filter))
        .route(
            "/api/v1/option-chain/{underlying}",
            get(option_chain::get_chain).put(option_chain::ingest_chain),
        )
        .route(
            "/api/v1/option-chain/{underlying}/analysis",
            get(option_chain::get_analysis),
        )
        .route(
            "/api/v1/option-chain/{underlying}/filter",
            get(option_chain::get_filtered),
        )
        .route("/api/v1/option-chain/{underlying}/pcr", get(option_chain::get_pcr))
        .route(
            "/api/v1/option-chain/{underlying}/max-pain",
            get(option_chain::get_max_pain),
        )
        .route(
            "/api/v1/option-chain/{underlying}/oi-analysis",
            get(option_chain::get_oi_analysis),
        )
        // Webhooks
        .route(
            "/api/v1/webhooks/n8n/{strategy_id}",
            post(webhooks::n8n_signal),
        )
        // WebSocket
        .route("/api/v1/ws/stream", get(websocket::ws_stream))
        .route("/api/v1/ws/ticks", get(websocket::ws_ticks))
        .route("/api/v1/ws/stats", get(websocket::ws_stats))
        .route("/api/v1/ws/connections", get(websocket::ws_connections))
        .route("/api/v1/ws/health", get(websocket::ws_health))
        .with_state(state)
}

/// CORS layer for the configured origins. `*` allows any origin.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }
    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(parsed)
}

/// Full application: routes, Swagger UI and middleware.
pub fn create_app(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config.server.cors_origins);
    create_router(Arc::clone(&state))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(from_fn_with_state(Arc::clone(&state), rate_limit_middleware))
        .layer(from_fn_with_state(state, allowed_hosts_middleware))
        .layer(cors)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[test]
    fn test_openapi_lists_paths() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/health"));
        assert!(doc.paths.paths.contains_key("/api/v1/option-chain/{underlying}/max-pain"));
        assert!(doc.paths.paths.contains_key("/api/v1/webhooks/n8n/{strategy_id}"));
        assert!(doc.paths.paths.contains_key("/api/v1/ws/stream"));
    }

    #[test]
    fn test_cors_layer_accepts_lists() {
        let _ = cors_layer(&["*".to_string()]);
        let _ = cors_layer(&["http://localhost:3000".to_string(), "bad\norigin".to_string()]);
    }

    #[tokio::test]
    async fn test_app_serves_health_and_rejects_anonymous_profile() {
        let app = create_app(Arc::new(AppState::default()));

        let response = app
            .clone()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(Request::get("/api/v1/users/me").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    fn limited_app(trust_proxy_headers: bool) -> Router {
        let mut config = crate::config::Config::default();
        config.server.rate_limit_per_minute = 2;
        config.server.trust_proxy_headers = trust_proxy_headers;
        create_app(Arc::new(AppState::from_config(config, None)))
    }

    async fn status_from(app: &Router, forwarded_for: &str) -> StatusCode {
        app.clone()
            .oneshot(
                Request::get("/api/v1/users/me")
                    .header("X-Forwarded-For", forwarded_for)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn test_spoofed_forwarded_for_shares_one_bucket() {
        let app = limited_app(false);
        assert_eq!(status_from(&app, "10.0.0.1").await, StatusCode::UNAUTHORIZED);
        assert_eq!(status_from(&app, "10.0.0.2").await, StatusCode::UNAUTHORIZED);
        assert_eq!(status_from(&app, "10.0.0.3").await, StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_trusted_forwarded_for_is_keyed_per_client() {
        let app = limited_app(true);
        for ip in ["10.0.0.1", "10.0.0.1", "10.0.0.2"] {
            assert_eq!(status_from(&app, ip).await, StatusCode::UNAUTHORIZED);
        }
        assert_eq!(status_from(&app, "10.0.0.1").await, StatusCode::TOO_MANY_REQUESTS);
    }
}
