//! Request and response models for the REST API.

use crate::db::{
    InstrumentType, LogLevel, OrderType, Position, PositionStatus, Strategy, StrategyStatus,
    StrategyType, SubscriptionDataType, TradeSide, TradeStatus, User, UserRole,
};
use crate::error::FieldError;
use crate::option_chain::FilterCriteria;
use crate::settings::MergeStrategy;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

/// Default page size for list endpoints.
pub const DEFAULT_LIST_LIMIT: usize = 100;

/// Upper bound for list endpoint page sizes.
pub const MAX_LIST_LIMIT: usize = 1_000;

/// Clamps an optional requested limit to `1..=MAX_LIST_LIMIT`.
#[must_use]
pub fn clamp_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT)
}

/// Generic acknowledgement.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    /// What happened.
    pub message: String,
}

impl MessageResponse {
    /// Creates a message response.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

// ============================================================================
// Health and statistics
// ============================================================================

/// Health check response.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// Service status.
    pub status: String,
    /// Service version.
    pub version: String,
    /// Database status: `connected`, `unreachable` or `disabled`.
    pub database: String,
    /// Seconds since startup.
    pub uptime_secs: u64,
    /// Live stream connections.
    pub stream_connections: usize,
}

/// Global statistics response.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StatsResponse {
    /// Registered users.
    pub users: usize,
    /// Registered symbols.
    pub symbols: usize,
    /// Cached option chains.
    pub cached_chains: usize,
    /// Settings version.
    pub settings_version: u64,
    /// Stream statistics.
    pub stream: crate::stream::StreamStats,
}

// ============================================================================
// Accounts
// ============================================================================

/// Registration request.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RegisterRequest {
    /// Login name (3-32 characters, letters, digits or `_`).
    pub username: String,
    /// Email address.
    pub email: String,
    /// Password (at least 8 characters).
    pub password: String,
    /// Phone number.
    #[serde(default)]
    pub phone: Option<String>,
    /// Role, defaults to `trader`.
    #[serde(default)]
    pub role: Option<UserRole>,
}

/// Login request.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LoginRequest {
    /// Login name.
    pub username: String,
    /// Password.
    pub password: String,
}

/// Successful login.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct LoginResponse {
    /// Bearer token for subsequent requests.
    pub token: String,
    /// Token expiry.
    pub expires_at: DateTime<Utc>,
    /// Logged in user.
    pub user: User,
}

/// Newly issued API key. The raw key is only returned once.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiKeyResponse {
    /// Raw API key for the `X-API-Key` header.
    pub api_key: String,
    /// Key expiry.
    pub expires_at: DateTime<Utc>,
}

/// Profile update.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct UpdateProfileRequest {
    /// New email.
    #[serde(default)]
    pub email: Option<String>,
    /// New phone number.
    #[serde(default)]
    pub phone: Option<String>,
    /// New daily loss cap.
    #[serde(default)]
    pub max_daily_loss: Option<Decimal>,
    /// New position size cap.
    #[serde(default)]
    pub max_position_size: Option<Decimal>,
}

// ============================================================================
// Strategies
// ============================================================================

/// Strategy creation request.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateStrategyRequest {
    /// Display name.
    pub name: String,
    /// Description.
    #[serde(default)]
    pub description: Option<String>,
    /// Strategy type.
    pub strategy_type: StrategyType,
    /// Type-specific configuration.
    #[serde(default = "empty_object")]
    #[schema(value_type = Object)]
    pub config: serde_json::Value,
    /// Tunable parameters.
    #[serde(default = "empty_object")]
    #[schema(value_type = Object)]
    pub parameters: serde_json::Value,
    /// Linked n8n workflow.
    #[serde(default)]
    pub n8n_workflow_id: Option<String>,
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

/// Strategy update request. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct UpdateStrategyRequest {
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Description.
    #[serde(default)]
    pub description: Option<String>,
    /// Type-specific configuration.
    #[serde(default)]
    #[schema(value_type = Option<Object>)]
    pub config: Option<serde_json::Value>,
    /// Tunable parameters.
    #[serde(default)]
    #[schema(value_type = Option<Object>)]
    pub parameters: Option<serde_json::Value>,
    /// Linked n8n workflow.
    #[serde(default)]
    pub n8n_workflow_id: Option<String>,
}

/// Status change request.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StrategyStatusRequest {
    /// Target status.
    pub status: StrategyStatus,
}

/// Strategy list filter.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
pub struct StrategyListQuery {
    /// Only strategies in this status.
    #[serde(default)]
    pub status: Option<StrategyStatus>,
}

/// Strategy with derived statistics.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StrategyView {
    /// Stored strategy.
    #[serde(flatten)]
    pub strategy: Strategy,
    /// Winning share of closed trades in percent.
    pub win_rate: f64,
}

/// Daily performance input.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RecordPerformanceRequest {
    /// Trading day.
    pub date: NaiveDate,
    /// P&L of the day.
    pub daily_pnl: Decimal,
    /// Trades of the day.
    #[serde(default)]
    pub daily_trades: i32,
}

// ============================================================================
// Trading
// ============================================================================

/// Order placement request.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PlaceTradeRequest {
    /// Symbol to trade.
    pub symbol: String,
    /// Direction.
    pub side: TradeSide,
    /// Order type, defaults to `market`.
    #[serde(default = "default_order_type")]
    pub order_type: OrderType,
    /// Quantity (positive).
    pub quantity: Decimal,
    /// Price, required for limit and stop orders.
    #[serde(default)]
    pub price: Option<Decimal>,
    /// Originating strategy.
    #[serde(default)]
    pub strategy_id: Option<Uuid>,
}

fn default_order_type() -> OrderType {
    OrderType::Market
}

/// Trade list filter.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
pub struct TradeListQuery {
    /// Only this symbol.
    #[serde(default)]
    pub symbol: Option<String>,
    /// Only this strategy.
    #[serde(default)]
    pub strategy_id: Option<Uuid>,
    /// Only this status.
    #[serde(default)]
    pub status: Option<TradeStatus>,
    /// Maximum rows (default 100).
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Position list filter.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
pub struct PositionListQuery {
    /// Only this status.
    #[serde(default)]
    pub status: Option<PositionStatus>,
}

/// Position marked to the latest tick.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PositionView {
    /// Stored position.
    #[serde(flatten)]
    pub position: Position,
    /// Latest traded price of the symbol.
    pub last_price: Option<Decimal>,
    /// Unrealized P&L at `last_price`.
    pub unrealized_pnl: Decimal,
}

// ============================================================================
// Market data
// ============================================================================

/// Symbol registration request.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateSymbolRequest {
    /// Trading symbol.
    pub symbol: String,
    /// Name.
    pub name: String,
    /// Exchange code.
    #[serde(default = "default_exchange")]
    pub exchange: String,
    /// Instrument type.
    pub instrument_type: InstrumentType,
    /// Lot size.
    #[serde(default = "default_lot_size")]
    pub lot_size: i32,
    /// Minimum price increment.
    #[serde(default = "default_tick_size")]
    pub tick_size: Decimal,
}

fn default_exchange() -> String {
    "NSE".to_string()
}

fn default_lot_size() -> i32 {
    1
}

fn default_tick_size() -> Decimal {
    Decimal::new(5, 2)
}

/// Tick history query.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
pub struct TicksQuery {
    /// Maximum ticks (default 100).
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Subscription creation request.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateSubscriptionRequest {
    /// Symbol.
    pub symbol: String,
    /// Data kind.
    pub data_type: SubscriptionDataType,
}

// ============================================================================
// Risk
// ============================================================================

/// Risk settings update. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct UpdateRiskSettingsRequest {
    /// Maximum absolute quantity per symbol.
    #[serde(default)]
    pub max_position_size: Option<Decimal>,
    /// Maximum notional per order.
    #[serde(default)]
    pub max_order_value: Option<Decimal>,
    /// Maximum realized loss per day.
    #[serde(default)]
    pub max_daily_loss: Option<Decimal>,
    /// Maximum number of open positions.
    #[serde(default)]
    pub max_open_positions: Option<i32>,
    /// Maximum drawdown percentage.
    #[serde(default)]
    pub max_drawdown_pct: Option<Decimal>,
    /// Stop loss percentage.
    #[serde(default)]
    pub stop_loss_pct: Option<Decimal>,
    /// Master switch.
    #[serde(default)]
    pub trading_enabled: Option<bool>,
}

/// Alert list filter.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
pub struct AlertListQuery {
    /// Only acknowledged (true) or pending (false) alerts.
    #[serde(default)]
    pub acknowledged: Option<bool>,
}

// ============================================================================
// Audit
// ============================================================================

/// Audit log query.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
pub struct AuditLogQuery {
    /// Only this user (admins only for other users).
    #[serde(default)]
    pub user_id: Option<Uuid>,
    /// Only this action.
    #[serde(default)]
    pub action: Option<String>,
    /// Maximum rows (default 100).
    #[serde(default)]
    pub limit: Option<usize>,
}

/// System log query.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
pub struct SystemLogQuery {
    /// Only this level.
    #[serde(default)]
    pub level: Option<LogLevel>,
    /// Only this component.
    #[serde(default)]
    pub component: Option<String>,
    /// Maximum rows (default 100).
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Compliance report request.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ComplianceReportRequest {
    /// Reported user, defaults to the caller.
    #[serde(default)]
    pub user_id: Option<Uuid>,
    /// First day (inclusive).
    pub period_start: NaiveDate,
    /// Last day (inclusive).
    pub period_end: NaiveDate,
}

// ============================================================================
// Webhooks
// ============================================================================

/// Trade signal pushed by an n8n workflow.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct N8nSignalRequest {
    /// Symbol to trade.
    pub symbol: String,
    /// Direction.
    pub side: TradeSide,
    /// Quantity.
    pub quantity: Decimal,
    /// Order type, defaults to `market`.
    #[serde(default = "default_order_type")]
    pub order_type: OrderType,
    /// Price for limit and stop orders.
    #[serde(default)]
    pub price: Option<Decimal>,
}

// ============================================================================
// Settings
// ============================================================================

/// Settings update request.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UpdateSettingsRequest {
    /// Values keyed by setting name.
    #[schema(value_type = Object)]
    pub values: serde_json::Map<String, serde_json::Value>,
    /// How the values combine with the current ones.
    #[serde(default)]
    pub merge_strategy: MergeStrategy,
}

/// Settings validation request.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ValidateSettingsRequest {
    /// Values keyed by setting name.
    #[schema(value_type = Object)]
    pub values: serde_json::Map<String, serde_json::Value>,
}

/// Outcome of a settings validation.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ValidationResult {
    /// Whether every value is acceptable.
    pub valid: bool,
    /// Problems found.
    pub errors: Vec<FieldError>,
}

// ============================================================================
// Option chains
// ============================================================================

/// Chain selection in the query string.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
pub struct ChainQuery {
    /// Expiry date, defaults to the nearest weekly expiry.
    #[serde(default)]
    pub expiry: Option<NaiveDate>,
    /// Bypass the cache.
    #[serde(default)]
    pub refresh: bool,
}

/// Chain selection in a request body.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChainRequest {
    /// Underlying symbol.
    pub underlying: String,
    /// Expiry date, defaults to the nearest weekly expiry.
    #[serde(default)]
    pub expiry: Option<NaiveDate>,
    /// Bypass the cache.
    #[serde(default)]
    pub refresh: bool,
}

/// Filter request body.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChainFilterRequest {
    /// Underlying symbol.
    pub underlying: String,
    /// Expiry date, defaults to the nearest weekly expiry.
    #[serde(default)]
    pub expiry: Option<NaiveDate>,
    /// Filter criteria.
    #[serde(default)]
    pub criteria: FilterCriteria,
}

/// Open interest analysis query.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
pub struct OiAnalysisQuery {
    /// Expiry date, defaults to the nearest weekly expiry.
    #[serde(default)]
    pub expiry: Option<NaiveDate>,
    /// Strikes listed per side (default 5).
    #[serde(default)]
    pub top_n: Option<usize>,
}

// ============================================================================
// OHLC (Candlestick) Data Types
// ============================================================================

/// OHLC bar interval for candlestick data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum OhlcInterval {
    /// 1 minute bars.
    #[serde(rename = "1m")]
    OneMinute,
    /// 5 minute bars.
    #[serde(rename = "5m")]
    FiveMinutes,
    /// 15 minute bars.
    #[serde(rename = "15m")]
    FifteenMinutes,
    /// 1 hour bars.
    #[serde(rename = "1h")]
    OneHour,
    /// 4 hour bars.
    #[serde(rename = "4h")]
    FourHours,
    /// 1 day bars.
    #[serde(rename = "1d")]
    OneDay,
}

impl OhlcInterval {
    /// Every supported interval, shortest first.
    pub const ALL: &'static [OhlcInterval] = &[
        Self::OneMinute,
        Self::FiveMinutes,
        Self::FifteenMinutes,
        Self::OneHour,
        Self::FourHours,
        Self::OneDay,
    ];

    /// Returns the interval duration in seconds.
    #[must_use]
    pub fn seconds(&self) -> u64 {
        match self {
            Self::OneMinute => 60,
            Self::FiveMinutes => 300,
            Self::FifteenMinutes => 900,
            Self::OneHour => 3600,
            Self::FourHours => 14400,
            Self::OneDay => 86400,
        }
    }

    /// Floors a timestamp to the start of the interval.
    #[must_use]
    pub fn floor_timestamp(&self, timestamp_secs: u64) -> u64 {
        let interval = self.seconds();
        (timestamp_secs / interval) * interval
    }
}

impl std::fmt::Display for OhlcInterval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OneMinute => write!(f, "1m"),
            Self::FiveMinutes => write!(f, "5m"),
            Self::FifteenMinutes => write!(f, "15m"),
            Self::OneHour => write!(f, "1h"),
            Self::FourHours => write!(f, "4h"),
            Self::OneDay => write!(f, "1d"),
        }
    }
}

impl std::str::FromStr for OhlcInterval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "1m" => Ok(Self::OneMinute),
            "5m" => Ok(Self::FiveMinutes),
            "15m" => Ok(Self::FifteenMinutes),
            "1h" => Ok(Self::OneHour),
            "4h" => Ok(Self::FourHours),
            "1d" => Ok(Self::OneDay),
            _ => Err(format!(
                "Invalid interval: {}. Use 1m, 5m, 15m, 1h, 4h, or 1d",
                s
            )),
        }
    }
}

/// A single OHLC bar (candlestick).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct OhlcBar {
    /// Bar start timestamp in seconds since epoch.
    pub timestamp: u64,
    /// Opening price.
    pub open: f64,
    /// Highest price.
    pub high: f64,
    /// Lowest price.
    pub low: f64,
    /// Closing price.
    pub close: f64,
    /// Volume in this bar.
    pub volume: u64,
    /// Ticks folded into this bar.
    pub tick_count: u64,
}

impl OhlcBar {
    /// Creates a new bar from a single tick.
    #[must_use]
    pub fn new(timestamp: u64, price: f64, volume: u64) -> Self {
        Self {
            timestamp,
            open: price,
            high: price,
            low: price,
            close: price,
            volume,
            tick_count: 1,
        }
    }

    /// Folds a tick into the bar.
    pub fn update(&mut self, price: f64, volume: u64) {
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.close = price;
        self.volume += volume;
        self.tick_count += 1;
    }
}

/// Query parameters for the OHLC endpoint.
#[derive(Debug, Deserialize, IntoParams)]
pub struct OhlcQuery {
    /// Bar interval (1m, 5m, 15m, 1h, 4h, 1d). Defaults to 1m.
    #[serde(default)]
    pub interval: Option<String>,
    /// Start timestamp in seconds (optional).
    #[serde(default)]
    pub from: Option<u64>,
    /// End timestamp in seconds (optional).
    #[serde(default)]
    pub to: Option<u64>,
    /// Maximum number of bars to return (default 500).
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Response for the OHLC endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OhlcResponse {
    /// Symbol.
    pub symbol: String,
    /// Bar interval.
    pub interval: String,
    /// Bars, oldest first.
    pub bars: Vec<OhlcBar>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ohlc_interval_parse_and_display() {
        for interval in OhlcInterval::ALL {
            let parsed: OhlcInterval = interval.to_string().parse().unwrap();
            assert_eq!(parsed, *interval);
        }
        assert!("2m".parse::<OhlcInterval>().is_err());
        assert_eq!(
            serde_json::to_string(&OhlcInterval::FifteenMinutes).unwrap(),
            "\"15m\""
        );
    }

    #[test]
    fn test_floor_timestamp() {
        assert_eq!(OhlcInterval::FiveMinutes.floor_timestamp(1_000), 900);
        assert_eq!(OhlcInterval::OneDay.floor_timestamp(86_399), 0);
    }

    #[test]
    fn test_clamp_limit() {
        assert_eq!(clamp_limit(None), DEFAULT_LIST_LIMIT);
        assert_eq!(clamp_limit(Some(0)), 1);
        assert_eq!(clamp_limit(Some(5_000)), MAX_LIST_LIMIT);
    }

    #[test]
    fn test_place_trade_defaults_to_market() {
        let request: PlaceTradeRequest = serde_json::from_value(serde_json::json!({
            "symbol": "NIFTY",
            "side": "buy",
            "quantity": "2"
        }))
        .unwrap();
        assert_eq!(request.order_type, OrderType::Market);
        assert!(request.price.is_none());
    }

    #[test]
    fn test_create_strategy_defaults_to_empty_config() {
        let request: CreateStrategyRequest = serde_json::from_value(serde_json::json!({
            "name": "Test",
            "strategy_type": "custom"
        }))
        .unwrap();
        assert!(request.config.as_object().unwrap().is_empty());
    }
}
