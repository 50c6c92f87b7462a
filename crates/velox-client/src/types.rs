//! Request and response types for the Velox API.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[cfg(test)]
mod tests;

/// Order direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeSide {
    /// Buy.
    Buy,
    /// Sell.
    Sell,
}

impl std::fmt::Display for TradeSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
        }
    }
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    /// Fill at the latest price.
    #[default]
    Market,
    /// Fill at the given price.
    Limit,
    /// Stop loss.
    StopLoss,
    /// Stop loss with a limit price.
    StopLossLimit,
}

/// Trade status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeStatus {
    /// Accepted, not yet filled.
    Pending,
    /// Filled.
    Filled,
    /// Partially filled.
    PartiallyFilled,
    /// Cancelled.
    Cancelled,
    /// Rejected.
    Rejected,
}

/// Strategy lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyStatus {
    /// Being edited.
    Draft,
    /// Accepting signals.
    Active,
    /// Temporarily halted.
    Paused,
    /// Halted.
    Stopped,
    /// Retired.
    Archived,
}

impl std::fmt::Display for StrategyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
            Self::Archived => "archived",
        };
        f.write_str(text)
    }
}

/// Strategy type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyType {
    /// Moving average crossover.
    MovingAverageCrossover,
    /// RSI.
    Rsi,
    /// Breakout.
    Breakout,
    /// Straddle.
    Straddle,
    /// Iron condor.
    IronCondor,
    /// Anything else.
    Custom,
}

/// User role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    /// Administrator.
    Admin,
    /// Trader.
    Trader,
    /// Read-only.
    Viewer,
}

// ============================================================================
// Health & Stats
// ============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
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

/// Stream hub counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamStats {
    /// Open connections.
    pub active_connections: usize,
    /// Connection limit.
    pub max_connections: usize,
    /// Connections accepted since startup.
    pub total_connections: u64,
    /// Upgrades refused at the limit.
    pub rejected_connections: u64,
    /// Events published.
    pub events_published: u64,
    /// Messages delivered to clients.
    pub messages_sent: u64,
    /// Events skipped by lagging connections.
    pub messages_dropped: u64,
}

/// An open stream connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConnection {
    /// Connection identifier.
    pub id: Uuid,
    /// Route used: `stream` or `ticks`.
    pub kind: String,
    /// Remote address.
    pub peer: Option<String>,
    /// Authenticated user.
    pub user_id: Option<Uuid>,
    /// Connection time.
    pub connected_at: DateTime<Utc>,
    /// Messages delivered.
    pub messages_sent: u64,
}

/// Platform statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
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
    pub stream: StreamStats,
}

/// Generic acknowledgement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    /// What happened.
    pub message: String,
}

/// Error body returned by the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Error message.
    pub error: String,
    /// Error code.
    pub code: String,
}

// ============================================================================
// Accounts
// ============================================================================

/// Registration request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    /// Login name.
    pub username: String,
    /// Email address.
    pub email: String,
    /// Password.
    pub password: String,
    /// Phone number.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    /// Role, defaults to `trader` on the server.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<UserRole>,
}

/// Login request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    /// Login name.
    pub username: String,
    /// Password.
    pub password: String,
}

/// User profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Unique identifier.
    pub id: Uuid,
    /// Login name.
    pub username: String,
    /// Email address.
    pub email: String,
    /// Phone number.
    pub phone: Option<String>,
    /// Role.
    pub role: UserRole,
    /// Whether the account is enabled.
    pub is_active: bool,
    /// Consecutive failed logins.
    pub failed_login_attempts: i32,
    /// Lock expiry.
    pub locked_until: Option<DateTime<Utc>>,
    /// Last successful login.
    pub last_login_at: Option<DateTime<Utc>>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Successful login.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    /// Bearer token.
    pub token: String,
    /// Token expiry.
    pub expires_at: DateTime<Utc>,
    /// Logged in user.
    pub user: User,
}

/// Newly issued API key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyResponse {
    /// Raw API key.
    pub api_key: String,
    /// Key expiry.
    pub expires_at: DateTime<Utc>,
}

// ============================================================================
// Strategies
// ============================================================================

/// Strategy creation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateStrategyRequest {
    /// Display name.
    pub name: String,
    /// Description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Strategy type.
    pub strategy_type: StrategyType,
    /// Type-specific configuration.
    pub config: serde_json::Value,
    /// Tunable parameters.
    pub parameters: serde_json::Value,
    /// Linked n8n workflow.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n8n_workflow_id: Option<String>,
}

impl CreateStrategyRequest {
    /// A strategy with empty configuration.
    #[must_use]
    pub fn new(name: &str, strategy_type: StrategyType) -> Self {
        Self {
            name: name.to_string(),
            description: None,
            strategy_type,
            config: serde_json::json!({}),
            parameters: serde_json::json!({}),
            n8n_workflow_id: None,
        }
    }
}

/// Strategy with its win rate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Strategy {
    /// Unique identifier.
    pub id: Uuid,
    /// Owner.
    pub user_id: Uuid,
    /// Display name.
    pub name: String,
    /// Description.
    pub description: Option<String>,
    /// Strategy type.
    pub strategy_type: StrategyType,
    /// Lifecycle status.
    pub status: StrategyStatus,
    /// Filled trades.
    pub total_trades: i64,
    /// Profitable closes.
    pub winning_trades: i64,
    /// Losing closes.
    pub losing_trades: i64,
    /// Realized P&L.
    pub total_pnl: Decimal,
    /// Winning share of closed trades in percent.
    #[serde(default)]
    pub win_rate: f64,
    /// Linked n8n workflow.
    pub n8n_workflow_id: Option<String>,
}

// ============================================================================
// Trading
// ============================================================================

/// Order placement request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceTradeRequest {
    /// Symbol to trade.
    pub symbol: String,
    /// Direction.
    pub side: TradeSide,
    /// Order type.
    pub order_type: OrderType,
    /// Quantity.
    pub quantity: Decimal,
    /// Price for limit and stop orders.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<Decimal>,
    /// Originating strategy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy_id: Option<Uuid>,
}

impl PlaceTradeRequest {
    /// A market order.
    #[must_use]
    pub fn market(symbol: &str, side: TradeSide, quantity: Decimal) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Market,
            quantity,
            price: None,
            strategy_id: None,
        }
    }
}

/// Trade signal sent by an n8n workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalRequest {
    /// Symbol to trade.
    pub symbol: String,
    /// Direction.
    pub side: TradeSide,
    /// Quantity.
    pub quantity: Decimal,
    /// Order type.
    pub order_type: OrderType,
    /// Price for limit and stop orders.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<Decimal>,
}

/// Trade record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    /// Unique identifier.
    pub id: Uuid,
    /// Owner.
    pub user_id: Uuid,
    /// Originating strategy.
    pub strategy_id: Option<Uuid>,
    /// Symbol.
    pub symbol: String,
    /// Direction.
    pub side: TradeSide,
    /// Order type.
    pub order_type: OrderType,
    /// Status.
    pub status: TradeStatus,
    /// Quantity.
    pub quantity: Decimal,
    /// Requested price.
    pub price: Option<Decimal>,
    /// Execution price.
    pub fill_price: Option<Decimal>,
    /// P&L realized by this fill.
    pub realized_pnl: Option<Decimal>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Trade list filter.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TradeFilter {
    /// Only this symbol.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    /// Only this strategy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy_id: Option<Uuid>,
    /// Maximum rows.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

/// Position marked to the latest price.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    /// Unique identifier.
    pub id: Uuid,
    /// Symbol.
    pub symbol: String,
    /// Signed quantity (negative = short).
    pub quantity: Decimal,
    /// Average entry price.
    pub average_price: Decimal,
    /// Realized P&L.
    pub realized_pnl: Decimal,
    /// `open` or `closed`.
    pub status: String,
    /// Latest traded price.
    pub last_price: Option<Decimal>,
    /// Unrealized P&L at `last_price`.
    pub unrealized_pnl: Decimal,
}

// ============================================================================
// Market Data
// ============================================================================

/// Latest quote of a symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    /// Symbol.
    pub symbol: String,
    /// Last traded price.
    pub ltp: f64,
    /// Best bid.
    pub bid: f64,
    /// Best ask.
    pub ask: f64,
}

/// A market tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    /// Symbol.
    pub symbol: String,
    /// Last traded price.
    pub ltp: f64,
    /// Best bid.
    pub bid: f64,
    /// Best ask.
    pub ask: f64,
    /// Volume of this tick.
    pub volume: u64,
    /// Change from session open.
    pub change: f64,
    /// Percent change from session open.
    pub change_pct: f64,
    /// Timestamp in milliseconds.
    pub timestamp_ms: u64,
}

// ============================================================================
// Risk
// ============================================================================

/// Per-user risk limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskSettings {
    /// Maximum absolute quantity per symbol.
    pub max_position_size: Decimal,
    /// Maximum notional per order.
    pub max_order_value: Decimal,
    /// Maximum realized loss per day.
    pub max_daily_loss: Decimal,
    /// Maximum number of open positions.
    pub max_open_positions: i32,
    /// Master switch for the user.
    pub trading_enabled: bool,
}

/// Partial risk limit update.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UpdateRiskSettings {
    /// Maximum absolute quantity per symbol.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_position_size: Option<Decimal>,
    /// Maximum notional per order.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_order_value: Option<Decimal>,
    /// Maximum realized loss per day.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_daily_loss: Option<Decimal>,
    /// Maximum number of open positions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_open_positions: Option<i32>,
    /// Master switch for the user.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trading_enabled: Option<bool>,
}

// ============================================================================
// Option Chain
// ============================================================================

/// One side of a strike.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionLeg {
    /// Last traded price.
    pub ltp: f64,
    /// Outstanding contracts.
    #[serde(default)]
    pub open_interest: u64,
    /// Change of open interest.
    #[serde(default)]
    pub oi_change: i64,
    /// Traded contracts.
    #[serde(default)]
    pub volume: u64,
    /// Implied volatility.
    #[serde(default)]
    pub iv: Option<f64>,
}

/// A strike with its legs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrikeRow {
    /// Strike price.
    pub strike: f64,
    /// Call leg.
    #[serde(default)]
    pub call: Option<OptionLeg>,
    /// Put leg.
    #[serde(default)]
    pub put: Option<OptionLeg>,
}

/// Option chain of one expiry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionChain {
    /// Underlying symbol.
    pub underlying: String,
    /// Expiry date.
    pub expiry: NaiveDate,
    /// Spot price.
    pub spot_price: f64,
    /// Contract lot size.
    pub lot_size: u32,
    /// Strikes, ascending.
    pub strikes: Vec<StrikeRow>,
    /// `synthetic` or `ingested`.
    pub source: String,
}

/// Put-call ratio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PcrResult {
    /// Underlying symbol.
    pub underlying: String,
    /// Put/call open interest ratio.
    pub pcr_oi: Option<f64>,
    /// Put/call volume ratio.
    pub pcr_volume: Option<f64>,
    /// Total call open interest.
    pub total_call_oi: u64,
    /// Total put open interest.
    pub total_put_oi: u64,
    /// `bullish`, `bearish` or `neutral`.
    pub sentiment: String,
}

/// Max pain result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaxPainResult {
    /// Underlying symbol.
    pub underlying: String,
    /// Spot price.
    pub spot_price: f64,
    /// Strike with the lowest total writer payout.
    pub max_pain_strike: f64,
    /// Distance of spot from the max pain strike.
    pub distance_from_spot: f64,
}

/// Chain summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainAnalysis {
    /// Underlying symbol.
    pub underlying: String,
    /// Expiry date.
    pub expiry: NaiveDate,
    /// Spot price.
    pub spot_price: f64,
    /// At-the-money strike.
    pub atm_strike: Option<f64>,
    /// Max pain strike.
    pub max_pain_strike: Option<f64>,
    /// Highest put open interest strike.
    pub support: Option<f64>,
    /// Highest call open interest strike.
    pub resistance: Option<f64>,
}

/// Chain request parameters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ChainParams {
    /// Expiry date; nearest weekly expiry when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiry: Option<NaiveDate>,
    /// Bypass the cache.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub refresh: bool,
}
