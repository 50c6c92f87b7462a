//! Database schema types.
//!
//! Enumerations are stored as lowercase snake_case `TEXT` columns and decoded
//! through `TryFrom<String>`.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

/// Declares a text-backed enum with serde, OpenAPI, `Display`, `FromStr`
/// and `TryFrom<String>` implementations sharing one spelling table.
macro_rules! text_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $(
                $(#[$vmeta:meta])*
                $variant:ident => $text:literal,
            )+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $(
                $(#[$vmeta])*
                $variant,
            )+
        }

        impl $name {
            /// All variants in declaration order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// Returns the stored text form.
            #[must_use]
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, String> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(format!(
                        "invalid {}: '{}'",
                        stringify!($name),
                        other
                    )),
                }
            }
        }

        impl TryFrom<String> for $name {
            type Error = String;

            fn try_from(value: String) -> Result<Self, String> {
                value.parse()
            }
        }
    };
}

text_enum! {
    /// User role.
    pub enum UserRole {
        /// Full access, including other users' records.
        Admin => "admin",
        /// Can trade and manage own strategies.
        Trader => "trader",
        /// Read-only access.
        Viewer => "viewer",
    }
}

text_enum! {
    /// Strategy type, selects the config rule set.
    pub enum StrategyType {
        /// Fast/slow moving average crossover.
        MovingAverageCrossover => "moving_average_crossover",
        /// Relative strength index thresholds.
        Rsi => "rsi",
        /// Range breakout.
        Breakout => "breakout",
        /// Long or short straddle.
        Straddle => "straddle",
        /// Four-leg iron condor.
        IronCondor => "iron_condor",
        /// Free-form strategy driven by an external workflow.
        Custom => "custom",
    }
}

text_enum! {
    /// Strategy lifecycle status.
    pub enum StrategyStatus {
        /// Created, never activated.
        Draft => "draft",
        /// Running.
        Active => "active",
        /// Temporarily halted.
        Paused => "paused",
        /// Halted until reactivated.
        Stopped => "stopped",
        /// Soft-deleted. Terminal.
        Archived => "archived",
    }
}

text_enum! {
    /// Order type.
    pub enum OrderType {
        /// Fill at the current market price.
        Market => "market",
        /// Fill at the given price.
        Limit => "limit",
        /// Stop loss triggering a market order.
        StopLoss => "stop_loss",
        /// Stop loss triggering a limit order.
        StopLossLimit => "stop_loss_limit",
    }
}

text_enum! {
    /// Trade direction.
    pub enum TradeSide {
        /// Buy.
        Buy => "buy",
        /// Sell.
        Sell => "sell",
    }
}

text_enum! {
    /// Trade status.
    pub enum TradeStatus {
        /// Accepted, not yet filled.
        Pending => "pending",
        /// Fully filled.
        Filled => "filled",
        /// Partially filled.
        PartiallyFilled => "partially_filled",
        /// Cancelled before fill.
        Cancelled => "cancelled",
        /// Rejected by risk checks.
        Rejected => "rejected",
    }
}

text_enum! {
    /// Position status.
    pub enum PositionStatus {
        /// Non-zero quantity.
        Open => "open",
        /// Flat.
        Closed => "closed",
    }
}

text_enum! {
    /// Instrument type of a symbol.
    pub enum InstrumentType {
        /// Cash equity.
        Equity => "equity",
        /// Index.
        Index => "index",
        /// Futures contract.
        Future => "future",
        /// Options contract.
        Option => "option",
    }
}

text_enum! {
    /// Market data subscription kind.
    pub enum SubscriptionDataType {
        /// Live ticks.
        Ticks => "ticks",
        /// Quote snapshots.
        Quotes => "quotes",
        /// OHLC bars.
        Ohlc => "ohlc",
        /// Option chain summaries.
        OptionChain => "option_chain",
    }
}

text_enum! {
    /// Risk alert severity.
    pub enum AlertSeverity {
        /// Informational.
        Info => "info",
        /// Needs attention.
        Warning => "warning",
        /// Limit breached.
        Critical => "critical",
    }
}

text_enum! {
    /// System log level.
    pub enum LogLevel {
        /// Debug.
        Debug => "debug",
        /// Info.
        Info => "info",
        /// Warning.
        Warn => "warn",
        /// Error.
        Error => "error",
    }
}

text_enum! {
    /// Compliance report status.
    pub enum ReportStatus {
        /// Generated, not yet filed.
        Generated => "generated",
        /// Filed with the regulator.
        Submitted => "submitted",
    }
}

/// User account.
#[derive(Debug, Clone, Serialize, FromRow, ToSchema)]
pub struct User {
    /// Unique identifier.
    pub id: Uuid,
    /// Login name.
    pub username: String,
    /// Email address.
    pub email: String,
    /// Salted password digest (`salt$hash`).
    #[serde(skip_serializing)]
    pub hashed_password: String,
    /// Phone number.
    pub phone: Option<String>,
    /// Role.
    #[sqlx(try_from = "String")]
    pub role: UserRole,
    /// Whether the account is enabled.
    pub is_active: bool,
    /// Consecutive failed logins.
    pub failed_login_attempts: i32,
    /// Lock expiry.
    pub locked_until: Option<DateTime<Utc>>,
    /// Last successful login.
    pub last_login_at: Option<DateTime<Utc>>,
    /// SHA-256 of the active session token.
    #[serde(skip_serializing)]
    pub session_token_hash: Option<String>,
    /// Session expiry.
    pub session_expires_at: Option<DateTime<Utc>>,
    /// SHA-256 of the active API key.
    #[serde(skip_serializing)]
    pub api_key_hash: Option<String>,
    /// API key expiry.
    pub api_key_expires_at: Option<DateTime<Utc>>,
    /// Per-user daily loss cap.
    pub max_daily_loss: Decimal,
    /// Per-user position size cap.
    pub max_position_size: Decimal,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Trading strategy.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Strategy {
    /// Unique identifier.
    pub id: Uuid,
    /// Owner.
    pub user_id: Uuid,
    /// Display name.
    pub name: String,
    /// Free text description.
    pub description: Option<String>,
    /// Strategy type.
    #[sqlx(try_from = "String")]
    pub strategy_type: StrategyType,
    /// Type-specific configuration.
    #[schema(value_type = Object)]
    pub config: serde_json::Value,
    /// Tunable parameters.
    #[schema(value_type = Object)]
    pub parameters: serde_json::Value,
    /// Lifecycle status.
    #[sqlx(try_from = "String")]
    pub status: StrategyStatus,
    /// Filled trades attributed to the strategy.
    pub total_trades: i64,
    /// Trades closed with profit.
    pub winning_trades: i64,
    /// Trades closed with loss.
    pub losing_trades: i64,
    /// Realized P&L.
    pub total_pnl: Decimal,
    /// Linked n8n workflow.
    pub n8n_workflow_id: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Daily strategy performance record.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct StrategyPerformance {
    /// Unique identifier.
    pub id: Uuid,
    /// Strategy.
    pub strategy_id: Uuid,
    /// Trading day.
    pub date: NaiveDate,
    /// P&L of the day.
    pub daily_pnl: Decimal,
    /// P&L since inception.
    pub cumulative_pnl: Decimal,
    /// Trades of the day.
    pub daily_trades: i32,
    /// Trades since inception.
    pub cumulative_trades: i64,
    /// Largest peak-to-trough fall of the equity curve.
    pub max_drawdown: Decimal,
    /// Annualized Sharpe ratio of daily P&L.
    pub sharpe_ratio: Option<f64>,
    /// Cumulative P&L by day.
    #[schema(value_type = Object)]
    pub equity_curve: serde_json::Value,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Trade record.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Trade {
    /// Unique identifier.
    pub id: Uuid,
    /// Owner.
    pub user_id: Uuid,
    /// Originating strategy.
    pub strategy_id: Option<Uuid>,
    /// Traded symbol.
    pub symbol: String,
    /// Direction.
    #[sqlx(try_from = "String")]
    pub side: TradeSide,
    /// Order type.
    #[sqlx(try_from = "String")]
    pub order_type: OrderType,
    /// Status.
    #[sqlx(try_from = "String")]
    pub status: TradeStatus,
    /// Quantity.
    pub quantity: Decimal,
    /// Requested price for limit/stop orders.
    pub price: Option<Decimal>,
    /// Execution price.
    pub fill_price: Option<Decimal>,
    /// P&L realized by this fill.
    pub realized_pnl: Option<Decimal>,
    /// Why the trade was rejected.
    pub rejection_reason: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Fill timestamp.
    pub filled_at: Option<DateTime<Utc>>,
}

/// Net position per user and symbol.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Position {
    /// Unique identifier.
    pub id: Uuid,
    /// Owner.
    pub user_id: Uuid,
    /// Strategy that opened the position.
    pub strategy_id: Option<Uuid>,
    /// Symbol.
    pub symbol: String,
    /// Signed quantity (negative = short).
    pub quantity: Decimal,
    /// Average entry price.
    pub average_price: Decimal,
    /// Realized P&L.
    pub realized_pnl: Decimal,
    /// Status.
    #[sqlx(try_from = "String")]
    pub status: PositionStatus,
    /// Open timestamp.
    pub opened_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
    /// Close timestamp.
    pub closed_at: Option<DateTime<Utc>>,
}

/// Tradable symbol reference data.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Symbol {
    /// Unique identifier.
    pub id: Uuid,
    /// Trading symbol.
    pub symbol: String,
    /// Name.
    pub name: String,
    /// Exchange code.
    pub exchange: String,
    /// Instrument type.
    #[sqlx(try_from = "String")]
    pub instrument_type: InstrumentType,
    /// Lot size.
    pub lot_size: i32,
    /// Minimum price increment.
    pub tick_size: Decimal,
    /// Whether the symbol is tradable.
    pub is_active: bool,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// A single market tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TickData {
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

/// Latest quote snapshot for a symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct QuoteData {
    /// Symbol.
    pub symbol: String,
    /// Last traded price.
    pub ltp: f64,
    /// Best bid.
    pub bid: f64,
    /// Best ask.
    pub ask: f64,
    /// Session open.
    pub open: f64,
    /// Session high.
    pub high: f64,
    /// Session low.
    pub low: f64,
    /// Session volume.
    pub volume: u64,
    /// Timestamp in milliseconds.
    pub timestamp_ms: u64,
}

impl QuoteData {
    /// Starts a quote from the first tick of a session.
    #[must_use]
    pub fn from_tick(tick: &TickData) -> Self {
        Self {
            symbol: tick.symbol.clone(),
            ltp: tick.ltp,
            bid: tick.bid,
            ask: tick.ask,
            open: tick.ltp,
            high: tick.ltp,
            low: tick.ltp,
            volume: tick.volume,
            timestamp_ms: tick.timestamp_ms,
        }
    }

    /// Folds a new tick into the quote.
    pub fn apply(&mut self, tick: &TickData) {
        self.ltp = tick.ltp;
        self.bid = tick.bid;
        self.ask = tick.ask;
        self.high = self.high.max(tick.ltp);
        self.low = self.low.min(tick.ltp);
        self.volume += tick.volume;
        self.timestamp_ms = tick.timestamp_ms;
    }
}

/// Market data subscription.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct MarketDataSubscription {
    /// Unique identifier.
    pub id: Uuid,
    /// Subscriber.
    pub user_id: Uuid,
    /// Symbol.
    pub symbol: String,
    /// Data kind.
    #[sqlx(try_from = "String")]
    pub data_type: SubscriptionDataType,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Per-user risk configuration.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct RiskSettings {
    /// Owner.
    pub user_id: Uuid,
    /// Maximum absolute quantity per symbol.
    pub max_position_size: Decimal,
    /// Maximum notional per order.
    pub max_order_value: Decimal,
    /// Maximum realized loss per day.
    pub max_daily_loss: Decimal,
    /// Maximum number of open positions.
    pub max_open_positions: i32,
    /// Maximum drawdown percentage.
    pub max_drawdown_pct: Decimal,
    /// Stop loss percentage.
    pub stop_loss_pct: Decimal,
    /// Master switch for the user.
    pub trading_enabled: bool,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Risk alert raised for a user.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct RiskAlert {
    /// Unique identifier.
    pub id: Uuid,
    /// Affected user.
    pub user_id: Uuid,
    /// Alert kind (e.g. "order_rejected").
    pub alert_type: String,
    /// Severity.
    #[sqlx(try_from = "String")]
    pub severity: AlertSeverity,
    /// Human-readable message.
    pub message: String,
    /// Whether the user acknowledged it.
    pub acknowledged: bool,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Acknowledgement timestamp.
    pub acknowledged_at: Option<DateTime<Utc>>,
}

/// Audit trail entry.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct AuditLog {
    /// Unique identifier.
    pub id: Uuid,
    /// Acting user, if any.
    pub user_id: Option<Uuid>,
    /// Action name (e.g. "login_failed").
    pub action: String,
    /// Resource kind.
    pub resource_type: String,
    /// Resource identifier.
    pub resource_id: Option<String>,
    /// Additional details.
    #[schema(value_type = Object)]
    pub details: serde_json::Value,
    /// Client address.
    pub ip_address: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Service event record.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct SystemLog {
    /// Unique identifier.
    pub id: Uuid,
    /// Level.
    #[sqlx(try_from = "String")]
    pub level: LogLevel,
    /// Emitting component.
    pub component: String,
    /// Message.
    pub message: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Compliance summary for a user and period.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct ComplianceReport {
    /// Unique identifier.
    pub id: Uuid,
    /// Reported user.
    pub user_id: Uuid,
    /// First day (inclusive).
    pub period_start: NaiveDate,
    /// Last day (inclusive).
    pub period_end: NaiveDate,
    /// All trades in the period.
    pub total_trades: i64,
    /// Filled trades.
    pub filled_trades: i64,
    /// Rejected trades.
    pub rejected_trades: i64,
    /// Notional of filled trades.
    pub traded_value: Decimal,
    /// Risk alerts raised in the period.
    pub risk_alerts: i64,
    /// Status.
    #[sqlx(try_from = "String")]
    pub status: ReportStatus,
    /// Generation timestamp.
    pub generated_at: DateTime<Utc>,
}
