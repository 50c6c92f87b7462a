//! Configuration loading: TOML file first, environment overrides second.

use crate::db::schema::InstrumentType;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Configuration error types.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    /// Failed to parse TOML configuration.
    #[error("failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),
    /// Invalid configuration value.
    #[error("invalid config value: {0}")]
    InvalidValue(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP server configuration.
    pub server: ServerConfig,
    /// Database configuration.
    pub database: DatabaseConfig,
    /// Session and API key lifetimes.
    pub auth: AuthConfig,
    /// Live streaming configuration.
    pub stream: StreamConfig,
    /// Option chain defaults.
    pub option_chain: OptionChainConfig,
    /// Market feed configuration.
    pub market: MarketConfig,
    /// Default risk limits for new users.
    pub risk: RiskDefaults,
    /// External integrations.
    pub integrations: IntegrationsConfig,
    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host address to bind to.
    pub host: String,
    /// Port number to listen on.
    pub port: u16,
    /// Allowed CORS origins. `["*"]` allows any origin.
    pub cors_origins: Vec<String>,
    /// Accepted `Host` header values. Empty accepts any host.
    pub allowed_hosts: Vec<String>,
    /// Requests per minute for anonymous clients.
    pub rate_limit_per_minute: u32,
    /// Take the client address from `X-Forwarded-For`/`X-Real-IP`.
    /// Enable only behind a proxy that sets these headers.
    pub trust_proxy_headers: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_origins: vec!["*".to_string()],
            allowed_hosts: Vec::new(),
            rate_limit_per_minute: 300,
            trust_proxy_headers: false,
        }
    }
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// PostgreSQL connection string. When absent the service runs in memory.
    pub url: Option<String>,
    /// Maximum pool size.
    pub max_connections: u32,
    /// Pool acquire timeout in seconds.
    pub acquire_timeout_secs: u64,
    /// Whether to run migrations at startup.
    pub run_migrations: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
            acquire_timeout_secs: 5,
            run_migrations: true,
        }
    }
}

/// Session and API key lifetimes.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Session token lifetime in seconds.
    pub session_ttl_secs: i64,
    /// API key lifetime in days.
    pub api_key_ttl_days: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_ttl_secs: 86_400,
            api_key_ttl_days: 90,
        }
    }
}

/// Live streaming configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Whether the simulated market feed runs.
    pub feed_enabled: bool,
    /// Tick interval in milliseconds.
    pub tick_interval_ms: u64,
    /// Heartbeat interval in seconds.
    pub heartbeat_secs: u64,
    /// Broadcast channel capacity.
    pub channel_capacity: usize,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Ticks retained per symbol.
    pub tick_history: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            feed_enabled: true,
            tick_interval_ms: 1000,
            heartbeat_secs: 30,
            channel_capacity: 4096,
            max_connections: 1000,
            tick_history: 1000,
        }
    }
}

/// Option chain defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OptionChainConfig {
    /// Strikes generated on each side of ATM.
    pub strikes_per_side: usize,
    /// Chain cache lifetime in seconds.
    pub cache_ttl_secs: u64,
    /// Annualized risk-free rate.
    pub risk_free_rate: f64,
    /// Fallback implied volatility.
    pub default_iv: f64,
    /// Interval between chain summary broadcasts in seconds.
    pub broadcast_interval_secs: u64,
}

impl Default for OptionChainConfig {
    fn default() -> Self {
        Self {
            strikes_per_side: 10,
            cache_ttl_secs: 15,
            risk_free_rate: 0.065,
            default_iv: 0.15,
            broadcast_interval_secs: 5,
        }
    }
}

/// Market feed configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    /// Exchange timezone.
    pub timezone: String,
    /// Symbols fed by the simulator.
    pub symbols: Vec<SymbolConfig>,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            timezone: "Asia/Kolkata".to_string(),
            symbols: vec![
                SymbolConfig {
                    symbol: "NIFTY".to_string(),
                    name: "Nifty 50".to_string(),
                    exchange: "NSE".to_string(),
                    instrument_type: InstrumentType::Index,
                    initial_price: 22_500.0,
                    volatility: 0.14,
                    drift: 0.08,
                    lot_size: 75,
                    tick_size: 0.05,
                    strike_step: Some(50.0),
                    walk_type: WalkTypeConfig::GeometricBrownian,
                },
                SymbolConfig {
                    symbol: "BANKNIFTY".to_string(),
                    name: "Nifty Bank".to_string(),
                    exchange: "NSE".to_string(),
                    instrument_type: InstrumentType::Index,
                    initial_price: 48_000.0,
                    volatility: 0.18,
                    drift: 0.08,
                    lot_size: 30,
                    tick_size: 0.05,
                    strike_step: Some(100.0),
                    walk_type: WalkTypeConfig::JumpDiffusion,
                },
                SymbolConfig {
                    symbol: "RELIANCE".to_string(),
                    name: "Reliance Industries".to_string(),
                    exchange: "NSE".to_string(),
                    instrument_type: InstrumentType::Equity,
                    initial_price: 2_900.0,
                    volatility: 0.22,
                    drift: 0.1,
                    lot_size: 1,
                    tick_size: 0.05,
                    strike_step: None,
                    walk_type: WalkTypeConfig::MeanReverting,
                },
            ],
        }
    }
}

/// A symbol fed by the market simulator.
#[derive(Debug, Clone, Deserialize)]
pub struct SymbolConfig {
    /// Trading symbol (e.g., "NIFTY").
    pub symbol: String,
    /// Human-readable name.
    pub name: String,
    /// Exchange code.
    pub exchange: String,
    /// Instrument type.
    pub instrument_type: InstrumentType,
    /// Starting price.
    pub initial_price: f64,
    /// Annualized volatility.
    pub volatility: f64,
    /// Annualized drift.
    pub drift: f64,
    /// Contract lot size.
    pub lot_size: u32,
    /// Minimum price increment.
    pub tick_size: f64,
    /// Strike spacing. Symbols without one have no option chain.
    pub strike_step: Option<f64>,
    /// Random walk driving the simulated price.
    #[serde(default)]
    pub walk_type: WalkTypeConfig,
}

/// Random walk model for the simulated feed.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WalkTypeConfig {
    /// Geometric Brownian motion (log-normal).
    #[default]
    GeometricBrownian,
    /// Mean-reverting (Ornstein-Uhlenbeck) around the price each path starts from.
    MeanReverting,
    /// Jump diffusion process.
    JumpDiffusion,
}

/// Default risk limits for new users.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RiskDefaults {
    /// Maximum absolute position quantity per symbol.
    pub max_position_size: f64,
    /// Maximum notional per order.
    pub max_order_value: f64,
    /// Maximum realized loss per day.
    pub max_daily_loss: f64,
    /// Maximum number of open positions.
    pub max_open_positions: i32,
    /// Maximum drawdown percentage.
    pub max_drawdown_pct: f64,
    /// Default stop loss percentage.
    pub stop_loss_pct: f64,
}

impl Default for RiskDefaults {
    fn default() -> Self {
        Self {
            max_position_size: 1_000.0,
            max_order_value: 500_000.0,
            max_daily_loss: 25_000.0,
            max_open_positions: 10,
            max_drawdown_pct: 20.0,
            stop_loss_pct: 2.0,
        }
    }
}

/// External integrations.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct IntegrationsConfig {
    /// OpenAlgo broker API key.
    pub openalgo_api_key: Option<String>,
    /// Base URL for n8n webhooks (workflow id is appended).
    pub n8n_webhook_url: Option<String>,
    /// n8n basic auth user.
    pub n8n_user: Option<String>,
    /// n8n basic auth password.
    pub n8n_password: Option<String>,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON formatted logs.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info,tower_http=debug".to_string(),
            json: false,
        }
    }
}

/// Splits a comma-separated list, trimming entries and dropping empties.
///
/// # Errors
/// Returns error if `*` is combined with other entries.
pub fn parse_list(raw: &str) -> Result<Vec<String>, ConfigError> {
    let items: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    if items.len() > 1 && items.iter().any(|s| s == "*") {
        return Err(ConfigError::InvalidValue(format!(
            "wildcard '*' cannot be combined with other entries: {raw}"
        )));
    }

    Ok(items)
}

/// Returns true when `tz` is a known IANA timezone name.
#[must_use]
pub fn is_valid_timezone(tz: &str) -> bool {
    tz.parse::<chrono_tz::Tz>().is_ok()
}

impl Config {
    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    /// Returns error if file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parses configuration from a TOML string.
    ///
    /// # Errors
    /// Returns error if content cannot be parsed.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Applies environment overrides on top of the file configuration.
    ///
    /// # Errors
    /// Returns error if an override cannot be parsed or the result is invalid.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides from an arbitrary lookup (the environment in production).
    fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("PORT") {
            self.server.port = port
                .parse()
                .map_err(|_| ConfigError::InvalidValue(format!("PORT must be a number: {port}")))?;
        }
        if let Some(origins) = lookup("CORS_ORIGINS") {
            self.server.cors_origins = parse_list(&origins)?;
        }
        if let Some(hosts) = lookup("ALLOWED_HOSTS") {
            self.server.allowed_hosts = parse_list(&hosts)?;
        }
        if let Some(trust) = lookup("TRUST_PROXY_HEADERS") {
            self.server.trust_proxy_headers = trust.parse().map_err(|_| {
                ConfigError::InvalidValue(format!("TRUST_PROXY_HEADERS must be true or false: {trust}"))
            })?;
        }
        if let Some(url) = lookup("DATABASE_URL").filter(|u| !u.is_empty()) {
            self.database.url = Some(url);
        }
        if let Some(key) = lookup("OPENALGO_API_KEY").filter(|k| !k.is_empty()) {
            self.integrations.openalgo_api_key = Some(key);
        }
        if let Some(url) = lookup("N8N_WEBHOOK_URL").filter(|u| !u.is_empty()) {
            self.integrations.n8n_webhook_url = Some(url);
        }
        if let Some(user) = lookup("N8N_USER") {
            self.integrations.n8n_user = Some(user);
        }
        if let Some(password) = lookup("N8N_PASSWORD") {
            self.integrations.n8n_password = Some(password);
        }
        if let Some(tz) = lookup("TIMEZONE") {
            self.market.timezone = tz;
        }
        if let Some(level) = lookup("LOG_LEVEL") {
            self.logging.level = level;
        }

        self.validate()
    }

    /// Validates the configuration values.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.server.rate_limit_per_minute == 0 {
            return Err(ConfigError::InvalidValue(
                "server.rate_limit_per_minute must be positive".to_string(),
            ));
        }
        if self.server.cors_origins.len() > 1 && self.server.cors_origins.iter().any(|o| o == "*")
        {
            return Err(ConfigError::InvalidValue(
                "server.cors_origins cannot mix '*' with explicit origins".to_string(),
            ));
        }
        if self.auth.session_ttl_secs <= 0 || self.auth.api_key_ttl_days <= 0 {
            return Err(ConfigError::InvalidValue(
                "auth lifetimes must be positive".to_string(),
            ));
        }
        if self.stream.tick_interval_ms == 0 || self.stream.heartbeat_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "stream intervals must be positive".to_string(),
            ));
        }
        if self.stream.channel_capacity == 0 || self.stream.max_connections == 0 {
            return Err(ConfigError::InvalidValue(
                "stream capacities must be positive".to_string(),
            ));
        }
        if self.option_chain.strikes_per_side == 0 {
            return Err(ConfigError::InvalidValue(
                "option_chain.strikes_per_side must be positive".to_string(),
            ));
        }
        if self.option_chain.default_iv <= 0.0 || self.option_chain.default_iv > 5.0 {
            return Err(ConfigError::InvalidValue(
                "option_chain.default_iv must be between 0 and 5".to_string(),
            ));
        }
        if !is_valid_timezone(&self.market.timezone) {
            return Err(ConfigError::InvalidValue(format!(
                "market.timezone is not a valid timezone: {}",
                self.market.timezone
            )));
        }

        for symbol in &self.market.symbols {
            if symbol.symbol.is_empty() {
                return Err(ConfigError::InvalidValue(
                    "symbol cannot be empty".to_string(),
                ));
            }
            if symbol.initial_price <= 0.0 {
                return Err(ConfigError::InvalidValue(format!(
                    "symbol {} initial_price must be positive",
                    symbol.symbol
                )));
            }
            if symbol.volatility <= 0.0 || symbol.volatility > 5.0 {
                return Err(ConfigError::InvalidValue(format!(
                    "symbol {} volatility must be between 0 and 5",
                    symbol.symbol
                )));
            }
            if symbol.lot_size == 0 {
                return Err(ConfigError::InvalidValue(format!(
                    "symbol {} lot_size must be positive",
                    symbol.symbol
                )));
            }
            if symbol.strike_step.is_some_and(|s| s <= 0.0) {
                return Err(ConfigError::InvalidValue(format!(
                    "symbol {} strike_step must be positive",
                    symbol.symbol
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_parse_config() {
        let toml_content = r#"
[server]
host = "127.0.0.1"
port = 3000
cors_origins = ["http://localhost:3001"]

[stream]
tick_interval_ms = 250
heartbeat_secs = 10

[market]
timezone = "UTC"

[[market.symbols]]
symbol = "NIFTY"
name = "Nifty 50"
exchange = "NSE"
instrument_type = "index"
initial_price = 22000.0
volatility = 0.15
drift = 0.05
lot_size = 75
tick_size = 0.05
strike_step = 50.0
"#;

        let config = Config::parse(toml_content).expect("should parse");
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.stream.tick_interval_ms, 250);
        assert_eq!(config.stream.channel_capacity, 4096);
        assert_eq!(config.market.symbols.len(), 1);
        assert_eq!(config.market.symbols[0].strike_step, Some(50.0));
        assert_eq!(
            config.market.symbols[0].instrument_type,
            InstrumentType::Index
        );
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse("").expect("defaults should be valid");
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.market.symbols.len(), 3);
        assert!(config.database.url.is_none());
    }

    #[test]
    fn test_parse_list() {
        assert_eq!(
            parse_list(" http://a.com, ,http://b.com ").unwrap(),
            vec!["http://a.com".to_string(), "http://b.com".to_string()]
        );
        assert_eq!(parse_list("*").unwrap(), vec!["*".to_string()]);
        assert!(parse_list("").unwrap().is_empty());
        assert!(parse_list("*,http://a.com").is_err());
    }

    #[test]
    fn test_timezone_validation() {
        assert!(is_valid_timezone("UTC"));
        assert!(is_valid_timezone("Asia/Kolkata"));
        assert!(is_valid_timezone("America/Argentina/Buenos_Aires"));
        assert!(!is_valid_timezone("Kolkata"));
        assert!(!is_valid_timezone("Asia/"));
        // Well-formed but unknown zones.
        assert!(!is_valid_timezone("Mars/Olympus"));
        assert!(!is_valid_timezone("Asia/Kolkatta"));
        assert!(!is_valid_timezone("Foo/Bar"));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("PORT", "9000"),
            ("CORS_ORIGINS", "http://a.com,http://b.com"),
            ("DATABASE_URL", "postgres://velox@localhost/velox"),
            ("OPENALGO_API_KEY", "abc"),
            ("TIMEZONE", "UTC"),
            ("TRUST_PROXY_HEADERS", "true"),
        ]);

        let mut config = Config::default();
        config
            .apply_overrides(|k| env.get(k).map(|v| v.to_string()))
            .expect("overrides apply");

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.cors_origins.len(), 2);
        assert_eq!(
            config.database.url.as_deref(),
            Some("postgres://velox@localhost/velox")
        );
        assert_eq!(config.integrations.openalgo_api_key.as_deref(), Some("abc"));
        assert_eq!(config.market.timezone, "UTC");
        assert!(config.server.trust_proxy_headers);
    }

    #[test]
    fn test_env_override_bad_port() {
        let mut config = Config::default();
        let result = config.apply_overrides(|k| (k == "PORT").then(|| "http".to_string()));
        assert!(result.is_err());
    }

    #[test]
    fn test_proxy_headers_untrusted_by_default() {
        assert!(!Config::default().server.trust_proxy_headers);
        let mut config = Config::default();
        let result =
            config.apply_overrides(|k| (k == "TRUST_PROXY_HEADERS").then(|| "maybe".to_string()));
        assert!(result.is_err());
    }

    #[test]
    fn test_env_override_bad_timezone() {
        let mut config = Config::default();
        let result = config.apply_overrides(|k| (k == "TIMEZONE").then(|| "nowhere".to_string()));
        assert!(result.is_err());
        let result =
            config.apply_overrides(|k| (k == "TIMEZONE").then(|| "Europe/Atlantis".to_string()));
        assert!(result.is_err());
    }

    #[test]
    fn test_validation_rejects_bad_symbol() {
        let mut config = Config::default();
        config.market.symbols[0].volatility = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_walk_type_defaults_to_geometric() {
        let config = Config::parse(
            r#"
[[market.symbols]]
symbol = "TCS"
name = "Tata Consultancy"
exchange = "NSE"
instrument_type = "equity"
initial_price = 3900.0
volatility = 0.2
drift = 0.05
lot_size = 1
tick_size = 0.05

[[market.symbols]]
symbol = "INFY"
name = "Infosys"
exchange = "NSE"
instrument_type = "equity"
initial_price = 1500.0
volatility = 0.2
drift = 0.05
lot_size = 1
tick_size = 0.05
walk_type = "mean_reverting"
"#,
        )
        .unwrap();
        assert_eq!(
            config.market.symbols[0].walk_type,
            WalkTypeConfig::GeometricBrownian
        );
        assert_eq!(config.market.symbols[1].walk_type, WalkTypeConfig::MeanReverting);
    }

    #[test]
    fn test_shipped_config_parses() {
        let config = Config::parse(include_str!("../config/default.toml")).unwrap();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.market.symbols.len(), 3);
        assert_eq!(config.market.symbols[0].strike_step, Some(50.0));
        assert!(config.market.symbols[2].strike_step.is_none());
    }
}
