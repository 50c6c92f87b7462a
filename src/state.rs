//! Application state management.

use crate::accounts::AccountService;
use crate::audit::AuditTrail;
use crate::auth::RateLimiter;
use crate::config::Config;
use crate::db::{DatabasePool, LogLevel};
use crate::error::ApiError;
use crate::integrations::N8nNotifier;
use crate::market_data::MarketDataService;
use crate::ohlc::OhlcAggregator;
use crate::option_chain::{ChainService, UnderlyingSpec};
use crate::risk::RiskService;
use crate::settings::SettingsStore;
use crate::store::Store;
use crate::strategy::StrategyService;
use crate::stream::{MarketFeed, StreamHub};
use crate::trading::TradingService;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::info;

/// Application state shared across all handlers.
pub struct AppState {
    /// Startup configuration.
    pub config: Config,
    /// Record store.
    pub store: Arc<Store>,
    /// Runtime settings.
    pub settings: Arc<SettingsStore>,
    /// User accounts.
    pub accounts: Arc<AccountService>,
    /// Strategies.
    pub strategies: Arc<StrategyService>,
    /// Order placement and positions.
    pub trading: Arc<TradingService>,
    /// Risk limits and alerts.
    pub risk: Arc<RiskService>,
    /// Audit trail and compliance reports.
    pub audit: Arc<AuditTrail>,
    /// Symbols, quotes and bars.
    pub market_data: Arc<MarketDataService>,
    /// Option chains.
    pub chains: Arc<ChainService>,
    /// Live stream fan-out.
    pub hub: Arc<StreamHub>,
    /// OHLC bars.
    pub ohlc: Arc<OhlcAggregator>,
    /// Simulated market feed.
    pub feed: Arc<MarketFeed>,
    /// Request rate limiter.
    pub rate_limiter: RateLimiter,
    /// Startup instant.
    pub started_at: Instant,
}

impl AppState {
    /// Builds every service from configuration.
    ///
    /// Underlyings with a strike step are registered for generated option chains.
    #[must_use]
    pub fn from_config(config: Config, db: Option<DatabasePool>) -> Self {
        let store = Arc::new(Store::new(db, config.stream.tick_history));
        let settings = Arc::new(SettingsStore::from_config(&config));
        let hub = Arc::new(StreamHub::new(
            config.stream.channel_capacity,
            config.stream.max_connections,
        ));
        let ohlc = Arc::new(OhlcAggregator::default());

        let chains = Arc::new(ChainService::new(
            Arc::clone(&store),
            Arc::clone(&settings),
            config.option_chain.clone(),
        ));
        for symbol in &config.market.symbols {
            if let Some(strike_step) = symbol.strike_step {
                chains.register(
                    &symbol.symbol,
                    UnderlyingSpec {
                        strike_step,
                        lot_size: symbol.lot_size,
                    },
                );
            }
        }

        let accounts = Arc::new(AccountService::new(
            Arc::clone(&store),
            config.auth.clone(),
            config.risk.clone(),
        ));
        let strategies = Arc::new(StrategyService::new(
            Arc::clone(&store),
            N8nNotifier::new(&config.integrations),
        ));
        let risk = Arc::new(RiskService::new(
            Arc::clone(&store),
            Arc::clone(&hub),
            config.risk.clone(),
        ));
        let trading = Arc::new(TradingService::new(
            Arc::clone(&store),
            Arc::clone(&risk),
            Arc::clone(&strategies),
            Arc::clone(&settings),
        ));
        let audit = Arc::new(AuditTrail::new(Arc::clone(&store)));
        let market_data = Arc::new(MarketDataService::new(
            Arc::clone(&store),
            Arc::clone(&ohlc),
        ));
        let feed = Arc::new(MarketFeed::new(
            &config.market.symbols,
            Arc::clone(&store),
            Arc::clone(&hub),
            Arc::clone(&ohlc),
            Arc::clone(&chains),
            Duration::from_millis(config.stream.tick_interval_ms),
            Duration::from_secs(config.option_chain.broadcast_interval_secs.max(1)),
        ));

        Self {
            config,
            store,
            settings,
            accounts,
            strategies,
            trading,
            risk,
            audit,
            market_data,
            chains,
            hub,
            ohlc,
            feed,
            rate_limiter: RateLimiter::new(),
            started_at: Instant::now(),
        }
    }

    /// Registers the feed symbols in the symbol registry.
    ///
    /// # Errors
    /// Returns a database error if persistence fails.
    pub async fn register_symbols(&self) -> Result<usize, ApiError> {
        self.market_data
            .register_configured(&self.config.market.symbols)
            .await
    }

    /// Starts the market feed loops when enabled.
    pub async fn spawn_feed(&self) -> Vec<JoinHandle<()>> {
        if !self.config.stream.feed_enabled {
            info!("Market feed disabled");
            return Vec::new();
        }
        self.audit
            .system(
                LogLevel::Info,
                "market_feed",
                format!(
                    "market feed started for {} symbols",
                    self.config.market.symbols.len()
                ),
            )
            .await;
        vec![
            tokio::spawn(Arc::clone(&self.feed).run_ticks()),
            tokio::spawn(Arc::clone(&self.feed).run_chain_broadcast()),
        ]
    }

    /// Seconds since startup.
    #[must_use]
    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::from_config(Config::default(), None)
    }
}
