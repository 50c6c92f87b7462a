//! In-memory record store with optional write-through to PostgreSQL.
//!
//! The maps here are the source of truth for the running service. When a
//! database is configured every mutation is persisted before it becomes
//! visible, and [`Store::hydrate`] rebuilds the maps at startup.

use crate::db::queries;
use crate::db::{
    AuditLog, ComplianceReport, DatabasePool, LogLevel, MarketDataSubscription, Position,
    PositionStatus, QuoteData, RiskAlert, RiskSettings, Strategy, StrategyPerformance, Symbol,
    SystemLog, TickData, Trade, User,
};
use crate::error::ApiError;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::VecDeque;
use tracing::{info, warn};
use uuid::Uuid;


/// Audit entries kept in memory.
const MAX_AUDIT_ENTRIES: usize = 10_000;

/// System log entries kept in memory.
const MAX_SYSTEM_LOGS: usize = 1_000;

/// Record store shared by all services.
pub struct Store {
    db: Option<DatabasePool>,
    users: DashMap<Uuid, User>,
    // Credential hash -> user id.
    session_index: DashMap<String, Uuid>,
    api_key_index: DashMap<String, Uuid>,
    strategies: DashMap<Uuid, Strategy>,
    performance: DashMap<Uuid, Vec<StrategyPerformance>>,
    trades: DashMap<Uuid, Trade>,
    positions: DashMap<Uuid, Position>,
    symbols: DashMap<String, Symbol>,
    subscriptions: DashMap<Uuid, MarketDataSubscription>,
    risk_settings: DashMap<Uuid, RiskSettings>,
    risk_alerts: DashMap<Uuid, RiskAlert>,
    audit_logs: RwLock<VecDeque<AuditLog>>,
    system_logs: RwLock<VecDeque<SystemLog>>,
    reports: DashMap<Uuid, ComplianceReport>,
    quotes: DashMap<String, QuoteData>,
    ticks: DashMap<String, VecDeque<TickData>>,
    tick_history: usize,
}

impl Store {
    /// Creates an empty store.
    ///
    /// # Arguments
    /// * `db` - Optional database for write-through persistence
    /// * `tick_history` - Ticks kept per symbol
    #[must_use]
    pub fn new(db: Option<DatabasePool>, tick_history: usize) -> Self {
        Self {
            db,
            users: DashMap::new(),
            session_index: DashMap::new(),
            api_key_index: DashMap::new(),
            strategies: DashMap::new(),
            performance: DashMap::new(),
            trades: DashMap::new(),
            positions: DashMap::new(),
            symbols: DashMap::new(),
            subscriptions: DashMap::new(),
            risk_settings: DashMap::new(),
            risk_alerts: DashMap::new(),
            audit_logs: RwLock::new(VecDeque::new()),
            system_logs: RwLock::new(VecDeque::new()),
            reports: DashMap::new(),
            quotes: DashMap::new(),
            ticks: DashMap::new(),
            tick_history: tick_history.max(1),
        }
    }

    /// Returns the database pool, if configured.
    #[must_use]
    pub fn db(&self) -> Option<&DatabasePool> {
        self.db.as_ref()
    }

    /// Loads persisted records into memory.
    ///
    /// # Errors
    /// Returns an error if any query fails.
    pub async fn hydrate(&self) -> Result<(), sqlx::Error> {
        let Some(db) = &self.db else {
            return Ok(());
        };

        let snapshot = queries::load_snapshot(db).await?;
        info!(
            users = snapshot.users.len(),
            strategies = snapshot.strategies.len(),
            positions = snapshot.positions.len(),
            symbols = snapshot.symbols.len(),
            "Hydrated store from database"
        );

        for user in snapshot.users {
            self.index_user(&user);
            self.users.insert(user.id, user);
        }
        for strategy in snapshot.strategies {
            self.strategies.insert(strategy.id, strategy);
        }
        for record in snapshot.performance {
            self.performance
                .entry(record.strategy_id)
                .or_default()
                .push(record);
        }
        for position in snapshot.positions {
            self.positions.insert(position.id, position);
        }
        for settings in snapshot.risk_settings {
            self.risk_settings.insert(settings.user_id, settings);
        }
        for alert in snapshot.risk_alerts {
            self.risk_alerts.insert(alert.id, alert);
        }
        for symbol in snapshot.symbols {
            self.symbols.insert(symbol.symbol.clone(), symbol);
        }
        for subscription in snapshot.subscriptions {
            self.subscriptions.insert(subscription.id, subscription);
        }
        for trade in snapshot.recent_trades {
            self.trades.insert(trade.id, trade);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------

    /// Gets a user by id.
    #[must_use]
    pub fn user(&self, id: Uuid) -> Option<User> {
        self.users.get(&id).map(|u| u.clone())
    }

    /// Finds a user matching a predicate.
    pub fn find_user<F>(&self, predicate: F) -> Option<User>
    where
        F: Fn(&User) -> bool,
    {
        self.users
            .iter()
            .find(|entry| predicate(entry.value()))
            .map(|entry| entry.value().clone())
    }

    /// Finds the user holding a session token hash.
    #[must_use]
    pub fn user_by_session_hash(&self, hash: &str) -> Option<User> {
        let id = *self.session_index.get(hash)?;
        self.user(id)
            .filter(|u| u.session_token_hash.as_deref() == Some(hash))
    }

    /// Finds the user holding an API key hash.
    #[must_use]
    pub fn user_by_api_key_hash(&self, hash: &str) -> Option<User> {
        let id = *self.api_key_index.get(hash)?;
        self.user(id).filter(|u| u.api_key_hash.as_deref() == Some(hash))
    }

    /// Points the credential indexes at `user`, dropping replaced hashes.
    fn index_user(&self, user: &User) {
        if let Some(previous) = self.users.get(&user.id) {
            if previous.session_token_hash != user.session_token_hash
                && let Some(old) = &previous.session_token_hash
            {
                self.session_index.remove(old);
            }
            if previous.api_key_hash != user.api_key_hash
                && let Some(old) = &previous.api_key_hash
            {
                self.api_key_index.remove(old);
            }
        }
        if let Some(hash) = &user.session_token_hash {
            self.session_index.insert(hash.clone(), user.id);
        }
        if let Some(hash) = &user.api_key_hash {
            self.api_key_index.insert(hash.clone(), user.id);
        }
    }

    /// Number of registered users.
    #[must_use]
    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    /// Inserts or replaces a user.
    ///
    /// # Errors
    /// Returns a database error if persistence fails.
    pub async fn save_user(&self, user: User) -> Result<(), ApiError> {
        if let Some(db) = &self.db {
            queries::upsert_user(db, &user).await?;
        }
        self.index_user(&user);
        self.users.insert(user.id, user);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Strategies
    // ------------------------------------------------------------------

    /// Gets a strategy by id.
    #[must_use]
    pub fn strategy(&self, id: Uuid) -> Option<Strategy> {
        self.strategies.get(&id).map(|s| s.clone())
    }

    /// Lists strategies owned by a user, newest first.
    #[must_use]
    pub fn strategies_for(&self, user_id: Uuid) -> Vec<Strategy> {
        let mut strategies: Vec<Strategy> = self
            .strategies
            .iter()
            .filter(|s| s.user_id == user_id)
            .map(|s| s.clone())
            .collect();
        strategies.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        strategies
    }

    /// Inserts or replaces a strategy.
    ///
    /// # Errors
    /// Returns a database error if persistence fails.
    pub async fn save_strategy(&self, strategy: Strategy) -> Result<(), ApiError> {
        if let Some(db) = &self.db {
            queries::upsert_strategy(db, &strategy).await?;
        }
        self.strategies.insert(strategy.id, strategy);
        Ok(())
    }

    /// Performance history of a strategy, oldest first.
    #[must_use]
    pub fn performance(&self, strategy_id: Uuid) -> Vec<StrategyPerformance> {
        self.performance
            .get(&strategy_id)
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    /// Stores a daily performance record, replacing any record of the same day.
    ///
    /// # Errors
    /// Returns a database error if persistence fails.
    pub async fn save_performance(&self, record: StrategyPerformance) -> Result<(), ApiError> {
        if let Some(db) = &self.db {
            queries::upsert_performance(db, &record).await?;
        }
        let mut records = self.performance.entry(record.strategy_id).or_default();
        records.retain(|r| r.date != record.date);
        records.push(record);
        records.sort_by_key(|r| r.date);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Trades and positions
    // ------------------------------------------------------------------

    /// Stores a trade.
    ///
    /// # Errors
    /// Returns a database error if persistence fails.
    pub async fn insert_trade(&self, trade: Trade) -> Result<(), ApiError> {
        if let Some(db) = &self.db {
            queries::insert_trade(db, &trade).await?;
        }
        self.trades.insert(trade.id, trade);
        Ok(())
    }

    /// Trades of a user, newest first.
    #[must_use]
    pub fn trades_for(&self, user_id: Uuid) -> Vec<Trade> {
        let mut trades: Vec<Trade> = self
            .trades
            .iter()
            .filter(|t| t.user_id == user_id)
            .map(|t| t.clone())
            .collect();
        trades.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        trades
    }

    /// Trades of a user created in `[from, to)`.
    #[must_use]
    pub fn trades_between(
        &self,
        user_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Vec<Trade> {
        self.trades
            .iter()
            .filter(|t| t.user_id == user_id && t.created_at >= from && t.created_at < to)
            .map(|t| t.clone())
            .collect()
    }

    /// Gets a position by id.
    #[must_use]
    pub fn position(&self, id: Uuid) -> Option<Position> {
        self.positions.get(&id).map(|p| p.clone())
    }

    /// The open position of a user in a symbol.
    #[must_use]
    pub fn open_position(&self, user_id: Uuid, symbol: &str) -> Option<Position> {
        self.positions
            .iter()
            .find(|p| p.user_id == user_id && p.symbol == symbol && p.status == PositionStatus::Open)
            .map(|p| p.clone())
    }

    /// Positions of a user, most recently updated first.
    #[must_use]
    pub fn positions_for(&self, user_id: Uuid) -> Vec<Position> {
        let mut positions: Vec<Position> = self
            .positions
            .iter()
            .filter(|p| p.user_id == user_id)
            .map(|p| p.clone())
            .collect();
        positions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        positions
    }

    /// Inserts or replaces a position.
    ///
    /// # Errors
    /// Returns a database error if persistence fails.
    pub async fn save_position(&self, position: Position) -> Result<(), ApiError> {
        if let Some(db) = &self.db {
            queries::upsert_position(db, &position).await?;
        }
        self.positions.insert(position.id, position);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Market reference data
    // ------------------------------------------------------------------

    /// Gets a symbol.
    #[must_use]
    pub fn symbol(&self, symbol: &str) -> Option<Symbol> {
        self.symbols.get(symbol).map(|s| s.clone())
    }

    /// All symbols sorted by name.
    #[must_use]
    pub fn symbols(&self) -> Vec<Symbol> {
        let mut symbols: Vec<Symbol> = self.symbols.iter().map(|s| s.clone()).collect();
        symbols.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        symbols
    }

    /// Registers a symbol. Existing symbols are left untouched.
    ///
    /// Returns false when the symbol already existed.
    ///
    /// # Errors
    /// Returns a database error if persistence fails.
    pub async fn insert_symbol(&self, symbol: Symbol) -> Result<bool, ApiError> {
        if self.symbols.contains_key(&symbol.symbol) {
            return Ok(false);
        }
        if let Some(db) = &self.db {
            queries::insert_symbol(db, &symbol).await?;
        }
        Ok(self.symbols.insert(symbol.symbol.clone(), symbol).is_none())
    }

    /// Subscriptions of a user.
    #[must_use]
    pub fn subscriptions_for(&self, user_id: Uuid) -> Vec<MarketDataSubscription> {
        let mut subscriptions: Vec<MarketDataSubscription> = self
            .subscriptions
            .iter()
            .filter(|s| s.user_id == user_id)
            .map(|s| s.clone())
            .collect();
        subscriptions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        subscriptions
    }

    /// Gets a subscription by id.
    #[must_use]
    pub fn subscription(&self, id: Uuid) -> Option<MarketDataSubscription> {
        self.subscriptions.get(&id).map(|s| s.clone())
    }

    /// Stores a subscription.
    ///
    /// # Errors
    /// Returns a database error if persistence fails.
    pub async fn insert_subscription(
        &self,
        subscription: MarketDataSubscription,
    ) -> Result<(), ApiError> {
        if let Some(db) = &self.db {
            queries::insert_subscription(db, &subscription).await?;
        }
        self.subscriptions.insert(subscription.id, subscription);
        Ok(())
    }

    /// Removes a subscription.
    ///
    /// # Errors
    /// Returns a database error if persistence fails.
    pub async fn remove_subscription(&self, id: Uuid) -> Result<(), ApiError> {
        if let Some(db) = &self.db {
            queries::delete_subscription(db, id).await?;
        }
        self.subscriptions.remove(&id);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Live market data
    // ------------------------------------------------------------------

    /// Folds a tick into the latest quote and the tick history.
    pub fn record_tick(&self, tick: &TickData) {
        self.quotes
            .entry(tick.symbol.clone())
            .and_modify(|quote| quote.apply(tick))
            .or_insert_with(|| QuoteData::from_tick(tick));

        let mut history = self.ticks.entry(tick.symbol.clone()).or_default();
        history.push_back(tick.clone());
        while history.len() > self.tick_history {
            history.pop_front();
        }
    }

    /// Latest quote of a symbol.
    #[must_use]
    pub fn quote(&self, symbol: &str) -> Option<QuoteData> {
        self.quotes.get(symbol).map(|q| q.clone())
    }

    /// Last traded price of a symbol.
    #[must_use]
    pub fn last_price(&self, symbol: &str) -> Option<f64> {
        self.quotes.get(symbol).map(|q| q.ltp)
    }

    /// Most recent ticks of a symbol, oldest first.
    #[must_use]
    pub fn recent_ticks(&self, symbol: &str, limit: usize) -> Vec<TickData> {
        let Some(history) = self.ticks.get(symbol) else {
            return Vec::new();
        };
        let skip = history.len().saturating_sub(limit);
        history.iter().skip(skip).cloned().collect()
    }

    // ------------------------------------------------------------------
    // Risk
    // ------------------------------------------------------------------

    /// Risk settings of a user.
    #[must_use]
    pub fn risk_settings(&self, user_id: Uuid) -> Option<RiskSettings> {
        self.risk_settings.get(&user_id).map(|s| s.clone())
    }

    /// Inserts or replaces risk settings.
    ///
    /// # Errors
    /// Returns a database error if persistence fails.
    pub async fn save_risk_settings(&self, settings: RiskSettings) -> Result<(), ApiError> {
        if let Some(db) = &self.db {
            queries::upsert_risk_settings(db, &settings).await?;
        }
        self.risk_settings.insert(settings.user_id, settings);
        Ok(())
    }

    /// Gets an alert by id.
    #[must_use]
    pub fn risk_alert(&self, id: Uuid) -> Option<RiskAlert> {
        self.risk_alerts.get(&id).map(|a| a.clone())
    }

    /// Alerts of a user, newest first.
    #[must_use]
    pub fn risk_alerts_for(&self, user_id: Uuid) -> Vec<RiskAlert> {
        let mut alerts: Vec<RiskAlert> = self
            .risk_alerts
            .iter()
            .filter(|a| a.user_id == user_id)
            .map(|a| a.clone())
            .collect();
        alerts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        alerts
    }

    /// Inserts or replaces an alert.
    ///
    /// # Errors
    /// Returns a database error if persistence fails.
    pub async fn save_risk_alert(&self, alert: RiskAlert) -> Result<(), ApiError> {
        if let Some(db) = &self.db {
            queries::upsert_risk_alert(db, &alert).await?;
        }
        self.risk_alerts.insert(alert.id, alert);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Audit
    // ------------------------------------------------------------------

    /// Appends an audit entry. Persistence failures are logged, not returned.
    pub async fn push_audit(&self, entry: AuditLog) {
        if let Some(db) = &self.db
            && let Err(e) = queries::insert_audit_log(db, &entry).await
        {
            warn!(action = %entry.action, error = %e, "Failed to persist audit log");
        }
        let mut logs = self.audit_logs.write();
        logs.push_back(entry);
        while logs.len() > MAX_AUDIT_ENTRIES {
            logs.pop_front();
        }
    }

    /// Queries audit entries, newest first.
    ///
    /// Reads from the database when configured, otherwise from memory.
    ///
    /// # Errors
    /// Returns a database error if the query fails.
    pub async fn audit_logs(
        &self,
        user_id: Option<Uuid>,
        action: Option<&str>,
        limit: usize,
    ) -> Result<Vec<AuditLog>, ApiError> {
        if let Some(db) = &self.db {
            return Ok(queries::fetch_audit_logs(db, user_id, action, limit as i64).await?);
        }

        let logs = self.audit_logs.read();
        Ok(logs
            .iter()
            .rev()
            .filter(|l| user_id.is_none_or(|id| l.user_id == Some(id)))
            .filter(|l| action.is_none_or(|a| l.action == a))
            .take(limit)
            .cloned()
            .collect())
    }

    /// Appends a system log entry. Persistence failures are logged, not returned.
    pub async fn push_system_log(&self, entry: SystemLog) {
        if let Some(db) = &self.db
            && let Err(e) = queries::insert_system_log(db, &entry).await
        {
            warn!(component = %entry.component, error = %e, "Failed to persist system log");
        }
        let mut logs = self.system_logs.write();
        logs.push_back(entry);
        while logs.len() > MAX_SYSTEM_LOGS {
            logs.pop_front();
        }
    }

    /// Queries system log entries, newest first.
    #[must_use]
    pub fn system_logs(
        &self,
        level: Option<LogLevel>,
        component: Option<&str>,
        limit: usize,
    ) -> Vec<SystemLog> {
        let logs = self.system_logs.read();
        logs.iter()
            .rev()
            .filter(|l| level.is_none_or(|lvl| l.level == lvl))
            .filter(|l| component.is_none_or(|c| l.component == c))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Risk alerts of a user raised in `[from, to)`.
    #[must_use]
    pub fn alert_count_between(&self, user_id: Uuid, from: DateTime<Utc>, to: DateTime<Utc>) -> usize {
        self.risk_alerts
            .iter()
            .filter(|a| a.user_id == user_id && a.created_at >= from && a.created_at < to)
            .count()
    }

    /// Stores a compliance report.
    ///
    /// # Errors
    /// Returns a database error if persistence fails.
    pub async fn save_report(&self, report: ComplianceReport) -> Result<(), ApiError> {
        if let Some(db) = &self.db {
            queries::insert_compliance_report(db, &report).await?;
        }
        self.reports.insert(report.id, report);
        Ok(())
    }

    /// Compliance reports, newest first, optionally for one user.
    #[must_use]
    pub fn reports(&self, user_id: Option<Uuid>) -> Vec<ComplianceReport> {
        let mut reports: Vec<ComplianceReport> = self
            .reports
            .iter()
            .filter(|r| user_id.is_none_or(|id| r.user_id == id))
            .map(|r| r.clone())
            .collect();
        reports.sort_by(|a, b| b.generated_at.cmp(&a.generated_at));
        reports
    }
}
