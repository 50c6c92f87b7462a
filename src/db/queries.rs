//! Write-through persistence and startup hydration queries.

use super::DatabasePool;
use super::schema::{
    AuditLog, ComplianceReport, MarketDataSubscription, Position, RiskAlert, RiskSettings,
    Strategy, StrategyPerformance, Symbol, SystemLog, Trade, User,
};
use uuid::Uuid;

/// Inserts or updates a user.
pub async fn upsert_user(db: &DatabasePool, user: &User) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO users (
            id, username, email, hashed_password, phone, role, is_active,
            failed_login_attempts, locked_until, last_login_at, session_token_hash,
            session_expires_at, api_key_hash, api_key_expires_at, max_daily_loss,
            max_position_size, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
        ON CONFLICT (id) DO UPDATE SET
            email = EXCLUDED.email,
            hashed_password = EXCLUDED.hashed_password,
            phone = EXCLUDED.phone,
            role = EXCLUDED.role,
            is_active = EXCLUDED.is_active,
            failed_login_attempts = EXCLUDED.failed_login_attempts,
            locked_until = EXCLUDED.locked_until,
            last_login_at = EXCLUDED.last_login_at,
            session_token_hash = EXCLUDED.session_token_hash,
            session_expires_at = EXCLUDED.session_expires_at,
            api_key_hash = EXCLUDED.api_key_hash,
            api_key_expires_at = EXCLUDED.api_key_expires_at,
            max_daily_loss = EXCLUDED.max_daily_loss,
            max_position_size = EXCLUDED.max_position_size,
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(user.id)
    .bind(&user.username)
    .bind(&user.email)
    .bind(&user.hashed_password)
    .bind(&user.phone)
    .bind(user.role.as_str())
    .bind(user.is_active)
    .bind(user.failed_login_attempts)
    .bind(user.locked_until)
    .bind(user.last_login_at)
    .bind(&user.session_token_hash)
    .bind(user.session_expires_at)
    .bind(&user.api_key_hash)
    .bind(user.api_key_expires_at)
    .bind(user.max_daily_loss)
    .bind(user.max_position_size)
    .bind(user.created_at)
    .bind(user.updated_at)
    .execute(db.pool())
    .await?;
    Ok(())
}

/// Inserts or updates a strategy.
pub async fn upsert_strategy(db: &DatabasePool, strategy: &Strategy) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO strategies (
            id, user_id, name, description, strategy_type, config, parameters, status,
            total_trades, winning_trades, losing_trades, total_pnl, n8n_workflow_id,
            created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
        ON CONFLICT (id) DO UPDATE SET
            name = EXCLUDED.name,
            description = EXCLUDED.description,
            config = EXCLUDED.config,
            parameters = EXCLUDED.parameters,
            status = EXCLUDED.status,
            total_trades = EXCLUDED.total_trades,
            winning_trades = EXCLUDED.winning_trades,
            losing_trades = EXCLUDED.losing_trades,
            total_pnl = EXCLUDED.total_pnl,
            n8n_workflow_id = EXCLUDED.n8n_workflow_id,
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(strategy.id)
    .bind(strategy.user_id)
    .bind(&strategy.name)
    .bind(&strategy.description)
    .bind(strategy.strategy_type.as_str())
    .bind(&strategy.config)
    .bind(&strategy.parameters)
    .bind(strategy.status.as_str())
    .bind(strategy.total_trades)
    .bind(strategy.winning_trades)
    .bind(strategy.losing_trades)
    .bind(strategy.total_pnl)
    .bind(&strategy.n8n_workflow_id)
    .bind(strategy.created_at)
    .bind(strategy.updated_at)
    .execute(db.pool())
    .await?;
    Ok(())
}

/// Inserts or replaces the performance record of a day.
pub async fn upsert_performance(
    db: &DatabasePool,
    record: &StrategyPerformance,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO strategy_performance (
            id, strategy_id, date, daily_pnl, cumulative_pnl, daily_trades,
            cumulative_trades, max_drawdown, sharpe_ratio, equity_curve, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        ON CONFLICT (strategy_id, date) DO UPDATE SET
            daily_pnl = EXCLUDED.daily_pnl,
            cumulative_pnl = EXCLUDED.cumulative_pnl,
            daily_trades = EXCLUDED.daily_trades,
            cumulative_trades = EXCLUDED.cumulative_trades,
            max_drawdown = EXCLUDED.max_drawdown,
            sharpe_ratio = EXCLUDED.sharpe_ratio,
            equity_curve = EXCLUDED.equity_curve
        "#,
    )
    .bind(record.id)
    .bind(record.strategy_id)
    .bind(record.date)
    .bind(record.daily_pnl)
    .bind(record.cumulative_pnl)
    .bind(record.daily_trades)
    .bind(record.cumulative_trades)
    .bind(record.max_drawdown)
    .bind(record.sharpe_ratio)
    .bind(&record.equity_curve)
    .bind(record.created_at)
    .execute(db.pool())
    .await?;
    Ok(())
}

/// Inserts a trade.
pub async fn insert_trade(db: &DatabasePool, trade: &Trade) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO trades (
            id, user_id, strategy_id, symbol, side, order_type, status, quantity,
            price, fill_price, realized_pnl, rejection_reason, created_at, filled_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        "#,
    )
    .bind(trade.id)
    .bind(trade.user_id)
    .bind(trade.strategy_id)
    .bind(&trade.symbol)
    .bind(trade.side.as_str())
    .bind(trade.order_type.as_str())
    .bind(trade.status.as_str())
    .bind(trade.quantity)
    .bind(trade.price)
    .bind(trade.fill_price)
    .bind(trade.realized_pnl)
    .bind(&trade.rejection_reason)
    .bind(trade.created_at)
    .bind(trade.filled_at)
    .execute(db.pool())
    .await?;
    Ok(())
}

/// Inserts or updates a position.
pub async fn upsert_position(db: &DatabasePool, position: &Position) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO positions (
            id, user_id, strategy_id, symbol, quantity, average_price, realized_pnl,
            status, opened_at, updated_at, closed_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        ON CONFLICT (id) DO UPDATE SET
            quantity = EXCLUDED.quantity,
            average_price = EXCLUDED.average_price,
            realized_pnl = EXCLUDED.realized_pnl,
            status = EXCLUDED.status,
            updated_at = EXCLUDED.updated_at,
            closed_at = EXCLUDED.closed_at
        "#,
    )
    .bind(position.id)
    .bind(position.user_id)
    .bind(position.strategy_id)
    .bind(&position.symbol)
    .bind(position.quantity)
    .bind(position.average_price)
    .bind(position.realized_pnl)
    .bind(position.status.as_str())
    .bind(position.opened_at)
    .bind(position.updated_at)
    .bind(position.closed_at)
    .execute(db.pool())
    .await?;
    Ok(())
}

/// Inserts a symbol unless it already exists.
pub async fn insert_symbol(db: &DatabasePool, symbol: &Symbol) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO symbols (id, symbol, name, exchange, instrument_type, lot_size, tick_size, is_active, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (symbol) DO NOTHING
        "#,
    )
    .bind(symbol.id)
    .bind(&symbol.symbol)
    .bind(&symbol.name)
    .bind(&symbol.exchange)
    .bind(symbol.instrument_type.as_str())
    .bind(symbol.lot_size)
    .bind(symbol.tick_size)
    .bind(symbol.is_active)
    .bind(symbol.created_at)
    .execute(db.pool())
    .await?;
    Ok(())
}

/// Inserts a market data subscription.
pub async fn insert_subscription(
    db: &DatabasePool,
    subscription: &MarketDataSubscription,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO market_data_subscriptions (id, user_id, symbol, data_type, created_at)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(subscription.id)
    .bind(subscription.user_id)
    .bind(&subscription.symbol)
    .bind(subscription.data_type.as_str())
    .bind(subscription.created_at)
    .execute(db.pool())
    .await?;
    Ok(())
}

/// Deletes a market data subscription.
pub async fn delete_subscription(db: &DatabasePool, id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM market_data_subscriptions WHERE id = $1")
        .bind(id)
        .execute(db.pool())
        .await?;
    Ok(())
}

/// Inserts or updates risk settings.
pub async fn upsert_risk_settings(
    db: &DatabasePool,
    settings: &RiskSettings,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO risk_settings (
            user_id, max_position_size, max_order_value, max_daily_loss, max_open_positions,
            max_drawdown_pct, stop_loss_pct, trading_enabled, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (user_id) DO UPDATE SET
            max_position_size = EXCLUDED.max_position_size,
            max_order_value = EXCLUDED.max_order_value,
            max_daily_loss = EXCLUDED.max_daily_loss,
            max_open_positions = EXCLUDED.max_open_positions,
            max_drawdown_pct = EXCLUDED.max_drawdown_pct,
            stop_loss_pct = EXCLUDED.stop_loss_pct,
            trading_enabled = EXCLUDED.trading_enabled,
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(settings.user_id)
    .bind(settings.max_position_size)
    .bind(settings.max_order_value)
    .bind(settings.max_daily_loss)
    .bind(settings.max_open_positions)
    .bind(settings.max_drawdown_pct)
    .bind(settings.stop_loss_pct)
    .bind(settings.trading_enabled)
    .bind(settings.updated_at)
    .execute(db.pool())
    .await?;
    Ok(())
}

/// Inserts or updates a risk alert.
pub async fn upsert_risk_alert(db: &DatabasePool, alert: &RiskAlert) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO risk_alerts (id, user_id, alert_type, severity, message, acknowledged, created_at, acknowledged_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (id) DO UPDATE SET
            acknowledged = EXCLUDED.acknowledged,
            acknowledged_at = EXCLUDED.acknowledged_at
        "#,
    )
    .bind(alert.id)
    .bind(alert.user_id)
    .bind(&alert.alert_type)
    .bind(alert.severity.as_str())
    .bind(&alert.message)
    .bind(alert.acknowledged)
    .bind(alert.created_at)
    .bind(alert.acknowledged_at)
    .execute(db.pool())
    .await?;
    Ok(())
}

/// Inserts an audit log entry.
pub async fn insert_audit_log(db: &DatabasePool, entry: &AuditLog) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO audit_logs (id, user_id, action, resource_type, resource_id, details, ip_address, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(entry.id)
    .bind(entry.user_id)
    .bind(&entry.action)
    .bind(&entry.resource_type)
    .bind(&entry.resource_id)
    .bind(&entry.details)
    .bind(&entry.ip_address)
    .bind(entry.created_at)
    .execute(db.pool())
    .await?;
    Ok(())
}

/// Queries audit logs, newest first.
pub async fn fetch_audit_logs(
    db: &DatabasePool,
    user_id: Option<Uuid>,
    action: Option<&str>,
    limit: i64,
) -> Result<Vec<AuditLog>, sqlx::Error> {
    sqlx::query_as::<_, AuditLog>(
        r#"
        SELECT id, user_id, action, resource_type, resource_id, details, ip_address, created_at
        FROM audit_logs
        WHERE ($1::uuid IS NULL OR user_id = $1)
          AND ($2::text IS NULL OR action = $2)
        ORDER BY created_at DESC
        LIMIT $3
        "#,
    )
    .bind(user_id)
    .bind(action)
    .bind(limit)
    .fetch_all(db.pool())
    .await
}

/// Inserts a system log entry.
pub async fn insert_system_log(db: &DatabasePool, entry: &SystemLog) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO system_logs (id, level, component, message, created_at)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(entry.id)
    .bind(entry.level.as_str())
    .bind(&entry.component)
    .bind(&entry.message)
    .bind(entry.created_at)
    .execute(db.pool())
    .await?;
    Ok(())
}

/// Inserts a compliance report.
pub async fn insert_compliance_report(
    db: &DatabasePool,
    report: &ComplianceReport,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO compliance_reports (
            id, user_id, period_start, period_end, total_trades, filled_trades,
            rejected_trades, traded_value, risk_alerts, status, generated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        "#,
    )
    .bind(report.id)
    .bind(report.user_id)
    .bind(report.period_start)
    .bind(report.period_end)
    .bind(report.total_trades)
    .bind(report.filled_trades)
    .bind(report.rejected_trades)
    .bind(report.traded_value)
    .bind(report.risk_alerts)
    .bind(report.status.as_str())
    .bind(report.generated_at)
    .execute(db.pool())
    .await?;
    Ok(())
}

/// Records loaded at startup to rebuild the in-memory store.
#[derive(Debug, Default)]
pub struct Snapshot {
    /// All users.
    pub users: Vec<User>,
    /// All strategies.
    pub strategies: Vec<Strategy>,
    /// All performance records.
    pub performance: Vec<StrategyPerformance>,
    /// Open positions.
    pub positions: Vec<Position>,
    /// All risk settings.
    pub risk_settings: Vec<RiskSettings>,
    /// Unacknowledged alerts.
    pub risk_alerts: Vec<RiskAlert>,
    /// Symbol registry.
    pub symbols: Vec<Symbol>,
    /// Market data subscriptions.
    pub subscriptions: Vec<MarketDataSubscription>,
    /// Trades of the last 7 days.
    pub recent_trades: Vec<Trade>,
}

/// Loads the records the service keeps in memory.
pub async fn load_snapshot(db: &DatabasePool) -> Result<Snapshot, sqlx::Error> {
    let pool = db.pool();

    let users = sqlx::query_as::<_, User>("SELECT * FROM users")
        .fetch_all(pool)
        .await?;
    let strategies = sqlx::query_as::<_, Strategy>("SELECT * FROM strategies")
        .fetch_all(pool)
        .await?;
    let performance = sqlx::query_as::<_, StrategyPerformance>(
        "SELECT * FROM strategy_performance ORDER BY date",
    )
    .fetch_all(pool)
    .await?;
    let positions =
        sqlx::query_as::<_, Position>("SELECT * FROM positions WHERE status = 'open'")
            .fetch_all(pool)
            .await?;
    let risk_settings = sqlx::query_as::<_, RiskSettings>("SELECT * FROM risk_settings")
        .fetch_all(pool)
        .await?;
    let risk_alerts =
        sqlx::query_as::<_, RiskAlert>("SELECT * FROM risk_alerts WHERE acknowledged = FALSE")
            .fetch_all(pool)
            .await?;
    let symbols = sqlx::query_as::<_, Symbol>("SELECT * FROM symbols")
        .fetch_all(pool)
        .await?;
    let subscriptions =
        sqlx::query_as::<_, MarketDataSubscription>("SELECT * FROM market_data_subscriptions")
            .fetch_all(pool)
            .await?;
    let recent_trades = sqlx::query_as::<_, Trade>(
        "SELECT * FROM trades WHERE created_at > NOW() - INTERVAL '7 days' ORDER BY created_at",
    )
    .fetch_all(pool)
    .await?;

    Ok(Snapshot {
        users,
        strategies,
        performance,
        positions,
        risk_settings,
        risk_alerts,
        symbols,
        subscriptions,
        recent_trades,
    })
}
