//! Trading strategies: config validation, lifecycle and performance tracking.

use crate::db::{Strategy, StrategyPerformance, StrategyStatus, StrategyType, User, UserRole};
use crate::error::{ApiError, FieldError};
use crate::integrations::N8nNotifier;
use crate::models::{CreateStrategyRequest, RecordPerformanceRequest, UpdateStrategyRequest};
use crate::store::Store;
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde_json::json;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

#[cfg(test)]
mod tests;

/// Trading days per year used to annualize the Sharpe ratio.
const TRADING_DAYS: f64 = 252.0;

/// Keys each strategy type requires in its `config`.
#[must_use]
pub fn required_config_keys(strategy_type: StrategyType) -> &'static [&'static str] {
    match strategy_type {
        StrategyType::MovingAverageCrossover => &["fast_period", "slow_period", "symbol"],
        StrategyType::Rsi => &["period", "overbought", "oversold", "symbol"],
        StrategyType::Breakout => &["lookback_period", "threshold", "symbol"],
        StrategyType::Straddle => &["underlying", "expiry", "quantity"],
        StrategyType::IronCondor => &[
            "underlying",
            "expiry",
            "call_short_strike",
            "put_short_strike",
            "wing_width",
        ],
        StrategyType::Custom => &[],
    }
}

/// Checks that `config` is an object carrying every key its type requires.
///
/// # Errors
/// Returns one `Validation` error listing every missing key.
pub fn validate_config(
    strategy_type: StrategyType,
    config: &serde_json::Value,
) -> Result<(), ApiError> {
    let Some(object) = config.as_object() else {
        return Err(ApiError::field("config", "must be a JSON object"));
    };

    let missing: Vec<FieldError> = required_config_keys(strategy_type)
        .iter()
        .filter(|key| object.get(**key).is_none_or(serde_json::Value::is_null))
        .map(|key| FieldError::new(format!("config.{key}"), "is required"))
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(ApiError::Validation(missing))
    }
}

/// Whether a strategy may move from `from` to `to`.
#[must_use]
pub fn can_transition(from: StrategyStatus, to: StrategyStatus) -> bool {
    use StrategyStatus::*;
    matches!(
        (from, to),
        (Draft, Active)
            | (Active, Paused)
            | (Paused, Active)
            | (Active, Stopped)
            | (Paused, Stopped)
            | (Stopped, Active)
            | (Draft | Active | Paused | Stopped, Archived)
    )
}

/// Winning share of closed trades in percent.
#[must_use]
pub fn win_rate(strategy: &Strategy) -> f64 {
    let closed = strategy.winning_trades + strategy.losing_trades;
    if closed == 0 {
        0.0
    } else {
        strategy.winning_trades as f64 / closed as f64 * 100.0
    }
}

/// Largest peak-to-trough fall of an equity curve starting at zero.
#[must_use]
pub fn max_drawdown(equity: &[Decimal]) -> Decimal {
    let mut peak = Decimal::ZERO;
    let mut worst = Decimal::ZERO;
    for value in equity {
        peak = peak.max(*value);
        worst = worst.max(peak - *value);
    }
    worst
}

/// Annualized Sharpe ratio `mean / std * sqrt(252)` of daily P&L.
///
/// Uses the sample standard deviation. `None` with fewer than two points or
/// zero deviation.
#[must_use]
pub fn sharpe_ratio(daily_pnl: &[f64]) -> Option<f64> {
    if daily_pnl.len() < 2 {
        return None;
    }
    let n = daily_pnl.len() as f64;
    let mean = daily_pnl.iter().sum::<f64>() / n;
    let variance = daily_pnl.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let std = variance.sqrt();
    if std == 0.0 || !std.is_finite() {
        return None;
    }
    Some(mean / std * TRADING_DAYS.sqrt())
}

/// Builds the record for `date` on top of the records of earlier days.
///
/// `history` must be sorted by date; records on or after `date` are ignored.
#[must_use]
pub fn compute_performance(
    strategy_id: Uuid,
    history: &[StrategyPerformance],
    date: NaiveDate,
    daily_pnl: Decimal,
    daily_trades: i32,
) -> StrategyPerformance {
    let earlier: Vec<&StrategyPerformance> = history.iter().filter(|r| r.date < date).collect();

    let (prev_pnl, prev_trades) = earlier
        .last()
        .map_or((Decimal::ZERO, 0), |r| (r.cumulative_pnl, r.cumulative_trades));
    let cumulative_pnl = prev_pnl + daily_pnl;

    let mut equity: Vec<Decimal> = earlier.iter().map(|r| r.cumulative_pnl).collect();
    equity.push(cumulative_pnl);

    let mut daily: Vec<f64> = earlier
        .iter()
        .map(|r| r.daily_pnl.to_f64().unwrap_or_default())
        .collect();
    daily.push(daily_pnl.to_f64().unwrap_or_default());

    let mut curve: Vec<serde_json::Value> = earlier
        .iter()
        .map(|r| json!({"date": r.date, "equity": r.cumulative_pnl.to_f64()}))
        .collect();
    curve.push(json!({"date": date, "equity": cumulative_pnl.to_f64()}));

    StrategyPerformance {
        id: Uuid::new_v4(),
        strategy_id,
        date,
        daily_pnl,
        cumulative_pnl,
        daily_trades,
        cumulative_trades: prev_trades + i64::from(daily_trades),
        max_drawdown: max_drawdown(&equity),
        sharpe_ratio: sharpe_ratio(&daily),
        equity_curve: serde_json::Value::Array(curve),
        created_at: Utc::now(),
    }
}

/// Folds a filled trade into the strategy counters.
pub fn apply_fill(strategy: &mut Strategy, realized_pnl: Option<Decimal>) {
    strategy.total_trades += 1;
    if let Some(pnl) = realized_pnl {
        if pnl > Decimal::ZERO {
            strategy.winning_trades += 1;
        } else if pnl < Decimal::ZERO {
            strategy.losing_trades += 1;
        }
        strategy.total_pnl += pnl;
    }
    strategy.updated_at = Utc::now();
}

fn validate_name(name: &str) -> Result<String, ApiError> {
    let name = name.trim();
    if name.is_empty() || name.chars().count() > 100 {
        return Err(ApiError::field("name", "must be 1-100 characters"));
    }
    Ok(name.to_string())
}

/// Strategy service.
pub struct StrategyService {
    store: Arc<Store>,
    notifier: N8nNotifier,
}

impl StrategyService {
    /// Creates the service.
    #[must_use]
    pub fn new(store: Arc<Store>, notifier: N8nNotifier) -> Self {
        Self { store, notifier }
    }

    /// Gets a strategy visible to `actor` (owner or admin).
    ///
    /// # Errors
    /// Returns `StrategyNotFound` when missing and `Forbidden` for other users' strategies.
    pub fn get(&self, actor: &User, id: Uuid) -> Result<Strategy, ApiError> {
        let strategy = self
            .store
            .strategy(id)
            .ok_or(ApiError::StrategyNotFound(id))?;
        if strategy.user_id != actor.id && actor.role != UserRole::Admin {
            return Err(ApiError::Forbidden(
                "strategy belongs to another user".to_string(),
            ));
        }
        Ok(strategy)
    }

    /// Lists the actor's strategies, optionally filtered by status.
    #[must_use]
    pub fn list(&self, actor: &User, status: Option<StrategyStatus>) -> Vec<Strategy> {
        self.store
            .strategies_for(actor.id)
            .into_iter()
            .filter(|s| status.is_none_or(|st| s.status == st))
            .collect()
    }

    /// Creates a draft strategy.
    ///
    /// # Errors
    /// Returns `Validation` for a bad name or a non-object config.
    pub async fn create(
        &self,
        actor: &User,
        request: CreateStrategyRequest,
    ) -> Result<Strategy, ApiError> {
        let name = validate_name(&request.name)?;
        if !request.config.is_object() {
            return Err(ApiError::field("config", "must be a JSON object"));
        }

        let now = Utc::now();
        let strategy = Strategy {
            id: Uuid::new_v4(),
            user_id: actor.id,
            name,
            description: request.description,
            strategy_type: request.strategy_type,
            config: request.config,
            parameters: request.parameters,
            status: StrategyStatus::Draft,
            total_trades: 0,
            winning_trades: 0,
            losing_trades: 0,
            total_pnl: Decimal::ZERO,
            n8n_workflow_id: request.n8n_workflow_id,
            created_at: now,
            updated_at: now,
        };
        self.store.save_strategy(strategy.clone()).await?;

        info!(strategy_id = %strategy.id, strategy_type = %strategy.strategy_type, "Strategy created");
        Ok(strategy)
    }

    /// Updates mutable fields.
    ///
    /// # Errors
    /// Returns `Conflict` for archived strategies and `Validation` for an
    /// invalid config on an active strategy.
    pub async fn update(
        &self,
        actor: &User,
        id: Uuid,
        request: UpdateStrategyRequest,
    ) -> Result<Strategy, ApiError> {
        let mut strategy = self.get(actor, id)?;
        if strategy.status == StrategyStatus::Archived {
            return Err(ApiError::Conflict(
                "archived strategies cannot be modified".to_string(),
            ));
        }

        if let Some(name) = request.name {
            strategy.name = validate_name(&name)?;
        }
        if let Some(description) = request.description {
            strategy.description = Some(description);
        }
        if let Some(config) = request.config {
            if strategy.status == StrategyStatus::Active {
                validate_config(strategy.strategy_type, &config)?;
            } else if !config.is_object() {
                return Err(ApiError::field("config", "must be a JSON object"));
            }
            strategy.config = config;
        }
        if let Some(parameters) = request.parameters {
            strategy.parameters = parameters;
        }
        if let Some(workflow) = request.n8n_workflow_id {
            strategy.n8n_workflow_id = Some(workflow).filter(|w| !w.is_empty());
        }

        strategy.updated_at = Utc::now();
        self.store.save_strategy(strategy.clone()).await?;
        Ok(strategy)
    }

    /// Moves a strategy to `target`.
    ///
    /// Returns the updated strategy and the previous status.
    ///
    /// # Errors
    /// Returns `Conflict` for a disallowed transition and `Validation` when
    /// activating with an incomplete config.
    pub async fn set_status(
        &self,
        actor: &User,
        id: Uuid,
        target: StrategyStatus,
    ) -> Result<(Strategy, StrategyStatus), ApiError> {
        let mut strategy = self.get(actor, id)?;
        let previous = strategy.status;

        if !can_transition(previous, target) {
            return Err(ApiError::Conflict(format!(
                "cannot change strategy status from {previous} to {target}"
            )));
        }
        if target == StrategyStatus::Active {
            validate_config(strategy.strategy_type, &strategy.config)?;
        }

        strategy.status = target;
        strategy.updated_at = Utc::now();
        self.store.save_strategy(strategy.clone()).await?;

        info!(strategy_id = %id, from = %previous, to = %target, "Strategy status changed");
        self.notifier
            .spawn_status_change(strategy.clone(), previous);
        Ok((strategy, previous))
    }

    /// Soft-deletes a strategy.
    ///
    /// # Errors
    /// Returns `Conflict` when already archived.
    pub async fn archive(&self, actor: &User, id: Uuid) -> Result<Strategy, ApiError> {
        self.set_status(actor, id, StrategyStatus::Archived)
            .await
            .map(|(strategy, _)| strategy)
    }

    /// Performance history, oldest first.
    ///
    /// # Errors
    /// Returns the errors of [`StrategyService::get`].
    pub fn performance(
        &self,
        actor: &User,
        id: Uuid,
    ) -> Result<Vec<StrategyPerformance>, ApiError> {
        let strategy = self.get(actor, id)?;
        Ok(self.store.performance(strategy.id))
    }

    /// Records the performance of a day, replacing an existing record of that day.
    ///
    /// # Errors
    /// Returns `Validation` for negative trade counts.
    pub async fn record_performance(
        &self,
        actor: &User,
        id: Uuid,
        request: RecordPerformanceRequest,
    ) -> Result<StrategyPerformance, ApiError> {
        let strategy = self.get(actor, id)?;
        if request.daily_trades < 0 {
            return Err(ApiError::field("daily_trades", "must not be negative"));
        }

        let history = self.store.performance(strategy.id);
        let record = compute_performance(
            strategy.id,
            &history,
            request.date,
            request.daily_pnl,
            request.daily_trades,
        );
        self.store.save_performance(record.clone()).await?;

        // Later days carry cumulative figures, rebuild them in date order.
        let mut history = self.store.performance(strategy.id);
        let later: Vec<StrategyPerformance> = history
            .iter()
            .filter(|r| r.date > request.date)
            .cloned()
            .collect();
        for stale in later {
            let mut rebuilt = compute_performance(
                strategy.id,
                &history,
                stale.date,
                stale.daily_pnl,
                stale.daily_trades,
            );
            rebuilt.id = stale.id;
            rebuilt.created_at = stale.created_at;
            self.store.save_performance(rebuilt.clone()).await?;
            if let Some(slot) = history.iter_mut().find(|r| r.date == rebuilt.date) {
                *slot = rebuilt;
            }
        }
        Ok(record)
    }

    /// Updates counters of the strategy behind a filled trade.
    ///
    /// # Errors
    /// Returns a database error if persistence fails.
    pub async fn record_fill(
        &self,
        strategy_id: Uuid,
        realized_pnl: Option<Decimal>,
    ) -> Result<(), ApiError> {
        let Some(mut strategy) = self.store.strategy(strategy_id) else {
            return Ok(());
        };
        apply_fill(&mut strategy, realized_pnl);
        self.store.save_strategy(strategy).await
    }
}
