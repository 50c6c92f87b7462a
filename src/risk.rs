//! Pre-trade risk checks, risk alerts and exposure metrics.

use crate::config::RiskDefaults;
use crate::db::{AlertSeverity, Position, PositionStatus, RiskAlert, RiskSettings, TradeSide, User, UserRole};
use crate::error::{ApiError, FieldError};
use crate::models::UpdateRiskSettingsRequest;
use crate::store::Store;
use crate::stream::{StreamEvent, StreamHub};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

/// Alert type raised when an order fails the risk check.
pub const ORDER_REJECTED_ALERT: &str = "order_rejected";

/// Order as seen by the risk check.
#[derive(Debug, Clone)]
pub struct OrderCheck<'a> {
    /// Symbol.
    pub symbol: &'a str,
    /// Direction.
    pub side: TradeSide,
    /// Quantity (positive).
    pub quantity: Decimal,
    /// Resolved execution price.
    pub price: Decimal,
}

impl OrderCheck<'_> {
    /// Quantity with the sign of the side.
    #[must_use]
    pub fn signed_quantity(&self) -> Decimal {
        match self.side {
            TradeSide::Buy => self.quantity,
            TradeSide::Sell => -self.quantity,
        }
    }

    /// Notional value.
    ///
    /// # Errors
    /// Returns `Validation` when the value does not fit a decimal.
    pub fn value(&self) -> Result<Decimal, ApiError> {
        self.quantity
            .checked_mul(self.price)
            .ok_or_else(too_large)
    }
}

fn too_large() -> ApiError {
    ApiError::field("quantity", "order is too large")
}

/// Checks an order against the user's limits and returns every violation.
///
/// `positions` are the user's positions, `daily_pnl` the realized P&L of
/// the current day. A zero limit disables that check.
///
/// # Errors
/// Returns `Validation` when the order value or resulting position overflows.
pub fn check_order(
    settings: &RiskSettings,
    order: &OrderCheck<'_>,
    positions: &[Position],
    daily_pnl: Decimal,
) -> Result<Vec<String>, ApiError> {
    let mut violations = Vec::new();

    if !settings.trading_enabled {
        violations.push("trading is disabled for this account".to_string());
    }

    let value = order.value()?;
    if settings.max_order_value > Decimal::ZERO && value > settings.max_order_value {
        violations.push(format!(
            "order value {} exceeds limit {}",
            value.normalize(),
            settings.max_order_value.normalize()
        ));
    }

    let open: Vec<&Position> = positions
        .iter()
        .filter(|p| p.status == PositionStatus::Open)
        .collect();
    let current = open
        .iter()
        .find(|p| p.symbol == order.symbol)
        .map_or(Decimal::ZERO, |p| p.quantity);

    let resulting = current
        .checked_add(order.signed_quantity())
        .ok_or_else(too_large)?;
    if settings.max_position_size > Decimal::ZERO && resulting.abs() > settings.max_position_size {
        violations.push(format!(
            "resulting position {} in {} exceeds limit {}",
            resulting.normalize(),
            order.symbol,
            settings.max_position_size.normalize()
        ));
    }

    if current.is_zero()
        && settings.max_open_positions > 0
        && open.len() >= settings.max_open_positions as usize
    {
        violations.push(format!(
            "open position limit of {} reached",
            settings.max_open_positions
        ));
    }

    if settings.max_daily_loss > Decimal::ZERO && daily_pnl <= -settings.max_daily_loss {
        violations.push(format!(
            "daily loss limit {} reached (realized {})",
            settings.max_daily_loss.normalize(),
            daily_pnl.normalize()
        ));
    }

    Ok(violations)
}

/// Validates a settings update. All problems are reported together.
///
/// # Errors
/// Returns `Validation` for negative limits and percentages outside `0..=100`.
pub fn validate_update(request: &UpdateRiskSettingsRequest) -> Result<(), ApiError> {
    let mut errors = Vec::new();
    let limits = [
        ("max_position_size", request.max_position_size),
        ("max_order_value", request.max_order_value),
        ("max_daily_loss", request.max_daily_loss),
    ];
    for (field, value) in limits {
        if value.is_some_and(|v| v < Decimal::ZERO) {
            errors.push(FieldError::new(field, "must not be negative"));
        }
    }
    if request.max_open_positions.is_some_and(|v| v < 0) {
        errors.push(FieldError::new("max_open_positions", "must not be negative"));
    }

    let hundred = Decimal::ONE_HUNDRED;
    let percentages = [
        ("max_drawdown_pct", request.max_drawdown_pct),
        ("stop_loss_pct", request.stop_loss_pct),
    ];
    for (field, value) in percentages {
        if value.is_some_and(|v| v < Decimal::ZERO || v > hundred) {
            errors.push(FieldError::new(field, "must be between 0 and 100"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ApiError::Validation(errors))
    }
}

/// Applies the present fields of an update.
pub fn apply_update(settings: &mut RiskSettings, request: &UpdateRiskSettingsRequest) {
    if let Some(v) = request.max_position_size {
        settings.max_position_size = v;
    }
    if let Some(v) = request.max_order_value {
        settings.max_order_value = v;
    }
    if let Some(v) = request.max_daily_loss {
        settings.max_daily_loss = v;
    }
    if let Some(v) = request.max_open_positions {
        settings.max_open_positions = v;
    }
    if let Some(v) = request.max_drawdown_pct {
        settings.max_drawdown_pct = v;
    }
    if let Some(v) = request.stop_loss_pct {
        settings.stop_loss_pct = v;
    }
    if let Some(v) = request.trading_enabled {
        settings.trading_enabled = v;
    }
    settings.updated_at = Utc::now();
}

/// Exposure snapshot of a user.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RiskMetrics {
    /// User.
    pub user_id: Uuid,
    /// Sum of absolute position values.
    pub gross_exposure: Decimal,
    /// Signed sum of position values.
    pub net_exposure: Decimal,
    /// Number of open positions.
    pub open_positions: usize,
    /// Realized P&L of the current day.
    pub daily_realized_pnl: Decimal,
    /// Unrealized P&L of open positions.
    pub unrealized_pnl: Decimal,
    /// Largest absolute position value.
    pub largest_position_value: Decimal,
    /// Share of the daily loss limit used, in percent.
    pub daily_loss_utilization_pct: f64,
    /// Computation time.
    pub computed_at: DateTime<Utc>,
}

/// Builds metrics from positions marked at `mark` (average price when unknown).
pub fn compute_metrics<F>(
    settings: &RiskSettings,
    positions: &[Position],
    daily_pnl: Decimal,
    mark: F,
) -> RiskMetrics
where
    F: Fn(&str) -> Option<Decimal>,
{
    let mut gross = Decimal::ZERO;
    let mut net = Decimal::ZERO;
    let mut unrealized = Decimal::ZERO;
    let mut largest = Decimal::ZERO;
    let mut open_positions = 0;

    for position in positions.iter().filter(|p| p.status == PositionStatus::Open) {
        open_positions += 1;
        let price = mark(&position.symbol).unwrap_or(position.average_price);
        let value = position.quantity * price;
        gross += value.abs();
        net += value;
        largest = largest.max(value.abs());
        unrealized += unrealized_pnl(position, price);
    }

    let daily_loss_utilization_pct =
        if settings.max_daily_loss > Decimal::ZERO && daily_pnl < Decimal::ZERO {
            ((-daily_pnl) / settings.max_daily_loss * Decimal::ONE_HUNDRED)
                .to_f64()
                .unwrap_or(0.0)
        } else {
            0.0
        };

    RiskMetrics {
        user_id: settings.user_id,
        gross_exposure: gross,
        net_exposure: net,
        open_positions,
        daily_realized_pnl: daily_pnl,
        unrealized_pnl: unrealized,
        largest_position_value: largest,
        daily_loss_utilization_pct,
        computed_at: Utc::now(),
    }
}

/// Unrealized P&L of a position at `price`.
#[must_use]
pub fn unrealized_pnl(position: &Position, price: Decimal) -> Decimal {
    if position.status != PositionStatus::Open {
        return Decimal::ZERO;
    }
    (price - position.average_price) * position.quantity
}

/// Converts a tick price to a money amount.
#[must_use]
pub fn price_decimal(price: f64) -> Option<Decimal> {
    Decimal::from_f64(price).map(|d| d.round_dp(2))
}

fn default_settings(user_id: Uuid, defaults: &RiskDefaults) -> RiskSettings {
    let money = |v: f64| Decimal::from_f64(v).unwrap_or_default().round_dp(2);
    RiskSettings {
        user_id,
        max_position_size: money(defaults.max_position_size),
        max_order_value: money(defaults.max_order_value),
        max_daily_loss: money(defaults.max_daily_loss),
        max_open_positions: defaults.max_open_positions,
        max_drawdown_pct: money(defaults.max_drawdown_pct),
        stop_loss_pct: money(defaults.stop_loss_pct),
        trading_enabled: true,
        updated_at: Utc::now(),
    }
}

/// Risk service.
pub struct RiskService {
    store: Arc<Store>,
    hub: Arc<StreamHub>,
    defaults: RiskDefaults,
}

impl RiskService {
    /// Creates the service.
    #[must_use]
    pub fn new(store: Arc<Store>, hub: Arc<StreamHub>, defaults: RiskDefaults) -> Self {
        Self {
            store,
            hub,
            defaults,
        }
    }

    /// Settings of a user, the configured defaults when none are stored.
    #[must_use]
    pub fn settings(&self, user_id: Uuid) -> RiskSettings {
        self.store
            .risk_settings(user_id)
            .unwrap_or_else(|| default_settings(user_id, &self.defaults))
    }

    /// Updates the present fields of a user's settings.
    ///
    /// # Errors
    /// Returns `Validation` for out-of-range values.
    pub async fn update(
        &self,
        user_id: Uuid,
        request: &UpdateRiskSettingsRequest,
    ) -> Result<RiskSettings, ApiError> {
        validate_update(request)?;
        let mut settings = self.settings(user_id);
        apply_update(&mut settings, request);
        self.store.save_risk_settings(settings.clone()).await?;
        info!(user_id = %user_id, trading_enabled = settings.trading_enabled, "Risk settings updated");
        Ok(settings)
    }

    /// Realized P&L of trades filled today (UTC).
    #[must_use]
    pub fn daily_pnl(&self, user_id: Uuid) -> Decimal {
        let start = Utc::now()
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|d| d.and_utc())
            .unwrap_or_else(Utc::now);
        self.store
            .trades_for(user_id)
            .into_iter()
            .filter(|t| t.filled_at.is_some_and(|at| at >= start))
            .filter_map(|t| t.realized_pnl)
            .sum()
    }

    /// Runs the pre-trade check for a user.
    ///
    /// # Errors
    /// Returns the errors of [`check_order`].
    pub fn check(&self, user_id: Uuid, order: &OrderCheck<'_>) -> Result<Vec<String>, ApiError> {
        check_order(
            &self.settings(user_id),
            order,
            &self.store.positions_for(user_id),
            self.daily_pnl(user_id),
        )
    }

    /// Alerts of a user, optionally only (un)acknowledged ones.
    #[must_use]
    pub fn alerts(&self, user_id: Uuid, acknowledged: Option<bool>) -> Vec<RiskAlert> {
        self.store
            .risk_alerts_for(user_id)
            .into_iter()
            .filter(|a| acknowledged.is_none_or(|ack| a.acknowledged == ack))
            .collect()
    }

    /// Acknowledges an alert. Acknowledging twice keeps the first timestamp.
    ///
    /// # Errors
    /// Returns `NotFound` for unknown ids and `Forbidden` for other users' alerts.
    pub async fn acknowledge(&self, actor: &User, id: Uuid) -> Result<RiskAlert, ApiError> {
        let mut alert = self
            .store
            .risk_alert(id)
            .ok_or_else(|| ApiError::NotFound(format!("risk alert {id}")))?;
        if alert.user_id != actor.id && actor.role != UserRole::Admin {
            return Err(ApiError::Forbidden("alert belongs to another user".to_string()));
        }
        if !alert.acknowledged {
            alert.acknowledged = true;
            alert.acknowledged_at = Some(Utc::now());
            self.store.save_risk_alert(alert.clone()).await?;
        }
        Ok(alert)
    }

    /// Stores an alert and publishes it on the alerts channel.
    ///
    /// # Errors
    /// Returns a database error if persistence fails.
    pub async fn raise_alert(
        &self,
        user_id: Uuid,
        alert_type: &str,
        severity: AlertSeverity,
        message: String,
    ) -> Result<RiskAlert, ApiError> {
        let alert = RiskAlert {
            id: Uuid::new_v4(),
            user_id,
            alert_type: alert_type.to_string(),
            severity,
            message,
            acknowledged: false,
            created_at: Utc::now(),
            acknowledged_at: None,
        };
        self.store.save_risk_alert(alert.clone()).await?;
        warn!(user_id = %user_id, alert_type, severity = %severity, message = %alert.message, "Risk alert raised");
        self.hub.publish(StreamEvent::Alert(alert.clone()));
        Ok(alert)
    }

    /// Current exposure metrics of a user.
    #[must_use]
    pub fn metrics(&self, user_id: Uuid) -> RiskMetrics {
        compute_metrics(
            &self.settings(user_id),
            &self.store.positions_for(user_id),
            self.daily_pnl(user_id),
            |symbol| self.store.last_price(symbol).and_then(price_decimal),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{store, tick, user};
    use rust_decimal_macros::dec;

    fn settings() -> RiskSettings {
        RiskSettings {
            user_id: Uuid::new_v4(),
            max_position_size: dec!(100),
            max_order_value: dec!(50000),
            max_daily_loss: dec!(1000),
            max_open_positions: 2,
            max_drawdown_pct: dec!(20),
            stop_loss_pct: dec!(2),
            trading_enabled: true,
            updated_at: Utc::now(),
        }
    }

    fn position(symbol: &str, quantity: Decimal, average_price: Decimal) -> Position {
        let now = Utc::now();
        Position {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            strategy_id: None,
            symbol: symbol.to_string(),
            quantity,
            average_price,
            realized_pnl: Decimal::ZERO,
            status: PositionStatus::Open,
            opened_at: now,
            updated_at: now,
            closed_at: None,
        }
    }

    fn order(symbol: &str, side: TradeSide, quantity: Decimal, price: Decimal) -> OrderCheck<'_> {
        OrderCheck {
            symbol,
            side,
            quantity,
            price,
        }
    }

    #[test]
    fn test_clean_order_passes() {
        let violations = check_order(
            &settings(),
            &order("INFY", TradeSide::Buy, dec!(10), dec!(1500)),
            &[],
            Decimal::ZERO,
        )
        .unwrap();
        assert!(violations.is_empty(), "{violations:?}");
    }

    #[test]
    fn test_every_violation_is_reported() {
        let mut s = settings();
        s.trading_enabled = false;
        let positions = [
            position("TCS", dec!(5), dec!(3000)),
            position("HDFC", dec!(-5), dec!(1600)),
        ];
        let violations = check_order(
            &s,
            &order("INFY", TradeSide::Buy, dec!(150), dec!(1500)),
            &positions,
            dec!(-1000),
        )
        .unwrap();
        assert_eq!(violations.len(), 5, "{violations:?}");
        assert!(violations[0].contains("disabled"));
        assert!(violations[1].contains("order value 225000"));
        assert!(violations[2].contains("resulting position 150"));
        assert!(violations[3].contains("open position limit of 2"));
        assert!(violations[4].contains("daily loss limit 1000"));
    }

    #[test]
    fn test_reducing_order_uses_resulting_position() {
        let positions = [position("INFY", dec!(90), dec!(10))];
        // 90 - 150 = -60 stays inside the 100 limit.
        let reduce = check_order(
            &settings(),
            &order("INFY", TradeSide::Sell, dec!(150), dec!(10)),
            &positions,
            Decimal::ZERO,
        )
        .unwrap();
        assert!(reduce.is_empty(), "{reduce:?}");

        let add = check_order(
            &settings(),
            &order("INFY", TradeSide::Buy, dec!(20), dec!(10)),
            &positions,
            Decimal::ZERO,
        )
        .unwrap();
        assert_eq!(add.len(), 1);
    }

    #[test]
    fn test_existing_symbol_ignores_open_position_limit() {
        let positions = [
            position("TCS", dec!(5), dec!(3000)),
            position("INFY", dec!(5), dec!(1500)),
        ];
        let violations = check_order(
            &settings(),
            &order("INFY", TradeSide::Buy, dec!(5), dec!(1500)),
            &positions,
            Decimal::ZERO,
        )
        .unwrap();
        assert!(violations.is_empty(), "{violations:?}");
    }

    #[test]
    fn test_zero_limits_disable_checks() {
        let mut s = settings();
        s.max_order_value = Decimal::ZERO;
        s.max_position_size = Decimal::ZERO;
        s.max_open_positions = 0;
        s.max_daily_loss = Decimal::ZERO;
        let violations = check_order(
            &s,
            &order("INFY", TradeSide::Buy, dec!(1000000), dec!(1500)),
            &[position("TCS", dec!(5), dec!(3000))],
            dec!(-99999),
        )
        .unwrap();
        assert!(violations.is_empty(), "{violations:?}");
    }

    #[test]
    fn test_oversized_order_is_a_validation_error() {
        let err = check_order(
            &settings(),
            &order("INFY", TradeSide::Buy, dec!(100000000000000000000), dec!(10000000000)),
            &[],
            Decimal::ZERO,
        )
        .unwrap_err();
        assert!(matches!(err, ApiError::Validation(ref fields) if fields[0].field == "quantity"));

        let positions = [position("INFY", Decimal::MAX, dec!(1))];
        let err = check_order(
            &settings(),
            &order("INFY", TradeSide::Buy, dec!(1), dec!(0.0001)),
            &positions,
            Decimal::ZERO,
        )
        .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[test]
    fn test_validate_update_collects_errors() {
        let request = UpdateRiskSettingsRequest {
            max_order_value: Some(dec!(-1)),
            max_open_positions: Some(-2),
            stop_loss_pct: Some(dec!(101)),
            max_drawdown_pct: Some(dec!(100)),
            ..Default::default()
        };
        match validate_update(&request).unwrap_err() {
            ApiError::Validation(fields) => {
                let names: Vec<&str> = fields.iter().map(|f| f.field.as_str()).collect();
                assert_eq!(names, vec!["max_order_value", "max_open_positions", "stop_loss_pct"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_metrics_mark_to_market() {
        let s = settings();
        let mut closed = position("SBIN", dec!(0), dec!(800));
        closed.status = PositionStatus::Closed;
        let positions = [
            position("INFY", dec!(10), dec!(1500)),
            position("TCS", dec!(-5), dec!(3000)),
            closed,
        ];
        let metrics = compute_metrics(&s, &positions, dec!(-250), |symbol| match symbol {
            "INFY" => Some(dec!(1510)),
            _ => None,
        });

        assert_eq!(metrics.open_positions, 2);
        // 15100 + 15000 gross, 15100 - 15000 net.
        assert_eq!(metrics.gross_exposure, dec!(30100));
        assert_eq!(metrics.net_exposure, dec!(100));
        assert_eq!(metrics.largest_position_value, dec!(15100));
        assert_eq!(metrics.unrealized_pnl, dec!(100));
        assert!((metrics.daily_loss_utilization_pct - 25.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_service_update_and_alerts() {
        let store = store();
        let hub = Arc::new(StreamHub::new(16, 4));
        let service = RiskService::new(Arc::clone(&store), Arc::clone(&hub), RiskDefaults::default());
        let owner = user("alice");
        let other = user("bob");

        let fallback = service.settings(owner.id);
        assert_eq!(fallback.max_open_positions, 10);

        let updated = service
            .update(
                owner.id,
                &UpdateRiskSettingsRequest {
                    trading_enabled: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(!updated.trading_enabled);
        assert!(!service.settings(owner.id).trading_enabled);

        let mut rx = hub.subscribe();
        let alert = service
            .raise_alert(owner.id, ORDER_REJECTED_ALERT, AlertSeverity::Warning, "limit".to_string())
            .await
            .unwrap();
        match rx.recv().await.unwrap() {
            StreamEvent::Alert(a) => assert_eq!(a.id, alert.id),
            other => panic!("unexpected event: {other:?}"),
        }

        assert_eq!(service.alerts(owner.id, Some(false)).len(), 1);
        assert!(matches!(
            service.acknowledge(&other, alert.id).await,
            Err(ApiError::Forbidden(_))
        ));
        let acked = service.acknowledge(&owner, alert.id).await.unwrap();
        assert!(acked.acknowledged && acked.acknowledged_at.is_some());
        assert!(service.alerts(owner.id, Some(false)).is_empty());
        assert_eq!(service.alerts(owner.id, Some(true)).len(), 1);
        assert!(matches!(
            service.acknowledge(&owner, Uuid::new_v4()).await,
            Err(ApiError::NotFound(_))
        ));
    }

    #[test]
    fn test_service_metrics_use_last_price() {
        let store = store();
        store.record_tick(&tick("INFY", 1510.0));
        let hub = Arc::new(StreamHub::new(16, 4));
        let service = RiskService::new(Arc::clone(&store), hub, RiskDefaults::default());
        let metrics = service.metrics(Uuid::new_v4());
        assert_eq!(metrics.open_positions, 0);
        assert_eq!(metrics.gross_exposure, Decimal::ZERO);
        assert_eq!(price_decimal(1510.0), Some(dec!(1510)));
    }
}
