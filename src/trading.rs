//! Order placement, fills and position accounting.

use crate::db::{
    AlertSeverity, OrderType, Position, PositionStatus, Trade, TradeSide, TradeStatus, User,
};
use crate::error::ApiError;
use crate::models::{PlaceTradeRequest, PositionView, TradeListQuery, clamp_limit};
use crate::risk::{ORDER_REJECTED_ALERT, OrderCheck, RiskService, price_decimal, unrealized_pnl};
use crate::settings::{SettingsStore, TRADING_ENABLED};
use crate::store::Store;
use crate::strategy::StrategyService;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

#[cfg(test)]
mod tests;

/// Result of folding a fill into a position.
#[derive(Debug, Clone)]
pub struct FillOutcome {
    /// Updated or newly opened position.
    pub position: Position,
    /// P&L realized by the reducing part of the fill, if any.
    pub realized_pnl: Option<Decimal>,
}

/// Folds a fill of `signed_qty` at `price` into `existing`.
///
/// Increasing fills move the average price, reducing fills realize P&L
/// against it. A fill crossing zero closes the old side and opens the rest
/// at `price`. Flat positions are marked closed.
///
/// # Errors
/// Returns `Validation` when the resulting position or P&L overflows.
pub fn apply_fill(
    existing: Option<Position>,
    user_id: Uuid,
    strategy_id: Option<Uuid>,
    symbol: &str,
    signed_qty: Decimal,
    price: Decimal,
    now: DateTime<Utc>,
) -> Result<FillOutcome, ApiError> {
    let Some(mut position) = existing.filter(|p| p.status == PositionStatus::Open && !p.quantity.is_zero())
    else {
        return Ok(FillOutcome {
            position: Position {
                id: Uuid::new_v4(),
                user_id,
                strategy_id,
                symbol: symbol.to_string(),
                quantity: signed_qty,
                average_price: price,
                realized_pnl: Decimal::ZERO,
                status: PositionStatus::Open,
                opened_at: now,
                updated_at: now,
                closed_at: None,
            },
            realized_pnl: None,
        });
    };

    let current = position.quantity;
    let resulting = current.checked_add(signed_qty).ok_or_else(too_large)?;
    let same_direction = current.is_sign_positive() == signed_qty.is_sign_positive();

    let realized_pnl = if same_direction {
        let total = current.abs().checked_add(signed_qty.abs()).ok_or_else(too_large)?;
        let held = current.abs().checked_mul(position.average_price).ok_or_else(too_large)?;
        let added = signed_qty.abs().checked_mul(price).ok_or_else(too_large)?;
        let cost = held.checked_add(added).ok_or_else(too_large)?;
        position.average_price = (cost / total).round_dp(4);
        None
    } else {
        let closed = current.abs().min(signed_qty.abs());
        let direction = if current.is_sign_positive() {
            Decimal::ONE
        } else {
            Decimal::NEGATIVE_ONE
        };
        let pnl = (price - position.average_price)
            .checked_mul(closed)
            .ok_or_else(too_large)?
            * direction;
        position.realized_pnl = position.realized_pnl.checked_add(pnl).ok_or_else(too_large)?;
        if !resulting.is_zero() && resulting.is_sign_positive() != current.is_sign_positive() {
            position.average_price = price;
        }
        Some(pnl)
    };

    position.quantity = resulting;
    position.updated_at = now;
    if resulting.is_zero() {
        position.status = PositionStatus::Closed;
        position.closed_at = Some(now);
    }

    Ok(FillOutcome {
        position,
        realized_pnl,
    })
}

fn too_large() -> ApiError {
    ApiError::field("quantity", "position is too large")
}

/// Trading service.
pub struct TradingService {
    store: Arc<Store>,
    risk: Arc<RiskService>,
    strategies: Arc<StrategyService>,
    settings: Arc<SettingsStore>,
    // Serializes fills per user so position updates do not interleave.
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl TradingService {
    /// Creates the service.
    #[must_use]
    pub fn new(
        store: Arc<Store>,
        risk: Arc<RiskService>,
        strategies: Arc<StrategyService>,
        settings: Arc<SettingsStore>,
    ) -> Self {
        Self {
            store,
            risk,
            strategies,
            settings,
            locks: DashMap::new(),
        }
    }

    fn user_lock(&self, user_id: Uuid) -> Arc<Mutex<()>> {
        Arc::clone(
            self.locks
                .entry(user_id)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        )
    }

    fn resolve_price(&self, symbol: &str, request: &PlaceTradeRequest) -> Result<Decimal, ApiError> {
        match request.order_type {
            OrderType::Market => self
                .store
                .last_price(symbol)
                .and_then(price_decimal)
                .ok_or_else(|| {
                    ApiError::InvalidRequest(format!("no market price available for {symbol}"))
                }),
            OrderType::Limit | OrderType::StopLoss | OrderType::StopLossLimit => match request.price {
                Some(price) if price > Decimal::ZERO => Ok(price),
                Some(_) => Err(ApiError::field("price", "must be positive")),
                None => Err(ApiError::field(
                    "price",
                    format!("required for {} orders", request.order_type),
                )),
            },
        }
    }

    /// Places an order for `actor`.
    ///
    /// Orders that pass the risk check fill immediately at the resolved
    /// price. Rejected orders are stored with status `rejected` and raise a
    /// risk alert.
    ///
    /// # Errors
    /// Returns `Validation` for bad quantity or price, `InvalidRequest` for
    /// market orders without a price, `RiskRejected` with the violations.
    pub async fn place_trade(&self, actor: &User, request: PlaceTradeRequest) -> Result<Trade, ApiError> {
        let symbol = request.symbol.trim().to_uppercase();
        if symbol.is_empty() {
            return Err(ApiError::field("symbol", "must not be empty"));
        }
        if request.quantity <= Decimal::ZERO {
            return Err(ApiError::field("quantity", "must be positive"));
        }
        if let Some(strategy_id) = request.strategy_id {
            self.strategies.get(actor, strategy_id)?;
        }
        let price = self.resolve_price(&symbol, &request)?;

        let lock = self.user_lock(actor.id);
        let _guard = lock.lock().await;

        let order = OrderCheck {
            symbol: &symbol,
            side: request.side,
            quantity: request.quantity,
            price,
        };
        let mut violations = Vec::new();
        if !self.settings.bool_or(TRADING_ENABLED, true) {
            violations.push("trading is disabled platform-wide".to_string());
        }
        violations.extend(self.risk.check(actor.id, &order)?);

        let now = Utc::now();
        let mut trade = Trade {
            id: Uuid::new_v4(),
            user_id: actor.id,
            strategy_id: request.strategy_id,
            symbol: symbol.clone(),
            side: request.side,
            order_type: request.order_type,
            status: TradeStatus::Filled,
            quantity: request.quantity,
            price: request.price,
            fill_price: None,
            realized_pnl: None,
            rejection_reason: None,
            created_at: now,
            filled_at: None,
        };

        if !violations.is_empty() {
            trade.status = TradeStatus::Rejected;
            trade.rejection_reason = Some(violations.join("; "));
            self.store.insert_trade(trade.clone()).await?;
            self.risk
                .raise_alert(
                    actor.id,
                    ORDER_REJECTED_ALERT,
                    AlertSeverity::Warning,
                    format!(
                        "{} {} {} rejected: {}",
                        trade.side,
                        trade.quantity.normalize(),
                        symbol,
                        violations.join("; ")
                    ),
                )
                .await?;
            info!(user_id = %actor.id, trade_id = %trade.id, symbol = %symbol, "Order rejected by risk checks");
            return Err(ApiError::RiskRejected(violations));
        }

        let outcome = apply_fill(
            self.store.open_position(actor.id, &symbol),
            actor.id,
            request.strategy_id,
            &symbol,
            order.signed_quantity(),
            price,
            now,
        )?;
        trade.fill_price = Some(price);
        trade.realized_pnl = outcome.realized_pnl;
        trade.filled_at = Some(now);

        self.store.insert_trade(trade.clone()).await?;
        self.store.save_position(outcome.position).await?;
        if let Some(strategy_id) = trade.strategy_id {
            self.strategies
                .record_fill(strategy_id, trade.realized_pnl)
                .await?;
        }

        info!(
            user_id = %actor.id,
            trade_id = %trade.id,
            symbol = %symbol,
            side = %trade.side,
            quantity = %trade.quantity,
            price = %price,
            "Order filled"
        );
        Ok(trade)
    }

    /// Trades of `actor`, newest first.
    #[must_use]
    pub fn list_trades(&self, actor: &User, query: &TradeListQuery) -> Vec<Trade> {
        let symbol = query.symbol.as_ref().map(|s| s.trim().to_uppercase());
        self.store
            .trades_for(actor.id)
            .into_iter()
            .filter(|t| symbol.as_ref().is_none_or(|s| &t.symbol == s))
            .filter(|t| query.strategy_id.is_none_or(|id| t.strategy_id == Some(id)))
            .filter(|t| query.status.is_none_or(|st| t.status == st))
            .take(clamp_limit(query.limit))
            .collect()
    }

    /// Positions of `actor` marked to the latest tick.
    #[must_use]
    pub fn list_positions(&self, actor: &User, status: Option<PositionStatus>) -> Vec<PositionView> {
        self.store
            .positions_for(actor.id)
            .into_iter()
            .filter(|p| status.is_none_or(|st| p.status == st))
            .map(|position| {
                let last_price = self.store.last_price(&position.symbol).and_then(price_decimal);
                let unrealized_pnl = last_price.map_or(Decimal::ZERO, |price| unrealized_pnl(&position, price));
                PositionView {
                    position,
                    last_price,
                    unrealized_pnl,
                }
            })
            .collect()
    }

    /// Builds the offsetting market order that closes a position.
    ///
    /// # Errors
    /// Returns `NotFound` for unknown or foreign positions and `Conflict`
    /// when already closed.
    pub fn closing_order(&self, actor: &User, id: Uuid) -> Result<PlaceTradeRequest, ApiError> {
        let position = self
            .store
            .position(id)
            .filter(|p| p.user_id == actor.id)
            .ok_or_else(|| ApiError::NotFound(format!("position {id}")))?;
        if position.status == PositionStatus::Closed || position.quantity.is_zero() {
            return Err(ApiError::Conflict(format!("position {id} is already closed")));
        }

        let side = if position.quantity.is_sign_positive() {
            TradeSide::Sell
        } else {
            TradeSide::Buy
        };
        debug!(position_id = %id, side = %side, "Closing position");
        Ok(PlaceTradeRequest {
            symbol: position.symbol,
            side,
            order_type: OrderType::Market,
            quantity: position.quantity.abs(),
            price: None,
            strategy_id: position.strategy_id,
        })
    }

    /// Closes an open position with an offsetting market order.
    ///
    /// # Errors
    /// Returns the errors of [`TradingService::closing_order`] and
    /// [`TradingService::place_trade`].
    pub async fn close_position(&self, actor: &User, id: Uuid) -> Result<Trade, ApiError> {
        let request = self.closing_order(actor, id)?;
        self.place_trade(actor, request).await
    }
}
