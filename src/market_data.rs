//! Symbol registry, live quotes, tick history, OHLC bars and subscriptions.

use crate::config::SymbolConfig;
use crate::db::{MarketDataSubscription, QuoteData, Symbol, TickData, User};
use crate::error::{ApiError, FieldError};
use crate::models::{
    CreateSubscriptionRequest, CreateSymbolRequest, OhlcInterval, OhlcQuery, OhlcResponse,
    clamp_limit,
};
use crate::ohlc::OhlcAggregator;
use crate::store::Store;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Default number of OHLC bars returned.
const DEFAULT_OHLC_LIMIT: usize = 500;

fn normalize_symbol(symbol: &str) -> Result<String, ApiError> {
    let symbol = symbol.trim().to_uppercase();
    let valid = !symbol.is_empty()
        && symbol.len() <= 32
        && symbol
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '&' | '.'));
    if valid {
        Ok(symbol)
    } else {
        Err(ApiError::field(
            "symbol",
            "must be 1-32 letters, digits or - _ & .",
        ))
    }
}

/// Market data service.
pub struct MarketDataService {
    store: Arc<Store>,
    ohlc: Arc<OhlcAggregator>,
}

impl MarketDataService {
    /// Creates the service.
    #[must_use]
    pub fn new(store: Arc<Store>, ohlc: Arc<OhlcAggregator>) -> Self {
        Self { store, ohlc }
    }

    /// Registers the symbols of the market feed. Existing symbols are kept.
    ///
    /// # Errors
    /// Returns a database error if persistence fails.
    pub async fn register_configured(&self, symbols: &[SymbolConfig]) -> Result<usize, ApiError> {
        let mut added = 0;
        for config in symbols {
            let symbol = Symbol {
                id: Uuid::new_v4(),
                symbol: config.symbol.to_uppercase(),
                name: config.name.clone(),
                exchange: config.exchange.clone(),
                instrument_type: config.instrument_type,
                lot_size: config.lot_size as i32,
                tick_size: Decimal::from_f64(config.tick_size)
                    .unwrap_or_default()
                    .round_dp(4),
                is_active: true,
                created_at: Utc::now(),
            };
            if self.store.insert_symbol(symbol).await? {
                added += 1;
            }
        }
        info!(added, configured = symbols.len(), "Registered feed symbols");
        Ok(added)
    }

    /// Registers a symbol.
    ///
    /// # Errors
    /// Returns `Validation` for malformed fields and `Conflict` when it exists.
    pub async fn create_symbol(&self, request: CreateSymbolRequest) -> Result<Symbol, ApiError> {
        let mut errors = Vec::new();
        let symbol = normalize_symbol(&request.symbol).ok();
        if symbol.is_none() {
            errors.push(FieldError::new("symbol", "must be 1-32 letters, digits or - _ & ."));
        }
        if request.name.trim().is_empty() {
            errors.push(FieldError::new("name", "must not be empty"));
        }
        if request.lot_size <= 0 {
            errors.push(FieldError::new("lot_size", "must be positive"));
        }
        if request.tick_size <= Decimal::ZERO {
            errors.push(FieldError::new("tick_size", "must be positive"));
        }
        let Some(symbol) = symbol.filter(|_| errors.is_empty()) else {
            return Err(ApiError::Validation(errors));
        };

        let record = Symbol {
            id: Uuid::new_v4(),
            symbol: symbol.clone(),
            name: request.name.trim().to_string(),
            exchange: request.exchange.trim().to_uppercase(),
            instrument_type: request.instrument_type,
            lot_size: request.lot_size,
            tick_size: request.tick_size,
            is_active: true,
            created_at: Utc::now(),
        };
        if !self.store.insert_symbol(record.clone()).await? {
            return Err(ApiError::Conflict(format!("symbol {symbol} already exists")));
        }
        info!(symbol = %symbol, "Symbol registered");
        Ok(record)
    }

    /// All symbols.
    #[must_use]
    pub fn symbols(&self) -> Vec<Symbol> {
        self.store.symbols()
    }

    /// Gets a symbol.
    ///
    /// # Errors
    /// Returns `SymbolNotFound` when unknown.
    pub fn symbol(&self, symbol: &str) -> Result<Symbol, ApiError> {
        let symbol = symbol.trim().to_uppercase();
        self.store
            .symbol(&symbol)
            .ok_or(ApiError::SymbolNotFound(symbol))
    }

    /// Latest quote of a symbol.
    ///
    /// # Errors
    /// Returns `SymbolNotFound` when no tick has been seen.
    pub fn quote(&self, symbol: &str) -> Result<QuoteData, ApiError> {
        let symbol = symbol.trim().to_uppercase();
        self.store
            .quote(&symbol)
            .ok_or(ApiError::SymbolNotFound(symbol))
    }

    /// Most recent ticks, oldest first.
    ///
    /// # Errors
    /// Returns `SymbolNotFound` for unknown symbols.
    pub fn ticks(&self, symbol: &str, limit: Option<usize>) -> Result<Vec<TickData>, ApiError> {
        let symbol = symbol.trim().to_uppercase();
        if self.store.symbol(&symbol).is_none() && self.store.quote(&symbol).is_none() {
            return Err(ApiError::SymbolNotFound(symbol));
        }
        Ok(self.store.recent_ticks(&symbol, clamp_limit(limit)))
    }

    /// OHLC bars of a symbol.
    ///
    /// # Errors
    /// Returns `InvalidRequest` for an unknown interval.
    pub fn ohlc(&self, symbol: &str, query: &OhlcQuery) -> Result<OhlcResponse, ApiError> {
        let symbol = symbol.trim().to_uppercase();
        let interval = match query.interval.as_deref() {
            Some(raw) => raw.parse::<OhlcInterval>().map_err(ApiError::InvalidRequest)?,
            None => OhlcInterval::OneMinute,
        };
        let limit = query.limit.unwrap_or(DEFAULT_OHLC_LIMIT).clamp(1, 5_000);
        let bars = self
            .ohlc
            .get_bars(&symbol, interval, query.from, query.to, limit);
        Ok(OhlcResponse {
            symbol,
            interval: interval.to_string(),
            bars,
        })
    }

    /// Subscriptions of `actor`.
    #[must_use]
    pub fn subscriptions(&self, actor: &User) -> Vec<MarketDataSubscription> {
        self.store.subscriptions_for(actor.id)
    }

    /// Subscribes `actor` to a symbol's data.
    ///
    /// # Errors
    /// Returns `SymbolNotFound` for unregistered symbols and `Conflict` for duplicates.
    pub async fn subscribe(
        &self,
        actor: &User,
        request: CreateSubscriptionRequest,
    ) -> Result<MarketDataSubscription, ApiError> {
        let symbol = normalize_symbol(&request.symbol)?;
        if self.store.symbol(&symbol).is_none() {
            return Err(ApiError::SymbolNotFound(symbol));
        }
        let duplicate = self
            .store
            .subscriptions_for(actor.id)
            .iter()
            .any(|s| s.symbol == symbol && s.data_type == request.data_type);
        if duplicate {
            return Err(ApiError::Conflict(format!(
                "already subscribed to {} {}",
                symbol, request.data_type
            )));
        }

        let subscription = MarketDataSubscription {
            id: Uuid::new_v4(),
            user_id: actor.id,
            symbol,
            data_type: request.data_type,
            created_at: Utc::now(),
        };
        self.store.insert_subscription(subscription.clone()).await?;
        Ok(subscription)
    }

    /// Removes one of `actor`'s subscriptions.
    ///
    /// # Errors
    /// Returns `NotFound` for unknown or foreign subscriptions.
    pub async fn unsubscribe(&self, actor: &User, id: Uuid) -> Result<(), ApiError> {
        self.store
            .subscription(id)
            .filter(|s| s.user_id == actor.id)
            .ok_or_else(|| ApiError::NotFound(format!("subscription {id}")))?;
        self.store.remove_subscription(id).await
    }
}
