//! Option chain data model.

use crate::error::ApiError;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Black-Scholes sensitivities of one leg.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Greeks {
    /// Price change per unit of underlying.
    pub delta: f64,
    /// Delta change per unit of underlying.
    pub gamma: f64,
    /// Daily time decay.
    pub theta: f64,
    /// Price change per 1% volatility.
    pub vega: f64,
}

/// One side (call or put) of a strike.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct OptionLeg {
    /// Last traded price.
    pub ltp: f64,
    /// Change of `ltp` since previous close.
    #[serde(default)]
    pub ltp_change: f64,
    /// Best bid.
    #[serde(default)]
    pub bid: f64,
    /// Best ask.
    #[serde(default)]
    pub ask: f64,
    /// Traded contracts today.
    #[serde(default)]
    pub volume: u64,
    /// Outstanding contracts.
    #[serde(default)]
    pub open_interest: u64,
    /// Change of open interest since previous close.
    #[serde(default)]
    pub oi_change: i64,
    /// Implied volatility (annualized, fraction).
    #[serde(default)]
    pub iv: Option<f64>,
    /// Sensitivities.
    #[serde(default)]
    pub greeks: Option<Greeks>,
}

/// A strike with its call and put legs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
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

/// Where a chain came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ChainSource {
    /// Built from the live spot price.
    #[default]
    Synthetic,
    /// Pushed by an external workflow.
    Ingested,
}

/// Option chain of one underlying and expiry, sorted by strike.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct OptionChain {
    /// Underlying symbol.
    pub underlying: String,
    /// Expiry date.
    pub expiry: NaiveDate,
    /// Spot price of the underlying.
    pub spot_price: f64,
    /// Contract lot size.
    #[serde(default = "default_lot_size")]
    pub lot_size: u32,
    /// Strikes, ascending.
    pub strikes: Vec<StrikeRow>,
    /// When the chain was built or received.
    #[serde(default = "Utc::now")]
    pub fetched_at: DateTime<Utc>,
    /// Origin of the data.
    #[serde(default)]
    pub source: ChainSource,
}

fn default_lot_size() -> u32 {
    1
}

/// Which legs an operation looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum LegSide {
    /// Calls only.
    Call,
    /// Puts only.
    Put,
    /// Both legs.
    #[default]
    Both,
}

/// Nearest strike to `spot`. Ties resolve to the lower strike.
pub fn nearest_strike<I>(strikes: I, spot: f64) -> Option<f64>
where
    I: IntoIterator<Item = f64>,
{
    let mut best: Option<f64> = None;
    for strike in strikes {
        best = match best {
            None => Some(strike),
            Some(current) => {
                let d_new = (strike - spot).abs();
                let d_cur = (current - spot).abs();
                if d_new < d_cur || (d_new == d_cur && strike < current) {
                    Some(strike)
                } else {
                    Some(current)
                }
            }
        };
    }
    best
}

impl OptionChain {
    /// At-the-money strike.
    #[must_use]
    pub fn atm_strike(&self) -> Option<f64> {
        nearest_strike(self.strikes.iter().map(|r| r.strike), self.spot_price)
    }

    /// Index of the at-the-money strike.
    #[must_use]
    pub fn atm_index(&self) -> Option<usize> {
        let atm = self.atm_strike()?;
        self.strikes.iter().position(|r| r.strike == atm)
    }

    /// Row of a strike.
    #[must_use]
    pub fn row(&self, strike: f64) -> Option<&StrikeRow> {
        self.strikes.iter().find(|r| r.strike == strike)
    }

    /// Whole days until expiry, counted from `today`.
    #[must_use]
    pub fn days_to_expiry(&self, today: NaiveDate) -> i64 {
        (self.expiry - today).num_days()
    }

    /// Checks strikes (positive, finite, unique) and sorts them ascending.
    ///
    /// # Errors
    /// Returns `Validation` describing the first offending strike.
    pub fn normalize(&mut self) -> Result<(), ApiError> {
        if self.underlying.trim().is_empty() {
            return Err(ApiError::field("underlying", "must not be empty"));
        }
        if !(self.spot_price.is_finite() && self.spot_price > 0.0) {
            return Err(ApiError::field("spot_price", "must be positive"));
        }
        if let Some(bad) = self
            .strikes
            .iter()
            .find(|r| !(r.strike.is_finite() && r.strike > 0.0))
        {
            return Err(ApiError::field(
                "strikes",
                format!("strike {} must be positive", bad.strike),
            ));
        }

        self.strikes.sort_by(|a, b| a.strike.total_cmp(&b.strike));
        if let Some(pair) = self.strikes.windows(2).find(|w| w[0].strike == w[1].strike) {
            return Err(ApiError::field(
                "strikes",
                format!("duplicate strike {}", pair[0].strike),
            ));
        }
        self.underlying = self.underlying.trim().to_uppercase();
        Ok(())
    }
}
