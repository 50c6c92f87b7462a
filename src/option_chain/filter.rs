//! Strike filtering.

use super::chain::{LegSide, OptionChain, OptionLeg, StrikeRow};
use crate::error::ApiError;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

/// Moneyness of a strike, judged from the call side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Moneyness {
    /// Strike below spot.
    Itm,
    /// The at-the-money strike.
    Atm,
    /// Strike above spot.
    Otm,
}

/// Criteria combined by intersection. Unset criteria match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema, IntoParams)]
#[serde(default)]
#[into_params(parameter_in = Query)]
pub struct FilterCriteria {
    /// Lowest strike kept.
    pub min_strike: Option<f64>,
    /// Highest strike kept.
    pub max_strike: Option<f64>,
    /// Strikes kept on each side of ATM.
    pub atm_window: Option<usize>,
    /// Moneyness kept.
    pub moneyness: Option<Moneyness>,
    /// Minimum open interest on a kept leg.
    pub min_oi: Option<u64>,
    /// Minimum volume on a kept leg.
    pub min_volume: Option<u64>,
    /// Legs kept.
    pub side: Option<LegSide>,
}

impl FilterCriteria {
    /// Checks that the criteria are consistent.
    ///
    /// # Errors
    /// Returns `InvalidRequest` when `min_strike` exceeds `max_strike`.
    pub fn validate(&self) -> Result<(), ApiError> {
        if let (Some(min), Some(max)) = (self.min_strike, self.max_strike)
            && min > max
        {
            return Err(ApiError::InvalidRequest(format!(
                "min_strike {min} is greater than max_strike {max}"
            )));
        }
        Ok(())
    }

    fn leg_passes(&self, leg: &OptionLeg) -> bool {
        self.min_oi.is_none_or(|min| leg.open_interest >= min)
            && self.min_volume.is_none_or(|min| leg.volume >= min)
    }
}

/// Applies `criteria` to a chain, returning a chain with the kept strikes.
///
/// Rows whose legs are all filtered out are dropped.
///
/// # Errors
/// Returns `InvalidRequest` for inconsistent criteria.
pub fn filter_chain(chain: &OptionChain, criteria: &FilterCriteria) -> Result<OptionChain, ApiError> {
    criteria.validate()?;

    let atm = chain.atm_strike();
    let atm_index = chain.atm_index();
    let side = criteria.side.unwrap_or_default();

    let strikes: Vec<StrikeRow> = chain
        .strikes
        .iter()
        .enumerate()
        .filter(|(_, row)| criteria.min_strike.is_none_or(|min| row.strike >= min))
        .filter(|(_, row)| criteria.max_strike.is_none_or(|max| row.strike <= max))
        .filter(|(i, _)| match (criteria.atm_window, atm_index) {
            (Some(window), Some(center)) => i.abs_diff(center) <= window,
            _ => true,
        })
        .filter(|(_, row)| match (criteria.moneyness, atm) {
            (Some(Moneyness::Atm), Some(atm)) => row.strike == atm,
            (Some(Moneyness::Itm), Some(atm)) => row.strike < atm,
            (Some(Moneyness::Otm), Some(atm)) => row.strike > atm,
            _ => true,
        })
        .filter_map(|(_, row)| {
            let keep = |leg: &Option<OptionLeg>, wanted: bool| {
                leg.as_ref()
                    .filter(|l| wanted && criteria.leg_passes(l))
                    .cloned()
            };
            let call = keep(&row.call, side != LegSide::Put);
            let put = keep(&row.put, side != LegSide::Call);
            (call.is_some() || put.is_some()).then(|| StrikeRow {
                strike: row.strike,
                call,
                put,
            })
        })
        .collect();

    Ok(OptionChain {
        strikes,
        ..chain.clone()
    })
}
