//! Synthetic option chains built around a live spot price.

use super::chain::{ChainSource, OptionChain, OptionLeg, StrikeRow};
use super::greeks::{OptionPricer, expiration_for};
use chrono::{Datelike, NaiveDate, Utc, Weekday};
use optionstratlib::{ExpirationDate, OptionStyle};
use rand::Rng;

/// Open interest of the ATM strike before the bell falls off.
const PEAK_OI: f64 = 150_000.0;
/// Volatility added per unit of squared log-moneyness.
const SMILE_CURVATURE: f64 = 0.8;
/// Extra volatility on downside strikes.
const PUT_SKEW: f64 = 0.15;

/// Nearest weekly expiry: today when today is Thursday, else the next Thursday.
#[must_use]
pub fn next_weekly_expiry(today: NaiveDate) -> NaiveDate {
    let days_ahead = (Weekday::Thu.num_days_from_monday() + 7
        - today.weekday().num_days_from_monday())
        % 7;
    today + chrono::Duration::days(i64::from(days_ahead))
}

/// Strike spacing when the symbol does not configure one.
#[must_use]
pub fn default_strike_step(spot: f64) -> f64 {
    match spot {
        s if s < 250.0 => 2.5,
        s if s < 1_000.0 => 10.0,
        s if s < 5_000.0 => 20.0,
        s if s < 20_000.0 => 50.0,
        _ => 100.0,
    }
}

/// Parameters of a generated chain.
#[derive(Debug, Clone)]
pub struct SyntheticParams {
    /// Underlying symbol.
    pub underlying: String,
    /// Spot price.
    pub spot: f64,
    /// Expiry date.
    pub expiry: NaiveDate,
    /// Distance between strikes.
    pub strike_step: f64,
    /// Strikes on each side of ATM.
    pub strikes_per_side: usize,
    /// Contract lot size.
    pub lot_size: u32,
}

/// Builds a chain whose strike grid is centred on the ATM strike.
///
/// Leg prices come from Black-Scholes with a skewed volatility smile; open
/// interest is bell-shaped around ATM with puts heavier below spot and calls
/// heavier above.
pub fn generate<R: Rng>(
    params: &SyntheticParams,
    pricer: &OptionPricer,
    rng: &mut R,
) -> OptionChain {
    let step = if params.strike_step > 0.0 {
        params.strike_step
    } else {
        default_strike_step(params.spot)
    };
    let atm = (params.spot / step).round() * step;
    let expiration = expiration_for(params.expiry);
    let width = params.strikes_per_side.max(1) as f64;

    let mut strikes = Vec::with_capacity(params.strikes_per_side * 2 + 1);
    for offset in -(params.strikes_per_side as i64)..=params.strikes_per_side as i64 {
        let strike = atm + offset as f64 * step;
        if strike <= 0.0 {
            continue;
        }
        let bell = (-(offset as f64).powi(2) / (2.0 * (width / 2.0).powi(2))).exp();
        let moneyness = (strike / params.spot).ln();
        let iv = pricer.default_iv()
            + SMILE_CURVATURE * moneyness * moneyness
            + if moneyness < 0.0 { -PUT_SKEW * moneyness } else { 0.0 };

        // Calls build OI above spot, puts below.
        let call_weight = if strike >= params.spot { 1.0 } else { 0.45 };
        let put_weight = if strike <= params.spot { 1.0 } else { 0.45 };

        strikes.push(StrikeRow {
            strike,
            call: Some(leg(
                pricer,
                params,
                strike,
                &expiration,
                OptionStyle::Call,
                iv,
                PEAK_OI * bell * call_weight,
                rng,
            )),
            put: Some(leg(
                pricer,
                params,
                strike,
                &expiration,
                OptionStyle::Put,
                iv,
                PEAK_OI * bell * put_weight,
                rng,
            )),
        });
    }

    OptionChain {
        underlying: params.underlying.clone(),
        expiry: params.expiry,
        spot_price: params.spot,
        lot_size: params.lot_size,
        strikes,
        fetched_at: Utc::now(),
        source: ChainSource::Synthetic,
    }
}

#[allow(clippy::too_many_arguments)]
fn leg<R: Rng>(
    pricer: &OptionPricer,
    params: &SyntheticParams,
    strike: f64,
    expiration: &ExpirationDate,
    style: OptionStyle,
    iv: f64,
    base_oi: f64,
    rng: &mut R,
) -> OptionLeg {
    let price = pricer
        .theoretical_value(params.spot, strike, expiration, style, Some(iv))
        .max(0.05);
    let ltp = (price * 20.0).round() / 20.0;
    let spread = (ltp * 0.005).max(0.05);
    let open_interest = (base_oi * rng.gen_range(0.85..1.15)).round().max(0.0) as u64;
    let oi_change = (open_interest as f64 * rng.gen_range(-0.08..0.12)).round() as i64;
    let volume = (open_interest as f64 * rng.gen_range(0.3..1.2)).round() as u64;

    OptionLeg {
        ltp,
        ltp_change: ((ltp * rng.gen_range(-0.1..0.1)) * 20.0).round() / 20.0,
        bid: (ltp - spread).max(0.0),
        ask: ltp + spread,
        volume,
        open_interest,
        oi_change,
        iv: Some(iv),
        greeks: Some(pricer.greeks(params.spot, strike, expiration, style, Some(iv))),
    }
}
