//! Derived option chain metrics: put/call ratio, max pain, open interest.

use super::chain::{OptionChain, OptionLeg};
use super::greeks::{OptionPricer, expiration_for};
use crate::error::ApiError;
use chrono::{DateTime, NaiveDate, Utc};
use optionstratlib::OptionStyle;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// PCR at or above which sentiment reads bullish.
pub const BULLISH_PCR: f64 = 1.2;
/// PCR at or below which sentiment reads bearish.
pub const BEARISH_PCR: f64 = 0.8;
/// Default number of strikes reported per side in OI analysis.
pub const DEFAULT_TOP_N: usize = 5;

/// Market sentiment derived from the put/call ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
    /// Put writers dominate.
    Bullish,
    /// Call writers dominate.
    Bearish,
    /// Neither side dominates.
    Neutral,
}

impl Sentiment {
    /// Sentiment for an open-interest PCR. No ratio reads neutral.
    #[must_use]
    pub fn from_pcr(pcr_oi: Option<f64>) -> Self {
        match pcr_oi {
            Some(pcr) if pcr >= BULLISH_PCR => Self::Bullish,
            Some(pcr) if pcr <= BEARISH_PCR => Self::Bearish,
            _ => Self::Neutral,
        }
    }
}

/// Put/call ratios of a chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PcrResult {
    /// Underlying symbol.
    pub underlying: String,
    /// Expiry date.
    pub expiry: NaiveDate,
    /// Σ put OI / Σ call OI.
    pub pcr_oi: Option<f64>,
    /// Σ put volume / Σ call volume.
    pub pcr_volume: Option<f64>,
    /// Σ put OI change / Σ call OI change.
    pub pcr_oi_change: Option<f64>,
    /// Total call open interest.
    pub total_call_oi: u64,
    /// Total put open interest.
    pub total_put_oi: u64,
    /// Sentiment from `pcr_oi`.
    pub sentiment: Sentiment,
}

/// Writer payout if the underlying settles at `strike`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PainPoint {
    /// Settlement strike.
    pub strike: f64,
    /// Payout owed to call holders.
    pub call_payout: f64,
    /// Payout owed to put holders.
    pub put_payout: f64,
    /// Sum of both.
    pub total_payout: f64,
}

/// Max pain of a chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct MaxPainResult {
    /// Underlying symbol.
    pub underlying: String,
    /// Expiry date.
    pub expiry: NaiveDate,
    /// Spot price.
    pub spot_price: f64,
    /// Strike with the smallest total writer payout.
    pub max_pain_strike: f64,
    /// Payout at the max pain strike.
    pub min_payout: f64,
    /// `max_pain_strike - spot_price`.
    pub distance_from_spot: f64,
    /// Distance as a percentage of spot.
    pub distance_pct: f64,
    /// Payout for every strike.
    pub payout_curve: Vec<PainPoint>,
}

/// Price/OI change classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Buildup {
    /// Price up, OI up.
    LongBuildup,
    /// Price down, OI up.
    ShortBuildup,
    /// Price up, OI down.
    ShortCovering,
    /// Price down, OI down.
    LongUnwinding,
    /// No change on either axis.
    Neutral,
}

impl Buildup {
    /// Classifies a leg from its price and OI changes.
    #[must_use]
    pub fn classify(ltp_change: f64, oi_change: i64) -> Self {
        match (ltp_change > 0.0, ltp_change < 0.0, oi_change.signum()) {
            (true, _, 1) => Self::LongBuildup,
            (_, true, 1) => Self::ShortBuildup,
            (true, _, -1) => Self::ShortCovering,
            (_, true, -1) => Self::LongUnwinding,
            _ => Self::Neutral,
        }
    }
}

/// Open interest of one strike.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct StrikeOi {
    /// Strike price.
    pub strike: f64,
    /// Open interest.
    pub open_interest: u64,
    /// OI change.
    pub oi_change: i64,
}

/// Buildup of both legs of a strike.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct StrikeBuildup {
    /// Strike price.
    pub strike: f64,
    /// Call leg classification.
    pub call: Option<Buildup>,
    /// Put leg classification.
    pub put: Option<Buildup>,
}

/// Open interest breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct OiAnalysis {
    /// Underlying symbol.
    pub underlying: String,
    /// Total call OI.
    pub total_call_oi: u64,
    /// Total put OI.
    pub total_put_oi: u64,
    /// Net call OI change.
    pub total_call_oi_change: i64,
    /// Net put OI change.
    pub total_put_oi_change: i64,
    /// Strike with the highest call OI.
    pub resistance: Option<f64>,
    /// Strike with the highest put OI.
    pub support: Option<f64>,
    /// Highest call OI strikes, descending.
    pub top_call_oi: Vec<StrikeOi>,
    /// Highest put OI strikes, descending.
    pub top_put_oi: Vec<StrikeOi>,
    /// Per-strike classification.
    pub buildup: Vec<StrikeBuildup>,
}

/// Combined chain summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ChainAnalysis {
    /// Underlying symbol.
    pub underlying: String,
    /// Expiry date.
    pub expiry: NaiveDate,
    /// Spot price.
    pub spot_price: f64,
    /// At-the-money strike.
    pub atm_strike: Option<f64>,
    /// Put/call ratios.
    pub pcr: PcrResult,
    /// Max pain strike (None for an empty chain).
    pub max_pain_strike: Option<f64>,
    /// Strike with the highest put OI.
    pub support: Option<f64>,
    /// Strike with the highest call OI.
    pub resistance: Option<f64>,
    /// ATM call plus ATM put.
    pub atm_straddle_price: Option<f64>,
    /// Mean IV of the ATM legs.
    pub atm_iv: Option<f64>,
    /// When the analysed chain was built.
    pub fetched_at: DateTime<Utc>,
}

/// Compact chain summary published on the stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ChainSummary {
    /// Underlying symbol.
    pub underlying: String,
    /// Expiry date.
    pub expiry: NaiveDate,
    /// Spot price.
    pub spot_price: f64,
    /// At-the-money strike.
    pub atm_strike: Option<f64>,
    /// Open-interest PCR.
    pub pcr_oi: Option<f64>,
    /// Sentiment from `pcr_oi`.
    pub sentiment: Sentiment,
    /// Max pain strike.
    pub max_pain_strike: Option<f64>,
    /// Strike with the highest put OI.
    pub support: Option<f64>,
    /// Strike with the highest call OI.
    pub resistance: Option<f64>,
    /// Summary time.
    pub timestamp: DateTime<Utc>,
}

fn ratio(numerator: f64, denominator: f64) -> Option<f64> {
    if denominator == 0.0 {
        None
    } else {
        Some(numerator / denominator)
    }
}

fn legs<'a, F>(chain: &'a OptionChain, pick: F) -> impl Iterator<Item = (f64, &'a OptionLeg)>
where
    F: Fn(&'a super::chain::StrikeRow) -> Option<&'a OptionLeg> + 'a,
{
    chain
        .strikes
        .iter()
        .filter_map(move |row| pick(row).map(|leg| (row.strike, leg)))
}

fn calls(chain: &OptionChain) -> impl Iterator<Item = (f64, &OptionLeg)> {
    legs(chain, |row| row.call.as_ref())
}

fn puts(chain: &OptionChain) -> impl Iterator<Item = (f64, &OptionLeg)> {
    legs(chain, |row| row.put.as_ref())
}

/// Strike with the highest open interest. Ties resolve to the lower strike.
fn highest_oi<'a>(legs: impl Iterator<Item = (f64, &'a OptionLeg)>) -> Option<f64> {
    legs.filter(|(_, leg)| leg.open_interest > 0)
        .fold(None, |best: Option<(f64, u64)>, (strike, leg)| match best {
            Some((_, oi)) if oi >= leg.open_interest => best,
            _ => Some((strike, leg.open_interest)),
        })
        .map(|(strike, _)| strike)
}

fn top_oi<'a>(legs: impl Iterator<Item = (f64, &'a OptionLeg)>, n: usize) -> Vec<StrikeOi> {
    let mut rows: Vec<StrikeOi> = legs
        .map(|(strike, leg)| StrikeOi {
            strike,
            open_interest: leg.open_interest,
            oi_change: leg.oi_change,
        })
        .collect();
    rows.sort_by(|a, b| {
        b.open_interest
            .cmp(&a.open_interest)
            .then(a.strike.total_cmp(&b.strike))
    });
    rows.truncate(n);
    rows
}

/// Put/call ratios of the chain.
#[must_use]
pub fn pcr(chain: &OptionChain) -> PcrResult {
    let total_call_oi: u64 = calls(chain).map(|(_, l)| l.open_interest).sum();
    let total_put_oi: u64 = puts(chain).map(|(_, l)| l.open_interest).sum();
    let call_volume: u64 = calls(chain).map(|(_, l)| l.volume).sum();
    let put_volume: u64 = puts(chain).map(|(_, l)| l.volume).sum();
    let call_oi_change: i64 = calls(chain).map(|(_, l)| l.oi_change).sum();
    let put_oi_change: i64 = puts(chain).map(|(_, l)| l.oi_change).sum();

    let pcr_oi = ratio(total_put_oi as f64, total_call_oi as f64);
    PcrResult {
        underlying: chain.underlying.clone(),
        expiry: chain.expiry,
        pcr_oi,
        pcr_volume: ratio(put_volume as f64, call_volume as f64),
        pcr_oi_change: ratio(put_oi_change as f64, call_oi_change as f64),
        total_call_oi,
        total_put_oi,
        sentiment: Sentiment::from_pcr(pcr_oi),
    }
}

/// Strike at which option writers pay out the least at expiry.
///
/// # Errors
/// Returns `InvalidRequest` for a chain without strikes.
pub fn max_pain(chain: &OptionChain) -> Result<MaxPainResult, ApiError> {
    if chain.strikes.is_empty() {
        return Err(ApiError::InvalidRequest(format!(
            "option chain for {} has no strikes",
            chain.underlying
        )));
    }

    let payout_curve: Vec<PainPoint> = chain
        .strikes
        .iter()
        .map(|settle| {
            let k = settle.strike;
            let call_payout: f64 = calls(chain)
                .map(|(s, leg)| leg.open_interest as f64 * (k - s).max(0.0))
                .sum();
            let put_payout: f64 = puts(chain)
                .map(|(s, leg)| leg.open_interest as f64 * (s - k).max(0.0))
                .sum();
            PainPoint {
                strike: k,
                call_payout,
                put_payout,
                total_payout: call_payout + put_payout,
            }
        })
        .collect();

    // Strikes are ascending, so a strict comparison keeps the lower strike on ties.
    let mut best = &payout_curve[0];
    for point in &payout_curve[1..] {
        if point.total_payout < best.total_payout {
            best = point;
        }
    }

    let distance = best.strike - chain.spot_price;
    Ok(MaxPainResult {
        underlying: chain.underlying.clone(),
        expiry: chain.expiry,
        spot_price: chain.spot_price,
        max_pain_strike: best.strike,
        min_payout: best.total_payout,
        distance_from_spot: distance,
        distance_pct: distance / chain.spot_price * 100.0,
        payout_curve,
    })
}

/// Open interest totals, support/resistance and buildup.
#[must_use]
pub fn oi_analysis(chain: &OptionChain, top_n: usize) -> OiAnalysis {
    OiAnalysis {
        underlying: chain.underlying.clone(),
        total_call_oi: calls(chain).map(|(_, l)| l.open_interest).sum(),
        total_put_oi: puts(chain).map(|(_, l)| l.open_interest).sum(),
        total_call_oi_change: calls(chain).map(|(_, l)| l.oi_change).sum(),
        total_put_oi_change: puts(chain).map(|(_, l)| l.oi_change).sum(),
        resistance: highest_oi(calls(chain)),
        support: highest_oi(puts(chain)),
        top_call_oi: top_oi(calls(chain), top_n),
        top_put_oi: top_oi(puts(chain), top_n),
        buildup: chain
            .strikes
            .iter()
            .map(|row| StrikeBuildup {
                strike: row.strike,
                call: row
                    .call
                    .as_ref()
                    .map(|l| Buildup::classify(l.ltp_change, l.oi_change)),
                put: row
                    .put
                    .as_ref()
                    .map(|l| Buildup::classify(l.ltp_change, l.oi_change)),
            })
            .collect(),
    }
}

/// IV of a leg, solved from its price when not quoted.
fn leg_iv(
    pricer: &OptionPricer,
    chain: &OptionChain,
    strike: f64,
    leg: &OptionLeg,
    style: OptionStyle,
) -> Option<f64> {
    leg.iv.or_else(|| {
        pricer.implied_volatility(
            leg.ltp,
            chain.spot_price,
            strike,
            &expiration_for(chain.expiry),
            style,
        )
    })
}

/// Combined analysis of a chain.
#[must_use]
pub fn analyze(chain: &OptionChain, pricer: &OptionPricer) -> ChainAnalysis {
    let atm_strike = chain.atm_strike();
    let atm_row = atm_strike.and_then(|k| chain.row(k));

    let atm_straddle_price = atm_row.and_then(|row| match (&row.call, &row.put) {
        (Some(call), Some(put)) => Some(call.ltp + put.ltp),
        _ => None,
    });

    let atm_iv = atm_row.and_then(|row| {
        let ivs: Vec<f64> = [
            row.call
                .as_ref()
                .and_then(|l| leg_iv(pricer, chain, row.strike, l, OptionStyle::Call)),
            row.put
                .as_ref()
                .and_then(|l| leg_iv(pricer, chain, row.strike, l, OptionStyle::Put)),
        ]
        .into_iter()
        .flatten()
        .collect();
        (!ivs.is_empty()).then(|| ivs.iter().sum::<f64>() / ivs.len() as f64)
    });

    ChainAnalysis {
        underlying: chain.underlying.clone(),
        expiry: chain.expiry,
        spot_price: chain.spot_price,
        atm_strike,
        pcr: pcr(chain),
        max_pain_strike: max_pain(chain).ok().map(|m| m.max_pain_strike),
        support: highest_oi(puts(chain)),
        resistance: highest_oi(calls(chain)),
        atm_straddle_price,
        atm_iv,
        fetched_at: chain.fetched_at,
    }
}

/// Fills missing IV and greeks on every leg.
pub fn enrich(chain: &mut OptionChain, pricer: &OptionPricer) {
    let expiration = expiration_for(chain.expiry);
    let spot = chain.spot_price;
    for row in &mut chain.strikes {
        let strike = row.strike;
        for (leg, style) in [
            (row.call.as_mut(), OptionStyle::Call),
            (row.put.as_mut(), OptionStyle::Put),
        ] {
            let Some(leg) = leg else { continue };
            if leg.iv.is_none() {
                leg.iv = pricer.implied_volatility(leg.ltp, spot, strike, &expiration, style);
            }
            if leg.greeks.is_none() {
                leg.greeks = Some(pricer.greeks(spot, strike, &expiration, style, leg.iv));
            }
        }
    }
}

/// Stream summary of a chain.
#[must_use]
pub fn summarize(chain: &OptionChain) -> ChainSummary {
    let ratios = pcr(chain);
    ChainSummary {
        underlying: chain.underlying.clone(),
        expiry: chain.expiry,
        spot_price: chain.spot_price,
        atm_strike: chain.atm_strike(),
        pcr_oi: ratios.pcr_oi,
        sentiment: ratios.sentiment,
        max_pain_strike: max_pain(chain).ok().map(|m| m.max_pain_strike),
        support: highest_oi(puts(chain)),
        resistance: highest_oi(calls(chain)),
        timestamp: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::option_chain::chain::fixtures::chain;

    #[test]
    fn test_pcr_and_sentiment() {
        let c = chain(100.0, &[(90.0, 100, 300), (100.0, 200, 300), (110.0, 100, 0)]);
        let result = pcr(&c);
        assert_eq!(result.total_call_oi, 400);
        assert_eq!(result.total_put_oi, 600);
        assert!((result.pcr_oi.unwrap() - 1.5).abs() < 1e-12);
        assert_eq!(result.sentiment, Sentiment::Bullish);
        // OI change is zero on both sides.
        assert!(result.pcr_oi_change.is_none());

        let bearish = pcr(&chain(100.0, &[(100.0, 1000, 500)]));
        assert_eq!(bearish.sentiment, Sentiment::Bearish);
        assert_eq!(
            pcr(&chain(100.0, &[(100.0, 1000, 1000)])).sentiment,
            Sentiment::Neutral
        );
    }

    #[test]
    fn test_sentiment_thresholds_are_inclusive() {
        assert_eq!(Sentiment::from_pcr(Some(1.2)), Sentiment::Bullish);
        assert_eq!(Sentiment::from_pcr(Some(0.8)), Sentiment::Bearish);
        assert_eq!(Sentiment::from_pcr(Some(1.0)), Sentiment::Neutral);
        assert_eq!(Sentiment::from_pcr(None), Sentiment::Neutral);
    }

    #[test]
    fn test_pcr_without_calls_is_none() {
        let result = pcr(&chain(100.0, &[(100.0, 0, 500)]));
        assert!(result.pcr_oi.is_none());
        assert_eq!(result.sentiment, Sentiment::Neutral);
    }

    #[test]
    fn test_max_pain() {
        // Settle at 100: calls at 90 pay 10*100 = 1000, puts at 110 pay 10*100 = 1000.
        let c = chain(104.0, &[(90.0, 100, 0), (100.0, 500, 500), (110.0, 0, 100)]);
        let result = max_pain(&c).unwrap();
        assert_eq!(result.max_pain_strike, 100.0);
        assert!((result.min_payout - 2000.0).abs() < 1e-9);
        assert!((result.distance_from_spot + 4.0).abs() < 1e-9);
        assert_eq!(result.payout_curve.len(), 3);

        // Settle at 90: call payout 0, puts at 100 pay 10*500 and at 110 pay 20*100.
        assert!((result.payout_curve[0].total_payout - 7000.0).abs() < 1e-9);
    }

    #[test]
    fn test_max_pain_tie_takes_lower_strike() {
        let c = chain(100.0, &[(90.0, 0, 0), (100.0, 0, 0), (110.0, 0, 0)]);
        assert_eq!(max_pain(&c).unwrap().max_pain_strike, 90.0);
    }

    #[test]
    fn test_max_pain_empty_chain() {
        let c = chain(100.0, &[]);
        assert!(matches!(max_pain(&c), Err(ApiError::InvalidRequest(_))));
    }

    #[test]
    fn test_buildup_classification() {
        assert_eq!(Buildup::classify(5.0, 100), Buildup::LongBuildup);
        assert_eq!(Buildup::classify(-5.0, 100), Buildup::ShortBuildup);
        assert_eq!(Buildup::classify(5.0, -100), Buildup::ShortCovering);
        assert_eq!(Buildup::classify(-5.0, -100), Buildup::LongUnwinding);
        assert_eq!(Buildup::classify(0.0, 100), Buildup::Neutral);
        assert_eq!(Buildup::classify(5.0, 0), Buildup::Neutral);
    }

    #[test]
    fn test_oi_analysis() {
        let mut c = chain(
            100.0,
            &[(90.0, 100, 900), (100.0, 400, 400), (110.0, 800, 50), (120.0, 800, 10)],
        );
        if let Some(call) = c.strikes[2].call.as_mut() {
            call.ltp_change = -3.0;
            call.oi_change = 250;
        }

        let analysis = oi_analysis(&c, 2);
        assert_eq!(analysis.total_call_oi, 2100);
        assert_eq!(analysis.total_put_oi, 1360);
        assert_eq!(analysis.total_call_oi_change, 250);
        // Tie between 110 and 120 resolves to the lower strike.
        assert_eq!(analysis.resistance, Some(110.0));
        assert_eq!(analysis.support, Some(90.0));
        assert_eq!(analysis.top_call_oi.len(), 2);
        assert_eq!(analysis.top_call_oi[0].strike, 110.0);
        assert_eq!(analysis.top_put_oi[0].strike, 90.0);
        assert_eq!(analysis.buildup[2].call, Some(Buildup::ShortBuildup));
        assert_eq!(analysis.buildup[0].put, Some(Buildup::Neutral));
    }

    #[test]
    fn test_analysis_combines_metrics() {
        let c = chain(101.0, &[(90.0, 100, 300), (100.0, 200, 300), (110.0, 100, 100)]);
        let analysis = analyze(&c, &OptionPricer::default());
        assert_eq!(analysis.atm_strike, Some(100.0));
        // Fixture legs are intrinsic + 10.
        assert!((analysis.atm_straddle_price.unwrap() - 21.0).abs() < 1e-9);
        assert_eq!(analysis.resistance, Some(100.0));
        assert_eq!(analysis.support, Some(90.0));
        assert!(analysis.max_pain_strike.is_some());
        assert_eq!(analysis.pcr, pcr(&c));
    }

    #[test]
    fn test_enrich_fills_greeks() {
        let mut c = chain(100.0, &[(100.0, 10, 10)]);
        enrich(&mut c, &OptionPricer::default());
        let call = c.strikes[0].call.as_ref().unwrap();
        let greeks = call.greeks.unwrap();
        assert!(greeks.delta > 0.0 && greeks.delta <= 1.0);
        let put = c.strikes[0].put.as_ref().unwrap();
        assert!(put.greeks.unwrap().delta <= 0.0);
    }

    #[test]
    fn test_summary() {
        let c = chain(100.0, &[(90.0, 100, 300), (100.0, 200, 300), (110.0, 100, 0)]);
        let summary = summarize(&c);
        assert_eq!(summary.atm_strike, Some(100.0));
        assert_eq!(summary.sentiment, Sentiment::Bullish);
        assert_eq!(summary.support, Some(90.0));
    }
}
