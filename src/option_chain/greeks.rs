//! Black-Scholes pricing, greeks and implied volatility.

use super::chain::Greeks;
use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
use optionstratlib::{ExpirationDate, OptionStyle};

/// Lowest volatility the IV solver searches.
const IV_LOW: f64 = 0.001;
/// Highest volatility the IV solver searches.
const IV_HIGH: f64 = 5.0;
const IV_TOLERANCE: f64 = 1e-6;
const IV_MAX_ITERATIONS: usize = 100;

/// Black-Scholes pricer for European options on the chain.
#[derive(Debug, Clone, Copy)]
pub struct OptionPricer {
    /// Risk-free rate (annualized).
    risk_free_rate: f64,
    /// Volatility used when a leg carries none.
    default_iv: f64,
}

/// Expiration of a contract expiring on `date` at the 15:30 IST close.
#[must_use]
pub fn expiration_for(date: NaiveDate) -> ExpirationDate {
    // 15:30 IST is 10:00 UTC.
    let close = NaiveTime::from_hms_opt(10, 0, 0).unwrap_or_default();
    ExpirationDate::DateTime(Utc.from_utc_datetime(&date.and_time(close)))
}

impl OptionPricer {
    /// Creates a new option pricer.
    ///
    /// # Arguments
    /// * `risk_free_rate` - Annualized risk-free rate (e.g., 0.065 for 6.5%)
    /// * `default_iv` - Fallback implied volatility (e.g., 0.15 for 15%)
    #[must_use]
    pub fn new(risk_free_rate: f64, default_iv: f64) -> Self {
        Self {
            risk_free_rate,
            default_iv,
        }
    }

    /// Fallback volatility.
    #[must_use]
    pub fn default_iv(&self) -> f64 {
        self.default_iv
    }

    /// Theoretical value of an option.
    #[must_use]
    pub fn theoretical_value(
        &self,
        spot: f64,
        strike: f64,
        expiration: &ExpirationDate,
        style: OptionStyle,
        iv: Option<f64>,
    ) -> f64 {
        let sigma = iv.unwrap_or(self.default_iv);
        self.price_at(spot, strike, time_to_expiry(expiration), style, sigma)
    }

    /// Delta, gamma, theta and vega in one pass.
    #[must_use]
    pub fn greeks(
        &self,
        spot: f64,
        strike: f64,
        expiration: &ExpirationDate,
        style: OptionStyle,
        iv: Option<f64>,
    ) -> Greeks {
        let sigma = iv.unwrap_or(self.default_iv);
        let t = time_to_expiry(expiration);

        if t <= 0.0 || sigma <= 0.0 {
            let delta = match style {
                OptionStyle::Call if spot > strike => 1.0,
                OptionStyle::Put if spot < strike => -1.0,
                _ => 0.0,
            };
            return Greeks {
                delta,
                gamma: 0.0,
                theta: 0.0,
                vega: 0.0,
            };
        }

        let (d1, d2) = self.d1_d2(spot, strike, t, sigma);
        let sqrt_t = t.sqrt();
        let discount = (-self.risk_free_rate * t).exp();
        let decay = -spot * norm_pdf(d1) * sigma / (2.0 * sqrt_t);

        let (delta, theta) = match style {
            OptionStyle::Call => (
                norm_cdf(d1),
                decay - self.risk_free_rate * strike * discount * norm_cdf(d2),
            ),
            OptionStyle::Put => (
                norm_cdf(d1) - 1.0,
                decay + self.risk_free_rate * strike * discount * norm_cdf(-d2),
            ),
        };

        Greeks {
            delta,
            gamma: norm_pdf(d1) / (spot * sigma * sqrt_t),
            // Daily decay
            theta: theta / 365.0,
            // Per 1% vol change
            vega: spot * norm_pdf(d1) * sqrt_t / 100.0,
        }
    }

    /// Volatility that reproduces `price`, solved by bisection.
    ///
    /// Returns `None` for expired contracts and for prices outside the
    /// range reachable between the solver bounds.
    #[must_use]
    pub fn implied_volatility(
        &self,
        price: f64,
        spot: f64,
        strike: f64,
        expiration: &ExpirationDate,
        style: OptionStyle,
    ) -> Option<f64> {
        let t = time_to_expiry(expiration);
        if t <= 0.0 || !(price.is_finite() && price > 0.0) || spot <= 0.0 || strike <= 0.0 {
            return None;
        }

        let mut low = IV_LOW;
        let mut high = IV_HIGH;
        let price_low = self.price_at(spot, strike, t, style, low);
        let price_high = self.price_at(spot, strike, t, style, high);
        if price < price_low - IV_TOLERANCE || price > price_high + IV_TOLERANCE {
            return None;
        }

        for _ in 0..IV_MAX_ITERATIONS {
            let mid = (low + high) / 2.0;
            let diff = self.price_at(spot, strike, t, style, mid) - price;
            if diff.abs() < IV_TOLERANCE {
                return Some(mid);
            }
            // Price is increasing in volatility.
            if diff > 0.0 {
                high = mid;
            } else {
                low = mid;
            }
        }
        Some((low + high) / 2.0)
    }

    fn price_at(&self, spot: f64, strike: f64, t: f64, style: OptionStyle, sigma: f64) -> f64 {
        if t <= 0.0 || sigma <= 0.0 {
            return match style {
                OptionStyle::Call => (spot - strike).max(0.0),
                OptionStyle::Put => (strike - spot).max(0.0),
            };
        }

        let (d1, d2) = self.d1_d2(spot, strike, t, sigma);
        let discount = (-self.risk_free_rate * t).exp();

        match style {
            OptionStyle::Call => spot * norm_cdf(d1) - strike * discount * norm_cdf(d2),
            OptionStyle::Put => strike * discount * norm_cdf(-d2) - spot * norm_cdf(-d1),
        }
    }

    fn d1_d2(&self, spot: f64, strike: f64, t: f64, sigma: f64) -> (f64, f64) {
        let d1 = ((spot / strike).ln() + (self.risk_free_rate + sigma * sigma / 2.0) * t)
            / (sigma * t.sqrt());
        (d1, d1 - sigma * t.sqrt())
    }
}

impl Default for OptionPricer {
    fn default() -> Self {
        Self::new(0.065, 0.15)
    }
}

/// Converts expiration to time in years.
fn time_to_expiry(expiration: &ExpirationDate) -> f64 {
    match expiration {
        ExpirationDate::Days(days) => days.to_f64() / 365.0,
        ExpirationDate::DateTime(dt) => {
            let duration = *dt - Utc::now();
            duration.num_seconds() as f64 / (365.0 * 24.0 * 3600.0)
        }
    }
}

/// Standard normal CDF approximation.
fn norm_cdf(x: f64) -> f64 {
    0.5 * (1.0 + erf(x / std::f64::consts::SQRT_2))
}

/// Standard normal PDF.
fn norm_pdf(x: f64) -> f64 {
    (-x * x / 2.0).exp() / (2.0 * std::f64::consts::PI).sqrt()
}

/// Abramowitz-Stegun error function approximation.
fn erf(x: f64) -> f64 {
    let a1 = 0.254829592;
    let a2 = -0.284496736;
    let a3 = 1.421413741;
    let a4 = -1.453152027;
    let a5 = 1.061405429;
    let p = 0.3275911;

    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();

    let t = 1.0 / (1.0 + p * x);
    let y = 1.0 - (((((a5 * t + a4) * t) + a3) * t + a2) * t + a1) * t * (-x * x).exp();

    sign * y
}
