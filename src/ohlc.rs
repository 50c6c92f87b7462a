//! OHLC (Open, High, Low, Close) candlestick aggregation.
//!
//! Ticks from the market feed are folded into bars for every supported
//! interval, keyed by symbol.

use crate::models::{OhlcBar, OhlcInterval};
use dashmap::DashMap;
use std::collections::BTreeMap;

/// Key for storing OHLC bars: (symbol, interval).
type BarKey = (String, OhlcInterval);

/// OHLC aggregator that collects ticks and produces candlestick bars.
///
/// Each symbol/interval combination keeps a sorted map of bars by start
/// timestamp, capped at `max_bars` (oldest dropped first).
#[derive(Debug)]
pub struct OhlcAggregator {
    bars: DashMap<BarKey, BTreeMap<u64, OhlcBar>>,
    max_bars: usize,
}

impl Default for OhlcAggregator {
    fn default() -> Self {
        Self::new(2_000)
    }
}

impl OhlcAggregator {
    /// Creates a new aggregator keeping at most `max_bars` per series.
    #[must_use]
    pub fn new(max_bars: usize) -> Self {
        Self {
            bars: DashMap::new(),
            max_bars: max_bars.max(1),
        }
    }

    /// Records a tick and updates the bars of every interval.
    ///
    /// # Arguments
    ///
    /// * `symbol` - Symbol the tick belongs to
    /// * `timestamp_ms` - Tick timestamp in milliseconds since epoch
    /// * `price` - Last traded price
    /// * `volume` - Tick volume
    pub fn record_tick(&self, symbol: &str, timestamp_ms: u64, price: f64, volume: u64) {
        let timestamp_secs = timestamp_ms / 1000;
        for interval in OhlcInterval::ALL {
            self.update_bar(symbol, *interval, timestamp_secs, price, volume);
        }
    }

    fn update_bar(
        &self,
        symbol: &str,
        interval: OhlcInterval,
        timestamp_secs: u64,
        price: f64,
        volume: u64,
    ) {
        let bar_timestamp = interval.floor_timestamp(timestamp_secs);
        let key = (symbol.to_string(), interval);

        let mut series = self.bars.entry(key).or_default();
        series
            .entry(bar_timestamp)
            .and_modify(|bar| bar.update(price, volume))
            .or_insert_with(|| OhlcBar::new(bar_timestamp, price, volume));

        while series.len() > self.max_bars {
            series.pop_first();
        }
    }

    /// Gets bars for a symbol and interval within a time range.
    ///
    /// Returns at most `limit` bars, the most recent ones, sorted oldest first.
    #[must_use]
    pub fn get_bars(
        &self,
        symbol: &str,
        interval: OhlcInterval,
        from: Option<u64>,
        to: Option<u64>,
        limit: usize,
    ) -> Vec<OhlcBar> {
        let key = (symbol.to_string(), interval);

        let Some(series) = self.bars.get(&key) else {
            return Vec::new();
        };

        let from_ts = from.unwrap_or(0);
        let to_ts = to.unwrap_or(u64::MAX);
        if from_ts > to_ts {
            return Vec::new();
        }

        let mut bars: Vec<OhlcBar> = series
            .range(from_ts..=to_ts)
            .rev()
            .take(limit)
            .map(|(_, bar)| *bar)
            .collect();
        bars.reverse();
        bars
    }

    /// Gets the most recent bar for a symbol and interval.
    #[must_use]
    pub fn get_latest_bar(&self, symbol: &str, interval: OhlcInterval) -> Option<OhlcBar> {
        let key = (symbol.to_string(), interval);
        self.bars.get(&key)?.iter().next_back().map(|(_, bar)| *bar)
    }

    /// Returns the number of bars stored for a symbol and interval.
    #[must_use]
    pub fn bar_count(&self, symbol: &str, interval: OhlcInterval) -> usize {
        let key = (symbol.to_string(), interval);
        self.bars.get(&key).map_or(0, |m| m.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE_TS: u64 = 1_704_067_200_000; // 2024-01-01 00:00:00 UTC

    #[test]
    fn test_record_single_tick() {
        let aggregator = OhlcAggregator::default();
        aggregator.record_tick("NIFTY", BASE_TS, 22_500.0, 10);

        let bars = aggregator.get_bars("NIFTY", OhlcInterval::OneMinute, None, None, 100);
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].open, 22_500.0);
        assert_eq!(bars[0].close, 22_500.0);
        assert_eq!(bars[0].volume, 10);
        assert_eq!(bars[0].tick_count, 1);

        for interval in OhlcInterval::ALL {
            assert_eq!(aggregator.bar_count("NIFTY", *interval), 1);
        }
    }

    #[test]
    fn test_ticks_in_same_minute_fold_into_one_bar() {
        let aggregator = OhlcAggregator::default();
        aggregator.record_tick("NIFTY", BASE_TS, 100.0, 10);
        aggregator.record_tick("NIFTY", BASE_TS + 10_000, 104.0, 5);
        aggregator.record_tick("NIFTY", BASE_TS + 30_000, 98.0, 7);

        let bar = aggregator
            .get_latest_bar("NIFTY", OhlcInterval::OneMinute)
            .unwrap();
        assert_eq!(bar.open, 100.0);
        assert_eq!(bar.high, 104.0);
        assert_eq!(bar.low, 98.0);
        assert_eq!(bar.close, 98.0);
        assert_eq!(bar.volume, 22);
        assert_eq!(bar.tick_count, 3);
    }

    #[test]
    fn test_ticks_across_minutes_share_five_minute_bar() {
        let aggregator = OhlcAggregator::default();
        for i in 0..3 {
            aggregator.record_tick("NIFTY", BASE_TS + i * 60_000, 100.0 + i as f64, 1);
        }

        assert_eq!(aggregator.bar_count("NIFTY", OhlcInterval::OneMinute), 3);
        assert_eq!(aggregator.bar_count("NIFTY", OhlcInterval::FiveMinutes), 1);

        let bars = aggregator.get_bars("NIFTY", OhlcInterval::OneMinute, None, None, 100);
        assert!(bars[0].timestamp < bars[1].timestamp);
        assert!(bars[1].timestamp < bars[2].timestamp);
    }

    #[test]
    fn test_get_bars_range_and_limit_keep_latest() {
        let aggregator = OhlcAggregator::default();
        for i in 0..5 {
            aggregator.record_tick("NIFTY", BASE_TS + i * 60_000, 100.0 + i as f64, 1);
        }

        let from = BASE_TS / 1000 + 60;
        let to = BASE_TS / 1000 + 180;
        let ranged = aggregator.get_bars("NIFTY", OhlcInterval::OneMinute, Some(from), Some(to), 100);
        assert_eq!(ranged.len(), 3);

        let limited = aggregator.get_bars("NIFTY", OhlcInterval::OneMinute, None, None, 2);
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[1].close, 104.0);

        let inverted = aggregator.get_bars("NIFTY", OhlcInterval::OneMinute, Some(to), Some(from), 10);
        assert!(inverted.is_empty());
    }

    #[test]
    fn test_series_is_capped() {
        let aggregator = OhlcAggregator::new(3);
        for i in 0..5 {
            aggregator.record_tick("NIFTY", BASE_TS + i * 60_000, 100.0, 1);
        }
        assert_eq!(aggregator.bar_count("NIFTY", OhlcInterval::OneMinute), 3);
        let bars = aggregator.get_bars("NIFTY", OhlcInterval::OneMinute, None, None, 10);
        assert_eq!(bars[0].timestamp, BASE_TS / 1000 + 120);
    }

    #[test]
    fn test_unknown_symbol_is_empty() {
        let aggregator = OhlcAggregator::default();
        assert!(aggregator
            .get_bars("UNKNOWN", OhlcInterval::OneDay, None, None, 10)
            .is_empty());
        assert!(aggregator.get_latest_bar("UNKNOWN", OhlcInterval::OneDay).is_none());
    }
}
