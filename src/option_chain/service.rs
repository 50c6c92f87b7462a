//! Option chain cache and sources.

use super::analytics::{ChainSummary, enrich, summarize};
use super::chain::{ChainSource, OptionChain};
use super::greeks::OptionPricer;
use super::synthetic::{SyntheticParams, generate, next_weekly_expiry};
use crate::config::OptionChainConfig;
use crate::error::ApiError;
use crate::settings::{
    CHAIN_CACHE_TTL_SECS, DEFAULT_IV, RISK_FREE_RATE, STRIKES_PER_SIDE, SettingsStore,
};
use crate::store::Store;
use chrono::{NaiveDate, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use utoipa::ToSchema;

/// Furthest expiry, in days from today, a chain is generated for.
pub const MAX_EXPIRY_DAYS: i64 = 366;

/// Strike grid of an underlying with generated chains.
#[derive(Debug, Clone, Copy)]
pub struct UnderlyingSpec {
    /// Distance between strikes.
    pub strike_step: f64,
    /// Contract lot size.
    pub lot_size: u32,
}

/// An underlying with chain data available.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct UnderlyingInfo {
    /// Underlying symbol.
    pub underlying: String,
    /// Latest spot price.
    pub spot_price: Option<f64>,
    /// Expiries currently cached.
    pub cached_expiries: Vec<NaiveDate>,
}

#[derive(Debug, Clone)]
struct CachedChain {
    chain: Arc<OptionChain>,
    cached_at: Instant,
}

/// Serves option chains from cache, the synthetic generator or ingested data.
pub struct ChainService {
    store: Arc<Store>,
    settings: Arc<SettingsStore>,
    defaults: OptionChainConfig,
    specs: DashMap<String, UnderlyingSpec>,
    cache: DashMap<(String, NaiveDate), CachedChain>,
}

impl ChainService {
    /// Creates a service. `defaults` backs settings that are missing.
    #[must_use]
    pub fn new(store: Arc<Store>, settings: Arc<SettingsStore>, defaults: OptionChainConfig) -> Self {
        Self {
            store,
            settings,
            defaults,
            specs: DashMap::new(),
            cache: DashMap::new(),
        }
    }

    /// Enables generated chains for an underlying.
    pub fn register(&self, underlying: &str, spec: UnderlyingSpec) {
        self.specs.insert(underlying.to_uppercase(), spec);
    }

    /// Pricer configured from the live settings.
    #[must_use]
    pub fn pricer(&self) -> OptionPricer {
        OptionPricer::new(
            self.settings
                .f64_or(RISK_FREE_RATE, self.defaults.risk_free_rate),
            self.settings.f64_or(DEFAULT_IV, self.defaults.default_iv),
        )
    }

    fn ttl(&self) -> Duration {
        Duration::from_secs(
            self.settings
                .u64_or(CHAIN_CACHE_TTL_SECS, self.defaults.cache_ttl_secs),
        )
    }

    /// Number of cached chains.
    #[must_use]
    pub fn cached_count(&self) -> usize {
        self.cache.len()
    }

    /// Drops chains past their expiry and generated chains older than the TTL.
    ///
    /// Returns the number of entries removed.
    pub fn evict_expired(&self) -> usize {
        let today = Utc::now().date_naive();
        let ttl = self.ttl();
        let before = self.cache.len();
        self.cache.retain(|(_, expiry), entry| {
            *expiry >= today
                && (entry.chain.source == ChainSource::Ingested || entry.cached_at.elapsed() < ttl)
        });
        let evicted = before.saturating_sub(self.cache.len());
        if evicted > 0 {
            debug!(evicted, "Evicted option chains");
        }
        evicted
    }

    /// Nearest cached ingested expiry, else the next weekly expiry.
    fn default_expiry(&self, underlying: &str) -> NaiveDate {
        let today = Utc::now().date_naive();
        self.cache
            .iter()
            .filter(|e| {
                e.key().0 == underlying
                    && e.key().1 >= today
                    && e.value().chain.source == ChainSource::Ingested
            })
            .map(|e| e.key().1)
            .min()
            .unwrap_or_else(|| next_weekly_expiry(today))
    }

    /// Returns the chain of `underlying`, building it when the cache is stale.
    ///
    /// Ingested chains are served until replaced or `refresh` is requested;
    /// generated chains live for the configured cache TTL.
    ///
    /// # Errors
    /// Returns `Validation` for past expiries and for generated expiries more
    /// than [`MAX_EXPIRY_DAYS`] ahead. Returns `ChainNotFound` when the
    /// underlying has no cached chain and no spot price to generate one from.
    pub fn fetch(
        &self,
        underlying: &str,
        expiry: Option<NaiveDate>,
        refresh: bool,
    ) -> Result<Arc<OptionChain>, ApiError> {
        let underlying = underlying.trim().to_uppercase();
        let expiry = expiry.unwrap_or_else(|| self.default_expiry(&underlying));
        let today = Utc::now().date_naive();
        if expiry < today {
            return Err(ApiError::field("expiry", "must not be in the past"));
        }
        let key = (underlying.clone(), expiry);

        if !refresh && let Some(entry) = self.cache.get(&key) {
            let fresh = entry.chain.source == ChainSource::Ingested
                || entry.cached_at.elapsed() < self.ttl();
            if fresh {
                return Ok(Arc::clone(&entry.chain));
            }
        }

        if expiry > today + chrono::Duration::days(MAX_EXPIRY_DAYS) {
            return Err(ApiError::field(
                "expiry",
                format!("must be within {MAX_EXPIRY_DAYS} days"),
            ));
        }
        let chain = Arc::new(self.generate(&underlying, expiry)?);
        self.evict_expired();
        debug!(underlying = %underlying, %expiry, strikes = chain.strikes.len(), "Generated option chain");
        self.cache.insert(
            key,
            CachedChain {
                chain: Arc::clone(&chain),
                cached_at: Instant::now(),
            },
        );
        Ok(chain)
    }

    fn generate(&self, underlying: &str, expiry: NaiveDate) -> Result<OptionChain, ApiError> {
        let not_found = || ApiError::ChainNotFound(underlying.to_string());
        let spec = self.specs.get(underlying).map(|s| *s).ok_or_else(not_found)?;
        let spot = self.store.last_price(underlying).ok_or_else(not_found)?;

        let params = SyntheticParams {
            underlying: underlying.to_string(),
            spot,
            expiry,
            strike_step: spec.strike_step,
            strikes_per_side: self
                .settings
                .u64_or(STRIKES_PER_SIDE, self.defaults.strikes_per_side as u64)
                as usize,
            lot_size: spec.lot_size,
        };
        Ok(generate(&params, &self.pricer(), &mut rand::thread_rng()))
    }

    /// Replaces the cached chain with externally supplied data.
    ///
    /// Missing IVs and greeks are computed from leg prices.
    ///
    /// # Errors
    /// Returns `Validation` for non-positive or duplicate strikes.
    pub fn ingest(&self, mut chain: OptionChain) -> Result<Arc<OptionChain>, ApiError> {
        chain.normalize()?;
        chain.source = ChainSource::Ingested;
        chain.fetched_at = Utc::now();
        enrich(&mut chain, &self.pricer());

        let chain = Arc::new(chain);
        self.evict_expired();
        self.cache.insert(
            (chain.underlying.clone(), chain.expiry),
            CachedChain {
                chain: Arc::clone(&chain),
                cached_at: Instant::now(),
            },
        );
        info!(
            underlying = %chain.underlying,
            expiry = %chain.expiry,
            strikes = chain.strikes.len(),
            "Ingested option chain"
        );
        Ok(chain)
    }

    /// Underlyings with a spot price or a cached chain, sorted by name.
    #[must_use]
    pub fn underlyings(&self) -> Vec<UnderlyingInfo> {
        let mut names: Vec<String> = self
            .specs
            .iter()
            .filter(|e| self.store.last_price(e.key()).is_some())
            .map(|e| e.key().clone())
            .chain(self.cache.iter().map(|e| e.key().0.clone()))
            .collect();
        names.sort();
        names.dedup();

        names
            .into_iter()
            .map(|underlying| {
                let mut cached_expiries: Vec<NaiveDate> = self
                    .cache
                    .iter()
                    .filter(|e| e.key().0 == underlying)
                    .map(|e| e.key().1)
                    .collect();
                cached_expiries.sort();
                UnderlyingInfo {
                    spot_price: self.store.last_price(&underlying),
                    underlying,
                    cached_expiries,
                }
            })
            .collect()
    }

    /// Summaries of the default chain of every available underlying.
    #[must_use]
    pub fn summaries(&self) -> Vec<ChainSummary> {
        self.underlyings()
            .into_iter()
            .filter_map(|info| self.fetch(&info.underlying, None, false).ok())
            .map(|chain| summarize(&chain))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::option_chain::chain::fixtures::chain;
    use crate::test_support::{store, tick};

    fn service_with_ttl(ttl: u64) -> ChainService {
        let store = store();
        store.record_tick(&tick("NIFTY", 22_530.0));
        let config = Config::default();
        let settings = Arc::new(SettingsStore::from_config(&config));
        let mut values = serde_json::Map::new();
        values.insert(CHAIN_CACHE_TTL_SECS.to_string(), serde_json::json!(ttl));
        settings
            .update(values, crate::settings::MergeStrategy::Merge, None)
            .unwrap();
        let service = ChainService::new(store, settings, config.option_chain);
        service.register(
            "NIFTY",
            UnderlyingSpec {
                strike_step: 50.0,
                lot_size: 75,
            },
        );
        service
    }

    #[test]
    fn test_fetch_generates_and_caches() {
        let service = service_with_ttl(60);
        let first = service.fetch("nifty", None, false).unwrap();
        assert_eq!(first.underlying, "NIFTY");
        assert_eq!(first.lot_size, 75);
        assert_eq!(first.strikes.len(), 21);
        assert_eq!(first.expiry, next_weekly_expiry(Utc::now().date_naive()));

        let second = service.fetch("NIFTY", None, false).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let refreshed = service.fetch("NIFTY", None, true).unwrap();
        assert!(!Arc::ptr_eq(&first, &refreshed));
        assert_eq!(service.cached_count(), 1);
    }

    #[test]
    fn test_zero_ttl_always_rebuilds() {
        let service = service_with_ttl(0);
        let first = service.fetch("NIFTY", None, false).unwrap();
        let second = service.fetch("NIFTY", None, false).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_unknown_underlying_is_not_found() {
        let service = service_with_ttl(60);
        assert!(matches!(
            service.fetch("UNKNOWN", None, false),
            Err(ApiError::ChainNotFound(_))
        ));
    }

    #[test]
    fn test_ingest_replaces_and_is_served() {
        let service = service_with_ttl(0);
        let mut external = chain(101.0, &[(110.0, 10, 5), (100.0, 20, 30)]);
        external.underlying = "finnifty".to_string();
        external.expiry = Utc::now().date_naive() + chrono::Duration::days(30);

        let stored = service.ingest(external).unwrap();
        assert_eq!(stored.underlying, "FINNIFTY");
        assert_eq!(stored.source, ChainSource::Ingested);
        assert_eq!(stored.strikes[0].strike, 100.0);
        assert!(stored.strikes[0].call.as_ref().unwrap().greeks.is_some());

        // Served without a spot price, and despite a zero TTL.
        let fetched = service.fetch("FINNIFTY", None, false).unwrap();
        assert!(Arc::ptr_eq(&stored, &fetched));

        let names: Vec<String> = service
            .underlyings()
            .into_iter()
            .map(|u| u.underlying)
            .collect();
        assert_eq!(names, vec!["FINNIFTY", "NIFTY"]);
    }

    #[test]
    fn test_ingest_rejects_duplicate_strikes() {
        let service = service_with_ttl(60);
        let external = chain(100.0, &[(100.0, 1, 1), (100.0, 1, 1)]);
        assert!(matches!(service.ingest(external), Err(ApiError::Validation(_))));
        assert_eq!(service.cached_count(), 0);
    }

    #[test]
    fn test_expiry_window_is_enforced() {
        let service = service_with_ttl(60);
        let today = Utc::now().date_naive();
        let past = today - chrono::Duration::days(1);
        let far = today + chrono::Duration::days(MAX_EXPIRY_DAYS + 1);
        for expiry in [past, far] {
            assert!(matches!(
                service.fetch("NIFTY", Some(expiry), false),
                Err(ApiError::Validation(_))
            ));
        }
        assert_eq!(service.cached_count(), 0);

        let last = today + chrono::Duration::days(MAX_EXPIRY_DAYS);
        assert_eq!(service.fetch("NIFTY", Some(last), false).unwrap().expiry, last);
    }

    #[test]
    fn test_cache_stays_bounded() {
        let service = service_with_ttl(60);
        let today = Utc::now().date_naive();
        for offset in 0..2_000 {
            let _ = service.fetch("NIFTY", Some(today + chrono::Duration::days(offset)), false);
        }
        assert_eq!(service.cached_count(), MAX_EXPIRY_DAYS as usize + 1);

        let stale = service_with_ttl(0);
        for offset in 0..50 {
            stale
                .fetch("NIFTY", Some(today + chrono::Duration::days(offset)), false)
                .unwrap();
        }
        assert_eq!(stale.cached_count(), 1);
        assert_eq!(stale.evict_expired(), 1);
        assert_eq!(stale.cached_count(), 0);
    }

    #[test]
    fn test_summaries_cover_available_underlyings() {
        let service = service_with_ttl(60);
        let summaries = service.summaries();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].underlying, "NIFTY");
        assert_eq!(summaries[0].atm_strike, Some(22_550.0));
    }
}
