//! Option chain analytics.
//!
//! Chains come from a synthetic generator seeded with the live spot price or
//! are ingested from external workflows. [`ChainService`] caches them; the
//! [`analytics`] functions derive put/call ratios, max pain and open
//! interest breakdowns, and [`filter`] narrows a chain to a strike window.

pub mod analytics;
pub mod chain;
pub mod filter;
pub mod greeks;
mod service;
pub mod synthetic;

pub use analytics::{
    Buildup, ChainAnalysis, ChainSummary, MaxPainResult, OiAnalysis, PcrResult, Sentiment,
    analyze, max_pain, oi_analysis, pcr, summarize,
};
pub use chain::{ChainSource, Greeks, LegSide, OptionChain, OptionLeg, StrikeRow};
pub use filter::{FilterCriteria, Moneyness, filter_chain};
pub use greeks::OptionPricer;
pub use service::{ChainService, UnderlyingInfo, UnderlyingSpec};
