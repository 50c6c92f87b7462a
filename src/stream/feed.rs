//! Simulated market feed.
//!
//! Each configured symbol follows an optionstratlib random walk (geometric
//! Brownian, mean reverting or jump diffusion). Every tick updates the quote
//! and tick history in the store, the OHLC bars and the spot price used for
//! option chains, then goes out on the stream hub.

use super::hub::{StreamEvent, StreamHub};
use crate::config::{SymbolConfig, WalkTypeConfig};
use crate::db::TickData;
use crate::ohlc::OhlcAggregator;
use crate::option_chain::ChainService;
use crate::store::Store;
use optionstratlib::prelude::{
    ExpirationDate, Positive, Step, TimeFrame, WalkParams, WalkType, WalkTypeAble, Xstep, Ystep,
    convert_time_frame, pos_or_panic,
};
use parking_lot::Mutex;
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::fmt::Display;
use std::ops::AddAssign;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info};

/// Steps generated per walk before it is regenerated from the last price.
const PATH_STEPS: usize = 1_440;

struct Walker;

impl<X, Y> WalkTypeAble<X, Y> for Walker
where
    X: Copy + Into<Positive> + AddAssign + Display,
    Y: Into<Positive> + Display + Clone,
{
}

/// Generates `n_steps` prices starting at `initial_price`.
///
/// `initial_price` and `volatility` must be positive.
fn generate_price_path(
    initial_price: f64,
    volatility: f64,
    drift: f64,
    walk_type: WalkTypeConfig,
    n_steps: usize,
) -> Vec<f64> {
    let initial = pos_or_panic!(initial_price);
    let vol = pos_or_panic!(volatility);
    let drift = Decimal::try_from(drift).unwrap_or(dec!(0.0));
    let days = Positive::THIRTY;
    let dt = convert_time_frame(Positive::ONE / days, &TimeFrame::Minute, &TimeFrame::Day);

    let walk_type = match walk_type {
        WalkTypeConfig::GeometricBrownian => WalkType::GeometricBrownian {
            dt,
            drift,
            volatility: vol,
        },
        WalkTypeConfig::MeanReverting => WalkType::MeanReverting {
            dt,
            volatility: vol,
            speed: pos_or_panic!(0.5),
            mean: initial,
        },
        WalkTypeConfig::JumpDiffusion => WalkType::JumpDiffusion {
            dt,
            drift,
            volatility: vol,
            intensity: pos_or_panic!(0.1),
            jump_mean: dec!(0.0),
            jump_volatility: pos_or_panic!(0.05),
        },
    };

    let params: WalkParams<Positive, Positive> = WalkParams {
        size: n_steps,
        init_step: Step {
            x: Xstep::new(Positive::ONE, TimeFrame::Minute, ExpirationDate::Days(days)),
            y: Ystep::new(0, initial),
        },
        walk_type,
        walker: Box::new(Walker),
    };

    let steps = match &params.walk_type {
        WalkType::MeanReverting { .. } => params.walker.mean_reverting(&params),
        WalkType::JumpDiffusion { .. } => params.walker.jump_diffusion(&params),
        _ => params.walker.geometric_brownian(&params),
    }
    .unwrap_or_default();

    steps.into_iter().map(|p: Positive| p.to_f64()).collect()
}

/// Random walk state of one symbol.
struct PriceWalk {
    symbol: String,
    price: f64,
    session_open: f64,
    volatility: f64,
    drift: f64,
    tick_size: f64,
    walk_type: WalkTypeConfig,
    path: Vec<f64>,
    index: usize,
}

impl PriceWalk {
    fn new(config: &SymbolConfig) -> Self {
        let tick_size = if config.tick_size > 0.0 {
            config.tick_size
        } else {
            0.05
        };
        let price = config.initial_price.max(tick_size);
        let volatility = config.volatility.max(f64::EPSILON);
        Self {
            symbol: config.symbol.to_uppercase(),
            price,
            session_open: price,
            volatility,
            drift: config.drift,
            tick_size,
            walk_type: config.walk_type,
            path: generate_price_path(price, volatility, config.drift, config.walk_type, PATH_STEPS),
            index: 0,
        }
    }

    /// Next raw price on the path, regenerating it from the current price
    /// once exhausted.
    fn next_price(&mut self) -> f64 {
        self.index += 1;
        if self.index >= self.path.len() {
            self.path = generate_price_path(
                self.price,
                self.volatility,
                self.drift,
                self.walk_type,
                PATH_STEPS,
            );
            self.index = 1;
        }
        self.path.get(self.index).copied().unwrap_or(self.price)
    }

    /// Advances the walk one step and returns the resulting tick.
    fn step<R: Rng>(&mut self, rng: &mut R, timestamp_ms: u64) -> TickData {
        let raw = self.next_price();
        self.price = ((raw / self.tick_size).round() * self.tick_size).max(self.tick_size);

        let change = self.price - self.session_open;
        TickData {
            symbol: self.symbol.clone(),
            ltp: self.price,
            bid: (self.price - self.tick_size).max(0.0),
            ask: self.price + self.tick_size,
            volume: rng.gen_range(1..500),
            change,
            change_pct: change / self.session_open * 100.0,
            timestamp_ms,
        }
    }
}

/// Tick simulator and option chain broadcaster.
pub struct MarketFeed {
    store: Arc<Store>,
    hub: Arc<StreamHub>,
    ohlc: Arc<OhlcAggregator>,
    chains: Arc<ChainService>,
    walks: Mutex<Vec<PriceWalk>>,
    rng: Mutex<StdRng>,
    tick_interval: Duration,
    broadcast_interval: Duration,
}

impl MarketFeed {
    /// Creates a feed for `symbols`.
    #[must_use]
    pub fn new(
        symbols: &[SymbolConfig],
        store: Arc<Store>,
        hub: Arc<StreamHub>,
        ohlc: Arc<OhlcAggregator>,
        chains: Arc<ChainService>,
        tick_interval: Duration,
        broadcast_interval: Duration,
    ) -> Self {
        Self {
            store,
            hub,
            ohlc,
            chains,
            walks: Mutex::new(symbols.iter().map(PriceWalk::new).collect()),
            rng: Mutex::new(StdRng::from_entropy()),
            tick_interval,
            broadcast_interval,
        }
    }

    /// Produces one tick per symbol and fans it out.
    pub fn tick_once(&self) -> Vec<TickData> {
        let now_ms = super::protocol::now_ms();
        let ticks: Vec<TickData> = {
            let mut rng = self.rng.lock();
            self.walks
                .lock()
                .iter_mut()
                .map(|walk| walk.step(&mut *rng, now_ms))
                .collect()
        };

        for tick in &ticks {
            self.store.record_tick(tick);
            self.ohlc
                .record_tick(&tick.symbol, tick.timestamp_ms, tick.ltp, tick.volume);
            self.hub.publish(StreamEvent::Tick(tick.clone()));
        }
        ticks
    }

    /// Publishes the summary of every available option chain.
    pub fn broadcast_chains(&self) -> usize {
        let summaries = self.chains.summaries();
        let count = summaries.len();
        for summary in summaries {
            self.hub.publish(StreamEvent::OptionChain(summary));
        }
        count
    }

    /// Runs the tick loop forever.
    pub async fn run_ticks(self: Arc<Self>) {
        info!(
            symbols = self.walks.lock().len(),
            interval_ms = self.tick_interval.as_millis() as u64,
            "Starting market feed"
        );
        let mut ticker = interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let ticks = self.tick_once();
            debug!(count = ticks.len(), "Published ticks");
        }
    }

    /// Runs the option chain broadcast loop forever.
    pub async fn run_chain_broadcast(self: Arc<Self>) {
        let mut ticker = interval(self.broadcast_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            self.chains.evict_expired();
            let count = self.broadcast_chains();
            debug!(count, "Published option chain summaries");
        }
    }
}
