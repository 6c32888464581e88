// ===============================
// src/feed.rs
// ===============================
//
// Snapshot sources:
// - run_replay : JSON lines of MarketSnapshot from a file, one per timestep
// - run_mock   : seeded random-walk books for every configured product
//
// Both push into a bounded channel and return when they run out (or the
// engine hangs up), so backpressure comes from the engine loop.
//
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use thiserror::Error;
use tokio::{
    fs::File,
    io::{AsyncBufReadExt, BufReader},
    sync::mpsc,
};
use tracing::{info, warn};

use crate::basket::black_scholes_call;
use crate::domain::{ConversionObservation, MarketSnapshot, OrderDepth};

/// Exchange clock step between snapshots.
pub const TIMESTEP: i64 = 100;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("replay file: {0}")]
    Io(#[from] std::io::Error),
    #[error("replay line {line}: {source}")]
    Json { line: usize, source: serde_json::Error },
}

pub fn parse_line(line: usize, text: &str) -> Result<MarketSnapshot, FeedError> {
    serde_json::from_str(text).map_err(|source| FeedError::Json { line, source })
}

/// Streams every parseable line; bad lines are logged and skipped.
/// Returns the number of snapshots delivered.
pub async fn run_replay(path: String, tx: mpsc::Sender<MarketSnapshot>) -> Result<u64, FeedError> {
    let file = File::open(&path).await?;
    let mut lines = BufReader::new(file).lines();
    let mut n = 0_usize;
    let mut sent = 0_u64;
    while let Some(text) = lines.next_line().await? {
        n += 1;
        if text.trim().is_empty() {
            continue;
        }
        match parse_line(n, &text) {
            Ok(snap) => {
                if tx.send(snap).await.is_err() {
                    break;
                }
                sent += 1;
            }
            Err(e) => warn!(error = %e, "skipping snapshot"),
        }
    }
    info!(%path, sent, "replay finished");
    Ok(sent)
}

// ----- mock market -----

#[derive(Debug, Clone, Copy)]
struct Walk {
    mid: f64,
    step: f64,
    anchor: Option<f64>,
}

/// Random-walk market that keeps the composite products loosely tied to
/// their components so the arbitrage paths see realistic divergences.
pub struct MockMarket {
    rng: StdRng,
    products: Vec<String>,
    walks: BTreeMap<&'static str, Walk>,
    sunlight: f64,
    humidity: f64,
    timestamp: i64,
}

const BASKET_PREMIUM: f64 = 380.0;

impl MockMarket {
    pub fn new(products: Vec<String>, seed: u64) -> Self {
        let walks = [
            ("AMETHYSTS", Walk { mid: 10_000.0, step: 0.0, anchor: Some(10_000.0) }),
            ("STARFRUIT", Walk { mid: 5_000.0, step: 1.5, anchor: None }),
            ("ORCHIDS", Walk { mid: 1_100.0, step: 2.0, anchor: None }),
            ("CHOCOLATE", Walk { mid: 8_000.0, step: 1.0, anchor: None }),
            ("STRAWBERRIES", Walk { mid: 4_000.0, step: 0.5, anchor: None }),
            ("ROSES", Walk { mid: 14_500.0, step: 3.0, anchor: None }),
            ("COCONUT", Walk { mid: 10_000.0, step: 2.0, anchor: None }),
        ]
        .into_iter()
        .collect();
        Self {
            rng: StdRng::seed_from_u64(seed),
            products,
            walks,
            sunlight: 2_500.0,
            humidity: 80.0,
            timestamp: 0,
        }
    }

    fn advance(&mut self) {
        for w in self.walks.values_mut() {
            match w.anchor {
                Some(a) => w.mid = a,
                None => {
                    let step = w.step;
                    w.mid += self.rng.gen_range(-step..=step);
                }
            }
        }
        self.sunlight = (self.sunlight + self.rng.gen_range(-20.0..=20.0)).clamp(0.0, 5_000.0);
        self.humidity = (self.humidity + self.rng.gen_range(-0.5..=0.5)).clamp(0.0, 100.0);
    }

    fn mid_of(&mut self, symbol: &str) -> Option<f64> {
        if let Some(w) = self.walks.get(symbol) {
            return Some(w.mid);
        }
        match symbol {
            "GIFT_BASKET" => {
                let synth = 4.0 * self.walks["CHOCOLATE"].mid
                    + 6.0 * self.walks["STRAWBERRIES"].mid
                    + self.walks["ROSES"].mid;
                Some(synth + BASKET_PREMIUM + self.rng.gen_range(-60.0..=60.0))
            }
            "COCONUT_COUPON" => {
                let spot = self.walks["COCONUT"].mid;
                let fair = black_scholes_call(spot, 10_000.0, 250.0, 0.0, 0.01011932923)?;
                Some((fair + self.rng.gen_range(-8.0..=8.0)).max(1.0))
            }
            _ => None,
        }
    }

    fn depth_around(&mut self, mid: f64) -> OrderDepth {
        let half = self.rng.gen_range(1..=3_i64);
        let center = mid.round() as i64;
        let (bid, ask) = (center - half, center + half);
        let mut d = OrderDepth::default();
        d.buy_orders.insert(bid, self.rng.gen_range(1..=30));
        d.sell_orders.insert(ask, -self.rng.gen_range(1..=30));
        if self.rng.gen_bool(0.5) {
            d.buy_orders.insert(bid - 2, self.rng.gen_range(5..=30));
            d.sell_orders.insert(ask + 2, -self.rng.gen_range(5..=30));
        }
        d
    }

    pub fn next_snapshot(&mut self) -> MarketSnapshot {
        self.advance();
        let mut snap = MarketSnapshot { timestamp: self.timestamp, ..Default::default() };
        self.timestamp += TIMESTEP;

        for symbol in self.products.clone() {
            let Some(mid) = self.mid_of(&symbol) else {
                continue;
            };
            let depth = self.depth_around(mid);
            snap.order_depths.insert(symbol.clone(), depth);
            if symbol == "ORCHIDS" {
                let obs = ConversionObservation {
                    bid_price: mid - 1.5 + self.rng.gen_range(-1.0..=1.0),
                    ask_price: mid + 1.5 + self.rng.gen_range(-1.0..=1.0),
                    transport_fees: 0.9,
                    export_tariff: 9.5,
                    import_tariff: -2.5,
                    sunlight: self.sunlight,
                    humidity: self.humidity,
                };
                snap.observations.conversion.insert(symbol, obs);
            }
        }
        snap
    }
}

pub async fn run_mock(tx: mpsc::Sender<MarketSnapshot>, products: Vec<String>, steps: u64, seed: u64) {
    let mut market = MockMarket::new(products, seed);
    for _ in 0..steps {
        if tx.send(market.next_snapshot()).await.is_err() {
            break;
        }
    }
    info!(steps, "mock feed finished");
}
