// ===============================
// src/config.rs
// ===============================
/*
=============================================================================
Project : prosperity_trader: per-timestep multi-product trading engine
Module  : config.rs
Version : 0.1.0
License : MIT (see LICENSE)

Summary : Fair-value estimation, inventory-aware market making, composite
          statistical arbitrage and conversion arbitrage for a simulated
          multi-product exchange, with a replay / paper-trading driver,
          Prometheus metrics and JSONL event recording.
=============================================================================
*/
use clap::{Parser, ValueEnum};
use dotenvy::dotenv;
use std::collections::BTreeMap;
use std::env;

use crate::basket::{CompositeCfg, Leg, SyntheticModel};
use crate::fair_value::{EstimatorError, FixedAnchor, LinearRegression, RollingMean};
use crate::strategy::{MarketMaker, QuotePolicy};
use crate::trader::{Handler, ProductStrategy, StrategyTable};

/// Where snapshots come from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum FeedMode {
    /// Seeded random-walk books for every configured product.
    Mock,
    /// JSON lines of MarketSnapshot read from `--replay-file`.
    Replay,
}

impl FeedMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedMode::Mock => "mock",
            FeedMode::Replay => "replay",
        }
    }
}

/// Fair-value model for the rolling-estimate product.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum RollingEstimator {
    RollingMean,
    Regression,
}

#[derive(Parser, Clone, Debug)]
#[command(name = "prosperity_trader", about = "Replay or paper-trade the multi-product engine")]
pub struct Args {
    #[arg(long, env = "FEED_MODE", value_enum, default_value_t = FeedMode::Mock)]
    pub feed_mode: FeedMode,

    /// JSONL snapshots, required with `--feed-mode replay`.
    #[arg(long, env = "REPLAY_FILE")]
    pub replay_file: Option<String>,

    /// Append every snapshot/decision/fill to this JSONL file.
    #[arg(long, env = "RECORD_FILE")]
    pub record_file: Option<String>,

    /// 0 disables the metrics endpoint.
    #[arg(long, env = "METRICS_PORT", default_value_t = 9898)]
    pub metrics_port: u16,

    /// Number of mock timesteps.
    #[arg(long, env = "TIMESTEPS", default_value_t = 10_000)]
    pub timesteps: u64,

    #[arg(long, env = "SEED", default_value_t = 7)]
    pub seed: u64,

    /// Products for the mock feed (defaults to every product with a limit).
    #[arg(long, env = "PRODUCTS", value_delimiter = ',')]
    pub products: Vec<String>,

    #[arg(long, env = "STARFRUIT_ESTIMATOR", value_enum, default_value_t = RollingEstimator::RollingMean)]
    pub starfruit_estimator: RollingEstimator,
}

/// Symmetric position limits, one entry per tradable product.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Limits {
    by_symbol: BTreeMap<String, i64>,
}

impl Default for Limits {
    fn default() -> Self {
        let by_symbol = [
            ("AMETHYSTS", 20),
            ("STARFRUIT", 20),
            ("ORCHIDS", 100),
            ("CHOCOLATE", 250),
            ("STRAWBERRIES", 350),
            ("ROSES", 60),
            ("GIFT_BASKET", 60),
            ("COCONUT", 300),
            ("COCONUT_COUPON", 600),
        ]
        .into_iter()
        .map(|(s, l)| (s.to_string(), l))
        .collect();
        Self { by_symbol }
    }
}

impl Limits {
    /// Defaults overridden by `LIMIT_<SYMBOL>=n` variables.
    pub fn from_env() -> Self {
        let mut lim = Self::default();
        for (symbol, limit) in lim.by_symbol.iter_mut() {
            if let Some(v) = env::var(format!("LIMIT_{symbol}")).ok().and_then(|x| x.parse::<i64>().ok()) {
                *limit = v.abs();
            }
        }
        lim
    }

    pub fn limit_of(&self, symbol: &str) -> Option<i64> { self.by_symbol.get(symbol).copied() }
    pub fn symbols(&self) -> impl Iterator<Item = &str> { self.by_symbol.keys().map(|s| s.as_str()) }
}

// ===== Calibrated constants =====

pub const AMETHYSTS_ANCHOR: i64 = 10_000;

/// Fitted on days -2..0; four lagged VWAP mids, oldest first.
pub const STARFRUIT_INTERCEPT: f64 = 11.302935408693884;
pub const STARFRUIT_COEF: [f64; 4] = [0.19276398, 0.22111366, 0.24350053, 0.34038018];

/// Fitted on days -1..1; four lagged mids, then sunlight, then humidity.
pub const ORCHIDS_INTERCEPT: f64 = 0.14551195562876273;
pub const ORCHIDS_COEF: [f64; 12] = [
    -2.16359544e-03, 9.82450923e-03, -1.23079864e-02, 1.00442531e+00,
    8.65723543e+00, -2.78822090e+01, 2.97898002e+01, -1.05648098e+01,
    2.34006780e+02, -1.29033746e+03, 1.87744151e+03, -8.21110222e+02,
];

pub const HISTORY_LEN: usize = 4;

pub fn strategy_table(args: &Args) -> Result<StrategyTable, EstimatorError> {
    let mut products = BTreeMap::new();

    products.insert(
        "AMETHYSTS".to_string(),
        ProductStrategy {
            estimator: Box::new(FixedAnchor { price: AMETHYSTS_ANCHOR }),
            handler: Handler::MarketMaker(MarketMaker::new(QuotePolicy {
                take_at_edge: false,
                quote_offset: 1,
                skew_fraction: Some(0.75),
            })),
            history_len: HISTORY_LEN,
        },
    );

    let starfruit_estimator: Box<dyn crate::fair_value::FairValueEstimator> = match args.starfruit_estimator {
        RollingEstimator::RollingMean => Box::new(RollingMean { window: HISTORY_LEN, min_observations: HISTORY_LEN }),
        RollingEstimator::Regression => Box::new(LinearRegression::new(
            STARFRUIT_INTERCEPT,
            STARFRUIT_COEF.to_vec(),
            Vec::new(),
            HISTORY_LEN,
        )?),
    };
    products.insert(
        "STARFRUIT".to_string(),
        ProductStrategy {
            estimator: starfruit_estimator,
            handler: Handler::MarketMaker(MarketMaker::new(QuotePolicy {
                take_at_edge: true,
                quote_offset: 0,
                skew_fraction: None,
            })),
            history_len: HISTORY_LEN,
        },
    );

    products.insert(
        "ORCHIDS".to_string(),
        ProductStrategy {
            estimator: Box::new(LinearRegression::new(
                ORCHIDS_INTERCEPT,
                ORCHIDS_COEF.to_vec(),
                vec!["sunlight".to_string(), "humidity".to_string()],
                HISTORY_LEN,
            )?),
            handler: Handler::Conversion(Default::default()),
            history_len: HISTORY_LEN,
        },
    );

    let composites = vec![
        CompositeCfg {
            symbol: "GIFT_BASKET".to_string(),
            model: SyntheticModel::Linear {
                legs: vec![
                    Leg { symbol: "CHOCOLATE".to_string(), ratio: 4.0 },
                    Leg { symbol: "STRAWBERRIES".to_string(), ratio: 6.0 },
                    Leg { symbol: "ROSES".to_string(), ratio: 1.0 },
                ],
            },
            window: 10,
            threshold: 2.0,
            size_divisor: 2.0,
        },
        CompositeCfg {
            symbol: "COCONUT_COUPON".to_string(),
            model: SyntheticModel::BlackScholesCall {
                underlying: "COCONUT".to_string(),
                strike: 10_000.0,
                days_to_expiry: 250.0,
                rate: 0.0,
                sigma: 0.01011932923,
            },
            window: 5,
            threshold: 2.0,
            size_divisor: 2.0,
        },
    ];

    Ok(StrategyTable { products, composites })
}

pub fn load() -> (Args, Limits) {
    // .env first so clap's env fallbacks see it
    let _ = dotenv();
    let mut args = Args::parse();
    let limits = Limits::from_env();
    if args.products.is_empty() {
        args.products = limits.symbols().map(str::to_string).collect();
    }
    args.products = args.products.iter().map(|s| s.trim().to_ascii_uppercase()).filter(|s| !s.is_empty()).collect();
    (args, limits)
}

/// Built-in defaults without consulting the process environment.
#[cfg(test)]
impl Args {
    pub(crate) fn builtin() -> Self {
        Args {
            feed_mode: FeedMode::Mock,
            replay_file: None,
            record_file: None,
            metrics_port: 9898,
            timesteps: 10_000,
            seed: 7,
            products: Vec::new(),
            starfruit_estimator: RollingEstimator::RollingMean,
        }
    }
}
