// ===============================
// src/fair_value.rs
// ===============================
//
// Fair-value estimators. Each one turns a product's rolling memory into a Band:
// a point estimate plus a spread-derived half width. Until an estimator has
// enough history it returns Band::unbounded(), which nothing can trade against.
//
// 1) FixedAnchor      : constant price, zero half width (stationary products)
// 2) RollingMean      : mean of the last N VWAP mids, half width = mean spread / 2
// 3) LinearRegression : intercept + coef . [lagged mids, lagged factors...]
//
use statrs::statistics::Statistics;
use std::fmt::Debug;
use thiserror::Error;

use crate::memory::{ProductMemory, RollingWindow};

pub const UNBOUNDED_LOW: i64 = i64::MIN / 4;
pub const UNBOUNDED_HIGH: i64 = i64::MAX / 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Band {
    fair: i64,
    half_width: i64,
    lower: i64,
    upper: i64,
}

impl Band {
    pub fn new(fair: i64, half_width: i64) -> Self {
        let half_width = half_width.max(0);
        Self { fair, half_width, lower: fair - half_width, upper: fair + half_width }
    }

    pub fn unbounded() -> Self {
        Self { fair: 0, half_width: 0, lower: UNBOUNDED_LOW, upper: UNBOUNDED_HIGH }
    }

    pub fn fair(&self) -> i64 { self.fair }
    pub fn half_width(&self) -> i64 { self.half_width }
    pub fn lower(&self) -> i64 { self.lower }
    pub fn upper(&self) -> i64 { self.upper }
    pub fn is_bounded(&self) -> bool { self.lower > UNBOUNDED_LOW && self.upper < UNBOUNDED_HIGH }
}

pub trait FairValueEstimator: Debug + Send + Sync {
    fn name(&self) -> &'static str;

    /// Exogenous factor windows this estimator reads, in coefficient order.
    fn factors(&self) -> &[String] { &[] }

    fn estimate(&self, mem: &ProductMemory) -> Band;
}

/// round(mean spread) / 2, floored.
fn spread_half_width(spreads: &RollingWindow, window: usize) -> i64 {
    if spreads.is_empty() {
        return 0;
    }
    let spread = spreads.tail(window).mean().round() as i64;
    spread.div_euclid(2)
}

#[derive(Debug, Clone)]
pub struct FixedAnchor {
    pub price: i64,
}

impl FairValueEstimator for FixedAnchor {
    fn name(&self) -> &'static str { "fixed_anchor" }
    fn estimate(&self, _mem: &ProductMemory) -> Band { Band::new(self.price, 0) }
}

#[derive(Debug, Clone)]
pub struct RollingMean {
    pub window: usize,
    pub min_observations: usize,
}

impl FairValueEstimator for RollingMean {
    fn name(&self) -> &'static str { "rolling_mean" }

    fn estimate(&self, mem: &ProductMemory) -> Band {
        if mem.mids.len() < self.min_observations.max(1) {
            return Band::unbounded();
        }
        let fair = mem.mids.tail(self.window).mean().round() as i64;
        Band::new(fair, spread_half_width(&mem.spreads, self.window))
    }
}

#[derive(Debug, Error)]
pub enum EstimatorError {
    #[error("regression over {lags} lags and {factors} factors needs {expected} coefficients, got {got}")]
    CoefficientCount { lags: usize, factors: usize, expected: usize, got: usize },
}

#[derive(Debug, Clone)]
pub struct LinearRegression {
    intercept: f64,
    coefficients: Vec<f64>,
    factors: Vec<String>,
    lags: usize,
}

impl LinearRegression {
    /// Coefficients are laid out as `lags` price terms followed by `lags` terms
    /// for each factor, oldest value first within each block.
    pub fn new(
        intercept: f64,
        coefficients: Vec<f64>,
        factors: Vec<String>,
        lags: usize,
    ) -> Result<Self, EstimatorError> {
        let expected = lags * (1 + factors.len());
        if coefficients.len() != expected {
            return Err(EstimatorError::CoefficientCount {
                lags,
                factors: factors.len(),
                expected,
                got: coefficients.len(),
            });
        }
        Ok(Self { intercept, coefficients, factors, lags })
    }

    fn inputs<'a>(&self, mem: &'a ProductMemory) -> Option<Vec<&'a RollingWindow>> {
        let mut out = vec![&mem.mids];
        for f in &self.factors {
            out.push(mem.factor(f)?);
        }
        if out.iter().any(|w| w.len() < self.lags) {
            return None;
        }
        Some(out)
    }
}

impl FairValueEstimator for LinearRegression {
    fn name(&self) -> &'static str { "linear_regression" }

    fn factors(&self) -> &[String] { &self.factors }

    fn estimate(&self, mem: &ProductMemory) -> Band {
        let Some(windows) = self.inputs(mem) else {
            return Band::unbounded();
        };
        let price = windows
            .iter()
            .flat_map(|w| w.tail(self.lags))
            .zip(&self.coefficients)
            .fold(self.intercept, |acc, (x, c)| acc + c * x);
        Band::new(price.round() as i64, spread_half_width(&mem.spreads, self.lags))
    }
}
