// ===============================
// src/basket.rs
// ===============================
//
// Relative-value trading of a composite product against a synthetic replica.
//
// Every timestep the composite mid and the synthetic mid are appended to two
// parallel windows. Each series is standardised against its own rolling mean
// and sample std; the divergence is
//
//     z(composite) - z(synthetic)
//
// Above +threshold the composite is rich and gets sold at its best bid, below
// -threshold it is cheap and gets bought at its best ask. The clip starts at
// the top-of-book liquidity available on every leg (scaled by the ratios),
// grows with |divergence| / size_divisor and is capped by limit capacity.
// Only the composite is traded; legs are priced, not hedged.
//
use statrs::distribution::{ContinuousCDF, Normal};
use statrs::statistics::Statistics;
use std::collections::BTreeMap;
use tracing::debug;

use crate::book::Quote;
use crate::domain::{Order, OrderDepth};
use crate::memory::SeriesPair;
use crate::risk::Exposure;
use crate::trader::TraderError;

#[derive(Debug, Clone, PartialEq)]
pub struct Leg {
    pub symbol: String,
    pub ratio: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyntheticModel {
    /// Σ ratio × leg mid.
    Linear { legs: Vec<Leg> },
    /// European call on `underlying`, time in days.
    BlackScholesCall { underlying: String, strike: f64, days_to_expiry: f64, rate: f64, sigma: f64 },
}

impl SyntheticModel {
    pub fn inputs(&self) -> Vec<&str> {
        match self {
            SyntheticModel::Linear { legs } => legs.iter().map(|l| l.symbol.as_str()).collect(),
            SyntheticModel::BlackScholesCall { underlying, .. } => vec![underlying.as_str()],
        }
    }
}

pub fn black_scholes_call(spot: f64, strike: f64, t: f64, r: f64, sigma: f64) -> Option<f64> {
    if spot <= 0.0 || strike <= 0.0 || t <= 0.0 || sigma <= 0.0 {
        return None;
    }
    let n = Normal::new(0.0, 1.0).ok()?;
    let vol_t = sigma * t.sqrt();
    let d1 = ((spot / strike).ln() + (r + sigma * sigma / 2.0) * t) / vol_t;
    let d2 = d1 - vol_t;
    let px = spot * n.cdf(d1) - strike * (-r * t).exp() * n.cdf(d2);
    if px.is_finite() { Some(px) } else { None }
}

/// Standard score of the newest value; 0 when the window has no dispersion.
pub fn zscore<'a>(values: impl Iterator<Item = &'a f64> + Clone) -> f64 {
    let Some(last) = values.clone().last().copied() else {
        return 0.0;
    };
    let mean = values.clone().mean();
    let std = values.std_dev();
    if !std.is_finite() || std <= 0.0 {
        return 0.0;
    }
    (last - mean) / std
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompositeCfg {
    pub symbol: String,
    pub model: SyntheticModel,
    /// Observations used for rolling mean/std (also the stored history length).
    pub window: usize,
    pub threshold: f64,
    pub size_divisor: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArbDecision {
    pub divergence: Option<f64>,
    pub orders: Vec<Order>,
}

fn quote_of(depths: &BTreeMap<String, OrderDepth>, symbol: &str) -> Result<Option<Quote>, TraderError> {
    let depth = depths.get(symbol).ok_or_else(|| TraderError::MissingProduct(symbol.to_string()))?;
    Ok(Quote::from_depth(depth))
}

impl CompositeCfg {
    fn synthetic_mid(&self, legs: &BTreeMap<&str, Quote>) -> Option<f64> {
        match &self.model {
            SyntheticModel::Linear { legs: weights } => {
                weights.iter().map(|l| legs.get(l.symbol.as_str()).map(|q| l.ratio * q.mid())).sum()
            }
            SyntheticModel::BlackScholesCall { underlying, strike, days_to_expiry, rate, sigma } => {
                let spot = legs.get(underlying.as_str())?.mid();
                black_scholes_call(spot, *strike, *days_to_expiry, *rate, *sigma)
            }
        }
    }

    /// Legs' opposing top-of-book volume expressed in composite units.
    fn leg_capacity(&self, legs: &BTreeMap<&str, Quote>, selling_composite: bool) -> Option<i64> {
        let SyntheticModel::Linear { legs: weights } = &self.model else {
            return None;
        };
        weights.iter()
            .filter(|l| l.ratio > 0.0)
            .filter_map(|l| {
                let q = legs.get(l.symbol.as_str())?;
                let vol = if selling_composite { q.best_ask_vol } else { q.best_bid_vol };
                Some((vol as f64 / l.ratio).round() as i64)
            })
            .min()
    }

    /// One timestep of the arbitrage pass. Appends to `series` whenever every
    /// book involved is two-sided.
    pub fn evaluate(
        &self,
        depths: &BTreeMap<String, OrderDepth>,
        series: &mut SeriesPair,
        exposure: &mut Exposure,
    ) -> Result<ArbDecision, TraderError> {
        let Some(comp) = quote_of(depths, &self.symbol)? else {
            debug!(symbol = %self.symbol, "one-sided composite book, skipping");
            return Ok(ArbDecision::default());
        };
        let mut legs = BTreeMap::new();
        for sym in self.model.inputs() {
            match quote_of(depths, sym)? {
                Some(q) => {
                    legs.insert(sym, q);
                }
                None => {
                    debug!(symbol = %self.symbol, leg = sym, "one-sided leg book, skipping");
                    return Ok(ArbDecision::default());
                }
            }
        }
        let Some(synthetic) = self.synthetic_mid(&legs) else {
            return Ok(ArbDecision::default());
        };

        series.push(comp.mid(), synthetic);
        if series.len() < 2 {
            return Ok(ArbDecision::default());
        }

        let divergence = zscore(series.composite.tail(self.window)) - zscore(series.synthetic.tail(self.window));
        let mut decision = ArbDecision { divergence: Some(divergence), orders: Vec::new() };
        if divergence.abs() <= self.threshold {
            return Ok(decision);
        }

        let selling = divergence > 0.0;
        let own_vol = if selling { comp.best_bid_vol } else { comp.best_ask_vol };
        let base = match self.leg_capacity(&legs, selling) {
            Some(leg_vol) => own_vol.min(leg_vol),
            None => own_vol,
        };
        let scaled = (base as f64 * divergence.abs() / self.size_divisor).round() as i64;
        let room = if selling { exposure.sell_capacity() } else { exposure.buy_capacity() };
        let qty = scaled.min(room).min(exposure.limit);

        debug!(
            symbol = %self.symbol,
            divergence,
            composite = comp.mid(),
            synthetic,
            base,
            qty,
            "composite divergence"
        );
        if qty > 0 {
            let order = if selling {
                Order::new(&self.symbol, comp.best_bid, -qty)
            } else {
                Order::new(&self.symbol, comp.best_ask, qty)
            };
            exposure.apply(&order);
            decision.orders.push(order);
        }
        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn depth(bid: (i64, i64), ask: (i64, i64)) -> OrderDepth {
        OrderDepth {
            buy_orders: [bid].into_iter().collect(),
            sell_orders: [ask].into_iter().collect(),
        }
    }

    fn single_leg() -> CompositeCfg {
        CompositeCfg {
            symbol: "BASKET".into(),
            model: SyntheticModel::Linear { legs: vec![Leg { symbol: "LEG".into(), ratio: 1.0 }] },
            window: 10,
            threshold: 2.0,
            size_divisor: 2.0,
        }
    }

    fn seeded_series(composite: f64, synthetic: f64, n: usize) -> SeriesPair {
        let mut s = SeriesPair::new(10);
        for _ in 0..n {
            s.push(composite, synthetic);
        }
        s
    }

    #[test]
    fn zscore_of_flat_series_is_zero() {
        let v = [5.0, 5.0, 5.0];
        assert_eq!(zscore(v.iter()), 0.0);
        assert_eq!(zscore([7.0].iter()), 0.0);
        assert_eq!(zscore([0.0f64; 0].iter()), 0.0);
    }

    #[test]
    fn zscore_uses_sample_std() {
        // mean 2, sample std 1
        assert!((zscore([1.0, 2.0, 3.0].iter()) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn rich_composite_is_sold_proportionally_to_divergence() {
        let cfg = single_leg();
        let mut depths = BTreeMap::new();
        depths.insert("BASKET".to_string(), depth((99, 10), (101, -10)));
        depths.insert("LEG".to_string(), depth((89, 30), (91, -20)));

        // composite history at 90, synthetic flat at 90
        let mut series = seeded_series(90.0, 90.0, 9);
        let mut e = Exposure::new(0, 60);
        let d = cfg.evaluate(&depths, &mut series, &mut e).unwrap();

        // z(composite) = 9 / sqrt(10), z(synthetic) = 0
        let div = d.divergence.unwrap();
        assert!((div - 9.0 / 10f64.sqrt()).abs() < 1e-9);
        // base min(10, 20) = 10, scaled round(10 * 2.846 / 2) = 14
        assert_eq!(d.orders, vec![Order::new("BASKET", 99, -14)]);
    }

    #[test]
    fn clip_is_capped_by_short_capacity() {
        let cfg = single_leg();
        let mut depths = BTreeMap::new();
        depths.insert("BASKET".to_string(), depth((99, 10), (101, -10)));
        depths.insert("LEG".to_string(), depth((89, 30), (91, -20)));
        let mut series = seeded_series(90.0, 90.0, 9);
        let mut e = Exposure::new(-50, 60);
        let d = cfg.evaluate(&depths, &mut series, &mut e).unwrap();
        assert_eq!(d.orders, vec![Order::new("BASKET", 99, -10)]);
        assert_eq!(e.sell_capacity(), 0);
    }

    #[test]
    fn cheap_composite_is_bought_limited_by_leg_liquidity() {
        let cfg = single_leg();
        let mut depths = BTreeMap::new();
        depths.insert("BASKET".to_string(), depth((79, 40), (81, -40)));
        depths.insert("LEG".to_string(), depth((89, 6), (91, -20)));
        let mut series = seeded_series(90.0, 90.0, 9);
        let mut e = Exposure::new(0, 60);
        let d = cfg.evaluate(&depths, &mut series, &mut e).unwrap();
        assert!(d.divergence.unwrap() < -2.0);
        // base min(40, 6) = 6, scaled round(6 * 2.846 / 2) = 9
        assert_eq!(d.orders, vec![Order::new("BASKET", 81, 9)]);
    }

    #[test]
    fn constant_spread_never_trades() {
        let cfg = single_leg();
        let mut depths = BTreeMap::new();
        depths.insert("BASKET".to_string(), depth((99, 10), (101, -10)));
        depths.insert("LEG".to_string(), depth((89, 30), (91, -20)));
        let mut series = seeded_series(100.0, 90.0, 5);
        let mut e = Exposure::new(0, 60);
        let d = cfg.evaluate(&depths, &mut series, &mut e).unwrap();
        assert_eq!(d.divergence, Some(0.0));
        assert!(d.orders.is_empty());
    }

    #[test]
    fn needs_two_observations() {
        let cfg = single_leg();
        let mut depths = BTreeMap::new();
        depths.insert("BASKET".to_string(), depth((99, 10), (101, -10)));
        depths.insert("LEG".to_string(), depth((89, 30), (91, -20)));
        let mut series = SeriesPair::new(10);
        let mut e = Exposure::new(0, 60);
        let d = cfg.evaluate(&depths, &mut series, &mut e).unwrap();
        assert_eq!(d, ArbDecision::default());
        assert_eq!(series.len(), 1);
    }

    #[test]
    fn missing_leg_is_fatal() {
        let cfg = single_leg();
        let mut depths = BTreeMap::new();
        depths.insert("BASKET".to_string(), depth((99, 10), (101, -10)));
        let mut series = SeriesPair::new(10);
        let mut e = Exposure::new(0, 60);
        let err = cfg.evaluate(&depths, &mut series, &mut e).unwrap_err();
        assert!(matches!(err, TraderError::MissingProduct(s) if s == "LEG"));
    }

    fn coupon() -> CompositeCfg {
        crate::config::strategy_table(&crate::config::Args::builtin())
            .unwrap()
            .composites
            .into_iter()
            .find(|c| c.symbol == "COCONUT_COUPON")
            .unwrap()
    }

    #[test]
    fn coupon_rich_against_call_value_is_sold_on_own_liquidity() {
        let cfg = coupon();
        let mut depths = BTreeMap::new();
        // underlying drops to 9900, coupon lifts to 640
        depths.insert("COCONUT".to_string(), depth((9899, 50), (9901, -50)));
        depths.insert("COCONUT_COUPON".to_string(), depth((639, 30), (641, -30)));

        let call = black_scholes_call(10_000.0, 10_000.0, 250.0, 0.0, 0.01011932923).unwrap();
        let mut series = SeriesPair::new(cfg.window);
        for _ in 0..4 {
            series.push(600.0, call);
        }
        let mut flat = series.clone();

        let mut e = Exposure::new(0, 600);
        let d = cfg.evaluate(&depths, &mut series, &mut e).unwrap();
        // window 5: each side moves by one sample, z = ±4/sqrt(5)
        let div = d.divergence.unwrap();
        assert!((div - 8.0 / 5f64.sqrt()).abs() < 1e-6, "{div}");
        // no leg cap for the option model: base = coupon bid volume 30,
        // round(30 * 3.578 / 2) = 54
        assert_eq!(d.orders, vec![Order::new("COCONUT_COUPON", 639, -54)]);
        assert_eq!(series.len(), 5);

        let mut e = Exposure::new(-580, 600);
        let d = cfg.evaluate(&depths, &mut flat, &mut e).unwrap();
        assert_eq!(d.orders, vec![Order::new("COCONUT_COUPON", 639, -20)]);
    }

    #[test]
    fn call_value_is_sane() {
        let atm = black_scholes_call(10_000.0, 10_000.0, 250.0, 0.0, 0.01011932923).unwrap();
        // ATM approx S * sigma * sqrt(T) * 0.3989
        let approx = 10_000.0 * 0.01011932923 * 250f64.sqrt() * 0.398_942;
        assert!((atm - approx).abs() / approx < 0.01, "{atm} vs {approx}");
        let deep_itm = black_scholes_call(20_000.0, 10_000.0, 1.0, 0.0, 0.01).unwrap();
        assert!((deep_itm - 10_000.0).abs() < 1e-6);
        assert!(black_scholes_call(0.0, 10_000.0, 1.0, 0.0, 0.01).is_none());
    }
}
