// ===============================
// src/trader.rs
// ===============================
//
// One invocation per timestep:
//   decode memory -> per-product passes (sorted by symbol) -> composite passes
//   -> conversion pass -> final limit check -> encode memory.
//
// The strategy table is fixed at startup. Memory is the only state that
// survives between calls and travels through the blob in TradingState.
//
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, warn};

use crate::basket::CompositeCfg;
use crate::book::{vwap_mid, Quote};
use crate::config::Limits;
use crate::conversion::ConversionArb;
use crate::domain::{Order, TradingState, TraderOutput};
use crate::fair_value::{Band, FairValueEstimator};
use crate::memory::{MemoryError, TraderMemory};
use crate::metrics::{ARB_DIVERGENCE, CONVERSIONS, ORDERS_BY_SYMBOL, RISK_DROPS};
use crate::risk::{check_orders, Exposure};
use crate::strategy::MarketMaker;

#[derive(Debug, Error)]
pub enum TraderError {
    #[error("order book for {0} missing from snapshot")]
    MissingProduct(String),
    #[error("conversion observation for {0} missing from snapshot")]
    MissingObservation(String),
    #[error("memory: {0}")]
    Memory(#[from] MemoryError),
}

#[derive(Debug, Clone)]
pub enum Handler {
    MarketMaker(MarketMaker),
    Conversion(ConversionArb),
}

#[derive(Debug)]
pub struct ProductStrategy {
    pub estimator: Box<dyn FairValueEstimator>,
    pub handler: Handler,
    pub history_len: usize,
}

#[derive(Debug, Default)]
pub struct StrategyTable {
    pub products: BTreeMap<String, ProductStrategy>,
    pub composites: Vec<CompositeCfg>,
}

#[derive(Debug)]
pub struct Trader {
    table: StrategyTable,
    limits: Limits,
}

impl Trader {
    pub fn new(table: StrategyTable, limits: Limits) -> Self { Self { table, limits } }

    pub fn limits(&self) -> &Limits { &self.limits }

    fn exposure(&self, exposures: &mut BTreeMap<String, Exposure>, state: &TradingState, symbol: &str) -> Option<Exposure> {
        let limit = self.limits.limit_of(symbol)?;
        Some(*exposures
            .entry(symbol.to_string())
            .or_insert_with(|| Exposure::new(state.position_of(symbol), limit)))
    }

    pub fn run(&self, state: &TradingState) -> Result<TraderOutput, TraderError> {
        let mut memory = TraderMemory::decode_or_default(&state.trader_data);
        let mut exposures: BTreeMap<String, Exposure> = BTreeMap::new();
        let mut orders: BTreeMap<String, Vec<Order>> = BTreeMap::new();
        let mut deferred: Vec<(&str, &ConversionArb, Band)> = Vec::new();

        // 1) single-product passes
        for (symbol, strat) in &self.table.products {
            let Some(depth) = state.order_depths.get(symbol) else {
                debug!(symbol = %symbol, "not listed this timestep");
                continue;
            };
            let Some(mut exposure) = self.exposure(&mut exposures, state, symbol) else {
                debug!(symbol = %symbol, "no position limit configured, not trading");
                continue;
            };

            let obs = state.observations.conversion.get(symbol);
            let needs_obs = !strat.estimator.factors().is_empty() || matches!(strat.handler, Handler::Conversion(_));
            if needs_obs && obs.is_none() {
                return Err(TraderError::MissingObservation(symbol.clone()));
            }

            let pm = memory.product_mut(symbol, strat.history_len);
            if let (Some(q), Some(mid)) = (Quote::from_depth(depth), vwap_mid(depth)) {
                debug!(
                    symbol = %symbol,
                    bid = q.best_bid,
                    ask = q.best_ask,
                    worst_bid = q.worst_bid,
                    worst_ask = q.worst_ask,
                    vwap_mid = mid,
                    "book"
                );
                pm.record_book(mid, q.spread());
                if let Some(obs) = obs {
                    for f in strat.estimator.factors() {
                        if let Some(v) = obs.factor(f) {
                            pm.record_factor(f, v);
                        }
                    }
                }
            }
            let band = strat.estimator.estimate(pm);
            debug!(symbol = %symbol, estimator = strat.estimator.name(), fair = band.fair(), bounded = band.is_bounded(), "fair value");

            match &strat.handler {
                Handler::MarketMaker(mm) => {
                    let out = mm.orders(symbol, &mut exposure, &band, depth);
                    exposures.insert(symbol.clone(), exposure);
                    orders.entry(symbol.clone()).or_default().extend(out);
                }
                Handler::Conversion(arb) => deferred.push((symbol.as_str(), arb, band)),
            }
        }

        // 2) composite passes see the exposure left by step 1
        for cfg in &self.table.composites {
            if !state.order_depths.contains_key(&cfg.symbol) {
                continue;
            }
            let Some(mut exposure) = self.exposure(&mut exposures, state, &cfg.symbol) else {
                continue;
            };
            let series = memory.series_mut(&cfg.symbol, cfg.window);
            let decision = cfg.evaluate(&state.order_depths, series, &mut exposure)?;
            if let Some(div) = decision.divergence {
                ARB_DIVERGENCE.with_label_values(&[cfg.symbol.as_str()]).set(div);
            }
            exposures.insert(cfg.symbol.clone(), exposure);
            orders.entry(cfg.symbol.clone()).or_default().extend(decision.orders);
        }

        // 3) conversion pass
        let mut conversions = 0;
        for (symbol, arb, band) in deferred {
            let (Some(depth), Some(obs)) = (state.order_depths.get(symbol), state.observations.conversion.get(symbol)) else {
                continue;
            };
            let Some(exposure) = self.exposure(&mut exposures, state, symbol) else {
                continue;
            };
            let plan = arb.plan(symbol, exposure, &band, depth, state.trades_of(symbol), obs);
            debug!(symbol, basis = plan.basis, conversions = plan.conversions, orders = plan.orders.len(), "conversion plan");
            if plan.conversions != 0 {
                conversions = plan.conversions;
                CONVERSIONS.inc();
            }
            orders.entry(symbol.to_string()).or_default().extend(plan.orders);
        }

        // 4) fail closed on anything that would breach a limit
        orders.retain(|symbol, list| {
            if list.is_empty() {
                return false;
            }
            let limit = self.limits.limit_of(symbol).unwrap_or(0);
            match check_orders(symbol, state.position_of(symbol), limit, list) {
                Ok(()) => {
                    ORDERS_BY_SYMBOL.with_label_values(&[symbol.as_str()]).inc_by(list.len() as u64);
                    true
                }
                Err(e) => {
                    warn!(error = %e, "dropping orders");
                    RISK_DROPS.with_label_values(&[symbol.as_str()]).inc();
                    false
                }
            }
        });

        Ok(TraderOutput { orders, conversions, trader_data: memory.encode()? })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{strategy_table, Args};
    use crate::domain::{ConversionObservation, OrderDepth, OwnTrade, SUBMISSION};

    fn trader() -> Trader {
        let args = Args::builtin();
        Trader::new(strategy_table(&args).unwrap(), Limits::default())
    }

    fn depth(bids: &[(i64, i64)], asks: &[(i64, i64)]) -> OrderDepth {
        OrderDepth {
            buy_orders: bids.iter().copied().collect(),
            sell_orders: asks.iter().copied().collect(),
        }
    }

    fn orchid_obs(sunlight: f64, humidity: f64) -> ConversionObservation {
        ConversionObservation {
            bid_price: 1100.0,
            ask_price: 1102.0,
            transport_fees: 1.0,
            export_tariff: 10.0,
            import_tariff: -2.0,
            sunlight,
            humidity,
        }
    }

    fn check_all_limits(t: &Trader, state: &TradingState, out: &TraderOutput) {
        for (symbol, list) in &out.orders {
            let limit = t.limits().limit_of(symbol).unwrap();
            let pos = state.position_of(symbol);
            let buys: i64 = list.iter().filter(|o| o.quantity > 0).map(|o| o.quantity).sum();
            let sells: i64 = list.iter().filter(|o| o.quantity < 0).map(|o| -o.quantity).sum();
            assert!(pos + buys <= limit, "{symbol}: {list:?}");
            assert!(pos - sells >= -limit, "{symbol}: {list:?}");
        }
    }

    #[test]
    fn anchor_product_trades_on_first_call() {
        let t = trader();
        let mut state = TradingState::default();
        state.order_depths.insert("AMETHYSTS".into(), depth(&[(9997, 4)], &[(9998, -5), (10001, -3)]));
        let out = t.run(&state).unwrap();
        let am = &out.orders["AMETHYSTS"];
        assert_eq!(am[0], Order::new("AMETHYSTS", 9998, 5));
        assert_eq!(am[1], Order::new("AMETHYSTS", 9998, 15));
        assert_eq!(out.conversions, 0);
        check_all_limits(&t, &state, &out);
    }

    #[test]
    fn rolling_product_waits_for_history() {
        let t = trader();
        let mut state = TradingState::default();
        // ask absurdly cheap, but the window is not full yet
        state.order_depths.insert("STARFRUIT".into(), depth(&[(5000, 5)], &[(100, -5)]));
        for _ in 0..3 {
            let out = t.run(&state).unwrap();
            assert!(!out.orders.contains_key("STARFRUIT"));
            state.trader_data = out.trader_data;
        }
        let out = t.run(&state).unwrap();
        assert!(out.orders["STARFRUIT"].iter().any(|o| o.price == 100 && o.quantity == 5));
        check_all_limits(&t, &state, &out);
    }

    #[test]
    fn memory_round_trip_gives_identical_decisions() {
        let t = trader();
        let mut state = TradingState::default();
        let books = [
            depth(&[(5001, 9), (4999, 3)], &[(5005, -9), (5006, -2)]),
            depth(&[(5002, 4)], &[(5006, -11)]),
            depth(&[(5000, 12)], &[(5004, -1), (5007, -20)]),
            depth(&[(5003, 8)], &[(5006, -8)]),
        ];
        for b in books {
            state.order_depths.insert("STARFRUIT".into(), b);
            state.trader_data = t.run(&state).unwrap().trader_data;
        }
        let mem = TraderMemory::decode(&state.trader_data).unwrap();
        let reencoded = TraderMemory::decode(&mem.encode().unwrap()).unwrap();
        let est = &t.table.products["STARFRUIT"].estimator;
        assert_eq!(est.estimate(&mem.products["STARFRUIT"]), est.estimate(&reencoded.products["STARFRUIT"]));

        let a = t.run(&state).unwrap();
        state.trader_data = reencoded.encode().unwrap();
        let b = t.run(&state).unwrap();
        assert_eq!(a.orders, b.orders);
        assert_eq!(a.trader_data, b.trader_data);
    }

    #[test]
    fn corrupt_memory_is_not_fatal() {
        let t = trader();
        let mut state = TradingState::default();
        state.trader_data = "{\"starfruit_cache\": [".into();
        state.order_depths.insert("AMETHYSTS".into(), depth(&[(9997, 4)], &[(10003, -5)]));
        assert!(t.run(&state).is_ok());
    }

    #[test]
    fn orchids_need_their_observation() {
        let t = trader();
        let mut state = TradingState::default();
        state.order_depths.insert("ORCHIDS".into(), depth(&[(1098, 5)], &[(1104, -5)]));
        assert!(matches!(t.run(&state), Err(TraderError::MissingObservation(s)) if s == "ORCHIDS"));
    }

    #[test]
    fn orchids_convert_long_after_warmup() {
        let t = trader();
        let mut state = TradingState::default();
        state.order_depths.insert("ORCHIDS".into(), depth(&[(1098, 5)], &[(1104, -5)]));
        state.observations.conversion.insert("ORCHIDS".into(), orchid_obs(2500.0, 80.0));
        for _ in 0..3 {
            let out = t.run(&state).unwrap();
            assert!(out.orders.is_empty());
            state.trader_data = out.trader_data;
        }
        state.position.insert("ORCHIDS".into(), 10);
        state.own_trades.insert(
            "ORCHIDS".into(),
            vec![OwnTrade {
                symbol: "ORCHIDS".into(),
                price: 1080,
                quantity: 10,
                buyer: SUBMISSION.into(),
                seller: "X".into(),
                timestamp: 0,
            }],
        );
        let out = t.run(&state).unwrap();
        // 1100 - 10 - 1/10 >= 1080
        assert_eq!(out.conversions, 10);
        check_all_limits(&t, &state, &out);
    }

    #[test]
    fn basket_group_requires_its_legs() {
        let t = trader();
        let mut state = TradingState::default();
        state.order_depths.insert("GIFT_BASKET".into(), depth(&[(70000, 5)], &[(70010, -5)]));
        state.order_depths.insert("CHOCOLATE".into(), depth(&[(7999, 50)], &[(8001, -50)]));
        assert!(matches!(t.run(&state), Err(TraderError::MissingProduct(_))));

        state.order_depths.insert("STRAWBERRIES".into(), depth(&[(3999, 50)], &[(4001, -50)]));
        state.order_depths.insert("ROSES".into(), depth(&[(14499, 50)], &[(14501, -50)]));
        let out = t.run(&state).unwrap();
        assert!(out.orders.is_empty());
        let mem = TraderMemory::decode(&out.trader_data).unwrap();
        assert_eq!(mem.composites["GIFT_BASKET"].len(), 1);
    }

    #[test]
    fn sealed_memory_with_unusable_windows_is_replaced() {
        let t = trader();
        let mut state = TradingState::default();
        state.order_depths.insert("GIFT_BASKET".into(), depth(&[(70000, 5)], &[(70010, -5)]));
        state.order_depths.insert("CHOCOLATE".into(), depth(&[(7999, 50)], &[(8001, -50)]));
        state.order_depths.insert("STRAWBERRIES".into(), depth(&[(3999, 50)], &[(4001, -50)]));
        state.order_depths.insert("ROSES".into(), depth(&[(14499, 50)], &[(14501, -50)]));

        state.trader_data = TraderMemory::seal(
            r#"{"products":{},"composites":{"GIFT_BASKET":{
                "composite":{"cap":0,"values":[]},
                "synthetic":{"cap":0,"values":[]}}}}"#,
        );
        let out = t.run(&state).unwrap();
        let mem = TraderMemory::decode(&out.trader_data).unwrap();
        assert_eq!(mem.composites["GIFT_BASKET"].len(), 1);

        // readable but sized for another window: resized before use
        state.trader_data = TraderMemory::seal(
            r#"{"products":{},"composites":{"GIFT_BASKET":{
                "composite":{"cap":3,"values":[70005.0,70005.0,70005.0]},
                "synthetic":{"cap":20,"values":[70000.0]}}}}"#,
        );
        let out = t.run(&state).unwrap();
        let sp = &TraderMemory::decode(&out.trader_data).unwrap().composites["GIFT_BASKET"];
        assert_eq!((sp.composite.capacity(), sp.synthetic.capacity()), (10, 10));
        assert_eq!((sp.composite.len(), sp.synthetic.len()), (4, 2));
    }

    #[test]
    fn basket_sells_when_rich_against_legs() {
        let t = trader();
        let mut state = TradingState::default();
        state.order_depths.insert("CHOCOLATE".into(), depth(&[(7999, 40)], &[(8001, -40)]));
        state.order_depths.insert("STRAWBERRIES".into(), depth(&[(3999, 60)], &[(4001, -60)]));
        state.order_depths.insert("ROSES".into(), depth(&[(14499, 10)], &[(14501, -10)]));
        for _ in 0..9 {
            state.order_depths.insert("GIFT_BASKET".into(), depth(&[(70879, 8)], &[(70881, -8)]));
            let out = t.run(&state).unwrap();
            assert!(out.orders.is_empty());
            state.trader_data = out.trader_data;
        }
        state.order_depths.insert("GIFT_BASKET".into(), depth(&[(70979, 8)], &[(70981, -8)]));
        let out = t.run(&state).unwrap();
        let gb = &out.orders["GIFT_BASKET"];
        assert_eq!(gb.len(), 1);
        // base min(8, 40/4, 60/6, 10/1) = 8, divergence 9/sqrt(10)
        assert_eq!(gb[0], Order::new("GIFT_BASKET", 70979, -11));
        check_all_limits(&t, &state, &out);
    }

    #[test]
    fn positions_at_limit_stay_within_bounds() {
        let t = trader();
        for pos in [-20, -19, 0, 19, 20] {
            let mut state = TradingState::default();
            state.position.insert("AMETHYSTS".into(), pos);
            state.order_depths.insert(
                "AMETHYSTS".into(),
                depth(&[(10004, 10), (9996, 30)], &[(9993, -10), (10005, -30)]),
            );
            let out = t.run(&state).unwrap();
            check_all_limits(&t, &state, &out);
        }
    }
}
