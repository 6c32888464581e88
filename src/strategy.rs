// ===============================
// src/strategy.rs
// ===============================
//
// Order construction for a single product given its fair-value band.
//
// Per side, two steps:
//  1) TAKE : sweep resting liquidity priced through the band edge
//            (asks at/below `lower`, bids at/above `upper`). When the position
//            is already on the wrong side, the threshold relaxes by one half
//            width so the engine can unwind slightly less favorably.
//  2) MAKE : whatever capacity is left is posted as one own quote, one tick
//            inside the market but never through the band edge, then skewed
//            by inventory (more aggressive when unwinding, less when the
//            position is already close to the limit on that side).
//
// Sizing always comes from an Exposure, so a full fill of every emitted order
// cannot push the position outside [-limit, +limit].
//
use tracing::debug;

use crate::book::Quote;
use crate::domain::{Order, OrderDepth};
use crate::fair_value::Band;
use crate::risk::Exposure;

#[derive(Debug, Clone, PartialEq)]
pub struct QuotePolicy {
    /// Take liquidity sitting exactly on the band edge (`<=`) instead of only
    /// strictly through it (`<`).
    pub take_at_edge: bool,
    /// Own quotes sit at least this many ticks outside the band edge.
    pub quote_offset: i64,
    /// Fraction of the limit beyond which further accumulation is quoted one
    /// tick less aggressively. `None` disables inventory skew.
    pub skew_fraction: Option<f64>,
}

impl Default for QuotePolicy {
    fn default() -> Self {
        Self { take_at_edge: true, quote_offset: 0, skew_fraction: Some(0.75) }
    }
}

/// Buys every ask (ascending) that `qualifies`, bounded by buy capacity.
pub fn take_asks(
    symbol: &str,
    exposure: &mut Exposure,
    depth: &OrderDepth,
    qualifies: impl Fn(i64) -> bool,
) -> Vec<Order> {
    let mut out = Vec::new();
    for (&ask, &vol) in depth.sell_orders.iter() {
        let cap = exposure.buy_capacity();
        if cap == 0 || !qualifies(ask) {
            break;
        }
        let qty = (-vol).min(cap);
        if qty <= 0 {
            continue;
        }
        let o = Order::new(symbol, ask, qty);
        exposure.apply(&o);
        out.push(o);
    }
    out
}

/// Sells into every bid (descending) that `qualifies`, bounded by sell capacity.
pub fn take_bids(
    symbol: &str,
    exposure: &mut Exposure,
    depth: &OrderDepth,
    qualifies: impl Fn(i64) -> bool,
) -> Vec<Order> {
    let mut out = Vec::new();
    for (&bid, &vol) in depth.buy_orders.iter().rev() {
        let cap = exposure.sell_capacity();
        if cap == 0 || !qualifies(bid) {
            break;
        }
        let qty = vol.min(cap);
        if qty <= 0 {
            continue;
        }
        let o = Order::new(symbol, bid, -qty);
        exposure.apply(&o);
        out.push(o);
    }
    out
}

/// Own bid for all remaining buy capacity.
pub fn post_bid(symbol: &str, exposure: &mut Exposure, price: i64) -> Option<Order> {
    let qty = exposure.buy_capacity();
    if qty == 0 {
        return None;
    }
    let o = Order::new(symbol, price, qty);
    exposure.apply(&o);
    Some(o)
}

/// Own ask for all remaining sell capacity.
pub fn post_ask(symbol: &str, exposure: &mut Exposure, price: i64) -> Option<Order> {
    let qty = exposure.sell_capacity();
    if qty == 0 {
        return None;
    }
    let o = Order::new(symbol, price, -qty);
    exposure.apply(&o);
    Some(o)
}

#[derive(Debug, Clone, Default)]
pub struct MarketMaker {
    pub policy: QuotePolicy,
}

impl MarketMaker {
    pub fn new(policy: QuotePolicy) -> Self { Self { policy } }

    fn near_limit(&self, position: i64, limit: i64) -> bool {
        match self.policy.skew_fraction {
            Some(f) => position.abs() as f64 > f * limit as f64,
            None => false,
        }
    }

    fn bid_price(&self, quote: &Quote, band: &Band, position: i64, limit: i64) -> i64 {
        let cap = band.lower() - self.policy.quote_offset;
        let tick = if self.policy.skew_fraction.is_none() {
            1
        } else if position < 0 {
            2
        } else if position > 0 && self.near_limit(position, limit) {
            0
        } else {
            1
        };
        (quote.best_bid + tick).min(cap)
    }

    fn ask_price(&self, quote: &Quote, band: &Band, position: i64, limit: i64) -> i64 {
        let floor = band.upper() + self.policy.quote_offset;
        let tick = if self.policy.skew_fraction.is_none() {
            1
        } else if position > 0 {
            2
        } else if position < 0 && self.near_limit(position, limit) {
            0
        } else {
            1
        };
        (quote.best_ask - tick).max(floor)
    }

    pub fn orders(
        &self,
        symbol: &str,
        exposure: &mut Exposure,
        band: &Band,
        depth: &OrderDepth,
    ) -> Vec<Order> {
        let Some(quote) = Quote::from_depth(depth) else {
            debug!(symbol, "one-sided book, skipping");
            return Vec::new();
        };
        if !band.is_bounded() {
            debug!(symbol, "fair value not ready, not trading");
            return Vec::new();
        }

        let position = exposure.position;
        let limit = exposure.limit;
        let lower = band.lower();
        let upper = band.upper();
        let half = band.half_width();
        let at_edge = self.policy.take_at_edge;

        let mut orders = take_asks(symbol, exposure, depth, |ask| {
            (if at_edge { ask <= lower } else { ask < lower })
                || (position < 0 && ask <= lower + half)
        });
        orders.extend(post_bid(symbol, exposure, self.bid_price(&quote, band, position, limit)));

        orders.extend(take_bids(symbol, exposure, depth, |bid| {
            (if at_edge { bid >= upper } else { bid > upper })
                || (position > 0 && bid >= upper - half)
        }));
        orders.extend(post_ask(symbol, exposure, self.ask_price(&quote, band, position, limit)));

        debug!(symbol, position, fair = band.fair(), lower, upper, n = orders.len(), "market maker orders");
        orders
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::risk::check_orders;

    fn depth(bids: &[(i64, i64)], asks: &[(i64, i64)]) -> OrderDepth {
        OrderDepth {
            buy_orders: bids.iter().copied().collect(),
            sell_orders: asks.iter().copied().collect(),
        }
    }

    fn anchor_maker() -> MarketMaker {
        MarketMaker::new(QuotePolicy { take_at_edge: false, quote_offset: 1, skew_fraction: Some(0.75) })
    }

    fn buys(orders: &[Order]) -> Vec<(i64, i64)> {
        orders.iter().filter(|o| o.quantity > 0).map(|o| (o.price, o.quantity)).collect()
    }

    fn sells(orders: &[Order]) -> Vec<(i64, i64)> {
        orders.iter().filter(|o| o.quantity < 0).map(|o| (o.price, o.quantity)).collect()
    }

    #[test]
    fn anchor_takes_cheap_ask_then_posts_remaining_bid() {
        let d = depth(&[(9997, 4)], &[(9998, -5), (10001, -3)]);
        let mut e = Exposure::new(0, 20);
        let orders = anchor_maker().orders("AMETHYSTS", &mut e, &Band::new(10_000, 0), &d);
        assert_eq!(buys(&orders), vec![(9998, 5), (9998, 15)]);
        // nothing bid above 10000, so the whole short capacity is quoted at best ask - 1
        assert_eq!(sells(&orders), vec![(10001, -20)]);
        assert!(check_orders("AMETHYSTS", 0, 20, &orders).is_ok());
    }

    #[test]
    fn short_position_takes_ask_on_the_anchor_and_bids_more_aggressively() {
        let d = depth(&[(9995, 4)], &[(10000, -6), (10004, -3)]);
        let mut e = Exposure::new(-5, 20);
        let orders = anchor_maker().orders("AMETHYSTS", &mut e, &Band::new(10_000, 0), &d);
        let b = buys(&orders);
        assert_eq!(b[0], (10000, 6));
        // best bid + 2, capped at 9999
        assert_eq!(b[1], (9997, 19));
    }

    #[test]
    fn long_near_limit_bids_less_aggressively() {
        let d = depth(&[(9995, 4)], &[(10004, -3)]);
        let mut e = Exposure::new(16, 20);
        let orders = anchor_maker().orders("AMETHYSTS", &mut e, &Band::new(10_000, 0), &d);
        assert_eq!(buys(&orders), vec![(9995, 4)]);
        // long: ask two ticks inside
        assert_eq!(sells(&orders), vec![(10002, -36)]);
    }

    #[test]
    fn short_near_limit_asks_less_aggressively() {
        let d = depth(&[(9995, 4)], &[(10004, -3)]);
        let mut e = Exposure::new(-16, 20);
        let orders = anchor_maker().orders("AMETHYSTS", &mut e, &Band::new(10_000, 0), &d);
        // short: bid two ticks inside
        assert_eq!(buys(&orders), vec![(9997, 36)]);
        // beyond 0.75 * limit: join the best ask instead of improving it
        assert_eq!(sells(&orders), vec![(10004, -4)]);
        assert!(check_orders("AMETHYSTS", -16, 20, &orders).is_ok());

        let mut e = Exposure::new(-5, 20);
        let orders = anchor_maker().orders("AMETHYSTS", &mut e, &Band::new(10_000, 0), &d);
        assert_eq!(sells(&orders), vec![(10003, -15)]);
    }

    #[test]
    fn relaxed_threshold_when_short() {
        let maker = MarketMaker::new(QuotePolicy { take_at_edge: true, quote_offset: 0, skew_fraction: None });
        let band = Band::new(5000, 3); // 4997..5003
        let d = depth(&[(4990, 5)], &[(4999, -4), (5001, -4)]);

        let mut flat = Exposure::new(0, 20);
        assert!(buys(&maker.orders("STARFRUIT", &mut flat, &band, &d))
            .iter()
            .all(|(px, _)| *px != 4999));

        let mut short = Exposure::new(-2, 20);
        let b = buys(&maker.orders("STARFRUIT", &mut short, &band, &d));
        assert_eq!(b[0], (4999, 4));
        assert_eq!(b[1], (4991, 18));
    }

    #[test]
    fn unbounded_band_emits_nothing() {
        let maker = MarketMaker::default();
        let d = depth(&[(10, 5)], &[(1, -50)]);
        let mut e = Exposure::new(0, 20);
        assert!(maker.orders("STARFRUIT", &mut e, &Band::unbounded(), &d).is_empty());
    }

    #[test]
    fn one_sided_book_is_skipped() {
        let d = depth(&[], &[(9990, -10)]);
        let mut e = Exposure::new(0, 20);
        assert!(anchor_maker().orders("AMETHYSTS", &mut e, &Band::new(10_000, 0), &d).is_empty());
    }

    #[test]
    fn never_breaches_limit_at_any_position() {
        let d = depth(
            &[(10003, 7), (10002, 9), (9996, 30)],
            &[(9994, -12), (9997, -15), (10005, -25)],
        );
        for pos in -20..=20 {
            let mut e = Exposure::new(pos, 20);
            let orders = anchor_maker().orders("AMETHYSTS", &mut e, &Band::new(10_000, 0), &d);
            let mut p = pos;
            for o in orders.iter().filter(|o| o.quantity > 0) {
                p += o.quantity;
                assert!(p <= 20, "pos {pos}: {orders:?}");
            }
            let mut p = pos;
            for o in orders.iter().filter(|o| o.quantity < 0) {
                p += o.quantity;
                assert!(p >= -20, "pos {pos}: {orders:?}");
            }
            assert!(check_orders("AMETHYSTS", pos, 20, &orders).is_ok());
        }
    }
}
