// ===============================
// src/conversion.rs
// ===============================
//
// Perishable product with an external conversion venue. A long position can be
// exported at (venue bid - export tariff), a short one covered by importing at
// (venue ask + import tariff); both pay a flat transport fee spread over the
// position. Conversion is all-or-nothing for the whole position.
//
// The product still trades on the book: it buys only below its cost basis
// (the conversion channel already gives the long side an exit) and sells
// through the regression band, posting the rest one tick inside the best ask.
//
use tracing::{debug, info};

use crate::book::Quote;
use crate::domain::{ConversionObservation, Order, OrderDepth, OwnTrade};
use crate::fair_value::Band;
use crate::risk::Exposure;
use crate::strategy::{post_ask, take_asks, take_bids};

/// Signed average price of the reported own trades: buys count positive,
/// sells negative, divided by the total traded quantity. 0 without trades.
pub fn cost_basis(trades: &[OwnTrade]) -> f64 {
    let (notional, qty) = trades.iter().fold((0.0, 0_i64), |(n, q), t| {
        let px_qty = t.price as f64 * t.quantity as f64;
        let n = if t.we_bought() { n + px_qty } else { n - px_qty };
        (n, q + t.quantity)
    });
    if qty > 0 { notional / qty as f64 } else { 0.0 }
}

/// Conversion request for the full position, or 0.
pub fn decide(position: i64, basis: f64, obs: &ConversionObservation) -> i64 {
    if position == 0 {
        return 0;
    }
    let fee_per_unit = obs.transport_fees / position as f64;
    if position > 0 {
        let export_bid = obs.bid_price - obs.export_tariff;
        if export_bid - fee_per_unit >= basis {
            return position;
        }
    } else {
        let import_ask = obs.ask_price + obs.import_tariff;
        if import_ask + fee_per_unit <= -basis {
            return -position;
        }
    }
    0
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversionPlan {
    pub basis: f64,
    pub conversions: i64,
    pub orders: Vec<Order>,
}

#[derive(Debug, Clone, Default)]
pub struct ConversionArb;

impl ConversionArb {
    pub fn plan(
        &self,
        symbol: &str,
        exposure: Exposure,
        band: &Band,
        depth: &OrderDepth,
        trades: &[OwnTrade],
        obs: &ConversionObservation,
    ) -> ConversionPlan {
        if !band.is_bounded() {
            debug!(symbol, "fair value not ready, skipping conversion product");
            return ConversionPlan::default();
        }
        let position = exposure.position;
        let basis = cost_basis(trades);
        let conversions = decide(position, basis, obs);
        if conversions != 0 {
            info!(
                symbol,
                position,
                basis,
                export_bid = obs.bid_price - obs.export_tariff,
                import_ask = obs.ask_price + obs.import_tariff,
                fee = obs.transport_fees,
                "conversion requested"
            );
        }

        let mut plan = ConversionPlan { basis, conversions, orders: Vec::new() };
        let Some(quote) = Quote::from_depth(depth) else {
            debug!(symbol, "one-sided book, conversion only");
            return plan;
        };

        let after = if conversions != 0 { 0 } else { position };
        let mut exposure = exposure.also_covering(after);

        plan.orders.extend(take_asks(symbol, &mut exposure, depth, |ask| (ask as f64) < basis));

        let upper = band.upper();
        let half = band.half_width();
        plan.orders.extend(take_bids(symbol, &mut exposure, depth, |bid| {
            bid >= upper || (position > 0 && bid >= upper - half)
        }));
        plan.orders.extend(post_ask(symbol, &mut exposure, quote.best_ask - 1));
        plan
    }
}
