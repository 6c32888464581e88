// ===============================
// src/gateway.rs (paper venue)
// ===============================
//
// Immediate-or-cancel paper exchange. Orders only fill against liquidity that
// is visible in the snapshot they were computed on; anything left over is
// dropped at the end of the timestep. Conversions settle first, at the
// external venue price adjusted for tariffs and the flat transport fee.
//
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::book::Quote;
use crate::config::Limits;
use crate::domain::{
    Fill, MarketSnapshot, Order, OrderDepth, OwnTrade, Side, Symbol, TraderOutput, TradingState, SUBMISSION,
};
use crate::metrics::{FILLS, REJECTS};
use crate::positions::Ledger;
use crate::risk::check_orders;

/// Counterparty name for liquidity taken from the snapshot.
pub const MARKET: &str = "MARKET";

#[derive(Debug, Default)]
pub struct Execution {
    pub own_trades: BTreeMap<Symbol, Vec<OwnTrade>>,
    pub fills: Vec<Fill>,
    /// (symbol, signed quantity, price) of a settled conversion.
    pub conversion: Option<(Symbol, i64, f64)>,
}

#[derive(Debug)]
pub struct PaperExchange {
    limits: Limits,
    ledger: Ledger,
}

impl PaperExchange {
    pub fn new(limits: Limits) -> Self { Self { limits, ledger: Ledger::new() } }

    pub fn ledger(&self) -> &Ledger { &self.ledger }

    pub fn trading_state(
        &self,
        snap: &MarketSnapshot,
        trader_data: String,
        own_trades: BTreeMap<Symbol, Vec<OwnTrade>>,
    ) -> TradingState {
        let position = self
            .ledger
            .positions()
            .filter(|(_, q)| *q != 0)
            .map(|(s, q)| (s.to_string(), q))
            .collect();
        TradingState {
            timestamp: snap.timestamp,
            trader_data,
            order_depths: snap.order_depths.clone(),
            position,
            own_trades,
            observations: snap.observations.clone(),
        }
    }

    pub fn execute(&mut self, snap: &MarketSnapshot, out: &TraderOutput) -> Execution {
        let mut exec = Execution::default();
        if out.conversions != 0 {
            exec.conversion = self.convert(snap, out.conversions);
        }

        for (symbol, orders) in &out.orders {
            let Some(depth) = snap.order_depths.get(symbol) else {
                warn!(%symbol, "orders for a product that is not listed, ignored");
                continue;
            };
            let limit = self.limits.limit_of(symbol).unwrap_or(0);
            if let Err(e) = check_orders(symbol, self.ledger.qty(symbol), limit, orders) {
                warn!(error = %e, "venue rejected order set");
                REJECTS.with_label_values(&[symbol.as_str()]).inc();
                continue;
            }

            let mut book = depth.clone();
            for order in orders {
                for (price, qty) in cross(&mut book, order) {
                    let fill = Fill { timestamp: snap.timestamp, symbol: symbol.clone(), price, quantity: qty };
                    self.ledger.on_fill(&fill);
                    let (label, buyer, seller) = match order.side() {
                        Side::Buy => ("buy", SUBMISSION, MARKET),
                        Side::Sell => ("sell", MARKET, SUBMISSION),
                    };
                    FILLS.with_label_values(&[symbol.as_str(), label]).inc();
                    exec.own_trades.entry(symbol.clone()).or_default().push(OwnTrade {
                        symbol: symbol.clone(),
                        price,
                        quantity: qty.abs(),
                        buyer: buyer.to_string(),
                        seller: seller.to_string(),
                        timestamp: snap.timestamp,
                    });
                    exec.fills.push(fill);
                }
            }
        }

        for (symbol, depth) in &snap.order_depths {
            if let Some(q) = Quote::from_depth(depth) {
                self.ledger.mark_to_market(symbol, q.mid());
            }
        }
        exec
    }

    /// Closes up to `requested` units of the open position through the
    /// external venue. The request is capped at the position size.
    fn convert(&mut self, snap: &MarketSnapshot, requested: i64) -> Option<(Symbol, i64, f64)> {
        let (symbol, obs) = snap
            .observations
            .conversion
            .iter()
            .find(|(s, _)| self.ledger.qty(s) != 0)?;
        let position = self.ledger.qty(symbol);
        let qty = requested.abs().min(position.abs());
        if qty == 0 {
            return None;
        }
        let fee = obs.transport_fees / qty as f64;
        let (signed, price) = if position > 0 {
            (-qty, obs.bid_price - obs.export_tariff - fee)
        } else {
            (qty, obs.ask_price + obs.import_tariff + fee)
        };
        self.ledger.apply(symbol, price, signed);
        info!(%symbol, qty = signed, price, "conversion settled");
        Some((symbol.clone(), signed, price))
    }
}

/// Crosses one order against `book`, consuming the liquidity it takes.
/// Returns (price, signed quantity) per level touched.
fn cross(book: &mut OrderDepth, order: &Order) -> Vec<(i64, i64)> {
    let mut fills = Vec::new();
    let mut remaining = order.quantity.abs();
    let sign = order.side().sign();
    if sign > 0 {
        let levels: Vec<i64> = book.sell_orders.range(..=order.price).map(|(p, _)| *p).collect();
        for price in levels {
            if remaining == 0 {
                break;
            }
            if let Some(vol) = book.sell_orders.get_mut(&price) {
                let take = remaining.min(-*vol);
                *vol += take;
                remaining -= take;
                fills.push((price, sign * take));
                if *vol == 0 {
                    book.sell_orders.remove(&price);
                }
            }
        }
    } else {
        let levels: Vec<i64> = book.buy_orders.range(order.price..).rev().map(|(p, _)| *p).collect();
        for price in levels {
            if remaining == 0 {
                break;
            }
            if let Some(vol) = book.buy_orders.get_mut(&price) {
                let take = remaining.min(*vol);
                *vol -= take;
                remaining -= take;
                fills.push((price, sign * take));
                if *vol == 0 {
                    book.buy_orders.remove(&price);
                }
            }
        }
    }
    if remaining > 0 {
        debug!(symbol = %order.symbol, price = order.price, remaining, "unfilled remainder cancelled");
    }
    fills
}
