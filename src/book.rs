// ===============================
// src/book.rs
// ===============================
//
// Read-only helpers over one OrderDepth. Every lookup is Option so an empty
// side never panics; callers skip the product for the timestep instead.
//
use crate::domain::OrderDepth;

pub fn best_bid(d: &OrderDepth) -> Option<i64> { d.buy_orders.keys().next_back().copied() }
pub fn best_ask(d: &OrderDepth) -> Option<i64> { d.sell_orders.keys().next().copied() }
pub fn worst_bid(d: &OrderDepth) -> Option<i64> { d.buy_orders.keys().next().copied() }
pub fn worst_ask(d: &OrderDepth) -> Option<i64> { d.sell_orders.keys().next_back().copied() }

/// Unsigned volume resting at `px` on the bid side.
pub fn bid_volume_at(d: &OrderDepth, px: i64) -> i64 {
    d.buy_orders.get(&px).map(|v| v.abs()).unwrap_or(0)
}

/// Unsigned volume resting at `px` on the ask side.
pub fn ask_volume_at(d: &OrderDepth, px: i64) -> i64 {
    d.sell_orders.get(&px).map(|v| v.abs()).unwrap_or(0)
}

/// Top of book for a non-degenerate snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quote {
    pub best_bid: i64,
    pub best_ask: i64,
    pub best_bid_vol: i64,
    pub best_ask_vol: i64,
    /// Deepest resting levels, the far edge of visible liquidity.
    pub worst_bid: i64,
    pub worst_ask: i64,
}

impl Quote {
    /// `None` when either side of the book is empty.
    pub fn from_depth(d: &OrderDepth) -> Option<Self> {
        let best_bid = best_bid(d)?;
        let best_ask = best_ask(d)?;
        Some(Self {
            best_bid,
            best_ask,
            best_bid_vol: bid_volume_at(d, best_bid),
            best_ask_vol: ask_volume_at(d, best_ask),
            worst_bid: worst_bid(d)?,
            worst_ask: worst_ask(d)?,
        })
    }
    pub fn mid(&self) -> f64 { (self.best_bid + self.best_ask) as f64 / 2.0 }
    pub fn spread(&self) -> i64 { self.best_ask - self.best_bid }
}

/// Mean of the volume-weighted ask and the volume-weighted bid.
pub fn vwap_mid(d: &OrderDepth) -> Option<f64> {
    fn side_vwap<'a>(levels: impl Iterator<Item = (&'a i64, &'a i64)>) -> Option<f64> {
        let (notional, vol) = levels.fold((0.0, 0.0), |(n, v), (px, q)| {
            let q = q.abs() as f64;
            (n + *px as f64 * q, v + q)
        });
        if vol > 0.0 { Some(notional / vol) } else { None }
    }
    let ask = side_vwap(d.sell_orders.iter())?;
    let bid = side_vwap(d.buy_orders.iter())?;
    Some((ask + bid) / 2.0)
}
