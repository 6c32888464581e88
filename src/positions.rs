// ===============================
// src/positions.rs (inventory & PnL ledger)
// ===============================
use ahash::AHashMap;

use crate::domain::Fill;
use crate::metrics::{PNL_REALIZED, PNL_UNREALIZED, POSITION};

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SymbolBook {
    pub qty: i64,
    pub avg_cost: f64,
    pub realized: f64,
    pub unrealized: f64,
}

/// Average-cost ledger fed by paper fills and conversions.
#[derive(Debug, Default)]
pub struct Ledger {
    by_symbol: AHashMap<String, SymbolBook>,
}

impl Ledger {
    pub fn new() -> Self { Self::default() }

    pub fn qty(&self, symbol: &str) -> i64 {
        self.by_symbol.get(symbol).map(|b| b.qty).unwrap_or(0)
    }

    pub fn get(&self, symbol: &str) -> Option<&SymbolBook> { self.by_symbol.get(symbol) }

    pub fn on_fill(&mut self, fill: &Fill) {
        self.apply(&fill.symbol, fill.price as f64, fill.quantity);
    }

    /// Signed quantity at a (possibly fractional) price.
    pub fn apply(&mut self, symbol: &str, price: f64, signed_qty: i64) {
        if signed_qty == 0 {
            return;
        }
        let entry = self.by_symbol.entry(symbol.to_string()).or_default();
        let prev = entry.qty;
        let next = prev + signed_qty;

        if prev == 0 || prev.signum() == signed_qty.signum() {
            // same direction: blend cost
            let total = prev.abs() + signed_qty.abs();
            entry.avg_cost = (entry.avg_cost * prev.abs() as f64 + price * signed_qty.abs() as f64) / total as f64;
        } else {
            let closed = signed_qty.abs().min(prev.abs());
            let direction = prev.signum() as f64;
            entry.realized += (price - entry.avg_cost) * closed as f64 * direction;
            if next == 0 {
                entry.avg_cost = 0.0;
            } else if next.signum() != prev.signum() {
                // flipped through flat: remainder opens at the fill price
                entry.avg_cost = price;
            }
        }
        entry.qty = next;

        POSITION.with_label_values(&[symbol]).set(next);
        PNL_REALIZED.set(self.realized() as i64);
    }

    pub fn mark_to_market(&mut self, symbol: &str, mid: f64) {
        if let Some(entry) = self.by_symbol.get_mut(symbol) {
            entry.unrealized = if entry.qty == 0 { 0.0 } else { (mid - entry.avg_cost) * entry.qty as f64 };
        }
        PNL_UNREALIZED.set(self.unrealized() as i64);
    }

    pub fn realized(&self) -> f64 { self.by_symbol.values().map(|b| b.realized).sum() }
    pub fn unrealized(&self) -> f64 { self.by_symbol.values().map(|b| b.unrealized).sum() }

    pub fn positions(&self) -> impl Iterator<Item = (&str, i64)> {
        self.by_symbol.iter().map(|(s, b)| (s.as_str(), b.qty))
    }
}
