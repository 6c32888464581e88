// ===============================
// src/risk.rs
// ===============================
use thiserror::Error;

use crate::domain::Order;

/// Worst-case position bookkeeping for one product within a single timestep.
/// Orders are assumed to fill completely, so buys and sells are tracked apart:
/// a bid and an offer resting together must each fit on their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exposure {
    pub position: i64,
    pub limit: i64,
    pub pending_buy: i64,
    pub pending_sell: i64,
}

impl Exposure {
    pub fn new(position: i64, limit: i64) -> Self {
        Self { position, limit: limit.abs(), pending_buy: 0, pending_sell: 0 }
    }

    /// Room left for additional buys before hitting +limit.
    pub fn buy_capacity(&self) -> i64 {
        (self.limit - self.position - self.pending_buy).max(0)
    }

    /// Room left for additional sells (positive number) before hitting -limit.
    pub fn sell_capacity(&self) -> i64 {
        (self.limit + self.position - self.pending_sell).max(0)
    }

    pub fn apply(&mut self, order: &Order) {
        if order.quantity > 0 {
            self.pending_buy += order.quantity;
        } else {
            self.pending_sell += -order.quantity;
        }
    }

    /// Narrows this exposure so that it also holds for `other_position`.
    /// Used when a pending conversion may or may not move the position.
    pub fn also_covering(mut self, other_position: i64) -> Self {
        let hi = self.position.max(other_position);
        let lo = self.position.min(other_position);
        let buy_cap = (self.limit - hi - self.pending_buy).max(0);
        let sell_cap = (self.limit + lo - self.pending_sell).max(0);
        // rebase onto `position` so the capacities come out as computed above
        self.pending_buy = self.limit - self.position - buy_cap;
        self.pending_sell = self.limit + self.position - sell_cap;
        self
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RiskError {
    #[error("{symbol}: buys of {buys} from position {position} exceed limit {limit}")]
    LongLimit { symbol: String, position: i64, buys: i64, limit: i64 },
    #[error("{symbol}: sells of {sells} from position {position} exceed limit {limit}")]
    ShortLimit { symbol: String, position: i64, sells: i64, limit: i64 },
    #[error("{symbol}: zero-quantity order at {price}")]
    ZeroQuantity { symbol: String, price: i64 },
}

/// Final pre-send check over one product's complete order set.
pub fn check_orders(symbol: &str, position: i64, limit: i64, orders: &[Order]) -> Result<(), RiskError> {
    let limit = limit.abs();
    let mut buys = 0_i64;
    let mut sells = 0_i64;
    for o in orders {
        match o.quantity {
            0 => return Err(RiskError::ZeroQuantity { symbol: symbol.to_string(), price: o.price }),
            q if q > 0 => buys += q,
            q => sells += -q,
        }
    }
    if position + buys > limit {
        return Err(RiskError::LongLimit { symbol: symbol.to_string(), position, buys, limit });
    }
    if position - sells < -limit {
        return Err(RiskError::ShortLimit { symbol: symbol.to_string(), position, sells, limit });
    }
    Ok(())
}
