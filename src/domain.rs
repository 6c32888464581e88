// ===============================
// src/domain.rs
// ===============================
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Trader id used by the exchange for our own side of a trade.
pub const SUBMISSION: &str = "SUBMISSION";

pub type Symbol = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side { Buy, Sell }
impl Side {
    pub fn sign(&self) -> i64 { match self { Side::Buy => 1, Side::Sell => -1 } }
    pub fn of_qty(qty: i64) -> Side { if qty >= 0 { Side::Buy } else { Side::Sell } }
}

/// Resting book for one product. Asks carry negative volume, bids positive.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderDepth {
    #[serde(default)]
    pub buy_orders: BTreeMap<i64, i64>,
    #[serde(default)]
    pub sell_orders: BTreeMap<i64, i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order { pub symbol: Symbol, pub price: i64, pub quantity: i64 }
impl Order {
    pub fn new(symbol: &str, price: i64, quantity: i64) -> Self {
        Self { symbol: symbol.to_string(), price, quantity }
    }
    pub fn side(&self) -> Side { Side::of_qty(self.quantity) }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OwnTrade {
    pub symbol: Symbol,
    pub price: i64,
    pub quantity: i64,
    #[serde(default)]
    pub buyer: String,
    #[serde(default)]
    pub seller: String,
    #[serde(default)]
    pub timestamp: i64,
}
impl OwnTrade {
    pub fn we_bought(&self) -> bool { self.buyer == SUBMISSION }
}

/// External conversion venue quote plus the environmental readings that drive
/// the perishable product's regression.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversionObservation {
    pub bid_price: f64,
    pub ask_price: f64,
    pub transport_fees: f64,
    pub export_tariff: f64,
    pub import_tariff: f64,
    pub sunlight: f64,
    pub humidity: f64,
}
impl ConversionObservation {
    pub fn factor(&self, name: &str) -> Option<f64> {
        match name {
            "sunlight" => Some(self.sunlight),
            "humidity" => Some(self.humidity),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Observations {
    #[serde(default)]
    pub conversion: BTreeMap<Symbol, ConversionObservation>,
}

/// What the exchange publishes every timestep, independent of who is trading.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub timestamp: i64,
    pub order_depths: BTreeMap<Symbol, OrderDepth>,
    #[serde(default)]
    pub observations: Observations,
}

/// Everything handed to the trader for one invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TradingState {
    pub timestamp: i64,
    #[serde(default)]
    pub trader_data: String,
    pub order_depths: BTreeMap<Symbol, OrderDepth>,
    #[serde(default)]
    pub position: BTreeMap<Symbol, i64>,
    #[serde(default)]
    pub own_trades: BTreeMap<Symbol, Vec<OwnTrade>>,
    #[serde(default)]
    pub observations: Observations,
}
impl TradingState {
    pub fn position_of(&self, symbol: &str) -> i64 {
        self.position.get(symbol).copied().unwrap_or(0)
    }
    pub fn trades_of(&self, symbol: &str) -> &[OwnTrade] {
        self.own_trades.get(symbol).map(|v| v.as_slice()).unwrap_or(&[])
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraderOutput {
    pub orders: BTreeMap<Symbol, Vec<Order>>,
    pub conversions: i64,
    pub trader_data: String,
}
impl TraderOutput {
    pub fn order_count(&self) -> usize { self.orders.values().map(|v| v.len()).sum() }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill { pub timestamp: i64, pub symbol: Symbol, pub price: i64, pub quantity: i64 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub timestamp: i64,
    pub orders: BTreeMap<Symbol, Vec<Order>>,
    pub conversions: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event { Snapshot(MarketSnapshot), Decision(Decision), Fill(Fill), Note(String) }
