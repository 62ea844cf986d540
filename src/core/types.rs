//! Core types - Strong typing for safety

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Tradeable symbol (e.g., "BTC/USDT")
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Symbol(String);

impl Symbol {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// OHLCV bar
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl Candle {
    /// Intrabar change as a fraction of the open. Zero open yields zero.
    pub fn change_pct(&self) -> Decimal {
        if self.open.is_zero() {
            Decimal::ZERO
        } else {
            (self.close - self.open) / self.open
        }
    }
}

/// Trade signal - a directional proposal from a strategy, not yet risk-checked
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: Symbol,
    pub side: Side,
    pub price: Decimal,
    pub amount: Decimal,
    /// Opaque strategy hints (ATR, stop levels, scores)
    #[serde(default)]
    pub metadata: HashMap<String, f64>,
    pub timestamp: DateTime<Utc>,
}

/// Order status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Filled,
    Rejected,
}

/// Risk-approved, exchange-bound instruction derived from a signal.
/// `price: None` means a market order. The id doubles as the
/// client-generated dedup token for retry-safe submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub symbol: Symbol,
    pub side: Side,
    pub amount: Decimal,
    pub price: Option<Decimal>,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
}

impl Order {
    pub fn new(symbol: Symbol, side: Side, amount: Decimal, price: Option<Decimal>) -> Self {
        Self {
            id: Uuid::new_v4(),
            symbol,
            side,
            amount,
            price,
            stop_loss: None,
            take_profit: None,
            status: OrderStatus::Pending,
            created_at: Utc::now(),
        }
    }
}

/// Execution report from the gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub order_id: Uuid,
    pub symbol: Symbol,
    pub side: Side,
    pub amount: Decimal,
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// Completed trade as recorded in the portfolio ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub timestamp: DateTime<Utc>,
    pub symbol: Symbol,
    pub side: Side,
    pub amount: Decimal,
    pub price: Decimal,
    pub realized_profit: Decimal,
}

/// Portfolio value snapshot.
/// `total_value` marks open positions at the latest known prices;
/// `realized_value` carries them at cost basis (no unrealized P&L).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ValuePoint {
    pub timestamp: DateTime<Utc>,
    pub total_value: Decimal,
    pub realized_value: Decimal,
}

/// Events flowing through the engine queue
#[derive(Debug, Clone)]
pub enum Event {
    MarketUpdate(HashMap<Symbol, Candle>),
    TradeSignal(Signal),
    Exceptional { symbol: Symbol, change_pct: Decimal },
}

/// Result of a strategy's analysis pass, consumed by signal generation
#[derive(Debug, Clone)]
pub struct Analysis {
    pub symbol: Symbol,
    pub timestamp: DateTime<Utc>,
    pub last_close: Decimal,
    /// Named indicator outputs
    pub values: HashMap<String, f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_round_trips_through_json_with_its_id() {
        let order = Order::new(Symbol::new("BTC/USDT"), Side::Buy, Decimal::ONE, None);
        let json = serde_json::to_string(&order).unwrap();
        assert!(json.contains(&order.id.to_string()));

        let back: Order = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, order.id);
        assert_eq!(back.symbol, order.symbol);
        assert!(back.price.is_none());
    }
}
