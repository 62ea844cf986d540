//! Shared latest-bar cache.
//!
//! Last-write-wins: the market-update loop writes, every other loop reads
//! through owned snapshots. Strategies must tolerate reading either the
//! previous or the newly-written bar for a symbol.

use crate::core::{Candle, Symbol};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Latest-bar cache keyed by symbol
#[derive(Default)]
pub struct MarketState {
    bars: RwLock<HashMap<Symbol, Candle>>,
}

impl MarketState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the latest bar for a symbol
    pub fn update(&self, symbol: Symbol, bar: Candle) {
        self.bars.write().insert(symbol, bar);
    }

    /// Get the latest bar for a symbol, cloned
    pub fn latest(&self, symbol: &Symbol) -> Option<Candle> {
        self.bars.read().get(symbol).cloned()
    }

    /// Owned snapshot of all latest bars
    pub fn snapshot(&self) -> HashMap<Symbol, Candle> {
        self.bars.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal::Decimal;

    fn bar(close: i64) -> Candle {
        Candle {
            open: Decimal::from(close),
            high: Decimal::from(close),
            low: Decimal::from(close),
            close: Decimal::from(close),
            volume: Decimal::ONE,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn last_write_wins() {
        let state = MarketState::new();
        let btc = Symbol::new("BTC/USDT");
        state.update(btc.clone(), bar(100));
        state.update(btc.clone(), bar(101));
        assert_eq!(state.latest(&btc).unwrap().close, Decimal::from(101));
        assert_eq!(state.snapshot().len(), 1);
    }
}
