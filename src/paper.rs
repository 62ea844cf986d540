//! Paper trading - simulated market data and instant fills.
//!
//! The feed produces a bounded random walk per symbol; the gateway fills
//! every order immediately at its limit price or, for market orders, at the
//! latest cached close. Useful for dry runs and for exercising the full
//! engine pipeline in tests.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rand::Rng;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;

use crate::core::{
    Candle, Error, Fill, MarketDataFeed, Order, OrderGateway, Result, Symbol,
};
use crate::data::MarketState;

/// Random-walk price feed. Each `latest_bar` call advances the walk one step.
pub struct SimulatedFeed {
    prices: Mutex<HashMap<Symbol, f64>>,
    /// Max fractional move per step
    step: f64,
}

impl SimulatedFeed {
    pub fn new(symbols: &[String]) -> Self {
        Self::with_prices(symbols.iter().map(|s| (Symbol::new(s), 1_000.0)).collect())
    }

    pub fn with_prices(prices: HashMap<Symbol, f64>) -> Self {
        Self {
            prices: Mutex::new(prices),
            step: 0.01,
        }
    }

    fn next_bar(&self, symbol: &Symbol) -> Result<Candle> {
        let mut prices = self.prices.lock();
        let price = prices
            .get_mut(symbol)
            .ok_or_else(|| Error::Feed(format!("unknown symbol {symbol}")))?;

        let mut rng = rand::thread_rng();
        let open = *price;
        let close = open * (1.0 + rng.gen_range(-self.step..self.step));
        *price = close;
        drop(prices);

        bar(open, close)
    }
}

fn dec(value: f64) -> Result<Decimal> {
    Decimal::try_from(value).map_err(|e| Error::Feed(e.to_string()))
}

fn bar(open: f64, close: f64) -> Result<Candle> {
    Ok(Candle {
        open: dec(open)?,
        high: dec(open.max(close))?,
        low: dec(open.min(close))?,
        close: dec(close)?,
        volume: dec(rand::thread_rng().gen_range(1.0..100.0))?,
        timestamp: Utc::now(),
    })
}

#[async_trait]
impl MarketDataFeed for SimulatedFeed {
    async fn latest_bar(&self, symbol: &Symbol) -> Result<Candle> {
        self.next_bar(symbol)
    }

    async fn historical_bars(
        &self,
        symbol: &Symbol,
        _timeframe: &str,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        let mut bars = Vec::with_capacity(limit);
        for _ in 0..limit {
            bars.push(self.next_bar(symbol)?);
        }
        Ok(bars)
    }

    fn name(&self) -> &str {
        "simulated"
    }
}

/// Gateway that fills orders instantly and keeps a fill log.
/// Resubmission of a known order id returns the original fill.
pub struct PaperGateway {
    market: Option<Arc<MarketState>>,
    fills: Mutex<HashMap<uuid::Uuid, Fill>>,
}

impl PaperGateway {
    pub fn new() -> Self {
        Self {
            market: None,
            fills: Mutex::new(HashMap::new()),
        }
    }

    /// Gateway that prices market orders off the shared latest-bar cache
    pub fn with_market(market: Arc<MarketState>) -> Self {
        Self {
            market: Some(market),
            fills: Mutex::new(HashMap::new()),
        }
    }

    pub fn fill_count(&self) -> usize {
        self.fills.lock().len()
    }

    fn fill_price(&self, order: &Order) -> Result<Decimal> {
        if let Some(price) = order.price {
            return Ok(price);
        }
        self.market
            .as_ref()
            .and_then(|m| m.latest(&order.symbol))
            .map(|b| b.close)
            .ok_or_else(|| Error::Gateway(format!("no market price for {}", order.symbol)))
    }
}

impl Default for PaperGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OrderGateway for PaperGateway {
    async fn submit(&self, order: &Order) -> Result<Fill> {
        if let Some(existing) = self.fills.lock().get(&order.id) {
            return Ok(existing.clone());
        }

        let price = self.fill_price(order)?;
        let fill = Fill {
            order_id: order.id,
            symbol: order.symbol.clone(),
            side: order.side,
            amount: order.amount,
            price,
            timestamp: Utc::now(),
        };
        self.fills.lock().insert(order.id, fill.clone());
        Ok(fill)
    }

    fn name(&self) -> &str {
        "paper"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Side;

    #[tokio::test]
    async fn feed_walks_within_step_bounds() {
        let feed = SimulatedFeed::new(&["BTC/USDT".to_string()]);
        let symbol = Symbol::new("BTC/USDT");

        let bars = feed.historical_bars(&symbol, "1h", 50).await.unwrap();
        assert_eq!(bars.len(), 50);
        for pair in bars.windows(2) {
            assert_eq!(pair[1].open, pair[0].close);
            assert!(pair[1].close > Decimal::ZERO);
        }

        // The live bar continues where the history left off
        let latest = feed.latest_bar(&symbol).await.unwrap();
        assert_eq!(latest.open, bars.last().unwrap().close);
    }

    #[tokio::test]
    async fn unknown_symbol_is_a_feed_error() {
        let feed = SimulatedFeed::new(&["BTC/USDT".to_string()]);
        let err = feed.latest_bar(&Symbol::new("DOGE/USDT")).await.unwrap_err();
        assert!(matches!(err, Error::Feed(_)));
    }

    #[tokio::test]
    async fn limit_order_fills_at_its_price() {
        let gateway = PaperGateway::new();
        let order = Order::new(
            Symbol::new("BTC/USDT"),
            Side::Buy,
            Decimal::ONE,
            Some(Decimal::from(100)),
        );

        let fill = gateway.submit(&order).await.unwrap();
        assert_eq!(fill.price, Decimal::from(100));
        assert_eq!(fill.order_id, order.id);
    }

    #[tokio::test]
    async fn resubmission_returns_the_original_fill() {
        let gateway = PaperGateway::new();
        let order = Order::new(
            Symbol::new("BTC/USDT"),
            Side::Buy,
            Decimal::ONE,
            Some(Decimal::from(100)),
        );

        let first = gateway.submit(&order).await.unwrap();
        let second = gateway.submit(&order).await.unwrap();
        assert_eq!(first.timestamp, second.timestamp);
        assert_eq!(gateway.fill_count(), 1);
    }

    #[tokio::test]
    async fn market_order_uses_latest_cached_close() {
        let market = Arc::new(MarketState::new());
        let symbol = Symbol::new("ETH/USDT");
        market.update(
            symbol.clone(),
            Candle {
                open: Decimal::from(200),
                high: Decimal::from(210),
                low: Decimal::from(195),
                close: Decimal::from(205),
                volume: Decimal::ONE,
                timestamp: Utc::now(),
            },
        );

        let gateway = PaperGateway::with_market(market);
        let order = Order::new(symbol, Side::Buy, Decimal::ONE, None);
        let fill = gateway.submit(&order).await.unwrap();
        assert_eq!(fill.price, Decimal::from(205));
    }

    #[tokio::test]
    async fn market_order_without_a_mark_is_rejected() {
        let gateway = PaperGateway::new();
        let order = Order::new(Symbol::new("BTC/USDT"), Side::Buy, Decimal::ONE, None);
        assert!(matches!(
            gateway.submit(&order).await.unwrap_err(),
            Error::Gateway(_)
        ));
    }
}
