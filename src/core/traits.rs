//! Core traits - the seams between the engine and its collaborators

use async_trait::async_trait;
use crate::core::types::*;
use crate::core::Result;

/// Market data feed - supplies latest and historical bars per symbol.
/// Must be safe to call concurrently for distinct symbols.
#[async_trait]
pub trait MarketDataFeed: Send + Sync {
    /// Fetch the most recent bar for a symbol
    async fn latest_bar(&self, symbol: &Symbol) -> Result<Candle>;

    /// Fetch up to `limit` historical bars, oldest first
    async fn historical_bars(
        &self,
        symbol: &Symbol,
        timeframe: &str,
        limit: usize,
    ) -> Result<Vec<Candle>>;

    /// Release the underlying connection
    async fn close(&self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str;
}

/// Order gateway - submits orders to an exchange and reports fills.
/// Retries on timeout are deduplicated by the order's client-generated id.
#[async_trait]
pub trait OrderGateway: Send + Sync {
    async fn submit(&self, order: &Order) -> Result<Fill>;

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str;
}

/// Optional capability: strategies that react to market volatility.
/// The engine checks capability membership instead of probing methods.
pub trait VolatilityAware {
    fn adjust_for_volatility(&mut self, volatility: f64);
}

/// Trading strategy capability.
///
/// Stateless from the engine's perspective except for its own parameters;
/// any `analyze` call exceeding the configured budget is treated as a failed
/// evaluation for that iteration.
#[async_trait]
pub trait Strategy: Send + Sync {
    fn name(&self) -> &str;

    /// Symbols this strategy covers
    fn symbols(&self) -> &[Symbol];

    /// Bar timeframe override; `None` uses the engine default
    fn timeframe(&self) -> Option<&str> {
        None
    }

    /// Merge new parameters. Fails on missing required parameters.
    fn set_parameters(&mut self, params: &toml::Value) -> Result<()>;

    /// Current parameters, for reporting
    fn parameters(&self) -> toml::Value;

    /// Search space handed to the external optimizer
    fn parameter_ranges(&self) -> toml::Value {
        toml::Value::Table(toml::map::Map::new())
    }

    /// Evaluate market data. `aux_score` is an opaque auxiliary input
    /// (e.g. a sentiment score) that strategies may ignore.
    async fn analyze(
        &mut self,
        symbol: &Symbol,
        timeframe: &str,
        bars: &[Candle],
        aux_score: f64,
    ) -> Result<Analysis>;

    /// Derive an optional trade signal from an analysis result
    fn generate_signal(&self, analysis: &Analysis) -> Option<Signal>;

    /// Notification of a new bar on the shared snapshot
    fn on_market_update(&mut self, _symbol: &Symbol, _bar: &Candle) {}

    /// Mean outcome of the strategy's last `window` closed evaluations.
    /// Zero when nothing has been recorded yet.
    fn recent_performance(&self, _window: usize) -> f64 {
        0.0
    }

    /// Downcast hook for the optional volatility capability
    fn volatility_aware(&mut self) -> Option<&mut dyn VolatilityAware> {
        None
    }
}

/// External parameter-optimization capability, consulted by the
/// adaptive-risk loop when a strategy underperforms.
#[async_trait]
pub trait ParameterOptimizer: Send + Sync {
    /// Produce new parameters for `strategy` within `ranges`.
    /// An empty table means "no change".
    async fn optimize(&self, strategy: &str, ranges: &toml::Value) -> Result<toml::Value>;
}

/// Default optimizer that never proposes a change
pub struct NoopOptimizer;

#[async_trait]
impl ParameterOptimizer for NoopOptimizer {
    async fn optimize(&self, _strategy: &str, _ranges: &toml::Value) -> Result<toml::Value> {
        Ok(toml::Value::Table(toml::map::Map::new()))
    }
}
