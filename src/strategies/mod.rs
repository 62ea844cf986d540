//! Strategy plugins and the registry that resolves them.
//!
//! The registry maps a strategy name to a typed factory. Built-ins are
//! registered at startup; external plugins register themselves against the
//! same [`Strategy`] capability trait instead of being discovered by
//! reflection.

pub mod mean_reversion;
pub mod momentum;

pub use mean_reversion::MeanReversionStrategy;
pub use momentum::MomentumStrategy;

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::core::config::StrategyConfig;
use crate::core::{Error, Result, Strategy};

/// A live strategy instance shared between engine loops
pub type StrategyHandle = Arc<Mutex<Box<dyn Strategy>>>;

/// Constructor for a strategy plugin
pub type StrategyFactory = fn(&StrategyConfig) -> Result<Box<dyn Strategy>>;

/// Resolves strategy names to live instances, at most one per name.
pub struct StrategyRegistry {
    factories: HashMap<String, StrategyFactory>,
    live: HashMap<String, StrategyHandle>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
            live: HashMap::new(),
        }
    }

    /// Registry pre-populated with the built-in strategy set
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("momentum", MomentumStrategy::from_config);
        registry.register("mean_reversion", MeanReversionStrategy::from_config);
        registry
    }

    /// Register a factory under a name. Later registrations win, so plugins
    /// can shadow built-ins.
    pub fn register(&mut self, name: impl Into<String>, factory: StrategyFactory) {
        self.factories.insert(name.into(), factory);
    }

    pub fn available(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Resolve a name to a live instance, constructing and memoizing it on
    /// first use.
    pub fn resolve(&mut self, config: &StrategyConfig) -> Result<StrategyHandle> {
        if let Some(handle) = self.live.get(&config.name) {
            return Ok(handle.clone());
        }

        let factory = self
            .factories
            .get(config.name.as_str())
            .ok_or_else(|| Error::Config(format!("unknown strategy '{}'", config.name)))?;
        let strategy = factory(config)?;
        info!(strategy = %config.name, "loaded strategy");

        let handle: StrategyHandle = Arc::new(Mutex::new(strategy));
        self.live.insert(config.name.clone(), handle.clone());
        Ok(handle)
    }

    /// Evict a live instance. Returns whether one was present.
    pub fn unload(&mut self, name: &str) -> bool {
        if self.live.remove(name).is_some() {
            info!(strategy = name, "unloaded strategy");
            true
        } else {
            warn!(strategy = name, "unload requested for unknown strategy");
            false
        }
    }

    /// Resolve a configured list. A failure for one strategy is logged and
    /// skipped; the rest still load.
    pub fn load_all(&mut self, configs: &[StrategyConfig]) -> Vec<StrategyHandle> {
        let mut handles = vec![];
        for config in configs {
            match self.resolve(config) {
                Ok(handle) => handles.push(handle),
                Err(e) => error!(strategy = %config.name, "failed to load strategy: {e}"),
            }
        }
        handles
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn momentum_config() -> StrategyConfig {
        let mut config = StrategyConfig::new("momentum");
        config.symbols = vec!["BTC/USDT".to_string()];
        config.params = toml::toml! {
            ema_fast = 3
            ema_slow = 8
        }
        .into();
        config
    }

    #[test]
    fn resolve_memoizes_one_instance_per_name() {
        let mut registry = StrategyRegistry::with_builtins();
        let a = registry.resolve(&momentum_config()).unwrap();
        let b = registry.resolve(&momentum_config()).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn unload_evicts_the_cached_instance() {
        let mut registry = StrategyRegistry::with_builtins();
        let a = registry.resolve(&momentum_config()).unwrap();
        assert!(registry.unload("momentum"));
        assert!(!registry.unload("momentum"));
        let b = registry.resolve(&momentum_config()).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn unknown_name_is_config_error() {
        let mut registry = StrategyRegistry::with_builtins();
        let err = registry.resolve(&StrategyConfig::new("no_such")).err().unwrap();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn one_bad_config_does_not_block_the_rest() {
        let mut registry = StrategyRegistry::with_builtins();
        let bad = StrategyConfig::new("momentum"); // missing required params
        let mut good = StrategyConfig::new("mean_reversion");
        good.symbols = vec!["ETH/USDT".to_string()];
        good.params = toml::toml! {
            window = 10
            zscore_threshold = 2.0
        }
        .into();

        let handles = registry.load_all(&[bad, good]);
        assert_eq!(handles.len(), 1);
    }
}
