//! Configuration - Type-safe, validated config
//!
//! Loaded from TOML. The engine holds the active config as an immutable
//! `Arc<Config>` snapshot; `update_config` swaps the snapshot atomically and
//! the next loop iteration picks up new intervals and parameters.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::core::{Error, Result};

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Trading parameters and loop intervals
    pub trading: TradingConfig,

    /// Risk management parameters
    pub risk: RiskConfig,

    /// Strategies to load at startup
    #[serde(default)]
    pub strategies: Vec<StrategyConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    /// Trading symbols
    pub symbols: Vec<String>,

    /// Bar timeframe for historical fetches (e.g. "1h")
    pub timeframe: String,

    /// Starting balance in quote currency
    pub initial_balance: f64,

    /// Market-update loop interval
    #[serde(default = "default_update_interval")]
    pub update_interval_secs: u64,

    /// Strategy-evaluation loop interval
    #[serde(default = "default_strategy_interval")]
    pub strategy_interval_secs: u64,

    /// Adaptive-risk loop interval
    #[serde(default = "default_risk_adjust_interval")]
    pub risk_adjust_interval_secs: u64,

    /// Budget for any single external call (feed fetch, order submit)
    #[serde(default = "default_call_timeout")]
    pub call_timeout_ms: u64,

    /// Budget for one strategy analyze() call
    #[serde(default = "default_analyze_budget")]
    pub analyze_budget_ms: u64,

    /// Bars fetched per strategy evaluation
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// |close-open|/open beyond this enqueues an exceptional event
    #[serde(default = "default_exceptional_threshold")]
    pub exceptional_change_threshold: f64,

    /// Strategies performing below this get re-optimized
    #[serde(default = "default_performance_threshold")]
    pub performance_threshold: f64,

    /// Number of recent evaluations the performance measure covers
    #[serde(default = "default_performance_window")]
    pub performance_window: usize,

    /// Rolling window of the volatility tracker
    #[serde(default = "default_volatility_window")]
    pub volatility_window: usize,
}

fn default_update_interval() -> u64 {
    1
}
fn default_strategy_interval() -> u64 {
    5
}
fn default_risk_adjust_interval() -> u64 {
    300
}
fn default_call_timeout() -> u64 {
    5000
}
fn default_analyze_budget() -> u64 {
    2000
}
fn default_history_limit() -> usize {
    100
}
fn default_exceptional_threshold() -> f64 {
    0.1
}
fn default_performance_threshold() -> f64 {
    -0.05
}
fn default_performance_window() -> usize {
    20
}
fn default_volatility_window() -> usize {
    20
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Max position size per symbol, in base units
    pub max_position_size: f64,

    /// Stop-loss distance as a fraction of entry price
    pub stop_loss_pct: f64,

    /// Take-profit distance as a fraction of entry price
    pub take_profit_pct: f64,

    /// Max portfolio drawdown before trading is gated off
    pub max_drawdown_pct: f64,

    /// Max fraction of balance risked on a single trade
    pub max_risk_per_trade: f64,

    /// Minimum reward/risk ratio a signal must offer
    #[serde(default = "default_min_risk_reward")]
    pub min_risk_reward: f64,

    /// Baseline volatility the adjustment factor is anchored to
    #[serde(default = "default_base_volatility")]
    pub base_volatility: f64,

    /// Enable volatility-driven parameter adjustment
    #[serde(default = "default_true")]
    pub volatility_adjustment: bool,

    /// Whether mark-to-market value snapshots count toward drawdown gating
    #[serde(default = "default_true")]
    pub drawdown_includes_unrealized: bool,

    /// [min, max] clamp for max_position_size after any adjustment
    #[serde(default = "default_position_bounds")]
    pub position_size_bounds: [f64; 2],

    /// [min, max] clamp for stop-loss/take-profit percentages
    #[serde(default = "default_pct_bounds")]
    pub pct_bounds: [f64; 2],
}

fn default_min_risk_reward() -> f64 {
    2.0
}
fn default_base_volatility() -> f64 {
    0.02
}
fn default_true() -> bool {
    true
}
fn default_position_bounds() -> [f64; 2] {
    [0.0, f64::MAX]
}
fn default_pct_bounds() -> [f64; 2] {
    [0.001, 0.5]
}

/// Per-strategy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Registered strategy name
    pub name: String,

    /// Symbols this strategy covers (defaults to trading.symbols)
    #[serde(default)]
    pub symbols: Vec<String>,

    /// Bar timeframe (defaults to trading.timeframe)
    #[serde(default)]
    pub timeframe: Option<String>,

    /// Strategy-specific parameters
    #[serde(default = "empty_params")]
    pub params: toml::Value,
}

fn empty_params() -> toml::Value {
    toml::Value::Table(toml::map::Map::new())
}

impl StrategyConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            symbols: vec![],
            timeframe: None,
            params: empty_params(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            trading: TradingConfig {
                symbols: vec!["BTC/USDT".to_string(), "ETH/USDT".to_string()],
                timeframe: "1h".to_string(),
                initial_balance: 10_000.0,
                update_interval_secs: default_update_interval(),
                strategy_interval_secs: default_strategy_interval(),
                risk_adjust_interval_secs: default_risk_adjust_interval(),
                call_timeout_ms: default_call_timeout(),
                analyze_budget_ms: default_analyze_budget(),
                history_limit: default_history_limit(),
                exceptional_change_threshold: default_exceptional_threshold(),
                performance_threshold: default_performance_threshold(),
                performance_window: default_performance_window(),
                volatility_window: default_volatility_window(),
            },
            risk: RiskConfig {
                max_position_size: 100.0,
                stop_loss_pct: 0.05,
                take_profit_pct: 0.10,
                max_drawdown_pct: 0.2,
                max_risk_per_trade: 0.02,
                min_risk_reward: default_min_risk_reward(),
                base_volatility: default_base_volatility(),
                volatility_adjustment: true,
                drawdown_includes_unrealized: true,
                position_size_bounds: default_position_bounds(),
                pct_bounds: default_pct_bounds(),
            },
            strategies: vec![],
        }
    }
}

impl Config {
    /// Load from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {}", path.display(), e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the default location (config.toml), falling back to defaults
    pub fn load_default() -> Self {
        let candidates = [
            "config.toml",
            concat!(env!("CARGO_MANIFEST_DIR"), "/config.toml"),
        ];

        for path in &candidates {
            if let Ok(cfg) = Self::load(Path::new(path)) {
                tracing::info!("loaded config from {}", path);
                return cfg;
            }
        }

        tracing::warn!("no config.toml found, using defaults");
        Self::default()
    }

    pub fn validate(&self) -> Result<()> {
        if self.trading.symbols.is_empty() {
            return Err(Error::Config("trading.symbols must not be empty".into()));
        }
        if self.trading.initial_balance <= 0.0 {
            return Err(Error::Config("trading.initial_balance must be positive".into()));
        }
        if self.risk.stop_loss_pct <= 0.0 || self.risk.take_profit_pct <= 0.0 {
            return Err(Error::Config(
                "risk.stop_loss_pct and risk.take_profit_pct must be positive".into(),
            ));
        }
        let [lo, hi] = self.risk.position_size_bounds;
        if lo > hi {
            return Err(Error::Config("risk.position_size_bounds inverted".into()));
        }
        Ok(())
    }
}
