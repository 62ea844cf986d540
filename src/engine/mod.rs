//! Engine - the concurrent control loop.
//!
//! Three producer loops (market updates, strategy evaluation, adaptive risk)
//! feed a FIFO event queue consumed by a single loop that owns all order
//! submission and portfolio mutation. Loop intervals are re-read from the
//! active config snapshot on every iteration, so `update_config` takes
//! effect without a restart.
//!
//! Locking discipline: parking_lot guards are never held across an await;
//! strategy instances sit behind a tokio Mutex because `analyze` is async.

use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, timeout};
use tracing::{error, info, warn};

use crate::core::config::Config;
use crate::core::{
    Error, Event, MarketDataFeed, Order, OrderGateway, ParameterOptimizer, Result, Side, Signal,
    Symbol,
};
use crate::data::MarketState;
use crate::portfolio::{Portfolio, PortfolioMetrics};
use crate::risk::RiskManager;
use crate::strategies::{StrategyFactory, StrategyHandle, StrategyRegistry};
use crate::volatility::VolatilityTracker;

/// Orchestrates feeds, strategies, risk, and execution.
pub struct Engine {
    config: RwLock<Arc<Config>>,
    feed: Arc<dyn MarketDataFeed>,
    gateway: Arc<dyn OrderGateway>,
    optimizer: Arc<dyn ParameterOptimizer>,
    market: Arc<MarketState>,
    volatility: RwLock<VolatilityTracker>,
    risk: RwLock<RiskManager>,
    portfolio: RwLock<Portfolio>,
    registry: Mutex<StrategyRegistry>,
    strategies: RwLock<Vec<StrategyHandle>>,
    events_tx: mpsc::UnboundedSender<Event>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<Event>>>,
    running: watch::Sender<bool>,
}

impl Engine {
    pub fn new(
        config: Config,
        feed: Arc<dyn MarketDataFeed>,
        gateway: Arc<dyn OrderGateway>,
        optimizer: Arc<dyn ParameterOptimizer>,
    ) -> Arc<Self> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (running, _) = watch::channel(true);
        let initial_balance =
            Decimal::try_from(config.trading.initial_balance).unwrap_or_default();

        Arc::new(Self {
            volatility: RwLock::new(VolatilityTracker::new(config.trading.volatility_window)),
            risk: RwLock::new(RiskManager::new(&config.risk)),
            portfolio: RwLock::new(Portfolio::new(initial_balance)),
            config: RwLock::new(Arc::new(config)),
            feed,
            gateway,
            optimizer,
            market: Arc::new(MarketState::new()),
            registry: Mutex::new(StrategyRegistry::with_builtins()),
            strategies: RwLock::new(vec![]),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            running,
        })
    }

    /// Register an external strategy plugin before `run`
    pub fn register_strategy(&self, name: impl Into<String>, factory: StrategyFactory) {
        self.registry.lock().register(name, factory);
    }

    /// Run until `stop` is called or a fatal error occurs. Consumes the
    /// event receiver, so a second call fails.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let rx = self
            .events_rx
            .lock()
            .take()
            .ok_or_else(|| Error::Fatal("engine is already running".into()))?;

        self.load_strategies();
        info!(
            feed = self.feed.name(),
            gateway = self.gateway.name(),
            "engine starting"
        );

        let loops = [
            tokio::spawn({
                let engine = self.clone();
                async move { engine.market_loop().await }
            }),
            tokio::spawn({
                let engine = self.clone();
                async move { engine.strategy_loop().await }
            }),
            tokio::spawn({
                let engine = self.clone();
                async move { engine.adaptive_loop().await }
            }),
            tokio::spawn({
                let engine = self.clone();
                async move { engine.event_loop(rx).await }
            }),
        ];
        for result in join_all(loops).await {
            if let Err(e) = result {
                error!("engine task failed: {e}");
            }
        }

        self.feed.close().await?;
        self.gateway.close().await?;
        info!("engine stopped");
        Ok(())
    }

    /// Signal all loops to wind down after their current iteration
    pub fn stop(&self) {
        info!("stop requested");
        let _ = self.running.send(false);
    }

    pub fn is_running(&self) -> bool {
        *self.running.borrow()
    }

    pub fn get_config(&self) -> Arc<Config> {
        self.config.read().clone()
    }

    /// Swap in a new config. Risk parameters flow into the risk manager as
    /// its new baseline; loop intervals apply from the next iteration.
    pub fn update_config(&self, new: Config) -> Result<()> {
        new.validate()?;

        let mut params = HashMap::new();
        params.insert("max_position_size".to_string(), new.risk.max_position_size);
        params.insert("stop_loss_pct".to_string(), new.risk.stop_loss_pct);
        params.insert("take_profit_pct".to_string(), new.risk.take_profit_pct);
        params.insert("max_drawdown_pct".to_string(), new.risk.max_drawdown_pct);
        params.insert("max_risk_per_trade".to_string(), new.risk.max_risk_per_trade);
        self.risk.write().update_parameters(&params);

        *self.config.write() = Arc::new(new);
        info!("configuration updated");
        Ok(())
    }

    pub fn get_performance_metrics(&self) -> PortfolioMetrics {
        self.portfolio.read().metrics()
    }

    pub fn get_open_positions(&self) -> HashMap<Symbol, Decimal> {
        self.portfolio.read().snapshot().positions
    }

    /// Strategy names the registry can construct
    pub fn available_strategies(&self) -> Vec<String> {
        self.registry.lock().available()
    }

    /// Resolve configured strategies, defaulting symbols and timeframe from
    /// the trading section. A strategy that fails to load is skipped.
    fn load_strategies(&self) {
        let cfg = self.get_config();
        let mut configs = cfg.strategies.clone();
        for config in &mut configs {
            if config.symbols.is_empty() {
                config.symbols = cfg.trading.symbols.clone();
            }
            if config.timeframe.is_none() {
                config.timeframe = Some(cfg.trading.timeframe.clone());
            }
        }
        let handles = self.registry.lock().load_all(&configs);
        info!(loaded = handles.len(), configured = configs.len(), "strategies loaded");
        *self.strategies.write() = handles;
    }

    fn send(&self, event: Event) {
        if self.events_tx.send(event).is_err() {
            warn!("event queue closed, dropping event");
        }
    }

    /// Loop-boundary failure policy: transient errors wait for the next
    /// scheduled iteration, validation errors drop the unit of work,
    /// everything else is surfaced as-is.
    fn note_failure(context: &str, err: &Error) {
        if err.is_transient() {
            warn!("{context}: {err}, retrying next iteration");
        } else if err.is_validation() {
            warn!("{context}: {err}, dropped");
        } else {
            warn!("{context}: {err}");
        }
    }

    async fn market_loop(&self) {
        let mut shutdown = self.running.subscribe();
        while self.is_running() {
            let cfg = self.get_config();
            self.market_update_iteration(&cfg).await;
            tokio::select! {
                _ = sleep(Duration::from_secs(cfg.trading.update_interval_secs)) => {}
                _ = shutdown.changed() => {}
            }
        }
    }

    async fn strategy_loop(&self) {
        let mut shutdown = self.running.subscribe();
        while self.is_running() {
            let cfg = self.get_config();
            self.strategy_iteration(&cfg).await;
            tokio::select! {
                _ = sleep(Duration::from_secs(cfg.trading.strategy_interval_secs)) => {}
                _ = shutdown.changed() => {}
            }
        }
    }

    async fn adaptive_loop(&self) {
        let mut shutdown = self.running.subscribe();
        while self.is_running() {
            let cfg = self.get_config();
            self.adaptive_iteration(&cfg).await;
            tokio::select! {
                _ = sleep(Duration::from_secs(cfg.trading.risk_adjust_interval_secs)) => {}
                _ = shutdown.changed() => {}
            }
        }
    }

    /// Fetch the latest bar per symbol, feed the volatility tracker, flag
    /// exceptional moves, and publish the refreshed snapshot. A failed
    /// symbol is skipped; the rest of the iteration proceeds.
    async fn market_update_iteration(&self, cfg: &Config) {
        let call_timeout = Duration::from_millis(cfg.trading.call_timeout_ms);

        for name in &cfg.trading.symbols {
            let symbol = Symbol::new(name);
            let bar = match timeout(call_timeout, self.feed.latest_bar(&symbol)).await {
                Ok(Ok(bar)) => bar,
                Ok(Err(e)) => {
                    Self::note_failure(&format!("latest_bar {symbol}"), &e);
                    continue;
                }
                Err(_) => {
                    let e = Error::Timeout(call_timeout, "latest_bar".into());
                    Self::note_failure(&format!("latest_bar {symbol}"), &e);
                    continue;
                }
            };

            if let Some(close) = bar.close.to_f64() {
                self.volatility.write().update(close);
            }

            let change = bar.change_pct();
            if change.abs().to_f64().unwrap_or(0.0) > cfg.trading.exceptional_change_threshold {
                self.send(Event::Exceptional {
                    symbol: symbol.clone(),
                    change_pct: change,
                });
            }

            self.market.update(symbol, bar);
        }

        if cfg.risk.volatility_adjustment {
            let (volatility, high) = {
                let tracker = self.volatility.read();
                (
                    tracker.current(),
                    tracker.is_high(cfg.risk.base_volatility * 2.0),
                )
            };
            if high {
                warn!(volatility, "volatility well above baseline");
            }
            if volatility > 0.0 {
                self.risk.write().adjust_for_volatility(volatility);
            }
        }

        self.send(Event::MarketUpdate(self.market.snapshot()));
    }

    /// Evaluate every strategy against fresh history. Failures are isolated
    /// per strategy/symbol pair and never abort the iteration.
    async fn strategy_iteration(&self, cfg: &Config) {
        let call_timeout = Duration::from_millis(cfg.trading.call_timeout_ms);
        let analyze_budget = Duration::from_millis(cfg.trading.analyze_budget_ms);
        let handles = self.strategies.read().clone();
        let volatility = self.volatility.read().current();

        for handle in handles {
            let mut strategy = handle.lock().await;
            let name = strategy.name().to_string();
            let timeframe = strategy
                .timeframe()
                .unwrap_or(&cfg.trading.timeframe)
                .to_string();
            let symbols = strategy.symbols().to_vec();

            for symbol in symbols {
                let history = timeout(
                    call_timeout,
                    self.feed
                        .historical_bars(&symbol, &timeframe, cfg.trading.history_limit),
                )
                .await;
                let mut bars = match history {
                    Ok(Ok(bars)) => bars,
                    Ok(Err(e)) => {
                        Self::note_failure(&format!("{name}/{symbol} historical_bars"), &e);
                        continue;
                    }
                    Err(_) => {
                        let e = Error::Timeout(call_timeout, "historical_bars".into());
                        Self::note_failure(&format!("{name}/{symbol} historical_bars"), &e);
                        continue;
                    }
                };
                // History usually already ends with the newest bar; only
                // append the cached one when it is actually newer
                if let Some(latest) = self.market.latest(&symbol) {
                    let already_present = bars
                        .last()
                        .map(|newest| newest.timestamp == latest.timestamp)
                        .unwrap_or(false);
                    if !already_present {
                        bars.push(latest);
                    }
                }

                let analysis = match timeout(
                    analyze_budget,
                    strategy.analyze(&symbol, &timeframe, &bars, volatility),
                )
                .await
                {
                    Ok(Ok(analysis)) => analysis,
                    Ok(Err(e)) => {
                        Self::note_failure(&format!("{name}/{symbol} analyze"), &e);
                        continue;
                    }
                    Err(_) => {
                        let e = Error::Timeout(analyze_budget, "analyze".into());
                        Self::note_failure(&format!("{name}/{symbol} analyze"), &e);
                        continue;
                    }
                };

                if let Some(signal) = strategy.generate_signal(&analysis) {
                    info!(strategy = %name, symbol = %signal.symbol, side = %signal.side, "signal emitted");
                    self.send(Event::TradeSignal(signal));
                }
            }
        }
    }

    /// Consult the optimizer for strategies performing below the threshold.
    /// An empty proposal means the optimizer declined.
    async fn adaptive_iteration(&self, cfg: &Config) {
        let call_timeout = Duration::from_millis(cfg.trading.call_timeout_ms);
        let handles = self.strategies.read().clone();

        for handle in handles {
            let mut strategy = handle.lock().await;
            let performance = strategy.recent_performance(cfg.trading.performance_window);
            if performance >= cfg.trading.performance_threshold {
                continue;
            }

            let name = strategy.name().to_string();
            warn!(strategy = %name, performance, "underperforming, consulting optimizer");

            let ranges = strategy.parameter_ranges();
            let proposed = match timeout(call_timeout, self.optimizer.optimize(&name, &ranges)).await
            {
                Ok(Ok(params)) => params,
                Ok(Err(e)) => {
                    Self::note_failure(&format!("{name} optimize"), &e);
                    continue;
                }
                Err(_) => {
                    let e = Error::Timeout(call_timeout, "optimize".into());
                    Self::note_failure(&format!("{name} optimize"), &e);
                    continue;
                }
            };
            if proposed.as_table().map(|t| t.is_empty()).unwrap_or(true) {
                continue;
            }

            match strategy.set_parameters(&proposed) {
                Ok(()) => info!(strategy = %name, "applied optimized parameters"),
                Err(e) => warn!(strategy = %name, "rejected optimized parameters: {e}"),
            }
        }
    }

    /// Single consumer of the event queue. Only this loop submits orders or
    /// mutates the portfolio. Non-fatal handler errors are logged; a fatal
    /// one stops the engine.
    async fn event_loop(&self, mut rx: mpsc::UnboundedReceiver<Event>) {
        let mut shutdown = self.running.subscribe();
        loop {
            tokio::select! {
                maybe = rx.recv() => match maybe {
                    Some(event) => {
                        if let Err(e) = self.handle_event(event).await {
                            if e.is_fatal() {
                                error!("fatal error, stopping engine: {e}");
                                self.stop();
                                break;
                            }
                            warn!("event handling failed: {e}");
                        }
                    }
                    None => break,
                },
                _ = shutdown.changed() => {
                    if !self.is_running() {
                        break;
                    }
                }
            }
        }
    }

    async fn handle_event(&self, event: Event) -> Result<()> {
        match event {
            Event::MarketUpdate(bars) => {
                {
                    let mut portfolio = self.portfolio.write();
                    for (symbol, bar) in &bars {
                        portfolio.mark_price(symbol, bar.close);
                    }
                    portfolio.record_value();
                }

                let volatility = self.volatility.read().current();
                let handles = self.strategies.read().clone();
                for handle in handles {
                    let mut strategy = handle.lock().await;
                    for (symbol, bar) in &bars {
                        strategy.on_market_update(symbol, bar);
                    }
                    if volatility > 0.0 {
                        if let Some(aware) = strategy.volatility_aware() {
                            aware.adjust_for_volatility(volatility);
                        }
                    }
                }
                Ok(())
            }
            Event::TradeSignal(signal) => self.process_signal(signal).await,
            Event::Exceptional { symbol, change_pct } => {
                warn!(%symbol, change = %change_pct, "exceptional market move");
                Ok(())
            }
        }
    }

    /// Gate, size, submit, and book a signal. Rejections at any stage drop
    /// the signal without error; only a corrupted ledger is fatal.
    async fn process_signal(&self, signal: Signal) -> Result<()> {
        let snapshot = self.portfolio.read().snapshot();

        let (stop, take, sized) = {
            let risk = self.risk.read();
            if risk.check_risk(&signal, &snapshot).is_err() {
                // The gate already logged the reason
                return Ok(());
            }
            let stop = risk.stop_loss_for(signal.price, signal.side);
            let take = risk.take_profit_for(signal.price, signal.side);
            let sized = risk.calculate_position_size(
                snapshot.balance,
                risk.parameters().max_risk_per_trade,
                signal.price,
                stop,
            );
            (stop, take, sized)
        };

        let amount = match signal.side {
            Side::Buy => sized,
            Side::Sell => sized.min(snapshot.position(&signal.symbol)),
        };
        if amount <= Decimal::ZERO {
            warn!(symbol = %signal.symbol, side = %signal.side, "sized order is empty, dropping signal");
            return Ok(());
        }

        let mut order = Order::new(signal.symbol.clone(), signal.side, amount, Some(signal.price));
        order.stop_loss = Some(stop);
        order.take_profit = Some(take);

        let call_timeout =
            Duration::from_millis(self.get_config().trading.call_timeout_ms);
        let fill = match timeout(call_timeout, self.gateway.submit(&order)).await {
            Ok(Ok(fill)) => fill,
            Ok(Err(e)) => {
                Self::note_failure(&format!("order {} {}", order.id, order.symbol), &e);
                return Ok(());
            }
            Err(_) => {
                let e = Error::Timeout(call_timeout, "submit".into());
                Self::note_failure(&format!("order {} {}", order.id, order.symbol), &e);
                return Ok(());
            }
        };

        match self.portfolio.write().apply_trade(&fill) {
            Ok(trade) => {
                info!(
                    symbol = %trade.symbol,
                    side = %trade.side,
                    amount = %trade.amount,
                    price = %trade.price,
                    profit = %trade.realized_profit,
                    "trade booked"
                );
                Ok(())
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!(order = %fill.order_id, "fill could not be booked: {e}");
                Ok(())
            }
        }
    }
}
