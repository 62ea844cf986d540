use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

use quantra::core::NoopOptimizer;
use quantra::paper::{PaperGateway, SimulatedFeed};
use quantra::{Config, Engine};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,quantra=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .init();

    tracing::info!("Quantra starting (paper mode)");

    let config = Config::load_default();
    let feed = Arc::new(SimulatedFeed::new(&config.trading.symbols));
    let gateway = Arc::new(PaperGateway::new());
    let engine = Engine::new(config, feed, gateway, Arc::new(NoopOptimizer));

    let runner = tokio::spawn(engine.clone().run());

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested");
    engine.stop();
    runner.await??;

    let metrics = engine.get_performance_metrics();
    tracing::info!(
        total_value = metrics.total_value,
        total_return = metrics.total_return,
        max_drawdown = metrics.max_drawdown,
        "final performance"
    );
    Ok(())
}
