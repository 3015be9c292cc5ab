use anyhow::{Context, Result};
use decision_engine::sim::{PaperAnalyst, PaperForecaster, PaperMarket, PaperOnChain, PaperVenue};
use decision_engine::{AnalysisEngine, Collaborators, EngineConfig, PortfolioRebalancer, RateLimitedOnChain};
use execution::{ExecutionSchedule, TwapExecutor};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

const PAPER_BALANCE: f64 = 10_000.0;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("🚀 Starting Decision Engine");

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = EngineConfig::load(config_path.as_deref()).context("invalid engine configuration")?;

    info!(
        symbols = ?config.symbols,
        interval_secs = config.cycle.interval_secs,
        timeout_secs = config.cycle.timeout_secs,
        "Configuration loaded"
    );

    let seed = fastrand::u64(..);
    info!(seed, balance = PAPER_BALANCE, "Running against paper collaborators");

    let market = PaperMarket::new(seed, PAPER_BALANCE);
    let onchain = RateLimitedOnChain::new(PaperOnChain::new(market.clone()), config.onchain.min_interval());
    let collaborators = Collaborators::new(Arc::new(market.clone()), Arc::new(onchain))
        .with_sentiment(Arc::new(PaperAnalyst::new(market.clone())))
        .with_forecaster(Arc::new(PaperForecaster));

    let rebalancer = PortfolioRebalancer::new(config.risk.optimizer.clone(), config.rebalance.clone());
    let executor = TwapExecutor::new(PaperVenue::new(market));
    let engine = AnalysisEngine::new(config, collaborators);

    let mut schedules: Vec<ExecutionSchedule> = Vec::new();
    let mut last_rebalanced_at = 0;
    let mut ticker = tokio::time::interval(engine.config().cycle.interval());

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                run_cycle(&engine, &rebalancer, &executor, &mut schedules, &mut last_rebalanced_at).await;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("👋 Shutting down gracefully...");
                break;
            }
        }
    }

    for schedule in &schedules {
        warn!(
            schedule_id = %schedule.id,
            symbol = %schedule.symbol,
            pending = schedule.pending().count(),
            "Schedule left unfinished at shutdown"
        );
    }

    Ok(())
}

async fn run_cycle(
    engine: &AnalysisEngine,
    rebalancer: &PortfolioRebalancer,
    executor: &TwapExecutor<PaperVenue>,
    schedules: &mut Vec<ExecutionSchedule>,
    last_rebalanced_at: &mut u64,
) {
    match engine.run_cycle().await {
        Ok(snapshot) => {
            for signal in snapshot.signals.values() {
                info!(
                    "📈 {} {} @ {} size ${:.2} stop {} target {}",
                    signal.action,
                    signal.symbol,
                    signal.entry_price,
                    signal.position_size_usd,
                    signal.stop_loss,
                    signal.take_profit
                );
                debug!(symbol = %signal.symbol, ladder = ?signal.precision_entries.levels(), "Entry ladder");
                match serde_json::to_string(signal) {
                    Ok(json) => debug!("{}", json),
                    Err(e) => warn!("Could not serialize signal {}: {}", signal.id, e),
                }
                if let Some(schedule) = &signal.execution_schedule {
                    schedules.push(schedule.clone());
                }
            }
        }
        Err(e) if e.is_recoverable() => warn!("Analysis cycle skipped, retrying next tick: {}", e),
        Err(e) => error!("Analysis cycle failed: {}", e),
    }

    let now = chrono::Utc::now();
    for schedule in schedules.iter_mut() {
        let report = executor.execute_due(schedule, now).await;
        if !report.executed.is_empty() || !report.failed.is_empty() {
            info!(
                schedule_id = %schedule.id,
                symbol = %schedule.symbol,
                executed = report.executed.len(),
                failed = report.failed.len(),
                filled_usd = schedule.executed_amount(),
                "TWAP slices placed"
            );
        }
    }
    schedules.retain(|s| !s.is_complete());

    let cycles = engine.completed_cycles();
    if engine.config().rebalance.is_due(cycles, *last_rebalanced_at) {
        *last_rebalanced_at = cycles;
        let config = engine.config();
        match rebalancer
            .rebalance_from_market(
                engine.collaborators().market.as_ref(),
                &config.symbols,
                config.cycle.candle_lookback,
            )
            .await
        {
            Ok(outcome) => info!(
                sharpe = outcome.allocation.sharpe_ratio,
                expected_return = outcome.allocation.expected_return,
                volatility = outcome.allocation.volatility,
                "Portfolio rebalanced"
            ),
            Err(e) => warn!("Rebalance skipped: {}", e),
        }
    }
}
