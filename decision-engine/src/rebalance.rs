//! Portfolio rebalancing off the async runtime
//!
//! The optimizer is CPU-bound, so it runs on the blocking pool while the
//! cycle's network tasks keep the runtime threads.

use crate::config::RebalanceConfig;
use crate::sources::MarketData;
use common::{EngineError, Symbol};
use portfolio_risk::{OptimizationResult, OptimizerConfig, PortfolioOptimizer, RebalancePlan, ReturnStatistics};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Optimized allocation together with the trades that reach it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebalanceOutcome {
    pub allocation: OptimizationResult,
    pub plan: RebalancePlan,
}

pub struct PortfolioRebalancer {
    optimizer: PortfolioOptimizer,
    config: RebalanceConfig,
    /// Weights of the last applied plan, per asset
    current: Mutex<BTreeMap<Symbol, f64>>,
}

impl PortfolioRebalancer {
    pub fn new(optimizer: OptimizerConfig, config: RebalanceConfig) -> Self {
        Self {
            optimizer: PortfolioOptimizer::new(optimizer),
            config,
            current: Mutex::new(BTreeMap::new()),
        }
    }

    pub async fn current_weights(&self) -> BTreeMap<Symbol, f64> {
        self.current.lock().await.clone()
    }

    /// Fetch close histories for `symbols` and rebalance on them
    pub async fn rebalance_from_market(
        &self,
        market: &dyn MarketData,
        symbols: &[Symbol],
        lookback: usize,
    ) -> Result<RebalanceOutcome, EngineError> {
        let mut closes = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            let candles = market.candles(symbol, lookback).await?;
            closes.push(candles.iter().map(|c| c.close).collect());
        }
        self.rebalance(symbols.to_vec(), closes).await
    }

    /// Optimize for max Sharpe (equal weights if the solver diverges) and
    /// compute deltas from the last applied weights.
    pub async fn rebalance(
        &self,
        symbols: Vec<Symbol>,
        closes: Vec<Vec<f64>>,
    ) -> Result<RebalanceOutcome, EngineError> {
        let optimizer = self.optimizer.clone();
        let allocation = tokio::task::spawn_blocking(move || {
            let stats = ReturnStatistics::from_closes(symbols, &closes, optimizer.config().periods_per_year)?;
            Ok::<_, EngineError>(optimizer.max_sharpe_or_equal_weight(&stats))
        })
        .await
        .map_err(|e| EngineError::divergence(format!("optimizer task failed: {}", e)))??;

        let mut current = self.current.lock().await;
        let current_weights: Vec<f64> = allocation
            .assets
            .iter()
            .map(|asset| current.get(asset).copied().unwrap_or(0.0))
            .collect();

        let plan = PortfolioOptimizer::rebalance(
            &current_weights,
            &allocation.weights,
            self.config.volatility_adjustment,
        )?;

        *current = allocation
            .assets
            .iter()
            .cloned()
            .zip(plan.target_weights.iter().copied())
            .collect();

        for (asset, delta) in allocation.assets.iter().zip(&plan.deltas) {
            if delta.abs() > 1e-4 {
                info!(asset = %asset, delta = *delta, "Rebalance trade");
            }
        }
        if allocation.sharpe_ratio <= 0.0 {
            warn!(sharpe = allocation.sharpe_ratio, "Rebalanced into a non-positive Sharpe allocation");
        }

        Ok(RebalanceOutcome { allocation, plan })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(start: f64, steps: &[f64]) -> Vec<f64> {
        let mut closes = vec![start];
        for step in steps {
            let last = *closes.last().unwrap();
            closes.push(last * (1.0 + step));
        }
        closes
    }

    fn rebalancer() -> PortfolioRebalancer {
        PortfolioRebalancer::new(OptimizerConfig::default(), RebalanceConfig::default())
    }

    #[tokio::test]
    async fn test_first_rebalance_buys_full_allocation() {
        let rebalancer = rebalancer();
        let symbols = vec!["BTC/USDT".to_string(), "ETH/USDT".to_string()];
        let closes = vec![
            series(100.0, &[0.01, -0.005, 0.012, 0.002, -0.003, 0.008]),
            series(50.0, &[0.004, 0.006, -0.01, 0.009, 0.001, 0.003]),
        ];

        let outcome = rebalancer.rebalance(symbols, closes).await.unwrap();

        let total: f64 = outcome.allocation.weights.iter().sum();
        assert!((total - 1.0).abs() < 1e-6);
        for (delta, target) in outcome.plan.deltas.iter().zip(&outcome.plan.target_weights) {
            assert!((delta - target).abs() < 1e-12);
        }

        let current = rebalancer.current_weights().await;
        assert_eq!(current.len(), 2);
    }

    #[tokio::test]
    async fn test_repeat_rebalance_has_no_deltas() {
        let rebalancer = rebalancer();
        let symbols = vec!["BTC/USDT".to_string(), "ETH/USDT".to_string()];
        let closes = vec![
            series(100.0, &[0.01, -0.005, 0.012, 0.002]),
            series(50.0, &[0.004, 0.006, -0.01, 0.009]),
        ];

        rebalancer.rebalance(symbols.clone(), closes.clone()).await.unwrap();
        let second = rebalancer.rebalance(symbols, closes).await.unwrap();

        assert!(second.plan.deltas.iter().all(|d| d.abs() < 1e-9));
    }

    #[tokio::test]
    async fn test_all_losing_assets_fall_back_to_equal_weight() {
        let rebalancer = rebalancer();
        let symbols = vec!["A".to_string(), "B".to_string()];
        let closes = vec![
            series(100.0, &[-0.01, -0.02, -0.005, -0.01]),
            series(100.0, &[-0.02, -0.001, -0.015, -0.004]),
        ];

        let outcome = rebalancer.rebalance(symbols, closes).await.unwrap();
        assert_eq!(outcome.allocation.weights, vec![0.5, 0.5]);
    }

    #[tokio::test]
    async fn test_short_history_is_rejected() {
        let rebalancer = rebalancer();
        let err = rebalancer
            .rebalance(vec!["A".to_string()], vec![vec![100.0, 101.0]])
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InsufficientHistory { .. }));
        assert!(rebalancer.current_weights().await.is_empty());
    }
}
