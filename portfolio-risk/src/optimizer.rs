//! Long-only mean-variance optimization over an asset universe.
//!
//! Both problems reduce to a convex quadratic program
//! `min xᵀΣx  s.t.  Ax = b, x >= 0` solved with a primal active-set method:
//!
//! * efficient frontier: `A = [1ᵀ; μᵀ]`, `b = [1, target]`
//! * max Sharpe: `A = (μ - r_f)ᵀ`, `b = 1`, then `w = y / Σy`
//!
//! Inputs are annualized with `periods_per_year` (252 by default). Crypto trades
//! every day, so this understates annual figures; it is kept for comparability
//! with equity tooling.

use crate::config::OptimizerConfig;
use chrono::{DateTime, Utc};
use common::EngineError;
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const PIVOT_EPS: f64 = 1e-12;
const CONSTRAINT_TOLERANCE: f64 = 1e-6;

/// Annualized return moments of an asset universe
#[derive(Debug, Clone)]
pub struct ReturnStatistics {
    assets: Vec<String>,
    mean_returns: Array1<f64>,
    covariance: Array2<f64>,
}

impl ReturnStatistics {
    /// Build from already annualized moments
    pub fn new(
        assets: Vec<String>,
        mean_returns: Array1<f64>,
        covariance: Array2<f64>,
    ) -> Result<Self, EngineError> {
        let n = assets.len();
        if n == 0 {
            return Err(EngineError::InvalidInput("asset universe is empty".to_string()));
        }
        if mean_returns.len() != n || covariance.dim() != (n, n) {
            return Err(EngineError::InvalidInput(format!(
                "expected {} assets, got {} means and a {:?} covariance",
                n,
                mean_returns.len(),
                covariance.dim()
            )));
        }
        if mean_returns.iter().chain(covariance.iter()).any(|v| !v.is_finite()) {
            return Err(EngineError::InvalidInput(
                "return moments contain non-finite values".to_string(),
            ));
        }

        Ok(Self {
            assets,
            mean_returns,
            covariance,
        })
    }

    /// Estimate from periodic returns, one row per period and one column per asset
    pub fn from_returns(
        assets: Vec<String>,
        returns: &Array2<f64>,
        periods_per_year: f64,
    ) -> Result<Self, EngineError> {
        let (periods, n) = returns.dim();
        if periods < 2 {
            return Err(EngineError::InsufficientHistory {
                required: 2,
                available: periods,
            });
        }
        if n != assets.len() {
            return Err(EngineError::InvalidInput(format!(
                "returns have {} columns for {} assets",
                n,
                assets.len()
            )));
        }

        let mean = returns
            .mean_axis(Axis(0))
            .ok_or_else(|| EngineError::InvalidInput("empty returns matrix".to_string()))?;
        let centered = returns - &mean;
        let covariance = centered.t().dot(&centered) / (periods as f64 - 1.0);

        Self::new(
            assets,
            mean * periods_per_year,
            covariance * periods_per_year,
        )
    }

    /// Estimate from per-asset close histories (oldest first) using simple returns.
    ///
    /// Histories are aligned on their most recent closes; the shortest one
    /// bounds the sample.
    pub fn from_closes(
        assets: Vec<String>,
        closes: &[Vec<f64>],
        periods_per_year: f64,
    ) -> Result<Self, EngineError> {
        if closes.len() != assets.len() {
            return Err(EngineError::InvalidInput(format!(
                "{} close histories for {} assets",
                closes.len(),
                assets.len()
            )));
        }

        let shortest = closes.iter().map(Vec::len).min().unwrap_or(0);
        if shortest < 3 {
            return Err(EngineError::InsufficientHistory {
                required: 3,
                available: shortest,
            });
        }

        let periods = shortest - 1;
        let mut returns = Array2::zeros((periods, assets.len()));
        for (col, series) in closes.iter().enumerate() {
            let tail = &series[series.len() - shortest..];
            for (row, pair) in tail.windows(2).enumerate() {
                if pair[0] <= 0.0 {
                    return Err(EngineError::InvalidInput(format!(
                        "non-positive close for {}",
                        assets[col]
                    )));
                }
                returns[[row, col]] = pair[1] / pair[0] - 1.0;
            }
        }

        Self::from_returns(assets, &returns, periods_per_year)
    }

    pub fn assets(&self) -> &[String] {
        &self.assets
    }

    pub fn mean_returns(&self) -> &Array1<f64> {
        &self.mean_returns
    }

    pub fn covariance(&self) -> &Array2<f64> {
        &self.covariance
    }

    fn len(&self) -> usize {
        self.assets.len()
    }
}

/// Optimized allocation with its performance figures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub assets: Vec<String>,
    /// One weight per asset, each in [0, 1], summing to 1
    pub weights: Vec<f64>,
    pub expected_return: f64,
    pub volatility: f64,
    pub sharpe_ratio: f64,
    pub timestamp: DateTime<Utc>,
}

impl OptimizationResult {
    pub fn weight(&self, asset: &str) -> Option<f64> {
        self.assets
            .iter()
            .position(|a| a == asset)
            .map(|i| self.weights[i])
    }
}

/// Target weights after adjustment and the trades needed to reach them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebalancePlan {
    pub target_weights: Vec<f64>,
    /// `target - current` per asset; positive means buy
    pub deltas: Vec<f64>,
}

/// Mean-variance portfolio optimizer
#[derive(Debug, Clone)]
pub struct PortfolioOptimizer {
    config: OptimizerConfig,
}

impl PortfolioOptimizer {
    pub fn new(config: OptimizerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Annualized return, volatility and Sharpe ratio of a weight vector
    pub fn performance(&self, stats: &ReturnStatistics, weights: &Array1<f64>) -> (f64, f64, f64) {
        let expected_return = weights.dot(&stats.mean_returns);
        let variance = weights.dot(&stats.covariance.dot(weights));
        let volatility = variance.max(0.0).sqrt();
        let sharpe_ratio = if volatility > 0.0 {
            (expected_return - self.config.risk_free_rate) / volatility
        } else {
            0.0
        };
        (expected_return, volatility, sharpe_ratio)
    }

    /// Long-only tangency portfolio
    pub fn max_sharpe(&self, stats: &ReturnStatistics) -> Result<OptimizationResult, EngineError> {
        let excess = stats.mean_returns.mapv(|r| r - self.config.risk_free_rate);

        let (best, best_excess) = excess
            .iter()
            .copied()
            .enumerate()
            .fold((0, f64::NEG_INFINITY), |acc, (i, e)| if e > acc.1 { (i, e) } else { acc });
        if best_excess <= 0.0 {
            return Err(EngineError::divergence(
                "no asset returns more than the risk-free rate",
            ));
        }

        let mut start = Array1::zeros(stats.len());
        start[best] = 1.0 / best_excess;

        let a = excess.insert_axis(Axis(0));
        let b = Array1::from_elem(1, 1.0);
        let y = self.solve_qp(&stats.covariance, &a, &b, start)?;

        let total = y.sum();
        if !(total.is_finite() && total > 0.0) {
            return Err(EngineError::divergence("degenerate tangency solution"));
        }
        Ok(self.result(stats, y / total))
    }

    /// Max Sharpe, or equal weights when the solver cannot produce one
    pub fn max_sharpe_or_equal_weight(&self, stats: &ReturnStatistics) -> OptimizationResult {
        match self.max_sharpe(stats) {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "Max Sharpe optimization failed, using equal weights");
                self.equal_weight(stats)
            }
        }
    }

    pub fn equal_weight(&self, stats: &ReturnStatistics) -> OptimizationResult {
        let n = stats.len();
        self.result(stats, Array1::from_elem(n, 1.0 / n as f64))
    }

    /// Minimum-volatility portfolio achieving `target_return`
    pub fn min_volatility_for(
        &self,
        stats: &ReturnStatistics,
        target_return: f64,
    ) -> Result<OptimizationResult, EngineError> {
        let mu = &stats.mean_returns;
        let (lo, lo_ret) = extreme(mu, |a, b| a < b);
        let (hi, hi_ret) = extreme(mu, |a, b| a > b);

        if !target_return.is_finite()
            || target_return < lo_ret - CONSTRAINT_TOLERANCE
            || target_return > hi_ret + CONSTRAINT_TOLERANCE
        {
            return Err(EngineError::divergence(format!(
                "target return {:.4} outside achievable range [{:.4}, {:.4}]",
                target_return, lo_ret, hi_ret
            )));
        }

        // Feasible start: blend of the lowest and highest returning assets
        let mut start = Array1::zeros(stats.len());
        let spread = hi_ret - lo_ret;
        if spread < PIVOT_EPS {
            start[hi] = 1.0;
        } else {
            let low_weight = ((hi_ret - target_return) / spread).clamp(0.0, 1.0);
            start[lo] = low_weight;
            start[hi] = 1.0 - low_weight;
        }

        let mut a = Array2::ones((2, stats.len()));
        a.row_mut(1).assign(mu);
        let b = Array1::from(vec![1.0, target_return]);

        let x = self.solve_qp(&stats.covariance, &a, &b, start)?;
        let total = x.sum();
        Ok(self.result(stats, x / total))
    }

    /// Minimum-volatility portfolios for each target return, in order.
    ///
    /// Targets the solver cannot reach are logged and skipped.
    pub fn efficient_frontier(
        &self,
        stats: &ReturnStatistics,
        target_returns: &[f64],
    ) -> Vec<OptimizationResult> {
        target_returns
            .iter()
            .filter_map(|&target| match self.min_volatility_for(stats, target) {
                Ok(result) => Some(result),
                Err(e) => {
                    warn!(target_return = target, error = %e, "Skipping frontier point");
                    None
                }
            })
            .collect()
    }

    /// Scale target weights, renormalize them, and compute per-asset deltas
    pub fn rebalance(
        current_weights: &[f64],
        target_weights: &[f64],
        volatility_adjustment: f64,
    ) -> Result<RebalancePlan, EngineError> {
        if current_weights.len() != target_weights.len() {
            return Err(EngineError::InvalidInput(format!(
                "current has {} weights, target has {}",
                current_weights.len(),
                target_weights.len()
            )));
        }
        if !(volatility_adjustment.is_finite() && volatility_adjustment > 0.0) {
            return Err(EngineError::InvalidInput(format!(
                "volatility adjustment must be positive, got {}",
                volatility_adjustment
            )));
        }

        let scaled: Vec<f64> = target_weights
            .iter()
            .map(|w| w * volatility_adjustment)
            .collect();
        let total: f64 = scaled.iter().sum();
        if !(total.is_finite() && total > 0.0) {
            return Err(EngineError::InvalidInput(
                "target weights must have a positive sum".to_string(),
            ));
        }

        let target_weights: Vec<f64> = scaled.iter().map(|w| w / total).collect();
        let deltas = target_weights
            .iter()
            .zip(current_weights)
            .map(|(t, c)| t - c)
            .collect();

        Ok(RebalancePlan {
            target_weights,
            deltas,
        })
    }

    fn result(&self, stats: &ReturnStatistics, weights: Array1<f64>) -> OptimizationResult {
        let weights = weights.mapv(|w| w.clamp(0.0, 1.0));
        let (expected_return, volatility, sharpe_ratio) = self.performance(stats, &weights);

        OptimizationResult {
            assets: stats.assets.clone(),
            weights: weights.to_vec(),
            expected_return,
            volatility,
            sharpe_ratio,
            timestamp: Utc::now(),
        }
    }

    /// Primal active-set method for `min ½xᵀ(2Σ)x  s.t.  Ax = b, x >= 0`.
    ///
    /// `start` must be feasible. Zero components begin in the working set.
    fn solve_qp(
        &self,
        covariance: &Array2<f64>,
        a: &Array2<f64>,
        b: &Array1<f64>,
        start: Array1<f64>,
    ) -> Result<Array1<f64>, EngineError> {
        let n = start.len();
        let m = b.len();
        let hessian = covariance * 2.0;
        let tol = self.config.tolerance;

        let mut x = start;
        let mut fixed: Vec<bool> = x.iter().map(|v| *v == 0.0).collect();

        for iteration in 0..self.config.max_iterations {
            let free: Vec<usize> = (0..n).filter(|i| !fixed[*i]).collect();
            let k = free.len();
            let gradient = hessian.dot(&x);

            // KKT system over the free variables
            let mut kkt = Array2::zeros((k + m, k + m));
            let mut rhs = Array1::zeros(k + m);
            for (r, &i) in free.iter().enumerate() {
                for (c, &j) in free.iter().enumerate() {
                    kkt[[r, c]] = hessian[[i, j]];
                }
                for row in 0..m {
                    kkt[[r, k + row]] = a[[row, i]];
                    kkt[[k + row, r]] = a[[row, i]];
                }
                rhs[r] = -gradient[i];
            }

            let solution = solve_linear(kkt, rhs)
                .ok_or_else(|| EngineError::divergence("singular KKT system"))?;

            let step_norm = solution
                .iter()
                .take(k)
                .map(|p| p * p)
                .sum::<f64>()
                .sqrt();
            let x_norm = x.dot(&x).sqrt();

            if step_norm <= tol * (1.0 + x_norm) {
                let multipliers = solution.slice(ndarray::s![k..]);
                let constraint_forces = a.t().dot(&multipliers);

                // Most negative multiplier among the bound variables
                let release = (0..n)
                    .filter(|i| fixed[*i])
                    .map(|i| (i, gradient[i] + constraint_forces[i]))
                    .filter(|(i, z)| *z < -tol * (1.0 + gradient[*i].abs()))
                    .fold(None, |acc: Option<(usize, f64)>, (i, z)| match acc {
                        Some((_, best)) if best <= z => acc,
                        _ => Some((i, z)),
                    });

                match release {
                    Some((i, _)) => fixed[i] = false,
                    None => {
                        let residual = (a.dot(&x) - b).iter().fold(0.0_f64, |m, r| m.max(r.abs()));
                        if !residual.is_finite() || residual > CONSTRAINT_TOLERANCE * (1.0 + b.iter().fold(0.0_f64, |m, v| m.max(v.abs()))) {
                            return Err(EngineError::divergence(format!(
                                "constraint residual {:.2e} after convergence",
                                residual
                            )));
                        }
                        debug!(iterations = iteration + 1, "Quadratic program converged");
                        return Ok(x.mapv(|v| v.max(0.0)));
                    }
                }
                continue;
            }

            // Longest feasible step along p, stopping at the first blocking bound
            let mut alpha = 1.0;
            let mut blocking = None;
            for (r, &i) in free.iter().enumerate() {
                let p = solution[r];
                if p < 0.0 {
                    let ratio = -x[i] / p;
                    if ratio < alpha {
                        alpha = ratio;
                        blocking = Some(i);
                    }
                }
            }

            for (r, &i) in free.iter().enumerate() {
                x[i] += alpha * solution[r];
            }
            if let Some(i) = blocking {
                x[i] = 0.0;
                fixed[i] = true;
            }

            if x.iter().any(|v| !v.is_finite()) {
                return Err(EngineError::divergence("non-finite weights"));
            }
        }

        Err(EngineError::divergence(format!(
            "no convergence within {} iterations",
            self.config.max_iterations
        )))
    }
}

impl Default for PortfolioOptimizer {
    fn default() -> Self {
        Self::new(OptimizerConfig::default())
    }
}

fn extreme(values: &Array1<f64>, better: impl Fn(f64, f64) -> bool) -> (usize, f64) {
    values
        .iter()
        .copied()
        .enumerate()
        .fold((0, values[0]), |acc, (i, v)| if better(v, acc.1) { (i, v) } else { acc })
}

/// Gauss-Jordan elimination with partial pivoting.
///
/// Columns without a usable pivot are set to zero, so consistent singular
/// systems still get a solution. Returns `None` for inconsistent systems.
fn solve_linear(mut a: Array2<f64>, mut b: Array1<f64>) -> Option<Array1<f64>> {
    let n = b.len();
    let scale = a.iter().fold(0.0_f64, |m, v| m.max(v.abs())).max(1.0);
    let mut pivots = Vec::with_capacity(n);
    let mut row = 0;

    for col in 0..n {
        if row == n {
            break;
        }

        let (best, magnitude) = (row..n)
            .map(|r| (r, a[[r, col]].abs()))
            .fold((row, 0.0), |acc, x| if x.1 > acc.1 { x } else { acc });
        if magnitude < PIVOT_EPS * scale {
            continue;
        }

        if best != row {
            for c in 0..n {
                a.swap([row, c], [best, c]);
            }
            b.swap(row, best);
        }

        for r in 0..n {
            if r == row {
                continue;
            }
            let factor = a[[r, col]] / a[[row, col]];
            if factor == 0.0 {
                continue;
            }
            for c in col..n {
                a[[r, c]] -= factor * a[[row, c]];
            }
            b[r] -= factor * b[row];
        }

        pivots.push((row, col));
        row += 1;
    }

    let rhs_scale = b.iter().fold(0.0_f64, |m, v| m.max(v.abs())).max(1.0);
    if (row..n).any(|r| b[r].abs() > 1e-9 * rhs_scale) {
        return None;
    }

    let mut x = Array1::zeros(n);
    for (r, c) in pivots {
        x[c] = b[r] / a[[r, c]];
    }
    Some(x)
}
