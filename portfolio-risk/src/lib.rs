//! Volatility, position sizing and portfolio optimization.
//!
//! Everything here is synchronous and CPU-bound. The decision engine calls the
//! per-symbol pieces inline and dispatches the optimizer to a blocking pool.

mod config;
mod metrics;
mod optimizer;
mod risk;
mod volatility;

pub use config::{create_config_template, load_config, save_config, OptimizerConfig, RiskConfig};
pub use metrics::{DrawdownCalculator, RiskMetrics, VaRResult};
pub use optimizer::{OptimizationResult, PortfolioOptimizer, RebalancePlan, ReturnStatistics};
pub use risk::{DynamicRiskManager, PositionSizing, RiskRewardCheck, RiskViolation};
pub use volatility::{VolatilityEstimate, VolatilityEstimator};
