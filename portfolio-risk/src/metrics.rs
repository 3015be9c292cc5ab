//! Descriptive risk metrics attached to every trading signal.
//!
//! None of these gate a trade; they travel with the signal so downstream
//! consumers can see what the sizing decision was made against.

use common::{MarketRegime, TradeStats};
use serde::{Deserialize, Serialize};
use statrs::distribution::{Continuous, ContinuousCDF, Normal};
use statrs::statistics::Statistics;

/// Risk metrics for a single symbol at signal time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskMetrics {
    /// Annualized realized volatility, absent when history was too short
    pub volatility: Option<f64>,

    /// Sizing multiplier derived from volatility (1.0 when unknown)
    pub volatility_multiplier: f64,

    /// Historical win rate (0.0 to 1.0)
    pub win_rate: Option<f64>,

    /// Average winning trade return
    pub avg_win: Option<f64>,

    /// Average losing trade return (positive)
    pub avg_loss: Option<f64>,

    /// One-period Value at Risk at 95%, as a fraction of position value
    pub var_95: Option<f64>,

    /// One-period Value at Risk at 99%, as a fraction of position value
    pub var_99: Option<f64>,

    /// Largest peak-to-trough decline of the price window (0.0 to 1.0)
    pub max_drawdown: f64,

    /// Decline of the last close from the window's peak (0.0 to 1.0)
    #[serde(default)]
    pub current_drawdown: f64,

    pub regime: MarketRegime,
}

impl RiskMetrics {
    /// Create empty metrics
    pub fn empty() -> Self {
        Self {
            volatility: None,
            volatility_multiplier: 1.0,
            win_rate: None,
            avg_win: None,
            avg_loss: None,
            var_95: None,
            var_99: None,
            max_drawdown: 0.0,
            current_drawdown: 0.0,
            regime: MarketRegime::Normal,
        }
    }

    /// Build metrics from a close series and whatever context is available
    pub fn from_closes(
        closes: &[f64],
        volatility: Option<f64>,
        volatility_multiplier: f64,
        regime: MarketRegime,
        stats: Option<TradeStats>,
    ) -> Self {
        let var = VaRResult::parametric(&log_returns(closes));

        let mut drawdown = DrawdownCalculator::new();
        for close in closes {
            drawdown.update(*close);
        }

        Self {
            volatility,
            volatility_multiplier,
            win_rate: stats.map(|s| s.win_rate),
            avg_win: stats.map(|s| s.avg_win),
            avg_loss: stats.map(|s| s.avg_loss),
            var_95: var.var_95,
            var_99: var.var_99,
            max_drawdown: drawdown.max_drawdown(),
            current_drawdown: drawdown.current_drawdown(),
            regime,
        }
    }

    /// Trade statistics, if all three components are known
    pub fn trade_stats(&self) -> Option<TradeStats> {
        Some(TradeStats {
            win_rate: self.win_rate?,
            avg_win: self.avg_win?,
            avg_loss: self.avg_loss?,
        })
    }
}

impl Default for RiskMetrics {
    fn default() -> Self {
        Self::empty()
    }
}

/// Value at Risk calculation result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VaRResult {
    /// VaR at 95% confidence level
    pub var_95: Option<f64>,

    /// VaR at 99% confidence level
    pub var_99: Option<f64>,

    /// Expected Shortfall (Conditional VaR) at 95%
    pub expected_shortfall: Option<f64>,
}

impl VaRResult {
    /// Create empty result
    pub fn empty() -> Self {
        Self {
            var_95: None,
            var_99: None,
            expected_shortfall: None,
        }
    }

    /// Gaussian VaR on a return sample; losses are reported as positive fractions
    pub fn parametric(returns: &[f64]) -> Self {
        if returns.len() < 2 {
            return Self::empty();
        }

        let mean = returns.iter().mean();
        let std_dev = returns.iter().std_dev();
        if !std_dev.is_finite() {
            return Self::empty();
        }

        let standard = match Normal::new(0.0, 1.0) {
            Ok(n) => n,
            Err(_) => return Self::empty(),
        };

        let loss_at = |alpha: f64| (-(mean + standard.inverse_cdf(alpha) * std_dev)).max(0.0);
        let z_95 = standard.inverse_cdf(0.05);
        let shortfall = (std_dev * standard.pdf(z_95) / 0.05 - mean).max(0.0);

        Self {
            var_95: Some(loss_at(0.05)),
            var_99: Some(loss_at(0.01)),
            expected_shortfall: Some(shortfall),
        }
    }
}

impl Default for VaRResult {
    fn default() -> Self {
        Self::empty()
    }
}

fn log_returns(closes: &[f64]) -> Vec<f64> {
    closes
        .windows(2)
        .filter(|w| w[0] > 0.0 && w[1] > 0.0)
        .map(|w| (w[1] / w[0]).ln())
        .collect()
}

/// Drawdown calculation helper
#[derive(Debug, Clone)]
pub struct DrawdownCalculator {
    peak: f64,
    max_drawdown: f64,
    current_value: f64,
}

impl DrawdownCalculator {
    pub fn new() -> Self {
        Self {
            peak: 0.0,
            max_drawdown: 0.0,
            current_value: 0.0,
        }
    }

    /// Update with a new value (price or equity)
    pub fn update(&mut self, value: f64) {
        self.current_value = value;

        if value > self.peak {
            self.peak = value;
        }

        if self.peak > 0.0 {
            let drawdown = (self.peak - value) / self.peak;
            if drawdown > self.max_drawdown {
                self.max_drawdown = drawdown;
            }
        }
    }

    /// Get current maximum drawdown
    pub fn max_drawdown(&self) -> f64 {
        self.max_drawdown
    }

    /// Get current drawdown
    pub fn current_drawdown(&self) -> f64 {
        if self.peak > 0.0 {
            (self.peak - self.current_value) / self.peak
        } else {
            0.0
        }
    }
}

impl Default for DrawdownCalculator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drawdown_calculator() {
        let mut calc = DrawdownCalculator::new();

        calc.update(100.0);
        assert_eq!(calc.max_drawdown(), 0.0);

        calc.update(90.0);
        assert_eq!(calc.current_drawdown(), 0.1);
        assert_eq!(calc.max_drawdown(), 0.1);

        calc.update(95.0);
        assert_eq!(calc.current_drawdown(), 0.05);
        assert_eq!(calc.max_drawdown(), 0.1); // Max stays at 0.1

        calc.update(110.0);
        assert_eq!(calc.current_drawdown(), 0.0);
    }

    #[test]
    fn test_parametric_var_ordering() {
        let returns = [0.01, -0.02, 0.015, -0.01, 0.005, -0.03, 0.02, 0.0];
        let var = VaRResult::parametric(&returns);

        let var_95 = var.var_95.unwrap();
        let var_99 = var.var_99.unwrap();
        assert!(var_95 > 0.0);
        assert!(var_99 > var_95);
        assert!(var.expected_shortfall.unwrap() > var_95);
    }

    #[test]
    fn test_var_needs_two_samples() {
        assert_eq!(VaRResult::parametric(&[0.01]), VaRResult::empty());
    }

    #[test]
    fn test_metrics_from_closes() {
        let closes = [100.0, 104.0, 98.0, 101.0, 96.0, 103.0];
        let stats = TradeStats {
            win_rate: 0.55,
            avg_win: 0.06,
            avg_loss: 0.04,
        };

        let metrics =
            RiskMetrics::from_closes(&closes, Some(0.4), 0.5, MarketRegime::Volatile, Some(stats));

        // Peak 104 -> trough 96
        assert!((metrics.max_drawdown - 8.0 / 104.0).abs() < 1e-12);
        // Last close 103 against the 104 peak
        assert!((metrics.current_drawdown - 1.0 / 104.0).abs() < 1e-12);
        assert!(metrics.var_95.is_some());
        assert_eq!(metrics.regime, MarketRegime::Volatile);
        assert_eq!(metrics.trade_stats(), Some(stats));
    }

    #[test]
    fn test_trade_stats_requires_all_fields() {
        let mut metrics = RiskMetrics::empty();
        metrics.win_rate = Some(0.6);
        assert!(metrics.trade_stats().is_none());
    }
}
