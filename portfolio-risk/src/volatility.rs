//! Realized volatility and the discrete sizing multiplier derived from it

use common::EngineError;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use tracing::{debug, warn};

/// Annualization factor for daily closes on a 24/7 market
const PERIODS_PER_YEAR: f64 = 365.0;

/// Output of a volatility estimate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VolatilityEstimate {
    /// Annualized standard deviation of log returns over the window
    pub annualized: f64,
    /// Position size multiplier for this volatility bucket
    pub multiplier: f64,
}

/// Rolling realized-volatility estimator over closing prices
#[derive(Debug, Clone)]
pub struct VolatilityEstimator {
    window: usize,
}

impl VolatilityEstimator {
    pub const DEFAULT_WINDOW: usize = 14;

    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(2),
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Estimate annualized volatility from the trailing `window` log returns.
    ///
    /// Needs at least `window + 1` closes.
    pub fn estimate(&self, closes: &[f64]) -> Result<VolatilityEstimate, EngineError> {
        let required = self.window + 1;
        if closes.len() < required {
            return Err(EngineError::InsufficientHistory {
                required,
                available: closes.len(),
            });
        }

        let tail = &closes[closes.len() - required..];
        if tail.iter().any(|p| !p.is_finite() || *p <= 0.0) {
            return Err(EngineError::InvalidInput(
                "price series contains non-positive or non-finite closes".to_string(),
            ));
        }

        let log_returns: Vec<f64> = tail.windows(2).map(|w| (w[1] / w[0]).ln()).collect();
        let annualized = log_returns.iter().std_dev() * PERIODS_PER_YEAR.sqrt();
        let multiplier = Self::multiplier_for(annualized);

        debug!(
            window = self.window,
            annualized_volatility = annualized,
            multiplier,
            "Volatility estimated"
        );

        Ok(VolatilityEstimate {
            annualized,
            multiplier,
        })
    }

    /// Estimate, falling back to a neutral multiplier when history is short
    pub fn estimate_or_neutral(&self, closes: &[f64]) -> (Option<f64>, f64) {
        match self.estimate(closes) {
            Ok(estimate) => (Some(estimate.annualized), estimate.multiplier),
            Err(e) => {
                warn!(error = %e, "Volatility unavailable, using neutral multiplier");
                (None, 1.0)
            }
        }
    }

    /// Map annualized volatility to a sizing multiplier
    pub fn multiplier_for(volatility: f64) -> f64 {
        if volatility < 0.05 {
            1.2
        } else if volatility < 0.10 {
            1.0
        } else if volatility < 0.20 {
            0.8
        } else {
            0.5
        }
    }
}

impl Default for VolatilityEstimator {
    fn default() -> Self {
        Self::new(Self::DEFAULT_WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_history() {
        let estimator = VolatilityEstimator::new(14);
        let closes = vec![100.0; 14];

        match estimator.estimate(&closes) {
            Err(EngineError::InsufficientHistory {
                required,
                available,
            }) => {
                assert_eq!(required, 15);
                assert_eq!(available, 14);
            }
            other => panic!("expected InsufficientHistory, got {:?}", other),
        }

        assert_eq!(estimator.estimate_or_neutral(&closes), (None, 1.0));
    }

    #[test]
    fn test_flat_prices_have_zero_volatility() {
        let estimator = VolatilityEstimator::new(14);
        let estimate = estimator.estimate(&vec![100.0; 15]).unwrap();

        assert_eq!(estimate.annualized, 0.0);
        assert_eq!(estimate.multiplier, 1.2);
    }

    #[test]
    fn test_alternating_prices() {
        // Log returns alternate +r, -r so the sample std is known in closed form
        let estimator = VolatilityEstimator::new(4);
        let up = 1.01_f64;
        let closes = vec![100.0, 100.0 * up, 100.0, 100.0 * up, 100.0];
        let r = up.ln();

        // mean 0, sample variance = 4 r^2 / 3
        let expected = (4.0 * r * r / 3.0).sqrt() * 365.0_f64.sqrt();
        let estimate = estimator.estimate(&closes).unwrap();

        assert!((estimate.annualized - expected).abs() < 1e-12);
        assert_eq!(estimate.multiplier, 0.5);
    }

    #[test]
    fn test_only_trailing_window_is_used() {
        let estimator = VolatilityEstimator::new(3);
        let mut closes = vec![50.0, 80.0, 20.0];
        closes.extend_from_slice(&[100.0, 100.0, 100.0, 100.0]);

        let estimate = estimator.estimate(&closes).unwrap();
        assert_eq!(estimate.annualized, 0.0);
    }

    #[test]
    fn test_multiplier_buckets() {
        assert_eq!(VolatilityEstimator::multiplier_for(0.049), 1.2);
        assert_eq!(VolatilityEstimator::multiplier_for(0.05), 1.0);
        assert_eq!(VolatilityEstimator::multiplier_for(0.10), 0.8);
        assert_eq!(VolatilityEstimator::multiplier_for(0.199), 0.8);
        assert_eq!(VolatilityEstimator::multiplier_for(0.20), 0.5);
    }

    #[test]
    fn test_rejects_non_positive_prices() {
        let estimator = VolatilityEstimator::new(2);
        assert!(matches!(
            estimator.estimate(&[100.0, 0.0, 101.0]),
            Err(EngineError::InvalidInput(_))
        ));
    }
}
