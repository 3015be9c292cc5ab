//! Dynamic position sizing and trade validation

use crate::config::RiskConfig;
use chrono::{DateTime, Datelike, Utc, Weekday};
use common::{EngineError, MarketRegime, TradeStats};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Fraction of full Kelly actually used
const KELLY_SAFETY_MULTIPLIER: f64 = 0.5;

/// Hard ceiling on the Kelly fraction
const KELLY_MAX_FRACTION: f64 = 0.25;

/// Result of sizing one trade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSizing {
    /// Final (capped) position notional in quote currency
    pub position_size_usd: f64,
    /// Position size in base units at the entry price
    pub position_size_base: f64,
    /// Amount put at risk after volatility and regime adjustments
    pub risk_amount: f64,
    /// Risk amount as a percentage of balance
    pub risk_percentage: f64,
    /// Position notional over balance
    pub leverage: f64,
    /// Distance from entry to stop, in percent
    pub stop_loss_distance_pct: f64,
    pub volatility_multiplier: f64,
    pub regime_multiplier: f64,
    /// Whether the max-portfolio-risk cap bound the size
    pub capped: bool,
}

/// Outcome of the reward/risk check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskRewardCheck {
    pub valid: bool,
    pub ratio: f64,
    pub min_required: f64,
    pub risk_amount: f64,
    pub reward_amount: f64,
}

/// Volatility- and regime-aware risk manager
#[derive(Debug, Clone)]
pub struct DynamicRiskManager {
    config: RiskConfig,
}

impl DynamicRiskManager {
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// Size a position so that hitting the stop loses the adjusted risk amount.
    ///
    /// `volatility_multiplier` > 1 means calm markets; the risk amount is divided
    /// by it, then scaled by the regime multiplier, and the final notional is
    /// capped at `balance * max_portfolio_risk`.
    pub fn size_position(
        &self,
        balance: f64,
        entry_price: f64,
        stop_loss: f64,
        volatility_multiplier: f64,
        regime: MarketRegime,
    ) -> Result<PositionSizing, EngineError> {
        if !(entry_price.is_finite() && entry_price > 0.0) || !stop_loss.is_finite() {
            return Err(EngineError::InvalidInput(format!(
                "entry {} / stop {} must be finite with a positive entry",
                entry_price, stop_loss
            )));
        }
        if entry_price == stop_loss {
            return Err(EngineError::InvalidStopDistance {
                entry: entry_price,
                stop: stop_loss,
            });
        }
        if !(balance.is_finite() && balance >= 0.0) {
            return Err(EngineError::InvalidInput(format!(
                "balance must be non-negative, got {}",
                balance
            )));
        }
        if !(volatility_multiplier.is_finite() && volatility_multiplier > 0.0) {
            return Err(EngineError::InvalidInput(format!(
                "volatility multiplier must be positive, got {}",
                volatility_multiplier
            )));
        }

        let stop_pct = (entry_price - stop_loss).abs() / entry_price;
        let base_risk = balance * self.config.base_risk_per_trade;
        let regime_multiplier = regime.size_multiplier();
        let adjusted_risk = (base_risk / volatility_multiplier) * regime_multiplier;

        let raw_size = adjusted_risk / stop_pct;
        let max_size = balance * self.config.max_portfolio_risk;
        let capped = raw_size > max_size;
        let position_size_usd = raw_size.min(max_size);

        let leverage = if balance > 0.0 {
            position_size_usd / balance
        } else {
            0.0
        };
        let risk_percentage = if balance > 0.0 {
            adjusted_risk / balance * 100.0
        } else {
            0.0
        };

        debug!(
            balance,
            entry_price,
            stop_loss,
            stop_pct,
            adjusted_risk,
            raw_size,
            position_size_usd,
            %regime,
            "Position sized"
        );

        Ok(PositionSizing {
            position_size_usd,
            position_size_base: position_size_usd / entry_price,
            risk_amount: adjusted_risk,
            risk_percentage,
            leverage,
            stop_loss_distance_pct: stop_pct * 100.0,
            volatility_multiplier,
            regime_multiplier,
            capped,
        })
    }

    /// Half-Kelly fraction clamped to [0, 0.25].
    ///
    /// Returns 0 when `avg_loss <= 0`, where the payoff ratio is undefined.
    pub fn kelly_fraction(win_rate: f64, avg_win: f64, avg_loss: f64) -> f64 {
        if !(avg_loss > 0.0) || !avg_win.is_finite() || !win_rate.is_finite() {
            return 0.0;
        }

        let b = avg_win / avg_loss;
        if b <= 0.0 {
            return 0.0;
        }

        // Kelly formula: f* = (bp - q) / b
        let p = win_rate.clamp(0.0, 1.0);
        let q = 1.0 - p;
        let full_kelly = (b * p - q) / b;

        (full_kelly * KELLY_SAFETY_MULTIPLIER).clamp(0.0, KELLY_MAX_FRACTION)
    }

    /// Kelly-sized notional, never above the max-portfolio-risk cap
    pub fn kelly_position(&self, balance: f64, stats: &TradeStats) -> f64 {
        if !(balance.is_finite() && balance > 0.0) {
            return 0.0;
        }
        let fraction = Self::kelly_fraction(stats.win_rate, stats.avg_win, stats.avg_loss);
        (balance * fraction).min(balance * self.config.max_portfolio_risk)
    }

    /// Check that the reward/risk ratio meets the configured minimum
    pub fn validate_risk_reward(
        &self,
        entry_price: f64,
        take_profit: f64,
        stop_loss: f64,
    ) -> RiskRewardCheck {
        let risk = (entry_price - stop_loss).abs();
        let reward = (take_profit - entry_price).abs();
        let min_required = self.config.min_risk_reward_ratio;

        if !(risk > 0.0) {
            warn!(entry_price, stop_loss, "Invalid stop loss, risk is zero");
            return RiskRewardCheck {
                valid: false,
                ratio: 0.0,
                min_required,
                risk_amount: risk,
                reward_amount: reward,
            };
        }

        let ratio = reward / risk;
        let valid = ratio >= min_required;

        if valid {
            debug!(ratio, "Trade validated");
        } else {
            info!(ratio, min_required, "Risk/reward ratio below minimum");
        }

        RiskRewardCheck {
            valid,
            ratio,
            min_required,
            risk_amount: risk,
            reward_amount: reward,
        }
    }

    /// Reject a proposal that would push combined exposure past the cap
    pub fn check_total_exposure(
        &self,
        current_exposure: f64,
        proposed: f64,
        balance: f64,
    ) -> Result<(), RiskViolation> {
        let limit = balance * self.config.max_total_exposure;
        if current_exposure + proposed > limit {
            return Err(RiskViolation::MaxTotalExposureExceeded {
                current: current_exposure,
                proposed,
                limit,
            });
        }
        Ok(())
    }

    /// Scale a size down on weekends, when liquidity is thinner
    pub fn weekend_adjusted(&self, position_size: f64, at: DateTime<Utc>) -> f64 {
        match at.weekday() {
            Weekday::Sat | Weekday::Sun => {
                let adjusted = position_size * self.config.weekend_size_multiplier;
                debug!(position_size, adjusted, "Weekend size adjustment");
                adjusted
            }
            _ => position_size,
        }
    }

    /// Worst-case drawdown (percent of balance) if every open stop is hit
    pub fn open_risk_drawdown(&self, open_risk_amounts: &[f64], balance: f64) -> f64 {
        if open_risk_amounts.is_empty() || balance <= 0.0 {
            return 0.0;
        }
        open_risk_amounts.iter().sum::<f64>() / balance * 100.0
    }
}

impl Default for DynamicRiskManager {
    fn default() -> Self {
        Self::new(RiskConfig::default())
    }
}

/// Risk violation types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RiskViolation {
    MaxTotalExposureExceeded {
        current: f64,
        proposed: f64,
        limit: f64,
    },
    RiskRewardBelowMinimum {
        ratio: f64,
        minimum: f64,
    },
}

impl std::fmt::Display for RiskViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskViolation::MaxTotalExposureExceeded {
                current,
                proposed,
                limit,
            } => {
                write!(
                    f,
                    "Total exposure ${:.2} + ${:.2} exceeds limit ${:.2}",
                    current, proposed, limit
                )
            }
            RiskViolation::RiskRewardBelowMinimum { ratio, minimum } => {
                write!(
                    f,
                    "Risk/reward ratio {:.2} below minimum {:.2}",
                    ratio, minimum
                )
            }
        }
    }
}

impl std::error::Error for RiskViolation {}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_reference_sizing() {
        let manager = DynamicRiskManager::default();
        let sizing = manager
            .size_position(1000.0, 100.0, 96.0, 1.0, MarketRegime::Normal)
            .unwrap();

        assert!(approx(sizing.risk_amount, 10.0));
        assert!(approx(sizing.stop_loss_distance_pct, 4.0));
        assert!(approx(sizing.position_size_usd, 250.0));
        assert!(approx(sizing.leverage, 0.25));
        assert!(!sizing.capped);
    }

    #[test]
    fn test_size_is_capped() {
        let manager = DynamicRiskManager::default();
        // 1% stop -> raw 1000, cap 300
        let sizing = manager
            .size_position(1000.0, 100.0, 99.0, 1.0, MarketRegime::Normal)
            .unwrap();

        assert!(approx(sizing.position_size_usd, 300.0));
        assert!(sizing.capped);
    }

    #[test]
    fn test_regime_and_volatility_scale_risk() {
        let manager = DynamicRiskManager::default();

        let volatile = manager
            .size_position(1000.0, 100.0, 96.0, 1.0, MarketRegime::Volatile)
            .unwrap();
        assert!(approx(volatile.risk_amount, 7.0));
        assert!(approx(volatile.position_size_usd, 175.0));

        let high_vol = manager
            .size_position(1000.0, 100.0, 96.0, 0.5, MarketRegime::Extreme)
            .unwrap();
        // (10 / 0.5) * 0.5 = 10
        assert!(approx(high_vol.risk_amount, 10.0));
    }

    #[test]
    fn test_short_side_stop_above_entry() {
        let manager = DynamicRiskManager::default();
        let sizing = manager
            .size_position(1000.0, 100.0, 104.0, 1.0, MarketRegime::Normal)
            .unwrap();
        assert!(approx(sizing.position_size_usd, 250.0));
    }

    #[test]
    fn test_zero_stop_distance_rejected() {
        let manager = DynamicRiskManager::default();
        let result = manager.size_position(1000.0, 100.0, 100.0, 1.0, MarketRegime::Normal);
        assert!(matches!(result, Err(EngineError::InvalidStopDistance { .. })));
    }

    #[test]
    fn test_zero_balance_sizes_zero() {
        let manager = DynamicRiskManager::default();
        let sizing = manager
            .size_position(0.0, 100.0, 96.0, 1.0, MarketRegime::Normal)
            .unwrap();
        assert_eq!(sizing.position_size_usd, 0.0);
        assert_eq!(sizing.leverage, 0.0);
    }

    #[test]
    fn test_sizing_bounds_hold_across_inputs() {
        let manager = DynamicRiskManager::default();
        let balances = [0.0, 50.0, 1_000.0, 250_000.0];
        let stops = [50.0, 90.0, 99.5, 99.99, 101.0, 150.0];
        let multipliers = [0.5, 0.8, 1.0, 1.2];
        let regimes = [MarketRegime::Normal, MarketRegime::Volatile, MarketRegime::Extreme];

        for balance in balances {
            for stop in stops {
                for multiplier in multipliers {
                    for regime in regimes {
                        let sizing = manager
                            .size_position(balance, 100.0, stop, multiplier, regime)
                            .unwrap();
                        assert!(sizing.position_size_usd >= 0.0);
                        assert!(sizing.position_size_usd <= balance * 0.30 + 1e-9);
                        assert_eq!(sizing.position_size_usd == 0.0, sizing.risk_amount == 0.0);
                    }
                }
            }
        }
    }

    #[test]
    fn test_kelly_fraction() {
        // 60% win rate, 2:1 payoff -> full Kelly 0.4, half 0.2
        assert!(approx(DynamicRiskManager::kelly_fraction(0.6, 2.0, 1.0), 0.2));

        // Capped at 25%
        assert_eq!(DynamicRiskManager::kelly_fraction(0.9, 3.0, 1.0), 0.25);

        // Negative edge floors at zero
        assert_eq!(DynamicRiskManager::kelly_fraction(0.3, 1.0, 1.0), 0.0);

        // Undefined payoff ratio
        assert_eq!(DynamicRiskManager::kelly_fraction(0.6, 2.0, 0.0), 0.0);
        assert_eq!(DynamicRiskManager::kelly_fraction(0.6, 2.0, -1.0), 0.0);
    }

    #[test]
    fn test_kelly_fraction_bounds() {
        for win_rate in [0.0, 0.1, 0.35, 0.5, 0.65, 0.9, 1.0] {
            for avg_win in [0.0, 0.01, 0.5, 1.0, 4.0] {
                for avg_loss in [-1.0, 0.0, 0.01, 0.5, 2.0] {
                    let f = DynamicRiskManager::kelly_fraction(win_rate, avg_win, avg_loss);
                    assert!((0.0..=0.25).contains(&f));
                }
            }
        }
    }

    #[test]
    fn test_kelly_position_is_capped() {
        let manager = DynamicRiskManager::default();
        let stats = TradeStats {
            win_rate: 0.6,
            avg_win: 2.0,
            avg_loss: 1.0,
        };
        assert!(approx(manager.kelly_position(1000.0, &stats), 200.0));
    }

    #[test]
    fn test_risk_reward_validation() {
        let manager = DynamicRiskManager::default();

        let good = manager.validate_risk_reward(100.0, 112.0, 96.0);
        assert!(approx(good.ratio, 3.0));
        assert!(good.valid);

        let bad = manager.validate_risk_reward(100.0, 104.0, 96.0);
        assert!(approx(bad.ratio, 1.0));
        assert!(!bad.valid);

        let degenerate = manager.validate_risk_reward(100.0, 110.0, 100.0);
        assert!(!degenerate.valid);
    }

    #[test]
    fn test_total_exposure_check() {
        let manager = DynamicRiskManager::default();
        assert!(manager.check_total_exposure(600.0, 300.0, 1000.0).is_ok());

        let violation = manager.check_total_exposure(700.0, 300.0, 1000.0).unwrap_err();
        assert!(violation.to_string().contains("exceeds limit $900.00"));
    }

    #[test]
    fn test_weekend_adjustment() {
        let manager = DynamicRiskManager::default();
        let saturday = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let monday = Utc.with_ymd_and_hms(2024, 6, 3, 12, 0, 0).unwrap();

        assert!(approx(manager.weekend_adjusted(100.0, saturday), 80.0));
        assert_eq!(manager.weekend_adjusted(100.0, monday), 100.0);
    }

    #[test]
    fn test_open_risk_drawdown() {
        let manager = DynamicRiskManager::default();
        assert!(approx(manager.open_risk_drawdown(&[10.0, 15.0], 1000.0), 2.5));
        assert_eq!(manager.open_risk_drawdown(&[], 1000.0), 0.0);
    }
}
