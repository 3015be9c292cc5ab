//! Risk management configuration

use common::EngineError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Overall risk management configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Fraction of the balance put at risk by a single trade
    #[serde(default = "default_base_risk_per_trade")]
    pub base_risk_per_trade: f64,

    /// Maximum position size as a fraction of the balance
    #[serde(default = "default_max_portfolio_risk")]
    pub max_portfolio_risk: f64,

    /// Maximum combined exposure of all signals as a fraction of the balance
    #[serde(default = "default_max_total_exposure")]
    pub max_total_exposure: f64,

    /// Minimum reward/risk ratio for a trade to validate
    #[serde(default = "default_min_risk_reward_ratio")]
    pub min_risk_reward_ratio: f64,

    /// Size multiplier applied on Saturdays and Sundays (UTC)
    #[serde(default = "default_weekend_size_multiplier")]
    pub weekend_size_multiplier: f64,

    /// Lookback window (periods) for realized volatility
    #[serde(default = "default_volatility_window")]
    pub volatility_window: usize,

    /// Mean-variance optimizer settings
    #[serde(default)]
    pub optimizer: OptimizerConfig,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            base_risk_per_trade: default_base_risk_per_trade(),
            max_portfolio_risk: default_max_portfolio_risk(),
            max_total_exposure: default_max_total_exposure(),
            min_risk_reward_ratio: default_min_risk_reward_ratio(),
            weekend_size_multiplier: default_weekend_size_multiplier(),
            volatility_window: default_volatility_window(),
            optimizer: OptimizerConfig::default(),
        }
    }
}

impl RiskConfig {
    /// Reject configurations that would make sizing meaningless
    pub fn validate(&self) -> Result<(), EngineError> {
        check_fraction("base_risk_per_trade", self.base_risk_per_trade)?;
        check_fraction("max_portfolio_risk", self.max_portfolio_risk)?;
        check_fraction("max_total_exposure", self.max_total_exposure)?;
        check_fraction("weekend_size_multiplier", self.weekend_size_multiplier)?;

        if !(self.min_risk_reward_ratio.is_finite() && self.min_risk_reward_ratio > 0.0) {
            return Err(EngineError::InvalidConfig(format!(
                "min_risk_reward_ratio must be positive, got {}",
                self.min_risk_reward_ratio
            )));
        }
        if self.volatility_window < 2 {
            return Err(EngineError::InvalidConfig(format!(
                "volatility_window must be at least 2, got {}",
                self.volatility_window
            )));
        }

        self.optimizer.validate()
    }
}

fn check_fraction(name: &str, value: f64) -> Result<(), EngineError> {
    if value.is_finite() && value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(EngineError::InvalidConfig(format!(
            "{} must be in (0, 1], got {}",
            name, value
        )))
    }
}

fn default_base_risk_per_trade() -> f64 {
    0.01
}

fn default_max_portfolio_risk() -> f64 {
    0.30
}

fn default_max_total_exposure() -> f64 {
    0.90
}

fn default_min_risk_reward_ratio() -> f64 {
    2.0
}

fn default_weekend_size_multiplier() -> f64 {
    0.8
}

fn default_volatility_window() -> usize {
    14
}

/// Portfolio optimizer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerConfig {
    /// Annualized risk-free rate for the Sharpe ratio
    #[serde(default = "default_risk_free_rate")]
    pub risk_free_rate: f64,

    /// Annualization factor for mean returns and covariance.
    /// Trading-day convention, kept even though crypto trades every day.
    #[serde(default = "default_periods_per_year")]
    pub periods_per_year: f64,

    /// Iteration budget of the active-set solver
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Step-size tolerance at which the solver counts as converged
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            risk_free_rate: default_risk_free_rate(),
            periods_per_year: default_periods_per_year(),
            max_iterations: default_max_iterations(),
            tolerance: default_tolerance(),
        }
    }
}

impl OptimizerConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        if !(self.periods_per_year.is_finite() && self.periods_per_year > 0.0) {
            return Err(EngineError::InvalidConfig(format!(
                "optimizer.periods_per_year must be positive, got {}",
                self.periods_per_year
            )));
        }
        if self.max_iterations == 0 {
            return Err(EngineError::InvalidConfig(
                "optimizer.max_iterations must be non-zero".to_string(),
            ));
        }
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(EngineError::InvalidConfig(format!(
                "optimizer.tolerance must be positive, got {}",
                self.tolerance
            )));
        }
        Ok(())
    }
}

fn default_risk_free_rate() -> f64 {
    0.02
}

fn default_periods_per_year() -> f64 {
    252.0
}

fn default_max_iterations() -> usize {
    5_000
}

fn default_tolerance() -> f64 {
    1e-10
}

/// Load configuration from TOML file
pub fn load_config(path: impl AsRef<Path>) -> anyhow::Result<RiskConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: RiskConfig = toml::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

/// Save configuration to TOML file
pub fn save_config(config: &RiskConfig, path: impl AsRef<Path>) -> anyhow::Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Create a default configuration file template
pub fn create_config_template(path: impl AsRef<Path>) -> anyhow::Result<()> {
    let template = "# Risk Management Configuration

# Fraction of the account balance risked per trade (0.01 = 1%)
base_risk_per_trade = 0.01

# Largest single position as a fraction of the balance
max_portfolio_risk = 0.30

# Combined exposure cap across one analysis cycle
max_total_exposure = 0.90

# Trades below this reward/risk ratio fail validation
min_risk_reward_ratio = 2.0

# Position size multiplier on weekends
weekend_size_multiplier = 0.8

# Realized volatility lookback (periods)
volatility_window = 14

[optimizer]
# Annualized risk-free rate for Sharpe
risk_free_rate = 0.02

# Annualization factor (trading-day convention)
periods_per_year = 252.0

max_iterations = 5000
tolerance = 1e-10
";

    std::fs::write(path, template)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RiskConfig::default();
        assert_eq!(config.base_risk_per_trade, 0.01);
        assert_eq!(config.max_portfolio_risk, 0.30);
        assert_eq!(config.max_total_exposure, 0.90);
        assert_eq!(config.min_risk_reward_ratio, 2.0);
        assert_eq!(config.volatility_window, 14);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let config = RiskConfig::default();
        let serialized = toml::to_string(&config).unwrap();
        let deserialized: RiskConfig = toml::from_str(&serialized).unwrap();

        assert_eq!(config, deserialized);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: RiskConfig = toml::from_str("base_risk_per_trade = 0.02").unwrap();
        assert_eq!(config.base_risk_per_trade, 0.02);
        assert_eq!(config.max_portfolio_risk, 0.30);
        assert_eq!(config.optimizer.periods_per_year, 252.0);
    }

    #[test]
    fn test_validation_rejects_bad_fractions() {
        let config = RiskConfig {
            max_portfolio_risk: 1.5,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(EngineError::InvalidConfig(_))));

        let config = RiskConfig {
            volatility_window: 1,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_template_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("risk.toml");

        create_config_template(&path).unwrap();
        let loaded = load_config(&path).unwrap();
        assert_eq!(loaded, RiskConfig::default());

        let custom = RiskConfig {
            base_risk_per_trade: 0.02,
            ..Default::default()
        };
        save_config(&custom, &path).unwrap();
        assert_eq!(load_config(&path).unwrap().base_risk_per_trade, 0.02);
    }
}
