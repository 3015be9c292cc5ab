//! Engine configuration: one object handed to every component constructor

use common::{EngineError, Symbol};
use config::{Config, Environment, File};
use execution::TwapConfig;
use portfolio_risk::RiskConfig;
use serde::{Deserialize, Serialize};
use signal_generation::PipelineConfig;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Environment variable prefix, e.g. `ENGINE__RISK__BASE_RISK_PER_TRADE`
pub const ENV_PREFIX: &str = "ENGINE";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_symbols")]
    pub symbols: Vec<Symbol>,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub twap: TwapConfig,
    #[serde(default)]
    pub cycle: CycleConfig,
    #[serde(default)]
    pub onchain: OnChainConfig,
    #[serde(default)]
    pub rebalance: RebalanceConfig,
}

fn default_symbols() -> Vec<Symbol> {
    vec!["BTC/USDT".to_string(), "ETH/USDT".to_string(), "SOL/USDT".to_string()]
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            symbols: default_symbols(),
            risk: RiskConfig::default(),
            pipeline: PipelineConfig::default(),
            twap: TwapConfig::default(),
            cycle: CycleConfig::default(),
            onchain: OnChainConfig::default(),
            rebalance: RebalanceConfig::default(),
        }
    }
}

/// Analysis cycle cadence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Whole-cycle deadline; partial results are discarded when it passes
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_concurrent_symbols")]
    pub max_concurrent_symbols: usize,
    /// Candles requested per symbol for volatility and volume profile
    #[serde(default = "default_candle_lookback")]
    pub candle_lookback: usize,
}

fn default_interval_secs() -> u64 {
    180
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_max_concurrent_symbols() -> usize {
    8
}

fn default_candle_lookback() -> usize {
    48
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            timeout_secs: default_timeout_secs(),
            max_concurrent_symbols: default_max_concurrent_symbols(),
            candle_lookback: default_candle_lookback(),
        }
    }
}

impl CycleConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// On-chain analytics rate limiting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnChainConfig {
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
}

fn default_min_interval_ms() -> u64 {
    1_000
}

impl Default for OnChainConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: default_min_interval_ms(),
        }
    }
}

impl OnChainConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }
}

/// Portfolio rebalancing cadence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebalanceConfig {
    #[serde(default = "default_rebalance_enabled")]
    pub enabled: bool,
    /// Run the optimizer every N analysis cycles
    #[serde(default = "default_every_cycles")]
    pub every_cycles: u64,
    #[serde(default = "default_volatility_adjustment")]
    pub volatility_adjustment: f64,
}

fn default_rebalance_enabled() -> bool {
    true
}

fn default_every_cycles() -> u64 {
    10
}

fn default_volatility_adjustment() -> f64 {
    1.0
}

impl Default for RebalanceConfig {
    fn default() -> Self {
        Self {
            enabled: default_rebalance_enabled(),
            every_cycles: default_every_cycles(),
            volatility_adjustment: default_volatility_adjustment(),
        }
    }
}

impl RebalanceConfig {
    /// Whether the optimizer should run after `completed_cycles` cycles.
    ///
    /// `last_rebalanced_at` is the cycle count of the previous run; failed
    /// cycles leave the count unchanged and must not trigger a second run.
    pub fn is_due(&self, completed_cycles: u64, last_rebalanced_at: u64) -> bool {
        self.enabled
            && self.every_cycles > 0
            && completed_cycles > 0
            && completed_cycles != last_rebalanced_at
            && completed_cycles % self.every_cycles == 0
    }
}

impl EngineConfig {
    /// Load from an optional TOML file, then apply `ENGINE__*` environment overrides
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading engine configuration");
            builder = builder.add_source(File::from(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let config: EngineConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Startup validation; any failure stops the engine before the first cycle
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.symbols.is_empty() {
            return Err(EngineError::InvalidConfig("symbols must not be empty".to_string()));
        }

        self.risk.validate()?;

        if self.twap.intervals == 0 {
            return Err(EngineError::InvalidConfig("twap.intervals must be at least 1".to_string()));
        }
        if self.twap.duration_minutes == 0 {
            return Err(EngineError::InvalidConfig(
                "twap.duration_minutes must be positive".to_string(),
            ));
        }

        let step = self.pipeline.ladder_step;
        if !(step.is_finite() && step > 0.0 && step < 0.5) {
            return Err(EngineError::InvalidConfig(format!(
                "pipeline.ladder_step must be in (0, 0.5), got {}",
                step
            )));
        }

        if self.cycle.interval_secs == 0 || self.cycle.timeout_secs == 0 {
            return Err(EngineError::InvalidConfig(
                "cycle interval and timeout must be positive".to_string(),
            ));
        }
        if self.cycle.timeout_secs >= self.cycle.interval_secs {
            return Err(EngineError::InvalidConfig(format!(
                "cycle.timeout_secs ({}) must be below cycle.interval_secs ({})",
                self.cycle.timeout_secs, self.cycle.interval_secs
            )));
        }
        if self.cycle.max_concurrent_symbols == 0 {
            return Err(EngineError::InvalidConfig(
                "cycle.max_concurrent_symbols must be at least 1".to_string(),
            ));
        }

        if self.rebalance.enabled
            && !(self.rebalance.volatility_adjustment.is_finite() && self.rebalance.volatility_adjustment > 0.0)
        {
            return Err(EngineError::InvalidConfig(
                "rebalance.volatility_adjustment must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.symbols.len(), 3);
        assert_eq!(config.twap.intervals, 12);
        assert_eq!(config.cycle.interval_secs, 180);
        assert_eq!(config.onchain.min_interval_ms, 1_000);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
symbols = ["BTC/USDT"]

[risk]
base_risk_per_trade = 0.02

[twap]
intervals = 6

[cycle]
interval_secs = 300
"#
        )
        .unwrap();

        let config = EngineConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.symbols, vec!["BTC/USDT".to_string()]);
        assert_eq!(config.risk.base_risk_per_trade, 0.02);
        assert_eq!(config.risk.max_portfolio_risk, 0.30);
        assert_eq!(config.twap.intervals, 6);
        assert_eq!(config.twap.duration_minutes, 60);
        assert_eq!(config.cycle.interval_secs, 300);
        assert_eq!(config.cycle.timeout_secs, 60);
    }

    #[test]
    fn test_shipped_config_matches_defaults() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/engine.toml");
        let config = EngineConfig::load(Some(&path)).unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[risk]\nmax_portfolio_risk = 2.5").unwrap();

        assert!(EngineConfig::load(Some(file.path())).is_err());
    }

    #[test]
    fn test_rebalance_fires_once_per_cycle_count() {
        let rebalance = RebalanceConfig {
            every_cycles: 3,
            ..Default::default()
        };
        assert!(!rebalance.is_due(0, 0));
        assert!(!rebalance.is_due(2, 0));
        assert!(rebalance.is_due(3, 0));
        // A failed cycle leaves the count at 3; the next tick must not rebalance again
        assert!(!rebalance.is_due(3, 3));
        assert!(!rebalance.is_due(4, 3));
        assert!(rebalance.is_due(6, 3));

        let disabled = RebalanceConfig {
            enabled: false,
            ..rebalance.clone()
        };
        assert!(!disabled.is_due(3, 0));
        let never = RebalanceConfig {
            every_cycles: 0,
            ..rebalance
        };
        assert!(!never.is_due(3, 0));
    }

    #[test]
    fn test_validation() {
        let mut config = EngineConfig::default();
        config.symbols.clear();
        assert!(matches!(config.validate(), Err(EngineError::InvalidConfig(_))));

        let mut config = EngineConfig::default();
        config.cycle.timeout_secs = config.cycle.interval_secs;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.twap.intervals = 0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.risk.min_risk_reward_ratio = 0.0;
        assert!(config.validate().is_err());
    }
}
