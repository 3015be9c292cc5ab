// Signal Generation Pipeline
// Turns one symbol's tier results into a sized, laddered trade instruction

use super::aggregator::SignalAggregator;
use super::ladder::PrecisionEntries;
use super::signals::{Action, CompositeSignal, DecisionThresholds, TierResults, TradingSignal};
use chrono::{DateTime, Utc};
use common::{AiSentiment, EngineError, MarketRegime, MlForecast, OnChainSignal, PriceSnapshot, Symbol, TradeStats};
use execution::{ExecutionSchedule, TwapScheduler};
use portfolio_risk::{DynamicRiskManager, RiskMetrics, RiskViolation, VolatilityEstimator};
use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Price offsets used to derive entry, target and stop from the last price
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceLevels {
    /// Limit entry improvement (0.002 = buy 0.2% below, sell 0.2% above)
    #[serde(default = "default_entry_offset_pct")]
    pub entry_offset_pct: f64,
    #[serde(default = "default_take_profit_pct")]
    pub take_profit_pct: f64,
    #[serde(default = "default_stop_loss_pct")]
    pub stop_loss_pct: f64,
}

fn default_entry_offset_pct() -> f64 {
    0.002
}

fn default_take_profit_pct() -> f64 {
    0.06
}

fn default_stop_loss_pct() -> f64 {
    0.04
}

impl Default for PriceLevels {
    fn default() -> Self {
        Self {
            entry_offset_pct: default_entry_offset_pct(),
            take_profit_pct: default_take_profit_pct(),
            stop_loss_pct: default_stop_loss_pct(),
        }
    }
}

/// Configuration for the signal generation pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Enable/disable signal generation
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub thresholds: DecisionThresholds,
    #[serde(default)]
    pub price_levels: PriceLevels,
    /// Ladder spacing between precision entries
    #[serde(default = "default_ladder_step")]
    pub ladder_step: f64,
    /// Attach a TWAP schedule to STRONG_BUY / STRONG_SELL signals
    #[serde(default = "default_enabled")]
    pub twap_for_strong_signals: bool,
    /// Drop signals whose reward/risk falls below the configured minimum.
    /// Off by default: the default levels give about 1.6, under the 2.0 minimum.
    #[serde(default)]
    pub reject_below_min_risk_reward: bool,
}

fn default_enabled() -> bool {
    true
}

fn default_ladder_step() -> f64 {
    0.005
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            thresholds: DecisionThresholds::default(),
            price_levels: PriceLevels::default(),
            ladder_step: default_ladder_step(),
            twap_for_strong_signals: true,
            reject_below_min_risk_reward: false,
        }
    }
}

/// Everything gathered for one symbol in one cycle
#[derive(Debug, Clone)]
pub struct SymbolContext {
    pub symbol: Symbol,
    pub snapshot: PriceSnapshot,
    /// Closing prices, oldest first
    pub closes: Vec<f64>,
    pub tiers: TierResults,
    pub ai_sentiment: Option<AiSentiment>,
    pub onchain: Option<OnChainSignal>,
    pub ml_forecast: Option<MlForecast>,
    pub trade_stats: Option<TradeStats>,
    pub balance: f64,
    pub at: DateTime<Utc>,
}

/// Signal generation pipeline
pub struct SignalPipeline {
    aggregator: SignalAggregator,
    risk_manager: DynamicRiskManager,
    volatility: VolatilityEstimator,
    scheduler: TwapScheduler,
    config: PipelineConfig,
}

impl SignalPipeline {
    /// Create a new signal pipeline
    pub fn new(
        config: PipelineConfig,
        risk_manager: DynamicRiskManager,
        scheduler: TwapScheduler,
    ) -> Self {
        let volatility = VolatilityEstimator::new(risk_manager.config().volatility_window);
        Self {
            aggregator: SignalAggregator::new(),
            risk_manager,
            volatility,
            scheduler,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn risk_manager(&self) -> &DynamicRiskManager {
        &self.risk_manager
    }

    /// Aggregate the context's tiers and sentiment
    pub fn composite(&self, ctx: &SymbolContext) -> CompositeSignal {
        self.aggregator.aggregate(
            &ctx.symbol,
            &ctx.tiers,
            ctx.ai_sentiment.as_ref().map(|s| s.sentiment),
            ctx.at,
        )
    }

    /// Build the trading signal for one symbol.
    ///
    /// `Ok(None)` means no trade: HOLD, zero size, or a rejected risk/reward.
    /// A zero stop distance is an error; the trade must not be sized.
    pub fn build(&self, ctx: &SymbolContext) -> Result<Option<TradingSignal>, EngineError> {
        if !self.config.enabled {
            debug!("Pipeline is disabled, skipping {}", ctx.symbol);
            return Ok(None);
        }

        let composite = self.composite(ctx);
        let action = Action::decide(composite.enhanced_score, composite.confidence, &self.config.thresholds);
        let direction = match action.direction() {
            Some(direction) => direction,
            None => {
                debug!(
                    "HOLD for {} (score {:.1}, confidence {:.2})",
                    ctx.symbol, composite.enhanced_score, composite.confidence
                );
                return Ok(None);
            }
        };

        let price = ctx.snapshot.price;
        if !(price.is_finite() && price > 0.0) {
            return Err(EngineError::InvalidInput(format!("{} has invalid price {}", ctx.symbol, price)));
        }

        let levels = &self.config.price_levels;
        let (entry, take_profit, stop_loss) = match direction {
            common::Direction::Long => (
                price * (1.0 - levels.entry_offset_pct),
                price * (1.0 + levels.take_profit_pct),
                price * (1.0 - levels.stop_loss_pct),
            ),
            common::Direction::Short => (
                price * (1.0 + levels.entry_offset_pct),
                price * (1.0 - levels.take_profit_pct),
                price * (1.0 + levels.stop_loss_pct),
            ),
        };

        let regime = MarketRegime::classify(&ctx.snapshot);
        let (volatility, volatility_multiplier) = self.volatility.estimate_or_neutral(&ctx.closes);

        let sizing = self
            .risk_manager
            .size_position(ctx.balance, entry, stop_loss, volatility_multiplier, regime)?;

        let mut position_size = sizing.position_size_usd;
        if let Some(stats) = &ctx.trade_stats {
            let kelly_cap = self.risk_manager.kelly_position(ctx.balance, stats);
            if kelly_cap < position_size {
                debug!("Kelly caps {} at ${:.2} (was ${:.2})", ctx.symbol, kelly_cap, position_size);
                position_size = kelly_cap;
            }
        }
        position_size = self.risk_manager.weekend_adjusted(position_size, ctx.at);

        if position_size <= 0.0 {
            debug!("Zero position size for {}, no signal", ctx.symbol);
            return Ok(None);
        }

        let risk_reward = self.risk_manager.validate_risk_reward(entry, take_profit, stop_loss);
        if !risk_reward.valid {
            let violation = RiskViolation::RiskRewardBelowMinimum {
                ratio: risk_reward.ratio,
                minimum: risk_reward.min_required,
            };
            if self.config.reject_below_min_risk_reward {
                warn!("Rejecting {} {}: {}", action, ctx.symbol, violation);
                return Ok(None);
            }
            debug!("{} {} kept despite: {}", action, ctx.symbol, violation);
        }

        let entry_price = to_price(entry)?;
        let step = Decimal::from_f64(self.config.ladder_step)
            .ok_or_else(|| EngineError::InvalidInput(format!("ladder step {}", self.config.ladder_step)))?;
        let precision_entries = PrecisionEntries::ladder_with_step(entry_price, Some(direction), step);

        let execution_schedule = if action.is_strong() && self.config.twap_for_strong_signals {
            self.schedule_twap(&ctx.symbol, position_size, ctx.at)
        } else {
            None
        };

        let risk_metrics = RiskMetrics::from_closes(
            &ctx.closes,
            volatility,
            volatility_multiplier,
            regime,
            ctx.trade_stats,
        );

        let signal = TradingSignal {
            id: Uuid::new_v4(),
            symbol: ctx.symbol.clone(),
            action,
            direction,
            entry_price,
            stop_loss: to_price(stop_loss)?,
            take_profit: to_price(take_profit)?,
            leverage: if ctx.balance > 0.0 { position_size / ctx.balance } else { 0.0 },
            position_size_usd: position_size,
            confidence_score: composite.confidence,
            enhanced_score: composite.enhanced_score,
            signal_sources: composite.tier_scores.keys().copied().collect(),
            ai_sentiment: composite.ai_sentiment,
            key_insights: ctx
                .ai_sentiment
                .as_ref()
                .map(|s| s.key_insights.clone())
                .unwrap_or_default(),
            risk_metrics,
            risk_reward,
            ml_prediction: ctx.ml_forecast,
            onchain_analysis: ctx.onchain,
            precision_entries,
            execution_schedule,
            timestamp: ctx.at,
        };

        info!(
            "{} {} {} @ {} size ${:.2} (score {:.1}, confidence {:.2}, {})",
            signal.action,
            signal.direction,
            signal.symbol,
            signal.entry_price,
            signal.position_size_usd,
            signal.enhanced_score,
            signal.confidence_score,
            regime
        );

        Ok(Some(signal))
    }

    fn schedule_twap(&self, symbol: &str, amount: f64, at: DateTime<Utc>) -> Option<ExecutionSchedule> {
        let twap = self.scheduler.config();
        match self
            .scheduler
            .schedule_at(symbol, amount, twap.duration_minutes, twap.intervals, at)
        {
            Ok(schedule) => Some(schedule),
            Err(e) => {
                warn!("TWAP schedule for {} not created: {}", symbol, e);
                None
            }
        }
    }
}

fn to_price(value: f64) -> Result<Decimal, EngineError> {
    Decimal::from_f64(value)
        .map(|d| d.round_dp(8))
        .ok_or_else(|| EngineError::InvalidInput(format!("price {} is not representable", value)))
}
