use chrono::{DateTime, Utc};
use common::{Direction, MlForecast, OnChainBias, OnChainSignal, Sentiment, Symbol};
use execution::ExecutionSchedule;
use portfolio_risk::{RiskMetrics, RiskRewardCheck};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

use crate::ladder::PrecisionEntries;

/// Independent analysis method feeding the aggregator
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierId {
    MarketStructure,
    OrderBook,
    VolumeProfile,
    OnChain,
}

impl TierId {
    pub const ALL: [TierId; 4] = [
        TierId::MarketStructure,
        TierId::OrderBook,
        TierId::VolumeProfile,
        TierId::OnChain,
    ];

    fn index(self) -> usize {
        match self {
            TierId::MarketStructure => 0,
            TierId::OrderBook => 1,
            TierId::VolumeProfile => 2,
            TierId::OnChain => 3,
        }
    }
}

/// What a tier saw, alongside its score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tier", rename_all = "snake_case")]
pub enum TierEvidence {
    MarketStructure {
        trend_bias: Sentiment,
        change_24h: f64,
        range_position: f64,
    },
    OrderBook {
        imbalance: f64, // -1.0 to 1.0, positive = bid heavy
        bid_volume: f64,
        ask_volume: f64,
        support: f64,
        resistance: f64,
    },
    VolumeProfile {
        point_of_control: f64,
        value_area_high: f64,
        value_area_low: f64,
    },
    OnChain {
        bias: OnChainBias,
        strength: f64,
    },
}

impl TierEvidence {
    pub fn tier(&self) -> TierId {
        match self {
            TierEvidence::MarketStructure { .. } => TierId::MarketStructure,
            TierEvidence::OrderBook { .. } => TierId::OrderBook,
            TierEvidence::VolumeProfile { .. } => TierId::VolumeProfile,
            TierEvidence::OnChain { .. } => TierId::OnChain,
        }
    }
}

/// One tier's output for one symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierResult {
    score: f64,
    evidence: TierEvidence,
}

impl TierResult {
    /// Scores are clamped to [0, 100]; a non-finite score counts as neutral
    pub fn new(score: f64, evidence: TierEvidence) -> Self {
        let score = if score.is_finite() { score.clamp(0.0, 100.0) } else { 50.0 };
        Self { score, evidence }
    }

    pub fn tier(&self) -> TierId {
        self.evidence.tier()
    }

    pub fn score(&self) -> f64 {
        self.score
    }

    pub fn evidence(&self) -> &TierEvidence {
        &self.evidence
    }
}

/// Sparse set of tier results, at most one per tier
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TierResults {
    slots: [Option<TierResult>; 4],
}

impl TierResults {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a result, replacing any earlier one for the same tier
    pub fn insert(&mut self, result: TierResult) {
        let index = result.tier().index();
        self.slots[index] = Some(result);
    }

    pub fn with(mut self, result: TierResult) -> Self {
        self.insert(result);
        self
    }

    pub fn get(&self, tier: TierId) -> Option<&TierResult> {
        self.slots[tier.index()].as_ref()
    }

    pub fn present(&self) -> impl Iterator<Item = &TierResult> {
        self.slots.iter().flatten()
    }

    pub fn count(&self) -> usize {
        self.present().count()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }
}

impl FromIterator<TierResult> for TierResults {
    fn from_iter<I: IntoIterator<Item = TierResult>>(iter: I) -> Self {
        let mut results = TierResults::new();
        for result in iter {
            results.insert(result);
        }
        results
    }
}

/// Blended view of one symbol's tiers and sentiment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeSignal {
    pub symbol: Symbol,
    pub tier_scores: BTreeMap<TierId, f64>,
    pub enhanced_score: f64, // 0 to 100
    pub confidence: f64,     // 0.0 to 1.0
    pub ai_sentiment: Option<Sentiment>,
    pub timestamp: DateTime<Utc>,
}

/// Trade decision derived from a composite signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    StrongBuy,
    Buy,
    Hold,
    Sell,
    StrongSell,
}

impl Action {
    /// Map score and confidence to an action, strongest rule first
    pub fn decide(enhanced_score: f64, confidence: f64, thresholds: &DecisionThresholds) -> Action {
        if enhanced_score >= thresholds.strong_buy_score && confidence >= thresholds.strong_confidence {
            Action::StrongBuy
        } else if enhanced_score >= thresholds.buy_score && confidence >= thresholds.min_confidence {
            Action::Buy
        } else if enhanced_score <= thresholds.strong_sell_score
            && confidence >= thresholds.strong_confidence
        {
            Action::StrongSell
        } else if enhanced_score <= thresholds.sell_score && confidence >= thresholds.min_confidence {
            Action::Sell
        } else {
            Action::Hold
        }
    }

    pub fn direction(&self) -> Option<Direction> {
        match self {
            Action::StrongBuy | Action::Buy => Some(Direction::Long),
            Action::StrongSell | Action::Sell => Some(Direction::Short),
            Action::Hold => None,
        }
    }

    pub fn is_strong(&self) -> bool {
        matches!(self, Action::StrongBuy | Action::StrongSell)
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Action::StrongBuy => "STRONG_BUY",
            Action::Buy => "BUY",
            Action::Hold => "HOLD",
            Action::Sell => "SELL",
            Action::StrongSell => "STRONG_SELL",
        };
        write!(f, "{}", label)
    }
}

/// Score/confidence cutoffs for each action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionThresholds {
    #[serde(default = "default_strong_buy_score")]
    pub strong_buy_score: f64,
    #[serde(default = "default_buy_score")]
    pub buy_score: f64,
    #[serde(default = "default_sell_score")]
    pub sell_score: f64,
    #[serde(default = "default_strong_sell_score")]
    pub strong_sell_score: f64,
    #[serde(default = "default_strong_confidence")]
    pub strong_confidence: f64,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
}

fn default_strong_buy_score() -> f64 {
    75.0
}

fn default_buy_score() -> f64 {
    65.0
}

fn default_sell_score() -> f64 {
    35.0
}

fn default_strong_sell_score() -> f64 {
    25.0
}

fn default_strong_confidence() -> f64 {
    0.8
}

fn default_min_confidence() -> f64 {
    0.7
}

impl Default for DecisionThresholds {
    fn default() -> Self {
        Self {
            strong_buy_score: default_strong_buy_score(),
            buy_score: default_buy_score(),
            sell_score: default_sell_score(),
            strong_sell_score: default_strong_sell_score(),
            strong_confidence: default_strong_confidence(),
            min_confidence: default_min_confidence(),
        }
    }
}

/// Final trade instruction for one symbol
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingSignal {
    pub id: Uuid,
    pub symbol: Symbol,
    pub action: Action,
    pub direction: Direction,
    pub entry_price: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub leverage: f64,
    pub position_size_usd: f64,
    pub confidence_score: f64,
    pub enhanced_score: f64,
    pub signal_sources: BTreeSet<TierId>,
    pub ai_sentiment: Option<Sentiment>,
    pub key_insights: Vec<String>,
    pub risk_metrics: RiskMetrics,
    pub risk_reward: RiskRewardCheck,
    pub ml_prediction: Option<MlForecast>,
    pub onchain_analysis: Option<OnChainSignal>,
    pub precision_entries: PrecisionEntries,
    pub execution_schedule: Option<ExecutionSchedule>,
    pub timestamp: DateTime<Utc>,
}
