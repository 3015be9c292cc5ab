//! Descriptive market findings attached to each cycle snapshot
//!
//! These flag large 24h moves and a market-wide volatility spike. They are
//! informational only and never feed the signal pipeline.

use common::{PriceSnapshot, Symbol};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 24h move (percent) beyond which a symbol is flagged
pub const MOVE_THRESHOLD_PCT: f64 = 5.0;
/// Average 24h range (percent of price) above which the market is flagged
pub const HIGH_VOLATILITY_RANGE_PCT: f64 = 8.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OpportunityKind {
    OversoldBounce,
    MomentumContinuation,
}

impl OpportunityKind {
    pub fn confidence(&self) -> f64 {
        match self {
            OpportunityKind::OversoldBounce => 0.7,
            OpportunityKind::MomentumContinuation => 0.6,
        }
    }
}

impl fmt::Display for OpportunityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpportunityKind::OversoldBounce => write!(f, "OVERSOLD_BOUNCE"),
            OpportunityKind::MomentumContinuation => write!(f, "MOMENTUM_CONTINUATION"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    pub symbol: Symbol,
    pub kind: OpportunityKind,
    pub change_24h: f64,
    pub confidence: f64,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarketRiskKind {
    HighVolatility,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketRisk {
    pub kind: MarketRiskKind,
    pub severity: Severity,
    pub average_range_pct: f64,
    pub description: String,
}

/// Flag a sharp 24h drop as a bounce candidate and a sharp rise as momentum.
///
/// Both bounds are strict: a move of exactly 5% is not flagged.
pub fn opportunity(symbol: &str, snapshot: &PriceSnapshot) -> Option<Opportunity> {
    let change = snapshot.change_24h;
    let (kind, description) = if change < -MOVE_THRESHOLD_PCT {
        (
            OpportunityKind::OversoldBounce,
            format!("{} down {:.1}% - potential reversal", symbol, change),
        )
    } else if change > MOVE_THRESHOLD_PCT {
        (
            OpportunityKind::MomentumContinuation,
            format!("{} up {:.1}% - momentum play", symbol, change),
        )
    } else {
        return None;
    };

    Some(Opportunity {
        symbol: symbol.to_string(),
        kind,
        change_24h: change,
        confidence: kind.confidence(),
        description,
    })
}

/// Market-level risks across every symbol that produced a snapshot this cycle
pub fn market_risks<'a>(snapshots: impl IntoIterator<Item = &'a PriceSnapshot>) -> Vec<MarketRisk> {
    let ranges: Vec<f64> = snapshots
        .into_iter()
        .filter(|s| s.price > 0.0)
        .map(PriceSnapshot::range_pct)
        .collect();
    if ranges.is_empty() {
        return Vec::new();
    }

    let average = ranges.iter().sum::<f64>() / ranges.len() as f64;
    if average > HIGH_VOLATILITY_RANGE_PCT {
        vec![MarketRisk {
            kind: MarketRiskKind::HighVolatility,
            severity: Severity::High,
            average_range_pct: average,
            description: format!("Market showing high volatility ({:.1}%)", average),
        }]
    } else {
        Vec::new()
    }
}
