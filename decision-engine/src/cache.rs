//! Last-cycle analysis cache
//!
//! Readers always see one complete cycle: the snapshot is built privately and
//! swapped in with a single write.

use crate::findings::{MarketRisk, Opportunity};
use chrono::{DateTime, Utc};
use common::Symbol;
use serde::{Deserialize, Serialize};
use signal_generation::{CompositeSignal, TradingSignal};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Results of one completed analysis cycle
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CycleSnapshot {
    pub cycle_id: Uuid,
    pub completed_at: Option<DateTime<Utc>>,
    /// Composite view of every symbol that was analyzed
    pub analyses: BTreeMap<Symbol, CompositeSignal>,
    /// Active (non-HOLD, accepted) signals
    pub signals: BTreeMap<Symbol, TradingSignal>,
    /// Symbols whose pipeline failed, with the reason
    pub failures: BTreeMap<Symbol, String>,
    /// Signals dropped by the portfolio exposure cap
    pub rejected: BTreeMap<Symbol, String>,
    /// Symbols with an outsized 24h move
    #[serde(default)]
    pub opportunities: BTreeMap<Symbol, Opportunity>,
    #[serde(default)]
    pub market_risks: Vec<MarketRisk>,
}

impl CycleSnapshot {
    pub fn total_exposure(&self) -> f64 {
        self.signals.values().map(|s| s.position_size_usd).sum()
    }
}

#[derive(Debug, Default)]
pub struct SignalCache {
    inner: RwLock<Arc<CycleSnapshot>>,
}

impl SignalCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole cache with a finished cycle
    pub async fn replace(&self, snapshot: CycleSnapshot) {
        *self.inner.write().await = Arc::new(snapshot);
    }

    pub async fn latest(&self) -> Arc<CycleSnapshot> {
        self.inner.read().await.clone()
    }

    pub async fn signal(&self, symbol: &str) -> Option<TradingSignal> {
        self.inner.read().await.signals.get(symbol).cloned()
    }
}
