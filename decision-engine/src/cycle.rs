//! Analysis cycle
//!
//! One cycle analyzes every configured symbol concurrently (bounded by a
//! semaphore), applies the portfolio exposure cap to the resulting signals, and
//! swaps the finished snapshot into the cache. The whole cycle runs under one
//! timeout; a cycle that overruns is dropped and the previous snapshot stays.

use crate::cache::{CycleSnapshot, SignalCache};
use crate::config::EngineConfig;
use crate::findings;
use crate::sources::{Collaborators, SourceResult};
use chrono::{DateTime, Utc};
use common::{AiSentiment, EngineError, PriceSnapshot, Symbol, TradeStats};
use execution::TwapScheduler;
use portfolio_risk::DynamicRiskManager;
use signal_generation::{tiers, CompositeSignal, SignalPipeline, SymbolContext, TierResults, TradingSignal};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{self, JoinSet};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// One symbol's contribution to a cycle
#[derive(Debug, Clone)]
pub struct SymbolAnalysis {
    pub snapshot: PriceSnapshot,
    pub composite: CompositeSignal,
    pub signal: Option<TradingSignal>,
}

/// Drives analysis cycles over the configured symbol universe
pub struct AnalysisEngine {
    config: Arc<EngineConfig>,
    collaborators: Collaborators,
    pipeline: Arc<SignalPipeline>,
    cache: Arc<SignalCache>,
    cycle_timeout: Duration,
    completed_cycles: AtomicU64,
}

impl AnalysisEngine {
    pub fn new(config: EngineConfig, collaborators: Collaborators) -> Self {
        let pipeline = SignalPipeline::new(
            config.pipeline.clone(),
            DynamicRiskManager::new(config.risk.clone()),
            TwapScheduler::new(config.twap.clone()),
        );
        let cycle_timeout = config.cycle.timeout();

        Self {
            config: Arc::new(config),
            collaborators,
            pipeline: Arc::new(pipeline),
            cache: Arc::new(SignalCache::new()),
            cycle_timeout,
            completed_cycles: AtomicU64::new(0),
        }
    }

    /// Override the cycle deadline taken from configuration
    pub fn with_cycle_timeout(mut self, timeout: Duration) -> Self {
        self.cycle_timeout = timeout;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    pub fn cache(&self) -> Arc<SignalCache> {
        self.cache.clone()
    }

    pub fn completed_cycles(&self) -> u64 {
        self.completed_cycles.load(AtomicOrdering::Relaxed)
    }

    /// Run one cycle under the cycle timeout and publish it to the cache.
    ///
    /// On timeout the in-flight symbol tasks are cancelled, nothing is
    /// published, and `CycleTimeout` is returned.
    pub async fn run_cycle(&self) -> Result<Arc<CycleSnapshot>, EngineError> {
        let cycle_id = Uuid::new_v4();
        let started = std::time::Instant::now();

        let snapshot = match tokio::time::timeout(self.cycle_timeout, self.analyze_all(cycle_id)).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(
                    cycle_id = %cycle_id,
                    timeout_ms = self.cycle_timeout.as_millis() as u64,
                    "Analysis cycle timed out, discarding partial results"
                );
                return Err(EngineError::CycleTimeout {
                    secs: self.cycle_timeout.as_secs(),
                });
            }
        };

        info!(
            cycle_id = %cycle_id,
            analyzed = snapshot.analyses.len(),
            signals = snapshot.signals.len(),
            failures = snapshot.failures.len(),
            rejected = snapshot.rejected.len(),
            opportunities = snapshot.opportunities.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Analysis cycle complete"
        );

        self.cache.replace(snapshot).await;
        self.completed_cycles.fetch_add(1, AtomicOrdering::Relaxed);
        Ok(self.cache.latest().await)
    }

    async fn analyze_all(&self, cycle_id: Uuid) -> Result<CycleSnapshot, EngineError> {
        let at = Utc::now();
        let balance = self.collaborators.market.account_balance().await?;
        let sentiment = self.market_sentiment().await;

        let semaphore = Arc::new(Semaphore::new(self.config.cycle.max_concurrent_symbols));
        let mut tasks = JoinSet::new();
        // Recovers the symbol of a task that panicked or was cancelled
        let mut task_symbols: HashMap<task::Id, Symbol> = HashMap::new();

        for symbol in self.config.symbols.iter().cloned() {
            let semaphore = semaphore.clone();
            let collaborators = self.collaborators.clone();
            let pipeline = self.pipeline.clone();
            let sentiment = sentiment.clone();
            let lookback = self.config.cycle.candle_lookback;

            let task_symbol = symbol.clone();
            let handle = tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let outcome = analyze_symbol(
                    &symbol,
                    &collaborators,
                    &pipeline,
                    lookback,
                    balance,
                    sentiment,
                    at,
                )
                .await;
                (symbol, outcome)
            });
            task_symbols.insert(handle.id(), task_symbol);
        }

        let mut snapshot = CycleSnapshot {
            cycle_id,
            ..Default::default()
        };
        let mut candidates = Vec::new();
        let mut prices = Vec::new();

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((symbol, Ok(analysis))) => {
                    if let Some(signal) = analysis.signal {
                        candidates.push(signal);
                    }
                    if let Some(opportunity) = findings::opportunity(&symbol, &analysis.snapshot) {
                        info!(symbol = %symbol, kind = %opportunity.kind, "{}", opportunity.description);
                        snapshot.opportunities.insert(symbol.clone(), opportunity);
                    }
                    prices.push(analysis.snapshot);
                    snapshot.analyses.insert(symbol, analysis.composite);
                }
                Ok((symbol, Err(e))) => {
                    warn!(symbol = %symbol, error = %e, "Symbol analysis failed");
                    snapshot.failures.insert(symbol, e.to_string());
                }
                Err(e) => match task_symbols.remove(&e.id()) {
                    Some(symbol) => {
                        error!(symbol = %symbol, error = %e, "Symbol analysis task aborted");
                        snapshot.failures.insert(symbol, format!("analysis task aborted: {}", e));
                    }
                    None => error!(error = %e, "Analysis task aborted for an unknown symbol"),
                },
            }
        }

        snapshot.market_risks = findings::market_risks(&prices);
        for risk in &snapshot.market_risks {
            warn!(severity = ?risk.severity, "{}", risk.description);
        }

        self.apply_exposure_cap(&mut snapshot, candidates, balance);
        snapshot.completed_at = Some(Utc::now());
        Ok(snapshot)
    }

    async fn market_sentiment(&self) -> Option<AiSentiment> {
        let analyst = self.collaborators.sentiment.as_ref()?;
        match analyst.market_sentiment(&self.config.symbols).await {
            Ok(sentiment) => Some(sentiment),
            Err(e) => {
                warn!(error = %e, "AI sentiment unavailable this cycle");
                None
            }
        }
    }

    /// Admit signals highest confidence first while total exposure stays under the cap
    fn apply_exposure_cap(&self, snapshot: &mut CycleSnapshot, mut candidates: Vec<TradingSignal>, balance: f64) {
        candidates.sort_by(|a, b| {
            b.confidence_score
                .partial_cmp(&a.confidence_score)
                .unwrap_or(Ordering::Equal)
        });

        let risk = self.pipeline.risk_manager();
        let mut exposure = 0.0;
        for signal in candidates {
            match risk.check_total_exposure(exposure, signal.position_size_usd, balance) {
                Ok(()) => {
                    exposure += signal.position_size_usd;
                    snapshot.signals.insert(signal.symbol.clone(), signal);
                }
                Err(violation) => {
                    warn!(symbol = %signal.symbol, action = %signal.action, "Signal rejected: {}", violation);
                    snapshot.rejected.insert(signal.symbol.clone(), violation.to_string());
                }
            }
        }
    }
}

/// Gather one symbol's inputs and run it through the pipeline.
///
/// Only a missing price snapshot fails the symbol; every other source
/// degrades to an absent tier.
async fn analyze_symbol(
    symbol: &Symbol,
    collaborators: &Collaborators,
    pipeline: &SignalPipeline,
    lookback: usize,
    balance: f64,
    ai_sentiment: Option<AiSentiment>,
    at: DateTime<Utc>,
) -> Result<SymbolAnalysis, EngineError> {
    let snapshot = collaborators.market.snapshot(symbol).await?;

    let (book, candles, onchain, trade_stats) = tokio::join!(
        collaborators.market.order_book(symbol),
        collaborators.market.candles(symbol, lookback),
        collaborators.onchain.composite_signal(symbol),
        journal_stats(collaborators, symbol),
    );

    let book = available(symbol, "order_book", book);
    let candles = available(symbol, "candles", candles).unwrap_or_default();
    let onchain = available(symbol, "onchain", onchain);

    let mut tier_results = TierResults::new().with(tiers::market_structure(&snapshot));
    if let Some(result) = book.as_ref().and_then(|b| tiers::order_book(b)) {
        tier_results.insert(result);
    }
    if let Some(result) = tiers::volume_profile(&candles, snapshot.price) {
        tier_results.insert(result);
    }
    if let Some(signal) = &onchain {
        tier_results.insert(tiers::on_chain(signal));
    }

    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let ml_forecast = match &collaborators.forecaster {
        Some(forecaster) => available(symbol, "forecaster", forecaster.forecast(symbol, &closes).await),
        None => None,
    };

    debug!(
        symbol = %symbol,
        tiers = tier_results.count(),
        candles = closes.len(),
        "Inputs gathered"
    );

    let ctx = SymbolContext {
        symbol: symbol.clone(),
        snapshot,
        closes,
        tiers: tier_results,
        ai_sentiment,
        onchain,
        ml_forecast,
        trade_stats,
        balance,
        at,
    };

    let composite = pipeline.composite(&ctx);
    let signal = pipeline.build(&ctx)?;
    Ok(SymbolAnalysis {
        snapshot,
        composite,
        signal,
    })
}

async fn journal_stats(collaborators: &Collaborators, symbol: &str) -> Option<TradeStats> {
    let journal = collaborators.journal.as_ref()?;
    available(symbol, "journal", journal.stats(symbol).await).flatten()
}

fn available<T>(symbol: &str, source: &str, result: SourceResult<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(symbol = %symbol, source, error = %e, "Source unavailable, treating as absent");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::{MarketData, OnChainAnalytics, SentimentAnalyst};
    use async_trait::async_trait;
    use common::{
        AiSentiment, BookLevel, Candle, OnChainBias, OnChainSignal, OrderBook, PriceSnapshot, Sentiment,
    };
    use signal_generation::{Action, TierId};
    use std::collections::HashSet;

    /// Bullish book and tape for every symbol, failing the ones listed
    struct MockMarket {
        failing_snapshots: HashSet<String>,
        panicking_snapshots: HashSet<String>,
        delay: Option<Duration>,
    }

    impl MockMarket {
        fn healthy() -> Self {
            Self {
                failing_snapshots: HashSet::new(),
                panicking_snapshots: HashSet::new(),
                delay: None,
            }
        }
    }

    #[async_trait]
    impl MarketData for MockMarket {
        async fn snapshot(&self, symbol: &str) -> SourceResult<PriceSnapshot> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.failing_snapshots.contains(symbol) {
                return Err(EngineError::external("exchange", "HTTP 502"));
            }
            if self.panicking_snapshots.contains(symbol) {
                panic!("malformed ticker payload for {}", symbol);
            }
            Ok(PriceSnapshot {
                price: 105.0,
                high_24h: 106.0,
                low_24h: 100.0,
                change_24h: 6.0,
                volume_24h: 1_000_000.0,
            })
        }

        async fn candles(&self, _symbol: &str, limit: usize) -> SourceResult<Vec<Candle>> {
            let now = Utc::now();
            Ok((0..limit)
                .map(|i| {
                    let close = 95.0 + i as f64 * 0.2;
                    Candle {
                        open: close - 0.1,
                        high: close + 0.3,
                        low: close - 0.3,
                        close,
                        volume: 10.0,
                        timestamp: now - chrono::Duration::hours((limit - i) as i64),
                    }
                })
                .collect())
        }

        async fn order_book(&self, _symbol: &str) -> SourceResult<OrderBook> {
            Ok(OrderBook {
                bids: vec![BookLevel { price: 104.9, size: 90.0 }],
                asks: vec![BookLevel { price: 105.1, size: 10.0 }],
            })
        }

        async fn account_balance(&self) -> SourceResult<f64> {
            Ok(1_000.0)
        }
    }

    /// Bullish on-chain read, unavailable for every symbol or for the listed ones
    struct MockOnChain {
        down: bool,
        failing: HashSet<String>,
    }

    impl MockOnChain {
        fn healthy() -> Self {
            Self {
                down: false,
                failing: HashSet::new(),
            }
        }

        fn down() -> Self {
            Self {
                down: true,
                failing: HashSet::new(),
            }
        }

        fn failing_for(symbols: &[&str]) -> Self {
            Self {
                down: false,
                failing: symbols.iter().map(|s| s.to_string()).collect(),
            }
        }
    }

    #[async_trait]
    impl OnChainAnalytics for MockOnChain {
        async fn composite_signal(&self, symbol: &str) -> SourceResult<OnChainSignal> {
            if self.down || self.failing.contains(symbol) {
                return Err(EngineError::external("onchain", "rate limited"));
            }
            Ok(OnChainSignal {
                composite_signal: OnChainBias::Bullish,
                composite_score: 0.8,
            })
        }
    }

    struct BullishAnalyst;

    #[async_trait]
    impl SentimentAnalyst for BullishAnalyst {
        async fn market_sentiment(&self, _symbols: &[Symbol]) -> SourceResult<AiSentiment> {
            Ok(AiSentiment {
                sentiment: Sentiment::Bullish,
                key_insights: vec!["Risk-on flows".to_string()],
            })
        }
    }

    fn config(symbols: &[&str]) -> EngineConfig {
        EngineConfig {
            symbols: symbols.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    fn engine(config: EngineConfig, market: MockMarket, onchain: MockOnChain) -> AnalysisEngine {
        let collaborators = Collaborators::new(Arc::new(market), Arc::new(onchain))
            .with_sentiment(Arc::new(BullishAnalyst));
        AnalysisEngine::new(config, collaborators)
    }

    #[tokio::test]
    async fn test_cycle_emits_signals_for_every_symbol() {
        let engine = engine(config(&["BTC/USDT", "ETH/USDT"]), MockMarket::healthy(), MockOnChain::healthy());

        let snapshot = engine.run_cycle().await.unwrap();
        assert_eq!(snapshot.analyses.len(), 2);
        assert!(snapshot.failures.is_empty());
        assert_eq!(engine.completed_cycles(), 1);

        let btc = &snapshot.analyses["BTC/USDT"];
        assert_eq!(btc.tier_scores.len(), 4);
        assert!(btc.confidence > 0.99);

        let signal = engine.cache().signal("BTC/USDT").await.unwrap();
        assert_eq!(signal.action, Action::StrongBuy);
        assert!(signal.signal_sources.contains(&TierId::OnChain));
        assert!(signal.execution_schedule.is_some());
        assert_eq!(signal.key_insights, vec!["Risk-on flows".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_symbol_does_not_abort_others() {
        let market = MockMarket {
            failing_snapshots: ["ETH/USDT".to_string()].into_iter().collect(),
            ..MockMarket::healthy()
        };
        let engine = engine(config(&["BTC/USDT", "ETH/USDT", "SOL/USDT"]), market, MockOnChain::healthy());

        let snapshot = engine.run_cycle().await.unwrap();
        assert_eq!(snapshot.analyses.len(), 2);
        assert!(snapshot.failures["ETH/USDT"].contains("HTTP 502"));
        assert!(snapshot.analyses.contains_key("SOL/USDT"));
    }

    #[tokio::test]
    async fn test_panicked_symbol_task_is_recorded_as_failure() {
        let market = MockMarket {
            panicking_snapshots: ["ETH/USDT".to_string()].into_iter().collect(),
            ..MockMarket::healthy()
        };
        let engine = engine(config(&["BTC/USDT", "ETH/USDT", "SOL/USDT"]), market, MockOnChain::healthy());

        let snapshot = engine.run_cycle().await.unwrap();
        assert_eq!(snapshot.analyses.len(), 2);
        assert!(!snapshot.analyses.contains_key("ETH/USDT"));
        assert!(snapshot.failures["ETH/USDT"].contains("panicked"));
        assert!(snapshot.signals.contains_key("BTC/USDT"));
        assert!(snapshot.signals.contains_key("SOL/USDT"));
    }

    #[tokio::test]
    async fn test_cycle_records_momentum_opportunities() {
        let engine = engine(config(&["BTC/USDT", "ETH/USDT"]), MockMarket::healthy(), MockOnChain::healthy());

        let snapshot = engine.run_cycle().await.unwrap();
        // +6% on a 5.7% range: momentum for both, no market-wide volatility
        assert_eq!(snapshot.opportunities.len(), 2);
        let btc = &snapshot.opportunities["BTC/USDT"];
        assert_eq!(btc.kind, findings::OpportunityKind::MomentumContinuation);
        assert_eq!(btc.description, "BTC/USDT up 6.0% - momentum play");
        assert!(snapshot.market_risks.is_empty());
    }

    #[tokio::test]
    async fn test_failed_onchain_source_lowers_confidence() {
        let healthy = engine(config(&["BTC/USDT"]), MockMarket::healthy(), MockOnChain::healthy());
        let degraded = engine(config(&["BTC/USDT"]), MockMarket::healthy(), MockOnChain::down());

        let full = healthy.run_cycle().await.unwrap();
        let partial = degraded.run_cycle().await.unwrap();

        let full = &full.analyses["BTC/USDT"];
        let partial = &partial.analyses["BTC/USDT"];
        assert!(!partial.tier_scores.contains_key(&TierId::OnChain));
        assert_eq!(partial.tier_scores.len(), 3);
        // Three tiers plus sentiment against a full house capped at 1.0
        assert!((partial.confidence - 0.85).abs() < 1e-9);
        assert!(partial.confidence < full.confidence);
    }

    #[tokio::test]
    async fn test_timed_out_cycle_keeps_previous_snapshot() {
        let engine = engine(config(&["BTC/USDT"]), MockMarket::healthy(), MockOnChain::healthy());
        let first = engine.run_cycle().await.unwrap();

        let slow = MockMarket {
            delay: Some(Duration::from_millis(500)),
            ..MockMarket::healthy()
        };
        let cache = engine.cache();
        let slow_engine = AnalysisEngine {
            collaborators: Collaborators::new(Arc::new(slow), Arc::new(MockOnChain::healthy())),
            cache,
            ..engine
        }
        .with_cycle_timeout(Duration::from_millis(50));

        let err = slow_engine.run_cycle().await.unwrap_err();
        assert!(matches!(err, EngineError::CycleTimeout { .. }));

        let latest = slow_engine.cache().latest().await;
        assert_eq!(latest.cycle_id, first.cycle_id);
        assert_eq!(slow_engine.completed_cycles(), 1);
    }

    #[tokio::test]
    async fn test_exposure_cap_rejects_lowest_confidence() {
        let mut config = config(&["BTC/USDT", "ETH/USDT", "SOL/USDT", "XRP/USDT"]);
        // Each signal sizes to the $300 cap ($240 on weekends); two fit under $700 either way
        config.risk.max_total_exposure = 0.7;
        // SOL and XRP lose their on-chain tier and drop to 0.85 confidence
        let onchain = MockOnChain::failing_for(&["SOL/USDT", "XRP/USDT"]);
        let engine = engine(config, MockMarket::healthy(), onchain);

        let snapshot = engine.run_cycle().await.unwrap();
        assert!(snapshot.analyses["BTC/USDT"].confidence > snapshot.analyses["SOL/USDT"].confidence);

        let accepted: Vec<&str> = snapshot.signals.keys().map(String::as_str).collect();
        let rejected: Vec<&str> = snapshot.rejected.keys().map(String::as_str).collect();
        assert_eq!(accepted, vec!["BTC/USDT", "ETH/USDT"]);
        assert_eq!(rejected, vec!["SOL/USDT", "XRP/USDT"]);
        assert!(snapshot.total_exposure() <= 700.0 + 1e-9);
        assert!(snapshot.rejected.values().all(|r| r.contains("exceeds limit")));
    }

    #[tokio::test]
    async fn test_balance_failure_fails_cycle() {
        struct NoBalance;

        #[async_trait]
        impl MarketData for NoBalance {
            async fn snapshot(&self, _symbol: &str) -> SourceResult<PriceSnapshot> {
                unreachable!()
            }
            async fn candles(&self, _symbol: &str, _limit: usize) -> SourceResult<Vec<Candle>> {
                unreachable!()
            }
            async fn order_book(&self, _symbol: &str) -> SourceResult<OrderBook> {
                unreachable!()
            }
            async fn account_balance(&self) -> SourceResult<f64> {
                Err(EngineError::external("exchange", "auth expired"))
            }
        }

        let engine = AnalysisEngine::new(
            config(&["BTC/USDT"]),
            Collaborators::new(Arc::new(NoBalance), Arc::new(MockOnChain::healthy())),
        );

        assert!(matches!(
            engine.run_cycle().await,
            Err(EngineError::ExternalService { .. })
        ));
        assert!(engine.cache().latest().await.completed_at.is_none());
    }
}
