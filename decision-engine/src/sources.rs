//! Collaborator interfaces the engine consumes
//!
//! Market data, on-chain analytics, AI sentiment, ML forecasts and the trade
//! journal all live behind async traits. Failures surface as `EngineError`
//! (normally `ExternalService`); the cycle treats a failed source as absent.

use crate::gate::MinIntervalGate;
use async_trait::async_trait;
use common::{
    AiSentiment, Candle, EngineError, MlForecast, OnChainSignal, OrderBook, PriceSnapshot, Symbol,
    TradeStats,
};
use std::sync::Arc;
use std::time::Duration;

pub type SourceResult<T> = Result<T, EngineError>;

/// Exchange-facing market data
#[async_trait]
pub trait MarketData: Send + Sync {
    async fn snapshot(&self, symbol: &str) -> SourceResult<PriceSnapshot>;

    /// Most recent `limit` candles, oldest first
    async fn candles(&self, symbol: &str, limit: usize) -> SourceResult<Vec<Candle>>;

    async fn order_book(&self, symbol: &str) -> SourceResult<OrderBook>;

    /// Free quote-currency balance used for sizing
    async fn account_balance(&self) -> SourceResult<f64>;
}

#[async_trait]
pub trait OnChainAnalytics: Send + Sync {
    async fn composite_signal(&self, symbol: &str) -> SourceResult<OnChainSignal>;
}

/// Market-wide AI sentiment, queried once per cycle
#[async_trait]
pub trait SentimentAnalyst: Send + Sync {
    async fn market_sentiment(&self, symbols: &[Symbol]) -> SourceResult<AiSentiment>;
}

#[async_trait]
pub trait PriceForecaster: Send + Sync {
    async fn forecast(&self, symbol: &str, closes: &[f64]) -> SourceResult<MlForecast>;
}

/// Historical trade outcomes for Kelly sizing
#[async_trait]
pub trait TradeJournal: Send + Sync {
    async fn stats(&self, symbol: &str) -> SourceResult<Option<TradeStats>>;
}

/// Wraps an on-chain collaborator so successive queries honor a minimum interval
pub struct RateLimitedOnChain<T> {
    inner: T,
    gate: MinIntervalGate,
}

impl<T: OnChainAnalytics> RateLimitedOnChain<T> {
    pub fn new(inner: T, min_interval: Duration) -> Self {
        Self {
            inner,
            gate: MinIntervalGate::new(min_interval),
        }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }
}

#[async_trait]
impl<T: OnChainAnalytics> OnChainAnalytics for RateLimitedOnChain<T> {
    async fn composite_signal(&self, symbol: &str) -> SourceResult<OnChainSignal> {
        self.gate.wait().await;
        self.inner.composite_signal(symbol).await
    }
}

/// The full set of collaborators handed to the analysis engine
#[derive(Clone)]
pub struct Collaborators {
    pub market: Arc<dyn MarketData>,
    pub onchain: Arc<dyn OnChainAnalytics>,
    pub sentiment: Option<Arc<dyn SentimentAnalyst>>,
    pub forecaster: Option<Arc<dyn PriceForecaster>>,
    pub journal: Option<Arc<dyn TradeJournal>>,
}

impl Collaborators {
    pub fn new(market: Arc<dyn MarketData>, onchain: Arc<dyn OnChainAnalytics>) -> Self {
        Self {
            market,
            onchain,
            sentiment: None,
            forecaster: None,
            journal: None,
        }
    }

    pub fn with_sentiment(mut self, sentiment: Arc<dyn SentimentAnalyst>) -> Self {
        self.sentiment = Some(sentiment);
        self
    }

    pub fn with_forecaster(mut self, forecaster: Arc<dyn PriceForecaster>) -> Self {
        self.forecaster = Some(forecaster);
        self
    }

    pub fn with_journal(mut self, journal: Arc<dyn TradeJournal>) -> Self {
        self.journal = Some(journal);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::OnChainBias;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;

    struct CountingOnChain {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl OnChainAnalytics for CountingOnChain {
        async fn composite_signal(&self, _symbol: &str) -> SourceResult<OnChainSignal> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(OnChainSignal {
                composite_signal: OnChainBias::Neutral,
                composite_score: 0.5,
            })
        }
    }

    #[tokio::test]
    async fn test_rate_limited_onchain_spaces_queries() {
        let limited = RateLimitedOnChain::new(
            CountingOnChain { calls: AtomicUsize::new(0) },
            Duration::from_millis(25),
        );

        let started = Instant::now();
        for symbol in ["BTC/USDT", "ETH/USDT", "SOL/USDT"] {
            let signal = limited.composite_signal(symbol).await.unwrap();
            assert_eq!(signal.composite_signal, OnChainBias::Neutral);
        }

        assert_eq!(limited.inner().calls.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() >= Duration::from_millis(50));
    }
}
