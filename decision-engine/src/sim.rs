//! Paper collaborators for running the engine without live services
//!
//! Prices follow a seeded random walk, one hourly step per snapshot request.

use crate::sources::{
    MarketData, OnChainAnalytics, PriceForecaster, SentimentAnalyst, SourceResult,
};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use common::{
    AiSentiment, BookLevel, Candle, EngineError, MlForecast, OnChainBias, OnChainSignal, OrderBook,
    PriceSnapshot, Sentiment, Symbol,
};
use execution::OrderPlacer;
use rust_decimal::prelude::*;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;
use uuid::Uuid;

const WARMUP_STEPS: usize = 96;
const HOURLY_VOLATILITY: f64 = 0.006;
const MAX_HISTORY: usize = 500;

fn starting_price(symbol: &str) -> f64 {
    match symbol.split('/').next().unwrap_or(symbol) {
        "BTC" => 67_000.0,
        "ETH" => 3_500.0,
        "SOL" => 150.0,
        _ => 100.0,
    }
}

struct WalkState {
    rng: fastrand::Rng,
    history: HashMap<Symbol, Vec<f64>>,
}

impl WalkState {
    fn step(&mut self, symbol: &str) -> f64 {
        if !self.history.contains_key(symbol) {
            let mut closes = vec![starting_price(symbol)];
            for _ in 0..WARMUP_STEPS {
                let next = self.next_price(*closes.last().unwrap_or(&100.0));
                closes.push(next);
            }
            self.history.insert(symbol.to_string(), closes);
        }

        let last = self
            .history
            .get(symbol)
            .and_then(|h| h.last().copied())
            .unwrap_or_else(|| starting_price(symbol));
        let next = self.next_price(last);

        if let Some(history) = self.history.get_mut(symbol) {
            history.push(next);
            if history.len() > MAX_HISTORY {
                history.remove(0);
            }
        }
        next
    }

    /// Symmetric shock, approximately normal (sum of uniforms)
    fn next_price(&mut self, last: f64) -> f64 {
        let shock: f64 = (0..6).map(|_| self.rng.f64()).sum::<f64>() - 3.0;
        (last * (1.0 + shock * HOURLY_VOLATILITY)).max(0.01)
    }
}

/// Simulated exchange: prices, candles, order books and a fixed balance
#[derive(Clone)]
pub struct PaperMarket {
    state: Arc<Mutex<WalkState>>,
    balance: f64,
}

impl PaperMarket {
    pub fn new(seed: u64, balance: f64) -> Self {
        Self {
            state: Arc::new(Mutex::new(WalkState {
                rng: fastrand::Rng::with_seed(seed),
                history: HashMap::new(),
            })),
            balance,
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut WalkState) -> T) -> SourceResult<T> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| EngineError::external("paper-exchange", "price state poisoned"))?;
        Ok(f(&mut state))
    }

    /// Last simulated close, starting the walk if the symbol is new
    pub fn last_price(&self, symbol: &str) -> SourceResult<f64> {
        self.with_state(|state| match state.history.get(symbol).and_then(|h| h.last().copied()) {
            Some(price) => price,
            None => state.step(symbol),
        })
    }
}

#[async_trait]
impl MarketData for PaperMarket {
    async fn snapshot(&self, symbol: &str) -> SourceResult<PriceSnapshot> {
        self.with_state(|state| {
            let price = state.step(symbol);
            let history = state.history.get(symbol).map(Vec::as_slice).unwrap_or(&[]);
            let day = &history[history.len().saturating_sub(25)..];
            let open = day.first().copied().unwrap_or(price);
            let high_24h = day.iter().copied().fold(price, f64::max);
            let low_24h = day.iter().copied().fold(price, f64::min);
            let volume_24h = price * (800.0 + state.rng.f64() * 400.0);

            debug!("Paper snapshot {} @ {:.4}", symbol, price);
            PriceSnapshot {
                price,
                high_24h,
                low_24h,
                change_24h: (price / open - 1.0) * 100.0,
                volume_24h,
            }
        })
    }

    async fn candles(&self, symbol: &str, limit: usize) -> SourceResult<Vec<Candle>> {
        let now = Utc::now();
        self.with_state(|state| {
            if !state.history.contains_key(symbol) {
                state.step(symbol);
            }
            let closes: Vec<f64> = state
                .history
                .get(symbol)
                .map(|h| h[h.len().saturating_sub(limit + 1)..].to_vec())
                .unwrap_or_default();

            let count = closes.len().saturating_sub(1);
            closes
                .windows(2)
                .enumerate()
                .map(|(i, pair)| {
                    let (open, close) = (pair[0], pair[1]);
                    let wick = close * HOURLY_VOLATILITY * state.rng.f64();
                    Candle {
                        open,
                        high: open.max(close) + wick,
                        low: open.min(close) - wick,
                        close,
                        volume: 50.0 + state.rng.f64() * 100.0,
                        timestamp: now - Duration::hours((count - i) as i64),
                    }
                })
                .collect()
        })
    }

    async fn order_book(&self, symbol: &str) -> SourceResult<OrderBook> {
        let mid = self.last_price(symbol)?;
        self.with_state(|state| {
            let tick = mid * 0.0005;
            let bids = (1..=5)
                .map(|i| BookLevel {
                    price: mid - tick * i as f64,
                    size: 1.0 + state.rng.f64() * 4.0,
                })
                .collect();
            let asks = (1..=5)
                .map(|i| BookLevel {
                    price: mid + tick * i as f64,
                    size: 1.0 + state.rng.f64() * 4.0,
                })
                .collect();
            OrderBook { bids, asks }
        })
    }

    async fn account_balance(&self) -> SourceResult<f64> {
        Ok(self.balance)
    }
}

/// On-chain bias drawn from recent drift with some noise
pub struct PaperOnChain {
    market: PaperMarket,
}

impl PaperOnChain {
    pub fn new(market: PaperMarket) -> Self {
        Self { market }
    }
}

#[async_trait]
impl OnChainAnalytics for PaperOnChain {
    async fn composite_signal(&self, symbol: &str) -> SourceResult<OnChainSignal> {
        let (drift, noise) = self.market.with_state(|state| {
            let history = state.history.get(symbol).map(Vec::as_slice).unwrap_or(&[]);
            let recent = &history[history.len().saturating_sub(12)..];
            let drift = match (recent.first(), recent.last()) {
                (Some(first), Some(last)) if *first > 0.0 => last / first - 1.0,
                _ => 0.0,
            };
            (drift, state.rng.f64())
        })?;

        let composite_signal = if noise < 0.05 {
            OnChainBias::RiskOff
        } else if drift > 0.01 {
            OnChainBias::Bullish
        } else if drift < -0.01 {
            OnChainBias::Bearish
        } else {
            OnChainBias::Neutral
        };

        Ok(OnChainSignal {
            composite_signal,
            composite_score: (drift.abs() * 20.0 + noise * 0.3).min(1.0),
        })
    }
}

/// Sentiment follows the average 24h move across the universe
pub struct PaperAnalyst {
    market: PaperMarket,
}

impl PaperAnalyst {
    pub fn new(market: PaperMarket) -> Self {
        Self { market }
    }
}

#[async_trait]
impl SentimentAnalyst for PaperAnalyst {
    async fn market_sentiment(&self, symbols: &[Symbol]) -> SourceResult<AiSentiment> {
        let moves = self.market.with_state(|state| {
            symbols
                .iter()
                .filter_map(|symbol| {
                    let history = state.history.get(symbol)?;
                    let day = &history[history.len().saturating_sub(25)..];
                    Some((symbol.clone(), day.last()? / day.first()? - 1.0))
                })
                .collect::<Vec<_>>()
        })?;

        let average = if moves.is_empty() {
            0.0
        } else {
            moves.iter().map(|(_, m)| m).sum::<f64>() / moves.len() as f64
        };
        let sentiment = if average > 0.02 {
            Sentiment::Bullish
        } else if average < -0.02 {
            Sentiment::Bearish
        } else {
            Sentiment::Neutral
        };

        let key_insights = moves
            .iter()
            .map(|(symbol, m)| format!("{} moved {:+.2}% over 24h", symbol, m * 100.0))
            .collect();

        Ok(AiSentiment {
            sentiment,
            key_insights,
        })
    }
}

/// Naive momentum forecast
pub struct PaperForecaster;

#[async_trait]
impl PriceForecaster for PaperForecaster {
    async fn forecast(&self, symbol: &str, closes: &[f64]) -> SourceResult<MlForecast> {
        let recent = &closes[closes.len().saturating_sub(10)..];
        match (recent.first(), recent.last()) {
            (Some(first), Some(last)) if recent.len() >= 2 && *first > 0.0 => {
                let step = (last / first).powf(1.0 / (recent.len() - 1) as f64);
                Ok(MlForecast {
                    predicted_price: last * step,
                    confidence: 0.5,
                })
            }
            _ => {
                debug!("Not enough closes to forecast {}", symbol);
                Err(EngineError::InsufficientHistory {
                    required: 2,
                    available: closes.len(),
                })
            }
        }
    }
}

/// Order venue that fills every limit order at the paper mid price
pub struct PaperVenue {
    market: PaperMarket,
}

impl PaperVenue {
    pub fn new(market: PaperMarket) -> Self {
        Self { market }
    }
}

#[async_trait]
impl OrderPlacer for PaperVenue {
    async fn place_limit_order(&self, symbol: &str, amount: f64, price: Decimal) -> anyhow::Result<String> {
        let order_id = format!("paper-{}", Uuid::new_v4());
        debug!("Paper order {} {} ${:.2} @ {}", order_id, symbol, amount, price);
        Ok(order_id)
    }

    async fn mid_price(&self, symbol: &str) -> anyhow::Result<Decimal> {
        let price = self.market.last_price(symbol)?;
        Decimal::from_f64(price)
            .map(|d| d.round_dp(8))
            .ok_or_else(|| anyhow::anyhow!("mid price {} not representable", price))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_same_seed_same_walk() {
        let a = PaperMarket::new(7, 1_000.0);
        let b = PaperMarket::new(7, 1_000.0);

        for _ in 0..5 {
            let left = a.snapshot("BTC/USDT").await.unwrap();
            let right = b.snapshot("BTC/USDT").await.unwrap();
            assert_eq!(left.price, right.price);
        }
    }

    #[tokio::test]
    async fn test_snapshot_is_consistent() {
        let market = PaperMarket::new(42, 1_000.0);
        let snapshot = market.snapshot("ETH/USDT").await.unwrap();

        assert!(snapshot.price > 0.0);
        assert!(snapshot.low_24h <= snapshot.price && snapshot.price <= snapshot.high_24h);
        assert_eq!(market.account_balance().await.unwrap(), 1_000.0);
    }

    #[tokio::test]
    async fn test_candles_are_ordered_and_bounded() {
        let market = PaperMarket::new(3, 1_000.0);
        let candles = market.candles("SOL/USDT", 48).await.unwrap();

        assert_eq!(candles.len(), 48);
        for pair in candles.windows(2) {
            assert!(pair[0].timestamp < pair[1].timestamp);
        }
        for candle in &candles {
            assert!(candle.low <= candle.close && candle.close <= candle.high);
        }
    }

    #[tokio::test]
    async fn test_order_book_straddles_mid() {
        let market = PaperMarket::new(11, 1_000.0);
        let mid = market.last_price("BTC/USDT").unwrap();
        let book = market.order_book("BTC/USDT").await.unwrap();

        assert_eq!(book.bids.len(), 5);
        assert!(book.bids.iter().all(|l| l.price < mid));
        assert!(book.asks.iter().all(|l| l.price > mid));
    }

    #[tokio::test]
    async fn test_venue_fills_at_mid() {
        let market = PaperMarket::new(5, 1_000.0);
        let venue = PaperVenue::new(market.clone());

        let price = venue.mid_price("ETH/USDT").await.unwrap();
        assert!(price > Decimal::ZERO);
        let order_id = venue.place_limit_order("ETH/USDT", 25.0, price).await.unwrap();
        assert!(order_id.starts_with("paper-"));
    }

    #[tokio::test]
    async fn test_forecaster_needs_history() {
        assert!(PaperForecaster.forecast("BTC/USDT", &[100.0]).await.is_err());
        let forecast = PaperForecaster.forecast("BTC/USDT", &[100.0, 110.0]).await.unwrap();
        assert!((forecast.predicted_price - 121.0).abs() < 1e-9);
    }
}
