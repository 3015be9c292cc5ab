//! Shared vocabulary for the decision engine crates.
//!
//! Everything that crosses a crate boundary lives here: market inputs produced by
//! collaborators (price snapshots, candles, order-book levels, on-chain and AI
//! sentiment), the market regime classification, and the error taxonomy.

mod error;
mod market;

pub use error::{EngineError, Result};
pub use market::{
    AiSentiment, BookLevel, Candle, Direction, MarketRegime, MlForecast, OnChainBias,
    OnChainSignal, OrderBook, PriceSnapshot, Sentiment, Symbol, TradeStats,
};

pub use chrono::{DateTime, Utc};
pub use uuid::Uuid;
