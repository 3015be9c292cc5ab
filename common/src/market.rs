//! Market inputs consumed from collaborators, one set per symbol per cycle

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Trading pair identifier, e.g. `BTC/USDT`
pub type Symbol = String;

/// Side of a directional trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Long,
    Short,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Long => write!(f, "LONG"),
            Direction::Short => write!(f, "SHORT"),
        }
    }
}

/// Label produced by the LLM market narrative
///
/// Deserializes through [`FromStr`], so labels are case-insensitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub enum Sentiment {
    Bullish,
    Bearish,
    Neutral,
}

impl Sentiment {
    /// Pseudo tier score blended into the composite score
    pub fn pseudo_score(&self) -> f64 {
        match self {
            Sentiment::Bullish => 75.0,
            Sentiment::Neutral => 50.0,
            Sentiment::Bearish => 25.0,
        }
    }
}

impl FromStr for Sentiment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bullish" => Ok(Sentiment::Bullish),
            "bearish" => Ok(Sentiment::Bearish),
            "neutral" => Ok(Sentiment::Neutral),
            other => Err(format!("unknown sentiment label '{}'", other)),
        }
    }
}

impl TryFrom<String> for Sentiment {
    type Error = String;

    fn try_from(label: String) -> Result<Self, Self::Error> {
        label.parse()
    }
}

/// AI sentiment with the insights that justified it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiSentiment {
    pub sentiment: Sentiment,
    pub key_insights: Vec<String>,
}

/// Composite label from the on-chain analytics service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OnChainBias {
    Bullish,
    Bearish,
    Neutral,
    RiskOff,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OnChainSignal {
    pub composite_signal: OnChainBias,
    /// Strength of the composite signal, 0.0 to 1.0
    pub composite_score: f64,
}

/// 24h ticker snapshot for one symbol
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceSnapshot {
    pub price: f64,
    pub high_24h: f64,
    pub low_24h: f64,
    /// 24h change in percent (3.0 = +3%)
    pub change_24h: f64,
    pub volume_24h: f64,
}

impl PriceSnapshot {
    /// 24h high-low range as a percentage of the current price
    pub fn range_pct(&self) -> f64 {
        if self.price <= 0.0 {
            return 0.0;
        }
        (self.high_24h - self.low_24h).max(0.0) / self.price * 100.0
    }

    /// Position of the price inside the 24h range (0.0 = at the low, 1.0 = at the high)
    pub fn range_position(&self) -> f64 {
        let range = self.high_24h - self.low_24h;
        if range <= 0.0 {
            return 0.5;
        }
        ((self.price - self.low_24h) / range).clamp(0.0, 1.0)
    }
}

/// OHLCV bar
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub timestamp: DateTime<Utc>,
}

impl Candle {
    pub fn typical_price(&self) -> f64 {
        (self.high + self.low + self.close) / 3.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: f64,
    pub size: f64,
}

/// Order-book depth, bids best-first (descending), asks best-first (ascending)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderBook {
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
}

/// Opaque price forecast from the ML model
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MlForecast {
    pub predicted_price: f64,
    pub confidence: f64,
}

/// Historical trade outcomes used for Kelly sizing
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TradeStats {
    pub win_rate: f64,
    pub avg_win: f64,
    /// Average losing trade as a positive value
    pub avg_loss: f64,
}

/// Coarse volatility classification scaling risk appetite
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum MarketRegime {
    #[default]
    Normal,
    Volatile,
    Extreme,
}

impl MarketRegime {
    /// 24h range (percent of price) at which the market counts as volatile
    pub const VOLATILE_RANGE_PCT: f64 = 8.0;
    /// 24h range (percent of price) at which the market counts as extreme
    pub const EXTREME_RANGE_PCT: f64 = 16.0;

    pub fn size_multiplier(&self) -> f64 {
        match self {
            MarketRegime::Normal => 1.0,
            MarketRegime::Volatile => 0.7,
            MarketRegime::Extreme => 0.5,
        }
    }

    pub fn classify(snapshot: &PriceSnapshot) -> Self {
        let range = snapshot.range_pct();
        if range >= Self::EXTREME_RANGE_PCT {
            MarketRegime::Extreme
        } else if range >= Self::VOLATILE_RANGE_PCT {
            MarketRegime::Volatile
        } else {
            MarketRegime::Normal
        }
    }

    /// Parse a regime label; anything unrecognized is treated as normal
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "volatile" => MarketRegime::Volatile,
            "extreme" => MarketRegime::Extreme,
            _ => MarketRegime::Normal,
        }
    }
}

impl From<String> for MarketRegime {
    fn from(label: String) -> Self {
        MarketRegime::from_label(&label)
    }
}

impl fmt::Display for MarketRegime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarketRegime::Normal => write!(f, "normal"),
            MarketRegime::Volatile => write!(f, "volatile"),
            MarketRegime::Extreme => write!(f, "extreme"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(price: f64, high: f64, low: f64) -> PriceSnapshot {
        PriceSnapshot {
            price,
            high_24h: high,
            low_24h: low,
            change_24h: 0.0,
            volume_24h: 1_000.0,
        }
    }

    #[test]
    fn test_sentiment_parsing() {
        assert_eq!("Bullish".parse::<Sentiment>().unwrap(), Sentiment::Bullish);
        assert_eq!(" bearish ".parse::<Sentiment>().unwrap(), Sentiment::Bearish);
        assert!("moon".parse::<Sentiment>().is_err());
        assert_eq!(Sentiment::Neutral.pseudo_score(), 50.0);
    }

    #[test]
    fn test_regime_classification() {
        assert_eq!(MarketRegime::classify(&snapshot(100.0, 102.0, 98.0)), MarketRegime::Normal);
        assert_eq!(MarketRegime::classify(&snapshot(100.0, 105.0, 95.0)), MarketRegime::Volatile);
        assert_eq!(MarketRegime::classify(&snapshot(100.0, 110.0, 90.0)), MarketRegime::Extreme);
    }

    #[test]
    fn test_regime_labels() {
        assert_eq!(MarketRegime::from_label("VOLATILE"), MarketRegime::Volatile);
        assert_eq!(MarketRegime::from_label("sideways"), MarketRegime::Normal);
        assert_eq!(MarketRegime::Extreme.size_multiplier(), 0.5);
    }

    #[test]
    fn test_labels_deserialize_case_insensitively() {
        let sentiment: AiSentiment =
            serde_json::from_str(r#"{"sentiment":"BEARISH","key_insights":[]}"#).unwrap();
        assert_eq!(sentiment.sentiment, Sentiment::Bearish);
        assert!(serde_json::from_str::<Sentiment>("\"moon\"").is_err());

        let json = serde_json::to_string(&Sentiment::Bullish).unwrap();
        assert_eq!(serde_json::from_str::<Sentiment>(&json).unwrap(), Sentiment::Bullish);

        assert_eq!(serde_json::from_str::<MarketRegime>("\"Extreme\"").unwrap(), MarketRegime::Extreme);
        assert_eq!(serde_json::from_str::<MarketRegime>("\"choppy\"").unwrap(), MarketRegime::Normal);
        assert_eq!(serde_json::to_string(&MarketRegime::Volatile).unwrap(), "\"volatile\"");
    }

    #[test]
    fn test_range_position() {
        assert_eq!(snapshot(100.0, 110.0, 90.0).range_position(), 0.5);
        assert_eq!(snapshot(100.0, 100.0, 100.0).range_position(), 0.5);
        assert_eq!(snapshot(110.0, 110.0, 90.0).range_position(), 1.0);
    }

    #[test]
    fn test_onchain_serde_labels() {
        let json = serde_json::to_string(&OnChainBias::RiskOff).unwrap();
        assert_eq!(json, "\"RISK_OFF\"");

        let signal: OnChainSignal =
            serde_json::from_str(r#"{"composite_signal":"BULLISH","composite_score":0.4}"#).unwrap();
        assert_eq!(signal.composite_signal, OnChainBias::Bullish);
    }
}
