// Signal Aggregator
// Blends tier scores and the AI sentiment label into one composite score

use super::signals::{CompositeSignal, TierResults};
use chrono::{DateTime, Utc};
use common::Sentiment;
use tracing::debug;

/// Score used when there is no evidence at all
const NEUTRAL_SCORE: f64 = 50.0;

/// Confidence contributed by the presence of AI sentiment
const SENTIMENT_CONFIDENCE_BONUS: f64 = 0.1;

#[derive(Debug, Clone, Default)]
pub struct SignalAggregator;

impl SignalAggregator {
    pub fn new() -> Self {
        Self
    }

    /// Combine the present tiers and optional sentiment.
    ///
    /// `enhanced_score` is the mean of the present tier scores plus the
    /// sentiment pseudo-score; `confidence` is `tiers / 4`, plus 0.1 with
    /// sentiment, capped at 1.0.
    pub fn aggregate(
        &self,
        symbol: &str,
        tiers: &TierResults,
        ai_sentiment: Option<Sentiment>,
        timestamp: DateTime<Utc>,
    ) -> CompositeSignal {
        let tier_scores = tiers.present().map(|r| (r.tier(), r.score())).collect();

        let mut scores: Vec<f64> = tiers.present().map(|r| r.score()).collect();
        if let Some(sentiment) = ai_sentiment {
            scores.push(sentiment.pseudo_score());
        }

        let enhanced_score = if scores.is_empty() {
            NEUTRAL_SCORE
        } else {
            (scores.iter().sum::<f64>() / scores.len() as f64).clamp(0.0, 100.0)
        };

        let mut confidence = tiers.count() as f64 / 4.0;
        if ai_sentiment.is_some() {
            confidence += SENTIMENT_CONFIDENCE_BONUS;
        }
        let confidence = confidence.min(1.0);

        debug!(
            "Aggregated {}: score {:.2}, confidence {:.2} from {} tiers",
            symbol,
            enhanced_score,
            confidence,
            tiers.count()
        );

        CompositeSignal {
            symbol: symbol.to_string(),
            tier_scores,
            enhanced_score,
            confidence,
            ai_sentiment,
            timestamp,
        }
    }
}
