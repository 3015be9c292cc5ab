// Tier Analyzers
// Turn raw collaborator data into 0-100 tier scores

use super::signals::{TierEvidence, TierResult};
use common::{Candle, OnChainBias, OnChainSignal, OrderBook, PriceSnapshot, Sentiment};
use tracing::debug;

/// 24h move (percent) beyond which the trend counts as directional
const TREND_THRESHOLD_PCT: f64 = 3.0;

/// Book levels per side used for the imbalance
const BOOK_DEPTH: usize = 5;

const PROFILE_BINS: usize = 20;
const VALUE_AREA_SHARE: f64 = 0.70;

/// Market structure from the 24h ticker: momentum plus position inside the range
pub fn market_structure(snapshot: &PriceSnapshot) -> TierResult {
    let trend_bias = if snapshot.change_24h > TREND_THRESHOLD_PCT {
        Sentiment::Bullish
    } else if snapshot.change_24h < -TREND_THRESHOLD_PCT {
        Sentiment::Bearish
    } else {
        Sentiment::Neutral
    };

    let range_position = snapshot.range_position();
    let momentum = (snapshot.change_24h * 5.0).clamp(-30.0, 30.0);
    let score = 50.0 + momentum + (range_position - 0.5) * 40.0;

    TierResult::new(
        score,
        TierEvidence::MarketStructure {
            trend_bias,
            change_24h: snapshot.change_24h,
            range_position,
        },
    )
}

/// Liquidity imbalance over the top of the book.
///
/// Returns `None` when either side is empty or there is no volume.
pub fn order_book(book: &OrderBook) -> Option<TierResult> {
    let best_bid = book.bids.first()?;
    let best_ask = book.asks.first()?;

    let bid_volume: f64 = book.bids.iter().take(BOOK_DEPTH).map(|l| l.size).sum();
    let ask_volume: f64 = book.asks.iter().take(BOOK_DEPTH).map(|l| l.size).sum();
    let total = bid_volume + ask_volume;
    if !(total.is_finite() && total > 0.0) {
        return None;
    }

    let imbalance = (bid_volume - ask_volume) / total;
    debug!("Order book imbalance {:.3} ({} bid / {} ask)", imbalance, bid_volume, ask_volume);

    Some(TierResult::new(
        50.0 + 50.0 * imbalance,
        TierEvidence::OrderBook {
            imbalance,
            bid_volume,
            ask_volume,
            support: best_bid.price,
            resistance: best_ask.price,
        },
    ))
}

/// Volume-at-price profile of recent candles scored against the current price
pub fn volume_profile(candles: &[Candle], price: f64) -> Option<TierResult> {
    let low = candles.iter().map(|c| c.low).fold(f64::INFINITY, f64::min);
    let high = candles.iter().map(|c| c.high).fold(f64::NEG_INFINITY, f64::max);
    if !(low.is_finite() && high.is_finite()) || high <= low {
        return None;
    }

    let width = (high - low) / PROFILE_BINS as f64;
    let mut bins = [0.0_f64; PROFILE_BINS];
    for candle in candles {
        let index = ((candle.typical_price() - low) / width).floor();
        let index = (index.max(0.0) as usize).min(PROFILE_BINS - 1);
        bins[index] += candle.volume.max(0.0);
    }

    let total: f64 = bins.iter().sum();
    if total <= 0.0 {
        return None;
    }

    // Heaviest bins first; ties keep the lower price first
    let mut ranked: Vec<usize> = (0..PROFILE_BINS).collect();
    ranked.sort_by(|a, b| bins[*b].partial_cmp(&bins[*a]).unwrap_or(std::cmp::Ordering::Equal));

    let mut cumulative = 0.0;
    let mut lowest = PROFILE_BINS;
    let mut highest = 0;
    for &index in &ranked {
        cumulative += bins[index];
        lowest = lowest.min(index);
        highest = highest.max(index);
        if cumulative >= total * VALUE_AREA_SHARE {
            break;
        }
    }

    let point_of_control = low + (ranked[0] as f64 + 0.5) * width;
    let value_area_low = low + lowest as f64 * width;
    let value_area_high = low + (highest + 1) as f64 * width;

    let score = if price > value_area_high {
        70.0
    } else if price < value_area_low {
        30.0
    } else {
        (50.0 + 20.0 * (price - point_of_control) / (value_area_high - value_area_low)).clamp(30.0, 70.0)
    };

    Some(TierResult::new(
        score,
        TierEvidence::VolumeProfile {
            point_of_control,
            value_area_high,
            value_area_low,
        },
    ))
}

/// On-chain composite bias scaled by its strength
pub fn on_chain(signal: &OnChainSignal) -> TierResult {
    let strength = signal.composite_score.clamp(0.0, 1.0);
    let score = match signal.composite_signal {
        OnChainBias::Bullish => 50.0 + 50.0 * strength,
        OnChainBias::Bearish => 50.0 - 50.0 * strength,
        OnChainBias::Neutral => 50.0,
        OnChainBias::RiskOff => 25.0 - 25.0 * strength,
    };

    TierResult::new(
        score,
        TierEvidence::OnChain {
            bias: signal.composite_signal,
            strength,
        },
    )
}
