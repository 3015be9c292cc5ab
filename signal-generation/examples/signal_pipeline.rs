// Example: Four-tier signal generation for a single symbol
// Builds tier results from sample data and runs them through the pipeline

use chrono::{Duration, Utc};
use common::{AiSentiment, BookLevel, Candle, OnChainBias, OnChainSignal, OrderBook, PriceSnapshot, Sentiment};
use execution::{TwapConfig, TwapScheduler};
use portfolio_risk::{DynamicRiskManager, RiskConfig};
use signal_generation::{tiers, PipelineConfig, SignalPipeline, SymbolContext, TierResults};

fn main() -> anyhow::Result<()> {
    println!("=== Signal Generation - Four Tier Example ===\n");

    let now = Utc::now();
    let snapshot = PriceSnapshot {
        price: 67_450.0,
        high_24h: 67_900.0,
        low_24h: 64_800.0,
        change_24h: 3.8,
        volume_24h: 1_250_000_000.0,
    };

    // Hourly candles drifting upward
    let candles: Vec<Candle> = (0..48)
        .map(|i| {
            let close = 64_900.0 + i as f64 * 55.0;
            Candle {
                open: close - 40.0,
                high: close + 60.0,
                low: close - 80.0,
                close,
                volume: 100.0 + (i % 7) as f64 * 15.0,
                timestamp: now - Duration::hours(48 - i),
            }
        })
        .collect();
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();

    let book = OrderBook {
        bids: (0..5)
            .map(|i| BookLevel { price: 67_440.0 - i as f64 * 5.0, size: 2.0 + i as f64 })
            .collect(),
        asks: (0..5)
            .map(|i| BookLevel { price: 67_460.0 + i as f64 * 5.0, size: 1.0 + i as f64 * 0.5 })
            .collect(),
    };
    let onchain = OnChainSignal {
        composite_signal: OnChainBias::Bullish,
        composite_score: 0.6,
    };

    let mut results = TierResults::new().with(tiers::market_structure(&snapshot)).with(tiers::on_chain(&onchain));
    if let Some(result) = tiers::order_book(&book) {
        results.insert(result);
    }
    if let Some(result) = tiers::volume_profile(&candles, snapshot.price) {
        results.insert(result);
    }

    for result in results.present() {
        println!("  {:?}: {:.1}", result.tier(), result.score());
    }
    println!();

    let pipeline = SignalPipeline::new(
        PipelineConfig::default(),
        DynamicRiskManager::new(RiskConfig::default()),
        TwapScheduler::new(TwapConfig::default()),
    );

    let ctx = SymbolContext {
        symbol: "BTC/USDT".to_string(),
        snapshot,
        closes,
        tiers: results,
        ai_sentiment: Some(AiSentiment {
            sentiment: Sentiment::Bullish,
            key_insights: vec!["Spot ETF inflows accelerating".to_string()],
        }),
        onchain: Some(onchain),
        ml_forecast: None,
        trade_stats: None,
        balance: 5_000.0,
        at: now,
    };

    let composite = pipeline.composite(&ctx);
    println!("Composite score {:.1}, confidence {:.2}\n", composite.enhanced_score, composite.confidence);

    match pipeline.build(&ctx)? {
        Some(signal) => {
            println!("{}", serde_json::to_string_pretty(&signal)?);
        }
        None => println!("HOLD - no signal"),
    }

    Ok(())
}
