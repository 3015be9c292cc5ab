// Signal Generation Layer
// Tier analysis, aggregation and trade-instruction assembly for one symbol at a time

pub mod aggregator;
pub mod ladder;
pub mod pipeline;
pub mod signals;
pub mod tiers;

pub use aggregator::SignalAggregator;
pub use ladder::PrecisionEntries;
pub use pipeline::{PipelineConfig, PriceLevels, SignalPipeline, SymbolContext};
pub use signals::{
    Action, CompositeSignal, DecisionThresholds, TierEvidence, TierId, TierResult, TierResults,
    TradingSignal,
};
