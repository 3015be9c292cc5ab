//! Decision engine runtime
//!
//! Wires the signal pipeline to its collaborators and runs it in cycles:
//!
//! * [`AnalysisEngine`] analyzes every symbol concurrently under a cycle timeout
//!   and publishes results to a [`SignalCache`] in one swap
//! * [`PortfolioRebalancer`] runs the portfolio optimizer on the blocking pool
//! * [`RateLimitedOnChain`] spaces on-chain queries with a [`MinIntervalGate`]
//! * [`EngineConfig`] layers a TOML file and `ENGINE__*` environment variables
//!
//! The `sim` module provides paper collaborators for running without live services.

pub mod cache;
pub mod config;
pub mod cycle;
pub mod findings;
pub mod gate;
pub mod rebalance;
pub mod sim;
pub mod sources;

pub use cache::{CycleSnapshot, SignalCache};
pub use config::{CycleConfig, EngineConfig, OnChainConfig, RebalanceConfig};
pub use cycle::{AnalysisEngine, SymbolAnalysis};
pub use findings::{MarketRisk, MarketRiskKind, Opportunity, OpportunityKind, Severity};
pub use gate::MinIntervalGate;
pub use rebalance::{PortfolioRebalancer, RebalanceOutcome};
pub use sources::{
    Collaborators, MarketData, OnChainAnalytics, PriceForecaster, RateLimitedOnChain, SentimentAnalyst,
    SourceResult, TradeJournal,
};
