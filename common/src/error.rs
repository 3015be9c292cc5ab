//! Error taxonomy shared by every layer of the engine

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum EngineError {
    /// Not enough price samples for the requested lookback.
    #[error("insufficient history: need {required} observations, got {available}")]
    InsufficientHistory { required: usize, available: usize },

    /// Entry and stop coincide (or are otherwise unusable), so risk per unit is zero.
    #[error("invalid stop distance: entry {entry}, stop {stop}")]
    InvalidStopDistance { entry: f64, stop: f64 },

    /// The constrained solver did not reach a feasible stationary point.
    #[error("optimization diverged: {reason}")]
    OptimizationDivergence { reason: String },

    /// A collaborator (exchange, analytics, LLM, forecaster) failed.
    #[error("{service} request failed: {message}")]
    ExternalService { service: String, message: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("analysis cycle timed out after {secs}s")]
    CycleTimeout { secs: u64 },
}

impl EngineError {
    pub fn external(service: impl Into<String>, message: impl std::fmt::Display) -> Self {
        EngineError::ExternalService {
            service: service.into(),
            message: message.to_string(),
        }
    }

    pub fn divergence(reason: impl Into<String>) -> Self {
        EngineError::OptimizationDivergence {
            reason: reason.into(),
        }
    }

    /// Failures that only degrade a cycle and never abort it.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EngineError::InsufficientHistory { .. }
                | EngineError::OptimizationDivergence { .. }
                | EngineError::ExternalService { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_external_error_message() {
        let err = EngineError::external("onchain", "HTTP 503");
        assert_eq!(err.to_string(), "onchain request failed: HTTP 503");
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_stop_distance_is_not_recoverable() {
        let err = EngineError::InvalidStopDistance {
            entry: 100.0,
            stop: 100.0,
        };
        assert!(!err.is_recoverable());
    }
}
