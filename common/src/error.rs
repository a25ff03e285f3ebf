//! Error taxonomy for the scoring pipeline
//!
//! Every variant is scoped to a single symbol or a single engine; none of
//! them aborts a batch run.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScoringError {
    /// Missing or malformed price/band data. The symbol is skipped.
    #[error("Invalid market snapshot for {symbol}: {reason}")]
    InvalidMarketSnapshot { symbol: String, reason: String },

    /// Engine reported a confidence outside [0, 1]. Only that signal is rejected.
    #[error("Engine {engine} returned confidence {confidence} outside [0, 1]")]
    InvalidConfidence { engine: String, confidence: f64 },

    #[error("Engine {engine} returned an invalid signal: {reason}")]
    InvalidSignal { engine: String, reason: String },

    /// Engine did not answer within its budget and is treated as non-contributing.
    #[error("Engine {engine} timed out after {budget_ms}ms")]
    EngineTimeout { engine: String, budget_ms: u64 },

    #[error("Engine {engine} failed: {message}")]
    EngineFailure { engine: String, message: String },

    /// Sink write failed after all retries.
    #[error("Persistence of {key} failed after {attempts} attempts: {message}")]
    PersistenceFailure {
        key: String,
        attempts: u32,
        message: String,
    },

    #[error("Scoring {symbol} exceeded {budget_ms}ms")]
    SymbolTimeout { symbol: String, budget_ms: u64 },

    #[error("Consensus for {symbol} is already resolved")]
    AlreadyResolved { symbol: String },
}

pub type ScoringResult<T> = std::result::Result<T, ScoringError>;
