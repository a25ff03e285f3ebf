//! Shared data model for the signal scoring workspace
//!
//! Market inputs, engine signals, calibrated rows, consensus rows and the
//! error taxonomy used by every stage of the pipeline.

pub mod error;
pub mod market;
pub mod signal;

pub use error::{ScoringError, ScoringResult};
pub use market::{BandInputs, MarketSnapshot, Regime, RegimeLabel};
pub use signal::{
    BandScore, CalibratedSignal, ConsensusConflict, ConsensusKey, ConsensusRecord, FailureStage,
    PositionBucket, SignalDirection, SignalKey, SignalResult, SymbolFailure, Timeframe,
};

// Re-exported so downstream crates agree on versions
pub use chrono::{DateTime, NaiveDate, Utc};
pub use uuid::Uuid;
