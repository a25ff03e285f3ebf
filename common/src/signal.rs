//! Signal records: raw engine output, calibrated per-engine rows and consensus rows.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Directional call from an engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalDirection {
    Buy,
    Hold,
    Sell,
}

impl SignalDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalDirection::Buy => "BUY",
            SignalDirection::Hold => "HOLD",
            SignalDirection::Sell => "SELL",
        }
    }
}

impl fmt::Display for SignalDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Holding horizon the engine targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Timeframe {
    Swing,
    Position,
    Day,
}

/// Raw output of a signal engine for one symbol on one day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalResult {
    pub symbol: String,
    pub engine_name: String,
    pub timeframe: Timeframe,
    pub signal: SignalDirection,
    pub confidence: f64, // 0.0 to 1.0
    pub position_size_pct: f64,
    pub entry_price_range: Option<(Decimal, Decimal)>,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Vec<Decimal>>,
    #[serde(default)]
    pub reasoning: Vec<String>,
    /// Engine-specific payload, passed through untouched.
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub generated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SignalResult {
    /// A signal stops counting once `now` passes its expiry.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Volatility-band context for a symbol/day. Every field lies in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandScore {
    /// %B: 0 at the lower band, 1 at the upper band
    pub position_pct: f64,
    pub position_score: f64,
    pub width_percentile: f64,
    pub width_score: f64,
    pub expansion_score: f64,
    pub composite_score: f64,
}

/// Discrete position-sizing outcome derived from the quality score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionBucket {
    Full,
    Reduced,
    Minimal,
    Reject,
}

impl PositionBucket {
    pub fn multiplier(&self) -> f64 {
        match self {
            PositionBucket::Full => 1.0,
            PositionBucket::Reduced => 0.7,
            PositionBucket::Minimal => 0.3,
            PositionBucket::Reject => 0.0,
        }
    }
}

/// Engine signal after band calibration and quality sizing.
/// One row per (symbol, as_of, engine_name).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibratedSignal {
    pub as_of: NaiveDate,
    #[serde(flatten)]
    pub result: SignalResult,
    pub band_score: BandScore,
    pub original_confidence: f64,
    pub calibrated_confidence: f64,
    pub quality_score: f64,
    pub bucket: PositionBucket,
    pub position_multiplier: f64,
}

impl CalibratedSignal {
    pub fn key(&self) -> SignalKey {
        SignalKey {
            symbol: self.result.symbol.clone(),
            as_of: self.as_of,
            engine_name: self.result.engine_name.clone(),
        }
    }

    pub fn engine_name(&self) -> &str {
        &self.result.engine_name
    }

    pub fn direction(&self) -> SignalDirection {
        self.result.signal
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.result.is_expired(now)
    }

    /// Engine-suggested size scaled by the quality bucket
    pub fn adjusted_position_size_pct(&self) -> f64 {
        self.result.position_size_pct * self.position_multiplier
    }
}

/// Two engines disagreeing on direction with meaningful confidence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusConflict {
    pub engine_a: String,
    pub engine_b: String,
    pub signal_a: SignalDirection,
    pub signal_b: SignalDirection,
}

/// Reconciled view of all engines for one symbol/day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusRecord {
    pub symbol: String,
    pub as_of: NaiveDate,
    pub consensus_signal: SignalDirection,
    pub consensus_confidence: f64,
    pub recommended_engine: String,
    pub conflicts: Vec<ConsensusConflict>,
    pub contributing_engines: Vec<String>,
}

impl ConsensusRecord {
    pub fn key(&self) -> ConsensusKey {
        ConsensusKey {
            symbol: self.symbol.clone(),
            as_of: self.as_of,
        }
    }

    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }
}

/// Storage key for per-engine rows
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SignalKey {
    pub symbol: String,
    pub as_of: NaiveDate,
    pub engine_name: String,
}

impl fmt::Display for SignalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.symbol, self.as_of, self.engine_name)
    }
}

/// Storage key for consensus rows and failure markers
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConsensusKey {
    pub symbol: String,
    pub as_of: NaiveDate,
}

impl ConsensusKey {
    pub fn new(symbol: impl Into<String>, as_of: NaiveDate) -> Self {
        Self {
            symbol: symbol.into(),
            as_of,
        }
    }
}

impl fmt::Display for ConsensusKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.symbol, self.as_of)
    }
}

/// Pipeline stage at which a symbol failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Input,
    BandScoring,
    Consensus,
    Persistence,
    Timeout,
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureStage::Input => "input",
            FailureStage::BandScoring => "band_scoring",
            FailureStage::Consensus => "consensus",
            FailureStage::Persistence => "persistence",
            FailureStage::Timeout => "timeout",
        };
        f.write_str(s)
    }
}

/// Failed-row marker written to the sink when a symbol could not be scored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolFailure {
    pub symbol: String,
    pub as_of: NaiveDate,
    pub run_id: Uuid,
    pub stage: FailureStage,
    pub reason: String,
    pub recorded_at: DateTime<Utc>,
}

impl SymbolFailure {
    pub fn key(&self) -> ConsensusKey {
        ConsensusKey::new(self.symbol.clone(), self.as_of)
    }
}
