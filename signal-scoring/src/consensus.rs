// Consensus Aggregation
// Reconciles same-day calibrated signals from several engines into one record

use chrono::{DateTime, Duration, NaiveDate, Utc};
use common::{
    CalibratedSignal, ConsensusConflict, ConsensusKey, ConsensusRecord, ScoringError,
    ScoringResult, SignalDirection,
};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::config::ConsensusConfig;

/// Tolerance for comparing confidence sums
const EPSILON: f64 = 1e-9;

#[derive(Debug, Default)]
struct VoteGroup {
    weight: f64,
    count: usize,
    strongest: f64,
}

/// Final tie-break once weights and strongest members are equal:
/// the more conservative call wins.
fn caution_rank(direction: SignalDirection) -> u8 {
    match direction {
        SignalDirection::Hold => 2,
        SignalDirection::Sell => 1,
        SignalDirection::Buy => 0,
    }
}

fn beats(candidate: (SignalDirection, &VoteGroup), best: (SignalDirection, &VoteGroup)) -> bool {
    let (dir, group) = candidate;
    let (best_dir, best_group) = best;

    if (group.weight - best_group.weight).abs() > EPSILON {
        return group.weight > best_group.weight;
    }
    if (group.strongest - best_group.strongest).abs() > EPSILON {
        return group.strongest > best_group.strongest;
    }
    caution_rank(dir) > caution_rank(best_dir)
}

/// Resolve consensus for one (symbol, date) from the signals at hand.
///
/// Expired signals are ignored and a later signal from the same engine
/// replaces an earlier one. Returns `None` when nothing is left: no
/// consensus is not the same as HOLD.
pub fn resolve_consensus(
    symbol: &str,
    as_of: NaiveDate,
    signals: &[CalibratedSignal],
    now: DateTime<Utc>,
    config: &ConsensusConfig,
) -> Option<ConsensusRecord> {
    let mut by_engine: BTreeMap<&str, &CalibratedSignal> = BTreeMap::new();
    for signal in signals.iter().filter(|s| !s.is_expired(now)) {
        by_engine.insert(signal.engine_name(), signal);
    }

    if by_engine.is_empty() {
        debug!("No live signals for {} on {}, no consensus", symbol, as_of);
        return None;
    }

    let contributors: Vec<&CalibratedSignal> = by_engine.values().copied().collect();

    let mut groups: BTreeMap<SignalDirection, VoteGroup> = BTreeMap::new();
    for signal in &contributors {
        let group = groups.entry(signal.direction()).or_default();
        group.weight += signal.calibrated_confidence;
        group.count += 1;
        group.strongest = group.strongest.max(signal.calibrated_confidence);
    }

    let mut winner: Option<(SignalDirection, &VoteGroup)> = None;
    for (dir, group) in &groups {
        winner = match winner {
            Some(best) if !beats((*dir, group), best) => Some(best),
            _ => Some((*dir, group)),
        };
    }
    let (consensus_signal, winning_group) = winner?;
    let consensus_confidence = winning_group.weight / winning_group.count as f64;

    let mut recommended = contributors[0];
    for signal in &contributors[1..] {
        let better_quality = signal.quality_score > recommended.quality_score + EPSILON;
        let same_quality = (signal.quality_score - recommended.quality_score).abs() <= EPSILON;
        if better_quality
            || (same_quality && signal.calibrated_confidence > recommended.calibrated_confidence + EPSILON)
        {
            recommended = signal;
        }
    }

    let threshold = config.conflict_confidence_threshold;
    let mut conflicts = Vec::new();
    for (i, a) in contributors.iter().enumerate() {
        for b in &contributors[i + 1..] {
            if a.direction() != b.direction()
                && a.calibrated_confidence >= threshold
                && b.calibrated_confidence >= threshold
            {
                conflicts.push(ConsensusConflict {
                    engine_a: a.engine_name().to_string(),
                    engine_b: b.engine_name().to_string(),
                    signal_a: a.direction(),
                    signal_b: b.direction(),
                });
            }
        }
    }

    Some(ConsensusRecord {
        symbol: symbol.to_string(),
        as_of,
        consensus_signal,
        consensus_confidence,
        recommended_engine: recommended.engine_name().to_string(),
        conflicts,
        contributing_engines: contributors
            .iter()
            .map(|s| s.engine_name().to_string())
            .collect(),
    })
}

/// Lifecycle of a consensus collector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorState {
    Collecting,
    Resolved,
}

/// Collects calibrated signals for one (symbol, date) until every expected
/// engine has reported or the collection window closes.
#[derive(Debug, Clone)]
pub struct ConsensusCollector {
    key: ConsensusKey,
    expected: BTreeSet<String>,
    signals: BTreeMap<String, CalibratedSignal>,
    opened_at: DateTime<Utc>,
    config: ConsensusConfig,
    state: CollectorState,
}

impl ConsensusCollector {
    pub fn new<I, S>(key: ConsensusKey, expected: I, opened_at: DateTime<Utc>, config: ConsensusConfig) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            key,
            expected: expected.into_iter().map(Into::into).collect(),
            signals: BTreeMap::new(),
            opened_at,
            config,
            state: CollectorState::Collecting,
        }
    }

    pub fn key(&self) -> &ConsensusKey {
        &self.key
    }

    pub fn state(&self) -> CollectorState {
        self.state
    }

    /// Add a signal. Returns `false` when it was ignored because it had
    /// already expired. A repeat from the same engine replaces the earlier one.
    pub fn add(&mut self, signal: CalibratedSignal, now: DateTime<Utc>) -> ScoringResult<bool> {
        if self.state == CollectorState::Resolved {
            return Err(ScoringError::AlreadyResolved {
                symbol: self.key.symbol.clone(),
            });
        }

        if signal.result.symbol != self.key.symbol || signal.as_of != self.key.as_of {
            return Err(ScoringError::InvalidSignal {
                engine: signal.engine_name().to_string(),
                reason: format!("signal for {} does not belong to {}", signal.key(), self.key),
            });
        }

        if signal.is_expired(now) {
            debug!(
                "Ignoring expired signal from {} for {}",
                signal.engine_name(),
                self.key
            );
            return Ok(false);
        }

        self.signals.insert(signal.engine_name().to_string(), signal);
        Ok(true)
    }

    /// Engines that have reported so far
    pub fn reported(&self) -> Vec<String> {
        self.signals.keys().cloned().collect()
    }

    /// Expected engines that have not reported
    pub fn missing(&self) -> Vec<String> {
        self.expected
            .iter()
            .filter(|engine| !self.signals.contains_key(*engine))
            .cloned()
            .collect()
    }

    pub fn deadline(&self) -> DateTime<Utc> {
        self.opened_at + Duration::seconds(self.config.collection_timeout_secs as i64)
    }

    /// All expected engines reported, or the collection window closed.
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.missing().is_empty() || now >= self.deadline()
    }

    /// Resolve with whatever live signals are present. Missing engines do
    /// not block resolution.
    pub fn resolve(&mut self, now: DateTime<Utc>) -> ScoringResult<Option<ConsensusRecord>> {
        if self.state == CollectorState::Resolved {
            return Err(ScoringError::AlreadyResolved {
                symbol: self.key.symbol.clone(),
            });
        }
        self.state = CollectorState::Resolved;

        let missing = self.missing();
        if !missing.is_empty() {
            debug!("Resolving {} without engines: {:?}", self.key, missing);
        }

        let signals: Vec<CalibratedSignal> = self.signals.values().cloned().collect();
        Ok(resolve_consensus(
            &self.key.symbol,
            self.key.as_of,
            &signals,
            now,
            &self.config,
        ))
    }
}
