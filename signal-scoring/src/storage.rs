// Snapshot Storage Interface
// Persists calibrated signals, consensus records and failed-symbol markers

use anyhow::Result;
use chrono::NaiveDate;
use common::{CalibratedSignal, ConsensusKey, ConsensusRecord, SignalKey, SymbolFailure};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Trait for snapshot store backends. Every write is an upsert on its key:
/// writing the same key twice leaves exactly one row.
#[async_trait::async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Upsert a per-engine row keyed by (symbol, date, engine)
    async fn upsert_signal(&self, signal: &CalibratedSignal) -> Result<()>;

    /// Remove a per-engine row; returns whether one existed
    async fn delete_signal(&self, key: &SignalKey) -> Result<bool>;

    /// Upsert the consensus row keyed by (symbol, date)
    async fn upsert_consensus(&self, record: &ConsensusRecord) -> Result<()>;

    /// Remove a consensus row; returns whether one existed
    async fn delete_consensus(&self, key: &ConsensusKey) -> Result<bool>;

    /// Upsert the failed-symbol marker keyed by (symbol, date)
    async fn record_failure(&self, failure: &SymbolFailure) -> Result<()>;

    /// Remove the failed-symbol marker; returns whether one existed
    async fn clear_failure(&self, key: &ConsensusKey) -> Result<bool>;

    async fn get_signal(&self, key: &SignalKey) -> Result<Option<CalibratedSignal>>;

    /// All per-engine rows for a symbol/day, ordered by engine name
    async fn signals_for(&self, symbol: &str, as_of: NaiveDate) -> Result<Vec<CalibratedSignal>>;

    async fn get_consensus(&self, key: &ConsensusKey) -> Result<Option<ConsensusRecord>>;

    /// Failure markers for a day, ordered by symbol
    async fn failures_for(&self, as_of: NaiveDate) -> Result<Vec<SymbolFailure>>;

    async fn stats(&self) -> Result<StoreStats>;
}

/// Storage statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    pub signal_rows: usize,
    pub consensus_rows: usize,
    pub failure_rows: usize,
    pub signals_by_engine: BTreeMap<String, usize>,
    pub oldest_date: Option<NaiveDate>,
    pub newest_date: Option<NaiveDate>,
}

#[derive(Debug, Default)]
struct StoreContents {
    signals: BTreeMap<SignalKey, CalibratedSignal>,
    consensus: BTreeMap<ConsensusKey, ConsensusRecord>,
    failures: BTreeMap<ConsensusKey, SymbolFailure>,
}

/// In-memory snapshot store (for testing, replays and dry runs)
pub struct InMemoryStore {
    contents: tokio::sync::RwLock<StoreContents>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            contents: tokio::sync::RwLock::new(StoreContents::default()),
        }
    }

    /// Deterministic JSON dump of every row, ordered by key
    pub async fn export_json(&self) -> Result<String> {
        let contents = self.contents.read().await;
        let rows = serde_json::json!({
            "signals": contents.signals.values().collect::<Vec<_>>(),
            "consensus": contents.consensus.values().collect::<Vec<_>>(),
            "failures": contents.failures.values().collect::<Vec<_>>(),
        });
        Ok(serde_json::to_string_pretty(&rows)?)
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl SnapshotStore for InMemoryStore {
    async fn upsert_signal(&self, signal: &CalibratedSignal) -> Result<()> {
        let mut contents = self.contents.write().await;
        contents.signals.insert(signal.key(), signal.clone());
        Ok(())
    }

    async fn delete_signal(&self, key: &SignalKey) -> Result<bool> {
        let mut contents = self.contents.write().await;
        Ok(contents.signals.remove(key).is_some())
    }

    async fn upsert_consensus(&self, record: &ConsensusRecord) -> Result<()> {
        let mut contents = self.contents.write().await;
        contents.consensus.insert(record.key(), record.clone());
        Ok(())
    }

    async fn delete_consensus(&self, key: &ConsensusKey) -> Result<bool> {
        let mut contents = self.contents.write().await;
        Ok(contents.consensus.remove(key).is_some())
    }

    async fn record_failure(&self, failure: &SymbolFailure) -> Result<()> {
        let mut contents = self.contents.write().await;
        contents.failures.insert(failure.key(), failure.clone());
        Ok(())
    }

    async fn clear_failure(&self, key: &ConsensusKey) -> Result<bool> {
        let mut contents = self.contents.write().await;
        Ok(contents.failures.remove(key).is_some())
    }

    async fn get_signal(&self, key: &SignalKey) -> Result<Option<CalibratedSignal>> {
        let contents = self.contents.read().await;
        Ok(contents.signals.get(key).cloned())
    }

    async fn signals_for(&self, symbol: &str, as_of: NaiveDate) -> Result<Vec<CalibratedSignal>> {
        let contents = self.contents.read().await;
        let rows = contents
            .signals
            .iter()
            .filter(|(key, _)| key.symbol == symbol && key.as_of == as_of)
            .map(|(_, signal)| signal.clone())
            .collect();
        Ok(rows)
    }

    async fn get_consensus(&self, key: &ConsensusKey) -> Result<Option<ConsensusRecord>> {
        let contents = self.contents.read().await;
        Ok(contents.consensus.get(key).cloned())
    }

    async fn failures_for(&self, as_of: NaiveDate) -> Result<Vec<SymbolFailure>> {
        let contents = self.contents.read().await;
        Ok(contents
            .failures
            .values()
            .filter(|f| f.as_of == as_of)
            .cloned()
            .collect())
    }

    async fn stats(&self) -> Result<StoreStats> {
        let contents = self.contents.read().await;

        let mut stats = StoreStats {
            signal_rows: contents.signals.len(),
            consensus_rows: contents.consensus.len(),
            failure_rows: contents.failures.len(),
            ..StoreStats::default()
        };

        for key in contents.signals.keys() {
            *stats.signals_by_engine.entry(key.engine_name.clone()).or_insert(0) += 1;
            stats.oldest_date = Some(stats.oldest_date.map_or(key.as_of, |d| d.min(key.as_of)));
            stats.newest_date = Some(stats.newest_date.map_or(key.as_of, |d| d.max(key.as_of)));
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use common::{
        BandScore, FailureStage, PositionBucket, SignalDirection, SignalResult, Timeframe, Uuid,
    };

    fn as_of() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
    }

    fn calibrated(engine: &str, confidence: f64) -> CalibratedSignal {
        let generated_at = Utc.with_ymd_and_hms(2024, 3, 1, 21, 0, 0).unwrap();
        CalibratedSignal {
            as_of: as_of(),
            result: SignalResult {
                symbol: "META".to_string(),
                engine_name: engine.to_string(),
                timeframe: Timeframe::Swing,
                signal: SignalDirection::Buy,
                confidence,
                position_size_pct: 2.0,
                entry_price_range: None,
                stop_loss: None,
                take_profit: None,
                reasoning: vec![],
                metadata: Default::default(),
                generated_at,
                expires_at: generated_at + Duration::days(1),
            },
            band_score: BandScore {
                position_pct: 0.3,
                position_score: 0.7,
                width_percentile: 0.5,
                width_score: 0.5,
                expansion_score: 0.6,
                composite_score: 0.6,
            },
            original_confidence: confidence,
            calibrated_confidence: confidence,
            quality_score: 0.6,
            bucket: PositionBucket::Reduced,
            position_multiplier: 0.7,
        }
    }

    #[tokio::test]
    async fn test_upsert_overwrites() {
        let store = InMemoryStore::new();

        store.upsert_signal(&calibrated("trend", 0.6)).await.unwrap();
        store.upsert_signal(&calibrated("trend", 0.7)).await.unwrap();
        store.upsert_signal(&calibrated("breakout", 0.5)).await.unwrap();

        let rows = store.signals_for("META", as_of()).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].engine_name(), "breakout");
        assert_eq!(rows[1].original_confidence, 0.7);

        let breakout = rows[0].key();
        assert!(store.delete_signal(&breakout).await.unwrap());
        assert!(!store.delete_signal(&breakout).await.unwrap());
        assert_eq!(store.signals_for("META", as_of()).await.unwrap().len(), 1);

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.signal_rows, 1);
        assert_eq!(stats.signals_by_engine.get("trend"), Some(&1));
        assert_eq!(stats.signals_by_engine.get("breakout"), None);
        assert_eq!(stats.oldest_date, Some(as_of()));
    }

    #[tokio::test]
    async fn test_consensus_and_failures() {
        let store = InMemoryStore::new();
        let key = ConsensusKey::new("META", as_of());

        let record = ConsensusRecord {
            symbol: "META".to_string(),
            as_of: as_of(),
            consensus_signal: SignalDirection::Buy,
            consensus_confidence: 0.7,
            recommended_engine: "trend".to_string(),
            conflicts: vec![],
            contributing_engines: vec!["trend".to_string()],
        };
        store.upsert_consensus(&record).await.unwrap();
        store.upsert_consensus(&record).await.unwrap();
        assert_eq!(store.stats().await.unwrap().consensus_rows, 1);
        assert_eq!(store.get_consensus(&key).await.unwrap(), Some(record));

        assert!(store.delete_consensus(&key).await.unwrap());
        assert!(!store.delete_consensus(&key).await.unwrap());

        let failure = SymbolFailure {
            symbol: "META".to_string(),
            as_of: as_of(),
            run_id: Uuid::new_v4(),
            stage: FailureStage::Persistence,
            reason: "disk full".to_string(),
            recorded_at: Utc::now(),
        };
        store.record_failure(&failure).await.unwrap();
        assert_eq!(store.failures_for(as_of()).await.unwrap().len(), 1);
        assert!(store.clear_failure(&key).await.unwrap());
        assert!(store.failures_for(as_of()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_export_is_deterministic() {
        let a = InMemoryStore::new();
        a.upsert_signal(&calibrated("trend", 0.6)).await.unwrap();
        a.upsert_signal(&calibrated("breakout", 0.5)).await.unwrap();

        let b = InMemoryStore::new();
        b.upsert_signal(&calibrated("breakout", 0.5)).await.unwrap();
        b.upsert_signal(&calibrated("trend", 0.6)).await.unwrap();

        assert_eq!(a.export_json().await.unwrap(), b.export_json().await.unwrap());
    }
}
