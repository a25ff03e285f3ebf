use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use common::{CalibratedSignal, ConsensusKey, ConsensusRecord, SignalKey, SymbolFailure};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use std::sync::Arc;
use tracing::{debug, info};

use crate::storage::{SnapshotStore, StoreStats};

/// Postgres snapshot store. Primary keys enforce one row per
/// (symbol, date, engine) and one consensus/failure row per (symbol, date);
/// every write is an `ON CONFLICT ... DO UPDATE` upsert.
pub struct PgSnapshotStore {
    db_pool: Arc<PgPool>,
}

impl PgSnapshotStore {
    pub fn new(db_pool: Arc<PgPool>) -> Self {
        Self { db_pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("Failed to connect to snapshot database")?;
        Ok(Self::new(Arc::new(pool)))
    }

    /// Create the snapshot tables
    pub async fn initialize(&self) -> Result<()> {
        sqlx::raw_sql(
            r#"
            CREATE TABLE IF NOT EXISTS calibrated_signals (
                symbol TEXT NOT NULL,
                as_of DATE NOT NULL,
                engine_name TEXT NOT NULL,
                signal TEXT NOT NULL,
                calibrated_confidence DOUBLE PRECISION NOT NULL,
                quality_score DOUBLE PRECISION NOT NULL,
                position_multiplier DOUBLE PRECISION NOT NULL,
                payload JSONB NOT NULL,
                updated_at TIMESTAMPTZ DEFAULT NOW(),
                PRIMARY KEY (symbol, as_of, engine_name)
            );

            CREATE INDEX IF NOT EXISTS idx_calibrated_signals_as_of ON calibrated_signals(as_of);

            CREATE TABLE IF NOT EXISTS consensus_records (
                symbol TEXT NOT NULL,
                as_of DATE NOT NULL,
                consensus_signal TEXT NOT NULL,
                consensus_confidence DOUBLE PRECISION NOT NULL,
                recommended_engine TEXT NOT NULL,
                conflict_count INTEGER NOT NULL,
                payload JSONB NOT NULL,
                updated_at TIMESTAMPTZ DEFAULT NOW(),
                PRIMARY KEY (symbol, as_of)
            );

            CREATE TABLE IF NOT EXISTS symbol_failures (
                symbol TEXT NOT NULL,
                as_of DATE NOT NULL,
                run_id UUID NOT NULL,
                stage TEXT NOT NULL,
                reason TEXT NOT NULL,
                recorded_at TIMESTAMPTZ NOT NULL,
                PRIMARY KEY (symbol, as_of)
            );
            "#,
        )
        .execute(self.db_pool.as_ref())
        .await
        .context("Failed to create snapshot tables")?;

        info!("Snapshot tables initialized");
        Ok(())
    }
}

#[async_trait]
impl SnapshotStore for PgSnapshotStore {
    async fn upsert_signal(&self, signal: &CalibratedSignal) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO calibrated_signals (
                symbol, as_of, engine_name, signal,
                calibrated_confidence, quality_score, position_multiplier, payload
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (symbol, as_of, engine_name)
            DO UPDATE SET
                signal = EXCLUDED.signal,
                calibrated_confidence = EXCLUDED.calibrated_confidence,
                quality_score = EXCLUDED.quality_score,
                position_multiplier = EXCLUDED.position_multiplier,
                payload = EXCLUDED.payload,
                updated_at = NOW()
            "#,
        )
        .bind(&signal.result.symbol)
        .bind(signal.as_of)
        .bind(&signal.result.engine_name)
        .bind(signal.direction().as_str())
        .bind(signal.calibrated_confidence)
        .bind(signal.quality_score)
        .bind(signal.position_multiplier)
        .bind(Json(signal))
        .execute(self.db_pool.as_ref())
        .await
        .with_context(|| format!("Failed to upsert calibrated signal {}", signal.key()))?;

        debug!("Upserted calibrated signal {}", signal.key());
        Ok(())
    }

    async fn delete_signal(&self, key: &SignalKey) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM calibrated_signals WHERE symbol = $1 AND as_of = $2 AND engine_name = $3",
        )
        .bind(&key.symbol)
        .bind(key.as_of)
        .bind(&key.engine_name)
        .execute(self.db_pool.as_ref())
        .await
        .with_context(|| format!("Failed to delete calibrated signal {}", key))?;
        Ok(result.rows_affected() > 0)
    }

    async fn upsert_consensus(&self, record: &ConsensusRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO consensus_records (
                symbol, as_of, consensus_signal, consensus_confidence,
                recommended_engine, conflict_count, payload
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (symbol, as_of)
            DO UPDATE SET
                consensus_signal = EXCLUDED.consensus_signal,
                consensus_confidence = EXCLUDED.consensus_confidence,
                recommended_engine = EXCLUDED.recommended_engine,
                conflict_count = EXCLUDED.conflict_count,
                payload = EXCLUDED.payload,
                updated_at = NOW()
            "#,
        )
        .bind(&record.symbol)
        .bind(record.as_of)
        .bind(record.consensus_signal.as_str())
        .bind(record.consensus_confidence)
        .bind(&record.recommended_engine)
        .bind(record.conflicts.len() as i32)
        .bind(Json(record))
        .execute(self.db_pool.as_ref())
        .await
        .with_context(|| format!("Failed to upsert consensus {}", record.key()))?;

        Ok(())
    }

    async fn delete_consensus(&self, key: &ConsensusKey) -> Result<bool> {
        let result = sqlx::query("DELETE FROM consensus_records WHERE symbol = $1 AND as_of = $2")
            .bind(&key.symbol)
            .bind(key.as_of)
            .execute(self.db_pool.as_ref())
            .await
            .with_context(|| format!("Failed to delete consensus {}", key))?;
        Ok(result.rows_affected() > 0)
    }

    async fn record_failure(&self, failure: &SymbolFailure) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO symbol_failures (symbol, as_of, run_id, stage, reason, recorded_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (symbol, as_of)
            DO UPDATE SET
                run_id = EXCLUDED.run_id,
                stage = EXCLUDED.stage,
                reason = EXCLUDED.reason,
                recorded_at = EXCLUDED.recorded_at
            "#,
        )
        .bind(&failure.symbol)
        .bind(failure.as_of)
        .bind(failure.run_id)
        .bind(failure.stage.to_string())
        .bind(&failure.reason)
        .bind(failure.recorded_at)
        .execute(self.db_pool.as_ref())
        .await
        .with_context(|| format!("Failed to record failure for {}", failure.key()))?;

        Ok(())
    }

    async fn clear_failure(&self, key: &ConsensusKey) -> Result<bool> {
        let result = sqlx::query("DELETE FROM symbol_failures WHERE symbol = $1 AND as_of = $2")
            .bind(&key.symbol)
            .bind(key.as_of)
            .execute(self.db_pool.as_ref())
            .await
            .with_context(|| format!("Failed to clear failure for {}", key))?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_signal(&self, key: &SignalKey) -> Result<Option<CalibratedSignal>> {
        let row = sqlx::query_as::<_, (Json<CalibratedSignal>,)>(
            r#"
            SELECT payload FROM calibrated_signals
            WHERE symbol = $1 AND as_of = $2 AND engine_name = $3
            "#,
        )
        .bind(&key.symbol)
        .bind(key.as_of)
        .bind(&key.engine_name)
        .fetch_optional(self.db_pool.as_ref())
        .await
        .with_context(|| format!("Failed to fetch calibrated signal {}", key))?;

        Ok(row.map(|(Json(signal),)| signal))
    }

    async fn signals_for(&self, symbol: &str, as_of: NaiveDate) -> Result<Vec<CalibratedSignal>> {
        let rows = sqlx::query_as::<_, (Json<CalibratedSignal>,)>(
            r#"
            SELECT payload FROM calibrated_signals
            WHERE symbol = $1 AND as_of = $2
            ORDER BY engine_name
            "#,
        )
        .bind(symbol)
        .bind(as_of)
        .fetch_all(self.db_pool.as_ref())
        .await
        .context("Failed to fetch calibrated signals")?;

        Ok(rows.into_iter().map(|(Json(signal),)| signal).collect())
    }

    async fn get_consensus(&self, key: &ConsensusKey) -> Result<Option<ConsensusRecord>> {
        let row = sqlx::query_as::<_, (Json<ConsensusRecord>,)>(
            "SELECT payload FROM consensus_records WHERE symbol = $1 AND as_of = $2",
        )
        .bind(&key.symbol)
        .bind(key.as_of)
        .fetch_optional(self.db_pool.as_ref())
        .await
        .with_context(|| format!("Failed to fetch consensus {}", key))?;

        Ok(row.map(|(Json(record),)| record))
    }

    async fn failures_for(&self, as_of: NaiveDate) -> Result<Vec<SymbolFailure>> {
        let rows = sqlx::query_as::<_, (String, NaiveDate, uuid::Uuid, String, String, chrono::DateTime<chrono::Utc>)>(
            r#"
            SELECT symbol, as_of, run_id, stage, reason, recorded_at
            FROM symbol_failures
            WHERE as_of = $1
            ORDER BY symbol
            "#,
        )
        .bind(as_of)
        .fetch_all(self.db_pool.as_ref())
        .await
        .context("Failed to fetch symbol failures")?;

        rows.into_iter()
            .map(|(symbol, as_of, run_id, stage, reason, recorded_at)| {
                let stage = serde_json::from_value(serde_json::Value::String(stage))
                    .context("Unknown failure stage in symbol_failures")?;
                Ok(SymbolFailure {
                    symbol,
                    as_of,
                    run_id,
                    stage,
                    reason,
                    recorded_at,
                })
            })
            .collect()
    }

    async fn stats(&self) -> Result<StoreStats> {
        let pool = self.db_pool.as_ref();

        let (signal_rows, oldest_date, newest_date) =
            sqlx::query_as::<_, (i64, Option<NaiveDate>, Option<NaiveDate>)>(
                "SELECT COUNT(*), MIN(as_of), MAX(as_of) FROM calibrated_signals",
            )
            .fetch_one(pool)
            .await
            .context("Failed to count calibrated signals")?;

        let (consensus_rows,) = sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM consensus_records")
            .fetch_one(pool)
            .await
            .context("Failed to count consensus records")?;

        let (failure_rows,) = sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM symbol_failures")
            .fetch_one(pool)
            .await
            .context("Failed to count symbol failures")?;

        let by_engine = sqlx::query_as::<_, (String, i64)>(
            "SELECT engine_name, COUNT(*) FROM calibrated_signals GROUP BY engine_name",
        )
        .fetch_all(pool)
        .await
        .context("Failed to count signals by engine")?;

        Ok(StoreStats {
            signal_rows: signal_rows as usize,
            consensus_rows: consensus_rows as usize,
            failure_rows: failure_rows as usize,
            signals_by_engine: by_engine
                .into_iter()
                .map(|(engine, count)| (engine, count as usize))
                .collect(),
            oldest_date,
            newest_date,
        })
    }
}
