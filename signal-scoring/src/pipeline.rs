// Signal Scoring Pipeline
// Fans a run out over symbols; each symbol is scored, calibrated, sized,
// reconciled and persisted independently of every other symbol

use chrono::{DateTime, NaiveDate, Utc};
use common::{
    CalibratedSignal, ConsensusKey, ConsensusRecord, FailureStage, Regime, ScoringError,
    ScoringResult, SignalDirection, SignalKey, SignalResult, SymbolFailure,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::band::BandScorer;
use crate::calibration::ConfidenceCalibrator;
use crate::config::ScoringConfig;
use crate::consensus::ConsensusCollector;
use crate::engines::{EngineRegistry, SignalEngine};
use crate::inputs::MarketInputs;
use crate::storage::SnapshotStore;
use crate::validators::{CompositeValidator, SignalValidator, ValidationContext};

/// Everything a run needs to know about itself. Passed explicitly to every
/// stage; nothing is kept in process-wide state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunContext {
    pub run_id: Uuid,
    /// Trading day being scored
    pub as_of: NaiveDate,
    /// Clock used for signal expiry during this run
    pub evaluated_at: DateTime<Utc>,
}

impl RunContext {
    pub fn new(as_of: NaiveDate) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            as_of,
            evaluated_at: Utc::now(),
        }
    }

    pub fn with_evaluated_at(mut self, evaluated_at: DateTime<Utc>) -> Self {
        self.evaluated_at = evaluated_at;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolStatus {
    Succeeded,
    Skipped,
    Failed,
    Cancelled,
}

/// Outcome of scoring one symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolReport {
    pub symbol: String,
    pub status: SymbolStatus,
    pub stage: Option<FailureStage>,
    pub engines_reported: usize,
    pub engines_rejected: usize,
    pub engines_missing: usize,
    pub consensus: Option<SignalDirection>,
    pub conflicts: usize,
    pub error: Option<String>,
}

impl SymbolReport {
    fn new(symbol: &str, status: SymbolStatus) -> Self {
        Self {
            symbol: symbol.to_string(),
            status,
            stage: None,
            engines_reported: 0,
            engines_rejected: 0,
            engines_missing: 0,
            consensus: None,
            conflicts: 0,
            error: None,
        }
    }

    fn cancelled(symbol: &str) -> Self {
        Self::new(symbol, SymbolStatus::Cancelled)
    }
}

/// Run-level summary; per-symbol reports are ordered by symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub as_of: NaiveDate,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: usize,
    pub reports: Vec<SymbolReport>,
}

impl RunSummary {
    fn from_reports(ctx: &RunContext, started_at: DateTime<Utc>, mut reports: Vec<SymbolReport>) -> Self {
        reports.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        let count = |status: SymbolStatus| reports.iter().filter(|r| r.status == status).count();

        Self {
            run_id: ctx.run_id,
            as_of: ctx.as_of,
            started_at,
            finished_at: Utc::now(),
            total: reports.len(),
            succeeded: count(SymbolStatus::Succeeded),
            failed: count(SymbolStatus::Failed),
            skipped: count(SymbolStatus::Skipped),
            cancelled: count(SymbolStatus::Cancelled),
            reports,
        }
    }

    pub fn report(&self, symbol: &str) -> Option<&SymbolReport> {
        self.reports.iter().find(|r| r.symbol == symbol)
    }
}

/// Why a symbol did not complete
#[derive(Debug)]
enum SymbolFault {
    /// Bad or missing market data; nothing to score
    Skip { stage: FailureStage, error: ScoringError },
    Fail { stage: FailureStage, error: String },
}

impl SymbolFault {
    fn stage(&self) -> FailureStage {
        match self {
            SymbolFault::Skip { stage, .. } | SymbolFault::Fail { stage, .. } => *stage,
        }
    }

    fn reason(&self) -> String {
        match self {
            SymbolFault::Skip { error, .. } => error.to_string(),
            SymbolFault::Fail { error, .. } => error.clone(),
        }
    }

    fn status(&self) -> SymbolStatus {
        match self {
            SymbolFault::Skip { .. } => SymbolStatus::Skipped,
            SymbolFault::Fail { .. } => SymbolStatus::Failed,
        }
    }
}

/// A symbol scored and reconciled, not yet written
#[derive(Debug)]
struct ScoredSymbol {
    report: SymbolReport,
    key: ConsensusKey,
    calibrated: Vec<CalibratedSignal>,
    record: Option<ConsensusRecord>,
}

#[derive(Debug, Default)]
struct EngineRound {
    accepted: Vec<SignalResult>,
    rejected: usize,
    missing: usize,
}

/// Signal scoring pipeline
pub struct ScoringPipeline {
    config: ScoringConfig,
    engines: EngineRegistry,
    validator: CompositeValidator,
    scorer: BandScorer,
    calibrator: ConfidenceCalibrator,
    inputs: Arc<dyn MarketInputs>,
    store: Arc<dyn SnapshotStore>,
}

impl ScoringPipeline {
    /// Create a new pipeline with the standard signal validators
    pub fn new(
        config: ScoringConfig,
        inputs: Arc<dyn MarketInputs>,
        store: Arc<dyn SnapshotStore>,
    ) -> anyhow::Result<Self> {
        config.validate()?;

        Ok(Self {
            scorer: BandScorer::new(config.band.clone()),
            calibrator: ConfidenceCalibrator::default(),
            validator: CompositeValidator::standard(),
            engines: EngineRegistry::new(),
            config,
            inputs,
            store,
        })
    }

    /// Add a signal engine
    pub fn add_engine(mut self, engine: Arc<dyn SignalEngine>) -> anyhow::Result<Self> {
        self.engines.register(engine)?;
        Ok(self)
    }

    /// Replace the signal validators
    pub fn with_validator(mut self, validator: CompositeValidator) -> Self {
        self.validator = validator;
        self
    }

    pub fn engine_names(&self) -> Vec<String> {
        self.engines.names()
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Score every symbol for `ctx.as_of`, one task per symbol.
    ///
    /// Setting `cancel` to `true` stops symbols that have not started yet;
    /// symbols already in flight finish their writes.
    pub async fn run(
        self: Arc<Self>,
        ctx: RunContext,
        symbols: Vec<String>,
        cancel: watch::Receiver<bool>,
    ) -> RunSummary {
        let started_at = Utc::now();

        if !self.config.pipeline.enabled {
            debug!("Pipeline is disabled, skipping run {}", ctx.run_id);
            return RunSummary::from_reports(&ctx, started_at, Vec::new());
        }

        let mut symbols = symbols;
        symbols.sort();
        symbols.dedup();

        info!(
            "Starting run {} for {} with {} symbols and {} engines",
            ctx.run_id,
            ctx.as_of,
            symbols.len(),
            self.engines.len()
        );

        let ctx = Arc::new(ctx);
        let semaphore = Arc::new(Semaphore::new(self.config.pipeline.max_concurrent_symbols.max(1)));
        let mut tasks = Vec::with_capacity(symbols.len());

        for symbol in symbols {
            let pipeline = Arc::clone(&self);
            let semaphore = Arc::clone(&semaphore);
            let ctx = Arc::clone(&ctx);
            let cancel = cancel.clone();
            let task_symbol = symbol.clone();

            let task = tokio::spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return SymbolReport::cancelled(&task_symbol),
                };
                if *cancel.borrow() {
                    debug!("Run cancelled before {} started", task_symbol);
                    return SymbolReport::cancelled(&task_symbol);
                }
                pipeline.run_symbol(&ctx, &task_symbol).await
            });

            tasks.push((symbol, task));
        }

        let mut reports = Vec::with_capacity(tasks.len());
        for (symbol, task) in tasks {
            match task.await {
                Ok(report) => reports.push(report),
                Err(e) => {
                    error!("Scoring task for {} aborted: {}", symbol, e);
                    let mut report = SymbolReport::new(&symbol, SymbolStatus::Failed);
                    report.error = Some(e.to_string());
                    reports.push(report);
                }
            }
        }

        let summary = RunSummary::from_reports(&ctx, started_at, reports);
        info!(
            "Run {} finished: {} succeeded, {} failed, {} skipped, {} cancelled",
            summary.run_id, summary.succeeded, summary.failed, summary.skipped, summary.cancelled
        );
        summary
    }

    /// Score a single symbol on demand. Never fails: problems are reported
    /// in the returned report and as a failure marker in the store.
    ///
    /// The symbol budget bounds input loading, engine calls and
    /// reconciliation. Once writing starts it runs to completion so the
    /// stored rows for the symbol always belong to one run.
    pub async fn run_symbol(&self, ctx: &RunContext, symbol: &str) -> SymbolReport {
        let budget = self.config.pipeline.symbol_timeout();

        let scored = match tokio::time::timeout(budget, self.score_symbol(ctx, symbol)).await {
            Ok(scored) => scored,
            Err(_) => Err(SymbolFault::Fail {
                stage: FailureStage::Timeout,
                error: ScoringError::SymbolTimeout {
                    symbol: symbol.to_string(),
                    budget_ms: self.config.pipeline.symbol_timeout_ms,
                }
                .to_string(),
            }),
        };

        let outcome = match scored {
            Ok(scored) => self.write_symbol(scored).await,
            Err(fault) => Err(fault),
        };

        match outcome {
            Ok(report) => report,
            Err(fault) => {
                match &fault {
                    SymbolFault::Skip { error, .. } => warn!("Skipping {}: {}", symbol, error),
                    SymbolFault::Fail { stage, error } => {
                        error!("Scoring {} failed at {}: {}", symbol, stage, error)
                    }
                }
                self.mark_failed(ctx, symbol, &fault).await;

                let mut report = SymbolReport::new(symbol, fault.status());
                report.stage = Some(fault.stage());
                report.error = Some(fault.reason());
                report
            }
        }
    }

    async fn score_symbol(&self, ctx: &RunContext, symbol: &str) -> Result<ScoredSymbol, SymbolFault> {
        let input_failure = |e: anyhow::Error| SymbolFault::Fail {
            stage: FailureStage::Input,
            error: format!("{:#}", e),
        };

        let snapshot = self
            .inputs
            .snapshot(symbol, ctx.as_of)
            .await
            .map_err(input_failure)?
            .ok_or_else(|| SymbolFault::Skip {
                stage: FailureStage::Input,
                error: ScoringError::InvalidMarketSnapshot {
                    symbol: symbol.to_string(),
                    reason: format!("no snapshot for {}", ctx.as_of),
                },
            })?;

        let regime = self
            .inputs
            .regime(symbol, ctx.as_of)
            .await
            .map_err(input_failure)?
            .unwrap_or_else(Regime::unknown);

        let band_score = self
            .scorer
            .score(&snapshot, &regime)
            .map_err(|error| SymbolFault::Skip {
                stage: FailureStage::BandScoring,
                error,
            })?;

        debug!(
            "{} band score {:.3} under {}",
            symbol, band_score.composite_score, regime.label
        );

        let round = self.collect_signals(ctx, symbol).await;
        let mut report = SymbolReport::new(symbol, SymbolStatus::Succeeded);
        report.engines_rejected = round.rejected;
        report.engines_missing = round.missing;

        let mut calibrated = Vec::with_capacity(round.accepted.len());
        for signal in round.accepted {
            let engine = signal.engine_name.clone();
            match self.calibrator.calibrate(ctx.as_of, signal, &band_score, &regime) {
                Ok(signal) => calibrated.push(signal),
                Err(e) => {
                    warn!("Rejecting signal from {} for {}: {}", engine, symbol, e);
                    report.engines_rejected += 1;
                }
            }
        }
        report.engines_reported = calibrated.len();

        let key = ConsensusKey::new(symbol, ctx.as_of);
        let record = self
            .reconcile(ctx, key.clone(), calibrated.clone())
            .map_err(|e| SymbolFault::Fail {
                stage: FailureStage::Consensus,
                error: e.to_string(),
            })?;

        if let Some(record) = &record {
            report.consensus = Some(record.consensus_signal);
            report.conflicts = record.conflicts.len();
        }

        Ok(ScoredSymbol {
            report,
            key,
            calibrated,
            record,
        })
    }

    /// Bring the sink in line with this run: one row per engine that
    /// contributed, no rows for engines that did not, and the consensus
    /// row present only when there is a consensus.
    async fn write_symbol(&self, scored: ScoredSymbol) -> Result<SymbolReport, SymbolFault> {
        let ScoredSymbol {
            report,
            key,
            calibrated,
            record,
        } = scored;

        for signal in &calibrated {
            self.persist(&signal.key().to_string(), || self.store.upsert_signal(signal))
                .await
                .map_err(persistence_fault)?;
        }

        let contributed: BTreeSet<&str> = calibrated.iter().map(|s| s.engine_name()).collect();
        for engine in self.engines.names() {
            if contributed.contains(engine.as_str()) {
                continue;
            }
            let signal_key = SignalKey {
                symbol: key.symbol.clone(),
                as_of: key.as_of,
                engine_name: engine,
            };
            let removed = self
                .persist(&signal_key.to_string(), || self.store.delete_signal(&signal_key))
                .await
                .map_err(persistence_fault)?;
            if removed {
                debug!("Removed stale signal row {}", signal_key);
            }
        }

        match &record {
            Some(record) => {
                self.persist(&key.to_string(), || self.store.upsert_consensus(record))
                    .await
                    .map_err(persistence_fault)?;
                if record.has_conflicts() {
                    info!(
                        "{} consensus {} with {} conflicts",
                        key.symbol,
                        record.consensus_signal,
                        record.conflicts.len()
                    );
                }
            }
            None => {
                // A re-run with no live signals must not leave a stale consensus behind
                let removed = self
                    .persist(&key.to_string(), || self.store.delete_consensus(&key))
                    .await
                    .map_err(persistence_fault)?;
                if removed {
                    debug!("Removed stale consensus for {}", key);
                }
            }
        }

        self.persist(&key.to_string(), || self.store.clear_failure(&key))
            .await
            .map_err(persistence_fault)?;

        Ok(report)
    }

    /// Ask every engine concurrently; each call is bounded by the engine
    /// timeout. Engines that fail or time out simply do not contribute.
    async fn collect_signals(&self, ctx: &RunContext, symbol: &str) -> EngineRound {
        let budget = self.config.pipeline.engine_timeout();
        let budget_ms = self.config.pipeline.engine_timeout_ms;
        let as_of = ctx.as_of;

        let calls = self.engines.iter().map(|(name, engine)| {
            let engine = Arc::clone(engine);
            let name = name.clone();
            async move {
                let outcome = match tokio::time::timeout(budget, engine.produce(symbol, as_of)).await {
                    Ok(Ok(signal)) => Ok(signal),
                    Ok(Err(e)) => Err(ScoringError::EngineFailure {
                        engine: name.clone(),
                        message: format!("{:#}", e),
                    }),
                    Err(_) => Err(ScoringError::EngineTimeout {
                        engine: name.clone(),
                        budget_ms,
                    }),
                };
                (name, outcome)
            }
        });

        let mut round = EngineRound::default();
        for (engine, outcome) in futures::future::join_all(calls).await {
            match outcome {
                Ok(signal) => {
                    let validation = ValidationContext {
                        symbol,
                        engine: &engine,
                    };
                    match self.validator.validate(&validation, &signal) {
                        Ok(()) => round.accepted.push(signal),
                        Err(e) => {
                            warn!("Rejecting signal from {} for {}: {}", engine, symbol, e);
                            round.rejected += 1;
                        }
                    }
                }
                Err(e) => {
                    warn!("{} did not contribute for {}: {}", engine, symbol, e);
                    round.missing += 1;
                }
            }
        }
        round
    }

    fn reconcile(
        &self,
        ctx: &RunContext,
        key: ConsensusKey,
        calibrated: Vec<CalibratedSignal>,
    ) -> ScoringResult<Option<ConsensusRecord>> {
        let mut collector = ConsensusCollector::new(
            key,
            self.engines.names(),
            ctx.evaluated_at,
            self.config.consensus.clone(),
        );
        for signal in calibrated {
            collector.add(signal, ctx.evaluated_at)?;
        }
        collector.resolve(ctx.evaluated_at)
    }

    /// Run a sink write with bounded attempts and linear backoff
    async fn persist<T, F, Fut>(&self, key: &str, mut op: F) -> ScoringResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let attempts = self.config.pipeline.persistence_max_attempts.max(1);
        let backoff = self.config.pipeline.retry_backoff();
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    last_error = format!("{:#}", e);
                    warn!(
                        "Write for {} failed (attempt {}/{}): {}",
                        key, attempt, attempts, last_error
                    );
                    if attempt < attempts {
                        tokio::time::sleep(backoff * attempt).await;
                    }
                }
            }
        }

        Err(ScoringError::PersistenceFailure {
            key: key.to_string(),
            attempts,
            message: last_error,
        })
    }

    async fn mark_failed(&self, ctx: &RunContext, symbol: &str, fault: &SymbolFault) {
        let failure = SymbolFailure {
            symbol: symbol.to_string(),
            as_of: ctx.as_of,
            run_id: ctx.run_id,
            stage: fault.stage(),
            reason: fault.reason(),
            recorded_at: Utc::now(),
        };

        if let Err(e) = self
            .persist(&failure.key().to_string(), || self.store.record_failure(&failure))
            .await
        {
            error!("Could not record failure marker for {}: {}", symbol, e);
        }
    }
}

fn persistence_fault(error: ScoringError) -> SymbolFault {
    SymbolFault::Fail {
        stage: FailureStage::Persistence,
        error: error.to_string(),
    }
}
