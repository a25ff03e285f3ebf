// Signal Scoring Framework
// Scores band structure, calibrates engine confidence, sizes positions and
// reconciles multi-engine signals into one consensus per symbol and day

pub mod band;
pub mod calibration;
pub mod config;
pub mod consensus;
pub mod engines;
pub mod inputs;
pub mod pg_store;
pub mod pipeline;
pub mod sizing;
pub mod storage;
pub mod validators;

pub use band::{BandScorer, RegimeWeights};
pub use calibration::{calibrated_confidence, ConfidenceCalibrator};
pub use config::{
    create_config_template, load_config, save_config, BandScoringConfig, ConsensusConfig,
    PipelineConfig, ScoringConfig,
};
pub use consensus::{resolve_consensus, CollectorState, ConsensusCollector};
pub use engines::{EngineRegistry, ReplayEngine, SignalEngine};
pub use inputs::{InMemoryInputs, MarketInputs};
pub use pg_store::PgSnapshotStore;
pub use pipeline::{RunContext, RunSummary, ScoringPipeline, SymbolReport, SymbolStatus};
pub use sizing::{bucket_for, quality_score, QualitySizer, SizingDecision};
pub use storage::{InMemoryStore, SnapshotStore, StoreStats};
pub use validators::{
    CompositeValidator, ConfidenceRangeValidator, ExpiryWindowValidator, FiniteSizeValidator,
    IdentityValidator, SignalValidator, ValidationContext,
};
