//! Scoring pipeline configuration

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Overall scoring configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ScoringConfig {
    /// Band scoring thresholds
    #[serde(default)]
    pub band: BandScoringConfig,

    /// Consensus aggregation settings
    #[serde(default)]
    pub consensus: ConsensusConfig,

    /// Batch execution limits
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

impl ScoringConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        let band = &self.band;
        for (name, value) in [
            ("expansion_spike_threshold", band.expansion_spike_threshold),
            ("expansion_stable_threshold", band.expansion_stable_threshold),
            (
                "conflict_confidence_threshold",
                self.consensus.conflict_confidence_threshold,
            ),
        ] {
            if !value.is_finite() {
                bail!("{} must be a finite number, got {}", name, value);
            }
        }

        if band.expansion_stable_threshold <= 0.0 {
            bail!("expansion_stable_threshold must be positive");
        }
        if band.expansion_stable_threshold >= band.expansion_spike_threshold {
            bail!(
                "expansion_stable_threshold ({}) must be below expansion_spike_threshold ({})",
                band.expansion_stable_threshold,
                band.expansion_spike_threshold
            );
        }

        let threshold = self.consensus.conflict_confidence_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            bail!("conflict_confidence_threshold {} must lie in [0, 1]", threshold);
        }

        let pipeline = &self.pipeline;
        if pipeline.max_concurrent_symbols == 0 {
            bail!("max_concurrent_symbols must be at least 1");
        }
        if pipeline.persistence_max_attempts == 0 {
            bail!("persistence_max_attempts must be at least 1");
        }
        if pipeline.symbol_timeout_ms == 0 || pipeline.engine_timeout_ms == 0 {
            bail!("timeouts must be non-zero");
        }
        Ok(())
    }
}

/// Band scoring thresholds. The expansion thresholds were tuned empirically
/// and are kept adjustable for recalibration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandScoringConfig {
    /// Below this many history samples the width percentile is neutral (0.5)
    #[serde(default = "default_min_width_history")]
    pub min_width_history: usize,

    /// Relative width change above which expansion counts as a spike
    #[serde(default = "default_expansion_spike_threshold")]
    pub expansion_spike_threshold: f64,

    /// Relative width change (absolute) below which bands count as stable
    #[serde(default = "default_expansion_stable_threshold")]
    pub expansion_stable_threshold: f64,
}

impl Default for BandScoringConfig {
    fn default() -> Self {
        Self {
            min_width_history: 20,
            expansion_spike_threshold: 0.5,
            expansion_stable_threshold: 0.1,
        }
    }
}

fn default_min_width_history() -> usize {
    20
}

fn default_expansion_spike_threshold() -> f64 {
    0.5
}

fn default_expansion_stable_threshold() -> f64 {
    0.1
}

/// Consensus aggregation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusConfig {
    /// Both engines of a disagreeing pair need at least this calibrated
    /// confidence for the pair to be reported as a conflict
    #[serde(default = "default_conflict_threshold")]
    pub conflict_confidence_threshold: f64,

    /// How long a collector waits for missing engines before resolving
    #[serde(default = "default_collection_timeout_secs")]
    pub collection_timeout_secs: u64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            conflict_confidence_threshold: 0.5,
            collection_timeout_secs: 300,
        }
    }
}

fn default_conflict_threshold() -> f64 {
    0.5
}

fn default_collection_timeout_secs() -> u64 {
    300
}

/// Batch execution limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Enable/disable scoring runs
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Maximum number of symbols scored concurrently
    #[serde(default = "default_max_concurrent_symbols")]
    pub max_concurrent_symbols: usize,

    /// Budget for one symbol, end to end (ms)
    #[serde(default = "default_symbol_timeout_ms")]
    pub symbol_timeout_ms: u64,

    /// Budget for a single engine call (ms)
    #[serde(default = "default_engine_timeout_ms")]
    pub engine_timeout_ms: u64,

    /// Attempts per sink write before the symbol is marked failed
    #[serde(default = "default_persistence_max_attempts")]
    pub persistence_max_attempts: u32,

    /// Linear backoff between sink write attempts (ms)
    #[serde(default = "default_persistence_retry_backoff_ms")]
    pub persistence_retry_backoff_ms: u64,
}

impl PipelineConfig {
    pub fn symbol_timeout(&self) -> Duration {
        Duration::from_millis(self.symbol_timeout_ms)
    }

    pub fn engine_timeout(&self) -> Duration {
        Duration::from_millis(self.engine_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.persistence_retry_backoff_ms)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_concurrent_symbols: 64,
            symbol_timeout_ms: 30_000,
            engine_timeout_ms: 5_000,
            persistence_max_attempts: 3,
            persistence_retry_backoff_ms: 100,
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_max_concurrent_symbols() -> usize {
    64
}

fn default_symbol_timeout_ms() -> u64 {
    30_000
}

fn default_engine_timeout_ms() -> u64 {
    5_000
}

fn default_persistence_max_attempts() -> u32 {
    3
}

fn default_persistence_retry_backoff_ms() -> u64 {
    100
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> anyhow::Result<ScoringConfig> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read config {}", path))?;
    let config: ScoringConfig =
        toml::from_str(&content).with_context(|| format!("Failed to parse config {}", path))?;
    config.validate()?;
    Ok(config)
}

/// Save configuration to TOML file
pub fn save_config(config: &ScoringConfig, path: &str) -> anyhow::Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Create a default configuration file template
pub fn create_config_template(path: &str) -> anyhow::Result<()> {
    let template = "# Signal Scoring Configuration

[band]
# Minimum band-width history before the width percentile is trusted
min_width_history = 20

# Relative band-width change treated as a volatility spike (0.5 = +50%)
expansion_spike_threshold = 0.5

# Relative band-width change treated as stable (0.1 = +/-10%)
expansion_stable_threshold = 0.1

[consensus]
# Minimum calibrated confidence on both sides for a disagreement to count as a conflict
conflict_confidence_threshold = 0.5

# Seconds a collector waits for missing engines
collection_timeout_secs = 300

[pipeline]
enabled = true

# Symbols scored concurrently
max_concurrent_symbols = 64

# End-to-end budget per symbol (ms)
symbol_timeout_ms = 30000

# Budget per engine call (ms)
engine_timeout_ms = 5000

# Sink write attempts before a symbol is marked failed
persistence_max_attempts = 3

# Backoff between attempts (ms, multiplied by the attempt number)
persistence_retry_backoff_ms = 100
";

    std::fs::write(path, template)?;
    Ok(())
}
