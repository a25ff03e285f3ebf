//! Signal engine contract and registry
//!
//! Engines are black boxes to the pipeline: each one answers
//! `produce(symbol, date)` with a `SignalResult` or an error. The pipeline
//! only ever sees them through [`SignalEngine`].

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use common::SignalResult;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::info;

/// Capability every signal engine implements
#[async_trait]
pub trait SignalEngine: Send + Sync {
    /// Unique name; also the engine component of the storage key
    fn name(&self) -> &str;

    /// Produce this engine's call for a symbol on a trading day
    async fn produce(&self, symbol: &str, date: NaiveDate) -> Result<SignalResult>;
}

/// Named engines, iterated in name order so runs are reproducible
#[derive(Clone, Default)]
pub struct EngineRegistry {
    engines: BTreeMap<String, Arc<dyn SignalEngine>>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an engine. Names must be unique.
    pub fn register(&mut self, engine: Arc<dyn SignalEngine>) -> Result<()> {
        let name = engine.name().to_string();
        if name.trim().is_empty() {
            bail!("Engine name must not be empty");
        }
        if self.engines.contains_key(&name) {
            bail!("Engine {} is already registered", name);
        }
        info!("Registering signal engine: {}", name);
        self.engines.insert(name, engine);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn SignalEngine>> {
        self.engines.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.engines.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Arc<dyn SignalEngine>)> {
        self.engines.iter()
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }
}

impl std::fmt::Debug for EngineRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineRegistry")
            .field("engines", &self.names())
            .finish()
    }
}

/// Serves signals that were computed elsewhere (backfills, replays).
/// Symbols without a stored signal are reported as failures.
#[derive(Debug, Clone)]
pub struct ReplayEngine {
    name: String,
    signals: HashMap<(String, NaiveDate), SignalResult>,
}

impl ReplayEngine {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            signals: HashMap::new(),
        }
    }

    /// Add a stored signal for `date`
    pub fn with_signal(mut self, date: NaiveDate, signal: SignalResult) -> Self {
        self.insert(date, signal);
        self
    }

    pub fn insert(&mut self, date: NaiveDate, signal: SignalResult) {
        self.signals.insert((signal.symbol.clone(), date), signal);
    }

    pub fn len(&self) -> usize {
        self.signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }
}

#[async_trait]
impl SignalEngine for ReplayEngine {
    fn name(&self) -> &str {
        &self.name
    }

    async fn produce(&self, symbol: &str, date: NaiveDate) -> Result<SignalResult> {
        self.signals
            .get(&(symbol.to_string(), date))
            .cloned()
            .ok_or_else(|| anyhow!("{} has no stored signal for {} on {}", self.name, symbol, date))
    }
}
