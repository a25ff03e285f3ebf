// Market Inputs
// Read-only access to band snapshots and regime labels for a scoring run

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use common::{MarketSnapshot, Regime};
use std::collections::HashMap;

/// Source of per-symbol market inputs. Implementations must not mutate
/// anything visible to other symbols during a run.
#[async_trait]
pub trait MarketInputs: Send + Sync {
    /// Band snapshot, or `None` when the provider has no data for the day
    async fn snapshot(&self, symbol: &str, date: NaiveDate) -> Result<Option<MarketSnapshot>>;

    /// Regime label, or `None` when the classifier has not labelled the day
    async fn regime(&self, symbol: &str, date: NaiveDate) -> Result<Option<Regime>>;
}

/// In-memory inputs (for replays and testing)
#[derive(Debug, Clone, Default)]
pub struct InMemoryInputs {
    snapshots: HashMap<(String, NaiveDate), MarketSnapshot>,
    regimes: HashMap<(String, NaiveDate), Regime>,
}

impl InMemoryInputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(mut self, snapshot: MarketSnapshot) -> Self {
        self.snapshots
            .insert((snapshot.symbol.clone(), snapshot.date), snapshot);
        self
    }

    pub fn with_regime(mut self, symbol: impl Into<String>, date: NaiveDate, regime: Regime) -> Self {
        self.regimes.insert((symbol.into(), date), regime);
        self
    }

    pub fn symbols(&self, date: NaiveDate) -> Vec<String> {
        let mut symbols: Vec<String> = self
            .snapshots
            .keys()
            .filter(|(_, d)| *d == date)
            .map(|(s, _)| s.clone())
            .collect();
        symbols.sort();
        symbols
    }
}

#[async_trait]
impl MarketInputs for InMemoryInputs {
    async fn snapshot(&self, symbol: &str, date: NaiveDate) -> Result<Option<MarketSnapshot>> {
        Ok(self.snapshots.get(&(symbol.to_string(), date)).cloned())
    }

    async fn regime(&self, symbol: &str, date: NaiveDate) -> Result<Option<Regime>> {
        Ok(self.regimes.get(&(symbol.to_string(), date)).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::RegimeLabel;

    #[tokio::test]
    async fn test_in_memory_inputs() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let inputs = InMemoryInputs::new()
            .with_snapshot(MarketSnapshot::new("SPY", date, 510.0, 515.0, 505.0, 495.0, 4.0, 4.1, vec![]))
            .with_snapshot(MarketSnapshot::new("QQQ", date, 440.0, 450.0, 440.0, 430.0, 4.5, 4.4, vec![]))
            .with_regime("SPY", date, Regime::new(RegimeLabel::TrendContinuation, 0.9));

        assert!(inputs.snapshot("SPY", date).await.unwrap().is_some());
        assert!(inputs.snapshot("IWM", date).await.unwrap().is_none());
        assert_eq!(
            inputs.regime("SPY", date).await.unwrap().unwrap().label,
            RegimeLabel::TrendContinuation
        );
        assert!(inputs.regime("QQQ", date).await.unwrap().is_none());
        assert_eq!(inputs.symbols(date), vec!["QQQ", "SPY"]);
    }
}
