// Example: Daily Batch Run
// Scores a small universe with three replayed engines and prints the consensus

use anyhow::Result;
use chrono::{Duration, NaiveDate, TimeZone, Utc};
use common::{MarketSnapshot, Regime, RegimeLabel, SignalDirection, SignalResult, Timeframe};
use rust_decimal_macros::dec;
use signal_scoring::{
    load_config, InMemoryInputs, InMemoryStore, ReplayEngine, RunContext, ScoringConfig,
    ScoringPipeline, SnapshotStore,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => load_config(&path)?,
        None => ScoringConfig::default(),
    };

    let as_of = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
    let inputs = sample_inputs(as_of);
    let symbols = inputs.symbols(as_of);

    let breakout = ReplayEngine::new("breakout")
        .with_signal(as_of, sample_signal("breakout", "AAPL", SignalDirection::Buy, 0.62))
        .with_signal(as_of, sample_signal("breakout", "NVDA", SignalDirection::Sell, 0.71));
    let mean_reversion = ReplayEngine::new("mean_reversion")
        .with_signal(as_of, sample_signal("mean_reversion", "AAPL", SignalDirection::Buy, 0.55))
        .with_signal(as_of, sample_signal("mean_reversion", "NVDA", SignalDirection::Buy, 0.64));
    let trend = ReplayEngine::new("trend")
        .with_signal(as_of, sample_signal("trend", "AAPL", SignalDirection::Hold, 0.3));

    let store = Arc::new(InMemoryStore::new());
    let pipeline = ScoringPipeline::new(config, Arc::new(inputs), store.clone())?
        .add_engine(Arc::new(breakout))?
        .add_engine(Arc::new(mean_reversion))?
        .add_engine(Arc::new(trend))?;
    let pipeline = Arc::new(pipeline);

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Cancelling run, symbols in flight will finish");
            let _ = cancel_tx.send(true);
        }
    });

    let ctx = RunContext::new(as_of).with_evaluated_at(Utc.with_ymd_and_hms(2024, 3, 1, 22, 0, 0).unwrap());
    let summary = pipeline.run(ctx, symbols, cancel_rx).await;

    println!("\n=== Run {} for {} ===", summary.run_id, summary.as_of);
    println!(
        "{} symbols: {} succeeded, {} failed, {} skipped, {} cancelled\n",
        summary.total, summary.succeeded, summary.failed, summary.skipped, summary.cancelled
    );

    for report in &summary.reports {
        let key = common::ConsensusKey::new(report.symbol.as_str(), as_of);
        match store.get_consensus(&key).await? {
            Some(record) => println!(
                "{:<6} {:<5} confidence {:.3} via {} ({} conflicts)",
                record.symbol,
                record.consensus_signal,
                record.consensus_confidence,
                record.recommended_engine,
                record.conflicts.len()
            ),
            None => println!(
                "{:<6} no consensus ({:?}{})",
                report.symbol,
                report.status,
                report.error.as_deref().map(|e| format!(": {}", e)).unwrap_or_default()
            ),
        }

        for signal in store.signals_for(&report.symbol, as_of).await? {
            println!(
                "    {:<15} {:<5} {:.2} -> {:.3} quality {:.3} {:?} size {:.2}%",
                signal.engine_name(),
                signal.direction(),
                signal.original_confidence,
                signal.calibrated_confidence,
                signal.quality_score,
                signal.bucket,
                signal.adjusted_position_size_pct()
            );
        }
    }

    println!("\n{}", serde_json::to_string_pretty(&store.stats().await?)?);
    Ok(())
}

fn sample_inputs(as_of: NaiveDate) -> InMemoryInputs {
    let mut squeeze = vec![8.0, 9.0, 9.5, 10.0, 7.5];
    squeeze.extend(std::iter::repeat(15.0).take(20));
    let expanding: Vec<f64> = (0..30).map(|i| 4.0 + i as f64 * 0.1).collect();

    let mut gappy = MarketSnapshot::new("TSLA", as_of, 180.0, 190.0, 175.0, 160.0, 30.0, 28.0, vec![]);
    gappy.band_lower = None;

    InMemoryInputs::new()
        .with_snapshot(MarketSnapshot::new("AAPL", as_of, 100.0, 120.0, 110.0, 100.0, 10.0, 10.0, squeeze))
        .with_snapshot(MarketSnapshot::new("NVDA", as_of, 880.0, 900.0, 850.0, 800.0, 12.0, 8.0, expanding))
        .with_snapshot(gappy)
        .with_regime("AAPL", as_of, Regime::new(RegimeLabel::MeanReversion, 0.8))
        .with_regime("NVDA", as_of, Regime::new(RegimeLabel::VolatilityExpansion, 0.6))
}

fn sample_signal(engine: &str, symbol: &str, direction: SignalDirection, confidence: f64) -> SignalResult {
    let generated_at = Utc.with_ymd_and_hms(2024, 3, 1, 21, 0, 0).unwrap();
    SignalResult {
        symbol: symbol.to_string(),
        engine_name: engine.to_string(),
        timeframe: Timeframe::Swing,
        signal: direction,
        confidence,
        position_size_pct: 4.0,
        entry_price_range: Some((dec!(99.50), dec!(101.00))),
        stop_loss: Some(dec!(95.00)),
        take_profit: Some(vec![dec!(108.00), dec!(115.00)]),
        reasoning: vec![format!("{} replay for {}", engine, symbol)],
        metadata: BTreeMap::new(),
        generated_at,
        expires_at: generated_at + Duration::days(3),
    }
}
