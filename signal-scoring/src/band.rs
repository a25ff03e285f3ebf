// Band Scoring Engine
// Turns a volatility-band snapshot into a regime-weighted score in [0, 1]

use common::{BandInputs, BandScore, MarketSnapshot, Regime, RegimeLabel, ScoringResult};

use crate::config::BandScoringConfig;

/// Weights applied to (position, width, expansion). Each set sums to 1.0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegimeWeights {
    pub position: f64,
    pub width: f64,
    pub expansion: f64,
}

impl RegimeWeights {
    pub const fn new(position: f64, width: f64, expansion: f64) -> Self {
        Self {
            position,
            width,
            expansion,
        }
    }

    pub fn for_regime(label: RegimeLabel) -> Self {
        match label {
            // Stretch from the mean matters most when price tends to revert
            RegimeLabel::MeanReversion => Self::new(0.6, 0.3, 0.1),
            RegimeLabel::TrendContinuation => Self::new(0.3, 0.2, 0.5),
            RegimeLabel::Breakout => Self::new(0.2, 0.5, 0.3),
            RegimeLabel::VolatilityExpansion => Self::new(0.2, 0.6, 0.2),
            RegimeLabel::Unknown => Self::new(0.4, 0.3, 0.3),
        }
    }

    pub fn combine(&self, position: f64, width: f64, expansion: f64) -> f64 {
        (self.position * position + self.width * width + self.expansion * expansion).clamp(0.0, 1.0)
    }
}

/// %B: where price sits between the bands, clamped to [0, 1].
/// Degenerate bands (upper == lower) give 0.5.
pub fn position_pct(price: f64, lower: f64, upper: f64) -> f64 {
    let range = upper - lower;
    if range == 0.0 {
        return 0.5;
    }
    ((price - lower) / range).clamp(0.0, 1.0)
}

/// Inclusive rank of `width` within `history`. Falls back to 0.5 when the
/// history is too short to rank against.
pub fn width_percentile(width: f64, history: &[f64], min_history: usize) -> f64 {
    if history.is_empty() || history.len() < min_history {
        return 0.5;
    }
    let at_or_below = history.iter().filter(|w| **w <= width).count();
    at_or_below as f64 / history.len() as f64
}

/// Low %B means price is stretched down (oversold) and scores high.
pub fn position_score(position_pct: f64) -> f64 {
    if position_pct <= 0.15 {
        1.0
    } else if position_pct <= 0.35 {
        0.7
    } else if position_pct <= 0.65 {
        0.5
    } else if position_pct <= 0.85 {
        0.3
    } else {
        0.0
    }
}

/// Tight bands (low percentile) mean energy is building and score high.
pub fn width_score(width_percentile: f64) -> f64 {
    if width_percentile <= 0.20 {
        1.0
    } else if width_percentile <= 0.40 {
        0.7
    } else if width_percentile <= 0.60 {
        0.5
    } else if width_percentile <= 0.80 {
        0.3
    } else {
        0.0
    }
}

/// Score the period-over-period change in band width.
pub fn expansion_score(
    width: f64,
    width_previous: f64,
    regime: RegimeLabel,
    config: &BandScoringConfig,
) -> f64 {
    let delta = if width_previous == 0.0 {
        0.0
    } else {
        (width - width_previous) / width_previous
    };

    if delta > config.expansion_spike_threshold {
        0.0
    } else if delta.abs() < config.expansion_stable_threshold {
        0.6
    } else if delta > 0.0 {
        match regime {
            RegimeLabel::Breakout | RegimeLabel::VolatilityExpansion => 1.0,
            RegimeLabel::MeanReversion => 0.2,
            RegimeLabel::TrendContinuation | RegimeLabel::Unknown => 0.7,
        }
    } else {
        0.4
    }
}

/// Band scoring engine
#[derive(Debug, Clone, Default)]
pub struct BandScorer {
    config: BandScoringConfig,
}

impl BandScorer {
    pub fn new(config: BandScoringConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BandScoringConfig {
        &self.config
    }

    /// Validate the snapshot and score it. Fails with `InvalidMarketSnapshot`
    /// when price or band data is missing or malformed.
    pub fn score(&self, snapshot: &MarketSnapshot, regime: &Regime) -> ScoringResult<BandScore> {
        let inputs = snapshot.validate()?;
        Ok(self.score_inputs(&inputs, regime))
    }

    pub fn score_inputs(&self, inputs: &BandInputs, regime: &Regime) -> BandScore {
        let position_pct = position_pct(inputs.price, inputs.lower, inputs.upper);
        let width_percentile = width_percentile(
            inputs.width,
            &inputs.width_history,
            self.config.min_width_history,
        );

        let position_score = position_score(position_pct);
        let width_score = width_score(width_percentile);
        let expansion_score =
            expansion_score(inputs.width, inputs.width_previous, regime.label, &self.config);

        let composite_score = RegimeWeights::for_regime(regime.label).combine(
            position_score,
            width_score,
            expansion_score,
        );

        BandScore {
            position_pct,
            position_score,
            width_percentile,
            width_score,
            expansion_score,
            composite_score,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    const ALL_REGIMES: [RegimeLabel; 5] = [
        RegimeLabel::MeanReversion,
        RegimeLabel::TrendContinuation,
        RegimeLabel::Breakout,
        RegimeLabel::VolatilityExpansion,
        RegimeLabel::Unknown,
    ];

    fn snapshot(price: f64, upper: f64, lower: f64, width: f64, prev: f64, history: Vec<f64>) -> MarketSnapshot {
        MarketSnapshot::new(
            "AAPL",
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            price,
            upper,
            (upper + lower) / 2.0,
            lower,
            width,
            prev,
            history,
        )
    }

    /// 25 samples, exactly 5 of which are <= 10.0
    fn squeeze_history() -> Vec<f64> {
        let mut history = vec![8.0, 9.0, 9.5, 10.0, 7.5];
        history.extend(std::iter::repeat(15.0).take(20));
        history
    }

    #[test]
    fn test_weights_sum_to_one() {
        for label in ALL_REGIMES {
            let w = RegimeWeights::for_regime(label);
            assert!((w.position + w.width + w.expansion - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_mean_reversion_example() {
        let scorer = BandScorer::default();
        let regime = Regime::new(RegimeLabel::MeanReversion, 0.8);
        let snap = snapshot(100.0, 120.0, 100.0, 10.0, 10.0, squeeze_history());

        let score = scorer.score(&snap, &regime).unwrap();
        assert_eq!(score.position_pct, 0.0);
        assert_eq!(score.position_score, 1.0);
        assert_eq!(score.width_percentile, 0.2);
        assert_eq!(score.width_score, 1.0);
        assert_eq!(score.expansion_score, 0.6);
        assert!((score.composite_score - 0.96).abs() < 1e-9);
    }

    #[test]
    fn test_degenerate_bands() {
        assert_eq!(position_pct(42.0, 50.0, 50.0), 0.5);

        let scorer = BandScorer::default();
        let snap = snapshot(55.0, 50.0, 50.0, 0.0, 0.0, vec![]);
        let score = scorer.score(&snap, &Regime::unknown()).unwrap();
        assert_eq!(score.position_pct, 0.5);
    }

    #[test]
    fn test_position_pct_clamped() {
        assert_eq!(position_pct(130.0, 100.0, 120.0), 1.0);
        assert_eq!(position_pct(90.0, 100.0, 120.0), 0.0);
        assert_eq!(position_pct(110.0, 100.0, 120.0), 0.5);
    }

    #[test]
    fn test_short_history_is_neutral() {
        let history = vec![1.0; 19];
        assert_eq!(width_percentile(5.0, &history, 20), 0.5);
        assert_eq!(width_percentile(5.0, &[], 0), 0.5);

        let history = vec![1.0; 20];
        assert_eq!(width_percentile(5.0, &history, 20), 1.0);
    }

    #[test]
    fn test_position_score_boundaries() {
        assert_eq!(position_score(0.15), 1.0);
        assert_eq!(position_score(0.16), 0.7);
        assert_eq!(position_score(0.35), 0.7);
        assert_eq!(position_score(0.65), 0.5);
        assert_eq!(position_score(0.85), 0.3);
        assert_eq!(position_score(0.86), 0.0);
    }

    #[test]
    fn test_width_score_boundaries() {
        assert_eq!(width_score(0.20), 1.0);
        assert_eq!(width_score(0.40), 0.7);
        assert_eq!(width_score(0.60), 0.5);
        assert_eq!(width_score(0.80), 0.3);
        assert_eq!(width_score(0.81), 0.0);
    }

    #[test]
    fn test_expansion_score_by_regime() {
        let config = BandScoringConfig::default();

        // +60% is a spike regardless of regime
        for label in ALL_REGIMES {
            assert_eq!(expansion_score(16.0, 10.0, label, &config), 0.0);
        }

        // +/-5% is stable
        assert_eq!(expansion_score(10.5, 10.0, RegimeLabel::Breakout, &config), 0.6);
        assert_eq!(expansion_score(9.5, 10.0, RegimeLabel::Breakout, &config), 0.6);

        // +30% expansion depends on regime
        assert_eq!(expansion_score(13.0, 10.0, RegimeLabel::Breakout, &config), 1.0);
        assert_eq!(expansion_score(13.0, 10.0, RegimeLabel::VolatilityExpansion, &config), 1.0);
        assert_eq!(expansion_score(13.0, 10.0, RegimeLabel::MeanReversion, &config), 0.2);
        assert_eq!(expansion_score(13.0, 10.0, RegimeLabel::TrendContinuation, &config), 0.7);
        assert_eq!(expansion_score(13.0, 10.0, RegimeLabel::Unknown, &config), 0.7);

        // -30% is contracting
        assert_eq!(expansion_score(7.0, 10.0, RegimeLabel::Breakout, &config), 0.4);

        // Zero previous width means no measurable change
        assert_eq!(expansion_score(7.0, 0.0, RegimeLabel::Breakout, &config), 0.6);
    }

    #[test]
    fn test_expansion_thresholds_configurable() {
        let config = BandScoringConfig {
            expansion_spike_threshold: 0.2,
            expansion_stable_threshold: 0.02,
            ..BandScoringConfig::default()
        };
        assert_eq!(expansion_score(13.0, 10.0, RegimeLabel::Breakout, &config), 0.0);
        assert_eq!(expansion_score(10.5, 10.0, RegimeLabel::Breakout, &config), 1.0);
    }

    #[test]
    fn test_scores_stay_in_unit_interval() {
        let scorer = BandScorer::default();
        let history: Vec<f64> = (1..=30).map(|i| i as f64).collect();

        for label in ALL_REGIMES {
            let regime = Regime::new(label, 0.5);
            for price in [0.0, 50.0, 95.0, 100.0, 105.0, 110.0, 200.0] {
                for (width, prev) in [(5.0, 10.0), (10.0, 10.0), (12.0, 10.0), (30.0, 10.0), (3.0, 0.0)] {
                    let snap = snapshot(price, 110.0, 100.0, width, prev, history.clone());
                    let s = scorer.score(&snap, &regime).unwrap();
                    for v in [
                        s.position_pct,
                        s.position_score,
                        s.width_percentile,
                        s.width_score,
                        s.expansion_score,
                        s.composite_score,
                    ] {
                        assert!((0.0..=1.0).contains(&v), "{:?} out of range: {:?}", label, s);
                    }
                }
            }
        }
    }

    #[test]
    fn test_invalid_snapshot_rejected() {
        let scorer = BandScorer::default();
        let mut snap = snapshot(100.0, 120.0, 100.0, 10.0, 10.0, vec![]);
        snap.band_upper = None;
        assert!(matches!(
            scorer.score(&snap, &Regime::unknown()),
            Err(common::ScoringError::InvalidMarketSnapshot { .. })
        ));
    }
}
