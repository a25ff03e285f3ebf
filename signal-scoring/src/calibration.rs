// Confidence Calibration
// Adjusts an engine's raw confidence by the band context and attaches a sizing decision

use chrono::NaiveDate;
use common::{BandScore, CalibratedSignal, Regime, ScoringError, ScoringResult, SignalResult};

use crate::sizing::QualitySizer;

/// Share of the engine confidence kept when the band score is 0.0
const CALIBRATION_FLOOR: f64 = 0.7;
/// Extra share added when the band score is 1.0
const CALIBRATION_RANGE: f64 = 0.6;

/// `engine_confidence * (0.7 + 0.6 * composite_score)`, clamped to [0, 1].
///
/// A perfect band score boosts confidence by up to 60%; the worst band score
/// still keeps 70% of it. Callers validate the confidence first.
pub fn calibrated_confidence(engine_confidence: f64, composite_score: f64) -> f64 {
    let composite = composite_score.clamp(0.0, 1.0);
    (engine_confidence * (CALIBRATION_FLOOR + CALIBRATION_RANGE * composite)).clamp(0.0, 1.0)
}

/// Reject confidences outside [0, 1] (NaN included).
pub fn check_confidence(engine: &str, confidence: f64) -> ScoringResult<f64> {
    if (0.0..=1.0).contains(&confidence) {
        Ok(confidence)
    } else {
        Err(ScoringError::InvalidConfidence {
            engine: engine.to_string(),
            confidence,
        })
    }
}

/// Calibrates engine signals against a symbol's band score and sizes them.
#[derive(Debug, Clone, Default)]
pub struct ConfidenceCalibrator {
    sizer: QualitySizer,
}

impl ConfidenceCalibrator {
    pub fn new(sizer: QualitySizer) -> Self {
        Self { sizer }
    }

    pub fn calibrate(
        &self,
        as_of: NaiveDate,
        signal: SignalResult,
        band_score: &BandScore,
        regime: &Regime,
    ) -> ScoringResult<CalibratedSignal> {
        let original_confidence = check_confidence(&signal.engine_name, signal.confidence)?;
        let calibrated = calibrated_confidence(original_confidence, band_score.composite_score);
        let decision = self
            .sizer
            .size(calibrated, band_score.composite_score, regime.stability);

        Ok(CalibratedSignal {
            as_of,
            result: signal,
            band_score: *band_score,
            original_confidence,
            calibrated_confidence: calibrated,
            quality_score: decision.quality_score,
            bucket: decision.bucket,
            position_multiplier: decision.position_multiplier,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use common::{PositionBucket, RegimeLabel, SignalDirection, Timeframe};
    use std::collections::BTreeMap;

    fn band(composite: f64) -> BandScore {
        BandScore {
            position_pct: 0.1,
            position_score: 1.0,
            width_percentile: 0.2,
            width_score: 1.0,
            expansion_score: 0.6,
            composite_score: composite,
        }
    }

    fn signal(confidence: f64) -> SignalResult {
        let generated_at = Utc.with_ymd_and_hms(2024, 3, 1, 21, 0, 0).unwrap();
        SignalResult {
            symbol: "NVDA".to_string(),
            engine_name: "mean_reversion".to_string(),
            timeframe: Timeframe::Swing,
            signal: SignalDirection::Buy,
            confidence,
            position_size_pct: 4.0,
            entry_price_range: None,
            stop_loss: None,
            take_profit: None,
            reasoning: vec!["Price at lower band".to_string()],
            metadata: BTreeMap::new(),
            generated_at,
            expires_at: generated_at + Duration::days(2),
        }
    }

    #[test]
    fn test_calibration_example() {
        assert!((calibrated_confidence(0.5, 1.0) - 0.65).abs() < 1e-12);
        assert!((calibrated_confidence(0.5, 0.0) - 0.35).abs() < 1e-12);
    }

    #[test]
    fn test_calibration_clamped() {
        assert_eq!(calibrated_confidence(0.9, 1.0), 1.0);
        assert_eq!(calibrated_confidence(0.0, 1.0), 0.0);
    }

    #[test]
    fn test_monotonic_in_composite() {
        for confidence in [0.0, 0.1, 0.35, 0.5, 0.77, 1.0] {
            let mut previous = calibrated_confidence(confidence, 0.0);
            for step in 1..=100 {
                let composite = step as f64 / 100.0;
                let current = calibrated_confidence(confidence, composite);
                assert!(current >= previous);
                assert!((0.0..=1.0).contains(&current));
                previous = current;
            }
        }
    }

    #[test]
    fn test_invalid_confidence_rejected() {
        assert!(check_confidence("x", 1.01).is_err());
        assert!(check_confidence("x", -0.01).is_err());
        assert!(check_confidence("x", f64::NAN).is_err());
        assert_eq!(check_confidence("x", 1.0).unwrap(), 1.0);

        let calibrator = ConfidenceCalibrator::default();
        let regime = Regime::new(RegimeLabel::MeanReversion, 0.5);
        let err = calibrator
            .calibrate(signal(1.2).generated_at.date_naive(), signal(1.2), &band(0.5), &regime)
            .unwrap_err();
        assert_eq!(
            err,
            ScoringError::InvalidConfidence {
                engine: "mean_reversion".to_string(),
                confidence: 1.2
            }
        );
    }

    #[test]
    fn test_calibrated_signal_fields() {
        let calibrator = ConfidenceCalibrator::default();
        let regime = Regime::new(RegimeLabel::MeanReversion, 1.0);
        let as_of = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();

        let calibrated = calibrator
            .calibrate(as_of, signal(0.5), &band(1.0), &regime)
            .unwrap();

        assert_eq!(calibrated.original_confidence, 0.5);
        assert!((calibrated.calibrated_confidence - 0.65).abs() < 1e-12);
        // 0.6*0.65 + 0.3*1.0 + 0.1*1.0 = 0.79
        assert!((calibrated.quality_score - 0.79).abs() < 1e-9);
        assert_eq!(calibrated.bucket, PositionBucket::Full);
        assert_eq!(calibrated.position_multiplier, 1.0);
        assert_eq!(calibrated.result.reasoning, vec!["Price at lower band".to_string()]);
        assert_eq!(calibrated.as_of, as_of);
    }
}
