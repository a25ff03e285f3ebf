// Quality-Based Position Sizing
// Maps calibrated confidence, band context and regime stability onto a small
// set of auditable position-size multipliers

use common::PositionBucket;
use serde::{Deserialize, Serialize};

/// Quality at or above which a signal gets full size
pub const FULL_SIZE_THRESHOLD: f64 = 0.75;
/// Quality at or above which a signal gets reduced size
pub const REDUCED_SIZE_THRESHOLD: f64 = 0.55;
/// Quality at or above which a signal gets minimal size; below is rejected
pub const MINIMAL_SIZE_THRESHOLD: f64 = 0.40;

const CONFIDENCE_WEIGHT: f64 = 0.6;
const BAND_WEIGHT: f64 = 0.3;
const STABILITY_WEIGHT: f64 = 0.1;

/// Quality scores are rounded to this many steps per unit so that a blend
/// landing exactly on a bucket threshold is not pushed below it by binary
/// rounding in the weighted sum.
const QUALITY_PRECISION: f64 = 1e9;

/// Blend of calibrated confidence, band composite and regime stability, in [0, 1]
pub fn quality_score(calibrated_confidence: f64, composite_score: f64, regime_stability: f64) -> f64 {
    let blended = CONFIDENCE_WEIGHT * calibrated_confidence
        + BAND_WEIGHT * composite_score
        + STABILITY_WEIGHT * regime_stability;
    ((blended * QUALITY_PRECISION).round() / QUALITY_PRECISION).clamp(0.0, 1.0)
}

/// First matching bucket from the top. NaN falls through to `Reject`.
pub fn bucket_for(quality_score: f64) -> PositionBucket {
    if quality_score >= FULL_SIZE_THRESHOLD {
        PositionBucket::Full
    } else if quality_score >= REDUCED_SIZE_THRESHOLD {
        PositionBucket::Reduced
    } else if quality_score >= MINIMAL_SIZE_THRESHOLD {
        PositionBucket::Minimal
    } else {
        PositionBucket::Reject
    }
}

/// Outcome of sizing a single signal
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SizingDecision {
    pub quality_score: f64,
    pub bucket: PositionBucket,
    pub position_multiplier: f64,
}

impl SizingDecision {
    pub fn is_rejected(&self) -> bool {
        self.bucket == PositionBucket::Reject
    }
}

/// Quality-based position sizer
#[derive(Debug, Clone, Copy, Default)]
pub struct QualitySizer;

impl QualitySizer {
    pub fn new() -> Self {
        Self
    }

    pub fn size(
        &self,
        calibrated_confidence: f64,
        composite_score: f64,
        regime_stability: f64,
    ) -> SizingDecision {
        let quality_score = quality_score(calibrated_confidence, composite_score, regime_stability);
        let bucket = bucket_for(quality_score);

        SizingDecision {
            quality_score,
            bucket,
            position_multiplier: bucket.multiplier(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_boundaries_exact() {
        assert_eq!(bucket_for(0.75).multiplier(), 1.0);
        assert_eq!(bucket_for(0.749999).multiplier(), 0.7);
        assert_eq!(bucket_for(0.55).multiplier(), 0.7);
        assert_eq!(bucket_for(0.549999).multiplier(), 0.3);
        assert_eq!(bucket_for(0.40).multiplier(), 0.3);
        assert_eq!(bucket_for(0.399999).multiplier(), 0.0);
        assert_eq!(bucket_for(1.0), PositionBucket::Full);
        assert_eq!(bucket_for(0.0), PositionBucket::Reject);
        assert_eq!(bucket_for(f64::NAN), PositionBucket::Reject);
    }

    #[test]
    fn test_quality_score_weights() {
        let q = quality_score(0.8, 0.6, 0.5);
        assert!((q - (0.48 + 0.18 + 0.05)).abs() < 1e-12);

        assert_eq!(quality_score(1.0, 1.0, 1.0), 1.0);
        assert_eq!(quality_score(0.0, 0.0, 0.0), 0.0);
    }

    #[test]
    fn test_sizer_decision() {
        let sizer = QualitySizer::new();

        let strong = sizer.size(0.95, 0.9, 0.8);
        assert_eq!(strong.bucket, PositionBucket::Full);
        assert_eq!(strong.position_multiplier, 1.0);

        let weak = sizer.size(0.2, 0.3, 0.1);
        assert!(weak.is_rejected());
        assert_eq!(weak.position_multiplier, 0.0);

        // 0.6*0.6 + 0.3*0.5 + 0.1*0.4 = 0.55
        let reduced = sizer.size(0.6, 0.5, 0.4);
        assert_eq!(reduced.quality_score, 0.55);
        assert_eq!(reduced.bucket, PositionBucket::Reduced);
    }

    #[test]
    fn test_threshold_exact_blends_keep_their_bucket() {
        assert_eq!(QualitySizer::new().size(1.0, 1.0, 1.0).bucket, PositionBucket::Full);

        // 0.03 + 0.3 + 0.07 = 0.40
        assert_eq!(bucket_for(quality_score(0.05, 1.0, 0.7)), PositionBucket::Minimal);
        // 0.03 + 0.285 + 0.085 = 0.40
        assert_eq!(bucket_for(quality_score(0.05, 0.95, 0.85)), PositionBucket::Minimal);
        // 0.6 + 0.15 + 0.0 = 0.75
        assert_eq!(bucket_for(quality_score(1.0, 0.5, 0.0)), PositionBucket::Full);

        // 0.6 + 0.1499991 = 0.7499991 is still below full size
        assert_eq!(bucket_for(quality_score(1.0, 0.499997, 0.0)), PositionBucket::Reduced);
    }

    #[test]
    fn test_threshold_grid_never_drifts_low() {
        for c in 0..=20 {
            for b in 0..=20 {
                for s in 0..=20 {
                    let (c, b, s) = (c as f64 * 0.05, b as f64 * 0.05, s as f64 * 0.05);
                    let q = quality_score(c, b, s);
                    for threshold in [FULL_SIZE_THRESHOLD, REDUCED_SIZE_THRESHOLD, MINIMAL_SIZE_THRESHOLD] {
                        if (q - threshold).abs() < 1e-6 {
                            assert!(q >= threshold, "q({}, {}, {}) = {} below {}", c, b, s, q, threshold);
                        }
                    }
                }
            }
        }
    }
}
