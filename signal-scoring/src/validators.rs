// Signal Validators
// Checks raw engine output before it is calibrated; a failure rejects only that engine's signal

use common::{ScoringError, ScoringResult, SignalResult};
use tracing::debug;

use crate::calibration::check_confidence;

/// What the pipeline asked the engine for
#[derive(Debug, Clone, Copy)]
pub struct ValidationContext<'a> {
    pub symbol: &'a str,
    pub engine: &'a str,
}

/// Trait for signal validators
pub trait SignalValidator: Send + Sync {
    fn validate(&self, ctx: &ValidationContext<'_>, signal: &SignalResult) -> ScoringResult<()>;
}

fn invalid(ctx: &ValidationContext<'_>, reason: String) -> ScoringError {
    ScoringError::InvalidSignal {
        engine: ctx.engine.to_string(),
        reason,
    }
}

/// Confidence must lie in [0, 1]
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfidenceRangeValidator;

impl SignalValidator for ConfidenceRangeValidator {
    fn validate(&self, ctx: &ValidationContext<'_>, signal: &SignalResult) -> ScoringResult<()> {
        check_confidence(ctx.engine, signal.confidence)?;
        Ok(())
    }
}

/// `expires_at` must come strictly after `generated_at`
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpiryWindowValidator;

impl SignalValidator for ExpiryWindowValidator {
    fn validate(&self, ctx: &ValidationContext<'_>, signal: &SignalResult) -> ScoringResult<()> {
        if signal.expires_at <= signal.generated_at {
            return Err(invalid(
                ctx,
                format!(
                    "expires_at {} is not after generated_at {}",
                    signal.expires_at, signal.generated_at
                ),
            ));
        }
        Ok(())
    }
}

/// Signal must be for the requested symbol and carry the engine's own name,
/// otherwise it would be stored under someone else's key
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityValidator;

impl SignalValidator for IdentityValidator {
    fn validate(&self, ctx: &ValidationContext<'_>, signal: &SignalResult) -> ScoringResult<()> {
        if signal.symbol != ctx.symbol {
            return Err(invalid(
                ctx,
                format!("signal is for {} but {} was requested", signal.symbol, ctx.symbol),
            ));
        }
        if signal.engine_name != ctx.engine {
            return Err(invalid(
                ctx,
                format!("signal is labelled as engine {}", signal.engine_name),
            ));
        }
        Ok(())
    }
}

/// Suggested position size must be a non-negative number
#[derive(Debug, Clone, Copy, Default)]
pub struct FiniteSizeValidator;

impl SignalValidator for FiniteSizeValidator {
    fn validate(&self, ctx: &ValidationContext<'_>, signal: &SignalResult) -> ScoringResult<()> {
        if !signal.position_size_pct.is_finite() || signal.position_size_pct < 0.0 {
            return Err(invalid(
                ctx,
                format!("position_size_pct {} is invalid", signal.position_size_pct),
            ));
        }
        Ok(())
    }
}

/// Combines multiple validators with AND logic; the first failure wins
#[derive(Default)]
pub struct CompositeValidator {
    validators: Vec<Box<dyn SignalValidator>>,
}

impl CompositeValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Identity, confidence range, expiry window and size checks
    pub fn standard() -> Self {
        Self::new()
            .add_validator(Box::new(IdentityValidator))
            .add_validator(Box::new(ConfidenceRangeValidator))
            .add_validator(Box::new(ExpiryWindowValidator))
            .add_validator(Box::new(FiniteSizeValidator))
    }

    pub fn add_validator(mut self, validator: Box<dyn SignalValidator>) -> Self {
        self.validators.push(validator);
        self
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }
}

impl SignalValidator for CompositeValidator {
    fn validate(&self, ctx: &ValidationContext<'_>, signal: &SignalResult) -> ScoringResult<()> {
        for validator in &self.validators {
            if let Err(e) = validator.validate(ctx, signal) {
                debug!("Signal from {} for {} rejected: {}", ctx.engine, ctx.symbol, e);
                return Err(e);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use common::{SignalDirection, Timeframe};

    const CTX: ValidationContext<'static> = ValidationContext {
        symbol: "AMZN",
        engine: "momentum",
    };

    fn create_test_signal(confidence: f64) -> SignalResult {
        let generated_at = Utc.with_ymd_and_hms(2024, 3, 1, 21, 0, 0).unwrap();
        SignalResult {
            symbol: "AMZN".to_string(),
            engine_name: "momentum".to_string(),
            timeframe: Timeframe::Position,
            signal: SignalDirection::Buy,
            confidence,
            position_size_pct: 2.5,
            entry_price_range: None,
            stop_loss: None,
            take_profit: None,
            reasoning: vec![],
            metadata: Default::default(),
            generated_at,
            expires_at: generated_at + Duration::days(5),
        }
    }

    #[test]
    fn test_confidence_validator() {
        let validator = ConfidenceRangeValidator;
        assert!(validator.validate(&CTX, &create_test_signal(0.8)).is_ok());

        let err = validator.validate(&CTX, &create_test_signal(1.5)).unwrap_err();
        assert!(matches!(err, ScoringError::InvalidConfidence { .. }));
    }

    #[test]
    fn test_expiry_window_validator() {
        let validator = ExpiryWindowValidator;
        let mut signal = create_test_signal(0.8);
        assert!(validator.validate(&CTX, &signal).is_ok());

        signal.expires_at = signal.generated_at;
        assert!(validator.validate(&CTX, &signal).is_err());
    }

    #[test]
    fn test_identity_validator() {
        let validator = IdentityValidator;
        let mut signal = create_test_signal(0.8);
        assert!(validator.validate(&CTX, &signal).is_ok());

        signal.symbol = "AAPL".to_string();
        assert!(validator.validate(&CTX, &signal).is_err());

        let mut signal = create_test_signal(0.8);
        signal.engine_name = "other".to_string();
        assert!(validator.validate(&CTX, &signal).is_err());
    }

    #[test]
    fn test_standard_composite() {
        let validator = CompositeValidator::standard();
        assert_eq!(validator.len(), 4);
        assert!(validator.validate(&CTX, &create_test_signal(0.6)).is_ok());

        let mut signal = create_test_signal(0.6);
        signal.position_size_pct = f64::NAN;
        assert!(validator.validate(&CTX, &signal).is_err());

        assert!(matches!(
            validator.validate(&CTX, &create_test_signal(-0.2)),
            Err(ScoringError::InvalidConfidence { .. })
        ));
    }
}
