//! Market inputs consumed by the scoring pipeline: band snapshots and regime labels.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{ScoringError, ScoringResult};

/// Price and volatility-band data for one symbol on one trading day,
/// as delivered by the snapshot provider. Band fields are optional because
/// the provider may not have enough bars to compute them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub symbol: String,
    pub date: NaiveDate,
    pub price: f64,
    pub band_upper: Option<f64>,
    pub band_middle: Option<f64>,
    pub band_lower: Option<f64>,
    pub band_width: Option<f64>,
    pub band_width_previous: Option<f64>,
    /// Past band widths, most recent last.
    #[serde(default)]
    pub band_width_history: Vec<f64>,
}

/// A snapshot that passed validation; every field is present and finite.
#[derive(Debug, Clone, PartialEq)]
pub struct BandInputs {
    pub price: f64,
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
    pub width: f64,
    pub width_previous: f64,
    pub width_history: Vec<f64>,
}

impl MarketSnapshot {
    /// Snapshot with complete band data.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: impl Into<String>,
        date: NaiveDate,
        price: f64,
        band_upper: f64,
        band_middle: f64,
        band_lower: f64,
        band_width: f64,
        band_width_previous: f64,
        band_width_history: Vec<f64>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            date,
            price,
            band_upper: Some(band_upper),
            band_middle: Some(band_middle),
            band_lower: Some(band_lower),
            band_width: Some(band_width),
            band_width_previous: Some(band_width_previous),
            band_width_history,
        }
    }

    /// Check the snapshot and extract the band inputs.
    ///
    /// A missing previous width is treated as zero, which the expansion
    /// scorer maps to "no change". Non-finite history samples are dropped.
    pub fn validate(&self) -> ScoringResult<BandInputs> {
        if !self.price.is_finite() || self.price < 0.0 {
            return Err(self.invalid(format!("price {} is not a non-negative number", self.price)));
        }

        let upper = self.required("band_upper", self.band_upper)?;
        let middle = self.required("band_middle", self.band_middle)?;
        let lower = self.required("band_lower", self.band_lower)?;
        let width = self.required("band_width", self.band_width)?;

        if upper < lower {
            return Err(self.invalid(format!("band_upper {} is below band_lower {}", upper, lower)));
        }
        if width < 0.0 {
            return Err(self.invalid(format!("band_width {} is negative", width)));
        }

        let width_previous = match self.band_width_previous {
            Some(prev) if !prev.is_finite() || prev < 0.0 => {
                return Err(self.invalid(format!("band_width_previous {} is invalid", prev)));
            }
            Some(prev) => prev,
            None => 0.0,
        };

        let width_history = self
            .band_width_history
            .iter()
            .copied()
            .filter(|w| w.is_finite())
            .collect();

        Ok(BandInputs {
            price: self.price,
            upper,
            middle,
            lower,
            width,
            width_previous,
            width_history,
        })
    }

    fn required(&self, field: &str, value: Option<f64>) -> ScoringResult<f64> {
        match value {
            Some(v) if v.is_finite() => Ok(v),
            Some(v) => Err(self.invalid(format!("{} is not finite ({})", field, v))),
            None => Err(self.invalid(format!("{} is missing", field))),
        }
    }

    fn invalid(&self, reason: String) -> ScoringError {
        ScoringError::InvalidMarketSnapshot {
            symbol: self.symbol.clone(),
            reason,
        }
    }
}

/// Coarse market-behaviour label from the regime classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RegimeLabel {
    MeanReversion,
    TrendContinuation,
    Breakout,
    VolatilityExpansion,
    #[default]
    Unknown,
}

impl RegimeLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegimeLabel::MeanReversion => "MEAN_REVERSION",
            RegimeLabel::TrendContinuation => "TREND_CONTINUATION",
            RegimeLabel::Breakout => "BREAKOUT",
            RegimeLabel::VolatilityExpansion => "VOLATILITY_EXPANSION",
            RegimeLabel::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for RegimeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RegimeLabel {
    type Err = std::convert::Infallible;

    /// Unrecognised labels map to `Unknown` rather than failing the symbol.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let label = match s.trim().to_ascii_uppercase().as_str() {
            "MEAN_REVERSION" => RegimeLabel::MeanReversion,
            "TREND_CONTINUATION" => RegimeLabel::TrendContinuation,
            "BREAKOUT" => RegimeLabel::Breakout,
            "VOLATILITY_EXPANSION" => RegimeLabel::VolatilityExpansion,
            _ => RegimeLabel::Unknown,
        };
        Ok(label)
    }
}

/// Regime label plus how stable the classification has been, in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Regime {
    pub label: RegimeLabel,
    pub stability: f64,
}

impl Regime {
    pub fn new(label: RegimeLabel, stability: f64) -> Self {
        let stability = if stability.is_nan() {
            0.0
        } else {
            stability.clamp(0.0, 1.0)
        };
        Self { label, stability }
    }

    pub fn unknown() -> Self {
        Self::new(RegimeLabel::Unknown, 0.0)
    }
}

impl Default for Regime {
    fn default() -> Self {
        Self::unknown()
    }
}
