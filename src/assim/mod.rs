//! Ensemble filtering assimilation of observed LAI.
//!
//! For every pixel of a tile, the [`AssimilationEngine`] keeps the ensemble members whose
//! simulated LAI lies within a tolerance band around the observed LAI and reports the mean and
//! the population standard deviation of the final yield of the surviving members.
//!
//! # Rules
//!
//! - An observation is valid if it lies within [`AssimilationSettings::valid_range`] (inclusive).
//!   Invalid or NaN observations do not constrain the filter.
//! - A member is consistent with a pixel if the absolute difference between observation and
//!   simulation is strictly below [`AssimilationSettings::threshold`] at every valid time step
//!   ([`ConsistencyRule::AllSteps`]), or at a minimum fraction of the valid time steps
//!   ([`ConsistencyRule::MinFraction`]).
//! - Yields that are exactly zero are excluded if [`AssimilationSettings::drop_zero_yield`] is
//!   set, and NaN yields are always ignored.
//! - A pixel without any remaining yield is missing (NaN) in both output arrays.

mod engine;

pub use engine::AssimilationEngine;

use crate::tiling::BlockSpec;
use derive_builder::Builder;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors associated with the assimilation of a tile.
#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum AssimilationError {
    #[error("invalid assimilation settings: {msg}")]
    InvalidSettings { msg: &'static str },
    #[error("observation array of tile {spec:?} has shape {found:?}, expected {expected:?}")]
    ShapeMismatch {
        spec: BlockSpec,
        expected: (usize, usize),
        found: (usize, usize),
    },
    #[error("ensemble provides {found} time steps but tile {spec:?} requires {required}")]
    TrajectoryLengthMismatch {
        spec: BlockSpec,
        found: usize,
        required: usize,
    },
}

/// The rule deciding whether an ensemble member is consistent with the observations of a pixel.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Serialize)]
pub enum ConsistencyRule {
    /// The member must agree at every valid time step.
    #[default]
    AllSteps,

    /// The member must agree at no less than the given fraction of the valid time steps.
    MinFraction(f64),
}

/// A data structure that holds the assimilation settings.
#[derive(Builder, Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct AssimilationSettings {
    /// Drop yields that are exactly zero (sentinel of failed members).
    #[builder(default = true)]
    pub drop_zero_yield: bool,

    /// The consistency rule applied over time.
    #[builder(default)]
    pub rule: ConsistencyRule,

    /// Tolerance band, in LAI units. Differences must be strictly smaller.
    #[builder(default = 3.5)]
    pub threshold: f64,

    /// Inclusive range of valid observed LAI values.
    #[builder(default = (0.0, 10.0))]
    pub valid_range: (f64, f64),
}

impl Default for AssimilationSettings {
    fn default() -> Self {
        Self {
            drop_zero_yield: true,
            rule: ConsistencyRule::AllSteps,
            threshold: 3.5,
            valid_range: (0.0, 10.0),
        }
    }
}

impl AssimilationSettings {
    /// Check the settings for invalid values.
    pub fn validate(&self) -> Result<(), AssimilationError> {
        if !(self.threshold.is_finite() && self.threshold > 0.0) {
            return Err(AssimilationError::InvalidSettings {
                msg: "threshold must be a positive finite number",
            });
        }

        if self.valid_range.0.is_nan()
            || self.valid_range.1.is_nan()
            || self.valid_range.0 > self.valid_range.1
        {
            return Err(AssimilationError::InvalidSettings {
                msg: "valid range minimum must not exceed the maximum",
            });
        }

        if let ConsistencyRule::MinFraction(fraction) = self.rule {
            if !(fraction > 0.0 && fraction <= 1.0) {
                return Err(AssimilationError::InvalidSettings {
                    msg: "minimum fraction must lie within (0, 1]",
                });
            }
        }

        Ok(())
    }
}

/// Per-pixel yield statistics of a single tile.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct AssimilationResult<T> {
    /// The pixel window the statistics belong to.
    pub spec: BlockSpec,

    /// Mean yield, shaped (rows, columns). NaN where no member matched.
    pub mean: Array2<T>,

    /// Population standard deviation of the yield, shaped (rows, columns). NaN where no member
    /// matched.
    pub std: Array2<T>,
}

impl<T> AssimilationResult<T>
where
    T: crate::fXX,
{
    /// Create an [`AssimilationResult`] where every pixel is missing.
    pub fn missing(spec: BlockSpec) -> Self {
        Self {
            spec,
            mean: Array2::from_elem(spec.shape(), T::nan()),
            std: Array2::from_elem(spec.shape(), T::nan()),
        }
    }

    /// Returns the number of pixels with a finite mean yield.
    pub fn count_valid(&self) -> usize {
        self.mean.iter().filter(|value| value.is_finite()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings() {
        let settings = AssimilationSettingsBuilder::default().build().unwrap();

        assert!(settings == AssimilationSettings::default());
        assert!(settings.threshold == 3.5);
        assert!(settings.validate().is_ok());

        let relaxed = AssimilationSettingsBuilder::default()
            .threshold(1.0)
            .rule(ConsistencyRule::MinFraction(0.5))
            .build()
            .unwrap();

        assert!(relaxed.validate().is_ok());

        let partial: AssimilationSettings = serde_json::from_str(r#"{"threshold": 2.0}"#).unwrap();

        assert!(partial.threshold == 2.0);
        assert!(partial.valid_range == (0.0, 10.0));
        assert!(partial.drop_zero_yield);

        for invalid in [
            AssimilationSettings {
                threshold: 0.0,
                ..Default::default()
            },
            AssimilationSettings {
                valid_range: (10.0, 0.0),
                ..Default::default()
            },
            AssimilationSettings {
                rule: ConsistencyRule::MinFraction(1.5),
                ..Default::default()
            },
        ] {
            assert!(matches!(
                invalid.validate(),
                Err(AssimilationError::InvalidSettings { .. })
            ));
        }
    }
}
