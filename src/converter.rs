//! Numeric remapping of raw sampled values
//!
//! A [`RangeConverter`] maps a value from a device's logical domain onto a target
//! range, `domain_min` to `target_min` and `domain_max` to `target_max` (reversed
//! bounds declare an inverted axis). The domain midpoint lands on `center`, so the two halves of the domain
//! can be scaled independently (useful for triggers whose rest position is not the
//! middle of the target range). When there is no sample yet, `rest` is returned.

use serde::{Deserialize, Serialize};

/// Maps `raw` from `[domain_min, domain_max]` onto `[0, 1]`, returning `rest` when
/// there is no sample.
pub fn convert(raw: Option<f64>, domain_min: f64, domain_max: f64, rest: f64) -> f64 {
    RangeConverter::new(0.0, 1.0, 0.5, rest).convert(raw, domain_min, domain_max)
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RangeConverter {
    pub target_min: f64,
    pub target_max: f64,
    pub center: f64,
    pub rest: f64,
}

impl RangeConverter {
    /// Trigger preset: `[0, 1]`, midpoint 0.5, resting at 0
    pub const TRIGGER: RangeConverter = RangeConverter::new(0.0, 1.0, 0.5, 0.0);

    /// Stick axis preset: `[-1, 1]`, centered and resting at 0
    pub const STICK: RangeConverter = RangeConverter::new(-1.0, 1.0, 0.0, 0.0);

    /// Unit preset: plain linear `[0, 1]`, resting at the midpoint
    pub const UNIT: RangeConverter = RangeConverter::new(0.0, 1.0, 0.5, 0.5);

    pub const fn new(target_min: f64, target_max: f64, center: f64, rest: f64) -> Self {
        Self {
            target_min,
            target_max,
            center,
            rest,
        }
    }

    pub fn convert(&self, raw: Option<f64>, domain_min: f64, domain_max: f64) -> f64 {
        let Some(raw) = raw else {
            return self.rest;
        };

        let span = domain_max - domain_min;
        if !span.is_finite() || span.abs() <= f64::EPSILON || !raw.is_finite() {
            return self.rest;
        }

        // Position within the domain; reversed bounds invert the axis
        let t = ((raw - domain_min) / span).clamp(0.0, 1.0);

        // Each half of the domain maps onto its own half of the target range
        if t <= 0.5 {
            self.target_min + (t * 2.0) * (self.center - self.target_min)
        } else {
            self.center + ((t - 0.5) * 2.0) * (self.target_max - self.center)
        }
    }
}

impl Default for RangeConverter {
    fn default() -> Self {
        Self::UNIT
    }
}
