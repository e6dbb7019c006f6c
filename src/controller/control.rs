//! Consumer-facing controls
//!
//! A [`Control`] wraps one or more axes of its controller. Which axes and how
//! many is decided by the [`ControlKind`] tag; [`Control::create`] is the single
//! factory for every kind and checks the axis count against the kind's arity.

use super::axis::Axis;
use super::builder::ControlCreationError;
use crate::converter::RangeConverter;
use crate::usage::{ControlKind, Usage};
use serde::{Deserialize, Serialize};

/// Eight hat directions, clockwise from north
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HatDirection {
    North,
    NorthEast,
    East,
    SouthEast,
    South,
    SouthWest,
    West,
    NorthWest,
}

impl HatDirection {
    const CLOCKWISE: [HatDirection; 8] = [
        HatDirection::North,
        HatDirection::NorthEast,
        HatDirection::East,
        HatDirection::SouthEast,
        HatDirection::South,
        HatDirection::SouthWest,
        HatDirection::West,
        HatDirection::NorthWest,
    ];

    // Hats report logical_min for north and step clockwise; anything outside is centered
    fn from_raw(raw: i32, logical_min: i32) -> Option<Self> {
        let step = usize::try_from(i64::from(raw) - i64::from(logical_min)).ok()?;
        Self::CLOCKWISE.get(step).copied()
    }
}

/// Decoded state of a control
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ControlValue {
    Button(bool),
    /// Normalized single axis or slider
    Axis(f64),
    Joystick { x: f64, y: f64 },
    /// `None` while the hat is centered
    Hat(Option<HatDirection>),
    DPad {
        up: bool,
        right: bool,
        down: bool,
        left: bool,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Control {
    kind: ControlKind,
    name: String,
    usages: Vec<Usage>,
    axes: Vec<usize>,
}

impl Control {
    /// Builds a control of `kind` over the given axis indices.
    ///
    /// `axes` and `usages` must be in the kind's canonical order.
    pub fn create(
        kind: ControlKind,
        name: String,
        usages: Vec<Usage>,
        axes: Vec<usize>,
    ) -> Result<Self, ControlCreationError> {
        if axes.len() != kind.arity() || usages.len() != axes.len() {
            return Err(ControlCreationError::ArityMismatch {
                kind,
                expected: kind.arity(),
                actual: axes.len(),
            });
        }

        Ok(Self {
            kind,
            name,
            usages,
            axes,
        })
    }

    pub fn kind(&self) -> ControlKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Usages of the wrapped axes, in canonical order
    pub fn usages(&self) -> &[Usage] {
        &self.usages
    }

    /// Indices into the owning controller's axes
    pub fn axis_indices(&self) -> &[usize] {
        &self.axes
    }

    pub fn contains_usage(&self, usage: Usage) -> bool {
        self.usages.contains(&usage)
    }

    /// Decodes the current state from the owning controller's axes
    pub fn read(&self, axes: &[Axis]) -> ControlValue {
        let sample = |slot: usize| self.axes.get(slot).and_then(|index| axes.get(*index));

        match self.kind {
            ControlKind::Button => ControlValue::Button(pressed(sample(0))),
            ControlKind::SingleAxis => {
                ControlValue::Axis(normalize(sample(0), &RangeConverter::STICK))
            }
            ControlKind::Slider => {
                ControlValue::Axis(normalize(sample(0), &RangeConverter::TRIGGER))
            }
            ControlKind::Joystick => ControlValue::Joystick {
                x: normalize(sample(0), &RangeConverter::STICK),
                y: normalize(sample(1), &RangeConverter::STICK),
            },
            ControlKind::Hat => ControlValue::Hat(sample(0).and_then(|axis| {
                axis.value()
                    .and_then(|raw| HatDirection::from_raw(raw, axis.field().logical_min))
            })),
            ControlKind::DPad => ControlValue::DPad {
                up: pressed(sample(0)),
                right: pressed(sample(1)),
                down: pressed(sample(2)),
                left: pressed(sample(3)),
            },
        }
    }
}

fn pressed(axis: Option<&Axis>) -> bool {
    axis.and_then(Axis::value).is_some_and(|raw| raw != 0)
}

fn normalize(axis: Option<&Axis>, converter: &RangeConverter) -> f64 {
    match axis {
        Some(axis) => converter.convert(
            axis.value().map(f64::from),
            f64::from(axis.field().logical_min),
            f64::from(axis.field().logical_max),
        ),
        None => converter.rest,
    }
}
