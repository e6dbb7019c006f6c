//! Usage catalog: which usages become which controls
//!
//! The catalog is assembled once by [`CatalogBuilder`] and is immutable afterwards.
//! It is shared between reconciliation passes behind an `Arc`.
//!
//! # Grouping
//!
//! Some usages only make sense together. An X axis without its Y partner is not a
//! joystick, and a D-pad needs all four directions. Grouped descriptors carry the
//! full sibling list in canonical order:
//!
//! ```text
//! X, Y           ──► Joystick
//! Rx, Ry         ──► Joystick
//! Up, Right, Down, Left ──► DPad
//! ```
//!
//! Z and Rz are sliders (triggers on most gamepads), so they read in `[0, 1]`.
//! The standard catalog has no [`ControlKind::SingleAxis`] entries; custom
//! catalogs use it for centered axes read in `[-1, 1]`.
//!
//! Every member of a group stores the same sibling list, so group assembly does not
//! depend on the order fields appear in a device's descriptor.

use super::{Usage, MAX_BUTTONS};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// What kind of consumer-facing control a usage produces
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ControlKind {
    /// A lone analog axis (throttle, rudder)
    SingleAxis,
    /// Two axes forming a stick
    Joystick,
    /// Slider, dial or wheel
    Slider,
    /// Hat switch reporting one of eight directions
    Hat,
    /// Four directional buttons
    DPad,
    Button,
}

impl ControlKind {
    /// Number of axes a control of this kind is built from
    pub fn arity(self) -> usize {
        match self {
            ControlKind::Joystick => 2,
            ControlKind::DPad => 4,
            ControlKind::SingleAxis | ControlKind::Slider | ControlKind::Hat | ControlKind::Button => 1,
        }
    }
}

impl fmt::Display for ControlKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlKind::SingleAxis => write!(f, "Axis"),
            ControlKind::Joystick => write!(f, "Joystick"),
            ControlKind::Slider => write!(f, "Slider"),
            ControlKind::Hat => write!(f, "Hat"),
            ControlKind::DPad => write!(f, "DPad"),
            ControlKind::Button => write!(f, "Button"),
        }
    }
}

/// Metadata for one recognized usage
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AxisTypeDescriptor {
    usage: Usage,
    name: String,
    kind: ControlKind,
    group: Arc<[Usage]>,
}

impl AxisTypeDescriptor {
    pub fn usage(&self) -> Usage {
        self.usage
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ControlKind {
        self.kind
    }

    /// Sibling usages in canonical order, empty for ungrouped usages
    pub fn group(&self) -> &[Usage] {
        &self.group
    }

    pub fn is_grouped(&self) -> bool {
        !self.group.is_empty()
    }
}

/// Immutable usage -> descriptor table
#[derive(Debug, Clone)]
pub struct UsageCatalog {
    entries: HashMap<Usage, AxisTypeDescriptor>,
}

impl UsageCatalog {
    /// Catalog covering generic desktop axes, sliders, hat, system buttons, D-pad
    /// and the first 256 buttons
    pub fn standard() -> Self {
        CatalogBuilder::default()
            .group(
                ControlKind::Joystick,
                &[(Usage::X, "X-axis"), (Usage::Y, "Y-axis")],
            )
            .single(Usage::Z, "Z-axis", ControlKind::Slider)
            .group(
                ControlKind::Joystick,
                &[(Usage::RX, "RX-axis"), (Usage::RY, "RY-axis")],
            )
            .single(Usage::RZ, "RZ-axis", ControlKind::Slider)
            .single(Usage::SLIDER, "Slider", ControlKind::Slider)
            .single(Usage::DIAL, "Dial", ControlKind::Slider)
            .single(Usage::WHEEL, "Wheel", ControlKind::Slider)
            .single(Usage::HAT_SWITCH, "Hat", ControlKind::Hat)
            .single(Usage::START, "Start", ControlKind::Button)
            .single(Usage::SELECT, "Select", ControlKind::Button)
            .single(Usage::SYSTEM_CONTROL, "System Control", ControlKind::Button)
            .group(
                ControlKind::DPad,
                &[
                    (Usage::DPAD_UP, "D-Pad Up"),
                    (Usage::DPAD_RIGHT, "D-Pad Right"),
                    (Usage::DPAD_DOWN, "D-Pad Down"),
                    (Usage::DPAD_LEFT, "D-Pad Left"),
                ],
            )
            .buttons(MAX_BUTTONS)
            .build()
    }

    pub fn builder() -> CatalogBuilder {
        CatalogBuilder::default()
    }

    pub fn lookup(&self, usage: Usage) -> Option<&AxisTypeDescriptor> {
        self.entries.get(&usage)
    }

    pub fn supports(&self, usage: Usage) -> bool {
        self.entries.contains_key(&usage)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for UsageCatalog {
    fn default() -> Self {
        Self::standard()
    }
}

/// Collects descriptors and freezes them into a [`UsageCatalog`]
#[derive(Debug, Default)]
pub struct CatalogBuilder {
    entries: HashMap<Usage, AxisTypeDescriptor>,
}

impl CatalogBuilder {
    pub fn single(mut self, usage: Usage, name: &str, kind: ControlKind) -> Self {
        self.entries.insert(
            usage,
            AxisTypeDescriptor {
                usage,
                name: name.to_string(),
                kind,
                group: Arc::from(Vec::new()),
            },
        );
        self
    }

    /// Registers every member of a sibling group. `members` is the canonical order.
    pub fn group(mut self, kind: ControlKind, members: &[(Usage, &str)]) -> Self {
        let group: Arc<[Usage]> = members.iter().map(|(usage, _)| *usage).collect();
        for (usage, name) in members {
            self.entries.insert(
                *usage,
                AxisTypeDescriptor {
                    usage: *usage,
                    name: name.to_string(),
                    kind,
                    group: Arc::clone(&group),
                },
            );
        }
        self
    }

    /// Button 1 ..= Button `count` on the button page
    pub fn buttons(mut self, count: u16) -> Self {
        for index in 1..=count {
            let usage = Usage::button(index);
            self.entries.insert(
                usage,
                AxisTypeDescriptor {
                    usage,
                    name: format!("Button {}", index),
                    kind: ControlKind::Button,
                    group: Arc::from(Vec::new()),
                },
            );
        }
        self
    }

    pub fn build(self) -> UsageCatalog {
        debug!("Usage catalog built with {} entries", self.entries.len());
        UsageCatalog {
            entries: self.entries,
        }
    }
}
