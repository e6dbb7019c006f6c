//! Axis/Control construction from capability fields
//!
//! # Algorithm
//!
//! 1. Every field with a catalog entry becomes an [`Axis`]; unknown usages are skipped.
//! 2. Axes of ungrouped usages become one [`Control`] each, of their declared kind.
//! 3. Axes of grouped usages are gathered per group (first-seen order). A group
//!    becomes one composite control in canonical sibling order, or the whole build
//!    fails with [`ControlCreationError::GroupSizeMismatch`]. No partial groups.

use super::axis::{Axis, CapabilityField};
use super::control::Control;
use crate::usage::{ControlKind, Usage, UsageCatalog};
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum ControlCreationError {
    #[error("Control group {group} expects {expected} axes but the device declares {actual}")]
    GroupSizeMismatch {
        group: String,
        expected: usize,
        actual: usize,
    },

    #[error("{kind} control needs {expected} axes, got {actual}")]
    ArityMismatch {
        kind: ControlKind,
        expected: usize,
        actual: usize,
    },

    #[error("Device declares no supported usages")]
    NoSupportedControls,
}

/// Axes and controls built for one device
#[derive(Debug, Default)]
pub struct ControlSet {
    pub axes: Vec<Axis>,
    pub controls: Vec<Control>,
}

pub struct AxisBuilder<'a> {
    catalog: &'a UsageCatalog,
}

impl<'a> AxisBuilder<'a> {
    pub fn new(catalog: &'a UsageCatalog) -> Self {
        Self { catalog }
    }

    pub fn build(&self, fields: &[CapabilityField]) -> Result<ControlSet, ControlCreationError> {
        let mut axes = Vec::new();
        let mut controls = Vec::new();

        // Grouped axes keyed by the group's first canonical usage, in first-seen order
        let mut group_order: Vec<Usage> = Vec::new();
        let mut grouped: HashMap<Usage, Vec<usize>> = HashMap::new();

        for field in fields {
            let Some(descriptor) = self.catalog.lookup(field.usage) else {
                debug!("Skipping unsupported usage {}", field.usage);
                continue;
            };

            let index = axes.len();
            axes.push(Axis::new(descriptor.name().to_string(), field.clone()));

            match descriptor.group().first() {
                Some(key) => {
                    grouped
                        .entry(*key)
                        .or_insert_with(|| {
                            group_order.push(*key);
                            Vec::new()
                        })
                        .push(index);
                }
                None => controls.push(Control::create(
                    descriptor.kind(),
                    descriptor.name().to_string(),
                    vec![descriptor.usage()],
                    vec![index],
                )?),
            }
        }

        for key in group_order {
            let members = grouped.remove(&key).unwrap_or_default();
            controls.push(self.assemble_group(key, &members, &axes)?);
        }

        if controls.is_empty() {
            return Err(ControlCreationError::NoSupportedControls);
        }

        debug!(
            "Built {} axes into {} controls from {} fields",
            axes.len(),
            controls.len(),
            fields.len()
        );
        Ok(ControlSet { axes, controls })
    }

    fn assemble_group(
        &self,
        key: Usage,
        members: &[usize],
        axes: &[Axis],
    ) -> Result<Control, ControlCreationError> {
        let Some(descriptor) = self.catalog.lookup(key) else {
            return Err(ControlCreationError::NoSupportedControls);
        };
        let siblings = descriptor.group();
        let label = group_label(descriptor.kind(), siblings, self.catalog);

        if members.len() != siblings.len() {
            return Err(ControlCreationError::GroupSizeMismatch {
                group: label,
                expected: siblings.len(),
                actual: members.len(),
            });
        }

        // Canonical order, not field order
        let mut ordered = Vec::with_capacity(siblings.len());
        for sibling in siblings {
            let found = members
                .iter()
                .copied()
                .find(|index| axes.get(*index).is_some_and(|axis| axis.usage() == *sibling));
            match found {
                Some(index) => ordered.push(index),
                None => {
                    // Right count, but a usage is duplicated and a sibling is missing
                    let mut distinct: Vec<Usage> = members
                        .iter()
                        .filter_map(|index| axes.get(*index).map(Axis::usage))
                        .collect();
                    distinct.sort();
                    distinct.dedup();
                    return Err(ControlCreationError::GroupSizeMismatch {
                        group: label,
                        expected: siblings.len(),
                        actual: distinct.len(),
                    });
                }
            }
        }

        Control::create(descriptor.kind(), label, siblings.to_vec(), ordered)
    }
}

fn group_label(kind: ControlKind, siblings: &[Usage], catalog: &UsageCatalog) -> String {
    match kind {
        ControlKind::DPad => "D-Pad".to_string(),
        _ => siblings
            .iter()
            .filter_map(|usage| catalog.lookup(*usage).map(|d| d.name().to_string()))
            .collect::<Vec<_>>()
            .join("/"),
    }
}
