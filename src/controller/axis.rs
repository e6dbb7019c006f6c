use crate::usage::Usage;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};

/// One report field as declared by the device, already parsed by the transport
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityField {
    pub usage: Usage,
    pub logical_min: i32,
    pub logical_max: i32,
    #[serde(default)]
    pub physical_min: i32,
    #[serde(default)]
    pub physical_max: i32,
    #[serde(default)]
    pub report_id: u8,
    #[serde(default)]
    pub bit_offset: u32,
    #[serde(default = "default_bit_size")]
    pub bit_size: u32,
}

fn default_bit_size() -> u32 {
    1
}

impl CapabilityField {
    /// Field with the given logical bounds and no location information
    pub fn new(usage: Usage, logical_min: i32, logical_max: i32) -> Self {
        Self {
            usage,
            logical_min,
            logical_max,
            physical_min: logical_min,
            physical_max: logical_max,
            report_id: 0,
            bit_offset: 0,
            bit_size: default_bit_size(),
        }
    }

    pub fn located(mut self, report_id: u8, bit_offset: u32, bit_size: u32) -> Self {
        self.report_id = report_id;
        self.bit_offset = bit_offset;
        self.bit_size = bit_size;
        self
    }
}

// Marks an axis that has never been sampled
const NO_SAMPLE: i64 = i64::MIN;

/// A single decoded input bound to one usage and one capability field
#[derive(Debug)]
pub struct Axis {
    name: String,
    usage: Usage,
    field: CapabilityField,
    value: AtomicI64,
}

impl Axis {
    pub(crate) fn new(name: String, field: CapabilityField) -> Self {
        Self {
            name,
            usage: field.usage,
            field,
            value: AtomicI64::new(NO_SAMPLE),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn usage(&self) -> Usage {
        self.usage
    }

    pub fn field(&self) -> &CapabilityField {
        &self.field
    }

    /// Last raw sample, `None` until the first report arrives
    pub fn value(&self) -> Option<i32> {
        match self.value.load(Ordering::Acquire) {
            NO_SAMPLE => None,
            raw => Some(raw as i32),
        }
    }

    /// Stores a raw sample and returns the previous one
    pub(crate) fn record(&self, raw: i32) -> Option<i32> {
        match self.value.swap(i64::from(raw), Ordering::AcqRel) {
            NO_SAMPLE => None,
            previous => Some(previous as i32),
        }
    }
}
