//! Device sources
//!
//! A transport lists the paths of the devices currently present and reads each
//! device's report descriptor. Transports that learn about hotplug on their own
//! request a refresh through the [`RefreshTrigger`] handed to [`DeviceTransport::attach`].

pub mod memory;
pub mod snapshot;

pub use memory::MemoryTransport;
pub use snapshot::SnapshotTransport;

use crate::controller::CapabilityField;
use crate::reconciler::RefreshTrigger;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Device {0} is not present")]
    DeviceGone(String),

    #[error("Failed to read descriptor of {path}: {reason}")]
    Descriptor { path: String, reason: String },

    #[error("Device enumeration failed: {0}")]
    Enumeration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid device snapshot: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Report descriptor of one device with its parsed capability fields
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub name: Option<String>,
    /// Raw descriptor bytes; identical bytes mean an identical device definition
    pub raw: Arc<[u8]>,
    pub fields: Vec<CapabilityField>,
}

impl DeviceDescriptor {
    pub fn new(raw: impl Into<Arc<[u8]>>, fields: Vec<CapabilityField>) -> Self {
        Self {
            name: None,
            raw: raw.into(),
            fields,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// A device seen during one enumeration
#[derive(Clone, Debug)]
pub struct LiveDevice {
    pub path: String,
    pub descriptor: DeviceDescriptor,
}

pub trait DeviceTransport: Send + Sync + fmt::Debug + 'static {
    /// Paths of all devices currently present
    fn enumerate(&self) -> Result<Vec<String>, TransportError>;

    fn fetch_descriptor(&self, path: &str) -> Result<DeviceDescriptor, TransportError>;

    /// Called once when a worker starts using this transport
    fn attach(&self, trigger: RefreshTrigger) {
        let _ = trigger;
    }
}
