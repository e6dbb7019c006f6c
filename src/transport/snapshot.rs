//! Device list read from a TOML file
//!
//! The file is re-read on every enumeration, so editing it and triggering a
//! refresh behaves like plugging devices in or out. A missing file means no devices.
//!
//! ```toml
//! [[device]]
//! path = "/dev/hidraw0"
//! name = "Gamepad"
//! descriptor = [0x05, 0x01, 0x09, 0x05]
//!
//! [[device.field]]
//! usage = 0x00010030
//! logical_min = 0
//! logical_max = 255
//! ```

use super::{DeviceDescriptor, DeviceTransport, TransportError};
use crate::controller::CapabilityField;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

#[derive(Debug, Default, Deserialize, Serialize)]
struct SnapshotFile {
    #[serde(default, rename = "device")]
    devices: Vec<SnapshotDevice>,
}

#[derive(Debug, Deserialize, Serialize)]
struct SnapshotDevice {
    path: String,
    name: Option<String>,
    descriptor: Vec<u8>,
    #[serde(default, rename = "field")]
    fields: Vec<CapabilityField>,
}

#[derive(Debug)]
pub struct SnapshotTransport {
    path: PathBuf,
    // Descriptors from the most recent enumeration
    cache: Mutex<HashMap<String, DeviceDescriptor>>,
}

impl SnapshotTransport {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_file(&self) -> Result<SnapshotFile, TransportError> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => Ok(toml::from_str(&content)?),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No device snapshot at {}", self.path.display());
                Ok(SnapshotFile::default())
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl DeviceTransport for SnapshotTransport {
    fn enumerate(&self) -> Result<Vec<String>, TransportError> {
        let file = self.read_file()?;
        let mut paths = Vec::with_capacity(file.devices.len());
        let mut cache = HashMap::with_capacity(file.devices.len());

        for device in file.devices {
            if cache.contains_key(&device.path) {
                warn!(
                    "Device {} listed twice in {}, keeping the first entry",
                    device.path,
                    self.path.display()
                );
                continue;
            }
            paths.push(device.path.clone());
            cache.insert(
                device.path,
                DeviceDescriptor {
                    name: device.name,
                    raw: Arc::from(device.descriptor),
                    fields: device.fields,
                },
            );
        }

        *self.cache.lock().unwrap_or_else(PoisonError::into_inner) = cache;
        Ok(paths)
    }

    fn fetch_descriptor(&self, path: &str) -> Result<DeviceDescriptor, TransportError> {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned()
            .ok_or_else(|| TransportError::DeviceGone(path.to_string()))
    }
}
