use super::{DeviceDescriptor, DeviceTransport, TransportError};
use crate::reconciler::RefreshTrigger;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// In-process device list; connecting or disconnecting requests a refresh
#[derive(Debug, Default)]
pub struct MemoryTransport {
    devices: Mutex<BTreeMap<String, DeviceDescriptor>>,
    broken: Mutex<HashSet<String>>,
    trigger: Mutex<Option<RefreshTrigger>>,
    fail_enumeration: AtomicBool,
    enumerations: AtomicUsize,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a device without requesting a refresh
    pub fn insert(&self, path: impl Into<String>, descriptor: DeviceDescriptor) {
        locked(&self.devices).insert(path.into(), descriptor);
    }

    pub fn connect(&self, path: impl Into<String>, descriptor: DeviceDescriptor) {
        let path = path.into();
        debug!("Device connected: {}", path);
        self.insert(path, descriptor);
        self.notify();
    }

    /// Removes a device without requesting a refresh
    pub fn remove(&self, path: &str) -> bool {
        locked(&self.devices).remove(path).is_some()
    }

    pub fn disconnect(&self, path: &str) -> bool {
        let removed = self.remove(path);
        if removed {
            debug!("Device disconnected: {}", path);
            self.notify();
        }
        removed
    }

    /// Makes enumeration fail as a whole until cleared
    pub fn set_enumeration_failure(&self, failing: bool) {
        self.fail_enumeration.store(failing, Ordering::Release);
    }

    /// Makes reading one device's descriptor fail until cleared
    pub fn set_descriptor_failure(&self, path: &str, failing: bool) {
        let mut broken = locked(&self.broken);
        if failing {
            broken.insert(path.to_string());
        } else {
            broken.remove(path);
        }
    }

    /// How many times the device list has been enumerated
    pub fn enumerations(&self) -> usize {
        self.enumerations.load(Ordering::Acquire)
    }

    fn notify(&self) {
        if let Some(trigger) = locked(&self.trigger).as_ref() {
            trigger.refresh();
        }
    }
}

impl DeviceTransport for MemoryTransport {
    fn enumerate(&self) -> Result<Vec<String>, TransportError> {
        self.enumerations.fetch_add(1, Ordering::AcqRel);
        if self.fail_enumeration.load(Ordering::Acquire) {
            return Err(TransportError::Enumeration(
                "simulated enumeration failure".to_string(),
            ));
        }
        Ok(locked(&self.devices).keys().cloned().collect())
    }

    fn fetch_descriptor(&self, path: &str) -> Result<DeviceDescriptor, TransportError> {
        if locked(&self.broken).contains(path) {
            return Err(TransportError::Descriptor {
                path: path.to_string(),
                reason: "simulated read failure".to_string(),
            });
        }
        locked(&self.devices)
            .get(path)
            .cloned()
            .ok_or_else(|| TransportError::DeviceGone(path.to_string()))
    }

    fn attach(&self, trigger: RefreshTrigger) {
        *locked(&self.trigger) = Some(trigger);
    }
}
