use super::axis::{Axis, CapabilityField};
use super::builder::{AxisBuilder, ControlCreationError, ControlSet};
use super::control::{Control, ControlValue};
use crate::usage::{ControlKind, Usage, UsageCatalog};
use chrono::{DateTime, Local};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;
use tracing::{debug, info};

static NEXT_CONTROLLER_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle of a controller inside the inventory
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ControllerState {
    /// Currently enumerated and visible to consumers
    Active = 0,
    /// Absent but resurrectable while its descriptor stays the same
    Zombie = 1,
    Disposed = 2,
}

impl ControllerState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => ControllerState::Active,
            1 => ControllerState::Zombie,
            _ => ControllerState::Disposed,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("Controller {0} has been disposed")]
    Disposed(String),
}

/// One value change of one control
#[derive(Clone, Debug)]
pub struct ControlChange {
    pub device_path: Arc<str>,
    pub control_index: usize,
    pub control_name: String,
    pub kind: ControlKind,
    pub usage: Usage,
    pub previous: Option<i32>,
    pub value: i32,
    pub timestamp: DateTime<Local>,
}

/// All control changes caused by one input report
pub type ControlChangeBatch = Arc<Vec<ControlChange>>;

/// One physical device with its decoded axes and controls
pub struct Controller {
    id: u64,
    path: Arc<str>,
    name: String,
    descriptor: Arc<[u8]>,
    axes: Vec<Axis>,
    controls: Vec<Control>,
    state: AtomicU8,
    value_sender: Mutex<Option<broadcast::Sender<ControlChangeBatch>>>,
    created_at: DateTime<Local>,
}

impl Controller {
    /// Builds a controller from a device's descriptor bytes and parsed fields
    pub fn build(
        path: &str,
        name: Option<String>,
        descriptor: Arc<[u8]>,
        fields: &[CapabilityField],
        catalog: &UsageCatalog,
        value_capacity: usize,
    ) -> Result<Self, ControlCreationError> {
        let ControlSet { axes, controls } = AxisBuilder::new(catalog).build(fields)?;
        let (value_sender, _) = broadcast::channel(value_capacity.max(1));
        let id = NEXT_CONTROLLER_ID.fetch_add(1, Ordering::Relaxed);

        debug!(
            "Built controller #{} for {} ({} axes, {} controls, {} descriptor bytes)",
            id,
            path,
            axes.len(),
            controls.len(),
            descriptor.len()
        );

        Ok(Self {
            id,
            path: Arc::from(path),
            name: name.unwrap_or_else(|| path.to_string()),
            descriptor,
            axes,
            controls,
            state: AtomicU8::new(ControllerState::Active as u8),
            value_sender: Mutex::new(Some(value_sender)),
            created_at: Local::now(),
        })
    }

    /// Process-unique construction id; a rebuilt device gets a new one
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn descriptor(&self) -> &[u8] {
        &self.descriptor
    }

    pub fn axes(&self) -> &[Axis] {
        &self.axes
    }

    pub fn controls(&self) -> &[Control] {
        &self.controls
    }

    pub fn created_at(&self) -> DateTime<Local> {
        self.created_at
    }

    pub fn state(&self) -> ControllerState {
        ControllerState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_disposed(&self) -> bool {
        self.state() == ControllerState::Disposed
    }

    pub fn matches_descriptor(&self, bytes: &[u8]) -> bool {
        *self.descriptor == *bytes
    }

    pub fn read(&self, control: &Control) -> ControlValue {
        control.read(&self.axes)
    }

    /// Current value of every control, in declaration order
    pub fn read_all(&self) -> Vec<(&Control, ControlValue)> {
        self.controls
            .iter()
            .map(|control| (control, control.read(&self.axes)))
            .collect()
    }

    /// Records raw samples from one input report and notifies value watchers.
    ///
    /// Returns the control changes the report produced; unchanged values and
    /// usages the controller does not have produce nothing.
    pub fn apply_samples(&self, samples: &[(Usage, i32)]) -> Result<Vec<ControlChange>, ControllerError> {
        let sender = self
            .value_sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| ControllerError::Disposed(self.path.to_string()))?;

        let timestamp = Local::now();
        let mut changes = Vec::new();

        for (usage, raw) in samples {
            let Some(axis_index) = self.axes.iter().position(|axis| axis.usage() == *usage) else {
                continue;
            };
            let Some(axis) = self.axes.get(axis_index) else {
                continue;
            };

            let previous = axis.record(*raw);
            if previous == Some(*raw) {
                continue;
            }

            for (control_index, control) in self.controls.iter().enumerate() {
                if control.axis_indices().contains(&axis_index) {
                    changes.push(ControlChange {
                        device_path: Arc::clone(&self.path),
                        control_index,
                        control_name: control.name().to_string(),
                        kind: control.kind(),
                        usage: *usage,
                        previous,
                        value: *raw,
                        timestamp,
                    });
                }
            }
        }

        if !changes.is_empty() {
            // No receivers is fine, the values are still recorded on the axes
            let _ = sender.send(Arc::new(changes.clone()));
        }

        Ok(changes)
    }

    /// Raw stream of control change batches for this controller
    pub fn subscribe_values(&self) -> Result<broadcast::Receiver<ControlChangeBatch>, ControllerError> {
        self.value_sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(broadcast::Sender::subscribe)
            .ok_or_else(|| ControllerError::Disposed(self.path.to_string()))
    }

    /// Moves between Active and Zombie; a disposed controller stays disposed
    pub(crate) fn mark(&self, state: ControllerState) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if ControllerState::from_u8(current) == ControllerState::Disposed {
                return false;
            }
            match self.state.compare_exchange(
                current,
                state as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Disposes the controller. Returns `true` only for the call that did it.
    pub fn dispose(&self) -> bool {
        let previous = self
            .state
            .swap(ControllerState::Disposed as u8, Ordering::AcqRel);
        if ControllerState::from_u8(previous) == ControllerState::Disposed {
            return false;
        }

        // Dropping the sender ends every value stream of this controller
        self.value_sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        info!("Disposed controller #{} ({})", self.id, self.path);
        true
    }
}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("name", &self.name)
            .field("state", &self.state())
            .field("controls", &self.controls.len())
            .finish()
    }
}

impl fmt::Display for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (#{}, {})", self.name, self.id, self.path)
    }
}
