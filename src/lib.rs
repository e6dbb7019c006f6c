//! Live inventory of HID game controllers
//!
//! Devices come from a [`transport::DeviceTransport`]; a background worker
//! reconciles them into a [`inventory::ControllerInventory`] whose changes are
//! published as atomic batches. Start with [`controller::ControllerHandle`].

pub mod config;
pub mod controller;
pub mod converter;
pub mod inventory;
pub mod reconciler;
pub mod transport;
pub mod usage;

pub use controller::{Controller, ControllerHandle, ControllerSettings};
pub use inventory::{Change, ChangeSet, ControllerInventory, InventorySnapshot};
pub use reconciler::{LoadError, LoadHandle, RefreshTrigger};
pub use transport::{DeviceDescriptor, DeviceTransport};
pub use usage::{Usage, UsageCatalog};
