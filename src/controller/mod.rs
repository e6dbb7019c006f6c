//! Controller model and lifecycle handle
//!
//! Turns a device's capability fields into a [`Controller`] and runs the
//! background machinery that keeps the inventory of controllers current:
//!
//! 1. [`builder`] - capability fields to axes and grouped controls
//! 2. [`controller`] - one device, its axes/controls and value stream
//! 3. [`controller_handle`] - reconciliation worker lifecycle and public API
//!
//! # Architecture
//!
//! ```text
//! Transport ──► Reconciler ──► AxisBuilder ──► Controller
//!  (devices)    (one pass)                        │
//!                   │                             ▼
//!                   └──── atomic batch ──► ControllerInventory ──► subscribers
//! ```

pub mod axis;
pub mod builder;
pub mod control;
#[allow(clippy::module_inception)]
pub mod controller;
pub mod controller_handle;

pub use axis::{Axis, CapabilityField};
pub use builder::{AxisBuilder, ControlCreationError, ControlSet};
pub use control::{Control, ControlValue, HatDirection};
pub use controller::{
    ControlChange, ControlChangeBatch, Controller, ControllerError, ControllerState,
};
pub use controller_handle::{ControllerHandle, ControllerSettings, HandleError};
