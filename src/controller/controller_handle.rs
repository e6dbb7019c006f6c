//! Controller Handle - Unified API for the live controller inventory
//!
//! Owns the background reconciliation worker, its refresh trigger and the
//! readiness signal, and exposes the [`ControllerInventory`] it keeps current.
//! Dropping or shutting down the handle cancels the worker and disposes every
//! controller the inventory holds.

use crate::inventory::ControllerInventory;
use crate::reconciler::worker::{self, LoadSignal};
use crate::reconciler::{DeviceReconciler, LoadError, LoadHandle, RefreshTrigger};
use crate::transport::DeviceTransport;
use crate::usage::UsageCatalog;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Configuration settings for the controller subsystem
///
/// # Examples
///
/// ```rust
/// use hidcontrollers::controller::ControllerSettings;
///
/// // Transport without hotplug notifications: rescan every second
/// let polling = ControllerSettings {
///     poll_interval_ms: Some(1000),
///     ..ControllerSettings::default()
/// };
/// assert_eq!(polling.load_timeout_ms, 5000);
/// ```
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct ControllerSettings {
    /// Periodic refresh interval in milliseconds
    ///
    /// `None` relies on the transport to request refreshes when devices come and go.
    pub poll_interval_ms: Option<u64>,

    /// How long callers wait for the initial device scan by default
    pub load_timeout_ms: u64,

    /// Buffered value batches per controller before a slow watcher starts lagging
    pub value_channel_capacity: usize,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: None,
            load_timeout_ms: 5000,
            value_channel_capacity: 64,
        }
    }
}

impl ControllerSettings {
    pub fn load_timeout(&self) -> Duration {
        Duration::from_millis(self.load_timeout_ms)
    }
}

/// Errors that can occur while starting the controller subsystem
#[derive(Debug, thiserror::Error)]
pub enum HandleError {
    /// The worker is a tokio task and needs a running runtime
    #[error("Controller handle must be spawned inside a tokio runtime")]
    NoRuntime,

    #[error("Invalid controller settings: {0}")]
    InvalidSettings(String),
}

/// Handle for managing the controller subsystem lifecycle
///
/// # Threading Model
///
/// Spawns one tokio task running reconciliation passes and, when
/// `poll_interval_ms` is set, a second task that requests a pass on every tick:
///
/// ```text
/// Transport ─attach─► RefreshTrigger ◄─tick─ Poller
///                          │
///                          ▼
///                    Worker (one pass at a time) ──► ControllerInventory
/// ```
///
/// Refresh requests are level-triggered: any number of requests during a pass
/// collapse into exactly one following pass.
///
/// # Resource Management
///
/// [`ControllerHandle::shutdown`] cancels the worker, waits for it and disposes
/// the inventory. Dropping the handle does the same without waiting.
pub struct ControllerHandle {
    inventory: ControllerInventory,
    trigger: RefreshTrigger,
    load: LoadHandle,
    settings: ControllerSettings,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ControllerHandle {
    /// Spawns the subsystem over `transport` with the standard usage catalog
    ///
    /// The first pass starts immediately; use [`ControllerHandle::load`] to wait
    /// for it.
    ///
    /// # Errors
    ///
    /// * [`HandleError::NoRuntime`] - called outside a tokio runtime
    /// * [`HandleError::InvalidSettings`] - zero value channel capacity or poll interval
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use hidcontrollers::controller::ControllerHandle;
    /// use hidcontrollers::transport::MemoryTransport;
    /// use std::sync::Arc;
    ///
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let handle = ControllerHandle::spawn(None, Arc::new(MemoryTransport::new()))?;
    /// handle.load().await?;
    /// println!("{} controllers", handle.inventory().count()?);
    /// handle.shutdown().await;
    /// # Ok(())
    /// # }
    /// ```
    pub fn spawn(
        settings: Option<ControllerSettings>,
        transport: Arc<dyn DeviceTransport>,
    ) -> Result<Self, HandleError> {
        Self::spawn_with_catalog(settings, transport, Arc::new(UsageCatalog::standard()))
    }

    /// Like [`ControllerHandle::spawn`] with a custom usage catalog
    pub fn spawn_with_catalog(
        settings: Option<ControllerSettings>,
        transport: Arc<dyn DeviceTransport>,
        catalog: Arc<UsageCatalog>,
    ) -> Result<Self, HandleError> {
        let settings = settings.unwrap_or_default();
        info!(
            "Initializing controller subsystem with settings: {:?}",
            settings
        );

        if settings.value_channel_capacity == 0 {
            return Err(HandleError::InvalidSettings(
                "value_channel_capacity must be at least 1".to_string(),
            ));
        }
        if settings.poll_interval_ms == Some(0) {
            return Err(HandleError::InvalidSettings(
                "poll_interval_ms must be at least 1".to_string(),
            ));
        }
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(HandleError::NoRuntime);
        }

        let inventory = ControllerInventory::new();
        let cancel = CancellationToken::new();
        let trigger = RefreshTrigger::new();
        let (signal, load) = LoadSignal::new();

        let reconciler = DeviceReconciler::new(
            inventory.clone(),
            catalog,
            settings.value_channel_capacity,
            cancel.clone(),
        );

        transport.attach(trigger.clone());
        // Startup pass
        trigger.refresh();

        let mut tasks = vec![tokio::spawn(worker::run(
            reconciler,
            transport,
            trigger.clone(),
            signal,
            cancel.clone(),
        ))];
        debug!("Reconciliation worker spawned");

        if let Some(interval) = settings.poll_interval_ms {
            tasks.push(tokio::spawn(worker::poll(
                trigger.clone(),
                Duration::from_millis(interval),
                cancel.clone(),
            )));
            debug!("Refresh poller spawned ({} ms)", interval);
        }

        info!("Controller subsystem initialized");
        Ok(Self {
            inventory,
            trigger,
            load,
            settings,
            cancel,
            tasks: Mutex::new(tasks),
        })
    }

    pub fn inventory(&self) -> &ControllerInventory {
        &self.inventory
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    /// Requests a reconciliation pass
    pub fn refresh(&self) {
        self.trigger.refresh();
    }

    /// Trigger to hand to code that learns about device changes
    pub fn trigger(&self) -> RefreshTrigger {
        self.trigger.clone()
    }

    /// Readiness handle, cloneable and independent of this handle's lifetime
    pub fn load_handle(&self) -> LoadHandle {
        self.load.clone()
    }

    /// Waits until the first pass has been applied
    ///
    /// # Errors
    ///
    /// [`LoadError::Cancelled`] if the subsystem shuts down first.
    pub async fn load(&self) -> Result<(), LoadError> {
        self.load.wait().await
    }

    /// Like [`ControllerHandle::load`], giving up after `limit`
    pub async fn load_timeout(&self, limit: Duration) -> Result<(), LoadError> {
        self.load.wait_timeout(limit).await
    }

    /// Stops the worker, waits for it and disposes every controller.
    ///
    /// Returns how many controllers were disposed; later calls return 0.
    pub async fn shutdown(&self) -> usize {
        info!("Shutting down controller subsystem");
        self.cancel.cancel();

        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for task in tasks {
            if let Err(e) = task.await {
                error!("Controller task ended abnormally: {}", e);
            }
        }

        self.inventory.dispose()
    }

    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for ControllerHandle {
    fn drop(&mut self) {
        if !self.cancel.is_cancelled() {
            debug!("Controller handle dropped without shutdown");
        }
        self.cancel.cancel();
        self.inventory.dispose();
    }
}
