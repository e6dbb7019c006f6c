//! Background reconciliation worker, refresh trigger and readiness signal

use super::{DeviceReconciler, ReconcileError};
use crate::inventory::InventoryError;
use crate::transport::{DeviceTransport, LiveDevice, TransportError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Level-triggered request for a reconciliation pass.
///
/// Any number of requests made while a pass is running collapse into exactly one
/// further pass. Cloning is cheap; every clone drives the same worker.
#[derive(Clone, Debug, Default)]
pub struct RefreshTrigger {
    notify: Arc<Notify>,
}

impl RefreshTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refresh(&self) {
        // Stores at most one permit when the worker is busy
        self.notify.notify_one();
    }

    pub(crate) async fn triggered(&self) {
        self.notify.notified().await;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadStatus {
    Pending,
    Loaded,
    Cancelled,
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("Initial device scan was cancelled")]
    Cancelled,

    #[error("Initial device scan did not finish within {0:?}")]
    Timeout(Duration),
}

/// Worker side of the readiness signal
#[derive(Debug)]
pub(crate) struct LoadSignal {
    sender: watch::Sender<LoadStatus>,
}

impl LoadSignal {
    pub(crate) fn new() -> (Self, LoadHandle) {
        let (sender, receiver) = watch::channel(LoadStatus::Pending);
        (Self { sender }, LoadHandle { receiver })
    }

    /// Completes the handle; only the first call has an effect
    pub(crate) fn mark_loaded(&self) -> bool {
        self.settle(LoadStatus::Loaded)
    }

    pub(crate) fn mark_cancelled(&self) -> bool {
        self.settle(LoadStatus::Cancelled)
    }

    fn settle(&self, status: LoadStatus) -> bool {
        self.sender.send_if_modified(|current| {
            if *current == LoadStatus::Pending {
                *current = status;
                true
            } else {
                false
            }
        })
    }
}

/// Completes once the first reconciliation pass has been applied
#[derive(Clone, Debug)]
pub struct LoadHandle {
    receiver: watch::Receiver<LoadStatus>,
}

impl LoadHandle {
    pub fn status(&self) -> LoadStatus {
        *self.receiver.borrow()
    }

    pub fn is_loaded(&self) -> bool {
        self.status() == LoadStatus::Loaded
    }

    /// Waits for the first pass. Fails if the worker stops before it completes.
    pub async fn wait(&self) -> Result<(), LoadError> {
        let mut receiver = self.receiver.clone();
        let status = *receiver
            .wait_for(|status| *status != LoadStatus::Pending)
            .await
            .map_err(|_| LoadError::Cancelled)?;

        match status {
            LoadStatus::Loaded => Ok(()),
            _ => Err(LoadError::Cancelled),
        }
    }

    pub async fn wait_timeout(&self, limit: Duration) -> Result<(), LoadError> {
        tokio::time::timeout(limit, self.wait())
            .await
            .map_err(|_| LoadError::Timeout(limit))?
    }
}

/// Enumerates every device and fetches its descriptor.
///
/// A device whose descriptor cannot be read is skipped for this pass, which
/// treats it as absent.
pub(crate) fn collect_devices(
    transport: &dyn DeviceTransport,
) -> Result<Vec<LiveDevice>, TransportError> {
    let paths = transport.enumerate()?;
    let mut devices = Vec::with_capacity(paths.len());

    for path in paths {
        match transport.fetch_descriptor(&path) {
            Ok(descriptor) => devices.push(LiveDevice { path, descriptor }),
            Err(e) => warn!("Skipping {} in this pass: {}", path, e),
        }
    }

    Ok(devices)
}

/// Runs passes whenever the trigger fires until `cancel` is triggered
pub(crate) async fn run(
    mut reconciler: DeviceReconciler,
    transport: Arc<dyn DeviceTransport>,
    trigger: RefreshTrigger,
    load: LoadSignal,
    cancel: CancellationToken,
) {
    info!("Reconciliation worker started");

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = trigger.triggered() => {}
        }

        let source = Arc::clone(&transport);
        let collecting = tokio::task::spawn_blocking(move || collect_devices(source.as_ref()));

        let devices = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            joined = collecting => match joined {
                Ok(Ok(devices)) => devices,
                Ok(Err(e)) => {
                    error!("Device enumeration failed: {}", e);
                    continue;
                }
                Err(e) => {
                    error!("Device enumeration task failed: {}", e);
                    continue;
                }
            }
        };

        match reconciler.run_pass(devices) {
            Ok(summary) => {
                if load.mark_loaded() {
                    info!("Initial device scan complete ({})", summary);
                }
            }
            Err(ReconcileError::Cancelled) => {
                debug!("Reconciliation pass cancelled");
                break;
            }
            Err(ReconcileError::Inventory(InventoryError::Disposed)) => {
                warn!("Inventory disposed, stopping reconciliation");
                break;
            }
            Err(e) => error!("Reconciliation pass failed: {}", e),
        }
    }

    if load.mark_cancelled() {
        debug!("Worker stopped before the initial scan completed");
    }
    info!(
        "Reconciliation worker stopped after {} passes",
        reconciler.passes()
    );
}

/// Periodic refresh for transports without change notifications
pub(crate) async fn poll(trigger: RefreshTrigger, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first tick completes immediately and the startup pass is already queued
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => trigger.refresh(),
        }
    }
    debug!("Refresh poller stopped");
}
