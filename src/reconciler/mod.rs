//! Device reconciliation
//!
//! One pass diffs the live device list against the inventory and applies the
//! result as a single batch. Each pass is a statum state machine:
//!
//! ```text
//! Collecting ──scan──► Scanned(PendingBatch) ──apply──► Applied
//!      │                     │
//!      └──── error / cancel ─┴──► dropped, nothing applied
//! ```
//!
//! Per device:
//! - active controller with identical descriptor bytes: unchanged
//! - zombie with identical bytes: resurrected (same controller object)
//! - otherwise: rebuilt; replaces the active controller (Update) or any zombie (Add)
//!
//! Active controllers not seen during the scan are demoted to zombies.

pub mod worker;

pub use worker::{LoadError, LoadHandle, LoadStatus, RefreshTrigger};

use crate::controller::Controller;
use crate::inventory::{ControllerInventory, InventoryError};
use crate::transport::{LiveDevice, TransportError};
use crate::usage::UsageCatalog;
use statum::{machine, state};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Inventory error: {0}")]
    Inventory(#[from] InventoryError),

    #[error("Reconciliation pass cancelled")]
    Cancelled,
}

/// Changes collected during a scan, not yet visible to anyone
#[derive(Clone, Debug, Default)]
pub struct PendingBatch {
    pub(crate) pass: u64,
    pub(crate) demoted: Vec<Arc<Controller>>,
    pub(crate) resurrected: Vec<Arc<Controller>>,
    pub(crate) added: Vec<Arc<Controller>>,
    pub(crate) updated: Vec<(Arc<Controller>, Arc<Controller>)>,
}

impl PendingBatch {
    pub fn pass(&self) -> u64 {
        self.pass
    }

    pub fn len(&self) -> usize {
        self.demoted.len() + self.resurrected.len() + self.added.len() + self.updated.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Controllers built during this pass that will never be published
    fn discard(&self) {
        for controller in self
            .added
            .iter()
            .chain(self.updated.iter().map(|(_, current)| current))
        {
            controller.dispose();
        }
    }
}

/// Outcome of one completed pass
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub pass: u64,
    pub unchanged: usize,
    pub added: usize,
    pub updated: usize,
    pub resurrected: usize,
    pub demoted: usize,
    pub failed: usize,
    /// Whether a change set was published
    pub published: bool,
}

impl fmt::Display for PassSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pass {}: {} unchanged, {} added, {} updated, {} resurrected, {} removed, {} failed",
            self.pass,
            self.unchanged,
            self.added,
            self.updated,
            self.resurrected,
            self.demoted,
            self.failed
        )
    }
}

#[state]
#[derive(Debug, Clone)]
pub enum PassState {
    Collecting,
    Scanned(PendingBatch),
    Applied,
}

#[machine]
#[derive(Debug)]
pub struct ReconcilePass<S: PassState> {
    pass: u64,
    inventory: ControllerInventory,
    catalog: Arc<UsageCatalog>,
    value_capacity: usize,
    cancel: CancellationToken,
    summary: PassSummary,
}

impl<S: PassState> ReconcilePass<S> {
    pub fn pass(&self) -> u64 {
        self.pass
    }

    pub fn summary(&self) -> &PassSummary {
        &self.summary
    }
}

impl ReconcilePass<Collecting> {
    pub fn begin(
        pass: u64,
        inventory: ControllerInventory,
        catalog: Arc<UsageCatalog>,
        value_capacity: usize,
        cancel: CancellationToken,
    ) -> Self {
        debug!("Starting reconciliation pass {}", pass);
        Self::new(
            pass,
            inventory,
            catalog,
            value_capacity,
            cancel,
            PassSummary {
                pass,
                ..PassSummary::default()
            },
        )
    }

    /// Compares every live device with the inventory and builds what changed
    pub fn scan(
        mut self,
        devices: impl IntoIterator<Item = LiveDevice>,
    ) -> Result<ReconcilePass<Scanned>, ReconcileError> {
        let view = self.inventory.reconcile_view()?;
        let mut unaccounted = view.active;
        let mut zombies = view.zombies;
        let mut seen = HashSet::new();
        let mut batch = PendingBatch {
            pass: self.pass,
            ..PendingBatch::default()
        };

        debug!(
            "Pass {}: {} active, {} zombies before scan",
            self.pass,
            unaccounted.len(),
            zombies.len()
        );

        for device in devices {
            if self.cancel.is_cancelled() {
                batch.discard();
                return Err(ReconcileError::Cancelled);
            }

            let path = device.path.as_str();
            if !seen.insert(device.path.clone()) {
                warn!("Device {} enumerated twice in pass {}, ignoring", path, self.pass);
                continue;
            }

            let raw = &device.descriptor.raw;
            if let Some(active) = unaccounted.get(path) {
                if active.matches_descriptor(raw) {
                    unaccounted.remove(path);
                    self.summary.unchanged += 1;
                    continue;
                }
            } else if let Some(zombie) = zombies.get(path) {
                if zombie.matches_descriptor(raw) {
                    debug!("Resurrecting {}", zombie);
                    batch.resurrected.push(Arc::clone(zombie));
                    zombies.remove(path);
                    self.summary.resurrected += 1;
                    continue;
                }
            }

            // New device, or its descriptor changed
            let controller = match Controller::build(
                path,
                device.descriptor.name.clone(),
                Arc::clone(raw),
                &device.descriptor.fields,
                &self.catalog,
                self.value_capacity,
            ) {
                Ok(controller) => Arc::new(controller),
                Err(e) => {
                    warn!("Failed to create controller for {}: {}", path, e);
                    self.summary.failed += 1;
                    continue;
                }
            };

            if let Some(previous) = unaccounted.remove(path) {
                batch.updated.push((previous, controller));
                self.summary.updated += 1;
            } else {
                if let Some(zombie) = zombies.remove(path) {
                    debug!("Descriptor of {} changed while absent, replacing", zombie);
                }
                batch.added.push(controller);
                self.summary.added += 1;
            }
        }

        let mut demoted: Vec<Arc<Controller>> = unaccounted.into_values().collect();
        demoted.sort_by(|a, b| a.path().cmp(b.path()));
        self.summary.demoted = demoted.len();
        batch.demoted = demoted;

        Ok(self.transition_with(batch))
    }
}

impl ReconcilePass<Scanned> {
    /// Publishes the batch to the inventory in one step
    pub fn apply(mut self) -> Result<ReconcilePass<Applied>, ReconcileError> {
        let batch = match self.get_state_data() {
            Some(batch) => batch.clone(),
            None => PendingBatch {
                pass: self.pass,
                ..PendingBatch::default()
            },
        };

        if self.cancel.is_cancelled() {
            batch.discard();
            return Err(ReconcileError::Cancelled);
        }

        match self.inventory.apply(&batch) {
            Ok(change_set) => {
                self.summary.published = change_set.is_some();
                Ok(self.transition())
            }
            Err(e) => {
                batch.discard();
                Err(e.into())
            }
        }
    }
}

/// Runs passes against one inventory, numbering them
#[derive(Debug)]
pub struct DeviceReconciler {
    inventory: ControllerInventory,
    catalog: Arc<UsageCatalog>,
    value_capacity: usize,
    cancel: CancellationToken,
    passes: u64,
}

impl DeviceReconciler {
    pub fn new(
        inventory: ControllerInventory,
        catalog: Arc<UsageCatalog>,
        value_capacity: usize,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            inventory,
            catalog,
            value_capacity,
            cancel,
            passes: 0,
        }
    }

    pub fn passes(&self) -> u64 {
        self.passes
    }

    /// Runs one full pass over `devices` and applies it as one batch
    pub fn run_pass(
        &mut self,
        devices: impl IntoIterator<Item = LiveDevice>,
    ) -> Result<PassSummary, ReconcileError> {
        self.passes += 1;
        let collecting = ReconcilePass::begin(
            self.passes,
            self.inventory.clone(),
            Arc::clone(&self.catalog),
            self.value_capacity,
            self.cancel.clone(),
        );

        let applied = collecting.scan(devices)?.apply()?;
        let summary = applied.summary().clone();

        if summary.published {
            info!("Reconciled {}", summary);
        } else {
            debug!("Reconciled {}", summary);
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::{CapabilityField, ControllerState};
    use crate::inventory::Change;
    use crate::transport::DeviceDescriptor;
    use crate::usage::Usage;

    fn device(path: &str, descriptor: &[u8], usages: &[Usage]) -> LiveDevice {
        LiveDevice {
            path: path.to_string(),
            descriptor: DeviceDescriptor {
                name: None,
                raw: Arc::from(descriptor.to_vec()),
                fields: usages
                    .iter()
                    .map(|usage| CapabilityField::new(*usage, 0, 1))
                    .collect(),
            },
        }
    }

    fn pad(path: &str, descriptor: &[u8]) -> LiveDevice {
        device(path, descriptor, &[Usage::button(1), Usage::button(2)])
    }

    fn reconciler(inventory: &ControllerInventory) -> DeviceReconciler {
        DeviceReconciler::new(
            inventory.clone(),
            Arc::new(UsageCatalog::standard()),
            8,
            CancellationToken::new(),
        )
    }

    #[test]
    fn unchanged_devices_keep_identity() {
        let inventory = ControllerInventory::new();
        let mut reconciler = reconciler(&inventory);

        reconciler.run_pass(vec![pad("/dev/a", &[1])]).expect("pass 1");
        let before = inventory.lookup("/dev/a").expect("lookup").expect("present");

        let mut subscription = inventory.connect().expect("connect");
        let summary = reconciler.run_pass(vec![pad("/dev/a", &[1])]).expect("pass 2");

        assert_eq!(summary.unchanged, 1);
        assert!(!summary.published);
        assert!(subscription.try_next().is_none());
        let after = inventory.lookup("/dev/a").expect("lookup").expect("present");
        assert!(Arc::ptr_eq(&before, &after));
    }

    #[test]
    fn mixed_pass_is_one_batch() {
        let inventory = ControllerInventory::new();
        let mut reconciler = reconciler(&inventory);
        reconciler
            .run_pass(vec![pad("/dev/gone", &[1]), pad("/dev/changed", &[1])])
            .expect("pass 1");
        let mut subscription = inventory.connect().expect("connect");

        let summary = reconciler
            .run_pass(vec![
                pad("/dev/changed", &[2]),
                pad("/dev/new1", &[1]),
                pad("/dev/new2", &[1]),
            ])
            .expect("pass 2");

        assert_eq!(summary.added, 2);
        assert_eq!(summary.updated, 1);
        assert_eq!(summary.demoted, 1);

        let change_set = subscription.try_next().expect("one batch");
        assert_eq!(change_set.len(), 4);
        assert_eq!(change_set.adds(), 2);
        assert_eq!(change_set.updates(), 1);
        assert_eq!(change_set.removes(), 1);
        assert!(subscription.try_next().is_none());
    }

    #[test]
    fn changed_descriptor_updates_and_disposes_old() {
        let inventory = ControllerInventory::new();
        let mut reconciler = reconciler(&inventory);
        reconciler.run_pass(vec![pad("/dev/a", &[1])]).expect("pass 1");
        let old = inventory.lookup("/dev/a").expect("lookup").expect("present");
        let mut subscription = inventory.connect().expect("connect");

        reconciler.run_pass(vec![pad("/dev/a", &[9])]).expect("pass 2");

        let change_set = subscription.try_next().expect("batch");
        match change_set.changes.as_slice() {
            [Change::Update { previous, current }] => {
                assert!(Arc::ptr_eq(previous, &old));
                assert!(!Arc::ptr_eq(current, &old));
                assert_eq!(current.descriptor(), &[9]);
            }
            other => panic!("expected a single update, got {:?}", other),
        }
        assert!(old.is_disposed());
        assert!(!old.dispose());
    }

    #[test]
    fn zombie_resurrects_with_same_identity() {
        let inventory = ControllerInventory::new();
        let mut reconciler = reconciler(&inventory);
        reconciler.run_pass(vec![pad("/dev/a", &[1])]).expect("pass 1");
        let original = inventory.lookup("/dev/a").expect("lookup").expect("present");
        original
            .apply_samples(&[(Usage::button(1), 1)])
            .expect("sample");

        let removed = reconciler.run_pass(Vec::new()).expect("pass 2");
        assert_eq!(removed.demoted, 1);
        assert_eq!(original.state(), ControllerState::Zombie);
        assert!(inventory.lookup("/dev/a").expect("lookup").is_none());

        let back = reconciler.run_pass(vec![pad("/dev/a", &[1])]).expect("pass 3");
        assert_eq!(back.resurrected, 1);
        assert_eq!(back.added, 0);

        let revived = inventory.lookup("/dev/a").expect("lookup").expect("present");
        assert!(Arc::ptr_eq(&revived, &original));
        assert_eq!(revived.state(), ControllerState::Active);
        // Axis state survived the disconnect
        assert_eq!(revived.axes()[0].value(), Some(1));
    }

    #[test]
    fn zombie_with_new_descriptor_is_replaced() {
        let inventory = ControllerInventory::new();
        let mut reconciler = reconciler(&inventory);
        reconciler.run_pass(vec![pad("/dev/a", &[1])]).expect("pass 1");
        let zombie = inventory.lookup("/dev/a").expect("lookup").expect("present");
        reconciler.run_pass(Vec::new()).expect("pass 2");

        let summary = reconciler.run_pass(vec![pad("/dev/a", &[2])]).expect("pass 3");
        assert_eq!(summary.added, 1);
        assert_eq!(summary.resurrected, 0);
        assert!(zombie.is_disposed());

        let current = inventory.lookup("/dev/a").expect("lookup").expect("present");
        assert!(!Arc::ptr_eq(&current, &zombie));
        assert!(inventory.reconcile_view().expect("view").zombies.is_empty());
    }

    #[test]
    fn build_failure_skips_only_that_device() {
        let inventory = ControllerInventory::new();
        let mut reconciler = reconciler(&inventory);

        let broken = device(
            "/dev/broken",
            &[7],
            &[Usage::DPAD_UP, Usage::DPAD_DOWN, Usage::DPAD_LEFT],
        );
        let summary = reconciler
            .run_pass(vec![broken, pad("/dev/ok", &[1])])
            .expect("pass");

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.added, 1);
        assert!(inventory.lookup("/dev/broken").expect("lookup").is_none());
        assert!(inventory.lookup("/dev/ok").expect("lookup").is_some());
    }

    #[test]
    fn cancelled_pass_applies_nothing() {
        let inventory = ControllerInventory::new();
        let cancel = CancellationToken::new();
        let mut reconciler = DeviceReconciler::new(
            inventory.clone(),
            Arc::new(UsageCatalog::standard()),
            8,
            cancel.clone(),
        );
        cancel.cancel();

        let result = reconciler.run_pass(vec![pad("/dev/a", &[1])]);
        assert!(matches!(result, Err(ReconcileError::Cancelled)));
        assert_eq!(inventory.count().expect("count"), 0);
    }

    #[test]
    fn cancellation_mid_scan_publishes_nothing() {
        let inventory = ControllerInventory::new();
        let cancel = CancellationToken::new();
        let mut reconciler = DeviceReconciler::new(
            inventory.clone(),
            Arc::new(UsageCatalog::standard()),
            8,
            cancel.clone(),
        );
        let mut subscription = inventory.connect().expect("connect");

        // Cancelled while the second device is handed over, after the first was built
        let token = cancel.clone();
        let devices = vec![pad("/dev/a", &[1]), pad("/dev/b", &[1])]
            .into_iter()
            .enumerate()
            .map(move |(index, device)| {
                if index == 1 {
                    token.cancel();
                }
                device
            });

        let result = reconciler.run_pass(devices);
        assert!(matches!(result, Err(ReconcileError::Cancelled)));
        assert!(subscription.try_next().is_none());
        assert_eq!(inventory.count().expect("count"), 0);
        assert!(inventory.reconcile_view().expect("view").zombies.is_empty());
    }

    #[test]
    fn cancelled_before_apply_disposes_fresh_builds() {
        let inventory = ControllerInventory::new();
        let cancel = CancellationToken::new();
        let mut subscription = inventory.connect().expect("connect");

        let scanned = ReconcilePass::begin(
            1,
            inventory.clone(),
            Arc::new(UsageCatalog::standard()),
            8,
            cancel.clone(),
        )
        .scan(vec![pad("/dev/a", &[1])])
        .expect("scan");
        let fresh = Arc::clone(&scanned.get_state_data().expect("batch").added[0]);
        assert!(!fresh.is_disposed());

        cancel.cancel();
        assert!(matches!(scanned.apply(), Err(ReconcileError::Cancelled)));
        assert!(fresh.is_disposed());
        assert!(subscription.try_next().is_none());
    }

    #[test]
    fn disposed_between_scan_and_apply_discards_builds() {
        let inventory = ControllerInventory::new();
        let scanned = ReconcilePass::begin(
            1,
            inventory.clone(),
            Arc::new(UsageCatalog::standard()),
            8,
            CancellationToken::new(),
        )
        .scan(vec![pad("/dev/a", &[1])])
        .expect("scan");
        let fresh = Arc::clone(&scanned.get_state_data().expect("batch").added[0]);

        inventory.dispose();
        assert!(matches!(
            scanned.apply(),
            Err(ReconcileError::Inventory(InventoryError::Disposed))
        ));
        assert!(fresh.is_disposed());
    }

    #[test]
    fn failed_rebuild_demotes_the_old_controller() {
        let inventory = ControllerInventory::new();
        let mut reconciler = reconciler(&inventory);
        reconciler.run_pass(vec![pad("/dev/a", &[1])]).expect("pass 1");
        let old = inventory.lookup("/dev/a").expect("lookup").expect("present");
        let mut subscription = inventory.connect().expect("connect");

        // New bytes, but only three of four D-pad directions
        let unbuildable = device(
            "/dev/a",
            &[2],
            &[Usage::DPAD_UP, Usage::DPAD_DOWN, Usage::DPAD_LEFT],
        );
        let summary = reconciler.run_pass(vec![unbuildable]).expect("pass 2");
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.demoted, 1);
        assert_eq!(summary.updated, 0);

        let change_set = subscription.try_next().expect("batch");
        match change_set.changes.as_slice() {
            [Change::Remove(removed)] => assert!(Arc::ptr_eq(removed, &old)),
            other => panic!("expected a single remove, got {:?}", other),
        }
        assert_eq!(old.state(), ControllerState::Zombie);
        assert!(!old.is_disposed());

        // The old definition is still resurrectable
        reconciler.run_pass(vec![pad("/dev/a", &[1])]).expect("pass 3");
        let back = inventory.lookup("/dev/a").expect("lookup").expect("present");
        assert!(Arc::ptr_eq(&back, &old));
    }

    #[test]
    fn disposed_inventory_fails_the_pass() {
        let inventory = ControllerInventory::new();
        let mut reconciler = reconciler(&inventory);
        inventory.dispose();

        let result = reconciler.run_pass(vec![pad("/dev/a", &[1])]);
        assert!(matches!(
            result,
            Err(ReconcileError::Inventory(InventoryError::Disposed))
        ));
    }
}
