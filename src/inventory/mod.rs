//! # Controller Inventory
//!
//! Single source of truth mapping device paths to [`Controller`]s.
//!
//! ## Consistency model
//! The inventory is only mutated by whole reconciliation batches. Each applied batch
//! replaces the published [`InventorySnapshot`] with a new immutable one, so readers
//! on any thread see either the state before or after a batch, never a mix.
//!
//! ## Lifecycle tags
//! Every entry carries a [`ControllerState`]. Active entries form the published
//! snapshot; Zombie entries are kept aside for resurrection and are never visible
//! through the consumer API. Only the reconciler reads them.
//!
//! ## Notifications
//! Each non-empty batch is delivered to every subscriber as one [`ChangeSet`], in
//! pass order, over an unbounded per-subscriber queue. Subscribing hands out the
//! current snapshot and the queue atomically, so no batch falls in between.

pub mod control_watch;

pub use control_watch::{ControlFilter, ControlWatch};

use crate::controller::{Controller, ControllerState};
use crate::reconciler::PendingBatch;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum InventoryError {
    #[error("Controller inventory has already been disposed")]
    Disposed,

    #[error("Control watches must be started inside a tokio runtime")]
    NoRuntime,
}

/// One entry of a change set
#[derive(Clone, Debug)]
pub enum Change {
    Add(Arc<Controller>),
    Update {
        previous: Arc<Controller>,
        current: Arc<Controller>,
    },
    Remove(Arc<Controller>),
}

impl Change {
    pub fn path(&self) -> &str {
        match self {
            Change::Add(controller) | Change::Remove(controller) => controller.path(),
            Change::Update { current, .. } => current.path(),
        }
    }

    /// Controller that is active after this change, if any
    pub fn current(&self) -> Option<&Arc<Controller>> {
        match self {
            Change::Add(controller) => Some(controller),
            Change::Update { current, .. } => Some(current),
            Change::Remove(_) => None,
        }
    }
}

/// Every change produced by one reconciliation pass
#[derive(Clone, Debug)]
pub struct ChangeSet {
    pub pass: u64,
    pub changes: Vec<Change>,
}

impl ChangeSet {
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn adds(&self) -> usize {
        self.changes
            .iter()
            .filter(|change| matches!(change, Change::Add(_)))
            .count()
    }

    pub fn updates(&self) -> usize {
        self.changes
            .iter()
            .filter(|change| matches!(change, Change::Update { .. }))
            .count()
    }

    pub fn removes(&self) -> usize {
        self.changes
            .iter()
            .filter(|change| matches!(change, Change::Remove(_)))
            .count()
    }
}

/// Immutable view of the active controllers
#[derive(Clone, Debug, Default)]
pub struct InventorySnapshot {
    version: u64,
    controllers: BTreeMap<String, Arc<Controller>>,
}

impl InventorySnapshot {
    /// Number of batches applied so far
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn lookup(&self, path: &str) -> Option<&Arc<Controller>> {
        self.controllers.get(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Controller>> {
        self.controllers.values()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.controllers.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.controllers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }
}

/// Snapshot plus the change sets that follow it
pub struct InventorySubscription {
    pub snapshot: Arc<InventorySnapshot>,
    receiver: mpsc::UnboundedReceiver<Arc<ChangeSet>>,
}

impl InventorySubscription {
    /// Next change set; `None` once the inventory is disposed
    pub async fn next(&mut self) -> Option<Arc<ChangeSet>> {
        self.receiver.recv().await
    }

    pub fn try_next(&mut self) -> Option<Arc<ChangeSet>> {
        self.receiver.try_recv().ok()
    }
}

/// Active and zombie entries as seen at the start of a pass
pub(crate) struct ReconcileView {
    pub active: HashMap<String, Arc<Controller>>,
    pub zombies: HashMap<String, Arc<Controller>>,
}

#[derive(Default)]
struct InventoryState {
    snapshot: Arc<InventorySnapshot>,
    zombies: HashMap<String, Arc<Controller>>,
    subscribers: Vec<mpsc::UnboundedSender<Arc<ChangeSet>>>,
}

#[derive(Default)]
struct Shared {
    disposed: AtomicBool,
    state: Mutex<InventoryState>,
}

/// Cheaply cloneable handle to the shared inventory
#[derive(Clone, Default)]
pub struct ControllerInventory {
    shared: Arc<Shared>,
}

impl ControllerInventory {
    pub fn new() -> Self {
        Self::default()
    }

    // The disposed flag only changes while the state mutex is held
    fn lock(&self) -> Result<MutexGuard<'_, InventoryState>, InventoryError> {
        let state = self
            .shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if self.is_disposed() {
            return Err(InventoryError::Disposed);
        }
        Ok(state)
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> Result<Arc<InventorySnapshot>, InventoryError> {
        Ok(Arc::clone(&self.lock()?.snapshot))
    }

    pub fn lookup(&self, path: &str) -> Result<Option<Arc<Controller>>, InventoryError> {
        Ok(self.snapshot()?.lookup(path).cloned())
    }

    pub fn all(&self) -> Result<Vec<Arc<Controller>>, InventoryError> {
        Ok(self.snapshot()?.iter().cloned().collect())
    }

    pub fn count(&self) -> Result<usize, InventoryError> {
        Ok(self.snapshot()?.len())
    }

    /// Current snapshot and a queue of every later change set
    pub fn connect(&self) -> Result<InventorySubscription, InventoryError> {
        let mut state = self.lock()?;
        let (sender, receiver) = mpsc::unbounded_channel();
        state.subscribers.push(sender);
        debug!(
            "New inventory subscriber ({} total)",
            state.subscribers.len()
        );
        Ok(InventorySubscription {
            snapshot: Arc::clone(&state.snapshot),
            receiver,
        })
    }

    /// Aggregated control value changes across all active controllers.
    ///
    /// Follows controllers as they are added, updated and removed. `filter` selects
    /// which controls are reported; `None` reports all of them.
    pub fn watch_controls(&self, filter: Option<ControlFilter>) -> Result<ControlWatch, InventoryError> {
        control_watch::spawn(self, filter)
    }

    pub(crate) fn reconcile_view(&self) -> Result<ReconcileView, InventoryError> {
        let state = self.lock()?;
        Ok(ReconcileView {
            active: state
                .snapshot
                .controllers
                .iter()
                .map(|(path, controller)| (path.clone(), Arc::clone(controller)))
                .collect(),
            zombies: state.zombies.clone(),
        })
    }

    /// Applies one reconciliation batch atomically.
    ///
    /// Returns the published change set, or `None` for an empty batch.
    pub(crate) fn apply(&self, batch: &PendingBatch) -> Result<Option<Arc<ChangeSet>>, InventoryError> {
        if batch.is_empty() {
            return Ok(None);
        }

        let mut to_dispose = Vec::new();
        let change_set = {
            let mut state = self.lock()?;
            let mut controllers = state.snapshot.controllers.clone();
            let mut changes = Vec::with_capacity(batch.len());

            for controller in &batch.demoted {
                match controllers.remove(controller.path()) {
                    Some(existing) if Arc::ptr_eq(&existing, controller) => {
                        controller.mark(ControllerState::Zombie);
                        state
                            .zombies
                            .insert(controller.path().to_string(), Arc::clone(controller));
                        info!("Controller removed: {}", controller);
                        changes.push(Change::Remove(Arc::clone(controller)));
                    }
                    Some(other) => {
                        warn!(
                            "Demotion of {} skipped, path now holds {}",
                            controller, other
                        );
                        controllers.insert(other.path().to_string(), other);
                    }
                    None => warn!("Demotion of {} skipped, not active", controller),
                }
            }

            for controller in &batch.resurrected {
                state.zombies.remove(controller.path());
                controller.mark(ControllerState::Active);
                controllers.insert(controller.path().to_string(), Arc::clone(controller));
                info!("Controller resurrected: {}", controller);
                changes.push(Change::Add(Arc::clone(controller)));
            }

            for controller in &batch.added {
                if let Some(zombie) = state.zombies.remove(controller.path()) {
                    to_dispose.push(zombie);
                }
                controllers.insert(controller.path().to_string(), Arc::clone(controller));
                info!("Controller added: {}", controller);
                changes.push(Change::Add(Arc::clone(controller)));
            }

            for (previous, current) in &batch.updated {
                controllers.insert(current.path().to_string(), Arc::clone(current));
                to_dispose.push(Arc::clone(previous));
                info!("Controller updated: {} -> {}", previous, current);
                changes.push(Change::Update {
                    previous: Arc::clone(previous),
                    current: Arc::clone(current),
                });
            }

            let version = state.snapshot.version + 1;
            state.snapshot = Arc::new(InventorySnapshot {
                version,
                controllers,
            });

            let change_set = Arc::new(ChangeSet {
                pass: batch.pass,
                changes,
            });
            state
                .subscribers
                .retain(|subscriber| subscriber.send(Arc::clone(&change_set)).is_ok());
            change_set
        };

        // Replaced definitions will never be resurrected
        for controller in to_dispose {
            controller.dispose();
        }

        Ok(Some(change_set))
    }

    /// Disposes every held controller (active and zombie) exactly once.
    ///
    /// Idempotent; returns how many controllers this call disposed. Every other
    /// operation fails with [`InventoryError::Disposed`] afterwards.
    pub fn dispose(&self) -> usize {
        let state = {
            let mut guard = self
                .shared
                .state
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if self.shared.disposed.swap(true, Ordering::AcqRel) {
                debug!("Inventory already disposed");
                return 0;
            }
            std::mem::take(&mut *guard)
        };
        // Dropping the senders ends every subscription
        drop(state.subscribers);

        let disposed = state
            .snapshot
            .iter()
            .chain(state.zombies.values())
            .filter(|controller| controller.dispose())
            .count();
        info!("Controller inventory disposed ({} controllers)", disposed);
        disposed
    }
}

impl std::fmt::Debug for ControllerInventory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerInventory")
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
