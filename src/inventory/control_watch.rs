//! Aggregated control value stream across the inventory
//!
//! A [`ControlWatch`] owns one supervisor task. The supervisor subscribes to the
//! inventory, starts a forwarder per active controller and reacts to change sets:
//! Add attaches, Remove detaches, Update swaps the old forwarder for a new one.
//! A forwarder that falls behind skips the batches it missed and carries on; one
//! whose value stream closes stops without affecting the others.

use super::{Change, ControllerInventory, InventoryError, InventorySubscription};
use crate::controller::{Control, ControlChange, Controller};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Selects which controls a [`ControlWatch`] reports
pub type ControlFilter = Arc<dyn Fn(&Controller, &Control) -> bool + Send + Sync>;

pub struct ControlWatch {
    receiver: mpsc::UnboundedReceiver<Vec<ControlChange>>,
    supervisor: JoinHandle<()>,
}

impl ControlWatch {
    /// Next non-empty batch of control changes; `None` once the inventory is gone
    pub async fn next(&mut self) -> Option<Vec<ControlChange>> {
        self.receiver.recv().await
    }

    pub fn try_next(&mut self) -> Option<Vec<ControlChange>> {
        self.receiver.try_recv().ok()
    }
}

impl Drop for ControlWatch {
    fn drop(&mut self) {
        self.supervisor.abort();
    }
}

pub(crate) fn spawn(
    inventory: &ControllerInventory,
    filter: Option<ControlFilter>,
) -> Result<ControlWatch, InventoryError> {
    if tokio::runtime::Handle::try_current().is_err() {
        return Err(InventoryError::NoRuntime);
    }
    let subscription = inventory.connect()?;
    let (sender, receiver) = mpsc::unbounded_channel();
    let supervisor = tokio::spawn(supervise(subscription, filter, sender));
    Ok(ControlWatch {
        receiver,
        supervisor,
    })
}

struct Forwarders {
    filter: Option<ControlFilter>,
    sender: mpsc::UnboundedSender<Vec<ControlChange>>,
    running: HashMap<String, JoinHandle<()>>,
}

impl Forwarders {
    fn attach(&mut self, controller: &Arc<Controller>) {
        self.detach(controller.path());

        if let Some(filter) = &self.filter {
            if !controller
                .controls()
                .iter()
                .any(|control| filter(controller.as_ref(), control))
            {
                debug!("No watched controls on {}", controller);
                return;
            }
        }

        let values = match controller.subscribe_values() {
            Ok(values) => values,
            Err(e) => {
                warn!("Cannot watch {}: {}", controller, e);
                return;
            }
        };

        debug!("Watching control values of {}", controller);
        let task = tokio::spawn(forward(
            Arc::clone(controller),
            values,
            self.filter.clone(),
            self.sender.clone(),
        ));
        self.running.insert(controller.path().to_string(), task);
    }

    fn detach(&mut self, path: &str) {
        if let Some(task) = self.running.remove(path) {
            debug!("Stopped watching {}", path);
            task.abort();
        }
    }
}

impl Drop for Forwarders {
    fn drop(&mut self) {
        for (_, task) in self.running.drain() {
            task.abort();
        }
    }
}

async fn supervise(
    mut subscription: InventorySubscription,
    filter: Option<ControlFilter>,
    sender: mpsc::UnboundedSender<Vec<ControlChange>>,
) {
    let mut forwarders = Forwarders {
        filter,
        sender: sender.clone(),
        running: HashMap::new(),
    };

    for controller in subscription.snapshot.iter() {
        forwarders.attach(controller);
    }

    loop {
        tokio::select! {
            _ = sender.closed() => {
                debug!("Control watch dropped by its consumer");
                break;
            }
            change_set = subscription.next() => {
                let Some(change_set) = change_set else {
                    debug!("Inventory closed, ending control watch");
                    break;
                };
                for change in &change_set.changes {
                    match change {
                        Change::Add(controller) => forwarders.attach(controller),
                        Change::Update { current, .. } => forwarders.attach(current),
                        Change::Remove(controller) => forwarders.detach(controller.path()),
                    }
                }
            }
        }
    }
}

async fn forward(
    controller: Arc<Controller>,
    mut values: broadcast::Receiver<crate::controller::ControlChangeBatch>,
    filter: Option<ControlFilter>,
    sender: mpsc::UnboundedSender<Vec<ControlChange>>,
) {
    loop {
        match values.recv().await {
            Ok(batch) => {
                let selected: Vec<ControlChange> = batch
                    .iter()
                    .filter(|change| match &filter {
                        Some(filter) => controller
                            .controls()
                            .get(change.control_index)
                            .is_some_and(|control| filter(controller.as_ref(), control)),
                        None => true,
                    })
                    .cloned()
                    .collect();

                if !selected.is_empty() && sender.send(selected).is_err() {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Closed) => {
                debug!("Value stream of {} closed", controller);
                break;
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(
                    "Value stream of {} lagged, skipped {} batches",
                    controller, skipped
                );
                continue;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::CapabilityField;
    use crate::reconciler::PendingBatch;
    use crate::usage::{ControlKind, Usage, UsageCatalog};
    use std::time::Duration;
    use tokio::time::timeout;

    fn controller(path: &str, capacity: usize) -> Arc<Controller> {
        let fields = vec![
            CapabilityField::new(Usage::button(1), 0, 1),
            CapabilityField::new(Usage::HAT_SWITCH, 0, 7),
        ];
        Arc::new(
            Controller::build(
                path,
                None,
                Arc::from(vec![1u8]),
                &fields,
                &UsageCatalog::standard(),
                capacity,
            )
            .expect("controller"),
        )
    }

    async fn next(watch: &mut ControlWatch) -> Vec<ControlChange> {
        timeout(Duration::from_millis(500), watch.next())
            .await
            .expect("watch timed out")
            .expect("watch closed")
    }

    // Lets the supervisor catch up with the change sets applied so far
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn follows_added_and_removed_controllers() {
        let inventory = ControllerInventory::new();
        let first = controller("/dev/a", 8);
        inventory
            .apply(&PendingBatch {
                pass: 1,
                added: vec![Arc::clone(&first)],
                ..PendingBatch::default()
            })
            .expect("add");

        let mut watch = inventory.watch_controls(None).expect("watch");
        settle().await;

        first.apply_samples(&[(Usage::button(1), 1)]).expect("sample");
        let changes = next(&mut watch).await;
        assert_eq!(changes.len(), 1);
        assert_eq!(&*changes[0].device_path, "/dev/a");

        // Added later: picked up automatically
        let second = controller("/dev/b", 8);
        inventory
            .apply(&PendingBatch {
                pass: 2,
                added: vec![Arc::clone(&second)],
                ..PendingBatch::default()
            })
            .expect("add");
        settle().await;
        second.apply_samples(&[(Usage::HAT_SWITCH, 3)]).expect("sample");
        let changes = next(&mut watch).await;
        assert_eq!(&*changes[0].device_path, "/dev/b");

        // Removed: detached
        inventory
            .apply(&PendingBatch {
                pass: 3,
                demoted: vec![Arc::clone(&first)],
                ..PendingBatch::default()
            })
            .expect("demote");
        settle().await;
        first.apply_samples(&[(Usage::button(1), 0)]).expect("sample");
        settle().await;
        assert!(watch.try_next().is_none());
    }

    #[tokio::test]
    async fn filter_selects_controls() {
        let inventory = ControllerInventory::new();
        let pad = controller("/dev/a", 8);
        inventory
            .apply(&PendingBatch {
                pass: 1,
                added: vec![Arc::clone(&pad)],
                ..PendingBatch::default()
            })
            .expect("add");

        let hats_only: ControlFilter = Arc::new(|_: &Controller, control: &Control| {
            control.kind() == ControlKind::Hat
        });
        let mut watch = inventory.watch_controls(Some(hats_only)).expect("watch");
        settle().await;

        pad.apply_samples(&[(Usage::button(1), 1), (Usage::HAT_SWITCH, 4)])
            .expect("sample");
        let changes = next(&mut watch).await;
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, ControlKind::Hat);

        // Button-only report yields nothing
        pad.apply_samples(&[(Usage::button(1), 0)]).expect("sample");
        settle().await;
        assert!(watch.try_next().is_none());
    }

    #[tokio::test]
    async fn lagging_controller_keeps_delivering() {
        let inventory = ControllerInventory::new();
        let slow = controller("/dev/slow", 1);
        let healthy = controller("/dev/ok", 8);
        inventory
            .apply(&PendingBatch {
                pass: 1,
                added: vec![Arc::clone(&slow), Arc::clone(&healthy)],
                ..PendingBatch::default()
            })
            .expect("add");

        let mut watch = inventory.watch_controls(None).expect("watch");
        settle().await;

        // Overflow the single-slot value channel before the forwarder can drain it
        for value in 0..5 {
            slow.apply_samples(&[(Usage::HAT_SWITCH, value)]).expect("sample");
        }
        settle().await;
        while watch.try_next().is_some() {}

        // The lagged stream recovers
        slow.apply_samples(&[(Usage::HAT_SWITCH, 6)]).expect("sample");
        let changes = next(&mut watch).await;
        assert_eq!(&*changes[0].device_path, "/dev/slow");
        assert_eq!(changes[0].value, 6);

        healthy.apply_samples(&[(Usage::button(1), 1)]).expect("sample");
        let changes = next(&mut watch).await;
        assert_eq!(&*changes[0].device_path, "/dev/ok");
    }

    #[tokio::test]
    async fn ends_when_inventory_is_disposed() {
        let inventory = ControllerInventory::new();
        let mut watch = inventory.watch_controls(None).expect("watch");
        inventory.dispose();
        let ended = timeout(Duration::from_millis(500), watch.next())
            .await
            .expect("watch timed out");
        assert!(ended.is_none());
    }
}
