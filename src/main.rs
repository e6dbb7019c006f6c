use color_eyre::{eyre::eyre, Result};
use hidcontrollers::config::{default_config_path, AppConfig};
use hidcontrollers::controller::{ControlChange, ControllerHandle};
use hidcontrollers::inventory::{Change, ChangeSet};
use hidcontrollers::reconciler::LoadError;
use hidcontrollers::transport::SnapshotTransport;
use std::sync::Arc;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let config = setup()?;

    let snapshot_path = config.transport.snapshot_path();
    info!("Reading devices from {}", snapshot_path.display());
    let transport = Arc::new(SnapshotTransport::new(snapshot_path));

    let handle = ControllerHandle::spawn(Some(config.controller.clone()), transport)
        .map_err(|e| eyre!("Failed to spawn controller: {}", e))?;
    let mut changes = handle.inventory().connect()?;

    match handle.load_timeout(config.controller.load_timeout()).await {
        Ok(()) => info!(
            "{} controllers after initial scan",
            handle.inventory().count()?
        ),
        Err(LoadError::Timeout(limit)) => {
            warn!("Initial scan still running after {:?}, continuing", limit)
        }
        Err(e) => return Err(eyre!("Controller startup failed: {}", e)),
    }

    let mut values = handle.inventory().watch_controls(None)?;
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = &mut shutdown => {
                result?;
                info!("Ctrl-C received");
                break;
            }
            change_set = changes.next() => match change_set {
                Some(change_set) => log_change_set(&change_set),
                None => break,
            },
            batch = values.next() => match batch {
                Some(batch) => log_values(&batch),
                None => break,
            },
        }
    }

    let disposed = handle.shutdown().await;
    info!("Shutdown complete, {} controllers disposed", disposed);
    Ok(())
}

fn setup() -> Result<AppConfig> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;

    let config = AppConfig::load(&default_config_path())?;
    setup_logging(config.logging.level()?);
    Ok(config)
}

fn setup_logging(level: Level) {
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}

fn log_change_set(change_set: &ChangeSet) {
    info!(
        "Pass {}: {} added, {} updated, {} removed",
        change_set.pass,
        change_set.adds(),
        change_set.updates(),
        change_set.removes()
    );
    for change in &change_set.changes {
        match change {
            Change::Add(controller) => {
                info!("  + {}", controller);
                for control in controller.controls() {
                    debug!("      {} ({})", control.name(), control.kind());
                }
            }
            Change::Update { previous, current } => info!("  ~ {} -> {}", previous, current),
            Change::Remove(controller) => info!("  - {}", controller),
        }
    }
}

fn log_values(batch: &[ControlChange]) {
    for change in batch {
        debug!(
            "{} {}: {:?} -> {}",
            change.device_path, change.control_name, change.previous, change.value
        );
    }
}
