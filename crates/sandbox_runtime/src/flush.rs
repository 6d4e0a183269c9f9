//! Background persistence of dirty snapshots.
//!
//! A tokio task polls the store's dirty flag on a fixed period and runs the
//! blocking file writes on the blocking pool, so capture and restore never
//! wait on disk.

use crate::error::{RuntimeError, RuntimeResult};
use sandbox_storage::{FlushOutcome, SnapshotPersister, SnapshotStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::{JoinHandle, spawn_blocking};
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// Flush the store once on the blocking pool if it is dirty
///
/// # Errors
///
/// Returns error if writing fails or the blocking task panics
pub async fn flush_once(store: &Arc<SnapshotStore>, persister: &Arc<SnapshotPersister>) -> RuntimeResult<FlushOutcome> {
    if !store.is_dirty() {
        return Ok(FlushOutcome::Clean);
    }

    let store = Arc::clone(store);
    let persister = Arc::clone(persister);
    let outcome = spawn_blocking(move || persister.flush(&store))
        .await
        .map_err(|e| RuntimeError::Task { reason: e.to_string() })??;
    Ok(outcome)
}

/// Periodic flush task
#[derive(Debug)]
pub struct FlushScheduler {
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl FlushScheduler {
    /// Start flushing every `period`; must be called inside a tokio runtime
    #[must_use]
    pub fn spawn(store: Arc<SnapshotStore>, persister: Arc<SnapshotPersister>, period: Duration) -> Self {
        let (shutdown, mut shutdown_rx) = oneshot::channel();
        let period = period.max(Duration::from_millis(1));

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => run(&store, &persister).await,
                    _ = &mut shutdown_rx => {
                        run(&store, &persister).await;
                        debug!("Flush scheduler stopped");
                        break;
                    }
                }
            }
        });

        Self {
            shutdown: Some(shutdown),
            handle,
        }
    }

    /// Stop the task after one final flush
    ///
    /// # Errors
    ///
    /// Returns error if the task panicked
    pub async fn shutdown(mut self) -> RuntimeResult<()> {
        if let Some(shutdown) = self.shutdown.take() {
            // Receiver is gone only if the task already ended
            let _ = shutdown.send(());
        }
        self.handle
            .await
            .map_err(|e| RuntimeError::Task { reason: e.to_string() })
    }
}

async fn run(store: &Arc<SnapshotStore>, persister: &Arc<SnapshotPersister>) {
    match flush_once(store, persister).await {
        Ok(FlushOutcome::Clean | FlushOutcome::Disabled) => {}
        Ok(outcome) => debug!(?outcome, "Flush completed"),
        Err(e) => warn!(error = %e, "Snapshot flush failed, will retry"),
    }
}
