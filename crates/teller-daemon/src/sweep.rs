//! Background expiry sweep.
//!
//! Removes expired actions on a fixed interval. Each sweep is one atomic
//! store operation, so it interleaves safely with create/validate/reserve
//! and with the per-request expiry reaps.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::metrics::TellerMetrics;
use crate::registry::ActionRegistry;

/// Default sweep interval.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Periodic expiry sweeper. Construct with [`ExpirySweeper::new`], then
/// drive with [`ExpirySweeper::run`] on the runtime.
pub struct ExpirySweeper {
    registry: Arc<ActionRegistry>,
    interval: Duration,
    metrics: Option<Arc<TellerMetrics>>,
    shutdown: watch::Receiver<bool>,
}

impl ExpirySweeper {
    /// Builds a sweeper. `shutdown` flips to `true` when the daemon is
    /// stopping.
    pub fn new(
        registry: Arc<ActionRegistry>,
        interval: Duration,
        metrics: Option<Arc<TellerMetrics>>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            registry,
            interval,
            metrics,
            shutdown,
        }
    }

    /// Runs until shutdown. One sweep per tick; a slow sweep skips missed
    /// ticks instead of bursting.
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.sweep_once(),
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        tracing::debug!("expiry sweeper stopping");
                        return;
                    }
                },
            }
        }
    }

    fn sweep_once(&self) {
        match self.registry.sweep_expired_at(Utc::now()) {
            Ok(0) => {},
            Ok(reaped) => {
                tracing::info!(reaped, "expiry sweep removed actions");
                if let Some(metrics) = &self.metrics {
                    metrics.actions_reaped(reaped);
                }
            },
            Err(error) => {
                // Transient store faults leave records in place; the next
                // tick retries.
                tracing::warn!(%error, "expiry sweep failed");
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;
    use teller_core::{ActionKind, NewAction};

    use super::*;
    use crate::store::FileBackedActionStore;

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_reaps_and_stops_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let store =
            FileBackedActionStore::open(dir.path().join("actions.json"), Utc::now()).unwrap();
        let registry = Arc::new(ActionRegistry::new(Arc::new(store)));
        registry
            .create(&NewAction {
                owner_key: "g1".to_string(),
                display_card_number: None,
                display_name: None,
                kind: ActionKind::CheckBalance,
                description: String::new(),
                max_uses: None,
                ttl: Some(ChronoDuration::milliseconds(-1)),
            })
            .unwrap();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let sweeper = ExpirySweeper::new(
            Arc::clone(&registry),
            Duration::from_secs(1),
            None,
            shutdown_rx,
        );
        let handle = tokio::spawn(sweeper.run());

        // First tick fires immediately under the paused clock.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(registry.list_by_owner("g1").unwrap().is_empty());

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
