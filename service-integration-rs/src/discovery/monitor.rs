//! Background heartbeat sweep
//!
//! The only long-lived task in the runtime. Holds a weak reference to the
//! discovery service so a forgotten monitor never keeps it alive.

use std::sync::{Mutex, MutexGuard, Weak};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::ServiceDiscovery;

#[derive(Debug)]
pub(crate) struct HeartbeatMonitor {
    interval: Duration,
    worker_handle: Mutex<Option<JoinHandle<()>>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl HeartbeatMonitor {
    pub(crate) fn new(interval: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            interval,
            worker_handle: Mutex::new(None),
            shutdown_tx,
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.handle().as_ref().map_or(false, |handle| !handle.is_finished())
    }

    /// Spawn the sweep loop. Returns false if it was already running.
    pub(crate) fn start(&self, discovery: Weak<ServiceDiscovery>) -> bool {
        let mut worker_handle = self.handle();
        if worker_handle.as_ref().map_or(false, |handle| !handle.is_finished()) {
            debug!("Heartbeat monitor already running");
            return false;
        }

        let period = self.interval;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!("Heartbeat monitor received shutdown signal");
                        break;
                    }

                    _ = ticker.tick() => {
                        let discovery = match discovery.upgrade() {
                            Some(discovery) => discovery,
                            None => {
                                debug!("Service discovery dropped, heartbeat monitor exiting");
                                break;
                            }
                        };

                        // A sweep in progress is abandoned on shutdown
                        tokio::select! {
                            _ = shutdown_rx.recv() => break,
                            marked = discovery.sweep() => {
                                if marked > 0 {
                                    info!(marked_offline = marked, "Heartbeat sweep completed");
                                }
                            }
                        }
                    }
                }
            }
        });

        *worker_handle = Some(handle);
        info!(interval_secs = period.as_secs_f64(), "Heartbeat monitor started");
        true
    }

    /// Signal the loop to stop and wait for it to exit
    pub(crate) async fn stop(&self) {
        let handle = self.handle().take();
        let Some(handle) = handle else {
            return;
        };

        let _ = self.shutdown_tx.send(());
        if let Err(e) = handle.await {
            if !e.is_cancelled() {
                warn!(error = %e, "Heartbeat monitor task ended abnormally");
            }
        }
        info!("Heartbeat monitor stopped");
    }

    fn handle(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.worker_handle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
