//! Recurring identity expiry sweep

use dorm_core::{IdentityLifecycle, SweepReport};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

/// Runs [`IdentityLifecycle::reclaim_expired`] on a fixed interval until
/// stopped. The first pass runs immediately on start.
pub struct Sweeper {
    lifecycle: Arc<IdentityLifecycle>,
    period: Duration,
    shutdown_tx: watch::Sender<bool>,
}

impl Sweeper {
    pub fn new(lifecycle: Arc<IdentityLifecycle>, period: Duration) -> Arc<Self> {
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new(Self {
            lifecycle,
            period,
            shutdown_tx,
        })
    }

    /// Run one pass now.
    pub async fn sweep_once(&self) -> SweepReport {
        self.lifecycle.reclaim_expired().await
    }

    /// Loop until [`stop`](Self::stop) is called.
    pub async fn start(self: Arc<Self>) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        if *shutdown_rx.borrow() {
            return;
        }

        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(period_secs = self.period.as_secs(), "Identity sweeper started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.sweep_once().await;
                    if report.failed > 0 {
                        tracing::error!(failed = report.failed, "Identity sweep left failures");
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Identity sweeper stopped");
    }

    /// Stop the sweeper
    pub fn stop(&self) {
        self.shutdown_tx.send_replace(true);
    }
}
