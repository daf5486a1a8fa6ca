use crate::services::store::{EphemeralStore, SweepReport};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior, interval};

/// Background task deleting staged files older than the TTL.
pub struct Reaper {
    store: Arc<EphemeralStore>,
    ttl: Duration,
    sweep_interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl Reaper {
    pub fn new(
        store: Arc<EphemeralStore>,
        ttl: Duration,
        sweep_interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            store,
            ttl,
            sweep_interval,
            shutdown,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Sweep immediately, then every `sweep_interval` until shutdown is
    /// signalled or the shutdown sender is dropped.
    pub async fn run(mut self) {
        tracing::info!(
            "🧹 Reaper started (ttl={}s, interval={}s)",
            self.ttl.as_secs(),
            self.sweep_interval.as_secs()
        );

        let mut ticker = interval(self.sweep_interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        tracing::info!("🛑 Reaper shutting down");
                        break;
                    }
                }
                _ = ticker.tick() => {
                    self.sweep_once().await;
                }
            }
        }
    }

    /// One sweep pass. A failing pass is logged and reported as `None`;
    /// it never takes the loop down.
    pub async fn sweep_once(&self) -> Option<SweepReport> {
        let store = Arc::clone(&self.store);
        let ttl = self.ttl;

        match tokio::spawn(async move { store.sweep(ttl).await }).await {
            Ok(report) => {
                if report.removed > 0 || report.failed > 0 {
                    tracing::info!(
                        "🧹 Sweep removed {} of {} staged file(s), {} failed",
                        report.removed,
                        report.scanned,
                        report.failed
                    );
                } else {
                    tracing::debug!("Sweep scanned {} staged file(s)", report.scanned);
                }
                Some(report)
            }
            Err(e) => {
                tracing::error!("❌ Sweep task failed: {}", e);
                None
            }
        }
    }
}
