//! Background eviction of idle clients.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::registry::LimiterRegistry;

/// Handle to the periodic sweep task.
///
/// The sweeper wakes once per period and removes every client whose window
/// has fully expired. It has a single owner: call [`stop`](Self::stop) or
/// [`shutdown`](Self::shutdown) from that owner. Dropping the handle also
/// signals the task to stop.
pub struct EvictionSweeper {
    stop_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
    period: Duration,
}

impl EvictionSweeper {
    /// Spawn the sweep task on the current Tokio runtime.
    ///
    /// The first sweep runs one full `period` after spawning.
    pub fn spawn(registry: Arc<LimiterRegistry>, period: Duration) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(run(registry, period, stop_rx));

        info!(period = ?period, "Eviction sweeper started");

        Self {
            stop_tx,
            handle: Some(handle),
            period,
        }
    }

    /// Get the interval between sweeps.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Signal the task to stop. Calling this more than once is harmless.
    ///
    /// Admission checks already in flight are unaffected.
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }

    /// Whether the task has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Stop the task and wait for it to exit.
    pub async fn shutdown(mut self) {
        self.stop();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "Eviction sweeper task ended abnormally");
            }
        }
        info!("Eviction sweeper stopped");
    }
}

impl Drop for EvictionSweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for EvictionSweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvictionSweeper")
            .field("period", &self.period)
            .field("stopped", &*self.stop_tx.borrow())
            .finish()
    }
}

async fn run(
    registry: Arc<LimiterRegistry>,
    period: Duration,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            // Errors once the handle is gone, which also means stop.
            _ = stop_rx.changed() => break,
            _ = ticker.tick() => {
                let evicted = registry.sweep(Instant::now());
                if evicted > 0 {
                    debug!(evicted, remaining = registry.len(), "Evicted idle clients");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::WindowLimit;

    fn registry(max_requests: usize, window: Duration) -> Arc<LimiterRegistry> {
        Arc::new(LimiterRegistry::new(WindowLimit::new(max_requests, window).unwrap()))
    }

    #[tokio::test]
    async fn test_sweeper_evicts_idle_clients() {
        let window = Duration::from_millis(100);
        let registry = registry(10, window);

        for client in ["192.168.1.6", "192.168.1.7", "192.168.1.8", "192.168.1.9"] {
            registry.get_or_create(client).try_admit(Instant::now());
        }
        assert_eq!(registry.len(), 4);

        let sweeper = EvictionSweeper::spawn(Arc::clone(&registry), window);
        tokio::time::sleep(window * 3 + Duration::from_millis(50)).await;

        assert!(registry.is_empty());
        sweeper.shutdown().await;
    }

    #[tokio::test]
    async fn test_sweeper_keeps_active_clients() {
        let window = Duration::from_millis(300);
        let registry = registry(1000, window);
        let sweeper = EvictionSweeper::spawn(Arc::clone(&registry), Duration::from_millis(50));

        for _ in 0..10 {
            registry.get_or_create("chatty").try_admit(Instant::now());
            tokio::time::sleep(Duration::from_millis(30)).await;
        }

        assert!(registry.contains("chatty"));
        sweeper.shutdown().await;
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let period = Duration::from_secs(60);
        let sweeper = EvictionSweeper::spawn(registry(1, period), period);

        sweeper.stop();
        sweeper.stop();

        tokio::time::timeout(Duration::from_secs(1), sweeper.shutdown())
            .await
            .expect("sweeper should exit promptly after stop");
    }

    #[tokio::test]
    async fn test_shutdown_does_not_wait_for_next_period() {
        let period = Duration::from_secs(3600);
        let sweeper = EvictionSweeper::spawn(registry(1, period), period);
        assert_eq!(sweeper.period(), Duration::from_secs(3600));
        assert!(!sweeper.is_finished());

        tokio::time::timeout(Duration::from_secs(1), sweeper.shutdown())
            .await
            .expect("shutdown should not block on the sweep period");
    }

    #[tokio::test]
    async fn test_admissions_continue_after_stop() {
        let window = Duration::from_secs(60);
        let registry = registry(2, window);
        let sweeper = EvictionSweeper::spawn(Arc::clone(&registry), window);

        sweeper.shutdown().await;

        let counter = registry.get_or_create("A");
        assert!(counter.try_admit(Instant::now()).is_allowed());
        assert!(counter.try_admit(Instant::now()).is_allowed());
        assert!(!counter.try_admit(Instant::now()).is_allowed());
    }
}
