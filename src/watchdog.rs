//! Idle watchdog and the daemon-wide shutdown signal.
//!
//! Every client report touches [`Liveness`]. A periodic check compares the
//! last touch against the idle timeout and forces [`Shutdown`] once no client
//! has reported for that long. A forced shutdown does not drain: open
//! requests are abandoned and the process exits with tasks still in flight.
//! `/shutdown` and the last client quitting use the graceful path instead.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

/// Timestamp of the most recent client report.
#[derive(Debug, Clone)]
pub struct Liveness {
    last_report: Arc<Mutex<Instant>>,
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

impl Liveness {
    pub fn new() -> Self {
        Self {
            last_report: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub async fn touch(&self) {
        *self.last_report.lock().await = Instant::now();
    }

    pub async fn idle_for(&self) -> Duration {
        self.last_report.lock().await.elapsed()
    }
}

/// Process-wide stop signal, observed by the HTTP server's graceful shutdown.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    token: CancellationToken,
    forced: CancellationToken,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.token.cancel();
    }

    /// Stop without draining open requests.
    pub fn force(&self) {
        self.forced.cancel();
        self.token.cancel();
    }

    pub fn is_forced(&self) -> bool {
        self.forced.is_cancelled()
    }

    pub fn wait_forced(&self) -> WaitForCancellationFutureOwned {
        self.forced.clone().cancelled_owned()
    }

    /// Fire the signal after `delay`, leaving time for an in-flight reply.
    pub fn trigger_after(&self, delay: Duration) {
        let token = self.token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            token.cancel();
        });
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn wait(&self) -> WaitForCancellationFutureOwned {
        self.token.clone().cancelled_owned()
    }
}

/// Check liveness every `period`; force shutdown once idle for at least
/// `idle_timeout`. The loop ends when shutdown fires from anywhere.
pub fn spawn_idle_watchdog(
    liveness: Liveness,
    shutdown: Shutdown,
    idle_timeout: Duration,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                _ = ticker.tick() => {}
            }
            let idle = liveness.idle_for().await;
            if idle >= idle_timeout {
                tracing::warn!(
                    idle_secs = idle.as_secs(),
                    "No client reported within the idle timeout, exiting"
                );
                shutdown.force();
                break;
            }
            tracing::debug!(idle_secs = idle.as_secs(), "Watchdog check");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn idle_daemon_shuts_down() {
        let liveness = Liveness::new();
        let shutdown = Shutdown::new();
        let timeout = Duration::from_secs(180);
        let watchdog = spawn_idle_watchdog(liveness, shutdown.clone(), timeout, timeout);

        tokio::time::sleep(Duration::from_secs(179)).await;
        assert!(!shutdown.is_triggered());

        watchdog.await.unwrap();
        assert!(shutdown.is_triggered());
        assert!(shutdown.is_forced());
    }

    #[tokio::test(start_paused = true)]
    async fn reports_keep_daemon_alive() {
        let liveness = Liveness::new();
        let shutdown = Shutdown::new();
        let timeout = Duration::from_secs(180);
        let watchdog =
            spawn_idle_watchdog(liveness.clone(), shutdown.clone(), timeout, timeout);

        for _ in 0..4 {
            tokio::time::sleep(Duration::from_secs(100)).await;
            liveness.touch().await;
        }
        assert!(!shutdown.is_triggered());

        // 400s elapsed, last touch at 400s; the 540s check sees only 140s idle.
        tokio::time::sleep(Duration::from_secs(150)).await;
        assert!(!shutdown.is_triggered());

        watchdog.await.unwrap();
        assert!(shutdown.is_triggered());
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_trigger() {
        let shutdown = Shutdown::new();
        shutdown.trigger_after(Duration::from_secs(1));
        tokio::time::sleep(Duration::from_millis(999)).await;
        assert!(!shutdown.is_triggered());
        shutdown.wait().await;
        assert!(shutdown.is_triggered());
        assert!(!shutdown.is_forced());
    }

    #[tokio::test]
    async fn force_releases_both_waits() {
        let shutdown = Shutdown::new();
        let graceful = shutdown.wait();
        let forced = shutdown.wait_forced();
        shutdown.force();
        tokio::time::timeout(Duration::from_secs(1), async {
            graceful.await;
            forced.await;
        })
        .await
        .unwrap();
    }
}
