use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use switchyard_core::config::StateConfig;
use switchyard_core::state::StateStore;

/// Background task that evicts idle sessions on a fixed interval.
pub struct SessionSweeper {
    store: Arc<StateStore>,
    ttl: Duration,
    interval: Duration,
}

impl SessionSweeper {
    pub fn new(store: Arc<StateStore>, ttl: Duration, interval: Duration) -> Self {
        Self {
            store,
            ttl,
            interval,
        }
    }

    pub fn from_config(store: Arc<StateStore>, config: &StateConfig) -> Self {
        Self::new(
            store,
            Duration::from_secs(config.idle_ttl_secs),
            Duration::from_secs(config.sweep_interval_secs),
        )
    }

    /// One eviction pass. Returns how many sessions were removed.
    pub async fn sweep(&self) -> usize {
        match self.store.evict_idle(self.ttl).await {
            Ok(evicted) => {
                debug!(evicted, "Session sweep complete");
                evicted
            }
            Err(e) => {
                error!(error = %e, "Session sweep failed");
                0
            }
        }
    }

    /// Sweep until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            ttl_secs = self.ttl.as_secs(),
            interval_secs = self.interval.as_secs(),
            "Session sweeper started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = cancel.cancelled() => {
                    info!("Session sweeper shutting down");
                    break;
                }
            }
            self.sweep().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchyard_core::types::SessionId;

    #[tokio::test]
    async fn test_sweep_evicts_idle_sessions() {
        let store = Arc::new(StateStore::in_memory());
        let sid = SessionId::from_string("idle");
        store.open(&sid).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        let sweeper = SessionSweeper::new(store.clone(), Duration::from_millis(10), Duration::from_secs(60));
        assert_eq!(sweeper.sweep().await, 1);
        assert!(store.load(&sid).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let store = Arc::new(StateStore::in_memory());
        store.open(&SessionId::from_string("a")).await.unwrap();

        let sweeper = SessionSweeper::new(store.clone(), Duration::from_millis(1), Duration::from_millis(10));
        let cancel = CancellationToken::new();
        let task = {
            let cancel = cancel.clone();
            tokio::spawn(async move { sweeper.run(cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
        task.await.unwrap();
        assert!(store.load(&SessionId::from_string("a")).await.unwrap().is_none());
    }
}
