//! PollingTask: periodic refresh in a background tokio task
//!
//! Ticks every `PollingOptions::interval`, starting one interval after spawn
//! (the first refresh is done by `first_refresh`). A tick that finds a refresh
//! in flight is dropped. The loop ends on cancellation or once the account's
//! credentials are rejected.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::refresh::{Coordinator, RefreshOutcome};

/// Handle to a running polling loop
pub struct PollingTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl PollingTask {
    /// Stop polling. An in-flight refresh is abandoned and its guard released.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            tracing::warn!("[Sync] Polling task ended abnormally: {}", e);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Coordinator {
    pub fn spawn_polling(self: &Arc<Self>) -> PollingTask {
        let cancel = CancellationToken::new();
        let coordinator = Arc::clone(self);
        let token = cancel.clone();
        let handle = tokio::spawn(async move { coordinator.run_polling(token).await });

        PollingTask { cancel, handle }
    }

    async fn run_polling(&self, cancel: CancellationToken) {
        let period = self.options().interval;
        tracing::info!("[Sync] {} polling every {:?}", self.name(), period);

        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let outcome = tokio::select! {
                _ = cancel.cancelled() => break,
                outcome = self.refresh_if_idle() => outcome,
            };

            if outcome == RefreshOutcome::Halted {
                tracing::error!("[Sync] {} polling stopped: authentication failed", self.name());
                return;
            }
        }

        tracing::info!("[Sync] {} polling stopped", self.name());
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering::SeqCst;
    use std::time::Duration;

    use super::*;
    use crate::coordinator::decode::tests::raw_device;
    use crate::coordinator::fake::FakeApi;
    use crate::coordinator::refresh::{CoordinatorState, PollingOptions};
    use crate::error::ApiError;

    fn coordinator(api: &Arc<FakeApi>, interval_ms: u64) -> Arc<Coordinator> {
        let options = PollingOptions {
            interval: Duration::from_millis(interval_ms),
            fetch_saving_profiles: false,
        };
        Arc::new(Coordinator::new(api.clone(), "acct", options))
    }

    #[tokio::test]
    async fn test_polls_until_shutdown() {
        let api = Arc::new(FakeApi::with_devices(vec![raw_device("1", 0, 0, "0")]));
        let coordinator = coordinator(&api, 20);
        coordinator.first_refresh().await.unwrap();

        let task = coordinator.spawn_polling();
        time::sleep(Duration::from_millis(130)).await;
        task.shutdown().await;

        let polled = api.list_calls.load(SeqCst);
        assert!(polled >= 3, "only {} fetches", polled);

        time::sleep(Duration::from_millis(60)).await;
        assert_eq!(api.list_calls.load(SeqCst), polled);
    }

    #[tokio::test]
    async fn test_shutdown_abandons_inflight_refresh() {
        let api = Arc::new(FakeApi::with_devices(vec![raw_device("1", 0, 0, "0")]));
        let coordinator = coordinator(&api, 10);
        coordinator.first_refresh().await.unwrap();

        // Never released: the tick's fetch blocks until cancelled
        let _gate = api.hold_next_fetch();
        let task = coordinator.spawn_polling();
        time::sleep(Duration::from_millis(50)).await;
        assert_eq!(coordinator.state(), CoordinatorState::Refreshing);

        task.shutdown().await;

        assert_eq!(coordinator.state(), CoordinatorState::Ready);
        assert_eq!(
            coordinator.refresh_if_idle().await,
            RefreshOutcome::Refreshed(1)
        );
    }

    #[tokio::test]
    async fn test_auth_failure_ends_loop() {
        let api = Arc::new(FakeApi::with_devices(vec![raw_device("1", 0, 0, "0")]));
        let coordinator = coordinator(&api, 10);
        coordinator.first_refresh().await.unwrap();
        api.fail_next_fetch(ApiError::Authentication("expired".into()));

        let task = coordinator.spawn_polling();
        time::sleep(Duration::from_millis(80)).await;

        assert!(task.is_finished());
        assert_eq!(coordinator.state(), CoordinatorState::AuthFailed);
        assert_eq!(api.list_calls.load(SeqCst), 2);
    }
}
