//! Device commands
//!
//! Every command checks the device against the current snapshot, issues
//! exactly one backend call and, when the backend accepts it, waits for a
//! forced refresh so the caller observes the effect in the next snapshot.
//! Failed commands leave the snapshot and refresh schedule alone.

use std::future::Future;
use std::ops::RangeInclusive;
use std::sync::Arc;

use super::refresh::{Coordinator, CoordinatorState, Snapshot};
use crate::error::{ApiError, Error};
use crate::models::IntervalPreset;
use crate::saving_profile::{encode_field, ProfileValue};

/// Update intervals the trackers accept, in seconds
pub const UPDATE_INTERVAL_RANGE: RangeInclusive<u32> = 10..=65535;

impl Coordinator {
    fn ensure_device(&self, imei: &str) -> Result<Arc<Snapshot>, Error> {
        if self.state() == CoordinatorState::AuthFailed {
            return Err(Error::AuthFailed);
        }
        let snapshot = self.snapshot();
        if snapshot.get(imei).is_none() {
            return Err(Error::NotFound(imei.to_string()));
        }
        Ok(snapshot)
    }

    async fn execute<F>(&self, imei: &str, action: &'static str, call: F) -> Result<(), Error>
    where
        F: Future<Output = Result<(), ApiError>>,
    {
        self.ensure_device(imei)?;

        if let Err(e) = call.await {
            if e.is_auth() {
                self.mark_auth_failed(&e);
            } else {
                tracing::warn!("[Coordinator] {} on {} failed: {}", action, imei, e);
            }
            return Err(e.into());
        }

        tracing::info!("[Coordinator] {} on {} accepted", action, imei);
        self.request_refresh().await;
        Ok(())
    }

    pub async fn set_led(&self, imei: &str, on: bool) -> Result<(), Error> {
        self.execute(imei, "led", self.api().set_led(imei, on)).await
    }

    pub async fn set_speaker(&self, imei: &str, on: bool) -> Result<(), Error> {
        self.execute(imei, "speaker", self.api().set_speaker(imei, on))
            .await
    }

    /// Start or stop the find/locate routine. The backend never reports it back.
    pub async fn set_find(&self, imei: &str, on: bool) -> Result<(), Error> {
        self.execute(imei, "find", self.api().set_find(imei, on)).await
    }

    pub async fn set_update_interval(&self, imei: &str, seconds: u32) -> Result<(), Error> {
        if !UPDATE_INTERVAL_RANGE.contains(&seconds) {
            return Err(Error::InvalidInterval(seconds));
        }
        self.execute(
            imei,
            "update interval",
            self.api().set_update_interval(imei, seconds),
        )
        .await
    }

    pub async fn apply_interval_preset(&self, imei: &str, preset: IntervalPreset) -> Result<(), Error> {
        self.set_update_interval(imei, preset.seconds()).await
    }

    /// Rewrite one saving-profile field, leaving every other byte as reported
    pub async fn set_saving_field(&self, imei: &str, value: ProfileValue) -> Result<(), Error> {
        let snapshot = self.ensure_device(imei)?;
        let current = snapshot
            .get(imei)
            .and_then(|device| device.saving.as_ref())
            .ok_or_else(|| Error::ProfileUnavailable(imei.to_string()))?;

        let updated = encode_field(current.as_str(), value)?;
        self.execute(imei, "saving profile", self.api().write_saving(imei, &updated))
            .await
    }

    pub async fn shutdown(&self, imei: &str) -> Result<(), Error> {
        self.execute(imei, "shutdown", self.api().shutdown(imei)).await
    }

    pub async fn reboot(&self, imei: &str) -> Result<(), Error> {
        self.execute(imei, "reboot", self.api().reboot(imei)).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering::SeqCst;
    use std::time::Duration;

    use chrono::NaiveTime;
    use tokio_test::{assert_err, assert_ok};

    use super::*;
    use crate::coordinator::decode::tests::raw_device;
    use crate::coordinator::fake::FakeApi;
    use crate::coordinator::refresh::PollingOptions;

    async fn ready(fetch_saving_profiles: bool) -> (Arc<FakeApi>, Coordinator) {
        let api = Arc::new(FakeApi::with_devices(vec![
            raw_device("1", 0, 0, "0"),
            raw_device("2", 45, 120, "3"),
        ]));
        let options = PollingOptions {
            interval: Duration::from_secs(60),
            fetch_saving_profiles,
        };
        let coordinator = Coordinator::new(api.clone(), "acct", options);
        coordinator.first_refresh().await.unwrap();
        (api, coordinator)
    }

    #[tokio::test]
    async fn test_command_reflected_in_next_snapshot() {
        let (api, coordinator) = ready(false).await;
        assert!(!coordinator.device("1").unwrap().led);

        assert_ok!(coordinator.set_led("1", true).await);

        assert!(coordinator.device("1").unwrap().led);
        assert_eq!(api.list_calls.load(SeqCst), 2);
        assert_eq!(api.command_log(), vec!["led 1 true"]);
    }

    #[tokio::test]
    async fn test_speaker_off_keeps_led() {
        let (_, coordinator) = ready(false).await;

        assert_ok!(coordinator.set_speaker("2", false).await);

        let device = coordinator.device("2").unwrap();
        assert!(device.led);
        assert!(!device.speaker);
    }

    #[tokio::test]
    async fn test_concurrent_commands_coalesce_refreshes() {
        let (api, coordinator) = ready(false).await;
        let gate = api.hold_next_fetch();

        // A tick holds the slot while both commands complete and wait
        let (tick, first, second, _) = tokio::join!(
            coordinator.refresh_if_idle(),
            coordinator.set_led("1", true),
            coordinator.set_speaker("1", true),
            async {
                tokio::task::yield_now().await;
                gate.notify_one();
            },
        );

        assert!(matches!(tick, crate::coordinator::RefreshOutcome::Refreshed(_)));
        assert_ok!(first);
        assert_ok!(second);
        // setup + held tick + one follow-up for both commands
        assert_eq!(api.list_calls.load(SeqCst), 3);
        let device = coordinator.device("1").unwrap();
        assert!(device.led && device.speaker);
    }

    #[tokio::test]
    async fn test_unknown_device_makes_no_call() {
        let (api, coordinator) = ready(false).await;

        let err = assert_err!(coordinator.reboot("999").await);
        assert!(matches!(err, Error::NotFound(ref imei) if imei == "999"));
        assert!(api.command_log().is_empty());
        assert_eq!(api.list_calls.load(SeqCst), 1);
    }

    #[tokio::test]
    async fn test_interval_bounds() {
        let (api, coordinator) = ready(false).await;

        for bad in [0, 9, 65536] {
            let err = assert_err!(coordinator.set_update_interval("1", bad).await);
            assert!(matches!(err, Error::InvalidInterval(s) if s == bad));
        }
        assert!(api.command_log().is_empty());

        assert_ok!(coordinator.set_update_interval("1", 10).await);
        assert_ok!(coordinator
            .apply_interval_preset("1", IntervalPreset::PowerSaving)
            .await);
        assert_eq!(coordinator.device("1").unwrap().update_interval, 600);
    }

    #[tokio::test]
    async fn test_saving_field_touches_one_slot() {
        let (api, coordinator) = ready(true).await;
        api.set_saving("1", "0008302200XYZ");
        coordinator.request_refresh().await;

        assert_ok!(coordinator
            .set_saving_field("1", ProfileValue::PowerSaving(true))
            .await);
        assert_eq!(api.saving("1"), "1008302200XYZ");

        let off = NaiveTime::from_hms_opt(23, 5, 0).unwrap();
        assert_ok!(coordinator
            .set_saving_field("1", ProfileValue::OffTime(off))
            .await);
        assert_eq!(api.saving("1"), "1008302305XYZ");

        let profile = coordinator.device("1").unwrap().saving.unwrap();
        assert!(profile.power_saving());
        assert_eq!(profile.off_time(), off);
    }

    #[tokio::test]
    async fn test_saving_field_without_profile() {
        let (api, coordinator) = ready(false).await;

        let err = assert_err!(coordinator
            .set_saving_field("1", ProfileValue::Remote(true))
            .await);
        assert!(matches!(err, Error::ProfileUnavailable(_)));
        assert!(api.command_log().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_command_skips_refresh() {
        let (api, coordinator) = ready(false).await;
        api.fail_commands(ApiError::Operation {
            endpoint: "n365_shutdown.php",
            body: "{\"result\":\"N\"}".into(),
        });
        let before = coordinator.snapshot();

        let err = assert_err!(coordinator.shutdown("2").await);
        assert!(matches!(err, Error::Api(ApiError::Operation { .. })));
        assert_eq!(api.list_calls.load(SeqCst), 1);
        assert!(Arc::ptr_eq(&before, &coordinator.snapshot()));
    }

    #[tokio::test]
    async fn test_auth_rejection_on_command_halts() {
        let (api, coordinator) = ready(false).await;
        api.fail_commands(ApiError::Authentication("expired".into()));

        let err = assert_err!(coordinator.set_find("1", true).await);
        assert!(err.requires_reauth());
        assert_eq!(coordinator.state(), CoordinatorState::AuthFailed);

        let err = assert_err!(coordinator.set_led("1", true).await);
        assert!(matches!(err, Error::AuthFailed));
    }

    #[tokio::test]
    async fn test_auth_rejection_survives_inflight_refresh() {
        let (api, coordinator) = ready(false).await;
        api.fail_commands(ApiError::Authentication("expired".into()));
        let gate = api.hold_next_fetch();

        let (tick, command, _) = tokio::join!(
            coordinator.refresh_if_idle(),
            coordinator.set_led("1", true),
            async {
                tokio::task::yield_now().await;
                gate.notify_one();
            },
        );

        assert!(matches!(tick, crate::coordinator::RefreshOutcome::Refreshed(_)));
        assert!(assert_err!(command).requires_reauth());
        assert_eq!(coordinator.state(), CoordinatorState::AuthFailed);

        let fetched = api.list_calls.load(SeqCst);
        assert_eq!(
            coordinator.refresh_if_idle().await,
            crate::coordinator::RefreshOutcome::Halted
        );
        assert_eq!(api.list_calls.load(SeqCst), fetched);
    }
}
