//! Coordinator: snapshot ownership and refresh
//!
//! One coordinator per account. It owns the only published `Snapshot`,
//! swaps it wholesale after every successful refresh and never lets two
//! refreshes overlap.
//!
//! Refresh exclusivity is a single-slot guard (`in_flight`). Periodic ticks
//! `try_lock` it and drop the tick when busy. Forced refreshes take a ticket
//! and wait for the slot; a refresh covers every ticket issued before it
//! started, so concurrent forced refreshes collapse into one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{watch, Mutex as AsyncMutex, MutexGuard};

use super::decode::decode_device;
use super::listeners::{ListenerRegistry, Subscription};
use crate::error::{ApiError, Error};
use crate::gps365::TrackerApi;
use crate::models::DeviceState;
use crate::saving_profile::SavingProfile;

#[derive(Debug, Clone)]
pub struct PollingOptions {
    pub interval: Duration,
    pub fetch_saving_profiles: bool,
}

impl Default for PollingOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            fetch_saving_profiles: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinatorState {
    Uninitialized,
    Authenticating,
    Ready,
    Refreshing,
    /// Terminal until the coordinator is rebuilt with new credentials
    AuthFailed,
}

/// Immutable view of every device at one point in time
#[derive(Debug, Clone, Default, Serialize)]
pub struct Snapshot {
    pub devices: HashMap<String, DeviceState>,
    pub refreshed_at: Option<DateTime<Utc>>,
}

impl Snapshot {
    pub fn get(&self, imei: &str) -> Option<&DeviceState> {
        self.devices.get(imei)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RefreshHealth {
    pub last_attempt: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
}

impl RefreshHealth {
    pub fn last_update_success(&self) -> bool {
        self.last_success.is_some() && self.consecutive_failures == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Refreshed(usize),
    /// Another refresh held the slot; this one was dropped
    Skipped,
    /// Attempt failed, previous snapshot kept
    Failed,
    /// Credentials rejected; no further refreshes will run
    Halted,
}

/// Holds a transient state (`Authenticating`, `Refreshing`) on the channel and
/// restores the prior state if the step ends, or is cancelled, without
/// setting a new one. Never overrides `AuthFailed`.
struct StateMark<'a> {
    state: &'a watch::Sender<CoordinatorState>,
    during: CoordinatorState,
    previous: CoordinatorState,
}

impl<'a> StateMark<'a> {
    fn enter(state: &'a watch::Sender<CoordinatorState>, during: CoordinatorState) -> Self {
        let mut previous = during;
        state.send_if_modified(|s| {
            previous = *s;
            if *s == CoordinatorState::AuthFailed {
                false
            } else {
                *s = during;
                true
            }
        });
        Self {
            state,
            during,
            previous,
        }
    }
}

impl Drop for StateMark<'_> {
    fn drop(&mut self) {
        let (during, previous) = (self.during, self.previous);
        self.state.send_if_modified(|s| {
            if *s == during && previous != during {
                *s = previous;
                true
            } else {
                false
            }
        });
    }
}

pub struct Coordinator {
    api: Arc<dyn TrackerApi>,
    name: String,
    options: PollingOptions,
    snapshot: RwLock<Arc<Snapshot>>,
    listeners: Arc<ListenerRegistry>,
    state: watch::Sender<CoordinatorState>,
    in_flight: AsyncMutex<()>,
    /// Forced-refresh tickets handed out
    requested: AtomicU64,
    /// Highest ticket covered by a finished refresh attempt
    served: AtomicU64,
    health: Mutex<RefreshHealth>,
}

impl Coordinator {
    pub fn new(api: Arc<dyn TrackerApi>, name: impl Into<String>, options: PollingOptions) -> Self {
        let (state, _) = watch::channel(CoordinatorState::Uninitialized);

        Self {
            api,
            name: name.into(),
            options,
            snapshot: RwLock::new(Arc::new(Snapshot::default())),
            listeners: Arc::new(ListenerRegistry::default()),
            state,
            in_flight: AsyncMutex::new(()),
            requested: AtomicU64::new(0),
            served: AtomicU64::new(0),
            health: Mutex::new(RefreshHealth::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &PollingOptions {
        &self.options
    }

    pub(super) fn api(&self) -> &dyn TrackerApi {
        self.api.as_ref()
    }

    pub fn state(&self) -> CoordinatorState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<CoordinatorState> {
        self.state.subscribe()
    }

    /// Current published snapshot. Always complete; never a refresh in progress.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn device(&self, imei: &str) -> Option<DeviceState> {
        self.snapshot().get(imei).cloned()
    }

    pub fn health(&self) -> RefreshHealth {
        self.health
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// False while the published snapshot is stale
    pub fn last_update_success(&self) -> bool {
        self.health().last_update_success()
    }

    /// Register a listener, called after every published snapshot
    pub fn subscribe(&self, listener: impl Fn() + Send + Sync + 'static) -> Subscription {
        self.listeners.add(Arc::new(listener))
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Move to `next` unless credentials were already rejected
    fn transition(&self, next: CoordinatorState) {
        self.state.send_if_modified(|s| {
            if *s == CoordinatorState::AuthFailed || *s == next {
                false
            } else {
                *s = next;
                true
            }
        });
    }

    pub(super) fn mark_auth_failed(&self, e: &ApiError) {
        let previous = self.state.send_replace(CoordinatorState::AuthFailed);
        if previous != CoordinatorState::AuthFailed {
            tracing::error!(
                "[Coordinator] {}: credentials rejected, polling halted until reconfigured: {}",
                self.name,
                e
            );
        }
    }

    /// Authenticate if needed, then run the first refresh.
    ///
    /// Rejected credentials come back as `Error::Api(ApiError::Authentication)`;
    /// anything else as `Error::SetupFailed`.
    pub async fn first_refresh(&self) -> Result<(), Error> {
        let guard = self.in_flight.lock().await;
        if self.state() == CoordinatorState::AuthFailed {
            return Err(Error::AuthFailed);
        }

        let _mark = StateMark::enter(&self.state, CoordinatorState::Authenticating);
        if self.api.requires_login() {
            if let Err(e) = self.api.login().await {
                return Err(self.setup_failed(e));
            }
        }

        match self.refresh_locked(&guard).await {
            Ok(count) => {
                tracing::info!("[Coordinator] {} ready with {} devices", self.name, count);
                Ok(())
            }
            Err(e) => Err(self.setup_failed(e)),
        }
    }

    fn setup_failed(&self, e: ApiError) -> Error {
        if e.is_auth() {
            self.mark_auth_failed(&e);
            Error::Api(e)
        } else {
            self.transition(CoordinatorState::Uninitialized);
            tracing::warn!("[Coordinator] {} initial refresh failed: {}", self.name, e);
            Error::SetupFailed(e)
        }
    }

    /// Refresh unless one is already running. Used by the periodic timer.
    pub async fn refresh_if_idle(&self) -> RefreshOutcome {
        if self.state() == CoordinatorState::AuthFailed {
            return RefreshOutcome::Halted;
        }

        let Ok(guard) = self.in_flight.try_lock() else {
            tracing::debug!("[Coordinator] {} refresh in flight, tick dropped", self.name);
            return RefreshOutcome::Skipped;
        };

        match self.refresh_locked(&guard).await {
            Ok(count) => RefreshOutcome::Refreshed(count),
            Err(e) if e.is_auth() => RefreshOutcome::Halted,
            Err(_) => RefreshOutcome::Failed,
        }
    }

    /// Make sure a refresh that starts after this call completes before it
    /// returns. Joins with other pending requests instead of stacking up.
    pub async fn request_refresh(&self) {
        let ticket = self.requested.fetch_add(1, Ordering::SeqCst) + 1;
        let guard = self.in_flight.lock().await;

        if self.served.load(Ordering::SeqCst) >= ticket {
            tracing::debug!("[Coordinator] {} forced refresh coalesced", self.name);
            return;
        }
        if self.state() == CoordinatorState::AuthFailed {
            return;
        }

        // Failures were already logged and recorded
        let _ = self.refresh_locked(&guard).await;
    }

    async fn refresh_locked(&self, _guard: &MutexGuard<'_, ()>) -> Result<usize, ApiError> {
        let covers = self.requested.load(Ordering::SeqCst);
        let _mark = StateMark::enter(&self.state, CoordinatorState::Refreshing);
        let started = Utc::now();

        let result = self.collect_devices().await;
        self.served.fetch_max(covers, Ordering::SeqCst);

        match result {
            Ok(devices) => {
                let count = devices.len();
                self.publish(devices, started);
                self.record_attempt(started, None);
                self.transition(CoordinatorState::Ready);
                tracing::debug!("[Coordinator] {} published {} devices", self.name, count);
                self.listeners.notify();
                Ok(count)
            }
            Err(e) => {
                self.record_attempt(started, Some(&e));
                if e.is_auth() {
                    self.mark_auth_failed(&e);
                } else {
                    tracing::warn!(
                        "[Coordinator] {} refresh failed, keeping previous snapshot: {}",
                        self.name,
                        e
                    );
                }
                Err(e)
            }
        }
    }

    /// An expired web session answers with the HTML login page instead of
    /// JSON; log in once more and retry before calling it a failure.
    async fn fetch_records(&self) -> Result<Vec<Value>, ApiError> {
        match self.api.fetch_devices().await {
            Err(ApiError::Decode { reason, .. }) if self.api.requires_login() => {
                tracing::info!(
                    "[Coordinator] {} device list undecodable ({}), logging in again",
                    self.name,
                    reason
                );
                self.api.login().await?;
                self.api.fetch_devices().await
            }
            other => other,
        }
    }

    async fn collect_devices(&self) -> Result<HashMap<String, DeviceState>, ApiError> {
        let records = self.fetch_records().await?;
        let app_version = self.api.app_version();

        let mut devices = HashMap::with_capacity(records.len());
        for raw in &records {
            let device = decode_device(raw, app_version).map_err(|e| e.into_api_error(raw))?;
            devices.insert(device.imei.clone(), device);
        }

        if self.options.fetch_saving_profiles {
            self.attach_profiles(&mut devices).await?;
        }

        Ok(devices)
    }

    async fn attach_profiles(&self, devices: &mut HashMap<String, DeviceState>) -> Result<(), ApiError> {
        let imeis: Vec<String> = devices.keys().cloned().collect();
        let fetched = join_all(imeis.iter().map(|imei| self.api.fetch_saving(imei))).await;

        for (imei, result) in imeis.iter().zip(fetched) {
            match result {
                Ok(raw) => match SavingProfile::parse(raw) {
                    Ok(profile) => {
                        if let Some(device) = devices.get_mut(imei) {
                            device.saving = Some(profile);
                        }
                    }
                    Err(e) => {
                        tracing::error!("[Coordinator] Saving profile of {} is malformed: {}", imei, e)
                    }
                },
                Err(e) if e.is_auth() => return Err(e),
                Err(e) => {
                    tracing::warn!("[Coordinator] Saving profile fetch failed for {}: {}", imei, e)
                }
            }
        }

        Ok(())
    }

    fn publish(&self, devices: HashMap<String, DeviceState>, at: DateTime<Utc>) {
        let next = Arc::new(Snapshot {
            devices,
            refreshed_at: Some(at),
        });
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = next;
    }

    fn record_attempt(&self, at: DateTime<Utc>, error: Option<&ApiError>) {
        let mut health = self.health.lock().unwrap_or_else(PoisonError::into_inner);
        health.last_attempt = Some(at);
        match error {
            None => {
                health.last_success = Some(at);
                health.last_error = None;
                health.consecutive_failures = 0;
            }
            Some(e) => {
                health.last_error = Some(e.to_string());
                health.consecutive_failures += 1;
            }
        }
    }
}
