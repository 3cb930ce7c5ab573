//! In-memory `TrackerApi` for coordinator tests

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering::SeqCst};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Notify;

use crate::error::ApiError;
use crate::gps365::TrackerApi;

const DEFAULT_SAVING: &str = "0008302200";

#[derive(Default)]
pub(crate) struct FakeApi {
    devices: Mutex<Vec<Value>>,
    savings: Mutex<HashMap<String, String>>,
    login: Option<Mutex<Option<ApiError>>>,
    list_failures: Mutex<VecDeque<ApiError>>,
    command_failure: Mutex<Option<ApiError>>,
    gate: Mutex<Option<Arc<Notify>>>,
    login_gate: Mutex<Option<Arc<Notify>>>,
    pub commands: Mutex<Vec<String>>,
    pub list_calls: AtomicUsize,
    pub saving_calls: AtomicUsize,
    pub login_calls: AtomicUsize,
}

impl FakeApi {
    pub fn with_devices(devices: Vec<Value>) -> Self {
        Self {
            devices: Mutex::new(devices),
            ..Default::default()
        }
    }

    /// Session-style backend; `outcome` is what every login returns
    pub fn requiring_login(mut self, outcome: Option<ApiError>) -> Self {
        self.login = Some(Mutex::new(outcome));
        self
    }

    /// Every later login returns `err`
    pub fn reject_logins(&self, err: ApiError) {
        if let Some(outcome) = &self.login {
            *outcome.lock().unwrap() = Some(err);
        }
    }

    /// The next login blocks until the returned handle is notified
    pub fn hold_next_login(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.login_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn replace_devices(&self, devices: Vec<Value>) {
        *self.devices.lock().unwrap() = devices;
    }

    pub fn set_saving(&self, imei: &str, raw: &str) {
        self.savings
            .lock()
            .unwrap()
            .insert(imei.to_string(), raw.to_string());
    }

    pub fn saving(&self, imei: &str) -> String {
        self.savings
            .lock()
            .unwrap()
            .get(imei)
            .cloned()
            .unwrap_or_else(|| DEFAULT_SAVING.to_string())
    }

    pub fn fail_next_fetch(&self, err: ApiError) {
        self.list_failures.lock().unwrap().push_back(err);
    }

    pub fn fail_commands(&self, err: ApiError) {
        *self.command_failure.lock().unwrap() = Some(err);
    }

    /// The next device list fetch blocks until the returned handle is notified
    pub fn hold_next_fetch(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn command_log(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    fn command(&self, entry: String) -> Result<(), ApiError> {
        if let Some(err) = self.command_failure.lock().unwrap().clone() {
            return Err(err);
        }
        self.commands.lock().unwrap().push(entry);
        Ok(())
    }

    fn update_record(&self, imei: &str, apply: impl FnOnce(&mut Value)) {
        let mut devices = self.devices.lock().unwrap();
        if let Some(record) = devices.iter_mut().find(|d| d["imei"] == json!(imei)) {
            apply(record);
        }
    }

    fn set_onoff_bit(&self, imei: &str, bit: u32, on: bool) {
        self.update_record(imei, |record| {
            let current: i64 = record["onoff"]
                .as_str()
                .and_then(|s| s.parse().ok())
                .or_else(|| record["onoff"].as_i64())
                .unwrap_or(0);
            let next = if on {
                current | (1 << bit)
            } else {
                current & !(1 << bit)
            };
            record["onoff"] = json!(next.to_string());
        });
    }
}

#[async_trait]
impl TrackerApi for FakeApi {
    fn requires_login(&self) -> bool {
        self.login.is_some()
    }

    async fn login(&self) -> Result<(), ApiError> {
        self.login_calls.fetch_add(1, SeqCst);
        let gate = self.login_gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        match &self.login {
            Some(outcome) => match outcome.lock().unwrap().clone() {
                Some(err) => Err(err),
                None => Ok(()),
            },
            None => Ok(()),
        }
    }

    async fn fetch_devices(&self) -> Result<Vec<Value>, ApiError> {
        self.list_calls.fetch_add(1, SeqCst);
        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let failure = self.list_failures.lock().unwrap().pop_front();
        match failure {
            Some(err) => Err(err),
            None => Ok(self.devices.lock().unwrap().clone()),
        }
    }

    async fn fetch_saving(&self, imei: &str) -> Result<String, ApiError> {
        self.saving_calls.fetch_add(1, SeqCst);
        Ok(self.saving(imei))
    }

    async fn write_saving(&self, imei: &str, saving: &str) -> Result<(), ApiError> {
        self.command(format!("saving {} {}", imei, saving))?;
        self.set_saving(imei, saving);
        Ok(())
    }

    async fn set_led(&self, imei: &str, on: bool) -> Result<(), ApiError> {
        self.command(format!("led {} {}", imei, on))?;
        self.set_onoff_bit(imei, 0, on);
        Ok(())
    }

    async fn set_speaker(&self, imei: &str, on: bool) -> Result<(), ApiError> {
        self.command(format!("speaker {} {}", imei, on))?;
        self.set_onoff_bit(imei, 1, on);
        Ok(())
    }

    async fn set_find(&self, imei: &str, on: bool) -> Result<(), ApiError> {
        self.command(format!("find {} {}", imei, on))
    }

    async fn set_update_interval(&self, imei: &str, seconds: u32) -> Result<(), ApiError> {
        self.command(format!("interval {} {}", imei, seconds))?;
        self.update_record(imei, |record| record["sec"] = json!(seconds.to_string()));
        Ok(())
    }

    async fn shutdown(&self, imei: &str) -> Result<(), ApiError> {
        self.command(format!("shutdown {}", imei))
    }

    async fn reboot(&self, imei: &str) -> Result<(), ApiError> {
        self.command(format!("reboot {}", imei))
    }

    fn app_version(&self) -> &str {
        "test"
    }
}
