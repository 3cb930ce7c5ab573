//! 365GPS backend integration module
//!
//! - `auth`: Authentication strategies (per-request token, cookie session)
//! - `client`: HTTP transport, payload decoding and per-endpoint operations

pub mod auth;
pub mod client;

pub use auth::{derive_token, AuthStrategy, Credentials, SessionAuth, TokenAuth};
pub use client::{decode_content, ClientOptions, Gps365Client, HttpSession, DEFAULT_BASE_URL};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ApiError;

/// Everything the coordinator needs from the backend.
///
/// `Gps365Client` is the production implementation; no method retries.
#[async_trait]
pub trait TrackerApi: Send + Sync {
    /// Whether `login` must succeed before any other call
    fn requires_login(&self) -> bool;

    async fn login(&self) -> Result<(), ApiError>;

    /// Raw device records, uninterpreted
    async fn fetch_devices(&self) -> Result<Vec<Value>, ApiError>;

    /// Raw packed saving profile of one device
    async fn fetch_saving(&self, imei: &str) -> Result<String, ApiError>;

    async fn write_saving(&self, imei: &str, saving: &str) -> Result<(), ApiError>;

    async fn set_led(&self, imei: &str, on: bool) -> Result<(), ApiError>;

    async fn set_speaker(&self, imei: &str, on: bool) -> Result<(), ApiError>;

    async fn set_find(&self, imei: &str, on: bool) -> Result<(), ApiError>;

    async fn set_update_interval(&self, imei: &str, seconds: u32) -> Result<(), ApiError>;

    async fn shutdown(&self, imei: &str) -> Result<(), ApiError>;

    async fn reboot(&self, imei: &str) -> Result<(), ApiError>;

    /// Version string this client presents to the backend
    fn app_version(&self) -> &str;
}
