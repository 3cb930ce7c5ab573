//! Configuration module

use std::time::Duration;

use serde::Deserialize;

use crate::coordinator::PollingOptions;
use crate::gps365::{ClientOptions, Credentials, DEFAULT_BASE_URL};

#[derive(Debug, Deserialize)]
pub struct Config {
    pub account: AccountConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// Stateless per-request token (app protocol)
    #[default]
    Token,
    /// Cookie session established by an explicit login (web protocol)
    Session,
}

#[derive(Deserialize)]
pub struct AccountConfig {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub auth_mode: AuthMode,
    #[serde(default)]
    pub demo: bool,
}

// Hand-written so the password never reaches a log line
impl std::fmt::Debug for AccountConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountConfig")
            .field("username", &self.credentials().masked_username())
            .field("auth_mode", &self.auth_mode)
            .field("demo", &self.demo)
            .finish()
    }
}

impl AccountConfig {
    pub fn credentials(&self) -> Credentials {
        Credentials::new(&self.username, &self.password)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_true")]
    pub fetch_saving_profiles: bool,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            fetch_saving_profiles: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_true")]
    pub accept_invalid_certs: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            accept_invalid_certs: true,
        }
    }
}

fn default_interval_secs() -> u64 {
    10
}

fn default_timeout_secs() -> u64 {
    5
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_true() -> bool {
    true
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::Environment::with_prefix("GPS365").separator("__"))
            .build()?;

        let config: Config = settings.try_deserialize()?;
        anyhow::ensure!(
            !config.account.username.is_empty() && !config.account.password.is_empty(),
            "account.username and account.password are required"
        );
        anyhow::ensure!(config.polling.interval_secs > 0, "polling.interval_secs must be positive");

        Ok(config)
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            base_url: self.http.base_url.clone(),
            timeout: Duration::from_secs(self.http.timeout_secs),
            accept_invalid_certs: self.http.accept_invalid_certs,
        }
    }

    pub fn polling_options(&self) -> PollingOptions {
        PollingOptions {
            interval: Duration::from_secs(self.polling.interval_secs),
            fetch_saving_profiles: self.polling.fetch_saving_profiles,
        }
    }
}
