//! 365GPS HTTP client

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE, USER_AGENT};
use reqwest::{Client, RequestBuilder};
use serde_json::Value;
use url::Url;

use super::auth::{AuthStrategy, Credentials, SessionAuth, TokenAuth, APP_VERSION};
use super::TrackerApi;
use crate::error::{ApiError, BuildError};

pub const DEFAULT_BASE_URL: &str = "https://www.365gps.com";

const SAVING: &str = "n365_sav.php";
const FIND: &str = "n365_find.php";
const LED: &str = "n365_led.php";
const SPEAKER: &str = "n365_spk.php";
const SHUTDOWN: &str = "n365_shutdown.php";
const REBOOT: &str = "n365_reboot.php";
const UPDATE_INTERVAL: &str = "post_submit_customerupload.php";

/// Success marker used by command replies
const RESULT_OK: &str = "Y";
const BOM: char = '\u{feff}';

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub base_url: String,
    pub timeout: Duration,
    pub accept_invalid_certs: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(5),
            accept_invalid_certs: true,
        }
    }
}

/// Decode a response body as text, dropping a leading byte-order mark
pub fn decode_text(endpoint: &'static str, body: &[u8]) -> Result<String, ApiError> {
    let text = std::str::from_utf8(body).map_err(|e| ApiError::decode(endpoint, e, body))?;
    Ok(text.strip_prefix(BOM).unwrap_or(text).to_string())
}

/// Decode a response body as JSON, dropping a leading byte-order mark
pub fn decode_content(endpoint: &'static str, body: &[u8]) -> Result<Value, ApiError> {
    let text = decode_text(endpoint, body)?;
    serde_json::from_str(&text).map_err(|e| ApiError::decode(endpoint, e, body))
}

fn check_result(endpoint: &'static str, reply: &Value) -> Result<(), ApiError> {
    match reply.get("result").and_then(Value::as_str) {
        Some(RESULT_OK) => Ok(()),
        _ => Err(ApiError::Operation {
            endpoint,
            body: reply.to_string(),
        }),
    }
}

fn flag(on: bool) -> String {
    String::from(if on { "1" } else { "0" })
}

// ============================================================================
// Transport
// ============================================================================

/// Shared HTTP session: connection pool, cookie jar, base URL and timeout
pub struct HttpSession {
    http: Client,
    base_url: Url,
    timeout: Duration,
}

impl HttpSession {
    pub fn new(options: &ClientOptions) -> Result<Self, BuildError> {
        let base_url = Url::parse(&options.base_url).map_err(|source| BuildError::InvalidBaseUrl {
            url: options.base_url.clone(),
            source,
        })?;

        let http = Client::builder()
            .danger_accept_invalid_certs(options.accept_invalid_certs)
            .cookie_store(true)
            .timeout(options.timeout)
            .build()?;

        Ok(Self {
            http,
            base_url,
            timeout: options.timeout,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.as_str().trim_end_matches('/'), path)
    }

    pub fn get(&self, path: &str) -> RequestBuilder {
        self.http.get(self.url(path))
    }

    pub fn post(&self, path: &str) -> RequestBuilder {
        self.http.post(self.url(path))
    }

    /// POST with the headers the mobile app sends
    pub fn app_post(&self, path: &str) -> RequestBuilder {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("App"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        self.post(path).headers(headers)
    }

    /// Send a request and return the body of a 2xx response
    pub async fn send(&self, endpoint: &'static str, request: RequestBuilder) -> Result<Vec<u8>, ApiError> {
        tracing::debug!("[Gps365] -> {}", endpoint);

        let response = request
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| ApiError::transport(endpoint, e))?
            .error_for_status()
            .map_err(|e| ApiError::transport(endpoint, e))?;

        let body = response
            .bytes()
            .await
            .map_err(|e| ApiError::transport(endpoint, e))?;

        tracing::debug!("[Gps365] <- {} ({} bytes)", endpoint, body.len());
        Ok(body.to_vec())
    }
}

// ============================================================================
// Client
// ============================================================================

pub struct Gps365Client {
    session: HttpSession,
    auth: Box<dyn AuthStrategy>,
}

impl Gps365Client {
    pub fn new(options: ClientOptions, auth: Box<dyn AuthStrategy>) -> Result<Self, BuildError> {
        Ok(Self {
            session: HttpSession::new(&options)?,
            auth,
        })
    }

    pub fn with_token(credentials: Credentials, options: ClientOptions) -> Result<Self, BuildError> {
        Self::new(options, Box::new(TokenAuth::new(credentials)))
    }

    pub fn with_session(
        credentials: Credentials,
        demo: bool,
        options: ClientOptions,
    ) -> Result<Self, BuildError> {
        Self::new(options, Box::new(SessionAuth::new(credentials, demo)))
    }

    pub fn auth_mode(&self) -> &'static str {
        self.auth.name()
    }

    pub fn account(&self) -> String {
        self.auth.credentials().masked_username()
    }

    fn signed(&self, mut query: Vec<(&'static str, String)>) -> Vec<(&'static str, String)> {
        self.auth.sign(&mut query);
        query
    }

    /// App endpoint call returning the decoded JSON reply
    async fn app_call(&self, endpoint: &'static str, query: Vec<(&'static str, String)>) -> Result<Value, ApiError> {
        let query = self.signed(query);
        let body = self
            .session
            .send(endpoint, self.session.app_post(endpoint).query(&query))
            .await?;
        decode_content(endpoint, &body)
    }

    /// App endpoint call whose reply must carry `result == "Y"`
    async fn app_command(&self, endpoint: &'static str, query: Vec<(&'static str, String)>) -> Result<(), ApiError> {
        let reply = self.app_call(endpoint, query).await?;
        check_result(endpoint, &reply)
    }
}

#[async_trait]
impl TrackerApi for Gps365Client {
    fn requires_login(&self) -> bool {
        self.auth.requires_login()
    }

    async fn login(&self) -> Result<(), ApiError> {
        self.auth.login(&self.session).await
    }

    async fn fetch_devices(&self) -> Result<Vec<Value>, ApiError> {
        self.auth.fetch_device_list(&self.session).await
    }

    async fn fetch_saving(&self, imei: &str) -> Result<String, ApiError> {
        let reply = self.app_call(SAVING, vec![("imei", imei.to_string())]).await?;

        reply
            .get(0)
            .and_then(|entry| entry.get("saving"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ApiError::Decode {
                endpoint: SAVING,
                reason: "missing saving field".to_string(),
                payload: reply.to_string(),
            })
    }

    async fn write_saving(&self, imei: &str, saving: &str) -> Result<(), ApiError> {
        self.app_command(
            SAVING,
            vec![("imei", imei.to_string()), ("msg", saving.to_string())],
        )
        .await
    }

    async fn set_led(&self, imei: &str, on: bool) -> Result<(), ApiError> {
        self.app_command(LED, vec![("imei", imei.to_string()), ("status", flag(on))])
            .await
    }

    async fn set_speaker(&self, imei: &str, on: bool) -> Result<(), ApiError> {
        self.app_command(SPEAKER, vec![("imei", imei.to_string()), ("status", flag(on))])
            .await
    }

    async fn set_find(&self, imei: &str, on: bool) -> Result<(), ApiError> {
        // No success discriminator on this endpoint; a JSON reply is enough
        self.app_call(
            FIND,
            vec![
                ("imei", imei.to_string()),
                ("status", flag(on)),
                ("hw", "apk".to_string()),
            ],
        )
        .await
        .map(|_| ())
    }

    async fn set_update_interval(&self, imei: &str, seconds: u32) -> Result<(), ApiError> {
        let query = self.signed(Vec::new());
        let form = [("imei", imei.to_string()), ("sec", seconds.to_string())];
        let body = self
            .session
            .send(
                UPDATE_INTERVAL,
                self.session.post(UPDATE_INTERVAL).query(&query).form(&form),
            )
            .await?;

        let content = decode_text(UPDATE_INTERVAL, &body)?;
        if content.trim() == RESULT_OK {
            Ok(())
        } else {
            Err(ApiError::Operation {
                endpoint: UPDATE_INTERVAL,
                body: content,
            })
        }
    }

    async fn shutdown(&self, imei: &str) -> Result<(), ApiError> {
        self.app_command(SHUTDOWN, vec![("imei", imei.to_string())]).await
    }

    async fn reboot(&self, imei: &str) -> Result<(), ApiError> {
        self.app_command(REBOOT, vec![("imei", imei.to_string())]).await
    }

    fn app_version(&self) -> &str {
        APP_VERSION
    }
}
