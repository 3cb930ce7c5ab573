//! Authentication strategies
//!
//! The backend speaks two dialects. The app protocol signs every request with
//! a time-derived token (`ak`); the web protocol logs in once and rides a
//! cookie session. Both are hidden behind `AuthStrategy`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use super::client::{decode_content, decode_text, HttpSession};
use crate::error::ApiError;

/// Version string the app protocol expects in `ver`
pub const APP_VERSION: &str = "2.6.1";
/// App identifier sent as `aid`
pub const APP_ID: &str = "365gps_android";

/// Opaque protocol parameter: tokens count seconds from this instant
const TOKEN_EPOCH: i64 = 1_262_304_000;
const TOKEN_SUFFIX: &str = "5a";

const LOGIN_PAGE: &str = "login.php";
const SESSION_LOGIN: &str = "npost_login.php";
const SESSION_DEVICE_TABLE: &str = "post_device_table_list.php";
const APP_DEVICE_LIST: &str = "n365_ilist.php";

/// Leading body character of an accepted session login
const LOGIN_OK: char = 'Y';

/// Token for the `ak` query parameter. Time-sensitive, never cache it.
pub fn derive_token(now: DateTime<Utc>) -> String {
    let elapsed = (now.timestamp() - TOKEN_EPOCH).max(0);
    format!("{:x}{}", elapsed, TOKEN_SUFFIX)
}

#[derive(Clone)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Account label safe for logs: first five characters, rest starred
    pub fn masked_username(&self) -> String {
        let head: String = self.username.chars().take(5).collect();
        format!("{}**********", head)
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.masked_username())
            .finish_non_exhaustive()
    }
}

/// Authentication strategy trait
#[async_trait]
pub trait AuthStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether `login` has to run before the first data call
    fn requires_login(&self) -> bool;

    async fn login(&self, session: &HttpSession) -> Result<(), ApiError>;

    /// Append whatever this strategy needs to an outgoing query string
    fn sign(&self, query: &mut Vec<(&'static str, String)>);

    async fn fetch_device_list(&self, session: &HttpSession) -> Result<Vec<Value>, ApiError>;

    fn credentials(&self) -> &Credentials;
}

// ============================================================================
// Token (app protocol)
// ============================================================================

pub struct TokenAuth {
    credentials: Credentials,
}

impl TokenAuth {
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }
}

#[async_trait]
impl AuthStrategy for TokenAuth {
    fn name(&self) -> &'static str {
        "token"
    }

    fn requires_login(&self) -> bool {
        false
    }

    async fn login(&self, _session: &HttpSession) -> Result<(), ApiError> {
        Ok(())
    }

    fn sign(&self, query: &mut Vec<(&'static str, String)>) {
        query.push(("ver", APP_VERSION.to_string()));
        query.push(("aid", APP_ID.to_string()));
        query.push(("ak", derive_token(Utc::now())));
    }

    async fn fetch_device_list(&self, session: &HttpSession) -> Result<Vec<Value>, ApiError> {
        let mut query = vec![
            ("username", self.credentials.username.clone()),
            ("password", self.credentials.password.clone()),
        ];
        self.sign(&mut query);

        let body = session
            .send(APP_DEVICE_LIST, session.app_post(APP_DEVICE_LIST).query(&query))
            .await?;

        match decode_content(APP_DEVICE_LIST, &body)? {
            Value::Array(records) => Ok(records),
            // Rejections come back as {"result": "<code>"} instead of a list
            Value::Object(map) => match map.get("result").and_then(Value::as_str) {
                Some(code) if code != "Y" => Err(ApiError::Authentication(format!(
                    "device list refused with result {:?}",
                    code
                ))),
                _ => Err(ApiError::decode(APP_DEVICE_LIST, "expected a device array", &body)),
            },
            _ => Err(ApiError::decode(APP_DEVICE_LIST, "expected a device array", &body)),
        }
    }

    fn credentials(&self) -> &Credentials {
        &self.credentials
    }
}

// ============================================================================
// Cookie session (web protocol)
// ============================================================================

pub struct SessionAuth {
    credentials: Credentials,
    demo: bool,
}

impl SessionAuth {
    pub fn new(credentials: Credentials, demo: bool) -> Self {
        Self { credentials, demo }
    }
}

#[async_trait]
impl AuthStrategy for SessionAuth {
    fn name(&self) -> &'static str {
        "session"
    }

    fn requires_login(&self) -> bool {
        true
    }

    async fn login(&self, session: &HttpSession) -> Result<(), ApiError> {
        // Landing page hands out the session cookie the login binds to
        session
            .send(LOGIN_PAGE, session.get(LOGIN_PAGE).query(&[("lang", "en")]))
            .await?;

        let form = [
            ("demo", if self.demo { "T" } else { "F" }),
            ("username", self.credentials.username.as_str()),
            ("password", self.credentials.password.as_str()),
            ("form_type", "0"),
        ];
        let body = session
            .send(SESSION_LOGIN, session.post(SESSION_LOGIN).form(&form))
            .await?;
        let content = decode_text(SESSION_LOGIN, &body)?;

        if content.starts_with(LOGIN_OK) {
            tracing::info!(
                "[Gps365] Session established for {}",
                self.credentials.masked_username()
            );
            Ok(())
        } else {
            Err(ApiError::Authentication(content))
        }
    }

    fn sign(&self, _query: &mut Vec<(&'static str, String)>) {}

    async fn fetch_device_list(&self, session: &HttpSession) -> Result<Vec<Value>, ApiError> {
        let body = session
            .send(SESSION_DEVICE_TABLE, session.post(SESSION_DEVICE_TABLE))
            .await?;

        match decode_content(SESSION_DEVICE_TABLE, &body)? {
            Value::Object(mut map) => match map.remove("customer_info_list") {
                Some(Value::Array(records)) => Ok(records),
                _ => Err(ApiError::decode(
                    SESSION_DEVICE_TABLE,
                    "missing customer_info_list",
                    &body,
                )),
            },
            _ => Err(ApiError::decode(SESSION_DEVICE_TABLE, "expected an object", &body)),
        }
    }

    fn credentials(&self) -> &Credentials {
        &self.credentials
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[test]
    fn test_token_is_hex_elapsed_plus_suffix() {
        assert_eq!(derive_token(at(TOKEN_EPOCH)), "05a");
        assert_eq!(derive_token(at(TOKEN_EPOCH + 255)), "ff5a");
        assert_eq!(derive_token(at(TOKEN_EPOCH + 4096)), "10005a");
    }

    #[test]
    fn test_token_changes_with_time() {
        let now = Utc::now();
        assert_ne!(derive_token(now), derive_token(now + chrono::Duration::seconds(1)));
    }

    #[test]
    fn test_token_before_epoch_clamps() {
        assert_eq!(derive_token(at(0)), "05a");
    }

    #[test]
    fn test_token_sign_appends_protocol_params() {
        let auth = TokenAuth::new(Credentials::new("u", "p"));
        let mut query = vec![("imei", "1".to_string())];
        auth.sign(&mut query);

        let keys: Vec<_> = query.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, vec!["imei", "ver", "aid", "ak"]);
        assert!(query[3].1.ends_with(TOKEN_SUFFIX));
    }

    #[test]
    fn test_session_sign_is_noop() {
        let auth = SessionAuth::new(Credentials::new("u", "p"), false);
        let mut query = vec![("imei", "1".to_string())];
        auth.sign(&mut query);
        assert_eq!(query.len(), 1);
        assert!(auth.requires_login());
    }

    #[test]
    fn test_masked_username() {
        let creds = Credentials::new("3520940123", "secret");
        assert_eq!(creds.masked_username(), "35209**********");
        assert_eq!(Credentials::new("ab", "x").masked_username(), "ab**********");
        assert!(!format!("{:?}", creds).contains("secret"));
    }
}
