//! Error handling module
//!
//! - `ApiError`: failures produced by the protocol client
//! - `Error`: failures surfaced by the coordinator and its commands

use std::fmt;

use thiserror::Error;

use crate::saving_profile::ProfileFormatError;

/// Why a request never produced a usable HTTP response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportFailure {
    Timeout,
    Connect(String),
    Status(u16),
    Other(String),
}

impl fmt::Display for TransportFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportFailure::Timeout => write!(f, "timeout"),
            TransportFailure::Connect(msg) => write!(f, "connection failed: {}", msg),
            TransportFailure::Status(code) => write!(f, "HTTP status {}", code),
            TransportFailure::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl From<reqwest::Error> for TransportFailure {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportFailure::Timeout
        } else if let Some(status) = e.status() {
            TransportFailure::Status(status.as_u16())
        } else if e.is_connect() {
            TransportFailure::Connect(e.to_string())
        } else {
            TransportFailure::Other(e.to_string())
        }
    }
}

#[derive(Error, Debug, Clone)]
pub enum ApiError {
    /// Credentials were rejected. Nothing recovers this except new credentials.
    #[error("Authentication rejected: {0}")]
    Authentication(String),

    #[error("Undecodable response from {endpoint}: {reason} (payload: {payload})")]
    Decode {
        endpoint: &'static str,
        reason: String,
        payload: String,
    },

    #[error("Operation {endpoint} failed: {body}")]
    Operation { endpoint: &'static str, body: String },

    #[error("Request to {endpoint} failed: {reason}")]
    Transport {
        endpoint: &'static str,
        reason: TransportFailure,
    },
}

impl ApiError {
    pub fn is_auth(&self) -> bool {
        matches!(self, ApiError::Authentication(_))
    }

    pub(crate) fn decode(endpoint: &'static str, reason: impl fmt::Display, payload: &[u8]) -> Self {
        ApiError::Decode {
            endpoint,
            reason: reason.to_string(),
            payload: String::from_utf8_lossy(payload).into_owned(),
        }
    }

    pub(crate) fn transport(endpoint: &'static str, e: reqwest::Error) -> Self {
        ApiError::Transport {
            endpoint,
            reason: e.into(),
        }
    }
}

/// The HTTP client could not be constructed
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("Invalid base URL {url}: {source}")]
    InvalidBaseUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Format(#[from] ProfileFormatError),

    #[error("Device not found: {0}")]
    NotFound(String),

    #[error("No saving profile known for device {0}")]
    ProfileUnavailable(String),

    #[error("Update interval {0}s is outside 10..=65535")]
    InvalidInterval(u32),

    /// Initial refresh failed for a reason other than rejected credentials
    #[error("Initial refresh failed: {0}")]
    SetupFailed(#[source] ApiError),

    #[error("Account authentication failed; new credentials required")]
    AuthFailed,
}

impl Error {
    /// True when the account needs new credentials before anything else works
    pub fn requires_reauth(&self) -> bool {
        match self {
            Error::AuthFailed => true,
            Error::Api(e) => e.is_auth(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_failure_display() {
        assert_eq!(TransportFailure::Timeout.to_string(), "timeout");
        assert_eq!(TransportFailure::Status(502).to_string(), "HTTP status 502");
    }

    #[test]
    fn test_decode_error_echoes_payload() {
        let err = ApiError::decode("n365_sav.php", "expected value", b"<html>");
        match &err {
            ApiError::Decode { payload, .. } => assert_eq!(payload, "<html>"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(err.to_string().contains("<html>"));
    }

    #[test]
    fn test_requires_reauth() {
        assert!(Error::AuthFailed.requires_reauth());
        assert!(Error::Api(ApiError::Authentication("N".into())).requires_reauth());
        assert!(!Error::NotFound("1".into()).requires_reauth());
        assert!(!Error::SetupFailed(ApiError::Operation {
            endpoint: "x",
            body: "N".into()
        })
        .requires_reauth());
    }
}
