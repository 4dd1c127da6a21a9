//! Call outcome and failure taxonomy

use bytes::Bytes;
use serde::de::DeserializeOwned;

use crate::error::{Error, Result};

/// Why a dispatched call failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ErrorKind {
    /// The request never produced a response (connect, timeout, body read).
    #[error("network error: {0}")]
    Network(String),

    #[error("invalid request")]
    InvalidRequest,

    #[error("server error")]
    ServerError,

    /// Rejected credential that could not be replaced for this call.
    #[error("unauthorized")]
    Unauthorized,

    /// Refresh attempts are exhausted and the session was cleared.
    #[error("refresh token failed")]
    RefreshTokenFailed,

    #[error("{0}")]
    Generic(String),
}

impl ErrorKind {
    /// Stable label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorKind::Network(_) => "network",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::ServerError => "server_error",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::RefreshTokenFailed => "refresh_token_failed",
            ErrorKind::Generic(_) => "generic",
        }
    }
}

/// Result of one dispatched call, after any refresh-and-retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success {
        status: u16,
        body: Bytes,
    },
    Failure {
        kind: ErrorKind,
        status: Option<u16>,
        body: Option<Bytes>,
    },
}

impl Outcome {
    /// Classify a received response. 401 is handled by the dispatcher before
    /// this point and lands in `Generic` here.
    pub(crate) fn from_response(status: u16, body: Bytes) -> Self {
        let kind = match status {
            200..=299 => return Outcome::Success { status, body },
            400 => ErrorKind::InvalidRequest,
            500 => ErrorKind::ServerError,
            _ => ErrorKind::Generic(String::from_utf8_lossy(&body).into_owned()),
        };
        Outcome::Failure {
            kind,
            status: Some(status),
            body: Some(body),
        }
    }

    pub(crate) fn failure(kind: ErrorKind, status: Option<u16>, body: Option<Bytes>) -> Self {
        Outcome::Failure { kind, status, body }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }

    /// HTTP status of the final response, if one was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            Outcome::Success { status, .. } => Some(*status),
            Outcome::Failure { status, .. } => *status,
        }
    }

    pub fn body(&self) -> Option<&Bytes> {
        match self {
            Outcome::Success { body, .. } => Some(body),
            Outcome::Failure { body, .. } => body.as_ref(),
        }
    }

    pub fn error_kind(&self) -> Option<&ErrorKind> {
        match self {
            Outcome::Success { .. } => None,
            Outcome::Failure { kind, .. } => Some(kind),
        }
    }

    /// Body of a successful call, or the failure as an error.
    pub fn into_result(self) -> Result<Bytes> {
        match self {
            Outcome::Success { body, .. } => Ok(body),
            Outcome::Failure { kind, status, .. } => Err(Error::Request { kind, status }),
        }
    }

    /// Decode a successful body as JSON.
    pub fn json<T: DeserializeOwned>(self) -> Result<T> {
        let body = self.into_result()?;
        Ok(serde_json::from_slice(&body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert!(Outcome::from_response(200, Bytes::new()).is_success());
        assert!(Outcome::from_response(204, Bytes::new()).is_success());

        let bad = Outcome::from_response(400, Bytes::from_static(b"bad field"));
        assert_eq!(bad.error_kind(), Some(&ErrorKind::InvalidRequest));
        assert_eq!(bad.status(), Some(400));
        assert_eq!(bad.body().unwrap().as_ref(), b"bad field");

        let server = Outcome::from_response(500, Bytes::new());
        assert_eq!(server.error_kind(), Some(&ErrorKind::ServerError));
    }

    #[test]
    fn unmapped_status_carries_body_text() {
        let outcome = Outcome::from_response(503, Bytes::from_static(b"maintenance"));
        assert_eq!(
            outcome.error_kind(),
            Some(&ErrorKind::Generic("maintenance".into()))
        );

        let outcome = Outcome::from_response(302, Bytes::new());
        assert_eq!(outcome.error_kind(), Some(&ErrorKind::Generic(String::new())));
    }

    #[test]
    fn json_decodes_success_body() {
        #[derive(serde::Deserialize)]
        struct Vehicle {
            vin: String,
        }

        let outcome = Outcome::from_response(200, Bytes::from_static(br#"{"vin":"WVW123"}"#));
        let vehicle: Vehicle = outcome.json().unwrap();
        assert_eq!(vehicle.vin, "WVW123");
    }

    #[test]
    fn json_on_failure_returns_request_error() {
        let outcome = Outcome::failure(ErrorKind::RefreshTokenFailed, Some(401), None);
        let err = outcome.json::<serde_json::Value>().unwrap_err();
        assert!(matches!(
            err,
            Error::Request {
                kind: ErrorKind::RefreshTokenFailed,
                status: Some(401)
            }
        ));
    }

    #[test]
    fn json_on_garbage_returns_decode_error() {
        let outcome = Outcome::from_response(200, Bytes::from_static(b"<html>"));
        assert!(matches!(
            outcome.json::<serde_json::Value>(),
            Err(Error::Decode(_))
        ));
    }

    #[test]
    fn error_display() {
        assert_eq!(
            ErrorKind::Network("connection refused".into()).to_string(),
            "network error: connection refused"
        );
        assert_eq!(ErrorKind::RefreshTokenFailed.to_string(), "refresh token failed");
        assert_eq!(ErrorKind::RefreshTokenFailed.label(), "refresh_token_failed");
    }
}
