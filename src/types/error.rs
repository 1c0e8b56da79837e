//! Service-level error type
//!
//! Library modules have their own error enums; this one is what the HTTP
//! layer and `main` deal in. Server-side failures never leak their detail to
//! clients: the body is always the generic message.

use hyper::StatusCode;

use crate::db::StoreError;

const GENERIC_SERVER_ERROR: &str = "Internal server error";

/// Main error type for presence-map operations
#[derive(Debug, thiserror::Error)]
pub enum PresenceError {
    #[error("Claim store error: {0}")]
    Store(#[from] StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PresenceError {
    /// Convert error to HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Convert to status code and JSON body for HTTP response.
    /// Every variant is a server-side failure, so the body is always generic.
    pub fn into_status_code_and_body(self) -> (StatusCode, String) {
        let status = self.status_code();
        let body = serde_json::json!({ "error": GENERIC_SERVER_ERROR }).to_string();
        (status, body)
    }
}

impl From<std::io::Error> for PresenceError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for PresenceError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("JSON error: {}", err))
    }
}

impl From<hyper::Error> for PresenceError {
    fn from(err: hyper::Error) -> Self {
        Self::Internal(format!("HTTP error: {}", err))
    }
}

/// Result type alias for presence-map operations
pub type Result<T> = std::result::Result<T, PresenceError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::TransportError;
    use crate::retry::RetryError;

    #[test]
    fn test_store_failures_are_generic_500() {
        let err = PresenceError::from(StoreError::FetchFailed(RetryError::Exhausted {
            operation: "claim query".into(),
            attempts: 3,
            source: TransportError::Query("secret-host:27017 auth failed".into()),
        }));

        let (status, body) = err.into_status_code_and_body();
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, r#"{"error":"Internal server error"}"#);
        assert!(!body.contains("secret-host"));
    }

    #[test]
    fn test_internal_errors_hide_detail() {
        let io = std::io::Error::new(std::io::ErrorKind::AddrInUse, "0.0.0.0:3000 in use");
        let (status, body) = PresenceError::from(io).into_status_code_and_body();
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, r#"{"error":"Internal server error"}"#);
    }
}
