//! Error types for caseguard
//!
//! Authorization and audit failures are synchronous and abort the request.
//! Notification delivery problems never surface here; they are logged and
//! covered by the pull path.

use hyper::StatusCode;

/// Uniform text for every policy denial. The rule that fired is never exposed.
pub const NOT_AUTHORIZED: &str = "not authorized";

/// Main error type for caseguard operations
#[derive(Debug, thiserror::Error)]
pub enum CaseguardError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("{}", NOT_AUTHORIZED)]
    Forbidden,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Write conflict: {0}")]
    Conflict(String),

    #[error("Audit write failed: {0}")]
    AuditWriteFailure(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CaseguardError {
    /// Convert error to HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::AuditWriteFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Database(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Auth(_) => StatusCode::UNAUTHORIZED,
            Self::WebSocket(_) => StatusCode::BAD_GATEWAY,
            Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the whole mutation may be retried from the start
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Convert to status code and body tuple for HTTP response
    pub fn into_status_code_and_body(self) -> (StatusCode, String) {
        let status = self.status_code();
        let body = self.to_string();
        (status, body)
    }
}

impl From<std::io::Error> for CaseguardError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for CaseguardError {
    fn from(err: serde_json::Error) -> Self {
        Self::BadRequest(format!("JSON error: {}", err))
    }
}

impl From<hyper::Error> for CaseguardError {
    fn from(err: hyper::Error) -> Self {
        Self::Internal(format!("HTTP error: {}", err))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for CaseguardError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(err.to_string())
    }
}

impl From<mongodb::error::Error> for CaseguardError {
    fn from(err: mongodb::error::Error) -> Self {
        if err.contains_label(mongodb::error::TRANSIENT_TRANSACTION_ERROR) {
            Self::Conflict(err.to_string())
        } else {
            Self::Database(err.to_string())
        }
    }
}

impl From<bson::ser::Error> for CaseguardError {
    fn from(err: bson::ser::Error) -> Self {
        Self::Database(format!("BSON encode failed: {}", err))
    }
}

impl From<bson::de::Error> for CaseguardError {
    fn from(err: bson::de::Error) -> Self {
        Self::Database(format!("BSON decode failed: {}", err))
    }
}

impl From<jsonwebtoken::errors::Error> for CaseguardError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        Self::Auth(format!("JWT error: {}", err))
    }
}

/// Result type alias for caseguard operations
pub type Result<T> = std::result::Result<T, CaseguardError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forbidden_is_uniform() {
        let err = CaseguardError::Forbidden;
        assert_eq!(err.to_string(), "not authorized");
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_only_conflicts_retry() {
        assert!(CaseguardError::Conflict("write conflict".into()).is_retryable());
        assert!(!CaseguardError::AuditWriteFailure("disk".into()).is_retryable());
        assert!(!CaseguardError::Forbidden.is_retryable());
    }
}
