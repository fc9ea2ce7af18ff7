//! Session error types.

use thiserror::Error;

/// Errors surfaced by the session core.
///
/// `Clone` because a single in-flight refresh result is handed to every
/// caller waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// No bearer token is held; nothing was sent.
    #[error("No active session")]
    NoSession,

    /// The backend answered HTTP 401.
    #[error("Unauthorized")]
    Unauthorized,

    /// The request never produced a response.
    #[error("Transport error: {0}")]
    Transport(String),

    /// HTTP 200 with `{"success": false}`.
    #[error("Request rejected: {0}")]
    Rejected(String),

    /// The body could not be decoded.
    #[error("Malformed response: {0}")]
    Malformed(String),

    /// Any other non-success status.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Token store I/O failure.
    #[error("Storage error: {0}")]
    Storage(String),
}

impl SessionError {
    /// True for the errors that mean the token itself is no good.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, SessionError::Unauthorized | SessionError::NoSession)
    }

    /// True for failures that say nothing about the token.
    pub fn is_transient(&self) -> bool {
        matches!(self, SessionError::Transport(_))
    }
}

impl From<reqwest::Error> for SessionError {
    fn from(e: reqwest::Error) -> Self {
        SessionError::Transport(e.to_string())
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(e: serde_json::Error) -> Self {
        SessionError::Malformed(e.to_string())
    }
}

impl From<std::io::Error> for SessionError {
    fn from(e: std::io::Error) -> Self {
        SessionError::Storage(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SessionError::Rejected("profile incomplete".to_string());
        assert_eq!(err.to_string(), "Request rejected: profile incomplete");

        let err = SessionError::Http {
            status: 503,
            body: "down".to_string(),
        };
        assert_eq!(err.to_string(), "HTTP 503: down");
    }

    #[test]
    fn test_error_classification() {
        assert!(SessionError::Unauthorized.is_unauthorized());
        assert!(SessionError::NoSession.is_unauthorized());
        assert!(!SessionError::Transport("reset".into()).is_unauthorized());
        assert!(SessionError::Transport("reset".into()).is_transient());
        assert!(!SessionError::Rejected("no".into()).is_transient());
    }

    #[test]
    fn test_error_from_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("{oops").unwrap_err();
        let err: SessionError = json_err.into();
        assert!(matches!(err, SessionError::Malformed(_)));
    }
}
