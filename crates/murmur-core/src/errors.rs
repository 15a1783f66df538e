//! Transport errors
//!
//! [`ApiError`] is what a room client reports when a request fails: an
//! HTTP-like status code (absent for network-level failures) plus the server
//! message. It is `Clone` so one failure can be fanned out to every caller
//! awaiting a deduplicated request.

use serde::{Deserialize, Serialize};
use std::fmt;

/// High-level classification of an [`ApiError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ApiErrorKind {
    /// Request never reached the server or no response arrived
    Network,
    /// Malformed request (400, 422)
    InvalidRequest,
    /// Missing or invalid credentials (401)
    Unauthorized,
    /// Authenticated but not allowed (403)
    Forbidden,
    /// Target resource does not exist (404)
    NotFound,
    /// Conflicting concurrent modification (409)
    Conflict,
    /// Too many requests (429)
    RateLimited,
    /// Server-side failure (5xx)
    Server,
    /// Anything else
    Other,
}

impl ApiErrorKind {
    /// Classify a status code.
    pub fn from_status(status: Option<u16>) -> Self {
        match status {
            None => Self::Network,
            Some(400 | 422) => Self::InvalidRequest,
            Some(401) => Self::Unauthorized,
            Some(403) => Self::Forbidden,
            Some(404) => Self::NotFound,
            Some(409) => Self::Conflict,
            Some(429) => Self::RateLimited,
            Some(500..=599) => Self::Server,
            Some(_) => Self::Other,
        }
    }

    /// Human-readable description of this kind of failure.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Network => "Could not reach the server",
            Self::InvalidRequest => "The request was rejected as invalid",
            Self::Unauthorized => "You are not signed in",
            Self::Forbidden => "You do not have permission to do this",
            Self::NotFound => "The requested resource no longer exists",
            Self::Conflict => "The resource was modified concurrently",
            Self::RateLimited => "Too many requests, slow down",
            Self::Server => "The server encountered an error",
            Self::Other => "The request failed",
        }
    }
}

/// A failed request to the comments backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    /// HTTP-like status code, `None` for network-level failures
    pub status: Option<u16>,
    /// Server or transport message
    pub message: String,
}

impl ApiError {
    /// Error with a status code.
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
        }
    }

    /// Network-level error without a status code.
    pub fn network(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }

    /// Classification of this error.
    pub fn kind(&self) -> ApiErrorKind {
        ApiErrorKind::from_status(self.status)
    }

    /// 403 responses.
    pub fn is_forbidden(&self) -> bool {
        self.kind() == ApiErrorKind::Forbidden
    }

    /// 404 responses.
    pub fn is_not_found(&self) -> bool {
        self.kind() == ApiErrorKind::NotFound
    }

    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind(),
            ApiErrorKind::Network | ApiErrorKind::RateLimited | ApiErrorKind::Server
        ) || self.status == Some(408)
    }

    /// Message suitable for showing to a user.
    pub fn human_message(&self) -> String {
        if self.message.is_empty() {
            self.kind().description().to_string()
        } else {
            format!("{}: {}", self.kind().description(), self.message)
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} ({status})", self.human_message()),
            None => f.write_str(&self.human_message()),
        }
    }
}

impl std::error::Error for ApiError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_status_codes() {
        assert!(ApiError::new(403, "nope").is_forbidden());
        assert!(ApiError::new(404, "").is_not_found());
        assert!(ApiError::network("offline").is_transient());
        assert!(ApiError::new(503, "busy").is_transient());
        assert!(ApiError::new(408, "slow").is_transient());
        assert!(!ApiError::new(400, "bad").is_transient());
    }

    #[test]
    fn display_includes_description_and_status() {
        let err = ApiError::new(404, "thread th_1");
        assert_eq!(
            err.to_string(),
            "The requested resource no longer exists: thread th_1 (404)"
        );
        assert_eq!(
            ApiError::network("").to_string(),
            "Could not reach the server"
        );
    }
}
