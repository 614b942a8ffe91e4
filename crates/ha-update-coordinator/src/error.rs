//! Failure classification for coordinator fetches

use std::time::Duration;
use thiserror::Error;

/// Classification of a failed fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Credentials were rejected; requires reconfiguration
    Authentication,
    /// The endpoint could not be reached
    Connectivity,
    /// The endpoint did not answer in time
    Timeout,
    /// The endpoint answered without the expected data
    DataMissing,
    /// The endpoint answered with something unparseable or unexpected
    Protocol,
}

impl FailureKind {
    /// Fatal failures must not be retried automatically
    pub fn is_fatal(&self) -> bool {
        matches!(self, FailureKind::Authentication)
    }

    /// Whether a setup that failed with this kind should be retried by the host
    pub fn is_retryable(&self) -> bool {
        !self.is_fatal()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Authentication => "authentication",
            FailureKind::Connectivity => "connectivity",
            FailureKind::Timeout => "timeout",
            FailureKind::DataMissing => "data_missing",
            FailureKind::Protocol => "protocol",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified fetch failure
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind} failure: {message}")]
pub struct UpdateFailed {
    pub kind: FailureKind,
    pub message: String,
}

impl UpdateFailed {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Authentication, message)
    }

    pub fn connectivity(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Connectivity, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Timeout, message)
    }

    pub fn data_missing(message: impl Into<String>) -> Self {
        Self::new(FailureKind::DataMissing, message)
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Protocol, message)
    }

    pub fn is_fatal(&self) -> bool {
        self.kind.is_fatal()
    }
}

/// Errors returned by coordinator operations (not by fetches)
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoordinatorError {
    #[error("update interval must be greater than zero, got {0:?}")]
    InvalidInterval(Duration),

    #[error("coordinator {0} has been stopped")]
    Stopped(String),

    #[error(transparent)]
    UpdateFailed(#[from] UpdateFailed),
}

impl CoordinatorError {
    /// The classified fetch failure, if this error came from a fetch
    pub fn update_failed(&self) -> Option<&UpdateFailed> {
        match self {
            CoordinatorError::UpdateFailed(failure) => Some(failure),
            _ => None,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.update_failed().is_some_and(UpdateFailed::is_fatal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_authentication_is_fatal() {
        assert!(FailureKind::Authentication.is_fatal());
        for kind in [
            FailureKind::Connectivity,
            FailureKind::Timeout,
            FailureKind::DataMissing,
            FailureKind::Protocol,
        ] {
            assert!(!kind.is_fatal(), "{kind} should not be fatal");
            assert!(kind.is_retryable());
        }
    }

    #[test]
    fn test_update_failed_display() {
        let err = UpdateFailed::data_missing("No XML data received for: Adam");
        assert_eq!(
            err.to_string(),
            "data_missing failure: No XML data received for: Adam"
        );
    }
}
