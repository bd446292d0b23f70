//! Backend error taxonomy.
//!
//! `NotFound` is the only expected failure: it drives the
//! existence-check-then-create branch of log-group resolution. Every
//! other variant is fatal to the definition pass and carries the
//! provider's original diagnostic unmodified.

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum BackendError {
    /// The queried resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The caller's credentials may not perform the operation.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The provider is rate-limiting the caller.
    #[error("throttled: {0}")]
    Throttled(String),

    /// The declaration was rejected before any call was issued.
    #[error("invalid declaration: {0}")]
    InvalidSpec(String),

    /// Any other backend failure.
    #[error("backend query failed: {0}")]
    Api(String),
}

impl BackendError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_not_found() {
        assert!(BackendError::NotFound("/aws/ecs/prod".into()).is_not_found());
        assert!(!BackendError::Api("timeout".into()).is_not_found());
        assert!(!BackendError::PermissionDenied("logs:DescribeLogGroups".into()).is_not_found());
    }

    #[test]
    fn test_display_carries_diagnostic() {
        let err = BackendError::Api("upstream said: InternalFailure".into());
        assert!(err.to_string().contains("InternalFailure"));
        let err = BackendError::Throttled("Rate exceeded".into());
        assert!(err.to_string().contains("Rate exceeded"));
    }
}
