//! Log-group resolution — the one step of a definition pass that
//! branches on runtime state instead of purely declaring resources.
//!
//! The group name derives from the environment identifier, which is
//! not unique across repeated passes, so an unconditional declaration
//! would collide with a prior pass's group. The existence check turns
//! the declaration idempotent: bind when the group exists, create it
//! with environment-appropriate policies when it does not.

use crate::backend::{BackendError, CloudBackend, LogGroupHandle};
use serde::Serialize;
use std::fmt;

/// How long the provider keeps log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionPolicy {
    OneWeek,
    SixMonths,
}

impl RetentionPolicy {
    pub fn for_durability(durable: bool) -> Self {
        if durable {
            Self::SixMonths
        } else {
            Self::OneWeek
        }
    }

    /// Retention window in days, as the provider API expects it.
    pub fn days(&self) -> i32 {
        match self {
            Self::OneWeek => 7,
            Self::SixMonths => 180,
        }
    }
}

impl fmt::Display for RetentionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OneWeek => write!(f, "one-week"),
            Self::SixMonths => write!(f, "six-months"),
        }
    }
}

/// What happens to the group when its environment is torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalPolicy {
    Delete,
    Retain,
}

impl RemovalPolicy {
    pub fn for_durability(durable: bool) -> Self {
        if durable {
            Self::Retain
        } else {
            Self::Delete
        }
    }
}

impl fmt::Display for RemovalPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Delete => write!(f, "delete"),
            Self::Retain => write!(f, "retain"),
        }
    }
}

/// A desired log group, constructed once at definition time.
#[derive(Debug, Clone, Serialize)]
pub struct LogGroupRequest {
    /// Provider-namespaced name, e.g. `/aws/ecs/prod`
    pub name: String,

    /// Derived from the environment's termination-protection setting
    pub durable: bool,
}

/// Outcome of a resolution.
#[derive(Debug, Clone)]
pub struct LogGroupResolution {
    pub handle: LogGroupHandle,
    /// True when this call created the group
    pub created: bool,
}

/// Resolve a log-group request against the backend.
///
/// Binds read-only when a group matching the name already exists — no
/// retention or removal configuration is applied to an existing match.
/// Creates the group otherwise, with policies selected by `durable`.
/// Any existence-check failure other than `NotFound` propagates
/// unmodified and no creation call is made.
pub async fn resolve(
    backend: &dyn CloudBackend,
    request: &LogGroupRequest,
) -> Result<LogGroupResolution, BackendError> {
    match backend.describe_log_group(&request.name).await {
        Ok(existing) => {
            tracing::info!(group = %request.name, matched = %existing.name, "log group exists, binding");
            Ok(LogGroupResolution {
                handle: backend.bind_log_group(&request.name),
                created: false,
            })
        }
        Err(err) if err.is_not_found() => {
            let retention = RetentionPolicy::for_durability(request.durable);
            let removal = RemovalPolicy::for_durability(request.durable);
            tracing::info!(
                group = %request.name,
                %retention,
                %removal,
                "log group missing, creating"
            );
            let handle = backend.create_log_group(&request.name, retention, removal).await?;
            Ok(LogGroupResolution { handle, created: true })
        }
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::fake::FakeCloud;

    fn request(name: &str, durable: bool) -> LogGroupRequest {
        LogGroupRequest {
            name: name.to_string(),
            durable,
        }
    }

    #[test]
    fn test_retention_for_durability() {
        assert_eq!(RetentionPolicy::for_durability(true), RetentionPolicy::SixMonths);
        assert_eq!(RetentionPolicy::for_durability(false), RetentionPolicy::OneWeek);
        assert_eq!(RetentionPolicy::SixMonths.days(), 180);
        assert_eq!(RetentionPolicy::OneWeek.days(), 7);
    }

    #[test]
    fn test_removal_for_durability() {
        assert_eq!(RemovalPolicy::for_durability(true), RemovalPolicy::Retain);
        assert_eq!(RemovalPolicy::for_durability(false), RemovalPolicy::Delete);
    }

    #[tokio::test]
    async fn test_resolve_creates_disposable_group() {
        let backend = FakeCloud::new();
        let resolution = resolve(&backend, &request("/aws/ecs/pr-42", false)).await.unwrap();
        assert!(resolution.created);
        assert_eq!(resolution.handle.name, "/aws/ecs/pr-42");

        let group = backend.log_group("/aws/ecs/pr-42").await.unwrap();
        assert_eq!(group.retention, RetentionPolicy::OneWeek);
        assert_eq!(group.removal, RemovalPolicy::Delete);
    }

    #[tokio::test]
    async fn test_resolve_creates_durable_group() {
        let backend = FakeCloud::new();
        let resolution = resolve(&backend, &request("/aws/ecs/prod", true)).await.unwrap();
        assert!(resolution.created);

        let group = backend.log_group("/aws/ecs/prod").await.unwrap();
        assert_eq!(group.retention, RetentionPolicy::SixMonths);
        assert_eq!(group.removal, RemovalPolicy::Retain);
    }

    #[tokio::test]
    async fn test_resolve_binds_existing_regardless_of_flag() {
        let backend = FakeCloud::new();
        backend
            .seed_log_group("/aws/ecs/prod", RetentionPolicy::OneWeek, RemovalPolicy::Delete)
            .await;

        for durable in [true, false] {
            let resolution = resolve(&backend, &request("/aws/ecs/prod", durable)).await.unwrap();
            assert!(!resolution.created);
            assert_eq!(resolution.handle.name, "/aws/ecs/prod");
        }

        // Binding is read-only: the existing group's policies are untouched
        // even though the durable request would have asked for six months.
        let group = backend.log_group("/aws/ecs/prod").await.unwrap();
        assert_eq!(group.retention, RetentionPolicy::OneWeek);
        assert_eq!(group.removal, RemovalPolicy::Delete);
        assert_eq!(backend.create_log_group_calls().await, 0);
    }

    #[tokio::test]
    async fn test_resolve_propagates_query_failure_without_creating() {
        let backend = FakeCloud::new();
        backend
            .fail_describe_log_group(BackendError::PermissionDenied(
                "logs:DescribeLogGroups".into(),
            ))
            .await;

        let err = resolve(&backend, &request("/aws/ecs/prod", true)).await.unwrap_err();
        assert!(matches!(err, BackendError::PermissionDenied(_)));
        assert_eq!(backend.create_log_group_calls().await, 0);
    }

    #[tokio::test]
    async fn test_resolve_twice_is_idempotent() {
        let backend = FakeCloud::new();
        let req = request("/aws/ecs/prod", true);

        let first = resolve(&backend, &req).await.unwrap();
        assert!(first.created);

        // The first call's creation is visible to the second's check.
        let second = resolve(&backend, &req).await.unwrap();
        assert!(!second.created);
        assert_eq!(second.handle.name, first.handle.name);
        assert_eq!(backend.create_log_group_calls().await, 1);
    }

    #[tokio::test]
    async fn test_resolve_matches_by_prefix_but_binds_requested_name() {
        let backend = FakeCloud::new();
        backend
            .seed_log_group(
                "/aws/ecs/prod-blue",
                RetentionPolicy::SixMonths,
                RemovalPolicy::Retain,
            )
            .await;

        let resolution = resolve(&backend, &request("/aws/ecs/prod", true)).await.unwrap();
        assert!(!resolution.created);
        assert_eq!(resolution.handle.name, "/aws/ecs/prod");
    }
}
