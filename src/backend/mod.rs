//! Cloud backend — abstract interface for every provider call.
//!
//! The executor and the log-group resolver access the provider only
//! through this trait. `aws.rs` provides the real SDK-backed
//! implementation; `fake.rs` provides a deterministic test double.

pub mod aws;
pub mod error;
pub mod fake;

pub use error::BackendError;

use crate::core::logs::{RemovalPolicy, RetentionPolicy};
use crate::core::types::{DatabaseSpec, RoleSpec, ServiceConfig, TaskConfig};
use async_trait::async_trait;

// ── Handles ─────────────────────────────────────────────────────

/// A VPC found by lookup, with the subnets tasks are placed into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VpcHandle {
    pub vpc_id: String,
    pub subnet_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityGroupHandle {
    pub group_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleHandle {
    pub name: String,
    pub arn: String,
}

/// Opaque log-group reference. Callers use it only to attach the group
/// to a container's logging sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogGroupHandle {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterHandle {
    pub name: String,
    pub arn: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDefinitionHandle {
    pub family: String,
    pub arn: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseHandle {
    pub identifier: String,
    pub endpoint_address: String,
    pub endpoint_port: u16,
    /// Security group guarding the instance; ingress is granted on it.
    pub security_group_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceHandle {
    pub name: String,
    pub arn: String,
}

// ── Composite declaration inputs ────────────────────────────────

/// Everything a task definition references.
pub struct TaskDefinitionSpec<'a> {
    pub family: &'a str,
    pub task: &'a TaskConfig,
    pub container_port: u16,
    pub execution_role: &'a RoleHandle,
    pub task_role: &'a RoleHandle,
    pub log_group: &'a LogGroupHandle,
    /// Fully merged container environment, order preserved.
    pub env: &'a [(String, String)],
}

/// Everything a service launch references.
pub struct ServiceLaunchSpec<'a> {
    pub name: &'a str,
    pub service: &'a ServiceConfig,
    pub container_name: &'a str,
    pub target_group_arn: &'a str,
    pub cluster: &'a ClusterHandle,
    pub task_definition: &'a TaskDefinitionHandle,
    pub vpc: &'a VpcHandle,
    pub security_group: &'a SecurityGroupHandle,
}

// ── The trait ───────────────────────────────────────────────────

/// Unified async interface over the cloud provider.
///
/// One suspension point per call; no call retries internally, and
/// timeouts are whatever the underlying client defaults to.
/// Implementations must be `Send + Sync` so a single instance can be
/// shared across an entire definition pass.
#[async_trait]
pub trait CloudBackend: Send + Sync {
    // ── Network ─────────────────────────────────────────────────

    async fn lookup_vpc(&self, vpc_id: &str) -> Result<VpcHandle, BackendError>;

    async fn create_security_group(
        &self,
        vpc: &VpcHandle,
        name: &str,
        description: &str,
    ) -> Result<SecurityGroupHandle, BackendError>;

    async fn authorize_ingress_from_group(
        &self,
        group: &SecurityGroupHandle,
        source_group_id: &str,
        port: u16,
        description: &str,
    ) -> Result<(), BackendError>;

    // ── IAM ─────────────────────────────────────────────────────

    async fn create_role(&self, spec: &RoleSpec) -> Result<RoleHandle, BackendError>;

    // ── Log groups ──────────────────────────────────────────────

    /// Query for a log group whose name matches `name_prefix`.
    /// `NotFound` when nothing matches.
    async fn describe_log_group(&self, name_prefix: &str)
        -> Result<LogGroupHandle, BackendError>;

    /// Bind an existing log group by name. Read-only: no call is
    /// issued and no configuration is applied to the group.
    fn bind_log_group(&self, name: &str) -> LogGroupHandle;

    async fn create_log_group(
        &self,
        name: &str,
        retention: RetentionPolicy,
        removal: RemovalPolicy,
    ) -> Result<LogGroupHandle, BackendError>;

    // ── Cluster / tasks / service ───────────────────────────────

    async fn create_cluster(&self, name: &str) -> Result<ClusterHandle, BackendError>;

    async fn register_task_definition(
        &self,
        spec: &TaskDefinitionSpec<'_>,
    ) -> Result<TaskDefinitionHandle, BackendError>;

    async fn create_service(
        &self,
        spec: &ServiceLaunchSpec<'_>,
    ) -> Result<ServiceHandle, BackendError>;

    // ── Database ────────────────────────────────────────────────

    async fn create_database(
        &self,
        spec: &DatabaseSpec,
        vpc: &VpcHandle,
    ) -> Result<DatabaseHandle, BackendError>;

    /// Open the database's port to traffic from `from_group`.
    async fn allow_database_access(
        &self,
        database: &DatabaseHandle,
        from_group: &SecurityGroupHandle,
    ) -> Result<(), BackendError>;
}
