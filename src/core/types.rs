//! Schema types for the deployment file, the stage graph, plans, and
//! the per-environment deployment record. All serde types roundtrip
//! through YAML.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// ============================================================================
// Top-level botadura.yaml
// ============================================================================

/// Root configuration — the desired state of one deployment environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentConfig {
    /// Schema version (must be "1.0")
    pub version: String,

    /// Deployment name
    pub name: String,

    /// Environment identifier (prod, staging, pr-123, ...)
    pub environment: String,

    /// Protects long-lived environments: selects retained, long-retention
    /// log groups instead of disposable ones
    #[serde(default)]
    pub termination_protection: bool,

    /// Global parameters (templatable)
    #[serde(default)]
    pub params: HashMap<String, serde_yaml_ng::Value>,

    /// Pre-existing network the deployment lands in
    pub network: NetworkConfig,

    /// Container cluster
    #[serde(default)]
    pub cluster: ClusterConfig,

    /// Load-balanced service
    pub service: ServiceConfig,

    /// Task definition / container
    pub task: TaskConfig,

    /// Log group attached to the container's logging sink
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Optional managed relational database
    #[serde(default)]
    pub database: Option<DatabaseConfig>,

    /// IAM role policies
    #[serde(default)]
    pub iam: IamConfig,
}

/// Pre-existing network resources, consumed by lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// VPC to deploy into
    pub vpc_id: String,

    /// Security group of the load balancer fronting the service
    pub alb_security_group_id: String,

    /// Target group the service registers with
    pub target_group_arn: String,

    /// Port the load balancer reaches the service on
    #[serde(default = "default_ingress_port")]
    pub ingress_port: u16,
}

fn default_ingress_port() -> u16 {
    443
}

/// Container cluster settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Cluster name (defaults to the environment identifier)
    #[serde(default)]
    pub name: Option<String>,
}

/// Load-balanced service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Port the container listens on
    pub container_port: u16,

    /// Number of task replicas
    #[serde(default = "default_desired_count")]
    pub desired_count: i32,

    /// Assign a public IP to each task
    #[serde(default = "default_true")]
    pub assign_public_ip: bool,

    /// Roll back automatically when a deployment fails
    #[serde(default = "default_true")]
    pub circuit_breaker_rollback: bool,
}

fn default_desired_count() -> i32 {
    1
}

fn default_true() -> bool {
    true
}

/// Task definition settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Container image reference (templatable)
    pub image: String,

    /// CPU units
    #[serde(default = "default_cpu")]
    pub cpu: i32,

    /// Memory limit in MiB
    #[serde(default = "default_memory")]
    pub memory_mib: i32,

    /// Container name inside the task
    #[serde(default = "default_container_name")]
    pub container_name: String,

    /// Log stream prefix
    #[serde(default = "default_stream_prefix")]
    pub stream_prefix: String,

    /// Extra container environment (templatable values)
    #[serde(default)]
    pub env: IndexMap<String, String>,
}

fn default_cpu() -> i32 {
    1024
}

fn default_memory() -> i32 {
    2048
}

fn default_container_name() -> String {
    "app".to_string()
}

fn default_stream_prefix() -> String {
    "app-logs".to_string()
}

/// Logging sink settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log group name (templatable, defaults to /aws/ecs/{{environment}})
    #[serde(default)]
    pub group: Option<String>,
}

/// Managed relational database settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Instance identifier (defaults to {name}-{environment}-db)
    #[serde(default)]
    pub identifier: Option<String>,

    /// Database engine
    #[serde(default = "default_engine")]
    pub engine: String,

    /// Engine version
    #[serde(default = "default_engine_version")]
    pub engine_version: String,

    /// Instance class
    pub instance_class: String,

    /// Initial storage in GiB
    #[serde(default = "default_allocated_storage")]
    pub allocated_storage_gib: i32,

    /// Storage autoscaling ceiling in GiB
    #[serde(default = "default_max_allocated_storage")]
    pub max_allocated_storage_gib: i32,

    /// Initial database name
    pub name: String,

    /// Master username (password is provider-managed)
    pub username: String,

    /// Reachable from outside the VPC
    #[serde(default)]
    pub publicly_accessible: bool,
}

fn default_engine() -> String {
    "mysql".to_string()
}

fn default_engine_version() -> String {
    "8.0".to_string()
}

fn default_allocated_storage() -> i32 {
    20
}

fn default_max_allocated_storage() -> i32 {
    100
}

/// Managed policies attached to the two task roles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IamConfig {
    /// Policies for the execution role (image pulls, log writes)
    #[serde(default = "default_execution_policies")]
    pub execution_managed_policies: Vec<String>,

    /// Policies for the task role (what the application itself may do)
    #[serde(default = "default_task_policies")]
    pub task_managed_policies: Vec<String>,
}

impl Default for IamConfig {
    fn default() -> Self {
        Self {
            execution_managed_policies: default_execution_policies(),
            task_managed_policies: default_task_policies(),
        }
    }
}

fn default_execution_policies() -> Vec<String> {
    vec!["service-role/AmazonECSTaskExecutionRolePolicy".to_string()]
}

fn default_task_policies() -> Vec<String> {
    vec!["SecretsManagerReadWrite".to_string()]
}

// ============================================================================
// Resolved specs (derived by build, hashed by the planner)
// ============================================================================

/// An IAM role to declare.
#[derive(Debug, Clone, Serialize)]
pub struct RoleSpec {
    pub name: String,
    pub description: String,
    pub managed_policies: Vec<String>,
}

/// A database instance to declare, with its identifier resolved.
#[derive(Debug, Clone, Serialize)]
pub struct DatabaseSpec {
    pub identifier: String,
    pub engine: String,
    pub engine_version: String,
    pub instance_class: String,
    pub allocated_storage_gib: i32,
    pub max_allocated_storage_gib: i32,
    pub name: String,
    pub username: String,
    pub publicly_accessible: bool,
}

// ============================================================================
// Stage graph
// ============================================================================

/// One step of the materialization pipeline. Stages declare their
/// prerequisites; the resolver turns the edges into an execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageId {
    Network,
    ExecutionRole,
    TaskRole,
    LogGroup,
    Cluster,
    Database,
    TaskDefinition,
    Service,
    DatabaseAccess,
}

impl StageId {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::ExecutionRole => "execution-role",
            Self::TaskRole => "task-role",
            Self::LogGroup => "log-group",
            Self::Cluster => "cluster",
            Self::Database => "database",
            Self::TaskDefinition => "task-definition",
            Self::Service => "service",
            Self::DatabaseAccess => "database-access",
        }
    }

    /// The stages a deployment consists of. The database stages exist
    /// only when a database section is declared.
    pub fn all(with_database: bool) -> Vec<StageId> {
        let mut stages = vec![
            Self::Network,
            Self::ExecutionRole,
            Self::TaskRole,
            Self::LogGroup,
            Self::Cluster,
            Self::TaskDefinition,
            Self::Service,
        ];
        if with_database {
            stages.push(Self::Database);
            stages.push(Self::DatabaseAccess);
        }
        stages
    }

    /// Prerequisite stages.
    pub fn needs(&self, with_database: bool) -> Vec<StageId> {
        match self {
            Self::Network | Self::ExecutionRole | Self::TaskRole | Self::LogGroup => vec![],
            Self::Cluster | Self::Database => vec![Self::Network],
            Self::TaskDefinition => {
                let mut needs = vec![Self::ExecutionRole, Self::TaskRole, Self::LogGroup];
                if with_database {
                    needs.push(Self::Database);
                }
                needs
            }
            Self::Service => vec![Self::Network, Self::Cluster, Self::TaskDefinition],
            Self::DatabaseAccess => vec![Self::Database, Self::Service],
        }
    }

    pub fn from_str_id(s: &str) -> Option<StageId> {
        StageId::all(true).into_iter().find(|stage| stage.as_str() == s)
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Plan
// ============================================================================

/// Action the materializer will take on a stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanAction {
    Create,
    Update,
    /// Decided at materialize time: bind the existing resource or create it.
    Resolve,
    NoOp,
}

impl fmt::Display for PlanAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "CREATE"),
            Self::Update => write!(f, "UPDATE"),
            Self::Resolve => write!(f, "RESOLVE"),
            Self::NoOp => write!(f, "NO-OP"),
        }
    }
}

/// A single planned change.
#[derive(Debug, Clone)]
pub struct PlannedChange {
    pub stage: StageId,
    pub action: PlanAction,
    pub description: String,
}

/// Full deployment plan.
#[derive(Debug, Clone)]
pub struct DeploymentPlan {
    pub name: String,
    pub environment: String,
    pub changes: Vec<PlannedChange>,
    pub to_create: u32,
    pub to_update: u32,
    pub to_resolve: u32,
    pub unchanged: u32,
}

// ============================================================================
// Deployment record
// ============================================================================

/// Per-environment record of the last materialized pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentRecord {
    /// Schema version
    pub schema: String,

    /// Deployment name
    pub name: String,

    /// Environment identifier
    pub environment: String,

    /// When the record was generated
    pub generated_at: String,

    /// Generator version
    pub generator: String,

    /// Per-stage state
    pub stages: IndexMap<String, StageRecord>,

    /// Identifiers exported for external automation
    #[serde(default)]
    pub exports: Option<DeploymentExports>,
}

/// Per-stage record entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRecord {
    /// Materialization status
    pub status: StageStatus,

    /// When the stage was last materialized
    #[serde(default)]
    pub applied_at: Option<String>,

    /// Duration of the last materialization in seconds
    #[serde(default)]
    pub duration_seconds: Option<f64>,

    /// BLAKE3 hash of the resolved stage spec
    pub hash: String,

    /// Handles and identifiers produced by the stage
    #[serde(default)]
    pub details: HashMap<String, String>,
}

/// Stage materialization status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Materialized,
    Failed,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Materialized => write!(f, "MATERIALIZED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

/// Identifiers a deployment pipeline reads after a pass (the original
/// automation uses them to trigger a service redeployment).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentExports {
    pub cluster_name: String,
    pub service_name: String,
}

// ============================================================================
// Template helper
// ============================================================================

/// Convert a serde_yaml_ng::Value to a string for template resolution.
pub fn yaml_value_to_string(val: &serde_yaml_ng::Value) -> String {
    match val {
        serde_yaml_ng::Value::String(s) => s.clone(),
        serde_yaml_ng::Value::Number(n) => n.to_string(),
        serde_yaml_ng::Value::Bool(b) => b.to_string(),
        serde_yaml_ng::Value::Null => String::new(),
        other => format!("{:?}", other),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_parse_full() {
        let yaml = r#"
version: "1.0"
name: aston-bot
environment: prod
termination_protection: true
params:
  image_tag: "1.4.2"
network:
  vpc_id: vpc-0aa11bb22cc33dd44
  alb_security_group_id: sg-0123456789abcdef0
  target_group_arn: arn:aws:elasticloadbalancing:us-east-1:123456789012:targetgroup/bot/abc
service:
  container_port: 8443
task:
  image: "123456789012.dkr.ecr.us-east-1.amazonaws.com/aston-bot:{{params.image_tag}}"
database:
  instance_class: db.t3.micro
  name: mydatabase
  username: admin
"#;
        let config: DeploymentConfig = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(config.version, "1.0");
        assert_eq!(config.name, "aston-bot");
        assert_eq!(config.environment, "prod");
        assert!(config.termination_protection);
        assert_eq!(config.network.ingress_port, 443);
        assert_eq!(config.service.desired_count, 1);
        assert!(config.service.assign_public_ip);
        assert!(config.service.circuit_breaker_rollback);
        assert_eq!(config.task.cpu, 1024);
        assert_eq!(config.task.memory_mib, 2048);
        assert_eq!(config.task.container_name, "app");
        assert_eq!(config.task.stream_prefix, "app-logs");
        assert!(config.logging.group.is_none());
        let db = config.database.unwrap();
        assert_eq!(db.engine, "mysql");
        assert_eq!(db.engine_version, "8.0");
        assert_eq!(db.allocated_storage_gib, 20);
        assert_eq!(db.max_allocated_storage_gib, 100);
        assert!(!db.publicly_accessible);
    }

    #[test]
    fn test_config_parse_without_database() {
        let yaml = r#"
version: "1.0"
name: minimal
environment: staging
network:
  vpc_id: vpc-1
  alb_security_group_id: sg-1
  target_group_arn: arn:aws:elasticloadbalancing:eu-west-1:1:targetgroup/x/y
service:
  container_port: 8080
task:
  image: registry.example.com/minimal:latest
"#;
        let config: DeploymentConfig = serde_yaml_ng::from_str(yaml).unwrap();
        assert!(config.database.is_none());
        assert!(!config.termination_protection);
        assert!(config.cluster.name.is_none());
    }

    #[test]
    fn test_iam_defaults() {
        let iam = IamConfig::default();
        assert_eq!(
            iam.execution_managed_policies,
            vec!["service-role/AmazonECSTaskExecutionRolePolicy"]
        );
        assert_eq!(iam.task_managed_policies, vec!["SecretsManagerReadWrite"]);
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(StageId::LogGroup.to_string(), "log-group");
        assert_eq!(StageId::TaskDefinition.to_string(), "task-definition");
        assert_eq!(StageId::DatabaseAccess.to_string(), "database-access");
    }

    #[test]
    fn test_stage_from_str_id() {
        assert_eq!(StageId::from_str_id("cluster"), Some(StageId::Cluster));
        assert_eq!(StageId::from_str_id("database"), Some(StageId::Database));
        assert_eq!(StageId::from_str_id("ghost"), None);
    }

    #[test]
    fn test_stage_all_with_and_without_database() {
        assert_eq!(StageId::all(true).len(), 9);
        let without = StageId::all(false);
        assert_eq!(without.len(), 7);
        assert!(!without.contains(&StageId::Database));
        assert!(!without.contains(&StageId::DatabaseAccess));
    }

    #[test]
    fn test_stage_needs() {
        assert!(StageId::Network.needs(true).is_empty());
        assert_eq!(StageId::Cluster.needs(false), vec![StageId::Network]);
        assert!(StageId::TaskDefinition.needs(true).contains(&StageId::Database));
        assert!(!StageId::TaskDefinition.needs(false).contains(&StageId::Database));
        assert_eq!(
            StageId::DatabaseAccess.needs(true),
            vec![StageId::Database, StageId::Service]
        );
    }

    #[test]
    fn test_plan_action_display() {
        assert_eq!(PlanAction::Create.to_string(), "CREATE");
        assert_eq!(PlanAction::Resolve.to_string(), "RESOLVE");
        assert_eq!(PlanAction::NoOp.to_string(), "NO-OP");
    }

    #[test]
    fn test_stage_status_display() {
        assert_eq!(StageStatus::Materialized.to_string(), "MATERIALIZED");
        assert_eq!(StageStatus::Failed.to_string(), "FAILED");
    }

    #[test]
    fn test_record_roundtrip() {
        let mut stages = IndexMap::new();
        stages.insert(
            "log-group".to_string(),
            StageRecord {
                status: StageStatus::Materialized,
                applied_at: Some("2026-03-01T10:00:00Z".to_string()),
                duration_seconds: Some(0.4),
                hash: "blake3:abc123".to_string(),
                details: HashMap::from([
                    ("log_group".to_string(), "/aws/ecs/prod".to_string()),
                    ("created".to_string(), "true".to_string()),
                ]),
            },
        );
        let record = DeploymentRecord {
            schema: "1.0".to_string(),
            name: "aston-bot".to_string(),
            environment: "prod".to_string(),
            generated_at: "2026-03-01T10:00:01Z".to_string(),
            generator: "botadura 0.3.0".to_string(),
            stages,
            exports: Some(DeploymentExports {
                cluster_name: "prod".to_string(),
                service_name: "aston-bot-prod".to_string(),
            }),
        };
        let yaml = serde_yaml_ng::to_string(&record).unwrap();
        let back: DeploymentRecord = serde_yaml_ng::from_str(&yaml).unwrap();
        assert_eq!(back.environment, "prod");
        assert_eq!(back.stages["log-group"].status, StageStatus::Materialized);
        assert_eq!(back.exports.unwrap().cluster_name, "prod");
    }

    #[test]
    fn test_yaml_value_to_string() {
        assert_eq!(
            yaml_value_to_string(&serde_yaml_ng::Value::String("hello".into())),
            "hello"
        );
        assert_eq!(yaml_value_to_string(&serde_yaml_ng::Value::Bool(true)), "true");
        assert_eq!(yaml_value_to_string(&serde_yaml_ng::Value::Null), "");
    }
}
