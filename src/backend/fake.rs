//! Fake — test double for the cloud backend.
//!
//! Deterministic in-memory implementation of [`CloudBackend`]. Seed
//! methods pre-populate provider state, `fail_op` injects failures,
//! and every call is recorded so tests can assert on exactly which
//! declarations a pass issued.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::backend::{
    BackendError, CloudBackend, ClusterHandle, DatabaseHandle, LogGroupHandle, RoleHandle,
    SecurityGroupHandle, ServiceHandle, ServiceLaunchSpec, TaskDefinitionHandle,
    TaskDefinitionSpec, VpcHandle,
};
use crate::core::logs::{RemovalPolicy, RetentionPolicy};
use crate::core::types::{DatabaseSpec, RoleSpec};

// ── In-memory state ─────────────────────────────────────────────

/// A log group in the fake provider account.
#[derive(Debug, Clone)]
pub struct FakeLogGroup {
    pub name: String,
    pub retention: RetentionPolicy,
    pub removal: RemovalPolicy,
}

/// A registered task definition.
#[derive(Debug, Clone)]
pub struct FakeTaskDefinition {
    pub family: String,
    pub image: String,
    pub container_port: u16,
    pub log_group: String,
    pub stream_prefix: String,
    pub execution_role: String,
    pub task_role: String,
    pub env: Vec<(String, String)>,
}

/// A launched service.
#[derive(Debug, Clone)]
pub struct FakeService {
    pub name: String,
    pub cluster: String,
    pub task_definition: String,
    pub target_group_arn: String,
    pub security_group: String,
    pub desired_count: i32,
}

/// A created database instance.
#[derive(Debug, Clone)]
pub struct FakeDatabase {
    pub identifier: String,
    pub engine: String,
    pub name: String,
}

/// An authorized ingress rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeIngress {
    pub group_id: String,
    pub source_group_id: String,
    pub port: u16,
}

#[derive(Default)]
struct Inner {
    log_groups: HashMap<String, FakeLogGroup>,
    roles: Vec<RoleSpec>,
    clusters: Vec<String>,
    task_definitions: Vec<FakeTaskDefinition>,
    services: Vec<FakeService>,
    databases: Vec<FakeDatabase>,
    security_groups: Vec<String>,
    ingress: Vec<FakeIngress>,
    calls: Vec<String>,
    failures: HashMap<String, BackendError>,
}

impl Inner {
    fn check(&mut self, op: &str) -> Result<(), BackendError> {
        self.calls.push(op.to_string());
        match self.failures.get(op) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

/// A fake cloud backend for deterministic testing.
pub struct FakeCloud {
    inner: Mutex<Inner>,
}

impl FakeCloud {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Seed a log group into the fake account.
    pub async fn seed_log_group(
        &self,
        name: &str,
        retention: RetentionPolicy,
        removal: RemovalPolicy,
    ) {
        self.inner.lock().unwrap().log_groups.insert(
            name.to_string(),
            FakeLogGroup {
                name: name.to_string(),
                retention,
                removal,
            },
        );
    }

    /// Make the named operation fail with `err` on every call.
    pub async fn fail_op(&self, op: &str, err: BackendError) {
        self.inner.lock().unwrap().failures.insert(op.to_string(), err);
    }

    /// Make the log-group existence check fail with `err`.
    pub async fn fail_describe_log_group(&self, err: BackendError) {
        self.fail_op("describe-log-group", err).await;
    }

    pub async fn log_group(&self, name: &str) -> Option<FakeLogGroup> {
        self.inner.lock().unwrap().log_groups.get(name).cloned()
    }

    pub async fn create_log_group_calls(&self) -> usize {
        self.calls_to("create-log-group").await
    }

    /// How many times the named operation was invoked.
    pub async fn calls_to(&self, op: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| c.as_str() == op)
            .count()
    }

    pub async fn roles(&self) -> Vec<RoleSpec> {
        self.inner.lock().unwrap().roles.clone()
    }

    pub async fn clusters(&self) -> Vec<String> {
        self.inner.lock().unwrap().clusters.clone()
    }

    pub async fn task_definitions(&self) -> Vec<FakeTaskDefinition> {
        self.inner.lock().unwrap().task_definitions.clone()
    }

    pub async fn services(&self) -> Vec<FakeService> {
        self.inner.lock().unwrap().services.clone()
    }

    pub async fn databases(&self) -> Vec<FakeDatabase> {
        self.inner.lock().unwrap().databases.clone()
    }

    pub async fn ingress(&self) -> Vec<FakeIngress> {
        self.inner.lock().unwrap().ingress.clone()
    }
}

impl Default for FakeCloud {
    fn default() -> Self {
        Self::new()
    }
}

// ── CloudBackend implementation ─────────────────────────────────

#[async_trait]
impl CloudBackend for FakeCloud {
    async fn lookup_vpc(&self, vpc_id: &str) -> Result<VpcHandle, BackendError> {
        let mut state = self.inner.lock().unwrap();
        state.check("lookup-vpc")?;
        Ok(VpcHandle {
            vpc_id: vpc_id.to_string(),
            subnet_ids: vec!["subnet-fake-a".to_string(), "subnet-fake-b".to_string()],
        })
    }

    async fn create_security_group(
        &self,
        _vpc: &VpcHandle,
        name: &str,
        _description: &str,
    ) -> Result<SecurityGroupHandle, BackendError> {
        let mut state = self.inner.lock().unwrap();
        state.check("create-security-group")?;
        state.security_groups.push(name.to_string());
        Ok(SecurityGroupHandle {
            group_id: format!("sg-fake-{}", name),
        })
    }

    async fn authorize_ingress_from_group(
        &self,
        group: &SecurityGroupHandle,
        source_group_id: &str,
        port: u16,
        _description: &str,
    ) -> Result<(), BackendError> {
        let mut state = self.inner.lock().unwrap();
        state.check("authorize-ingress")?;
        state.ingress.push(FakeIngress {
            group_id: group.group_id.clone(),
            source_group_id: source_group_id.to_string(),
            port,
        });
        Ok(())
    }

    async fn create_role(&self, spec: &RoleSpec) -> Result<RoleHandle, BackendError> {
        let mut state = self.inner.lock().unwrap();
        state.check("create-role")?;
        state.roles.push(spec.clone());
        Ok(RoleHandle {
            name: spec.name.clone(),
            arn: format!("arn:aws:iam::000000000000:role/{}", spec.name),
        })
    }

    async fn describe_log_group(
        &self,
        name_prefix: &str,
    ) -> Result<LogGroupHandle, BackendError> {
        let mut state = self.inner.lock().unwrap();
        state.check("describe-log-group")?;
        let mut matches: Vec<&String> = state
            .log_groups
            .keys()
            .filter(|name| name.starts_with(name_prefix))
            .collect();
        matches.sort();
        match matches.first() {
            Some(name) => Ok(LogGroupHandle {
                name: (*name).clone(),
            }),
            None => Err(BackendError::NotFound(name_prefix.to_string())),
        }
    }

    fn bind_log_group(&self, name: &str) -> LogGroupHandle {
        LogGroupHandle {
            name: name.to_string(),
        }
    }

    async fn create_log_group(
        &self,
        name: &str,
        retention: RetentionPolicy,
        removal: RemovalPolicy,
    ) -> Result<LogGroupHandle, BackendError> {
        let mut state = self.inner.lock().unwrap();
        state.check("create-log-group")?;
        state.log_groups.insert(
            name.to_string(),
            FakeLogGroup {
                name: name.to_string(),
                retention,
                removal,
            },
        );
        Ok(LogGroupHandle {
            name: name.to_string(),
        })
    }

    async fn create_cluster(&self, name: &str) -> Result<ClusterHandle, BackendError> {
        let mut state = self.inner.lock().unwrap();
        state.check("create-cluster")?;
        state.clusters.push(name.to_string());
        Ok(ClusterHandle {
            name: name.to_string(),
            arn: format!("arn:aws:ecs:us-east-1:000000000000:cluster/{}", name),
        })
    }

    async fn register_task_definition(
        &self,
        spec: &TaskDefinitionSpec<'_>,
    ) -> Result<TaskDefinitionHandle, BackendError> {
        let mut state = self.inner.lock().unwrap();
        state.check("register-task-definition")?;
        state.task_definitions.push(FakeTaskDefinition {
            family: spec.family.to_string(),
            image: spec.task.image.clone(),
            container_port: spec.container_port,
            log_group: spec.log_group.name.clone(),
            stream_prefix: spec.task.stream_prefix.clone(),
            execution_role: spec.execution_role.name.clone(),
            task_role: spec.task_role.name.clone(),
            env: spec.env.to_vec(),
        });
        Ok(TaskDefinitionHandle {
            family: spec.family.to_string(),
            arn: format!(
                "arn:aws:ecs:us-east-1:000000000000:task-definition/{}:1",
                spec.family
            ),
        })
    }

    async fn create_service(
        &self,
        spec: &ServiceLaunchSpec<'_>,
    ) -> Result<ServiceHandle, BackendError> {
        let mut state = self.inner.lock().unwrap();
        state.check("create-service")?;
        state.services.push(FakeService {
            name: spec.name.to_string(),
            cluster: spec.cluster.name.clone(),
            task_definition: spec.task_definition.arn.clone(),
            target_group_arn: spec.target_group_arn.to_string(),
            security_group: spec.security_group.group_id.clone(),
            desired_count: spec.service.desired_count,
        });
        Ok(ServiceHandle {
            name: spec.name.to_string(),
            arn: format!(
                "arn:aws:ecs:us-east-1:000000000000:service/{}/{}",
                spec.cluster.name, spec.name
            ),
        })
    }

    async fn create_database(
        &self,
        spec: &DatabaseSpec,
        _vpc: &VpcHandle,
    ) -> Result<DatabaseHandle, BackendError> {
        let mut state = self.inner.lock().unwrap();
        state.check("create-database")?;
        state.databases.push(FakeDatabase {
            identifier: spec.identifier.clone(),
            engine: spec.engine.clone(),
            name: spec.name.clone(),
        });
        Ok(DatabaseHandle {
            identifier: spec.identifier.clone(),
            endpoint_address: format!("{}.fake.rds.local", spec.identifier),
            endpoint_port: 3306,
            security_group_id: format!("sg-fake-{}", spec.identifier),
        })
    }

    async fn allow_database_access(
        &self,
        database: &DatabaseHandle,
        from_group: &SecurityGroupHandle,
    ) -> Result<(), BackendError> {
        let mut state = self.inner.lock().unwrap();
        state.check("allow-database-access")?;
        state.ingress.push(FakeIngress {
            group_id: database.security_group_id.clone(),
            source_group_id: from_group.group_id.clone(),
            port: database.endpoint_port,
        });
        Ok(())
    }
}
