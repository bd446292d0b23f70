//! Executor — the two-phase deployment lifecycle.
//!
//! `build` is pure and synchronous: it validates the config, resolves
//! templates, derives names, and fixes the stage order and per-stage
//! hashes. `materialize` performs every external call, walking the
//! stage order once; a caller never observes a partially-initialized
//! deployment because `ResolvedDeployment` is only assembled after the
//! last stage settles.

use super::logs::{self, LogGroupRequest, LogGroupResolution};
use super::planner;
use super::resolver;
use super::state;
use super::types::*;
use crate::backend::{
    BackendError, CloudBackend, ClusterHandle, DatabaseHandle, RoleHandle, SecurityGroupHandle,
    ServiceHandle, ServiceLaunchSpec, TaskDefinitionHandle, TaskDefinitionSpec, VpcHandle,
};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::path::Path;
use std::time::Instant;
use thiserror::Error;

/// Failure of a materialization pass.
#[derive(Debug, Error)]
pub enum DeployError {
    #[error("stage {stage}: {source}")]
    Stage {
        stage: StageId,
        #[source]
        source: BackendError,
    },

    #[error("stage {stage}: prerequisite {what} not materialized")]
    MissingPrerequisite { stage: StageId, what: String },

    #[error("state: {0}")]
    Record(String),
}

/// A fully specified deployment, ready to materialize. Pure data: no
/// external call has been made to produce it.
#[derive(Debug, Clone)]
pub struct PendingDeployment {
    pub name: String,
    pub environment: String,
    pub stages: Vec<StageId>,
    pub network: NetworkConfig,
    pub service_security_group_name: String,
    pub execution_role: RoleSpec,
    pub task_role: RoleSpec,
    pub log_group: LogGroupRequest,
    pub cluster_name: String,
    pub task: TaskConfig,
    pub task_family: String,
    pub service: ServiceConfig,
    pub service_name: String,
    pub database: Option<DatabaseSpec>,
    /// BLAKE3 per stage, keyed by stage id.
    pub hashes: IndexMap<String, String>,
}

/// Every handle a completed pass produced or rebound.
#[derive(Debug, Clone)]
pub struct ResolvedDeployment {
    pub vpc: VpcHandle,
    pub service_security_group: SecurityGroupHandle,
    pub execution_role: RoleHandle,
    pub task_role: RoleHandle,
    pub log_group: LogGroupResolution,
    pub cluster: ClusterHandle,
    pub task_definition: TaskDefinitionHandle,
    pub database: Option<DatabaseHandle>,
    pub service: ServiceHandle,
    pub exports: DeploymentExports,
}

/// Options for a materialization pass.
pub struct MaterializeOptions<'a> {
    pub state_dir: &'a Path,
    /// Re-materialize every stage, ignoring the record.
    pub force: bool,
}

/// Summary of a completed pass.
pub struct MaterializeOutcome {
    pub resolved: ResolvedDeployment,
    pub stages_materialized: u32,
    pub stages_skipped: u32,
    pub total_duration: std::time::Duration,
}

/// Build a pending deployment from a parsed config.
///
/// Fails on validation errors, unresolvable templates, or a malformed
/// stage graph. Performs no I/O.
pub fn build(config: &DeploymentConfig) -> Result<PendingDeployment, String> {
    let errors = super::parser::validate_config(config);
    if !errors.is_empty() {
        let messages: Vec<String> = errors.iter().map(|e| e.message.clone()).collect();
        return Err(format!("invalid config: {}", messages.join("; ")));
    }

    let environment = &config.environment;
    let resolve = |template: &str| -> Result<String, String> {
        resolver::resolve_template(template, &config.params, environment)
    };

    let mut task = config.task.clone();
    task.image = resolve(&task.image)?;
    let mut env = IndexMap::new();
    for (key, value) in &config.task.env {
        env.insert(key.clone(), resolve(value)?);
    }
    task.env = env;

    let log_group_name = match config.logging.group {
        Some(ref group) => resolve(group)?,
        None => format!("/aws/ecs/{}", environment),
    };

    let cluster_name = match config.cluster.name {
        Some(ref name) => resolve(name)?,
        None => environment.clone(),
    };

    let database = match config.database {
        Some(ref db) => {
            let identifier = match db.identifier {
                Some(ref id) => resolve(id)?,
                None => format!("{}-{}-db", config.name, environment),
            };
            Some(DatabaseSpec {
                identifier,
                engine: db.engine.clone(),
                engine_version: db.engine_version.clone(),
                instance_class: db.instance_class.clone(),
                allocated_storage_gib: db.allocated_storage_gib,
                max_allocated_storage_gib: db.max_allocated_storage_gib,
                name: db.name.clone(),
                username: db.username.clone(),
                publicly_accessible: db.publicly_accessible,
            })
        }
        None => None,
    };

    let stages = resolver::build_stage_order(database.is_some())?;

    let mut pending = PendingDeployment {
        name: config.name.clone(),
        environment: environment.clone(),
        stages,
        network: config.network.clone(),
        service_security_group_name: format!("{}-{}-svc", config.name, environment),
        execution_role: RoleSpec {
            name: format!("{}-{}-execution", config.name, environment),
            description: "Role the container agent assumes to pull images and write logs"
                .to_string(),
            managed_policies: config.iam.execution_managed_policies.clone(),
        },
        task_role: RoleSpec {
            name: format!("{}-{}-task", config.name, environment),
            description: "Role the application assumes to reach provider services".to_string(),
            managed_policies: config.iam.task_managed_policies.clone(),
        },
        log_group: LogGroupRequest {
            name: log_group_name,
            durable: config.termination_protection,
        },
        cluster_name,
        task,
        task_family: format!("{}-{}", config.name, environment),
        service: config.service.clone(),
        service_name: format!("{}-{}", config.name, environment),
        database,
        hashes: IndexMap::new(),
    };

    for stage in pending.stages.clone() {
        let hash = planner::hash_stage(&pending, stage);
        pending.hashes.insert(stage.to_string(), hash);
    }

    Ok(pending)
}

/// Working handles accumulated while walking the stage order.
#[derive(Default)]
struct Slots {
    vpc: Option<VpcHandle>,
    service_security_group: Option<SecurityGroupHandle>,
    execution_role: Option<RoleHandle>,
    task_role: Option<RoleHandle>,
    log_group: Option<LogGroupResolution>,
    cluster: Option<ClusterHandle>,
    task_definition: Option<TaskDefinitionHandle>,
    database: Option<DatabaseHandle>,
    service: Option<ServiceHandle>,
}

fn require<'a, T>(slot: &'a Option<T>, stage: StageId, what: &str) -> Result<&'a T, DeployError> {
    slot.as_ref().ok_or_else(|| DeployError::MissingPrerequisite {
        stage,
        what: what.to_string(),
    })
}

/// Materialize a pending deployment against the backend.
///
/// Stages run strictly in order; the first failure records itself and
/// aborts the pass. Stages whose hash matches a previously
/// materialized record entry are skipped and their handles rebound
/// from the record — except the log group, whose existence check runs
/// on every pass.
pub async fn materialize(
    pending: &PendingDeployment,
    backend: &dyn CloudBackend,
    opts: &MaterializeOptions<'_>,
) -> Result<MaterializeOutcome, DeployError> {
    let pass_start = Instant::now();

    let previous = state::load_record(opts.state_dir, &pending.environment)
        .map_err(DeployError::Record)?;
    let mut record = state::new_record(&pending.name, &pending.environment);

    let mut slots = Slots::default();
    let mut materialized = 0u32;
    let mut skipped = 0u32;

    for stage in &pending.stages {
        let stage = *stage;
        let hash = pending.hashes[stage.as_str()].clone();

        if !opts.force && stage != StageId::LogGroup {
            if let Some(entry) = previous.as_ref().and_then(|r| r.stages.get(stage.as_str())) {
                if entry.status == StageStatus::Materialized
                    && entry.hash == hash
                    && rebind_stage(stage, &entry.details, &mut slots)
                {
                    tracing::info!(stage = %stage, "unchanged, rebinding from record");
                    record.stages.insert(stage.to_string(), entry.clone());
                    skipped += 1;
                    continue;
                }
            }
        }

        tracing::info!(stage = %stage, "materializing");
        let stage_start = Instant::now();

        match run_stage(stage, pending, backend, &mut slots).await {
            Ok(details) => {
                let duration = stage_start.elapsed().as_secs_f64();
                record.stages.insert(
                    stage.to_string(),
                    StageRecord {
                        status: StageStatus::Materialized,
                        applied_at: Some(state::now_iso8601()),
                        duration_seconds: Some(duration),
                        hash,
                        details,
                    },
                );
                materialized += 1;
            }
            Err(err) => {
                let duration = stage_start.elapsed().as_secs_f64();
                record.stages.insert(
                    stage.to_string(),
                    StageRecord {
                        status: StageStatus::Failed,
                        applied_at: Some(state::now_iso8601()),
                        duration_seconds: Some(duration),
                        hash,
                        details: HashMap::new(),
                    },
                );
                record.generated_at = state::now_iso8601();
                state::save_record(opts.state_dir, &record).map_err(DeployError::Record)?;
                tracing::error!(stage = %stage, error = %err, "stage failed, aborting pass");
                return Err(err);
            }
        }
    }

    let cluster = require(&slots.cluster, StageId::Service, "cluster")?.clone();
    let service = require(&slots.service, StageId::Service, "service")?.clone();
    let exports = DeploymentExports {
        cluster_name: cluster.name.clone(),
        service_name: service.name.clone(),
    };
    record.exports = Some(exports.clone());
    record.generated_at = state::now_iso8601();
    state::save_record(opts.state_dir, &record).map_err(DeployError::Record)?;

    let resolved = ResolvedDeployment {
        vpc: require(&slots.vpc, StageId::Network, "vpc")?.clone(),
        service_security_group: require(
            &slots.service_security_group,
            StageId::Network,
            "security group",
        )?
        .clone(),
        execution_role: require(&slots.execution_role, StageId::ExecutionRole, "role")?.clone(),
        task_role: require(&slots.task_role, StageId::TaskRole, "role")?.clone(),
        log_group: require(&slots.log_group, StageId::LogGroup, "log group")?.clone(),
        cluster,
        task_definition: require(
            &slots.task_definition,
            StageId::TaskDefinition,
            "task definition",
        )?
        .clone(),
        database: slots.database.clone(),
        service,
        exports,
    };

    Ok(MaterializeOutcome {
        resolved,
        stages_materialized: materialized,
        stages_skipped: skipped,
        total_duration: pass_start.elapsed(),
    })
}

/// Execute one stage. Returns the detail map recorded for rebinding.
async fn run_stage(
    stage: StageId,
    pending: &PendingDeployment,
    backend: &dyn CloudBackend,
    slots: &mut Slots,
) -> Result<HashMap<String, String>, DeployError> {
    let fail = |source: BackendError| DeployError::Stage { stage, source };
    let mut details = HashMap::new();

    match stage {
        StageId::Network => {
            let vpc = backend
                .lookup_vpc(&pending.network.vpc_id)
                .await
                .map_err(fail)?;
            let group = backend
                .create_security_group(
                    &vpc,
                    &pending.service_security_group_name,
                    "Allow traffic from the load balancer",
                )
                .await
                .map_err(fail)?;
            backend
                .authorize_ingress_from_group(
                    &group,
                    &pending.network.alb_security_group_id,
                    pending.network.ingress_port,
                    "inbound from the load balancer",
                )
                .await
                .map_err(fail)?;
            details.insert("vpc_id".to_string(), vpc.vpc_id.clone());
            details.insert("subnet_ids".to_string(), vpc.subnet_ids.join(","));
            details.insert("security_group_id".to_string(), group.group_id.clone());
            slots.vpc = Some(vpc);
            slots.service_security_group = Some(group);
        }
        StageId::ExecutionRole => {
            let handle = backend
                .create_role(&pending.execution_role)
                .await
                .map_err(fail)?;
            details.insert("role_name".to_string(), handle.name.clone());
            details.insert("role_arn".to_string(), handle.arn.clone());
            slots.execution_role = Some(handle);
        }
        StageId::TaskRole => {
            let handle = backend.create_role(&pending.task_role).await.map_err(fail)?;
            details.insert("role_name".to_string(), handle.name.clone());
            details.insert("role_arn".to_string(), handle.arn.clone());
            slots.task_role = Some(handle);
        }
        StageId::LogGroup => {
            let resolution = logs::resolve(backend, &pending.log_group).await.map_err(fail)?;
            details.insert("log_group".to_string(), resolution.handle.name.clone());
            details.insert("created".to_string(), resolution.created.to_string());
            slots.log_group = Some(resolution);
        }
        StageId::Cluster => {
            let handle = backend
                .create_cluster(&pending.cluster_name)
                .await
                .map_err(fail)?;
            details.insert("cluster_name".to_string(), handle.name.clone());
            details.insert("cluster_arn".to_string(), handle.arn.clone());
            slots.cluster = Some(handle);
        }
        StageId::Database => {
            let Some(ref spec) = pending.database else {
                return Ok(details);
            };
            let vpc = require(&slots.vpc, stage, "vpc")?;
            let handle = backend.create_database(spec, vpc).await.map_err(fail)?;
            details.insert("identifier".to_string(), handle.identifier.clone());
            details.insert("endpoint_address".to_string(), handle.endpoint_address.clone());
            details.insert("endpoint_port".to_string(), handle.endpoint_port.to_string());
            details.insert("security_group_id".to_string(), handle.security_group_id.clone());
            slots.database = Some(handle);
        }
        StageId::TaskDefinition => {
            let execution_role = require(&slots.execution_role, stage, "execution role")?;
            let task_role = require(&slots.task_role, stage, "task role")?;
            let log_group = require(&slots.log_group, stage, "log group")?;

            let mut env: Vec<(String, String)> = pending
                .task
                .env
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            if let Some(ref db) = slots.database {
                let spec = pending.database.as_ref();
                env.push(("DB_HOST".to_string(), db.endpoint_address.clone()));
                env.push(("DB_PORT".to_string(), db.endpoint_port.to_string()));
                if let Some(spec) = spec {
                    env.push(("DB_NAME".to_string(), spec.name.clone()));
                    env.push(("DB_USER".to_string(), spec.username.clone()));
                }
            }

            let handle = backend
                .register_task_definition(&TaskDefinitionSpec {
                    family: &pending.task_family,
                    task: &pending.task,
                    container_port: pending.service.container_port,
                    execution_role,
                    task_role,
                    log_group: &log_group.handle,
                    env: &env,
                })
                .await
                .map_err(fail)?;
            details.insert("family".to_string(), handle.family.clone());
            details.insert("task_definition_arn".to_string(), handle.arn.clone());
            details.insert("log_group".to_string(), log_group.handle.name.clone());
            slots.task_definition = Some(handle);
        }
        StageId::Service => {
            let cluster = require(&slots.cluster, stage, "cluster")?;
            let task_definition = require(&slots.task_definition, stage, "task definition")?;
            let vpc = require(&slots.vpc, stage, "vpc")?;
            let group = require(&slots.service_security_group, stage, "security group")?;

            let handle = backend
                .create_service(&ServiceLaunchSpec {
                    name: &pending.service_name,
                    service: &pending.service,
                    container_name: &pending.task.container_name,
                    target_group_arn: &pending.network.target_group_arn,
                    cluster,
                    task_definition,
                    vpc,
                    security_group: group,
                })
                .await
                .map_err(fail)?;
            details.insert("service_name".to_string(), handle.name.clone());
            details.insert("service_arn".to_string(), handle.arn.clone());
            slots.service = Some(handle);
        }
        StageId::DatabaseAccess => {
            let database = require(&slots.database, stage, "database")?;
            let group = require(&slots.service_security_group, stage, "security group")?;
            backend
                .allow_database_access(database, group)
                .await
                .map_err(fail)?;
            details.insert("database".to_string(), database.identifier.clone());
            details.insert("source_group".to_string(), group.group_id.clone());
        }
    }

    Ok(details)
}

/// Rebind a skipped stage's handles from its record details. Returns
/// false when the details are incomplete, forcing re-materialization.
fn rebind_stage(stage: StageId, details: &HashMap<String, String>, slots: &mut Slots) -> bool {
    match stage {
        StageId::Network => {
            let (Some(vpc_id), Some(subnets), Some(group_id)) = (
                details.get("vpc_id"),
                details.get("subnet_ids"),
                details.get("security_group_id"),
            ) else {
                return false;
            };
            slots.vpc = Some(VpcHandle {
                vpc_id: vpc_id.clone(),
                subnet_ids: subnets.split(',').map(str::to_string).collect(),
            });
            slots.service_security_group = Some(SecurityGroupHandle {
                group_id: group_id.clone(),
            });
            true
        }
        StageId::ExecutionRole | StageId::TaskRole => {
            let (Some(name), Some(arn)) = (details.get("role_name"), details.get("role_arn"))
            else {
                return false;
            };
            let handle = RoleHandle {
                name: name.clone(),
                arn: arn.clone(),
            };
            if stage == StageId::ExecutionRole {
                slots.execution_role = Some(handle);
            } else {
                slots.task_role = Some(handle);
            }
            true
        }
        // The log group is never skipped: its existence check is its
        // idempotency mechanism.
        StageId::LogGroup => false,
        StageId::Cluster => {
            let (Some(name), Some(arn)) =
                (details.get("cluster_name"), details.get("cluster_arn"))
            else {
                return false;
            };
            slots.cluster = Some(ClusterHandle {
                name: name.clone(),
                arn: arn.clone(),
            });
            true
        }
        StageId::Database => {
            let (Some(identifier), Some(address), Some(port), Some(group_id)) = (
                details.get("identifier"),
                details.get("endpoint_address"),
                details.get("endpoint_port"),
                details.get("security_group_id"),
            ) else {
                return false;
            };
            let Ok(port) = port.parse::<u16>() else {
                return false;
            };
            slots.database = Some(DatabaseHandle {
                identifier: identifier.clone(),
                endpoint_address: address.clone(),
                endpoint_port: port,
                security_group_id: group_id.clone(),
            });
            true
        }
        StageId::TaskDefinition => {
            let (Some(family), Some(arn)) =
                (details.get("family"), details.get("task_definition_arn"))
            else {
                return false;
            };
            slots.task_definition = Some(TaskDefinitionHandle {
                family: family.clone(),
                arn: arn.clone(),
            });
            true
        }
        StageId::Service => {
            let (Some(name), Some(arn)) =
                (details.get("service_name"), details.get("service_arn"))
            else {
                return false;
            };
            slots.service = Some(ServiceHandle {
                name: name.clone(),
                arn: arn.clone(),
            });
            true
        }
        StageId::DatabaseAccess => true,
    }
}
