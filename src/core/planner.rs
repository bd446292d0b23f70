//! Plan generation — diff the resolved deployment against the record.
//!
//! Every stage's resolved spec is reduced to a BLAKE3 hash; a stage
//! whose hash matches its record entry is a NO-OP. The log-group stage
//! is always RESOLVE: whether it binds or creates is decided by the
//! existence check at materialize time, never at plan time.

use super::executor::PendingDeployment;
use super::types::*;

/// Hash a string. Returns `"blake3:{hex}"`.
pub fn hash_string(s: &str) -> String {
    format!("blake3:{}", blake3::hash(s.as_bytes()).to_hex())
}

/// Compute the hash of a stage's resolved spec.
pub fn hash_stage(pending: &PendingDeployment, stage: StageId) -> String {
    let mut components: Vec<String> = vec![stage.as_str().to_string()];

    match stage {
        StageId::Network => {
            components.push(pending.network.vpc_id.clone());
            components.push(pending.network.alb_security_group_id.clone());
            components.push(pending.network.target_group_arn.clone());
            components.push(pending.network.ingress_port.to_string());
            components.push(pending.service_security_group_name.clone());
        }
        StageId::ExecutionRole => push_role(&mut components, &pending.execution_role),
        StageId::TaskRole => push_role(&mut components, &pending.task_role),
        StageId::LogGroup => {
            components.push(pending.log_group.name.clone());
            components.push(pending.log_group.durable.to_string());
        }
        StageId::Cluster => components.push(pending.cluster_name.clone()),
        StageId::Database => {
            if let Some(ref db) = pending.database {
                components.push(db.identifier.clone());
                components.push(db.engine.clone());
                components.push(db.engine_version.clone());
                components.push(db.instance_class.clone());
                components.push(db.allocated_storage_gib.to_string());
                components.push(db.max_allocated_storage_gib.to_string());
                components.push(db.name.clone());
                components.push(db.username.clone());
                components.push(db.publicly_accessible.to_string());
            }
        }
        StageId::TaskDefinition => {
            components.push(pending.task_family.clone());
            components.push(pending.task.image.clone());
            components.push(pending.task.cpu.to_string());
            components.push(pending.task.memory_mib.to_string());
            components.push(pending.task.container_name.clone());
            components.push(pending.task.stream_prefix.clone());
            components.push(pending.service.container_port.to_string());
            for (key, value) in &pending.task.env {
                components.push(format!("{}={}", key, value));
            }
        }
        StageId::Service => {
            components.push(pending.service_name.clone());
            components.push(pending.cluster_name.clone());
            components.push(pending.service.desired_count.to_string());
            components.push(pending.service.assign_public_ip.to_string());
            components.push(pending.service.circuit_breaker_rollback.to_string());
            components.push(pending.network.target_group_arn.clone());
        }
        StageId::DatabaseAccess => {
            if let Some(ref db) = pending.database {
                components.push(db.identifier.clone());
            }
            components.push(pending.service_name.clone());
        }
    }

    hash_string(&components.join("\0"))
}

fn push_role(components: &mut Vec<String>, role: &RoleSpec) {
    components.push(role.name.clone());
    components.push(role.description.clone());
    for policy in &role.managed_policies {
        components.push(policy.clone());
    }
}

/// Generate a deployment plan by comparing the pending deployment to
/// the record of the previous pass.
pub fn plan(pending: &PendingDeployment, record: Option<&DeploymentRecord>) -> DeploymentPlan {
    let mut changes = Vec::new();
    let mut to_create = 0u32;
    let mut to_update = 0u32;
    let mut to_resolve = 0u32;
    let mut unchanged = 0u32;

    for stage in &pending.stages {
        let action = determine_action(pending, *stage, record);
        let description = describe_action(pending, *stage, &action);

        match action {
            PlanAction::Create => to_create += 1,
            PlanAction::Update => to_update += 1,
            PlanAction::Resolve => to_resolve += 1,
            PlanAction::NoOp => unchanged += 1,
        }

        changes.push(PlannedChange {
            stage: *stage,
            action,
            description,
        });
    }

    DeploymentPlan {
        name: pending.name.clone(),
        environment: pending.environment.clone(),
        changes,
        to_create,
        to_update,
        to_resolve,
        unchanged,
    }
}

fn determine_action(
    pending: &PendingDeployment,
    stage: StageId,
    record: Option<&DeploymentRecord>,
) -> PlanAction {
    if stage == StageId::LogGroup {
        return PlanAction::Resolve;
    }

    let hash = pending
        .hashes
        .get(stage.as_str())
        .cloned()
        .unwrap_or_else(|| hash_stage(pending, stage));

    if let Some(record) = record {
        if let Some(entry) = record.stages.get(stage.as_str()) {
            if entry.status == StageStatus::Materialized && entry.hash == hash {
                return PlanAction::NoOp;
            }
            // Previously failed or spec changed — re-materialize.
            return PlanAction::Update;
        }
    }

    PlanAction::Create
}

fn describe_action(pending: &PendingDeployment, stage: StageId, action: &PlanAction) -> String {
    match action {
        PlanAction::Resolve => {
            let retention = crate::core::logs::RetentionPolicy::for_durability(pending.log_group.durable);
            let removal = crate::core::logs::RemovalPolicy::for_durability(pending.log_group.durable);
            format!(
                "{}: bind {} or create it ({} retention, {} on teardown)",
                stage, pending.log_group.name, retention, removal
            )
        }
        PlanAction::Update => format!("{}: update (spec changed)", stage),
        PlanAction::NoOp => format!("{}: no changes", stage),
        PlanAction::Create => match stage {
            StageId::Network => format!(
                "{}: look up {} and create security group {}",
                stage, pending.network.vpc_id, pending.service_security_group_name
            ),
            StageId::ExecutionRole => {
                format!("{}: create role {}", stage, pending.execution_role.name)
            }
            StageId::TaskRole => format!("{}: create role {}", stage, pending.task_role.name),
            StageId::Cluster => format!("{}: create {}", stage, pending.cluster_name),
            StageId::Database => match pending.database {
                Some(ref db) => format!(
                    "{}: create {} ({} {}, {})",
                    stage, db.identifier, db.engine, db.engine_version, db.instance_class
                ),
                None => format!("{}: create", stage),
            },
            StageId::TaskDefinition => format!(
                "{}: register {} ({})",
                stage, pending.task_family, pending.task.image
            ),
            StageId::Service => format!(
                "{}: launch {} x{}",
                stage, pending.service_name, pending.service.desired_count
            ),
            StageId::DatabaseAccess => match pending.database {
                Some(ref db) => format!("{}: allow service ingress on {}", stage, db.identifier),
                None => format!("{}: allow service ingress", stage),
            },
            StageId::LogGroup => format!("{}: resolve {}", stage, pending.log_group.name),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::executor::build;
    use crate::core::parser::parse_config;
    use chrono::Utc;
    use indexmap::IndexMap;
    use std::collections::HashMap;

    const YAML: &str = r#"
version: "1.0"
name: aston-bot
environment: prod
termination_protection: true
network:
  vpc_id: vpc-0aa11bb22cc33dd44
  alb_security_group_id: sg-0123456789abcdef0
  target_group_arn: arn:aws:elasticloadbalancing:us-east-1:123456789012:targetgroup/bot/abc
service:
  container_port: 8443
task:
  image: registry.example.com/aston-bot:latest
database:
  instance_class: db.t3.micro
  name: mydatabase
  username: admin
"#;

    fn pending() -> PendingDeployment {
        build(&parse_config(YAML).unwrap()).unwrap()
    }

    fn record_matching(pending: &PendingDeployment) -> DeploymentRecord {
        let mut stages = IndexMap::new();
        for stage in &pending.stages {
            stages.insert(
                stage.to_string(),
                StageRecord {
                    status: StageStatus::Materialized,
                    applied_at: Some(Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()),
                    duration_seconds: Some(0.1),
                    hash: pending.hashes[stage.as_str()].clone(),
                    details: HashMap::new(),
                },
            );
        }
        DeploymentRecord {
            schema: "1.0".to_string(),
            name: pending.name.clone(),
            environment: pending.environment.clone(),
            generated_at: "2026-03-01T00:00:00Z".to_string(),
            generator: "botadura test".to_string(),
            stages,
            exports: None,
        }
    }

    #[test]
    fn test_hash_string_format() {
        let h = hash_string("hello");
        assert!(h.starts_with("blake3:"));
        assert_eq!(h.len(), 7 + 64);
        assert_eq!(h, hash_string("hello"));
        assert_ne!(h, hash_string("world"));
    }

    #[test]
    fn test_hash_stage_deterministic() {
        let p = pending();
        for stage in &p.stages {
            assert_eq!(hash_stage(&p, *stage), hash_stage(&p, *stage));
        }
    }

    #[test]
    fn test_hash_stage_differs_per_stage() {
        let p = pending();
        assert_ne!(
            hash_stage(&p, StageId::ExecutionRole),
            hash_stage(&p, StageId::TaskRole)
        );
    }

    #[test]
    fn test_hash_changes_with_spec() {
        let p1 = pending();
        let mut config = parse_config(YAML).unwrap();
        config.task.image = "registry.example.com/aston-bot:next".to_string();
        let p2 = build(&config).unwrap();
        assert_ne!(
            hash_stage(&p1, StageId::TaskDefinition),
            hash_stage(&p2, StageId::TaskDefinition)
        );
        assert_eq!(hash_stage(&p1, StageId::Cluster), hash_stage(&p2, StageId::Cluster));
    }

    #[test]
    fn test_plan_first_pass_all_create_except_log_group() {
        let p = pending();
        let plan = plan(&p, None);
        assert_eq!(plan.to_resolve, 1);
        assert_eq!(plan.to_create, 8);
        assert_eq!(plan.to_update, 0);
        assert_eq!(plan.unchanged, 0);
        let log = plan
            .changes
            .iter()
            .find(|c| c.stage == StageId::LogGroup)
            .unwrap();
        assert_eq!(log.action, PlanAction::Resolve);
        assert!(log.description.contains("/aws/ecs/prod"));
        assert!(log.description.contains("six-months"));
        assert!(log.description.contains("retain"));
    }

    #[test]
    fn test_plan_unchanged_record() {
        let p = pending();
        let record = record_matching(&p);
        let plan = plan(&p, Some(&record));
        // Everything NO-OP except the log group, which is re-resolved
        // on every pass.
        assert_eq!(plan.unchanged, 8);
        assert_eq!(plan.to_resolve, 1);
        assert_eq!(plan.to_create, 0);
    }

    #[test]
    fn test_plan_update_on_hash_mismatch() {
        let p = pending();
        let mut record = record_matching(&p);
        record
            .stages
            .get_mut("task-definition")
            .unwrap()
            .hash = "blake3:stale".to_string();
        let plan = plan(&p, Some(&record));
        assert_eq!(plan.to_update, 1);
        assert_eq!(plan.unchanged, 7);
    }

    #[test]
    fn test_plan_failed_stage_gets_retried() {
        let p = pending();
        let mut record = record_matching(&p);
        record.stages.get_mut("cluster").unwrap().status = StageStatus::Failed;
        let plan = plan(&p, Some(&record));
        let cluster = plan
            .changes
            .iter()
            .find(|c| c.stage == StageId::Cluster)
            .unwrap();
        assert_eq!(cluster.action, PlanAction::Update);
    }

    #[test]
    fn test_describe_create_actions() {
        let p = pending();
        let plan = plan(&p, None);
        let descriptions: Vec<&str> =
            plan.changes.iter().map(|c| c.description.as_str()).collect();
        assert!(descriptions.iter().any(|d| d.contains("vpc-0aa11bb22cc33dd44")));
        assert!(descriptions.iter().any(|d| d.contains("aston-bot-prod-db")));
        assert!(descriptions
            .iter()
            .any(|d| d.contains("registry.example.com/aston-bot:latest")));
    }
}
