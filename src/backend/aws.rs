//! Live — AWS SDK implementation of the cloud backend.
//!
//! Thin translation layer: each trait method issues the corresponding
//! SDK call and maps the provider's error metadata into the
//! [`BackendError`] taxonomy. No business logic lives here, and
//! nothing is retried; timeouts are the SDK client defaults.

use async_trait::async_trait;

use aws_sdk_cloudwatchlogs::error::ProvideErrorMetadata;
use aws_sdk_ecs::types::{
    AssignPublicIp, AwsVpcConfiguration, Compatibility, ContainerDefinition,
    DeploymentCircuitBreaker, DeploymentConfiguration, KeyValuePair, LaunchType,
    LoadBalancer, LogConfiguration, LogDriver, NetworkConfiguration, NetworkMode, PortMapping,
    TransportProtocol,
};
use aws_sdk_rds::client::Waiters;

use crate::backend::{
    BackendError, CloudBackend, ClusterHandle, DatabaseHandle, LogGroupHandle, RoleHandle,
    SecurityGroupHandle, ServiceHandle, ServiceLaunchSpec, TaskDefinitionHandle,
    TaskDefinitionSpec, VpcHandle,
};
use crate::core::logs::{RemovalPolicy, RetentionPolicy};
use crate::core::types::{DatabaseSpec, RoleSpec};

/// How long to wait for a database instance to come up before the
/// pass is abandoned.
const DATABASE_AVAILABLE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(1800);

/// Trust policy letting the container tasks service assume a role.
fn task_trust_policy() -> String {
    serde_json::json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Effect": "Allow",
            "Principal": { "Service": "ecs-tasks.amazonaws.com" },
            "Action": "sts:AssumeRole"
        }]
    })
    .to_string()
}

/// Classify an SDK error by its metadata, keeping the provider's
/// diagnostic intact.
fn sdk_err<E>(context: &str, err: E) -> BackendError
where
    E: ProvideErrorMetadata + std::fmt::Debug,
{
    let code = err.code().unwrap_or_default().to_string();
    let message = err
        .message()
        .map(str::to_string)
        .unwrap_or_else(|| format!("{:?}", err));
    let detail = if code.is_empty() {
        format!("{}: {}", context, message)
    } else {
        format!("{}: {}: {}", context, code, message)
    };

    if code.contains("NotFound") || code == "NoSuchEntity" {
        BackendError::NotFound(detail)
    } else if code.contains("AccessDenied") || code == "UnauthorizedOperation" {
        BackendError::PermissionDenied(detail)
    } else if code.contains("Throttl") || code == "RequestLimitExceeded" {
        BackendError::Throttled(detail)
    } else {
        BackendError::Api(detail)
    }
}

fn spec_err(err: impl std::fmt::Display) -> BackendError {
    BackendError::InvalidSpec(err.to_string())
}

/// AWS-backed implementation of [`CloudBackend`].
pub struct AwsBackend {
    ec2: aws_sdk_ec2::Client,
    ecs: aws_sdk_ecs::Client,
    iam: aws_sdk_iam::Client,
    logs: aws_sdk_cloudwatchlogs::Client,
    rds: aws_sdk_rds::Client,
    region: Option<String>,
}

impl AwsBackend {
    /// Build a backend from the ambient credential chain and region.
    pub async fn from_env() -> Self {
        let shared = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let region = shared.region().map(|r| r.to_string());
        Self {
            ec2: aws_sdk_ec2::Client::new(&shared),
            ecs: aws_sdk_ecs::Client::new(&shared),
            iam: aws_sdk_iam::Client::new(&shared),
            logs: aws_sdk_cloudwatchlogs::Client::new(&shared),
            rds: aws_sdk_rds::Client::new(&shared),
            region,
        }
    }
}

#[async_trait]
impl CloudBackend for AwsBackend {
    async fn lookup_vpc(&self, vpc_id: &str) -> Result<VpcHandle, BackendError> {
        let vpcs = self
            .ec2
            .describe_vpcs()
            .vpc_ids(vpc_id)
            .send()
            .await
            .map_err(|e| sdk_err("describing vpc", e))?;
        if vpcs.vpcs().is_empty() {
            return Err(BackendError::NotFound(vpc_id.to_string()));
        }

        let subnets = self
            .ec2
            .describe_subnets()
            .filters(
                aws_sdk_ec2::types::Filter::builder()
                    .name("vpc-id")
                    .values(vpc_id)
                    .build(),
            )
            .send()
            .await
            .map_err(|e| sdk_err("describing subnets", e))?;
        let subnet_ids: Vec<String> = subnets
            .subnets()
            .iter()
            .filter_map(|s| s.subnet_id().map(str::to_string))
            .collect();

        Ok(VpcHandle {
            vpc_id: vpc_id.to_string(),
            subnet_ids,
        })
    }

    async fn create_security_group(
        &self,
        vpc: &VpcHandle,
        name: &str,
        description: &str,
    ) -> Result<SecurityGroupHandle, BackendError> {
        let out = self
            .ec2
            .create_security_group()
            .group_name(name)
            .description(description)
            .vpc_id(&vpc.vpc_id)
            .send()
            .await
            .map_err(|e| sdk_err("creating security group", e))?;
        match out.group_id() {
            Some(group_id) => Ok(SecurityGroupHandle {
                group_id: group_id.to_string(),
            }),
            None => Err(BackendError::Api(format!(
                "security group {} created without an id",
                name
            ))),
        }
    }

    async fn authorize_ingress_from_group(
        &self,
        group: &SecurityGroupHandle,
        source_group_id: &str,
        port: u16,
        description: &str,
    ) -> Result<(), BackendError> {
        let permission = aws_sdk_ec2::types::IpPermission::builder()
            .ip_protocol("tcp")
            .from_port(i32::from(port))
            .to_port(i32::from(port))
            .user_id_group_pairs(
                aws_sdk_ec2::types::UserIdGroupPair::builder()
                    .group_id(source_group_id)
                    .description(description)
                    .build(),
            )
            .build();
        self.ec2
            .authorize_security_group_ingress()
            .group_id(&group.group_id)
            .ip_permissions(permission)
            .send()
            .await
            .map_err(|e| sdk_err("authorizing ingress", e))?;
        Ok(())
    }

    async fn create_role(&self, spec: &RoleSpec) -> Result<RoleHandle, BackendError> {
        let out = self
            .iam
            .create_role()
            .role_name(&spec.name)
            .description(&spec.description)
            .assume_role_policy_document(task_trust_policy())
            .send()
            .await
            .map_err(|e| sdk_err("creating role", e))?;
        let role = out
            .role()
            .ok_or_else(|| BackendError::Api(format!("role {} created without metadata", spec.name)))?;
        let handle = RoleHandle {
            name: role.role_name().to_string(),
            arn: role.arn().to_string(),
        };

        for policy in &spec.managed_policies {
            let policy_arn = if policy.starts_with("arn:") {
                policy.clone()
            } else {
                format!("arn:aws:iam::aws:policy/{}", policy)
            };
            self.iam
                .attach_role_policy()
                .role_name(&spec.name)
                .policy_arn(policy_arn)
                .send()
                .await
                .map_err(|e| sdk_err("attaching role policy", e))?;
        }

        Ok(handle)
    }

    async fn describe_log_group(
        &self,
        name_prefix: &str,
    ) -> Result<LogGroupHandle, BackendError> {
        let out = self
            .logs
            .describe_log_groups()
            .log_group_name_prefix(name_prefix)
            .limit(1)
            .send()
            .await
            .map_err(|e| sdk_err("describing log groups", e))?;
        match out.log_groups().first().and_then(|g| g.log_group_name()) {
            Some(name) => Ok(LogGroupHandle {
                name: name.to_string(),
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
        // The removal policy is recorded as a tag; teardown tooling
        // reads it to decide whether the group outlives its environment.
        let result = self
            .logs
            .create_log_group()
            .log_group_name(name)
            .tags("removal-policy", removal.to_string())
            .send()
            .await;
        if let Err(err) = result {
            // Another pass may have created the group between the
            // existence check and this call; converge on the winner's
            // group instead of failing the pass.
            if err.code() == Some("ResourceAlreadyExistsException") {
                return Ok(LogGroupHandle {
                    name: name.to_string(),
                });
            }
            return Err(sdk_err("creating log group", err));
        }

        self.logs
            .put_retention_policy()
            .log_group_name(name)
            .retention_in_days(retention.days())
            .send()
            .await
            .map_err(|e| sdk_err("setting retention policy", e))?;

        Ok(LogGroupHandle {
            name: name.to_string(),
        })
    }

    async fn create_cluster(&self, name: &str) -> Result<ClusterHandle, BackendError> {
        let out = self
            .ecs
            .create_cluster()
            .cluster_name(name)
            .send()
            .await
            .map_err(|e| sdk_err("creating cluster", e))?;
        let cluster = out
            .cluster()
            .ok_or_else(|| BackendError::Api(format!("cluster {} created without metadata", name)))?;
        Ok(ClusterHandle {
            name: cluster.cluster_name().unwrap_or(name).to_string(),
            arn: cluster.cluster_arn().unwrap_or_default().to_string(),
        })
    }

    async fn register_task_definition(
        &self,
        spec: &TaskDefinitionSpec<'_>,
    ) -> Result<TaskDefinitionHandle, BackendError> {
        let mut log_config = LogConfiguration::builder()
            .log_driver(LogDriver::Awslogs)
            .options("awslogs-group", &spec.log_group.name)
            .options("awslogs-stream-prefix", &spec.task.stream_prefix);
        if let Some(ref region) = self.region {
            log_config = log_config.options("awslogs-region", region);
        }
        let log_config = log_config.build().map_err(spec_err)?;

        let environment: Vec<KeyValuePair> = spec
            .env
            .iter()
            .map(|(key, value)| KeyValuePair::builder().name(key).value(value).build())
            .collect();

        let container = ContainerDefinition::builder()
            .name(&spec.task.container_name)
            .image(&spec.task.image)
            .port_mappings(
                PortMapping::builder()
                    .container_port(i32::from(spec.container_port))
                    .protocol(TransportProtocol::Tcp)
                    .build(),
            )
            .log_configuration(log_config)
            .set_environment(Some(environment))
            .build();

        let out = self
            .ecs
            .register_task_definition()
            .family(spec.family)
            .cpu(spec.task.cpu.to_string())
            .memory(spec.task.memory_mib.to_string())
            .network_mode(NetworkMode::Awsvpc)
            .requires_compatibilities(Compatibility::Fargate)
            .execution_role_arn(&spec.execution_role.arn)
            .task_role_arn(&spec.task_role.arn)
            .container_definitions(container)
            .send()
            .await
            .map_err(|e| sdk_err("registering task definition", e))?;
        let definition = out.task_definition().ok_or_else(|| {
            BackendError::Api(format!("task definition {} registered without metadata", spec.family))
        })?;

        Ok(TaskDefinitionHandle {
            family: spec.family.to_string(),
            arn: definition.task_definition_arn().unwrap_or_default().to_string(),
        })
    }

    async fn create_service(
        &self,
        spec: &ServiceLaunchSpec<'_>,
    ) -> Result<ServiceHandle, BackendError> {
        let assign_public_ip = if spec.service.assign_public_ip {
            AssignPublicIp::Enabled
        } else {
            AssignPublicIp::Disabled
        };
        let vpc_config = AwsVpcConfiguration::builder()
            .set_subnets(Some(spec.vpc.subnet_ids.clone()))
            .security_groups(&spec.security_group.group_id)
            .assign_public_ip(assign_public_ip)
            .build()
            .map_err(spec_err)?;
        let circuit_breaker = DeploymentCircuitBreaker::builder()
            .enable(true)
            .rollback(spec.service.circuit_breaker_rollback)
            .build()
            .map_err(spec_err)?;

        let out = self
            .ecs
            .create_service()
            .cluster(&spec.cluster.name)
            .service_name(spec.name)
            .task_definition(&spec.task_definition.arn)
            .desired_count(spec.service.desired_count)
            .launch_type(LaunchType::Fargate)
            .network_configuration(
                NetworkConfiguration::builder()
                    .awsvpc_configuration(vpc_config)
                    .build(),
            )
            .load_balancers(
                LoadBalancer::builder()
                    .target_group_arn(spec.target_group_arn)
                    .container_name(spec.container_name)
                    .container_port(i32::from(spec.service.container_port))
                    .build(),
            )
            .deployment_configuration(
                DeploymentConfiguration::builder()
                    .deployment_circuit_breaker(circuit_breaker)
                    .build(),
            )
            .send()
            .await
            .map_err(|e| sdk_err("creating service", e))?;
        let service = out
            .service()
            .ok_or_else(|| BackendError::Api(format!("service {} created without metadata", spec.name)))?;

        Ok(ServiceHandle {
            name: service.service_name().unwrap_or(spec.name).to_string(),
            arn: service.service_arn().unwrap_or_default().to_string(),
        })
    }

    async fn create_database(
        &self,
        spec: &DatabaseSpec,
        vpc: &VpcHandle,
    ) -> Result<DatabaseHandle, BackendError> {
        let group = self
            .create_security_group(
                vpc,
                &format!("{}-db", spec.identifier),
                "Database access from the service",
            )
            .await?;

        self.rds
            .create_db_instance()
            .db_instance_identifier(&spec.identifier)
            .engine(&spec.engine)
            .engine_version(&spec.engine_version)
            .db_instance_class(&spec.instance_class)
            .allocated_storage(spec.allocated_storage_gib)
            .max_allocated_storage(spec.max_allocated_storage_gib)
            .db_name(&spec.name)
            .master_username(&spec.username)
            .manage_master_user_password(true)
            .publicly_accessible(spec.publicly_accessible)
            .vpc_security_group_ids(&group.group_id)
            .send()
            .await
            .map_err(|e| sdk_err("creating database", e))?;

        // The endpoint only exists once the instance is available.
        self.rds
            .wait_until_db_instance_available()
            .db_instance_identifier(&spec.identifier)
            .wait(DATABASE_AVAILABLE_TIMEOUT)
            .await
            .map_err(|e| {
                BackendError::Api(format!("waiting for database {}: {:?}", spec.identifier, e))
            })?;

        let described = self
            .rds
            .describe_db_instances()
            .db_instance_identifier(&spec.identifier)
            .send()
            .await
            .map_err(|e| sdk_err("describing database", e))?;
        let instance = described
            .db_instances()
            .first()
            .ok_or_else(|| BackendError::NotFound(spec.identifier.clone()))?;
        let endpoint = instance.endpoint().ok_or_else(|| {
            BackendError::Api(format!("database {} has no endpoint", spec.identifier))
        })?;
        let port = endpoint.port().unwrap_or(3306);
        let endpoint_port = u16::try_from(port).map_err(|_| {
            BackendError::Api(format!("database {} reports invalid port {}", spec.identifier, port))
        })?;

        Ok(DatabaseHandle {
            identifier: spec.identifier.clone(),
            endpoint_address: endpoint.address().unwrap_or_default().to_string(),
            endpoint_port,
            security_group_id: group.group_id,
        })
    }

    async fn allow_database_access(
        &self,
        database: &DatabaseHandle,
        from_group: &SecurityGroupHandle,
    ) -> Result<(), BackendError> {
        let db_group = SecurityGroupHandle {
            group_id: database.security_group_id.clone(),
        };
        self.authorize_ingress_from_group(
            &db_group,
            &from_group.group_id,
            database.endpoint_port,
            "Database access from the service",
        )
        .await
    }
}
