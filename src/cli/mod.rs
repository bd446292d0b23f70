//! CLI subcommands — init, validate, plan, deploy, outputs.

use crate::backend::aws::AwsBackend;
use crate::core::{executor, parser, planner, state, types};
use clap::Subcommand;
use std::path::{Path, PathBuf};

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new botadura project
    Init {
        /// Directory to initialize (default: current)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Validate botadura.yaml without touching the provider
    Validate {
        /// Path to botadura.yaml
        #[arg(short, long, default_value = "botadura.yaml")]
        file: PathBuf,
    },

    /// Show what a deploy would do (diff desired vs recorded)
    Plan {
        /// Path to botadura.yaml
        #[arg(short, long, default_value = "botadura.yaml")]
        file: PathBuf,

        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,
    },

    /// Materialize the deployment
    Deploy {
        /// Path to botadura.yaml
        #[arg(short, long, default_value = "botadura.yaml")]
        file: PathBuf,

        /// Re-materialize every stage, ignoring the record
        #[arg(long)]
        force: bool,

        /// Show the plan without issuing any provider call
        #[arg(long)]
        dry_run: bool,

        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,
    },

    /// Print the exported identifiers of the last deploy
    Outputs {
        /// Environment to read
        #[arg(short, long)]
        environment: String,

        /// Emit JSON instead of KEY=value lines
        #[arg(long)]
        json: bool,

        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,
    },
}

/// Dispatch a CLI command.
pub async fn dispatch(cmd: Commands) -> Result<(), String> {
    match cmd {
        Commands::Init { path } => cmd_init(&path),
        Commands::Validate { file } => cmd_validate(&file),
        Commands::Plan { file, state_dir } => cmd_plan(&file, &state_dir),
        Commands::Deploy {
            file,
            force,
            dry_run,
            state_dir,
        } => cmd_deploy(&file, &state_dir, force, dry_run).await,
        Commands::Outputs {
            environment,
            json,
            state_dir,
        } => cmd_outputs(&state_dir, &environment, json),
    }
}

fn cmd_init(path: &Path) -> Result<(), String> {
    let config_path = path.join("botadura.yaml");
    if config_path.exists() {
        return Err(format!("{} already exists", config_path.display()));
    }

    let state_dir = path.join("state");
    std::fs::create_dir_all(&state_dir).map_err(|e| format!("cannot create state dir: {}", e))?;

    let template = r#"version: "1.0"
name: my-service
environment: staging
termination_protection: false

params: {}

network:
  vpc_id: vpc-replace-me
  alb_security_group_id: sg-replace-me
  target_group_arn: arn:aws:elasticloadbalancing:replace-me

service:
  container_port: 8080

task:
  image: registry.example.com/my-service:latest
"#;
    std::fs::write(&config_path, template)
        .map_err(|e| format!("cannot write {}: {}", config_path.display(), e))?;

    println!("Initialized botadura project at {}", path.display());
    println!("  Created: {}", config_path.display());
    println!("  Created: {}/", state_dir.display());
    Ok(())
}

fn cmd_validate(file: &Path) -> Result<(), String> {
    let config = parser::parse_config_file(file)?;
    let errors = parser::validate_config(&config);

    if errors.is_empty() {
        let stages = if config.database.is_some() { 9 } else { 7 };
        println!(
            "OK: {} / {} ({} stages)",
            config.name, config.environment, stages
        );
        Ok(())
    } else {
        for e in &errors {
            eprintln!("  ERROR: {}", e);
        }
        Err(format!("{} validation error(s)", errors.len()))
    }
}

/// Parse and validate a config file, then build the pending deployment.
fn load_pending(file: &Path) -> Result<executor::PendingDeployment, String> {
    let config = parser::parse_config_file(file)?;
    let errors = parser::validate_config(&config);
    if !errors.is_empty() {
        for e in &errors {
            eprintln!("  ERROR: {}", e);
        }
        return Err("validation failed".to_string());
    }
    executor::build(&config)
}

fn cmd_plan(file: &Path, state_dir: &Path) -> Result<(), String> {
    let pending = load_pending(file)?;
    let record = state::load_record(state_dir, &pending.environment)?;
    let plan = planner::plan(&pending, record.as_ref());
    print_plan(&plan);
    Ok(())
}

/// Display a plan to stdout.
fn print_plan(plan: &types::DeploymentPlan) {
    println!(
        "Planning: {} / {} ({} stages)",
        plan.name,
        plan.environment,
        plan.changes.len()
    );
    println!();

    for change in &plan.changes {
        let symbol = match change.action {
            types::PlanAction::Create => "+",
            types::PlanAction::Update => "~",
            types::PlanAction::Resolve => "R",
            types::PlanAction::NoOp => " ",
        };
        println!("  {} {}", symbol, change.description);
    }

    println!();
    println!(
        "Plan: {} to add, {} to change, {} to resolve, {} unchanged.",
        plan.to_create, plan.to_update, plan.to_resolve, plan.unchanged
    );
}

async fn cmd_deploy(
    file: &Path,
    state_dir: &Path,
    force: bool,
    dry_run: bool,
) -> Result<(), String> {
    let pending = load_pending(file)?;
    let record = state::load_record(state_dir, &pending.environment)?;
    let plan = planner::plan(&pending, record.as_ref());
    print_plan(&plan);

    if dry_run {
        println!();
        println!("Dry run — no changes applied.");
        return Ok(());
    }

    let backend = AwsBackend::from_env().await;
    let outcome = executor::materialize(
        &pending,
        &backend,
        &executor::MaterializeOptions { state_dir, force },
    )
    .await
    .map_err(|e| e.to_string())?;

    println!();
    println!(
        "Deploy complete: {} materialized, {} unchanged ({:.1}s)",
        outcome.stages_materialized,
        outcome.stages_skipped,
        outcome.total_duration.as_secs_f64()
    );
    if outcome.resolved.log_group.created {
        println!("  Created log group {}", outcome.resolved.log_group.handle.name);
    } else {
        println!("  Bound existing log group {}", outcome.resolved.log_group.handle.name);
    }
    println!("  ClusterName={}", outcome.resolved.exports.cluster_name);
    println!("  ServiceName={}", outcome.resolved.exports.service_name);
    Ok(())
}

fn cmd_outputs(state_dir: &Path, environment: &str, json: bool) -> Result<(), String> {
    let record = state::load_record(state_dir, environment)?
        .ok_or_else(|| format!("no deployment record for environment '{}'", environment))?;
    let exports = record
        .exports
        .ok_or_else(|| format!("no exports recorded for environment '{}'", environment))?;

    if json {
        let rendered = serde_json::to_string_pretty(&exports)
            .map_err(|e| format!("serialize error: {}", e))?;
        println!("{}", rendered);
    } else {
        println!("ClusterName={}", exports.cluster_name);
        println!("ServiceName={}", exports.service_name);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::DeploymentExports;

    const VALID_YAML: &str = r#"
version: "1.0"
name: aston-bot
environment: prod
network:
  vpc_id: vpc-0aa11bb22cc33dd44
  alb_security_group_id: sg-0123456789abcdef0
  target_group_arn: arn:aws:elasticloadbalancing:us-east-1:123456789012:targetgroup/bot/abc
service:
  container_port: 8443
task:
  image: registry.example.com/aston-bot:latest
"#;

    #[test]
    fn test_init() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("new-project");
        std::fs::create_dir_all(&sub).unwrap();
        cmd_init(&sub).unwrap();
        assert!(sub.join("botadura.yaml").exists());
        assert!(sub.join("state").is_dir());

        // The template itself validates.
        cmd_validate(&sub.join("botadura.yaml")).unwrap();
    }

    #[test]
    fn test_init_already_exists() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("botadura.yaml"), "exists").unwrap();
        let result = cmd_init(dir.path());
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_valid() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("botadura.yaml");
        std::fs::write(&config, VALID_YAML).unwrap();
        cmd_validate(&config).unwrap();
    }

    #[test]
    fn test_validate_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("botadura.yaml");
        std::fs::write(
            &config,
            VALID_YAML.replace("version: \"1.0\"", "version: \"2.0\""),
        )
        .unwrap();
        let result = cmd_validate(&config);
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("validation error"));
    }

    #[test]
    fn test_plan_fresh_state() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("botadura.yaml");
        std::fs::write(&config, VALID_YAML).unwrap();
        let state = dir.path().join("state");
        std::fs::create_dir_all(&state).unwrap();
        cmd_plan(&config, &state).unwrap();
    }

    #[test]
    fn test_plan_validation_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("botadura.yaml");
        std::fs::write(&config, VALID_YAML.replace("environment: prod", "environment: \"\"")).unwrap();
        let result = cmd_plan(&config, &dir.path().join("state"));
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("validation"));
    }

    #[tokio::test]
    async fn test_deploy_dry_run_issues_no_calls() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("botadura.yaml");
        std::fs::write(&config, VALID_YAML).unwrap();
        let state = dir.path().join("state");
        std::fs::create_dir_all(&state).unwrap();

        cmd_deploy(&config, &state, false, true).await.unwrap();

        // No record written by a dry run.
        assert!(state::load_record(&state, "prod").unwrap().is_none());
    }

    #[test]
    fn test_outputs_missing_record() {
        let dir = tempfile::tempdir().unwrap();
        let result = cmd_outputs(dir.path(), "prod", false);
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("no deployment record"));
    }

    #[test]
    fn test_outputs_plain_and_json() {
        let dir = tempfile::tempdir().unwrap();
        let mut record = state::new_record("aston-bot", "prod");
        record.exports = Some(DeploymentExports {
            cluster_name: "prod".to_string(),
            service_name: "aston-bot-prod".to_string(),
        });
        state::save_record(dir.path(), &record).unwrap();

        cmd_outputs(dir.path(), "prod", false).unwrap();
        cmd_outputs(dir.path(), "prod", true).unwrap();
    }

    #[test]
    fn test_outputs_without_exports() {
        let dir = tempfile::tempdir().unwrap();
        let record = state::new_record("aston-bot", "prod");
        state::save_record(dir.path(), &record).unwrap();
        let result = cmd_outputs(dir.path(), "prod", false);
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("no exports"));
    }

    #[tokio::test]
    async fn test_dispatch_init_and_validate() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("dispatch-test");
        std::fs::create_dir_all(&sub).unwrap();
        dispatch(Commands::Init { path: sub.clone() }).await.unwrap();
        dispatch(Commands::Validate {
            file: sub.join("botadura.yaml"),
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_dispatch_plan() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("botadura.yaml");
        std::fs::write(&config, VALID_YAML).unwrap();
        dispatch(Commands::Plan {
            file: config,
            state_dir: dir.path().join("state"),
        })
        .await
        .unwrap();
    }
}
