//! YAML parsing and validation.
//!
//! Parses botadura.yaml and validates structural constraints:
//! - Version must be "1.0"
//! - Names and identifiers must be non-empty and within charset
//! - Ports, replica counts, and storage bounds must be sane

use super::types::*;
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

/// Validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

fn push_error(errors: &mut Vec<ValidationError>, message: String) {
    errors.push(ValidationError { message });
}

/// Charset the provider accepts for log-group names.
fn log_group_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_/.#-]+$").expect("valid pattern"))
}

fn environment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("valid pattern"))
}

/// Parse a botadura.yaml file from disk.
pub fn parse_config_file(path: &Path) -> Result<DeploymentConfig, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    parse_config(&content)
}

/// Parse a botadura.yaml from a string.
pub fn parse_config(yaml: &str) -> Result<DeploymentConfig, String> {
    serde_yaml_ng::from_str(yaml).map_err(|e| format!("YAML parse error: {}", e))
}

/// Validate a parsed config. Returns a list of errors (empty = valid).
pub fn validate_config(config: &DeploymentConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if config.version != "1.0" {
        push_error(
            &mut errors,
            format!("version must be \"1.0\", got \"{}\"", config.version),
        );
    }

    if config.name.is_empty() {
        push_error(&mut errors, "name must not be empty".to_string());
    }

    if config.environment.is_empty() {
        push_error(&mut errors, "environment must not be empty".to_string());
    } else if !environment_re().is_match(&config.environment) {
        push_error(
            &mut errors,
            format!(
                "environment '{}' contains characters outside [A-Za-z0-9_-]",
                config.environment
            ),
        );
    }

    if config.network.vpc_id.is_empty() {
        push_error(&mut errors, "network.vpc_id must not be empty".to_string());
    }
    if config.network.alb_security_group_id.is_empty() {
        push_error(
            &mut errors,
            "network.alb_security_group_id must not be empty".to_string(),
        );
    }
    if config.network.target_group_arn.is_empty() {
        push_error(
            &mut errors,
            "network.target_group_arn must not be empty".to_string(),
        );
    }
    if config.network.ingress_port == 0 {
        push_error(&mut errors, "network.ingress_port must not be 0".to_string());
    }

    if config.service.container_port == 0 {
        push_error(&mut errors, "service.container_port must not be 0".to_string());
    }
    if config.service.desired_count < 1 {
        push_error(
            &mut errors,
            format!(
                "service.desired_count must be at least 1, got {}",
                config.service.desired_count
            ),
        );
    }

    if config.task.image.is_empty() {
        push_error(&mut errors, "task.image must not be empty".to_string());
    }
    if config.task.cpu <= 0 {
        push_error(&mut errors, format!("task.cpu must be positive, got {}", config.task.cpu));
    }
    if config.task.memory_mib <= 0 {
        push_error(
            &mut errors,
            format!("task.memory_mib must be positive, got {}", config.task.memory_mib),
        );
    }
    if config.task.container_name.is_empty() {
        push_error(&mut errors, "task.container_name must not be empty".to_string());
    }

    // The log-group name templates over {{environment}}; validate the
    // literal form against the provider charset, template markers aside.
    if let Some(ref group) = config.logging.group {
        if group.is_empty() {
            push_error(&mut errors, "logging.group must not be empty when set".to_string());
        } else {
            let literal = group.replace("{{", "").replace("}}", "");
            if !log_group_name_re().is_match(&literal) {
                push_error(
                    &mut errors,
                    format!("logging.group '{}' contains characters outside [A-Za-z0-9_/.#-]", group),
                );
            }
        }
    }

    if let Some(ref db) = config.database {
        if db.instance_class.is_empty() {
            push_error(&mut errors, "database.instance_class must not be empty".to_string());
        }
        if db.name.is_empty() {
            push_error(&mut errors, "database.name must not be empty".to_string());
        }
        if db.username.is_empty() {
            push_error(&mut errors, "database.username must not be empty".to_string());
        }
        if db.allocated_storage_gib <= 0 {
            push_error(
                &mut errors,
                format!(
                    "database.allocated_storage_gib must be positive, got {}",
                    db.allocated_storage_gib
                ),
            );
        }
        if db.max_allocated_storage_gib < db.allocated_storage_gib {
            push_error(
                &mut errors,
                format!(
                    "database.max_allocated_storage_gib ({}) is below allocated_storage_gib ({})",
                    db.max_allocated_storage_gib, db.allocated_storage_gib
                ),
            );
        }
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;

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
database:
  instance_class: db.t3.micro
  name: mydatabase
  username: admin
"#;

    #[test]
    fn test_parse_valid() {
        let config = parse_config(VALID_YAML).unwrap();
        let errors = validate_config(&config);
        assert!(
            errors.is_empty(),
            "unexpected errors: {:?}",
            errors.iter().map(|e| &e.message).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_bad_version() {
        let mut config = parse_config(VALID_YAML).unwrap();
        config.version = "2.0".to_string();
        let errors = validate_config(&config);
        assert!(errors.iter().any(|e| e.message.contains("version")));
    }

    #[test]
    fn test_empty_environment() {
        let mut config = parse_config(VALID_YAML).unwrap();
        config.environment = String::new();
        let errors = validate_config(&config);
        assert!(errors.iter().any(|e| e.message.contains("environment")));
    }

    #[test]
    fn test_environment_charset() {
        let mut config = parse_config(VALID_YAML).unwrap();
        config.environment = "prod east".to_string();
        let errors = validate_config(&config);
        assert!(errors.iter().any(|e| e.message.contains("characters outside")));
    }

    #[test]
    fn test_zero_container_port() {
        let mut config = parse_config(VALID_YAML).unwrap();
        config.service.container_port = 0;
        let errors = validate_config(&config);
        assert!(errors.iter().any(|e| e.message.contains("container_port")));
    }

    #[test]
    fn test_desired_count_below_one() {
        let mut config = parse_config(VALID_YAML).unwrap();
        config.service.desired_count = 0;
        let errors = validate_config(&config);
        assert!(errors.iter().any(|e| e.message.contains("desired_count")));
    }

    #[test]
    fn test_empty_image() {
        let mut config = parse_config(VALID_YAML).unwrap();
        config.task.image = String::new();
        let errors = validate_config(&config);
        assert!(errors.iter().any(|e| e.message.contains("task.image")));
    }

    #[test]
    fn test_log_group_charset() {
        let mut config = parse_config(VALID_YAML).unwrap();
        config.logging.group = Some("/aws/ecs/prod logs".to_string());
        let errors = validate_config(&config);
        assert!(errors.iter().any(|e| e.message.contains("logging.group")));
    }

    #[test]
    fn test_log_group_template_markers_allowed() {
        let mut config = parse_config(VALID_YAML).unwrap();
        config.logging.group = Some("/aws/ecs/{{environment}}".to_string());
        let errors = validate_config(&config);
        assert!(errors.is_empty());
    }

    #[test]
    fn test_storage_bounds() {
        let mut config = parse_config(VALID_YAML).unwrap();
        let db = config.database.as_mut().unwrap();
        db.allocated_storage_gib = 200;
        db.max_allocated_storage_gib = 100;
        let errors = validate_config(&config);
        assert!(errors.iter().any(|e| e.message.contains("max_allocated_storage_gib")));
    }

    #[test]
    fn test_database_required_fields() {
        let mut config = parse_config(VALID_YAML).unwrap();
        let db = config.database.as_mut().unwrap();
        db.username = String::new();
        let errors = validate_config(&config);
        assert!(errors.iter().any(|e| e.message.contains("database.username")));
    }

    #[test]
    fn test_parse_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("botadura.yaml");
        std::fs::write(&path, VALID_YAML).unwrap();
        let config = parse_config_file(&path).unwrap();
        assert_eq!(config.name, "aston-bot");
    }

    #[test]
    fn test_parse_missing_file() {
        let result = parse_config_file(Path::new("/nonexistent/botadura.yaml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_invalid_yaml() {
        let result = parse_config("not: [valid: yaml: {{");
        assert!(result.is_err());
    }
}
