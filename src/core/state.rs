//! Deployment record management — load, save (atomic), path derivation.

use super::types::DeploymentRecord;
use chrono::Utc;
use std::path::{Path, PathBuf};

/// Generate an ISO 8601 UTC timestamp.
pub fn now_iso8601() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Derive the record path for an environment within the state directory.
pub fn record_path(state_dir: &Path, environment: &str) -> PathBuf {
    state_dir.join(environment).join("deployment.lock.yaml")
}

/// Load the record for an environment. Returns None if the file doesn't exist.
pub fn load_record(state_dir: &Path, environment: &str) -> Result<Option<DeploymentRecord>, String> {
    let path = record_path(state_dir, environment);
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    let record: DeploymentRecord = serde_yaml_ng::from_str(&content)
        .map_err(|e| format!("invalid record file {}: {}", path.display(), e))?;
    Ok(Some(record))
}

/// Save a record atomically (write to temp, then rename).
pub fn save_record(state_dir: &Path, record: &DeploymentRecord) -> Result<(), String> {
    let path = record_path(state_dir, &record.environment);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("cannot create dir {}: {}", parent.display(), e))?;
    }

    let yaml = serde_yaml_ng::to_string(record).map_err(|e| format!("serialize error: {}", e))?;

    let tmp_path = path.with_extension("yaml.tmp");
    std::fs::write(&tmp_path, &yaml)
        .map_err(|e| format!("cannot write {}: {}", tmp_path.display(), e))?;
    std::fs::rename(&tmp_path, &path).map_err(|e| {
        format!(
            "cannot rename {} → {}: {}",
            tmp_path.display(),
            path.display(),
            e
        )
    })?;

    Ok(())
}

/// Create a new empty record for an environment.
pub fn new_record(name: &str, environment: &str) -> DeploymentRecord {
    DeploymentRecord {
        schema: "1.0".to_string(),
        name: name.to_string(),
        environment: environment.to_string(),
        generated_at: now_iso8601(),
        generator: format!("botadura {}", env!("CARGO_PKG_VERSION")),
        stages: indexmap::IndexMap::new(),
        exports: None,
    }
}
