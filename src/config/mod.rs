//! Runtime configuration
//!
//! Loaded from a YAML file; every field has a default so an empty file (or no
//! file at all) yields a working local setup.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors for file I/O operations (separate from pure parsing errors)
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    ParseError(#[from] serde_yaml::Error),
}

/// Top-level runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Identifier of this cluster, used as delegation provenance
    pub cluster_id: String,

    /// Namespace holding service definitions and invocation jobs
    pub services_namespace: String,

    /// Container environment variable carrying the original event payload
    pub event_variable: String,

    /// Seconds between capacity snapshot refreshes
    pub tracker_interval_secs: u64,

    /// Seconds between pending-pod rescue scans
    pub rescue_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cluster_id: "local".to_string(),
            services_namespace: "faasmesh-svc".to_string(),
            event_variable: "EVENT".to_string(),
            tracker_interval_secs: 30,
            rescue_interval_secs: 60,
        }
    }
}

/// Load a configuration file from disk
pub fn load_config_file(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config = serde_yaml::from_str(&content)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_config_file() {
        let content = "cluster_id: edge-1\nrescue_interval_secs: 15\n";
        let file = create_temp_file(content);

        let config = load_config_file(file.path()).unwrap();
        assert_eq!(config.cluster_id, "edge-1");
        assert_eq!(config.rescue_interval_secs, 15);
        // Unset fields keep their defaults
        assert_eq!(config.services_namespace, "faasmesh-svc");
        assert_eq!(config.tracker_interval_secs, 30);
    }

    #[test]
    fn test_empty_file_is_all_defaults() {
        let file = create_temp_file("{}");
        let config = load_config_file(file.path()).unwrap();
        assert_eq!(config.cluster_id, "local");
        assert_eq!(config.event_variable, "EVENT");
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = load_config_file(Path::new("/nonexistent/config.yaml"));
        assert!(matches!(result, Err(ConfigError::IoError(_))));
    }

    #[test]
    fn test_invalid_yaml_rejected() {
        let file = create_temp_file("tracker_interval_secs: soon\n");
        let result = load_config_file(file.path());
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }
}
