//! Conductor configuration — on-disk TOML, parsed with pure functions and
//! a thin I/O wrapper (the teacher's `load_composition_file` boundary:
//! `std::fs::read_to_string` + `from_str`, kept separate so parsing stays
//! unit-testable without a filesystem).

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConductorSection {
    pub workers_pool_size: usize,
    pub shutdown_timeout_secs: u64,
    pub graceful_shutdown_timeout_secs: u64,
    pub drain_shutdown_timeout_secs: u64,
    pub hash_ring_reset_interval_secs: u64,
    pub automated_clean: bool,
    pub poweroff_in_cleanfail: bool,
    pub power_state_sync_max_retries: u32,
    pub conductor_group: String,
    pub enabled_drivers: Vec<String>,
}

impl Default for ConductorSection {
    fn default() -> Self {
        Self {
            workers_pool_size: 100,
            shutdown_timeout_secs: 60,
            graceful_shutdown_timeout_secs: 60,
            drain_shutdown_timeout_secs: 300,
            hash_ring_reset_interval_secs: 60,
            automated_clean: true,
            poweroff_in_cleanfail: false,
            power_state_sync_max_retries: 3,
            conductor_group: "default".to_string(),
            enabled_drivers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsSection {
    pub backend: MetricsBackendKind,
    pub statsd_target: Option<String>,
    pub statsd_prefix: String,
}

impl Default for MetricsSection {
    fn default() -> Self {
        Self { backend: MetricsBackendKind::Noop, statsd_target: None, statsd_prefix: "conductor".to_string() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MetricsBackendKind {
    #[default]
    Noop,
    InProcess,
    Statsd,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConductorConfig {
    #[serde(default)]
    pub conductor: ConductorSection,
    #[serde(default)]
    pub metrics: MetricsSection,
}

/// Pure parse function — no I/O, directly unit-testable.
pub fn parse_config(raw: &str) -> Result<ConductorConfig, ConfigError> {
    Ok(toml::from_str(raw)?)
}

/// I/O boundary: read the file, delegate to `parse_config`.
pub fn load_config_file(path: &Path) -> Result<ConductorConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_empty() {
        let config = parse_config("").unwrap();
        assert_eq!(config.conductor.workers_pool_size, 100);
        assert_eq!(config.conductor.conductor_group, "default");
    }

    #[test]
    fn test_parses_overrides() {
        let toml = r#"
            [conductor]
            workers_pool_size = 50
            automated_clean = false
            enabled_drivers = ["redfish", "ipmi"]

            [metrics]
            backend = "statsd"
            statsd_target = "127.0.0.1:8125"
        "#;
        let config = parse_config(toml).unwrap();
        assert_eq!(config.conductor.workers_pool_size, 50);
        assert!(!config.conductor.automated_clean);
        assert_eq!(config.conductor.enabled_drivers, vec!["redfish", "ipmi"]);
        assert_eq!(config.metrics.backend, MetricsBackendKind::Statsd);
    }

    #[test]
    fn test_rejects_malformed_toml() {
        assert!(parse_config("not = [valid").is_err());
    }

    #[test]
    fn test_load_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        use std::io::Write;
        write!(file, "[conductor]\nworkers_pool_size = 7\n").unwrap();
        let config = load_config_file(file.path()).unwrap();
        assert_eq!(config.conductor.workers_pool_size, 7);
    }
}
