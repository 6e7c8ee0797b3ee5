//! Daemon configuration loading

use anyhow::{Context, Result};
use rebalancer_lib::RebalancerConfig;
use std::path::{Path, PathBuf};

/// Environment variable naming an optional config file
pub const CONFIG_FILE_ENV: &str = "REBALANCER_CONFIG";

/// Load configuration from the file named by `REBALANCER_CONFIG` (if any)
/// and `REBALANCER_*` environment variables
///
/// Nested keys use `__`, e.g. `REBALANCER_SCALING__CPU_THRESHOLD=75`.
pub fn load() -> Result<RebalancerConfig> {
    let file = std::env::var_os(CONFIG_FILE_ENV).map(PathBuf::from);
    load_from(file.as_deref())
}

pub fn load_from(file: Option<&Path>) -> Result<RebalancerConfig> {
    let mut builder = config::Config::builder();
    if let Some(path) = file {
        builder = builder.add_source(config::File::from(path).required(true));
    }

    let config = builder
        .add_source(
            config::Environment::with_prefix("REBALANCER")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .context("Failed to read configuration")?;

    config
        .try_deserialize()
        .context("Invalid rebalancer configuration")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rebalancer_lib::config::RunMode;
    use std::io::Write;

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
mode = "production"
api_port = 9100

[rebalance]
max_pods_per_cycle = 4
fallback_node = "aks-regular-1"

[[schedule.windows]]
name = "all-day"
start = "00:00"
end = "00:00"
min_replicas = 2
max_replicas = 4
"#
        )
        .unwrap();

        let config = load_from(Some(file.path())).unwrap();
        assert_eq!(config.mode, RunMode::Production);
        assert_eq!(config.api_port, 9100);
        assert_eq!(config.rebalance.max_pods_per_cycle, 4);
        assert_eq!(config.rebalance.fallback_node.as_deref(), Some("aks-regular-1"));
        assert_eq!(config.rebalance.interval_secs, 30);
        assert_eq!(config.schedule.windows.len(), 1);
        assert!(config.schedule.policy().is_ok());
    }

    #[test]
    fn test_env_override_uses_section_separator() {
        // no other test reads node_pool, so the variable cannot leak into them
        std::env::set_var("REBALANCER_SCALING__NODE_POOL", "batch");
        let config = load_from(None).unwrap();
        std::env::remove_var("REBALANCER_SCALING__NODE_POOL");

        assert_eq!(config.scaling.node_pool, "batch");
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(load_from(Some(Path::new("/nonexistent/rebalancer.toml"))).is_err());
    }

    #[test]
    fn test_bad_value_is_an_error() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"mode": "chaos"}}"#).unwrap();

        assert!(load_from(Some(file.path())).is_err());
    }
}
