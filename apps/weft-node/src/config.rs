//! Node configuration: topology, logging and demo parameters.
//!
//! Layering: built-in defaults → YAML file (from `--config` or the
//! `WEFT_CONFIG` environment variable) → `WEFT__*` environment overrides.

use std::path::{Path, PathBuf};

use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "WEFT_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TopologyConfig {
    /// Number of policy domains to bring up in this process.
    pub domains: u32,
    /// Computation workers per domain.
    pub workers_per_domain: usize,
    /// Per-(src, dst) transport channel capacity.
    pub channel_capacity: usize,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            domains: 2,
            workers_per_domain: 2,
            channel_capacity: 64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing` env-filter expression; `RUST_LOG` wins when set.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    /// Pipeline stages the demo DAG runs across the domains.
    pub rounds: u64,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self { rounds: 8 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub topology: TopologyConfig,
    pub logging: LoggingConfig,
    pub demo: DemoConfig,
}

impl NodeConfig {
    /// Load the layered configuration.
    ///
    /// # Errors
    /// Fails when the selected file exists but does not parse, or when an
    /// override has the wrong shape.
    pub fn load(cli_path: Option<&Path>) -> anyhow::Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(NodeConfig::default()));
        let path = cli_path
            .map(PathBuf::from)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));
        if let Some(path) = path {
            if !path.is_file() {
                anyhow::bail!("config file does not exist: {}", path.display());
            }
            figment = figment.merge(Yaml::file(path));
        }
        figment = figment.merge(Env::prefixed("WEFT__").split("__"));
        let config: NodeConfig = figment.extract()?;
        if config.topology.domains == 0 {
            anyhow::bail!("topology.domains must be at least 1");
        }
        Ok(config)
    }

    /// Render the effective configuration as pretty-printed JSON.
    pub fn to_json(&self) -> anyhow::Result<String> {
        serde_json::to_string_pretty(self).map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = NodeConfig::default();
        assert_eq!(config.topology.domains, 2);
        assert!(config.demo.rounds > 0);
    }

    #[test]
    fn yaml_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "topology:\n  domains: 4\n  workers_per_domain: 1\ndemo:\n  rounds: 3"
        )
        .unwrap();
        let config = NodeConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.topology.domains, 4);
        assert_eq!(config.topology.workers_per_domain, 1);
        assert_eq!(config.demo.rounds, 3);
        // Untouched sections keep their defaults.
        assert_eq!(config.topology.channel_capacity, 64);
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = NodeConfig::load(Some(Path::new("/nonexistent/weft.yaml"))).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn zero_domains_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "topology:\n  domains: 0").unwrap();
        assert!(NodeConfig::load(Some(file.path())).is_err());
    }
}
