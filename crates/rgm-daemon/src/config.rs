//! Configuration for rgmd

use std::path::PathBuf;

use rgm_depends::PlannerConfig;
use rgm_restree::AgentSettings;
use serde::{Deserialize, Serialize};

/// Main daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Local node identity
    #[serde(default)]
    pub node: NodeConfig,

    /// Transition planner tuning
    #[serde(default)]
    pub planner: PlannerConfig,

    /// Group worker limits
    #[serde(default)]
    pub threads: ThreadsConfig,

    /// Reconciliation loop
    #[serde(default)]
    pub reconcile: ReconcileConfig,

    /// Resource agent locations
    #[serde(default)]
    pub agents: AgentSettings,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Local node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// This node's cluster id
    #[serde(default = "default_node_id")]
    pub id: u32,

    /// Cluster configuration file
    #[serde(default)]
    pub cluster_file: Option<PathBuf>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            id: default_node_id(),
            cluster_file: None,
        }
    }
}

/// Group worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadsConfig {
    /// Status checks allowed to be pending per group
    #[serde(default = "default_status_queue_max")]
    pub status_queue_max: usize,
}

impl Default for ThreadsConfig {
    fn default() -> Self {
        Self {
            status_queue_max: default_status_queue_max(),
        }
    }
}

/// Reconciliation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// Seconds between passes
    #[serde(default = "default_reconcile_interval")]
    pub interval_secs: u64,

    /// Queue status checks for local groups on every tick
    #[serde(default = "default_true")]
    pub status_checks: bool,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_reconcile_interval(),
            status_checks: true,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// Default value helpers
fn default_true() -> bool {
    true
}

fn default_node_id() -> u32 {
    1
}

fn default_status_queue_max() -> usize {
    1
}

fn default_reconcile_interval() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

impl DaemonConfig {
    /// Load configuration: defaults, then the optional file, then `RGM_`
    /// environment variables (`RGM_NODE__ID=2`).
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&DaemonConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("RGM")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = DaemonConfig::default();
        assert_eq!(config.node.id, 1);
        assert_eq!(config.planner.max_iterations, 64);
        assert_eq!(config.threads.status_queue_max, 1);
        assert_eq!(config.reconcile.interval_secs, 10);
        assert_eq!(config.agents.resource_root, PathBuf::from("/usr/share/cluster"));
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_load_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[node]\nid = 3\n\n[planner]\nmax_iterations = 8\n\n[logging]\njson = true"
        )
        .unwrap();

        let config = DaemonConfig::load(file.path().to_str()).unwrap();
        assert_eq!(config.node.id, 3);
        assert_eq!(config.planner.max_iterations, 8);
        assert!(config.logging.json);
        assert_eq!(config.threads.status_queue_max, 1);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = DaemonConfig::load(Some("/nonexistent/rgmd")).unwrap();
        assert_eq!(config.node.id, 1);
    }
}
