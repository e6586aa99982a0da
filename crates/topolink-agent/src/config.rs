//! Configuration management for the topolink agent

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use topolink_core::StrategyKind;
use topolink_inventory::InventoryConfig;

/// Environment variable overriding the advertised resource name
pub const ENV_RESOURCE_NAME: &str = "TOPOLINK_RESOURCE_NAME";

/// Environment variable disabling health checking; the value `all`
/// disables the error watcher entirely
pub const ENV_DISABLE_HEALTH_CHECKS: &str = "TOPOLINK_DISABLE_HEALTH_CHECKS";

/// Environment variable carrying the host identity used when topology
/// metadata is published externally
pub const ENV_HOST_NAME: &str = "TOPOLINK_HOST_NAME";

/// Complete configuration for the topolink agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Agent identity configuration
    pub agent: AgentSpecificConfig,

    /// Device plugin configuration
    pub plugin: PluginConfig,

    /// Inventory configuration
    pub inventory: InventoryConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Agent identity configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSpecificConfig {
    /// Agent name/identifier
    pub name: String,

    /// Resource category label advertised to the orchestrator
    pub resource_name: String,

    /// Host identity used when publishing topology metadata externally
    pub host_name: Option<String>,
}

/// Device plugin configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginConfig {
    /// Directory holding the plugin and registry sockets
    pub socket_dir: PathBuf,

    /// File name of this broker's socket inside the socket directory
    pub endpoint: String,

    /// File name of the orchestrator's registration socket inside the
    /// socket directory
    pub registry_endpoint: String,

    /// Selection strategy answering pre-allocation hints
    pub strategy: StrategyKind,

    /// Self-connect probe and registration dial timeout (seconds)
    pub probe_timeout_seconds: u64,

    /// Capacity of the bounded health-event channel
    pub health_channel_capacity: usize,
}

impl PluginConfig {
    /// Full path of this broker's socket
    pub fn socket_path(&self) -> PathBuf {
        self.socket_dir.join(&self.endpoint)
    }

    /// Full path of the orchestrator's registration socket
    pub fn registry_socket_path(&self) -> PathBuf {
        self.socket_dir.join(&self.registry_endpoint)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,

    /// Show target in logs
    pub show_target: bool,

    /// Show thread IDs in logs
    pub show_thread_ids: bool,

    /// Show line numbers in logs
    pub show_line_numbers: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            agent: AgentSpecificConfig::default(),
            plugin: PluginConfig::default(),
            inventory: InventoryConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for AgentSpecificConfig {
    fn default() -> Self {
        Self {
            name: "topolink-agent".to_string(),
            resource_name: "topolink.io/accel".to_string(),
            host_name: None,
        }
    }
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            socket_dir: PathBuf::from("/var/lib/topolink/device-plugins"),
            endpoint: "topolink.sock".to_string(),
            registry_endpoint: "registry.sock".to_string(),
            strategy: StrategyKind::EdgeGreedy,
            probe_timeout_seconds: 5,
            health_channel_capacity: 16,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
            show_target: true,
            show_thread_ids: false,
            show_line_numbers: false,
        }
    }
}

impl AgentConfig {
    /// Load configuration from a file
    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::AgentError::Config(format!("Failed to read config file: {}", e)))?;

        let config: AgentConfig = serde_yaml::from_str(&content)
            .map_err(|e| crate::AgentError::Config(format!("Failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn to_file<P: AsRef<std::path::Path>>(&self, path: P) -> crate::Result<()> {
        let content = serde_yaml::to_string(self)
            .map_err(|e| crate::AgentError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| crate::AgentError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Fold the process environment into the configuration.
    ///
    /// Environment values win over file values.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(resource) = std::env::var(ENV_RESOURCE_NAME) {
            if !resource.is_empty() {
                self.agent.resource_name = resource;
            }
        }

        if let Ok(value) = std::env::var(ENV_DISABLE_HEALTH_CHECKS) {
            if value.eq_ignore_ascii_case("all") {
                self.inventory.disable_health_events = true;
            }
        }

        if let Ok(host) = std::env::var(ENV_HOST_NAME) {
            if !host.is_empty() {
                self.agent.host_name = Some(host);
            }
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.agent.name.is_empty() {
            return Err(crate::AgentError::Config(
                "Agent name cannot be empty".to_string(),
            ));
        }

        if self.agent.resource_name.is_empty() {
            return Err(crate::AgentError::Config(
                "Resource name cannot be empty".to_string(),
            ));
        }

        if self.plugin.endpoint.is_empty() || self.plugin.registry_endpoint.is_empty() {
            return Err(crate::AgentError::Config(
                "Socket endpoints cannot be empty".to_string(),
            ));
        }

        if self.plugin.endpoint == self.plugin.registry_endpoint {
            return Err(crate::AgentError::Config(
                "Plugin and registry endpoints must differ".to_string(),
            ));
        }

        if self.plugin.probe_timeout_seconds == 0 {
            return Err(crate::AgentError::Config(
                "Probe timeout must be greater than 0".to_string(),
            ));
        }

        if self.plugin.health_channel_capacity == 0 {
            return Err(crate::AgentError::Config(
                "Health channel capacity must be greater than 0".to_string(),
            ));
        }

        self.inventory
            .validate()
            .map_err(crate::AgentError::Config)?;

        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(crate::AgentError::Config(format!(
                    "Invalid log level: {}",
                    self.logging.level
                )))
            }
        }

        match self.logging.format.as_str() {
            "text" | "json" => {}
            _ => {
                return Err(crate::AgentError::Config(format!(
                    "Invalid log format: {}",
                    self.logging.format
                )))
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_agent_config_default() {
        let config = AgentConfig::default();
        assert_eq!(config.agent.name, "topolink-agent");
        assert_eq!(config.plugin.strategy, StrategyKind::EdgeGreedy);
        config.validate().unwrap();
    }

    #[test]
    fn test_socket_paths() {
        let config = AgentConfig::default();
        assert!(config.plugin.socket_path().ends_with("topolink.sock"));
        assert!(config
            .plugin
            .registry_socket_path()
            .ends_with("registry.sock"));
    }

    #[test]
    fn test_agent_config_validation() {
        let mut config = AgentConfig::default();

        config.agent.name = String::new();
        assert!(config.validate().is_err());

        config.agent.name = "test".to_string();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());

        config.logging.level = "info".to_string();
        config.plugin.registry_endpoint = config.plugin.endpoint.clone();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_file_operations() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let mut config = AgentConfig::default();
        config.plugin.strategy = StrategyKind::ScoreGraph;

        config.to_file(&config_path).unwrap();
        let loaded = AgentConfig::from_file(&config_path).unwrap();

        assert_eq!(loaded.agent.name, config.agent.name);
        assert_eq!(loaded.plugin.strategy, StrategyKind::ScoreGraph);
        assert_eq!(loaded.inventory.device_count, config.inventory.device_count);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = AgentConfig::default();

        std::env::set_var(ENV_RESOURCE_NAME, "vendor.example/npu");
        std::env::set_var(ENV_DISABLE_HEALTH_CHECKS, "all");
        std::env::set_var(ENV_HOST_NAME, "node-17");

        config.apply_env_overrides();

        assert_eq!(config.agent.resource_name, "vendor.example/npu");
        assert!(config.inventory.disable_health_events);
        assert_eq!(config.agent.host_name.as_deref(), Some("node-17"));

        std::env::remove_var(ENV_RESOURCE_NAME);
        std::env::remove_var(ENV_DISABLE_HEALTH_CHECKS);
        std::env::remove_var(ENV_HOST_NAME);
    }
}
