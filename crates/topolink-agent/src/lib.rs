//! # topolink-agent
//!
//! Node agent (topolinkd daemon) for topolink.
//!
//! This crate provides the broker that runs on each node: it enumerates the
//! local accelerators, builds the interconnect topology, serves the
//! device-plugin protocol over a Unix socket, registers with the cluster
//! orchestrator, and streams health transitions to the active watcher.

pub mod agent;
pub mod config;
pub mod plugin;
pub mod registry;

// Re-export commonly used types
pub use agent::{Agent, AgentBuilder};
pub use config::AgentConfig;
pub use plugin::{PluginServer, PluginState};
pub use registry::DeviceRegistry;

// Error handling
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Plugin error: {0}")]
    Plugin(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("gRPC error: {0}")]
    Grpc(#[from] tonic::Status),

    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Core error: {0}")]
    Core(#[from] topolink_core::CoreError),

    #[error("Inventory error: {0}")]
    Inventory(#[from] topolink_inventory::InventoryError),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, AgentError>;

/// Initialize the agent with logging and tracing
pub async fn init_agent(config: &AgentConfig) -> Result<Agent> {
    init_logging(&config.logging)?;

    tracing::info!("Initializing topolink agent: {}", config.agent.name);

    let agent = AgentBuilder::new()
        .with_config(config.clone())
        .build()
        .await?;

    Ok(agent)
}

/// Initialize logging and tracing
fn init_logging(logging_config: &config::LoggingConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging_config.level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(logging_config.show_target)
        .with_thread_ids(logging_config.show_thread_ids)
        .with_line_number(logging_config.show_line_numbers);

    match logging_config.format.as_str() {
        "json" => subscriber.json().init(),
        _ => subscriber.init(),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_config_creation() {
        let config = AgentConfig::default();
        assert!(!config.agent.name.is_empty());
        assert!(!config.agent.resource_name.is_empty());
    }

    #[tokio::test]
    async fn test_agent_builder_from_default_config() {
        let agent = AgentBuilder::new()
            .with_config(AgentConfig::default())
            .build()
            .await
            .unwrap();

        assert_eq!(agent.config().agent.name, "topolink-agent");
    }
}
