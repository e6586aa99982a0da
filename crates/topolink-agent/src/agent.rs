//! Core agent implementation

use crate::config::AgentConfig;
use crate::plugin::PluginServer;
use crate::registry::DeviceRegistry;
use crate::Result;

use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use topolink_core::Topology;
use topolink_inventory::{create_error_source, create_inventory, watch_errors};
use tracing::{info, warn};

/// The main topolink agent
pub struct Agent {
    config: AgentConfig,
    plugin: Option<PluginServer>,
    watcher_task: Option<JoinHandle<()>>,
    watcher_token: CancellationToken,
}

impl Agent {
    pub(crate) fn new(config: AgentConfig) -> Self {
        Self {
            config,
            plugin: None,
            watcher_task: None,
            watcher_token: CancellationToken::new(),
        }
    }

    /// Get the agent configuration
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Enumerate devices, build the topology, and start advertising.
    pub async fn start(&mut self) -> Result<()> {
        info!("Starting topolink agent: {}", self.config.agent.name);

        self.config.validate()?;

        let host = self.config.agent.host_name.clone().unwrap_or_else(|| {
            format!("node-{}", &uuid::Uuid::new_v4().to_string()[..8])
        });

        // Inventory pass: devices plus pairwise interconnect measurements.
        let inventory = create_inventory(&self.config.inventory)?;
        let devices = inventory.enumerate().await?;
        let edges = inventory.measure_topology().await?;
        info!(
            "Inventory on {} found {} devices and {} interconnect edges",
            host,
            devices.len(),
            edges.len()
        );

        // The topology is immutable from here on; rebuilding requires a
        // restart.
        let topology = Topology::from_edges(edges);
        let registry = DeviceRegistry::new(devices.clone());

        let mut plugin = PluginServer::new(
            self.config.plugin.clone(),
            self.config.agent.resource_name.clone(),
            registry,
            topology,
        );
        plugin.serve().await?;

        if self.config.inventory.disable_health_events {
            warn!("Health event watching is disabled");
        } else {
            let source = create_error_source(&self.config.inventory)?;
            let token = CancellationToken::new();
            self.watcher_token = token.clone();
            self.watcher_task = Some(tokio::spawn(watch_errors(
                source,
                devices,
                plugin.health_sender(),
                token,
            )));
        }

        self.plugin = Some(plugin);
        info!("Topolink agent started successfully");
        Ok(())
    }

    /// Stop the agent and all its tasks
    pub async fn stop(&mut self) -> Result<()> {
        info!("Stopping topolink agent");

        self.watcher_token.cancel();
        if let Some(task) = self.watcher_task.take() {
            let _ = task.await;
        }

        if let Some(plugin) = self.plugin.as_mut() {
            plugin.stop().await?;
        }
        self.plugin = None;

        info!("Topolink agent stopped");
        Ok(())
    }

    /// Run the agent until a shutdown signal is received
    pub async fn run(&mut self) -> Result<()> {
        self.start().await?;

        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Received Ctrl+C signal");
            }
            _ = Self::wait_for_termination() => {
                info!("Received termination signal");
            }
        }

        self.stop().await
    }

    /// Wait for termination signals (SIGTERM, SIGINT)
    #[cfg(unix)]
    async fn wait_for_termination() {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    }

    /// Wait for termination signals (non-Unix)
    #[cfg(not(unix))]
    async fn wait_for_termination() {
        let _ = signal::ctrl_c().await;
    }
}

impl Drop for Agent {
    fn drop(&mut self) {
        // Best effort cleanup
        self.watcher_token.cancel();
    }
}

/// Builder for creating agents
pub struct AgentBuilder {
    config: Option<AgentConfig>,
}

impl AgentBuilder {
    /// Create a new agent builder
    pub fn new() -> Self {
        Self { config: None }
    }

    /// Set the agent configuration
    pub fn with_config(mut self, config: AgentConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Build the agent
    pub async fn build(self) -> Result<Agent> {
        let mut config = self.config.unwrap_or_default();
        config.apply_env_overrides();
        config.validate()?;

        Ok(Agent::new(config))
    }
}

impl Default for AgentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::net::UnixListener;
    use tokio_stream::wrappers::UnixListenerStream;
    use tonic::transport::Server;
    use tonic::{Request, Response, Status};
    use topolink_proto::{Empty, RegisterRequest, Registration, RegistrationServer};

    #[derive(Clone, Default)]
    struct AcceptingRegistry;

    #[tonic::async_trait]
    impl Registration for AcceptingRegistry {
        async fn register(
            &self,
            _request: Request<RegisterRequest>,
        ) -> std::result::Result<Response<Empty>, Status> {
            Ok(Response::new(Empty {}))
        }
    }

    fn test_config(dir: &TempDir) -> AgentConfig {
        let mut config = AgentConfig::default();
        config.plugin.socket_dir = dir.path().to_path_buf();
        config.inventory.device_count = 4;
        config
    }

    async fn spawn_registry(dir: &TempDir) -> CancellationToken {
        let listener = UnixListener::bind(dir.path().join("registry.sock")).unwrap();
        let token = CancellationToken::new();
        let shutdown = token.clone();
        tokio::spawn(async move {
            Server::builder()
                .add_service(RegistrationServer::new(AcceptingRegistry))
                .serve_with_incoming_shutdown(
                    UnixListenerStream::new(listener),
                    shutdown.cancelled_owned(),
                )
                .await
                .unwrap();
        });
        token
    }

    #[tokio::test]
    async fn test_agent_lifecycle() {
        let dir = TempDir::new().unwrap();
        let registry_token = spawn_registry(&dir).await;

        let mut agent = Agent::new(test_config(&dir));
        agent.start().await.unwrap();

        // The socket binding exists while serving.
        let socket = agent.config().plugin.socket_path();
        assert!(socket.exists());

        agent.stop().await.unwrap();
        assert!(!socket.exists());

        // Stopping again must not fail.
        agent.stop().await.unwrap();

        registry_token.cancel();
    }

    #[tokio::test]
    async fn test_agent_start_fails_without_registration_endpoint() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir);
        config.plugin.probe_timeout_seconds = 1;

        let mut agent = Agent::new(config);
        let result = tokio::time::timeout(Duration::from_secs(10), agent.start()).await;
        assert!(result.unwrap().is_err());
    }
}
