//! Device plugin server
//!
//! The advertisement state machine: serves the device-plugin protocol over
//! a local Unix socket, registers with the orchestrator, streams the device
//! list and health transitions to the active watcher, and tears down
//! cleanly on stop.
//!
//! Lifecycle: `Stopped → Starting → Serving → Stopped`, restartable.

use crate::config::PluginConfig;
use crate::registry::DeviceRegistry;
use crate::{AgentError, Result};

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::{ReceiverStream, UnixListenerStream};
use tokio_util::sync::CancellationToken;
use tonic::transport::{Channel, Endpoint, Server, Uri};
use tonic::{Request, Response, Status};
use topolink_core::{SelectionStrategy, Topology};
use topolink_inventory::HealthEvent;
use topolink_proto::conversions::devices_to_proto;
use topolink_proto::{
    AllocateRequest, AllocateResponse, ContainerAllocateResponse, DevicePlugin,
    DevicePluginOptions, DevicePluginServer, Empty, ListAndWatchResponse, PreAllocateRequest,
    PreAllocateResponse, PreStartContainerRequest, PreStartContainerResponse,
    RegisterRequest, RegistrationClient, API_VERSION,
};
use tracing::{debug, error, info, warn};

/// Environment variable naming the devices granted to a container
pub const ENV_VISIBLE_DEVICES: &str = "ACCEL_VISIBLE_DEVICES";

/// Capacity of the per-watcher snapshot channel. Sends block when the
/// watcher is slow; transitions are never discarded.
const WATCH_CHANNEL_CAPACITY: usize = 16;

/// Lifecycle state of the plugin server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginState {
    Stopped,
    Starting,
    Serving,
}

type Watcher = mpsc::Sender<std::result::Result<ListAndWatchResponse, Status>>;

/// gRPC service backing the device-plugin protocol.
///
/// Cheap to clone; all state is shared.
#[derive(Clone)]
pub struct DevicePluginService {
    registry: DeviceRegistry,
    topology: Arc<Topology>,
    strategy: Arc<dyn SelectionStrategy>,
    watcher: Arc<Mutex<Option<Watcher>>>,
    shutdown: CancellationToken,
}

impl DevicePluginService {
    fn new(
        registry: DeviceRegistry,
        topology: Arc<Topology>,
        strategy: Arc<dyn SelectionStrategy>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            registry,
            topology,
            strategy,
            watcher: Arc::new(Mutex::new(None)),
            shutdown,
        }
    }

    async fn snapshot_response(&self) -> ListAndWatchResponse {
        ListAndWatchResponse {
            devices: devices_to_proto(&self.registry.snapshot().await),
        }
    }

    /// Consume health events until cancelled.
    ///
    /// The registry mutation happens before the snapshot is taken, so a
    /// watcher always sees the transition it is being notified about.
    /// Exactly one snapshot goes out per actual Healthy→Unhealthy
    /// transition.
    pub(crate) async fn run_health_loop(&self, mut events: mpsc::Receiver<HealthEvent>) {
        info!("Health consumption loop started");

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                event = events.recv() => {
                    let Some(event) = event else { break };
                    match event {
                        HealthEvent::Device(id) => self.handle_unhealthy(&id).await,
                        HealthEvent::All => {
                            for id in self.registry.ids().await {
                                self.handle_unhealthy(&id).await;
                            }
                        }
                    }
                }
            }
        }

        // Drop the watcher so an active stream terminates; nothing may be
        // sent after this point.
        self.watcher.lock().await.take();
        info!("Health consumption loop stopped");
    }

    async fn handle_unhealthy(&self, id: &str) {
        // The watcher lock serializes transitions against watcher
        // registration: a new watcher either sees the transition in its
        // initial snapshot or receives it as an update, never both and
        // never neither.
        let mut watcher = self.watcher.lock().await;

        if !self.registry.mark_unhealthy(id).await {
            return;
        }

        let snapshot = self.snapshot_response().await;
        if let Some(tx) = watcher.as_ref() {
            // A slow watcher blocks the send rather than losing the
            // transition; only a stop may abandon it, because the stream
            // is terminating anyway.
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    watcher.take();
                }
                sent = tx.send(Ok(snapshot)) => {
                    if sent.is_err() {
                        debug!("Watcher disconnected; dropping it");
                        watcher.take();
                    }
                }
            }
        }
    }
}

#[tonic::async_trait]
impl DevicePlugin for DevicePluginService {
    async fn get_device_plugin_options(
        &self,
        _request: Request<Empty>,
    ) -> std::result::Result<Response<DevicePluginOptions>, Status> {
        Ok(Response::new(DevicePluginOptions {
            pre_start_required: false,
            pre_allocate_required: false,
        }))
    }

    type ListAndWatchStream =
        ReceiverStream<std::result::Result<ListAndWatchResponse, Status>>;

    async fn list_and_watch(
        &self,
        _request: Request<Empty>,
    ) -> std::result::Result<Response<Self::ListAndWatchStream>, Status> {
        debug!("Received ListAndWatch request");

        let (tx, rx) = mpsc::channel(WATCH_CHANNEL_CAPACITY);

        // Hold the watcher lock across snapshot and registration so no
        // transition can slip between the initial list and the updates.
        let mut watcher = self.watcher.lock().await;

        let initial = self.snapshot_response().await;
        tx.send(Ok(initial))
            .await
            .map_err(|_| Status::internal("watcher closed before the initial snapshot"))?;

        // Single-watcher protocol: a newcomer replaces the previous
        // watcher, whose stream then terminates.
        if watcher.replace(tx).is_some() {
            warn!("Replacing an existing watcher; the previous stream will terminate");
        }

        Ok(Response::new(ReceiverStream::new(rx)))
    }

    async fn allocate(
        &self,
        request: Request<AllocateRequest>,
    ) -> std::result::Result<Response<AllocateResponse>, Status> {
        let req = request.into_inner();
        debug!(
            "Received Allocate request for {} container(s)",
            req.container_requests.len()
        );

        let mut responses = Vec::with_capacity(req.container_requests.len());
        for container in &req.container_requests {
            for id in &container.device_ids {
                if !self.registry.contains(id).await {
                    return Err(Status::invalid_argument(format!(
                        "invalid allocation request: unknown device: {}",
                        id
                    )));
                }
            }

            let mut envs = HashMap::new();
            envs.insert(
                ENV_VISIBLE_DEVICES.to_string(),
                container.device_ids.join(","),
            );
            responses.push(ContainerAllocateResponse { envs });
        }

        info!("Allocated devices for {} container request(s)", responses.len());
        Ok(Response::new(AllocateResponse {
            container_responses: responses,
        }))
    }

    async fn pre_start_container(
        &self,
        _request: Request<PreStartContainerRequest>,
    ) -> std::result::Result<Response<PreStartContainerResponse>, Status> {
        Ok(Response::new(PreStartContainerResponse {}))
    }

    async fn pre_allocate(
        &self,
        request: Request<PreAllocateRequest>,
    ) -> std::result::Result<Response<PreAllocateResponse>, Status> {
        let req = request.into_inner();
        let requested = req.devices_num as usize;

        if requested == 0 {
            return Err(Status::invalid_argument(
                "requested device count must be positive",
            ));
        }

        let total = self.registry.len().await;
        if requested > total {
            return Err(Status::invalid_argument(format!(
                "requested device count {} exceeds the {} registered devices",
                requested, total
            )));
        }

        for id in &req.usable_device_ids {
            if !self.registry.contains(id).await {
                return Err(Status::invalid_argument(format!(
                    "invalid pre-allocation request: unknown device: {}",
                    id
                )));
            }
        }

        let selected = self
            .strategy
            .select(requested, &req.usable_device_ids, &self.topology)
            .map_err(|e| Status::invalid_argument(e.to_string()))?;

        info!(
            strategy = self.strategy.name(),
            requested,
            selected = selected.len(),
            "Computed pre-allocation hint"
        );

        Ok(Response::new(PreAllocateResponse {
            selected_device_ids: selected,
        }))
    }
}

/// Owns the listening endpoint and the plugin lifecycle
pub struct PluginServer {
    config: PluginConfig,
    resource_name: String,
    registry: DeviceRegistry,
    topology: Arc<Topology>,
    strategy: Arc<dyn SelectionStrategy>,

    state: PluginState,
    shutdown: CancellationToken,
    health_tx: mpsc::Sender<HealthEvent>,
    health_rx: Option<mpsc::Receiver<HealthEvent>>,
    service: Option<DevicePluginService>,
    server_task: Option<JoinHandle<Result<()>>>,
    health_task: Option<JoinHandle<()>>,
}

impl PluginServer {
    /// Create a stopped plugin server
    pub fn new(
        config: PluginConfig,
        resource_name: impl Into<String>,
        registry: DeviceRegistry,
        topology: Topology,
    ) -> Self {
        let (health_tx, health_rx) = mpsc::channel(config.health_channel_capacity);
        let strategy: Arc<dyn SelectionStrategy> = Arc::from(config.strategy.build());

        Self {
            config,
            resource_name: resource_name.into(),
            registry,
            topology: Arc::new(topology),
            strategy,
            state: PluginState::Stopped,
            shutdown: CancellationToken::new(),
            health_tx,
            health_rx: Some(health_rx),
            service: None,
            server_task: None,
            health_task: None,
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> PluginState {
        self.state
    }

    /// Producer handle for external health-event sources.
    ///
    /// The channel is bounded; senders block under backpressure rather
    /// than losing an event.
    pub fn health_sender(&self) -> mpsc::Sender<HealthEvent> {
        self.health_tx.clone()
    }

    /// Open the listening endpoint and verify it accepts connections.
    ///
    /// `Stopped → Starting`: clears any stale socket binding, serves the
    /// gRPC endpoint, then performs a self-connect probe bounded by the
    /// configured timeout.
    pub async fn start(&mut self) -> Result<()> {
        if self.state != PluginState::Stopped {
            return Err(AgentError::Plugin(
                "plugin server is already running".to_string(),
            ));
        }

        // A previous run consumed the shutdown token and health channel.
        if self.shutdown.is_cancelled() {
            self.shutdown = CancellationToken::new();
            let (tx, rx) = mpsc::channel(self.config.health_channel_capacity);
            self.health_tx = tx;
            self.health_rx = Some(rx);
        }

        std::fs::create_dir_all(&self.config.socket_dir)?;
        self.cleanup()?;

        let socket_path = self.config.socket_path();
        let listener = UnixListener::bind(&socket_path)?;

        let service = DevicePluginService::new(
            self.registry.clone(),
            self.topology.clone(),
            self.strategy.clone(),
            self.shutdown.clone(),
        );
        self.service = Some(service.clone());

        let incoming = UnixListenerStream::new(listener);
        let shutdown = self.shutdown.clone();
        let task = tokio::spawn(async move {
            Server::builder()
                .add_service(DevicePluginServer::new(service))
                .serve_with_incoming_shutdown(incoming, shutdown.cancelled_owned())
                .await
                .map_err(AgentError::Transport)?;
            Ok(())
        });
        self.server_task = Some(task);
        self.state = PluginState::Starting;

        // Wait for the server to come up by launching a blocking probe
        // connection against our own socket.
        let probe = dial(&socket_path, self.probe_timeout()).await?;
        drop(probe);

        Ok(())
    }

    /// Register this plugin with the orchestrator's registration endpoint.
    ///
    /// Failure is fatal to the start sequence; retry policy belongs to the
    /// surrounding bootstrap, not here.
    pub async fn register(&self) -> Result<()> {
        let registry_path = self.config.registry_socket_path();
        let channel = dial(&registry_path, self.probe_timeout()).await?;
        let mut client = RegistrationClient::new(channel);

        let request = RegisterRequest {
            version: API_VERSION.to_string(),
            endpoint: self.config.endpoint.clone(),
            resource_name: self.resource_name.clone(),
            options: Some(DevicePluginOptions {
                pre_start_required: false,
                pre_allocate_required: false,
            }),
        };

        client.register(request).await?;
        Ok(())
    }

    /// Start, register, and launch the health consumption loop.
    ///
    /// `Starting → Serving` once registration succeeds; a registration
    /// failure stops the server and propagates.
    pub async fn serve(&mut self) -> Result<()> {
        self.start().await?;
        info!("Starting to serve on {}", self.config.socket_path().display());

        if let Err(e) = self.register().await {
            error!("Could not register device plugin: {}", e);
            self.stop().await?;
            return Err(e);
        }
        info!(
            "Registered device plugin for {} with the orchestrator",
            self.resource_name
        );

        let events = self.health_rx.take().ok_or_else(|| {
            AgentError::Plugin("health channel already consumed".to_string())
        })?;
        let service = self
            .service
            .clone()
            .ok_or_else(|| AgentError::Plugin("service not started".to_string()))?;
        self.health_task = Some(tokio::spawn(async move {
            service.run_health_loop(events).await;
        }));

        self.state = PluginState::Serving;
        Ok(())
    }

    /// Stop serving and remove the endpoint binding.
    ///
    /// Idempotent: stopping an already-stopped server is a no-op.
    pub async fn stop(&mut self) -> Result<()> {
        if self.state == PluginState::Stopped {
            return Ok(());
        }

        info!("Stopping device plugin");
        self.shutdown.cancel();

        if let Some(task) = self.server_task.take() {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Plugin server exited with error: {}", e),
                Err(e) => warn!("Plugin server task failed to join: {}", e),
            }
        }

        if let Some(task) = self.health_task.take() {
            let _ = task.await;
        }

        self.service = None;
        self.cleanup()?;
        self.state = PluginState::Stopped;
        info!("Device plugin stopped");
        Ok(())
    }

    fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.config.probe_timeout_seconds)
    }

    /// Remove the socket binding, tolerating a missing file
    fn cleanup(&self) -> Result<()> {
        match std::fs::remove_file(self.config.socket_path()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AgentError::Io(e)),
        }
    }
}

impl Drop for PluginServer {
    fn drop(&mut self) {
        // Best effort: unblock any tasks still waiting on the token.
        self.shutdown.cancel();
    }
}

/// Establish a gRPC channel over a Unix socket, bounded by `timeout`.
pub async fn dial(path: &Path, timeout: Duration) -> Result<Channel> {
    let socket = path.to_path_buf();

    // The URI authority is required by the endpoint builder but unused;
    // the connector always dials the Unix socket.
    let endpoint = Endpoint::try_from("http://[::]:0")?.connect_timeout(timeout);

    let connect = endpoint.connect_with_connector(tower::service_fn(move |_: Uri| {
        UnixStream::connect(socket.clone())
    }));

    match tokio::time::timeout(timeout, connect).await {
        Ok(Ok(channel)) => Ok(channel),
        Ok(Err(e)) => Err(AgentError::Transport(e)),
        Err(_) => Err(AgentError::Timeout(format!(
            "connection to {} timed out",
            path.display()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio_stream::StreamExt;
    use topolink_core::{Device, LinkClass, StrategyKind, TopoEdge};
    use topolink_proto::{ContainerAllocateRequest, DevicePluginClient, Registration,
        RegistrationServer, v1};

    fn square_topology() -> Topology {
        Topology::from_edges(vec![
            TopoEdge::new("A", "B", LinkClass::NvLink),
            TopoEdge::new("B", "C", LinkClass::SingleSwitch),
            TopoEdge::new("C", "D", LinkClass::NvLink),
            TopoEdge::new("A", "D", LinkClass::None),
        ])
    }

    fn test_registry() -> DeviceRegistry {
        DeviceRegistry::new(vec![
            Device::healthy("A"),
            Device::healthy("B"),
            Device::healthy("C"),
            Device::healthy("D"),
        ])
    }

    fn test_service(shutdown: CancellationToken) -> DevicePluginService {
        DevicePluginService::new(
            test_registry(),
            Arc::new(square_topology()),
            Arc::from(StrategyKind::EdgeGreedy.build()),
            shutdown,
        )
    }

    #[tokio::test]
    async fn test_get_device_plugin_options() {
        let service = test_service(CancellationToken::new());
        let response = service
            .get_device_plugin_options(Request::new(Empty {}))
            .await
            .unwrap()
            .into_inner();

        assert!(!response.pre_start_required);
        assert!(!response.pre_allocate_required);
    }

    #[tokio::test]
    async fn test_allocate_env_binding() {
        let service = test_service(CancellationToken::new());
        let request = AllocateRequest {
            container_requests: vec![ContainerAllocateRequest {
                device_ids: vec!["A".to_string(), "B".to_string()],
            }],
        };

        let response = service
            .allocate(Request::new(request))
            .await
            .unwrap()
            .into_inner();

        assert_eq!(response.container_responses.len(), 1);
        assert_eq!(
            response.container_responses[0].envs.get(ENV_VISIBLE_DEVICES),
            Some(&"A,B".to_string())
        );
    }

    #[tokio::test]
    async fn test_allocate_unknown_device() {
        let service = test_service(CancellationToken::new());
        let request = AllocateRequest {
            container_requests: vec![ContainerAllocateRequest {
                device_ids: vec!["Z".to_string()],
            }],
        };

        let status = service.allocate(Request::new(request)).await.unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
        assert!(status.message().contains("unknown device: Z"));
    }

    #[tokio::test]
    async fn test_pre_allocate_selects_best_edge() {
        let service = test_service(CancellationToken::new());
        let request = PreAllocateRequest {
            devices_num: 2,
            usable_device_ids: vec![
                "A".to_string(),
                "B".to_string(),
                "C".to_string(),
                "D".to_string(),
            ],
        };

        let response = service
            .pre_allocate(Request::new(request))
            .await
            .unwrap()
            .into_inner();

        assert_eq!(
            response.selected_device_ids,
            vec!["A".to_string(), "B".to_string()]
        );
    }

    #[tokio::test]
    async fn test_pre_allocate_rejects_bad_requests() {
        let service = test_service(CancellationToken::new());

        // Zero devices requested.
        let status = service
            .pre_allocate(Request::new(PreAllocateRequest {
                devices_num: 0,
                usable_device_ids: vec!["A".to_string()],
            }))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);

        // More than the registry holds.
        let status = service
            .pre_allocate(Request::new(PreAllocateRequest {
                devices_num: 5,
                usable_device_ids: vec!["A".to_string()],
            }))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);

        // Unknown usable id.
        let status = service
            .pre_allocate(Request::new(PreAllocateRequest {
                devices_num: 1,
                usable_device_ids: vec!["Z".to_string()],
            }))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
        assert!(status.message().contains("unknown device: Z"));

        // Count exceeds the usable set: the strategy reports it.
        let status = service
            .pre_allocate(Request::new(PreAllocateRequest {
                devices_num: 3,
                usable_device_ids: vec!["A".to_string(), "B".to_string()],
            }))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
        assert!(status.message().contains("insufficient usable devices"));
    }

    #[tokio::test]
    async fn test_list_and_watch_emits_one_snapshot_per_transition() {
        let shutdown = CancellationToken::new();
        let service = test_service(shutdown.clone());

        let (health_tx, health_rx) = mpsc::channel(4);
        let loop_service = service.clone();
        let health_loop =
            tokio::spawn(async move { loop_service.run_health_loop(health_rx).await });

        let mut stream = service
            .list_and_watch(Request::new(Empty {}))
            .await
            .unwrap()
            .into_inner();

        // Initial snapshot: everything healthy.
        let initial = stream.next().await.unwrap().unwrap();
        assert_eq!(initial.devices.len(), 4);
        assert!(initial
            .devices
            .iter()
            .all(|d| d.health == v1::Health::Healthy as i32));

        // Two transitions plus a duplicate that must not produce a
        // snapshot.
        health_tx
            .send(HealthEvent::Device("B".to_string()))
            .await
            .unwrap();
        health_tx
            .send(HealthEvent::Device("B".to_string()))
            .await
            .unwrap();
        health_tx
            .send(HealthEvent::Device("C".to_string()))
            .await
            .unwrap();

        let first = stream.next().await.unwrap().unwrap();
        let unhealthy: Vec<&str> = first
            .devices
            .iter()
            .filter(|d| d.health == v1::Health::Unhealthy as i32)
            .map(|d| d.id.as_str())
            .collect();
        assert_eq!(unhealthy, vec!["B"]);

        let second = stream.next().await.unwrap().unwrap();
        let unhealthy: Vec<&str> = second
            .devices
            .iter()
            .filter(|d| d.health == v1::Health::Unhealthy as i32)
            .map(|d| d.id.as_str())
            .collect();
        assert_eq!(unhealthy, vec!["B", "C"]);

        // Stop: the stream terminates and nothing else is sent.
        shutdown.cancel();
        health_loop.await.unwrap();
        let end = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .unwrap();
        assert!(end.is_none());
    }

    #[tokio::test]
    async fn test_list_and_watch_fan_out_event() {
        let shutdown = CancellationToken::new();
        let service = test_service(shutdown.clone());

        let (health_tx, health_rx) = mpsc::channel(4);
        let loop_service = service.clone();
        let health_loop =
            tokio::spawn(async move { loop_service.run_health_loop(health_rx).await });

        let mut stream = service
            .list_and_watch(Request::new(Empty {}))
            .await
            .unwrap()
            .into_inner();
        stream.next().await.unwrap().unwrap();

        // One event affecting every device: one snapshot per transition.
        health_tx.send(HealthEvent::All).await.unwrap();

        let mut last = None;
        for _ in 0..4 {
            last = Some(stream.next().await.unwrap().unwrap());
        }
        let last = last.unwrap();
        assert!(last
            .devices
            .iter()
            .all(|d| d.health == v1::Health::Unhealthy as i32));

        shutdown.cancel();
        health_loop.await.unwrap();
    }

    #[tokio::test]
    async fn test_slow_watcher_loses_no_transition() {
        // More devices than the watch channel holds, so the health loop
        // must block on the slow consumer instead of dropping snapshots.
        let device_count = WATCH_CHANNEL_CAPACITY * 2;
        let devices: Vec<Device> = (0..device_count)
            .map(|i| Device::healthy(format!("GPU-{:02}", i)))
            .collect();

        let shutdown = CancellationToken::new();
        let service = DevicePluginService::new(
            DeviceRegistry::new(devices),
            Arc::new(Topology::default()),
            Arc::from(StrategyKind::FirstFit.build()),
            shutdown.clone(),
        );

        let (health_tx, health_rx) = mpsc::channel(4);
        let loop_service = service.clone();
        let health_loop =
            tokio::spawn(async move { loop_service.run_health_loop(health_rx).await });

        let mut stream = service
            .list_and_watch(Request::new(Empty {}))
            .await
            .unwrap()
            .into_inner();
        stream.next().await.unwrap().unwrap();

        // One transition per device while the watcher is not reading.
        health_tx.send(HealthEvent::All).await.unwrap();

        // Drain late: every snapshot must still arrive, in order, with
        // one more unhealthy device than the previous.
        for expected in 1..=device_count {
            let snapshot = tokio::time::timeout(Duration::from_secs(5), stream.next())
                .await
                .expect("snapshot missing under backpressure")
                .unwrap()
                .unwrap();
            let unhealthy = snapshot
                .devices
                .iter()
                .filter(|d| d.health == v1::Health::Unhealthy as i32)
                .count();
            assert_eq!(unhealthy, expected);
        }

        shutdown.cancel();
        health_loop.await.unwrap();
    }

    /// Recording registration endpoint for lifecycle tests
    #[derive(Clone, Default)]
    struct MockRegistry {
        seen: Arc<Mutex<Option<RegisterRequest>>>,
    }

    #[tonic::async_trait]
    impl Registration for MockRegistry {
        async fn register(
            &self,
            request: Request<RegisterRequest>,
        ) -> std::result::Result<Response<Empty>, Status> {
            *self.seen.lock().await = Some(request.into_inner());
            Ok(Response::new(Empty {}))
        }
    }

    fn test_plugin(dir: &TempDir) -> PluginServer {
        let mut config = PluginConfig::default();
        config.socket_dir = dir.path().to_path_buf();
        config.strategy = StrategyKind::EdgeGreedy;

        PluginServer::new(config, "topolink.io/accel", test_registry(), square_topology())
    }

    async fn spawn_mock_registry(dir: &TempDir) -> (MockRegistry, CancellationToken) {
        let mock = MockRegistry::default();
        let token = CancellationToken::new();

        let path = dir.path().join("registry.sock");
        let listener = UnixListener::bind(&path).unwrap();
        let incoming = UnixListenerStream::new(listener);

        let service = mock.clone();
        let shutdown = token.clone();
        tokio::spawn(async move {
            Server::builder()
                .add_service(RegistrationServer::new(service))
                .serve_with_incoming_shutdown(incoming, shutdown.cancelled_owned())
                .await
                .unwrap();
        });

        (mock, token)
    }

    #[tokio::test]
    async fn test_lifecycle_serve_and_stop() {
        let dir = TempDir::new().unwrap();
        let (mock, registry_token) = spawn_mock_registry(&dir).await;

        let mut plugin = test_plugin(&dir);
        assert_eq!(plugin.state(), PluginState::Stopped);

        plugin.serve().await.unwrap();
        assert_eq!(plugin.state(), PluginState::Serving);

        // Registration carried the endpoint and resource name.
        let seen = mock.seen.lock().await.clone().unwrap();
        assert_eq!(seen.version, API_VERSION);
        assert_eq!(seen.endpoint, "topolink.sock");
        assert_eq!(seen.resource_name, "topolink.io/accel");

        // The served socket answers protocol calls.
        let channel = dial(&plugin.config.socket_path(), Duration::from_secs(5))
            .await
            .unwrap();
        let mut client = DevicePluginClient::new(channel);
        let options = client
            .get_device_plugin_options(Empty {})
            .await
            .unwrap()
            .into_inner();
        assert!(!options.pre_start_required);

        plugin.stop().await.unwrap();
        assert_eq!(plugin.state(), PluginState::Stopped);
        assert!(!plugin.config.socket_path().exists());

        // Idempotent stop.
        plugin.stop().await.unwrap();

        registry_token.cancel();
    }

    #[tokio::test]
    async fn test_registration_failure_aborts_startup() {
        let dir = TempDir::new().unwrap();
        // No registration endpoint exists: serve must fail and roll back.
        let mut config = PluginConfig::default();
        config.socket_dir = dir.path().to_path_buf();
        config.probe_timeout_seconds = 1;

        let mut plugin =
            PluginServer::new(config, "topolink.io/accel", test_registry(), square_topology());

        assert!(plugin.serve().await.is_err());
        assert_eq!(plugin.state(), PluginState::Stopped);
        assert!(!plugin.config.socket_path().exists());
    }

    #[tokio::test]
    async fn test_restart_after_stop() {
        let dir = TempDir::new().unwrap();
        let (_mock, registry_token) = spawn_mock_registry(&dir).await;

        let mut plugin = test_plugin(&dir);
        plugin.serve().await.unwrap();
        plugin.stop().await.unwrap();

        // The state machine is restartable from Stopped.
        plugin.serve().await.unwrap();
        assert_eq!(plugin.state(), PluginState::Serving);
        plugin.stop().await.unwrap();

        registry_token.cancel();
    }

    #[tokio::test]
    async fn test_end_to_end_watch_over_socket() {
        let dir = TempDir::new().unwrap();
        let (_mock, registry_token) = spawn_mock_registry(&dir).await;

        let mut plugin = test_plugin(&dir);
        plugin.serve().await.unwrap();
        let health_tx = plugin.health_sender();

        let channel = dial(&plugin.config.socket_path(), Duration::from_secs(5))
            .await
            .unwrap();
        let mut client = DevicePluginClient::new(channel);
        let mut stream = client.list_and_watch(Empty {}).await.unwrap().into_inner();

        let initial = stream.message().await.unwrap().unwrap();
        assert_eq!(initial.devices.len(), 4);

        health_tx
            .send(HealthEvent::Device("A".to_string()))
            .await
            .unwrap();
        let update = stream.message().await.unwrap().unwrap();
        let device_a = update.devices.iter().find(|d| d.id == "A").unwrap();
        assert_eq!(device_a.health, v1::Health::Unhealthy as i32);

        // Stopping terminates the stream within a bounded time.
        plugin.stop().await.unwrap();
        let end = tokio::time::timeout(Duration::from_secs(2), stream.message())
            .await
            .unwrap();
        assert!(matches!(end, Ok(None) | Err(_)));

        registry_token.cancel();
    }
}
