//! Accelerator error events and the health-event watcher
//!
//! The hardware raises an error/interrupt stream; the watcher filters it
//! into the health events the broker consumes. Delivery is lossless: the
//! forwarding channel is bounded and the watcher blocks on backpressure
//! rather than discarding a transition.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use topolink_core::Device;
use tracing::{debug, warn};

/// Error codes raised by applications rather than the hardware itself.
/// The device is still healthy when one of these fires.
pub const APP_ERROR_CODES: [u32; 3] = [31, 43, 45];

/// A decoded accelerator error/interrupt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawErrorEvent {
    /// Affected device, or `None` when the error concerns every device
    pub device_id: Option<String>,

    /// Hardware error code
    pub code: u32,

    /// When the event was observed
    pub at: DateTime<Utc>,
}

impl RawErrorEvent {
    /// Create an event for a single device
    pub fn device(id: impl Into<String>, code: u32) -> Self {
        Self {
            device_id: Some(id.into()),
            code,
            at: Utc::now(),
        }
    }

    /// Create an event that affects every device
    pub fn all(code: u32) -> Self {
        Self {
            device_id: None,
            code,
            at: Utc::now(),
        }
    }
}

/// A health transition the broker consumes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthEvent {
    /// The named device became unhealthy
    Device(String),

    /// Every registered device became unhealthy
    All,
}

/// Source of raw accelerator error events
#[async_trait]
pub trait ErrorEventSource: Send {
    /// Whether the hardware behind this device can raise error events.
    /// Devices that cannot are treated as permanently unhealthy.
    fn supports_health_events(&self, device: &Device) -> bool;

    /// Wait for the next raw event; `None` means the source is exhausted
    async fn next_event(&mut self) -> Option<RawErrorEvent>;
}

/// Source that never raises an event.
///
/// Used when the backend has no hardware error stream; the watcher then
/// only reacts to the capability probe and to cancellation.
pub struct IdleErrorSource;

#[async_trait]
impl ErrorEventSource for IdleErrorSource {
    fn supports_health_events(&self, _device: &Device) -> bool {
        true
    }

    async fn next_event(&mut self) -> Option<RawErrorEvent> {
        std::future::pending().await
    }
}

/// Channel-fed error source for tests and simulations
pub struct MockErrorSource {
    rx: mpsc::Receiver<RawErrorEvent>,
    unsupported: Vec<String>,
}

impl MockErrorSource {
    /// Create a source fed by the returned sender
    pub fn new(capacity: usize) -> (mpsc::Sender<RawErrorEvent>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            tx,
            Self {
                rx,
                unsupported: Vec::new(),
            },
        )
    }

    /// Mark devices as lacking health-event support
    pub fn with_unsupported(mut self, ids: Vec<String>) -> Self {
        self.unsupported = ids;
        self
    }
}

#[async_trait]
impl ErrorEventSource for MockErrorSource {
    fn supports_health_events(&self, device: &Device) -> bool {
        !self.unsupported.contains(&device.id)
    }

    async fn next_event(&mut self) -> Option<RawErrorEvent> {
        self.rx.recv().await
    }
}

/// Consume raw error events and forward health events until cancelled.
///
/// Devices whose hardware cannot raise error events are reported unhealthy
/// immediately. Application-level error codes are filtered out. An event
/// with no device id fans out as [`HealthEvent::All`]. The loop exits when
/// the cancellation token fires, the source is exhausted, or the receiver
/// side of `tx` goes away.
pub async fn watch_errors(
    mut source: Box<dyn ErrorEventSource>,
    devices: Vec<Device>,
    tx: mpsc::Sender<HealthEvent>,
    shutdown: CancellationToken,
) {
    for device in &devices {
        if !source.supports_health_events(device) {
            warn!(
                "{} is too old to support health events; marking it unhealthy",
                device.id
            );
            if tx.send(HealthEvent::Device(device.id.clone())).await.is_err() {
                return;
            }
        }
    }

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("error watcher cancelled");
                return;
            }
            event = source.next_event() => {
                let Some(event) = event else {
                    debug!("error event source exhausted");
                    return;
                };

                if APP_ERROR_CODES.contains(&event.code) {
                    debug!(code = event.code, "ignoring application-level error");
                    continue;
                }

                let health_event = match event.device_id {
                    Some(id) => HealthEvent::Device(id),
                    None => HealthEvent::All,
                };

                if tx.send(health_event).await.is_err() {
                    return;
                }
            }
        }
    }
}
