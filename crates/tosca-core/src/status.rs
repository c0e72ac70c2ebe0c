//! Status/error sink consumed by the presentation layer.
//!
//! Controllers publish [`StatusEvent`]s on a broadcast channel. Nothing in
//! the hardware layer depends on a subscriber existing: events sent with no
//! receivers are simply dropped.

use crate::error::{Classify, ErrorKind, Severity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 64;

/// Which controller an event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    Actuator,
    Laser,
    Camera,
}

impl std::fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            DeviceKind::Actuator => "ACTUATOR",
            DeviceKind::Laser => "LASER",
            DeviceKind::Camera => "CAMERA",
        };
        write!(f, "{}", label)
    }
}

/// One line for the status bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub device: DeviceKind,
    pub severity: Severity,
    /// Set for error events.
    pub kind: Option<ErrorKind>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl std::fmt::Display for StatusEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            Some(kind) => write!(f, "[{}] {} error: {}", self.device, kind, self.message),
            None => write!(f, "[{}] {}", self.device, self.message),
        }
    }
}

/// Cloneable handle onto the shared status channel.
#[derive(Debug, Clone)]
pub struct StatusSink {
    sender: broadcast::Sender<StatusEvent>,
}

impl Default for StatusSink {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl StatusSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: StatusEvent) {
        let _ = self.sender.send(event);
    }

    /// Informational message.
    pub fn info(&self, device: DeviceKind, message: impl Into<String>) {
        let message = message.into();
        tracing::info!(device = %device, "{}", message);
        self.publish(StatusEvent {
            device,
            severity: Severity::Info,
            kind: None,
            message,
            timestamp: Utc::now(),
        });
    }

    /// Log `err` at its severity and forward it to subscribers.
    pub fn report<E: Classify + std::fmt::Display>(&self, device: DeviceKind, err: &E) {
        let severity = err.severity();
        let kind = err.kind();
        match severity {
            Severity::Info => tracing::info!(device = %device, %kind, "{}", err),
            Severity::Warning => tracing::warn!(device = %device, %kind, "{}", err),
            Severity::Error | Severity::Critical | Severity::Fatal => {
                tracing::error!(device = %device, %kind, %severity, "{}", err)
            }
        }
        self.publish(StatusEvent {
            device,
            severity,
            kind: Some(kind),
            message: err.to_string(),
            timestamp: Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;

    #[tokio::test]
    async fn test_report_reaches_subscriber() {
        let sink = StatusSink::default();
        let mut rx = sink.subscribe();

        sink.report(DeviceKind::Laser, &TransportError::NotConnected);
        let event = rx.recv().await.unwrap();

        assert_eq!(event.device, DeviceKind::Laser);
        assert_eq!(event.kind, Some(ErrorKind::State));
        assert_eq!(
            event.to_string(),
            "[LASER] state error: transport is not connected"
        );
    }

    #[test]
    fn test_publish_without_subscribers() {
        let sink = StatusSink::new(4);
        sink.info(DeviceKind::Camera, "no one is listening");
    }
}
