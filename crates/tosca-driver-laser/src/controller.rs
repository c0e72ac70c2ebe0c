//! Treatment Laser Source Controller
//!
//! Protocol Overview:
//! - Format: ASCII `MNEMONIC VALUE` lines over USB-serial
//! - Baud: 9600, 8N1, no flow control
//! - Command terminator: CR+LF (\r\n), reply terminator LF (\n)
//! - Commands: `ENABLE`, `DISABLE`, `POWER x.x` (answered `OK` or `ERR ...`)
//! - Queries: `*IDN?` (`manufacturer,model,serial[,firmware]`), `STATUS`
//!   (`key:value` pairs), `POWER?`
//!
//! # Usage
//!
//! ```rust,ignore
//! use tosca_driver_laser::{LaserConfig, LaserController};
//!
//! let laser = LaserController::new(LaserConfig::default(), Arc::new(SystemPorts), status_sink);
//! laser.connect(&PortSpec::Auto).await?;
//! laser.set_power(25.0).await?;
//! laser.enable().await?;
//! ```

use crate::config::LaserConfig;
use crate::reply::{DeviceInfo, LaserStatus};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tosca_core::error::{Classify, ConnectError, ErrorKind, TransportError};
use tosca_core::serial::{autodetect, connect_verified, Command, Framing, PortOpener, PortSpec, Response, Transport};
use tosca_core::state::{ControllerState, ObservableState, StateError};
use tosca_core::status::{DeviceKind, StatusSink};
use tracing::instrument;

// =============================================================================
// Errors
// =============================================================================

/// Errors returned by the laser controller.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LaserError {
    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error("laser communication failed: {0}")]
    Transport(#[from] TransportError),

    #[error(transparent)]
    State(#[from] StateError),

    /// Requested power outside the configured range; nothing was sent.
    #[error("power {value} outside [{min}, {max}]")]
    OutOfRange { value: f64, min: f64, max: f64 },

    #[error("laser rejected '{command}': {reason}")]
    Rejected { command: String, reason: String },
}

impl Classify for LaserError {
    fn kind(&self) -> ErrorKind {
        match self {
            LaserError::Connect(e) => e.kind(),
            LaserError::Transport(e) => e.kind(),
            LaserError::State(_) => ErrorKind::State,
            LaserError::OutOfRange { .. } | LaserError::Rejected { .. } => ErrorKind::Parameter,
        }
    }
}

// =============================================================================
// LaserController
// =============================================================================

/// Controller for the treatment laser source.
pub struct LaserController {
    config: LaserConfig,
    opener: Arc<dyn PortOpener>,
    transport: RwLock<Option<Arc<Transport>>>,
    /// Emission state as last acknowledged by the device
    enabled: AtomicBool,
    state: ObservableState,
    status: StatusSink,
    identity: Mutex<Option<String>>,
}

impl LaserController {
    pub fn new(config: LaserConfig, opener: Arc<dyn PortOpener>, status: StatusSink) -> Self {
        Self {
            config,
            opener,
            transport: RwLock::new(None),
            enabled: AtomicBool::new(false),
            state: ObservableState::new("laser"),
            status,
            identity: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &LaserConfig {
        &self.config
    }

    pub fn state(&self) -> ControllerState {
        self.state.get()
    }

    pub fn subscribe_state(&self) -> tokio::sync::watch::Receiver<ControllerState> {
        self.state.subscribe()
    }

    /// Emission state as last acknowledged by the device.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Raw `*IDN?` reply captured at connect time.
    pub fn identity(&self) -> Option<String> {
        self.identity.lock().clone()
    }

    /// Connect to `port`, or auto-detect. Replaces any existing connection.
    #[instrument(skip(self), err)]
    pub async fn connect(&self, port: &PortSpec) -> Result<(), LaserError> {
        self.disconnect().await;
        self.state.set(ControllerState::Connecting);

        let timeout = self.config.timeout();
        let connected = match port {
            PortSpec::Named(name) => {
                connect_verified(
                    self.opener.as_ref(),
                    name,
                    self.config.baud_rate,
                    Framing::MNEMONIC_SPACE,
                    &self.config.identity,
                    timeout,
                )
                .await
            }
            PortSpec::Auto => {
                autodetect(
                    self.opener.as_ref(),
                    self.config.baud_rate,
                    Framing::MNEMONIC_SPACE,
                    &self.config.identity,
                    timeout,
                    self.config.port_hint.as_deref(),
                )
                .await
            }
        };

        match connected {
            Ok((transport, identity)) => {
                tracing::info!("Laser connected on {}: {}", transport.port_name(), identity);
                self.status.info(
                    DeviceKind::Laser,
                    format!("Connected on {}", transport.port_name()),
                );
                *self.identity.lock() = Some(identity);
                *self.transport.write() = Some(Arc::new(transport));
                self.enabled.store(false, Ordering::SeqCst);
                self.state.set(ControllerState::Connected);
                Ok(())
            }
            Err(e) => {
                let err = LaserError::Connect(e);
                if matches!(err, LaserError::Connect(ConnectError::VerificationFailed { .. })) {
                    self.state.fault(&err);
                } else {
                    self.state.set(ControllerState::Disconnected);
                }
                self.status.report(DeviceKind::Laser, &err);
                Err(err)
            }
        }
    }

    /// Disable emission (best effort) and close the link. Idempotent.
    #[instrument(skip(self))]
    pub async fn disconnect(&self) {
        let transport = self.transport.write().take();
        if let Some(transport) = transport {
            let reply = transport
                .send_command(&Command::new("DISABLE"), self.config.timeout())
                .await;
            if let Err(e) = reply {
                log::warn!("Laser did not acknowledge DISABLE before disconnect: {}", e);
            }
            transport.disconnect().await;
            self.status.info(DeviceKind::Laser, "Disconnected");
        }
        self.enabled.store(false, Ordering::SeqCst);
        *self.identity.lock() = None;
        self.state.set(ControllerState::Disconnected);
    }

    /// Query and parse the identification string.
    #[instrument(skip(self), err)]
    pub async fn identify(&self) -> Result<DeviceInfo, LaserError> {
        let transport = self.connected_transport()?;
        let reply = self.exchange(&transport, Command::new("*IDN?")).await?;
        let raw = reply.value().unwrap_or("OK");
        Ok(DeviceInfo::parse(raw))
    }

    /// Turn emission on.
    #[instrument(skip(self), err)]
    pub async fn enable(&self) -> Result<(), LaserError> {
        self.set_emission(true).await
    }

    /// Turn emission off.
    #[instrument(skip(self), err)]
    pub async fn disable(&self) -> Result<(), LaserError> {
        self.set_emission(false).await
    }

    /// Set output power.
    ///
    /// `value` is checked against `[min_power, max_power]` before anything is
    /// sent; the device only ever sees in-range values.
    #[instrument(skip(self), err)]
    pub async fn set_power(&self, value: f64) -> Result<(), LaserError> {
        let (min, max) = (self.config.min_power, self.config.max_power);
        if !(min..=max).contains(&value) {
            let err = LaserError::OutOfRange { value, min, max };
            self.status.report(DeviceKind::Laser, &err);
            return Err(err);
        }

        let transport = self.operable_transport()?;
        let command = Command::with_value("POWER", format!("{:.1}", value));
        self.expect_ack(&transport, command).await?;
        log::info!("Laser power set to {:.1}", value);
        Ok(())
    }

    /// Power setpoint as reported by the device.
    #[instrument(skip(self), err)]
    pub async fn power(&self) -> Result<f64, LaserError> {
        let transport = self.connected_transport()?;
        let reply = self.exchange(&transport, Command::query("POWER")).await?;
        Ok(reply.parse_value::<f64>()?)
    }

    /// Query and parse the device status.
    #[instrument(skip(self), err)]
    pub async fn get_status(&self) -> Result<LaserStatus, LaserError> {
        let transport = self.connected_transport()?;
        let reply = self.exchange(&transport, Command::new("STATUS")).await?;
        let text = reply.value().ok_or_else(|| {
            LaserError::Transport(TransportError::MalformedReply(
                "STATUS answered without a payload".into(),
            ))
        })?;

        let status = LaserStatus::parse(text).map_err(LaserError::from)?;
        self.enabled.store(status.enabled, Ordering::SeqCst);
        if let Some(error) = &status.error {
            log::warn!("Laser reports error: {}", error);
        }
        Ok(status)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn set_emission(&self, on: bool) -> Result<(), LaserError> {
        // Disabling must work even from a faulted controller.
        let transport = if on {
            self.operable_transport()?
        } else {
            self.connected_transport()?
        };
        let mnemonic = if on { "ENABLE" } else { "DISABLE" };
        self.expect_ack(&transport, Command::new(mnemonic)).await?;

        self.enabled.store(on, Ordering::SeqCst);
        self.status.info(
            DeviceKind::Laser,
            if on { "Emission enabled" } else { "Emission disabled" },
        );
        Ok(())
    }

    fn operable_transport(&self) -> Result<Arc<Transport>, LaserError> {
        self.state.ensure_operable()?;
        self.connected_transport()
    }

    fn connected_transport(&self) -> Result<Arc<Transport>, LaserError> {
        self.transport
            .read()
            .clone()
            .ok_or(LaserError::State(StateError::NotConnected))
    }

    /// One exchange. Rejections and transport failures are reported; a
    /// dropped link faults the controller.
    async fn exchange(&self, transport: &Transport, command: Command) -> Result<Response, LaserError> {
        let result = match transport.send_command(&command, self.config.timeout()).await {
            Ok(Response::Rejected(reason)) => Err(LaserError::Rejected {
                command: command.to_string(),
                reason,
            }),
            Ok(reply) => Ok(reply),
            Err(e) => Err(LaserError::Transport(e)),
        };

        if let Err(e) = &result {
            if matches!(e, LaserError::Transport(TransportError::LinkError(_))) {
                self.state.fault(e);
            }
            self.status.report(DeviceKind::Laser, e);
        }
        result
    }

    async fn expect_ack(&self, transport: &Transport, command: Command) -> Result<(), LaserError> {
        let mnemonic = command.mnemonic().to_string();
        match self.exchange(transport, command).await? {
            Response::Ack => Ok(()),
            other => {
                let err = LaserError::Transport(TransportError::MalformedReply(format!(
                    "expected OK to {}, got {:?}",
                    mnemonic, other
                )));
                self.status.report(DeviceKind::Laser, &err);
                Err(err)
            }
        }
    }
}

impl std::fmt::Debug for LaserController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LaserController")
            .field("state", &self.state.get())
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tosca_core::Severity;

    #[test]
    fn test_error_classification() {
        let err = LaserError::OutOfRange {
            value: 150.0,
            min: 0.0,
            max: 100.0,
        };
        assert_eq!(err.kind(), ErrorKind::Parameter);
        assert_eq!(err.severity(), Severity::Warning);
        assert_eq!(err.to_string(), "power 150 outside [0, 100]");
        assert_eq!(
            LaserError::Transport(TransportError::LinkError("gone".into())).kind(),
            ErrorKind::Communication
        );
    }
}
