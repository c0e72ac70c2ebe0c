//! Xeryon XLS Linear Stage Controller
//!
//! Protocol Overview:
//! - Format: ASCII `TAG=VALUE` lines over USB-serial
//! - Baud: 115200, 8N1, no flow control
//! - Command terminator: CR+LF (\r\n), reply terminator LF (\n)
//! - Commands: `DPOS=` (absolute target), `STEP=` (relative), `INDX=0`
//!   (find index / home), `SSPD=` (speed), `SCAN=±1|0`, `STOP=0`,
//!   `ENBL=1`, `RSET=0`
//! - Queries: `STAT=?` (status word), `EPOS=?` (encoder position), `*IDN?`
//!
//! # Motion exclusivity
//!
//! `home`, `move_to`, `move_relative` and `scan` hold the motion mutex for
//! their whole duration, including the status poll loop. `stop` never takes
//! it: it bumps a stop epoch, wakes any poll loop, and sends `STOP=0` on the
//! transport. The transport lock is held per exchange only, so the stop
//! command interleaves with the poll queries.
//!
//! # Usage
//!
//! ```rust,ignore
//! use tosca_driver_xeryon::{ActuatorConfig, ActuatorController};
//! use tosca_core::{PortSpec, StatusSink, SystemPorts};
//!
//! let actuator = ActuatorController::new(ActuatorConfig::default(), Arc::new(SystemPorts), StatusSink::default());
//! actuator.connect(&PortSpec::Auto).await?;
//! actuator.home().await?;
//! actuator.move_to(5_000, Some(2_000)).await?;
//! ```

use crate::config::{ActuatorConfig, BusyPolicy};
use crate::status_word::{MotionStatus, StatusFlag, StatusWord};
use parking_lot::{Mutex as SyncMutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard, Notify};
use tosca_core::error::{Classify, ConnectError, ErrorKind, Severity, TransportError};
use tosca_core::serial::{autodetect, connect_verified, Command, Framing, PortOpener, PortSpec, Response, Transport};
use tosca_core::state::{ControllerState, ObservableState, Operation, StateError};
use tosca_core::status::{DeviceKind, StatusSink};
use tracing::instrument;

/// Upper bound on the `STOP=0` exchange so stop never waits a full reply window.
const STOP_TIMEOUT: Duration = Duration::from_millis(500);

// =============================================================================
// Errors
// =============================================================================

/// Errors returned by the actuator controller.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MotionError {
    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error("actuator communication failed: {0}")]
    Transport(#[from] TransportError),

    #[error(transparent)]
    State(#[from] StateError),

    /// Target outside the configured travel; nothing was sent.
    #[error("target {target} outside travel range [{min}, {max}]")]
    OutOfRange { target: i64, min: i64, max: i64 },

    #[error("speed {speed} outside [0, {max}]")]
    InvalidSpeed { speed: u32, max: u32 },

    /// Another motion command holds the stage (fail-fast policy only).
    #[error("another motion command is in progress")]
    Busy,

    #[error("motion did not complete within {0:?}")]
    MotionTimeout(Duration),

    #[error("motion stopped by request")]
    Stopped,

    #[error("device fault: {}", format_flags(.0))]
    DeviceFault(Vec<StatusFlag>),

    #[error("device rejected '{command}': {reason}")]
    Rejected { command: String, reason: String },
}

fn format_flags(flags: &[StatusFlag]) -> String {
    flags
        .iter()
        .map(|f| f.name())
        .collect::<Vec<_>>()
        .join(", ")
}

impl Classify for MotionError {
    fn kind(&self) -> ErrorKind {
        match self {
            MotionError::Connect(e) => e.kind(),
            MotionError::Transport(e) => e.kind(),
            MotionError::State(_) | MotionError::Busy | MotionError::Stopped => ErrorKind::State,
            MotionError::OutOfRange { .. }
            | MotionError::InvalidSpeed { .. }
            | MotionError::Rejected { .. } => ErrorKind::Parameter,
            MotionError::MotionTimeout(_) => ErrorKind::Communication,
            MotionError::DeviceFault(_) => ErrorKind::DeviceFault,
        }
    }

    fn severity(&self) -> Severity {
        match self {
            MotionError::Stopped => Severity::Info,
            _ => self.kind().default_severity(),
        }
    }
}

/// Direction of a continuous scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanDirection {
    Positive,
    Negative,
}

impl ScanDirection {
    fn as_arg(self) -> i32 {
        match self {
            ScanDirection::Positive => 1,
            ScanDirection::Negative => -1,
        }
    }
}

// =============================================================================
// ActuatorController
// =============================================================================

/// Controller for one Xeryon XLS stage axis.
pub struct ActuatorController {
    config: ActuatorConfig,
    opener: Arc<dyn PortOpener>,
    /// Live device handle, exclusively owned by this controller
    transport: RwLock<Option<Arc<Transport>>>,
    /// Motion mutex: one home/move/scan at a time
    motion: Mutex<()>,
    /// Bumped by every `stop()`; a motion call aborts when it changes
    stop_epoch: AtomicU64,
    stop_signal: Notify,
    state: ObservableState,
    status: StatusSink,
    identity: SyncMutex<Option<String>>,
}

impl ActuatorController {
    pub fn new(config: ActuatorConfig, opener: Arc<dyn PortOpener>, status: StatusSink) -> Self {
        Self {
            config,
            opener,
            transport: RwLock::new(None),
            motion: Mutex::new(()),
            stop_epoch: AtomicU64::new(0),
            stop_signal: Notify::new(),
            state: ObservableState::new("actuator"),
            status,
            identity: SyncMutex::new(None),
        }
    }

    pub fn config(&self) -> &ActuatorConfig {
        &self.config
    }

    pub fn state(&self) -> ControllerState {
        self.state.get()
    }

    pub fn subscribe_state(&self) -> tokio::sync::watch::Receiver<ControllerState> {
        self.state.subscribe()
    }

    /// `*IDN?` reply of the connected controller.
    pub fn identity(&self) -> Option<String> {
        self.identity.lock().clone()
    }

    /// Connect to `port`, or auto-detect.
    ///
    /// An existing connection is closed first, so this doubles as reconnect
    /// from `Faulted`.
    #[instrument(skip(self), err)]
    pub async fn connect(&self, port: &PortSpec) -> Result<(), MotionError> {
        self.disconnect().await;
        self.state.set(ControllerState::Connecting);

        let timeout = self.config.timeout();
        let connected = match port {
            PortSpec::Named(name) => {
                connect_verified(
                    self.opener.as_ref(),
                    name,
                    self.config.baud_rate,
                    Framing::TAG_VALUE,
                    &self.config.identity,
                    timeout,
                )
                .await
            }
            PortSpec::Auto => {
                autodetect(
                    self.opener.as_ref(),
                    self.config.baud_rate,
                    Framing::TAG_VALUE,
                    &self.config.identity,
                    timeout,
                    self.config.port_hint.as_deref(),
                )
                .await
            }
        };

        let (transport, identity) = match connected {
            Ok(found) => found,
            Err(e) => {
                let err = MotionError::Connect(e);
                if matches!(err, MotionError::Connect(ConnectError::VerificationFailed { .. })) {
                    self.state.fault(&err);
                } else {
                    self.state.set(ControllerState::Disconnected);
                }
                self.status.report(DeviceKind::Actuator, &err);
                return Err(err);
            }
        };

        let transport = Arc::new(transport);
        let setup = async {
            self.exchange(&transport, Command::with_value("ENBL", 1)).await?;
            self.exchange(
                &transport,
                Command::with_value("SSPD", self.config.default_speed),
            )
            .await
        };
        if let Err(e) = setup.await {
            transport.disconnect().await;
            self.state.set(ControllerState::Disconnected);
            self.status.report(DeviceKind::Actuator, &e);
            return Err(e);
        }

        tracing::info!("Xeryon actuator connected on {}: {}", transport.port_name(), identity);
        self.status.info(
            DeviceKind::Actuator,
            format!("Connected on {}", transport.port_name()),
        );
        *self.identity.lock() = Some(identity);
        *self.transport.write() = Some(transport);
        self.state.set(ControllerState::Connected);
        Ok(())
    }

    /// Close the link. Stops a move in flight first. Safe to call in any
    /// state, any number of times.
    #[instrument(skip(self))]
    pub async fn disconnect(&self) {
        if matches!(self.state.get(), ControllerState::Busy(_)) {
            let _ = self.stop().await;
        } else {
            // Queued motion calls must not run once the link is going away.
            self.request_stop();
        }
        // Wait for aborted motion calls to unwind before pulling the link.
        let _motion = self.motion.lock().await;

        let transport = self.transport.write().take();
        if let Some(transport) = transport {
            transport.disconnect().await;
            self.status.info(DeviceKind::Actuator, "Disconnected");
        }
        *self.identity.lock() = None;
        self.state.set(ControllerState::Disconnected);
    }

    /// Find the index (mechanical home) and wait until it is reached.
    #[instrument(skip(self), err)]
    pub async fn home(&self) -> Result<(), MotionError> {
        let epoch = self.current_stop_epoch();
        let _motion = self.claim_motion(epoch).await?;
        let transport = self.operable_transport()?;
        self.begin(Operation::Homing);

        let result = async {
            self.exchange(&transport, Command::with_value("INDX", 0)).await?;
            self.await_completion(&transport, self.config.home_timeout(), epoch)
                .await
        }
        .await;

        self.finish(Operation::Homing, &transport, result).await
    }

    /// Move to an absolute encoder position.
    ///
    /// The target is checked against the travel range before anything is
    /// sent, so an out-of-range request never trips the device's end stops.
    #[instrument(skip(self), err)]
    pub async fn move_to(&self, target: i64, speed: Option<u32>) -> Result<(), MotionError> {
        self.check_target(target)?;
        if let Some(speed) = speed {
            self.check_speed(speed)?;
        }

        let epoch = self.current_stop_epoch();
        let _motion = self.claim_motion(epoch).await?;
        let transport = self.operable_transport()?;
        self.begin(Operation::Moving);

        let result = async {
            if let Some(speed) = speed {
                self.exchange(&transport, Command::with_value("SSPD", speed)).await?;
            }
            self.exchange(&transport, Command::with_value("DPOS", target))
                .await?;
            self.await_completion(&transport, self.config.move_timeout(), epoch)
                .await
        }
        .await;

        self.finish(Operation::Moving, &transport, result).await
    }

    /// Move by `delta` from the current encoder position.
    #[instrument(skip(self), err)]
    pub async fn move_relative(&self, delta: i64, speed: Option<u32>) -> Result<(), MotionError> {
        if let Some(speed) = speed {
            self.check_speed(speed)?;
        }

        let epoch = self.current_stop_epoch();
        let _motion = self.claim_motion(epoch).await?;
        let transport = self.operable_transport()?;

        let current = self.read_position(&transport).await?;
        self.check_target(current.saturating_add(delta))?;

        self.begin(Operation::Moving);
        let result = async {
            if let Some(speed) = speed {
                self.exchange(&transport, Command::with_value("SSPD", speed)).await?;
            }
            self.exchange(&transport, Command::with_value("STEP", delta))
                .await?;
            self.await_completion(&transport, self.config.move_timeout(), epoch)
                .await
        }
        .await;

        self.finish(Operation::Moving, &transport, result).await
    }

    /// Scan continuously in `direction` for `duration`, then halt.
    #[instrument(skip(self), err)]
    pub async fn scan(&self, direction: ScanDirection, duration: Duration) -> Result<(), MotionError> {
        let epoch = self.current_stop_epoch();
        let _motion = self.claim_motion(epoch).await?;
        let transport = self.operable_transport()?;
        self.begin(Operation::Scanning);

        let result = async {
            self.exchange(&transport, Command::with_value("SCAN", direction.as_arg()))
                .await?;
            let scanned = self.scan_for(&transport, duration, epoch).await;
            // Halt the scan whatever happened; a stop request already sent STOP.
            let halted = self.exchange(&transport, Command::with_value("SCAN", 0)).await;
            scanned.and(halted.map(|_| ()))
        }
        .await;

        self.finish(Operation::Scanning, &transport, result).await
    }

    /// Halt motion now.
    ///
    /// Never waits on the motion mutex. A running motion call abandons its
    /// status poll and returns [`MotionError::Stopped`]; calls still queued
    /// on the motion mutex return `Stopped` without sending anything.
    #[instrument(skip(self), err)]
    pub async fn stop(&self) -> Result<(), MotionError> {
        self.request_stop();

        let transport = self.transport.read().clone();
        match transport {
            Some(transport) => {
                let timeout = self.config.timeout().min(STOP_TIMEOUT);
                let reply = transport
                    .send_command(&Command::with_value("STOP", 0), timeout)
                    .await?;
                if let Response::Rejected(reason) = reply {
                    return Err(MotionError::Rejected {
                        command: "STOP".into(),
                        reason,
                    });
                }
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Decode the status word and read the encoder position.
    ///
    /// Fault flags move the controller to `Faulted`. Allowed while faulted
    /// so callers can inspect the flags.
    #[instrument(skip(self), err)]
    pub async fn status(&self) -> Result<MotionStatus, MotionError> {
        let transport = self.connected_transport()?;
        let word = self.read_status_word(&transport).await?;
        if word.has_fault() && !self.state.get().is_faulted() {
            let err = MotionError::DeviceFault(word.faults());
            tracing::warn!("Fault flags raised outside motion: {}", err);
            self.state.fault(&err);
            self.status.report(DeviceKind::Actuator, &err);
        }
        let position = self.read_position(&transport).await?;
        Ok(MotionStatus { word, position })
    }

    /// Current encoder position.
    #[instrument(skip(self), err)]
    pub async fn position(&self) -> Result<i64, MotionError> {
        let transport = self.connected_transport()?;
        self.read_position(&transport).await
    }

    /// Set the stage speed for subsequent moves.
    #[instrument(skip(self), err)]
    pub async fn set_speed(&self, speed: u32) -> Result<(), MotionError> {
        self.check_speed(speed)?;
        let transport = self.operable_transport()?;
        self.exchange(&transport, Command::with_value("SSPD", speed))
            .await
            .map(|_| ())
    }

    /// Clear a fault: reset the controller and re-read the status word.
    ///
    /// Stays `Faulted` if fault flags are still set afterwards.
    #[instrument(skip(self), err)]
    pub async fn reset(&self) -> Result<(), MotionError> {
        let _motion = self.acquire_motion().await?;
        let transport = self.connected_transport()?;

        let result = async {
            self.exchange(&transport, Command::with_value("RSET", 0)).await?;
            self.exchange(&transport, Command::with_value("ENBL", 1)).await?;
            let word = self.read_status_word(&transport).await?;
            if word.has_fault() {
                return Err(MotionError::DeviceFault(word.faults()));
            }
            Ok(())
        }
        .await;

        match result {
            Ok(()) => {
                self.state.set(ControllerState::Connected);
                self.status.info(DeviceKind::Actuator, "Fault cleared");
                Ok(())
            }
            Err(e) => {
                self.state.fault(&e);
                self.status.report(DeviceKind::Actuator, &e);
                Err(e)
            }
        }
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn acquire_motion(&self) -> Result<MutexGuard<'_, ()>, MotionError> {
        match self.config.busy_policy {
            BusyPolicy::Block => Ok(self.motion.lock().await),
            BusyPolicy::FailFast => self.motion.try_lock().map_err(|_| MotionError::Busy),
        }
    }

    /// Motion mutex for a call that entered under stop epoch `epoch`.
    ///
    /// A stop issued while the call was queued cancels it.
    async fn claim_motion(&self, epoch: u64) -> Result<MutexGuard<'_, ()>, MotionError> {
        let guard = self.acquire_motion().await?;
        if self.stopped_since(epoch) {
            log::debug!("queued actuator command cancelled by stop");
            return Err(MotionError::Stopped);
        }
        Ok(guard)
    }

    fn request_stop(&self) {
        self.stop_epoch.fetch_add(1, Ordering::SeqCst);
        self.stop_signal.notify_waiters();
    }

    /// Transport for an operation that needs a healthy controller.
    fn operable_transport(&self) -> Result<Arc<Transport>, MotionError> {
        self.state.ensure_operable()?;
        self.connected_transport()
    }

    /// Transport regardless of fault state.
    fn connected_transport(&self) -> Result<Arc<Transport>, MotionError> {
        self.transport
            .read()
            .clone()
            .ok_or(MotionError::State(StateError::NotConnected))
    }

    fn check_target(&self, target: i64) -> Result<(), MotionError> {
        let (min, max) = (self.config.min_position, self.config.max_position);
        if !(min..=max).contains(&target) {
            let err = MotionError::OutOfRange { target, min, max };
            self.status.report(DeviceKind::Actuator, &err);
            return Err(err);
        }
        Ok(())
    }

    fn check_speed(&self, speed: u32) -> Result<(), MotionError> {
        if speed > self.config.max_speed {
            return Err(MotionError::InvalidSpeed {
                speed,
                max: self.config.max_speed,
            });
        }
        Ok(())
    }

    fn begin(&self, op: Operation) {
        self.state.set(ControllerState::Busy(op));
    }

    async fn finish(
        &self,
        op: Operation,
        transport: &Transport,
        result: Result<(), MotionError>,
    ) -> Result<(), MotionError> {
        match &result {
            Ok(()) => {
                log::debug!("actuator {} complete", op);
                self.state.set(ControllerState::Connected);
            }
            Err(MotionError::Stopped) => {
                self.state.set(ControllerState::Connected);
                self.status.info(DeviceKind::Actuator, format!("{} stopped", op));
            }
            Err(MotionError::MotionTimeout(_)) => {
                // Leave the stage halted rather than still chasing the target.
                let _ = transport
                    .send_command(&Command::with_value("STOP", 0), STOP_TIMEOUT)
                    .await;
                self.state.set(ControllerState::Connected);
                if let Err(e) = &result {
                    self.status.report(DeviceKind::Actuator, e);
                }
            }
            Err(e @ (MotionError::DeviceFault(_) | MotionError::Transport(_))) => {
                self.state.fault(e);
                self.status.report(DeviceKind::Actuator, e);
            }
            Err(e) => {
                self.state.set(ControllerState::Connected);
                self.status.report(DeviceKind::Actuator, e);
            }
        }
        result
    }

    /// One exchange; device rejections become [`MotionError::Rejected`].
    async fn exchange(&self, transport: &Transport, command: Command) -> Result<Response, MotionError> {
        let reply = transport
            .send_command(&command, self.config.timeout())
            .await?;
        match reply {
            Response::Rejected(reason) => Err(MotionError::Rejected {
                command: command.to_string(),
                reason,
            }),
            other => Ok(other),
        }
    }

    async fn read_status_word(&self, transport: &Transport) -> Result<StatusWord, MotionError> {
        let reply = self.exchange(transport, Command::query("STAT")).await?;
        Ok(StatusWord::from_raw(reply.parse_value::<u32>()?))
    }

    async fn read_position(&self, transport: &Transport) -> Result<i64, MotionError> {
        let reply = self.exchange(transport, Command::query("EPOS")).await?;
        Ok(reply.parse_value::<i64>()?)
    }

    fn stopped_since(&self, epoch: u64) -> bool {
        self.stop_epoch.load(Ordering::SeqCst) != epoch
    }

    /// Status read that is abandoned as soon as a stop is requested, so the
    /// `STOP` exchange never queues behind a slow reply.
    async fn poll_status(&self, transport: &Transport, epoch: u64) -> Result<StatusWord, MotionError> {
        let notified = self.stop_signal.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.stopped_since(epoch) {
            return Err(MotionError::Stopped);
        }

        tokio::select! {
            biased;
            _ = &mut notified => Err(MotionError::Stopped),
            word = self.read_status_word(transport) => word,
        }
    }

    /// Sleep one poll interval, waking early on a stop request.
    async fn wait_poll_interval(&self) {
        tokio::select! {
            _ = tokio::time::sleep(self.config.poll_interval()) => {}
            _ = self.stop_signal.notified() => {}
        }
    }

    /// Poll the status word until the target is reached.
    ///
    /// A fault flag wins over "position reached" in the same poll. One
    /// failed status read is retried on the next poll; a second consecutive
    /// failure ends the call.
    async fn await_completion(
        &self,
        transport: &Transport,
        limit: Duration,
        epoch: u64,
    ) -> Result<(), MotionError> {
        let deadline = tokio::time::Instant::now() + limit;
        let mut failed_reads = 0u32;

        loop {
            if self.stopped_since(epoch) {
                return Err(MotionError::Stopped);
            }

            match self.poll_status(transport, epoch).await {
                Ok(word) => {
                    failed_reads = 0;
                    if word.has_fault() {
                        return Err(MotionError::DeviceFault(word.faults()));
                    }
                    if word.position_reached() {
                        return Ok(());
                    }
                }
                Err(MotionError::Transport(e)) if failed_reads == 0 => {
                    failed_reads += 1;
                    tracing::warn!("Status poll failed, retrying once: {}", e);
                }
                Err(e) => return Err(e),
            }

            if self.stopped_since(epoch) {
                return Err(MotionError::Stopped);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(MotionError::MotionTimeout(limit));
            }
            self.wait_poll_interval().await;
        }
    }

    /// Watch a running scan for `duration`, aborting on fault or stop.
    async fn scan_for(
        &self,
        transport: &Transport,
        duration: Duration,
        epoch: u64,
    ) -> Result<(), MotionError> {
        let end = tokio::time::Instant::now() + duration;
        let mut failed_reads = 0u32;

        while tokio::time::Instant::now() < end {
            if self.stopped_since(epoch) {
                return Err(MotionError::Stopped);
            }
            match self.poll_status(transport, epoch).await {
                Ok(word) if word.has_fault() => {
                    return Err(MotionError::DeviceFault(word.faults()))
                }
                Ok(_) => failed_reads = 0,
                Err(MotionError::Transport(e)) if failed_reads == 0 => {
                    failed_reads += 1;
                    tracing::warn!("Status poll failed during scan, retrying once: {}", e);
                }
                Err(e) => return Err(e),
            }

            let remaining = end.saturating_duration_since(tokio::time::Instant::now());
            tokio::select! {
                _ = tokio::time::sleep(remaining.min(self.config.poll_interval())) => {}
                _ = self.stop_signal.notified() => {}
            }
        }

        if self.stopped_since(epoch) {
            return Err(MotionError::Stopped);
        }
        Ok(())
    }

    /// Stop-epoch snapshot for callers that chain several motion calls.
    pub(crate) fn current_stop_epoch(&self) -> u64 {
        self.stop_epoch.load(Ordering::SeqCst)
    }

    pub(crate) fn stop_requested_since(&self, epoch: u64) -> bool {
        self.stopped_since(epoch)
    }

    pub(crate) async fn interruptible_sleep(&self, duration: Duration, epoch: u64) -> Result<(), MotionError> {
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.stop_signal.notified() => {}
        }
        if self.stopped_since(epoch) {
            return Err(MotionError::Stopped);
        }
        Ok(())
    }

    pub(crate) fn status_sink(&self) -> &StatusSink {
        &self.status
    }
}

impl std::fmt::Debug for ActuatorController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActuatorController")
            .field("state", &self.state.get())
            .field("identity", &self.identity())
            .finish()
    }
}
