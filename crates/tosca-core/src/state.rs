//! Controller lifecycle state.
//!
//! Every controller publishes its [`ControllerState`] through an
//! [`ObservableState`] (a `tokio::sync::watch` channel) so the presentation
//! layer can follow transitions without polling the device.

use crate::error::{Classify, ErrorKind};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;

/// What a busy controller is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Homing,
    Moving,
    Scanning,
    RunningSequence,
    Capturing,
    Streaming,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Operation::Homing => "homing",
            Operation::Moving => "moving",
            Operation::Scanning => "scanning",
            Operation::RunningSequence => "running sequence",
            Operation::Capturing => "capturing",
            Operation::Streaming => "streaming",
        };
        write!(f, "{}", label)
    }
}

/// The error that put a controller into `Faulted`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerFault {
    pub kind: ErrorKind,
    pub message: String,
}

impl ControllerFault {
    pub fn from_error<E: Classify + std::fmt::Display>(err: &E) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl std::fmt::Display for ControllerFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} error: {}", self.kind, self.message)
    }
}

/// Per-controller lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControllerState {
    Disconnected,
    Connecting,
    Connected,
    Busy(Operation),
    Faulted(ControllerFault),
}

impl ControllerState {
    /// Connected or busy: the device handle is live.
    pub fn is_connected(&self) -> bool {
        matches!(self, ControllerState::Connected | ControllerState::Busy(_))
    }

    pub fn is_faulted(&self) -> bool {
        matches!(self, ControllerState::Faulted(_))
    }
}

impl std::fmt::Display for ControllerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControllerState::Disconnected => write!(f, "disconnected"),
            ControllerState::Connecting => write!(f, "connecting"),
            ControllerState::Connected => write!(f, "connected"),
            ControllerState::Busy(op) => write!(f, "busy ({})", op),
            ControllerState::Faulted(fault) => write!(f, "faulted ({})", fault),
        }
    }
}

/// Operation attempted in a state that does not allow it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("device is not connected")]
    NotConnected,

    #[error("device is faulted ({0}); reset or reconnect first")]
    Faulted(ControllerFault),

    #[error("cannot {action} while {state}")]
    Invalid { action: String, state: String },
}

impl Classify for StateError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::State
    }
}

/// Watch-channel backed holder of a controller's state.
#[derive(Debug)]
pub struct ObservableState {
    name: &'static str,
    sender: watch::Sender<ControllerState>,
}

impl ObservableState {
    pub fn new(name: &'static str) -> Self {
        let (sender, _) = watch::channel(ControllerState::Disconnected);
        Self { name, sender }
    }

    pub fn get(&self) -> ControllerState {
        self.sender.borrow().clone()
    }

    pub fn set(&self, state: ControllerState) {
        let previous = self.sender.send_replace(state.clone());
        if previous != state {
            tracing::debug!(device = self.name, from = %previous, to = %state, "state transition");
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ControllerState> {
        self.sender.subscribe()
    }

    /// Ok when the device handle is live and not faulted.
    pub fn ensure_operable(&self) -> Result<(), StateError> {
        match self.get() {
            ControllerState::Connected | ControllerState::Busy(_) => Ok(()),
            ControllerState::Faulted(fault) => Err(StateError::Faulted(fault)),
            ControllerState::Disconnected | ControllerState::Connecting => {
                Err(StateError::NotConnected)
            }
        }
    }

    /// Move to `Faulted` with the given error.
    pub fn fault<E: Classify + std::fmt::Display>(&self, err: &E) {
        self.set(ControllerState::Faulted(ControllerFault::from_error(err)));
    }
}
