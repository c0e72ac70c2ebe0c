//! The workstation context.
//!
//! [`Workstation`] owns the three device controllers and the shared status
//! sink. It is created once by the application and passed by reference to
//! whatever needs a device; there are no process-wide singletons.

use crate::config::AppConfig;
use anyhow::Result;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tosca_core::camera::{AccessMode, CameraDevice, CameraInfo, CameraSystem, VendorError, VendorErrorCode};
use tosca_core::serial::{PortOpener, PortSpec, SystemPorts};
use tosca_core::state::ControllerState;
use tosca_core::status::{StatusEvent, StatusSink};
use tosca_driver_camera::{CameraError, ImagingController};
use tosca_driver_laser::{LaserController, LaserError};
use tosca_driver_mock::{port_names, MockCameraSystem, MockLaser, MockMode, MockPorts, MockXeryon};
use tosca_driver_xeryon::{ActuatorController, MotionError};

/// Status events buffered for slow subscribers.
const STATUS_CAPACITY: usize = 256;

/// Camera backend used when no vendor driver binding is linked in.
///
/// Enumerates nothing, so camera initialization fails cleanly.
#[derive(Debug, Default)]
pub struct DetachedCameras;

impl CameraSystem for DetachedCameras {
    fn cameras(&self) -> Result<Vec<CameraInfo>, VendorError> {
        Ok(Vec::new())
    }

    fn open(&self, id: &str, _mode: AccessMode) -> Result<Box<dyn CameraDevice>, VendorError> {
        Err(VendorError::new(
            VendorErrorCode::NotFound,
            format!("no camera driver binding available to open {}", id),
        ))
    }
}

/// Simulated devices behind a [`Workstation::simulated`] instance.
#[derive(Clone)]
pub struct SimulatedDevices {
    pub stage: Arc<MockXeryon>,
    pub laser: Arc<MockLaser>,
    pub cameras: Arc<MockCameraSystem>,
    pub ports: Arc<MockPorts>,
}

/// Per-device outcome of [`Workstation::connect_all`].
#[derive(Debug)]
pub struct ConnectReport {
    pub actuator: Result<(), MotionError>,
    pub laser: Result<(), LaserError>,
    pub camera: Result<CameraInfo, CameraError>,
}

impl ConnectReport {
    pub fn all_connected(&self) -> bool {
        self.actuator.is_ok() && self.laser.is_ok() && self.camera.is_ok()
    }
}

/// Controller states at one instant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkstationState {
    pub actuator: ControllerState,
    pub laser: ControllerState,
    pub camera: ControllerState,
}

/// Owner of the device controllers.
pub struct Workstation {
    config: AppConfig,
    status: StatusSink,
    actuator: ActuatorController,
    laser: LaserController,
    camera: ImagingController,
    shut_down: AtomicBool,
}

impl Workstation {
    /// Build controllers over the given serial opener and camera backend.
    pub fn new(config: AppConfig, ports: Arc<dyn PortOpener>, cameras: Arc<dyn CameraSystem>) -> Self {
        let status = StatusSink::new(STATUS_CAPACITY);
        let actuator =
            ActuatorController::new(config.actuator.clone(), ports.clone(), status.clone());
        let laser = LaserController::new(config.laser.clone(), ports, status.clone());
        let camera = ImagingController::new(config.camera.clone(), cameras, status.clone());
        Self {
            config,
            status,
            actuator,
            laser,
            camera,
            shut_down: AtomicBool::new(false),
        }
    }

    /// Real serial ports; no camera binding.
    pub fn hardware(config: AppConfig) -> Self {
        Self::new(config, Arc::new(SystemPorts), Arc::new(DetachedCameras))
    }

    /// Simulated stage, laser and camera. The configured serial ports are
    /// replaced with the simulated port names.
    pub fn simulated(mut config: AppConfig, stage_mode: MockMode) -> (Self, SimulatedDevices) {
        let stage = Arc::new(MockXeryon::new(stage_mode));
        let laser = Arc::new(MockLaser::new());
        let cameras = Arc::new(MockCameraSystem::single());
        let ports = Arc::new(MockPorts::workstation(stage.clone(), laser.clone()));

        config.actuator.port = PortSpec::Named(port_names::ACTUATOR.to_string());
        config.laser.port = PortSpec::Named(port_names::LASER.to_string());

        let workstation = Self::new(config, ports.clone(), cameras.clone());
        let devices = SimulatedDevices {
            stage,
            laser,
            cameras,
            ports,
        };
        (workstation, devices)
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn actuator(&self) -> &ActuatorController {
        &self.actuator
    }

    pub fn laser(&self) -> &LaserController {
        &self.laser
    }

    pub fn camera(&self) -> &ImagingController {
        &self.camera
    }

    pub fn status(&self) -> &StatusSink {
        &self.status
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<StatusEvent> {
        self.status.subscribe()
    }

    pub fn state(&self) -> WorkstationState {
        WorkstationState {
            actuator: self.actuator.state(),
            laser: self.laser.state(),
            camera: self.camera.state(),
        }
    }

    /// Connect every device concurrently with the configured ports.
    ///
    /// One device failing does not stop the others.
    pub async fn connect_all(&self) -> ConnectReport {
        self.shut_down.store(false, Ordering::SeqCst);
        let actuator_port = self.config.actuator.port.clone();
        let laser_port = self.config.laser.port.clone();

        let (actuator, laser, camera) = tokio::join!(
            self.actuator.connect(&actuator_port),
            self.laser.connect(&laser_port),
            self.camera.initialize_configured(),
        );

        let report = ConnectReport {
            actuator,
            laser,
            camera,
        };
        if report.all_connected() {
            tracing::info!("all devices connected");
        } else {
            tracing::warn!(
                actuator = report.actuator.is_ok(),
                laser = report.laser.is_ok(),
                camera = report.camera.is_ok(),
                "some devices failed to connect"
            );
        }
        report
    }

    /// Bring every device to a safe state and close it.
    ///
    /// Laser emission goes off first, then motion stops, then the camera is
    /// released. Safe to call repeatedly and from any controller state.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("workstation shutting down");

        self.laser.disconnect().await;
        if let Err(e) = self.actuator.stop().await {
            tracing::warn!("actuator did not acknowledge stop during shutdown: {}", e);
        }
        self.actuator.disconnect().await;
        self.camera.release().await;
    }
}

impl std::fmt::Debug for Workstation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workstation")
            .field("actuator", &self.actuator)
            .field("laser", &self.laser)
            .field("camera", &self.camera)
            .finish()
    }
}

/// Load configuration and build a workstation, simulated or not.
pub fn build(config: AppConfig, simulated: bool) -> Result<(Workstation, Option<SimulatedDevices>)> {
    config.validate()?;
    Ok(if simulated {
        let (workstation, devices) = Workstation::simulated(config, MockMode::Realistic);
        (workstation, Some(devices))
    } else {
        (Workstation::hardware(config), None)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[tokio::test]
    #[traced_test]
    async fn test_connect_all_logs_outcome() {
        let (ws, _devices) = Workstation::simulated(AppConfig::default(), MockMode::Instant);
        assert!(ws.connect_all().await.all_connected());
        assert!(logs_contain("all devices connected"));

        ws.shutdown().await;
        assert!(logs_contain("workstation shutting down"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_partial_connect_is_reported() {
        let ws = Workstation::new(
            AppConfig::default(),
            Arc::new(MockPorts::new()),
            Arc::new(DetachedCameras),
        );
        let report = ws.connect_all().await;
        assert!(!report.all_connected());
        assert!(report.camera.is_err());
        assert!(logs_contain("some devices failed to connect"));
    }

    #[test]
    fn test_detached_cameras_enumerate_nothing() {
        assert!(DetachedCameras.cameras().unwrap().is_empty());
        let err = DetachedCameras.open("cam0", AccessMode::Full).err().unwrap();
        assert_eq!(err.code, VendorErrorCode::NotFound);
    }
}
