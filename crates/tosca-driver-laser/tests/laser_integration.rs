//! Laser controller against the simulated laser source.

use std::sync::Arc;
use std::time::Duration;
use tosca_core::{ControllerState, PortSpec, StateError, StatusSink, TransportError};
use tosca_driver_laser::{LaserConfig, LaserController, LaserError};
use tosca_driver_mock::{port_names, MockLaser, MockMode, MockPorts, MockXeryon};

struct Rig {
    laser: Arc<MockLaser>,
    ports: Arc<MockPorts>,
    controller: LaserController,
}

fn rig() -> Rig {
    let laser = Arc::new(MockLaser::new());
    let ports = Arc::new(MockPorts::workstation(
        Arc::new(MockXeryon::new(MockMode::Instant)),
        laser.clone(),
    ));
    let controller = LaserController::new(
        LaserConfig::default(),
        ports.clone(),
        StatusSink::default(),
    );
    Rig {
        laser,
        ports,
        controller,
    }
}

fn laser_port() -> PortSpec {
    PortSpec::Named(port_names::LASER.to_string())
}

#[tokio::test]
async fn test_identify_parses_fields() {
    let rig = rig();
    rig.controller.connect(&laser_port()).await.unwrap();

    let info = rig.controller.identify().await.unwrap();
    assert_eq!(info.manufacturer.as_deref(), Some("ACME LASERS"));
    assert_eq!(info.model.as_deref(), Some("TL-100"));
    assert_eq!(info.serial.as_deref(), Some("SN0042"));
    assert_eq!(info.firmware.as_deref(), Some("FW1.2"));
}

#[tokio::test]
async fn test_set_power_out_of_range_sends_nothing() {
    let rig = rig();
    rig.controller.connect(&laser_port()).await.unwrap();
    let before = rig.laser.command_count();

    let err = rig.controller.set_power(150.0).await.unwrap_err();
    assert_eq!(
        err,
        LaserError::OutOfRange {
            value: 150.0,
            min: 0.0,
            max: 100.0
        }
    );
    assert!(rig.controller.set_power(-0.5).await.is_err());
    assert!(rig.controller.set_power(f64::NAN).await.is_err());
    assert_eq!(rig.laser.command_count(), before);
}

#[tokio::test]
async fn test_power_and_emission_round_trip() {
    let rig = rig();
    rig.controller.connect(&laser_port()).await.unwrap();

    rig.controller.set_power(37.5).await.unwrap();
    rig.controller.enable().await.unwrap();
    assert!(rig.controller.is_enabled());
    assert_eq!(rig.controller.power().await.unwrap(), 37.5);

    let status = rig.controller.get_status().await.unwrap();
    assert_eq!(status.power, 37.5);
    assert!(status.enabled);
    assert_eq!(status.error, None);

    rig.controller.disable().await.unwrap();
    assert!(!rig.laser.is_enabled());
}

#[tokio::test]
async fn test_disconnect_disables_and_is_idempotent() {
    let rig = rig();
    let counters = rig.ports.counters();
    rig.controller.connect(&laser_port()).await.unwrap();
    rig.controller.enable().await.unwrap();

    rig.controller.disconnect().await;
    rig.controller.disconnect().await;

    assert!(!rig.laser.is_enabled());
    assert_eq!(rig.laser.commands().last().map(String::as_str), Some("DISABLE"));
    assert_eq!(rig.controller.state(), ControllerState::Disconnected);
    assert_eq!(counters.live(), 0);
    assert_eq!(
        rig.controller.enable().await,
        Err(LaserError::State(StateError::NotConnected))
    );
}

#[tokio::test]
async fn test_auto_detect_matches_configured_identity() {
    // The stage is probed first and answers *IDN? too.
    let rig = rig();
    let config = LaserConfig {
        identity: "ACME".into(),
        ..Default::default()
    };
    let controller = LaserController::new(config, rig.ports.clone(), StatusSink::default());

    controller.connect(&PortSpec::Auto).await.unwrap();
    assert_eq!(
        controller.identity().as_deref(),
        Some("ACME LASERS,TL-100,SN0042,FW1.2")
    );
}

#[tokio::test(start_paused = true)]
async fn test_silent_status_reply_times_out() {
    let rig = rig();
    rig.controller.connect(&laser_port()).await.unwrap();

    rig.laser.reply_faults().silence_next(1);
    let err = rig.controller.get_status().await.unwrap_err();
    assert_eq!(
        err,
        LaserError::Transport(TransportError::Timeout(Duration::from_millis(1000)))
    );
    // A timeout alone does not fault the controller.
    assert_eq!(rig.controller.state(), ControllerState::Connected);
    assert!(rig.controller.get_status().await.is_ok());
}

#[tokio::test]
async fn test_device_rejection_surfaces() {
    let laser = Arc::new(MockLaser::new().with_max_power(50.0));
    let ports = Arc::new(MockPorts::new().with_device(port_names::LASER, None, laser.clone()));
    let controller = LaserController::new(LaserConfig::default(), ports, StatusSink::default());
    controller.connect(&laser_port()).await.unwrap();

    // In range for the controller, out of range for this device.
    let err = controller.set_power(75.0).await.unwrap_err();
    assert!(matches!(err, LaserError::Rejected { .. }));
    assert_eq!(laser.power(), 0.0);
}
