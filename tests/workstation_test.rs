//! Workstation wiring tests against the simulated devices.

use serial_test::serial;
use tosca::config::AppConfig;
use tosca::tracing_config::{self, TracingConfig};
use tosca::Workstation;
use tosca_core::state::ControllerState;
use tosca_core::PixelFormat;
use tosca_driver_mock::MockMode;

#[tokio::test]
async fn test_connect_all_brings_every_device_up() {
    let (ws, devices) = Workstation::simulated(AppConfig::default(), MockMode::Instant);
    assert_eq!(ws.state().actuator, ControllerState::Disconnected);

    let report = ws.connect_all().await;
    assert!(report.all_connected(), "{:?}", report);

    let state = ws.state();
    assert_eq!(state.actuator, ControllerState::Connected);
    assert_eq!(state.laser, ControllerState::Connected);
    assert_eq!(state.camera, ControllerState::Connected);
    assert_eq!(devices.ports.counters().live(), 2);
    assert!(devices.cameras.first_probe().unwrap().is_open());

    ws.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_disables_laser_and_closes_everything() {
    let (ws, devices) = Workstation::simulated(AppConfig::default(), MockMode::Instant);
    assert!(ws.connect_all().await.all_connected());

    ws.laser().set_power(30.0).await.unwrap();
    ws.laser().enable().await.unwrap();
    assert!(devices.laser.is_enabled());
    ws.camera().start_streaming(None).await.unwrap();

    ws.shutdown().await;

    assert!(!devices.laser.is_enabled());
    assert!(devices.stage.commands().iter().any(|c| c == "STOP=0"));
    assert_eq!(devices.ports.counters().live(), 0);
    let probe = devices.cameras.first_probe().unwrap();
    assert!(!probe.is_open());
    assert!(!probe.is_streaming());

    let state = ws.state();
    assert_eq!(state.actuator, ControllerState::Disconnected);
    assert_eq!(state.laser, ControllerState::Disconnected);
    assert_eq!(state.camera, ControllerState::Disconnected);
}

#[tokio::test]
async fn test_shutdown_is_idempotent() {
    let (ws, devices) = Workstation::simulated(AppConfig::default(), MockMode::Instant);
    ws.connect_all().await;

    ws.shutdown().await;
    let closes = devices.ports.counters().closes();
    ws.shutdown().await;

    assert_eq!(devices.ports.counters().closes(), closes);
    assert_eq!(devices.cameras.first_probe().unwrap().closes(), 1);
}

#[tokio::test]
async fn test_shutdown_without_connect() {
    let (ws, devices) = Workstation::simulated(AppConfig::default(), MockMode::Instant);
    ws.shutdown().await;
    assert_eq!(devices.ports.counters().opens(), 0);
    assert_eq!(ws.state().laser, ControllerState::Disconnected);
}

#[tokio::test]
async fn test_status_events_reach_subscribers() {
    let (ws, _devices) = Workstation::simulated(AppConfig::default(), MockMode::Instant);
    let mut events = ws.subscribe_status();

    ws.connect_all().await;

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event.device);
    }
    assert!(seen.contains(&tosca_core::status::DeviceKind::Actuator));
    assert!(seen.contains(&tosca_core::status::DeviceKind::Laser));

    ws.shutdown().await;
}

#[tokio::test]
async fn test_hardware_workstation_reports_missing_camera() {
    let ws = Workstation::hardware(AppConfig::default());
    let err = ws.camera().initialize_configured().await.unwrap_err();
    assert!(matches!(
        err,
        tosca_driver_camera::CameraError::InitializationFailed(_)
    ));
    assert_eq!(ws.state().camera, ControllerState::Disconnected);
}

#[test]
fn test_build_rejects_invalid_config() {
    let mut config = AppConfig::default();
    config.camera.buffer_count = 0;
    assert!(tosca::workstation::build(config, true).is_err());
}

#[test]
#[serial]
fn test_environment_overrides_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tosca.toml");
    std::fs::write(
        &path,
        r#"
        [actuator]
        max_position = 20000

        [camera]
        pixel_format = "Mono16"
        "#,
    )
    .unwrap();

    std::env::set_var("TOSCA_ACTUATOR__MAX_POSITION", "15000");
    let loaded = AppConfig::load_from(&path);
    std::env::remove_var("TOSCA_ACTUATOR__MAX_POSITION");

    let config = loaded.unwrap();
    assert_eq!(config.actuator.max_position, 15_000);
    assert_eq!(config.camera.pixel_format, PixelFormat::Mono16);
}

#[test]
#[serial]
fn test_missing_file_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = AppConfig::load_from(dir.path().join("absent.toml")).unwrap();
    assert_eq!(config, AppConfig::default());
}

#[test]
#[serial]
fn test_invalid_file_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tosca.toml");
    std::fs::write(&path, "[laser]\nbaud_rate = \"fast\"\n").unwrap();
    let err = AppConfig::load_from(&path).unwrap_err();
    assert!(format!("{:#}", err).contains("tosca.toml"));
}

#[test]
#[serial]
fn test_tracing_init_twice_is_ok() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("logs").join("tosca.log");
    let config = TracingConfig::default()
        .with_ansi(false)
        .with_file(Some(log.clone()));

    tracing_config::init(config.clone()).unwrap();
    tracing_config::init(config).unwrap();
    assert!(log.exists());
}
