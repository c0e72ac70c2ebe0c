//! Integration tests for the simulated devices
//!
//! These drive the simulators through the real `Transport` so the framing on
//! both ends stays in agreement.

use std::sync::Arc;
use std::time::Duration;
use tosca_core::serial::{autodetect, connect_verified, Command, Framing, Response};
use tosca_core::{ConnectError, TransportError};
use tosca_driver_mock::*;

const TIMEOUT: Duration = Duration::from_millis(200);

fn workstation() -> (Arc<MockXeryon>, Arc<MockLaser>, MockPorts) {
    let stage = Arc::new(MockXeryon::new(MockMode::Instant));
    let laser = Arc::new(MockLaser::new());
    let ports = MockPorts::workstation(stage.clone(), laser.clone());
    (stage, laser, ports)
}

#[tokio::test]
async fn test_stage_over_transport() {
    let (stage, _laser, ports) = workstation();
    let (transport, identity) = connect_verified(
        &ports,
        port_names::ACTUATOR,
        115200,
        Framing::TAG_VALUE,
        "XERYON",
        TIMEOUT,
    )
    .await
    .unwrap();
    assert_eq!(identity, "XERYON XLS-1250 SIM");

    let reply = transport
        .send_command(&Command::with_value("DPOS", 1200), TIMEOUT)
        .await
        .unwrap();
    assert_eq!(
        reply,
        Response::Value {
            tag: Some("DPOS".into()),
            value: "1200".into()
        }
    );

    let epos = transport
        .send_command(&Command::query("EPOS"), TIMEOUT)
        .await
        .unwrap();
    assert_eq!(epos.parse_value::<i64>().unwrap(), 1200);
    assert_eq!(stage.commands(), vec!["*IDN?", "DPOS=1200", "EPOS=?"]);

    transport.disconnect().await;
    assert_eq!(ports.counters().opens(), 1);
    assert_eq!(ports.counters().closes(), 1);
}

#[tokio::test]
async fn test_laser_over_transport() {
    let (_stage, laser, ports) = workstation();
    let (transport, _) = connect_verified(
        &ports,
        port_names::LASER,
        9600,
        Framing::MNEMONIC_SPACE,
        "",
        TIMEOUT,
    )
    .await
    .unwrap();

    let reply = transport
        .send_command(&Command::with_value("POWER", "25.0"), TIMEOUT)
        .await
        .unwrap();
    assert!(reply.is_ack());
    assert_eq!(laser.power(), 25.0);

    let reply = transport
        .send_command(&Command::new("LASE"), TIMEOUT)
        .await
        .unwrap();
    assert!(matches!(reply, Response::Rejected(_)));
}

#[tokio::test]
async fn test_wrong_identity_closes_port() {
    let (_stage, _laser, ports) = workstation();
    let err = connect_verified(
        &ports,
        port_names::LASER,
        9600,
        Framing::MNEMONIC_SPACE,
        "XERYON",
        TIMEOUT,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, ConnectError::VerificationFailed { .. }));
    assert_eq!(ports.counters().live(), 0);
}

#[tokio::test]
async fn test_autodetect_finds_stage_behind_laser() {
    let (_stage, _laser, ports) = workstation();
    let (transport, _) = autodetect(&ports, 115200, Framing::TAG_VALUE, "XERYON", TIMEOUT, None)
        .await
        .unwrap();
    assert_eq!(transport.port_name(), port_names::ACTUATOR);
    assert_eq!(ports.counters().live(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_silent_device_times_out() {
    let silent = Arc::new(SilentDevice::new());
    let ports = MockPorts::new().with_device("/dev/ttyMOCK7", None, silent.clone());

    let err = connect_verified(&ports, "/dev/ttyMOCK7", 9600, Framing::MNEMONIC_SPACE, "", TIMEOUT)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ConnectError::Handshake(TransportError::Timeout(t)) if t == TIMEOUT
    ));
    assert_eq!(silent.lines_received(), 1);
}
