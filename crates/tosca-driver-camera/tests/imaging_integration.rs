//! Imaging controller against the simulated vendor camera system.

use std::sync::Arc;
use std::time::Duration;
use tosca_core::camera::{AccessMode, FeatureValue};
use tosca_core::state::{ControllerState, Operation};
use tosca_core::{Frame, PixelFormat, StatusSink};
use tosca_driver_camera::{CameraConfig, CameraError, FrameStatsTap, FrameTap, ImagingController};
use tosca_driver_mock::{MockCameraProbe, MockCameraSpec, MockCameraSystem};

struct Rig {
    camera: ImagingController,
    probe: MockCameraProbe,
    status: StatusSink,
}

fn rig_with(system: MockCameraSystem, config: CameraConfig) -> Rig {
    let probe = system.first_probe().expect("mock system has a camera");
    let status = StatusSink::default();
    let camera = ImagingController::new(config, Arc::new(system), status.clone());
    Rig {
        camera,
        probe,
        status,
    }
}

fn rig() -> Rig {
    rig_with(MockCameraSystem::single(), CameraConfig::default())
}

/// Rig whose stream only delivers frames on `trigger`.
async fn triggered_rig() -> Rig {
    let rig = rig();
    rig.probe.set_manual_trigger(true);
    rig.camera.initialize_configured().await.unwrap();
    rig
}

async fn trigger(probe: &MockCameraProbe, frames: usize) -> usize {
    let probe = probe.clone();
    tokio::task::spawn_blocking(move || probe.trigger(frames))
        .await
        .unwrap()
}

struct PanickingTap;

impl FrameTap for PanickingTap {
    fn inspect(&self, _frame: &Frame) {
        panic!("tap blew up");
    }
}

// =============================================================================
// Initialization
// =============================================================================

#[tokio::test]
async fn test_initialize_unknown_selector_uses_first_camera() {
    let system = MockCameraSystem::single()
        .with_camera(MockCameraSpec::default().with_id("DEV_MOCK0002").with_serial("SIM-0002"));
    let rig = rig_with(system, CameraConfig::default());

    let info = rig
        .camera
        .initialize(Some("no-such-camera"), &PixelFormat::Mono8, AccessMode::Full)
        .await
        .unwrap();
    assert_eq!(info.id, "DEV_MOCK0001");
    assert_eq!(rig.camera.state(), ControllerState::Connected);
    assert!(rig.probe.is_open());
}

#[tokio::test]
async fn test_initialize_selects_by_serial() {
    let system = MockCameraSystem::single()
        .with_camera(MockCameraSpec::default().with_id("DEV_MOCK0002").with_serial("SIM-0002"));
    let rig = rig_with(system, CameraConfig::default());

    let info = rig
        .camera
        .initialize(Some("SIM-0002"), &PixelFormat::Mono8, AccessMode::Full)
        .await
        .unwrap();
    assert_eq!(info.id, "DEV_MOCK0002");
    assert!(!rig.probe.is_open());
}

#[tokio::test]
async fn test_refused_access_mode_falls_back_to_default() {
    let rig = rig();
    rig.probe.deny_access_mode(AccessMode::Read);

    rig.camera
        .initialize(None, &PixelFormat::Mono8, AccessMode::Read)
        .await
        .unwrap();
    assert_eq!(rig.camera.access_mode(), Some(AccessMode::Full));
}

#[tokio::test]
async fn test_unsupported_pixel_format_keeps_device_default() {
    let rig = rig();
    rig.camera
        .initialize(None, &PixelFormat::Mono12, AccessMode::Full)
        .await
        .unwrap();
    assert_eq!(rig.camera.pixel_format().await.unwrap(), PixelFormat::Mono8);

    rig.camera
        .initialize(None, &PixelFormat::Mono16, AccessMode::Full)
        .await
        .unwrap();
    assert_eq!(rig.camera.pixel_format().await.unwrap(), PixelFormat::Mono16);
    assert_eq!(
        rig.camera.available_pixel_formats().await.unwrap(),
        vec![PixelFormat::Mono8, PixelFormat::Mono16]
    );
}

#[tokio::test]
async fn test_initialize_without_cameras_fails() {
    let status = StatusSink::default();
    let mut events = status.subscribe();
    let camera = ImagingController::new(
        CameraConfig::default(),
        Arc::new(MockCameraSystem::empty()),
        status,
    );

    let err = camera.initialize_configured().await.unwrap_err();
    assert!(matches!(err, CameraError::InitializationFailed(_)));
    assert_eq!(camera.state(), ControllerState::Disconnected);
    assert!(events.try_recv().is_ok());
}

#[tokio::test]
async fn test_configured_resolution_is_applied() {
    let config = CameraConfig {
        resolution: Some([32, 16]),
        ..Default::default()
    };
    let rig = rig_with(MockCameraSystem::single(), config);
    rig.camera.initialize_configured().await.unwrap();

    let frame = rig.camera.capture_single(None).await.unwrap();
    assert_eq!((frame.width, frame.height), (32, 16));
    assert_eq!(frame.data.len(), 32 * 16);
}

// =============================================================================
// Single capture
// =============================================================================

#[tokio::test]
async fn test_capture_single_without_streaming() {
    let rig = rig();
    rig.camera.initialize_configured().await.unwrap();

    let first = rig.camera.capture_single(None).await.unwrap();
    let second = rig.camera.capture_single(None).await.unwrap();
    assert_eq!((first.width, first.height), (64, 48));
    assert_eq!(first.expected_len(), Some(first.data.len()));
    assert!(second.sequence_id > first.sequence_id);
    assert_eq!(rig.camera.state(), ControllerState::Connected);
    assert_eq!(
        rig.camera.get_latest_frame().map(|f| f.sequence_id),
        Some(second.sequence_id)
    );
}

#[tokio::test]
async fn test_capture_timeout() {
    let rig = rig();
    rig.camera.initialize_configured().await.unwrap();
    rig.probe.fail_acquisition(true);

    let err = rig
        .camera
        .capture_single(Some(Duration::from_millis(50)))
        .await
        .unwrap_err();
    assert_eq!(err, CameraError::CaptureTimeout(Duration::from_millis(50)));
    assert_eq!(rig.camera.state(), ControllerState::Connected);
}

#[tokio::test]
async fn test_operations_before_initialize() {
    let rig = rig();
    assert_eq!(
        rig.camera.capture_single(None).await.unwrap_err(),
        CameraError::NotInitialized
    );
    assert_eq!(
        rig.camera.start_streaming(None).await.unwrap_err(),
        CameraError::NotInitialized
    );
    assert!(rig.camera.stop_streaming().await.is_ok());
    assert!(rig.camera.get_latest_frame().is_none());
}

// =============================================================================
// Streaming
// =============================================================================

#[tokio::test]
async fn test_streaming_lifecycle() {
    let rig = triggered_rig().await;

    rig.camera.start_streaming(None).await.unwrap();
    assert!(rig.camera.is_streaming());
    assert_eq!(
        rig.camera.state(),
        ControllerState::Busy(Operation::Streaming)
    );
    assert_eq!(
        rig.camera.start_streaming(None).await.unwrap_err(),
        CameraError::AlreadyStreaming
    );

    assert_eq!(trigger(&rig.probe, 3).await, 3);
    let latest = rig.camera.get_latest_frame().expect("frame cached");
    assert_eq!(latest.sequence_id, 3);

    rig.camera.stop_streaming().await.unwrap();
    assert!(!rig.probe.is_streaming());
    assert!(rig.camera.get_latest_frame().is_none());
    assert_eq!(rig.camera.state(), ControllerState::Connected);

    // Second stop is a no-op.
    rig.camera.stop_streaming().await.unwrap();
    assert_eq!(rig.camera.state(), ControllerState::Connected);
}

#[tokio::test]
async fn test_latest_frame_ids_are_monotonic() {
    let rig = triggered_rig().await;
    rig.camera.start_streaming(None).await.unwrap();

    let mut last = 0;
    for _ in 0..10 {
        trigger(&rig.probe, 2).await;
        let seq = rig.camera.get_latest_frame().unwrap().sequence_id;
        assert!(seq > last, "{} after {}", seq, last);
        last = seq;
    }

    // Ids keep increasing across a stream restart.
    rig.camera.stop_streaming().await.unwrap();
    rig.camera.start_streaming(None).await.unwrap();
    trigger(&rig.probe, 1).await;
    assert!(rig.camera.get_latest_frame().unwrap().sequence_id > last);
    rig.camera.release().await;
}

#[tokio::test]
async fn test_every_buffer_returned_on_success() {
    let rig = triggered_rig().await;
    rig.camera.start_streaming(Some(2)).await.unwrap();

    // More frames than buffers: only works if each one comes back.
    assert_eq!(trigger(&rig.probe, 12).await, 12);
    rig.camera.stop_streaming().await.unwrap();

    let counters = rig.camera.counters();
    assert_eq!(counters.callback_invocations, 12);
    assert_eq!(counters.buffers_returned, 12);
    assert_eq!(counters.frames_delivered, 12);
    assert_eq!(rig.probe.buffers_returned(), 12);
    assert_eq!(rig.probe.starved_deliveries(), 0);
}

#[tokio::test]
async fn test_incomplete_and_truncated_frames_return_buffers() {
    let rig = triggered_rig().await;
    rig.probe.mark_incomplete_every(2);
    rig.probe.truncate_every(3);
    rig.camera.start_streaming(Some(3)).await.unwrap();

    assert_eq!(trigger(&rig.probe, 6).await, 6);
    let counters = rig.camera.counters();
    rig.camera.stop_streaming().await.unwrap();

    // Frames 2, 4, 6 incomplete; 3 truncated; 1 and 5 cached.
    assert_eq!(counters.callback_invocations, counters.buffers_returned);
    assert_eq!(counters.frames_dropped, 4);
    assert_eq!(counters.frames_delivered, 2);
    assert_eq!(rig.probe.starved_deliveries(), 0);
}

#[tokio::test]
async fn test_panicking_tap_does_not_leak_buffers() {
    let rig = triggered_rig().await;
    rig.camera.register_tap(Box::new(PanickingTap));
    rig.camera.start_streaming(Some(2)).await.unwrap();

    assert_eq!(trigger(&rig.probe, 5).await, 5);
    let counters = rig.camera.counters();
    assert_eq!(counters.callback_invocations, 5);
    assert_eq!(counters.buffers_returned, 5);
    assert_eq!(counters.frames_dropped, 5);
    assert!(rig.camera.get_latest_frame().is_none());

    rig.camera.stop_streaming().await.unwrap();
    assert_eq!(rig.probe.starved_deliveries(), 0);
}

#[tokio::test]
async fn test_stats_tap_sees_streamed_frames() {
    let rig = triggered_rig().await;
    let stats = FrameStatsTap::new();
    let handle = rig.camera.register_tap(Box::new(stats.clone()));
    rig.camera.start_streaming(None).await.unwrap();

    trigger(&rig.probe, 4).await;
    assert_eq!(stats.frames(), 4);
    assert_eq!(stats.gaps(), 0);
    assert_eq!(stats.bytes(), 4 * 64 * 48);

    assert!(rig.camera.unregister_tap(handle));
    trigger(&rig.probe, 2).await;
    assert_eq!(stats.frames(), 4);
    rig.camera.release().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_capture_single_while_streaming_waits_for_fresh_frame() {
    let system = MockCameraSystem::empty()
        .with_camera(MockCameraSpec::default().with_frame_interval(Duration::from_millis(5)));
    let rig = rig_with(system, CameraConfig::default());
    rig.camera.initialize_configured().await.unwrap();
    rig.camera.start_streaming(None).await.unwrap();

    let frame = rig
        .camera
        .capture_single(Some(Duration::from_secs(2)))
        .await
        .unwrap();
    assert!(frame.sequence_id >= 1);
    assert!(rig.camera.is_streaming());

    rig.camera.stop_streaming().await.unwrap();
    let counters = rig.camera.counters();
    assert_eq!(counters.callback_invocations, counters.buffers_returned);
}

// =============================================================================
// Features and settings
// =============================================================================

#[tokio::test]
async fn test_gain_round_trip() {
    let rig = rig();
    rig.camera.initialize_configured().await.unwrap();

    rig.camera
        .set_feature("Gain", FeatureValue::Float(5.0))
        .await
        .unwrap();
    assert_eq!(
        rig.camera.get_feature("Gain").await.unwrap(),
        FeatureValue::Float(5.0)
    );
    assert_eq!(rig.probe.feature("Gain"), Some(FeatureValue::Float(5.0)));
}

#[tokio::test]
async fn test_feature_errors_name_the_feature() {
    let rig = rig();
    rig.camera.initialize_configured().await.unwrap();

    let err = rig.camera.get_feature("Bogus").await.unwrap_err();
    assert!(matches!(err, CameraError::FeatureError { ref name, .. } if name == "Bogus"));

    let err = rig
        .camera
        .set_feature("PayloadSize", FeatureValue::Int(1))
        .await
        .unwrap_err();
    assert!(matches!(err, CameraError::FeatureError { ref name, .. } if name == "PayloadSize"));
}

#[tokio::test]
async fn test_geometry_locked_while_streaming() {
    let rig = triggered_rig().await;
    rig.camera.start_streaming(None).await.unwrap();

    let err = rig
        .camera
        .set_feature("Width", FeatureValue::Int(32))
        .await
        .unwrap_err();
    assert!(matches!(err, CameraError::FeatureError { .. }));
    assert!(rig
        .camera
        .set_pixel_format(&PixelFormat::Mono16)
        .await
        .is_err());
    rig.camera.release().await;
}

#[tokio::test]
async fn test_settings_round_trip_rereads_pixel_format() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("camera.xml");
    let rig = rig();
    rig.camera.initialize_configured().await.unwrap();

    rig.camera
        .set_feature("Gain", FeatureValue::Float(7.5))
        .await
        .unwrap();
    rig.camera
        .set_pixel_format(&PixelFormat::Mono16)
        .await
        .unwrap();
    rig.camera.save_settings(&path).await.unwrap();

    rig.camera
        .set_feature("Gain", FeatureValue::Float(1.0))
        .await
        .unwrap();
    rig.camera.set_pixel_format(&PixelFormat::Mono8).await.unwrap();

    let format = rig.camera.load_settings(&path).await.unwrap();
    assert_eq!(format, PixelFormat::Mono16);
    assert_eq!(
        rig.camera.get_feature("Gain").await.unwrap(),
        FeatureValue::Float(7.5)
    );
}

#[tokio::test]
async fn test_load_missing_settings_file() {
    let dir = tempfile::tempdir().unwrap();
    let rig = rig();
    rig.camera.initialize_configured().await.unwrap();

    let err = rig
        .camera
        .load_settings(&dir.path().join("absent.xml"))
        .await
        .unwrap_err();
    assert!(matches!(err, CameraError::Settings { .. }));
}

// =============================================================================
// Saving and release
// =============================================================================

#[tokio::test]
async fn test_save_latest_by_patient() {
    let dir = tempfile::tempdir().unwrap();
    let config = CameraConfig {
        capture_dir: dir.path().to_path_buf(),
        ..Default::default()
    };
    let rig = rig_with(MockCameraSystem::single(), config);
    rig.camera.initialize_configured().await.unwrap();

    let saved = rig.camera.save_latest(Some("P-042")).await.unwrap();
    assert!(saved.raw.starts_with(dir.path().join("P-042")));
    assert_eq!(std::fs::read(&saved.raw).unwrap().len(), 64 * 48);
    assert!(saved.metadata.exists());

    let frame = rig.camera.capture_single(None).await.unwrap();
    let saved = rig.camera.save_frame(&frame, None).await.unwrap();
    assert!(saved.raw.starts_with(dir.path().join("unassigned")));
}

#[tokio::test]
async fn test_release_is_idempotent() {
    let rig = triggered_rig().await;
    let mut events = rig.status.subscribe();
    rig.camera.start_streaming(None).await.unwrap();
    trigger(&rig.probe, 1).await;

    rig.camera.release().await;
    assert!(!rig.probe.is_streaming());
    assert!(!rig.probe.is_open());
    assert_eq!(rig.camera.state(), ControllerState::Disconnected);
    assert!(rig.camera.camera_info().is_none());

    rig.camera.release().await;
    assert_eq!(rig.probe.closes(), 1);
    assert!(events.try_recv().is_ok());

    // The camera can be opened again.
    rig.camera.initialize_configured().await.unwrap();
    assert_eq!(rig.probe.opens(), 2);
}
