//! Imaging acquisition controller.
//!
//! Wraps one vendor camera: selection and open with fallbacks, single-frame
//! capture, continuous streaming into a latest-frame cache, feature access,
//! settings files and frame saving.
//!
//! Vendor calls block, so they run on tokio's blocking pool. Streaming
//! callbacks arrive on the driver's own thread and only touch the
//! components in [`crate::components`].
//!
//! # Usage
//!
//! ```rust,ignore
//! use tosca_driver_camera::{CameraConfig, ImagingController};
//!
//! let camera = ImagingController::new(CameraConfig::default(), system, status_sink);
//! camera.initialize_configured().await?;
//! camera.start_streaming(None).await?;
//! let frame = camera.get_latest_frame();
//! camera.release().await;
//! ```

use crate::components::callback::decode;
use crate::components::{
    save_frame, CounterSnapshot, FrameCallback, FrameTap, LatestFrameCache, SavedFrame,
    StreamCounters, TapHandle, TapRegistry,
};
use crate::config::CameraConfig;
use crate::error::CameraError;
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tosca_core::camera::{
    AccessMode, CameraDevice, CameraInfo, CameraSystem, FeatureValue, VendorError, VendorErrorCode,
};
use tosca_core::state::{ControllerState, ObservableState, Operation, StateError};
use tosca_core::status::{DeviceKind, StatusSink};
use tosca_core::{Frame, PixelFormat};
use tracing::instrument;

/// Cache poll period while waiting for a fresh streamed frame.
const STREAM_POLL: Duration = Duration::from_millis(5);

/// Run a blocking vendor call on the blocking pool.
async fn blocking<T, F>(task: F) -> Result<T, CameraError>
where
    F: FnOnce() -> Result<T, CameraError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task).await.map_err(|e| {
        CameraError::Vendor(VendorError::new(
            VendorErrorCode::Other,
            format!("camera task failed: {}", e),
        ))
    })?
}

/// An opened camera.
#[derive(Clone)]
struct Session {
    device: Arc<dyn CameraDevice>,
    info: CameraInfo,
    access_mode: AccessMode,
}

/// Controller for the imaging sensor.
pub struct ImagingController {
    config: CameraConfig,
    system: Arc<dyn CameraSystem>,
    session: RwLock<Option<Session>>,
    streaming: AtomicBool,
    /// Serializes initialize, streaming start/stop, single capture and release.
    lifecycle: tokio::sync::Mutex<()>,
    cache: Arc<LatestFrameCache>,
    taps: Arc<TapRegistry>,
    counters: Arc<StreamCounters>,
    /// Last issued frame sequence id; never reset.
    sequence: Arc<AtomicU64>,
    state: ObservableState,
    status: StatusSink,
}

impl ImagingController {
    pub fn new(config: CameraConfig, system: Arc<dyn CameraSystem>, status: StatusSink) -> Self {
        Self {
            config,
            system,
            session: RwLock::new(None),
            streaming: AtomicBool::new(false),
            lifecycle: tokio::sync::Mutex::new(()),
            cache: Arc::new(LatestFrameCache::new()),
            taps: Arc::new(TapRegistry::new()),
            counters: Arc::new(StreamCounters::default()),
            sequence: Arc::new(AtomicU64::new(0)),
            state: ObservableState::new("camera"),
            status,
        }
    }

    pub fn config(&self) -> &CameraConfig {
        &self.config
    }

    pub fn state(&self) -> ControllerState {
        self.state.get()
    }

    pub fn subscribe_state(&self) -> tokio::sync::watch::Receiver<ControllerState> {
        self.state.subscribe()
    }

    /// The opened camera, if any.
    pub fn camera_info(&self) -> Option<CameraInfo> {
        self.session.read().as_ref().map(|s| s.info.clone())
    }

    /// Access mode the camera was actually opened in.
    pub fn access_mode(&self) -> Option<AccessMode> {
        self.session.read().as_ref().map(|s| s.access_mode)
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::SeqCst)
    }

    /// Counters of the current (or last) stream.
    pub fn counters(&self) -> CounterSnapshot {
        self.counters.snapshot()
    }

    /// Add an observer for every cached frame.
    pub fn register_tap(&self, tap: Box<dyn FrameTap>) -> TapHandle {
        self.taps.register(tap)
    }

    pub fn unregister_tap(&self, handle: TapHandle) -> bool {
        self.taps.unregister(handle)
    }

    /// Cameras the vendor driver can see.
    #[instrument(skip(self), err)]
    pub async fn list_cameras(&self) -> Result<Vec<CameraInfo>, CameraError> {
        let system = self.system.clone();
        blocking(move || system.cameras().map_err(CameraError::from)).await
    }

    /// [`initialize`](Self::initialize) with the configured selector, pixel
    /// format and access mode.
    pub async fn initialize_configured(&self) -> Result<CameraInfo, CameraError> {
        let selector = self.config.selector.clone();
        let format = self.config.pixel_format.clone();
        self.initialize(selector.as_deref(), &format, self.config.access_mode)
            .await
    }

    /// Open a camera, replacing any open one.
    ///
    /// An unknown or missing `selector` picks the first camera. A refused
    /// `access_mode` falls back to the default mode, and an unsupported
    /// `pixel_format` leaves the device default in place; the format in
    /// effect is read back from the device.
    #[instrument(skip(self), err)]
    pub async fn initialize(
        &self,
        selector: Option<&str>,
        pixel_format: &PixelFormat,
        access_mode: AccessMode,
    ) -> Result<CameraInfo, CameraError> {
        let _lifecycle = self.lifecycle.lock().await;
        self.release_locked().await;
        self.state.set(ControllerState::Connecting);

        let system = self.system.clone();
        let selector = selector.map(str::to_string);
        let requested = pixel_format.clone();
        let resolution = self.config.resolution;
        let opened = blocking(move || {
            open_camera(
                system.as_ref(),
                selector.as_deref(),
                &requested,
                access_mode,
                resolution,
            )
        })
        .await;

        match opened {
            Ok((session, format)) => {
                let info = session.info.clone();
                tracing::info!(
                    camera = %info.id,
                    model = %info.model,
                    mode = %session.access_mode,
                    pixel_format = %format,
                    "camera opened"
                );
                self.status.info(
                    DeviceKind::Camera,
                    format!("Opened {} ({}), {}", info.model, info.serial, format),
                );
                *self.session.write() = Some(session);
                self.state.set(ControllerState::Connected);
                Ok(info)
            }
            Err(e) => {
                self.state.set(ControllerState::Disconnected);
                Err(self.report(e))
            }
        }
    }

    /// Acquire one frame.
    ///
    /// Works without streaming. While streaming, waits for the next frame to
    /// reach the cache instead. `timeout` defaults to `capture_timeout_ms`.
    #[instrument(skip(self), err)]
    pub async fn capture_single(&self, timeout: Option<Duration>) -> Result<Frame, CameraError> {
        let timeout = timeout.unwrap_or_else(|| self.config.capture_timeout());
        if self.is_streaming() {
            return self.next_streamed_frame(timeout).await;
        }

        let lifecycle = self.lifecycle.lock().await;
        if self.is_streaming() {
            drop(lifecycle);
            return self.next_streamed_frame(timeout).await;
        }
        let session = self.operable_session()?;
        self.state.set(ControllerState::Busy(Operation::Capturing));

        let sequence = self.sequence.clone();
        let device = session.device.clone();
        let result = blocking(move || {
            let buffer = device.acquire_frame(timeout).map_err(|e| match e.code {
                VendorErrorCode::Timeout => CameraError::CaptureTimeout(timeout),
                _ => CameraError::Vendor(e),
            })?;
            decode(&buffer, &sequence).map_err(|drop| CameraError::IncompleteFrame(drop.frame_id()))
        })
        .await;

        match result {
            Ok(frame) => {
                self.state.set(ControllerState::Connected);
                self.cache.store(frame.clone());
                log::debug!("Captured frame {}", frame.sequence_id);
                drop(lifecycle);
                Ok(frame)
            }
            Err(e) => {
                if is_device_lost(&e) {
                    self.state.fault(&e);
                } else {
                    self.state.set(ControllerState::Connected);
                }
                drop(lifecycle);
                Err(self.report(e))
            }
        }
    }

    async fn next_streamed_frame(&self, timeout: Duration) -> Result<Frame, CameraError> {
        let after = self.cache.sequence_id().unwrap_or(0);
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(frame) = self.cache.get().filter(|f| f.sequence_id > after) {
                return Ok(frame);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(self.report(CameraError::CaptureTimeout(timeout)));
            }
            tokio::time::sleep(STREAM_POLL).await;
        }
    }

    /// Begin continuous acquisition with `buffer_count` driver buffers
    /// (default `buffer_count` from the config).
    #[instrument(skip(self), err)]
    pub async fn start_streaming(&self, buffer_count: Option<usize>) -> Result<(), CameraError> {
        let _lifecycle = self.lifecycle.lock().await;
        if self.is_streaming() {
            return Err(self.report(CameraError::AlreadyStreaming));
        }
        let session = self.operable_session()?;
        let count = buffer_count.unwrap_or(self.config.buffer_count);

        self.counters.reset();
        let handler = FrameCallback::new(
            self.cache.clone(),
            self.taps.clone(),
            self.counters.clone(),
            self.sequence.clone(),
        )
        .into_handler();

        let device = session.device.clone();
        blocking(move || device.start_streaming(count, handler).map_err(CameraError::from))
            .await
            .map_err(|e| self.report(e))?;

        self.streaming.store(true, Ordering::SeqCst);
        self.state.set(ControllerState::Busy(Operation::Streaming));
        self.status.info(
            DeviceKind::Camera,
            format!("Streaming started ({} buffers)", count),
        );
        Ok(())
    }

    /// Stop continuous acquisition and clear the latest frame. Idempotent.
    #[instrument(skip(self), err)]
    pub async fn stop_streaming(&self) -> Result<(), CameraError> {
        let _lifecycle = self.lifecycle.lock().await;
        self.stop_streaming_locked().await
    }

    async fn stop_streaming_locked(&self) -> Result<(), CameraError> {
        if !self.streaming.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        let device = self.session.read().as_ref().map(|s| s.device.clone());
        let result = match device {
            Some(device) => {
                blocking(move || device.stop_streaming().map_err(CameraError::from)).await
            }
            None => Ok(()),
        };

        self.cache.clear();
        if self.state.get() == ControllerState::Busy(Operation::Streaming) {
            self.state.set(ControllerState::Connected);
        }

        let counters = self.counters.snapshot();
        tracing::info!(
            delivered = counters.frames_delivered,
            dropped = counters.frames_dropped,
            callbacks = counters.callback_invocations,
            returned = counters.buffers_returned,
            "streaming stopped"
        );
        if counters.callback_invocations != counters.buffers_returned {
            tracing::error!(
                "{} buffers were not returned to the driver",
                counters.callback_invocations - counters.buffers_returned
            );
        }
        self.status.info(DeviceKind::Camera, "Streaming stopped");
        result.map_err(|e| self.report(e))
    }

    /// Most recent complete frame. Never waits on the driver.
    pub fn get_latest_frame(&self) -> Option<Frame> {
        self.cache.get()
    }

    #[instrument(skip(self), err)]
    pub async fn get_feature(&self, name: &str) -> Result<FeatureValue, CameraError> {
        let session = self.connected_session()?;
        let name = name.to_string();
        blocking(move || {
            session
                .device
                .feature(&name)
                .map_err(|e| CameraError::feature(&name, e))
        })
        .await
        .map_err(|e| self.report(e))
    }

    #[instrument(skip(self), err)]
    pub async fn set_feature(&self, name: &str, value: FeatureValue) -> Result<(), CameraError> {
        let session = self.operable_session()?;
        let name = name.to_string();
        blocking(move || {
            session
                .device
                .set_feature(&name, &value)
                .map_err(|e| CameraError::feature(&name, e))?;
            log::debug!("Camera feature {} set to {}", name, value);
            Ok(())
        })
        .await
        .map_err(|e| self.report(e))
    }

    #[instrument(skip(self), err)]
    pub async fn available_pixel_formats(&self) -> Result<Vec<PixelFormat>, CameraError> {
        let session = self.connected_session()?;
        blocking(move || session.device.pixel_formats().map_err(CameraError::from)).await
    }

    /// Pixel format currently in effect on the device.
    #[instrument(skip(self), err)]
    pub async fn pixel_format(&self) -> Result<PixelFormat, CameraError> {
        let session = self.connected_session()?;
        blocking(move || session.device.pixel_format().map_err(CameraError::from)).await
    }

    /// Change the pixel format. Not allowed while streaming.
    #[instrument(skip(self), err)]
    pub async fn set_pixel_format(&self, format: &PixelFormat) -> Result<PixelFormat, CameraError> {
        self.ensure_idle("change the pixel format")?;
        let session = self.operable_session()?;
        let format = format.clone();
        blocking(move || {
            session
                .device
                .set_pixel_format(&format)
                .map_err(|e| CameraError::feature("PixelFormat", e))?;
            session.device.pixel_format().map_err(CameraError::from)
        })
        .await
        .map_err(|e| self.report(e))
    }

    /// Export the device's settings to a vendor settings file.
    #[instrument(skip(self), err)]
    pub async fn save_settings(&self, path: &Path) -> Result<(), CameraError> {
        let session = self.connected_session()?;
        let path = path.to_path_buf();
        blocking(move || {
            session
                .device
                .save_settings(&path)
                .map_err(|e| settings_error(&path, e))
        })
        .await
        .map_err(|e| self.report(e))
    }

    /// Load a vendor settings file and return the pixel format now in effect.
    #[instrument(skip(self), err)]
    pub async fn load_settings(&self, path: &Path) -> Result<PixelFormat, CameraError> {
        self.ensure_idle("load settings")?;
        let session = self.operable_session()?;
        let path = path.to_path_buf();
        let format = blocking(move || {
            session
                .device
                .load_settings(&path)
                .map_err(|e| settings_error(&path, e))?;
            session.device.pixel_format().map_err(CameraError::from)
        })
        .await
        .map_err(|e| self.report(e))?;

        tracing::info!(pixel_format = %format, "camera settings loaded");
        Ok(format)
    }

    /// Write `frame` under the capture directory, keyed by patient.
    #[instrument(skip(self, frame), fields(sequence_id = frame.sequence_id), err)]
    pub async fn save_frame(
        &self,
        frame: &Frame,
        patient: Option<&str>,
    ) -> Result<SavedFrame, CameraError> {
        let root: PathBuf = self.config.capture_dir.clone();
        let frame = frame.clone();
        let patient = patient.map(str::to_string);
        let saved = blocking(move || save_frame(&root, &frame, patient.as_deref()))
            .await
            .map_err(|e| self.report(e))?;
        self.status.info(
            DeviceKind::Camera,
            format!("Saved {}", saved.raw.display()),
        );
        Ok(saved)
    }

    /// Save the latest streamed frame, or capture one when not streaming.
    pub async fn save_latest(&self, patient: Option<&str>) -> Result<SavedFrame, CameraError> {
        let frame = match self.get_latest_frame() {
            Some(frame) if self.is_streaming() => frame,
            _ => self.capture_single(None).await?,
        };
        self.save_frame(&frame, patient).await
    }

    /// Stop streaming and close the camera. Idempotent, legal when faulted.
    #[instrument(skip(self))]
    pub async fn release(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        self.release_locked().await;
    }

    async fn release_locked(&self) {
        if let Err(e) = self.stop_streaming_locked().await {
            log::warn!("Camera stream did not stop cleanly: {}", e);
        }

        let session = self.session.write().take();
        if let Some(session) = session {
            let device = session.device.clone();
            let closed = blocking(move || {
                device.close();
                Ok(())
            })
            .await;
            if let Err(e) = closed {
                log::warn!("Camera close failed: {}", e);
            }
            self.status.info(
                DeviceKind::Camera,
                format!("Released {}", session.info.model),
            );
        }
        self.state.set(ControllerState::Disconnected);
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn connected_session(&self) -> Result<Session, CameraError> {
        self.session
            .read()
            .clone()
            .ok_or(CameraError::NotInitialized)
    }

    fn operable_session(&self) -> Result<Session, CameraError> {
        let session = self.connected_session()?;
        self.state.ensure_operable()?;
        Ok(session)
    }

    fn ensure_idle(&self, action: &str) -> Result<(), CameraError> {
        if self.is_streaming() {
            return Err(self.report(CameraError::State(StateError::Invalid {
                action: action.to_string(),
                state: "streaming".to_string(),
            })));
        }
        Ok(())
    }

    fn report(&self, err: CameraError) -> CameraError {
        self.status.report(DeviceKind::Camera, &err);
        err
    }
}

impl std::fmt::Debug for ImagingController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImagingController")
            .field("state", &self.state.get())
            .field("camera", &self.camera_info().map(|i| i.id))
            .field("streaming", &self.is_streaming())
            .finish()
    }
}

// =============================================================================
// Opening
// =============================================================================

fn select_camera<'a>(cameras: &'a [CameraInfo], selector: Option<&str>) -> Option<&'a CameraInfo> {
    if let Some(selector) = selector {
        if let Some(found) = cameras.iter().find(|c| c.matches(selector)) {
            return Some(found);
        }
        tracing::warn!(selector, "camera not found, using the first one available");
    }
    cameras.first()
}

fn apply_pixel_format(device: &dyn CameraDevice, requested: &PixelFormat) {
    let supported = match device.pixel_formats() {
        Ok(supported) => supported,
        Err(e) => {
            tracing::warn!(error = %e, "cannot list pixel formats, keeping device default");
            return;
        }
    };
    if !supported.contains(requested) {
        tracing::warn!(
            requested = %requested,
            "pixel format not supported, keeping device default"
        );
        return;
    }
    if let Err(e) = device.set_pixel_format(requested) {
        tracing::warn!(requested = %requested, error = %e, "pixel format refused, keeping device default");
    }
}

/// Enumerate, select, open and configure. Returns the session and the pixel
/// format in effect.
fn open_camera(
    system: &dyn CameraSystem,
    selector: Option<&str>,
    requested: &PixelFormat,
    access_mode: AccessMode,
    resolution: Option<[u32; 2]>,
) -> Result<(Session, PixelFormat), CameraError> {
    let cameras = system
        .cameras()
        .map_err(|e| CameraError::InitializationFailed(format!("camera enumeration failed: {}", e)))?;
    let chosen = select_camera(&cameras, selector)
        .ok_or_else(|| CameraError::InitializationFailed("no cameras detected".to_string()))?;

    let open_failed =
        |e: VendorError| CameraError::InitializationFailed(format!("cannot open {}: {}", chosen.id, e));
    let (device, access_mode) = match system.open(&chosen.id, access_mode) {
        Ok(device) => (device, access_mode),
        Err(e) if access_mode != AccessMode::default() => {
            let fallback = AccessMode::default();
            tracing::warn!(
                camera = %chosen.id,
                refused = %access_mode,
                error = %e,
                "access mode refused, falling back to {}",
                fallback
            );
            (system.open(&chosen.id, fallback).map_err(open_failed)?, fallback)
        }
        Err(e) => return Err(open_failed(e)),
    };
    let device: Arc<dyn CameraDevice> = Arc::from(device);

    apply_pixel_format(device.as_ref(), requested);
    if let Some([width, height]) = resolution {
        for (name, value) in [("Width", width), ("Height", height)] {
            if let Err(e) = device.set_feature(name, &FeatureValue::Int(i64::from(value))) {
                tracing::warn!(feature = name, value, error = %e, "resolution not applied");
            }
        }
    }

    let format = match device.pixel_format() {
        Ok(format) => format,
        Err(e) => {
            device.close();
            return Err(CameraError::InitializationFailed(format!(
                "cannot read pixel format: {}",
                e
            )));
        }
    };

    let session = Session {
        info: device.info(),
        device,
        access_mode,
    };
    Ok((session, format))
}

fn settings_error(path: &Path, err: VendorError) -> CameraError {
    CameraError::Settings {
        path: path.to_path_buf(),
        reason: err.to_string(),
    }
}

/// Vendor errors after which the device handle is no longer usable.
fn is_device_lost(err: &CameraError) -> bool {
    matches!(
        err,
        CameraError::Vendor(VendorError {
            code: VendorErrorCode::NotFound | VendorErrorCode::Io,
            ..
        })
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(id: &str, serial: &str) -> CameraInfo {
        CameraInfo {
            id: id.into(),
            serial: serial.into(),
            model: "1800 U-240m".into(),
            name: "Allied Vision 1800 U-240m".into(),
        }
    }

    #[test]
    fn test_select_camera_by_serial_or_first() {
        let cameras = vec![info("DEV_A", "S-1"), info("DEV_B", "S-2")];
        assert_eq!(select_camera(&cameras, Some("S-2")).unwrap().id, "DEV_B");
        assert_eq!(select_camera(&cameras, Some("missing")).unwrap().id, "DEV_A");
        assert_eq!(select_camera(&cameras, None).unwrap().id, "DEV_A");
        assert!(select_camera(&[], None).is_none());
    }

    #[test]
    fn test_device_lost_classification() {
        assert!(is_device_lost(&CameraError::Vendor(VendorError::new(
            VendorErrorCode::NotFound,
            "unplugged"
        ))));
        assert!(!is_device_lost(&CameraError::CaptureTimeout(Duration::from_millis(5))));
    }
}
