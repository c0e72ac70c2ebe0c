//! Simulated vendor camera system.
//!
//! [`MockCameraSystem`] implements the vendor driver traits from
//! `tosca_core::camera`. Streaming runs on a driver-owned thread with a fixed
//! buffer pool, like a real SDK: each filled buffer goes to the registered
//! handler and only comes back to the pool through
//! [`BufferQueue::queue_buffer`]. A handler that leaks buffers starves the
//! pool, which the probe reports as starved deliveries.
//!
//! Tests inspect and steer a camera through its [`MockCameraProbe`].

use bytes::BytesMut;
use crossbeam_queue::SegQueue;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tosca_core::camera::{
    AccessMode, BufferQueue, CameraDevice, CameraInfo, CameraSystem, FeatureValue, FrameHandler,
    FrameStatus, VendorBuffer, VendorError, VendorErrorCode,
};
use tosca_core::PixelFormat;

/// Features the host may read but never write.
const READ_ONLY_FEATURES: [&str; 3] = ["DeviceModelName", "DeviceSerialNumber", "PayloadSize"];

/// Features that change the frame geometry.
const GEOMETRY_FEATURES: [&str; 2] = ["Width", "Height"];

/// How long a manual trigger waits for the delivery thread.
const TRIGGER_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// Camera description
// =============================================================================

/// Static description of one simulated camera.
#[derive(Debug, Clone)]
pub struct MockCameraSpec {
    pub id: String,
    pub serial: String,
    pub model: String,
    pub name: String,
    pub width: u32,
    pub height: u32,
    /// Supported formats; the first is the power-on default.
    pub pixel_formats: Vec<PixelFormat>,
    /// Free-running delivery period while streaming.
    pub frame_interval: Duration,
}

impl Default for MockCameraSpec {
    fn default() -> Self {
        Self {
            id: "DEV_MOCK0001".to_string(),
            serial: "SIM-0001".to_string(),
            model: "Mock 1800 U-240m".to_string(),
            name: "Simulated Camera".to_string(),
            width: 64,
            height: 48,
            pixel_formats: vec![PixelFormat::Mono8, PixelFormat::Mono16],
            frame_interval: Duration::from_millis(33),
        }
    }
}

impl MockCameraSpec {
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_serial(mut self, serial: impl Into<String>) -> Self {
        self.serial = serial.into();
        self
    }

    pub fn with_geometry(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_pixel_formats(mut self, formats: Vec<PixelFormat>) -> Self {
        self.pixel_formats = formats;
        self
    }

    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval;
        self
    }

    fn info(&self) -> CameraInfo {
        CameraInfo {
            id: self.id.clone(),
            serial: self.serial.clone(),
            model: self.model.clone(),
            name: self.name.clone(),
        }
    }

    fn default_format(&self) -> PixelFormat {
        self.pixel_formats
            .first()
            .cloned()
            .unwrap_or(PixelFormat::Mono8)
    }
}

// =============================================================================
// Shared camera state
// =============================================================================

/// Streaming counters, cumulative over the camera's lifetime.
#[derive(Debug, Default)]
struct StreamStats {
    delivered: AtomicU64,
    returned: AtomicU64,
    starved: AtomicU64,
}

struct Trigger {
    frames: usize,
    done: mpsc::Sender<usize>,
}

struct StreamWorker {
    running: Arc<AtomicBool>,
    trigger: Option<mpsc::Sender<Trigger>>,
    handle: JoinHandle<()>,
}

struct CameraShared {
    spec: MockCameraSpec,
    features: Mutex<BTreeMap<String, FeatureValue>>,
    pixel_format: Mutex<PixelFormat>,
    is_open: AtomicBool,
    opens: AtomicUsize,
    closes: AtomicUsize,
    denied_modes: Mutex<Vec<AccessMode>>,
    acquisition_fails: AtomicBool,
    incomplete_every: AtomicU64,
    truncate_every: AtomicU64,
    manual_trigger: AtomicBool,
    frame_counter: AtomicU64,
    stats: Arc<StreamStats>,
    stream: Mutex<Option<StreamWorker>>,
}

impl CameraShared {
    fn new(spec: MockCameraSpec) -> Self {
        let mut features = BTreeMap::new();
        features.insert("ExposureTime".to_string(), FeatureValue::Float(10_000.0));
        features.insert("Gain".to_string(), FeatureValue::Float(0.0));
        features.insert("AcquisitionFrameRate".to_string(), FeatureValue::Float(30.0));
        features.insert("TriggerMode".to_string(), FeatureValue::Text("Off".into()));
        features.insert("Width".to_string(), FeatureValue::Int(i64::from(spec.width)));
        features.insert("Height".to_string(), FeatureValue::Int(i64::from(spec.height)));
        features.insert("DeviceModelName".to_string(), FeatureValue::Text(spec.model.clone()));
        features.insert(
            "DeviceSerialNumber".to_string(),
            FeatureValue::Text(spec.serial.clone()),
        );

        let format = spec.default_format();
        let shared = Self {
            features: Mutex::new(features),
            pixel_format: Mutex::new(format.clone()),
            is_open: AtomicBool::new(false),
            opens: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            denied_modes: Mutex::new(Vec::new()),
            acquisition_fails: AtomicBool::new(false),
            incomplete_every: AtomicU64::new(0),
            truncate_every: AtomicU64::new(0),
            manual_trigger: AtomicBool::new(false),
            frame_counter: AtomicU64::new(0),
            stats: Arc::new(StreamStats::default()),
            stream: Mutex::new(None),
            spec,
        };
        shared.update_payload_size(&format);
        shared
    }

    /// Current `Width`/`Height` feature values.
    fn geometry(&self) -> (u32, u32) {
        let features = self.features.lock();
        let dimension = |name: &str, fallback: u32| match features.get(name) {
            Some(FeatureValue::Int(v)) if *v > 0 => u32::try_from(*v).unwrap_or(fallback),
            _ => fallback,
        };
        (
            dimension("Width", self.spec.width),
            dimension("Height", self.spec.height),
        )
    }

    fn payload_len(&self, format: &PixelFormat) -> usize {
        let bpp = format.bytes_per_pixel().unwrap_or(1);
        let (width, height) = self.geometry();
        width as usize * height as usize * bpp
    }

    fn update_payload_size(&self, format: &PixelFormat) {
        let len = self.payload_len(format) as i64;
        self.features
            .lock()
            .insert("PayloadSize".to_string(), FeatureValue::Int(len));
    }

    fn is_streaming(&self) -> bool {
        self.stream.lock().is_some()
    }

    fn apply_pixel_format(&self, format: &PixelFormat) -> Result<(), VendorError> {
        if !self.spec.pixel_formats.contains(format) {
            return Err(VendorError::new(
                VendorErrorCode::NotSupported,
                format!("pixel format {} not supported", format),
            ));
        }
        if self.is_streaming() {
            return Err(VendorError::new(
                VendorErrorCode::AccessDenied,
                "pixel format is locked while streaming",
            ));
        }
        *self.pixel_format.lock() = format.clone();
        self.update_payload_size(format);
        Ok(())
    }

    /// Store a feature value, coercing numbers to the feature's type.
    fn store_feature(&self, name: &str, value: &FeatureValue) -> Result<(), VendorError> {
        let mut features = self.features.lock();
        let current = features.get(name).ok_or_else(|| {
            VendorError::new(VendorErrorCode::NotFound, format!("no feature named {}", name))
        })?;

        let coerced = match (current, value) {
            (FeatureValue::Float(_), FeatureValue::Int(v)) => FeatureValue::Float(*v as f64),
            (FeatureValue::Float(_), FeatureValue::Float(_))
            | (FeatureValue::Int(_), FeatureValue::Int(_))
            | (FeatureValue::Bool(_), FeatureValue::Bool(_))
            | (FeatureValue::Text(_), FeatureValue::Text(_)) => value.clone(),
            (FeatureValue::Text(_), other) => FeatureValue::Text(other.to_string()),
            (_, other) => {
                return Err(VendorError::new(
                    VendorErrorCode::InvalidValue,
                    format!("'{}' is not a valid value for {}", other, name),
                ))
            }
        };
        features.insert(name.to_string(), coerced);
        Ok(())
    }

    /// Produce the next frame into `buffer`.
    fn fill(&self, buffer: &mut VendorBuffer) {
        let frame_id = self.frame_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let format = self.pixel_format.lock().clone();
        let bpp = format.bytes_per_pixel().unwrap_or(1);
        let (width, height) = self.geometry();

        buffer.payload.clear();
        buffer.payload.reserve(self.payload_len(&format));
        for y in 0..height {
            for x in 0..width {
                let value = u64::from(x) + u64::from(y) + frame_id;
                match bpp {
                    2 => buffer
                        .payload
                        .extend_from_slice(&((value * 16) as u16).to_le_bytes()),
                    n => buffer.payload.extend(std::iter::repeat(value as u8).take(n)),
                }
            }
        }

        buffer.frame_id = frame_id;
        buffer.width = width;
        buffer.height = height;
        buffer.pixel_format = format;
        buffer.status = FrameStatus::Complete;

        let incomplete = self.incomplete_every.load(Ordering::SeqCst);
        if incomplete > 0 && frame_id % incomplete == 0 {
            buffer.status = FrameStatus::Incomplete;
        }
        let truncate = self.truncate_every.load(Ordering::SeqCst);
        if truncate > 0 && frame_id % truncate == 0 {
            let half = buffer.payload.len() / 2;
            buffer.payload.truncate(half);
        }
    }

    /// Hand one pooled buffer to `handler`; false when the pool is empty.
    fn deliver(&self, queue: &ReturnQueue, handler: &FrameHandler) -> bool {
        let Some(mut buffer) = queue.pool.pop() else {
            self.stats.starved.fetch_add(1, Ordering::SeqCst);
            tracing::warn!(camera = %self.spec.id, "buffer pool exhausted, frame skipped");
            return false;
        };
        self.fill(&mut buffer);
        self.stats.delivered.fetch_add(1, Ordering::SeqCst);
        handler(buffer, queue);
        true
    }

    fn stop_worker(&self) {
        let worker = self.stream.lock().take();
        if let Some(worker) = worker {
            worker.running.store(false, Ordering::SeqCst);
            drop(worker.trigger);
            if worker.handle.join().is_err() {
                tracing::error!(camera = %self.spec.id, "delivery thread panicked");
            }
            tracing::debug!(camera = %self.spec.id, "streaming stopped");
        }
    }
}

/// Buffer pool plus the return path handed to the frame handler.
struct ReturnQueue {
    pool: SegQueue<VendorBuffer>,
    stats: Arc<StreamStats>,
}

impl BufferQueue for ReturnQueue {
    fn queue_buffer(&self, buffer: VendorBuffer) {
        self.stats.returned.fetch_add(1, Ordering::SeqCst);
        self.pool.push(buffer);
    }
}

fn run_delivery(
    shared: Arc<CameraShared>,
    queue: Arc<ReturnQueue>,
    handler: FrameHandler,
    running: Arc<AtomicBool>,
    triggers: Option<mpsc::Receiver<Trigger>>,
) {
    match triggers {
        Some(rx) => {
            while running.load(Ordering::SeqCst) {
                match rx.recv_timeout(Duration::from_millis(20)) {
                    Ok(trigger) => {
                        let delivered = (0..trigger.frames)
                            .filter(|_| shared.deliver(&queue, &handler))
                            .count();
                        let _ = trigger.done.send(delivered);
                    }
                    Err(mpsc::RecvTimeoutError::Timeout) => continue,
                    Err(mpsc::RecvTimeoutError::Disconnected) => break,
                }
            }
        }
        None => {
            let interval = shared.spec.frame_interval;
            while running.load(Ordering::SeqCst) {
                std::thread::sleep(interval);
                if running.load(Ordering::SeqCst) {
                    shared.deliver(&queue, &handler);
                }
            }
        }
    }
}

// =============================================================================
// CameraSystem
// =============================================================================

/// Simulated vendor driver entry point.
pub struct MockCameraSystem {
    cameras: Vec<Arc<CameraShared>>,
}

impl Default for MockCameraSystem {
    fn default() -> Self {
        Self::single()
    }
}

impl MockCameraSystem {
    /// A system with no cameras attached.
    pub fn empty() -> Self {
        Self {
            cameras: Vec::new(),
        }
    }

    /// A system with one default camera.
    pub fn single() -> Self {
        Self::empty().with_camera(MockCameraSpec::default())
    }

    pub fn with_camera(mut self, spec: MockCameraSpec) -> Self {
        self.cameras.push(Arc::new(CameraShared::new(spec)));
        self
    }

    /// Test handle for the camera with `id`.
    pub fn probe(&self, id: &str) -> Option<MockCameraProbe> {
        self.cameras
            .iter()
            .find(|c| c.spec.id == id)
            .map(|c| MockCameraProbe { shared: c.clone() })
    }

    /// Test handle for the first camera.
    pub fn first_probe(&self) -> Option<MockCameraProbe> {
        self.cameras
            .first()
            .map(|c| MockCameraProbe { shared: c.clone() })
    }
}

impl CameraSystem for MockCameraSystem {
    fn cameras(&self) -> Result<Vec<CameraInfo>, VendorError> {
        Ok(self.cameras.iter().map(|c| c.spec.info()).collect())
    }

    fn open(&self, id: &str, mode: AccessMode) -> Result<Box<dyn CameraDevice>, VendorError> {
        let shared = self
            .cameras
            .iter()
            .find(|c| c.spec.id == id)
            .cloned()
            .ok_or_else(|| {
                VendorError::new(VendorErrorCode::NotFound, format!("no camera with id {}", id))
            })?;

        if shared.denied_modes.lock().contains(&mode) {
            return Err(VendorError::new(
                VendorErrorCode::AccessDenied,
                format!("{} access refused", mode),
            ));
        }
        if shared.is_open.swap(true, Ordering::SeqCst) {
            return Err(VendorError::new(
                VendorErrorCode::AccessDenied,
                format!("camera {} is already open", id),
            ));
        }
        shared.opens.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(camera = id, %mode, "mock camera opened");

        Ok(Box::new(MockCameraDevice { shared, mode }))
    }
}

// =============================================================================
// CameraDevice
// =============================================================================

struct MockCameraDevice {
    shared: Arc<CameraShared>,
    mode: AccessMode,
}

impl MockCameraDevice {
    fn require(&self, allowed: &[AccessMode], action: &str) -> Result<(), VendorError> {
        if allowed.contains(&self.mode) {
            Ok(())
        } else {
            Err(VendorError::new(
                VendorErrorCode::AccessDenied,
                format!("{} not permitted in {} access mode", action, self.mode),
            ))
        }
    }
}

impl CameraDevice for MockCameraDevice {
    fn info(&self) -> CameraInfo {
        self.shared.spec.info()
    }

    fn access_mode(&self) -> AccessMode {
        self.mode
    }

    fn pixel_formats(&self) -> Result<Vec<PixelFormat>, VendorError> {
        Ok(self.shared.spec.pixel_formats.clone())
    }

    fn pixel_format(&self) -> Result<PixelFormat, VendorError> {
        Ok(self.shared.pixel_format.lock().clone())
    }

    fn set_pixel_format(&self, format: &PixelFormat) -> Result<(), VendorError> {
        self.require(&[AccessMode::Full, AccessMode::Config], "setting the pixel format")?;
        self.shared.apply_pixel_format(format)
    }

    fn feature(&self, name: &str) -> Result<FeatureValue, VendorError> {
        if name == "PixelFormat" {
            return Ok(FeatureValue::Text(self.shared.pixel_format.lock().to_string()));
        }
        self.shared.features.lock().get(name).cloned().ok_or_else(|| {
            VendorError::new(VendorErrorCode::NotFound, format!("no feature named {}", name))
        })
    }

    fn set_feature(&self, name: &str, value: &FeatureValue) -> Result<(), VendorError> {
        self.require(&[AccessMode::Full, AccessMode::Config], "writing features")?;
        if READ_ONLY_FEATURES.contains(&name) {
            return Err(VendorError::new(
                VendorErrorCode::AccessDenied,
                format!("{} is read-only", name),
            ));
        }
        if name == "PixelFormat" {
            return self
                .shared
                .apply_pixel_format(&PixelFormat::from(value.to_string()));
        }
        if GEOMETRY_FEATURES.contains(&name) {
            if self.shared.is_streaming() {
                return Err(VendorError::new(
                    VendorErrorCode::AccessDenied,
                    format!("{} is locked while streaming", name),
                ));
            }
            self.shared.store_feature(name, value)?;
            let format = self.shared.pixel_format.lock().clone();
            self.shared.update_payload_size(&format);
            return Ok(());
        }
        self.shared.store_feature(name, value)
    }

    fn acquire_frame(&self, timeout: Duration) -> Result<VendorBuffer, VendorError> {
        self.require(&[AccessMode::Full], "acquisition")?;
        if self.shared.acquisition_fails.load(Ordering::SeqCst) {
            std::thread::sleep(timeout);
            return Err(VendorError::new(
                VendorErrorCode::Timeout,
                format!("no frame within {:?}", timeout),
            ));
        }

        let format = self.shared.pixel_format.lock().clone();
        let mut buffer = VendorBuffer {
            slot: 0,
            status: FrameStatus::Invalid,
            frame_id: 0,
            width: 0,
            height: 0,
            payload: BytesMut::with_capacity(self.shared.payload_len(&format)),
            pixel_format: format,
        };
        self.shared.fill(&mut buffer);
        Ok(buffer)
    }

    fn start_streaming(&self, buffer_count: usize, handler: FrameHandler) -> Result<(), VendorError> {
        self.require(&[AccessMode::Full], "streaming")?;
        if buffer_count == 0 {
            return Err(VendorError::new(
                VendorErrorCode::InvalidValue,
                "at least one buffer is required",
            ));
        }

        let mut stream = self.shared.stream.lock();
        if stream.is_some() {
            return Err(VendorError::new(
                VendorErrorCode::AccessDenied,
                "acquisition already running",
            ));
        }

        let format = self.shared.pixel_format.lock().clone();
        let capacity = self.shared.payload_len(&format);
        let queue = Arc::new(ReturnQueue {
            pool: SegQueue::new(),
            stats: self.shared.stats.clone(),
        });
        for slot in 0..buffer_count {
            queue.pool.push(VendorBuffer {
                slot,
                status: FrameStatus::Invalid,
                frame_id: 0,
                width: 0,
                height: 0,
                pixel_format: format.clone(),
                payload: BytesMut::with_capacity(capacity),
            });
        }

        let running = Arc::new(AtomicBool::new(true));
        let (trigger, triggers) = if self.shared.manual_trigger.load(Ordering::SeqCst) {
            let (tx, rx) = mpsc::channel();
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        let shared = self.shared.clone();
        let thread_running = running.clone();
        let handle = std::thread::Builder::new()
            .name(format!("mock-camera-{}", self.shared.spec.id))
            .spawn(move || run_delivery(shared, queue, handler, thread_running, triggers))
            .map_err(|e| VendorError::new(VendorErrorCode::Io, e.to_string()))?;

        *stream = Some(StreamWorker {
            running,
            trigger,
            handle,
        });
        tracing::debug!(camera = %self.shared.spec.id, buffer_count, "streaming started");
        Ok(())
    }

    fn stop_streaming(&self) -> Result<(), VendorError> {
        self.shared.stop_worker();
        Ok(())
    }

    fn save_settings(&self, path: &Path) -> Result<(), VendorError> {
        let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        xml.push_str(&format!("<CameraSettings camera=\"{}\">\n", self.shared.spec.id));
        for (name, value) in self.shared.features.lock().iter() {
            xml.push_str(&format!("  <Feature name=\"{}\" value=\"{}\"/>\n", name, value));
        }
        xml.push_str(&format!(
            "  <Feature name=\"PixelFormat\" value=\"{}\"/>\n",
            self.shared.pixel_format.lock()
        ));
        xml.push_str("</CameraSettings>\n");

        std::fs::write(path, xml).map_err(|e| {
            VendorError::new(
                VendorErrorCode::Io,
                format!("cannot write {}: {}", path.display(), e),
            )
        })
    }

    fn load_settings(&self, path: &Path) -> Result<(), VendorError> {
        self.require(&[AccessMode::Full, AccessMode::Config], "loading settings")?;
        let text = std::fs::read_to_string(path).map_err(|e| {
            VendorError::new(
                VendorErrorCode::Io,
                format!("cannot read {}: {}", path.display(), e),
            )
        })?;
        if !text.contains("<CameraSettings") {
            return Err(VendorError::new(
                VendorErrorCode::InvalidValue,
                format!("{} is not a camera settings file", path.display()),
            ));
        }

        for line in text.lines().map(str::trim) {
            if !line.starts_with("<Feature ") {
                continue;
            }
            let parts: Vec<&str> = line.split('"').collect();
            let (Some(name), Some(raw)) = (parts.get(1), parts.get(3)) else {
                continue;
            };
            if READ_ONLY_FEATURES.contains(name) {
                continue;
            }
            if *name == "PixelFormat" {
                self.shared.apply_pixel_format(&PixelFormat::from(*raw))?;
            } else {
                self.shared.store_feature(name, &FeatureValue::parse(raw))?;
            }
        }
        let format = self.shared.pixel_format.lock().clone();
        self.shared.update_payload_size(&format);
        Ok(())
    }

    fn close(&self) {
        self.shared.stop_worker();
        if self.shared.is_open.swap(false, Ordering::SeqCst) {
            self.shared.closes.fetch_add(1, Ordering::SeqCst);
            tracing::debug!(camera = %self.shared.spec.id, "mock camera closed");
        }
    }
}

impl Drop for MockCameraDevice {
    fn drop(&mut self) {
        self.close();
    }
}

// =============================================================================
// Probe
// =============================================================================

/// Test-side view of one simulated camera.
#[derive(Clone)]
pub struct MockCameraProbe {
    shared: Arc<CameraShared>,
}

impl MockCameraProbe {
    /// Refuse opens in `mode`.
    pub fn deny_access_mode(&self, mode: AccessMode) {
        self.shared.denied_modes.lock().push(mode);
    }

    /// Make single-frame acquisition time out.
    pub fn fail_acquisition(&self, fail: bool) {
        self.shared.acquisition_fails.store(fail, Ordering::SeqCst);
    }

    /// Flag every `n`th frame as incomplete; 0 disables.
    pub fn mark_incomplete_every(&self, n: u64) {
        self.shared.incomplete_every.store(n, Ordering::SeqCst);
    }

    /// Deliver every `n`th frame with half its payload missing; 0 disables.
    pub fn truncate_every(&self, n: u64) {
        self.shared.truncate_every.store(n, Ordering::SeqCst);
    }

    /// Deliver frames only on [`trigger`](Self::trigger). Takes effect on
    /// the next `start_streaming`.
    pub fn set_manual_trigger(&self, manual: bool) {
        self.shared.manual_trigger.store(manual, Ordering::SeqCst);
    }

    /// Deliver `frames` frames and wait until the handler has seen them.
    ///
    /// Returns how many were delivered; fewer than requested means the pool
    /// ran dry. Returns 0 when not streaming in manual-trigger mode.
    pub fn trigger(&self, frames: usize) -> usize {
        let sender = match self.shared.stream.lock().as_ref() {
            Some(worker) => worker.trigger.clone(),
            None => None,
        };
        let Some(sender) = sender else {
            return 0;
        };

        let (done, delivered) = mpsc::channel();
        if sender.send(Trigger { frames, done }).is_err() {
            return 0;
        }
        delivered.recv_timeout(TRIGGER_TIMEOUT).unwrap_or(0)
    }

    pub fn handler_invocations(&self) -> u64 {
        self.shared.stats.delivered.load(Ordering::SeqCst)
    }

    pub fn buffers_returned(&self) -> u64 {
        self.shared.stats.returned.load(Ordering::SeqCst)
    }

    /// Deliveries skipped because every buffer was out.
    pub fn starved_deliveries(&self) -> u64 {
        self.shared.stats.starved.load(Ordering::SeqCst)
    }

    pub fn is_open(&self) -> bool {
        self.shared.is_open.load(Ordering::SeqCst)
    }

    pub fn is_streaming(&self) -> bool {
        self.shared.is_streaming()
    }

    pub fn opens(&self) -> usize {
        self.shared.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.shared.closes.load(Ordering::SeqCst)
    }

    pub fn feature(&self, name: &str) -> Option<FeatureValue> {
        self.shared.features.lock().get(name).cloned()
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.shared.pixel_format.lock().clone()
    }
}
