//! Simulated serial ports.
//!
//! [`MockPorts`] is a [`PortOpener`] backed by in-memory duplex streams.
//! Each registered port name maps to a [`SimulatedDevice`]; opening the port
//! spawns a task that feeds received lines to the device and writes its
//! replies back. Opens and closes are counted so tests can check that every
//! connection is released.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, DuplexStream, ReadBuf};
use tosca_core::serial::{DynSerial, PortCandidate, PortOpener};
use tosca_core::ConnectError;

/// Capacity of the in-memory pipe in each direction.
const PIPE_CAPACITY: usize = 4096;

/// Device side of a simulated serial link.
pub trait SimulatedDevice: Send + Sync + 'static {
    /// Handle one received line, without its line ending.
    ///
    /// Returning `None` sends nothing, which the host observes as a timeout.
    fn respond(&self, line: &str) -> Option<String>;
}

/// A device that never answers.
#[derive(Debug, Default)]
pub struct SilentDevice {
    received: AtomicUsize,
}

impl SilentDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines_received(&self) -> usize {
        self.received.load(Ordering::SeqCst)
    }
}

impl SimulatedDevice for SilentDevice {
    fn respond(&self, _line: &str) -> Option<String> {
        self.received.fetch_add(1, Ordering::SeqCst);
        None
    }
}

/// Open/close bookkeeping shared by every stream a [`MockPorts`] hands out.
#[derive(Debug, Default)]
pub struct PortCounters {
    opens: AtomicUsize,
    closes: AtomicUsize,
}

impl PortCounters {
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Streams currently open.
    pub fn live(&self) -> usize {
        self.opens().saturating_sub(self.closes())
    }
}

struct Registered {
    candidate: PortCandidate,
    device: Arc<dyn SimulatedDevice>,
}

/// In-memory serial port table.
pub struct MockPorts {
    ports: Mutex<Vec<Registered>>,
    busy: Mutex<HashSet<String>>,
    counters: Arc<PortCounters>,
}

impl Default for MockPorts {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPorts {
    pub fn new() -> Self {
        Self {
            ports: Mutex::new(Vec::new()),
            busy: Mutex::new(HashSet::new()),
            counters: Arc::new(PortCounters::default()),
        }
    }

    /// Register `device` under `name`, replacing any previous registration.
    pub fn attach(
        &self,
        name: impl Into<String>,
        description: Option<&str>,
        device: Arc<dyn SimulatedDevice>,
    ) {
        let name = name.into();
        let mut ports = self.ports.lock();
        ports.retain(|p| p.candidate.name != name);
        ports.push(Registered {
            candidate: PortCandidate {
                name,
                description: description.map(str::to_string),
            },
            device,
        });
    }

    /// Builder form of [`attach`](Self::attach).
    pub fn with_device(
        self,
        name: impl Into<String>,
        description: Option<&str>,
        device: Arc<dyn SimulatedDevice>,
    ) -> Self {
        self.attach(name, description, device);
        self
    }

    /// Make opens of `name` fail as if another process held the port.
    pub fn mark_busy(&self, name: impl Into<String>) {
        self.busy.lock().insert(name.into());
    }

    pub fn counters(&self) -> Arc<PortCounters> {
        self.counters.clone()
    }
}

#[async_trait]
impl PortOpener for MockPorts {
    async fn open(&self, port: &str, _baud_rate: u32) -> Result<DynSerial, ConnectError> {
        if self.busy.lock().contains(port) {
            return Err(ConnectError::PortBusy {
                port: port.to_string(),
            });
        }

        let device = self
            .ports
            .lock()
            .iter()
            .find(|p| p.candidate.name == port)
            .map(|p| p.device.clone())
            .ok_or_else(|| ConnectError::PortUnavailable {
                port: port.to_string(),
                reason: "no such port".to_string(),
            })?;

        let (host, client) = tokio::io::duplex(PIPE_CAPACITY);
        tokio::spawn(serve(host, device));

        self.counters.opens.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(port, "mock port opened");
        Ok(Box::new(CountedStream {
            inner: client,
            counters: self.counters.clone(),
        }))
    }

    fn candidates(&self) -> Vec<PortCandidate> {
        self.ports
            .lock()
            .iter()
            .map(|p| p.candidate.clone())
            .collect()
    }
}

/// Device loop: one reply line per handled request line.
async fn serve(host: DuplexStream, device: Arc<dyn SimulatedDevice>) {
    let (read, mut write) = tokio::io::split(host);
    let mut lines = BufReader::new(read).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim_end_matches('\r');
        let Some(reply) = device.respond(line) else {
            continue;
        };
        let framed = format!("{}\n", reply);
        if write.write_all(framed.as_bytes()).await.is_err() {
            break;
        }
    }
}

/// Host end of a simulated link; counts the close when dropped.
struct CountedStream {
    inner: DuplexStream,
    counters: Arc<PortCounters>,
}

impl Drop for CountedStream {
    fn drop(&mut self) {
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
    }
}

impl AsyncRead for CountedStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for CountedStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    struct Echo;

    impl SimulatedDevice for Echo {
        fn respond(&self, line: &str) -> Option<String> {
            Some(line.to_uppercase())
        }
    }

    #[tokio::test]
    async fn test_open_serves_device_and_counts_close() {
        let ports = MockPorts::new().with_device("/dev/ttyMOCK0", Some("echo"), Arc::new(Echo));
        let counters = ports.counters();

        let mut stream = ports.open("/dev/ttyMOCK0", 9600).await.unwrap();
        stream.write_all(b"hello\r\n").await.unwrap();
        let mut buf = [0u8; 6];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"HELLO\n");

        assert_eq!(counters.live(), 1);
        drop(stream);
        assert_eq!(counters.opens(), 1);
        assert_eq!(counters.closes(), 1);
    }

    #[tokio::test]
    async fn test_unknown_and_busy_ports() {
        let ports = MockPorts::new().with_device("/dev/ttyMOCK0", None, Arc::new(Echo));
        ports.mark_busy("/dev/ttyMOCK0");

        assert!(matches!(
            ports.open("/dev/ttyMOCK0", 9600).await,
            Err(ConnectError::PortBusy { .. })
        ));
        assert!(matches!(
            ports.open("/dev/ttyMOCK9", 9600).await,
            Err(ConnectError::PortUnavailable { .. })
        ));
        assert_eq!(ports.counters().opens(), 0);
    }

    #[test]
    fn test_candidates_listed_in_registration_order() {
        let ports = MockPorts::new()
            .with_device("/dev/ttyMOCK0", Some("laser"), Arc::new(SilentDevice::new()))
            .with_device("/dev/ttyMOCK1", None, Arc::new(Echo));
        let names: Vec<String> = ports.candidates().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["/dev/ttyMOCK0", "/dev/ttyMOCK1"]);
    }
}
