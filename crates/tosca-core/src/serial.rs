//! Line-oriented serial transport.
//!
//! Every serial device in the workstation speaks an ASCII command/response
//! protocol: one command line out, one terminator-delimited reply line back.
//! [`Transport`] owns one open link and performs those exchanges with a
//! mandatory timeout; [`PortOpener`] is the seam that lets tests swap the OS
//! serial stack for in-memory duplex streams.
//!
//! # Example
//!
//! ```rust,ignore
//! use tosca_core::serial::{Command, Framing, SystemPorts, Transport};
//! use std::time::Duration;
//!
//! let transport = Transport::connect(&SystemPorts, "/dev/ttyUSB0", 115200, Framing::TAG_VALUE).await?;
//! let reply = transport
//!     .send_command(&Command::query("EPOS"), Duration::from_secs(1))
//!     .await?;
//! ```

use crate::error::{ConnectError, TransportError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

/// How long to spend discarding late bytes after a timed-out exchange.
const STALE_DRAIN_MS: u64 = 20;

// =============================================================================
// Serial Port Trait
// =============================================================================

/// Trait alias for async serial port I/O.
///
/// Any type implementing `AsyncRead + AsyncWrite + Unpin + Send` can be used
/// as a serial port: `tokio_serial::SerialStream` on hardware,
/// `tokio::io::DuplexStream` in tests.
pub trait SerialPortIO: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialPortIO for T {}

/// Type-erased boxed serial port.
pub type DynSerial = Box<dyn SerialPortIO>;

// =============================================================================
// Port specification and discovery
// =============================================================================

/// Which port a controller should connect to.
///
/// Deserializes from a plain string; `"auto"` (or an empty string) selects
/// auto-detection.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PortSpec {
    /// Probe every candidate port until one passes verification.
    #[default]
    Auto,
    /// Use exactly this port.
    Named(String),
}

impl From<String> for PortSpec {
    fn from(value: String) -> Self {
        let trimmed = value.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("auto") {
            PortSpec::Auto
        } else {
            PortSpec::Named(trimmed.to_string())
        }
    }
}

impl From<&str> for PortSpec {
    fn from(value: &str) -> Self {
        PortSpec::from(value.to_string())
    }
}

impl From<PortSpec> for String {
    fn from(spec: PortSpec) -> Self {
        spec.to_string()
    }
}

impl std::str::FromStr for PortSpec {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(PortSpec::from(s))
    }
}

impl std::fmt::Display for PortSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PortSpec::Auto => write!(f, "auto"),
            PortSpec::Named(name) => write!(f, "{}", name),
        }
    }
}

/// A port the opener knows about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortCandidate {
    pub name: String,
    /// USB product string or similar, when the OS reports one.
    pub description: Option<String>,
}

/// Opens serial links and lists candidate ports.
#[async_trait]
pub trait PortOpener: Send + Sync {
    /// Open `port` at `baud_rate`, 8N1, no flow control.
    async fn open(&self, port: &str, baud_rate: u32) -> Result<DynSerial, ConnectError>;

    /// Ports worth probing during auto-detect.
    fn candidates(&self) -> Vec<PortCandidate>;
}

/// The operating system's serial ports, via `tokio-serial`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemPorts;

#[async_trait]
impl PortOpener for SystemPorts {
    async fn open(&self, port: &str, baud_rate: u32) -> Result<DynSerial, ConnectError> {
        let stream = open_serial_async(port, baud_rate).await?;
        Ok(Box::new(stream))
    }

    fn candidates(&self) -> Vec<PortCandidate> {
        match tokio_serial::available_ports() {
            Ok(ports) => ports
                .into_iter()
                .map(|info| {
                    let description = match info.port_type {
                        tokio_serial::SerialPortType::UsbPort(usb) => usb.product,
                        _ => None,
                    };
                    PortCandidate {
                        name: info.port_name,
                        description,
                    }
                })
                .collect(),
            Err(e) => {
                tracing::warn!("Failed to enumerate serial ports: {}", e);
                Vec::new()
            }
        }
    }
}

/// Open a serial port asynchronously using spawn_blocking.
///
/// Standard settings are applied: 8N1, no flow control. OS failures are
/// classified into [`ConnectError::PortBusy`] (access denied, already in use)
/// or [`ConnectError::PortUnavailable`] (everything else).
pub async fn open_serial_async(
    port_path: &str,
    baud_rate: u32,
) -> Result<tokio_serial::SerialStream, ConnectError> {
    use tokio_serial::SerialPortBuilderExt;

    let port_path_owned = port_path.to_string();

    let opened = tokio::task::spawn_blocking(move || {
        tokio_serial::new(&port_path_owned, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
    })
    .await
    .map_err(|e| ConnectError::PortUnavailable {
        port: port_path.to_string(),
        reason: format!("spawn_blocking for serial port opening failed: {e}"),
    })?;

    opened.map_err(|e| classify_open_error(port_path, &e))
}

fn classify_open_error(port: &str, err: &tokio_serial::Error) -> ConnectError {
    let busy = matches!(
        err.kind(),
        tokio_serial::ErrorKind::Io(std::io::ErrorKind::PermissionDenied)
    ) || err.to_string().to_lowercase().contains("busy");

    if busy {
        ConnectError::PortBusy {
            port: port.to_string(),
        }
    } else {
        ConnectError::PortUnavailable {
            port: port.to_string(),
            reason: err.to_string(),
        }
    }
}

/// Drain stale data from a serial port buffer.
///
/// Reads and discards until nothing more arrives within `timeout_ms`.
/// Returns the number of bytes discarded.
pub async fn drain_serial_buffer<R: AsyncRead + Unpin>(port: &mut R, timeout_ms: u64) -> usize {
    let mut discard = [0u8; 256];
    let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
    let mut total_discarded = 0usize;

    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }
        match tokio::time::timeout(remaining, port.read(&mut discard)).await {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => total_discarded += n,
            Ok(Err(_)) => break,
            Err(_) => break,
        }
    }

    total_discarded
}

// =============================================================================
// Commands and responses
// =============================================================================

/// Line framing conventions of one device family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Framing {
    /// Between mnemonic and argument when a value is sent.
    pub separator: &'static str,
    /// Appended to the mnemonic for a query.
    pub query_suffix: &'static str,
    /// Terminates every outgoing line.
    pub line_ending: &'static str,
    /// Byte that ends a reply.
    pub reply_terminator: u8,
    /// Splits `TAG<sep>VALUE` replies, if the device echoes tags.
    pub reply_tag: Option<char>,
}

impl Framing {
    /// `DPOS=1000`, `EPOS=?`, replies `EPOS=1000`.
    pub const TAG_VALUE: Framing = Framing {
        separator: "=",
        query_suffix: "=?",
        line_ending: "\r\n",
        reply_terminator: b'\n',
        reply_tag: Some('='),
    };

    /// `POWER 50.0`, `POWER?`, untagged replies.
    pub const MNEMONIC_SPACE: Framing = Framing {
        separator: " ",
        query_suffix: "?",
        line_ending: "\r\n",
        reply_terminator: b'\n',
        reply_tag: None,
    };
}

#[derive(Debug, Clone, PartialEq)]
enum Argument {
    None,
    Value(String),
    Query,
}

/// An outbound request: ASCII mnemonic plus optional argument.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    mnemonic: String,
    argument: Argument,
}

impl Command {
    /// A bare command such as `STOP` or `*IDN?`.
    pub fn new(mnemonic: impl Into<String>) -> Self {
        Self {
            mnemonic: mnemonic.into(),
            argument: Argument::None,
        }
    }

    /// A command carrying a value, e.g. `DPOS=1000`.
    pub fn with_value(mnemonic: impl Into<String>, value: impl std::fmt::Display) -> Self {
        Self {
            mnemonic: mnemonic.into(),
            argument: Argument::Value(value.to_string()),
        }
    }

    /// A query, e.g. `STAT=?`.
    pub fn query(mnemonic: impl Into<String>) -> Self {
        Self {
            mnemonic: mnemonic.into(),
            argument: Argument::Query,
        }
    }

    pub fn mnemonic(&self) -> &str {
        &self.mnemonic
    }

    /// Render the full line including the line ending.
    pub fn render(&self, framing: &Framing) -> String {
        match &self.argument {
            Argument::None => format!("{}{}", self.mnemonic, framing.line_ending),
            Argument::Value(v) => format!(
                "{}{}{}{}",
                self.mnemonic, framing.separator, v, framing.line_ending
            ),
            Argument::Query => format!(
                "{}{}{}",
                self.mnemonic, framing.query_suffix, framing.line_ending
            ),
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.argument {
            Argument::None => write!(f, "{}", self.mnemonic),
            Argument::Value(v) => write!(f, "{} {}", self.mnemonic, v),
            Argument::Query => write!(f, "{}?", self.mnemonic),
        }
    }
}

/// A parsed reply line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// `OK`
    Ack,
    /// A payload, optionally tagged (`EPOS=1000` -> tag `EPOS`).
    Value { tag: Option<String>, value: String },
    /// `ERR...`: the device understood the line and refused it.
    Rejected(String),
}

impl Response {
    /// Parse one reply line (terminator included or not).
    pub fn parse(raw: &[u8], framing: &Framing) -> Result<Self, TransportError> {
        let text = std::str::from_utf8(raw)
            .map_err(|_| TransportError::MalformedReply("reply is not valid UTF-8".into()))?;
        let line = text.trim();

        if line.is_empty() {
            return Err(TransportError::MalformedReply("empty reply".into()));
        }
        if line.eq_ignore_ascii_case("OK") {
            return Ok(Response::Ack);
        }
        let upper = line.to_ascii_uppercase();
        if upper.starts_with("ERR") {
            let reason = line
                .trim_start_matches(|c: char| c.is_ascii_alphabetic())
                .trim_start_matches([':', ' ', '='])
                .trim();
            return Ok(Response::Rejected(reason.to_string()));
        }

        if let Some(sep) = framing.reply_tag {
            if let Some((tag, value)) = line.split_once(sep) {
                let is_tag = !tag.is_empty()
                    && tag
                        .chars()
                        .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '*');
                if is_tag {
                    return Ok(Response::Value {
                        tag: Some(tag.to_string()),
                        value: value.trim().to_string(),
                    });
                }
            }
        }

        Ok(Response::Value {
            tag: None,
            value: line.to_string(),
        })
    }

    /// Payload text if this is a value reply.
    pub fn value(&self) -> Option<&str> {
        match self {
            Response::Value { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn is_ack(&self) -> bool {
        matches!(self, Response::Ack)
    }

    /// Parse the payload as a number, failing with `MalformedReply`.
    pub fn parse_value<T: std::str::FromStr>(&self) -> Result<T, TransportError> {
        let raw = self
            .value()
            .ok_or_else(|| TransportError::MalformedReply(format!("expected a value, got {self:?}")))?;
        raw.parse::<T>()
            .map_err(|_| TransportError::MalformedReply(format!("unparsable value '{raw}'")))
    }
}

// =============================================================================
// Transport
// =============================================================================

struct Link {
    reader: BufReader<DynSerial>,
    /// Set after a timed-out exchange: a late reply may still be in flight.
    dirty: bool,
}

/// One connected serial link.
///
/// The port lock is held for a single exchange only, so a long motion poll
/// loop never prevents a concurrent `STOP` from reaching the device.
pub struct Transport {
    port_name: String,
    framing: Framing,
    link: Mutex<Option<Link>>,
    exchanges: AtomicU64,
}

impl Transport {
    /// Open `port` through `opener`.
    pub async fn connect(
        opener: &dyn PortOpener,
        port: &str,
        baud_rate: u32,
        framing: Framing,
    ) -> Result<Self, ConnectError> {
        let stream = opener.open(port, baud_rate).await?;
        log::debug!("Opened {} at {} baud", port, baud_rate);
        Ok(Self::from_stream(port, stream, framing))
    }

    /// Wrap an already-open stream.
    pub fn from_stream(port_name: impl Into<String>, stream: DynSerial, framing: Framing) -> Self {
        Self {
            port_name: port_name.into(),
            framing,
            link: Mutex::new(Some(Link {
                reader: BufReader::new(stream),
                dirty: false,
            })),
            exchanges: AtomicU64::new(0),
        }
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    pub fn framing(&self) -> &Framing {
        &self.framing
    }

    /// Number of exchanges attempted on this link.
    pub fn exchanges(&self) -> u64 {
        self.exchanges.load(Ordering::SeqCst)
    }

    pub async fn is_connected(&self) -> bool {
        self.link.lock().await.is_some()
    }

    /// Write `command` and wait for one reply line.
    ///
    /// `timeout` bounds the whole exchange. The line stays marked dirty until
    /// a complete reply is read, so after a timeout, a link error or a
    /// caller dropping this future mid-exchange, the next exchange discards
    /// whatever arrives late.
    pub async fn send_command(
        &self,
        command: &Command,
        timeout: Duration,
    ) -> Result<Response, TransportError> {
        let mut guard = self.link.lock().await;
        let link = guard.as_mut().ok_or(TransportError::NotConnected)?;
        self.exchanges.fetch_add(1, Ordering::SeqCst);

        if link.dirty {
            let buffered = link.reader.buffer().len();
            link.reader.consume(buffered);
            let discarded = drain_serial_buffer(link.reader.get_mut(), STALE_DRAIN_MS).await;
            log::debug!(
                "{}: discarded {} stale bytes",
                self.port_name,
                buffered + discarded
            );
            link.dirty = false;
        }

        let line = command.render(&self.framing);
        log::trace!("{} -> {:?}", self.port_name, line);
        link.dirty = true;

        let terminator = self.framing.reply_terminator;
        let exchange = async {
            let writer = link.reader.get_mut();
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await?;

            let mut reply = Vec::new();
            let n = link.reader.read_until(terminator, &mut reply).await?;
            if n == 0 || reply.last() != Some(&terminator) {
                return Err(TransportError::LinkError("port closed mid-reply".into()));
            }
            Ok::<Vec<u8>, TransportError>(reply)
        };

        let outcome = tokio::time::timeout(timeout, exchange).await;
        match outcome {
            Err(_) => {
                log::debug!("{}: {} timed out after {:?}", self.port_name, command, timeout);
                Err(TransportError::Timeout(timeout))
            }
            Ok(Err(e)) => Err(e),
            Ok(Ok(reply)) => {
                link.dirty = false;
                log::trace!("{} <- {:?}", self.port_name, String::from_utf8_lossy(&reply));
                Response::parse(&reply, &self.framing)
            }
        }
    }

    /// Run the `*IDN?` handshake and check the reply contains `expected`
    /// (case-insensitive). An empty `expected` accepts any non-empty reply.
    pub async fn verify_identity(
        &self,
        expected: &str,
        timeout: Duration,
    ) -> Result<String, ConnectError> {
        let reply = self
            .send_command(&Command::new("*IDN?"), timeout)
            .await
            .map_err(ConnectError::Handshake)?;

        let identity = match reply {
            Response::Value { value, .. } => value,
            Response::Ack => "OK".to_string(),
            Response::Rejected(reason) => {
                return Err(ConnectError::VerificationFailed {
                    expected: expected.to_string(),
                    received: format!("ERR {reason}"),
                })
            }
        };

        if identity
            .to_ascii_uppercase()
            .contains(&expected.to_ascii_uppercase())
        {
            Ok(identity)
        } else {
            Err(ConnectError::VerificationFailed {
                expected: expected.to_string(),
                received: identity,
            })
        }
    }

    /// Close the link. Safe to call any number of times.
    pub async fn disconnect(&self) {
        if self.link.lock().await.take().is_some() {
            log::debug!("Closed {}", self.port_name);
        }
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("port_name", &self.port_name)
            .field("exchanges", &self.exchanges())
            .finish()
    }
}

// =============================================================================
// Connection helpers
// =============================================================================

/// Open `port` and run the identity handshake; the link is closed again if
/// verification fails.
pub async fn connect_verified(
    opener: &dyn PortOpener,
    port: &str,
    baud_rate: u32,
    framing: Framing,
    expected_identity: &str,
    timeout: Duration,
) -> Result<(Transport, String), ConnectError> {
    let transport = Transport::connect(opener, port, baud_rate, framing).await?;
    match transport.verify_identity(expected_identity, timeout).await {
        Ok(identity) => Ok((transport, identity)),
        Err(e) => {
            transport.disconnect().await;
            Err(e)
        }
    }
}

/// Probe candidate ports in turn; the first one that verifies wins.
///
/// Candidates whose description contains `hint` are tried first.
pub async fn autodetect(
    opener: &dyn PortOpener,
    baud_rate: u32,
    framing: Framing,
    expected_identity: &str,
    timeout: Duration,
    hint: Option<&str>,
) -> Result<(Transport, String), ConnectError> {
    let mut candidates = opener.candidates();
    if let Some(hint) = hint {
        let hint = hint.to_ascii_uppercase();
        candidates.sort_by_key(|c| {
            !c.description
                .as_deref()
                .is_some_and(|d| d.to_ascii_uppercase().contains(&hint))
        });
    }

    let probed = candidates.len();
    for candidate in candidates {
        match connect_verified(
            opener,
            &candidate.name,
            baud_rate,
            framing,
            expected_identity,
            timeout,
        )
        .await
        {
            Ok(found) => {
                tracing::info!("Auto-detected device on {}", candidate.name);
                return Ok(found);
            }
            Err(e) => tracing::debug!("Skipping {}: {}", candidate.name, e),
        }
    }

    Err(ConnectError::NoDeviceFound { probed })
}
