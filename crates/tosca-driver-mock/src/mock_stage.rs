//! Simulated Xeryon XLS linear stage.
//!
//! Speaks the controller's `TAG=VALUE` protocol over a [`MockPorts`] link:
//! setting commands are echoed back, `STAT=?` and `EPOS=?` report the
//! simulated status word and encoder position.
//!
//! [`MockPorts`]: crate::MockPorts

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::time::Instant;

use crate::common::{FaultPlan, MockMode, ReplyFault};
use crate::ports::SimulatedDevice;

/// Status word bits the simulator drives.
pub mod bits {
    pub const AMPLIFIERS_ENABLED: u32 = 1 << 0;
    pub const THERMAL_PROTECTION_1: u32 = 1 << 2;
    pub const MOTOR_ON: u32 = 1 << 5;
    pub const CLOSED_LOOP: u32 = 1 << 6;
    pub const ENCODER_AT_INDEX: u32 = 1 << 7;
    pub const ENCODER_VALID: u32 = 1 << 8;
    pub const SEARCHING_INDEX: u32 = 1 << 9;
    pub const POSITION_REACHED: u32 = 1 << 10;
    pub const SCANNING: u32 = 1 << 13;
    pub const ERROR_LIMIT: u32 = 1 << 16;
    pub const EMERGENCY_STOP: u32 = 1 << 20;
}

const DEFAULT_IDENTITY: &str = "XERYON XLS-1250 SIM";

/// Encoder units per second when no `SSPD` has been received.
const DEFAULT_SPEED: u32 = 1_000;

#[derive(Debug)]
struct Motion {
    /// Position when the current move started.
    origin: i64,
    target: i64,
    started: Instant,
    speed: u32,
    /// -1, 0 or +1
    scan: i32,
    homing: bool,
    indexed: bool,
    enabled: bool,
    faults: u32,
}

/// Simulated stage controller.
pub struct MockXeryon {
    mode: MockMode,
    identity: String,
    motion: Mutex<Motion>,
    faults: FaultPlan,
    commands: Mutex<Vec<String>>,
    status_queries: AtomicUsize,
}

impl MockXeryon {
    pub fn new(mode: MockMode) -> Self {
        Self {
            mode,
            identity: DEFAULT_IDENTITY.to_string(),
            motion: Mutex::new(Motion {
                origin: 0,
                target: 0,
                started: Instant::now(),
                speed: DEFAULT_SPEED,
                scan: 0,
                homing: false,
                indexed: false,
                enabled: false,
                faults: 0,
            }),
            faults: FaultPlan::default(),
            commands: Mutex::new(Vec::new()),
            status_queries: AtomicUsize::new(0),
        }
    }

    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = identity.into();
        self
    }

    pub fn with_position(self, position: i64) -> Self {
        {
            let mut m = self.motion.lock();
            m.origin = position;
            m.target = position;
        }
        self
    }

    /// Every line received, in order.
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().clone()
    }

    pub fn command_count(&self) -> usize {
        self.commands.lock().len()
    }

    /// Lines received whose tag is `tag` (e.g. `"DPOS"`).
    pub fn commands_tagged(&self, tag: &str) -> Vec<String> {
        self.commands
            .lock()
            .iter()
            .filter(|c| c.split('=').next() == Some(tag))
            .cloned()
            .collect()
    }

    pub fn status_queries(&self) -> usize {
        self.status_queries.load(Ordering::SeqCst)
    }

    /// Raise status bits until the next `RSET`.
    pub fn inject_fault(&self, mask: u32) {
        self.motion.lock().faults |= mask;
    }

    /// Reply-level faults applied to `STAT=?` queries.
    pub fn status_faults(&self) -> &FaultPlan {
        &self.faults
    }

    /// Current simulated encoder position.
    pub fn position(&self) -> i64 {
        let m = self.motion.lock();
        self.current_position(&m, Instant::now())
    }

    fn current_position(&self, m: &Motion, now: Instant) -> i64 {
        let elapsed = now.saturating_duration_since(m.started).as_secs_f64();
        let travelled = (f64::from(m.speed) * elapsed) as i64;

        if m.scan != 0 {
            return match self.mode {
                MockMode::Stalled => m.origin,
                _ => m.origin + i64::from(m.scan) * travelled,
            };
        }

        match self.mode {
            MockMode::Instant => m.target,
            MockMode::Stalled => m.origin,
            MockMode::Realistic => {
                let distance = m.target - m.origin;
                if travelled >= distance.abs() {
                    m.target
                } else {
                    m.origin + distance.signum() * travelled
                }
            }
        }
    }

    /// Freeze the current position as the origin of a new move.
    fn settle(&self, m: &mut Motion, target: Option<i64>) {
        let now = Instant::now();
        let here = self.current_position(m, now);
        m.origin = here;
        m.target = target.unwrap_or(here);
        m.started = now;
        m.scan = 0;
    }

    fn status_word(&self, m: &Motion) -> u32 {
        let position = self.current_position(m, Instant::now());
        let mut word = bits::ENCODER_VALID | m.faults;
        if m.enabled {
            word |= bits::AMPLIFIERS_ENABLED | bits::MOTOR_ON | bits::CLOSED_LOOP;
        }
        if m.indexed {
            word |= bits::ENCODER_AT_INDEX;
        }
        let reached = m.scan == 0 && position == m.target;
        if m.scan != 0 {
            word |= bits::SCANNING;
        } else if m.homing && !reached {
            word |= bits::SEARCHING_INDEX;
        }
        if reached {
            word |= bits::POSITION_REACHED;
        }
        word
    }

    fn handle(&self, tag: &str, value: &str) -> Option<String> {
        let mut m = self.motion.lock();
        let echo = || Some(format!("{}={}", tag, value));

        match tag {
            "ENBL" => {
                m.enabled = value == "1";
                echo()
            }
            "SSPD" => match value.parse::<u32>() {
                Ok(speed) => {
                    // Keep an in-flight move continuous across the speed change.
                    let target = m.target;
                    let scan = m.scan;
                    self.settle(&mut m, Some(target));
                    m.scan = scan;
                    m.speed = speed;
                    echo()
                }
                Err(_) => Some(format!("ERR invalid speed {}", value)),
            },
            "DPOS" => match value.parse::<i64>() {
                Ok(target) => {
                    self.settle(&mut m, Some(target));
                    m.homing = false;
                    echo()
                }
                Err(_) => Some(format!("ERR invalid position {}", value)),
            },
            "STEP" => match value.parse::<i64>() {
                Ok(delta) => {
                    let here = self.current_position(&m, Instant::now());
                    self.settle(&mut m, Some(here + delta));
                    m.homing = false;
                    echo()
                }
                Err(_) => Some(format!("ERR invalid step {}", value)),
            },
            "INDX" => {
                self.settle(&mut m, Some(0));
                m.homing = true;
                m.indexed = true;
                echo()
            }
            "SCAN" => match value.parse::<i32>() {
                Ok(0) => {
                    self.settle(&mut m, None);
                    echo()
                }
                Ok(direction) => {
                    self.settle(&mut m, None);
                    m.scan = direction.signum();
                    m.homing = false;
                    echo()
                }
                Err(_) => Some(format!("ERR invalid scan {}", value)),
            },
            "STOP" => {
                self.settle(&mut m, None);
                m.homing = false;
                echo()
            }
            "RSET" => {
                m.faults = 0;
                self.settle(&mut m, None);
                echo()
            }
            "STAT" if value == "?" => {
                self.status_queries.fetch_add(1, Ordering::SeqCst);
                match self.faults.next_fault() {
                    ReplyFault::Silent => None,
                    ReplyFault::Garbled => Some("STAT=#~".to_string()),
                    ReplyFault::None => Some(format!("STAT={}", self.status_word(&m))),
                }
            }
            "EPOS" if value == "?" => Some(format!(
                "EPOS={}",
                self.current_position(&m, Instant::now())
            )),
            _ => Some(format!("ERR unknown command {}={}", tag, value)),
        }
    }
}

impl SimulatedDevice for MockXeryon {
    fn respond(&self, line: &str) -> Option<String> {
        let line = line.trim();
        self.commands.lock().push(line.to_string());

        if line == "*IDN?" {
            return Some(self.identity.clone());
        }
        match line.split_once('=') {
            Some((tag, value)) => self.handle(tag, value),
            None => Some(format!("ERR unknown command {}", line)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_instant_mode_reaches_immediately() {
        let stage = MockXeryon::new(MockMode::Instant);
        assert_eq!(stage.respond("ENBL=1").as_deref(), Some("ENBL=1"));
        assert_eq!(stage.respond("DPOS=500").as_deref(), Some("DPOS=500"));

        let stat: u32 = stage.respond("STAT=?").unwrap()[5..].parse().unwrap();
        assert_ne!(stat & bits::POSITION_REACHED, 0);
        assert_eq!(stage.respond("EPOS=?").as_deref(), Some("EPOS=500"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_realistic_mode_moves_at_speed() {
        let stage = MockXeryon::new(MockMode::Realistic);
        stage.respond("SSPD=1000");
        stage.respond("DPOS=1000");

        tokio::time::advance(Duration::from_millis(500)).await;
        assert_eq!(stage.position(), 500);

        tokio::time::advance(Duration::from_millis(600)).await;
        assert_eq!(stage.position(), 1000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_freezes_position() {
        let stage = MockXeryon::new(MockMode::Realistic);
        stage.respond("DPOS=1000");
        tokio::time::advance(Duration::from_millis(250)).await;
        stage.respond("STOP=0");
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(stage.position(), 250);
    }

    #[tokio::test]
    async fn test_faults_until_reset() {
        let stage = MockXeryon::new(MockMode::Instant);
        stage.inject_fault(bits::ERROR_LIMIT);
        let stat: u32 = stage.respond("STAT=?").unwrap()[5..].parse().unwrap();
        assert_ne!(stat & bits::ERROR_LIMIT, 0);

        stage.respond("RSET=0");
        let stat: u32 = stage.respond("STAT=?").unwrap()[5..].parse().unwrap();
        assert_eq!(stat & bits::ERROR_LIMIT, 0);
    }

    #[tokio::test]
    async fn test_unknown_command_rejected() {
        let stage = MockXeryon::new(MockMode::Instant);
        assert_eq!(
            stage.respond("FOO=1").as_deref(),
            Some("ERR unknown command FOO=1")
        );
        assert_eq!(stage.commands_tagged("FOO"), vec!["FOO=1".to_string()]);
    }
}
