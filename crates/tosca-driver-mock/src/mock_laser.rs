//! Simulated treatment laser source.
//!
//! Line protocol: `*IDN?`, `ENABLE`, `DISABLE`, `POWER <value>`, `POWER?` and
//! `STATUS`. Setting commands answer `OK` or `ERR <reason>`.

use parking_lot::Mutex;

use crate::common::{FaultPlan, ReplyFault};
use crate::ports::SimulatedDevice;

const DEFAULT_IDENTITY: &str = "ACME LASERS,TL-100,SN0042,FW1.2";

#[derive(Debug)]
struct LaserState {
    enabled: bool,
    power: f64,
    temperature: f64,
}

/// Simulated laser with a fixed output range.
pub struct MockLaser {
    identity: String,
    max_power: f64,
    state: Mutex<LaserState>,
    faults: FaultPlan,
    commands: Mutex<Vec<String>>,
}

impl Default for MockLaser {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLaser {
    pub fn new() -> Self {
        Self {
            identity: DEFAULT_IDENTITY.to_string(),
            max_power: 100.0,
            state: Mutex::new(LaserState {
                enabled: false,
                power: 0.0,
                temperature: 24.5,
            }),
            faults: FaultPlan::default(),
            commands: Mutex::new(Vec::new()),
        }
    }

    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = identity.into();
        self
    }

    pub fn with_max_power(mut self, max_power: f64) -> Self {
        self.max_power = max_power;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.state.lock().enabled
    }

    pub fn power(&self) -> f64 {
        self.state.lock().power
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().clone()
    }

    pub fn command_count(&self) -> usize {
        self.commands.lock().len()
    }

    /// Reply-level faults applied to every command.
    pub fn reply_faults(&self) -> &FaultPlan {
        &self.faults
    }

    fn handle(&self, line: &str) -> String {
        let mut state = self.state.lock();
        let (mnemonic, argument) = match line.split_once(' ') {
            Some((m, a)) => (m, Some(a.trim())),
            None => (line, None),
        };

        match (mnemonic.to_ascii_uppercase().as_str(), argument) {
            ("*IDN?", None) => self.identity.clone(),
            ("ENABLE", None) => {
                state.enabled = true;
                "OK".to_string()
            }
            ("DISABLE", None) => {
                state.enabled = false;
                "OK".to_string()
            }
            ("POWER?", None) => format!("{:.1}", state.power),
            ("POWER", Some(raw)) => match raw.parse::<f64>() {
                Ok(value) if (0.0..=self.max_power).contains(&value) => {
                    state.power = value;
                    "OK".to_string()
                }
                Ok(value) => format!("ERR power {} out of range", value),
                Err(_) => format!("ERR invalid power '{}'", raw),
            },
            ("STATUS" | "STATUS?", None) => format!(
                "POWER:{:.1};ENABLED:{};TEMP:{:.1};ERROR:NONE",
                state.power,
                u8::from(state.enabled),
                state.temperature
            ),
            _ => format!("ERR unknown command {}", line),
        }
    }
}

impl SimulatedDevice for MockLaser {
    fn respond(&self, line: &str) -> Option<String> {
        let line = line.trim();
        self.commands.lock().push(line.to_string());

        match self.faults.next_fault() {
            ReplyFault::Silent => None,
            ReplyFault::Garbled => Some(String::new()),
            ReplyFault::None => Some(self.handle(line)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_power_range_enforced_by_device() {
        let laser = MockLaser::new();
        assert_eq!(laser.respond("POWER 50.0").as_deref(), Some("OK"));
        assert_eq!(laser.power(), 50.0);
        assert_eq!(
            laser.respond("POWER 150").as_deref(),
            Some("ERR power 150 out of range")
        );
        assert_eq!(laser.power(), 50.0);
    }

    #[test]
    fn test_status_reflects_emission() {
        let laser = MockLaser::new();
        laser.respond("ENABLE");
        laser.respond("POWER 12.5");
        assert_eq!(
            laser.respond("STATUS").as_deref(),
            Some("POWER:12.5;ENABLED:1;TEMP:24.5;ERROR:NONE")
        );
        laser.respond("DISABLE");
        assert!(!laser.is_enabled());
    }

    #[test]
    fn test_silenced_reply() {
        let laser = MockLaser::new();
        laser.reply_faults().silence_next(1);
        assert_eq!(laser.respond("*IDN?"), None);
        assert_eq!(
            laser.respond("*IDN?").as_deref(),
            Some("ACME LASERS,TL-100,SN0042,FW1.2")
        );
        assert_eq!(laser.command_count(), 2);
    }
}
