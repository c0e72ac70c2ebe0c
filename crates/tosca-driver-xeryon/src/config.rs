use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tosca_core::PortSpec;

/// What a motion call does when another motion command holds the stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusyPolicy {
    /// Wait for the running command to finish.
    #[default]
    Block,
    /// Return `MotionError::Busy` immediately.
    FailFast,
}

/// Configuration for the Xeryon actuator controller.
///
/// Positions and speeds are in controller encoder units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActuatorConfig {
    /// Serial port path or `"auto"`
    #[serde(default)]
    pub port: PortSpec,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Per-exchange reply timeout
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_home_timeout_ms")]
    pub home_timeout_ms: u64,
    #[serde(default = "default_move_timeout_ms")]
    pub move_timeout_ms: u64,
    #[serde(default)]
    pub min_position: i64,
    #[serde(default = "default_max_position")]
    pub max_position: i64,
    /// Applied right after connecting
    #[serde(default = "default_speed")]
    pub default_speed: u32,
    #[serde(default = "default_max_speed")]
    pub max_speed: u32,
    /// Substring expected in the `*IDN?` reply
    #[serde(default = "default_identity")]
    pub identity: String,
    /// Auto-detect probes ports whose USB description contains this first
    #[serde(default)]
    pub port_hint: Option<String>,
    #[serde(default)]
    pub busy_policy: BusyPolicy,
}

fn default_baud_rate() -> u32 {
    115200
}

fn default_timeout_ms() -> u64 {
    1000
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_home_timeout_ms() -> u64 {
    30_000
}

fn default_move_timeout_ms() -> u64 {
    60_000
}

fn default_max_position() -> i64 {
    10_000
}

fn default_speed() -> u32 {
    1_000
}

fn default_max_speed() -> u32 {
    100_000
}

fn default_identity() -> String {
    "XERYON".to_string()
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self {
            port: PortSpec::Auto,
            baud_rate: default_baud_rate(),
            timeout_ms: default_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            home_timeout_ms: default_home_timeout_ms(),
            move_timeout_ms: default_move_timeout_ms(),
            min_position: 0,
            max_position: default_max_position(),
            default_speed: default_speed(),
            max_speed: default_max_speed(),
            identity: default_identity(),
            port_hint: None,
            busy_policy: BusyPolicy::Block,
        }
    }
}

impl ActuatorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn home_timeout(&self) -> Duration {
        Duration::from_millis(self.home_timeout_ms)
    }

    pub fn move_timeout(&self) -> Duration {
        Duration::from_millis(self.move_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_position >= self.max_position {
            return Err(anyhow!(
                "actuator travel range is empty: min_position {} >= max_position {}",
                self.min_position,
                self.max_position
            ));
        }
        if self.timeout_ms == 0 || self.poll_interval_ms == 0 {
            return Err(anyhow!("actuator timeout_ms and poll_interval_ms must be non-zero"));
        }
        if self.home_timeout_ms < self.poll_interval_ms || self.move_timeout_ms < self.poll_interval_ms {
            return Err(anyhow!("actuator motion timeouts must be at least one poll interval"));
        }
        if self.default_speed > self.max_speed {
            return Err(anyhow!(
                "actuator default_speed {} exceeds max_speed {}",
                self.default_speed,
                self.max_speed
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let cfg = ActuatorConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.poll_interval(), Duration::from_millis(100));
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let cfg: ActuatorConfig =
            serde_json::from_str(r#"{"port": "/dev/ttyUSB1", "max_position": 20000}"#).unwrap();
        assert_eq!(cfg.port, PortSpec::Named("/dev/ttyUSB1".into()));
        assert_eq!(cfg.max_position, 20000);
        assert_eq!(cfg.baud_rate, 115200);
        assert_eq!(cfg.busy_policy, BusyPolicy::Block);
    }

    #[test]
    fn test_invalid_ranges_rejected() {
        let cfg = ActuatorConfig {
            min_position: 100,
            max_position: 100,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = ActuatorConfig {
            default_speed: 10,
            max_speed: 5,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }
}
