use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tosca_core::PortSpec;

/// Configuration for the laser source controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaserConfig {
    /// Serial port path or `"auto"`
    #[serde(default)]
    pub port: PortSpec,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Lowest accepted `set_power` value, in device units (percent by default)
    #[serde(default)]
    pub min_power: f64,
    #[serde(default = "default_max_power")]
    pub max_power: f64,
    /// Substring expected in the `*IDN?` reply; empty accepts any device
    #[serde(default)]
    pub identity: String,
    #[serde(default)]
    pub port_hint: Option<String>,
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_timeout_ms() -> u64 {
    1000
}

fn default_max_power() -> f64 {
    100.0
}

impl Default for LaserConfig {
    fn default() -> Self {
        Self {
            port: PortSpec::Auto,
            baud_rate: default_baud_rate(),
            timeout_ms: default_timeout_ms(),
            min_power: 0.0,
            max_power: default_max_power(),
            identity: String::new(),
            port_hint: None,
        }
    }
}

impl LaserConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.min_power.is_finite() && self.max_power.is_finite()) {
            return Err(anyhow!("laser power limits must be finite"));
        }
        if self.min_power < 0.0 || self.min_power >= self.max_power {
            return Err(anyhow!(
                "laser power range is invalid: [{}, {}]",
                self.min_power,
                self.max_power
            ));
        }
        if self.timeout_ms == 0 {
            return Err(anyhow!("laser timeout_ms must be non-zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = LaserConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.baud_rate, 9600);
        assert_eq!(cfg.port, PortSpec::Auto);
    }

    #[test]
    fn test_inverted_range_rejected() {
        let cfg: LaserConfig =
            serde_json::from_str(r#"{"min_power": 80.0, "max_power": 20.0}"#).unwrap();
        assert!(cfg.validate().is_err());
    }
}
