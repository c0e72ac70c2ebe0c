//! Workstation configuration using Figment
//!
//! Configuration is loaded from:
//! 1. `tosca.toml` (or the file given with `--config`)
//! 2. Environment variables prefixed with `TOSCA_`, sections separated by a
//!    double underscore: `TOSCA_ACTUATOR__PORT=/dev/ttyUSB0`
//!
//! Every field has a default, so an absent file is a valid configuration.
//!
//! # Example
//! ```no_run
//! use tosca::config::AppConfig;
//!
//! let config = AppConfig::load()?;
//! println!("Actuator port: {}", config.actuator.port);
//! # Ok::<(), anyhow::Error>(())
//! ```

use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tosca_driver_camera::CameraConfig;
use tosca_driver_laser::LaserConfig;
use tosca_driver_xeryon::ActuatorConfig;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "tosca.toml";

/// Prefix of configuration environment variables.
pub const ENV_PREFIX: &str = "TOSCA_";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line, colored (development)
    #[default]
    Pretty,
    /// Single line, no colors
    Compact,
    /// One JSON object per event
    Json,
}

/// `[logging]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// trace, debug, info, warn or error
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
    /// Also write events to this file
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            file: None,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub actuator: ActuatorConfig,
    #[serde(default)]
    pub laser: LaserConfig,
    #[serde(default)]
    pub camera: CameraConfig,
}

impl AppConfig {
    /// Providers in merge order: file, then environment.
    pub fn figment(path: &Path) -> Figment {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Load `tosca.toml` and the environment.
    pub fn load() -> Result<Self> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    /// Load a specific file and the environment, then validate.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let config: Self = Self::figment(path)
            .extract()
            .with_context(|| format!("invalid configuration in {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check ranges and cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        crate::tracing_config::parse_log_level(&self.logging.level)?;
        self.actuator.validate().context("[actuator]")?;
        self.laser.validate().context("[laser]")?;
        self.camera.validate().context("[camera]")?;
        Ok(())
    }

    /// The effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("cannot render configuration as TOML")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tosca_core::PortSpec;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.actuator.baud_rate, 115_200);
        assert_eq!(config.laser.baud_rate, 9600);
        assert_eq!(config.camera.buffer_count, 5);
        assert_eq!(config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tosca.toml");
        std::fs::write(
            &path,
            r#"
            [actuator]
            port = "/dev/ttyUSB3"
            max_position = 20000

            [camera]
            pixel_format = "Mono16"
            "#,
        )
        .unwrap();

        let config: AppConfig = Figment::new().merge(Toml::file(&path)).extract().unwrap();
        assert_eq!(config.actuator.port, PortSpec::Named("/dev/ttyUSB3".into()));
        assert_eq!(config.actuator.max_position, 20_000);
        assert_eq!(config.actuator.min_position, 0);
        assert_eq!(config.laser, LaserConfig::default());
        assert_eq!(config.camera.pixel_format, tosca_core::PixelFormat::Mono16);
    }

    #[test]
    fn test_bad_log_level_rejected() {
        let mut config = AppConfig::default();
        config.logging.level = "loud".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let config = AppConfig::default();
        let text = config.to_toml().unwrap();
        assert!(text.contains("[actuator]"));
        let parsed: AppConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }
}
