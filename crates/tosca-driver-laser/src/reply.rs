//! Parsing of the laser's identification and status replies.

use serde::Serialize;
use tosca_core::TransportError;

/// Parsed `*IDN?` reply: `manufacturer,model,serial[,firmware]`.
///
/// Replies with fewer than three fields keep only `raw`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub serial: Option<String>,
    pub firmware: Option<String>,
    pub raw: String,
}

impl DeviceInfo {
    pub fn parse(reply: &str) -> Self {
        let raw = reply.trim().to_string();
        let fields: Vec<String> = raw.split(',').map(|f| f.trim().to_string()).collect();

        if fields.len() < 3 {
            return Self {
                manufacturer: None,
                model: None,
                serial: None,
                firmware: None,
                raw,
            };
        }

        let mut fields = fields.into_iter();
        Self {
            manufacturer: fields.next(),
            model: fields.next(),
            serial: fields.next(),
            firmware: fields.next().filter(|f| !f.is_empty()),
            raw,
        }
    }
}

impl std::fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.manufacturer, &self.model, &self.serial) {
            (Some(manufacturer), Some(model), Some(serial)) => {
                write!(f, "{} {} (S/N {})", manufacturer, model, serial)?;
                if let Some(firmware) = &self.firmware {
                    write!(f, ", firmware {}", firmware)?;
                }
                Ok(())
            }
            _ => write!(f, "{}", self.raw),
        }
    }
}

/// Parsed `STATUS` reply.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LaserStatus {
    pub power: f64,
    pub enabled: bool,
    /// Head temperature in °C, when reported.
    pub temperature: Option<f64>,
    /// Active device error; `None` when the device reports `NONE`.
    pub error: Option<String>,
}

impl LaserStatus {
    /// Parse `key:value` pairs separated by `;`, `,` or newlines.
    ///
    /// Keys are case-insensitive and unknown keys are ignored. `power` and
    /// `enabled` are required.
    pub fn parse(reply: &str) -> Result<Self, TransportError> {
        let mut power = None;
        let mut enabled = None;
        let mut temperature = None;
        let mut error = None;

        for pair in reply.split([';', ',', '\n']) {
            let Some((key, value)) = pair.split_once(':') else {
                continue;
            };
            let value = value.trim();
            match key.trim().to_ascii_lowercase().as_str() {
                "power" => power = Some(parse_number(key, value)?),
                "enabled" => enabled = Some(parse_flag(value)?),
                "temp" | "temperature" => temperature = Some(parse_number(key, value)?),
                "error" if !value.eq_ignore_ascii_case("none") && !value.is_empty() => {
                    error = Some(value.to_string())
                }
                _ => {}
            }
        }

        match (power, enabled) {
            (Some(power), Some(enabled)) => Ok(Self {
                power,
                enabled,
                temperature,
                error,
            }),
            _ => Err(TransportError::MalformedReply(format!(
                "status reply lacks power/enabled: '{}'",
                reply.trim()
            ))),
        }
    }
}

fn parse_number(key: &str, value: &str) -> Result<f64, TransportError> {
    value
        .parse()
        .map_err(|_| TransportError::MalformedReply(format!("bad {} value '{}'", key.trim(), value)))
}

fn parse_flag(value: &str) -> Result<bool, TransportError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Ok(true),
        "0" | "false" | "off" | "no" => Ok(false),
        other => Err(TransportError::MalformedReply(format!(
            "bad enabled flag '{}'",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_info_fields() {
        let info = DeviceInfo::parse("ACME LASERS, TL-100 ,SN0042,FW1.2\r\n");
        assert_eq!(info.manufacturer.as_deref(), Some("ACME LASERS"));
        assert_eq!(info.model.as_deref(), Some("TL-100"));
        assert_eq!(info.serial.as_deref(), Some("SN0042"));
        assert_eq!(info.firmware.as_deref(), Some("FW1.2"));
        assert_eq!(info.to_string(), "ACME LASERS TL-100 (S/N SN0042), firmware FW1.2");
    }

    #[test]
    fn test_device_info_short_reply_keeps_raw() {
        let info = DeviceInfo::parse("LASER-X");
        assert_eq!(info.manufacturer, None);
        assert_eq!(info.raw, "LASER-X");
        assert_eq!(info.to_string(), "LASER-X");
    }

    #[test]
    fn test_status_separators_and_case() {
        let status = LaserStatus::parse("POWER:42.5;ENABLED:1;TEMP:25.1;ERROR:NONE").unwrap();
        assert_eq!(status.power, 42.5);
        assert!(status.enabled);
        assert_eq!(status.temperature, Some(25.1));
        assert_eq!(status.error, None);

        let status = LaserStatus::parse("power: 0.0, enabled: false, error: INTERLOCK").unwrap();
        assert!(!status.enabled);
        assert_eq!(status.temperature, None);
        assert_eq!(status.error.as_deref(), Some("INTERLOCK"));
    }

    #[test]
    fn test_status_missing_fields_is_malformed() {
        assert!(matches!(
            LaserStatus::parse("TEMP:25.0"),
            Err(TransportError::MalformedReply(_))
        ));
        assert!(LaserStatus::parse("POWER:abc;ENABLED:1").is_err());
    }
}
