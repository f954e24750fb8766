use std::env;
use std::path::PathBuf;
use std::time::Duration;

use log::{debug, warn};
use thiserror::Error;
use time::macros::format_description;
use time::UtcOffset;

const DEFAULT_DATA_DIR: &str = "./data";
const DEFAULT_SCAN_SECS: u64 = 10;
const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 15;
const DEFAULT_SUMMARY_INTERVAL_SECS: u64 = 1800; // 30 minutes

#[derive(Debug, Error)]
#[error("invalid {key}={value:?}: {reason}")]
pub struct ConfigError {
    pub key: &'static str,
    pub value: String,
    pub reason: String,
}

/// Which sensor the device samples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SensorKind {
    Simulated,
    /// RuuviTag with the given MAC address
    Ruuvi { mac: String },
}

#[derive(Debug, Clone)]
pub struct EdgeConfig {
    pub data_dir: PathBuf,
    /// Offset of the device clock; `None` means detect the host's local offset.
    pub utc_offset: Option<UtcOffset>,
    pub sensor: SensorKind,
    pub sensor_scan_timeout: Duration,
    pub shutdown_timeout: Duration,
    pub summary_interval: Duration,
}

impl EdgeConfig {
    pub fn new() -> Result<Self, ConfigError> {
        // Load environment variables
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from any key/value source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let data_dir = lookup("DATA_DIR")
            .filter(|dir| !dir.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_DATA_DIR.to_string());

        let utc_offset = match lookup("UTC_OFFSET") {
            Some(value) => Some(parse_offset(&value)?),
            None => None,
        };

        let sensor = match lookup("SENSOR").as_deref().map(str::trim) {
            None | Some("") | Some("simulated") => SensorKind::Simulated,
            Some("ruuvi") => {
                let mac = lookup("RUUVI_TAG_MAC")
                    .map(|mac| mac.trim().to_uppercase())
                    .filter(|mac| !mac.is_empty())
                    .ok_or_else(|| ConfigError {
                        key: "RUUVI_TAG_MAC",
                        value: String::new(),
                        reason: "required when SENSOR=ruuvi".to_string(),
                    })?;
                SensorKind::Ruuvi { mac }
            }
            Some(other) => {
                return Err(ConfigError {
                    key: "SENSOR",
                    value: other.to_string(),
                    reason: "expected `simulated` or `ruuvi`".to_string(),
                })
            }
        };

        let config = EdgeConfig {
            data_dir: PathBuf::from(data_dir),
            utc_offset,
            sensor,
            sensor_scan_timeout: seconds(&lookup, "SENSOR_SCAN_SECS", DEFAULT_SCAN_SECS)?,
            shutdown_timeout: seconds(
                &lookup,
                "SHUTDOWN_TIMEOUT_SECS",
                DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            )?,
            summary_interval: seconds(
                &lookup,
                "SUMMARY_INTERVAL_SECS",
                DEFAULT_SUMMARY_INTERVAL_SECS,
            )?,
        };
        debug!("Loaded configuration: {:?}", config);
        Ok(config)
    }

    /// Configured offset, else the host's local offset, else UTC.
    ///
    /// Call before the runtime spawns worker threads; local offset detection
    /// refuses to run in a multi-threaded process on some platforms.
    pub fn resolve_offset(&self) -> UtcOffset {
        self.utc_offset.unwrap_or_else(|| {
            UtcOffset::current_local_offset().unwrap_or_else(|e| {
                warn!("Could not determine local UTC offset ({}), using UTC", e);
                UtcOffset::UTC
            })
        })
    }
}

fn parse_offset(value: &str) -> Result<UtcOffset, ConfigError> {
    let format = format_description!("[offset_hour sign:mandatory]:[offset_minute]");
    UtcOffset::parse(value.trim(), format).map_err(|e| ConfigError {
        key: "UTC_OFFSET",
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn seconds(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: u64,
) -> Result<Duration, ConfigError> {
    let Some(value) = lookup(key) else {
        return Ok(Duration::from_secs(default));
    };
    match value.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
        Ok(_) => Err(ConfigError {
            key,
            value,
            reason: "must be greater than zero".to_string(),
        }),
        Err(e) => Err(ConfigError {
            key,
            value,
            reason: e.to_string(),
        }),
    }
}
