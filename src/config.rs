//! Configuration for [`crate::manager::DeviceManager`]: which serial port
//! and baud to open, how often to run discovery, and which bus addresses to
//! scan per device kind.
//!
//! Loaded from a TOML file via [`Config::from_file`], with
//! `SCOM_INTERFACE`/`SCOM_BAUDRATE` environment variables overriding the
//! transport section, matching the override knobs named for the serial link
//! in the original deployment.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::device::DeviceKind;

const DEFAULT_BAUD_RATE: u32 = 38400;
const DEFAULT_DISCOVERY_INTERVAL_SECS: u64 = 5;

#[derive(Debug, Deserialize)]
struct RawConfig {
    transport: RawTransport,
    #[serde(default)]
    scan: RawScan,
    #[serde(default = "default_discovery_interval_secs")]
    discovery_interval_secs: u64,
    #[serde(default = "default_thread_monitor")]
    thread_monitor: bool,
}

#[derive(Debug, Deserialize)]
struct RawTransport {
    port: String,
    #[serde(default = "default_baud_rate")]
    baud_rate: u32,
}

#[derive(Debug, Default, Deserialize)]
struct RawScan {
    xtender: Option<(u32, u32)>,
    vario_power: Option<(u32, u32)>,
    rcc: Option<(u32, u32)>,
    bsp: Option<(u32, u32)>,
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_discovery_interval_secs() -> u64 {
    DEFAULT_DISCOVERY_INTERVAL_SECS
}

fn default_thread_monitor() -> bool {
    true
}

/// Fully resolved configuration, ready to hand to
/// [`crate::manager::DeviceManager::start`].
#[derive(Debug, Clone)]
pub struct Config {
    pub port: String,
    pub baud_rate: u32,
    pub discovery_interval: Duration,
    /// Whether an external thread-monitor should be told about the
    /// discovery thread once it's spawned, mirroring the original
    /// `thread_monitor.register(self._thread)` call. The RX-error fatal
    /// threshold in [`crate::manager::DeviceManager`] always applies
    /// regardless of this flag — it is the manager's sole health gate and
    /// is not conditional on monitoring being registered.
    pub thread_monitor: bool,
    /// Bus address range scanned per kind during discovery, overriding
    /// [`crate::devices::probe_spec`]'s default range when present.
    pub scan_overrides: Vec<(DeviceKind, std::ops::RangeInclusive<u32>)>,
}

/// Failure to load or parse a configuration file.
#[derive(Debug, Display)]
pub enum ConfigError {
    #[display(fmt = "failed to read {}: {}", path, source)]
    Io { path: String, source: std::io::Error },
    #[display(fmt = "failed to parse {}: {}", path, source)]
    Parse { path: String, source: toml::de::Error },
}

impl std::error::Error for ConfigError {}

impl Config {
    /// Loads and parses `path`, then applies `SCOM_INTERFACE`/
    /// `SCOM_BAUDRATE` environment overrides on top of the file's
    /// `[transport]` section.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let text = std::fs::read_to_string(path_ref).map_err(|source| ConfigError::Io {
            path: path_ref.display().to_string(),
            source,
        })?;
        let raw: RawConfig = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path_ref.display().to_string(),
            source,
        })?;
        Ok(Self::from_raw(raw))
    }

    fn from_raw(raw: RawConfig) -> Self {
        let mut port = raw.transport.port;
        let mut baud_rate = raw.transport.baud_rate;

        if let Ok(interface) = std::env::var("SCOM_INTERFACE") {
            port = interface;
        }
        if let Ok(baud) = std::env::var("SCOM_BAUDRATE") {
            if let Ok(parsed) = baud.parse() {
                baud_rate = parsed;
            } else {
                log::warn!("scom: ignoring non-numeric SCOM_BAUDRATE={baud}");
            }
        }

        let mut scan_overrides = Vec::new();
        if let Some((lo, hi)) = raw.scan.xtender {
            scan_overrides.push((DeviceKind::Xtender, lo..=hi));
        }
        if let Some((lo, hi)) = raw.scan.vario_power {
            scan_overrides.push((DeviceKind::VarioPower, lo..=hi));
        }
        if let Some((lo, hi)) = raw.scan.rcc {
            scan_overrides.push((DeviceKind::Rcc, lo..=hi));
        }
        if let Some((lo, hi)) = raw.scan.bsp {
            scan_overrides.push((DeviceKind::Bsp, lo..=hi));
        }

        Config {
            port,
            baud_rate,
            discovery_interval: Duration::from_secs(raw.discovery_interval_secs),
            thread_monitor: raw.thread_monitor,
            scan_overrides,
        }
    }

    /// A config with no file backing, for tests and ad-hoc tooling: opens
    /// `port` at the default baud with a 5 s discovery interval and no scan
    /// overrides.
    pub fn new(port: impl Into<String>) -> Self {
        Config {
            port: port.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            discovery_interval: Duration::from_secs(DEFAULT_DISCOVERY_INTERVAL_SECS),
            thread_monitor: true,
            scan_overrides: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_raw_applies_defaults() {
        let raw: RawConfig = toml::from_str(
            r#"
            [transport]
            port = "/dev/ttyUSB0"
            "#,
        )
        .unwrap();
        let config = Config::from_raw(raw);
        assert_eq!(config.baud_rate, DEFAULT_BAUD_RATE);
        assert_eq!(config.discovery_interval, Duration::from_secs(5));
        assert!(config.thread_monitor);
        assert!(config.scan_overrides.is_empty());
    }

    #[test]
    fn from_raw_reads_scan_overrides() {
        let raw: RawConfig = toml::from_str(
            r#"
            [transport]
            port = "/dev/ttyUSB0"

            [scan]
            bsp = [601, 605]
            "#,
        )
        .unwrap();
        let config = Config::from_raw(raw);
        assert_eq!(config.scan_overrides, vec![(DeviceKind::Bsp, 601..=605)]);
    }

    #[test]
    fn env_interface_overrides_file_port() {
        std::env::set_var("SCOM_INTERFACE", "/dev/ttyUSB9");
        let raw: RawConfig = toml::from_str(
            r#"
            [transport]
            port = "/dev/ttyUSB0"
            "#,
        )
        .unwrap();
        let config = Config::from_raw(raw);
        std::env::remove_var("SCOM_INTERFACE");
        assert_eq!(config.port, "/dev/ttyUSB9");
    }
}
