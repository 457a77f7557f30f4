//! Daemon configuration using Figment
//!
//! Layers, lowest to highest precedence:
//! 1. built-in defaults (`#[serde(default)]` on every section)
//! 2. a TOML file: `--config <path>`, or `aiod.toml` in the working
//!    directory when present
//! 3. environment variables prefixed with `AIOD_`, nested with `__`
//!    (e.g. `AIOD_SERVER__READ_TIMEOUT_MS=100`); `AIOD_LOG_LEVEL` is a
//!    shorthand for `logging.level`
//! 4. the positional control port on the command line
//!
//! # Example
//! ```no_run
//! use aiod::config::DaemonConfig;
//!
//! let config = DaemonConfig::load(None, Some(18767))?;
//! assert_eq!(config.stream_port(), 18768);
//! # Ok::<(), aiod::DaemonError>(())
//! ```

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use aiod_acquisition::{ScanSettings, StreamSettings};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{DaemonError, DaemonResult};

/// Port the control listener binds when nothing else is configured.
pub const DEFAULT_CONTROL_PORT: u16 = 18767;

/// File picked up from the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "aiod.toml";

/// Log levels accepted in `logging.level` and `AIOD_LOG_LEVEL`.
pub const VALID_LOG_LEVELS: [&str; 6] = ["trace", "debug", "info", "warning", "warn", "error"];

/// Output formats accepted in `logging.format`.
pub const VALID_LOG_FORMATS: [&str; 3] = ["pretty", "compact", "json"];

/// Top-level daemon configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Listeners
    #[serde(default)]
    pub server: ServerConfig,
    /// Board backend
    #[serde(default)]
    pub board: BoardConfig,
    /// Scan timing
    #[serde(default)]
    pub scan: ScanTimingConfig,
    /// Streaming pipeline
    #[serde(default)]
    pub stream: StreamConfig,
    /// Log output
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Network listeners
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Interface both listeners bind to
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,
    /// Control port; the streaming port is the next one up
    #[serde(default = "default_control_port")]
    pub control_port: u16,
    /// Largest declared message length the framer accepts
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
    /// Receive poll interval, bounds how long a connection takes to notice
    /// shutdown
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,
}

/// Which board backend to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BoardBackend {
    /// In-memory board, no hardware needed
    #[default]
    Simulated,
    /// Register window mapped from `device_path`
    Mapped,
}

/// Board backend selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardConfig {
    /// Simulated or mapped
    #[serde(default)]
    pub backend: BoardBackend,
    /// Register window file, mapped backend only
    #[serde(default = "default_device_path")]
    pub device_path: PathBuf,
    /// Bytes of the register window to map
    #[serde(default = "default_map_len")]
    pub map_len: usize,
}

/// Scan acquisition timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanTimingConfig {
    /// Written to the ADC reduction register before each scan
    #[serde(default)]
    pub reduction_factor: u8,
    /// Delay after the start strobe
    #[serde(default = "default_settle_us")]
    pub settle_us: u64,
    /// Sleep between FIFO polls
    #[serde(default = "default_poll_interval_us")]
    pub poll_interval_us: u64,
    /// Fixed part of the scan timeout
    #[serde(default = "default_timeout_floor_ms")]
    pub timeout_floor_ms: u64,
    /// Timeout allowance per expected sample
    #[serde(default = "default_timeout_per_sample_us")]
    pub timeout_per_sample_us: u64,
}

/// Streaming pipeline sizing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Ring buffer capacity in slots
    #[serde(default = "default_ring_slots")]
    pub ring_slots: usize,
    /// Samples per DMA transfer (one ring slot)
    #[serde(default = "default_transfer_samples")]
    pub transfer_samples: usize,
    /// Logger wait on a full slot before rechecking termination
    #[serde(default = "default_logger_wait_ms")]
    pub logger_wait_ms: u64,
}

/// Log output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// trace, debug, info, warning (or warn), error
    #[serde(default = "default_log_level")]
    pub level: String,
    /// pretty, compact or json
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_control_port() -> u16 {
    DEFAULT_CONTROL_PORT
}

fn default_max_message_bytes() -> usize {
    1 << 20
}

fn default_read_timeout() -> u64 {
    250
}

fn default_device_path() -> PathBuf {
    PathBuf::from("/sys/bus/pci/devices/0000:01:00.0/resource0")
}

fn default_map_len() -> usize {
    256
}

fn default_settle_us() -> u64 {
    10
}

fn default_poll_interval_us() -> u64 {
    50
}

fn default_timeout_floor_ms() -> u64 {
    100
}

fn default_timeout_per_sample_us() -> u64 {
    20
}

fn default_ring_slots() -> usize {
    255
}

fn default_transfer_samples() -> usize {
    4096
}

fn default_logger_wait_ms() -> u64 {
    100
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "compact".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            control_port: default_control_port(),
            max_message_bytes: default_max_message_bytes(),
            read_timeout_ms: default_read_timeout(),
        }
    }
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            backend: BoardBackend::default(),
            device_path: default_device_path(),
            map_len: default_map_len(),
        }
    }
}

impl Default for ScanTimingConfig {
    fn default() -> Self {
        Self {
            reduction_factor: 0,
            settle_us: default_settle_us(),
            poll_interval_us: default_poll_interval_us(),
            timeout_floor_ms: default_timeout_floor_ms(),
            timeout_per_sample_us: default_timeout_per_sample_us(),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            ring_slots: default_ring_slots(),
            transfer_samples: default_transfer_samples(),
            logger_wait_ms: default_logger_wait_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl DaemonConfig {
    /// Load and validate.
    ///
    /// `path` replaces the default `aiod.toml`; a missing file is not an
    /// error. `port` is the command-line override of the control port.
    pub fn load(path: Option<&Path>, port: Option<u16>) -> DaemonResult<Self> {
        let file = path.map_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE), Path::to_path_buf);
        let mut figment = Figment::new()
            .merge(Toml::file(file))
            .merge(Env::prefixed("AIOD_").split("__"))
            .merge(Env::raw().only(&["AIOD_LOG_LEVEL"]).map(|_| "logging.level".into()));
        if let Some(port) = port {
            figment = figment.merge(Serialized::default("server.control_port", port));
        }
        Self::from_figment(&figment)
    }

    /// Extract and validate from an already layered figment.
    pub fn from_figment(figment: &Figment) -> DaemonResult<Self> {
        let config: Self = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> DaemonResult<()> {
        let port = self.server.control_port;
        if port == 0 || port == u16::MAX {
            return Err(DaemonError::InvalidConfig(format!(
                "control_port {port} leaves no room for the streaming port"
            )));
        }
        if self.server.max_message_bytes == 0 {
            return Err(DaemonError::InvalidConfig(
                "max_message_bytes must be positive".to_string(),
            ));
        }
        if self.server.read_timeout_ms == 0 {
            return Err(DaemonError::InvalidConfig(
                "read_timeout_ms must be positive".to_string(),
            ));
        }
        if self.board.map_len == 0 {
            return Err(DaemonError::InvalidConfig("map_len must be positive".to_string()));
        }
        self.stream_settings()
            .validate()
            .map_err(|err| DaemonError::InvalidConfig(err.to_string()))?;

        let level = self.logging.level.to_ascii_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(DaemonError::InvalidConfig(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.logging.level,
                VALID_LOG_LEVELS.join(", ")
            )));
        }
        let format = self.logging.format.to_ascii_lowercase();
        if !VALID_LOG_FORMATS.contains(&format.as_str()) {
            return Err(DaemonError::InvalidConfig(format!(
                "Invalid log format '{}'. Must be one of: {}",
                self.logging.format,
                VALID_LOG_FORMATS.join(", ")
            )));
        }
        Ok(())
    }

    /// Control listener address.
    pub fn control_addr(&self) -> SocketAddr {
        SocketAddr::new(self.server.bind_address, self.server.control_port)
    }

    /// Streaming port, always the control port plus one.
    pub fn stream_port(&self) -> u16 {
        self.server.control_port.saturating_add(1)
    }

    /// Streaming listener address.
    pub fn stream_addr(&self) -> SocketAddr {
        SocketAddr::new(self.server.bind_address, self.stream_port())
    }

    /// Socket read timeout for both listeners.
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.server.read_timeout_ms)
    }

    /// Scan engine settings.
    pub fn scan_settings(&self) -> ScanSettings {
        ScanSettings {
            reduction_factor: self.scan.reduction_factor,
            settle: Duration::from_micros(self.scan.settle_us),
            poll_interval: Duration::from_micros(self.scan.poll_interval_us),
            timeout_floor: Duration::from_millis(self.scan.timeout_floor_ms),
            timeout_per_sample: Duration::from_micros(self.scan.timeout_per_sample_us),
        }
    }

    /// Streaming session settings.
    pub fn stream_settings(&self) -> StreamSettings {
        StreamSettings {
            ring_slots: self.stream.ring_slots,
            transfer_samples: self.stream.transfer_samples,
            logger_wait: Duration::from_millis(self.stream.logger_wait_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = DaemonConfig::default();
        config.validate().unwrap();
        assert_eq!(config.server.control_port, 18767);
        assert_eq!(config.stream_port(), 18768);
        assert_eq!(config.board.backend, BoardBackend::Simulated);
        assert_eq!(config.scan_settings(), ScanSettings::default());
        assert_eq!(config.stream_settings().ring_slots, 255);
    }

    #[test]
    fn test_toml_sections_override_defaults() {
        let figment = Figment::new().merge(Toml::string(
            r#"
            [server]
            control_port = 20000

            [board]
            backend = "mapped"
            device_path = "/dev/aio0"

            [logging]
            level = "warning"
            format = "json"
            "#,
        ));
        let config = DaemonConfig::from_figment(&figment).unwrap();
        assert_eq!(config.control_addr().port(), 20000);
        assert_eq!(config.stream_addr().port(), 20001);
        assert_eq!(config.board.backend, BoardBackend::Mapped);
        assert_eq!(config.board.device_path, PathBuf::from("/dev/aio0"));
        assert_eq!(config.board.map_len, 256);
        assert_eq!(config.logging.level, "warning");
    }

    #[test]
    fn test_cli_port_wins_over_file() {
        let figment = Figment::new()
            .merge(Toml::string("[server]\ncontrol_port = 20000"))
            .merge(Serialized::default("server.control_port", 30000u16));
        let config = DaemonConfig::from_figment(&figment).unwrap();
        assert_eq!(config.server.control_port, 30000);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = DaemonConfig::default();
        config.server.control_port = u16::MAX;
        assert!(config.validate().is_err());

        let mut config = DaemonConfig::default();
        config.stream.ring_slots = 0;
        assert!(matches!(config.validate(), Err(DaemonError::InvalidConfig(_))));

        let mut config = DaemonConfig::default();
        config.stream.transfer_samples = 0;
        assert!(config.validate().is_err());

        let mut config = DaemonConfig::default();
        config.logging.level = "verbose".into();
        assert!(config.validate().unwrap_err().to_string().contains("verbose"));

        let mut config = DaemonConfig::default();
        config.logging.format = "xml".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_backend_fails_extraction() {
        let figment = Figment::new().merge(Toml::string("[board]\nbackend = \"usb\""));
        assert!(matches!(
            DaemonConfig::from_figment(&figment),
            Err(DaemonError::ConfigLoad(_))
        ));
    }
}
