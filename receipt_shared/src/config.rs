//! Shared configuration for the printer host, its drivers, and tests.
//!
//! ## Example: TOML Configuration
//!
//! ```toml
//! [printer]
//! name = "front-desk"
//! model = "TM-T88"
//! target = "USB:"
//! transport = "serial"
//! serial_port = "/dev/ttyUSB0"
//! baud = 38400
//!
//! [session]
//! lock_timeout_ms = 30000
//! completion_timeout_ms = 30000
//! ```
//!
//! Every field has a default, so an empty file yields a usable simulated setup.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub printer: PrinterConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub web: WebConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Simulated,
    Serial,
}

/// Which device to talk to and how.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PrinterConfig {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    /// Device address handed to `connect`, e.g. `USB:` or `TCP:192.168.0.10`.
    #[serde(default = "default_target")]
    pub target: String,
    #[serde(default = "default_transport")]
    pub transport: Transport,
    #[serde(default = "default_serial_port")]
    pub serial_port: String,
    #[serde(default = "default_baud")]
    pub baud: u32,
}

impl Default for PrinterConfig {
    fn default() -> Self {
        Self {
            name: None,
            model: default_model(),
            target: default_target(),
            transport: default_transport(),
            serial_port: default_serial_port(),
            baud: default_baud(),
        }
    }
}

/// Timing and retry policy of the session coordinator.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
    #[serde(default = "default_probe_lock_timeout_ms")]
    pub probe_lock_timeout_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,
    #[serde(default = "default_connect_backoff_ms")]
    pub connect_backoff_ms: u64,
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
    #[serde(default = "default_completion_timeout_ms")]
    pub completion_timeout_ms: u64,
    #[serde(default = "default_recovery_timeout_ms")]
    pub recovery_timeout_ms: u64,
    /// When false a job resolves as `sent` as soon as the device accepts it.
    #[serde(default = "default_wait_for_completion")]
    pub wait_for_completion: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: default_lock_timeout_ms(),
            probe_lock_timeout_ms: default_probe_lock_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            connect_attempts: default_connect_attempts(),
            connect_backoff_ms: default_connect_backoff_ms(),
            send_timeout_ms: default_send_timeout_ms(),
            completion_timeout_ms: default_completion_timeout_ms(),
            recovery_timeout_ms: default_recovery_timeout_ms(),
            wait_for_completion: default_wait_for_completion(),
        }
    }
}

impl SessionConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
    pub fn probe_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_lock_timeout_ms)
    }
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
    pub fn connect_backoff(&self) -> Duration {
        Duration::from_millis(self.connect_backoff_ms)
    }
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
    pub fn completion_timeout(&self) -> Duration {
        Duration::from_millis(self.completion_timeout_ms)
    }
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_millis(self.recovery_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.connect_attempts == 0 {
            return Err(ConfigError::Invalid("session.connect_attempts must be >= 1".to_string()));
        }
        let timeouts = [
            ("lock_timeout_ms", self.lock_timeout_ms),
            ("probe_lock_timeout_ms", self.probe_lock_timeout_ms),
            ("connect_timeout_ms", self.connect_timeout_ms),
            ("send_timeout_ms", self.send_timeout_ms),
            ("completion_timeout_ms", self.completion_timeout_ms),
            ("recovery_timeout_ms", self.recovery_timeout_ms),
        ];
        for (name, value) in timeouts {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("session.{} must be > 0", name)));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self { listen: default_listen() }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.session.validate()?;
        if self.printer.transport == Transport::Serial && self.printer.serial_port.is_empty() {
            return Err(ConfigError::Invalid(
                "printer.serial_port is required for the serial transport".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_model() -> String { "TM-T88".to_string() }
fn default_target() -> String { "USB:".to_string() }
fn default_transport() -> Transport { Transport::Simulated }
fn default_serial_port() -> String { "/dev/ttyUSB0".to_string() }
fn default_baud() -> u32 { 38400 }
fn default_lock_timeout_ms() -> u64 { 30_000 }
fn default_probe_lock_timeout_ms() -> u64 { 1_000 }
fn default_connect_timeout_ms() -> u64 { 15_000 }
fn default_connect_attempts() -> u32 { 2 }
fn default_connect_backoff_ms() -> u64 { 500 }
fn default_send_timeout_ms() -> u64 { 10_000 }
fn default_completion_timeout_ms() -> u64 { 30_000 }
fn default_recovery_timeout_ms() -> u64 { 5_000 }
fn default_wait_for_completion() -> bool { true }
fn default_listen() -> String { "0.0.0.0:3000".to_string() }

pub fn load_config(path: &str) -> Result<Config, ConfigError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) => {
            tracing::error!("Failed to read config file '{}': {}", path, e);
            return Err(ConfigError::Io(e));
        }
    };
    let config: Config = match toml::from_str(&contents) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to parse config TOML: {}", e);
            return Err(ConfigError::Toml(e));
        }
    };
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_document_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.printer.target, "USB:");
        assert_eq!(config.printer.transport, Transport::Simulated);
        assert_eq!(config.session.connect_attempts, 2);
        assert_eq!(config.session.completion_timeout(), Duration::from_secs(30));
        assert!(config.session.wait_for_completion);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let toml_str = r#"
            [printer]
            transport = "serial"
            serial_port = "/dev/ttyS3"

            [session]
            lock_timeout_ms = 2000
            connect_attempts = 3
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.printer.transport, Transport::Serial);
        assert_eq!(config.printer.serial_port, "/dev/ttyS3");
        assert_eq!(config.printer.baud, 38400);
        assert_eq!(config.session.lock_timeout(), Duration::from_secs(2));
        assert_eq!(config.session.connect_attempts, 3);
        assert_eq!(config.session.connect_backoff_ms, 500);
    }

    #[test]
    fn zero_attempts_and_zero_timeouts_are_rejected() {
        let mut session = SessionConfig::default();
        session.connect_attempts = 0;
        assert!(matches!(session.validate(), Err(ConfigError::Invalid(_))));

        let mut session = SessionConfig::default();
        session.completion_timeout_ms = 0;
        let err = session.validate().unwrap_err();
        assert!(err.to_string().contains("completion_timeout_ms"));
    }

    #[test]
    fn load_config_reads_and_validates_a_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[session]\nrecovery_timeout_ms = 750").unwrap();
        let config = load_config(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.session.recovery_timeout(), Duration::from_millis(750));

        let mut bad = tempfile::NamedTempFile::new().unwrap();
        writeln!(bad, "[session]\nconnect_attempts = 0").unwrap();
        assert!(matches!(
            load_config(bad.path().to_str().unwrap()),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        assert!(matches!(
            load_config("/definitely/not/here.toml"),
            Err(ConfigError::Io(_))
        ));
    }
}
