//! TOML-based device configuration.
//!
//! The configuration file identifies the device and tunes the protocol
//! engine:
//!
//! ```toml
//! [device]
//! device_id = "434c4f55444c494e4b2d3031"
//! product_id = 1449
//! firmware_version = 17
//! platform_id = 12
//! log_level = "info"
//!
//! [protocol]
//! require_hello_response = false
//! device_initiated_describe = true
//! keepalive_interval_ms = 15000
//! ack_timeout_ms = 30000
//! ```
//!
//! Every field carries a serde default so a partial (or absent) file still
//! yields a working configuration, and fields added by newer firmware are
//! ignored by older readers.  This versioned record replaces ad-hoc binary
//! settings blobs: no size prefixes, no zero-padding.

use std::path::{Path, PathBuf};

use cloudlink_core::ProtocolFlags;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::engine::ProtocolConfig;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// The device id is not 12 bytes of hex.
    #[error("invalid device id '{0}': expected 24 hex characters")]
    InvalidDeviceId(String),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level device configuration stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct DeviceConfig {
    #[serde(default)]
    pub device: DeviceIdentity,
    #[serde(default)]
    pub protocol: ProtocolSettings,
}

/// Device identity reported in the HELLO exchange.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceIdentity {
    /// Factory device id as 24 hex characters (12 bytes).
    #[serde(default = "default_device_id")]
    pub device_id: String,
    /// Product family identifier.
    #[serde(default)]
    pub product_id: u16,
    /// Firmware version counter.
    #[serde(default)]
    pub firmware_version: u16,
    /// Hardware platform identifier.
    #[serde(default)]
    pub platform_id: u16,
    /// `tracing` log level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Protocol engine tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProtocolSettings {
    /// Whether the handshake must wait for the cloud's HELLO.
    #[serde(default)]
    pub require_hello_response: bool,
    /// Whether the device announces its own describes instead of waiting
    /// for the cloud to ask.
    #[serde(default)]
    pub device_initiated_describe: bool,
    /// Quiet interval before a keepalive ping.
    #[serde(default = "default_keepalive_interval_ms")]
    pub keepalive_interval_ms: u64,
    /// Deadline for outbound confirmable requests.
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_device_id() -> String {
    "000000000000000000000000".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_keepalive_interval_ms() -> u64 {
    15_000
}
fn default_ack_timeout_ms() -> u64 {
    30_000
}

impl Default for DeviceIdentity {
    fn default() -> Self {
        Self {
            device_id: default_device_id(),
            product_id: 0,
            firmware_version: 0,
            platform_id: 0,
            log_level: default_log_level(),
        }
    }
}

impl Default for ProtocolSettings {
    fn default() -> Self {
        Self {
            require_hello_response: false,
            device_initiated_describe: false,
            keepalive_interval_ms: default_keepalive_interval_ms(),
            ack_timeout_ms: default_ack_timeout_ms(),
        }
    }
}

impl DeviceConfig {
    /// Converts the on-disk form into the engine's [`ProtocolConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidDeviceId`] when the device id is not
    /// 24 hex characters.
    pub fn protocol_config(&self) -> Result<ProtocolConfig, ConfigError> {
        let mut flags = 0u8;
        if self.protocol.require_hello_response {
            flags |= ProtocolFlags::REQUIRE_HELLO_RESPONSE;
        }
        if self.protocol.device_initiated_describe {
            flags |= ProtocolFlags::DEVICE_INITIATED_DESCRIBE;
        }
        Ok(ProtocolConfig {
            product_id: self.device.product_id,
            firmware_version: self.device.firmware_version,
            platform_id: self.device.platform_id,
            device_id: parse_device_id(&self.device.device_id)?,
            protocol_flags: ProtocolFlags(flags),
            keepalive_interval_ms: self.protocol.keepalive_interval_ms,
            ack_timeout_ms: self.protocol.ack_timeout_ms,
        })
    }
}

/// Parses 24 hex characters into the 12-byte device id.
fn parse_device_id(hex: &str) -> Result<[u8; 12], ConfigError> {
    let invalid = || ConfigError::InvalidDeviceId(hex.to_string());
    if hex.len() != 24 || !hex.is_ascii() {
        return Err(invalid());
    }
    let mut id = [0u8; 12];
    for (i, byte) in id.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&hex[2 * i..2 * i + 2], 16).map_err(|_| invalid())?;
    }
    Ok(id)
}

// ── Config file I/O ───────────────────────────────────────────────────────────

/// Loads a [`DeviceConfig`] from `path`, returning defaults when the file
/// does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than
/// "not found", and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: &Path) -> Result<DeviceConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(DeviceConfig::default()),
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Persists `config` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(path: &Path, config: &DeviceConfig) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
