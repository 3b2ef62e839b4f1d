//! Configuration storage.
//!
//! - **`config`** – TOML device configuration read/write.

pub mod config;

pub use config::{load_config, save_config, ConfigError, DeviceConfig};
