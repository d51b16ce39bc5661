//! Node configuration.
//!
//! The device itself is configured entirely at compile time: the constants in
//! [`consts`] describe the reference board (RP2040-class flash, HC-06 radio
//! bridge, AD8232 ECG front end). Host runs can override them with a
//! [`NodeConfig`] loaded through Figment from:
//! 1. built-in defaults (equal to the constants)
//! 2. a TOML file
//! 3. environment variables prefixed with `BIOSENSE_` (`__` separates levels)
//!
//! # Example
//! ```no_run
//! use biosense_node::config::NodeConfig;
//!
//! let config = NodeConfig::load_from("config/node.toml")?;
//! config.validate()?;
//! println!("log capacity: {} bytes", config.flash.region_capacity);
//! # Ok::<(), biosense_node::error::NodeError>(())
//! ```

use crate::error::{AppResult, NodeError};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Compile-time reference configuration.
pub mod consts {
    /// Total size of the on-board flash.
    pub const FLASH_SIZE: usize = 2 * 1024 * 1024;
    /// Program granularity of the flash.
    pub const FLASH_PAGE_SIZE: usize = 256;
    /// Erase granularity of the flash.
    pub const FLASH_SECTOR_SIZE: usize = 4096;
    /// Log region starts 1 MiB in, clear of the program image.
    pub const LOG_REGION_OFFSET: usize = 1024 * 1024;
    /// 100 blocks of 4 pages.
    pub const LOG_REGION_CAPACITY: usize = 100 * 4 * FLASH_PAGE_SIZE;
    /// Value of an erased flash byte.
    pub const ERASED_BYTE: u8 = 0xFF;

    /// Cleanup check period (ms).
    pub const CLEANUP_PERIOD_MS: u64 = 1000;
    /// Sampling period (ms).
    pub const SAMPLE_PERIOD_MS: u64 = 200;

    /// HC-06 default UART speed.
    pub const UART_BAUD_RATE: u32 = 38_400;

    /// ADC reference voltage.
    pub const ADC_REFERENCE_VOLTS: f32 = 3.3;
    /// ADC resolution.
    pub const ADC_RESOLUTION_BITS: u32 = 12;

    /// 7-bit I2C address of the optical pulse-oximetry sensor.
    pub const OXIMETER_I2C_ADDRESS: u8 = 0x57;

    /// Depth of the trigger event queue.
    pub const EVENT_QUEUE_DEPTH: usize = 16;
}

/// Top-level node configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Flash geometry and log region placement
    pub flash: FlashConfig,
    /// Trigger periods
    pub timing: TimingConfig,
    /// Radio link settings
    pub link: LinkConfig,
    /// Sensor front-end settings
    pub sensors: SensorConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Node name, used in log output
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    pub log_format: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "biosense-node".to_string(),
            log_level: "info".to_string(),
            log_format: "compact".to_string(),
        }
    }
}

/// Flash geometry and log region placement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlashConfig {
    /// Total flash size in bytes
    pub size: usize,
    /// Erase granularity in bytes
    pub erase_size: usize,
    /// Program granularity in bytes
    pub write_size: usize,
    /// Offset of the log region from the start of flash
    pub region_offset: usize,
    /// Log region capacity in bytes (multiple of `erase_size`)
    pub region_capacity: usize,
    /// Backing image file; RAM-only flash when absent
    pub image: Option<PathBuf>,
    /// Erase the log region on boot
    pub erase_on_boot: bool,
}

impl Default for FlashConfig {
    fn default() -> Self {
        Self {
            size: consts::FLASH_SIZE,
            erase_size: consts::FLASH_SECTOR_SIZE,
            write_size: consts::FLASH_PAGE_SIZE,
            region_offset: consts::LOG_REGION_OFFSET,
            region_capacity: consts::LOG_REGION_CAPACITY,
            image: None,
            erase_on_boot: true,
        }
    }
}

/// Trigger periods
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Sampling trigger period in milliseconds
    pub sample_period_ms: u64,
    /// Cleanup trigger period in milliseconds
    pub cleanup_period_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            sample_period_ms: consts::SAMPLE_PERIOD_MS,
            cleanup_period_ms: consts::CLEANUP_PERIOD_MS,
        }
    }
}

impl TimingConfig {
    /// Sampling period as a `Duration`
    pub fn sample_period(&self) -> Duration {
        Duration::from_millis(self.sample_period_ms)
    }

    /// Cleanup period as a `Duration`
    pub fn cleanup_period(&self) -> Duration {
        Duration::from_millis(self.cleanup_period_ms)
    }
}

/// Radio link settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Serial port path (e.g. "/dev/rfcomm0"); stdio when absent
    pub port: Option<String>,
    /// Baud rate
    pub baud_rate: u32,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: consts::UART_BAUD_RATE,
        }
    }
}

/// Sensor front-end settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    /// ADC reference voltage
    pub adc_reference_volts: f32,
    /// ADC resolution in bits
    pub adc_resolution_bits: u32,
    /// Record the ECG channel
    pub ecg: bool,
    /// Record the SpO2 channel
    pub spo2: bool,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            adc_reference_volts: consts::ADC_REFERENCE_VOLTS,
            adc_resolution_bits: consts::ADC_RESOLUTION_BITS,
            ecg: true,
            spo2: true,
        }
    }
}

impl NodeConfig {
    /// Load configuration from config/node.toml and environment variables
    ///
    /// Environment variables override the file with prefix BIOSENSE_, e.g.
    /// `BIOSENSE_TIMING__SAMPLE_PERIOD_MS=100`.
    pub fn load() -> AppResult<Self> {
        Self::load_from("config/node.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        Ok(Self::figment(path.as_ref()).extract()?)
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(NodeConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("BIOSENSE_").split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(NodeError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.application.log_format.as_str()) {
            return Err(NodeError::Configuration(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            )));
        }

        let flash = &self.flash;
        if flash.erase_size == 0 || flash.write_size == 0 {
            return Err(NodeError::Configuration(
                "Flash erase_size and write_size must be non-zero".into(),
            ));
        }
        if flash.erase_size % flash.write_size != 0 {
            return Err(NodeError::Configuration(format!(
                "erase_size {} is not a multiple of write_size {}",
                flash.erase_size, flash.write_size
            )));
        }
        if flash.region_capacity == 0 || flash.region_capacity % flash.erase_size != 0 {
            return Err(NodeError::Configuration(format!(
                "region_capacity {} must be a non-zero multiple of erase_size {}",
                flash.region_capacity, flash.erase_size
            )));
        }
        if flash.region_offset % flash.erase_size != 0 {
            return Err(NodeError::Configuration(format!(
                "region_offset {:#x} is not erase-aligned",
                flash.region_offset
            )));
        }
        if flash.region_offset + flash.region_capacity > flash.size {
            return Err(NodeError::Configuration(format!(
                "Log region {:#x}..{:#x} exceeds flash size {:#x}",
                flash.region_offset,
                flash.region_offset + flash.region_capacity,
                flash.size
            )));
        }

        if self.timing.sample_period_ms == 0 || self.timing.cleanup_period_ms == 0 {
            return Err(NodeError::Configuration(
                "Trigger periods must be non-zero".into(),
            ));
        }

        if !(1..=16).contains(&self.sensors.adc_resolution_bits) {
            return Err(NodeError::Configuration(format!(
                "adc_resolution_bits {} out of range 1-16",
                self.sensors.adc_resolution_bits
            )));
        }

        Ok(())
    }
}
