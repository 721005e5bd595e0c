//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// A value was parsed but is out of range
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoolConfig {
    /// Number of parallel decode workers (default 4)
    #[serde(default = "default_workers")]
    pub workers: u32,
}

fn default_workers() -> u32 {
    4
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
        }
    }
}

/// Device selection configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct DeviceConfig {
    /// Accelerator the first worker is bound to
    #[serde(default)]
    pub base_device: i32,
}

/// Static accelerator topology, used when no vendor runtime is queried
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AcceleratorConfig {
    /// Number of visible accelerators (None = not configured)
    pub device_count: Option<u32>,
    /// Architecture name, optionally with a `:feature` suffix (e.g. "gfx90a:sramecc+:xnack-")
    #[serde(default = "default_arch_name")]
    pub arch_name: String,
    /// Architectures that expose two partitions per physical package
    #[serde(default = "default_multi_partition_archs")]
    pub multi_partition_archs: Vec<String>,
}

fn default_arch_name() -> String {
    "unknown".to_string()
}

fn default_multi_partition_archs() -> Vec<String> {
    vec!["gfx90a".to_string()]
}

impl Default for AcceleratorConfig {
    fn default() -> Self {
        Self {
            device_count: None,
            arch_name: default_arch_name(),
            multi_partition_archs: default_multi_partition_archs(),
        }
    }
}

/// Decode session configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DecoderConfig {
    /// Output surface memory type (1 = device internal)
    #[serde(default = "default_mem_type")]
    pub mem_type: u32,
    /// Emit frames as soon as they are decoded instead of in display order
    #[serde(default)]
    pub force_zero_latency: bool,
    /// Maximum decode width (0 = stream width)
    #[serde(default)]
    pub max_width: u32,
    /// Maximum decode height (0 = stream height)
    #[serde(default)]
    pub max_height: u32,
    /// Decoder clock rate in Hz used for timestamp conversion
    #[serde(default = "default_clk_rate")]
    pub clk_rate: u32,
    /// Packet size in bytes for the host backend
    #[serde(default = "default_packet_size")]
    pub packet_size: usize,
}

fn default_mem_type() -> u32 {
    1
}

fn default_clk_rate() -> u32 {
    1000
}

fn default_packet_size() -> usize {
    64 * 1024
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            mem_type: default_mem_type(),
            force_zero_latency: false,
            max_width: 0,
            max_height: 0,
            clk_rate: default_clk_rate(),
            packet_size: default_packet_size(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub accelerator: AcceleratorConfig,
    #[serde(default)]
    pub decoder: DecoderConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Parses the config.toml file and handles missing optional fields with defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - DECODE_POOL_WORKERS -> pool.workers
    /// - DECODE_POOL_DEVICE -> device.base_device
    /// - ACCEL_DEVICE_COUNT -> accelerator.device_count
    /// - ACCEL_ARCH_NAME -> accelerator.arch_name
    /// - ACCEL_MULTI_PARTITION_ARCHS -> accelerator.multi_partition_archs (comma separated)
    /// - DECODER_MEM_TYPE -> decoder.mem_type
    /// - DECODER_CLK_RATE -> decoder.clk_rate
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("DECODE_POOL_WORKERS") {
            if let Ok(workers) = val.parse::<u32>() {
                self.pool.workers = workers;
            }
        }

        if let Ok(val) = env::var("DECODE_POOL_DEVICE") {
            if let Ok(device) = val.parse::<i32>() {
                self.device.base_device = device;
            }
        }

        if let Ok(val) = env::var("ACCEL_DEVICE_COUNT") {
            if let Ok(count) = val.parse::<u32>() {
                self.accelerator.device_count = Some(count);
            }
        }

        if let Ok(val) = env::var("ACCEL_ARCH_NAME") {
            let trimmed = val.trim();
            if !trimmed.is_empty() {
                self.accelerator.arch_name = trimmed.to_string();
            }
        }

        if let Ok(val) = env::var("ACCEL_MULTI_PARTITION_ARCHS") {
            self.accelerator.multi_partition_archs = val
                .split(',')
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }

        if let Ok(val) = env::var("DECODER_MEM_TYPE") {
            if let Ok(mem_type) = val.parse::<u32>() {
                self.decoder.mem_type = mem_type;
            }
        }

        if let Ok(val) = env::var("DECODER_CLK_RATE") {
            if let Ok(rate) = val.parse::<u32>() {
                self.decoder.clk_rate = rate;
            }
        }
    }

    /// Reject values that parse but cannot drive a run
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool.workers == 0 {
            return Err(ConfigError::Invalid(
                "pool.workers must be at least 1".to_string(),
            ));
        }
        if self.device.base_device < 0 {
            return Err(ConfigError::Invalid(format!(
                "device.base_device must be non-negative, got {}",
                self.device.base_device
            )));
        }
        if self.decoder.packet_size == 0 {
            return Err(ConfigError::Invalid(
                "decoder.packet_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Load configuration from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Defaults with environment overrides, for runs without a config file
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }
}
