//! Decode backends for the decode pool runner
//!
//! The demuxer and decode session are reached through these traits so the pool and
//! timing logic never depend on a particular vendor library.

pub mod host;

pub use host::HostBackend;

use crate::config::DecoderConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Error type for demux and decode operations
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Input could not be opened
    #[error("Failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Reading the next unit failed
    #[error("Demux failed: {0}")]
    Demux(String),

    /// No decoder for the stream's codec
    #[error("Unsupported codec: {0}")]
    UnsupportedCodec(CodecId),

    /// Session could not be created on the device
    #[error("Failed to create decode session on device {device}: {reason}")]
    Session { device: i32, reason: String },

    /// The decoder rejected a unit
    #[error("Decode failed: {0}")]
    Decode(String),

    /// IO error during decode
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Elementary stream codec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CodecId {
    H264,
    Hevc,
    Av1,
    Vp9,
    Unknown,
}

impl CodecId {
    /// Guess the codec from a raw elementary stream extension
    pub fn from_extension(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());
        match ext.as_deref() {
            Some("h264") | Some("264") | Some("avc") => CodecId::H264,
            Some("h265") | Some("265") | Some("hevc") => CodecId::Hevc,
            Some("av1") | Some("obu") | Some("ivf") => CodecId::Av1,
            Some("vp9") => CodecId::Vp9,
            _ => CodecId::Unknown,
        }
    }
}

impl std::fmt::Display for CodecId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodecId::H264 => write!(f, "h264"),
            CodecId::Hevc => write!(f, "hevc"),
            CodecId::Av1 => write!(f, "av1"),
            CodecId::Vp9 => write!(f, "vp9"),
            CodecId::Unknown => write!(f, "unknown"),
        }
    }
}

/// One demuxed unit; an empty payload marks end of stream
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Packet {
    pub data: Vec<u8>,
    pub pts: i64,
}

impl Packet {
    pub fn new(data: Vec<u8>, pts: i64) -> Self {
        Self { data, pts }
    }

    pub fn end_of_stream() -> Self {
        Self::default()
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.data.is_empty()
    }
}

/// Crop rectangle in output pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

/// Parameters for opening a decode session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub mem_type: u32,
    pub force_zero_latency: bool,
    pub crop: Option<Rect>,
    pub max_width: u32,
    pub max_height: u32,
    pub clk_rate: u32,
}

impl From<&DecoderConfig> for SessionConfig {
    fn from(cfg: &DecoderConfig) -> Self {
        Self {
            mem_type: cfg.mem_type,
            force_zero_latency: cfg.force_zero_latency,
            crop: None,
            max_width: cfg.max_width,
            max_height: cfg.max_height,
            clk_rate: cfg.clk_rate,
        }
    }
}

/// Identity of the device a session runs on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuInfo {
    pub device_name: String,
    pub arch_name: String,
    pub pci_bus_id: u32,
    pub pci_domain_id: u32,
    pub pci_device_id: u32,
}

impl std::fmt::Display for GpuInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}[{}] on PCI bus {}:{}.{}",
            self.device_name, self.arch_name, self.pci_bus_id, self.pci_domain_id, self.pci_device_id
        )
    }
}

/// Splits an input into decodable units
pub trait Demuxer: Send {
    fn codec(&self) -> CodecId;

    /// Next unit; a zero-size packet signals end of stream
    fn next_unit(&mut self) -> Result<Packet, DecodeError>;
}

/// A decoder bound to one device
pub trait DecodeSession: Send {
    /// Feed one unit and return how many frames it produced
    fn process_unit(&mut self, packet: &Packet) -> Result<u64, DecodeError>;

    /// Frames released after end of stream
    fn flushed_unit_count(&mut self) -> u64;

    /// Fixed per-process session cost in milliseconds, if the decoder tracks it
    fn session_overhead_millis(&self, process_id: u32) -> Option<f64>;

    fn gpu_info(&self) -> GpuInfo;
}

/// Factory for demuxers and decode sessions
pub trait DecodeBackend: Send + Sync {
    fn open_source(&self, path: &Path) -> Result<Box<dyn Demuxer>, DecodeError>;

    fn create_session(
        &self,
        device_id: i32,
        codec: CodecId,
        config: &SessionConfig,
    ) -> Result<Box<dyn DecodeSession>, DecodeError>;
}
