//! Host backend
//!
//! Streams the input file in fixed-size packets and counts one frame per non-empty
//! packet. Lets the pool be exercised end to end without a vendor decoder.

use super::{CodecId, DecodeBackend, DecodeError, DecodeSession, Demuxer, GpuInfo, Packet, SessionConfig};
use crate::config::Config;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// In-process backend reading raw input from disk
#[derive(Debug, Clone)]
pub struct HostBackend {
    packet_size: usize,
    arch_name: String,
}

impl HostBackend {
    pub fn new(packet_size: usize, arch_name: impl Into<String>) -> Self {
        Self {
            packet_size: packet_size.max(1),
            arch_name: arch_name.into(),
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(cfg.decoder.packet_size, cfg.accelerator.arch_name.clone())
    }
}

impl DecodeBackend for HostBackend {
    fn open_source(&self, path: &Path) -> Result<Box<dyn Demuxer>, DecodeError> {
        let file = File::open(path).map_err(|source| DecodeError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Box::new(HostDemuxer {
            reader: BufReader::new(file),
            packet_size: self.packet_size,
            codec: CodecId::from_extension(path),
            next_pts: 0,
        }))
    }

    fn create_session(
        &self,
        device_id: i32,
        _codec: CodecId,
        _config: &SessionConfig,
    ) -> Result<Box<dyn DecodeSession>, DecodeError> {
        if device_id < 0 {
            return Err(DecodeError::Session {
                device: device_id,
                reason: "negative device id".to_string(),
            });
        }
        Ok(Box::new(HostSession {
            device_id,
            arch_name: self.arch_name.clone(),
        }))
    }
}

struct HostDemuxer {
    reader: BufReader<File>,
    packet_size: usize,
    codec: CodecId,
    next_pts: i64,
}

impl Demuxer for HostDemuxer {
    fn codec(&self) -> CodecId {
        self.codec
    }

    fn next_unit(&mut self) -> Result<Packet, DecodeError> {
        let mut data = Vec::with_capacity(self.packet_size);
        (&mut self.reader)
            .take(self.packet_size as u64)
            .read_to_end(&mut data)?;
        if data.is_empty() {
            return Ok(Packet::end_of_stream());
        }
        let pts = self.next_pts;
        self.next_pts += 1;
        Ok(Packet::new(data, pts))
    }
}

struct HostSession {
    device_id: i32,
    arch_name: String,
}

impl DecodeSession for HostSession {
    fn process_unit(&mut self, packet: &Packet) -> Result<u64, DecodeError> {
        Ok(if packet.is_end_of_stream() { 0 } else { 1 })
    }

    fn flushed_unit_count(&mut self) -> u64 {
        0
    }

    fn session_overhead_millis(&self, _process_id: u32) -> Option<f64> {
        None
    }

    fn gpu_info(&self) -> GpuInfo {
        GpuInfo {
            device_name: format!("host device {}", self.device_id),
            arch_name: self.arch_name.clone(),
            pci_bus_id: 0,
            pci_domain_id: 0,
            pci_device_id: 0,
        }
    }
}
