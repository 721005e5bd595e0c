//! Run report module
//!
//! Provides structs for per-worker results, host system metrics, and the run report
//! with JSON serialization support.

use crate::aggregate::ThroughputSummary;
use crate::device::DevicePlan;
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

/// One worker's line in the report
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerReport {
    pub worker_id: u64,
    pub device_id: i32,
    pub frames: u64,
    pub fps: f64,
}

/// System-level metrics sampled after the workers joined
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SystemMetrics {
    pub cpu_usage_percent: f32,
    pub mem_usage_percent: f32,
    pub load_avg_1: f32,
    pub load_avg_5: f32,
    pub load_avg_15: f32,
}

/// Complete record of one run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunReport {
    pub run_id: Uuid,
    pub timestamp_unix_ms: i64,
    pub input_path: String,
    pub worker_count: usize,
    pub devices: DevicePlan,
    pub workers: Vec<WorkerReport>,
    pub total_frames: u64,
    pub total_fps: f64,
    pub system: SystemMetrics,
}

impl RunReport {
    pub fn new(
        input: &Path,
        devices: DevicePlan,
        workers: Vec<WorkerReport>,
        summary: ThroughputSummary,
        system: SystemMetrics,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            timestamp_unix_ms: timestamp_ms(),
            input_path: input.to_string_lossy().to_string(),
            worker_count: workers.len(),
            devices,
            workers,
            total_frames: summary.total_units,
            total_fps: summary.total_rate,
            system,
        }
    }

    /// Plain-text summary lines
    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines: Vec<String> = self
            .workers
            .iter()
            .map(|w| {
                format!(
                    "worker {} on device {}: {} frames, {:.2} fps",
                    w.worker_id, w.device_id, w.frames, w.fps
                )
            })
            .collect();
        lines.push(format!("Total frame decoded: {}", self.total_frames));
        lines.push(format!("avg frame per second: {:.2}", self.total_fps));
        lines
    }
}

/// Collects current system metrics using sysinfo
pub fn collect_system_metrics() -> SystemMetrics {
    use sysinfo::System;

    let mut sys = System::new();
    sys.refresh_cpu_usage();
    sys.refresh_memory();

    let cpu_usage = sys.global_cpu_usage();
    let total_memory = sys.total_memory();
    let used_memory = sys.used_memory();
    let mem_usage = if total_memory > 0 {
        (used_memory as f64 / total_memory as f64 * 100.0) as f32
    } else {
        0.0
    };

    let load_avg = System::load_average();

    SystemMetrics {
        cpu_usage_percent: cpu_usage,
        mem_usage_percent: mem_usage,
        load_avg_1: load_avg.one as f32,
        load_avg_5: load_avg.five as f32,
        load_avg_15: load_avg.fifteen as f32,
    }
}

fn timestamp_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
