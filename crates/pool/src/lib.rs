//! Decode pool
//!
//! Runs one decode session per worker thread, each bound to an accelerator chosen by
//! the partition-aware assignment policy, and sums the per-worker throughput.

pub mod aggregate;
pub mod backend;
pub mod device;
pub mod preflight;
pub mod report;
pub mod runner;
pub mod session;
pub mod worker_pool;

pub use aggregate::{aggregate, collect_results, ThroughputSummary};
pub use backend::{
    CodecId, DecodeBackend, DecodeError, DecodeSession, Demuxer, GpuInfo, HostBackend, Packet,
    Rect, SessionConfig,
};
pub use decode_pool_config as config;
pub use decode_pool_config::Config;
pub use device::{
    assign_device, base_arch_name, derive_plan, detect_skew, device_assignments,
    AcceleratorTopology, DeviceError, DevicePlan, StaticTopology,
};
pub use preflight::{check_input_exists, run_preflight_checks, PreflightError};
pub use report::{collect_system_metrics, RunReport, SystemMetrics, WorkerReport};
pub use runner::{RunError, Runner};
pub use session::{run_session, SessionTiming, WorkerResult};
pub use worker_pool::{
    Job, JobFailure, PoolError, PoolLifecycle, WorkerId, WorkerOutcome, WorkerPool,
};
