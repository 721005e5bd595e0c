//! Run orchestration for the decode pool runner
//!
//! Ties preflight, device assignment, the worker pool and aggregation into one
//! blocking run over a single input.

use crate::aggregate::{aggregate, collect_results};
use crate::backend::{DecodeBackend, HostBackend, SessionConfig};
use crate::config::{Config, ConfigError};
use crate::device::{AcceleratorTopology, DeviceError, StaticTopology};
use crate::preflight::{run_preflight_checks, PreflightError};
use crate::report::{collect_system_metrics, RunReport, WorkerReport};
use crate::session::{run_session, WorkerResult};
use crate::worker_pool::{Job, PoolError, WorkerPool};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Error type for run operations
#[derive(Debug, Error)]
pub enum RunError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Preflight check failed
    #[error("Preflight check failed: {0}")]
    Preflight(#[from] PreflightError),

    /// Device topology error
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    /// Worker pool error, including a failed worker
    #[error("Worker pool error: {0}")]
    Pool(#[from] PoolError),
}

/// Runs one decode job per worker against a shared input
pub struct Runner {
    config: Config,
    backend: Arc<dyn DecodeBackend>,
    topology: Arc<dyn AcceleratorTopology>,
}

impl Runner {
    /// Create a runner with explicit collaborators
    pub fn new(
        config: Config,
        backend: Arc<dyn DecodeBackend>,
        topology: Arc<dyn AcceleratorTopology>,
    ) -> Result<Self, RunError> {
        config.validate()?;
        Ok(Self {
            config,
            backend,
            topology,
        })
    }

    /// Runner backed by the host backend and the configured static topology
    pub fn with_host_backend(config: Config) -> Result<Self, RunError> {
        let backend = Arc::new(HostBackend::from_config(&config));
        let topology = Arc::new(StaticTopology::from_config(&config.accelerator));
        Self::new(config, backend, topology)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Decode `input` once per worker and aggregate the results
    ///
    /// Blocks until every worker has finished. Fails as a whole if any worker failed.
    pub fn run(&self, input: &Path) -> Result<RunReport, RunError> {
        let plan = run_preflight_checks(input, &self.config, self.topology.as_ref())?;
        info!(
            workers = self.config.pool.workers,
            device_count = plan.device_count,
            arch = %plan.arch_name,
            skew = plan.skew,
            assignments = ?plan.assignments,
            "device plan ready"
        );

        let pool = WorkerPool::new(self.config.pool.workers as usize)?;
        let session_config = SessionConfig::from(&self.config.decoder);

        let mut submitted = Vec::with_capacity(plan.assignments.len());
        for &device in &plan.assignments {
            let backend = Arc::clone(&self.backend);
            let session_config = session_config.clone();
            let job = Job::with_args(
                move |(path, device): (PathBuf, i32)| {
                    run_session(backend.as_ref(), &path, device, &session_config)
                },
                (input.to_path_buf(), device),
            );
            let id = pool.submit(job)?;
            submitted.push((id, device));
        }

        info!("done with executing jobs, waiting to join");
        pool.join();
        info!("done with join threads");

        let results = collect_results(&pool)?;
        let summary = aggregate(&results.iter().map(|(_, r)| *r).collect::<Vec<WorkerResult>>());

        let workers = results
            .iter()
            .zip(submitted.iter())
            .map(|((id, result), (_, device))| WorkerReport {
                worker_id: id.as_u64(),
                device_id: *device,
                frames: result.units_processed,
                fps: result.rate_per_second,
            })
            .collect();

        Ok(RunReport::new(
            input,
            plan,
            workers,
            summary,
            collect_system_metrics(),
        ))
    }
}
