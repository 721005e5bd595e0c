//! Preflight checks module for the decode pool runner
//!
//! Verifies everything a run needs before any worker starts:
//! - The input file exists
//! - The configuration is usable
//! - At least one accelerator is visible and the device plan stays in range

use crate::config::{Config, ConfigError};
use crate::device::{derive_plan, AcceleratorTopology, DeviceError, DevicePlan};
use std::path::Path;
use thiserror::Error;

/// Error types for preflight checks
#[derive(Debug, Error)]
pub enum PreflightError {
    #[error("Input file doesn't exist: {0}")]
    InputMissing(String),

    #[error("Input path is not a file: {0}")]
    InputNotAFile(String),

    #[error("Configuration rejected: {0}")]
    Config(#[from] ConfigError),

    #[error("Device check failed: {0}")]
    Device(#[from] DeviceError),
}

/// Check that `input` names an existing regular file
pub fn check_input_exists(input: &Path) -> Result<(), PreflightError> {
    if !input.exists() {
        return Err(PreflightError::InputMissing(input.display().to_string()));
    }
    if !input.is_file() {
        return Err(PreflightError::InputNotAFile(input.display().to_string()));
    }
    Ok(())
}

/// Run all preflight checks in order and return the device plan
///
/// Checks are run in the following order:
/// 1. Input file exists
/// 2. Configuration validates
/// 3. Topology has devices and every assigned device is in range
pub fn run_preflight_checks(
    input: &Path,
    cfg: &Config,
    topology: &dyn AcceleratorTopology,
) -> Result<DevicePlan, PreflightError> {
    check_input_exists(input)?;
    cfg.validate()?;
    let plan = derive_plan(cfg, topology)?;
    Ok(plan)
}
