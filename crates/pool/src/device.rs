//! Device assignment module for the decode pool runner
//!
//! Maps worker indices to accelerator ids, pairing workers across the two
//! partitions of multi-partition accelerators.

use crate::config::{AcceleratorConfig, Config};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for accelerator topology and assignment
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DeviceError {
    /// The topology query reported no accelerators
    #[error("No accelerators found")]
    NoDevices,

    /// The topology collaborator could not answer for a device
    #[error("Device {device} unavailable: {reason}")]
    Unavailable { device: i32, reason: String },

    /// An assigned or requested device id is not in `0..device_count`
    #[error("Device {device} is out of range (found {device_count} devices)")]
    OutOfRange { device: i32, device_count: u32 },
}

/// Accelerator property queries
pub trait AcceleratorTopology: Send + Sync {
    /// Number of visible accelerators
    fn device_count(&self) -> Result<u32, DeviceError>;

    /// Architecture name of `device_id`, possibly carrying a `:feature` suffix
    fn arch_name(&self, device_id: i32) -> Result<String, DeviceError>;
}

/// Topology answered from the `[accelerator]` config section
#[derive(Debug, Clone, PartialEq)]
pub struct StaticTopology {
    device_count: u32,
    arch_name: String,
}

impl StaticTopology {
    pub fn new(device_count: u32, arch_name: impl Into<String>) -> Self {
        Self {
            device_count,
            arch_name: arch_name.into(),
        }
    }

    /// An unset device count means the host itself is the only device
    pub fn from_config(cfg: &AcceleratorConfig) -> Self {
        Self::new(cfg.device_count.unwrap_or(1), cfg.arch_name.clone())
    }
}

impl AcceleratorTopology for StaticTopology {
    fn device_count(&self) -> Result<u32, DeviceError> {
        Ok(self.device_count)
    }

    fn arch_name(&self, device_id: i32) -> Result<String, DeviceError> {
        check_in_range(device_id, self.device_count)?;
        Ok(self.arch_name.clone())
    }
}

/// Strip the `:feature` suffix from an architecture name ("gfx90a:sramecc+" -> "gfx90a")
pub fn base_arch_name(raw: &str) -> &str {
    raw.split(':').next().unwrap_or(raw).trim()
}

/// Device for worker `worker_index` given the caller's base device and partition skew
///
/// Even bases keep even workers on the base and move odd workers to `base + skew`;
/// odd bases move even workers to `base - skew` and keep odd workers on the base.
/// With `skew == 0` every worker lands on `base_device`. The result is not range
/// checked.
pub fn assign_device(base_device: i32, worker_index: usize, skew: i32) -> i32 {
    let even_worker = worker_index % 2 == 0;
    if base_device % 2 == 0 {
        if even_worker {
            base_device
        } else {
            base_device + skew
        }
    } else if even_worker {
        base_device - skew
    } else {
        base_device
    }
}

/// One device id per worker, index i for worker i
pub fn device_assignments(base_device: i32, workers: usize, skew: i32) -> Vec<i32> {
    (0..workers)
        .map(|i| assign_device(base_device, i, skew))
        .collect()
}

/// Skew is 1 only for a known multi-partition architecture with more than one device
pub fn detect_skew(
    topology: &dyn AcceleratorTopology,
    base_device: i32,
    multi_partition_archs: &[String],
) -> Result<i32, DeviceError> {
    let device_count = topology.device_count()?;
    if device_count < 1 {
        return Err(DeviceError::NoDevices);
    }
    let arch = topology.arch_name(base_device)?;
    let arch = base_arch_name(&arch);
    let multi_partition = multi_partition_archs.iter().any(|a| a == arch);
    Ok(if multi_partition && device_count > 1 { 1 } else { 0 })
}

fn check_in_range(device: i32, device_count: u32) -> Result<(), DeviceError> {
    if device < 0 || device as u32 >= device_count {
        return Err(DeviceError::OutOfRange {
            device,
            device_count,
        });
    }
    Ok(())
}

/// Device layout for one run, derived before any worker starts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DevicePlan {
    /// Device the caller asked for
    pub base_device: i32,
    /// Visible accelerators
    pub device_count: u32,
    /// Architecture of the base device without feature suffix
    pub arch_name: String,
    /// Partition skew fed into the assignment policy (0 or 1)
    pub skew: i32,
    /// Device id for each worker index
    pub assignments: Vec<i32>,
}

impl DevicePlan {
    /// Query the topology once and compute every worker's device
    ///
    /// Fails when no device is visible, when the base device is not visible, or when
    /// the policy would send a worker to a device outside the visible range.
    pub fn derive(
        topology: &dyn AcceleratorTopology,
        base_device: i32,
        workers: usize,
        multi_partition_archs: &[String],
    ) -> Result<Self, DeviceError> {
        let device_count = topology.device_count()?;
        if device_count < 1 {
            return Err(DeviceError::NoDevices);
        }
        check_in_range(base_device, device_count)?;

        let raw_arch = topology.arch_name(base_device)?;
        let arch_name = base_arch_name(&raw_arch).to_string();
        let skew = detect_skew(topology, base_device, multi_partition_archs)?;

        let assignments = device_assignments(base_device, workers, skew);
        for &device in &assignments {
            check_in_range(device, device_count)?;
        }

        Ok(Self {
            base_device,
            device_count,
            arch_name,
            skew,
            assignments,
        })
    }
}

/// Derive a device plan from configuration
pub fn derive_plan(
    cfg: &Config,
    topology: &dyn AcceleratorTopology,
) -> Result<DevicePlan, DeviceError> {
    DevicePlan::derive(
        topology,
        cfg.device.base_device,
        cfg.pool.workers as usize,
        &cfg.accelerator.multi_partition_archs,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn partitioned() -> Vec<String> {
        vec!["gfx90a".to_string()]
    }

    #[test]
    fn test_assignment_pairs_with_skew() {
        assert_eq!(assign_device(0, 0, 1), 0);
        assert_eq!(assign_device(0, 1, 1), 1);
        assert_eq!(assign_device(1, 0, 1), 0);
        assert_eq!(assign_device(1, 1, 1), 1);
    }

    #[test]
    fn test_four_workers_base_zero_skew_one() {
        assert_eq!(device_assignments(0, 4, 1), vec![0, 1, 0, 1]);
    }

    #[test]
    fn test_odd_base_pairs_downward() {
        assert_eq!(device_assignments(3, 4, 1), vec![2, 3, 2, 3]);
    }

    #[test]
    fn test_base_arch_name_strips_features() {
        assert_eq!(base_arch_name("gfx90a:sramecc+:xnack-"), "gfx90a");
        assert_eq!(base_arch_name("gfx1100"), "gfx1100");
        assert_eq!(base_arch_name(""), "");
    }

    #[test]
    fn test_detect_skew_needs_partitioned_arch_and_two_devices() {
        let mi200 = StaticTopology::new(2, "gfx90a:sramecc+:xnack-");
        assert_eq!(detect_skew(&mi200, 0, &partitioned()), Ok(1));

        let single = StaticTopology::new(1, "gfx90a");
        assert_eq!(detect_skew(&single, 0, &partitioned()), Ok(0));

        let navi = StaticTopology::new(4, "gfx1100");
        assert_eq!(detect_skew(&navi, 0, &partitioned()), Ok(0));
    }

    #[test]
    fn test_detect_skew_without_devices() {
        let none = StaticTopology::new(0, "gfx90a");
        assert_eq!(detect_skew(&none, 0, &partitioned()), Err(DeviceError::NoDevices));
    }

    #[test]
    fn test_plan_for_partitioned_pair() {
        let topology = StaticTopology::new(2, "gfx90a:xnack-");
        let plan = DevicePlan::derive(&topology, 0, 4, &partitioned()).unwrap();
        assert_eq!(plan.arch_name, "gfx90a");
        assert_eq!(plan.skew, 1);
        assert_eq!(plan.assignments, vec![0, 1, 0, 1]);
    }

    #[test]
    fn test_plan_rejects_base_outside_topology() {
        let topology = StaticTopology::new(2, "gfx1100");
        let err = DevicePlan::derive(&topology, 5, 2, &partitioned()).unwrap_err();
        assert_eq!(
            err,
            DeviceError::OutOfRange {
                device: 5,
                device_count: 2
            }
        );
    }

    #[test]
    fn test_plan_rejects_partner_outside_topology() {
        // Odd base on the last device: partner base + 1 does not exist, base - 1 does
        let topology = StaticTopology::new(3, "gfx90a");
        let plan = DevicePlan::derive(&topology, 1, 2, &partitioned()).unwrap();
        assert_eq!(plan.assignments, vec![0, 1]);

        let plan = DevicePlan::derive(&topology, 2, 2, &partitioned());
        assert_eq!(
            plan,
            Err(DeviceError::OutOfRange {
                device: 3,
                device_count: 3
            })
        );
    }

    #[test]
    fn test_plan_with_no_devices() {
        let topology = StaticTopology::new(0, "unknown");
        assert_eq!(
            DevicePlan::derive(&topology, 0, 4, &partitioned()),
            Err(DeviceError::NoDevices)
        );
    }

    #[test]
    fn test_static_topology_defaults_to_one_device() {
        let topology = StaticTopology::from_config(&AcceleratorConfig::default());
        assert_eq!(topology.device_count(), Ok(1));
    }

    // Property: without skew every worker targets the base device
    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_no_skew_is_constant(base in 0i32..64, index in 0usize..256) {
            prop_assert_eq!(assign_device(base, index, 0), base);
        }

        // Property: with skew, each adjacent worker pair covers the even/odd partition pair
        #[test]
        fn prop_skew_alternates_within_partition_pair(base in 0i32..64, pair in 0usize..128) {
            let first = assign_device(base, pair * 2, 1);
            let second = assign_device(base, pair * 2 + 1, 1);
            let even_partition = base - base % 2;
            prop_assert_eq!(first, even_partition);
            prop_assert_eq!(second, even_partition + 1);
        }
    }
}
