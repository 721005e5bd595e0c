//! Result aggregation
//!
//! Reduces per-worker results to run totals.

use crate::session::WorkerResult;
use crate::worker_pool::{PoolError, WorkerId, WorkerPool};
use serde::{Deserialize, Serialize};

/// Totals over all workers of a run
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ThroughputSummary {
    pub total_units: u64,
    /// Sum of per-worker rates
    ///
    /// Workers decode the same input concurrently, so the sum reads as aggregate
    /// throughput of the machine. It is not a weighted average and is only
    /// meaningful when workers run comparable workloads side by side.
    pub total_rate: f64,
}

/// Sum units and rates over every entry
pub fn aggregate(results: &[WorkerResult]) -> ThroughputSummary {
    results
        .iter()
        .fold(ThroughputSummary::default(), |acc, r| ThroughputSummary {
            total_units: acc.total_units + r.units_processed,
            total_rate: acc.total_rate + r.rate_per_second,
        })
}

/// Every worker's result in submission order, or the first failure
///
/// Aggregation does no recovery: a single failed worker fails the collection.
pub fn collect_results(
    pool: &WorkerPool<WorkerResult>,
) -> Result<Vec<(WorkerId, WorkerResult)>, PoolError> {
    pool.results()?
        .into_iter()
        .map(|(id, result)| result.map(|r| (id, r)))
        .collect()
}
