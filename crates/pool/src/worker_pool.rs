//! Worker pool module for the decode pool runner
//!
//! Runs each submitted job on its own OS thread, bounded by a slot gate sized to the
//! configured worker count, and exposes per-worker outcomes after a blocking join.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Error returned by a job's callable
pub type JobFailure = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error type for worker pool operations
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PoolError {
    /// Pool was created with an unusable worker count
    #[error("Invalid pool configuration: {0}")]
    InvalidConfig(String),

    /// The worker's job returned an error or panicked
    #[error("Worker {id} failed: {reason}")]
    WorkerFailed { id: WorkerId, reason: String },

    /// Results were requested before `join` returned
    #[error("Results are not available until the pool has been joined")]
    NotJoined,

    /// The identity was never handed out by this pool
    #[error("Unknown worker: {0}")]
    UnknownWorker(WorkerId),

    /// Submission after the pool finished its single run
    #[error("Pool has already been joined and accepts no further jobs")]
    AlreadyJoined,

    /// The OS refused to start a worker thread
    #[error("Failed to spawn worker thread: {0}")]
    Spawn(String),
}

/// Opaque handle identifying one submitted job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkerId(u64);

impl WorkerId {
    /// Raw numeric value, increasing in submission order
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// A unit of work: a callable bound to its positional arguments
pub struct Job<T> {
    task: Box<dyn FnOnce() -> Result<T, JobFailure> + Send + 'static>,
}

impl<T: Send + 'static> Job<T> {
    /// Wrap a closure that already captures its inputs
    pub fn new<F>(task: F) -> Self
    where
        F: FnOnce() -> Result<T, JobFailure> + Send + 'static,
    {
        Self {
            task: Box::new(task),
        }
    }

    /// Bind `func` to an argument tuple; the call happens on the worker thread
    pub fn with_args<A, F, E>(func: F, args: A) -> Self
    where
        A: Send + 'static,
        F: FnOnce(A) -> Result<T, E> + Send + 'static,
        E: Into<JobFailure>,
    {
        Self::new(move || func(args).map_err(Into::into))
    }

    fn run(self) -> Result<T, JobFailure> {
        (self.task)()
    }
}

impl<T> std::fmt::Debug for Job<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job").finish_non_exhaustive()
    }
}

/// Terminal outcome of one worker
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerOutcome<T> {
    Success(T),
    Failure(String),
}

impl<T> WorkerOutcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, WorkerOutcome::Success(_))
    }
}

/// Pool lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolLifecycle {
    /// No job submitted yet
    Created,
    /// At least one job submitted, not yet joined
    Running,
    /// Join returned; results are readable and submissions are refused
    Joined,
}

struct PoolState<T> {
    lifecycle: PoolLifecycle,
    next_id: u64,
    /// Every identity handed out, in submission order
    submitted: Vec<WorkerId>,
    /// Threads not yet picked up by a join
    pending: Vec<(WorkerId, JoinHandle<Result<T, String>>)>,
    /// Threads taken by a join but not yet transcribed
    in_flight: usize,
    results: BTreeMap<WorkerId, WorkerOutcome<T>>,
}

/// Counting gate limiting how many workers run at once
struct Slots {
    free: Mutex<usize>,
    released: Condvar,
}

impl Slots {
    fn new(count: usize) -> Self {
        Self {
            free: Mutex::new(count),
            released: Condvar::new(),
        }
    }

    fn acquire(self: &Arc<Self>) -> SlotPermit {
        let mut free = self.free.lock().unwrap_or_else(PoisonError::into_inner);
        while *free == 0 {
            free = self
                .released
                .wait(free)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *free -= 1;
        SlotPermit {
            slots: Arc::clone(self),
        }
    }

    fn available(&self) -> usize {
        *self.free.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Released on drop, including while a panicking job unwinds
struct SlotPermit {
    slots: Arc<Slots>,
}

impl Drop for SlotPermit {
    fn drop(&mut self) {
        let mut free = self
            .slots
            .free
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *free += 1;
        self.slots.released.notify_one();
    }
}

/// Fixed-size worker pool that runs a single batch of jobs to completion
///
/// Every `submit` starts a dedicated thread; at most `worker_count` of them execute
/// their job at the same time, the rest wait for a free slot. Results are keyed by
/// [`WorkerId`] and only readable once [`WorkerPool::join`] has returned.
pub struct WorkerPool<T> {
    worker_count: usize,
    slots: Arc<Slots>,
    state: Mutex<PoolState<T>>,
    transcribed: Condvar,
}

impl<T: Send + 'static> WorkerPool<T> {
    /// Create a pool for `worker_count` concurrent workers
    ///
    /// # Errors
    /// Returns `PoolError::InvalidConfig` when `worker_count` is zero.
    pub fn new(worker_count: usize) -> Result<Self, PoolError> {
        if worker_count == 0 {
            return Err(PoolError::InvalidConfig(
                "worker count must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            worker_count,
            slots: Arc::new(Slots::new(worker_count)),
            state: Mutex::new(PoolState {
                lifecycle: PoolLifecycle::Created,
                next_id: 1,
                submitted: Vec::with_capacity(worker_count),
                pending: Vec::with_capacity(worker_count),
                in_flight: 0,
                results: BTreeMap::new(),
            }),
            transcribed: Condvar::new(),
        })
    }

    /// Configured number of concurrent workers
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Number of slots not currently held by a running job
    pub fn available_slots(&self) -> usize {
        self.slots.available()
    }

    pub fn lifecycle(&self) -> PoolLifecycle {
        self.lock_state().lifecycle
    }

    /// Identities handed out so far, in submission order
    pub fn worker_ids(&self) -> Vec<WorkerId> {
        self.lock_state().submitted.clone()
    }

    /// Start a worker thread for `job` and return its identity
    ///
    /// Does not block on the job. Submitting more jobs than `worker_count` is allowed;
    /// the extra workers start once a running worker finishes.
    pub fn submit(&self, job: Job<T>) -> Result<WorkerId, PoolError> {
        let mut state = self.lock_state();
        if state.lifecycle == PoolLifecycle::Joined {
            return Err(PoolError::AlreadyJoined);
        }

        let id = WorkerId(state.next_id);
        if state.submitted.len() >= self.worker_count {
            warn!(
                worker = %id,
                worker_count = self.worker_count,
                "more jobs than workers submitted; job will wait for a free slot"
            );
        }

        let slots = Arc::clone(&self.slots);
        let handle = thread::Builder::new()
            .name(format!("decode-{}", id))
            .spawn(move || {
                let _permit = slots.acquire();
                debug!(worker = %id, "job started");
                job.run().map_err(|e| e.to_string())
            })
            .map_err(|e| PoolError::Spawn(e.to_string()))?;

        state.next_id += 1;
        state.submitted.push(id);
        state.pending.push((id, handle));
        state.lifecycle = PoolLifecycle::Running;
        Ok(id)
    }

    /// Block until every submitted worker has finished, then record their outcomes
    ///
    /// Calling it again after it has returned is a no-op.
    pub fn join(&self) {
        loop {
            let batch = {
                let mut state = self.lock_state();
                loop {
                    if !state.pending.is_empty() {
                        break;
                    }
                    if state.in_flight == 0 {
                        if state.lifecycle != PoolLifecycle::Joined {
                            info!(workers = state.submitted.len(), "all workers joined");
                        }
                        state.lifecycle = PoolLifecycle::Joined;
                        return;
                    }
                    state = self
                        .transcribed
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                let batch = std::mem::take(&mut state.pending);
                state.in_flight += batch.len();
                batch
            };

            let count = batch.len();
            let outcomes: Vec<(WorkerId, WorkerOutcome<T>)> = batch
                .into_iter()
                .map(|(id, handle)| {
                    let outcome = match handle.join() {
                        Ok(Ok(value)) => WorkerOutcome::Success(value),
                        Ok(Err(reason)) => WorkerOutcome::Failure(reason),
                        Err(payload) => WorkerOutcome::Failure(panic_message(payload.as_ref())),
                    };
                    if let WorkerOutcome::Failure(reason) = &outcome {
                        warn!(worker = %id, %reason, "worker failed");
                    }
                    (id, outcome)
                })
                .collect();

            {
                let mut state = self.lock_state();
                for (id, outcome) in outcomes {
                    state.results.entry(id).or_insert(outcome);
                }
                state.in_flight -= count;
            }
            self.transcribed.notify_all();
        }
    }

    /// Outcome recorded for `id`
    pub fn outcome(&self, id: WorkerId) -> Result<WorkerOutcome<T>, PoolError>
    where
        T: Clone,
    {
        let state = self.lock_state();
        if state.lifecycle != PoolLifecycle::Joined {
            return Err(PoolError::NotJoined);
        }
        state
            .results
            .get(&id)
            .cloned()
            .ok_or(PoolError::UnknownWorker(id))
    }

    /// Successful result for `id`
    ///
    /// # Errors
    /// - `NotJoined` before `join` has returned
    /// - `UnknownWorker` if `id` was not issued by this pool
    /// - `WorkerFailed` if the worker's job errored or panicked
    pub fn get_result(&self, id: WorkerId) -> Result<T, PoolError>
    where
        T: Clone,
    {
        match self.outcome(id)? {
            WorkerOutcome::Success(value) => Ok(value),
            WorkerOutcome::Failure(reason) => Err(PoolError::WorkerFailed { id, reason }),
        }
    }

    /// Every worker's result in submission order
    pub fn results(&self) -> Result<Vec<(WorkerId, Result<T, PoolError>)>, PoolError>
    where
        T: Clone,
    {
        if self.lifecycle() != PoolLifecycle::Joined {
            return Err(PoolError::NotJoined);
        }
        Ok(self
            .worker_ids()
            .into_iter()
            .map(|id| (id, self.get_result(id)))
            .collect())
    }

    fn lock_state(&self) -> MutexGuard<'_, PoolState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", msg)
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("panicked: {}", msg)
    } else {
        "panicked with a non-string payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    fn square(args: (u64,)) -> Result<u64, String> {
        Ok(args.0 * args.0)
    }

    #[test]
    fn test_zero_workers_is_invalid_config() {
        let result = WorkerPool::<u64>::new(0);
        assert!(matches!(result, Err(PoolError::InvalidConfig(_))));
    }

    #[test]
    fn test_new_pool_is_created_with_all_slots_free() {
        let pool = WorkerPool::<u64>::new(3).unwrap();
        assert_eq!(pool.lifecycle(), PoolLifecycle::Created);
        assert_eq!(pool.available_slots(), 3);
        assert_eq!(pool.worker_count(), 3);
        assert!(pool.worker_ids().is_empty());
    }

    #[test]
    fn test_job_receives_positional_args() {
        let pool = WorkerPool::new(2).unwrap();
        let id = pool.submit(Job::with_args(square, (7,))).unwrap();
        pool.join();
        assert_eq!(pool.get_result(id).unwrap(), 49);
    }

    #[test]
    fn test_get_result_before_join_is_not_joined() {
        let pool = WorkerPool::new(1).unwrap();
        let id = pool.submit(Job::with_args(square, (3,))).unwrap();
        assert_eq!(pool.get_result(id), Err(PoolError::NotJoined));
        pool.join();
        assert_eq!(pool.get_result(id), Ok(9));
    }

    #[test]
    fn test_unknown_worker_after_join() {
        let pool = WorkerPool::new(1).unwrap();
        pool.submit(Job::with_args(square, (2,))).unwrap();
        pool.join();

        let missing = WorkerId(999);
        assert_eq!(pool.get_result(missing), Err(PoolError::UnknownWorker(missing)));
    }

    #[test]
    fn test_failed_worker_is_isolated() {
        let pool = WorkerPool::new(4).unwrap();
        let mut ids = Vec::new();
        for i in 0..4u64 {
            let job = Job::with_args(
                |(n,): (u64,)| {
                    if n == 2 {
                        Err(format!("decode session {} lost its device", n))
                    } else {
                        Ok(n * 10)
                    }
                },
                (i,),
            );
            ids.push(pool.submit(job).unwrap());
        }
        pool.join();

        for (i, id) in ids.iter().enumerate() {
            let result = pool.get_result(*id);
            if i == 2 {
                match result {
                    Err(PoolError::WorkerFailed { id: failed, reason }) => {
                        assert_eq!(failed, *id);
                        assert!(reason.contains("lost its device"));
                    }
                    other => panic!("expected WorkerFailed, got {:?}", other),
                }
            } else {
                assert_eq!(result, Ok(i as u64 * 10));
            }
        }
    }

    #[test]
    fn test_panicking_worker_is_captured() {
        let pool = WorkerPool::new(2).unwrap();
        let ok = pool.submit(Job::with_args(square, (5,))).unwrap();
        let bad = pool
            .submit(Job::new(|| -> Result<u64, JobFailure> {
                panic!("demuxer exploded")
            }))
            .unwrap();
        pool.join();

        assert_eq!(pool.get_result(ok), Ok(25));
        match pool.get_result(bad) {
            Err(PoolError::WorkerFailed { reason, .. }) => {
                assert!(reason.contains("demuxer exploded"))
            }
            other => panic!("expected WorkerFailed, got {:?}", other),
        }
        // The panicking worker's slot was returned
        assert_eq!(pool.available_slots(), 2);
    }

    #[test]
    fn test_second_join_is_noop() {
        let runs = Arc::new(AtomicUsize::new(0));
        let pool = WorkerPool::new(2).unwrap();
        for _ in 0..2 {
            let runs = Arc::clone(&runs);
            pool.submit(Job::new(move || {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(1u64)
            }))
            .unwrap();
        }
        pool.join();
        let first = pool.results().unwrap();

        pool.join();
        let second = pool.results().unwrap();

        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(first, second);
        assert_eq!(second.len(), 2);
    }

    #[test]
    fn test_submit_after_join_is_refused() {
        let pool = WorkerPool::new(1).unwrap();
        pool.join();
        assert_eq!(pool.lifecycle(), PoolLifecycle::Joined);
        let result = pool.submit(Job::with_args(square, (1,)));
        assert_eq!(result, Err(PoolError::AlreadyJoined));
    }

    #[test]
    fn test_results_keep_submission_order_not_completion_order() {
        let pool = WorkerPool::new(3).unwrap();
        let delays = [60u64, 5, 30];
        let ids: Vec<WorkerId> = delays
            .iter()
            .map(|&ms| {
                pool.submit(Job::with_args(
                    |(ms,): (u64,)| -> Result<u64, String> {
                        thread::sleep(Duration::from_millis(ms));
                        Ok(ms)
                    },
                    (ms,),
                ))
                .unwrap()
            })
            .collect();
        pool.join();

        let results = pool.results().unwrap();
        let got_ids: Vec<WorkerId> = results.iter().map(|(id, _)| *id).collect();
        let got_values: Vec<u64> = results.into_iter().map(|(_, r)| r.unwrap()).collect();
        assert_eq!(got_ids, ids);
        assert_eq!(got_values, delays.to_vec());
    }

    #[test]
    fn test_oversubscription_is_bounded_by_worker_count() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let pool = WorkerPool::new(2).unwrap();

        for _ in 0..6 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            pool.submit(Job::new(move || {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(20));
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }))
            .unwrap();
        }
        pool.join();

        assert_eq!(pool.worker_ids().len(), 6);
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert!(pool.results().unwrap().iter().all(|(_, r)| r.is_ok()));
    }

    #[test]
    fn test_join_waits_for_slow_workers() {
        let pool = WorkerPool::new(2).unwrap();
        let start = Instant::now();
        for _ in 0..2 {
            pool.submit(Job::new(|| {
                thread::sleep(Duration::from_millis(50));
                Ok(())
            }))
            .unwrap();
        }
        pool.join();
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_concurrent_joins_both_wait() {
        let pool = Arc::new(WorkerPool::new(1).unwrap());
        let id = pool
            .submit(Job::new(|| {
                thread::sleep(Duration::from_millis(50));
                Ok(11u64)
            }))
            .unwrap();

        let other = Arc::clone(&pool);
        let joiner = thread::spawn(move || {
            other.join();
            other.get_result(id)
        });
        pool.join();

        assert_eq!(pool.get_result(id), Ok(11));
        assert_eq!(joiner.join().unwrap(), Ok(11));
    }

    // Property: for any positive worker count W, submitting W jobs and joining yields
    // exactly W results under W distinct identities, in submission order.
    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_every_submission_has_one_result(workers in 1usize..12) {
            let pool = WorkerPool::new(workers).unwrap();
            let ids: Vec<WorkerId> = (0..workers as u64)
                .map(|i| pool.submit(Job::with_args(square, (i,))).unwrap())
                .collect();
            pool.join();

            let results = pool.results().unwrap();
            prop_assert_eq!(results.len(), workers);

            let mut distinct = ids.clone();
            distinct.dedup();
            prop_assert_eq!(distinct.len(), workers);

            for (i, (id, result)) in results.into_iter().enumerate() {
                prop_assert_eq!(id, ids[i]);
                prop_assert_eq!(result, Ok((i as u64) * (i as u64)));
            }
        }
    }
}
