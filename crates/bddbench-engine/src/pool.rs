//! Concurrent worker pool with count- or duration-bounded stop conditions

use std::time::{Duration, Instant};

use async_trait::async_trait;
use bddbench_core::{BenchError, BenchResult, Sample, StopCondition, WorkloadSpec};
use chrono::{DateTime, Utc};
use tokio::task::JoinSet;

/// One worker's operation. Each worker owns its own instance, so worker-local
/// state (generators, RNGs, id queues) needs no synchronization.
#[async_trait]
pub trait WorkerOperation: Send + 'static {
    /// Performs worker-local operation number `sequence`, starting at zero.
    ///
    /// Failures are reported as failed samples, never as errors.
    async fn execute(&mut self, sequence: u64) -> Sample;
}

/// Result of one pool run. Samples are grouped by worker, in worker order.
#[derive(Debug, Clone)]
pub struct PoolRun {
    pub samples: Vec<Sample>,
    pub started_at: DateTime<Utc>,
    /// Span from spawning the first worker until the last one joined.
    pub wall_clock: Duration,
    pub workers: usize,
}

#[derive(Debug, Clone, Copy)]
enum Budget {
    Operations(u64),
    Until(Instant),
}

impl Budget {
    fn exhausted(self, done: u64) -> bool {
        match self {
            Self::Operations(share) => done >= share,
            Self::Until(deadline) => Instant::now() >= deadline,
        }
    }
}

/// Runs `workers` independent loops until the stop condition holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerPool {
    workers: usize,
    stop: StopCondition,
}

impl WorkerPool {
    /// # Errors
    ///
    /// Returns `BenchError::Validation` for zero workers or an empty stop
    /// condition.
    pub fn new(workers: usize, stop: StopCondition) -> BenchResult<Self> {
        if workers == 0 {
            return Err(BenchError::validation("workers must be > 0"));
        }
        match stop {
            StopCondition::Count { total: 0 } => {
                Err(BenchError::validation("operation count must be > 0"))
            }
            StopCondition::Duration { duration } if duration.is_zero() => {
                Err(BenchError::validation("duration must be > 0"))
            }
            _ => Ok(Self { workers, stop }),
        }
    }

    /// Pool sized by a validated workload.
    #[must_use]
    pub fn from_spec(spec: &WorkloadSpec) -> Self {
        Self {
            workers: spec.workers(),
            stop: spec.stop(),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn stop(&self) -> StopCondition {
        self.stop
    }

    /// Splits `total` operations by ceiling division. Trailing workers are
    /// clipped so the shares sum to `total`; some may get zero.
    #[must_use]
    pub fn shares(total: u64, workers: usize) -> Vec<u64> {
        if workers == 0 {
            return Vec::new();
        }
        let per_worker = total.div_ceil(workers as u64);
        let mut remaining = total;
        (0..workers)
            .map(|_| {
                let share = per_worker.min(remaining);
                remaining -= share;
                share
            })
            .collect()
    }

    /// Spawns one task per worker, each with the operation `factory` builds
    /// for its index, and merges the sample buffers once all tasks joined.
    ///
    /// # Errors
    ///
    /// Returns `BenchError::Worker` if a worker task panics.
    pub async fn run<F, O>(&self, factory: F) -> BenchResult<PoolRun>
    where
        F: FnMut(usize) -> O,
        O: WorkerOperation,
    {
        let operations = (0..self.workers).map(factory).collect();
        self.run_operations(operations).await
    }

    /// [`WorkerPool::run`] with operations built up front, one per worker.
    ///
    /// # Errors
    ///
    /// Returns `BenchError::Validation` if the number of operations differs
    /// from the worker count, and `BenchError::Worker` if a worker panics.
    pub async fn run_operations<O>(&self, operations: Vec<O>) -> BenchResult<PoolRun>
    where
        O: WorkerOperation,
    {
        if operations.len() != self.workers {
            return Err(BenchError::validation(format!(
                "expected {} worker operations, got {}",
                self.workers,
                operations.len()
            )));
        }
        let started_at = Utc::now();
        let started = Instant::now();
        let budgets: Vec<Budget> = match self.stop {
            StopCondition::Count { total } => Self::shares(total, self.workers)
                .into_iter()
                .map(Budget::Operations)
                .collect(),
            StopCondition::Duration { duration } => {
                vec![Budget::Until(started + duration); self.workers]
            }
        };

        let mut join_set = JoinSet::new();
        for (worker_index, (budget, mut operation)) in
            budgets.into_iter().zip(operations).enumerate()
        {
            join_set.spawn(async move {
                let mut samples = Vec::new();
                let mut sequence = 0_u64;
                while !budget.exhausted(sequence) {
                    let sample = operation.execute(sequence).await;
                    samples.push(sample.at(worker_index, sequence));
                    sequence += 1;
                }
                tracing::debug!(worker = worker_index, operations = sequence, "Worker finished");
                (worker_index, samples)
            });
        }

        let mut buffers = Vec::with_capacity(self.workers);
        while let Some(joined) = join_set.join_next().await {
            let buffer = joined.map_err(|e| BenchError::Worker(e.to_string()))?;
            buffers.push(buffer);
        }
        let wall_clock = started.elapsed();

        buffers.sort_by_key(|(worker_index, _)| *worker_index);
        let samples: Vec<Sample> = buffers
            .into_iter()
            .flat_map(|(_, samples)| samples)
            .collect();

        tracing::info!(
            workers = self.workers,
            operations = samples.len(),
            failed = samples.iter().filter(|s| s.is_failure()).count(),
            wall_clock_ms = wall_clock.as_millis() as u64,
            "Worker pool finished"
        );

        Ok(PoolRun {
            samples,
            started_at,
            wall_clock,
            workers: self.workers,
        })
    }
}
