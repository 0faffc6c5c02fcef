//! Multi-target orchestration: provision a bucket set, then run one worker
//! pool per bucket concurrently.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bddbench_client::InfluxApi;
use bddbench_core::{
    aggregate, AggregateStats, BenchError, BenchResult, BucketSet, Sample, StopCondition,
};
use futures::future::try_join_all;
use tracing::{info, warn};

use crate::pool::{PoolRun, WorkerOperation, WorkerPool};

/// Outcome of the pool that ran against one bucket.
#[derive(Debug, Clone)]
pub struct TargetRun {
    pub bucket: String,
    pub run: PoolRun,
    pub stats: AggregateStats,
}

/// Per-target results plus the merged view across all targets.
#[derive(Debug, Clone)]
pub struct MultiTargetRun {
    pub targets: Vec<TargetRun>,
    /// All samples, in target order.
    pub samples: Vec<Sample>,
    /// Span covering every target pool.
    pub wall_clock: Duration,
}

impl MultiTargetRun {
    /// Statistics over the merged samples.
    #[must_use]
    pub fn stats(&self) -> AggregateStats {
        aggregate(&self.samples, self.wall_clock)
    }
}

pub struct Orchestrator {
    api: Arc<dyn InfluxApi>,
}

impl Orchestrator {
    pub fn new(api: Arc<dyn InfluxApi>) -> Self {
        Self { api }
    }

    /// Creates every bucket of `set`. A bucket that already exists counts as
    /// provisioned.
    ///
    /// # Errors
    ///
    /// Returns `BenchError::Provisioning` for the first bucket that answers
    /// anything but 201/409, or cannot be reached.
    pub async fn provision(&self, set: &BucketSet) -> BenchResult<Vec<String>> {
        let names = set.names();
        for name in &names {
            match self.api.create_bucket(name).await {
                Ok(response) if response.status == 201 => {
                    info!(bucket = %name, "Created bucket");
                }
                Ok(response) if response.status == 409 => {
                    info!(bucket = %name, "Bucket already exists");
                }
                Ok(response) => {
                    warn!(bucket = %name, status = response.status, "Bucket provisioning rejected");
                    return Err(BenchError::provisioning(
                        name.as_str(),
                        format!("status {}: {}", response.status, response.body),
                    ));
                }
                Err(e) => {
                    warn!(bucket = %name, error = %e, "Bucket provisioning failed");
                    return Err(BenchError::provisioning(name.as_str(), e.to_string()));
                }
            }
        }
        Ok(names)
    }

    /// Runs `workers` workers against every bucket of `set` at once. A count
    /// bound is divided evenly across the buckets; a duration bound applies
    /// to each bucket as is.
    ///
    /// `factory(bucket, worker_index)` builds each worker's operation.
    ///
    /// # Errors
    ///
    /// Returns `BenchError::Validation` when a count bound is smaller than
    /// the bucket count, and any error of [`WorkerPool::run`].
    pub async fn run<F, O>(
        &self,
        set: &BucketSet,
        workers: usize,
        stop: StopCondition,
        mut factory: F,
    ) -> BenchResult<MultiTargetRun>
    where
        F: FnMut(&str, usize) -> O,
        O: WorkerOperation,
    {
        let names = set.names();
        let stops: Vec<StopCondition> = match stop {
            StopCondition::Count { total } => even_shares(total, names.len())?
                .into_iter()
                .map(|total| StopCondition::Count { total })
                .collect(),
            StopCondition::Duration { .. } => vec![stop; names.len()],
        };

        let mut pools = Vec::with_capacity(names.len());
        for (bucket, stop) in names.iter().zip(stops) {
            let pool = WorkerPool::new(workers, stop)?;
            let operations: Vec<O> = (0..workers).map(|w| factory(bucket, w)).collect();
            pools.push((bucket.clone(), pool, operations));
        }

        info!(
            buckets = names.len(),
            workers_per_bucket = workers,
            total_workers = names.len() * workers,
            "Starting multi-target run"
        );

        let started = Instant::now();
        let runs = try_join_all(pools.into_iter().map(|(bucket, pool, operations)| async move {
            let run = pool.run_operations(operations).await?;
            Ok::<_, BenchError>((bucket, run))
        }))
        .await?;
        let wall_clock = started.elapsed();

        let mut samples = Vec::new();
        let targets = runs
            .into_iter()
            .map(|(bucket, run)| {
                samples.extend(run.samples.iter().cloned());
                let stats = aggregate(&run.samples, run.wall_clock);
                TargetRun { bucket, run, stats }
            })
            .collect();

        Ok(MultiTargetRun {
            targets,
            samples,
            wall_clock,
        })
    }
}

/// Splits `total` so shares differ by at most one; leading targets take the
/// remainder.
fn even_shares(total: u64, targets: usize) -> BenchResult<Vec<u64>> {
    let targets = targets as u64;
    if total < targets {
        return Err(BenchError::validation(format!(
            "operation count {total} is smaller than the bucket count {targets}"
        )));
    }
    let base = total / targets;
    let remainder = total % targets;
    Ok((0..targets).map(|i| base + u64::from(i < remainder)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bddbench_client::{MockFailure, MockInfluxApi};
    use bddbench_core::OperationKind;

    struct Tagged(String);

    #[async_trait]
    impl WorkerOperation for Tagged {
        async fn execute(&mut self, _sequence: u64) -> Sample {
            Sample::success(OperationKind::Write, Duration::from_micros(5))
                .with_target(self.0.as_str())
                .with_points(10)
        }
    }

    #[tokio::test]
    async fn provisions_new_and_existing_buckets() {
        let mock = Arc::new(MockInfluxApi::new().with_buckets(["multi_1"]));
        let orchestrator = Orchestrator::new(mock.clone());
        let set = BucketSet::new("multi", 3).unwrap();

        let names = orchestrator.provision(&set).await.unwrap();
        assert_eq!(names, vec!["multi_0", "multi_1", "multi_2"]);
        let mut created = mock.bucket_names();
        created.sort();
        assert_eq!(created, names);
    }

    #[tokio::test]
    async fn provisioning_failure_names_the_bucket() {
        let mock = Arc::new(MockInfluxApi::new());
        mock.reject_bucket("multi_1", 500);
        let orchestrator = Orchestrator::new(mock.clone());

        let err = orchestrator
            .provision(&BucketSet::new("multi", 3).unwrap())
            .await
            .unwrap_err();
        match err {
            BenchError::Provisioning { bucket, .. } => assert_eq!(bucket, "multi_1"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn unreachable_target_is_a_provisioning_error() {
        let mock = Arc::new(MockInfluxApi::new_with_failures(vec![MockFailure::Transport(
            "connection refused",
        )]));
        let err = Orchestrator::new(mock)
            .provision(&BucketSet::new("multi", 1).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, BenchError::Provisioning { .. }));
    }

    #[tokio::test]
    async fn count_bound_is_split_per_target() {
        let orchestrator = Orchestrator::new(Arc::new(MockInfluxApi::new()));
        let set = BucketSet::new("multi", 3).unwrap();

        let run = orchestrator
            .run(&set, 2, StopCondition::Count { total: 30 }, |bucket, _| {
                Tagged(bucket.to_string())
            })
            .await
            .unwrap();

        assert_eq!(run.targets.len(), 3);
        for target in &run.targets {
            assert_eq!(target.stats.count, 10);
            assert!(target
                .run
                .samples
                .iter()
                .all(|s| s.target.as_deref() == Some(target.bucket.as_str())));
        }
        let merged = run.stats();
        assert_eq!(merged.count, 30);
        assert_eq!(
            merged.written_points,
            run.targets.iter().map(|t| t.stats.written_points).sum::<u64>()
        );
    }

    #[test]
    fn shares_are_even_and_sum_to_the_total() {
        assert_eq!(even_shares(4, 3).unwrap(), vec![2, 1, 1]);
        assert_eq!(even_shares(30, 3).unwrap(), vec![10, 10, 10]);
        assert_eq!(even_shares(3, 3).unwrap(), vec![1, 1, 1]);
    }

    #[tokio::test]
    async fn count_below_bucket_count_is_rejected_before_running() {
        let orchestrator = Orchestrator::new(Arc::new(MockInfluxApi::new()));
        let set = BucketSet::new("multi", 3).unwrap();

        let err = orchestrator
            .run(&set, 1, StopCondition::Count { total: 2 }, |bucket, _| {
                Tagged(bucket.to_string())
            })
            .await
            .unwrap_err();
        match err {
            BenchError::Validation(message) => assert!(message.contains("bucket count 3")),
            other => panic!("unexpected error: {other}"),
        }
    }
}
