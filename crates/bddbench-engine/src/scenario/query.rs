use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bddbench_client::{QueryClient, QueryKind, QuerySpec, ResultSize};
use bddbench_core::{aggregate, BenchResult, Sample, StopCondition, Target};
use serde_json::json;
use tracing::info;

use super::{BenchEnv, ScenarioOutcome};
use crate::context_store;
use crate::kpi::query_record;
use crate::pool::{WorkerOperation, WorkerPool};
use crate::report::ScenarioReport;

/// Where the queried data lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuerySource {
    Bucket { bucket: String, measurement: String },
    /// The buckets and measurement of an earlier write phase.
    Context { path: PathBuf, measurement: String },
}

/// Concurrent query load with one fixed query shape.
#[derive(Debug, Clone)]
pub struct QueryScenario {
    pub scenario_id: String,
    pub source: QuerySource,
    pub kind: QueryKind,
    pub time_range: Duration,
    pub size: ResultSize,
    pub workers: usize,
    pub stop: StopCondition,
}

/// Cycles through the target buckets, offset by worker.
struct QueryOperation {
    client: QueryClient,
    queries: Arc<Vec<QuerySpec>>,
    offset: usize,
}

#[async_trait]
impl WorkerOperation for QueryOperation {
    async fn execute(&mut self, sequence: u64) -> Sample {
        let index = (self.offset + sequence as usize) % self.queries.len();
        self.client.run(&self.queries[index]).await
    }
}

impl QueryScenario {
    /// # Errors
    ///
    /// Returns `BenchError::Context` when a context source is missing or
    /// describes another measurement, and `BenchError::Validation` for an
    /// empty pool.
    pub async fn run(&self, env: &BenchEnv) -> BenchResult<ScenarioOutcome> {
        let pool = WorkerPool::new(self.workers, self.stop)?;
        let (target, measurement, run_id) = match &self.source {
            QuerySource::Bucket {
                bucket,
                measurement,
            } => (Target::single(bucket.as_str()), measurement.clone(), None),
            QuerySource::Context { path, measurement } => {
                let context = context_store::load_expecting(path, measurement).await?;
                (context.target, context.measurement, Some(context.run_id))
            }
        };

        let queries: Arc<Vec<QuerySpec>> = Arc::new(
            target
                .buckets()
                .into_iter()
                .map(|bucket| QuerySpec {
                    bucket,
                    measurement: measurement.clone(),
                    time_range: self.time_range,
                    size: self.size,
                    kind: self.kind.clone(),
                })
                .collect(),
        );

        info!(
            scenario_id = %self.scenario_id,
            target = %target.identity(),
            query_type = %self.kind,
            workers = self.workers,
            "Starting query benchmark"
        );

        let client = QueryClient::new(Arc::clone(&env.api));
        let run = pool
            .run(|worker| QueryOperation {
                client: client.clone(),
                queries: Arc::clone(&queries),
                offset: worker,
            })
            .await?;
        let stats = aggregate(&run.samples, run.wall_clock);

        let mut dimensions = env
            .dimensions(&self.scenario_id, target.identity())
            .with("measurement", measurement.as_str())
            .with("query_type", self.kind.name())
            .with("result_size", self.size.as_str());
        if let Some(run_id) = run_id {
            dimensions = dimensions.with("run_id", run_id.to_string());
        }
        let record = query_record(&dimensions, &stats);
        let report = ScenarioReport::new(
            &self.scenario_id,
            &json!({
                "query": self.kind,
                "measurement": measurement,
                "time_range_secs": self.time_range.as_secs(),
                "result_size": self.size,
                "workers": self.workers,
                "stop": self.stop,
            }),
            &stats,
            run.samples.len(),
        )?
        .with_extra(json!({
            "target": target,
            "flux": queries.first().map(QuerySpec::to_flux),
            "first_error": run.samples.iter().find(|s| s.is_failure()).map(|s| &s.outcome),
        }));
        let published = env.reports.publish(&report, &record).await?;

        info!(
            total_runs = stats.count,
            errors = stats.error_count,
            rows_per_s = stats.throughput.rows_per_s,
            "Query benchmark finished"
        );

        Ok(ScenarioOutcome {
            run_id: run_id.unwrap_or(env.run_id),
            stats,
            record,
            published,
            context: None,
        })
    }
}
