use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bddbench_client::WriteClient;
use bddbench_core::{
    aggregate, BatchGenerator, BenchResult, RunContext, Sample, Target, TimeWindow,
    WorkloadGenerator, WorkloadSpec,
};
use serde_json::json;
use tracing::info;

use super::{BenchEnv, ScenarioOutcome};
use crate::context_store;
use crate::kpi::write_record;
use crate::ledger::SUT;
use crate::pool::{WorkerOperation, WorkerPool};
use crate::report::ScenarioReport;

/// Generates batch `sequence` and writes it.
pub struct WriteOperation {
    client: WriteClient,
    generator: BatchGenerator,
}

impl WriteOperation {
    pub fn new(client: WriteClient, generator: BatchGenerator) -> Self {
        Self { client, generator }
    }
}

#[async_trait]
impl WorkerOperation for WriteOperation {
    async fn execute(&mut self, sequence: u64) -> Sample {
        let batch = self.generator.generate(sequence);
        self.client.write(&batch).await
    }
}

/// Timestamps a run could have written, derived from the highest batch index
/// any worker reached.
pub(super) fn written_window(generator: &WorkloadGenerator, samples: &[Sample]) -> TimeWindow {
    let spec = generator.spec();
    let batches = samples.iter().map(|s| s.sequence + 1).max().unwrap_or(0);
    let span = batches
        .saturating_mul(spec.batch_size() as u64)
        .saturating_mul(spec.workers() as u64);
    let span = i64::try_from(span).unwrap_or(i64::MAX);
    let first = generator.base_ts();
    let last = first.saturating_add(span.saturating_sub(1).max(0));
    TimeWindow::covering(first, last, spec.precision())
}

/// Count- or duration-bounded write into one bucket.
#[derive(Debug, Clone)]
pub struct WriteScenario {
    pub scenario_id: String,
    pub spec: WorkloadSpec,
    pub bucket: String,
    /// Defaults to `<report_dir>/<scenario_id>_context.json`.
    pub context_path: Option<PathBuf>,
}

impl WriteScenario {
    pub fn new(scenario_id: impl Into<String>, spec: WorkloadSpec, bucket: impl Into<String>) -> Self {
        Self {
            scenario_id: scenario_id.into(),
            spec,
            bucket: bucket.into(),
            context_path: None,
        }
    }

    #[must_use]
    pub fn with_context_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.context_path = Some(path.into());
        self
    }

    /// # Errors
    ///
    /// Returns `BenchError::Worker` if a worker panics, and any error from
    /// saving the context, the ledger or the report.
    pub async fn run(&self, env: &BenchEnv) -> BenchResult<ScenarioOutcome> {
        let spec = Arc::new(self.spec.clone());
        let generator = WorkloadGenerator::starting_now(Arc::clone(&spec), env.run_id);
        let client = WriteClient::new(Arc::clone(&env.api), self.bucket.as_str(), &spec);

        info!(
            scenario_id = %self.scenario_id,
            run_id = %env.run_id,
            bucket = %self.bucket,
            measurement = %spec.measurement(),
            workers = spec.workers(),
            batch_size = spec.batch_size(),
            "Starting write benchmark"
        );

        let run = WorkerPool::from_spec(&spec)
            .run(|worker| WriteOperation::new(client.clone(), generator.for_worker(worker)))
            .await?;
        let stats = aggregate(&run.samples, run.wall_clock);

        let context = RunContext::new(env.run_id, spec.measurement(), Target::single(self.bucket.as_str()))
            .with_window(written_window(&generator, &run.samples))
            .with_total_points(stats.written_points);
        let context_path = self
            .context_path
            .clone()
            .unwrap_or_else(|| context_store::default_path(env.reports.dir(), &self.scenario_id));
        context_store::save(&context, &context_path).await?;

        env.ledger
            .update(|ledger| {
                ledger.record_write(SUT, &self.bucket, spec.measurement(), env.run_id);
            })
            .await?;

        let dimensions = env
            .dimensions(&self.scenario_id, self.bucket.as_str())
            .with_workload(&spec)
            .with("run_id", env.run_id.to_string());
        let record = write_record(&dimensions, &stats, None);
        let report = ScenarioReport::new(&self.scenario_id, spec.as_ref(), &stats, run.samples.len())?
            .with_extra(json!({
                "run_id": env.run_id,
                "started_at": run.started_at,
                "bucket": self.bucket,
                "context_path": context_path,
                "base_ts": generator.base_ts(),
                "precision": spec.precision().as_str(),
            }));
        let published = env.reports.publish(&report, &record).await?;

        info!(
            total_points = stats.total_points,
            errors = stats.error_count,
            points_per_s = stats.throughput.points_per_s,
            "Write benchmark finished"
        );

        Ok(ScenarioOutcome {
            run_id: env.run_id,
            stats,
            record,
            published,
            context: Some(context),
        })
    }
}
