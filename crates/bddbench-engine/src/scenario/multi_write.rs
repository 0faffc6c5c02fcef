use std::path::PathBuf;
use std::sync::Arc;

use bddbench_client::WriteClient;
use bddbench_core::{
    BenchResult, BucketSet, RunContext, StopCondition, Target, WorkloadGenerator, WorkloadSpec,
};
use serde_json::json;
use tracing::info;

use super::write::{written_window, WriteOperation};
use super::{BenchEnv, ScenarioOutcome};
use crate::context_store;
use crate::kpi::write_record;
use crate::ledger::SUT;
use crate::orchestrator::Orchestrator;
use crate::report::ScenarioReport;

/// The same workload written into every bucket of a bucket set at once.
///
/// A count bound applies per bucket: each bucket receives the full batch
/// count of the workload.
#[derive(Debug, Clone)]
pub struct MultiWriteScenario {
    pub scenario_id: String,
    pub spec: WorkloadSpec,
    pub buckets: BucketSet,
    pub context_path: Option<PathBuf>,
}

impl MultiWriteScenario {
    pub fn new(scenario_id: impl Into<String>, spec: WorkloadSpec, buckets: BucketSet) -> Self {
        Self {
            scenario_id: scenario_id.into(),
            spec,
            buckets,
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
    /// Returns `BenchError::Provisioning` if any bucket cannot be created;
    /// no write is attempted then.
    pub async fn run(&self, env: &BenchEnv) -> BenchResult<ScenarioOutcome> {
        let spec = Arc::new(self.spec.clone());
        let orchestrator = Orchestrator::new(Arc::clone(&env.api));
        let names = orchestrator.provision(&self.buckets).await?;
        env.ledger
            .update(|ledger| {
                for name in &names {
                    ledger.record_bucket(SUT, name);
                }
            })
            .await?;

        let stop = match spec.stop() {
            StopCondition::Count { total } => StopCondition::Count {
                total: total.saturating_mul(names.len() as u64),
            },
            duration => duration,
        };
        let generator = WorkloadGenerator::starting_now(Arc::clone(&spec), env.run_id);

        info!(
            scenario_id = %self.scenario_id,
            run_id = %env.run_id,
            buckets = %self.buckets.prefix(),
            bucket_count = names.len(),
            workers = spec.workers(),
            "Starting multi-bucket write benchmark"
        );

        let run = orchestrator
            .run(&self.buckets, spec.workers(), stop, |bucket, worker| {
                WriteOperation::new(
                    WriteClient::new(Arc::clone(&env.api), bucket, &spec),
                    generator.for_worker(worker),
                )
            })
            .await?;
        let stats = run.stats();

        let target = Target::from(&self.buckets);
        let context = RunContext::new(env.run_id, spec.measurement(), target.clone())
            .with_window(written_window(&generator, &run.samples))
            .with_total_points(stats.written_points);
        let context_path = self
            .context_path
            .clone()
            .unwrap_or_else(|| context_store::default_path(env.reports.dir(), &self.scenario_id));
        context_store::save(&context, &context_path).await?;

        env.ledger
            .update(|ledger| {
                for name in &names {
                    ledger.record_write(SUT, name, spec.measurement(), env.run_id);
                }
            })
            .await?;

        let dimensions = env
            .dimensions(&self.scenario_id, target.identity())
            .with_workload(&spec)
            .with("run_id", env.run_id.to_string());
        let record = write_record(&dimensions, &stats, Some(names.len()));
        let per_bucket: Vec<_> = run
            .targets
            .iter()
            .map(|t| {
                json!({
                    "bucket": t.bucket,
                    "total_points": t.stats.total_points,
                    "errors_count": t.stats.error_count,
                    "wall_clock_secs": t.stats.wall_clock_secs,
                    "throughput_points_per_s": t.stats.throughput.points_per_s,
                })
            })
            .collect();
        let report = ScenarioReport::new(&self.scenario_id, spec.as_ref(), &stats, run.samples.len())?
            .with_extra(json!({
                "run_id": env.run_id,
                "target": target,
                "context_path": context_path,
                "per_bucket": per_bucket,
            }));
        let published = env.reports.publish(&report, &record).await?;

        info!(
            total_points = stats.total_points,
            errors = stats.error_count,
            points_per_s = stats.throughput.points_per_s,
            "Multi-bucket write benchmark finished"
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
