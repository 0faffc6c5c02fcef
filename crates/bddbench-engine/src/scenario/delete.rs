use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bddbench_client::{
    parse_range, DeleteClient, DeletePredicate, DeleteRequest, InfluxApi, PointFilter,
    ProbeClient,
};
use bddbench_core::generator::RUN_ID_TAG;
use bddbench_core::{aggregate, BenchError, BenchResult, RunContext, Sample, TimeWindow};
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use super::{dominant_status_class, BenchEnv, ScenarioOutcome};
use crate::context_store;
use crate::kpi::{KpiRecord, DELETE_MEASUREMENT};
use crate::report::ScenarioReport;

/// Requests per health probe round.
pub const HEALTH_PROBES: usize = 5;

/// What a delete phase removes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteMode {
    /// Exactly the points of the run recorded in a context file, in every
    /// bucket of its target.
    RunScoped {
        context_path: PathBuf,
        /// When set, the context must describe this measurement.
        measurement: Option<String>,
    },
    /// Everything in `[now - range, now]`, e.g. `range = "1h"`.
    Range {
        bucket: String,
        range: String,
        measurement: Option<String>,
        predicate: Option<String>,
        /// Health requests sent before and after the delete; zero disables.
        health_probes: usize,
    },
    /// The whole bucket, optionally one measurement only.
    WipeAll {
        bucket: String,
        measurement: Option<String>,
    },
}

impl DeleteMode {
    fn name(&self) -> &'static str {
        match self {
            Self::RunScoped { .. } => "run_scoped",
            Self::Range { .. } => "range",
            Self::WipeAll { .. } => "wipe_all",
        }
    }
}

/// Average latency and error count of one health probe round.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HealthProbe {
    /// Over successful requests; `None` if none succeeded.
    pub avg_ms: Option<f64>,
    pub errors: usize,
}

/// Sends `probes` sequential health requests.
pub async fn probe_health(api: &Arc<dyn InfluxApi>, probes: usize) -> HealthProbe {
    let client = ProbeClient::health(Arc::clone(api));
    let mut latencies = Vec::with_capacity(probes);
    let mut errors = 0;
    for _ in 0..probes {
        let sample = client.probe().await;
        if sample.is_success() {
            latencies.push(sample.duration.as_secs_f64() * 1_000.0);
        } else {
            errors += 1;
        }
    }
    let avg_ms = (!latencies.is_empty()).then(|| latencies.iter().sum::<f64>() / latencies.len() as f64);
    HealthProbe { avg_ms, errors }
}

/// Points of the context's run still present across its buckets.
///
/// # Errors
///
/// Returns `BenchError::Verification` when points remain or cannot be
/// counted.
pub async fn verify_deleted(api: &Arc<dyn InfluxApi>, context: &RunContext) -> BenchResult<u64> {
    let run_id = context.run_id.to_string();
    let mut remaining = 0;
    for bucket in context.target.buckets() {
        let filter = PointFilter {
            measurement: &context.measurement,
            run_id: Some(&run_id),
        };
        remaining += api.count_points(&bucket, filter).await.map_err(|e| {
            BenchError::Verification(format!("could not count points in `{bucket}`: {e}"))
        })?;
    }
    if remaining > 0 {
        return Err(BenchError::Verification(format!(
            "{remaining} points of run {run_id} remain in {}",
            context.target.identity()
        )));
    }
    Ok(remaining)
}

/// Measurements of one delete phase.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeleteSummary {
    pub mode: &'static str,
    pub dry_run: bool,
    pub buckets: Vec<String>,
    pub measurement: Option<String>,
    pub run_id: Option<String>,
    pub window: TimeWindow,
    pub predicate: String,
    /// Sum of the delete call durations; `None` on dry run.
    pub delete_duration: Option<Duration>,
    pub delete_errors: usize,
    pub status_class: String,
    pub points_before: Option<u64>,
    pub points_after: Option<u64>,
    pub health_before: Option<HealthProbe>,
    pub health_after: Option<HealthProbe>,
    #[serde(skip)]
    pub samples: Vec<Sample>,
}

impl DeleteSummary {
    pub fn deleted_points(&self) -> Option<u64> {
        Some(self.points_before?.saturating_sub(self.points_after?))
    }
}

struct Plan {
    buckets: Vec<String>,
    measurement: Option<String>,
    run_id: Option<String>,
    window: TimeWindow,
    predicate: DeletePredicate,
    health_probes: usize,
}

#[derive(Debug, Clone)]
pub struct DeleteScenario {
    pub scenario_id: String,
    pub mode: DeleteMode,
    /// Logs the requests instead of sending them.
    pub dry_run: bool,
}

impl DeleteScenario {
    pub fn new(scenario_id: impl Into<String>, mode: DeleteMode) -> Self {
        Self {
            scenario_id: scenario_id.into(),
            mode,
            dry_run: false,
        }
    }

    #[must_use]
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    async fn plan(&self) -> BenchResult<Plan> {
        match &self.mode {
            DeleteMode::RunScoped {
                context_path,
                measurement,
            } => {
                let context = match measurement {
                    Some(measurement) => context_store::load_expecting(context_path, measurement).await?,
                    None => context_store::load(context_path).await?,
                };
                let run_id = context.run_id.to_string();
                Ok(Plan {
                    buckets: context.target.buckets(),
                    predicate: DeletePredicate::new()
                        .measurement(context.measurement.as_str())
                        .tag(RUN_ID_TAG, run_id.as_str()),
                    measurement: Some(context.measurement),
                    run_id: Some(run_id),
                    window: context.window.unwrap_or_else(TimeWindow::everything),
                    health_probes: 0,
                })
            }
            DeleteMode::Range {
                bucket,
                range,
                measurement,
                predicate,
                health_probes,
            } => {
                let span = parse_range(range).map_err(BenchError::validation)?;
                let mut rendered = DeletePredicate::new();
                if let Some(measurement) = measurement {
                    rendered = rendered.measurement(measurement.as_str());
                }
                if let Some(predicate) = predicate {
                    rendered = rendered.raw(predicate.as_str());
                }
                Ok(Plan {
                    buckets: vec![bucket.clone()],
                    measurement: None,
                    run_id: None,
                    window: TimeWindow::trailing(span),
                    predicate: rendered,
                    health_probes: *health_probes,
                })
            }
            DeleteMode::WipeAll {
                bucket,
                measurement,
            } => {
                let predicate = match measurement {
                    Some(measurement) => DeletePredicate::new().measurement(measurement.as_str()),
                    None => DeletePredicate::new(),
                };
                Ok(Plan {
                    buckets: vec![bucket.clone()],
                    measurement: measurement.clone(),
                    run_id: None,
                    window: TimeWindow::everything(),
                    predicate,
                    health_probes: 0,
                })
            }
        }
    }

    async fn count(api: &Arc<dyn InfluxApi>, plan: &Plan) -> Option<u64> {
        let measurement = plan.measurement.as_deref()?;
        let mut total = 0;
        for bucket in &plan.buckets {
            let filter = PointFilter {
                measurement,
                run_id: plan.run_id.as_deref(),
            };
            match api.count_points(bucket, filter).await {
                Ok(count) => total += count,
                Err(e) => {
                    warn!(bucket = %bucket, error = %e, "Could not count points");
                    return None;
                }
            }
        }
        Some(total)
    }

    /// Runs the delete phase without publishing anything.
    ///
    /// # Errors
    ///
    /// Returns `BenchError::Context` when a run-scoped context is missing,
    /// invalid or describes another measurement, and
    /// `BenchError::Validation` for a malformed range.
    pub async fn execute(&self, api: &Arc<dyn InfluxApi>) -> BenchResult<DeleteSummary> {
        let plan = self.plan().await?;
        let request = DeleteRequest {
            start: plan.window.start,
            stop: plan.window.stop,
            predicate: plan.predicate.to_string(),
        };

        info!(
            mode = self.mode.name(),
            buckets = ?plan.buckets,
            start = %request.start.to_rfc3339(),
            stop = %request.stop.to_rfc3339(),
            predicate = %request.predicate,
            dry_run = self.dry_run,
            "Starting delete"
        );

        let health_before = if plan.health_probes > 0 {
            Some(probe_health(api, plan.health_probes).await)
        } else {
            None
        };
        let points_before = Self::count(api, &plan).await;

        let client = DeleteClient::new(Arc::clone(api), self.dry_run);
        let mut samples = Vec::with_capacity(plan.buckets.len());
        for bucket in &plan.buckets {
            let sample = client.delete(bucket, &request).await;
            if sample.is_failure() {
                warn!(bucket = %bucket, outcome = ?sample.outcome, "Delete failed");
            }
            samples.push(sample);
        }

        let points_after = if self.dry_run {
            points_before
        } else {
            Self::count(api, &plan).await
        };
        let health_after = if plan.health_probes > 0 && !self.dry_run {
            Some(probe_health(api, plan.health_probes).await)
        } else {
            None
        };

        let delete_duration = (!self.dry_run).then(|| samples.iter().map(|s| s.duration).sum::<Duration>());
        let summary = DeleteSummary {
            mode: self.mode.name(),
            dry_run: self.dry_run,
            buckets: plan.buckets,
            measurement: plan.measurement,
            run_id: plan.run_id,
            window: plan.window,
            predicate: request.predicate,
            delete_duration,
            delete_errors: samples.iter().filter(|s| s.is_failure()).count(),
            status_class: dominant_status_class(&samples),
            points_before,
            points_after,
            health_before,
            health_after,
            samples,
        };

        info!(
            deleted_points = ?summary.deleted_points(),
            errors = summary.delete_errors,
            duration_ms = ?summary.delete_duration.map(|d| d.as_millis()),
            "Delete finished"
        );
        Ok(summary)
    }

    /// Runs the delete phase and publishes its report and KPI record.
    ///
    /// # Errors
    ///
    /// See [`Self::execute`]; plus report errors.
    pub async fn run(&self, env: &BenchEnv) -> BenchResult<ScenarioOutcome> {
        let summary = self.execute(&env.api).await?;
        let stats = aggregate(
            &summary.samples,
            summary.delete_duration.unwrap_or_default(),
        );

        let target = match &summary.buckets[..] {
            [bucket] => bucket.clone(),
            buckets => buckets.join(","),
        };
        let mut dimensions = env
            .dimensions(&self.scenario_id, target)
            .with("delete_mode", summary.mode)
            .with("dry_run", summary.dry_run.to_string())
            .with("status_class", summary.status_class.as_str());
        if let Some(measurement) = &summary.measurement {
            dimensions = dimensions.with("measurement", measurement.as_str());
        }
        if let Some(run_id) = &summary.run_id {
            dimensions = dimensions.with("run_id", run_id.as_str());
        }
        if let DeleteMode::Range { range, .. } = &self.mode {
            dimensions = dimensions.with("delete_range", range.as_str());
        }

        let record = KpiRecord::new(DELETE_MEASUREMENT, &dimensions)
            .field_opt(
                "delete_duration_ms",
                summary.delete_duration.map(|d| d.as_secs_f64() * 1_000.0),
            )
            .field("delete_range_sec", summary.window.span_secs())
            .field("delete_error", summary.delete_errors)
            .field_opt("points_before", summary.points_before)
            .field_opt("points_after", summary.points_after)
            .field_opt("deleted_points", summary.deleted_points())
            .field_opt(
                "health_before_avg_ms",
                summary.health_before.and_then(|h| h.avg_ms),
            )
            .field_opt(
                "health_after_avg_ms",
                summary.health_after.and_then(|h| h.avg_ms),
            );
        let report = ScenarioReport::new(
            &self.scenario_id,
            &json!({ "mode": summary.mode, "dry_run": summary.dry_run }),
            &stats,
            summary.samples.len(),
        )?
        .with_extra(serde_json::to_value(&summary)?);
        let published = env.reports.publish(&report, &record).await?;

        let run_id = summary
            .run_id
            .as_deref()
            .and_then(|id| id.parse().ok())
            .unwrap_or(env.run_id);
        Ok(ScenarioOutcome {
            run_id,
            stats,
            record,
            published,
            context: None,
        })
    }
}
