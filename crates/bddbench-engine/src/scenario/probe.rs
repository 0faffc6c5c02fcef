use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use bddbench_client::ProbeClient;
use bddbench_core::{aggregate, BenchError, BenchResult, Sample, StopCondition};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use super::{dominant_status_class, BenchEnv, ScenarioOutcome};
use crate::kpi::{health_record, me_record};
use crate::pool::{WorkerOperation, WorkerPool};
use crate::report::ScenarioReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeKind {
    /// `GET /health`
    Health,
    /// `GET /api/v2/me`
    Me,
}

impl ProbeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Health => "health",
            Self::Me => "me",
        }
    }
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProbeKind {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "health" => Ok(Self::Health),
            "me" => Ok(Self::Me),
            other => Err(BenchError::validation(format!("unknown probe `{other}`"))),
        }
    }
}

struct ProbeOperation(ProbeClient);

#[async_trait]
impl WorkerOperation for ProbeOperation {
    async fn execute(&mut self, _sequence: u64) -> Sample {
        self.0.probe().await
    }
}

/// Repeated health or identity requests from a pool of workers.
#[derive(Debug, Clone)]
pub struct ProbeScenario {
    pub scenario_id: String,
    pub kind: ProbeKind,
    pub workers: usize,
    pub stop: StopCondition,
}

impl ProbeScenario {
    pub fn new(
        scenario_id: impl Into<String>,
        kind: ProbeKind,
        workers: usize,
        stop: StopCondition,
    ) -> Self {
        Self {
            scenario_id: scenario_id.into(),
            kind,
            workers,
            stop,
        }
    }

    /// # Errors
    ///
    /// Returns `BenchError::Validation` for an empty pool. Failed requests
    /// only show up in the statistics.
    pub async fn run(&self, env: &BenchEnv) -> BenchResult<ScenarioOutcome> {
        let pool = WorkerPool::new(self.workers, self.stop)?;
        let client = match self.kind {
            ProbeKind::Health => ProbeClient::health(Arc::clone(&env.api)),
            ProbeKind::Me => ProbeClient::me(Arc::clone(&env.api)),
        };

        info!(
            scenario_id = %self.scenario_id,
            probe = %self.kind,
            workers = self.workers,
            "Starting probe benchmark"
        );

        let run = pool.run(|_| ProbeOperation(client.clone())).await?;
        let stats = aggregate(&run.samples, run.wall_clock);

        let dimensions = env
            .dimensions(&self.scenario_id, env.target_url.as_str())
            .with("status_class", dominant_status_class(&run.samples));
        let record = match self.kind {
            ProbeKind::Health => health_record(&dimensions, &stats),
            ProbeKind::Me => me_record(&dimensions, &stats),
        };
        let report = ScenarioReport::new(
            &self.scenario_id,
            &json!({
                "probe": self.kind,
                "workers": self.workers,
                "stop": self.stop,
            }),
            &stats,
            run.samples.len(),
        )?;
        let published = env.reports.publish(&report, &record).await?;

        info!(
            total = stats.count,
            errors = stats.error_count,
            ops_per_s = stats.throughput.ops_per_s,
            "Probe benchmark finished"
        );

        Ok(ScenarioOutcome {
            run_id: env.run_id,
            stats,
            record,
            published,
            context: None,
        })
    }
}
