//! Benchmark scenarios: each one runs its phase against the system under
//! test, aggregates the samples and publishes a report plus a KPI record.

mod cleanup;
mod delete;
mod multi_write;
mod probe;
mod query;
mod users;
mod write;

use std::collections::BTreeMap;
use std::sync::Arc;

use bddbench_client::InfluxApi;
use bddbench_core::{AggregateStats, RunContext, RunId, Sample};

use crate::kpi::{Dimensions, KpiRecord};
use crate::ledger::LedgerFile;
use crate::report::{Published, ReportWriter};

pub use cleanup::{guard_target, CleanupMode, CleanupScenario, CleanupSummary};
pub use delete::{
    probe_health, verify_deleted, DeleteMode, DeleteScenario, DeleteSummary, HealthProbe,
    HEALTH_PROBES,
};
pub use multi_write::MultiWriteScenario;
pub use probe::{ProbeKind, ProbeScenario};
pub use query::{QueryScenario, QuerySource};
pub use users::UserScenario;
pub use write::{WriteOperation, WriteScenario};

/// Everything a scenario needs besides its own parameters.
#[derive(Clone)]
pub struct BenchEnv {
    pub api: Arc<dyn InfluxApi>,
    /// Identity of the system under test, used as the `target` tag of
    /// scenarios that do not address a bucket.
    pub target_url: String,
    pub reports: ReportWriter,
    pub ledger: LedgerFile,
    /// Generated once per invocation unless overridden.
    pub run_id: RunId,
}

impl BenchEnv {
    pub fn new(
        api: Arc<dyn InfluxApi>,
        target_url: impl Into<String>,
        reports: ReportWriter,
        ledger: LedgerFile,
    ) -> Self {
        Self {
            api,
            target_url: target_url.into(),
            reports,
            ledger,
            run_id: RunId::new(),
        }
    }

    #[must_use]
    pub fn with_run_id(mut self, run_id: RunId) -> Self {
        self.run_id = run_id;
        self
    }

    pub(crate) fn dimensions(&self, scenario_id: &str, target: impl Into<String>) -> Dimensions {
        Dimensions::new(scenario_id, self.reports.environment(), target)
    }
}

/// What a finished scenario produced.
#[derive(Debug, Clone)]
pub struct ScenarioOutcome {
    pub run_id: RunId,
    pub stats: AggregateStats,
    pub record: KpiRecord,
    pub published: Published,
    /// Set by write phases.
    pub context: Option<RunContext>,
}

/// Most frequent status class (`2xx`, `4xx`, ...) among executed samples;
/// `error` for calls without a response, `none` when nothing ran.
pub(crate) fn dominant_status_class(samples: &[Sample]) -> String {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for sample in samples.iter().filter(|s| !s.is_skipped()) {
        let class = match sample.status() {
            Some(status) => format!("{}xx", status / 100),
            None if sample.is_success() => "2xx".to_string(),
            None => "error".to_string(),
        };
        *counts.entry(class).or_default() += 1;
    }
    counts
        .into_iter()
        .max_by(|(a_class, a), (b_class, b)| a.cmp(b).then_with(|| b_class.cmp(a_class)))
        .map(|(class, _)| class)
        .unwrap_or_else(|| "none".to_string())
}
