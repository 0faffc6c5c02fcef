//! Benchmark execution for bddbench: the concurrent worker pool, multi-bucket
//! orchestration, run contexts, the cleanup ledger, KPI records, reports and
//! the scenarios built from them.

pub mod context_store;
pub mod kpi;
pub mod ledger;
pub mod orchestrator;
pub mod pool;
pub mod report;
pub mod scenario;

pub use kpi::{Dimensions, KpiRecord};
pub use ledger::{LedgerFile, RunLedger, WrittenData, MAIN, SUT};
pub use orchestrator::{MultiTargetRun, Orchestrator, TargetRun};
pub use pool::{PoolRun, WorkerOperation, WorkerPool};
pub use report::{KpiExport, Published, ReportWriter, ScenarioReport, KPI_FILE};
pub use scenario::{
    guard_target, probe_health, verify_deleted, BenchEnv, CleanupMode, CleanupScenario,
    CleanupSummary, DeleteMode, DeleteScenario, DeleteSummary, HealthProbe, MultiWriteScenario,
    ProbeKind, ProbeScenario, QueryScenario, QuerySource, ScenarioOutcome, UserScenario,
    WriteScenario,
};
