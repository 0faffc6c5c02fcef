//! Report artifacts: a JSON report per scenario, the `kpi.lp` line-protocol
//! log and the optional export of KPI points to a results database.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bddbench_client::InfluxApi;
use bddbench_core::compression::encode_body;
use bddbench_core::{BenchError, BenchResult, Compression, Precision, ReportConfig};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::kpi::KpiRecord;

/// File under the report directory that accumulates KPI lines.
pub const KPI_FILE: &str = "kpi.lp";

/// JSON report of one scenario run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioReport {
    pub scenario_id: String,
    pub spec: Value,
    pub stats: Value,
    pub samples_count: usize,
    pub generated_at: DateTime<Utc>,
    #[serde(default)]
    pub extra: Value,
}

impl ScenarioReport {
    /// # Errors
    ///
    /// Returns `BenchError::Serialization` if `spec` or `stats` cannot be
    /// represented as JSON.
    pub fn new<S, T>(
        scenario_id: impl Into<String>,
        spec: &S,
        stats: &T,
        samples_count: usize,
    ) -> BenchResult<Self>
    where
        S: Serialize + ?Sized,
        T: Serialize + ?Sized,
    {
        Ok(Self {
            scenario_id: scenario_id.into(),
            spec: serde_json::to_value(spec)?,
            stats: serde_json::to_value(stats)?,
            samples_count,
            generated_at: Utc::now(),
            extra: Value::Object(Default::default()),
        })
    }

    #[must_use]
    pub fn with_extra(mut self, extra: Value) -> Self {
        self.extra = extra;
        self
    }
}

/// Where KPI points are exported besides the local log.
#[derive(Clone)]
pub struct KpiExport {
    pub api: Arc<dyn InfluxApi>,
    pub bucket: String,
    /// Fail the run instead of warning when the export fails.
    pub strict: bool,
}

/// Paths and export outcome of one published run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub report_path: PathBuf,
    pub kpi_path: PathBuf,
    pub exported: bool,
}

#[derive(Clone)]
pub struct ReportWriter {
    dir: PathBuf,
    environment: String,
    export: Option<KpiExport>,
}

impl ReportWriter {
    pub fn new(dir: impl Into<PathBuf>, environment: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            environment: environment.into(),
            export: None,
        }
    }

    pub fn from_config(config: &ReportConfig) -> Self {
        Self::new(config.dir.clone(), config.environment.clone())
    }

    #[must_use]
    pub fn with_export(mut self, export: KpiExport) -> Self {
        self.export = Some(export);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn kpi_path(&self) -> PathBuf {
        self.dir.join(KPI_FILE)
    }

    /// Writes `<dir>/<scenario_id>_report.json`.
    ///
    /// # Errors
    ///
    /// Returns `BenchError::Io` or `BenchError::Serialization`.
    pub async fn write_report(&self, report: &ScenarioReport) -> BenchResult<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self
            .dir
            .join(format!("{}_report.json", file_stem(&report.scenario_id)));
        tokio::fs::write(&path, serde_json::to_vec_pretty(report)?).await?;
        Ok(path)
    }

    /// Appends one line to `kpi.lp`.
    ///
    /// # Errors
    ///
    /// Returns `BenchError::Io`.
    pub async fn append_kpi(&self, record: &KpiRecord) -> BenchResult<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.kpi_path();
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        let mut line = record.to_line_protocol();
        line.push('\n');
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(path)
    }

    /// Sends the record to the results database, if one is configured.
    /// Returns whether the record was exported.
    ///
    /// # Errors
    ///
    /// Returns `BenchError::Report` when the export fails under a strict
    /// policy. Lenient failures are logged and reported as `Ok(false)`.
    pub async fn export(&self, record: &KpiRecord) -> BenchResult<bool> {
        let Some(export) = &self.export else {
            return Ok(false);
        };
        let failure = match encode_body(&record.to_line_protocol(), Compression::None) {
            Err(e) => format!("failed to encode KPI record: {e}"),
            Ok(body) => match export.api.write(&export.bucket, Precision::Ns, body).await {
                Ok(response) if response.is_success() => {
                    info!(
                        bucket = %export.bucket,
                        measurement = %record.measurement,
                        "Exported KPI record"
                    );
                    return Ok(true);
                }
                Ok(response) => format!("status {}: {}", response.status, response.body),
                Err(e) => e.to_string(),
            },
        };

        if export.strict {
            return Err(BenchError::report(format!(
                "KPI export to `{}` failed: {failure}",
                export.bucket
            )));
        }
        warn!(bucket = %export.bucket, error = %failure, "KPI export failed");
        Ok(false)
    }

    /// Writes the report, appends the KPI line and exports it.
    ///
    /// # Errors
    ///
    /// Any error of [`Self::write_report`], [`Self::append_kpi`] or
    /// [`Self::export`].
    pub async fn publish(&self, report: &ScenarioReport, record: &KpiRecord) -> BenchResult<Published> {
        let report_path = self.write_report(report).await?;
        let kpi_path = self.append_kpi(record).await?;
        let exported = self.export(record).await?;
        info!(
            scenario_id = %report.scenario_id,
            report = %report_path.display(),
            kpi = %record.measurement,
            "Published benchmark results"
        );
        Ok(Published {
            report_path,
            kpi_path,
            exported,
        })
    }
}

fn file_stem(scenario_id: &str) -> String {
    scenario_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kpi::{Dimensions, HEALTH_MEASUREMENT};
    use bddbench_client::{Endpoint, MockFailure, MockInfluxApi};
    use serde_json::json;
    use tempfile::TempDir;

    fn record() -> KpiRecord {
        KpiRecord::new(HEALTH_MEASUREMENT, &Dimensions::new("smoke", "ci", "db"))
            .field("total_requests", 5_u64)
    }

    #[tokio::test]
    async fn publish_writes_report_and_appends_kpi_lines() {
        let dir = TempDir::new().unwrap();
        let writer = ReportWriter::new(dir.path(), "ci");
        let report = ScenarioReport::new("smoke/health 1", &json!({"probes": 5}), &json!({}), 5)
            .unwrap()
            .with_extra(json!({"note": "x"}));

        let first = writer.publish(&report, &record()).await.unwrap();
        writer.publish(&report, &record()).await.unwrap();

        assert!(!first.exported);
        assert_eq!(
            first.report_path.file_name().unwrap(),
            "smoke_health_1_report.json"
        );
        let saved: ScenarioReport =
            serde_json::from_slice(&std::fs::read(&first.report_path).unwrap()).unwrap();
        assert_eq!(saved.samples_count, 5);
        assert_eq!(saved.extra["note"], "x");

        let kpi = std::fs::read_to_string(first.kpi_path).unwrap();
        assert_eq!(kpi.lines().count(), 2);
        assert!(kpi.lines().all(|l| l.starts_with("bddbench_health_result,")));
    }

    #[tokio::test]
    async fn export_writes_to_results_bucket() {
        let dir = TempDir::new().unwrap();
        let main = Arc::new(MockInfluxApi::new().with_buckets(["results"]));
        let writer = ReportWriter::new(dir.path(), "ci").with_export(KpiExport {
            api: main.clone(),
            bucket: "results".to_string(),
            strict: true,
        });

        assert!(writer.export(&record()).await.unwrap());
        let stored = main.points("results");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].measurement, HEALTH_MEASUREMENT);
    }

    #[tokio::test]
    async fn lenient_export_failure_is_only_a_warning() {
        let dir = TempDir::new().unwrap();
        let main = Arc::new(MockInfluxApi::new());
        main.deny(Endpoint::Write);
        let writer = ReportWriter::new(dir.path(), "ci").with_export(KpiExport {
            api: main,
            bucket: "results".to_string(),
            strict: false,
        });
        assert!(!writer.export(&record()).await.unwrap());
    }

    #[tokio::test]
    async fn strict_export_failure_fails_the_run() {
        let dir = TempDir::new().unwrap();
        let main = Arc::new(MockInfluxApi::new_with_failures(vec![MockFailure::Transport(
            "connection refused",
        )]));
        let writer = ReportWriter::new(dir.path(), "ci").with_export(KpiExport {
            api: main,
            bucket: "results".to_string(),
            strict: true,
        });
        let err = writer.export(&record()).await.unwrap_err();
        assert!(matches!(err, BenchError::Report(_)));
    }
}
