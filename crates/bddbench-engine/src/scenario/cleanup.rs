use std::sync::Arc;

use bddbench_client::{DeleteClient, DeletePredicate, DeleteRequest, InfluxApi};
use bddbench_core::generator::RUN_ID_TAG;
use bddbench_core::{BenchError, BenchResult, TimeWindow};
use serde::Serialize;
use tracing::{info, warn};

use crate::ledger::{LedgerFile, WrittenData, MAIN, SUT};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupMode {
    /// Delete the points each recorded run wrote, keep the buckets.
    DeleteData,
    /// Delete the recorded buckets themselves.
    DeleteBuckets,
}

/// Removes what earlier benchmark runs left on one target.
#[derive(Debug, Clone)]
pub struct CleanupScenario {
    /// Ledger key, e.g. `sut` or `main`.
    pub target: String,
    pub mode: CleanupMode,
    /// Restricts cleanup to these buckets; empty means everything recorded.
    pub buckets: Vec<String>,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupSummary {
    /// One line per delete that was (or would be) issued.
    pub planned: Vec<String>,
    pub deleted: usize,
    pub failed: usize,
}

impl CleanupScenario {
    pub fn new(target: impl Into<String>, mode: CleanupMode) -> Self {
        Self {
            target: target.into(),
            mode,
            buckets: Vec::new(),
            dry_run: true,
        }
    }

    #[must_use]
    pub fn buckets(mut self, buckets: Vec<String>) -> Self {
        self.buckets = buckets;
        self
    }

    #[must_use]
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    fn selected(&self, bucket: &str) -> bool {
        self.buckets.is_empty() || self.buckets.iter().any(|b| b == bucket)
    }

    /// Runs the cleanup against `api`. Successful deletes are removed from
    /// the ledger; failed ones stay for the next attempt.
    ///
    /// # Errors
    ///
    /// Returns ledger I/O errors. Individual delete failures are counted in
    /// the summary.
    pub async fn run(&self, api: &Arc<dyn InfluxApi>, ledger: &LedgerFile) -> BenchResult<CleanupSummary> {
        let current = ledger.read().await?;
        let summary = match self.mode {
            CleanupMode::DeleteData => {
                let writes: Vec<WrittenData> = current
                    .writes(&self.target)
                    .filter(|w| self.selected(&w.bucket))
                    .cloned()
                    .collect();
                self.delete_data(api, ledger, writes).await?
            }
            CleanupMode::DeleteBuckets => {
                let buckets: Vec<String> = if self.buckets.is_empty() {
                    current.buckets(&self.target).to_vec()
                } else {
                    self.buckets.clone()
                };
                self.delete_buckets(api, ledger, buckets).await?
            }
        };

        info!(
            target = %self.target,
            mode = ?self.mode,
            dry_run = self.dry_run,
            planned = summary.planned.len(),
            deleted = summary.deleted,
            failed = summary.failed,
            "Cleanup finished"
        );
        Ok(summary)
    }

    async fn delete_data(
        &self,
        api: &Arc<dyn InfluxApi>,
        ledger: &LedgerFile,
        writes: Vec<WrittenData>,
    ) -> BenchResult<CleanupSummary> {
        let mut summary = CleanupSummary::default();
        let client = DeleteClient::new(Arc::clone(api), self.dry_run);
        let window = TimeWindow::everything();
        let mut done = Vec::new();

        for entry in writes {
            let request = DeleteRequest {
                start: window.start,
                stop: window.stop,
                predicate: DeletePredicate::new()
                    .measurement(entry.measurement.as_str())
                    .tag(RUN_ID_TAG, entry.run_id.as_str())
                    .to_string(),
            };
            summary
                .planned
                .push(format!("delete {} from bucket {}", request.predicate, entry.bucket));
            let sample = client.delete(&entry.bucket, &request).await;
            if sample.is_success() {
                summary.deleted += 1;
                done.push(entry);
            } else if sample.is_failure() {
                warn!(bucket = %entry.bucket, run_id = %entry.run_id, outcome = ?sample.outcome, "Cleanup delete failed");
                summary.failed += 1;
            }
        }

        if !done.is_empty() {
            ledger
                .update(|l| {
                    for entry in &done {
                        l.forget_write(entry);
                    }
                })
                .await?;
        }
        Ok(summary)
    }

    async fn delete_buckets(
        &self,
        api: &Arc<dyn InfluxApi>,
        ledger: &LedgerFile,
        buckets: Vec<String>,
    ) -> BenchResult<CleanupSummary> {
        let mut summary = CleanupSummary::default();
        let mut done = Vec::new();

        for bucket in buckets {
            summary.planned.push(format!("delete bucket {bucket}"));
            if self.dry_run {
                info!(bucket = %bucket, "Dry run, bucket not deleted");
                continue;
            }
            match api.delete_bucket(&bucket).await {
                Ok(response) if response.is_success() || response.status == 404 => {
                    summary.deleted += 1;
                    done.push(bucket);
                }
                Ok(response) => {
                    warn!(bucket = %bucket, status = response.status, body = %response.body, "Bucket delete rejected");
                    summary.failed += 1;
                }
                Err(e) => {
                    warn!(bucket = %bucket, error = %e, "Bucket delete failed");
                    summary.failed += 1;
                }
            }
        }

        if !done.is_empty() {
            let target = self.target.as_str();
            ledger
                .update(|l| {
                    for bucket in &done {
                        l.forget_bucket(target, bucket);
                    }
                })
                .await?;
        }
        Ok(summary)
    }
}

/// Refuses cleanup of the results database unless explicitly allowed, and
/// of unknown targets always.
///
/// # Errors
///
/// Returns `BenchError::Validation`.
pub fn guard_target(target: &str, allow_main: bool) -> BenchResult<()> {
    if target != SUT && target != MAIN {
        return Err(BenchError::validation(format!(
            "unknown cleanup target `{target}` (expected `{SUT}` or `{MAIN}`)"
        )));
    }
    if target == MAIN && !allow_main {
        return Err(BenchError::validation(format!(
            "cleanup of target `{target}` must be explicitly allowed"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bddbench_client::{Endpoint, MockInfluxApi};
    use bddbench_core::RunId;
    use tempfile::TempDir;

    async fn seeded(dir: &TempDir) -> LedgerFile {
        let ledger = LedgerFile::new(dir.path().join("ledger.json"));
        ledger
            .update(|l| {
                l.record_bucket(SUT, "bench-0");
                l.record_bucket(SUT, "bench-1");
                l.record_write(SUT, "bench-0", "cpu", RunId::new());
            })
            .await
            .unwrap();
        ledger
    }

    #[tokio::test]
    async fn dry_run_only_plans() {
        let dir = TempDir::new().unwrap();
        let ledger = seeded(&dir).await;
        let mock = Arc::new(MockInfluxApi::new().with_buckets(["bench-0", "bench-1"]));
        let api: Arc<dyn InfluxApi> = mock.clone();

        let summary = CleanupScenario::new(SUT, CleanupMode::DeleteBuckets)
            .run(&api, &ledger)
            .await
            .unwrap();

        assert_eq!(summary.planned.len(), 2);
        assert_eq!(summary.deleted, 0);
        assert_eq!(mock.bucket_names().len(), 2);
        assert_eq!(ledger.read().await.unwrap().buckets(SUT).len(), 2);
    }

    #[tokio::test]
    async fn deleted_buckets_leave_the_ledger() {
        let dir = TempDir::new().unwrap();
        let ledger = seeded(&dir).await;
        let mock = Arc::new(MockInfluxApi::new().with_buckets(["bench-0"]));
        let api: Arc<dyn InfluxApi> = mock.clone();

        // bench-1 is already gone on the server: a 404 still clears it
        let summary = CleanupScenario::new(SUT, CleanupMode::DeleteBuckets)
            .dry_run(false)
            .run(&api, &ledger)
            .await
            .unwrap();

        assert_eq!(summary.deleted, 2);
        assert_eq!(summary.failed, 0);
        assert!(mock.bucket_names().is_empty());
        let after = ledger.read().await.unwrap();
        assert!(after.buckets(SUT).is_empty());
        assert_eq!(after.writes(SUT).count(), 0);
    }

    #[tokio::test]
    async fn data_cleanup_sends_run_scoped_deletes() {
        let dir = TempDir::new().unwrap();
        let ledger = seeded(&dir).await;
        let mock = Arc::new(MockInfluxApi::new().with_buckets(["bench-0", "bench-1"]));
        let api: Arc<dyn InfluxApi> = mock.clone();

        let summary = CleanupScenario::new(SUT, CleanupMode::DeleteData)
            .dry_run(false)
            .run(&api, &ledger)
            .await
            .unwrap();

        assert_eq!(summary.deleted, 1);
        assert_eq!(mock.calls_to(Endpoint::Delete), 1);
        let after = ledger.read().await.unwrap();
        assert_eq!(after.writes(SUT).count(), 0);
        assert_eq!(after.buckets(SUT).len(), 2);
    }

    #[test]
    fn other_targets_need_permission() {
        assert!(guard_target(SUT, false).is_ok());
        assert!(guard_target(MAIN, false).is_err());
        assert!(guard_target(MAIN, true).is_ok());
        assert!(guard_target("staging", true).is_err());
    }
}
