//! Run ledger: what the benchmarks created or wrote on each target, so that
//! cleanup can find it later.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use bddbench_core::{BenchError, BenchResult, RunId};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

/// Ledger key of the system under test.
pub const SUT: &str = "sut";
/// Ledger key of the results database.
pub const MAIN: &str = "main";

/// Data one run wrote into one bucket.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WrittenData {
    pub target: String,
    pub bucket: String,
    pub measurement: String,
    pub run_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunLedger {
    /// Bucket names per target (`sut`, `main`).
    #[serde(default)]
    pub created_buckets: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub written_data: Vec<WrittenData>,
}

impl RunLedger {
    /// Loads the ledger, or an empty one if the file does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns `BenchError::Io` or `BenchError::Serialization` for an
    /// unreadable or corrupt file.
    pub async fn load(path: impl AsRef<Path>) -> BenchResult<Self> {
        match tokio::fs::read(path.as_ref()).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// # Errors
    ///
    /// Returns `BenchError::Io` or `BenchError::Serialization`.
    pub async fn save(&self, path: impl AsRef<Path>) -> BenchResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let temp = sibling(path, &format!("{}.tmp", Uuid::new_v4().simple()));
        tokio::fs::write(&temp, serde_json::to_vec_pretty(self)?).await?;
        if let Err(e) = tokio::fs::rename(&temp, path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(e.into());
        }
        Ok(())
    }

    /// Returns `true` if the bucket was not recorded yet.
    pub fn record_bucket(&mut self, target: &str, bucket: &str) -> bool {
        let buckets = self.created_buckets.entry(target.to_string()).or_default();
        if buckets.iter().any(|b| b == bucket) {
            return false;
        }
        buckets.push(bucket.to_string());
        true
    }

    /// Returns `true` if the entry was not recorded yet.
    pub fn record_write(&mut self, target: &str, bucket: &str, measurement: &str, run_id: RunId) -> bool {
        let entry = WrittenData {
            target: target.to_string(),
            bucket: bucket.to_string(),
            measurement: measurement.to_string(),
            run_id: run_id.to_string(),
        };
        if self.written_data.contains(&entry) {
            return false;
        }
        self.written_data.push(entry);
        true
    }

    pub fn buckets(&self, target: &str) -> &[String] {
        self.created_buckets
            .get(target)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn writes(&self, target: &str) -> impl Iterator<Item = &WrittenData> {
        let target = target.to_string();
        self.written_data.iter().filter(move |w| w.target == target)
    }

    /// Drops everything recorded for `bucket` on `target`.
    pub fn forget_bucket(&mut self, target: &str, bucket: &str) {
        if let Some(buckets) = self.created_buckets.get_mut(target) {
            buckets.retain(|b| b != bucket);
        }
        self.written_data
            .retain(|w| !(w.target == target && w.bucket == bucket));
    }

    pub fn forget_write(&mut self, entry: &WrittenData) {
        self.written_data.retain(|w| w != entry);
    }
}

/// Shared handle to the ledger file. Every update reloads, mutates and saves,
/// so separate benchmark invocations accumulate into one file.
///
/// Updates hold `<file>.lock`, created exclusively, so concurrent processes
/// take turns instead of overwriting each other's entries.
#[derive(Debug, Clone)]
pub struct LedgerFile {
    path: PathBuf,
    lock_timeout: Duration,
}

const LOCK_RETRY: Duration = Duration::from_millis(20);

/// Removes the lock file when the update finishes, successfully or not.
struct LockGuard(PathBuf);

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}

impl LedgerFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock_timeout: Duration::from_secs(10),
        }
    }

    /// How long an update waits for another holder of the lock.
    #[must_use]
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    fn lock_path(&self) -> PathBuf {
        sibling(&self.path, "lock")
    }

    async fn lock(&self) -> BenchResult<LockGuard> {
        let lock_path = self.lock_path();
        if let Some(parent) = lock_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let deadline = Instant::now() + self.lock_timeout;
        loop {
            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&lock_path)
                .await
            {
                Ok(_) => return Ok(LockGuard(lock_path)),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if Instant::now() >= deadline {
                        return Err(BenchError::report(format!(
                            "run ledger is locked by `{}`; remove it if no other bddbench is running",
                            lock_path.display()
                        )));
                    }
                    debug!(lock = %lock_path.display(), "Waiting for run ledger lock");
                    tokio::time::sleep(LOCK_RETRY).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// # Errors
    ///
    /// See [`RunLedger::load`].
    pub async fn read(&self) -> BenchResult<RunLedger> {
        RunLedger::load(&self.path).await
    }

    /// Applies `change` under the ledger lock and saves the ledger.
    ///
    /// # Errors
    ///
    /// Returns `BenchError::Io` or `BenchError::Serialization`, and
    /// `BenchError::Report` when the lock is not released in time.
    pub async fn update<F>(&self, change: F) -> BenchResult<RunLedger>
    where
        F: FnOnce(&mut RunLedger),
    {
        let _guard = self.lock().await?;
        let mut ledger = self.read().await.map_err(|e| match e {
            BenchError::Serialization(e) => BenchError::report(format!(
                "run ledger `{}` is corrupt: {e}",
                self.path.display()
            )),
            other => other,
        })?;
        change(&mut ledger);
        ledger.save(&self.path).await?;
        Ok(ledger)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn records_are_deduplicated() {
        let run_id = RunId::new();
        let mut ledger = RunLedger::default();
        assert!(ledger.record_bucket(SUT, "bench_0"));
        assert!(!ledger.record_bucket(SUT, "bench_0"));
        assert!(ledger.record_write(SUT, "bench_0", "cpu", run_id));
        assert!(!ledger.record_write(SUT, "bench_0", "cpu", run_id));
        assert_eq!(ledger.buckets(SUT), ["bench_0".to_string()]);
        assert!(ledger.buckets("main").is_empty());
        assert_eq!(ledger.writes(SUT).count(), 1);
    }

    #[test]
    fn forgetting_a_bucket_drops_its_writes() {
        let mut ledger = RunLedger::default();
        ledger.record_bucket(SUT, "a");
        ledger.record_write(SUT, "a", "cpu", RunId::new());
        ledger.record_write(SUT, "b", "cpu", RunId::new());
        ledger.forget_bucket(SUT, "a");
        assert!(ledger.buckets(SUT).is_empty());
        assert_eq!(ledger.writes(SUT).map(|w| w.bucket.as_str()).collect::<Vec<_>>(), ["b"]);
    }

    #[tokio::test]
    async fn updates_accumulate_on_disk() {
        let dir = TempDir::new().unwrap();
        let file = LedgerFile::new(dir.path().join("reports/bddbench_state.json"));
        assert_eq!(file.read().await.unwrap(), RunLedger::default());

        file.update(|l| {
            l.record_bucket(SUT, "bench_0");
        })
        .await
        .unwrap();
        file.update(|l| {
            l.record_bucket(SUT, "bench_1");
        })
        .await
        .unwrap();

        let ledger = file.read().await.unwrap();
        assert_eq!(ledger.buckets(SUT).len(), 2);
        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(file.path()).unwrap()).unwrap();
        assert_eq!(raw["created_buckets"]["sut"][1], "bench_1");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_updates_keep_every_entry() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bddbench_state.json");

        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..16 {
            let file = LedgerFile::new(&path);
            tasks.spawn(async move {
                file.update(|l| {
                    l.record_bucket(SUT, &format!("bench_{i}"));
                })
                .await
            });
        }
        while let Some(result) = tasks.join_next().await {
            result.unwrap().unwrap();
        }

        let file = LedgerFile::new(&path);
        assert_eq!(file.read().await.unwrap().buckets(SUT).len(), 16);
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .filter(|name| name != "bddbench_state.json")
            .collect();
        assert!(leftovers.is_empty(), "{leftovers:?}");
    }

    #[tokio::test]
    async fn held_lock_times_out_with_its_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bddbench_state.json");
        std::fs::write(dir.path().join("bddbench_state.json.lock"), b"").unwrap();

        let file = LedgerFile::new(&path).with_lock_timeout(Duration::from_millis(50));
        let err = file
            .update(|l| {
                l.record_bucket(SUT, "bench_0");
            })
            .await
            .unwrap_err();
        match err {
            BenchError::Report(message) => assert!(message.contains("bddbench_state.json.lock")),
            other => panic!("unexpected error: {other}"),
        }
        assert!(!path.exists());
    }
}
