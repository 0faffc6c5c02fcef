//! Identity of a run, shared between a write phase and its dependent phases.

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{BenchError, BenchResult};
use crate::ids::RunId;
use crate::workload::Precision;

/// Buckets used by a multi-target run: `{prefix}_0 .. {prefix}_{count-1}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketSet {
    prefix: String,
    count: usize,
}

impl BucketSet {
    /// # Errors
    ///
    /// Returns `BenchError::Validation` for an empty prefix or zero count.
    pub fn new(prefix: impl Into<String>, count: usize) -> BenchResult<Self> {
        let prefix = prefix.into();
        if prefix.trim().is_empty() {
            return Err(BenchError::validation("bucket prefix must not be empty"));
        }
        if count == 0 {
            return Err(BenchError::validation("bucket_count must be > 0"));
        }
        Ok(Self { prefix, count })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn count(&self) -> usize {
        self.count
    }

    #[must_use]
    pub fn names(&self) -> Vec<String> {
        (0..self.count)
            .map(|i| format!("{}_{}", self.prefix, i))
            .collect()
    }
}

/// Where a run wrote its points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Target {
    Single {
        bucket: String,
    },
    Multi {
        bucket_prefix: String,
        bucket_count: usize,
    },
}

impl Target {
    #[must_use]
    pub fn single(bucket: impl Into<String>) -> Self {
        Self::Single {
            bucket: bucket.into(),
        }
    }

    /// Concrete bucket names covered by this target.
    #[must_use]
    pub fn buckets(&self) -> Vec<String> {
        match self {
            Self::Single { bucket } => vec![bucket.clone()],
            Self::Multi {
                bucket_prefix,
                bucket_count,
            } => (0..*bucket_count)
                .map(|i| format!("{bucket_prefix}_{i}"))
                .collect(),
        }
    }

    /// Short form used as the `target` KPI tag.
    #[must_use]
    pub fn identity(&self) -> String {
        match self {
            Self::Single { bucket } => bucket.clone(),
            Self::Multi {
                bucket_prefix,
                bucket_count,
            } => format!("{bucket_prefix}_*x{bucket_count}"),
        }
    }
}

impl From<&BucketSet> for Target {
    fn from(set: &BucketSet) -> Self {
        Self::Multi {
            bucket_prefix: set.prefix.clone(),
            bucket_count: set.count,
        }
    }
}

/// Closed time interval, RFC 3339 on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub stop: DateTime<Utc>,
}

impl TimeWindow {
    /// Window covering every timestamp a run could have produced: the span
    /// `[first, last]` in `precision`, widened by one second on both sides for
    /// out-of-order jitter.
    #[must_use]
    pub fn covering(first: i64, last: i64, precision: Precision) -> Self {
        let slack = ChronoDuration::seconds(1);
        Self {
            start: from_precision(first.min(last), precision) - slack,
            stop: from_precision(first.max(last), precision) + slack,
        }
    }

    /// Window spanning everything a time-series bucket may hold.
    #[must_use]
    pub fn everything() -> Self {
        Self {
            start: Utc.timestamp_opt(0, 0).single().unwrap_or_default(),
            stop: Utc
                .with_ymd_and_hms(2100, 1, 1, 0, 0, 0)
                .single()
                .unwrap_or_else(Utc::now),
        }
    }

    /// `[now - range, now]`.
    #[must_use]
    pub fn trailing(range: std::time::Duration) -> Self {
        let stop = Utc::now();
        let range = ChronoDuration::from_std(range).unwrap_or(ChronoDuration::zero());
        Self {
            start: stop - range,
            stop,
        }
    }

    #[must_use]
    pub fn span_secs(&self) -> f64 {
        (self.stop - self.start).num_milliseconds() as f64 / 1_000.0
    }
}

/// Converts a timestamp in `precision` back to UTC.
#[must_use]
pub fn from_precision(ts: i64, precision: Precision) -> DateTime<Utc> {
    match precision {
        Precision::Ns => Utc.timestamp_nanos(ts),
        Precision::Ms => Utc
            .timestamp_millis_opt(ts)
            .single()
            .unwrap_or_default(),
        Precision::S => Utc.timestamp_opt(ts, 0).single().unwrap_or_default(),
    }
}

/// Everything a dependent phase needs to find what a write phase produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunContext {
    pub run_id: RunId,
    pub measurement: String,
    pub target: Target,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<TimeWindow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_points: Option<u64>,
}

impl RunContext {
    #[must_use]
    pub fn new(run_id: RunId, measurement: impl Into<String>, target: Target) -> Self {
        Self {
            run_id,
            measurement: measurement.into(),
            target,
            created_at: Utc::now(),
            window: None,
            total_points: None,
        }
    }

    #[must_use]
    pub fn with_window(mut self, window: TimeWindow) -> Self {
        self.window = Some(window);
        self
    }

    #[must_use]
    pub fn with_total_points(mut self, total_points: u64) -> Self {
        self.total_points = Some(total_points);
        self
    }

    /// Checks the fields serde cannot: non-empty measurement and target names.
    ///
    /// # Errors
    ///
    /// Returns a human-readable reason for the first invalid field.
    pub fn check(&self) -> Result<(), String> {
        if self.measurement.trim().is_empty() {
            return Err("measurement is empty".to_string());
        }
        match &self.target {
            Target::Single { bucket } if bucket.trim().is_empty() => {
                Err("target bucket is empty".to_string())
            }
            Target::Multi {
                bucket_prefix,
                bucket_count,
            } if bucket_prefix.trim().is_empty() || *bucket_count == 0 => {
                Err("multi-bucket target needs a prefix and a positive count".to_string())
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_set_names() {
        let set = BucketSet::new("bench", 3).unwrap();
        assert_eq!(set.names(), vec!["bench_0", "bench_1", "bench_2"]);
        assert_eq!(Target::from(&set).buckets(), set.names());
        assert_eq!(Target::from(&set).identity(), "bench_*x3");
        assert!(BucketSet::new("bench", 0).is_err());
    }

    #[test]
    fn context_json_shape() {
        let ctx = RunContext::new(RunId::new(), "cpu", Target::single("bench"));
        let json = serde_json::to_value(&ctx).unwrap();
        assert_eq!(json["target"]["kind"], "single");
        assert_eq!(json["target"]["bucket"], "bench");
        assert!(json.get("window").is_none());
        let back: RunContext = serde_json::from_value(json).unwrap();
        assert_eq!(back, ctx);
    }

    #[test]
    fn covering_window_adds_slack() {
        let window = TimeWindow::covering(5_000, 2_000, Precision::Ms);
        assert_eq!(window.start.timestamp_millis(), 1_000);
        assert_eq!(window.stop.timestamp_millis(), 6_000);
        assert!((window.span_secs() - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn everything_window_spans_epoch_to_2100() {
        let window = TimeWindow::everything();
        assert_eq!(window.start.to_rfc3339(), "1970-01-01T00:00:00+00:00");
        assert_eq!(window.stop.timestamp(), 4_102_444_800);
    }

    #[test]
    fn check_rejects_empty_fields() {
        let mut ctx = RunContext::new(RunId::new(), "cpu", Target::single(""));
        assert!(ctx.check().is_err());
        ctx.target = Target::single("bench");
        ctx.measurement = " ".into();
        assert!(ctx.check().is_err());
    }
}
