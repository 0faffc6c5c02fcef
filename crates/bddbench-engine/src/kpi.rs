//! KPI records: one line-protocol point per benchmark run, with a fixed tag
//! and field set per benchmark kind.

use std::collections::BTreeMap;

use bddbench_core::{AggregateStats, FieldValue, Point, Summary, WorkloadSpec};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const WRITE_MEASUREMENT: &str = "bddbench_write_result";
pub const MULTI_WRITE_MEASUREMENT: &str = "bddbench_multi_write_result";
pub const QUERY_MEASUREMENT: &str = "bddbench_query_result";
pub const DELETE_MEASUREMENT: &str = "bddbench_delete_result";
pub const USER_MEASUREMENT: &str = "bddbench_user_result";
pub const ME_MEASUREMENT: &str = "bddbench_me_result";
pub const HEALTH_MEASUREMENT: &str = "bddbench_health_result";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KpiRecord {
    pub measurement: String,
    pub tags: BTreeMap<String, String>,
    pub fields: BTreeMap<String, FieldValue>,
    pub timestamp: DateTime<Utc>,
}

impl KpiRecord {
    #[must_use]
    pub fn new(measurement: impl Into<String>, dimensions: &Dimensions) -> Self {
        Self {
            measurement: measurement.into(),
            tags: dimensions.tags.clone(),
            fields: BTreeMap::new(),
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn field(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Adds the field only when a value is present.
    #[must_use]
    pub fn field_opt<V: Into<FieldValue>>(self, key: impl Into<String>, value: Option<V>) -> Self {
        match value {
            Some(value) => self.field(key, value),
            None => self,
        }
    }

    pub fn has_field(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn float(&self, key: &str) -> Option<f64> {
        self.fields.get(key).and_then(FieldValue::as_f64)
    }

    /// Nanosecond-precision point.
    #[must_use]
    pub fn to_point(&self) -> Point {
        let timestamp = self.timestamp.timestamp_nanos_opt().unwrap_or_default();
        let mut point = Point::new(self.measurement.as_str(), timestamp);
        point.tags = self.tags.clone();
        point.fields = self.fields.clone();
        point
    }

    #[must_use]
    pub fn to_line_protocol(&self) -> String {
        self.to_point().to_line_protocol()
    }
}

/// Tags shared by every KPI record of one scenario.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Dimensions {
    tags: BTreeMap<String, String>,
}

impl Dimensions {
    #[must_use]
    pub fn new(
        scenario_id: impl Into<String>,
        environment: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        let mut tags = BTreeMap::new();
        tags.insert("scenario_id".to_string(), scenario_id.into());
        tags.insert("environment".to_string(), environment.into());
        tags.insert("target".to_string(), target.into());
        Self { tags }
    }

    /// Adds the workload dimensions.
    #[must_use]
    pub fn with_workload(self, spec: &WorkloadSpec) -> Self {
        self.with("measurement", spec.measurement())
            .with("compression", spec.compression().as_str())
            .with("precision", spec.precision().as_str())
            .with("point_complexity", spec.point_complexity().as_str())
            .with("tag_cardinality", spec.tag_cardinality().to_string())
            .with("time_ordering", spec.time_ordering().as_str())
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }
}

fn summary_fields(record: KpiRecord, prefix: &str, suffix: &str, summary: Option<Summary>) -> KpiRecord {
    let summary = summary.unwrap_or_default();
    record
        .field(format!("{prefix}_min{suffix}"), summary.min)
        .field(format!("{prefix}_max{suffix}"), summary.max)
        .field(format!("{prefix}_avg{suffix}"), summary.avg)
        .field(format!("{prefix}_median{suffix}"), summary.median)
}

fn millis(seconds: f64) -> f64 {
    seconds * 1_000.0
}

/// Write KPI. `bucket_count` switches to the multi-target measurement.
#[must_use]
pub fn write_record(dimensions: &Dimensions, stats: &AggregateStats, bucket_count: Option<usize>) -> KpiRecord {
    let measurement = if bucket_count.is_some() {
        MULTI_WRITE_MEASUREMENT
    } else {
        WRITE_MEASUREMENT
    };
    let latency = stats.latency.unwrap_or_default();
    let record = KpiRecord::new(measurement, dimensions)
        .field("total_points", stats.total_points)
        .field("total_batches", stats.count)
        .field("total_duration_s", stats.wall_clock_secs)
        .field("throughput_points_per_s", stats.throughput.points_per_s);
    summary_fields(record, "latency", "_s", stats.latency)
        .field("latency_p50_s", latency.p50)
        .field("latency_p95_s", latency.p95)
        .field("latency_p99_s", latency.p99)
        .field("errors_count", stats.error_count)
        .field("error_rate", stats.error_rate)
        .field_opt("bucket_count", bucket_count)
}

#[must_use]
pub fn query_record(dimensions: &Dimensions, stats: &AggregateStats) -> KpiRecord {
    let legacy = stats.avg_latency_throughput();
    let record = KpiRecord::new(QUERY_MEASUREMENT, dimensions)
        .field("total_runs", stats.count)
        .field("errors_count", stats.error_count)
        .field("error_rate", stats.error_rate);
    let record = summary_fields(record, "ttf", "_s", stats.ttf);
    let record = summary_fields(record, "total_time", "_s", stats.latency);
    let record = summary_fields(record, "bytes", "", stats.bytes);
    summary_fields(record, "rows", "", stats.rows)
        .field("throughput_bytes_per_s", stats.throughput.bytes_per_s)
        .field("throughput_rows_per_s", stats.throughput.rows_per_s)
        .field("avg_latency_throughput_bytes_per_s", legacy.bytes_per_s)
        .field("avg_latency_throughput_rows_per_s", legacy.rows_per_s)
}

/// User lifecycle KPI from the per-phase statistics.
#[must_use]
pub fn user_record(
    dimensions: &Dimensions,
    num_users: usize,
    create: &AggregateStats,
    list: &AggregateStats,
    delete: &AggregateStats,
) -> KpiRecord {
    let create_latency = create.latency.unwrap_or_default();
    let delete_latency = delete.latency.unwrap_or_default();
    KpiRecord::new(USER_MEASUREMENT, dimensions)
        .field("num_users", num_users)
        .field("create_p50_ms", millis(create_latency.p50))
        .field("create_p95_ms", millis(create_latency.p95))
        .field("create_p99_ms", millis(create_latency.p99))
        .field("create_errors", create.error_count)
        .field("delete_p50_ms", millis(delete_latency.p50))
        .field("delete_p95_ms", millis(delete_latency.p95))
        .field("delete_p99_ms", millis(delete_latency.p99))
        .field("delete_errors", delete.error_count)
        .field("list_latency_ms", millis(list.latency.unwrap_or_default().avg))
        .field("list_errors", list.error_count)
        .field(
            "total_errors",
            create.error_count + list.error_count + delete.error_count,
        )
}

#[must_use]
pub fn me_record(dimensions: &Dimensions, stats: &AggregateStats) -> KpiRecord {
    let latency = stats.latency.unwrap_or_default();
    KpiRecord::new(ME_MEASUREMENT, dimensions)
        .field("ops_per_sec", stats.throughput.ops_per_s)
        .field("latency_avg_ms", millis(latency.avg))
        .field("latency_min_ms", millis(latency.min))
        .field("latency_max_ms", millis(latency.max))
        .field("latency_p95_ms", millis(latency.p95))
        .field("error_count", stats.error_count)
        .field("total_ops", stats.count)
}

/// Health KPI. Request rate counts every attempted request.
#[must_use]
pub fn health_record(dimensions: &Dimensions, stats: &AggregateStats) -> KpiRecord {
    let latency = stats.latency.unwrap_or_default();
    let req_per_min = if stats.wall_clock_secs > 0.0 {
        stats.count as f64 * 60.0 / stats.wall_clock_secs
    } else {
        0.0
    };
    KpiRecord::new(HEALTH_MEASUREMENT, dimensions)
        .field("latency_p50_ms", millis(latency.p50))
        .field("latency_p95_ms", millis(latency.p95))
        .field("latency_p99_ms", millis(latency.p99))
        .field("req_per_min", req_per_min)
        .field("error_rate", stats.error_rate)
        .field("total_requests", stats.count)
        .field("error_requests", stats.error_count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bddbench_core::{aggregate, Compression, OperationKind, Sample, StopCondition};
    use std::time::Duration;

    fn dims() -> Dimensions {
        let spec = WorkloadSpec::builder("cpu")
            .compression(Compression::Gzip)
            .stop(StopCondition::Count { total: 4 })
            .build()
            .unwrap();
        Dimensions::new("smoke", "ci", "bench").with_workload(&spec)
    }

    #[test]
    fn write_record_carries_fixed_tags_and_fields() {
        let samples = vec![
            Sample::success(OperationKind::Write, Duration::from_millis(10)).with_points(100),
            Sample::failure(OperationKind::Write, Duration::from_millis(3), Some(500), "boom")
                .with_points(100),
        ];
        let stats = aggregate(&samples, Duration::from_secs(1));
        let record = write_record(&dims(), &stats, None);

        assert_eq!(record.measurement, WRITE_MEASUREMENT);
        for tag in [
            "measurement",
            "compression",
            "precision",
            "point_complexity",
            "tag_cardinality",
            "time_ordering",
            "target",
            "scenario_id",
            "environment",
        ] {
            assert!(record.tags.contains_key(tag), "missing tag {tag}");
        }
        assert_eq!(record.tags["compression"], "gzip");
        assert_eq!(record.fields["total_points"], FieldValue::Integer(200));
        assert_eq!(record.fields["errors_count"], FieldValue::Integer(1));
        assert_eq!(record.float("error_rate"), Some(0.5));
        assert!(record.has_field("latency_p99_s"));
        assert!(!record.has_field("bucket_count"));
    }

    #[test]
    fn multi_write_record_counts_buckets() {
        let stats = aggregate(&[], Duration::from_secs(1));
        let record = write_record(&dims(), &stats, Some(3));
        assert_eq!(record.measurement, MULTI_WRITE_MEASUREMENT);
        assert_eq!(record.fields["bucket_count"], FieldValue::Integer(3));
    }

    #[test]
    fn query_record_keeps_both_throughputs() {
        let samples = vec![
            Sample::success(OperationKind::Query, Duration::from_millis(500))
                .with_volume(1_000, 10)
                .with_ttf(Some(Duration::from_millis(100))),
            Sample::success(OperationKind::Query, Duration::from_millis(500))
                .with_volume(3_000, 30)
                .with_ttf(Some(Duration::from_millis(200))),
        ];
        // two overlapping queries inside half a second
        let stats = aggregate(&samples, Duration::from_millis(500));
        let record = query_record(&dims(), &stats);

        assert_eq!(record.float("throughput_bytes_per_s"), Some(8_000.0));
        assert_eq!(record.float("avg_latency_throughput_bytes_per_s"), Some(4_000.0));
        assert_eq!(record.float("rows_max"), Some(30.0));
        assert!(record.has_field("ttf_median_s"));
        assert!(record.has_field("total_time_avg_s"));
    }

    #[test]
    fn health_rate_is_per_minute() {
        let samples: Vec<Sample> = (0..30)
            .map(|_| Sample::success(OperationKind::Health, Duration::from_millis(2)))
            .collect();
        let stats = aggregate(&samples, Duration::from_secs(30));
        let record = health_record(&Dimensions::new("h", "ci", "http://db"), &stats);
        assert_eq!(record.float("req_per_min"), Some(60.0));
        assert_eq!(record.float("latency_p50_ms"), Some(2.0));
    }

    #[test]
    fn renders_as_line_protocol() {
        let record = KpiRecord::new(ME_MEASUREMENT, &Dimensions::new("me 1", "ci", "db"))
            .field("total_ops", 3_u64);
        let line = record.to_line_protocol();
        assert!(line.starts_with("bddbench_me_result,environment=ci,scenario_id=me\\ 1,target=db total_ops=3i "));
    }
}
