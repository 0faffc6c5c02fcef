//! Reduction of per-operation samples into run-level statistics.
//!
//! Percentiles use the nearest-rank method over successful samples only.
//! Throughput divides volume by the wall-clock span of the whole run, never by
//! summed or averaged per-operation durations, since operations overlap.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::sample::{OperationKind, Sample};

/// Order statistics over one numeric series.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    /// Mean of the two middle values for even-sized series.
    pub median: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

impl Summary {
    /// Returns `None` for an empty series.
    #[must_use]
    pub fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);

        let n = sorted.len();
        let median = if n % 2 == 1 {
            sorted[n / 2]
        } else {
            (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
        };

        Some(Self {
            min: sorted[0],
            max: sorted[n - 1],
            avg: sorted.iter().sum::<f64>() / n as f64,
            median,
            p50: nearest_rank(&sorted, 0.50),
            p95: nearest_rank(&sorted, 0.95),
            p99: nearest_rank(&sorted, 0.99),
        })
    }
}

/// Nearest-rank percentile of an ascending, non-empty slice:
/// the value at index `ceil(p * n) - 1`.
#[must_use]
pub fn nearest_rank(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();
    let rank = (p * n as f64).ceil() as usize;
    sorted[rank.clamp(1, n) - 1]
}

/// Volume divided by the wall-clock span of the run.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Throughput {
    pub ops_per_s: f64,
    pub points_per_s: f64,
    pub bytes_per_s: f64,
    pub rows_per_s: f64,
}

/// Summary of a set of samples. Derived, never updated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateStats {
    /// All samples, skipped ones included.
    pub count: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub skipped_count: u64,
    /// `error_count / count`.
    pub error_rate: f64,
    /// Seconds, successful executed samples only.
    pub latency: Option<Summary>,
    /// Seconds to first row, successful queries only.
    pub ttf: Option<Summary>,
    /// Bytes per successful query.
    pub bytes: Option<Summary>,
    /// Rows per successful query.
    pub rows: Option<Summary>,
    /// Points attempted by write calls.
    pub total_points: u64,
    /// Points carried by successful write calls.
    pub written_points: u64,
    pub total_bytes: u64,
    pub total_rows: u64,
    pub wall_clock_secs: f64,
    pub throughput: Throughput,
}

impl AggregateStats {
    /// Historical query throughput: average volume over average total time.
    /// Kept only for continuity with older dashboards.
    #[must_use]
    pub fn avg_latency_throughput(&self) -> Throughput {
        let Some(latency) = self.latency.filter(|l| l.avg > 0.0) else {
            return Throughput::default();
        };
        let per = |summary: Option<Summary>| summary.map_or(0.0, |s| s.avg / latency.avg);
        Throughput {
            ops_per_s: 1.0 / latency.avg,
            points_per_s: 0.0,
            bytes_per_s: per(self.bytes),
            rows_per_s: per(self.rows),
        }
    }
}

/// Reduces `samples` to statistics. Pure: same input, same output.
#[must_use]
pub fn aggregate(samples: &[Sample], wall_clock: Duration) -> AggregateStats {
    aggregate_iter(samples.iter(), wall_clock)
}

/// [`aggregate`] restricted to one operation kind.
#[must_use]
pub fn aggregate_kind(samples: &[Sample], kind: OperationKind, wall_clock: Duration) -> AggregateStats {
    aggregate_iter(samples.iter().filter(|s| s.kind == kind), wall_clock)
}

fn aggregate_iter<'a>(samples: impl Iterator<Item = &'a Sample>, wall_clock: Duration) -> AggregateStats {
    let mut count = 0_u64;
    let mut success_count = 0_u64;
    let mut error_count = 0_u64;
    let mut skipped_count = 0_u64;
    let mut total_points = 0_u64;
    let mut written_points = 0_u64;
    let mut total_bytes = 0_u64;
    let mut total_rows = 0_u64;
    let mut latencies = Vec::new();
    let mut ttfs = Vec::new();
    let mut bytes = Vec::new();
    let mut rows = Vec::new();

    for sample in samples {
        count += 1;
        total_points += sample.points;
        if sample.is_skipped() {
            skipped_count += 1;
            continue;
        }
        if sample.is_failure() {
            error_count += 1;
            continue;
        }
        success_count += 1;
        written_points += sample.points;
        total_bytes += sample.bytes;
        total_rows += sample.rows;
        latencies.push(sample.duration.as_secs_f64());
        if let Some(ttf) = sample.ttf {
            ttfs.push(ttf.as_secs_f64());
        }
        if sample.kind == OperationKind::Query {
            bytes.push(sample.bytes as f64);
            rows.push(sample.rows as f64);
        }
    }

    let wall_clock_secs = wall_clock.as_secs_f64();
    let rate = |volume: u64| {
        if wall_clock_secs > 0.0 {
            volume as f64 / wall_clock_secs
        } else {
            0.0
        }
    };

    AggregateStats {
        count,
        success_count,
        error_count,
        skipped_count,
        error_rate: if count == 0 {
            0.0
        } else {
            error_count as f64 / count as f64
        },
        latency: Summary::from_values(&latencies),
        ttf: Summary::from_values(&ttfs),
        bytes: Summary::from_values(&bytes),
        rows: Summary::from_values(&rows),
        total_points,
        written_points,
        total_bytes,
        total_rows,
        wall_clock_secs,
        throughput: Throughput {
            ops_per_s: rate(success_count),
            points_per_s: rate(written_points),
            bytes_per_s: rate(total_bytes),
            rows_per_s: rate(total_rows),
        },
    }
}
