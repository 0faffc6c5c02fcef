//! Declarative workload description shared read-only by every worker.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{BenchError, BenchResult};

/// Request body encoding for write calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Compression {
    #[default]
    None,
    Gzip,
}

/// Timestamp unit of generated points and of the write endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Precision {
    #[default]
    Ns,
    Ms,
    S,
}

impl Precision {
    /// Number of timestamp units in one second.
    #[must_use]
    pub const fn units_per_second(self) -> i64 {
        match self {
            Self::Ns => 1_000_000_000,
            Self::Ms => 1_000,
            Self::S => 1,
        }
    }

    /// Upper bound of the out-of-order jitter: one second in this unit.
    #[must_use]
    pub const fn jitter_bound(self) -> i64 {
        self.units_per_second()
    }

    /// Converts a wall-clock instant into this precision.
    #[must_use]
    pub fn timestamp(self, at: DateTime<Utc>) -> i64 {
        match self {
            // Out of range only past year 2262.
            Self::Ns => at
                .timestamp_nanos_opt()
                .unwrap_or_else(|| at.timestamp_micros().saturating_mul(1_000)),
            Self::Ms => at.timestamp_millis(),
            Self::S => at.timestamp(),
        }
    }

    /// Current time in this precision.
    #[must_use]
    pub fn now(self) -> i64 {
        self.timestamp(Utc::now())
    }
}

/// Controls how many synthetic fields each point carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PointComplexity {
    #[default]
    Low,
    Medium,
    High,
}

impl PointComplexity {
    /// Fixed field count per tier. Dashboards compare runs across tiers, so
    /// these numbers must not change.
    #[must_use]
    pub const fn field_count(self) -> usize {
        match self {
            Self::Low => 2,
            Self::Medium => 5,
            Self::High => 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TimeOrdering {
    #[default]
    InOrder,
    OutOfOrder,
}

/// When the workers of a pool stop issuing operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum StopCondition {
    /// A fixed total number of operations, shared across all workers.
    Count { total: u64 },
    /// Every worker loops until the deadline passes.
    Duration {
        #[serde(with = "duration_secs")]
        duration: Duration,
    },
}

impl StopCondition {
    /// Count-bounded stop with `per_worker` operations for each of `workers`.
    #[must_use]
    pub fn per_worker(per_worker: u64, workers: usize) -> Self {
        Self::Count {
            total: per_worker.saturating_mul(workers as u64),
        }
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

/// Immutable, validated configuration of one benchmark run.
///
/// Only obtainable through [`WorkloadSpecBuilder::build`], so every value in
/// circulation has passed validation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkloadSpec {
    measurement: String,
    batch_size: usize,
    workers: usize,
    compression: Compression,
    precision: Precision,
    point_complexity: PointComplexity,
    tag_cardinality: usize,
    time_ordering: TimeOrdering,
    stop: StopCondition,
    #[serde(skip_serializing_if = "Option::is_none")]
    jitter_seed: Option<u64>,
}

impl WorkloadSpec {
    #[must_use]
    pub fn builder(measurement: impl Into<String>) -> WorkloadSpecBuilder {
        WorkloadSpecBuilder::new(measurement)
    }

    pub fn measurement(&self) -> &str {
        &self.measurement
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }

    pub fn precision(&self) -> Precision {
        self.precision
    }

    pub fn point_complexity(&self) -> PointComplexity {
        self.point_complexity
    }

    pub fn tag_cardinality(&self) -> usize {
        self.tag_cardinality
    }

    pub fn time_ordering(&self) -> TimeOrdering {
        self.time_ordering
    }

    pub fn stop(&self) -> StopCondition {
        self.stop
    }

    pub fn jitter_seed(&self) -> Option<u64> {
        self.jitter_seed
    }

    /// Same workload with a different stop condition, re-validated.
    ///
    /// # Errors
    ///
    /// Returns `BenchError::Validation` if the new stop condition is empty.
    pub fn with_stop(&self, stop: StopCondition) -> BenchResult<Self> {
        let mut spec = self.clone();
        spec.stop = stop;
        spec.validate()?;
        Ok(spec)
    }

    fn validate(&self) -> BenchResult<()> {
        if self.measurement.trim().is_empty() {
            return Err(BenchError::validation("measurement must not be empty"));
        }
        if self
            .measurement
            .chars()
            .any(|c| c.is_whitespace() || c == ',')
        {
            return Err(BenchError::validation(format!(
                "measurement `{}` must not contain whitespace or commas",
                self.measurement
            )));
        }
        if self.batch_size == 0 {
            return Err(BenchError::validation("batch_size must be > 0"));
        }
        if self.workers == 0 {
            return Err(BenchError::validation("workers must be > 0"));
        }
        if self.tag_cardinality == 0 {
            return Err(BenchError::validation("tag_cardinality must be > 0"));
        }
        match self.stop {
            StopCondition::Count { total: 0 } => {
                Err(BenchError::validation("batch count must be > 0"))
            }
            StopCondition::Duration { duration } if duration.is_zero() => {
                Err(BenchError::validation("duration must be > 0"))
            }
            _ => Ok(()),
        }
    }
}

/// Builder for [`WorkloadSpec`]. Defaults mirror a small smoke run.
#[derive(Debug, Clone)]
pub struct WorkloadSpecBuilder {
    spec: WorkloadSpec,
}

impl WorkloadSpecBuilder {
    fn new(measurement: impl Into<String>) -> Self {
        Self {
            spec: WorkloadSpec {
                measurement: measurement.into(),
                batch_size: 100,
                workers: 1,
                compression: Compression::None,
                precision: Precision::Ns,
                point_complexity: PointComplexity::Low,
                tag_cardinality: 10,
                time_ordering: TimeOrdering::InOrder,
                stop: StopCondition::Count { total: 10 },
                jitter_seed: None,
            },
        }
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.spec.batch_size = batch_size;
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.spec.workers = workers;
        self
    }

    pub fn compression(mut self, compression: Compression) -> Self {
        self.spec.compression = compression;
        self
    }

    pub fn precision(mut self, precision: Precision) -> Self {
        self.spec.precision = precision;
        self
    }

    pub fn point_complexity(mut self, complexity: PointComplexity) -> Self {
        self.spec.point_complexity = complexity;
        self
    }

    pub fn tag_cardinality(mut self, cardinality: usize) -> Self {
        self.spec.tag_cardinality = cardinality;
        self
    }

    pub fn time_ordering(mut self, ordering: TimeOrdering) -> Self {
        self.spec.time_ordering = ordering;
        self
    }

    pub fn stop(mut self, stop: StopCondition) -> Self {
        self.spec.stop = stop;
        self
    }

    /// Seeds the worker-local jitter sources (`seed + worker_index`).
    pub fn jitter_seed(mut self, seed: u64) -> Self {
        self.spec.jitter_seed = Some(seed);
        self
    }

    /// # Errors
    ///
    /// Returns `BenchError::Validation` for zero workers, zero batch size,
    /// zero cardinality, an empty stop condition or a malformed measurement.
    pub fn build(self) -> BenchResult<WorkloadSpec> {
        self.spec.validate()?;
        Ok(self.spec)
    }
}

macro_rules! text_enum {
    ($ty:ty { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            #[must_use]
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($text => Ok(Self::$variant),)+
                    other => Err(format!(
                        "unsupported {} `{}` (expected one of: {})",
                        stringify!($ty),
                        other,
                        [$($text),+].join(", ")
                    )),
                }
            }
        }
    };
}

text_enum!(Compression { None => "none", Gzip => "gzip" });
text_enum!(Precision { Ns => "ns", Ms => "ms", S => "s" });
text_enum!(PointComplexity { Low => "low", Medium => "medium", High => "high" });
text_enum!(TimeOrdering { InOrder => "in_order", OutOfOrder => "out_of_order" });
