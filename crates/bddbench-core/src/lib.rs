//! Core types for the bddbench time-series benchmark engine: workload
//! description, synthetic point generation, samples and their aggregation.

pub mod aggregate;
pub mod compression;
pub mod config;
pub mod context;
pub mod error;
pub mod generator;
pub mod ids;
pub mod line_protocol;
pub mod point;
pub mod sample;
pub mod workload;

pub use aggregate::{aggregate, aggregate_kind, AggregateStats, Summary, Throughput};
pub use config::{BenchConfig, EndpointConfig, ReportConfig};
pub use context::{BucketSet, RunContext, Target, TimeWindow};
pub use error::{BenchError, BenchResult, ContextError};
pub use generator::{generate, BatchGenerator, WorkloadGenerator};
pub use ids::RunId;
pub use point::{Batch, FieldValue, Point};
pub use sample::{OperationKind, Outcome, Sample};
pub use workload::{
    Compression, PointComplexity, Precision, StopCondition, TimeOrdering, WorkloadSpec,
    WorkloadSpecBuilder,
};
