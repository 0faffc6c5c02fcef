//! Flag groups shared by several subcommands.

use std::time::Duration;

use bddbench_client::{parse_range, QueryKind};
use bddbench_core::{
    BenchError, BenchResult, Compression, PointComplexity, Precision, StopCondition,
    TimeOrdering, WorkloadSpec,
};
use clap::Args;

/// Either a total operation count or a wall-clock duration.
#[derive(Args, Debug, Clone)]
pub struct StopArgs {
    /// Operations in total, split across workers
    #[arg(long, conflicts_with = "duration")]
    pub count: Option<u64>,

    /// Run for this long instead, e.g. `30s`, `5m`
    #[arg(long, value_parser = parse_range)]
    pub duration: Option<Duration>,
}

impl StopArgs {
    pub fn resolve(&self, default: StopCondition) -> StopCondition {
        match (self.count, self.duration) {
            (_, Some(duration)) => StopCondition::Duration { duration },
            (Some(total), None) => StopCondition::Count { total },
            (None, None) => default,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct WorkloadArgs {
    /// Measurement the generated points belong to
    #[arg(long, default_value = "bddbench")]
    pub measurement: String,

    /// Points per write request
    #[arg(long, default_value_t = 1_000)]
    pub batch_size: usize,

    /// Concurrent writers (per bucket for multi-write)
    #[arg(long, default_value_t = 4)]
    pub workers: usize,

    /// Batches each worker writes
    #[arg(long, default_value_t = 10, conflicts_with = "duration")]
    pub batches: u64,

    /// Write for this long instead of a fixed batch count, e.g. `1m`
    #[arg(long, value_parser = parse_range)]
    pub duration: Option<Duration>,

    #[arg(long, default_value = "none")]
    pub compression: Compression,

    #[arg(long, default_value = "ns")]
    pub precision: Precision,

    #[arg(long, default_value = "low")]
    pub point_complexity: PointComplexity,

    /// Distinct values of the `device` tag
    #[arg(long, default_value_t = 10)]
    pub tag_cardinality: usize,

    #[arg(long, default_value = "in_order")]
    pub time_ordering: TimeOrdering,

    /// Seed for out-of-order jitter; entropy when absent
    #[arg(long)]
    pub jitter_seed: Option<u64>,
}

impl WorkloadArgs {
    pub fn to_spec(&self) -> BenchResult<WorkloadSpec> {
        let stop = match self.duration {
            Some(duration) => StopCondition::Duration { duration },
            None => StopCondition::per_worker(self.batches, self.workers),
        };
        let mut builder = WorkloadSpec::builder(self.measurement.as_str())
            .batch_size(self.batch_size)
            .workers(self.workers)
            .compression(self.compression)
            .precision(self.precision)
            .point_complexity(self.point_complexity)
            .tag_cardinality(self.tag_cardinality)
            .time_ordering(self.time_ordering)
            .stop(stop);
        if let Some(seed) = self.jitter_seed {
            builder = builder.jitter_seed(seed);
        }
        builder.build()
    }
}

#[derive(Args, Debug, Clone)]
pub struct QueryArgs {
    /// filter, aggregate, group_by, pivot or join
    #[arg(long = "query-type", default_value = "filter")]
    pub query_type: QueryKind,

    /// Window of an aggregate query, e.g. `10s`
    #[arg(long, value_parser = parse_range)]
    pub every: Option<Duration>,

    /// Group-by columns, comma separated
    #[arg(long, value_delimiter = ',')]
    pub group_columns: Vec<String>,
}

impl QueryArgs {
    pub fn to_kind(&self) -> BenchResult<QueryKind> {
        match self.query_type.clone() {
            QueryKind::Aggregate { every } => Ok(QueryKind::Aggregate {
                every: self.every.unwrap_or(every),
            }),
            QueryKind::GroupBy { columns } if self.group_columns.is_empty() => {
                Ok(QueryKind::GroupBy { columns })
            }
            QueryKind::GroupBy { .. } => Ok(QueryKind::GroupBy {
                columns: self.group_columns.clone(),
            }),
            _ if self.every.is_some() => Err(BenchError::validation(
                "--every only applies to aggregate queries",
            )),
            kind => Ok(kind),
        }
    }
}
