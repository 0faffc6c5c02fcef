use std::sync::Arc;
use std::time::Instant;

use bddbench_core::{OperationKind, Sample};
use tracing::debug;

use crate::api::InfluxApi;
use crate::flux::QuerySpec;

#[derive(Clone)]
pub struct QueryClient {
    api: Arc<dyn InfluxApi>,
}

impl QueryClient {
    pub fn new(api: Arc<dyn InfluxApi>) -> Self {
        Self { api }
    }

    /// Runs `query` once and records time to first row, total time, bytes and rows.
    pub async fn run(&self, query: &QuerySpec) -> Sample {
        let flux = query.to_flux();
        let started = Instant::now();
        let result = self.api.query(&flux).await;
        let duration = started.elapsed();

        let sample = match result {
            Ok(response) if (200..300).contains(&response.status) => {
                Sample::success(OperationKind::Query, duration)
                    .with_volume(response.bytes, response.rows)
                    .with_ttf(response.first_row_after)
            }
            Ok(response) => Sample::failure(
                OperationKind::Query,
                duration,
                Some(response.status),
                response.error.unwrap_or_default(),
            ),
            Err(err) => {
                debug!(error = %err, "Query failed without response");
                Sample::failure(OperationKind::Query, duration, None, err.to_string())
            }
        };
        sample.with_target(query.bucket.as_str())
    }
}
