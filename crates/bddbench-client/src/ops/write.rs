use std::sync::Arc;
use std::time::{Duration, Instant};

use bddbench_core::compression::encode_body;
use bddbench_core::{Batch, Compression, OperationKind, Precision, Sample, WorkloadSpec};

use super::sample_from;
use crate::api::InfluxApi;

/// Writes one batch per call to a fixed bucket.
#[derive(Clone)]
pub struct WriteClient {
    api: Arc<dyn InfluxApi>,
    bucket: String,
    precision: Precision,
    compression: Compression,
}

impl WriteClient {
    pub fn new(api: Arc<dyn InfluxApi>, bucket: impl Into<String>, spec: &WorkloadSpec) -> Self {
        Self {
            api,
            bucket: bucket.into(),
            precision: spec.precision(),
            compression: spec.compression(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Encodes and sends `batch`. Encoding happens before the clock starts.
    pub async fn write(&self, batch: &Batch) -> Sample {
        let points = batch.len() as u64;
        let body = match encode_body(&batch.to_line_protocol(), self.compression) {
            Ok(body) => body,
            Err(e) => {
                return Sample::failure(
                    OperationKind::Write,
                    Duration::ZERO,
                    None,
                    format!("failed to encode batch: {e}"),
                )
                .with_points(points)
                .with_target(self.bucket.as_str())
            }
        };
        let bytes = body.bytes.len() as u64;

        let started = Instant::now();
        let result = self.api.write(&self.bucket, self.precision, body).await;
        let sample = sample_from(OperationKind::Write, started, &result);

        sample
            .with_points(points)
            .with_volume(bytes, 0)
            .with_target(self.bucket.as_str())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bddbench_core::{generate, RunId, StopCondition};

    use super::*;
    use crate::mock::{MockFailure, MockInfluxApi};

    fn spec(compression: Compression) -> Arc<WorkloadSpec> {
        Arc::new(
            WorkloadSpec::builder("cpu")
                .batch_size(50)
                .compression(compression)
                .precision(Precision::Ms)
                .stop(StopCondition::Count { total: 1 })
                .build()
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn successful_write_reports_points() {
        let mock = Arc::new(MockInfluxApi::new().with_buckets(["bench"]));
        let spec = spec(Compression::Gzip);
        let client = WriteClient::new(mock.clone(), "bench", &spec);
        let batch = generate(&spec, RunId::new(), 1_000, 0, 0);

        let sample = client.write(&batch).await;
        assert!(sample.is_success());
        assert_eq!(sample.points, 50);
        assert_eq!(sample.target.as_deref(), Some("bench"));
        assert_eq!(mock.point_count("bench"), 50);
    }

    #[tokio::test]
    async fn server_errors_become_failed_samples() {
        let mock = Arc::new(
            MockInfluxApi::new_with_failures(vec![MockFailure::Status(503, "unavailable")])
                .with_buckets(["bench"]),
        );
        let spec = spec(Compression::None);
        let client = WriteClient::new(mock.clone(), "bench", &spec);
        let sample = client.write(&generate(&spec, RunId::new(), 0, 0, 0)).await;
        assert!(sample.is_failure());
        assert_eq!(sample.status(), Some(503));
        assert_eq!(sample.points, 50);
        assert_eq!(mock.point_count("bench"), 0);
    }
}
