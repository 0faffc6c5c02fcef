use std::sync::Arc;
use std::time::Instant;

use bddbench_core::{OperationKind, Sample};
use tracing::info;

use super::sample_from;
use crate::api::{DeleteRequest, InfluxApi};

/// Range and predicate deletes, optionally dry.
#[derive(Clone)]
pub struct DeleteClient {
    api: Arc<dyn InfluxApi>,
    dry_run: bool,
}

impl DeleteClient {
    pub fn new(api: Arc<dyn InfluxApi>, dry_run: bool) -> Self {
        Self { api, dry_run }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// In dry-run mode the request is only logged and the sample is skipped.
    pub async fn delete(&self, bucket: &str, request: &DeleteRequest) -> Sample {
        if self.dry_run {
            info!(
                bucket,
                start = %request.start.to_rfc3339(),
                stop = %request.stop.to_rfc3339(),
                predicate = %request.predicate,
                "Dry run, delete not sent"
            );
            return Sample::skipped(OperationKind::Delete).with_target(bucket);
        }

        let started = Instant::now();
        let result = self.api.delete(bucket, request).await;
        sample_from(OperationKind::Delete, started, &result).with_target(bucket)
    }
}

#[cfg(test)]
mod tests {
    use bddbench_core::TimeWindow;

    use super::*;
    use crate::api::Endpoint;
    use crate::mock::MockInfluxApi;

    fn request() -> DeleteRequest {
        let window = TimeWindow::everything();
        DeleteRequest {
            start: window.start,
            stop: window.stop,
            predicate: "_measurement=\"cpu\"".to_string(),
        }
    }

    #[tokio::test]
    async fn dry_run_makes_no_call() {
        let mock = Arc::new(MockInfluxApi::new().with_buckets(["bench"]));
        let sample = DeleteClient::new(mock.clone(), true)
            .delete("bench", &request())
            .await;
        assert!(sample.is_skipped());
        assert_eq!(mock.calls_to(Endpoint::Delete), 0);
    }

    #[tokio::test]
    async fn delete_against_missing_bucket_fails() {
        let mock = Arc::new(MockInfluxApi::new());
        let sample = DeleteClient::new(mock, false)
            .delete("missing", &request())
            .await;
        assert_eq!(sample.status(), Some(404));
    }
}
