use std::sync::Arc;
use std::time::Instant;

use bddbench_core::{OperationKind, Sample};

use super::sample_from;
use crate::api::InfluxApi;

/// Lightweight GET probes: `/health` or `/api/v2/me`.
#[derive(Clone)]
pub struct ProbeClient {
    api: Arc<dyn InfluxApi>,
    kind: OperationKind,
}

impl ProbeClient {
    pub fn health(api: Arc<dyn InfluxApi>) -> Self {
        Self {
            api,
            kind: OperationKind::Health,
        }
    }

    pub fn me(api: Arc<dyn InfluxApi>) -> Self {
        Self {
            api,
            kind: OperationKind::UserMe,
        }
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub async fn probe(&self) -> Sample {
        let started = Instant::now();
        let result = if self.kind == OperationKind::Health {
            self.api.health().await
        } else {
            self.api.me().await
        };
        sample_from(self.kind, started, &result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Endpoint;
    use crate::mock::MockInfluxApi;

    #[tokio::test]
    async fn probes_hit_their_endpoints() {
        let mock = Arc::new(MockInfluxApi::new());
        assert!(ProbeClient::health(mock.clone()).probe().await.is_success());
        let me = ProbeClient::me(mock.clone()).probe().await;
        assert_eq!(me.kind, OperationKind::UserMe);
        assert_eq!(mock.calls_to(Endpoint::Health), 1);
        assert_eq!(mock.calls_to(Endpoint::Me), 1);
    }

    #[tokio::test]
    async fn unauthorized_me_is_countable() {
        let mock = Arc::new(MockInfluxApi::new());
        mock.deny(Endpoint::Me);
        let sample = ProbeClient::me(mock).probe().await;
        assert_eq!(sample.status(), Some(401));
    }
}
