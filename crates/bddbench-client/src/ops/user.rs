use std::sync::Arc;
use std::time::Instant;

use bddbench_core::{OperationKind, Sample};
use serde::Deserialize;

use super::sample_from;
use crate::api::InfluxApi;

#[derive(Deserialize)]
struct CreatedUser {
    id: String,
}

/// User create/list/delete. A 401 is an ordinary failed sample.
#[derive(Clone)]
pub struct UserClient {
    api: Arc<dyn InfluxApi>,
}

impl UserClient {
    pub fn new(api: Arc<dyn InfluxApi>) -> Self {
        Self { api }
    }

    /// Returns the sample and, on success, the new user's id.
    pub async fn create(&self, name: &str) -> (Sample, Option<String>) {
        let started = Instant::now();
        let result = self.api.create_user(name).await;
        let mut sample = sample_from(OperationKind::UserCreate, started, &result);

        let id = match &result {
            Ok(response) if sample.is_success() => {
                match serde_json::from_str::<CreatedUser>(&response.body) {
                    Ok(user) => Some(user.id),
                    Err(e) => {
                        sample = Sample::failure(
                            OperationKind::UserCreate,
                            sample.duration,
                            Some(response.status),
                            format!("user created but response has no id: {e}"),
                        );
                        None
                    }
                }
            }
            _ => None,
        };
        (sample, id)
    }

    pub async fn list(&self) -> Sample {
        let started = Instant::now();
        let result = self.api.list_users().await;
        sample_from(OperationKind::UserList, started, &result)
    }

    pub async fn delete(&self, id: &str) -> Sample {
        let started = Instant::now();
        let result = self.api.delete_user(id).await;
        sample_from(OperationKind::UserDelete, started, &result).with_target(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Endpoint;
    use crate::mock::MockInfluxApi;

    #[tokio::test]
    async fn create_list_delete_lifecycle() {
        let mock = Arc::new(MockInfluxApi::new());
        let client = UserClient::new(mock.clone());

        let (sample, id) = client.create("bench-user").await;
        assert!(sample.is_success());
        let id = id.unwrap();
        assert_eq!(mock.user_count(), 1);

        assert!(client.list().await.is_success());
        assert!(client.delete(&id).await.is_success());
        assert_eq!(mock.user_count(), 0);
        assert_eq!(client.delete(&id).await.status(), Some(404));
    }

    #[tokio::test]
    async fn permission_denied_is_not_fatal() {
        let mock = Arc::new(MockInfluxApi::new());
        mock.deny(Endpoint::Users);
        let client = UserClient::new(mock);
        let (sample, id) = client.create("bench-user").await;
        assert_eq!(sample.status(), Some(401));
        assert!(id.is_none());
        assert_eq!(client.list().await.status(), Some(401));
    }
}
