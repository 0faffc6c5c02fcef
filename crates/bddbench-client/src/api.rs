//! Transport seam between operation clients and an InfluxDB v2 HTTP API.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bddbench_core::compression::EncodedBody;
use bddbench_core::Precision;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TransportResult;

/// Endpoint families, used for logging and by the mock target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Health,
    Me,
    Write,
    Query,
    Delete,
    Buckets,
    Orgs,
    Users,
}

impl Endpoint {
    #[must_use]
    pub const fn path(self) -> &'static str {
        match self {
            Self::Health => "/health",
            Self::Me => "/api/v2/me",
            Self::Write => "/api/v2/write",
            Self::Query => "/api/v2/query",
            Self::Delete => "/api/v2/delete",
            Self::Buckets => "/api/v2/buckets",
            Self::Orgs => "/api/v2/orgs",
            Self::Users => "/api/v2/users",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

/// Status line and body of a completed call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    #[must_use]
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// `2xx` -> `"2xx"`, used as the `status_class` KPI tag.
    #[must_use]
    pub fn status_class(&self) -> String {
        format!("{}xx", self.status / 100)
    }
}

/// Outcome of a streamed query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryResponse {
    pub status: u16,
    /// Elapsed time from dispatch until the first data row was complete.
    pub first_row_after: Option<Duration>,
    pub bytes: u64,
    pub rows: u64,
    /// Body of a failed query, truncated.
    pub error: Option<String>,
}

/// Body of `POST /api/v2/delete`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteRequest {
    pub start: DateTime<Utc>,
    pub stop: DateTime<Utc>,
    /// Empty predicate deletes everything in the range.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub predicate: String,
}

/// Points selected by measurement and, optionally, run id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointFilter<'a> {
    pub measurement: &'a str,
    pub run_id: Option<&'a str>,
}

/// Calls a benchmark issues against the database under test.
///
/// Implementations must be cheap to share across workers (`Arc<dyn InfluxApi>`).
/// `Err` means no HTTP response was obtained; any status code, including
/// 401 and 5xx, is returned as `Ok`.
#[async_trait]
pub trait InfluxApi: Send + Sync {
    async fn health(&self) -> TransportResult<ApiResponse>;

    async fn me(&self) -> TransportResult<ApiResponse>;

    async fn write(
        &self,
        bucket: &str,
        precision: Precision,
        body: EncodedBody,
    ) -> TransportResult<ApiResponse>;

    /// Runs a Flux query, consuming the CSV response as a stream.
    async fn query(&self, flux: &str) -> TransportResult<QueryResponse>;

    async fn delete(&self, bucket: &str, request: &DeleteRequest) -> TransportResult<ApiResponse>;

    /// Creates a bucket. Implementations map "already exists" to 409.
    async fn create_bucket(&self, name: &str) -> TransportResult<ApiResponse>;

    /// Deletes a bucket by name. A missing bucket answers 404.
    async fn delete_bucket(&self, name: &str) -> TransportResult<ApiResponse>;

    /// Creates a user; a successful body is the user JSON with an `id`.
    async fn create_user(&self, name: &str) -> TransportResult<ApiResponse>;

    async fn list_users(&self) -> TransportResult<ApiResponse>;

    async fn delete_user(&self, id: &str) -> TransportResult<ApiResponse>;

    /// Number of `value` field points matching `filter` in `bucket`.
    async fn count_points(&self, bucket: &str, filter: PointFilter<'_>) -> TransportResult<u64>;
}
