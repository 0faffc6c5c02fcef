//! In-memory InfluxDB target for tests
//!
//! Stores written points per bucket, honours run-scoped deletes and point
//! counts, and injects failures so engine behaviour can be verified without a
//! running database.
//!
//! # Features
//!
//! - **Deterministic Failures**: queued status codes or transport errors,
//!   consumed one per call
//! - **Denied Endpoints**: every call to an endpoint answers 401
//! - **Call History**: every call is recorded for assertions
//! - **Latency Simulation**: fixed delay per call
//!
//! # Examples
//!
//! ```rust
//! use bddbench_client::mock::{MockFailure, MockInfluxApi};
//! use bddbench_client::InfluxApi;
//!
//! # async fn example() {
//! let mock = MockInfluxApi::new_with_failures(vec![MockFailure::Status(503, "unavailable")]);
//! assert_eq!(mock.health().await.unwrap().status, 503);
//! assert_eq!(mock.health().await.unwrap().status, 200);
//! # }
//! ```

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bddbench_core::compression::{decode_body, EncodedBody};
use bddbench_core::{line_protocol, Point, Precision};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::json;
use uuid::Uuid;

use crate::api::{ApiResponse, DeleteRequest, Endpoint, InfluxApi, PointFilter, QueryResponse};
use crate::error::{TransportError, TransportResult};
use crate::predicate::DeletePredicate;

/// One queued call outcome.
#[derive(Debug, Clone)]
pub enum MockFailure {
    /// The target answers with this status and body.
    Status(u16, &'static str),
    /// No response at all.
    Transport(&'static str),
    /// The call is served normally.
    Ok,
}

#[derive(Debug, Clone)]
pub struct MockConfig {
    /// Delay applied before every call is served.
    pub latency: Duration,
    pub track_history: bool,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            latency: Duration::ZERO,
            track_history: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CallHistoryEntry {
    pub endpoint: Endpoint,
    /// Bucket, user id or empty.
    pub target: String,
    /// `None` for injected transport errors.
    pub status: Option<u16>,
    pub timestamp: Instant,
}

/// Point as stored by the mock, timestamp normalized to nanoseconds.
type StoredPoint = Point;

pub struct MockInfluxApi {
    buckets: RwLock<HashMap<String, Vec<StoredPoint>>>,
    users: RwLock<BTreeMap<String, String>>,
    failure_queue: RwLock<VecDeque<MockFailure>>,
    denied: RwLock<HashSet<Endpoint>>,
    rejected_buckets: RwLock<HashMap<String, u16>>,
    config: MockConfig,
    call_history: RwLock<Vec<CallHistoryEntry>>,
}

impl Default for MockInfluxApi {
    fn default() -> Self {
        Self::new()
    }
}

impl MockInfluxApi {
    pub fn new() -> Self {
        Self::new_with_config(MockConfig::default())
    }

    pub fn new_with_config(config: MockConfig) -> Self {
        Self {
            buckets: RwLock::new(HashMap::new()),
            users: RwLock::new(BTreeMap::new()),
            failure_queue: RwLock::new(VecDeque::new()),
            denied: RwLock::new(HashSet::new()),
            rejected_buckets: RwLock::new(HashMap::new()),
            config,
            call_history: RwLock::new(Vec::new()),
        }
    }

    /// Failures are consumed in order by every call except `count_points`.
    /// Once the queue is empty all calls are served.
    pub fn new_with_failures(pattern: Vec<MockFailure>) -> Self {
        let mock = Self::new();
        *mock.failure_queue.write() = pattern.into();
        mock
    }

    /// Pre-creates buckets.
    #[must_use]
    pub fn with_buckets<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        {
            let mut buckets = self.buckets.write();
            for name in names {
                buckets.entry(name.into()).or_default();
            }
        }
        self
    }

    pub fn push_failures(&self, failures: impl IntoIterator<Item = MockFailure>) {
        self.failure_queue.write().extend(failures);
    }

    /// Every later call to `endpoint` answers 401.
    pub fn deny(&self, endpoint: Endpoint) {
        self.denied.write().insert(endpoint);
    }

    /// Creating `bucket` answers `status`.
    pub fn reject_bucket(&self, bucket: impl Into<String>, status: u16) {
        self.rejected_buckets.write().insert(bucket.into(), status);
    }

    pub fn call_history(&self) -> Vec<CallHistoryEntry> {
        self.call_history.read().clone()
    }

    pub fn calls_to(&self, endpoint: Endpoint) -> usize {
        self.call_history
            .read()
            .iter()
            .filter(|entry| entry.endpoint == endpoint)
            .count()
    }

    pub fn bucket_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.buckets.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn point_count(&self, bucket: &str) -> usize {
        self.buckets.read().get(bucket).map_or(0, Vec::len)
    }

    pub fn points(&self, bucket: &str) -> Vec<Point> {
        self.buckets.read().get(bucket).cloned().unwrap_or_default()
    }

    pub fn user_count(&self) -> usize {
        self.users.read().len()
    }

    fn record(&self, endpoint: Endpoint, target: &str, status: Option<u16>) {
        if self.config.track_history {
            self.call_history.write().push(CallHistoryEntry {
                endpoint,
                target: target.to_string(),
                status,
                timestamp: Instant::now(),
            });
        }
    }

    /// Applies latency, denial and queued failures. `Some` short-circuits the call.
    async fn intercept(&self, endpoint: Endpoint, target: &str) -> Option<TransportResult<ApiResponse>> {
        if !self.config.latency.is_zero() {
            tokio::time::sleep(self.config.latency).await;
        }
        if self.denied.read().contains(&endpoint) {
            self.record(endpoint, target, Some(401));
            return Some(Ok(ApiResponse::new(
                401,
                r#"{"code":"unauthorized","message":"unauthorized access"}"#,
            )));
        }
        let failure = self.failure_queue.write().pop_front();
        match failure {
            Some(MockFailure::Status(status, body)) => {
                self.record(endpoint, target, Some(status));
                Some(Ok(ApiResponse::new(status, body)))
            }
            Some(MockFailure::Transport(message)) => {
                self.record(endpoint, target, None);
                Some(Err(TransportError::Connect(message.to_string())))
            }
            Some(MockFailure::Ok) | None => None,
        }
    }

    fn serve(&self, endpoint: Endpoint, target: &str, response: ApiResponse) -> TransportResult<ApiResponse> {
        self.record(endpoint, target, Some(response.status));
        Ok(response)
    }

    fn not_found(bucket: &str) -> ApiResponse {
        ApiResponse::new(
            404,
            json!({ "code": "not found", "message": format!("bucket \"{bucket}\" not found") })
                .to_string(),
        )
    }

    fn ingest(&self, bucket: &str, precision: Precision, body: &EncodedBody) -> ApiResponse {
        let text = match decode_body(&body.bytes, body.gzip) {
            Ok(text) => text,
            Err(e) => return ApiResponse::new(400, format!("undecodable body: {e}")),
        };
        let now = precision.now();
        let mut points = match line_protocol::parse_body(&text, now) {
            Ok(points) => points,
            Err(e) => return ApiResponse::new(400, e),
        };
        let scale = Precision::Ns.units_per_second() / precision.units_per_second();
        for point in &mut points {
            point.timestamp = point.timestamp.saturating_mul(scale);
        }

        let mut buckets = self.buckets.write();
        let Some(stored) = buckets.get_mut(bucket) else {
            return Self::not_found(bucket);
        };
        stored.extend(points);
        ApiResponse::new(204, "")
    }

    fn matches(point: &StoredPoint, equalities: &[(String, String)]) -> bool {
        equalities.iter().all(|(key, value)| {
            if key == "_measurement" {
                &point.measurement == value
            } else {
                point.tags.get(key) == Some(value)
            }
        })
    }

    fn nanos(at: DateTime<Utc>) -> i64 {
        at.timestamp_nanos_opt().unwrap_or(if at.timestamp() < 0 { i64::MIN } else { i64::MAX })
    }

    fn remove(&self, bucket: &str, request: &DeleteRequest) -> ApiResponse {
        let Some(equalities) = DeletePredicate::parse_equalities(&request.predicate) else {
            return ApiResponse::new(
                400,
                format!("unsupported predicate `{}`", request.predicate),
            );
        };
        let start = Self::nanos(request.start);
        let stop = Self::nanos(request.stop);

        let mut buckets = self.buckets.write();
        let Some(stored) = buckets.get_mut(bucket) else {
            return Self::not_found(bucket);
        };
        stored.retain(|point| {
            let in_range = point.timestamp >= start && point.timestamp <= stop;
            !(in_range && Self::matches(point, &equalities))
        });
        ApiResponse::new(204, "")
    }

    /// Answers a Flux query with one CSV row per matching `value` point.
    fn answer(&self, flux: &str) -> QueryResponse {
        let bucket = extract_quoted(flux, "from(bucket: \"");
        let measurement = extract_quoted(flux, "r[\"_measurement\"] == \"");
        let limit = extract_number(flux, "limit(n: ").unwrap_or(usize::MAX);

        let buckets = self.buckets.read();
        let Some(stored) = bucket.as_deref().and_then(|b| buckets.get(b)) else {
            let body = Self::not_found(bucket.as_deref().unwrap_or_default()).body;
            return QueryResponse {
                status: 404,
                first_row_after: None,
                bytes: body.len() as u64,
                rows: 0,
                error: Some(body),
            };
        };

        let mut csv = String::from(",result,table,_time,_value,_field,_measurement\r\n");
        let mut rows = 0_u64;
        for (point, value) in stored
            .iter()
            .filter(|p| measurement.as_deref().map_or(true, |m| p.measurement == m))
            .filter_map(|p| p.fields.get("value").and_then(|v| v.as_f64()).map(|v| (p, v)))
            .take(limit)
        {
            csv.push_str(&format!(
                ",_result,0,{},{},value,{}\r\n",
                point.timestamp, value, point.measurement
            ));
            rows += 1;
        }

        QueryResponse {
            status: 200,
            first_row_after: (rows > 0).then_some(Duration::ZERO),
            bytes: csv.len() as u64,
            rows,
            error: None,
        }
    }
}

fn extract_quoted(haystack: &str, prefix: &str) -> Option<String> {
    let start = haystack.find(prefix)? + prefix.len();
    let rest = &haystack[start..];
    let end = rest.find('"')?;
    Some(rest[..end].to_string())
}

fn extract_number(haystack: &str, prefix: &str) -> Option<usize> {
    let start = haystack.find(prefix)? + prefix.len();
    let digits: String = haystack[start..]
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

#[async_trait]
impl InfluxApi for MockInfluxApi {
    async fn health(&self) -> TransportResult<ApiResponse> {
        if let Some(short) = self.intercept(Endpoint::Health, "").await {
            return short;
        }
        self.serve(
            Endpoint::Health,
            "",
            ApiResponse::new(200, r#"{"name":"influxdb","status":"pass"}"#),
        )
    }

    async fn me(&self) -> TransportResult<ApiResponse> {
        if let Some(short) = self.intercept(Endpoint::Me, "").await {
            return short;
        }
        self.serve(
            Endpoint::Me,
            "",
            ApiResponse::new(200, r#"{"id":"0000000000000001","name":"bench"}"#),
        )
    }

    async fn write(
        &self,
        bucket: &str,
        precision: Precision,
        body: EncodedBody,
    ) -> TransportResult<ApiResponse> {
        if let Some(short) = self.intercept(Endpoint::Write, bucket).await {
            return short;
        }
        let response = self.ingest(bucket, precision, &body);
        self.serve(Endpoint::Write, bucket, response)
    }

    async fn query(&self, flux: &str) -> TransportResult<QueryResponse> {
        let started = Instant::now();
        if let Some(short) = self.intercept(Endpoint::Query, "").await {
            let response = short?;
            return Ok(QueryResponse {
                status: response.status,
                first_row_after: None,
                bytes: response.body.len() as u64,
                rows: 0,
                error: Some(response.body),
            });
        }
        let mut response = self.answer(flux);
        if response.first_row_after.is_some() {
            response.first_row_after = Some(started.elapsed());
        }
        self.record(Endpoint::Query, "", Some(response.status));
        Ok(response)
    }

    async fn delete(&self, bucket: &str, request: &DeleteRequest) -> TransportResult<ApiResponse> {
        if let Some(short) = self.intercept(Endpoint::Delete, bucket).await {
            return short;
        }
        let response = self.remove(bucket, request);
        self.serve(Endpoint::Delete, bucket, response)
    }

    async fn create_bucket(&self, name: &str) -> TransportResult<ApiResponse> {
        if let Some(short) = self.intercept(Endpoint::Buckets, name).await {
            return short;
        }
        let rejected = self.rejected_buckets.read().get(name).copied();
        if let Some(status) = rejected {
            return self.serve(
                Endpoint::Buckets,
                name,
                ApiResponse::new(status, "bucket creation rejected"),
            );
        }
        let response = {
            let mut buckets = self.buckets.write();
            if buckets.contains_key(name) {
                ApiResponse::new(
                    409,
                    json!({ "code": "conflict", "message": format!("bucket with name {name} already exists") })
                        .to_string(),
                )
            } else {
                buckets.insert(name.to_string(), Vec::new());
                ApiResponse::new(
                    201,
                    json!({ "id": Uuid::new_v4().simple().to_string(), "name": name }).to_string(),
                )
            }
        };
        self.serve(Endpoint::Buckets, name, response)
    }

    async fn delete_bucket(&self, name: &str) -> TransportResult<ApiResponse> {
        if let Some(short) = self.intercept(Endpoint::Buckets, name).await {
            return short;
        }
        let removed = self.buckets.write().remove(name).is_some();
        let response = if removed {
            ApiResponse::new(204, "")
        } else {
            Self::not_found(name)
        };
        self.serve(Endpoint::Buckets, name, response)
    }

    async fn create_user(&self, name: &str) -> TransportResult<ApiResponse> {
        if let Some(short) = self.intercept(Endpoint::Users, name).await {
            return short;
        }
        let id = Uuid::new_v4().simple().to_string()[..16].to_string();
        self.users.write().insert(id.clone(), name.to_string());
        self.serve(
            Endpoint::Users,
            &id,
            ApiResponse::new(
                201,
                json!({ "id": id, "name": name, "status": "active" }).to_string(),
            ),
        )
    }

    async fn list_users(&self) -> TransportResult<ApiResponse> {
        if let Some(short) = self.intercept(Endpoint::Users, "").await {
            return short;
        }
        let users: Vec<_> = self
            .users
            .read()
            .iter()
            .map(|(id, name)| json!({ "id": id, "name": name }))
            .collect();
        self.serve(
            Endpoint::Users,
            "",
            ApiResponse::new(200, json!({ "users": users }).to_string()),
        )
    }

    async fn delete_user(&self, id: &str) -> TransportResult<ApiResponse> {
        if let Some(short) = self.intercept(Endpoint::Users, id).await {
            return short;
        }
        let response = if self.users.write().remove(id).is_some() {
            ApiResponse::new(204, "")
        } else {
            ApiResponse::new(404, r#"{"code":"not found","message":"user not found"}"#)
        };
        self.serve(Endpoint::Users, id, response)
    }

    async fn count_points(&self, bucket: &str, filter: PointFilter<'_>) -> TransportResult<u64> {
        let buckets = self.buckets.read();
        let Some(stored) = buckets.get(bucket) else {
            return Err(TransportError::Rejected {
                status: 404,
                body: Self::not_found(bucket).body,
            });
        };
        let count = stored
            .iter()
            .filter(|p| p.measurement == filter.measurement)
            .filter(|p| filter.run_id.map_or(true, |id| p.tags.get("run_id").map(String::as_str) == Some(id)))
            .filter(|p| p.fields.contains_key("value"))
            .count();
        Ok(count as u64)
    }
}
