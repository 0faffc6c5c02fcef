//! InfluxDB v2 HTTP transport on top of reqwest.

use std::time::Instant;

use async_trait::async_trait;
use bddbench_core::compression::EncodedBody;
use bddbench_core::{EndpointConfig, Precision};
use reqwest::header::{HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::api::{ApiResponse, DeleteRequest, Endpoint, InfluxApi, PointFilter, QueryResponse};
use crate::error::{TransportError, TransportResult};
use crate::flux::{count_flux, sum_value_column, CsvRowCounter};

const MAX_ERROR_BODY: usize = 512;

/// Client for one InfluxDB v2 instance. Cheap to share behind an `Arc`.
pub struct HttpInfluxApi {
    client: Client,
    base_url: String,
    auth: HeaderValue,
    org: String,
    org_id: OnceCell<String>,
}

#[derive(Deserialize)]
struct OrgList {
    #[serde(default)]
    orgs: Vec<OrgEntry>,
}

#[derive(Deserialize)]
struct OrgEntry {
    id: String,
}

#[derive(Deserialize)]
struct BucketList {
    #[serde(default)]
    buckets: Vec<BucketEntry>,
}

#[derive(Deserialize)]
struct BucketEntry {
    id: String,
    name: String,
}

impl HttpInfluxApi {
    /// # Errors
    ///
    /// Returns `TransportError::Request` if the token is not a valid header
    /// value or the HTTP client cannot be built.
    pub fn new(endpoint: &EndpointConfig) -> TransportResult<Self> {
        let client = Client::builder()
            .timeout(endpoint.timeout())
            .build()
            .map_err(|e| TransportError::Request(e.to_string()))?;
        let mut auth = HeaderValue::from_str(&format!("Token {}", endpoint.token))
            .map_err(|e| TransportError::Request(format!("invalid token: {e}")))?;
        auth.set_sensitive(true);

        Ok(Self {
            client,
            base_url: endpoint.url.trim_end_matches('/').to_string(),
            auth,
            org: endpoint.org.clone(),
            org_id: OnceCell::new(),
        })
    }

    fn request(&self, method: Method, endpoint: Endpoint) -> RequestBuilder {
        self.request_path(method, endpoint.path())
    }

    fn request_path(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .header(AUTHORIZATION, self.auth.clone())
    }

    async fn respond(response: Response) -> TransportResult<ApiResponse> {
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(ApiResponse { status, body })
    }

    /// Organization id, looked up once. Bucket creation needs the id, not the name.
    async fn org_id(&self) -> TransportResult<&str> {
        let id = self.org_id.get_or_try_init(|| self.fetch_org_id()).await?;
        Ok(id.as_str())
    }

    async fn fetch_org_id(&self) -> TransportResult<String> {
        let response = self
            .request(Method::GET, Endpoint::Orgs)
            .query(&[("org", self.org.as_str())])
            .send()
            .await?;
        let status = response.status().as_u16();
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Rejected {
                status,
                body: truncate(&body),
            });
        }
        let orgs: OrgList = response.json().await?;
        orgs.orgs
            .into_iter()
            .next()
            .map(|org| org.id)
            .ok_or_else(|| TransportError::Decode(format!("organization `{}` not found", self.org)))
    }

    fn query_body(flux: &str) -> serde_json::Value {
        json!({
            "query": flux,
            "type": "flux",
            "dialect": { "header": true, "annotations": [] },
        })
    }
}

fn truncate(body: &str) -> String {
    body.chars().take(MAX_ERROR_BODY).collect()
}

#[async_trait]
impl InfluxApi for HttpInfluxApi {
    async fn health(&self) -> TransportResult<ApiResponse> {
        let response = self.request(Method::GET, Endpoint::Health).send().await?;
        Self::respond(response).await
    }

    async fn me(&self) -> TransportResult<ApiResponse> {
        let response = self.request(Method::GET, Endpoint::Me).send().await?;
        Self::respond(response).await
    }

    async fn write(
        &self,
        bucket: &str,
        precision: Precision,
        body: EncodedBody,
    ) -> TransportResult<ApiResponse> {
        let mut request = self
            .request(Method::POST, Endpoint::Write)
            .query(&[
                ("org", self.org.as_str()),
                ("bucket", bucket),
                ("precision", precision.as_str()),
            ])
            .header(CONTENT_TYPE, "text/plain; charset=utf-8");
        if body.gzip {
            request = request.header(CONTENT_ENCODING, "gzip");
        }
        let response = request.body(body.bytes).send().await?;
        Self::respond(response).await
    }

    async fn query(&self, flux: &str) -> TransportResult<QueryResponse> {
        let started = Instant::now();
        let mut response = self
            .request(Method::POST, Endpoint::Query)
            .query(&[("org", self.org.as_str())])
            .header(ACCEPT, "application/csv")
            .json(&Self::query_body(flux))
            .send()
            .await?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let body = response.text().await?;
            return Ok(QueryResponse {
                status,
                first_row_after: None,
                bytes: body.len() as u64,
                rows: 0,
                error: Some(truncate(&body)),
            });
        }

        let mut counter = CsvRowCounter::new();
        let mut first_row_after = None;
        let mut bytes = 0_u64;
        while let Some(chunk) = response.chunk().await? {
            bytes += chunk.len() as u64;
            if counter.feed(&chunk) > 0 && first_row_after.is_none() {
                first_row_after = Some(started.elapsed());
            }
        }
        let rows = counter.finish();
        if rows > 0 && first_row_after.is_none() {
            first_row_after = Some(started.elapsed());
        }
        debug!(status, rows, bytes, "Query stream consumed");

        Ok(QueryResponse {
            status,
            first_row_after,
            bytes,
            rows,
            error: None,
        })
    }

    async fn delete(&self, bucket: &str, request: &DeleteRequest) -> TransportResult<ApiResponse> {
        let response = self
            .request(Method::POST, Endpoint::Delete)
            .query(&[("org", self.org.as_str()), ("bucket", bucket)])
            .json(request)
            .send()
            .await?;
        Self::respond(response).await
    }

    async fn create_bucket(&self, name: &str) -> TransportResult<ApiResponse> {
        let org_id = self.org_id().await?.to_string();
        let response = self
            .request(Method::POST, Endpoint::Buckets)
            .json(&json!({ "orgID": org_id, "name": name, "retentionRules": [] }))
            .send()
            .await?;
        let mut response = Self::respond(response).await?;
        // Older servers report duplicates as 422.
        if response.status == 422 && response.body.contains("already exists") {
            response.status = 409;
        }
        Ok(response)
    }

    async fn delete_bucket(&self, name: &str) -> TransportResult<ApiResponse> {
        let org_id = self.org_id().await?.to_string();
        let response = self
            .request(Method::GET, Endpoint::Buckets)
            .query(&[("orgID", org_id.as_str()), ("name", name)])
            .send()
            .await?;
        let status = response.status().as_u16();
        if !response.status().is_success() {
            let body = response.text().await?;
            return Ok(ApiResponse::new(status, body));
        }
        let listing: BucketList = response.json().await?;
        let Some(bucket) = listing.buckets.into_iter().find(|b| b.name == name) else {
            return Ok(ApiResponse::new(404, format!("bucket \"{name}\" not found")));
        };
        let path = format!("{}/{}", Endpoint::Buckets.path(), bucket.id);
        let response = self.request_path(Method::DELETE, &path).send().await?;
        Self::respond(response).await
    }

    async fn create_user(&self, name: &str) -> TransportResult<ApiResponse> {
        let response = self
            .request(Method::POST, Endpoint::Users)
            .json(&json!({ "name": name }))
            .send()
            .await?;
        Self::respond(response).await
    }

    async fn list_users(&self) -> TransportResult<ApiResponse> {
        let response = self.request(Method::GET, Endpoint::Users).send().await?;
        Self::respond(response).await
    }

    async fn delete_user(&self, id: &str) -> TransportResult<ApiResponse> {
        let path = format!("{}/{}", Endpoint::Users.path(), id);
        let response = self.request_path(Method::DELETE, &path).send().await?;
        Self::respond(response).await
    }

    async fn count_points(&self, bucket: &str, filter: PointFilter<'_>) -> TransportResult<u64> {
        let flux = count_flux(bucket, filter.measurement, filter.run_id);
        let response = self
            .request(Method::POST, Endpoint::Query)
            .query(&[("org", self.org.as_str())])
            .header(ACCEPT, "application/csv")
            .json(&Self::query_body(&flux))
            .send()
            .await?;
        let ApiResponse { status, body } = Self::respond(response).await?;
        if !(200..300).contains(&status) {
            return Err(TransportError::Rejected {
                status,
                body: truncate(&body),
            });
        }
        sum_value_column(&body).map_err(TransportError::Decode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(token: &str) -> EndpointConfig {
        EndpointConfig {
            url: "http://localhost:8086/".to_string(),
            token: token.to_string(),
            org: "perf".to_string(),
            bucket: "bench".to_string(),
            timeout_secs: 5,
        }
    }

    #[test]
    fn base_url_drops_trailing_slash() {
        let api = HttpInfluxApi::new(&endpoint("t0ken")).unwrap();
        assert_eq!(api.base_url, "http://localhost:8086");
        assert!(api.auth.is_sensitive());
    }

    #[test]
    fn rejects_tokens_that_are_not_header_safe() {
        assert!(matches!(
            HttpInfluxApi::new(&endpoint("bad\ntoken")),
            Err(TransportError::Request(_))
        ));
    }

    #[tokio::test]
    async fn unreachable_target_is_a_transport_error() {
        let mut config = endpoint("t");
        config.url = "http://127.0.0.1:9".to_string();
        config.timeout_secs = 2;
        let api = HttpInfluxApi::new(&config).unwrap();
        assert!(api.health().await.is_err());
    }
}
