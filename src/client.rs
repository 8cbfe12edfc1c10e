use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;

use crate::api::ImageApi;
use crate::config::{ClientConfig, FALLBACK_AUTH_KEY};
use crate::error::{Result, StudioError};
use crate::media;
use crate::types::*;

const AUTH_HEADER: &str = "X-Auth-Key";

fn normalize(endpoint: String) -> String {
    endpoint.trim_end_matches('/').to_string()
}

/// Pull FastAPI's `detail` out of an error body, falling back to the raw text.
fn error_detail(body: &str) -> String {
    let detail = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|json| json.get("detail").cloned());
    match detail {
        Some(Value::String(s)) => s,
        // Validation errors: [{"loc": [...], "msg": "..."}]
        Some(Value::Array(errors)) => errors
            .iter()
            .filter_map(|e| e.get("msg").and_then(|m| m.as_str()))
            .collect::<Vec<_>>()
            .join("; "),
        _ => body.trim().to_string(),
    }
}

/// Async client for a Z-Image API server.
///
/// Thin wrapper over the REST surface: generation, task and batch status,
/// cancellation, history listing and deletion. Every request carries the
/// `X-Auth-Key` header.
///
/// # Example
/// ```no_run
/// use zimage_studio::ZImageClient;
///
/// # async fn example() -> zimage_studio::Result<()> {
/// let client = ZImageClient::new("http://127.0.0.1:8000").with_auth_key("my-key");
/// let health = client.health().await?;
/// println!("{}", health.status);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ZImageClient {
    http: Client,
    endpoint: String,
    auth_key: String,
    timeout: Duration,
}

impl ZImageClient {
    /// Create a new client pointing at the given API endpoint.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            endpoint: normalize(endpoint.into()),
            auth_key: FALLBACK_AUTH_KEY.to_string(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Create a client from a [`ClientConfig`].
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            http: Client::new(),
            endpoint: normalize(config.endpoint.clone()),
            auth_key: config.effective_auth_key().to_string(),
            timeout: config.request_timeout,
        }
    }

    /// Use a custom `reqwest::Client` (for connection pooling, proxies, TLS).
    pub fn with_http_client(mut self, client: Client) -> Self {
        self.http = client;
        self
    }

    /// Set the API key sent as `X-Auth-Key`.
    pub fn with_auth_key(mut self, key: impl Into<String>) -> Self {
        self.auth_key = key.into();
        self
    }

    /// Returns the configured endpoint URL.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Returns the key sent with each request.
    pub fn auth_key(&self) -> &str {
        &self.auth_key
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.http
            .get(format!("{}{}", self.endpoint, path))
            .header(AUTH_HEADER, &self.auth_key)
            .timeout(self.timeout)
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.http
            .post(format!("{}{}", self.endpoint, path))
            .header(AUTH_HEADER, &self.auth_key)
            .timeout(self.timeout)
    }

    fn delete(&self, path: &str) -> RequestBuilder {
        self.http
            .delete(format!("{}{}", self.endpoint, path))
            .header(AUTH_HEADER, &self.auth_key)
            .timeout(self.timeout)
    }

    async fn send(&self, request: RequestBuilder, context: &str) -> Result<Response> {
        let resp = request.send().await.map_err(|e| StudioError::Network {
            context: format!(
                "{} ({} unreachable \u{2014} is the API running?)",
                context, self.endpoint
            ),
            source: e,
        })?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body_text = resp.text().await.unwrap_or_default();
            return Err(StudioError::Http {
                status,
                body: error_detail(&body_text),
            });
        }
        Ok(resp)
    }

    async fn read_json<T: DeserializeOwned>(&self, resp: Response, context: &str) -> Result<T> {
        let text = resp.text().await.map_err(|e| StudioError::Network {
            context: format!("Failed to read {} response", context),
            source: e,
        })?;
        Ok(serde_json::from_str(&text)?)
    }

    // ── Health ──────────────────────────────────────────────────────

    /// Check the API via `/health`.
    pub async fn health(&self) -> Result<HealthStatus> {
        let resp = self
            .send(self.get("/health").timeout(Duration::from_secs(5)), "Health check failed")
            .await?;
        self.read_json(resp, "health").await
    }

    // ── Generation ──────────────────────────────────────────────────

    /// Queue one image generation. Returns the new task id.
    pub async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse> {
        let resp = self
            .send(
                self.post("/v1/images/generate").json(request),
                "Failed to submit generation",
            )
            .await?;
        let body: GenerateResponse = self.read_json(resp, "generate").await?;
        if body.task_id.is_empty() {
            return Err(StudioError::InvalidResponse(
                "Response missing task_id".into(),
            ));
        }
        Ok(body)
    }

    /// Fetch the status of a single task.
    pub async fn task_status(&self, task_id: &str) -> Result<TaskStatus> {
        let resp = self
            .send(
                self.get(&format!("/v1/tasks/{}", task_id)),
                "Failed to fetch task status",
            )
            .await?;
        self.read_json(resp, "task status").await
    }

    /// Ask the backend to revoke a queued or running task.
    pub async fn cancel_task(&self, task_id: &str) -> Result<TaskActionResponse> {
        let resp = self
            .send(
                self.post(&format!("/v1/tasks/{}/cancel", task_id)),
                "Failed to cancel task",
            )
            .await?;
        self.read_json(resp, "cancel").await
    }

    // ── History ─────────────────────────────────────────────────────

    /// Fetch a batch and its items.
    pub async fn batch_detail(&self, batch_id: &str) -> Result<BatchDetail> {
        let resp = self
            .send(
                self.get(&format!("/v1/history/{}", batch_id)),
                "Failed to fetch batch status",
            )
            .await?;
        self.read_json(resp, "batch detail").await
    }

    /// List past batches, newest first. `limit` is clamped to 1..=50.
    pub async fn list_history(&self, limit: u32, offset: u32) -> Result<Vec<BatchSummary>> {
        let limit = limit.clamp(1, 50);
        let resp = self
            .send(
                self.get("/v1/history")
                    .query(&[("limit", limit), ("offset", offset)]),
                "Failed to fetch history",
            )
            .await?;
        self.read_json(resp, "history").await
    }

    /// Delete a past batch.
    pub async fn delete_history(&self, batch_id: &str) -> Result<TaskActionResponse> {
        let resp = self
            .send(
                self.delete(&format!("/v1/history/{}", batch_id)),
                "Failed to delete history entry",
            )
            .await?;
        self.read_json(resp, "delete").await
    }

    // ── Image download ──────────────────────────────────────────────

    /// Download the full-quality version of an image URL. Returns raw bytes.
    pub async fn image(&self, url: &str) -> Result<Vec<u8>> {
        let full = media::resolve_image_url(&self.endpoint, &media::download_url(url));
        let resp = self
            .send(
                self.http
                    .get(&full)
                    .header(AUTH_HEADER, &self.auth_key)
                    .timeout(Duration::from_secs(60)),
                &format!("Failed to fetch image {}", media::file_name(url)),
            )
            .await?;
        let bytes = resp.bytes().await.map_err(|e| StudioError::Network {
            context: "Failed to read image bytes".into(),
            source: e,
        })?;
        Ok(bytes.to_vec())
    }
}

impl ImageApi for ZImageClient {
    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse> {
        ZImageClient::generate(self, request).await
    }

    async fn batch_detail(&self, batch_id: &str) -> Result<BatchDetail> {
        ZImageClient::batch_detail(self, batch_id).await
    }

    async fn cancel_task(&self, task_id: &str) -> Result<TaskActionResponse> {
        ZImageClient::cancel_task(self, task_id).await
    }

    async fn list_history(&self, limit: u32, offset: u32) -> Result<Vec<BatchSummary>> {
        ZImageClient::list_history(self, limit, offset).await
    }

    async fn delete_history(&self, batch_id: &str) -> Result<TaskActionResponse> {
        ZImageClient::delete_history(self, batch_id).await
    }
}
