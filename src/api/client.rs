//! Librarian backend API client
//!
//! Thin HTTP client for the Data Librarian backend. Every operation
//! returns the uniform `ApiResponse` envelope; transport failures are
//! folded into failure envelopes instead of being raised, so callers
//! never see a raw HTTP error.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use super::errors::ApiError;
use super::types::{
    ApiResponse, CatalogCard, Config, JobCancel, JobLaunch, JobOutput, JobStatus, SaveConfigReply,
    ServerStatus,
};

/// Default backend address when `LIBRARIAN_API` is not set
pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8000";

/// HTTP client timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Network-facing operations the cache coordinator depends on.
///
/// The coordinator owns no transport logic of its own; it sees the backend
/// only through this trait, which also keeps it testable against a
/// scripted fake.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetch backend status (carries the startup identifier)
    async fn get_server_status(&self) -> ApiResponse<ServerStatus>;

    /// Fetch catalog cards for a path
    async fn get_library_files(&self, path: &str) -> ApiResponse<Vec<CatalogCard>>;

    /// Fetch the full configuration
    async fn get_config(&self) -> ApiResponse<Config>;

    /// Persist a configuration server-side
    async fn save_config(&self, config: &Config) -> ApiResponse<SaveConfigReply>;
}

/// HTTP client for the librarian backend API
#[derive(Clone)]
pub struct ApiClient {
    http_client: Client,
    base_url: String,
}

impl ApiClient {
    /// Create a client for the given base URL (trailing slash optional)
    pub fn new(base_url: &str) -> Result<Self, ApiError> {
        let http_client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(ApiError::from)?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Build the catalog listing query, percent-encoding the path
    fn files_query(path: &str) -> String {
        format!("/api/library/files?path={}", urlencoding::encode(path))
    }

    /// GET a JSON payload from the backend
    async fn get_json<T: DeserializeOwned>(&self, path_and_query: &str) -> Result<T, ApiError> {
        let url = format!("{}{}", self.base_url, path_and_query);
        debug!(url = %url, "GET");

        let response = self.http_client.get(&url).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::from_status(status.as_u16(), &body));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }

    /// POST a JSON body and decode the JSON reply
    async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "POST");

        let response = self.http_client.post(&url).json(body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::from_status(status.as_u16(), &body));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }

    /// Fold a transport result into a response envelope
    fn envelope<T>(operation: &str, result: Result<T, ApiError>) -> ApiResponse<T> {
        match result {
            Ok(data) => ApiResponse::ok(data),
            Err(e) => {
                warn!(operation = operation, error = %e, "API request failed");
                ApiResponse::err(e.to_string())
            }
        }
    }

    // --- Job control (pass-through, never cached) ---

    /// Launch the duplicate-weeding job
    pub async fn run_weeding(&self) -> ApiResponse<JobLaunch> {
        Self::envelope("run_weeding", self.get_json("/run_script").await)
    }

    /// Ask a running job to stop at the next file boundary
    pub async fn cancel_weeding(&self) -> ApiResponse<JobCancel> {
        Self::envelope("cancel_weeding", self.get_json("/cancel_script").await)
    }

    /// Check whether a job is currently running
    pub async fn check_job_status(&self) -> ApiResponse<JobStatus> {
        Self::envelope("check_job_status", self.get_json("/check_status").await)
    }

    /// Drain buffered job output and progress counters
    pub async fn fetch_job_output(&self) -> ApiResponse<JobOutput> {
        Self::envelope("fetch_job_output", self.get_json("/get_output").await)
    }
}

#[async_trait]
impl Transport for ApiClient {
    async fn get_server_status(&self) -> ApiResponse<ServerStatus> {
        Self::envelope("get_server_status", self.get_json("/").await)
    }

    async fn get_library_files(&self, path: &str) -> ApiResponse<Vec<CatalogCard>> {
        let query = Self::files_query(path);
        Self::envelope("get_library_files", self.get_json(&query).await)
    }

    async fn get_config(&self) -> ApiResponse<Config> {
        Self::envelope("get_config", self.get_json("/api/config").await)
    }

    async fn save_config(&self, config: &Config) -> ApiResponse<SaveConfigReply> {
        Self::envelope("save_config", self.post_json("/api/config", config).await)
    }
}
