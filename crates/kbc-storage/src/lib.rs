//! Keboola Storage API client.
//!
//! Thin async wrapper around the Storage REST API (`/v2/storage/...`) used by
//! the workspace query core and the tool handlers. It covers workspace
//! metadata, the workspace query proxy, bucket/table metadata and token
//! verification. Components and their configurations live in [`components`],
//! the Jobs Queue API in [`jobs`].

pub mod components;
pub mod jobs;
mod models;

use std::{fmt, time::Duration};

use reqwest::{header, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, instrument};

pub use components::{Component, ComponentType, Configuration, NewConfiguration};
pub use jobs::{JobDetail, JobListItem, JobSearch, JobStatus, JobsClient, SortOrder};
pub use models::{
    BucketInfo, MetadataEntry, Organization, ProjectOwner, SourceProject, SourceTable,
    TableDetail, TokenInfo, WorkspaceConnection, WorkspaceRecord,
};

/// Storage API stack used when the configuration does not name one.
pub const DEFAULT_STORAGE_API_URL: &str = "https://connection.keboola.com";

/// Header carrying the Storage API token on every request.
pub const TOKEN_HEADER: &str = "X-StorageApi-Token";

/// Upper bound for a single HTTP round trip, workspace queries included.
const REQUEST_TIMEOUT_SECS: u64 = 300;

/// Errors raised by the HTTP clients. None of these carry query-level
/// failures: the query proxy reports those inside a successful response body.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} responded with HTTP {status}: {body}")]
    Status {
        url: String,
        status: StatusCode,
        body: String,
    },
    #[error("failed to decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid API url '{0}'")]
    InvalidUrl(String),
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

impl StorageError {
    /// True for HTTP 401/403, i.e. a token problem rather than a network one.
    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            StorageError::Status { status, .. }
                if *status == StatusCode::UNAUTHORIZED || *status == StatusCode::FORBIDDEN
        )
    }

    /// True for HTTP 404.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::Status { status, .. } if *status == StatusCode::NOT_FOUND)
    }
}

/// Storage API client bound to one token and one stack.
#[derive(Clone)]
pub struct StorageClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl fmt::Debug for StorageClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageClient")
            .field("base_url", &self.base_url)
            .field("token", &"****")
            .finish()
    }
}

impl StorageClient {
    /// Creates a client for the given stack. A URL without scheme is treated
    /// as `https://`.
    pub fn new(token: impl Into<String>, base_url: &str) -> Result<Self, StorageError> {
        Ok(Self {
            http: build_http_client()?,
            base_url: normalize_base_url(base_url)?,
            token: token.into(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn token(&self) -> &str {
        &self.token
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/v2/storage/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Issues a GET against `/v2/storage/{path}` and decodes the JSON body.
    #[instrument(skip(self), level = "debug")]
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, StorageError> {
        let url = self.endpoint(path);
        let response = self
            .http
            .get(&url)
            .header(TOKEN_HEADER, &self.token)
            .header(header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|source| StorageError::Transport {
                url: url.clone(),
                source,
            })?;
        decode_response(url, response).await
    }

    /// Issues a POST with a JSON body against `/v2/storage/{path}`.
    #[instrument(skip(self, body), level = "debug")]
    pub async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &Value,
    ) -> Result<T, StorageError> {
        let url = self.endpoint(path);
        let response = self
            .http
            .post(&url)
            .header(TOKEN_HEADER, &self.token)
            .header(header::ACCEPT, "application/json")
            .json(body)
            .send()
            .await
            .map_err(|source| StorageError::Transport {
                url: url.clone(),
                source,
            })?;
        decode_response(url, response).await
    }

    /// Lists all workspaces visible to the token.
    pub async fn list_workspaces(&self) -> Result<Vec<WorkspaceRecord>, StorageError> {
        self.get_json("workspaces").await
    }

    /// Runs one statement through the workspace query proxy and returns the
    /// proxy's raw `{status, data|message}` document.
    pub async fn workspace_query(
        &self,
        workspace_id: &str,
        sql: &str,
    ) -> Result<Value, StorageError> {
        debug!(workspace_id, "submitting workspace query");
        self.post_json(
            &format!("workspaces/{workspace_id}/query"),
            &json!({ "query": sql }),
        )
        .await
    }

    pub async fn verify_token(&self) -> Result<TokenInfo, StorageError> {
        self.get_json("tokens/verify").await
    }

    pub async fn list_buckets(&self) -> Result<Vec<BucketInfo>, StorageError> {
        self.get_json("buckets").await
    }

    pub async fn bucket_detail(&self, bucket_id: &str) -> Result<BucketInfo, StorageError> {
        self.get_json(&format!("buckets/{bucket_id}")).await
    }

    pub async fn list_bucket_tables(
        &self,
        bucket_id: &str,
    ) -> Result<Vec<TableDetail>, StorageError> {
        self.get_json(&format!("buckets/{bucket_id}/tables")).await
    }

    pub async fn table_detail(&self, table_id: &str) -> Result<TableDetail, StorageError> {
        self.get_json(&format!("tables/{table_id}")).await
    }

    /// Project-level metadata of the default branch (description etc.).
    pub async fn project_metadata(&self) -> Result<Vec<MetadataEntry>, StorageError> {
        self.get_json("branch/default/metadata").await
    }
}

pub(crate) fn build_http_client() -> Result<reqwest::Client, StorageError> {
    reqwest::Client::builder()
        .gzip(true)
        .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .build()
        .map_err(StorageError::Client)
}

pub(crate) async fn decode_response<T: DeserializeOwned>(
    url: String,
    response: Response,
) -> Result<T, StorageError> {
    let status = response.status();
    let bytes = response
        .bytes()
        .await
        .map_err(|source| StorageError::Transport {
            url: url.clone(),
            source,
        })?;

    if !status.is_success() {
        return Err(StorageError::Status {
            url,
            status,
            body: String::from_utf8_lossy(&bytes).into_owned(),
        });
    }

    serde_json::from_slice(&bytes).map_err(|source| StorageError::Decode { url, source })
}

/// Adds a scheme when missing and strips trailing slashes.
pub fn normalize_base_url(raw: &str) -> Result<String, StorageError> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(StorageError::InvalidUrl(raw.to_string()));
    }
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        Ok(trimmed.to_string())
    } else {
        Ok(format!("https://{trimmed}"))
    }
}
