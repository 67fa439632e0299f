//! Jobs Queue API client and job models.

use std::fmt;

use chrono::{DateTime, Utc};
use reqwest::header;
use serde::{de::Error as _, Deserialize, Deserializer, Serialize};
use serde_json::{json, Map, Value};
use tracing::{info, instrument};

use crate::{
    build_http_client, decode_response, models::string_or_number, normalize_base_url,
    StorageClient, StorageError, TOKEN_HEADER,
};

pub const DEFAULT_JOB_LIMIT: u32 = 100;
pub const MAX_JOB_LIMIT: u32 = 500;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Created,
    Waiting,
    Processing,
    Success,
    Error,
    Terminating,
    Terminated,
    Cancelled,
    Warning,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Created => "created",
            JobStatus::Waiting => "waiting",
            JobStatus::Processing => "processing",
            JobStatus::Success => "success",
            JobStatus::Error => "error",
            JobStatus::Terminating => "terminating",
            JobStatus::Terminated => "terminated",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Warning => "warning",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }
}

/// Filters and paging for `GET search/jobs`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct JobSearch {
    pub status: Option<JobStatus>,
    pub component_id: Option<String>,
    pub config_id: Option<String>,
    pub limit: u32,
    pub offset: u32,
    pub sort_by: String,
    pub sort_order: SortOrder,
}

impl Default for JobSearch {
    fn default() -> Self {
        Self {
            status: None,
            component_id: None,
            config_id: None,
            limit: DEFAULT_JOB_LIMIT,
            offset: 0,
            sort_by: "startTime".to_string(),
            sort_order: SortOrder::Desc,
        }
    }
}

impl JobSearch {
    /// Query string pairs; the limit is clamped to `1..=MAX_JOB_LIMIT`.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("limit", self.limit.clamp(1, MAX_JOB_LIMIT).to_string()),
            ("offset", self.offset.to_string()),
            ("sortBy", self.sort_by.clone()),
            ("sortOrder", self.sort_order.as_str().to_string()),
        ];
        if let Some(status) = self.status {
            pairs.push(("status[]", status.as_str().to_string()));
        }
        if let Some(component) = &self.component_id {
            pairs.push(("componentId", component.clone()));
        }
        if let Some(config) = &self.config_id {
            pairs.push(("configId", config.clone()));
        }
        pairs
    }
}

/// Summary row of a job.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct JobListItem {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub status: JobStatus,
    #[serde(default, alias = "component", alias = "componentId", alias = "component-id")]
    pub component_id: Option<String>,
    #[serde(default, alias = "config", alias = "configId", alias = "config-id")]
    pub config_id: Option<String>,
    #[serde(default, alias = "isFinished", alias = "is-finished")]
    pub is_finished: bool,
    #[serde(default, alias = "createdTime", alias = "created-time")]
    pub created_time: Option<DateTime<Utc>>,
    #[serde(default, alias = "startTime", alias = "start-time")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, alias = "endTime", alias = "end-time")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, alias = "durationSeconds", alias = "duration-seconds")]
    pub duration_seconds: Option<f64>,
}

/// Full job document.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct JobDetail {
    #[serde(flatten)]
    pub summary: JobListItem,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default, alias = "tableId", alias = "table-id")]
    pub table_id: Option<String>,
    #[serde(default, alias = "configData", alias = "config-data")]
    pub config_data: Option<Value>,
    #[serde(default, alias = "configRowIds", alias = "config-row-ids")]
    pub config_row_ids: Option<Vec<String>>,
    #[serde(default, alias = "runId", alias = "run-id")]
    pub run_id: Option<String>,
    #[serde(default, alias = "parentRunId", alias = "parent-run-id")]
    pub parent_run_id: Option<String>,
    #[serde(default, deserialize_with = "job_result")]
    pub result: Map<String, Value>,
}

/// The queue reports "no result" as `[]` on freshly created jobs; anything
/// else that is not an object is rejected.
fn job_result<'de, D>(deserializer: D) -> Result<Map<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(Map::new()),
        Some(Value::Array(items)) if items.is_empty() => Ok(Map::new()),
        Some(Value::Object(map)) => Ok(map),
        Some(other) => Err(D::Error::custom(format!(
            "field 'result' must be an object, got: {other}"
        ))),
    }
}

/// Jobs Queue client sharing the Storage API token.
#[derive(Clone)]
pub struct JobsClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl fmt::Debug for JobsClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobsClient")
            .field("base_url", &self.base_url)
            .field("token", &"****")
            .finish()
    }
}

impl JobsClient {
    pub fn new(token: impl Into<String>, queue_url: &str) -> Result<Self, StorageError> {
        Ok(Self {
            http: build_http_client()?,
            base_url: normalize_base_url(queue_url)?,
            token: token.into(),
        })
    }

    /// Derives the queue stack from a Storage client, see [`derive_queue_url`].
    pub fn from_storage(storage: &StorageClient) -> Result<Self, StorageError> {
        let queue_url = derive_queue_url(storage.base_url())?;
        Ok(Self {
            http: storage.http().clone(),
            base_url: queue_url,
            token: storage.token().to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[instrument(skip(self))]
    pub async fn search_jobs(&self, search: &JobSearch) -> Result<Vec<JobListItem>, StorageError> {
        let url = format!("{}/search/jobs", self.base_url);
        let response = self
            .http
            .get(&url)
            .query(&search.query_pairs())
            .header(TOKEN_HEADER, &self.token)
            .header(header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|source| StorageError::Transport {
                url: url.clone(),
                source,
            })?;
        let jobs: Vec<JobListItem> = decode_response(url, response).await?;
        info!(
            count = jobs.len(),
            limit = search.limit,
            offset = search.offset,
            "jobs retrieved"
        );
        Ok(jobs)
    }

    #[instrument(skip(self))]
    pub async fn job_detail(&self, job_id: &str) -> Result<JobDetail, StorageError> {
        let url = format!("{}/jobs/{job_id}", self.base_url);
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

    /// Queues a run of the given component configuration.
    #[instrument(skip(self))]
    pub async fn create_job(
        &self,
        component_id: &str,
        config_id: &str,
    ) -> Result<JobDetail, StorageError> {
        let url = format!("{}/jobs", self.base_url);
        let response = self
            .http
            .post(&url)
            .header(TOKEN_HEADER, &self.token)
            .header(header::ACCEPT, "application/json")
            .json(&json!({
                "component": component_id,
                "config": config_id,
                "mode": "run",
            }))
            .send()
            .await
            .map_err(|source| StorageError::Transport {
                url: url.clone(),
                source,
            })?;
        let job: JobDetail = decode_response(url, response).await?;
        info!(job_id = %job.summary.id, component_id, config_id, "job created");
        Ok(job)
    }
}

/// Queue stack URL for a Storage stack URL. Hosts not following the
/// `connection.<stack>` naming (local stacks, proxies) serve both APIs.
pub fn derive_queue_url(storage_url: &str) -> Result<String, StorageError> {
    let normalized = normalize_base_url(storage_url)?;
    Ok(normalized.replacen("://connection.", "://queue.", 1))
}
