//! Direct BigQuery execution over the REST API.
//!
//! Authenticates with the workspace's service account (OAuth2 JWT-bearer
//! grant, RS256), submits statements through `jobs.query` and pages through
//! `getQueryResults` until the job is complete and all rows are fetched.

use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use parking_lot::RwLock;
use reqwest::StatusCode;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use crate::{
    backend::{DirectDriver, DriverConnector, DriverError, DriverOutcome, DriverRows},
    WorkspaceError,
};

pub const DEFAULT_BIGQUERY_API_URL: &str = "https://bigquery.googleapis.com/bigquery/v2";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const BIGQUERY_SCOPE: &str = "https://www.googleapis.com/auth/bigquery";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;
const POLL_TIMEOUT_MS: u64 = 10_000;
const REQUEST_TIMEOUT_SECS: u64 = 300;
/// Overall budget of one statement, polling and paging included.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(600);

/// Service account document stored in a BigQuery workspace's `user` field.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub project_id: String,
    #[serde(default)]
    pub client_email: Option<String>,
    #[serde(default)]
    pub private_key: Option<String>,
    #[serde(default)]
    pub token_uri: Option<String>,
}

impl fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("project_id", &self.project_id)
            .field("client_email", &self.client_email)
            .field("private_key", &self.private_key.as_ref().map(|_| "****"))
            .field("token_uri", &self.token_uri)
            .finish()
    }
}

impl ServiceAccountKey {
    pub fn from_connection_user(user: &str) -> Result<Self, WorkspaceError> {
        let key: ServiceAccountKey = serde_json::from_str(user).map_err(|err| {
            WorkspaceError::InvalidCredentials(format!("unreadable service account: {err}"))
        })?;
        if key.project_id.trim().is_empty() {
            return Err(WorkspaceError::InvalidCredentials(
                "service account has an empty project_id".to_string(),
            ));
        }
        Ok(key)
    }
}

/// Opens [`BigQueryRestDriver`]s sharing one HTTP client.
#[derive(Debug, Clone)]
pub struct RestDriverConnector {
    http: reqwest::Client,
    api_url: String,
    query_timeout: Duration,
}

impl RestDriverConnector {
    /// `api_url` overrides the public endpoint, e.g. for an emulator.
    pub fn new(api_url: Option<&str>) -> Result<Self, WorkspaceError> {
        let http = reqwest::Client::builder()
            .gzip(true)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|err| WorkspaceError::Transport(err.into()))?;
        let api_url = api_url
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .unwrap_or(DEFAULT_BIGQUERY_API_URL)
            .trim_end_matches('/')
            .to_string();
        Ok(Self {
            http,
            api_url,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
        })
    }

    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }
}

impl DriverConnector for RestDriverConnector {
    fn connect(
        &self,
        key: ServiceAccountKey,
        default_dataset: &str,
    ) -> Result<Arc<dyn DirectDriver>, WorkspaceError> {
        Ok(Arc::new(BigQueryRestDriver {
            http: self.http.clone(),
            api_url: self.api_url.clone(),
            key,
            dataset: default_dataset.to_string(),
            query_timeout: self.query_timeout,
            token: RwLock::new(None),
        }))
    }
}

#[derive(Clone)]
struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

/// BigQuery connection bound to one project and default dataset.
pub struct BigQueryRestDriver {
    http: reqwest::Client,
    api_url: String,
    key: ServiceAccountKey,
    dataset: String,
    query_timeout: Duration,
    token: RwLock<Option<CachedToken>>,
}

impl fmt::Debug for BigQueryRestDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BigQueryRestDriver")
            .field("api_url", &self.api_url)
            .field("project_id", &self.key.project_id)
            .field("dataset", &self.dataset)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    job_complete: bool,
    #[serde(default)]
    job_reference: Option<JobReference>,
    #[serde(default)]
    schema: Option<TableSchema>,
    #[serde(default)]
    rows: Vec<TableRow>,
    #[serde(default)]
    page_token: Option<String>,
    #[serde(default)]
    num_dml_affected_rows: Option<String>,
    #[serde(default)]
    statement_type: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    #[serde(default)]
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TableSchema {
    #[serde(default)]
    fields: Vec<FieldSchema>,
}

#[derive(Debug, Default, Deserialize)]
struct FieldSchema {
    name: String,
    #[serde(default, rename = "type")]
    field_type: String,
    #[serde(default)]
    mode: Option<String>,
    /// Sub-fields of a RECORD.
    #[serde(default)]
    fields: Vec<FieldSchema>,
}

impl FieldSchema {
    fn is_repeated(&self) -> bool {
        self.mode
            .as_deref()
            .is_some_and(|mode| mode.eq_ignore_ascii_case("REPEATED"))
    }
}

#[derive(Debug, Deserialize)]
struct TableRow {
    #[serde(default)]
    f: Vec<TableCell>,
}

#[derive(Debug, Deserialize)]
struct TableCell {
    #[serde(default)]
    v: Value,
}

impl BigQueryRestDriver {
    async fn access_token(&self) -> Result<String, DriverError> {
        let cached = self.token.read().clone();
        if let Some(token) = cached {
            if token.expires_at - chrono::Duration::seconds(TOKEN_REFRESH_MARGIN_SECS) > Utc::now() {
                return Ok(token.value);
            }
        }

        let email = self.key.client_email.as_deref().ok_or_else(|| {
            DriverError::Auth("service account has no client_email".to_string())
        })?;
        let pem = self.key.private_key.as_deref().ok_or_else(|| {
            DriverError::Auth("service account has no private_key".to_string())
        })?;
        let token_uri = self.key.token_uri.as_deref().unwrap_or(DEFAULT_TOKEN_URI);

        let now = Utc::now().timestamp();
        let claims = Claims {
            iss: email,
            scope: BIGQUERY_SCOPE,
            aud: token_uri,
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECS,
        };
        let signing_key = EncodingKey::from_rsa_pem(pem.as_bytes())
            .map_err(|err| DriverError::Auth(format!("invalid private key: {err}")))?;
        let assertion = jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &signing_key)
            .map_err(|err| DriverError::Auth(format!("failed to sign token request: {err}")))?;

        let response = self
            .http
            .post(token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await
            .map_err(|err| DriverError::Transport(err.into()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| DriverError::Transport(err.into()))?;
        if !status.is_success() {
            return Err(DriverError::Auth(format!(
                "token endpoint responded with HTTP {status}: {body}"
            )));
        }
        let token: TokenResponse = serde_json::from_str(&body)
            .map_err(|err| DriverError::Auth(format!("unreadable token response: {err}")))?;

        let expires_at =
            Utc::now() + chrono::Duration::seconds(token.expires_in.unwrap_or(ASSERTION_LIFETIME_SECS));
        debug!(project_id = %self.key.project_id, %expires_at, "obtained BigQuery access token");
        *self.token.write() = Some(CachedToken {
            value: token.access_token.clone(),
            expires_at,
        });
        Ok(token.access_token)
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, DriverError> {
        let token = self.access_token().await?;
        let response = request
            .bearer_auth(token)
            .send()
            .await
            .map_err(|err| DriverError::Transport(err.into()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| DriverError::Transport(err.into()))?;

        if status.is_success() {
            return serde_json::from_str(&body).map_err(|err| {
                DriverError::Transport(anyhow::anyhow!("unreadable BigQuery response: {err}"))
            });
        }

        let message = error_message(&body).unwrap_or_else(|| body.clone());
        Err(match status {
            StatusCode::BAD_REQUEST | StatusCode::NOT_FOUND => DriverError::Query(message),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => DriverError::Auth(message),
            _ => DriverError::Transport(anyhow::anyhow!(
                "BigQuery responded with HTTP {status}: {message}"
            )),
        })
    }

    fn project_url(&self) -> String {
        format!("{}/projects/{}", self.api_url, self.key.project_id)
    }
}

#[async_trait]
impl DirectDriver for BigQueryRestDriver {
    #[instrument(skip(self, sql), fields(project_id = %self.key.project_id))]
    async fn query(&self, sql: &str) -> Result<DriverOutcome, DriverError> {
        let deadline = Instant::now() + self.query_timeout;
        let body = json!({
            "query": sql,
            "useLegacySql": false,
            "timeoutMs": POLL_TIMEOUT_MS,
            "defaultDataset": {
                "projectId": self.key.project_id,
                "datasetId": self.dataset,
            },
        });
        let mut page: QueryResponse = self
            .send(self.http.post(format!("{}/queries", self.project_url())).json(&body))
            .await?;

        let mut fields: Option<Vec<FieldSchema>> = None;
        let mut rows = Vec::new();
        loop {
            if fields.is_none() {
                fields = page.schema.take().map(|schema| schema.fields);
            }
            if page.job_complete {
                if let Some(fields) = &fields {
                    rows.extend(page.rows.drain(..).map(|row| decode_row(fields, row)));
                }
                if page.page_token.is_none() {
                    break;
                }
            }

            let job = page.job_reference.as_ref().ok_or_else(|| {
                DriverError::Transport(anyhow::anyhow!("BigQuery response lacks a job reference"))
            })?;
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!(job_id = %job.job_id, timeout = ?self.query_timeout, "BigQuery job timed out");
                return Err(DriverError::Transport(anyhow::anyhow!(
                    "BigQuery job {} did not finish within {}s",
                    job.job_id,
                    self.query_timeout.as_secs_f64()
                )));
            }
            let wait_ms = u64::try_from(remaining.as_millis())
                .unwrap_or(u64::MAX)
                .min(POLL_TIMEOUT_MS);
            let mut query: Vec<(&str, String)> = vec![("timeoutMs", wait_ms.to_string())];
            if let Some(location) = &job.location {
                query.push(("location", location.clone()));
            }
            if page.job_complete {
                if let Some(token) = &page.page_token {
                    query.push(("pageToken", token.clone()));
                }
            }
            let url = format!("{}/queries/{}", self.project_url(), job.job_id);
            let next: QueryResponse = self.send(self.http.get(url).query(&query)).await?;
            page = QueryResponse {
                job_reference: next.job_reference.or(page.job_reference),
                num_dml_affected_rows: next.num_dml_affected_rows.or(page.num_dml_affected_rows),
                statement_type: next.statement_type.or(page.statement_type),
                ..next
            };
        }

        match fields.filter(|fields| !fields.is_empty()) {
            Some(fields) => Ok(DriverOutcome::Rows(DriverRows {
                fields: fields.into_iter().map(|field| field.name).collect(),
                rows,
            })),
            None => Ok(DriverOutcome::Statement {
                summary: statement_summary(
                    page.num_dml_affected_rows.as_deref(),
                    page.statement_type.as_deref(),
                ),
            }),
        }
    }
}

fn decode_row(fields: &[FieldSchema], row: TableRow) -> Vec<Value> {
    fields
        .iter()
        .zip(row.f)
        .map(|(field, cell)| decode_cell(field, cell.v))
        .collect()
}

/// REPEATED cells arrive as arrays of `{"v": ..}` wrappers and RECORD cells
/// as `{"f": [..]}`; both are unwrapped into plain JSON arrays and objects.
fn decode_cell(field: &FieldSchema, value: Value) -> Value {
    if !field.is_repeated() {
        return decode_item(field, value);
    }
    match value {
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| decode_item(field, unwrap_v(item)))
                .collect(),
        ),
        other => other,
    }
}

fn decode_item(field: &FieldSchema, value: Value) -> Value {
    match field.field_type.to_ascii_uppercase().as_str() {
        "RECORD" | "STRUCT" => match value {
            Value::Object(mut record) => match record.remove("f") {
                Some(Value::Array(cells)) => Value::Object(
                    field
                        .fields
                        .iter()
                        .zip(cells)
                        .map(|(sub, cell)| (sub.name.clone(), decode_cell(sub, unwrap_v(cell))))
                        .collect::<Map<String, Value>>(),
                ),
                Some(other) => other,
                None => Value::Object(record),
            },
            other => other,
        },
        scalar => decode_scalar(scalar, value),
    }
}

fn unwrap_v(cell: Value) -> Value {
    match cell {
        Value::Object(mut wrapper) if wrapper.len() == 1 && wrapper.contains_key("v") => {
            wrapper.remove("v").unwrap_or(Value::Null)
        }
        other => other,
    }
}

/// Cells arrive as strings; scalar types with an exact JSON counterpart are
/// converted, everything else (NUMERIC, dates, bytes ...) stays textual.
fn decode_scalar(field_type: &str, value: Value) -> Value {
    let text = match value {
        Value::String(text) => text,
        other => return other,
    };
    match field_type {
        "INTEGER" | "INT64" => text
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or(Value::String(text)),
        "FLOAT" | "FLOAT64" => text
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or(Value::String(text)),
        "BOOLEAN" | "BOOL" => match text.as_str() {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => Value::String(text),
        },
        _ => Value::String(text),
    }
}

fn statement_summary(affected_rows: Option<&str>, statement_type: Option<&str>) -> String {
    match (affected_rows, statement_type) {
        (Some(rows), _) => format!("{rows} rows affected"),
        (None, Some(kind)) => format!("{kind} statement executed"),
        (None, None) => "statement executed".to_string(),
    }
}

fn error_message(body: &str) -> Option<String> {
    let document: Value = serde_json::from_str(body).ok()?;
    document
        .pointer("/error/message")
        .and_then(Value::as_str)
        .map(str::to_string)
}
