//! Tools exposed over MCP.
//!
//! Every tool takes a JSON object of arguments and produces either plain text
//! (SQL results as CSV, the dialect name) or a JSON document that is rendered
//! into the text content of the `tools/call` result.

mod components;
mod jobs;
mod project;
mod sql;
mod storage;

use kbc_storage::StorageError;
use kbc_workspace::WorkspaceError;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::session::Session;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool '{0}'")]
    UnknownTool(String),
    #[error("invalid arguments for '{tool}': {reason}")]
    InvalidArguments { tool: String, reason: String },
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("failed to encode tool output: {0}")]
    Encode(#[from] serde_json::Error),
}

impl ToolError {
    /// Errors in the request itself, reported as JSON-RPC errors instead of
    /// failed tool results.
    pub fn is_request_error(&self) -> bool {
        matches!(
            self,
            ToolError::UnknownTool(_) | ToolError::InvalidArguments { .. }
        )
    }

    /// `tools/call` result for a tool run that failed.
    pub fn to_call_result(&self) -> Value {
        json!({
            "content": [{"type": "text", "text": self.to_string()}],
            "isError": true
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutput {
    Text(String),
    Json(Value),
}

impl ToolOutput {
    pub(crate) fn json<T: Serialize>(value: &T) -> Result<Self, ToolError> {
        Ok(ToolOutput::Json(serde_json::to_value(value)?))
    }

    pub fn into_text(self) -> String {
        match self {
            ToolOutput::Text(text) => text,
            ToolOutput::Json(value) => {
                serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string())
            }
        }
    }

    pub fn into_call_result(self) -> Value {
        json!({
            "content": [{"type": "text", "text": self.into_text()}],
            "isError": false
        })
    }
}

/// Entry of the `tools/list` response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
}

impl ToolDescriptor {
    pub(crate) fn new(name: &'static str, description: &'static str, input_schema: Value) -> Self {
        Self {
            name,
            description,
            input_schema,
        }
    }
}

pub fn list_tools() -> Vec<ToolDescriptor> {
    let mut tools = sql::descriptors();
    tools.extend(storage::descriptors());
    tools.extend(components::descriptors());
    tools.extend(jobs::descriptors());
    tools.extend(project::descriptors());
    tools
}

#[instrument(skip(session, arguments), fields(session_id = %session.id))]
pub async fn call_tool(
    session: &Session,
    name: &str,
    arguments: Value,
) -> Result<ToolOutput, ToolError> {
    let output = match name {
        "get_sql_dialect" => sql::get_sql_dialect(session).await,
        "query_table" => sql::query_table(session, parse_args(name, arguments)?).await,
        "get_table_detail" => storage::get_table_detail(session, parse_args(name, arguments)?).await,
        "list_bucket_info" => storage::list_bucket_info(session).await,
        "get_bucket_detail" => {
            storage::get_bucket_detail(session, parse_args(name, arguments)?).await
        }
        "list_bucket_tables" => {
            storage::list_bucket_tables(session, parse_args(name, arguments)?).await
        }
        "list_components" => components::list_components(session).await,
        "list_component_configs" => {
            components::list_component_configs(session, parse_args(name, arguments)?).await
        }
        "retrieve_component_configurations" => {
            components::retrieve_component_configurations(session, parse_args(name, arguments)?)
                .await
        }
        "retrieve_transformations" => {
            components::retrieve_transformations(session, parse_args(name, arguments)?).await
        }
        "get_component_detail" => {
            components::get_component_detail(session, parse_args(name, arguments)?).await
        }
        "get_component_configuration_details" => {
            components::get_component_configuration_details(session, parse_args(name, arguments)?)
                .await
        }
        "create_sql_transformation" => {
            components::create_sql_transformation(session, parse_args(name, arguments)?).await
        }
        "retrieve_jobs" => jobs::retrieve_jobs(session, parse_args(name, arguments)?).await,
        "get_job_detail" => jobs::get_job_detail(session, parse_args(name, arguments)?).await,
        "start_job" => jobs::start_job(session, parse_args(name, arguments)?).await,
        "get_project_info" => project::get_project_info(session).await,
        other => return Err(ToolError::UnknownTool(other.to_string())),
    };

    match &output {
        Ok(_) => info!(tool = name, "tool call finished"),
        Err(error) => warn!(tool = name, %error, "tool call failed"),
    }
    output
}

/// Decodes tool arguments; a missing argument object counts as `{}`.
fn parse_args<T: DeserializeOwned>(tool: &str, arguments: Value) -> Result<T, ToolError> {
    let arguments = if arguments.is_null() {
        json!({})
    } else {
        arguments
    };
    serde_json::from_value(arguments).map_err(|err| ToolError::InvalidArguments {
        tool: tool.to_string(),
        reason: err.to_string(),
    })
}
