//! Seams to the collaborators the workspace core talks to.

use std::sync::Arc;

use async_trait::async_trait;
use kbc_storage::{StorageClient, WorkspaceRecord};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::{bigquery::ServiceAccountKey, WorkspaceError};

/// Finds the workspace record (id, backend tag, user) behind a schema name.
#[async_trait]
pub trait WorkspaceMetadataProvider: Send + Sync + 'static {
    async fn lookup_workspace(&self, schema: &str) -> Result<WorkspaceRecord, WorkspaceError>;
}

/// Remote execution proxy. Returns the raw `{status, data|message}` document;
/// only transport and auth problems are errors.
#[async_trait]
pub trait QueryProxy: Send + Sync + 'static {
    async fn submit(&self, workspace_id: &str, sql: &str) -> Result<Value, WorkspaceError>;
}

/// A live connection to a backend reached without the proxy.
#[async_trait]
pub trait DirectDriver: Send + Sync + 'static {
    async fn query(&self, sql: &str) -> Result<DriverOutcome, DriverError>;
}

/// Opens [`DirectDriver`]s from workspace credentials.
pub trait DriverConnector: Send + Sync + 'static {
    fn connect(
        &self,
        key: ServiceAccountKey,
        default_dataset: &str,
    ) -> Result<Arc<dyn DirectDriver>, WorkspaceError>;
}

/// Positional rows as delivered by a driver.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DriverRows {
    pub fields: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DriverOutcome {
    Rows(DriverRows),
    /// DDL/DML; `summary` is the driver's affected-rows or status line.
    Statement { summary: String },
}

#[derive(Debug, Error)]
pub enum DriverError {
    /// Rejected by the engine: bad SQL, missing table, permissions on an object.
    #[error("{0}")]
    Query(String),
    #[error("driver authentication failed: {0}")]
    Auth(String),
    #[error(transparent)]
    Transport(anyhow::Error),
}

#[async_trait]
impl WorkspaceMetadataProvider for StorageClient {
    async fn lookup_workspace(&self, schema: &str) -> Result<WorkspaceRecord, WorkspaceError> {
        let workspaces = self.list_workspaces().await?;
        debug!(count = workspaces.len(), schema, "looking up workspace by schema");
        workspaces
            .into_iter()
            .find(|workspace| workspace.connection.schema.as_deref() == Some(schema))
            .ok_or_else(|| WorkspaceError::WorkspaceNotFound(schema.to_string()))
    }
}

#[async_trait]
impl QueryProxy for StorageClient {
    async fn submit(&self, workspace_id: &str, sql: &str) -> Result<Value, WorkspaceError> {
        Ok(self.workspace_query(workspace_id, sql).await?)
    }
}
