//! Workspace query core.
//!
//! A session owns one [`WorkspaceHandle`]. The handle resolves which SQL
//! backend the workspace runs on (memoized), turns logical table references
//! into backend-correct fully-qualified names, executes statements through
//! the Storage API query proxy (Snowflake) or a direct BigQuery connection,
//! and normalizes both response shapes into [`QueryResult`]. [`csv`] renders
//! a result into the text handed back to tool callers.
//!
//! Query-level failures are values (`QueryResult::Failed`); only
//! infrastructure problems surface as [`WorkspaceError`].

mod backend;
pub mod bigquery;
pub mod csv;
mod dialect;
mod fqn;
mod result;
mod workspace;

use kbc_storage::StorageError;
use thiserror::Error;

pub use backend::{
    DirectDriver, DriverConnector, DriverError, DriverOutcome, DriverRows, QueryProxy,
    WorkspaceMetadataProvider,
};
pub use bigquery::{BigQueryRestDriver, RestDriverConnector, ServiceAccountKey};
pub use dialect::{quote, Dialect};
pub use fqn::{TableFqn, TableLineage, TableReference};
pub use result::{QueryResult, QueryStatus, SqlSelectData};
pub use workspace::WorkspaceHandle;

/// Infrastructure failures of the workspace core. SQL errors are not in here.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("unsupported workspace backend '{0}'")]
    UnsupportedBackend(String),
    #[error("cannot classify table reference '{0}'")]
    AmbiguousReference(String),
    #[error("introspection query `{query}` failed: {reason}")]
    BackendIntrospectionFailed { query: String, reason: String },
    #[error("no workspace with schema '{0}' is accessible with this token")]
    WorkspaceNotFound(String),
    #[error("invalid workspace credentials: {0}")]
    InvalidCredentials(String),
    #[error("malformed query response: {0}")]
    MalformedResponse(String),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error(transparent)]
    Transport(anyhow::Error),
}

impl From<StorageError> for WorkspaceError {
    fn from(value: StorageError) -> Self {
        if value.is_auth() {
            WorkspaceError::Auth(value.to_string())
        } else {
            WorkspaceError::Transport(value.into())
        }
    }
}
