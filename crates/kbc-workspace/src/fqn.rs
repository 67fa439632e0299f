//! Logical table references and their physical addresses.

use std::fmt;

use kbc_storage::TableDetail;
use serde::{Deserialize, Serialize};

use crate::{
    dialect::{quote_with, Dialect},
    WorkspaceError,
};

/// Pointer to the table a shared table was imported from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableLineage {
    pub source_project_id: String,
    pub source_table_id: String,
}

/// Caller-supplied description of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableReference {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub lineage: Option<TableLineage>,
}

impl TableReference {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            lineage: None,
        }
    }

    pub fn with_lineage(
        mut self,
        source_project_id: impl Into<String>,
        source_table_id: impl Into<String>,
    ) -> Self {
        self.lineage = Some(TableLineage {
            source_project_id: source_project_id.into(),
            source_table_id: source_table_id.into(),
        });
        self
    }

    /// Decides which of the three naming cases applies. Pure; no I/O.
    pub(crate) fn classify(&self) -> Result<TableLocation, WorkspaceError> {
        if let Some(lineage) = &self.lineage {
            let project_id = lineage.source_project_id.trim();
            let (schema, table) = split_bucket_path(&lineage.source_table_id)
                .filter(|_| !project_id.is_empty())
                .ok_or_else(|| {
                    WorkspaceError::AmbiguousReference(format!(
                        "{} (linked from project '{}', table '{}')",
                        self.id, lineage.source_project_id, lineage.source_table_id
                    ))
                })?;
            return Ok(TableLocation::Linked {
                project_id: project_id.to_string(),
                bucket_path: schema,
                table,
            });
        }

        if let Some((bucket_path, table)) = split_bucket_path(&self.id) {
            return Ok(TableLocation::Bucket { bucket_path, table });
        }

        if !self.id.trim().is_empty() && !self.id.contains('.') {
            return Ok(TableLocation::WorkspaceLocal {
                table: self.id.clone(),
            });
        }

        Err(WorkspaceError::AmbiguousReference(self.id.clone()))
    }
}

impl From<&TableDetail> for TableReference {
    fn from(table: &TableDetail) -> Self {
        Self {
            id: table.id.clone(),
            name: table.name.clone(),
            lineage: table.source_table.as_ref().map(|source| TableLineage {
                source_project_id: source.project.id.clone(),
                source_table_id: source.id.clone(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TableLocation {
    /// Shared from another project; names come from the source table.
    Linked {
        project_id: String,
        bucket_path: String,
        table: String,
    },
    /// `stage.bucket.table` in the workspace's own project.
    Bucket { bucket_path: String, table: String },
    /// Bare name in the workspace's writable schema.
    WorkspaceLocal { table: String },
}

/// `stage.bucket.table` → (`stage.bucket`, `table`).
fn split_bucket_path(id: &str) -> Option<(String, String)> {
    let mut parts = id.split('.');
    let (stage, bucket, table) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() || [stage, bucket, table].iter().any(|p| p.trim().is_empty()) {
        return None;
    }
    Some((format!("{stage}.{bucket}"), table.to_string()))
}

/// Physical address of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableFqn {
    pub db_name: String,
    pub schema_name: String,
    pub table_name: String,
    pub quote_char: char,
}

impl TableFqn {
    pub fn new(
        db_name: impl Into<String>,
        schema_name: impl Into<String>,
        table_name: impl Into<String>,
        dialect: Dialect,
    ) -> Self {
        Self {
            db_name: db_name.into(),
            schema_name: schema_name.into(),
            table_name: table_name.into(),
            quote_char: dialect.quote_char(),
        }
    }

    /// Fully quoted `db.schema.table` ready to paste into SQL.
    pub fn identifier(&self) -> String {
        format!(
            "{}.{}.{}",
            quote_with(&self.db_name, self.quote_char),
            quote_with(&self.schema_name, self.quote_char),
            quote_with(&self.table_name, self.quote_char)
        )
    }
}

impl fmt::Display for TableFqn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.identifier())
    }
}
