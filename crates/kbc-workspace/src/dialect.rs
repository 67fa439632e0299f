use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::WorkspaceError;

/// SQL engine behind a workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    Snowflake,
    BigQuery,
}

impl Dialect {
    /// Human-facing label returned by the `get_sql_dialect` tool.
    pub fn label(&self) -> &'static str {
        match self {
            Dialect::Snowflake => "Snowflake",
            Dialect::BigQuery => "BigQuery",
        }
    }

    /// Backend tag as reported in the workspace connection metadata.
    pub fn backend_tag(&self) -> &'static str {
        match self {
            Dialect::Snowflake => "snowflake",
            Dialect::BigQuery => "bigquery",
        }
    }

    /// Component that runs SQL transformations on this backend.
    pub fn transformation_component(&self) -> &'static str {
        match self {
            Dialect::Snowflake => "keboola.snowflake-transformation",
            Dialect::BigQuery => "keboola.bigquery-transformation",
        }
    }

    pub fn quote_char(&self) -> char {
        match self {
            Dialect::Snowflake => '"',
            Dialect::BigQuery => '`',
        }
    }

    pub fn quote(&self, identifier: &str) -> String {
        quote_with(identifier, self.quote_char())
    }

    /// Schema identifier for a bucket path (`stage.bucket`). BigQuery dataset
    /// names only allow `[A-Za-z0-9_]`, so everything else becomes `_`.
    pub fn bucket_schema(&self, bucket_path: &str) -> String {
        match self {
            Dialect::Snowflake => bucket_path.to_string(),
            Dialect::BigQuery => bucket_path
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
                .collect(),
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Dialect {
    type Err = WorkspaceError;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "snowflake" => Ok(Dialect::Snowflake),
            "bigquery" => Ok(Dialect::BigQuery),
            _ => Err(WorkspaceError::UnsupportedBackend(tag.to_string())),
        }
    }
}

/// Quotes `identifier` for `dialect`, doubling embedded quote characters.
pub fn quote(identifier: &str, dialect: Dialect) -> String {
    dialect.quote(identifier)
}

pub(crate) fn quote_with(identifier: &str, quote_char: char) -> String {
    let mut out = String::with_capacity(identifier.len() + 2);
    out.push(quote_char);
    for c in identifier.chars() {
        if c == quote_char {
            out.push(quote_char);
        }
        out.push(c);
    }
    out.push(quote_char);
    out
}
