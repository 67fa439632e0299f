//! Wire models of the Storage API responses the tools consume.
//!
//! The API mixes camelCase with a few snake_case fields and returns numeric
//! ids in some places and string ids in others, so ids are normalized to
//! strings on the way in.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// A workspace as listed by `GET workspaces`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct WorkspaceRecord {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub connection: WorkspaceConnection,
}

/// Connection block of a workspace. `user` is a plain user name for
/// Snowflake and a JSON-encoded service account document for BigQuery.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct WorkspaceConnection {
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub backend: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct BucketInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub stage: Option<String>,
    #[serde(default)]
    pub created: Option<String>,
    #[serde(default, alias = "tablesCount")]
    pub tables_count: Option<u64>,
    #[serde(default, alias = "dataSizeBytes")]
    pub data_size_bytes: Option<u64>,
}

/// Table metadata, including the lineage pointer for tables shared from
/// another project.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct TableDetail {
    pub id: String,
    pub name: String,
    #[serde(default, alias = "primaryKey")]
    pub primary_key: Vec<String>,
    #[serde(default)]
    pub created: Option<String>,
    #[serde(default, alias = "rowsCount")]
    pub rows_count: Option<u64>,
    #[serde(default, alias = "dataSizeBytes")]
    pub data_size_bytes: Option<u64>,
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default, alias = "sourceTable")]
    pub source_table: Option<SourceTable>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct SourceTable {
    pub id: String,
    pub project: SourceProject,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct SourceProject {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// Response of `GET tokens/verify`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct TokenInfo {
    pub owner: ProjectOwner,
    #[serde(default)]
    pub organization: Option<Organization>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ProjectOwner {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Organization {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct MetadataEntry {
    pub key: String,
    pub value: String,
}

pub(crate) fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    match Value::deserialize(deserializer)? {
        Value::String(value) => Ok(value),
        Value::Number(value) => Ok(value.to_string()),
        other => Err(D::Error::custom(format!(
            "expected a string or number id, got {other}"
        ))),
    }
}
