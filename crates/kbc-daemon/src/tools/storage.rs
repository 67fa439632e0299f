use kbc_storage::{SourceTable, TableDetail};
use kbc_workspace::TableReference;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{ToolDescriptor, ToolError, ToolOutput};
use crate::session::Session;

#[derive(Debug, Deserialize)]
pub(super) struct TableArgs {
    table_id: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct BucketArgs {
    bucket_id: String,
}

#[derive(Debug, Serialize)]
struct ColumnInfo {
    name: String,
    quoted_name: String,
}

/// Table metadata enriched with the names to use in SQL.
#[derive(Debug, Serialize)]
struct TableDetailOutput {
    id: String,
    name: String,
    primary_key: Vec<String>,
    created: Option<String>,
    rows_count: Option<u64>,
    data_size_bytes: Option<u64>,
    db_identifier: String,
    columns: Vec<ColumnInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    source_table: Option<SourceTable>,
}

pub(super) fn descriptors() -> Vec<ToolDescriptor> {
    let bucket_id = json!({
        "type": "object",
        "properties": {
            "bucket_id": {"type": "string", "description": "Bucket id, e.g. in.c-main."}
        },
        "required": ["bucket_id"]
    });
    vec![
        ToolDescriptor::new(
            "get_table_detail",
            "Returns table metadata, the fully qualified table name for SQL (db_identifier) \
             and the quoted name of every column.",
            json!({
                "type": "object",
                "properties": {
                    "table_id": {"type": "string", "description": "Table id, e.g. in.c-main.customers."}
                },
                "required": ["table_id"]
            }),
        ),
        ToolDescriptor::new(
            "list_bucket_info",
            "Lists all buckets in the project.",
            json!({"type": "object", "properties": {}}),
        ),
        ToolDescriptor::new(
            "get_bucket_detail",
            "Returns metadata of one bucket.",
            bucket_id.clone(),
        ),
        ToolDescriptor::new(
            "list_bucket_tables",
            "Lists the tables of one bucket.",
            bucket_id,
        ),
    ]
}

pub(super) async fn get_table_detail(
    session: &Session,
    args: TableArgs,
) -> Result<ToolOutput, ToolError> {
    let detail: TableDetail = session.storage.table_detail(&args.table_id).await?;
    let fqn = session
        .workspace
        .get_table_fqn(&TableReference::from(&detail))
        .await?;
    let dialect = session.workspace.resolve_dialect().await?;

    let columns = detail
        .columns
        .iter()
        .map(|name| ColumnInfo {
            name: name.clone(),
            quoted_name: dialect.quote(name),
        })
        .collect();

    ToolOutput::json(&TableDetailOutput {
        id: detail.id,
        name: detail.name,
        primary_key: detail.primary_key,
        created: detail.created,
        rows_count: detail.rows_count,
        data_size_bytes: detail.data_size_bytes,
        db_identifier: fqn.identifier(),
        columns,
        source_table: detail.source_table,
    })
}

pub(super) async fn list_bucket_info(session: &Session) -> Result<ToolOutput, ToolError> {
    ToolOutput::json(&session.storage.list_buckets().await?)
}

pub(super) async fn get_bucket_detail(
    session: &Session,
    args: BucketArgs,
) -> Result<ToolOutput, ToolError> {
    ToolOutput::json(&session.storage.bucket_detail(&args.bucket_id).await?)
}

pub(super) async fn list_bucket_tables(
    session: &Session,
    args: BucketArgs,
) -> Result<ToolOutput, ToolError> {
    ToolOutput::json(&session.storage.list_bucket_tables(&args.bucket_id).await?)
}
