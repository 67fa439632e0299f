use kbc_workspace::csv;
use serde::Deserialize;
use serde_json::json;

use super::{ToolDescriptor, ToolError, ToolOutput};
use crate::session::Session;

#[derive(Debug, Deserialize)]
pub(super) struct QueryTableArgs {
    #[serde(alias = "sql")]
    sql_query: String,
}

pub(super) fn descriptors() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor::new(
            "get_sql_dialect",
            "Returns the SQL dialect of the project workspace: Snowflake or BigQuery.",
            json!({"type": "object", "properties": {}}),
        ),
        ToolDescriptor::new(
            "query_table",
            "Executes a SQL statement in the project workspace and returns the result as CSV. \
             Use get_table_detail for fully qualified table names and quote identifiers \
             according to get_sql_dialect.",
            json!({
                "type": "object",
                "properties": {
                    "sql_query": {"type": "string", "description": "SQL statement to execute."}
                },
                "required": ["sql_query"]
            }),
        ),
    ]
}

pub(super) async fn get_sql_dialect(session: &Session) -> Result<ToolOutput, ToolError> {
    let dialect = session.workspace.get_sql_dialect().await?;
    Ok(ToolOutput::Text(dialect.to_string()))
}

/// SQL errors come back as a `message` CSV, not as a tool failure.
pub(super) async fn query_table(
    session: &Session,
    args: QueryTableArgs,
) -> Result<ToolOutput, ToolError> {
    let result = session.workspace.execute_query(&args.sql_query).await?;
    Ok(ToolOutput::Text(csv::serialize(&result)))
}
