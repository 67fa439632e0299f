use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::WorkspaceError;

/// Row set of a successful `SELECT`-like statement.
///
/// `columns` is ordered and free of duplicates; every row holds exactly the
/// keys in `columns`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SqlSelectData {
    pub columns: Vec<String>,
    pub rows: Vec<Map<String, Value>>,
}

impl SqlSelectData {
    /// Builds a row set from positional driver rows. A repeated field name
    /// keeps the value at its first position.
    pub fn from_positional(fields: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        let mut columns: Vec<String> = Vec::with_capacity(fields.len());
        let mut field_to_index = Vec::with_capacity(fields.len());
        for (index, field) in fields.into_iter().enumerate() {
            if !columns.contains(&field) {
                columns.push(field);
                field_to_index.push(index);
            }
        }

        let rows = rows
            .into_iter()
            .map(|row| {
                columns
                    .iter()
                    .zip(&field_to_index)
                    .map(|(column, &index)| {
                        (column.clone(), row.get(index).cloned().unwrap_or(Value::Null))
                    })
                    .collect()
            })
            .collect();

        Self { columns, rows }
    }

    /// Dedupes `columns` and reshapes every row to exactly those keys; a key
    /// a row lacks becomes `null`, keys outside `columns` are dropped.
    pub fn normalized(self) -> Self {
        let mut columns: Vec<String> = Vec::with_capacity(self.columns.len());
        for column in self.columns {
            if !columns.contains(&column) {
                columns.push(column);
            }
        }

        let rows = self
            .rows
            .into_iter()
            .map(|mut row| {
                columns
                    .iter()
                    .map(|column| (column.clone(), row.remove(column).unwrap_or(Value::Null)))
                    .collect()
            })
            .collect();

        Self { columns, rows }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryStatus {
    Ok,
    Error,
}

/// Outcome of one statement. `Failed` is a query-level failure (bad SQL,
/// missing table), not an infrastructure error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireResult", into = "WireResult")]
pub enum QueryResult {
    Rows(SqlSelectData),
    Completed { message: String },
    Failed { message: String },
}

impl QueryResult {
    pub fn completed(message: impl Into<String>) -> Self {
        QueryResult::Completed {
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        QueryResult::Failed {
            message: message.into(),
        }
    }

    pub fn status(&self) -> QueryStatus {
        match self {
            QueryResult::Rows(_) | QueryResult::Completed { .. } => QueryStatus::Ok,
            QueryResult::Failed { .. } => QueryStatus::Error,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status() == QueryStatus::Ok
    }

    pub fn data(&self) -> Option<&SqlSelectData> {
        match self {
            QueryResult::Rows(data) => Some(data),
            _ => None,
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            QueryResult::Rows(_) => None,
            QueryResult::Completed { message } | QueryResult::Failed { message } => Some(message),
        }
    }

    /// Normalizes the query proxy's `{status, data|message}` document.
    pub fn from_proxy_response(response: Value) -> Result<Self, WorkspaceError> {
        let wire: WireResult = serde_json::from_value(response)
            .map_err(|err| WorkspaceError::MalformedResponse(err.to_string()))?;
        QueryResult::try_from(wire).map_err(WorkspaceError::MalformedResponse)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WireResult {
    status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<WireData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireData {
    #[serde(default)]
    columns: Option<Vec<String>>,
    #[serde(default)]
    rows: Vec<Map<String, Value>>,
}

impl TryFrom<WireResult> for QueryResult {
    type Error = String;

    fn try_from(wire: WireResult) -> Result<Self, Self::Error> {
        match wire.status.trim().to_ascii_lowercase().as_str() {
            "error" => Ok(QueryResult::Failed {
                message: wire
                    .message
                    .unwrap_or_else(|| "query failed without a message".to_string()),
            }),
            "ok" | "success" => match (wire.data, wire.message) {
                (Some(data), _) => {
                    let columns = match data.columns {
                        Some(columns) => columns,
                        // no explicit projection: take the first row's key order
                        None => data
                            .rows
                            .first()
                            .map(|row| row.keys().cloned().collect())
                            .unwrap_or_default(),
                    };
                    Ok(QueryResult::Rows(
                        SqlSelectData {
                            columns,
                            rows: data.rows,
                        }
                        .normalized(),
                    ))
                }
                (None, message) => Ok(QueryResult::Completed {
                    message: message.unwrap_or_default(),
                }),
            },
            other => Err(format!("unknown query status '{other}'")),
        }
    }
}

impl From<QueryResult> for WireResult {
    fn from(result: QueryResult) -> Self {
        let status = match result.status() {
            QueryStatus::Ok => "ok",
            QueryStatus::Error => "error",
        }
        .to_string();
        match result {
            QueryResult::Rows(data) => WireResult {
                status,
                data: Some(WireData {
                    columns: Some(data.columns),
                    rows: data.rows,
                }),
                message: None,
            },
            QueryResult::Completed { message } | QueryResult::Failed { message } => WireResult {
                status,
                data: None,
                message: Some(message),
            },
        }
    }
}
