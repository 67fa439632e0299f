use std::{collections::HashMap, sync::Arc};

use kbc_storage::StorageClient;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};

use crate::{
    backend::{
        DirectDriver, DriverConnector, DriverError, DriverOutcome, QueryProxy,
        WorkspaceMetadataProvider,
    },
    bigquery::{RestDriverConnector, ServiceAccountKey},
    fqn::TableLocation,
    Dialect, QueryResult, SqlSelectData, TableFqn, TableReference, WorkspaceError,
};

const CURRENT_DATABASE_SQL: &str = r#"select CURRENT_DATABASE() as "current_database";"#;
const CURRENT_DATABASE_COLUMN: &str = "current_database";
const DATABASE_NAME_COLUMN: &str = "DATABASE_NAME";

/// What the workspace metadata says about the backend. Resolved once.
struct Connection {
    workspace_id: String,
    dialect: Dialect,
    user: Option<String>,
}

/// Direct BigQuery access, opened from the workspace's service account on
/// first use.
struct BigQueryAccess {
    project_id: String,
    driver: Arc<dyn DirectDriver>,
}

/// One session's query workspace.
///
/// The backend connection (and with it the [`Dialect`]) is resolved on first
/// use and never changes afterwards. Concurrent first calls may each look the
/// workspace up; the first completed lookup is kept. Caches are only written
/// after the remote call returned, so a cancelled call leaves them untouched.
pub struct WorkspaceHandle {
    schema: String,
    metadata: Arc<dyn WorkspaceMetadataProvider>,
    proxy: Arc<dyn QueryProxy>,
    connector: Arc<dyn DriverConnector>,
    connection: RwLock<Option<Arc<Connection>>>,
    bigquery: RwLock<Option<Arc<BigQueryAccess>>>,
    current_database: RwLock<Option<String>>,
    linked_databases: RwLock<HashMap<String, String>>,
}

impl std::fmt::Debug for WorkspaceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkspaceHandle")
            .field("schema", &self.schema)
            .field("dialect", &self.cached_dialect())
            .finish_non_exhaustive()
    }
}

impl WorkspaceHandle {
    pub fn new(
        schema: impl Into<String>,
        metadata: Arc<dyn WorkspaceMetadataProvider>,
        proxy: Arc<dyn QueryProxy>,
        connector: Arc<dyn DriverConnector>,
    ) -> Self {
        Self {
            schema: schema.into(),
            metadata,
            proxy,
            connector,
            connection: RwLock::new(None),
            bigquery: RwLock::new(None),
            current_database: RwLock::new(None),
            linked_databases: RwLock::new(HashMap::new()),
        }
    }

    /// Handle backed by the Storage API for metadata and proxy calls, and by
    /// the BigQuery REST API for direct execution.
    pub fn for_storage(
        schema: impl Into<String>,
        storage: StorageClient,
        connector: RestDriverConnector,
    ) -> Self {
        let storage = Arc::new(storage);
        Self::new(schema, storage.clone(), storage, Arc::new(connector))
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// The dialect if it has been resolved already.
    pub fn cached_dialect(&self) -> Option<Dialect> {
        self.connection.read().as_ref().map(|connection| connection.dialect)
    }

    /// Resolves (once) and returns the workspace's dialect.
    pub async fn resolve_dialect(&self) -> Result<Dialect, WorkspaceError> {
        Ok(self.connection().await?.dialect)
    }

    /// `"Snowflake"` or `"BigQuery"`.
    pub async fn get_sql_dialect(&self) -> Result<&'static str, WorkspaceError> {
        Ok(self.resolve_dialect().await?.label())
    }

    /// Quotes a single identifier for the workspace's dialect.
    pub async fn quoted_name(&self, identifier: &str) -> Result<String, WorkspaceError> {
        Ok(self.resolve_dialect().await?.quote(identifier))
    }

    /// Resolves the physical `db.schema.table` address of a table.
    #[instrument(skip(self, table), fields(table_id = %table.id))]
    pub async fn get_table_fqn(&self, table: &TableReference) -> Result<TableFqn, WorkspaceError> {
        let location = table.classify()?;
        let connection = self.connection().await?;
        let dialect = connection.dialect;

        let fqn = match location {
            TableLocation::Linked {
                project_id,
                bucket_path,
                table,
            } => TableFqn::new(
                self.linked_database(&connection, &project_id).await?,
                dialect.bucket_schema(&bucket_path),
                table,
                dialect,
            ),
            TableLocation::Bucket { bucket_path, table } => TableFqn::new(
                self.current_database(&connection).await?,
                dialect.bucket_schema(&bucket_path),
                table,
                dialect,
            ),
            TableLocation::WorkspaceLocal { table } => TableFqn::new(
                self.current_database(&connection).await?,
                self.schema.clone(),
                table,
                dialect,
            ),
        };
        debug!(fqn = %fqn, "resolved table address");
        Ok(fqn)
    }

    /// Runs one statement. SQL-level failures come back as
    /// [`QueryResult::Failed`]; only infrastructure failures are errors.
    #[instrument(skip(self, sql), fields(schema = %self.schema))]
    pub async fn execute_query(&self, sql: &str) -> Result<QueryResult, WorkspaceError> {
        let connection = self.connection().await?;
        let result = match connection.dialect {
            Dialect::Snowflake => {
                let response = self.proxy.submit(&connection.workspace_id, sql).await?;
                QueryResult::from_proxy_response(response)?
            }
            Dialect::BigQuery => match self.bigquery(&connection)?.driver.query(sql).await {
                Ok(DriverOutcome::Rows(rows)) => {
                    QueryResult::Rows(SqlSelectData::from_positional(rows.fields, rows.rows))
                }
                Ok(DriverOutcome::Statement { summary }) => QueryResult::completed(summary),
                Err(DriverError::Query(message)) => QueryResult::failed(message),
                Err(DriverError::Auth(message)) => return Err(WorkspaceError::Auth(message)),
                Err(DriverError::Transport(err)) => return Err(WorkspaceError::Transport(err)),
            },
        };

        if let Some(message) = result.message().filter(|_| !result.is_ok()) {
            warn!(dialect = %connection.dialect, message, "query failed");
        }
        Ok(result)
    }

    async fn connection(&self) -> Result<Arc<Connection>, WorkspaceError> {
        let cached = self.connection.read().clone();
        if let Some(connection) = cached {
            return Ok(connection);
        }

        let record = self.metadata.lookup_workspace(&self.schema).await?;
        let dialect: Dialect = record
            .connection
            .backend
            .as_deref()
            .unwrap_or_default()
            .parse()?;
        let resolved = Arc::new(Connection {
            workspace_id: record.id,
            dialect,
            user: record.connection.user,
        });

        let mut slot = self.connection.write();
        if let Some(existing) = slot.as_ref() {
            return Ok(existing.clone());
        }
        info!(
            schema = %self.schema,
            workspace_id = %resolved.workspace_id,
            dialect = %dialect,
            "workspace backend resolved"
        );
        *slot = Some(resolved.clone());
        Ok(resolved)
    }

    /// Reads the service account and opens the driver. Nothing is cached
    /// when the credentials are unusable.
    fn bigquery(&self, connection: &Connection) -> Result<Arc<BigQueryAccess>, WorkspaceError> {
        if let Some(access) = self.bigquery.read().clone() {
            return Ok(access);
        }

        let user = connection.user.as_deref().ok_or_else(|| {
            WorkspaceError::InvalidCredentials(
                "BigQuery workspace carries no service account".to_string(),
            )
        })?;
        let key = ServiceAccountKey::from_connection_user(user)?;
        let project_id = key.project_id.clone();
        let driver = self.connector.connect(key, &self.schema)?;

        let mut slot = self.bigquery.write();
        Ok(slot
            .get_or_insert_with(|| {
                debug!(project_id = %project_id, "BigQuery driver opened");
                Arc::new(BigQueryAccess { project_id, driver })
            })
            .clone())
    }

    async fn current_database(&self, connection: &Connection) -> Result<String, WorkspaceError> {
        match connection.dialect {
            Dialect::BigQuery => Ok(self.bigquery(connection)?.project_id.clone()),
            Dialect::Snowflake => {
                let cached = self.current_database.read().clone();
                if let Some(database) = cached {
                    return Ok(database);
                }
                let data = self.introspect(connection, CURRENT_DATABASE_SQL).await?;
                let database = data
                    .rows
                    .first()
                    .and_then(|row| string_cell(row, CURRENT_DATABASE_COLUMN))
                    .ok_or_else(|| {
                        introspection_failed(
                            CURRENT_DATABASE_SQL,
                            format!("column '{CURRENT_DATABASE_COLUMN}' is missing or empty"),
                        )
                    })?
                    .to_string();
                self.current_database
                    .write()
                    .get_or_insert_with(|| database.clone());
                Ok(database)
            }
        }
    }

    /// Database holding the tables of another project. Exactly one database
    /// named `*_{project_id}` must be visible.
    async fn linked_database(
        &self,
        connection: &Connection,
        project_id: &str,
    ) -> Result<String, WorkspaceError> {
        match connection.dialect {
            // shared datasets are addressed through the workspace's own project
            Dialect::BigQuery => Ok(self.bigquery(connection)?.project_id.clone()),
            Dialect::Snowflake => {
                let cached = self.linked_databases.read().get(project_id).cloned();
                if let Some(database) = cached {
                    return Ok(database);
                }
                let sql = format!(
                    r#"select "DATABASE_NAME" from "INFORMATION_SCHEMA"."DATABASES" where "DATABASE_NAME" like '%\\_{}' escape '\\';"#,
                    escape_like(project_id)
                );
                let data = self.introspect(connection, &sql).await?;

                let suffix = format!("_{project_id}").to_ascii_uppercase();
                let mut candidates: Vec<&str> = data
                    .rows
                    .iter()
                    .filter_map(|row| string_cell(row, DATABASE_NAME_COLUMN))
                    .filter(|name| name.to_ascii_uppercase().ends_with(&suffix))
                    .collect();
                candidates.dedup();
                let database = match candidates.as_slice() {
                    [only] => only.to_string(),
                    [] => {
                        return Err(introspection_failed(
                            &sql,
                            format!("no database of project {project_id} is visible"),
                        ))
                    }
                    several => {
                        return Err(introspection_failed(
                            &sql,
                            format!(
                                "several databases match project {project_id}: {}",
                                several.join(", ")
                            ),
                        ))
                    }
                };

                self.linked_databases
                    .write()
                    .entry(project_id.to_string())
                    .or_insert_with(|| database.clone());
                Ok(database)
            }
        }
    }

    /// Runs a lookup query through the proxy and returns its row set.
    async fn introspect(
        &self,
        connection: &Connection,
        sql: &str,
    ) -> Result<SqlSelectData, WorkspaceError> {
        let response = self.proxy.submit(&connection.workspace_id, sql).await?;
        match QueryResult::from_proxy_response(response)? {
            QueryResult::Rows(data) if !data.rows.is_empty() => Ok(data),
            QueryResult::Rows(_) => Err(introspection_failed(sql, "query returned no rows")),
            QueryResult::Failed { message } => Err(introspection_failed(sql, message)),
            QueryResult::Completed { .. } => Err(introspection_failed(sql, "no result set")),
        }
    }
}

fn introspection_failed(sql: &str, reason: impl Into<String>) -> WorkspaceError {
    WorkspaceError::BackendIntrospectionFailed {
        query: sql.to_string(),
        reason: reason.into(),
    }
}

/// Non-empty string cell, matching the column name exactly first and then
/// case-insensitively.
fn string_cell<'a>(row: &'a Map<String, Value>, column: &str) -> Option<&'a str> {
    row.get(column)
        .or_else(|| {
            row.iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(column))
                .map(|(_, value)| value)
        })
        .and_then(Value::as_str)
        .filter(|text| !text.is_empty())
}

/// Escapes a value for use inside a `like ... escape '\\'` pattern literal.
fn escape_like(value: &str) -> String {
    value
        .replace('\'', "''")
        .replace('%', "\\\\%")
        .replace('_', "\\\\_")
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use kbc_storage::{WorkspaceConnection, WorkspaceRecord};
    use parking_lot::Mutex;
    use serde_json::{json, Value};

    use super::*;
    use crate::DriverRows;

    struct FakeMetadata {
        backend: &'static str,
        user: Option<String>,
        lookups: AtomicUsize,
    }

    impl FakeMetadata {
        fn new(backend: &'static str, user: Option<String>) -> Arc<Self> {
            Arc::new(Self {
                backend,
                user,
                lookups: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl WorkspaceMetadataProvider for FakeMetadata {
        async fn lookup_workspace(&self, schema: &str) -> Result<WorkspaceRecord, WorkspaceError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            Ok(WorkspaceRecord {
                id: "workspace_1234".into(),
                connection: WorkspaceConnection {
                    schema: Some(schema.to_string()),
                    backend: Some(self.backend.to_string()),
                    user: self.user.clone(),
                },
            })
        }
    }

    /// Answers every statement with the next canned response.
    #[derive(Default)]
    struct FakeProxy {
        responses: Mutex<Vec<Value>>,
        seen: Mutex<Vec<(String, String)>>,
    }

    impl FakeProxy {
        fn answering(responses: Vec<Value>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into_iter().rev().collect()),
                seen: Mutex::default(),
            })
        }
    }

    #[async_trait]
    impl QueryProxy for FakeProxy {
        async fn submit(&self, workspace_id: &str, sql: &str) -> Result<Value, WorkspaceError> {
            self.seen
                .lock()
                .push((workspace_id.to_string(), sql.to_string()));
            self.responses
                .lock()
                .pop()
                .ok_or_else(|| WorkspaceError::Transport(anyhow::anyhow!("no canned response")))
        }
    }

    struct FakeDriver {
        outcome: fn(&str) -> Result<DriverOutcome, DriverError>,
    }

    #[async_trait]
    impl DirectDriver for FakeDriver {
        async fn query(&self, sql: &str) -> Result<DriverOutcome, DriverError> {
            (self.outcome)(sql)
        }
    }

    struct FakeConnector {
        outcome: fn(&str) -> Result<DriverOutcome, DriverError>,
        datasets: Mutex<Vec<String>>,
    }

    impl DriverConnector for FakeConnector {
        fn connect(
            &self,
            _key: ServiceAccountKey,
            default_dataset: &str,
        ) -> Result<Arc<dyn DirectDriver>, WorkspaceError> {
            self.datasets.lock().push(default_dataset.to_string());
            Ok(Arc::new(FakeDriver {
                outcome: self.outcome,
            }))
        }
    }

    fn unreachable_driver(_: &str) -> Result<DriverOutcome, DriverError> {
        Err(DriverError::Transport(anyhow::anyhow!("driver not expected")))
    }

    fn connector(outcome: fn(&str) -> Result<DriverOutcome, DriverError>) -> Arc<FakeConnector> {
        Arc::new(FakeConnector {
            outcome,
            datasets: Mutex::default(),
        })
    }

    fn snowflake(proxy: Arc<FakeProxy>) -> (WorkspaceHandle, Arc<FakeMetadata>) {
        let metadata = FakeMetadata::new("snowflake", Some("user_1234".into()));
        let handle = WorkspaceHandle::new(
            "workspace_1234",
            metadata.clone(),
            proxy,
            connector(unreachable_driver),
        );
        (handle, metadata)
    }

    fn bigquery(outcome: fn(&str) -> Result<DriverOutcome, DriverError>) -> WorkspaceHandle {
        let metadata = FakeMetadata::new(
            "bigquery",
            Some(json!({"project_id": "project_1234"}).to_string()),
        );
        WorkspaceHandle::new(
            "workspace_1234",
            metadata,
            FakeProxy::answering(vec![]),
            connector(outcome),
        )
    }

    fn one_row(column: &str, value: &str) -> Value {
        json!({"status": "ok", "data": {"columns": [column], "rows": [{column: value}]}})
    }

    #[tokio::test]
    async fn dialect_is_looked_up_once() {
        let (handle, metadata) = snowflake(FakeProxy::answering(vec![]));
        assert_eq!(handle.cached_dialect(), None);

        assert_eq!(handle.resolve_dialect().await.unwrap(), Dialect::Snowflake);
        assert_eq!(handle.get_sql_dialect().await.unwrap(), "Snowflake");
        assert_eq!(handle.quoted_name("foo").await.unwrap(), "\"foo\"");
        assert_eq!(handle.cached_dialect(), Some(Dialect::Snowflake));
        assert_eq!(metadata.lookups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn racing_first_calls_agree() {
        let (handle, metadata) = snowflake(FakeProxy::answering(vec![]));
        let dialects = futures::future::join_all((0..8).map(|_| handle.resolve_dialect())).await;

        assert!(dialects
            .into_iter()
            .all(|dialect| dialect.unwrap() == Dialect::Snowflake));
        let lookups = metadata.lookups.load(Ordering::SeqCst);
        assert!((1..=8).contains(&lookups));

        handle.resolve_dialect().await.unwrap();
        assert_eq!(metadata.lookups.load(Ordering::SeqCst), lookups);
    }

    #[tokio::test]
    async fn unknown_backend_is_unsupported() {
        let handle = WorkspaceHandle::new(
            "workspace_1234",
            FakeMetadata::new("redshift", None),
            FakeProxy::answering(vec![]),
            connector(unreachable_driver),
        );
        let err = handle.get_sql_dialect().await.unwrap_err();
        assert!(matches!(err, WorkspaceError::UnsupportedBackend(tag) if tag == "redshift"));
        assert_eq!(handle.cached_dialect(), None);
    }

    #[tokio::test]
    async fn snowflake_bare_table_lives_in_the_workspace_schema() {
        let proxy = FakeProxy::answering(vec![one_row("current_database", "db_xyz")]);
        let (handle, _) = snowflake(proxy.clone());

        let fqn = handle
            .get_table_fqn(&TableReference::new("bar", "bar"))
            .await
            .unwrap();
        assert_eq!(
            fqn,
            TableFqn::new("db_xyz", "workspace_1234", "bar", Dialect::Snowflake)
        );
        assert_eq!(fqn.quote_char, '"');

        // second lookup is served from the cache
        let fqn = handle
            .get_table_fqn(&TableReference::new("in.c-foo.bar", "bar"))
            .await
            .unwrap();
        assert_eq!(fqn, TableFqn::new("db_xyz", "in.c-foo", "bar", Dialect::Snowflake));

        let seen = proxy.seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, "workspace_1234");
        assert_eq!(seen[0].1, CURRENT_DATABASE_SQL);
    }

    #[tokio::test]
    async fn snowflake_linked_table_uses_the_source_project_database() {
        let proxy = FakeProxy::answering(vec![one_row("DATABASE_NAME", "sapi_1234")]);
        let (handle, _) = snowflake(proxy.clone());

        let table = TableReference::new("in.c-foo.bar", "bar").with_lineage("1234", "out.c-baz.bam");
        let fqn = handle.get_table_fqn(&table).await.unwrap();
        assert_eq!(
            fqn,
            TableFqn::new("sapi_1234", "out.c-baz", "bam", Dialect::Snowflake)
        );
        assert_eq!(fqn.identifier(), r#""sapi_1234"."out.c-baz"."bam""#);
        assert!(proxy.seen.lock()[0]
            .1
            .contains(r#"like '%\\_1234' escape '\\'"#));
    }

    #[tokio::test]
    async fn linked_database_ignores_other_projects_with_the_same_suffix() {
        let proxy = FakeProxy::answering(vec![json!({"status": "ok", "data": {
            "columns": ["DATABASE_NAME"],
            "rows": [{"DATABASE_NAME": "SAPI_11234"}, {"DATABASE_NAME": "SAPI_1234"}]
        }})]);
        let (handle, _) = snowflake(proxy);

        let table = TableReference::new("in.c-foo.bar", "bar").with_lineage("1234", "out.c-baz.bam");
        let fqn = handle.get_table_fqn(&table).await.unwrap();
        assert_eq!(fqn.db_name, "SAPI_1234");
    }

    #[tokio::test]
    async fn linked_database_must_be_unambiguous() {
        let proxy = FakeProxy::answering(vec![json!({"status": "ok", "data": {
            "columns": ["DATABASE_NAME"],
            "rows": [{"DATABASE_NAME": "SAPI_1234"}, {"DATABASE_NAME": "KBC_EU_1234"}]
        }})]);
        let (handle, _) = snowflake(proxy);

        let table = TableReference::new("in.c-foo.bar", "bar").with_lineage("1234", "out.c-baz.bam");
        let err = handle.get_table_fqn(&table).await.unwrap_err();
        assert!(
            matches!(&err, WorkspaceError::BackendIntrospectionFailed { reason, .. }
                if reason.contains("SAPI_1234") && reason.contains("KBC_EU_1234")),
            "{err:?}"
        );

        let proxy = FakeProxy::answering(vec![one_row("DATABASE_NAME", "SAPI_11234")]);
        let (handle, _) = snowflake(proxy);
        let err = handle.get_table_fqn(&table).await.unwrap_err();
        assert!(matches!(err, WorkspaceError::BackendIntrospectionFailed { .. }));
    }

    #[tokio::test]
    async fn introspection_failures_are_reported() {
        let cases = [
            json!({"status": "error", "message": "Insufficient privileges"}),
            json!({"status": "ok", "data": {"columns": ["current_database"], "rows": []}}),
            json!({"status": "ok", "message": "done"}),
            json!({"status": "ok", "data": {"columns": ["other"], "rows": [{"other": "x"}]}}),
        ];
        for response in cases {
            let (handle, _) = snowflake(FakeProxy::answering(vec![response.clone()]));
            let err = handle
                .get_table_fqn(&TableReference::new("bar", "bar"))
                .await
                .unwrap_err();
            assert!(
                matches!(err, WorkspaceError::BackendIntrospectionFailed { .. }),
                "{response} -> {err:?}"
            );
        }
    }

    #[tokio::test]
    async fn introspection_column_match_falls_back_to_case_insensitive() {
        let proxy = FakeProxy::answering(vec![one_row("CURRENT_DATABASE", "DB_UPPER")]);
        let (handle, _) = snowflake(proxy);
        let fqn = handle
            .get_table_fqn(&TableReference::new("bar", "bar"))
            .await
            .unwrap();
        assert_eq!(fqn.db_name, "DB_UPPER");
    }

    #[tokio::test]
    async fn ambiguous_reference_fails_before_any_lookup() {
        let (handle, metadata) = snowflake(FakeProxy::answering(vec![]));
        let err = handle
            .get_table_fqn(&TableReference::new("foo.bar", "bar"))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkspaceError::AmbiguousReference(_)));
        assert_eq!(metadata.lookups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn bigquery_names_use_the_workspace_project() {
        let handle = bigquery(unreachable_driver);
        assert_eq!(handle.get_sql_dialect().await.unwrap(), "BigQuery");
        assert_eq!(handle.quoted_name("foo").await.unwrap(), "`foo`");

        let fqn = handle
            .get_table_fqn(&TableReference::new("in.c-foo.bar", "bar"))
            .await
            .unwrap();
        assert_eq!(
            fqn,
            TableFqn::new("project_1234", "in_c_foo", "bar", Dialect::BigQuery)
        );
        assert_eq!(fqn.quote_char, '`');

        let fqn = handle
            .get_table_fqn(&TableReference::new("bar", "bar"))
            .await
            .unwrap();
        assert_eq!(
            fqn,
            TableFqn::new("project_1234", "workspace_1234", "bar", Dialect::BigQuery)
        );
    }

    #[tokio::test]
    async fn snowflake_queries_go_through_the_proxy() {
        let proxy = FakeProxy::answering(vec![
            json!({"status": "ok", "data": {
                "columns": ["id", "name", "email"],
                "rows": [
                    {"id": 1, "name": "John", "email": "john@foo.com"},
                    {"id": 2, "name": "Joe", "email": "joe@bar.com"}
                ]
            }}),
            json!({"status": "ok", "message": "1 table created"}),
            json!({"status": "error", "message": "Invalid SQL..."}),
        ]);
        let (handle, _) = snowflake(proxy);

        let rows = handle
            .execute_query("select id, name, email from user;")
            .await
            .unwrap();
        assert_eq!(rows.data().unwrap().rows.len(), 2);

        let created = handle
            .execute_query("create table foo (id integer, name varchar);")
            .await
            .unwrap();
        assert_eq!(created, QueryResult::completed("1 table created"));

        let failed = handle.execute_query("bla bla bla").await.unwrap();
        assert_eq!(failed, QueryResult::failed("Invalid SQL..."));
    }

    #[tokio::test]
    async fn proxy_transport_errors_propagate() {
        let (handle, _) = snowflake(FakeProxy::answering(vec![]));
        let err = handle.execute_query("select 1").await.unwrap_err();
        assert!(matches!(err, WorkspaceError::Transport(_)));
    }

    #[tokio::test]
    async fn bigquery_driver_outcomes_are_normalized() {
        fn outcome(sql: &str) -> Result<DriverOutcome, DriverError> {
            match sql {
                "select" => Ok(DriverOutcome::Rows(DriverRows {
                    fields: vec!["id".into(), "name".into(), "email".into()],
                    rows: vec![
                        vec![json!(1), json!("John"), json!("john@foo.com")],
                        vec![json!(2), json!("Joe"), json!("joe@bar.com")],
                    ],
                })),
                "create" => Ok(DriverOutcome::Statement {
                    summary: "CREATE_TABLE statement executed".into(),
                }),
                "denied" => Err(DriverError::Auth("token expired".into())),
                _ => Err(DriverError::Query("Syntax error: Unexpected identifier".into())),
            }
        }

        let handle = bigquery(outcome);
        let rows = handle.execute_query("select").await.unwrap();
        assert_eq!(
            crate::csv::serialize(&rows),
            "id,name,email\r\n1,John,john@foo.com\r\n2,Joe,joe@bar.com\r\n"
        );

        let created = handle.execute_query("create").await.unwrap();
        assert_eq!(created, QueryResult::completed("CREATE_TABLE statement executed"));

        let failed = handle.execute_query("bla bla bla").await.unwrap();
        assert_eq!(failed.status(), crate::QueryStatus::Error);
        assert!(failed.data().is_none());

        let err = handle.execute_query("denied").await.unwrap_err();
        assert!(matches!(err, WorkspaceError::Auth(_)));
    }

    fn statement_only(_: &str) -> Result<DriverOutcome, DriverError> {
        Ok(DriverOutcome::Statement {
            summary: "statement executed".into(),
        })
    }

    #[tokio::test]
    async fn bigquery_driver_defaults_to_the_workspace_dataset() {
        let connector = connector(statement_only);
        let handle = WorkspaceHandle::new(
            "WORKSPACE_99",
            FakeMetadata::new("bigquery", Some(json!({"project_id": "p"}).to_string())),
            FakeProxy::answering(vec![]),
            connector.clone(),
        );
        handle.resolve_dialect().await.unwrap();
        assert!(connector.datasets.lock().is_empty());

        handle.execute_query("select 1").await.unwrap();
        handle.execute_query("select 2").await.unwrap();
        assert_eq!(*connector.datasets.lock(), vec!["WORKSPACE_99".to_string()]);
    }

    #[tokio::test]
    async fn bigquery_dialect_does_not_depend_on_the_credentials() {
        let metadata = FakeMetadata::new("bigquery", Some("svc-user".into()));
        let handle = WorkspaceHandle::new(
            "workspace_1234",
            metadata.clone(),
            FakeProxy::answering(vec![]),
            connector(unreachable_driver),
        );

        assert_eq!(handle.get_sql_dialect().await.unwrap(), "BigQuery");
        assert_eq!(handle.get_sql_dialect().await.unwrap(), "BigQuery");
        assert_eq!(handle.cached_dialect(), Some(Dialect::BigQuery));
        assert_eq!(metadata.lookups.load(Ordering::SeqCst), 1);

        for _ in 0..2 {
            let err = handle.execute_query("select 1").await.unwrap_err();
            assert!(matches!(err, WorkspaceError::InvalidCredentials(_)));
        }
        assert_eq!(metadata.lookups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn bigquery_without_credentials_is_rejected_on_use() {
        let handle = WorkspaceHandle::new(
            "workspace_1234",
            FakeMetadata::new("bigquery", None),
            FakeProxy::answering(vec![]),
            connector(unreachable_driver),
        );
        assert_eq!(handle.resolve_dialect().await.unwrap(), Dialect::BigQuery);
        let err = handle
            .get_table_fqn(&TableReference::new("bar", "bar"))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkspaceError::InvalidCredentials(_)));
    }
}
