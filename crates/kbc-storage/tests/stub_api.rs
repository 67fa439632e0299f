use std::net::SocketAddr;

use anyhow::Result;
use axum::{
    extract::{Path, Query},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use kbc_storage::{
    ComponentType, JobSearch, JobStatus, JobsClient, NewConfiguration, StorageClient,
    StorageError,
};
use serde_json::{json, Value};

async fn serve(router: Router) -> Result<SocketAddr> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    Ok(addr)
}

fn require_token(headers: &HeaderMap) -> Result<(), StatusCode> {
    match headers.get("x-storageapi-token").and_then(|v| v.to_str().ok()) {
        Some("test-token") => Ok(()),
        _ => Err(StatusCode::UNAUTHORIZED),
    }
}

async fn list_workspaces(headers: HeaderMap) -> Result<Json<Value>, StatusCode> {
    require_token(&headers)?;
    Ok(Json(json!([
        {
            "id": 1234,
            "connection": {"schema": "WORKSPACE_1234", "backend": "snowflake", "user": "U_1234"}
        }
    ])))
}

async fn workspace_query(
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, StatusCode> {
    require_token(&headers)?;
    let query = body["query"].as_str().unwrap_or_default();
    if query.starts_with("select") {
        Ok(Json(json!({
            "status": "ok",
            "data": {"columns": ["workspace"], "rows": [{"workspace": id}]}
        })))
    } else {
        Ok(Json(json!({"status": "error", "message": "SQL compilation error"})))
    }
}

async fn search_jobs(
    headers: HeaderMap,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<Json<Value>, StatusCode> {
    require_token(&headers)?;
    let limit = params
        .iter()
        .find(|(k, _)| k == "limit")
        .map(|(_, v)| v.clone())
        .unwrap_or_default();
    Ok(Json(json!([
        {"id": 1, "status": "success", "componentId": "keboola.ex-http", "isFinished": true,
         "createdTime": "2024-01-01T00:00:00+01:00", "durationSeconds": 12.5, "configId": limit}
    ])))
}

async fn create_job(headers: HeaderMap, Json(body): Json<Value>) -> Result<Json<Value>, StatusCode> {
    require_token(&headers)?;
    Ok(Json(json!({
        "id": "987",
        "status": "created",
        "component": body["component"],
        "config": body["config"],
        "result": []
    })))
}

async fn list_components(
    headers: HeaderMap,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<Json<Value>, StatusCode> {
    require_token(&headers)?;
    assert!(params.contains(&("include".to_string(), "configuration".to_string())));
    let component_type = params
        .iter()
        .find(|(k, _)| k == "componentType")
        .map(|(_, v)| v.clone())
        .unwrap_or_default();
    Ok(Json(json!([
        {"id": "keboola.ex-http", "name": "HTTP", "type": component_type,
         "configurations": [{"id": 42, "name": "Daily export"}]}
    ])))
}

async fn create_configuration(
    headers: HeaderMap,
    Path(component_id): Path<String>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, StatusCode> {
    require_token(&headers)?;
    assert_eq!(component_id, "keboola.snowflake-transformation");
    Ok(Json(json!({
        "id": "7001",
        "name": body["name"],
        "description": body["description"],
        "version": 1,
        "configuration": body["configuration"]
    })))
}

fn router() -> Router {
    Router::new()
        .route("/v2/storage/workspaces", get(list_workspaces))
        .route("/v2/storage/workspaces/:id/query", post(workspace_query))
        .route("/v2/storage/tables/:id", get(|| async { StatusCode::NOT_FOUND }))
        .route("/search/jobs", get(search_jobs))
        .route("/jobs", post(create_job))
        .route("/v2/storage/branch/default/components", get(list_components))
        .route(
            "/v2/storage/branch/default/components/:id/configs",
            post(create_configuration),
        )
        .route(
            "/v2/storage/branch/default/components/:id/configs/:config/metadata",
            get(|Path((id, config)): Path<(String, String)>| async move {
                Json(json!([{"id": "5", "key": "KBC.configuration.folderName", "value": format!("{id}/{config}")}]))
            }),
        )
}

#[tokio::test]
async fn lists_workspaces_with_token_header() -> Result<()> {
    let addr = serve(router()).await?;
    let client = StorageClient::new("test-token", &format!("http://{addr}"))?;

    let workspaces = client.list_workspaces().await?;
    assert_eq!(workspaces.len(), 1);
    assert_eq!(workspaces[0].id, "1234");
    assert_eq!(
        workspaces[0].connection.schema.as_deref(),
        Some("WORKSPACE_1234")
    );
    Ok(())
}

#[tokio::test]
async fn wrong_token_surfaces_as_auth_error() -> Result<()> {
    let addr = serve(router()).await?;
    let client = StorageClient::new("other", &format!("http://{addr}"))?;

    let err = client.list_workspaces().await.unwrap_err();
    assert!(err.is_auth());
    Ok(())
}

#[tokio::test]
async fn query_failures_come_back_in_the_body() -> Result<()> {
    let addr = serve(router()).await?;
    let client = StorageClient::new("test-token", &format!("http://{addr}"))?;

    let ok = client.workspace_query("1234", "select 1").await?;
    assert_eq!(ok["data"]["rows"][0]["workspace"], "1234");

    let failed = client.workspace_query("1234", "bla bla").await?;
    assert_eq!(failed["status"], "error");
    assert_eq!(failed["message"], "SQL compilation error");
    Ok(())
}

#[tokio::test]
async fn missing_table_maps_to_not_found() -> Result<()> {
    let addr = serve(router()).await?;
    let client = StorageClient::new("test-token", &format!("http://{addr}"))?;

    let err = client.table_detail("in.c-foo.missing").await.unwrap_err();
    assert!(err.is_not_found());
    assert!(matches!(err, StorageError::Status { .. }));
    Ok(())
}

#[tokio::test]
async fn jobs_search_and_create() -> Result<()> {
    let addr = serve(router()).await?;
    let jobs = JobsClient::new("test-token", &format!("http://{addr}"))?;

    let found = jobs
        .search_jobs(&JobSearch {
            limit: 0,
            ..JobSearch::default()
        })
        .await?;
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, "1");
    assert_eq!(found[0].status, JobStatus::Success);
    assert_eq!(found[0].duration_seconds, Some(12.5));
    // limit 0 is clamped to 1 before it leaves the client
    assert_eq!(found[0].config_id.as_deref(), Some("1"));

    let created = jobs.create_job("keboola.ex-http", "42").await?;
    assert_eq!(created.summary.id, "987");
    assert_eq!(created.summary.config_id.as_deref(), Some("42"));
    assert!(created.result.is_empty());
    Ok(())
}

#[tokio::test]
async fn components_are_listed_per_type_with_configurations() -> Result<()> {
    let addr = serve(router()).await?;
    let client = StorageClient::new("test-token", &format!("http://{addr}"))?;

    let writers = client.list_components(Some(ComponentType::Writer)).await?;
    assert_eq!(writers.len(), 1);
    assert_eq!(writers[0].component_type, "writer");
    assert_eq!(writers[0].configurations[0].id, "42");

    // without a type filter the stub echoes an empty type
    let all = client.list_components(None).await?;
    assert_eq!(all[0].component_type, "");

    let metadata = client
        .configuration_metadata("keboola.ex-http", "42")
        .await?;
    assert_eq!(metadata[0].value, "keboola.ex-http/42");
    Ok(())
}

#[tokio::test]
async fn configurations_are_created_from_a_json_body() -> Result<()> {
    let addr = serve(router()).await?;
    let client = StorageClient::new("test-token", &format!("http://{addr}"))?;

    let created = client
        .create_configuration(
            "keboola.snowflake-transformation",
            &NewConfiguration {
                name: "Orders rollup".to_string(),
                description: "daily".to_string(),
                configuration: json!({"parameters": {"blocks": []}}),
            },
        )
        .await?;
    assert_eq!(created.id, "7001");
    assert_eq!(created.name, "Orders rollup");
    assert_eq!(created.description.as_deref(), Some("daily"));
    assert_eq!(created.configuration["parameters"]["blocks"], json!([]));
    Ok(())
}
