use serde::Serialize;
use serde_json::json;

use super::{ToolDescriptor, ToolError, ToolOutput};
use crate::{
    links::{Link, LinksManager},
    session::Session,
};

/// Metadata key holding the project description on the default branch.
const PROJECT_DESCRIPTION_KEY: &str = "KBC.projectDescription";

#[derive(Debug, Serialize)]
struct ProjectInfo {
    project_id: String,
    project_name: String,
    project_description: String,
    organization_id: String,
    sql_dialect: &'static str,
    links: Vec<Link>,
}

pub(super) fn descriptors() -> Vec<ToolDescriptor> {
    vec![ToolDescriptor::new(
        "get_project_info",
        "Returns the project id, name, description, organization, SQL dialect and a link \
         to the project dashboard.",
        json!({"type": "object", "properties": {}}),
    )]
}

pub(super) async fn get_project_info(session: &Session) -> Result<ToolOutput, ToolError> {
    let token = session.storage.verify_token().await?;
    let metadata = session.storage.project_metadata().await?;
    let sql_dialect = session.workspace.get_sql_dialect().await?;

    let project_description = metadata
        .into_iter()
        .find(|entry| entry.key == PROJECT_DESCRIPTION_KEY)
        .map(|entry| entry.value)
        .unwrap_or_default();
    let links = LinksManager::new(session.storage.base_url()).project_links(&token.owner.id);

    ToolOutput::json(&ProjectInfo {
        project_id: token.owner.id,
        project_name: token.owner.name,
        project_description,
        organization_id: token.organization.map(|org| org.id).unwrap_or_default(),
        sql_dialect,
        links,
    })
}
