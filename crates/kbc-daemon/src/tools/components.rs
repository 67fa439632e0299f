use futures::future::try_join_all;
use kbc_storage::{Component, ComponentType, Configuration, MetadataEntry, NewConfiguration};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use super::{ToolDescriptor, ToolError, ToolOutput};
use crate::session::Session;

#[derive(Debug, Default, Deserialize)]
pub(super) struct RetrieveConfigurationsArgs {
    #[serde(default)]
    component_types: Vec<ComponentType>,
    #[serde(default)]
    component_ids: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct RetrieveTransformationsArgs {
    #[serde(default)]
    transformation_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct ComponentArgs {
    component_id: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct ConfigurationArgs {
    component_id: String,
    configuration_id: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct CreateTransformationArgs {
    name: String,
    description: String,
    sql_statements: Vec<String>,
    #[serde(default)]
    created_table_names: Vec<String>,
}

/// What a component can do, read from its UI flags.
#[derive(Debug, Clone, Serialize, PartialEq)]
struct ComponentSummary {
    component_id: String,
    component_name: String,
    component_type: String,
    is_row_based: bool,
    has_table_input_mapping: bool,
    has_table_output_mapping: bool,
    has_file_input_mapping: bool,
    has_file_output_mapping: bool,
    has_oauth: bool,
}

impl From<&Component> for ComponentSummary {
    fn from(component: &Component) -> Self {
        let flag = |name: &str| component.flags.iter().any(|f| f == name);
        Self {
            component_id: component.id.clone(),
            component_name: component.name.clone(),
            component_type: component.component_type.clone(),
            is_row_based: flag("genericDockerUI-rows"),
            has_table_input_mapping: flag("genericDockerUI-tableInput"),
            has_table_output_mapping: flag("genericDockerUI-tableOutput"),
            has_file_input_mapping: flag("genericDockerUI-fileInput"),
            has_file_output_mapping: flag("genericDockerUI-fileOutput"),
            has_oauth: flag("genericDockerUI-authorization"),
        }
    }
}

#[derive(Debug, Serialize)]
struct ComponentDetailOutput {
    #[serde(flatten)]
    summary: ComponentSummary,
    component_categories: Vec<String>,
    documentation_url: Option<String>,
    documentation: Option<String>,
    root_configuration_schema: Option<Value>,
    row_configuration_schema: Option<Value>,
}

impl From<Component> for ComponentDetailOutput {
    fn from(component: Component) -> Self {
        Self {
            summary: ComponentSummary::from(&component),
            component_categories: component.categories,
            documentation_url: component.documentation_url,
            documentation: component.documentation,
            root_configuration_schema: component.configuration_schema,
            row_configuration_schema: component.configuration_row_schema,
        }
    }
}

#[derive(Debug, Serialize)]
struct ConfigurationSummary {
    component_id: String,
    configuration_id: String,
    configuration_name: String,
    configuration_description: Option<String>,
    is_disabled: bool,
    is_deleted: bool,
}

impl ConfigurationSummary {
    fn new(component_id: &str, configuration: &Configuration) -> Self {
        Self {
            component_id: component_id.to_string(),
            configuration_id: configuration.id.clone(),
            configuration_name: configuration.name.clone(),
            configuration_description: configuration.description.clone(),
            is_disabled: configuration.is_disabled,
            is_deleted: configuration.is_deleted,
        }
    }
}

#[derive(Debug, Serialize)]
struct ConfigurationListing {
    root_configuration: ConfigurationSummary,
    row_configurations: Vec<ConfigurationSummary>,
}

impl ConfigurationListing {
    fn new(component_id: &str, configuration: &Configuration) -> Self {
        Self {
            root_configuration: ConfigurationSummary::new(component_id, configuration),
            row_configurations: configuration
                .rows
                .iter()
                .map(|row| ConfigurationSummary::new(component_id, row))
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ComponentWithConfigurations {
    component: ComponentSummary,
    configurations: Vec<ConfigurationListing>,
}

impl ComponentWithConfigurations {
    fn new(component: &Component, configurations: &[Configuration]) -> Self {
        Self {
            component: ComponentSummary::from(component),
            configurations: configurations
                .iter()
                .map(|configuration| ConfigurationListing::new(&component.id, configuration))
                .collect(),
        }
    }
}

/// A root configuration or one of its rows, with its mappings split out.
#[derive(Debug, Serialize)]
struct ConfigurationDetail {
    #[serde(flatten)]
    summary: ConfigurationSummary,
    version: Option<u64>,
    table_input_mapping: Option<Value>,
    table_output_mapping: Option<Value>,
    configuration_parameters: Value,
}

impl ConfigurationDetail {
    fn new(component_id: &str, configuration: &Configuration) -> Self {
        let section = |pointer: &str| configuration.configuration.pointer(pointer).cloned();
        Self {
            summary: ConfigurationSummary::new(component_id, configuration),
            version: configuration.version,
            table_input_mapping: section("/storage/input"),
            table_output_mapping: section("/storage/output"),
            configuration_parameters: section("/parameters").unwrap_or_else(|| json!({})),
        }
    }
}

#[derive(Debug, Serialize)]
struct ConfigurationDetailOutput {
    component: ComponentDetailOutput,
    root_configuration: ConfigurationDetail,
    row_configurations: Vec<ConfigurationDetail>,
    configuration_metadata: Vec<MetadataEntry>,
}

#[derive(Debug, Serialize)]
struct CreatedConfiguration {
    #[serde(flatten)]
    summary: ConfigurationSummary,
    version: Option<u64>,
    configuration: Value,
    component: ComponentDetailOutput,
}

pub(super) fn descriptors() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor::new(
            "list_components",
            "Lists all components used in the project with their capabilities.",
            json!({"type": "object", "properties": {}}),
        ),
        ToolDescriptor::new(
            "list_component_configs",
            "Lists the configurations of one component.",
            json!({
                "type": "object",
                "properties": {"component_id": {"type": "string"}},
                "required": ["component_id"]
            }),
        ),
        ToolDescriptor::new(
            "retrieve_component_configurations",
            "Lists components with their configurations. Without filters it lists \
             applications, extractors and writers.",
            json!({
                "type": "object",
                "properties": {
                    "component_types": {
                        "type": "array",
                        "items": {"type": "string", "enum": ["application", "extractor", "writer"]}
                    },
                    "component_ids": {"type": "array", "items": {"type": "string"}}
                }
            }),
        ),
        ToolDescriptor::new(
            "retrieve_transformations",
            "Lists transformations with their configurations, optionally only the given ones.",
            json!({
                "type": "object",
                "properties": {
                    "transformation_ids": {"type": "array", "items": {"type": "string"}}
                }
            }),
        ),
        ToolDescriptor::new(
            "get_component_detail",
            "Returns the detail of one component: its capabilities, documentation and \
             configuration schemas.",
            json!({
                "type": "object",
                "properties": {"component_id": {"type": "string"}},
                "required": ["component_id"]
            }),
        ),
        ToolDescriptor::new(
            "get_component_configuration_details",
            "Returns one configuration of a component with its rows, mappings and metadata.",
            json!({
                "type": "object",
                "properties": {
                    "component_id": {"type": "string"},
                    "configuration_id": {"type": "string"}
                },
                "required": ["component_id", "configuration_id"]
            }),
        ),
        ToolDescriptor::new(
            "create_sql_transformation",
            "Creates a SQL transformation in the dialect of the project workspace. Reference input \
             tables by their fully qualified names; list tables the statements create in \
             created_table_names.",
            json!({
                "type": "object",
                "properties": {
                    "name": {"type": "string"},
                    "description": {"type": "string"},
                    "sql_statements": {"type": "array", "items": {"type": "string"}},
                    "created_table_names": {"type": "array", "items": {"type": "string"}, "default": []}
                },
                "required": ["name", "description", "sql_statements"]
            }),
        ),
    ]
}

pub(super) async fn list_components(session: &Session) -> Result<ToolOutput, ToolError> {
    let components = session.storage.list_components(None).await?;
    let summaries: Vec<ComponentSummary> = components.iter().map(ComponentSummary::from).collect();
    ToolOutput::json(&summaries)
}

pub(super) async fn list_component_configs(
    session: &Session,
    args: ComponentArgs,
) -> Result<ToolOutput, ToolError> {
    let configurations = session.storage.list_configurations(&args.component_id).await?;
    let summaries: Vec<ConfigurationSummary> = configurations
        .iter()
        .map(|configuration| ConfigurationSummary::new(&args.component_id, configuration))
        .collect();
    ToolOutput::json(&summaries)
}

pub(super) async fn retrieve_component_configurations(
    session: &Session,
    args: RetrieveConfigurationsArgs,
) -> Result<ToolOutput, ToolError> {
    if !args.component_ids.is_empty() {
        return ToolOutput::json(&by_ids(session, &args.component_ids).await?);
    }
    let types = if args.component_types.is_empty() {
        ComponentType::NON_TRANSFORMATION.to_vec()
    } else {
        args.component_types
    };
    ToolOutput::json(&by_types(session, &types).await?)
}

pub(super) async fn retrieve_transformations(
    session: &Session,
    args: RetrieveTransformationsArgs,
) -> Result<ToolOutput, ToolError> {
    if args.transformation_ids.is_empty() {
        ToolOutput::json(&by_types(session, &[ComponentType::Transformation]).await?)
    } else {
        ToolOutput::json(&by_ids(session, &args.transformation_ids).await?)
    }
}

pub(super) async fn get_component_detail(
    session: &Session,
    args: ComponentArgs,
) -> Result<ToolOutput, ToolError> {
    let component = session.storage.component_detail(&args.component_id).await?;
    ToolOutput::json(&ComponentDetailOutput::from(component))
}

pub(super) async fn get_component_configuration_details(
    session: &Session,
    args: ConfigurationArgs,
) -> Result<ToolOutput, ToolError> {
    let storage = &session.storage;
    let (component, configuration, metadata) = tokio::try_join!(
        storage.component_detail(&args.component_id),
        storage.configuration_detail(&args.component_id, &args.configuration_id),
        storage.configuration_metadata(&args.component_id, &args.configuration_id),
    )?;

    ToolOutput::json(&ConfigurationDetailOutput {
        root_configuration: ConfigurationDetail::new(&component.id, &configuration),
        row_configurations: configuration
            .rows
            .iter()
            .map(|row| ConfigurationDetail::new(&component.id, row))
            .collect(),
        configuration_metadata: metadata,
        component: component.into(),
    })
}

pub(super) async fn create_sql_transformation(
    session: &Session,
    args: CreateTransformationArgs,
) -> Result<ToolOutput, ToolError> {
    let dialect = session.workspace.resolve_dialect().await?;
    let component_id = dialect.transformation_component();

    let request = NewConfiguration {
        configuration: transformation_configuration(
            &args.name,
            &args.sql_statements,
            &args.created_table_names,
        ),
        name: args.name,
        description: args.description,
    };
    let created = session
        .storage
        .create_configuration(component_id, &request)
        .await?;
    info!(component_id, configuration_id = %created.id, "transformation created");

    let component = session.storage.component_detail(component_id).await?;
    ToolOutput::json(&CreatedConfiguration {
        summary: ConfigurationSummary::new(component_id, &created),
        version: created.version,
        configuration: created.configuration,
        component: component.into(),
    })
}

async fn by_types(
    session: &Session,
    types: &[ComponentType],
) -> Result<Vec<ComponentWithConfigurations>, ToolError> {
    let listed = try_join_all(
        types
            .iter()
            .map(|component_type| session.storage.list_components(Some(*component_type))),
    )
    .await?;
    Ok(listed
        .iter()
        .flatten()
        .map(|component| ComponentWithConfigurations::new(component, &component.configurations))
        .collect())
}

async fn by_ids(
    session: &Session,
    component_ids: &[String],
) -> Result<Vec<ComponentWithConfigurations>, ToolError> {
    try_join_all(component_ids.iter().map(|component_id| async move {
        let storage = &session.storage;
        let (component, configurations) = tokio::try_join!(
            storage.component_detail(component_id),
            storage.list_configurations(component_id),
        )?;
        Ok::<_, ToolError>(ComponentWithConfigurations::new(&component, &configurations))
    }))
    .await
}

/// Output bucket for tables a transformation creates: the name lowercased
/// with whitespace runs turned into dashes.
fn output_bucket(transformation_name: &str) -> String {
    transformation_name
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("-")
}

/// Configuration body of a single-block, single-code SQL transformation.
fn transformation_configuration(
    name: &str,
    statements: &[String],
    created_tables: &[String],
) -> Value {
    let bucket = output_bucket(name);
    let outputs: Vec<Value> = created_tables
        .iter()
        .map(|table| json!({"source": table, "destination": format!("out.c-{bucket}.{table}")}))
        .collect();
    json!({
        "parameters": {
            "blocks": [{
                "name": "Block 0",
                "codes": [{"name": "Code 0", "script": statements}]
            }]
        },
        "storage": {
            "input": {"tables": []},
            "output": {"tables": outputs}
        }
    })
}
