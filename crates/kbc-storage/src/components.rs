//! Components and their configurations on the default branch.
//!
//! The API lists components together with their configurations when asked
//! with `include=configuration`; ids of configurations come back as numbers
//! or strings depending on the endpoint.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, instrument};

use crate::{models::string_or_number, MetadataEntry, StorageClient, StorageError};

/// Component types a project can hold configurations for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentType {
    Application,
    Extractor,
    Writer,
    Transformation,
}

impl ComponentType {
    /// Types listed when a caller asks for "all components".
    pub const NON_TRANSFORMATION: [ComponentType; 3] = [
        ComponentType::Application,
        ComponentType::Extractor,
        ComponentType::Writer,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ComponentType::Application => "application",
            ComponentType::Extractor => "extractor",
            ComponentType::Writer => "writer",
            ComponentType::Transformation => "transformation",
        }
    }
}

impl fmt::Display for ComponentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComponentType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "application" => Ok(ComponentType::Application),
            "extractor" => Ok(ComponentType::Extractor),
            "writer" => Ok(ComponentType::Writer),
            "transformation" => Ok(ComponentType::Transformation),
            other => Err(format!("unknown component type '{other}'")),
        }
    }
}

/// A component as returned by the components endpoints.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Component {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub component_type: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub flags: Vec<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default, alias = "documentationUrl")]
    pub documentation_url: Option<String>,
    #[serde(default)]
    pub documentation: Option<String>,
    #[serde(default, alias = "configurationSchema")]
    pub configuration_schema: Option<Value>,
    #[serde(default, alias = "configurationRowSchema")]
    pub configuration_row_schema: Option<Value>,
    /// Present only when listed with `include=configuration`.
    #[serde(default)]
    pub configurations: Vec<Configuration>,
}

/// A component configuration. Configuration rows share the same shape.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Configuration {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub created: Option<String>,
    #[serde(default, alias = "isDisabled")]
    pub is_disabled: bool,
    #[serde(default, alias = "isDeleted")]
    pub is_deleted: bool,
    #[serde(default)]
    pub version: Option<u64>,
    #[serde(default)]
    pub configuration: Value,
    #[serde(default)]
    pub rows: Vec<Configuration>,
}

/// Body of a configuration create request.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NewConfiguration {
    pub name: String,
    pub description: String,
    pub configuration: Value,
}

impl StorageClient {
    /// Components of the project, each with its configurations. `None` lists
    /// every type.
    #[instrument(skip(self))]
    pub async fn list_components(
        &self,
        component_type: Option<ComponentType>,
    ) -> Result<Vec<Component>, StorageError> {
        let path = match component_type {
            Some(component_type) => format!(
                "branch/default/components?componentType={component_type}&include=configuration"
            ),
            None => "branch/default/components?include=configuration".to_string(),
        };
        let components: Vec<Component> = self.get_json(&path).await?;
        debug!(count = components.len(), "components listed");
        Ok(components)
    }

    pub async fn component_detail(&self, component_id: &str) -> Result<Component, StorageError> {
        self.get_json(&format!("branch/default/components/{component_id}"))
            .await
    }

    pub async fn list_configurations(
        &self,
        component_id: &str,
    ) -> Result<Vec<Configuration>, StorageError> {
        self.get_json(&format!("branch/default/components/{component_id}/configs"))
            .await
    }

    pub async fn configuration_detail(
        &self,
        component_id: &str,
        configuration_id: &str,
    ) -> Result<Configuration, StorageError> {
        self.get_json(&format!(
            "branch/default/components/{component_id}/configs/{configuration_id}"
        ))
        .await
    }

    pub async fn configuration_metadata(
        &self,
        component_id: &str,
        configuration_id: &str,
    ) -> Result<Vec<MetadataEntry>, StorageError> {
        self.get_json(&format!(
            "branch/default/components/{component_id}/configs/{configuration_id}/metadata"
        ))
        .await
    }

    #[instrument(skip(self, configuration), fields(name = %configuration.name))]
    pub async fn create_configuration(
        &self,
        component_id: &str,
        configuration: &NewConfiguration,
    ) -> Result<Configuration, StorageError> {
        self.post_json(
            &format!("branch/default/components/{component_id}/configs"),
            &json!(configuration),
        )
        .await
    }
}
