//! Keboola UI links attached to tool results.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LinkType {
    UiDetail,
    UiDashboard,
    Docs,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    #[serde(rename = "type")]
    pub kind: LinkType,
    pub title: String,
    pub url: String,
}

/// Builds UI URLs relative to the Storage API stack the session talks to.
#[derive(Debug, Clone)]
pub struct LinksManager {
    base_url: String,
}

impl LinksManager {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn project_url(&self, project_id: &str) -> String {
        format!("{}/admin/projects/{project_id}", self.base_url)
    }

    pub fn project_links(&self, project_id: &str) -> Vec<Link> {
        vec![Link {
            kind: LinkType::UiDetail,
            title: "Project Dashboard".to_string(),
            url: self.project_url(project_id),
        }]
    }
}
