use kbc_storage::{jobs::MAX_JOB_LIMIT, JobSearch};
use serde::Deserialize;
use serde_json::json;

use super::{ToolDescriptor, ToolError, ToolOutput};
use crate::session::Session;

#[derive(Debug, Deserialize)]
pub(super) struct JobArgs {
    job_id: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct StartJobArgs {
    component_id: String,
    #[serde(alias = "config_id")]
    configuration_id: String,
}

pub(super) fn descriptors() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor::new(
            "retrieve_jobs",
            "Lists jobs of the project, newest first unless sorted otherwise. \
             Filters by status, component and configuration.",
            json!({
                "type": "object",
                "properties": {
                    "status": {
                        "type": "string",
                        "enum": [
                            "created", "waiting", "processing", "success", "error",
                            "terminating", "terminated", "cancelled", "warning"
                        ]
                    },
                    "component_id": {"type": "string"},
                    "config_id": {"type": "string"},
                    "limit": {"type": "integer", "minimum": 1, "maximum": MAX_JOB_LIMIT, "default": 100},
                    "offset": {"type": "integer", "minimum": 0, "default": 0},
                    "sort_by": {"type": "string", "default": "startTime"},
                    "sort_order": {"type": "string", "enum": ["asc", "desc"], "default": "desc"}
                }
            }),
        ),
        ToolDescriptor::new(
            "get_job_detail",
            "Returns the full detail of one job, including its result.",
            json!({
                "type": "object",
                "properties": {"job_id": {"type": "string"}},
                "required": ["job_id"]
            }),
        ),
        ToolDescriptor::new(
            "start_job",
            "Starts a run of a component configuration and returns the created job.",
            json!({
                "type": "object",
                "properties": {
                    "component_id": {"type": "string"},
                    "configuration_id": {"type": "string"}
                },
                "required": ["component_id", "configuration_id"]
            }),
        ),
    ]
}

pub(super) async fn retrieve_jobs(
    session: &Session,
    search: JobSearch,
) -> Result<ToolOutput, ToolError> {
    ToolOutput::json(&session.jobs.search_jobs(&search).await?)
}

pub(super) async fn get_job_detail(
    session: &Session,
    args: JobArgs,
) -> Result<ToolOutput, ToolError> {
    ToolOutput::json(&session.jobs.job_detail(&args.job_id).await?)
}

pub(super) async fn start_job(
    session: &Session,
    args: StartJobArgs,
) -> Result<ToolOutput, ToolError> {
    let job = session
        .jobs
        .create_job(&args.component_id, &args.configuration_id)
        .await?;
    ToolOutput::json(&job)
}
