use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: u64,
    pub iid: u64,
    pub project_id: u64,
    pub sha: String,
    #[serde(rename = "ref")]
    pub ref_field: String,
    pub status: String,
    pub web_url: String,
    #[serde(default)]
    pub yaml_errors: Option<String>,
}

/// Entry of a pipeline listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineSummary {
    pub id: u64,
    pub status: String,
    #[serde(rename = "ref")]
    pub ref_field: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobPipeline {
    pub id: u64,
    pub project_id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: u64,
    pub name: String,
    pub status: String,
    pub web_url: String,
    #[serde(default)]
    pub allow_failure: bool,
    pub created_at: Option<String>,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    pub pipeline: Option<JobPipeline>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: u64,
    pub name: String,
    pub path_with_namespace: String,
    pub web_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineVariable {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineScope {
    Running,
    Pending,
}

impl PipelineScope {
    pub fn as_str(self) -> &'static str {
        match self {
            PipelineScope::Running => "running",
            PipelineScope::Pending => "pending",
        }
    }
}

/// Payload of a `Job Hook` delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobEvent {
    pub object_kind: String,
    pub project_id: u64,
    pub pipeline_id: u64,
    pub build_id: u64,
    pub build_name: Option<String>,
    pub build_status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CreatedPipeline {
    pub id: u64,
    pub web_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerResponse {
    Created(CreatedPipeline),
    /// GitLab answered 422 with this message.
    Rejected(String),
}

/// Webhook deliveries, keyed by the `X-Gitlab-Event` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GitLabEvent {
    Job(Box<JobEvent>),
    Pipeline,
    Other(String),
}

impl GitLabEvent {
    pub fn parse(kind: &str, body: &[u8]) -> serde_json::Result<Self> {
        Ok(match kind {
            "Job Hook" => Self::Job(serde_json::from_slice(body)?),
            "Pipeline Hook" => Self::Pipeline,
            other => Self::Other(other.to_string()),
        })
    }
}
