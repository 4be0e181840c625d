use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Queued,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Conclusion {
    Success,
    Failure,
    Neutral,
    Cancelled,
}

/// A check run as posted to `POST {repo_url}/check-runs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckRun {
    pub name: String,
    pub head_sha: String,
    pub status: CheckStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conclusion: Option<Conclusion>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub head_branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details_url: Option<String>,
    /// Canonical GitLab API URL of the job, used to retry it later.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    pub output: CheckRunOutput,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckRunOutput {
    pub title: String,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl CheckRun {
    fn completed(
        name: &str,
        head_sha: &str,
        conclusion: Conclusion,
        title: &str,
        summary: &str,
    ) -> Self {
        Self {
            name: name.to_string(),
            head_sha: head_sha.to_string(),
            status: CheckStatus::Completed,
            conclusion: Some(conclusion),
            head_branch: Some(String::new()),
            started_at: None,
            completed_at: None,
            details_url: None,
            external_id: None,
            output: CheckRunOutput {
                title: title.to_string(),
                summary: summary.to_string(),
                text: None,
            },
        }
    }

    /// Neutral result for a change the bridge refused to build.
    pub fn refused(name: &str, head_sha: &str, summary: &str) -> Self {
        Self::completed(name, head_sha, Conclusion::Neutral, "Pipeline refused", summary)
    }

    /// Failed result for a pipeline GitLab would not create.
    pub fn creation_failed(name: &str, head_sha: &str, message: &str) -> Self {
        Self::completed(name, head_sha, Conclusion::Failure, "Pipeline could not be created", message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optional_fields_are_omitted() {
        let check_run = CheckRun::refused("CI Bridge", "abc123", "No pipeline was triggered");
        let value = serde_json::to_value(&check_run).unwrap();
        assert_eq!(value["status"], "completed");
        assert_eq!(value["conclusion"], "neutral");
        assert_eq!(value["output"]["title"], "Pipeline refused");
        assert!(value.get("started_at").is_none());
        assert!(value.get("external_id").is_none());
        assert!(value["output"].get("text").is_none());
    }

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(serde_json::to_value(CheckStatus::InProgress).unwrap(), "in_progress");
        assert_eq!(serde_json::to_value(Conclusion::Cancelled).unwrap(), "cancelled");
    }
}
