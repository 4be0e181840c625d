//! The subset of GitHub webhook payloads the bridge reads.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub login: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub id: u64,
    pub url: String,
    pub full_name: String,
    pub clone_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestHead {
    #[serde(rename = "ref")]
    pub ref_field: String,
    pub sha: String,
    pub repo: Repository,
    pub user: User,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestBase {
    pub repo: Repository,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub user: User,
    pub head: PullRequestHead,
    pub base: PullRequestBase,
    #[serde(default)]
    pub draft: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub login: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Installation {
    pub id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pusher {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckRunRef {
    #[serde(default)]
    pub external_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckSuiteApp {
    pub id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckSuite {
    pub id: u64,
    pub app: CheckSuiteApp,
    pub head_sha: String,
    pub check_runs_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reactions {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: u64,
    pub body: String,
    pub user: User,
    pub reactions: Reactions,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuePullRequest {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub number: u64,
    pub pull_request: Option<IssuePullRequest>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestEvent {
    pub action: String,
    pub pull_request: PullRequest,
    pub organization: Organization,
    pub installation: Installation,
    pub sender: User,
    pub repository: Repository,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushEvent {
    #[serde(rename = "ref")]
    pub ref_field: String,
    pub after: String,
    pub sender: User,
    pub pusher: Pusher,
    pub organization: Organization,
    pub repository: Repository,
    pub installation: Installation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckSuiteEvent {
    pub action: String,
    pub check_suite: CheckSuite,
    pub sender: User,
    pub organization: Organization,
    pub repository: Repository,
    pub installation: Installation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckRunEvent {
    pub action: String,
    pub check_run: CheckRunRef,
    pub sender: User,
    pub organization: Organization,
    pub repository: Repository,
    pub installation: Installation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueCommentEvent {
    pub action: String,
    pub comment: Comment,
    pub issue: Issue,
    pub sender: User,
    pub organization: Organization,
    pub repository: Repository,
    pub installation: Installation,
}

/// Webhook events the bridge acts on, keyed by the `X-GitHub-Event` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GitHubEvent {
    PullRequest(Box<PullRequestEvent>),
    Push(Box<PushEvent>),
    CheckSuite(Box<CheckSuiteEvent>),
    CheckRun(Box<CheckRunEvent>),
    IssueComment(Box<IssueCommentEvent>),
    Ping,
    Other(String),
}

impl GitHubEvent {
    pub fn parse(kind: &str, body: &[u8]) -> serde_json::Result<Self> {
        Ok(match kind {
            "pull_request" => Self::PullRequest(serde_json::from_slice(body)?),
            "push" => Self::Push(serde_json::from_slice(body)?),
            "check_suite" => Self::CheckSuite(serde_json::from_slice(body)?),
            "check_run" => Self::CheckRun(serde_json::from_slice(body)?),
            "issue_comment" => Self::IssueComment(serde_json::from_slice(body)?),
            "ping" => Self::Ping,
            other => Self::Other(other.to_string()),
        })
    }

    pub fn kind(&self) -> &str {
        match self {
            Self::PullRequest(_) => "pull_request",
            Self::Push(_) => "push",
            Self::CheckSuite(_) => "check_suite",
            Self::CheckRun(_) => "check_run",
            Self::IssueComment(_) => "issue_comment",
            Self::Ping => "ping",
            Self::Other(kind) => kind,
        }
    }
}

/// Body of `POST /repos/{owner}/{repo}/dispatches`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryDispatch {
    pub event_type: String,
    pub client_payload: serde_json::Value,
}
