//! In-memory GitHub and GitLab for exercising the bridge.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
};

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use ci_relay_core::{
    BridgeError,
    config::{
        BridgeConfig, Config, DispatchConfig, GitHubConfig, GitLabConfig, RetryConfig, Secret,
        ServerConfig,
    },
    models::CheckRun,
    payload::Variables,
};
use ci_relay_github::models::{
    PullRequest, PullRequestBase, PullRequestHead, Repository, RepositoryDispatch, User,
};
use ci_relay_gitlab::models::{
    CreatedPipeline, Job, JobPipeline, Pipeline, PipelineScope, PipelineSummary, Project,
    TriggerResponse,
};

use crate::api::{GitHubApi, GitHubApp, GitLabApi};

pub const API_URL: &str = "https://gitlab.example.com/api/v4";
pub const PROJECT_ID: u64 = 1234;
pub const CONFIG_URL: &str =
    "https://raw.githubusercontent.com/test_org/test_repo/abc123/.gitlab-ci.yml";

pub fn test_config() -> Config {
    Config {
        server: ServerConfig { port: 0 },
        github: GitHubConfig {
            app_id: 42,
            private_key: Secret::new("unused"),
            webhook_secret: Secret::new("gh-secret"),
            allow_team: "test_org/ci-users".to_string(),
            extra_users: vec!["friend".to_string()],
        },
        gitlab: GitLabConfig {
            api_url: API_URL.to_string(),
            access_token: Secret::new("gl-token"),
            project_id: PROJECT_ID,
            trigger_url: format!("{API_URL}/projects/{PROJECT_ID}/trigger/pipeline"),
            trigger_token: Secret::new("trigger-token"),
            trigger_ref: "main".to_string(),
            webhook_secret: Secret::new("gl-secret"),
            ignored_job_patterns: vec![],
        },
        bridge: BridgeConfig {
            trigger_secret: Secret::new("payload-key"),
            dry_run: false,
            log_limit: 1000,
            ci_config_path: ".gitlab-ci.yml".to_string(),
            check_name: "CI Bridge".to_string(),
            retry: RetryConfig { attempts: 3, initial_delay_ms: 1, max_delay_ms: 2 },
            dispatch: DispatchConfig::default(),
        },
    }
}

pub fn repository(full_name: &str, id: u64) -> Repository {
    Repository {
        id,
        url: format!("https://api.github.com/repos/{full_name}"),
        full_name: full_name.to_string(),
        clone_url: format!("https://github.com/{full_name}.git"),
    }
}

pub fn pull_request(author: &str, head_repo: &str, head_ref: &str, head_sha: &str) -> PullRequest {
    PullRequest {
        number: 7,
        user: User { login: author.to_string() },
        head: PullRequestHead {
            ref_field: head_ref.to_string(),
            sha: head_sha.to_string(),
            repo: repository(head_repo, 2),
            user: User { login: head_repo.split('/').next().unwrap_or_default().to_string() },
        },
        base: PullRequestBase { repo: repository("test_org/test_repo", 1) },
        draft: false,
    }
}

pub fn job(id: u64, name: &str, status: &str, allow_failure: bool) -> Job {
    let finished = matches!(status, "success" | "failed" | "canceled" | "skipped");
    Job {
        id,
        name: name.to_string(),
        status: status.to_string(),
        web_url: format!("https://gitlab.example.com/ci/bridge/-/jobs/{id}"),
        allow_failure,
        created_at: Some("2024-05-01T10:00:00Z".to_string()),
        started_at: Some("2024-05-01T10:01:00Z".to_string()),
        finished_at: finished.then(|| "2024-05-01T10:05:00Z".to_string()),
        pipeline: Some(JobPipeline { id: 55, project_id: PROJECT_ID }),
    }
}

pub fn pipeline(id: u64) -> Pipeline {
    Pipeline {
        id,
        iid: 9,
        project_id: PROJECT_ID,
        sha: "fedcba".to_string(),
        ref_field: "main".to_string(),
        status: "running".to_string(),
        web_url: format!("https://gitlab.example.com/ci/bridge/-/pipelines/{id}"),
        yaml_errors: None,
    }
}

pub fn project() -> Project {
    Project {
        id: PROJECT_ID,
        name: "bridge".to_string(),
        path_with_namespace: "ci/bridge".to_string(),
        web_url: "https://gitlab.example.com/ci/bridge".to_string(),
    }
}

#[derive(Default)]
pub struct GitLabState {
    pub pipelines: HashMap<u64, Pipeline>,
    pub variables: HashMap<u64, Variables>,
    pub variable_failures: HashSet<u64>,
    pub jobs: HashMap<u64, Job>,
    pub logs: HashMap<u64, String>,
    pub running: Vec<u64>,
    pub pending: Vec<u64>,
    pub cancel_failures: HashSet<u64>,
    pub rejection: Option<String>,
    pub trigger_error: bool,
    pub transient_failures: u32,
    pub project_unreachable: bool,

    pub calls: Vec<String>,
    pub triggered: Vec<Variables>,
    pub cancelled: Vec<u64>,
    pub retried: Vec<String>,
}

#[derive(Default)]
pub struct FakeGitLab {
    pub state: Mutex<GitLabState>,
}

impl FakeGitLab {
    fn record(&self, call: String) { self.state.lock().unwrap().calls.push(call); }

    pub fn calls(&self) -> Vec<String> { self.state.lock().unwrap().calls.clone() }

    pub fn triggered(&self) -> Vec<Variables> { self.state.lock().unwrap().triggered.clone() }

    pub fn cancelled(&self) -> Vec<u64> { self.state.lock().unwrap().cancelled.clone() }

    pub fn retried(&self) -> Vec<String> { self.state.lock().unwrap().retried.clone() }
}

#[async_trait]
impl GitLabApi for FakeGitLab {
    fn job_url(&self, project_id: u64, job_id: u64) -> String {
        format!("{API_URL}/projects/{project_id}/jobs/{job_id}")
    }

    fn check_job_url<'a>(&self, url: &'a str) -> Result<&'a str, BridgeError> {
        if url.starts_with(&format!("{API_URL}/")) {
            Ok(url)
        } else {
            Err(BridgeError::IncompatibleJobUrl(url.to_string()))
        }
    }

    async fn pipeline(&self, _project_id: u64, pipeline_id: u64) -> Result<Pipeline> {
        self.record(format!("pipeline {pipeline_id}"));
        let mut state = self.state.lock().unwrap();
        if state.transient_failures > 0 {
            state.transient_failures -= 1;
            bail!("502 Bad Gateway");
        }
        state.pipelines.get(&pipeline_id).cloned().ok_or_else(|| anyhow!("404 pipeline"))
    }

    async fn pipeline_variables(&self, _project_id: u64, pipeline_id: u64) -> Result<Variables> {
        self.record(format!("variables {pipeline_id}"));
        let state = self.state.lock().unwrap();
        if state.variable_failures.contains(&pipeline_id) {
            bail!("500 Internal Server Error");
        }
        Ok(state.variables.get(&pipeline_id).cloned().unwrap_or_default())
    }

    async fn project(&self, project_id: u64) -> Result<Project> {
        self.record(format!("project {project_id}"));
        if self.state.lock().unwrap().project_unreachable {
            bail!("503 Service Unavailable");
        }
        Ok(project())
    }

    async fn job(&self, _project_id: u64, job_id: u64) -> Result<Job> {
        self.record(format!("job {job_id}"));
        self.state.lock().unwrap().jobs.get(&job_id).cloned().ok_or_else(|| anyhow!("404 job"))
    }

    async fn job_by_url(&self, url: &str) -> Result<Job> {
        let url = self.check_job_url(url)?;
        self.record(format!("job_by_url {url}"));
        let id = url.rsplit('/').next().and_then(|id| id.parse::<u64>().ok());
        let state = self.state.lock().unwrap();
        id.and_then(|id| state.jobs.get(&id).cloned()).ok_or_else(|| anyhow!("404 job"))
    }

    async fn job_log(&self, _project_id: u64, job_id: u64) -> Result<String> {
        self.record(format!("log {job_id}"));
        Ok(self.state.lock().unwrap().logs.get(&job_id).cloned().unwrap_or_default())
    }

    async fn pipelines(
        &self,
        project_id: u64,
        scope: PipelineScope,
    ) -> Result<Vec<PipelineSummary>> {
        self.record(format!("pipelines {project_id} {}", scope.as_str()));
        let state = self.state.lock().unwrap();
        let ids = match scope {
            PipelineScope::Running => &state.running,
            PipelineScope::Pending => &state.pending,
        };
        Ok(ids
            .iter()
            .map(|&id| PipelineSummary {
                id,
                status: scope.as_str().to_string(),
                ref_field: "main".to_string(),
            })
            .collect())
    }

    async fn cancel_pipeline(&self, _project_id: u64, pipeline_id: u64) -> Result<()> {
        self.record(format!("cancel {pipeline_id}"));
        let mut state = self.state.lock().unwrap();
        if state.cancel_failures.contains(&pipeline_id) {
            bail!("409 Conflict");
        }
        state.cancelled.push(pipeline_id);
        Ok(())
    }

    async fn retry_job(&self, url: &str) -> Result<()> {
        let url = self.check_job_url(url)?;
        self.record(format!("retry {url}"));
        self.state.lock().unwrap().retried.push(url.to_string());
        Ok(())
    }

    async fn trigger_pipeline(&self, variables: &Variables) -> Result<TriggerResponse> {
        self.record("trigger".to_string());
        let mut state = self.state.lock().unwrap();
        if state.trigger_error {
            bail!("500 Internal Server Error");
        }
        state.triggered.push(variables.clone());
        Ok(match &state.rejection {
            Some(message) => TriggerResponse::Rejected(message.clone()),
            None => TriggerResponse::Created(CreatedPipeline {
                id: 900,
                web_url: "https://gitlab.example.com/ci/bridge/-/pipelines/900".to_string(),
            }),
        })
    }
}

#[derive(Default)]
pub struct GitHubState {
    pub missing_config: bool,
    pub members: HashSet<String>,
    pub membership_error: bool,
    pub repository_ids: Vec<u64>,
    pub check_run_ids: Vec<String>,
    pub pull_requests: HashMap<String, PullRequest>,
    pub workflows: Vec<(String, String)>,
    pub dispatch_error: bool,
    pub app_unreachable: bool,
    pub reaction_error: bool,

    pub installations: Vec<u64>,
    pub check_runs: Vec<(String, CheckRun)>,
    pub reactions: Vec<(String, String)>,
    pub dispatches: Vec<(String, RepositoryDispatch)>,
}

/// Every installation shares one state.
#[derive(Default, Clone)]
pub struct FakeGitHub {
    pub state: Arc<Mutex<GitHubState>>,
}

impl FakeGitHub {
    pub fn with_members(members: &[&str]) -> Self {
        let github = Self::default();
        github.state.lock().unwrap().members = members.iter().map(|m| m.to_string()).collect();
        github
    }

    pub fn check_runs(&self) -> Vec<(String, CheckRun)> {
        self.state.lock().unwrap().check_runs.clone()
    }

    pub fn dispatches(&self) -> Vec<(String, RepositoryDispatch)> {
        self.state.lock().unwrap().dispatches.clone()
    }
}

#[async_trait]
impl GitHubApp for FakeGitHub {
    fn installation(&self, installation_id: u64) -> Result<Arc<dyn GitHubApi>> {
        self.state.lock().unwrap().installations.push(installation_id);
        Ok(Arc::new(self.clone()))
    }

    async fn check_app(&self) -> Result<()> {
        if self.state.lock().unwrap().app_unreachable {
            bail!("401 Bad credentials");
        }
        Ok(())
    }
}

#[async_trait]
impl GitHubApi for FakeGitHub {
    async fn file_download_url(
        &self,
        _repo_url: &str,
        _path: &str,
        _git_ref: &str,
    ) -> Result<Option<String>> {
        let state = self.state.lock().unwrap();
        Ok((!state.missing_config).then(|| CONFIG_URL.to_string()))
    }

    async fn create_check_run(&self, repo_url: &str, check_run: &CheckRun) -> Result<()> {
        self.state.lock().unwrap().check_runs.push((repo_url.to_string(), check_run.clone()));
        Ok(())
    }

    async fn is_team_member(&self, _org: &str, _team: &str, user: &str) -> Result<bool> {
        let state = self.state.lock().unwrap();
        if state.membership_error {
            bail!("502 Bad Gateway");
        }
        Ok(state.members.contains(user))
    }

    async fn repository_ids(&self) -> Result<Vec<u64>> {
        Ok(self.state.lock().unwrap().repository_ids.clone())
    }

    async fn check_run_external_ids(&self, _check_runs_url: &str) -> Result<Vec<String>> {
        Ok(self.state.lock().unwrap().check_run_ids.clone())
    }

    async fn pull_request(&self, url: &str) -> Result<PullRequest> {
        self.state
            .lock()
            .unwrap()
            .pull_requests
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow!("404 pull request"))
    }

    async fn add_reaction(&self, reactions_url: &str, content: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.reaction_error {
            bail!("403 Resource not accessible by integration");
        }
        state.reactions.push((reactions_url.to_string(), content.to_string()));
        Ok(())
    }

    async fn workflow_paths(&self, _repo_name: &str) -> Result<Vec<String>> {
        Ok(self.state.lock().unwrap().workflows.iter().map(|(path, _)| path.clone()).collect())
    }

    async fn file_contents(&self, _repo_name: &str, path: &str) -> Result<Option<String>> {
        let state = self.state.lock().unwrap();
        Ok(state.workflows.iter().find(|(p, _)| p == path).map(|(_, contents)| contents.clone()))
    }

    async fn repository_dispatch(
        &self,
        repo_name: &str,
        dispatch: &RepositoryDispatch,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.dispatch_error {
            bail!("422 Unprocessable Entity");
        }
        state.dispatches.push((repo_name.to_string(), dispatch.clone()));
        Ok(())
    }
}
