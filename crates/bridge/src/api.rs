//! The remote calls the bridge makes, as traits so handlers can run against
//! in-memory implementations.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use ci_relay_core::{BridgeError, models::CheckRun, payload::Variables};
use ci_relay_github::{
    GitHub, InstallationClient,
    models::{PullRequest, RepositoryDispatch},
};
use ci_relay_gitlab::{
    GitLab,
    models::{Job, Pipeline, PipelineScope, PipelineSummary, Project, TriggerResponse},
};

#[async_trait]
pub trait GitLabApi: Send + Sync {
    fn job_url(&self, project_id: u64, job_id: u64) -> String;
    fn check_job_url<'a>(&self, url: &'a str) -> Result<&'a str, BridgeError>;

    async fn pipeline(&self, project_id: u64, pipeline_id: u64) -> Result<Pipeline>;
    async fn pipeline_variables(&self, project_id: u64, pipeline_id: u64) -> Result<Variables>;
    async fn project(&self, project_id: u64) -> Result<Project>;
    async fn job(&self, project_id: u64, job_id: u64) -> Result<Job>;
    async fn job_by_url(&self, url: &str) -> Result<Job>;
    async fn job_log(&self, project_id: u64, job_id: u64) -> Result<String>;
    async fn pipelines(&self, project_id: u64, scope: PipelineScope)
    -> Result<Vec<PipelineSummary>>;
    async fn cancel_pipeline(&self, project_id: u64, pipeline_id: u64) -> Result<()>;
    async fn retry_job(&self, url: &str) -> Result<()>;
    async fn trigger_pipeline(&self, variables: &Variables) -> Result<TriggerResponse>;
}

/// Calls made as one installation of the GitHub App.
#[async_trait]
pub trait GitHubApi: Send + Sync {
    async fn file_download_url(
        &self,
        repo_url: &str,
        path: &str,
        git_ref: &str,
    ) -> Result<Option<String>>;
    async fn create_check_run(&self, repo_url: &str, check_run: &CheckRun) -> Result<()>;
    async fn is_team_member(&self, org: &str, team: &str, user: &str) -> Result<bool>;
    async fn repository_ids(&self) -> Result<Vec<u64>>;
    async fn check_run_external_ids(&self, check_runs_url: &str) -> Result<Vec<String>>;
    async fn pull_request(&self, url: &str) -> Result<PullRequest>;
    async fn add_reaction(&self, reactions_url: &str, content: &str) -> Result<()>;
    async fn workflow_paths(&self, repo_name: &str) -> Result<Vec<String>>;
    async fn file_contents(&self, repo_name: &str, path: &str) -> Result<Option<String>>;
    async fn repository_dispatch(
        &self,
        repo_name: &str,
        dispatch: &RepositoryDispatch,
    ) -> Result<()>;
}

/// The app itself, before acting as any installation.
#[async_trait]
pub trait GitHubApp: Send + Sync {
    fn installation(&self, installation_id: u64) -> Result<Arc<dyn GitHubApi>>;

    /// Fails if the app cannot authenticate against GitHub.
    async fn check_app(&self) -> Result<()>;
}

#[async_trait]
impl GitLabApi for GitLab {
    fn job_url(&self, project_id: u64, job_id: u64) -> String {
        GitLab::job_url(self, project_id, job_id)
    }

    fn check_job_url<'a>(&self, url: &'a str) -> Result<&'a str, BridgeError> {
        GitLab::check_job_url(self, url)
    }

    async fn pipeline(&self, project_id: u64, pipeline_id: u64) -> Result<Pipeline> {
        GitLab::pipeline(self, project_id, pipeline_id).await
    }

    async fn pipeline_variables(&self, project_id: u64, pipeline_id: u64) -> Result<Variables> {
        GitLab::pipeline_variables(self, project_id, pipeline_id).await
    }

    async fn project(&self, project_id: u64) -> Result<Project> {
        GitLab::project(self, project_id).await
    }

    async fn job(&self, project_id: u64, job_id: u64) -> Result<Job> {
        GitLab::job(self, project_id, job_id).await
    }

    async fn job_by_url(&self, url: &str) -> Result<Job> { GitLab::job_by_url(self, url).await }

    async fn job_log(&self, project_id: u64, job_id: u64) -> Result<String> {
        GitLab::job_log(self, project_id, job_id).await
    }

    async fn pipelines(
        &self,
        project_id: u64,
        scope: PipelineScope,
    ) -> Result<Vec<PipelineSummary>> {
        GitLab::pipelines(self, project_id, scope).await
    }

    async fn cancel_pipeline(&self, project_id: u64, pipeline_id: u64) -> Result<()> {
        GitLab::cancel_pipeline(self, project_id, pipeline_id).await
    }

    async fn retry_job(&self, url: &str) -> Result<()> { GitLab::retry_job(self, url).await }

    async fn trigger_pipeline(&self, variables: &Variables) -> Result<TriggerResponse> {
        GitLab::trigger_pipeline(self, variables).await
    }
}

#[async_trait]
impl GitHubApi for InstallationClient {
    async fn file_download_url(
        &self,
        repo_url: &str,
        path: &str,
        git_ref: &str,
    ) -> Result<Option<String>> {
        InstallationClient::file_download_url(self, repo_url, path, git_ref).await
    }

    async fn create_check_run(&self, repo_url: &str, check_run: &CheckRun) -> Result<()> {
        InstallationClient::create_check_run(self, repo_url, check_run).await
    }

    async fn is_team_member(&self, org: &str, team: &str, user: &str) -> Result<bool> {
        InstallationClient::is_team_member(self, org, team, user).await
    }

    async fn repository_ids(&self) -> Result<Vec<u64>> {
        InstallationClient::repository_ids(self).await
    }

    async fn check_run_external_ids(&self, check_runs_url: &str) -> Result<Vec<String>> {
        InstallationClient::check_run_external_ids(self, check_runs_url).await
    }

    async fn pull_request(&self, url: &str) -> Result<PullRequest> {
        InstallationClient::pull_request(self, url).await
    }

    async fn add_reaction(&self, reactions_url: &str, content: &str) -> Result<()> {
        InstallationClient::add_reaction(self, reactions_url, content).await
    }

    async fn workflow_paths(&self, repo_name: &str) -> Result<Vec<String>> {
        InstallationClient::workflow_paths(self, repo_name).await
    }

    async fn file_contents(&self, repo_name: &str, path: &str) -> Result<Option<String>> {
        InstallationClient::file_contents(self, repo_name, path).await
    }

    async fn repository_dispatch(
        &self,
        repo_name: &str,
        dispatch: &RepositoryDispatch,
    ) -> Result<()> {
        InstallationClient::repository_dispatch(self, repo_name, dispatch).await
    }
}

#[async_trait]
impl GitHubApp for GitHub {
    fn installation(&self, installation_id: u64) -> Result<Arc<dyn GitHubApi>> {
        Ok(Arc::new(GitHub::installation(self, installation_id)?))
    }

    async fn check_app(&self) -> Result<()> {
        GitHub::app_info(self).await?;
        Ok(())
    }
}
