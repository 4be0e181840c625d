//! `repository_dispatch` back to GitHub when a GitLab job finishes.

use anyhow::Result;
use ci_relay_github::models::RepositoryDispatch;
use ci_relay_gitlab::models::{Job, Pipeline, Project};
use serde_json::{Value, json};

use crate::{Bridge, api::GitHubApi};

impl Bridge {
    /// Send the job result to `repo_name` if dispatch is enabled, the status
    /// is selected and the repository has a workflow listening for it.
    /// Returns whether an event was sent.
    pub(crate) async fn dispatch_job_finished(
        &self,
        github: &dyn GitHubApi,
        repo_name: &str,
        job: &Job,
        project: &Project,
        pipeline: &Pipeline,
    ) -> Result<bool> {
        let dispatch = &self.config.bridge.dispatch;
        if !dispatch.enabled || !dispatch.statuses.iter().any(|s| *s == job.status) {
            return Ok(false);
        }
        if !self.has_dispatch_workflow(github, repo_name).await? {
            tracing::debug!("{} has no workflow for {}, skipping", repo_name, dispatch.event_type);
            return Ok(false);
        }
        let body = RepositoryDispatch {
            event_type: dispatch.event_type.clone(),
            client_payload: client_payload(job, project, pipeline),
        };
        if self.config.bridge.dry_run {
            tracing::info!(
                "Dry run: not dispatching {} to {} (job: {}, status: {})",
                dispatch.event_type,
                repo_name,
                job.name,
                job.status
            );
            return Ok(false);
        }
        github.repository_dispatch(repo_name, &body).await?;
        tracing::info!(
            "Dispatched {} to {} (job: {}, status: {})",
            dispatch.event_type,
            repo_name,
            job.name,
            job.status
        );
        Ok(true)
    }

    async fn has_dispatch_workflow(&self, github: &dyn GitHubApi, repo_name: &str) -> Result<bool> {
        let event_type = &self.config.bridge.dispatch.event_type;
        for path in github.workflow_paths(repo_name).await? {
            match github.file_contents(repo_name, &path).await {
                Ok(Some(contents)) => {
                    if contents.contains("repository_dispatch") && contents.contains(event_type.as_str())
                    {
                        tracing::debug!("Found {} trigger in {}: {}", event_type, repo_name, path);
                        return Ok(true);
                    }
                }
                Ok(None) => tracing::debug!("Workflow {} not found in {}", path, repo_name),
                Err(e) => tracing::debug!("Error checking workflow {} in {}: {e:?}", path, repo_name),
            }
        }
        Ok(false)
    }
}

fn client_payload(job: &Job, project: &Project, pipeline: &Pipeline) -> Value {
    json!({
        "job_status": job.status,
        "job_name": job.name,
        "job_id": job.id,
        "job_url": job.web_url,
        "project_name": project.name,
        "project_path": project.path_with_namespace,
        "ref": pipeline.ref_field,
        "commit_sha": pipeline.sha,
        "pipeline_id": pipeline.id,
        "pipeline_url": pipeline.web_url,
        "created_at": job.created_at,
        "started_at": job.started_at,
        "finished_at": job.finished_at,
        "allow_failure": job.allow_failure,
        "gitlab_project_id": project.id,
    })
}
