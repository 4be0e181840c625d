use std::fmt::Write;

use anyhow::Result;
use ci_relay_core::{
    BridgeError,
    log::format_log,
    models::{CheckRun, CheckRunOutput, CheckStatus},
    payload::SignedPayload,
    status::{JobStatus, translate},
};
use ci_relay_gitlab::models::{Job, JobEvent, Pipeline, Project};

use crate::Bridge;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackOutcome {
    /// The job matched an ignore pattern. Nothing was fetched.
    Ignored,
    Reported,
}

impl Bridge {
    /// Report a GitLab job back to the commit that triggered its pipeline.
    pub async fn handle_job_event(&self, event: &JobEvent) -> Result<CallbackOutcome> {
        if event.object_kind != "build" {
            return Err(BridgeError::InvalidBuild(event.object_kind.clone()).into());
        }
        if let Some(name) = event.build_name.as_deref() {
            if self.is_ignored_job(name) {
                tracing::debug!("Ignoring job {} ({})", event.build_id, name);
                return Ok(CallbackOutcome::Ignored);
            }
        }

        let (project_id, pipeline_id) = (event.project_id, event.pipeline_id);
        let (pipeline, variables, project, job) = tokio::try_join!(
            self.gitlab.pipeline(project_id, pipeline_id),
            self.gitlab.pipeline_variables(project_id, pipeline_id),
            self.gitlab.project(project_id),
            self.gitlab.job(project_id, event.build_id),
        )?;

        let payload = match SignedPayload::from_variables(&variables)
            .and_then(|signed| signed.open(&self.signer))
        {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!("Refusing to report job {} of pipeline {}: {}", job.id, pipeline_id, e);
                return Err(e.into());
            }
        };
        tracing::debug!("Installation id: {}", payload.installation_id);
        let github = self.github.installation(payload.installation_id)?;

        let status = job.status.parse::<JobStatus>()?;
        tracing::debug!("Job {} is reported as '{}'", job.id, status);
        let translation = translate(status, job.allow_failure);
        let completed = translation.status == CheckStatus::Completed;

        let text = if completed {
            let log = self.gitlab.job_log(project.id, job.id).await?;
            let log = format_log(&log, self.config.bridge.log_limit);
            tracing::debug!("Log is {} characters", log.len());
            Some(format!("```\n{log}\n```"))
        } else {
            None
        };

        let check_run = CheckRun {
            name: format!("{} / {}", self.check_name(), job.name),
            head_sha: payload.head_sha.clone(),
            status: translation.status,
            conclusion: translation.conclusion,
            head_branch: None,
            started_at: job.started_at.clone(),
            completed_at: if completed { job.finished_at.clone() } else { None },
            details_url: Some(job.web_url.clone()),
            external_id: Some(self.gitlab.job_url(project.id, job.id)),
            output: CheckRunOutput {
                title: translation.title,
                summary: summary(status, &job, &pipeline, &project),
                text,
            },
        };
        tracing::debug!(
            "Posting check run for {} to {}/check-runs",
            payload.head_sha,
            payload.repo_url
        );
        github.create_check_run(&payload.repo_url, &check_run).await?;

        if let Err(e) =
            self.dispatch_job_finished(github.as_ref(), &payload.repo_name, &job, &project, &pipeline).await
        {
            tracing::error!("Failed to trigger GitHub workflow for {}: {e:?}", payload.repo_name);
        }
        Ok(CallbackOutcome::Reported)
    }
}

fn summary(status: JobStatus, job: &Job, pipeline: &Pipeline, project: &Project) -> String {
    let missing = || "None".to_string();
    let mut summary = format!(
        "This check triggered job [{path}/{job_id}]({job_url})\n\
         in pipeline [{path}/{iid}]({pipeline_url})\n\
         Status: {status}\n\
         Created at: {created}\n\
         Started at: {started}\n\
         Finished at: {finished}\n",
        path = project.path_with_namespace,
        job_id = job.id,
        job_url = job.web_url,
        iid = pipeline.iid,
        pipeline_url = pipeline.web_url,
        status = status.as_str().to_uppercase(),
        created = job.created_at.clone().unwrap_or_else(missing),
        started = job.started_at.clone().unwrap_or_else(missing),
        finished = job.finished_at.clone().unwrap_or_else(missing),
    );
    if status == JobStatus::Failed {
        if let Some(errors) = &pipeline.yaml_errors {
            let _ = write!(summary, "\n\nError in YAML:\n{errors}");
        }
    }
    summary
}
