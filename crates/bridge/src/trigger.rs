use anyhow::Result;
use ci_relay_core::{
    models::CheckRun,
    payload::{BridgePayload, make_repo_slug},
};
use ci_relay_gitlab::models::TriggerResponse;

use crate::{Bridge, api::GitHubApi};

/// What to build and where to report it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerContext {
    pub installation_id: u64,
    /// API URL of the repository receiving check runs.
    pub repo_url: String,
    /// `owner/repo` of the repository receiving check runs.
    pub repo_name: String,
    pub head_sha: String,
    pub head_ref: String,
    pub clone_url: String,
    /// `owner/repo` of the repository the commit is cloned from.
    pub clone_repo_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    Triggered { pipeline_id: u64, web_url: String },
    /// Everything but the submission ran.
    DryRun,
    /// No pipeline definition at `head_sha`. A neutral check run was posted.
    MissingConfig,
    /// GitLab refused the pipeline. A failed check run was posted.
    Rejected(String),
}

impl Bridge {
    /// Resolve the CI config, sign the payload, cancel redundant pipelines and
    /// submit a new one.
    pub async fn trigger(
        &self,
        github: &dyn GitHubApi,
        context: &TriggerContext,
    ) -> Result<TriggerOutcome> {
        let path = &self.config.bridge.ci_config_path;
        tracing::debug!("Resolving {} of {} at {}", path, context.repo_name, context.head_sha);
        let Some(config_url) =
            github.file_download_url(&context.repo_url, path, &context.head_sha).await?
        else {
            tracing::info!("No {} in {} at {}", path, context.repo_name, context.head_sha);
            let summary = format!("No pipeline definition `{path}` found at {}", context.head_sha);
            github
                .create_check_run(
                    &context.repo_url,
                    &CheckRun::refused(self.check_name(), &context.head_sha, &summary),
                )
                .await?;
            return Ok(TriggerOutcome::MissingConfig);
        };

        let payload = BridgePayload {
            installation_id: context.installation_id,
            repo_url: context.repo_url.clone(),
            repo_slug: make_repo_slug(&context.repo_name),
            repo_name: context.repo_name.clone(),
            head_sha: context.head_sha.clone(),
            head_ref: context.head_ref.clone(),
            config_url,
            clone_url: context.clone_url.clone(),
            clone_repo_slug: make_repo_slug(&context.clone_repo_name),
            clone_repo_name: context.clone_repo_name.clone(),
        };
        let variables = payload.to_variables(&self.signer);

        self.cancel_if_redundant(&context.head_ref, &context.clone_url).await?;

        if self.config.bridge.dry_run {
            tracing::info!(
                "Dry run: not triggering pipeline for {} at {}",
                context.repo_name,
                context.head_sha
            );
            return Ok(TriggerOutcome::DryRun);
        }

        match self.gitlab.trigger_pipeline(&variables).await? {
            TriggerResponse::Created(pipeline) => {
                tracing::info!(
                    "Triggered pipeline {} for {} at {}",
                    pipeline.id,
                    context.repo_name,
                    context.head_sha
                );
                Ok(TriggerOutcome::Triggered { pipeline_id: pipeline.id, web_url: pipeline.web_url })
            }
            TriggerResponse::Rejected(message) => {
                tracing::info!("Pipeline was not created: {}", message);
                github
                    .create_check_run(
                        &context.repo_url,
                        &CheckRun::creation_failed(self.check_name(), &context.head_sha, &message),
                    )
                    .await?;
                Ok(TriggerOutcome::Rejected(message))
            }
        }
    }
}
