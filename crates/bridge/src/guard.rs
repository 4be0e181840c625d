use anyhow::Result;
use ci_relay_core::payload::{CLONE_URL, HEAD_REF};
use ci_relay_gitlab::models::PipelineScope;

use crate::Bridge;

impl Bridge {
    /// Cancel running or pending pipelines that build the same branch of the
    /// same clone. Returns how many were cancelled.
    ///
    /// Matching is exact string equality on `HEAD_REF` and `CLONE_URL`. A
    /// pipeline whose variables can't be read, or whose cancel fails, is
    /// logged and skipped.
    pub async fn cancel_if_redundant(&self, head_ref: &str, clone_url: &str) -> Result<usize> {
        let project_id = self.config.gitlab.project_id;
        tracing::debug!("Checking for redundant pipelines of {} on {}", head_ref, clone_url);
        let mut cancelled = 0;
        for scope in [PipelineScope::Running, PipelineScope::Pending] {
            for pipeline in self.gitlab.pipelines(project_id, scope).await? {
                let variables = match self.gitlab.pipeline_variables(project_id, pipeline.id).await
                {
                    Ok(variables) => variables,
                    Err(e) => {
                        tracing::warn!("Failed to fetch variables of pipeline {}: {e:?}", pipeline.id);
                        continue;
                    }
                };
                let redundant = variables.get(HEAD_REF).is_some_and(|v| v == head_ref)
                    && variables.get(CLONE_URL).is_some_and(|v| v == clone_url);
                if !redundant {
                    continue;
                }
                tracing::info!(
                    "Cancelling {} pipeline {} for {} on {}",
                    scope.as_str(),
                    pipeline.id,
                    head_ref,
                    clone_url
                );
                match self.gitlab.cancel_pipeline(project_id, pipeline.id).await {
                    Ok(()) => cancelled += 1,
                    Err(e) => tracing::warn!("Failed to cancel pipeline {}: {e:?}", pipeline.id),
                }
            }
        }
        Ok(cancelled)
    }
}
