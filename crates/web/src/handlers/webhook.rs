use std::sync::Arc;

use axum::{extract::State, http::StatusCode};
use ci_relay_bridge::{Bridge, retry::with_retry};
use ci_relay_github::webhook::GitHubWebhook;
use ci_relay_gitlab::{models::GitLabEvent, webhook::GitLabWebhook};

/// Verified GitHub deliveries are acknowledged at once and handled on a
/// background task.
pub async fn github(
    State(bridge): State<Arc<Bridge>>,
    GitHubWebhook { event, delivery }: GitHubWebhook,
) -> StatusCode {
    tracing::info!(
        "Received GitHub {} event (delivery: {})",
        event.kind(),
        delivery.as_deref().unwrap_or("unknown")
    );
    tokio::spawn(async move {
        let label = format!("GitHub {} event", event.kind());
        // Failures are logged by the retry runner
        let _ = with_retry(&bridge.config.bridge.retry, &label, || {
            bridge.handle_github_event(&event)
        })
        .await;
    });
    StatusCode::OK
}

pub async fn gitlab(
    State(bridge): State<Arc<Bridge>>,
    GitLabWebhook { event }: GitLabWebhook,
) -> StatusCode {
    match event {
        GitLabEvent::Job(job) => {
            tracing::info!(
                "Received GitLab job {} (pipeline {}, status {})",
                job.build_id,
                job.pipeline_id,
                job.build_status.as_deref().unwrap_or("unknown")
            );
            tokio::spawn(async move {
                let label = format!("GitLab job {}", job.build_id);
                let _ = with_retry(&bridge.config.bridge.retry, &label, || {
                    bridge.handle_job_event(&job)
                })
                .await;
            });
        }
        GitLabEvent::Pipeline => tracing::debug!("Received pipeline report"),
        GitLabEvent::Other(kind) => tracing::debug!("Ignoring GitLab event {}", kind),
    }
    StatusCode::OK
}
