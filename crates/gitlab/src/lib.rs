pub mod models;
pub mod webhook;

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use ci_relay_core::{
    BridgeError,
    config::{GitLabConfig, Secret},
    payload::Variables,
};
use reqwest::{StatusCode, header::HeaderMap};
use serde::de::DeserializeOwned;
use serde_json::Value;
use url::Url;

use crate::models::{
    CreatedPipeline, Job, Pipeline, PipelineScope, PipelineSummary, PipelineVariable, Project,
    TriggerResponse,
};

const PER_PAGE: u32 = 100;

/// GitLab REST client for the bridge project.
pub struct GitLab {
    client: reqwest::Client,
    api_url: String,
    access_token: Secret,
    trigger_url: String,
    trigger_token: Secret,
    trigger_ref: String,
}

impl GitLab {
    pub fn new(config: &GitLabConfig) -> Result<Arc<Self>> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("ci-relay/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(60))
            .build()
            .context("Failed to create GitLab client")?;
        Ok(Arc::new(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            access_token: config.access_token.clone(),
            trigger_url: config.trigger_url.clone(),
            trigger_token: config.trigger_token.clone(),
            trigger_ref: config.trigger_ref.clone(),
        }))
    }

    pub fn pipeline_url(&self, project_id: u64, pipeline_id: u64) -> String {
        format!("{}/projects/{project_id}/pipelines/{pipeline_id}", self.api_url)
    }

    /// Canonical API URL of a job. Stored as the check run's `external_id`.
    pub fn job_url(&self, project_id: u64, job_id: u64) -> String {
        format!("{}/projects/{project_id}/jobs/{job_id}", self.api_url)
    }

    /// Accept `url` only if it points below the configured API URL.
    pub fn check_job_url<'a>(&self, url: &'a str) -> Result<&'a str, BridgeError> {
        if is_below(&self.api_url, url) {
            Ok(url)
        } else {
            Err(BridgeError::IncompatibleJobUrl(url.to_string()))
        }
    }

    async fn get_response(&self, url: &str, query: &[(&str, String)]) -> Result<reqwest::Response> {
        self.client
            .get(url)
            .header("PRIVATE-TOKEN", self.access_token.expose())
            .query(query)
            .send()
            .await
            .with_context(|| format!("GET {url} failed"))?
            .error_for_status()
            .with_context(|| format!("GET {url} failed"))
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        self.get_response(url, &[])
            .await?
            .json()
            .await
            .with_context(|| format!("Failed to decode response from {url}"))
    }

    async fn post_empty(&self, url: &str) -> Result<()> {
        self.client
            .post(url)
            .header("PRIVATE-TOKEN", self.access_token.expose())
            .send()
            .await
            .with_context(|| format!("POST {url} failed"))?
            .error_for_status()
            .with_context(|| format!("POST {url} failed"))?;
        Ok(())
    }

    pub async fn pipeline(&self, project_id: u64, pipeline_id: u64) -> Result<Pipeline> {
        self.get_json(&self.pipeline_url(project_id, pipeline_id)).await
    }

    pub async fn pipeline_variables(&self, project_id: u64, pipeline_id: u64) -> Result<Variables> {
        let url = format!("{}/variables", self.pipeline_url(project_id, pipeline_id));
        let items: Vec<PipelineVariable> = self.get_json(&url).await?;
        Ok(items.into_iter().map(|v| (v.key, v.value)).collect())
    }

    pub async fn project(&self, project_id: u64) -> Result<Project> {
        self.get_json(&format!("{}/projects/{project_id}", self.api_url)).await
    }

    pub async fn job(&self, project_id: u64, job_id: u64) -> Result<Job> {
        self.get_json(&self.job_url(project_id, job_id)).await
    }

    pub async fn job_by_url(&self, url: &str) -> Result<Job> {
        let url = self.check_job_url(url)?;
        self.get_json(url).await
    }

    /// Raw job trace, escape sequences included.
    pub async fn job_log(&self, project_id: u64, job_id: u64) -> Result<String> {
        let url = format!("{}/trace", self.job_url(project_id, job_id));
        self.get_response(&url, &[])
            .await?
            .text()
            .await
            .with_context(|| format!("Failed to read log of job {job_id}"))
    }

    /// Every pipeline of `project_id` in `scope`, following `x-next-page`.
    pub async fn pipelines(
        &self,
        project_id: u64,
        scope: PipelineScope,
    ) -> Result<Vec<PipelineSummary>> {
        let url = format!("{}/projects/{project_id}/pipelines", self.api_url);
        let mut page = 1;
        let mut pipelines = Vec::new();
        loop {
            let response = self
                .get_response(&url, &[
                    ("scope", scope.as_str().to_string()),
                    ("per_page", PER_PAGE.to_string()),
                    ("page", page.to_string()),
                ])
                .await?;
            let next = next_page(response.headers());
            let items: Vec<PipelineSummary> = response
                .json()
                .await
                .with_context(|| format!("Failed to decode {} pipelines", scope.as_str()))?;
            pipelines.extend(items);
            match next {
                Some(next) if next > page => page = next,
                _ => break,
            }
        }
        Ok(pipelines)
    }

    pub async fn cancel_pipeline(&self, project_id: u64, pipeline_id: u64) -> Result<()> {
        self.post_empty(&format!("{}/cancel", self.pipeline_url(project_id, pipeline_id))).await
    }

    /// Retry the job at `url`, which must be below the API URL.
    pub async fn retry_job(&self, url: &str) -> Result<()> {
        let url = self.check_job_url(url)?;
        self.post_empty(&format!("{}/retry", url.trim_end_matches('/'))).await
    }

    /// Create a pipeline through the trigger endpoint.
    pub async fn trigger_pipeline(&self, variables: &Variables) -> Result<TriggerResponse> {
        let mut form = vec![
            ("token".to_string(), self.trigger_token.expose().to_string()),
            ("ref".to_string(), self.trigger_ref.clone()),
        ];
        form.extend(variables.iter().map(|(k, v)| (format!("variables[{k}]"), v.clone())));
        let response = self
            .client
            .post(&self.trigger_url)
            .form(&form)
            .send()
            .await
            .context("Pipeline trigger request failed")?;
        if response.status() == StatusCode::UNPROCESSABLE_ENTITY {
            let body = response.json::<Value>().await.unwrap_or(Value::Null);
            return Ok(TriggerResponse::Rejected(rejection_message(&body)));
        }
        let created: CreatedPipeline = response
            .error_for_status()
            .context("Pipeline trigger was not accepted")?
            .json()
            .await
            .context("Failed to decode triggered pipeline")?;
        Ok(TriggerResponse::Created(created))
    }
}

/// Human readable reason from a 422 body. GitLab sends `message.base` as a
/// string or a list of strings.
pub fn rejection_message(body: &Value) -> String {
    match body.pointer("/message/base") {
        Some(Value::String(message)) => message.clone(),
        Some(Value::Array(items)) if !items.is_empty() => items
            .iter()
            .map(|item| item.as_str().map(str::to_string).unwrap_or_else(|| item.to_string()))
            .collect::<Vec<_>>()
            .join(", "),
        _ => "Unknown error".to_string(),
    }
}

fn next_page(headers: &HeaderMap) -> Option<u32> {
    headers.get("x-next-page")?.to_str().ok()?.trim().parse().ok()
}

fn is_below(base: &str, candidate: &str) -> bool {
    let (Ok(base), Ok(candidate)) = (Url::parse(base), Url::parse(candidate)) else {
        return false;
    };
    if base.scheme() != candidate.scheme()
        || base.host_str() != candidate.host_str()
        || base.port_or_known_default() != candidate.port_or_known_default()
    {
        return false;
    }
    let base_path = base.path().trim_end_matches('/');
    candidate
        .path()
        .strip_prefix(base_path)
        .is_some_and(|rest| rest.starts_with('/'))
}
