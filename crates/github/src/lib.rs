pub mod models;
pub mod webhook;

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use base64::{Engine, engine::general_purpose::STANDARD};
use ci_relay_core::{config::GitHubConfig, models::CheckRun};
use http::StatusCode;
use octocrab::{
    GitHubError, Octocrab,
    models::{InstallationId, InstallationRepositories},
};
use serde::Deserialize;

use crate::models::{PullRequest, RepositoryDispatch};

pub const API_BASE: &str = "https://api.github.com";

/// GitHub App client. Installation clients are minted per event and not cached.
#[derive(Clone)]
pub struct GitHub {
    pub app_client: Octocrab,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppInfo {
    pub id: u64,
    pub slug: Option<String>,
    pub name: String,
}

impl GitHub {
    pub async fn new(config: &GitHubConfig) -> Result<Arc<Self>> {
        let app_client = Octocrab::builder()
            .app(
                config.app_id.into(),
                jsonwebtoken::EncodingKey::from_rsa_pem(config.private_key.expose().as_bytes())
                    .context("Failed to parse GitHub App private key")?,
            )
            .build()
            .context("Failed to create GitHub client")?;
        let github = Self { app_client };
        match github.app_info().await {
            Ok(app) => tracing::info!("Authenticated as GitHub App {} ({})", app.name, app.id),
            Err(e) => tracing::warn!("Failed to fetch GitHub App info: {e:?}"),
        }
        Ok(Arc::new(github))
    }

    pub async fn app_info(&self) -> Result<AppInfo> {
        self.app_client
            .get::<AppInfo, _, _>("/app", None::<&()>)
            .await
            .context("Failed to fetch GitHub App")
    }

    pub fn installation(&self, installation_id: u64) -> Result<InstallationClient> {
        let client = self
            .app_client
            .installation(InstallationId(installation_id))
            .with_context(|| format!("Failed to create client for installation {installation_id}"))?;
        Ok(InstallationClient { id: installation_id, client })
    }
}

#[derive(serde::Serialize)]
struct PageParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    per_page: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    page: Option<u32>,
}

#[derive(Deserialize)]
struct ContentEntry {
    download_url: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    encoding: Option<String>,
}

#[derive(Deserialize)]
struct WorkflowList {
    total_count: u64,
    workflows: Vec<Workflow>,
}

#[derive(Deserialize)]
struct Workflow {
    path: String,
}

#[derive(Deserialize)]
struct CheckRunList {
    total_count: u64,
    check_runs: Vec<CheckRunEntry>,
}

#[derive(Deserialize)]
struct CheckRunEntry {
    external_id: Option<String>,
}

fn is_not_found(err: &octocrab::Error) -> bool {
    matches!(
        err,
        octocrab::Error::GitHub { source, .. }
            if matches!(**source, GitHubError { status_code: StatusCode::NOT_FOUND, .. })
    )
}

/// Client acting as a single installation of the App.
#[derive(Clone)]
pub struct InstallationClient {
    pub id: u64,
    client: Octocrab,
}

impl InstallationClient {
    /// `download_url` of `path` at `git_ref`, or `None` when the file doesn't exist there.
    pub async fn file_download_url(
        &self,
        repo_url: &str,
        path: &str,
        git_ref: &str,
    ) -> Result<Option<String>> {
        let route = format!("{}/contents/{path}?ref={git_ref}", api_route(repo_url));
        match self.client.get::<ContentEntry, _, _>(&route, None::<&()>).await {
            Ok(entry) => Ok(entry.download_url),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to fetch {path} from {repo_url}")),
        }
    }

    /// Decoded contents of `path` on the default branch, or `None` when absent.
    pub async fn file_contents(&self, repo_name: &str, path: &str) -> Result<Option<String>> {
        let route = format!("/repos/{repo_name}/contents/{path}");
        let entry = match self.client.get::<ContentEntry, _, _>(&route, None::<&()>).await {
            Ok(entry) => entry,
            Err(e) if is_not_found(&e) => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to fetch {path} from {repo_name}"));
            }
        };
        let Some(content) = entry.content else {
            return Ok(None);
        };
        if entry.encoding.as_deref().is_some_and(|e| e != "base64") {
            return Err(anyhow!("Unsupported content encoding for {path}: {:?}", entry.encoding));
        }
        let compact = content.split_whitespace().collect::<String>();
        let bytes = STANDARD.decode(compact).context("Invalid base64 file content")?;
        Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
    }

    pub async fn create_check_run(&self, repo_url: &str, check_run: &CheckRun) -> Result<()> {
        let route = format!("{}/check-runs", api_route(repo_url));
        self.client
            .post::<_, serde_json::Value>(route, Some(check_run))
            .await
            .with_context(|| format!("Failed to create check run {}", check_run.name))?;
        Ok(())
    }

    pub async fn is_team_member(&self, org: &str, team: &str, user: &str) -> Result<bool> {
        let route = format!("/orgs/{org}/teams/{team}/memberships/{user}");
        match self.client.get::<serde_json::Value, _, _>(&route, None::<&()>).await {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(e).with_context(|| format!("Failed to check membership of {user}")),
        }
    }

    /// IDs of every repository this installation can access.
    pub async fn repository_ids(&self) -> Result<Vec<u64>> {
        let mut page = 1;
        let mut ids = Vec::new();
        loop {
            let response: InstallationRepositories = self
                .client
                .get(
                    "/installation/repositories",
                    Some(&PageParams { per_page: Some(100), page: Some(page) }),
                )
                .await
                .context("Failed to list installation repositories")?;
            if response.repositories.is_empty() {
                break;
            }
            ids.extend(response.repositories.into_iter().map(|r| r.id.into_inner()));
            if ids.len() >= response.total_count as usize {
                break;
            }
            page += 1;
        }
        Ok(ids)
    }

    /// External IDs of the check runs in a check suite.
    pub async fn check_run_external_ids(&self, check_runs_url: &str) -> Result<Vec<String>> {
        let mut page = 1;
        let mut seen = 0;
        let mut ids = Vec::new();
        loop {
            let response: CheckRunList = self
                .client
                .get(
                    api_route(check_runs_url),
                    Some(&PageParams { per_page: Some(100), page: Some(page) }),
                )
                .await
                .context("Failed to list check runs")?;
            if response.check_runs.is_empty() {
                break;
            }
            seen += response.check_runs.len();
            ids.extend(response.check_runs.into_iter().filter_map(|r| r.external_id));
            if seen >= response.total_count as usize {
                break;
            }
            page += 1;
        }
        Ok(ids)
    }

    pub async fn pull_request(&self, url: &str) -> Result<PullRequest> {
        self.client
            .get(api_route(url), None::<&()>)
            .await
            .with_context(|| format!("Failed to fetch pull request {url}"))
    }

    pub async fn add_reaction(&self, reactions_url: &str, content: &str) -> Result<()> {
        self.client
            .post::<_, serde_json::Value>(
                api_route(reactions_url),
                Some(&serde_json::json!({ "content": content })),
            )
            .await
            .context("Failed to add reaction")?;
        Ok(())
    }

    pub async fn workflow_paths(&self, repo_name: &str) -> Result<Vec<String>> {
        let mut page = 1;
        let mut paths = Vec::new();
        loop {
            let response: WorkflowList = self
                .client
                .get(
                    format!("/repos/{repo_name}/actions/workflows"),
                    Some(&PageParams { per_page: Some(100), page: Some(page) }),
                )
                .await
                .with_context(|| format!("Failed to list workflows for {repo_name}"))?;
            if response.workflows.is_empty() {
                break;
            }
            paths.extend(response.workflows.into_iter().map(|w| w.path));
            if paths.len() as u64 >= response.total_count {
                break;
            }
            page += 1;
        }
        Ok(paths)
    }

    pub async fn repository_dispatch(
        &self,
        repo_name: &str,
        dispatch: &RepositoryDispatch,
    ) -> Result<()> {
        // Answers 204 No Content, so skip body deserialization.
        let route = format!("{API_BASE}/repos/{repo_name}/dispatches");
        let response = self
            .client
            ._post(route, Some(dispatch))
            .await
            .with_context(|| format!("Failed to send repository_dispatch to {repo_name}"))?;
        octocrab::map_github_error(response)
            .await
            .with_context(|| format!("repository_dispatch to {repo_name} was rejected"))?;
        Ok(())
    }
}

/// Route relative to the API base for an absolute API URL; other inputs pass through.
pub fn api_route(url: &str) -> &str {
    url.strip_prefix(API_BASE).filter(|rest| rest.starts_with('/')).unwrap_or(url)
}

/// API URL of a repository given its `owner/repo` name.
pub fn repo_api_url(full_name: &str) -> String { format!("{API_BASE}/repos/{full_name}") }
