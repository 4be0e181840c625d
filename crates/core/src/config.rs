use std::{fmt, fs::File, io::BufReader, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "CI_RELAY_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config.yml";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    pub github: GitHubConfig,
    pub gitlab: GitLabConfig,
    pub bridge: BridgeConfig,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("Failed to open config file {}", path.display()))?;
        let config: Config = serde_yaml::from_reader(BufReader::new(file))
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `$CI_RELAY_CONFIG`, falling back to `config.yml`.
    pub fn from_env() -> Result<Self> {
        let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load(path)
    }

    fn validate(&self) -> Result<()> {
        if self.github.allow_org_team().is_none() {
            anyhow::bail!("github.allow_team must be in org/team form: {}", self.github.allow_team);
        }
        if self.bridge.trigger_secret.expose().is_empty() {
            anyhow::bail!("bridge.trigger_secret must not be empty");
        }
        if self.bridge.retry.attempts == 0 {
            anyhow::bail!("bridge.retry.attempts must be at least 1");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GitHubConfig {
    pub app_id: u64,
    pub private_key: Secret,
    pub webhook_secret: Secret,
    /// Team whose members may trigger pipelines, in `org/team` form.
    pub allow_team: String,
    /// Users allowed in addition to the team members.
    #[serde(default)]
    pub extra_users: Vec<String>,
}

impl GitHubConfig {
    /// Split `allow_team` into its organization and team slug.
    pub fn allow_org_team(&self) -> Option<(&str, &str)> { self.allow_team.split_once('/') }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GitLabConfig {
    /// Base API URL, e.g. `https://gitlab.example.com/api/v4`.
    pub api_url: String,
    pub access_token: Secret,
    /// Project that runs the bridged pipelines.
    pub project_id: u64,
    pub trigger_url: String,
    pub trigger_token: Secret,
    #[serde(default = "default_trigger_ref")]
    pub trigger_ref: String,
    pub webhook_secret: Secret,
    /// Job names matching any of these patterns are not reported back.
    #[serde(default)]
    pub ignored_job_patterns: Vec<String>,
}

fn default_trigger_ref() -> String { "main".to_string() }

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BridgeConfig {
    /// Key used to sign bridge payloads. Known only to this process.
    pub trigger_secret: Secret,
    /// Skip every call that would start work on GitLab or GitHub Actions.
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default = "default_log_limit")]
    pub log_limit: usize,
    #[serde(default = "default_ci_config_path")]
    pub ci_config_path: String,
    #[serde(default = "default_check_name")]
    pub check_name: String,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
}

/// GitHub caps check run output text at 65535 characters.
pub const GITHUB_TEXT_LIMIT: usize = 65535;

fn default_log_limit() -> usize { GITHUB_TEXT_LIMIT - 200 }

fn default_ci_config_path() -> String { ".gitlab-ci.yml".to_string() }

fn default_check_name() -> String { "CI Bridge".to_string() }

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    pub attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self { Self { attempts: 5, initial_delay_ms: 1000, max_delay_ms: 60_000 } }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DispatchConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Job statuses that cause a `repository_dispatch` to be sent.
    #[serde(default = "default_dispatch_statuses")]
    pub statuses: Vec<String>,
    #[serde(default = "default_dispatch_event_type")]
    pub event_type: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            statuses: default_dispatch_statuses(),
            event_type: default_dispatch_event_type(),
        }
    }
}

fn default_dispatch_statuses() -> Vec<String> {
    vec!["success".to_string(), "failed".to_string()]
}

fn default_dispatch_event_type() -> String { "gitlab-job-finished".to_string() }

/// A configuration value that must never appear in logs.
#[derive(Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self { Self(value.into()) }

    pub fn expose(&self) -> &str { &self.0 }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str("Secret(***)") }
}
