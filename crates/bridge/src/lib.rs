pub mod api;
mod authorize;
mod callback;
mod dispatch;
mod events;
mod guard;
mod health;
pub mod retry;
mod trigger;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use ci_relay_core::{config::Config, signature::Signer};
use regex::Regex;

pub use crate::{
    api::{GitHubApi, GitHubApp, GitLabApi},
    callback::CallbackOutcome,
    health::Health,
    trigger::{TriggerContext, TriggerOutcome},
};

/// Shared context for every webhook task. Holds no mutable state.
pub struct Bridge {
    pub config: Arc<Config>,
    signer: Signer,
    gitlab: Arc<dyn GitLabApi>,
    github: Arc<dyn GitHubApp>,
    ignored_jobs: Vec<Regex>,
}

impl Bridge {
    pub fn new(
        config: Arc<Config>,
        gitlab: Arc<dyn GitLabApi>,
        github: Arc<dyn GitHubApp>,
    ) -> Arc<Self> {
        let signer = Signer::new(&config.bridge.trigger_secret);
        let ignored_jobs = config
            .gitlab
            .ignored_job_patterns
            .iter()
            .filter_map(|pattern| match Regex::new(pattern) {
                Ok(regex) => Some(regex),
                Err(e) => {
                    tracing::warn!("Skipping invalid ignored job pattern {:?}: {}", pattern, e);
                    None
                }
            })
            .collect();
        Arc::new(Self { config, signer, gitlab, github, ignored_jobs })
    }

    /// Whether reports for `job_name` are suppressed.
    pub fn is_ignored_job(&self, job_name: &str) -> bool {
        self.ignored_jobs.iter().any(|regex| regex.is_match(job_name))
    }

    fn check_name(&self) -> &str { &self.config.bridge.check_name }
}
