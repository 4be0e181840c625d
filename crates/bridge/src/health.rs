use std::fmt;

use crate::Bridge;

/// Reachability of both sides of the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Health {
    pub github: bool,
    pub gitlab: bool,
}

impl Health {
    pub fn is_ok(&self) -> bool { self.github && self.gitlab }
}

impl fmt::Display for Health {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn ok(value: bool) -> &'static str { if value { "ok" } else { "not ok" } }
        write!(f, "GitHub: {}, GitLab: {}", ok(self.github), ok(self.gitlab))
    }
}

impl Bridge {
    /// Authenticate as the GitHub App and read the bridged GitLab project.
    pub async fn health(&self) -> Health {
        let (github, gitlab) = tokio::join!(
            self.github.check_app(),
            self.gitlab.project(self.config.gitlab.project_id)
        );
        if let Err(e) = &github {
            tracing::warn!("GitHub health check failed: {e:#}");
        }
        if let Err(e) = &gitlab {
            tracing::warn!("GitLab health check failed: {e:#}");
        }
        Health { github: github.is_ok(), gitlab: gitlab.is_ok() }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::testing::{FakeGitHub, FakeGitLab, PROJECT_ID, test_config};

    #[tokio::test]
    async fn reports_each_side() {
        let gitlab = Arc::new(FakeGitLab::default());
        let github = FakeGitHub::default();
        let bridge = Bridge::new(Arc::new(test_config()), gitlab.clone(), Arc::new(github.clone()));

        let health = bridge.health().await;
        assert!(health.is_ok());
        assert_eq!(health.to_string(), "GitHub: ok, GitLab: ok");
        assert_eq!(gitlab.calls(), vec![format!("project {PROJECT_ID}")]);

        github.state.lock().unwrap().app_unreachable = true;
        let health = bridge.health().await;
        assert!(!health.is_ok());
        assert_eq!(health.to_string(), "GitHub: not ok, GitLab: ok");

        gitlab.state.lock().unwrap().project_unreachable = true;
        assert_eq!(bridge.health().await.to_string(), "GitHub: not ok, GitLab: not ok");
    }
}
