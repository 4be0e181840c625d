use anyhow::{Result, anyhow};
use ci_relay_core::BridgeError;

use crate::{Bridge, api::GitHubApi};

impl Bridge {
    /// Whether `user` may start pipelines in `org`.
    ///
    /// The organization itself is always allowed. Otherwise the user must be in
    /// the allow team or be listed in `extra_users`.
    pub async fn is_authorized(&self, github: &dyn GitHubApi, org: &str, user: &str) -> Result<bool> {
        let allow_team = &self.config.github.allow_team;
        let (allow_org, team) = self
            .config
            .github
            .allow_org_team()
            .ok_or_else(|| anyhow!("Malformed allow team {allow_team}"))?;
        if allow_org != org {
            return Err(BridgeError::TeamOrgMismatch {
                team: allow_team.clone(),
                org: org.to_string(),
            }
            .into());
        }
        if user == org {
            tracing::debug!("{} is the organization", user);
            return Ok(true);
        }
        if github.is_team_member(org, team, user).await? {
            tracing::debug!("{} is in team {}", user, allow_team);
            return Ok(true);
        }
        let extra = self.config.github.extra_users.iter().any(|u| u == user);
        tracing::debug!("{} is not in team {} (extra user: {})", user, allow_team, extra);
        Ok(extra)
    }
}
