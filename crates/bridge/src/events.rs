//! Handlers for the GitHub webhooks that start or restart pipelines.

use anyhow::{Result, anyhow};
use ci_relay_core::{models::CheckRun, payload::SignedPayload};
use ci_relay_github::{
    models::{
        CheckRunEvent, CheckSuiteEvent, GitHubEvent, IssueCommentEvent, PullRequestEvent, PushEvent,
    },
    repo_api_url,
};

use crate::{Bridge, TriggerContext, TriggerOutcome, api::GitHubApi};

const PULL_REQUEST_ACTIONS: [&str; 4] = ["synchronize", "opened", "reopened", "ready_for_review"];
const RERUN_COMMANDS: [&str; 2] = ["/rerun", "/retry"];
const REFUSED_SUMMARY: &str = "No pipeline was triggered for this user";

impl Bridge {
    pub async fn handle_github_event(&self, event: &GitHubEvent) -> Result<()> {
        match event {
            GitHubEvent::PullRequest(e) => self.on_pull_request(e).await,
            GitHubEvent::Push(e) => self.on_push(e).await,
            GitHubEvent::CheckSuite(e) => self.on_check_suite(e).await,
            GitHubEvent::CheckRun(e) => self.on_check_run(e).await,
            GitHubEvent::IssueComment(e) => self.on_issue_comment(e).await,
            GitHubEvent::Ping => {
                tracing::debug!("Received ping event");
                Ok(())
            }
            GitHubEvent::Other(kind) => {
                tracing::debug!("Ignoring {} event", kind);
                Ok(())
            }
        }
    }

    async fn refuse(&self, github: &dyn GitHubApi, repo_url: &str, head_sha: &str) -> Result<()> {
        github
            .create_check_run(repo_url, &CheckRun::refused(self.check_name(), head_sha, REFUSED_SUMMARY))
            .await
    }

    async fn run_trigger(&self, github: &dyn GitHubApi, context: TriggerContext) -> Result<()> {
        match self.trigger(github, &context).await? {
            TriggerOutcome::Triggered { pipeline_id, web_url } => {
                tracing::info!(
                    "Pipeline {} ({}) builds {} at {}",
                    pipeline_id,
                    web_url,
                    context.repo_name,
                    context.head_sha
                );
            }
            outcome => tracing::debug!("Trigger for {} ended with {:?}", context.repo_name, outcome),
        }
        Ok(())
    }

    async fn on_pull_request(&self, event: &PullRequestEvent) -> Result<()> {
        let pr = &event.pull_request;
        tracing::debug!("Received pull_request {} on PR #{}", event.action, pr.number);
        if !PULL_REQUEST_ACTIONS.contains(&event.action.as_str()) {
            return Ok(());
        }
        if pr.draft {
            tracing::debug!("PR #{} is a draft, skipping", pr.number);
            return Ok(());
        }
        let github = self.github.installation(event.installation.id)?;
        let org = &event.organization.login;
        for user in [&pr.user.login, &pr.head.user.login] {
            if !self.is_authorized(github.as_ref(), org, user).await? {
                tracing::info!("{} may not trigger pipelines, refusing PR #{}", user, pr.number);
                return self.refuse(github.as_ref(), &pr.base.repo.url, &pr.head.sha).await;
            }
        }
        let context = TriggerContext {
            installation_id: event.installation.id,
            repo_url: pr.base.repo.url.clone(),
            repo_name: pr.base.repo.full_name.clone(),
            head_sha: pr.head.sha.clone(),
            head_ref: pr.head.ref_field.clone(),
            clone_url: pr.head.repo.clone_url.clone(),
            clone_repo_name: pr.head.repo.full_name.clone(),
        };
        self.run_trigger(github.as_ref(), context).await
    }

    async fn on_push(&self, event: &PushEvent) -> Result<()> {
        let repository = &event.repository;
        let repo_url = if repository.url.starts_with("https://github.com/") {
            repo_api_url(&repository.full_name)
        } else {
            repository.url.clone()
        };
        let github = self.github.installation(event.installation.id)?;
        let org = &event.organization.login;
        for user in [&event.sender.login, &event.pusher.name] {
            if !self.is_authorized(github.as_ref(), org, user).await? {
                tracing::info!("{} may not trigger pipelines, refusing push", user);
                return self.refuse(github.as_ref(), &repo_url, &event.after).await;
            }
        }
        let head_ref = event.ref_field.rsplit('/').next().unwrap_or_default().to_string();
        let context = TriggerContext {
            installation_id: event.installation.id,
            repo_url,
            repo_name: repository.full_name.clone(),
            head_sha: event.after.clone(),
            head_ref,
            clone_url: repository.clone_url.clone(),
            clone_repo_name: repository.full_name.clone(),
        };
        self.run_trigger(github.as_ref(), context).await
    }

    async fn on_check_suite(&self, event: &CheckSuiteEvent) -> Result<()> {
        if event.action != "rerequested" {
            return Ok(());
        }
        let suite = &event.check_suite;
        if suite.app.id != self.config.github.app_id {
            tracing::debug!("Ignoring rerequest for check suite of app {}", suite.app.id);
            return Ok(());
        }
        let github = self.github.installation(event.installation.id)?;
        let sender = &event.sender.login;
        if !self.is_authorized(github.as_ref(), &event.organization.login, sender).await? {
            tracing::info!("{} may not rerun check suite {}", sender, suite.id);
            return self.refuse(github.as_ref(), &event.repository.url, &suite.head_sha).await;
        }

        let external_ids = github.check_run_external_ids(&suite.check_runs_url).await?;
        let Some(job_url) = external_ids.first().filter(|id| !id.is_empty()) else {
            tracing::debug!("Check suite {} has no job attached, can't rerun", suite.id);
            return Ok(());
        };
        tracing::debug!("Recovering pipeline parameters from {}", job_url);
        let job = self.gitlab.job_by_url(job_url).await?;
        let pipeline = job.pipeline.ok_or_else(|| anyhow!("Job {} has no pipeline", job.id))?;
        let variables = self.gitlab.pipeline_variables(pipeline.project_id, pipeline.id).await?;
        let payload = match SignedPayload::from_variables(&variables)
            .and_then(|signed| signed.open(&self.signer))
        {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!("Refusing to rerun pipeline {} behind check suite: {}", pipeline.id, e);
                return Err(e.into());
            }
        };
        tracing::debug!("Previous job built {} from {}", payload.head_sha, payload.clone_url);

        let context = TriggerContext {
            installation_id: event.installation.id,
            repo_url: event.repository.url.clone(),
            repo_name: event.repository.full_name.clone(),
            head_sha: payload.head_sha,
            head_ref: payload.head_ref,
            clone_url: payload.clone_url,
            clone_repo_name: payload.clone_repo_name,
        };
        self.run_trigger(github.as_ref(), context).await
    }

    async fn on_check_run(&self, event: &CheckRunEvent) -> Result<()> {
        if event.action != "rerequested" {
            return Ok(());
        }
        let job_url = self.gitlab.check_job_url(&event.check_run.external_id)?;
        let github = self.github.installation(event.installation.id)?;
        let sender = &event.sender.login;
        if !self.is_authorized(github.as_ref(), &event.organization.login, sender).await? {
            tracing::info!("{} may not retry {}", sender, job_url);
            return Ok(());
        }
        if self.config.bridge.dry_run {
            tracing::info!("Dry run: not retrying {}", job_url);
            return Ok(());
        }
        self.gitlab.retry_job(job_url).await?;
        tracing::info!("Retried {}", job_url);
        Ok(())
    }

    async fn on_issue_comment(&self, event: &IssueCommentEvent) -> Result<()> {
        if event.action != "created" {
            return Ok(());
        }
        let Some(pr_link) = &event.issue.pull_request else {
            tracing::debug!("Comment is not on a PR, ignoring");
            return Ok(());
        };
        let command = event.comment.body.trim().to_lowercase();
        if !RERUN_COMMANDS.contains(&command.as_str()) {
            return Ok(());
        }
        let github = self.github.installation(event.installation.id)?;
        let commenter = &event.comment.user.login;
        if !self.is_authorized(github.as_ref(), &event.organization.login, commenter).await? {
            tracing::info!("{} may not rerun PR #{}", commenter, event.issue.number);
            return Ok(());
        }
        if !github.repository_ids().await?.contains(&event.repository.id) {
            tracing::debug!("{} is not an installed repository", event.repository.full_name);
            return Ok(());
        }

        let pr = github.pull_request(&pr_link.url).await?;
        tracing::debug!("Rerunning PR #{} on request of {}", pr.number, commenter);
        let context = TriggerContext {
            installation_id: event.installation.id,
            repo_url: event.repository.url.clone(),
            repo_name: event.repository.full_name.clone(),
            head_sha: pr.head.sha.clone(),
            head_ref: pr.head.ref_field.clone(),
            clone_url: pr.head.repo.clone_url.clone(),
            clone_repo_name: pr.head.repo.full_name.clone(),
        };
        self.run_trigger(github.as_ref(), context).await?;
        if let Err(e) = github.add_reaction(&event.comment.reactions.url, "rocket").await {
            tracing::warn!("Failed to react to comment {}: {e:#}", event.comment.id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ci_relay_core::{
        BridgeError,
        models::Conclusion,
        payload::{BridgePayload, CLONE_URL, HEAD_REF, HEAD_SHA, REPO_NAME},
        signature::Signer,
    };
    use ci_relay_github::models::{
        CheckRunRef, CheckSuite, CheckSuiteApp, Comment, Installation, Issue, IssuePullRequest,
        Organization, Pusher, Reactions, User,
    };

    use super::*;
    use crate::testing::{self, FakeGitHub, FakeGitLab, repository, test_config};

    const PR_URL: &str = "https://api.github.com/repos/test_org/test_repo/pulls/7";
    const REACTIONS_URL: &str = "https://api.github.com/repos/test_org/test_repo/issues/comments/1/reactions";

    fn setup(
        members: &[&str],
        dry_run: bool,
    ) -> (Arc<Bridge>, Arc<FakeGitLab>, FakeGitHub) {
        let mut config = test_config();
        config.bridge.dry_run = dry_run;
        let gitlab = Arc::new(FakeGitLab::default());
        let github = FakeGitHub::with_members(members);
        let bridge = Bridge::new(Arc::new(config), gitlab.clone(), Arc::new(github.clone()));
        (bridge, gitlab, github)
    }

    fn user(login: &str) -> User { User { login: login.to_string() } }

    fn pull_request_event(action: &str, author: &str, head_repo: &str) -> GitHubEvent {
        GitHubEvent::PullRequest(Box::new(PullRequestEvent {
            action: action.to_string(),
            pull_request: testing::pull_request(author, head_repo, "feature", "abc123"),
            organization: Organization { login: "test_org".to_string() },
            installation: Installation { id: 123 },
            sender: user(author),
            repository: repository("test_org/test_repo", 1),
        }))
    }

    #[tokio::test]
    async fn pull_request_from_member_fork_triggers() {
        let (bridge, gitlab, github) = setup(&["alice", "fork_user"], false);
        let event = pull_request_event("opened", "alice", "fork_user/test_repo");
        bridge.handle_github_event(&event).await.unwrap();

        let triggered = gitlab.triggered();
        assert_eq!(triggered.len(), 1);
        assert_eq!(triggered[0][HEAD_SHA], "abc123");
        assert_eq!(triggered[0][HEAD_REF], "feature");
        assert_eq!(triggered[0][REPO_NAME], "test_org/test_repo");
        assert_eq!(triggered[0][CLONE_URL], "https://github.com/fork_user/test_repo.git");
        assert!(github.check_runs().is_empty());
    }

    #[tokio::test]
    async fn pull_request_from_outsider_is_refused() {
        let (bridge, gitlab, github) = setup(&["alice"], false);
        let event = pull_request_event("synchronize", "alice", "mallory/test_repo");
        bridge.handle_github_event(&event).await.unwrap();

        assert!(gitlab.calls().is_empty());
        let check_runs = github.check_runs();
        assert_eq!(check_runs.len(), 1);
        let (repo_url, check_run) = &check_runs[0];
        assert_eq!(repo_url, "https://api.github.com/repos/test_org/test_repo");
        assert_eq!(check_run.conclusion, Some(Conclusion::Neutral));
        assert_eq!(check_run.head_sha, "abc123");
        assert_eq!(check_run.output.summary, REFUSED_SUMMARY);
    }

    #[tokio::test]
    async fn drafts_and_other_actions_are_skipped() {
        let (bridge, gitlab, github) = setup(&["alice"], false);
        bridge
            .handle_github_event(&pull_request_event("closed", "alice", "test_org/test_repo"))
            .await
            .unwrap();
        let GitHubEvent::PullRequest(mut draft) =
            pull_request_event("opened", "alice", "test_org/test_repo")
        else {
            unreachable!()
        };
        draft.pull_request.draft = true;
        bridge.handle_github_event(&GitHubEvent::PullRequest(draft)).await.unwrap();

        assert!(gitlab.calls().is_empty());
        assert!(github.check_runs().is_empty());
        assert!(github.state.lock().unwrap().installations.is_empty());
    }

    fn push_event(sender: &str, pusher: &str) -> GitHubEvent {
        let mut repo = repository("test_org/test_repo", 1);
        repo.url = "https://github.com/test_org/test_repo".to_string();
        GitHubEvent::Push(Box::new(PushEvent {
            ref_field: "refs/heads/release/v2".to_string(),
            after: "def456".to_string(),
            sender: user(sender),
            pusher: Pusher { name: pusher.to_string() },
            organization: Organization { login: "test_org".to_string() },
            repository: repo,
            installation: Installation { id: 123 },
        }))
    }

    #[tokio::test]
    async fn push_uses_api_url_and_last_ref_segment() {
        let (bridge, gitlab, _github) = setup(&["alice"], false);
        bridge.handle_github_event(&push_event("alice", "alice")).await.unwrap();

        let triggered = gitlab.triggered();
        assert_eq!(triggered.len(), 1);
        assert_eq!(triggered[0][HEAD_REF], "v2");
        assert_eq!(triggered[0][HEAD_SHA], "def456");
        let payload = ci_relay_core::payload::SignedPayload::from_variables(&triggered[0])
            .unwrap()
            .open(&Signer::from_key(b"payload-key"))
            .unwrap();
        assert_eq!(payload.repo_url, "https://api.github.com/repos/test_org/test_repo");
        assert_eq!(payload.clone_repo_name, "test_org/test_repo");
    }

    #[tokio::test]
    async fn push_requires_sender_and_pusher() {
        let (bridge, gitlab, github) = setup(&["alice"], false);
        bridge.handle_github_event(&push_event("alice", "mallory")).await.unwrap();
        assert!(gitlab.triggered().is_empty());
        let check_runs = github.check_runs();
        assert_eq!(check_runs.len(), 1);
        assert_eq!(check_runs[0].1.head_sha, "def456");
    }

    fn check_suite_event(app_id: u64) -> GitHubEvent {
        GitHubEvent::CheckSuite(Box::new(CheckSuiteEvent {
            action: "rerequested".to_string(),
            check_suite: CheckSuite {
                id: 5,
                app: CheckSuiteApp { id: app_id },
                head_sha: "abc123".to_string(),
                check_runs_url: "https://api.github.com/repos/test_org/test_repo/check-suites/5/check-runs"
                    .to_string(),
            },
            sender: user("alice"),
            organization: Organization { login: "test_org".to_string() },
            repository: repository("test_org/test_repo", 1),
            installation: Installation { id: 123 },
        }))
    }

    fn seed_previous_run(gitlab: &FakeGitLab, github: &FakeGitHub, signer_key: &[u8]) {
        let payload = BridgePayload {
            installation_id: 123,
            repo_url: "https://api.github.com/repos/test_org/test_repo".to_string(),
            repo_slug: "test_org_test_repo".to_string(),
            repo_name: "test_org/test_repo".to_string(),
            head_sha: "abc123".to_string(),
            head_ref: "feature".to_string(),
            config_url: testing::CONFIG_URL.to_string(),
            clone_url: "https://github.com/fork_user/test_repo.git".to_string(),
            clone_repo_slug: "fork_user_test_repo".to_string(),
            clone_repo_name: "fork_user/test_repo".to_string(),
        };
        let mut state = gitlab.state.lock().unwrap();
        state.jobs.insert(77, testing::job(77, "build: linux", "failed", false));
        state.variables.insert(55, payload.to_variables(&Signer::from_key(signer_key)));
        github.state.lock().unwrap().check_run_ids =
            vec![format!("{}/projects/{}/jobs/77", testing::API_URL, testing::PROJECT_ID)];
    }

    #[tokio::test]
    async fn check_suite_rerun_recovers_the_fork() {
        let (bridge, gitlab, github) = setup(&["alice"], false);
        seed_previous_run(&gitlab, &github, b"payload-key");
        bridge.handle_github_event(&check_suite_event(42)).await.unwrap();

        let triggered = gitlab.triggered();
        assert_eq!(triggered.len(), 1);
        assert_eq!(triggered[0][CLONE_URL], "https://github.com/fork_user/test_repo.git");
        assert_eq!(triggered[0][HEAD_REF], "feature");
        assert_eq!(triggered[0][HEAD_SHA], "abc123");
    }

    #[tokio::test]
    async fn check_suite_rerun_refuses_forged_variables() {
        let (bridge, gitlab, github) = setup(&["alice"], false);
        seed_previous_run(&gitlab, &github, b"someone-else");
        let err = bridge.handle_github_event(&check_suite_event(42)).await.unwrap_err();
        assert_eq!(err.downcast_ref::<BridgeError>(), Some(&BridgeError::SignatureMismatch));
        assert!(gitlab.triggered().is_empty());
    }

    #[tokio::test]
    async fn check_suites_of_other_apps_are_ignored() {
        let (bridge, gitlab, github) = setup(&["alice"], false);
        seed_previous_run(&gitlab, &github, b"payload-key");
        bridge.handle_github_event(&check_suite_event(7)).await.unwrap();
        assert!(gitlab.calls().is_empty());
    }

    fn check_run_event(external_id: &str) -> GitHubEvent {
        GitHubEvent::CheckRun(Box::new(CheckRunEvent {
            action: "rerequested".to_string(),
            check_run: CheckRunRef { external_id: external_id.to_string() },
            sender: user("alice"),
            organization: Organization { login: "test_org".to_string() },
            repository: repository("test_org/test_repo", 1),
            installation: Installation { id: 123 },
        }))
    }

    #[tokio::test]
    async fn check_run_rerun_retries_the_job() {
        let job_url = format!("{}/projects/1234/jobs/77", testing::API_URL);
        let (bridge, gitlab, _github) = setup(&["alice"], false);
        bridge.handle_github_event(&check_run_event(&job_url)).await.unwrap();
        assert_eq!(gitlab.retried(), vec![job_url.clone()]);

        let (bridge, gitlab, _github) = setup(&["alice"], true);
        bridge.handle_github_event(&check_run_event(&job_url)).await.unwrap();
        assert!(gitlab.retried().is_empty());

        let (bridge, gitlab, _github) = setup(&[], false);
        bridge.handle_github_event(&check_run_event(&job_url)).await.unwrap();
        assert!(gitlab.retried().is_empty());
    }

    #[tokio::test]
    async fn check_run_with_foreign_url_is_rejected() {
        let (bridge, gitlab, _github) = setup(&["alice"], false);
        let foreign = "https://gitlab.other.com/api/v4/projects/1/jobs/2";
        let err = bridge.handle_github_event(&check_run_event(foreign)).await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<BridgeError>(),
            Some(&BridgeError::IncompatibleJobUrl(foreign.to_string()))
        );
        assert!(gitlab.calls().is_empty());
    }

    fn comment_event(body: &str, commenter: &str, on_pr: bool) -> GitHubEvent {
        GitHubEvent::IssueComment(Box::new(IssueCommentEvent {
            action: "created".to_string(),
            comment: Comment {
                id: 1,
                body: body.to_string(),
                user: user(commenter),
                reactions: Reactions { url: REACTIONS_URL.to_string() },
            },
            issue: Issue {
                number: 7,
                pull_request: on_pr.then(|| IssuePullRequest { url: PR_URL.to_string() }),
            },
            sender: user(commenter),
            organization: Organization { login: "test_org".to_string() },
            repository: repository("test_org/test_repo", 1),
            installation: Installation { id: 123 },
        }))
    }

    fn seed_pull_request(github: &FakeGitHub) {
        let mut state = github.state.lock().unwrap();
        state.repository_ids = vec![1];
        state.pull_requests.insert(
            PR_URL.to_string(),
            testing::pull_request("alice", "fork_user/test_repo", "feature", "abc123"),
        );
    }

    #[tokio::test]
    async fn rerun_comment_triggers_and_reacts() {
        let (bridge, gitlab, github) = setup(&["alice"], false);
        seed_pull_request(&github);
        bridge.handle_github_event(&comment_event("  /Rerun \n", "alice", true)).await.unwrap();

        let triggered = gitlab.triggered();
        assert_eq!(triggered.len(), 1);
        assert_eq!(triggered[0][CLONE_URL], "https://github.com/fork_user/test_repo.git");
        assert_eq!(
            github.state.lock().unwrap().reactions,
            vec![(REACTIONS_URL.to_string(), "rocket".to_string())]
        );
    }

    #[tokio::test]
    async fn failed_reaction_does_not_fail_the_rerun() {
        let (bridge, gitlab, github) = setup(&["alice"], false);
        seed_pull_request(&github);
        github.state.lock().unwrap().reaction_error = true;
        bridge.handle_github_event(&comment_event("/rerun", "alice", true)).await.unwrap();

        assert_eq!(gitlab.triggered().len(), 1);
        assert!(gitlab.cancelled().is_empty());
        assert!(github.state.lock().unwrap().reactions.is_empty());
    }

    #[tokio::test]
    async fn comments_that_are_not_commands_are_ignored() {
        let (bridge, gitlab, github) = setup(&["alice"], false);
        seed_pull_request(&github);
        for event in [
            comment_event("looks good, /rerun later", "alice", true),
            comment_event("/retry", "alice", false),
            comment_event("/retry", "mallory", true),
        ] {
            bridge.handle_github_event(&event).await.unwrap();
        }
        assert!(gitlab.calls().is_empty());
        assert!(github.state.lock().unwrap().reactions.is_empty());
    }

    #[tokio::test]
    async fn comments_on_uninstalled_repositories_are_ignored() {
        let (bridge, gitlab, github) = setup(&["alice"], false);
        seed_pull_request(&github);
        github.state.lock().unwrap().repository_ids = vec![99];
        bridge.handle_github_event(&comment_event("/retry", "alice", true)).await.unwrap();
        assert!(gitlab.calls().is_empty());
    }

    #[tokio::test]
    async fn ping_and_unknown_events_do_nothing() {
        let (bridge, gitlab, github) = setup(&[], false);
        bridge.handle_github_event(&GitHubEvent::Ping).await.unwrap();
        bridge.handle_github_event(&GitHubEvent::Other("star".to_string())).await.unwrap();
        assert!(gitlab.calls().is_empty());
        assert!(github.state.lock().unwrap().installations.is_empty());
    }
}
