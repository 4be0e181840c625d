use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{
    error::BridgeError,
    models::{CheckStatus, Conclusion},
};

/// Job status as reported by GitLab.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Created,
    WaitingForResource,
    Preparing,
    Pending,
    Running,
    Success,
    Failed,
    Canceled,
    Skipped,
    Manual,
    Scheduled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 11] = [
        JobStatus::Created,
        JobStatus::WaitingForResource,
        JobStatus::Preparing,
        JobStatus::Pending,
        JobStatus::Running,
        JobStatus::Success,
        JobStatus::Failed,
        JobStatus::Canceled,
        JobStatus::Skipped,
        JobStatus::Manual,
        JobStatus::Scheduled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Created => "created",
            JobStatus::WaitingForResource => "waiting_for_resource",
            JobStatus::Preparing => "preparing",
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Success => "success",
            JobStatus::Failed => "failed",
            JobStatus::Canceled => "canceled",
            JobStatus::Skipped => "skipped",
            JobStatus::Manual => "manual",
            JobStatus::Scheduled => "scheduled",
        }
    }

    pub fn check_status(self) -> CheckStatus {
        match self {
            JobStatus::Created
            | JobStatus::WaitingForResource
            | JobStatus::Preparing
            | JobStatus::Pending
            | JobStatus::Manual
            | JobStatus::Scheduled => CheckStatus::Queued,
            JobStatus::Running => CheckStatus::InProgress,
            JobStatus::Success | JobStatus::Failed | JobStatus::Canceled | JobStatus::Skipped => {
                CheckStatus::Completed
            }
        }
    }

    /// Conclusion for a finished job; `None` while the job is still queued or running.
    pub fn conclusion(self, allow_failure: bool) -> Option<Conclusion> {
        match self {
            JobStatus::Success => Some(Conclusion::Success),
            JobStatus::Failed if allow_failure => Some(Conclusion::Neutral),
            JobStatus::Failed => Some(Conclusion::Failure),
            JobStatus::Canceled => Some(Conclusion::Cancelled),
            JobStatus::Skipped => Some(Conclusion::Neutral),
            _ => None,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for JobStatus {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| BridgeError::UnknownJobStatus(s.to_string()))
    }
}

/// Check run state derived from a GitLab job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Translation {
    pub status: CheckStatus,
    pub conclusion: Option<Conclusion>,
    pub title: String,
}

pub fn translate(status: JobStatus, allow_failure: bool) -> Translation {
    let check_status = status.check_status();
    let conclusion = status.conclusion(allow_failure);
    tracing::debug!(
        "Status to conclusion: {} => {:?} / {:?} (allow_failure: {})",
        status,
        check_status,
        conclusion,
        allow_failure
    );
    let mut title = format!("GitLab CI: {}", status.as_str().to_uppercase());
    if status == JobStatus::Failed && allow_failure {
        title.push_str(" [allowed failure]");
    }
    Translation { status: check_status, conclusion, title }
}
