//! Failures that end the handling of an event without retrying.
//!
//! Anything that is not a [`BridgeError`] is treated as transient (network
//! failures, unexpected HTTP statuses) and may be retried.

/// Errors that abort processing of the current event.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    #[error("bridge payload signature mismatch")]
    SignatureMismatch,

    #[error("pipeline variable {0} missing")]
    MissingVariable(&'static str),

    #[error("installation_id missing from bridge payload")]
    MissingInstallationId,

    #[error("malformed bridge payload: {0}")]
    MalformedPayload(String),

    #[error("unknown job status {0:?}")]
    UnknownJobStatus(String),

    #[error("object is not a build: {0:?}")]
    InvalidBuild(String),

    #[error("incompatible external id / job url: {0}")]
    IncompatibleJobUrl(String),

    #[error("allow team {team} not in org {org}")]
    TeamOrgMismatch { team: String, org: String },
}

impl BridgeError {
    /// Whether the error means the correlation identity can't be trusted.
    pub fn is_security(&self) -> bool {
        matches!(self, Self::SignatureMismatch | Self::MissingVariable(_) | Self::MissingInstallationId)
    }

    /// Bridge errors are never resolved by trying again.
    pub fn is_retryable(&self) -> bool { false }
}

/// Whether an error bubbling out of a handler may be retried.
pub fn is_retryable(err: &anyhow::Error) -> bool {
    match err.downcast_ref::<BridgeError>() {
        Some(e) => e.is_retryable(),
        None => true,
    }
}

/// Whether an error bubbling out of a handler is a [`BridgeError::is_security`] failure.
pub fn is_security(err: &anyhow::Error) -> bool {
    err.downcast_ref::<BridgeError>().is_some_and(BridgeError::is_security)
}
