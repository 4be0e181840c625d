use std::{fmt::Display, sync::Arc};

use anyhow::Result;
use axum::{
    body::Bytes,
    extract::{FromRef, FromRequest, Request},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use ci_relay_core::config::Config;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::models::GitLabEvent;

/// GitLab webhook delivery whose `X-Gitlab-Token` matched.
#[derive(Debug, Clone)]
#[must_use]
pub struct GitLabWebhook {
    pub event: GitLabEvent,
}

/// Constant-time comparison of a presented token with the expected one.
pub fn token_matches(expected: &str, presented: &str) -> bool {
    let digest = |value: &str| {
        let mut mac = Hmac::<Sha256>::new_from_slice(expected.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(value.as_bytes());
        mac
    };
    let expected_digest = digest(expected).finalize().into_bytes();
    digest(presented).verify_slice(&expected_digest).is_ok()
}

impl<S> FromRequest<S> for GitLabWebhook
where
    Arc<Config>: FromRef<S>,
    S: Send + Sync + Clone,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        fn err(status: StatusCode, m: impl Display) -> Response {
            tracing::error!("{m}");
            (status, m.to_string()).into_response()
        }
        let config = <Arc<Config>>::from_ref(state);
        let token = req
            .headers()
            .get("X-Gitlab-Token")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| err(StatusCode::UNAUTHORIZED, "X-Gitlab-Token missing"))?;
        if !token_matches(config.gitlab.webhook_secret.expose(), token) {
            return Err(err(StatusCode::UNAUTHORIZED, "X-Gitlab-Token mismatch"));
        }
        let kind = req
            .headers()
            .get("X-Gitlab-Event")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| err(StatusCode::BAD_REQUEST, "X-Gitlab-Event header missing"))?
            .to_string();
        let body = Bytes::from_request(req, state)
            .await
            .map_err(|_| err(StatusCode::BAD_REQUEST, "error reading body"))?;
        let event = GitLabEvent::parse(&kind, &body)
            .map_err(|e| err(StatusCode::BAD_REQUEST, format!("error parsing {kind} body: {e}")))?;
        Ok(GitLabWebhook { event })
    }
}
