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

use crate::models::GitHubEvent;

/// Verified and parsed GitHub webhook delivery.
#[derive(Debug, Clone)]
#[must_use]
pub struct GitHubWebhook {
    pub event: GitHubEvent,
    pub delivery: Option<String>,
}

pub fn verify_signature(secret: &[u8], body: &[u8], header: &str) -> bool {
    let Some(signature) = header.strip_prefix("sha256=").and_then(|s| hex::decode(s).ok()) else {
        return false;
    };
    let mut mac = Hmac::<Sha256>::new_from_slice(secret).expect("HMAC can take key of any size");
    mac.update(body);
    mac.verify_slice(&signature).is_ok()
}

impl<S> FromRequest<S> for GitHubWebhook
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
        let kind = req
            .headers()
            .get("X-GitHub-Event")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| err(StatusCode::BAD_REQUEST, "X-GitHub-Event header missing"))?
            .to_string();
        let delivery = req
            .headers()
            .get("X-GitHub-Delivery")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let signature = req
            .headers()
            .get("X-Hub-Signature-256")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| err(StatusCode::UNAUTHORIZED, "X-Hub-Signature-256 missing"))?
            .to_string();
        let config = <Arc<Config>>::from_ref(state);
        let body = Bytes::from_request(req, state)
            .await
            .map_err(|_| err(StatusCode::BAD_REQUEST, "error reading body"))?;
        if !verify_signature(config.github.webhook_secret.expose().as_bytes(), &body, &signature) {
            return Err(err(StatusCode::UNAUTHORIZED, "signature mismatch"));
        }
        let event = GitHubEvent::parse(&kind, &body)
            .map_err(|e| err(StatusCode::BAD_REQUEST, format!("error parsing {kind} body: {e}")))?;
        Ok(GitHubWebhook { event, delivery })
    }
}
