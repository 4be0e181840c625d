use axum::{
    Router,
    routing::{get, post},
};

use crate::AppState;

mod health;
mod webhook;

pub fn build_router() -> Router<AppState> {
    Router::new()
        .route("/", get(health::index))
        .route("/health", get(health::health))
        .route("/webhook/github", post(webhook::github))
        .route("/webhook/gitlab", post(webhook::gitlab))
}
