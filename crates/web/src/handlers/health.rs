use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use ci_relay_bridge::Bridge;
use ci_relay_core::AppError;
use tokio::sync::{Semaphore, TryAcquireError};

pub async fn index() -> &'static str {
    tracing::debug!("status check");
    "ok"
}

pub async fn health(
    State(bridge): State<Arc<Bridge>>,
    State(permits): State<Arc<Semaphore>>,
) -> Result<Response, AppError> {
    let _permit = match permits.try_acquire() {
        Ok(permit) => permit,
        Err(TryAcquireError::NoPermits) => {
            return Ok((StatusCode::TOO_MANY_REQUESTS, "Rate limited").into_response());
        }
        Err(e) => return Err(e.into()),
    };
    tracing::info!("Checking health");
    let health = bridge.health().await;
    let status = if health.is_ok() { StatusCode::OK } else { StatusCode::INTERNAL_SERVER_ERROR };
    Ok((status, health.to_string()).into_response())
}
