pub mod config;
pub mod error;
pub mod log;
pub mod models;
pub mod payload;
pub mod signature;
pub mod status;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

pub use crate::error::BridgeError;

pub enum AppError {
    Status(StatusCode),
    Internal(anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            Self::Status(status) if status == StatusCode::NOT_FOUND => {
                (status, "Not found").into_response()
            }
            Self::Status(status) => status.into_response(),
            Self::Internal(err) => {
                tracing::error!("{:?}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, "Something went wrong").into_response()
            }
        }
    }
}

impl<E: Into<anyhow::Error>> From<E> for AppError {
    fn from(err: E) -> Self { Self::Internal(err.into()) }
}
