//! Uniform error shape returned by every endpoint.

use std::{future::Future, time::Duration};

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, warn};

use crate::{auth::session::SessionError, inventory::services::InventoryError};

/// Body of every failed response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Errors {
    pub message: String,
    pub status: u16,
}

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    MissingHeader(String),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Inventory(#[from] InventoryError),

    #[error("request deadline exceeded")]
    DeadlineExceeded,

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::MissingHeader(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Session(e) => e.status(),
            AppError::Inventory(e) => e.status(),
            AppError::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, %status, "request failed");
        } else {
            warn!(error = %self, %status, "request rejected");
        }
        let body = Errors {
            message: self.to_string(),
            status: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

/// Bounds a store-touching operation; on expiry nothing is assumed about
/// writes already handed to the store.
pub async fn with_deadline<T, E, F>(limit: Duration, fut: F) -> AppResult<T>
where
    F: Future<Output = Result<T, E>>,
    AppError: From<E>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(res) => res.map_err(AppError::from),
        Err(_) => Err(AppError::DeadlineExceeded),
    }
}
