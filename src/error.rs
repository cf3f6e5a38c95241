use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Errors surfaced from the fetch pipeline: validation failures are 400,
/// navigation failures 502, render/selector timeouts 504, everything else
/// 500.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid {field}: {detail}")]
    Validation { field: String, detail: String },

    #[error("browser navigation failed: {0}")]
    NavigationFailed(String),

    #[error("timed out waiting for ready state")]
    ReadyStateTimeout,

    #[error("timed out waiting for wait_for_element")]
    SelectorTimeout,

    #[error("browser error: {0}")]
    Browser(#[from] anyhow::Error),
}

impl IntoResponse for FetchError {
    fn into_response(self) -> Response {
        let status = match &self {
            FetchError::Validation { .. } => StatusCode::BAD_REQUEST,
            FetchError::NavigationFailed(_) => StatusCode::BAD_GATEWAY,
            FetchError::ReadyStateTimeout | FetchError::SelectorTimeout => {
                StatusCode::GATEWAY_TIMEOUT
            }
            FetchError::Browser(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("fetch pipeline failed: {}", self);
        } else {
            tracing::warn!("fetch pipeline rejected request: {}", self);
        }
        (
            status,
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}
