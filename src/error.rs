use crate::chain::ChainError;
use crate::model::ModelError;
use crate::prompt::PromptError;
use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

pub const INVALID_FILE_TYPE: &str = "Invalid file type. Only JPEG or PNG images are allowed.";

#[derive(Debug, Error)]
pub enum AppError {
    /// Rejected before any model call.
    #[error("{0}")]
    InvalidInput(String),

    #[error("{0}")]
    Unprocessable(String),

    #[error("{0}")]
    PayloadTooLarge(String),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("{0}")]
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::Model(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<PromptError> for AppError {
    fn from(err: PromptError) -> Self {
        AppError::Unprocessable(err.to_string())
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            AppError::PayloadTooLarge(rejection.body_text())
        } else {
            AppError::Unprocessable(format!("Invalid request body: {}", rejection.body_text()))
        }
    }
}

impl From<ChainError> for AppError {
    fn from(err: ChainError) -> Self {
        match err {
            ChainError::Prompt(e) => e.into(),
            ChainError::Model(e) => e.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub detail: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::warn!(status = status.as_u16(), error = %self, "Request rejected");
        }

        (
            status,
            Json(ErrorBody {
                detail: self.to_string(),
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses() {
        assert_eq!(
            AppError::InvalidInput(INVALID_FILE_TYPE.to_string()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::from(PromptError::MissingVariable("text".to_string())).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            AppError::from(ModelError::Network("timed out".to_string())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn model_error_message_is_preserved() {
        let err = AppError::from(ChainError::Model(ModelError::Api {
            status: 403,
            body: "permission denied".to_string(),
        }));
        assert_eq!(err.to_string(), "Gemini API error 403: permission denied");
        assert_eq!(err.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
