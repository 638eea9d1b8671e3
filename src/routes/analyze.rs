use crate::error::{AppError, INVALID_FILE_TYPE};
use crate::model::{Message, Part, Role};
use crate::prompt::FRESHNESS_TEMPLATE;
use crate::startup::AppState;
use axum::{
    extract::{
        multipart::{Field, MultipartError},
        Multipart, State,
    },
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::time::Instant;

pub const FILE_FIELD: &str = "file";
pub const ACCEPTED_CONTENT_TYPES: [&str; 2] = ["image/jpeg", "image/png"];

#[derive(Debug, Serialize, Deserialize)]
pub struct AnalysisResponse {
    pub analysis: String,
}

/// `POST /api/analyze-image`
pub async fn analyze_image(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<AnalysisResponse>, AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, state.max_upload_bytes, AppError::InvalidInput))?
    {
        if field.name() == Some(FILE_FIELD) {
            return analyze_field(&state, field).await.map(Json);
        }
    }

    Err(AppError::Unprocessable(format!(
        "Field required: {}",
        FILE_FIELD
    )))
}

async fn analyze_field(state: &AppState, field: Field<'_>) -> Result<AnalysisResponse, AppError> {
    let content_type = field.content_type().unwrap_or_default().to_string();
    let file_name = field.file_name().unwrap_or_default().to_string();

    if !ACCEPTED_CONTENT_TYPES.contains(&content_type.as_str()) {
        return Err(AppError::InvalidInput(INVALID_FILE_TYPE.to_string()));
    }

    let start = Instant::now();

    let data = field
        .bytes()
        .await
        .map_err(|e| multipart_error(e, state.max_upload_bytes, AppError::Internal))?;

    tracing::info!(
        file_name = %file_name,
        content_type = %content_type,
        size = data.len(),
        model = state.vision.name(),
        "Analyzing image"
    );

    let message = Message::new(
        Role::User,
        vec![
            Part::Text(FRESHNESS_TEMPLATE.to_string()),
            Part::InlineData {
                mime_type: content_type,
                data: data.to_vec(),
            },
        ],
    );

    let text = state.vision.generate(vec![message]).await?;
    let analysis = state.parser.parse(text);

    tracing::info!(
        file_name = %file_name,
        elapsed_ms = start.elapsed().as_millis() as u64,
        analysis_len = analysis.len(),
        "Image analysis complete"
    );

    Ok(AnalysisResponse { analysis })
}

/// Oversized bodies map to 413 regardless of where the limit was hit.
fn multipart_error(
    err: MultipartError,
    limit: usize,
    otherwise: fn(String) -> AppError,
) -> AppError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge(format!("File exceeds the {} byte upload limit", limit))
    } else {
        otherwise(err.body_text())
    }
}
