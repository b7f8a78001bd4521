/// 序列计数器接口

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use common::Error;
use validator::Validate;

use super::ApiError;
use crate::app_state::AppState;
use crate::db::models::sequence::{CreateSequenceDto, SequenceValueResponse};
use crate::services::sequence_service::SequenceService;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_sequence))
        .route("/:name", get(peek_sequence))
        .route("/:name/next", post(next_value))
}

async fn create_sequence(
    State(state): State<AppState>,
    Json(dto): Json<CreateSequenceDto>,
) -> Result<impl IntoResponse, ApiError> {
    dto.validate()?;
    let counter = SequenceService::new(state)
        .create_sequence(&dto.name, dto.start, dto.step)
        .await?;
    Ok((StatusCode::CREATED, Json(counter)))
}

/// 查看计数器，不前进
async fn peek_sequence(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let counter = SequenceService::new(state)
        .peek(&name)
        .await?
        .ok_or_else(|| Error::NotFound(format!("序列计数器 {}", name)))?;
    Ok(Json(counter))
}

/// 取下一个值
async fn next_value(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let value = SequenceService::new(state).next(&name).await?;
    Ok(Json(SequenceValueResponse { name, value }))
}
