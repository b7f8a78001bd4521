/// 存储卷接口

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use validator::Validate;

use super::ApiError;
use crate::app_state::AppState;
use crate::db::models::volume::CreateVolumeDto;
use crate::services::storage_service::StorageService;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_volumes).post(create_volume))
        .route("/:key", get(get_volume).delete(delete_volume))
}

/// 创建独立存储卷
///
/// POST /api/volume
async fn create_volume(
    State(state): State<AppState>,
    Json(dto): Json<CreateVolumeDto>,
) -> Result<impl IntoResponse, ApiError> {
    dto.validate()?;
    let volume = StorageService::new(state).create_volume(dto).await?;
    Ok((StatusCode::CREATED, Json(volume)))
}

async fn list_volumes(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(StorageService::new(state).list_volumes().await?))
}

async fn get_volume(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(StorageService::new(state).get_volume(&key).await?))
}

async fn delete_volume(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    StorageService::new(state).delete_volume(&key).await?;
    Ok(StatusCode::NO_CONTENT)
}
