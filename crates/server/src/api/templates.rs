/// 镜像模板接口

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use common::models::ImageTemplate;

use super::ApiError;
use crate::app_state::AppState;
use crate::services::storage_service::StorageService;

pub fn routes() -> Router<AppState> {
    Router::new().route("/", get(list_templates).post(register_template))
}

async fn register_template(
    State(state): State<AppState>,
    Json(template): Json<ImageTemplate>,
) -> Result<impl IntoResponse, ApiError> {
    let template = StorageService::new(state).register_template(template).await?;
    Ok((StatusCode::CREATED, Json(template)))
}

async fn list_templates(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(StorageService::new(state).list_templates().await?))
}
