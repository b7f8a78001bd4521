/// 宿主机管理接口

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, put},
    Json, Router,
};
use validator::Validate;

use super::ApiError;
use crate::app_state::AppState;
use crate::db::models::hypervisor::{HypervisorStatusDto, RegisterHypervisorDto};
use crate::services::hypervisor_service::HypervisorService;

/// 宿主机路由
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_hypervisors).post(register_hypervisor))
        .route("/stats", get(get_stats))
        .route("/:name", get(get_hypervisor).delete(unregister_hypervisor))
        .route("/:name/status", put(set_status))
}

/// 登记宿主机
///
/// POST /api/hypervisors
async fn register_hypervisor(
    State(state): State<AppState>,
    Json(dto): Json<RegisterHypervisorDto>,
) -> Result<impl IntoResponse, ApiError> {
    dto.validate()?;
    let hv = HypervisorService::new(state).register_hypervisor(dto).await?;
    Ok((StatusCode::CREATED, Json(hv)))
}

async fn list_hypervisors(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(HypervisorService::new(state).list_hypervisors().await?))
}

async fn get_hypervisor(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(HypervisorService::new(state).get_hypervisor(&name).await?))
}

/// 健康上报
///
/// PUT /api/hypervisors/:name/status
async fn set_status(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(dto): Json<HypervisorStatusDto>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(HypervisorService::new(state).set_status(&name, dto.status).await?))
}

async fn unregister_hypervisor(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    HypervisorService::new(state).unregister_hypervisor(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// 容量摘要
async fn get_stats(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(HypervisorService::new(state).get_stats().await?))
}
