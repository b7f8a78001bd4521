/// 虚拟机生命周期接口

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use super::ApiError;
use crate::app_state::AppState;
use crate::db::models::vm::ListMachinesQuery;
use crate::services::vm_service::VmService;

/// 宿主机回调请求体
#[derive(Debug, Default, Deserialize)]
pub struct HostReportDto {
    #[serde(default)]
    pub reason: Option<String>,
}

/// VM 路由
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_machines))
        .route("/:key", get(get_machine).delete(purge_machine))
        .route("/:key/start", post(start_machine))
        .route("/:key/stop", post(stop_machine))
        .route("/:key/destroy", post(destroy_machine))
        .route("/:key/teardown", post(confirm_teardown))
        .route("/:key/ready", post(report_ready))
        .route("/:key/failure", post(report_failure))
        .route("/:key/fault", post(report_fault))
}

/// 获取机器列表
///
/// GET /api/virtualMachines?cluster=web&hypervisor=hv1&status=running
async fn list_machines(
    State(state): State<AppState>,
    Query(query): Query<ListMachinesQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let machines = VmService::new(state).list_machines(&query).await?;
    Ok(Json(machines))
}

async fn get_machine(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(VmService::new(state).get_machine(&key).await?))
}

/// 清除 Deleted / Error 状态的机器记录
async fn purge_machine(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    VmService::new(state).purge_machine(&key).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn start_machine(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(VmService::new(state).start(&key).await?))
}

async fn stop_machine(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(VmService::new(state).stop(&key).await?))
}

async fn destroy_machine(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(VmService::new(state).destroy(&key).await?))
}

async fn confirm_teardown(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(VmService::new(state).confirm_teardown(&key).await?))
}

/// 宿主机报告创建完成
async fn report_ready(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(VmService::new(state).report_ready(&key).await?))
}

/// 宿主机报告创建失败
async fn report_failure(
    State(state): State<AppState>,
    Path(key): Path<String>,
    body: Option<Json<HostReportDto>>,
) -> Result<impl IntoResponse, ApiError> {
    let reason = body.and_then(|Json(b)| b.reason);
    Ok(Json(VmService::new(state).report_failure(&key, reason).await?))
}

/// 不可恢复的故障
async fn report_fault(
    State(state): State<AppState>,
    Path(key): Path<String>,
    body: Option<Json<HostReportDto>>,
) -> Result<impl IntoResponse, ApiError> {
    let reason = body.and_then(|Json(b)| b.reason);
    Ok(Json(VmService::new(state).report_fault(&key, reason).await?))
}
