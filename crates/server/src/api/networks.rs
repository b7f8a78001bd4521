/// 网络管理接口

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};

use super::ApiError;
use crate::app_state::AppState;
use crate::db::models::network::CreateNetworkDto;
use crate::services::network_service::NetworkService;

/// 网络路由
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_networks).post(create_network))
        .route("/:id", get(get_network).delete(delete_network))
}

/// 创建网络
async fn create_network(
    State(state): State<AppState>,
    Json(dto): Json<CreateNetworkDto>,
) -> Result<impl IntoResponse, ApiError> {
    let network = NetworkService::new(state).create_network(dto).await?;
    Ok((StatusCode::CREATED, Json(network)))
}

/// 获取网络列表
async fn list_networks(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(NetworkService::new(state).list_networks().await?))
}

/// 获取网络详情
async fn get_network(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(NetworkService::new(state).get_network(&id).await?))
}

/// 删除网络
async fn delete_network(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    NetworkService::new(state).delete_network(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}
