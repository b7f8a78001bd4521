/// 集群编排接口

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use common::models::ClusterSpec;
use validator::Validate;

use super::{run_cancellable, ApiError};
use crate::app_state::AppState;
use crate::services::cluster_service::ClusterService;

/// 集群路由
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/createCluster", post(create_cluster))
        .route("/destroyCluster/:name", post(destroy_cluster))
        .route("/startCluster/:name", post(start_cluster))
        .route("/stopCluster/:name", post(stop_cluster))
}

/// 创建集群
///
/// POST /api/createCluster
async fn create_cluster(
    State(state): State<AppState>,
    Json(spec): Json<ClusterSpec>,
) -> Result<impl IntoResponse, ApiError> {
    spec.validate()?;
    let service = ClusterService::new(state.clone());
    let machines = run_cancellable(&state, move |ctx| async move {
        service.create_cluster(spec, &ctx).await
    })
    .await?;
    Ok((StatusCode::CREATED, Json(machines)))
}

/// 销毁集群
///
/// 部分成员失败时返回 207 和逐个成员的结果
async fn destroy_cluster(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let service = ClusterService::new(state.clone());
    let report = run_cancellable(&state, move |ctx| async move {
        service.destroy_cluster(&name, &ctx).await
    })
    .await?;
    Ok(Json(report))
}

/// 启动集群
async fn start_cluster(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let service = ClusterService::new(state.clone());
    let report = run_cancellable(&state, move |ctx| async move {
        service.start_cluster(&name, &ctx).await
    })
    .await?;
    Ok(Json(report))
}

/// 停止集群
async fn stop_cluster(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let service = ClusterService::new(state.clone());
    let report = run_cancellable(&state, move |ctx| async move {
        service.stop_cluster(&name, &ctx).await
    })
    .await?;
    Ok(Json(report))
}
