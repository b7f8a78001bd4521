/// 服务器创建接口

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::post, Json, Router};
use validator::Validate;

use super::{run_cancellable, ApiError};
use crate::app_state::AppState;
use crate::db::models::vm::CreateServerDto;
use crate::services::cluster_service::ClusterService;

pub fn routes() -> Router<AppState> {
    Router::new().route("/", post(create_server))
}

/// 向集群添加单台服务器
///
/// POST /api/server
async fn create_server(
    State(state): State<AppState>,
    Json(dto): Json<CreateServerDto>,
) -> Result<impl IntoResponse, ApiError> {
    dto.validate()?;
    let service = ClusterService::new(state.clone());
    let server = run_cancellable(&state, move |ctx| async move {
        service.create_server(&dto.cluster, dto.member, &ctx).await
    })
    .await?;
    Ok((StatusCode::CREATED, Json(server)))
}
