pub mod clusters;
pub mod error;
pub mod hypervisors;
pub mod networks;
pub mod sequences;
pub mod servers;
pub mod templates;
pub mod vms;
pub mod volumes;

use axum::Router;
use common::Error;
use std::future::Future;
use tokio_util::sync::CancellationToken;

use crate::app_state::AppState;
use crate::services::OpContext;

pub use error::{ApiError, ErrorResponse};

/// 所有 API 路由（统一入口）
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/hypervisors", hypervisors::routes())
        .nest("/virtualMachines", vms::routes())
        .nest("/server", servers::routes())
        .nest("/volume", volumes::routes())
        .nest("/network", networks::routes())
        .nest("/templates", templates::routes())
        .nest("/sequences", sequences::routes())
        .merge(clusters::routes())
}

/// 在独立任务中执行多步操作
///
/// 客户端断开时处理函数被丢弃，守卫随之触发取消；任务本身继续运行到
/// 下一个检查点后走回滚流程，不会在存储调用中途被打断。
pub(crate) async fn run_cancellable<T, F, Fut>(state: &AppState, work: F) -> Result<T, ApiError>
where
    F: FnOnce(OpContext) -> Fut,
    Fut: Future<Output = common::Result<T>> + Send + 'static,
    T: Send + 'static,
{
    let token = CancellationToken::new();
    let _guard = token.clone().drop_guard();
    let ctx = OpContext::new(token).with_timeout(state.core().request_deadline);

    tokio::spawn(work(ctx))
        .await
        .map_err(|e| ApiError(Error::Internal(format!("任务异常退出: {}", e))))?
        .map_err(ApiError::from)
}
