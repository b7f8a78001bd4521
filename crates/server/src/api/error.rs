/// API 错误响应

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::Error;
use serde::Serialize;
use validator::ValidationErrors;

/// API 错误响应体
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

impl From<ValidationErrors> for ApiError {
    fn from(err: ValidationErrors) -> Self {
        ApiError(Error::InvalidArgument(format!("验证失败: {}", err)))
    }
}

/// 领域错误对应的 HTTP 状态码
pub fn status_of(err: &Error) -> StatusCode {
    match err {
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        Error::InsufficientCapacity(_) | Error::NoCapacityAvailable(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        Error::AlreadyExists(_) | Error::Conflict(_) | Error::InvalidTransition { .. } => {
            StatusCode::CONFLICT
        }
        Error::PartialBatchFailure(_) => StatusCode::MULTI_STATUS,
        Error::StoreUnavailable(_) | Error::SequenceContention(_) | Error::Contention(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        Error::Cancelled(_) => StatusCode::REQUEST_TIMEOUT,
        Error::Serialization(_) | Error::Config(_) | Error::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_of(&self.0);
        if status.is_server_error() {
            tracing::error!("请求失败: {}", self.0);
        }

        // 批量操作部分失败时返回逐个成员的结果
        if let Error::PartialBatchFailure(report) = self.0 {
            return (status, Json(report)).into_response();
        }

        let body = Json(ErrorResponse {
            error: status.canonical_reason().unwrap_or("Unknown").to_string(),
            message: self.0.to_string(),
        });

        (status, body).into_response()
    }
}
