use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use log::error;

use super::types::ErrorResponse;
use crate::InputError;

pub type Result<T, E = AppError> = std::result::Result<T, E>;

/// 已有索引任务正在运行
#[derive(Debug, thiserror::Error)]
#[error("索引任务正在运行，请稍后再试")]
pub struct IndexBusy;

/// API错误类型
pub struct AppError(pub anyhow::Error);

impl AppError {
    fn status(&self) -> StatusCode {
        if self.0.downcast_ref::<InputError>().is_some() {
            StatusCode::BAD_REQUEST
        } else if self.0.downcast_ref::<IndexBusy>().is_some() {
            StatusCode::CONFLICT
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("请求处理失败: {:?}", self.0);
        }
        (status, Json(ErrorResponse { error: format!("{:#}", self.0) })).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
