use axum::{Json, http::StatusCode};
use serde::Serialize;
use tracing::error;

use crate::workspace::WorkspaceError;

pub type ApiError = (StatusCode, Json<ApiMessage>);

/// Body of every JSON error the service returns.
#[derive(Debug, Serialize, Clone)]
pub struct ApiMessage {
    pub message: String,
}

pub fn json_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ApiMessage {
            message: message.into(),
        }),
    )
}

pub fn session_missing() -> ApiError {
    json_error(StatusCode::NOT_FOUND, "会话不存在或已过期。")
}

/// Bad names are the client's fault; anything else is logged as a server error.
pub fn workspace_error(err: WorkspaceError) -> ApiError {
    match err {
        WorkspaceError::InvalidFileName(_) => json_error(StatusCode::BAD_REQUEST, "文件名无效。"),
        other => {
            error!(err = ?other, "workspace operation failed");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "服务器内部错误。")
        }
    }
}
