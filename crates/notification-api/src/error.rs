//! API 错误类型
//!
//! 所有错误响应统一为 `{success, code, message, data}` 结构

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use notification_worker::NotificationError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("未授权: {0}")]
    Unauthorized(String),

    #[error("参数验证失败: {0}")]
    Validation(String),

    #[error("功能未启用: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Notification(#[from] NotificationError),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Notification(err) => match err {
                NotificationError::InvalidRequest(_)
                | NotificationError::InvalidRecipient(_)
                | NotificationError::InvalidTriggerSpec { .. } => StatusCode::BAD_REQUEST,
                NotificationError::DuplicateJob { .. } => StatusCode::CONFLICT,
                NotificationError::JobNotFound { .. } => StatusCode::NOT_FOUND,
                NotificationError::MetricsUnavailable(_) | NotificationError::UpdatePolling(_) => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                NotificationError::DeliveryTask(_) | NotificationError::Shared(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Unavailable(_) => "UNAVAILABLE",
            Self::Notification(err) => err.code(),
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // 5xx 只返回通用提示，细节写日志
        let message = if status.is_server_error() && status != StatusCode::SERVICE_UNAVAILABLE {
            tracing::error!(error = %self, code = self.error_code(), "请求处理失败");
            "服务内部错误，请稍后重试".to_string()
        } else {
            self.to_string()
        };

        let body = json!({
            "success": false,
            "code": self.error_code(),
            "message": message,
            "data": serde_json::Value::Null
        });

        (status, axum::Json(body)).into_response()
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::Validation(errors.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;
