//! API Key 认证中间件
//!
//! 校验 `Authorization: Bearer <key>`，只挂在 /api/v1 路由上。

use axum::{
    body::Body,
    extract::State,
    http::{Request, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::warn;

use notification_worker::validators::validate_webhook_token;

use crate::error::ApiError;
use crate::state::AppState;

/// Webhook 令牌头
pub const WEBHOOK_TOKEN_HEADER: &str = "x-webhook-token";

/// 未配置 API Key 时放行全部请求
pub async fn api_key_auth(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(expected) = state.settings.api_secret_key.as_deref() else {
        return next.run(request).await;
    };

    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "));

    match token {
        Some(token) if validate_webhook_token(token, expected) => next.run(request).await,
        Some(_) => {
            warn!(path = %request.uri().path(), "API Key 无效");
            ApiError::Unauthorized("API Key 无效".to_string()).into_response()
        }
        None => ApiError::Unauthorized("缺少认证 Token".to_string()).into_response(),
    }
}
