//! Webhook 入口
//!
//! 外部系统通过共享密钥推送通知，排版后发往默认接收方，不等待投递结果。

use axum::{
    Json,
    extract::State,
    http::{HeaderMap, StatusCode},
};
use chrono::Utc;
use tracing::{info, warn};
use validator::Validate;

use notification_worker::formatters::{Level, format_message};
use notification_worker::validators::validate_webhook_token;
use notification_worker::{FormatMode, NotificationRequest};

use crate::dto::{ApiResponse, QueuedResponse, WebhookRequest};
use crate::error::{ApiError, Result};
use crate::middleware::WEBHOOK_TOKEN_HEADER;
use crate::state::AppState;

const DEFAULT_TITLE: &str = "Webhook Notification";

/// POST /webhook/notify
pub async fn webhook_notify(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<WebhookRequest>,
) -> Result<(StatusCode, Json<ApiResponse<QueuedResponse>>)> {
    let token = headers
        .get(WEBHOOK_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok());
    let authorized = match (token, state.settings.webhook_secret.as_deref()) {
        (Some(token), Some(expected)) => validate_webhook_token(token, expected),
        _ => false,
    };
    if !authorized {
        warn!(source = ?req.source, "Webhook 令牌校验失败");
        return Err(ApiError::Unauthorized("Webhook 令牌无效".to_string()));
    }

    req.validate()?;
    if state.settings.default_chat_ids.is_empty() {
        return Err(ApiError::Validation("未配置默认接收方".to_string()));
    }

    let level = Level::from(req.level.as_str());
    let body = format_message(
        req.source.as_deref().unwrap_or(DEFAULT_TITLE),
        &req.message,
        level,
        FormatMode::Markdown,
        Utc::now(),
    );
    let request = NotificationRequest::builder(body)
        .format(FormatMode::Markdown)
        .recipients(state.settings.default_chat_ids.iter().cloned())
        .build()?;

    let handle = state.notifier.submit(request);
    let preview: String = req.message.chars().take(50).collect();
    info!(
        delivery_id = %handle.id(),
        source = ?req.source,
        level = level.as_str(),
        preview = %preview,
        "Webhook 通知已受理"
    );

    let queued = QueuedResponse {
        delivery_id: handle.id(),
        recipients: handle.recipients().len(),
    };
    Ok((
        StatusCode::ACCEPTED,
        Json(ApiResponse::success_with_message(queued, "通知已进入投递队列")),
    ))
}
