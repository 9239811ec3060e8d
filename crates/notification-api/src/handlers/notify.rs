//! 通知发送 API

use axum::{Json, extract::State};
use tracing::info;
use validator::Validate;

use notification_worker::NotificationRequest;
use notification_worker::validators::validate_message;

use super::{parse_category, parse_format, parse_recipients};
use crate::dto::{ApiResponse, NotifyRequest, NotifyResponse};
use crate::error::{ApiError, Result};
use crate::state::AppState;

/// 发送通知并等待全部接收方的结果
///
/// POST /api/v1/notify
///
/// 接收方优先级：chat_id / chat_ids → category 订阅者 → 默认接收方
pub async fn send_notification(
    State(state): State<AppState>,
    Json(req): Json<NotifyRequest>,
) -> Result<Json<ApiResponse<NotifyResponse>>> {
    req.validate()?;
    validate_message(&req.message, state.settings.max_message_length)?;

    let explicit = parse_recipients(
        req.chat_id
            .iter()
            .chain(req.chat_ids.iter().flatten())
            .map(String::as_str),
    )?;
    let category = parse_category(req.category.as_deref())?;
    let format = parse_format(req.parse_mode.as_deref(), state.settings.default_format)?;

    let recipients = if explicit.is_empty() && category.is_none() {
        state.settings.default_chat_ids.clone()
    } else {
        explicit
    };
    if recipients.is_empty() && category.is_none() {
        return Err(ApiError::Validation(
            "未指定接收方且未配置默认接收方".to_string(),
        ));
    }

    let request = NotificationRequest::builder(req.message)
        .format(format)
        .recipients(recipients)
        .maybe_category(category)
        .build()?;

    let handle = state.notifier.submit(request);
    let delivery_id = handle.id();
    let outcomes = handle.wait().await?;
    let response = NotifyResponse::new(delivery_id, outcomes);

    info!(
        delivery_id = %delivery_id,
        total = response.total,
        succeeded = response.succeeded,
        "API 通知发送完成"
    );

    let message = format!("已发送 {}/{}", response.succeeded, response.total);
    Ok(Json(ApiResponse::success_with_message(response, message)))
}
