//! 系统监控 API

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
};

use notification_worker::{SystemMetrics, SystemMonitor};

use super::parse_recipient;
use crate::dto::{ApiResponse, QueuedResponse, SystemReportQuery};
use crate::error::{ApiError, Result};
use crate::state::AppState;

fn monitor(state: &AppState) -> Result<&SystemMonitor> {
    state
        .monitor
        .as_deref()
        .ok_or_else(|| ApiError::Unavailable("系统监控未启用".to_string()))
}

/// GET /api/v1/system/metrics
pub async fn get_metrics(State(state): State<AppState>) -> Result<Json<ApiResponse<SystemMetrics>>> {
    let metrics = monitor(&state)?.current_metrics().await?;
    Ok(Json(ApiResponse::success(metrics)))
}

/// 发送系统报告；未指定 chat_id 时发往 system 订阅者
///
/// POST /api/v1/system/report
pub async fn send_report(
    State(state): State<AppState>,
    Query(query): Query<SystemReportQuery>,
) -> Result<(StatusCode, Json<ApiResponse<QueuedResponse>>)> {
    let recipient = query.chat_id.as_deref().map(parse_recipient).transpose()?;
    let handle = monitor(&state)?.send_report(recipient).await?;

    let queued = QueuedResponse {
        delivery_id: handle.id(),
        recipients: handle.recipients().len(),
    };
    Ok((
        StatusCode::ACCEPTED,
        Json(ApiResponse::success_with_message(queued, "系统报告已提交")),
    ))
}
