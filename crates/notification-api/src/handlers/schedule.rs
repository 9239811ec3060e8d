//! 定时任务 API

use std::time::Duration;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};

use notification_worker::{JobPayload, JobSummary, NotificationRequest, TriggerSpec};

use super::{parse_category, parse_format, parse_recipients};
use crate::dto::{ApiResponse, ScheduleRequest, TriggerRequest, UnscheduleResponse};
use crate::error::{ApiError, Result};
use crate::state::AppState;

impl From<TriggerRequest> for TriggerSpec {
    fn from(trigger: TriggerRequest) -> Self {
        match trigger {
            TriggerRequest::Cron { expression } => Self::Cron(expression),
            TriggerRequest::Interval { seconds } => Self::Interval(Duration::from_secs(seconds)),
            TriggerRequest::Once { at } => Self::OneShot(at),
        }
    }
}

/// 创建定时任务
///
/// POST /api/v1/schedule
pub async fn create_job(
    State(state): State<AppState>,
    Json(req): Json<ScheduleRequest>,
) -> Result<(StatusCode, Json<ApiResponse<JobSummary>>)> {
    validator::Validate::validate(&req)?;

    let explicit = parse_recipients(req.chat_ids.iter().flatten().map(String::as_str))?;
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

    let summary = state.scheduler.schedule(
        req.job_id,
        JobPayload::notification(request),
        req.trigger.into(),
    )?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success_with_message(summary, "定时任务已创建")),
    ))
}

/// GET /api/v1/schedule
pub async fn list_jobs(State(state): State<AppState>) -> Json<ApiResponse<Vec<JobSummary>>> {
    Json(ApiResponse::success(state.scheduler.list_jobs()))
}

/// 取消定时任务，幂等
///
/// DELETE /api/v1/schedule/{job_id}
pub async fn delete_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Json<ApiResponse<UnscheduleResponse>> {
    let removed = state.scheduler.unschedule(&job_id);
    Json(ApiResponse::success(UnscheduleResponse { job_id, removed }))
}

/// POST /api/v1/schedule/{job_id}/pause
pub async fn pause_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<ApiResponse<JobSummary>>> {
    Ok(Json(ApiResponse::success(state.scheduler.pause(&job_id)?)))
}

/// POST /api/v1/schedule/{job_id}/resume
pub async fn resume_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<ApiResponse<JobSummary>>> {
    Ok(Json(ApiResponse::success(state.scheduler.resume(&job_id)?)))
}
