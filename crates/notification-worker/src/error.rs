//! 通知服务错误类型
//!
//! `DeliveryError` 描述单个接收方的投递失败，随 `DeliveryOutcome` 返回，
//! 不会中断同一请求中其他接收方的投递；`NotificationError` 描述请求校验、
//! 任务调度等调用级错误。

use serde::Serialize;
use thiserror::Error;

/// 单个接收方的投递失败分类
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum DeliveryError {
    /// 网络超时、平台 5xx、平台限流，可重试
    #[error("瞬时投递失败: {0}")]
    TransientDeliveryFailure(String),

    /// 接收方无效、内容格式错误、鉴权失败，不重试
    #[error("永久投递失败: {0}")]
    PermanentDeliveryFailure(String),

    /// 等待准入超过上限
    #[error("限流等待超限，放弃投递: 需等待 {required_wait_ms}ms")]
    RateLimitAbandoned { required_wait_ms: u64 },
}

impl DeliveryError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientDeliveryFailure(_))
    }

    /// 错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::TransientDeliveryFailure(_) => "TRANSIENT_DELIVERY_FAILURE",
            Self::PermanentDeliveryFailure(_) => "PERMANENT_DELIVERY_FAILURE",
            Self::RateLimitAbandoned { .. } => "RATE_LIMIT_ABANDONED",
        }
    }
}

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("通知请求无效: {0}")]
    InvalidRequest(String),

    #[error("接收方 ID 无效: {0}")]
    InvalidRecipient(String),

    #[error("任务已存在: job_id={job_id}")]
    DuplicateJob { job_id: String },

    #[error("触发规则无效: {reason}")]
    InvalidTriggerSpec { reason: String },

    #[error("任务未找到: job_id={job_id}")]
    JobNotFound { job_id: String },

    #[error("投递任务异常退出: {0}")]
    DeliveryTask(String),

    #[error("系统指标采集失败: {0}")]
    MetricsUnavailable(String),

    #[error("拉取聊天更新失败: {0}")]
    UpdatePolling(String),

    #[error(transparent)]
    Shared(#[from] notifier_shared::error::NotifierError),
}

impl NotificationError {
    pub fn invalid_trigger(reason: impl Into<String>) -> Self {
        Self::InvalidTriggerSpec {
            reason: reason.into(),
        }
    }

    /// 错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::InvalidRecipient(_) => "INVALID_RECIPIENT",
            Self::DuplicateJob { .. } => "DUPLICATE_JOB",
            Self::InvalidTriggerSpec { .. } => "INVALID_TRIGGER_SPEC",
            Self::JobNotFound { .. } => "JOB_NOT_FOUND",
            Self::DeliveryTask(_) => "DELIVERY_TASK_FAILED",
            Self::MetricsUnavailable(_) => "METRICS_UNAVAILABLE",
            Self::UpdatePolling(_) => "UPDATE_POLLING_FAILED",
            Self::Shared(err) => err.code(),
        }
    }
}
