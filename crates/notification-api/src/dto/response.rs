//! 响应 DTO

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use notification_worker::registry::{Subscription, SubscriptionStats};
use notification_worker::{Category, DeliveryOutcome};

/// API 统一响应
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self::success_with_message(data, "操作成功")
    }

    pub fn success_with_message(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            code: "SUCCESS".to_string(),
            message: message.into(),
            data: Some(data),
        }
    }
}

/// 单个接收方的投递结果
#[derive(Debug, Serialize)]
pub struct RecipientResult {
    pub chat_id: String,
    pub success: bool,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<DeliveryOutcome> for RecipientResult {
    fn from(outcome: DeliveryOutcome) -> Self {
        Self {
            chat_id: outcome.recipient.to_string(),
            success: outcome.succeeded,
            attempts: outcome.attempts,
            error_code: outcome.last_error.as_ref().map(|e| e.code()),
            error: outcome.last_error.map(|e| e.to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct NotifyResponse {
    pub delivery_id: Uuid,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub results: Vec<RecipientResult>,
}

impl NotifyResponse {
    pub fn new(delivery_id: Uuid, outcomes: Vec<DeliveryOutcome>) -> Self {
        let results: Vec<RecipientResult> = outcomes.into_iter().map(Into::into).collect();
        let succeeded = results.iter().filter(|r| r.success).count();
        Self {
            delivery_id,
            total: results.len(),
            succeeded,
            failed: results.len() - succeeded,
            results,
        }
    }
}

/// 已受理、后台投递中
#[derive(Debug, Serialize)]
pub struct QueuedResponse {
    pub delivery_id: Uuid,
    pub recipients: usize,
}

#[derive(Debug, Serialize)]
pub struct SubscriptionsResponse {
    pub subscriptions: Vec<Subscription>,
    pub stats: SubscriptionStats,
}

#[derive(Debug, Serialize)]
pub struct RecipientSubscriptions {
    pub chat_id: String,
    pub categories: Vec<Category>,
}

#[derive(Debug, Serialize)]
pub struct SubscriptionChange {
    pub chat_id: String,
    pub category: Category,
    /// 本次调用是否改变了订阅
    pub changed: bool,
}

#[derive(Debug, Serialize)]
pub struct UnscheduleResponse {
    pub job_id: String,
    pub removed: bool,
}

#[derive(Debug, Serialize)]
pub struct ComponentStatus {
    pub notification: bool,
    pub scheduler: bool,
    pub monitoring: bool,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub transport: &'static str,
    pub transport_connected: bool,
    pub services: ComponentStatus,
    pub scheduled_jobs: usize,
    pub timestamp: DateTime<Utc>,
}
