//! 请求 DTO

use chrono::{DateTime, Utc};
use serde::Deserialize;
use validator::Validate;

/// 发送通知
#[derive(Debug, Deserialize, Validate)]
pub struct NotifyRequest {
    #[validate(length(min = 1, message = "消息内容不能为空"))]
    pub message: String,
    pub chat_id: Option<String>,
    pub chat_ids: Option<Vec<String>>,
    pub parse_mode: Option<String>,
    pub category: Option<String>,
}

/// Webhook 通知
#[derive(Debug, Deserialize, Validate)]
pub struct WebhookRequest {
    #[validate(length(min = 1, message = "消息内容不能为空"))]
    pub message: String,
    #[serde(default = "default_level")]
    pub level: String,
    pub source: Option<String>,
}

fn default_level() -> String {
    "INFO".to_string()
}

/// 订阅分类
#[derive(Debug, Deserialize)]
pub struct SubscribeRequest {
    pub category: String,
}

/// 触发规则
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerRequest {
    Cron { expression: String },
    Interval { seconds: u64 },
    Once { at: DateTime<Utc> },
}

/// 创建定时任务
#[derive(Debug, Deserialize, Validate)]
pub struct ScheduleRequest {
    #[validate(length(min = 1, max = 128, message = "job_id 长度必须在 1-128 个字符之间"))]
    pub job_id: String,
    #[validate(length(min = 1, message = "消息内容不能为空"))]
    pub message: String,
    pub chat_ids: Option<Vec<String>>,
    pub category: Option<String>,
    pub parse_mode: Option<String>,
    pub trigger: TriggerRequest,
}

/// 发送系统报告
#[derive(Debug, Default, Deserialize)]
pub struct SystemReportQuery {
    pub chat_id: Option<String>,
}
