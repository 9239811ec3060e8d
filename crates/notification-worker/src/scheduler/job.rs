//! 定时任务定义

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::trigger::Trigger;
use crate::model::{Category, NotificationRequest, RecipientId};

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Active,
    Paused,
    Completed,
    Cancelled,
}

/// 触发时正文的来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobContent {
    /// 原样使用模板正文
    Static,
    /// 触发时采集系统指标生成报告
    SystemReport,
    /// 触发时生成周报
    WeeklySummary,
}

/// 任务载荷：通知请求模板 + 正文来源
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobPayload {
    pub request: NotificationRequest,
    pub content: JobContent,
}

impl JobPayload {
    pub fn notification(request: NotificationRequest) -> Self {
        Self {
            request,
            content: JobContent::Static,
        }
    }

    pub fn system_report(request: NotificationRequest) -> Self {
        Self {
            request,
            content: JobContent::SystemReport,
        }
    }

    pub fn weekly_summary(request: NotificationRequest) -> Self {
        Self {
            request,
            content: JobContent::WeeklySummary,
        }
    }
}

#[derive(Debug)]
pub(crate) struct ScheduledJob {
    pub id: String,
    pub trigger: Trigger,
    pub payload: Arc<JobPayload>,
    pub state: JobState,
    pub next_fire: Option<DateTime<Utc>>,
    pub last_fire: Option<DateTime<Utc>>,
    pub fire_count: u64,
    pub created_at: DateTime<Utc>,
}

impl ScheduledJob {
    /// 仍占用 job_id 的任务
    pub fn is_live(&self) -> bool {
        matches!(self.state, JobState::Active | JobState::Paused)
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            id: self.id.clone(),
            trigger_kind: self.trigger.kind(),
            trigger: self.trigger.describe(),
            state: self.state,
            next_fire_time: self.next_fire,
            last_fire_time: self.last_fire,
            fire_count: self.fire_count,
            created_at: self.created_at,
            message: self.payload.request.body().to_string(),
            content: self.payload.content,
            category: self.payload.request.category(),
            recipients: self.payload.request.recipients().to_vec(),
        }
    }
}

/// 任务摘要（对外快照）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobSummary {
    pub id: String,
    pub trigger_kind: &'static str,
    pub trigger: String,
    pub state: JobState,
    pub next_fire_time: Option<DateTime<Utc>>,
    pub last_fire_time: Option<DateTime<Utc>>,
    pub fire_count: u64,
    pub created_at: DateTime<Utc>,
    pub message: String,
    pub content: JobContent,
    pub category: Option<Category>,
    pub recipients: Vec<RecipientId>,
}
