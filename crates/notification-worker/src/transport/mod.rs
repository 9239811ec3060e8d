//! 传输层抽象
//!
//! 通过 `Transport` trait 屏蔽具体消息平台，投递引擎只关心三态结果：
//! 成功、可重试失败、不可重试失败。平台限流是带最短等待的可重试失败。
//! 每次调用都带超时上限。

pub mod telegram;

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

use crate::model::{FormatMode, RecipientId};

pub use telegram::TelegramTransport;

/// 传输调用结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportResult {
    Success,
    /// 网络超时、平台 5xx
    TransientFailure(String),
    /// 平台限流，`retry_after` 之前重试仍会被拒绝
    Throttled {
        reason: String,
        retry_after: Duration,
    },
    /// 接收方无效、内容格式错误、鉴权失败
    PermanentFailure(String),
}

impl TransportResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// 平台要求的最短重试等待
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Throttled { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }

    /// 指标标签
    pub fn label(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::TransientFailure(_) => "transient",
            Self::Throttled { .. } => "throttled",
            Self::PermanentFailure(_) => "permanent",
        }
    }
}

/// 消息平台传输 trait
#[async_trait]
pub trait Transport: Send + Sync {
    /// 发送文本消息
    async fn deliver_text(
        &self,
        recipient: &RecipientId,
        text: &str,
        format: FormatMode,
        timeout: Duration,
    ) -> TransportResult;

    /// 发送文件，caption 为可选说明
    async fn deliver_file(
        &self,
        recipient: &RecipientId,
        path: &Path,
        caption: Option<&str>,
        timeout: Duration,
    ) -> TransportResult;

    /// 检查与平台的连通性
    async fn check_connectivity(&self, timeout: Duration) -> bool;

    /// 传输名称，用于日志
    fn name(&self) -> &'static str;
}
