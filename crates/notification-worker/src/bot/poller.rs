//! 聊天更新长轮询
//!
//! 循环拉取平台更新，解析其中的命令消息并把回复提交给投递链路，
//! 回复与普通通知一样经过限流与重试。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::command::BotCommand;
use super::handler::CommandHandler;
use crate::error::NotificationError;
use crate::model::{FormatMode, NotificationRequest, RecipientId};
use crate::monitoring::MetricsSampler;
use crate::service::{DeliveryHandle, Notifier};

/// 拉取失败后的等待时间
const ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// 平台推送的一条更新
#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<IncomingMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IncomingMessage {
    pub chat: Chat,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

/// 更新来源
#[async_trait]
pub trait UpdateSource: Send + Sync {
    /// 拉取 `offset` 及之后的更新，最多等待 `timeout`
    async fn fetch_updates(
        &self,
        offset: Option<i64>,
        timeout: Duration,
    ) -> Result<Vec<Update>, NotificationError>;
}

/// 聊天命令循环
pub struct CommandLoop {
    source: Arc<dyn UpdateSource>,
    handler: CommandHandler,
    notifier: Arc<Notifier>,
    poll_timeout: Duration,
}

impl CommandLoop {
    pub fn new(
        source: Arc<dyn UpdateSource>,
        notifier: Arc<Notifier>,
        sampler: Option<Arc<dyn MetricsSampler>>,
        poll_timeout: Duration,
    ) -> Self {
        Self {
            source,
            handler: CommandHandler::new(notifier.clone(), sampler),
            notifier,
            poll_timeout,
        }
    }

    /// 运行直到收到关闭信号
    ///
    /// 已处理的更新通过 offset 确认，不会重复处理。
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(poll_timeout_secs = self.poll_timeout.as_secs(), "聊天命令轮询已启动");
        let mut offset = None;

        loop {
            let fetched = tokio::select! {
                fetched = self.source.fetch_updates(offset, self.poll_timeout) => fetched,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            };

            match fetched {
                Ok(updates) => {
                    if let Some(last) = updates.iter().map(|u| u.update_id).max() {
                        offset = Some(last + 1);
                    }
                    self.process(updates).await;
                }
                Err(err) => {
                    warn!(error = %err, backoff_secs = ERROR_BACKOFF.as_secs(), "拉取聊天更新失败");
                    tokio::select! {
                        _ = tokio::time::sleep(ERROR_BACKOFF) => {}
                        changed = shutdown.changed() => {
                            if changed.is_err() || *shutdown.borrow() {
                                break;
                            }
                        }
                    }
                }
            }
        }
        info!("聊天命令轮询已停止");
    }

    /// 处理一批更新，返回已提交回复的句柄
    pub async fn process(&self, updates: Vec<Update>) -> Vec<DeliveryHandle> {
        let mut handles = Vec::new();
        for update in updates {
            let Some(message) = update.message else {
                continue;
            };
            let Some(command) = message.text.as_deref().and_then(BotCommand::parse) else {
                debug!(update_id = update.update_id, "忽略非命令消息");
                continue;
            };
            let chat = match RecipientId::new(message.chat.id.to_string()) {
                Ok(chat) => chat,
                Err(err) => {
                    warn!(error = %err, "会话 ID 无效");
                    continue;
                }
            };

            let reply = self.handler.handle(&chat, &command).await;
            match NotificationRequest::builder(reply)
                .format(FormatMode::Markdown)
                .recipients([chat])
                .build()
            {
                Ok(request) => handles.push(self.notifier.submit(request)),
                Err(err) => warn!(error = %err, command = command.name(), "构造命令回复失败"),
            }
        }
        handles
    }
}
