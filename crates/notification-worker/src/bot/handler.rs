//! 聊天命令处理
//!
//! 每条命令产出一条 Markdown 回复，订阅类命令直接作用于订阅注册表。

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use notifier_shared::observability::metrics;

use super::command::BotCommand;
use crate::formatters::format_system_report;
use crate::model::{Category, FormatMode, RecipientId};
use crate::monitoring::{MetricsSampler, sample_blocking};
use crate::service::Notifier;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

const WELCOME: &str = "🤖 *Welcome to the Notification Bot!*

This bot can send you automated notifications for:
• Application events and errors
• System monitoring alerts
• Scheduled reminders
• Custom notifications via API

Use /help to see available commands.";

const HELP: &str = "🤖 *Notification Bot Help*

*Available Commands:*
/start - Start the bot and get welcome message
/help - Show this help message
/status - Check bot status
/system - Get system information
/subscribe <type> - Subscribe to notification type
/unsubscribe <type> - Unsubscribe from notification type
/subscriptions - List your subscriptions
/test - Send a test notification

*Notification Types:*
• `system` - System monitoring alerts
• `error` - Application error notifications
• `event` - General application events
• `scheduled` - Scheduled notifications

*Examples:*
`/subscribe system` - Subscribe to system alerts
`/unsubscribe error` - Unsubscribe from error notifications";

const INVALID_CATEGORY: &str = "❌ *Invalid Subscription Type*

Available types:
• `system` - System monitoring alerts
• `error` - Application error notifications
• `event` - General application events
• `scheduled` - Scheduled notifications

Example: `/subscribe system`";

const UNKNOWN_COMMAND: &str = "❓ *Unknown Command*

Use /help to see available commands.";

/// 聊天命令处理器
pub struct CommandHandler {
    notifier: Arc<Notifier>,
    sampler: Option<Arc<dyn MetricsSampler>>,
}

impl CommandHandler {
    pub fn new(notifier: Arc<Notifier>, sampler: Option<Arc<dyn MetricsSampler>>) -> Self {
        Self { notifier, sampler }
    }

    /// 执行命令并返回回复正文（Markdown）
    pub async fn handle(&self, chat: &RecipientId, command: &BotCommand) -> String {
        metrics::record_bot_command(command.name());
        info!(chat = %chat, command = command.name(), "收到聊天命令");

        match command {
            BotCommand::Start => WELCOME.to_string(),
            BotCommand::Help => HELP.to_string(),
            BotCommand::Status => self.status().await,
            BotCommand::System => self.system().await,
            BotCommand::Subscribe(Some(category)) => {
                if self.notifier.registry().subscribe(chat.clone(), *category) {
                    format!(
                        "✅ *Subscription Updated*\n\nYou are now subscribed to: `{category}`\n\n\
                         Use /subscriptions to see all your subscriptions."
                    )
                } else {
                    format!("ℹ️ You are already subscribed to: `{category}`")
                }
            }
            BotCommand::Unsubscribe(Some(category)) => {
                if self.notifier.registry().unsubscribe(chat, *category) {
                    format!(
                        "✅ *Unsubscription Updated*\n\nYou are no longer subscribed to: `{category}`\n\n\
                         Use /subscriptions to see your remaining subscriptions."
                    )
                } else {
                    format!("ℹ️ You are not subscribed to: `{category}`")
                }
            }
            BotCommand::Subscribe(None) | BotCommand::Unsubscribe(None) => {
                INVALID_CATEGORY.to_string()
            }
            BotCommand::Subscriptions => {
                subscriptions_reply(&self.notifier.registry().list_subscriptions(chat))
            }
            BotCommand::Test => format!(
                "🧪 *Test Notification*\n\n\
                 This is a test message to verify that notifications are working correctly.\n\n\
                 🕒 {}",
                Utc::now().format(TIMESTAMP_FORMAT)
            ),
            BotCommand::Unknown(text) => {
                info!(chat = %chat, text = %text, "未知命令");
                UNKNOWN_COMMAND.to_string()
            }
        }
    }

    async fn status(&self) -> String {
        let engine = self.notifier.engine();
        let connected = engine
            .transport()
            .check_connectivity(engine.settings().transport_timeout)
            .await;
        let timestamp = Utc::now().format(TIMESTAMP_FORMAT);

        if connected {
            format!(
                "✅ *Bot Status: Online*\n\n\
                 • Bot is running normally\n\
                 • Ready to send notifications\n\n\
                 🕒 Last checked: {timestamp}"
            )
        } else {
            format!(
                "❌ *Bot Status: Error*\n\n\
                 • Messaging platform is unreachable\n\
                 • Check logs for details\n\n\
                 🕒 Last checked: {timestamp}"
            )
        }
    }

    async fn system(&self) -> String {
        let Some(sampler) = self.sampler.clone() else {
            return "❌ System metrics are not available on this server.".to_string();
        };
        match sample_blocking(sampler).await {
            Ok(metrics) => format_system_report(&metrics, FormatMode::Markdown),
            Err(err) => {
                warn!(error = %err, "聊天命令采集系统指标失败");
                "❌ Failed to collect system metrics.".to_string()
            }
        }
    }
}

fn subscriptions_reply(categories: &BTreeSet<Category>) -> String {
    if categories.is_empty() {
        return "📋 *Your Subscriptions*\n\n\
                You have no active subscriptions.\n\n\
                Use /subscribe <type> to start receiving notifications.\n\
                Available types: system, error, event, scheduled"
            .to_string();
    }

    let list = categories
        .iter()
        .map(|category| format!("• `{category}`"))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "📋 *Your Subscriptions*\n\n{list}\n\n\
         Use /subscribe <type> to add more subscriptions.\n\
         Use /unsubscribe <type> to remove subscriptions."
    )
}
